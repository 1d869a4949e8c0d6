//! Date range parsing and stay window expansion.

pub mod expand;
pub mod parse;

pub use expand::{windows, StayWindow, StayWindows};
pub use parse::{parse_range, range_from_url, DateRangeSpec, LocaleProfile, ParseError};
