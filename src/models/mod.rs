pub mod job;
pub mod price;
pub mod target;
