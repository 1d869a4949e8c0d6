//! Free-text date range parsing.
//!
//! Accepts loosely written expressions like `с 20 по 25 мая` or
//! `from 20 to 25 of may` and resolves them to concrete calendar dates.
//! The accepted grammar is deliberately enumerated per locale rather than
//! inferred: a range is a sequence of day numbers and month names, joined
//! by locale prepositions, dashes or commas, with an optional explicit year.
//!
//! Parsing is a pure function of the input text and the reference date, so
//! the same expression always resolves to the same interval in tests.

use chrono::{Datelike, NaiveDate};
use url::Url;

/// A requested pricing period with its resolved calendar interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateRangeSpec {
    /// Original expression as authored.
    pub raw: String,
    /// Name of the locale profile that recognized it.
    pub locale: &'static str,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("no recognized date pattern in '{0}'")]
    Unrecognized(String),

    #[error("'{0}' does not resolve to a valid calendar date")]
    InvalidDay(String),

    #[error("range end precedes range start in '{0}'")]
    Inverted(String),
}

/// Month-name table and preposition words for one supported locale.
///
/// Month tables carry every surface form that appears in range expressions
/// (Russian needs both nominative and genitive).
pub struct LocaleProfile {
    pub name: &'static str,
    months: &'static [(&'static str, u32)],
    fillers: &'static [&'static str],
}

const RU_MONTHS: &[(&str, u32)] = &[
    ("января", 1),
    ("январь", 1),
    ("февраля", 2),
    ("февраль", 2),
    ("марта", 3),
    ("март", 3),
    ("апреля", 4),
    ("апрель", 4),
    ("мая", 5),
    ("май", 5),
    ("июня", 6),
    ("июнь", 6),
    ("июля", 7),
    ("июль", 7),
    ("августа", 8),
    ("август", 8),
    ("сентября", 9),
    ("сентябрь", 9),
    ("октября", 10),
    ("октябрь", 10),
    ("ноября", 11),
    ("ноябрь", 11),
    ("декабря", 12),
    ("декабрь", 12),
];

const EN_MONTHS: &[(&str, u32)] = &[
    ("january", 1),
    ("jan", 1),
    ("february", 2),
    ("feb", 2),
    ("march", 3),
    ("mar", 3),
    ("april", 4),
    ("apr", 4),
    ("may", 5),
    ("june", 6),
    ("jun", 6),
    ("july", 7),
    ("jul", 7),
    ("august", 8),
    ("aug", 8),
    ("september", 9),
    ("sep", 9),
    ("october", 10),
    ("oct", 10),
    ("november", 11),
    ("nov", 11),
    ("december", 12),
    ("dec", 12),
];

static RUSSIAN: LocaleProfile = LocaleProfile {
    name: "ru",
    months: RU_MONTHS,
    fillers: &["с", "по", "до", "даты", "числа", "и"],
};

static ENGLISH: LocaleProfile = LocaleProfile {
    name: "en",
    months: EN_MONTHS,
    fillers: &["from", "to", "until", "till", "of", "the", "between", "and"],
};

impl LocaleProfile {
    pub fn russian() -> &'static LocaleProfile {
        &RUSSIAN
    }

    pub fn english() -> &'static LocaleProfile {
        &ENGLISH
    }

    fn month(&self, token: &str) -> Option<u32> {
        self.months
            .iter()
            .find(|(name, _)| *name == token)
            .map(|(_, n)| *n)
    }

    fn is_filler(&self, token: &str) -> bool {
        self.fillers.contains(&token)
    }
}

/// One recognized token with its position in the expression.
#[derive(Debug)]
enum Token {
    Day(u32),
    Month(u32),
    Year(i32),
}

/// Parse a free-text range expression into a concrete interval.
///
/// `today` anchors the implicit-year rule: when no year is written, the
/// nearest future occurrence of the named dates is assumed; a range that
/// already ended this year rolls forward to the next one. Ranges crossing a
/// month or year boundary (`с 28 декабря по 3 января`) are supported, as are
/// single-day ranges (one day number).
pub fn parse_range(
    text: &str,
    locale: &'static LocaleProfile,
    today: NaiveDate,
) -> Result<DateRangeSpec, ParseError> {
    let normalized: String = text
        .to_lowercase()
        .chars()
        .map(|c| match c {
            '-' | '–' | '—' | ',' | '.' => ' ',
            _ => c,
        })
        .collect();

    let mut tokens = Vec::new();
    let mut unknown = 0usize;
    for word in normalized.split_whitespace() {
        if let Ok(n) = word.parse::<u32>() {
            if (1..=31).contains(&n) {
                tokens.push(Token::Day(n));
            } else if n >= 1900 {
                tokens.push(Token::Year(n as i32));
            }
        } else if let Some(m) = locale.month(word) {
            tokens.push(Token::Month(m));
        } else if !locale.is_filler(word) {
            unknown += 1;
        }
    }

    let days: Vec<(usize, u32)> = tokens
        .iter()
        .enumerate()
        .filter_map(|(i, t)| match t {
            Token::Day(d) => Some((i, *d)),
            _ => None,
        })
        .collect();
    let months: Vec<(usize, u32)> = tokens
        .iter()
        .enumerate()
        .filter_map(|(i, t)| match t {
            Token::Month(m) => Some((i, *m)),
            _ => None,
        })
        .collect();
    let years: Vec<(usize, i32)> = tokens
        .iter()
        .enumerate()
        .filter_map(|(i, t)| match t {
            Token::Year(y) => Some((i, *y)),
            _ => None,
        })
        .collect();

    if days.is_empty() || months.is_empty() || unknown > tokens.len() {
        return Err(ParseError::Unrecognized(text.to_string()));
    }

    let (start_day, end_day) = match days.as_slice() {
        [(_, only)] => (*only, *only),
        [(_, first), (_, second), ..] => (*first, *second),
        [] => unreachable!(),
    };

    // Each day number takes the first month written after it; a trailing day
    // with no month of its own shares the last month ("с 20 по 25 мая").
    let month_for = |day_idx: usize| -> u32 {
        months
            .iter()
            .find(|(i, _)| *i > day_idx)
            .map(|(_, m)| *m)
            .unwrap_or(months[months.len() - 1].1)
    };
    let start_month = month_for(days[0].0);
    let end_month = month_for(days[days.len().min(2) - 1].0);

    let explicit_year = years.first().map(|(_, y)| *y);
    let mut start_year = explicit_year.unwrap_or_else(|| today.year());
    let mut end_year = years.last().map(|(_, y)| *y).unwrap_or(start_year);

    // A range like "28 декабря - 3 января" wraps into the next year. When a
    // single year is written it dates whichever side it stands on: trailing
    // ("по 3 января 2027") fixes the end, leading ("с 28 декабря 2026")
    // fixes the start.
    if (end_month, end_day) < (start_month, start_day) {
        let end_day_idx = days[days.len().min(2) - 1].0;
        match years.as_slice() {
            [] => end_year += 1,
            [(idx, year)] => {
                if *idx > end_day_idx {
                    start_year = *year - 1;
                } else {
                    end_year = *year + 1;
                }
            }
            _ => {}
        }
    }

    let make = |y: i32, m: u32, d: u32| {
        NaiveDate::from_ymd_opt(y, m, d).ok_or_else(|| ParseError::InvalidDay(text.to_string()))
    };

    let mut start = make(start_year, start_month, start_day)?;
    let mut end = make(end_year, end_month, end_day)?;

    if end < start {
        return Err(ParseError::Inverted(text.to_string()));
    }

    // Nearest-future rule for implicit years.
    if explicit_year.is_none() && end < today {
        start = make(start.year() + 1, start_month, start_day)?;
        end = make(end.year() + 1, end_month, end_day)?;
    }

    Ok(DateRangeSpec {
        raw: text.to_string(),
        locale: locale.name,
        start,
        end,
    })
}

/// Try each locale profile in turn.
pub fn parse_range_any(text: &str, today: NaiveDate) -> Result<DateRangeSpec, ParseError> {
    parse_range(text, LocaleProfile::russian(), today)
        .or_else(|_| parse_range(text, LocaleProfile::english(), today))
}

/// Fallback when no date file is supplied: read the range already encoded in
/// a listing URL. Ostrovok carries `dates=DD.MM.YYYY-DD.MM.YYYY`, Avito
/// carries `checkIn=YYYY-MM-DD&checkOut=YYYY-MM-DD`.
pub fn range_from_url(url: &Url) -> Option<(NaiveDate, NaiveDate)> {
    let mut check_in = None;
    let mut check_out = None;
    for (k, v) in url.query_pairs() {
        match k.as_ref() {
            "dates" => {
                let (a, b) = v.split_once('-')?;
                check_in = NaiveDate::parse_from_str(a, "%d.%m.%Y").ok();
                check_out = NaiveDate::parse_from_str(b, "%d.%m.%Y").ok();
            }
            "checkIn" => check_in = NaiveDate::parse_from_str(&v, "%Y-%m-%d").ok(),
            "checkOut" => check_out = NaiveDate::parse_from_str(&v, "%Y-%m-%d").ok(),
            _ => {}
        }
    }
    match (check_in, check_out) {
        (Some(a), Some(b)) if a <= b => Some((a, b)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn russian_basic_range() {
        let spec = parse_range("с 20 по 25 мая", LocaleProfile::russian(), today()).unwrap();
        assert_eq!(spec.start, d(2026, 5, 20));
        assert_eq!(spec.end, d(2026, 5, 25));
    }

    #[test]
    fn tolerates_case_whitespace_and_prefix_words() {
        let spec = parse_range(
            "  Даты С 1  по 10 ИЮНЯ ",
            LocaleProfile::russian(),
            today(),
        )
        .unwrap();
        assert_eq!(spec.start, d(2026, 6, 1));
        assert_eq!(spec.end, d(2026, 6, 10));
    }

    #[test]
    fn dash_separated_range() {
        let spec = parse_range("3-10 июля", LocaleProfile::russian(), today()).unwrap();
        assert_eq!(spec.start, d(2026, 7, 3));
        assert_eq!(spec.end, d(2026, 7, 10));
    }

    #[test]
    fn two_month_range() {
        let spec = parse_range(
            "с 28 июня по 3 июля",
            LocaleProfile::russian(),
            today(),
        )
        .unwrap();
        assert_eq!(spec.start, d(2026, 6, 28));
        assert_eq!(spec.end, d(2026, 7, 3));
    }

    #[test]
    fn year_boundary_wraps_forward() {
        let spec = parse_range(
            "с 28 декабря по 3 января",
            LocaleProfile::russian(),
            today(),
        )
        .unwrap();
        assert_eq!(spec.start, d(2026, 12, 28));
        assert_eq!(spec.end, d(2027, 1, 3));
    }

    #[test]
    fn year_boundary_with_trailing_explicit_year() {
        let spec = parse_range(
            "с 28 декабря по 3 января 2027",
            LocaleProfile::russian(),
            today(),
        )
        .unwrap();
        assert_eq!(spec.start, d(2026, 12, 28));
        assert_eq!(spec.end, d(2027, 1, 3));
    }

    #[test]
    fn year_boundary_with_leading_explicit_year() {
        let spec = parse_range(
            "с 28 декабря 2026 по 3 января",
            LocaleProfile::russian(),
            today(),
        )
        .unwrap();
        assert_eq!(spec.start, d(2026, 12, 28));
        assert_eq!(spec.end, d(2027, 1, 3));
    }

    #[test]
    fn implicit_year_rolls_to_nearest_future() {
        // January has already passed relative to the March reference date.
        let spec = parse_range("с 5 по 9 января", LocaleProfile::russian(), today()).unwrap();
        assert_eq!(spec.start, d(2027, 1, 5));
        assert_eq!(spec.end, d(2027, 1, 9));
    }

    #[test]
    fn explicit_year_is_honored_even_in_the_past() {
        let spec = parse_range(
            "с 5 по 9 января 2025",
            LocaleProfile::russian(),
            today(),
        )
        .unwrap();
        assert_eq!(spec.start, d(2025, 1, 5));
        assert_eq!(spec.end, d(2025, 1, 9));
    }

    #[test]
    fn single_day_range() {
        let spec = parse_range("15 августа", LocaleProfile::russian(), today()).unwrap();
        assert_eq!(spec.start, spec.end);
        assert_eq!(spec.start, d(2026, 8, 15));
    }

    #[test]
    fn english_locale() {
        let spec = parse_range(
            "from 20 to 25 of May",
            LocaleProfile::english(),
            today(),
        )
        .unwrap();
        assert_eq!(spec.start, d(2026, 5, 20));
        assert_eq!(spec.end, d(2026, 5, 25));
    }

    #[test]
    fn unrecognized_text_fails() {
        assert!(matches!(
            parse_range("hello world", LocaleProfile::russian(), today()),
            Err(ParseError::Unrecognized(_))
        ));
        assert!(matches!(
            parse_range("", LocaleProfile::english(), today()),
            Err(ParseError::Unrecognized(_))
        ));
    }

    #[test]
    fn impossible_day_fails() {
        assert!(matches!(
            parse_range("с 30 по 31 февраля", LocaleProfile::russian(), today()),
            Err(ParseError::InvalidDay(_))
        ));
    }

    #[test]
    fn inverted_range_fails() {
        assert!(matches!(
            parse_range(
                "с 25 мая по 20 мая 2026",
                LocaleProfile::russian(),
                today()
            ),
            Err(ParseError::Inverted(_))
        ));
    }

    #[test]
    fn parsing_is_deterministic_roundtrip() {
        // Generate expressions from intervals, parse them back and compare.
        for (start_day, end_day, month_name, month) in [
            (1u32, 2u32, "мая", 5u32),
            (10, 20, "июня", 6),
            (5, 5, "сентября", 9),
        ] {
            let text = format!("с {start_day} по {end_day} {month_name}");
            let first = parse_range(&text, LocaleProfile::russian(), today()).unwrap();
            let second = parse_range(&text, LocaleProfile::russian(), today()).unwrap();
            assert_eq!(first, second);
            assert_eq!(first.start, d(2026, month, start_day));
            assert_eq!(first.end, d(2026, month, end_day));
        }
    }

    #[test]
    fn url_fallback_ostrovok_format() {
        let url = Url::parse(
            "https://ostrovok.ru/hotel/russia/sochi/mid123/test/?q=2042&dates=05.04.2026-07.04.2026&guests=2",
        )
        .unwrap();
        assert_eq!(
            range_from_url(&url),
            Some((d(2026, 4, 5), d(2026, 4, 7)))
        );
    }

    #[test]
    fn url_fallback_avito_format() {
        let url = Url::parse(
            "https://www.avito.ru/sochi/kvartiry/posutochno?checkIn=2026-04-05&checkOut=2026-04-07",
        )
        .unwrap();
        assert_eq!(
            range_from_url(&url),
            Some((d(2026, 4, 5), d(2026, 4, 7)))
        );
    }

    #[test]
    fn url_without_dates_yields_none() {
        let url = Url::parse("https://ostrovok.ru/hotel/russia/sochi/mid123/test/").unwrap();
        assert_eq!(range_from_url(&url), None);
    }
}
