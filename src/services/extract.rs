//! Price extraction from rendered page content.
//!
//! One extractor per booking platform, behind a capability trait so new
//! platforms plug in without touching the queue or session layers. The
//! extractor for a job is picked from `Target::platform`, never by sniffing
//! the content.
//!
//! Every extractor distinguishes three outcomes: a price was found, the
//! listing is explicitly sold out for the window (not an error), or neither
//! marker was present and the content is unparseable.

use scraper::{ElementRef, Html, Selector};

use crate::models::price::Currency;
use crate::models::target::Platform;

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("no price or availability marker found (content starts: '{snippet}')")]
    Unparseable { snippet: String },
}

impl ExtractError {
    fn unparseable(html: &str) -> ExtractError {
        let snippet: String = html.chars().take(200).collect();
        ExtractError::Unparseable { snippet }
    }

    pub fn snippet(&self) -> &str {
        match self {
            ExtractError::Unparseable { snippet } => snippet,
        }
    }
}

/// Successful extraction outcomes.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    Found {
        amount: f64,
        currency: Currency,
        room_name: Option<String>,
        /// Text the price was read from, kept on the observation.
        source_text: String,
    },
    SoldOut,
}

pub trait PriceExtractor: Send + Sync {
    fn platform(&self) -> Platform;
    fn extract(&self, html: &str) -> Result<Extraction, ExtractError>;
}

static OSTROVOK: OstrovokExtractor = OstrovokExtractor;
static AVITO: AvitoExtractor = AvitoExtractor;

pub fn extractor_for(platform: Platform) -> &'static dyn PriceExtractor {
    match platform {
        Platform::Ostrovok => &OSTROVOK,
        Platform::Avito => &AVITO,
    }
}

/// Pull an amount out of price text like `from 4 900 ₽` or `12 300,50 ₽`.
/// Thousands separators (spaces, non-breaking spaces) are dropped; a comma
/// before the final two digits is a decimal mark.
fn parse_amount(text: &str) -> Option<f64> {
    let cleaned: String = text
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '\u{a0}')
        .map(|c| if c == ',' { '.' } else { c })
        .collect();
    let start = cleaned.find(|c: char| c.is_ascii_digit())?;
    let digits: String = cleaned[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    // "4.900" style separators: keep only the last dot as decimal point.
    let mut parts: Vec<&str> = digits.split('.').filter(|p| !p.is_empty()).collect();
    if parts.is_empty() {
        return None;
    }
    let amount = if parts.len() > 1 && parts[parts.len() - 1].len() <= 2 {
        let decimals = parts.pop().expect("non-empty");
        format!("{}.{}", parts.concat(), decimals)
    } else {
        parts.concat()
    };
    amount.parse().ok()
}

fn detect_currency(text: &str) -> Option<Currency> {
    for marker in ["₽", "руб", "$", "USD", "€", "EUR", "£", "GBP", "RUB"] {
        if text.contains(marker) {
            return Currency::from_marker(marker);
        }
    }
    None
}

fn parse_price_text(text: &str) -> Option<(f64, Currency)> {
    let currency = detect_currency(text)?;
    let amount = parse_amount(text)?;
    if amount > 0.0 {
        Some((amount, currency))
    } else {
        None
    }
}

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("valid selector")
}

fn element_text(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

// ───────────────────────── Ostrovok ─────────────────────────

/// Phrases Ostrovok shows when the listing has no rooms for the window.
/// Checked before any price lookup: when the target hotel is sold out the
/// page still shows prices of *recommended* hotels, which must never be
/// scraped as the target's price.
const OSTROVOK_SOLD_OUT_MARKERS: &[&str] = &[
    "there are no rooms available for the selected dates",
    "на выбранные даты нет номеров",
    "no rooms available",
];

/// Words marking non-rate amounts that must not win price selection.
const PRICE_EXCLUDE_WORDS: &[&str] = &["prepayment", "предоплата"];

pub struct OstrovokExtractor;

impl OstrovokExtractor {
    /// Headline price shown above the room list. Class names carry build
    /// hashes, so selectors match on stable class-name fragments.
    fn headline_price(&self, document: &Html) -> Option<(f64, Currency, String)> {
        for css in [
            "p[class*='Price_priceTitle']",
            "p[class*='priceTitle']",
            "div[class*='price'] p",
            "p[class*='Price']",
        ] {
            let sel = selector(css);
            for element in document.select(&sel) {
                let text = element_text(element);
                if let Some((amount, currency)) = parse_price_text(&text) {
                    return Some((amount, currency, text));
                }
            }
        }
        None
    }

    /// Fallback: walk room cards and take the cheapest room rate.
    fn cheapest_room(&self, document: &Html) -> Option<(f64, Currency, String, String)> {
        let mut best: Option<(f64, Currency, String, String)> = None;
        for css in [
            "div[data-component='RoomRow']",
            "div[data-component='RoomCard']",
            "div[class*='Room_room']",
            "div[class*='RoomCard']",
        ] {
            let card_sel = selector(css);
            let name_sel = selector("h3, div[class*='title'], div[class*='RoomName']");
            let price_sel = selector("[class*='price'], [class*='Price'], [class*='amount']");
            for card in document.select(&card_sel) {
                let room_name = card
                    .select(&name_sel)
                    .next()
                    .map(element_text)
                    .filter(|t| !t.is_empty())
                    .unwrap_or_else(|| "Standard Room".to_string());
                for price_el in card.select(&price_sel) {
                    let text = element_text(price_el);
                    let lowered = text.to_lowercase();
                    if PRICE_EXCLUDE_WORDS.iter().any(|w| lowered.contains(w)) {
                        continue;
                    }
                    if let Some((amount, currency)) = parse_price_text(&text) {
                        if best.as_ref().map_or(true, |(b, ..)| amount < *b) {
                            best = Some((amount, currency, room_name.clone(), text));
                        }
                    }
                }
            }
            if best.is_some() {
                break;
            }
        }
        best
    }
}

impl PriceExtractor for OstrovokExtractor {
    fn platform(&self) -> Platform {
        Platform::Ostrovok
    }

    fn extract(&self, html: &str) -> Result<Extraction, ExtractError> {
        let lowered = html.to_lowercase();
        if OSTROVOK_SOLD_OUT_MARKERS
            .iter()
            .any(|m| lowered.contains(m))
        {
            return Ok(Extraction::SoldOut);
        }

        let document = Html::parse_document(html);

        if let Some((amount, currency, text)) = self.headline_price(&document) {
            return Ok(Extraction::Found {
                amount,
                currency,
                room_name: None,
                source_text: text,
            });
        }

        if let Some((amount, currency, room_name, text)) = self.cheapest_room(&document) {
            return Ok(Extraction::Found {
                amount,
                currency,
                room_name: Some(room_name),
                source_text: text,
            });
        }

        Err(ExtractError::unparseable(html))
    }
}

// ───────────────────────── Avito ─────────────────────────

/// Amounts near these words are deposits, not nightly rates.
const AVITO_DEPOSIT_WORDS: &[&str] = &["залог", "депозит", "deposit", "security"];

const AVITO_SOLD_OUT_MARKERS: &[&str] = &[
    "объявление снято с публикации",
    "занято на выбранные даты",
    "it's no longer available",
];

pub struct AvitoExtractor;

impl PriceExtractor for AvitoExtractor {
    fn platform(&self) -> Platform {
        Platform::Avito
    }

    fn extract(&self, html: &str) -> Result<Extraction, ExtractError> {
        let lowered = html.to_lowercase();
        if AVITO_SOLD_OUT_MARKERS.iter().any(|m| lowered.contains(m)) {
            return Ok(Extraction::SoldOut);
        }

        let document = Html::parse_document(html);

        // Room description line looks like "15 м², 2 кровати".
        let any_sel = selector("span, p, div, strong, h1, h2, h3, li");
        let mut room_name = None;
        for element in document.select(&any_sel) {
            let text = element_text(element);
            if text.len() < 64 && text.contains("м²") {
                room_name = Some(text);
                break;
            }
        }

        // Listings show several amounts (nightly rate, total, deposit); the
        // lowest non-deposit amount is the nightly rate.
        let mut best: Option<(f64, Currency, String)> = None;
        let mut scan = |text: String| {
            let lowered = text.to_lowercase();
            if AVITO_DEPOSIT_WORDS.iter().any(|w| lowered.contains(w)) {
                return;
            }
            if let Some((amount, currency)) = parse_price_text(&text) {
                if best.as_ref().map_or(true, |(b, ..)| amount < *b) {
                    best = Some((amount, currency, text));
                }
            }
        };

        for css in ["[itemprop='price']", "span.price", "div.price", "[data-price]"] {
            let sel = selector(css);
            for element in document.select(&sel) {
                scan(element_text(element));
            }
        }
        for element in document.select(&any_sel) {
            let text = element_text(element);
            // Leaf-sized text only; big containers aggregate unrelated amounts.
            if text.len() <= 48 {
                scan(text);
            }
        }

        match best {
            Some((amount, currency, text)) => Ok(Extraction::Found {
                amount,
                currency,
                room_name,
                source_text: text,
            }),
            None => Err(ExtractError::unparseable(html)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OSTROVOK_HEADLINE: &str = r#"
        <html><body>
          <h1 class="DesktopHeader_name-ab12">Grand Hotel</h1>
          <div class="Header_price">
            <p class="Price_priceTitle-x9f">from 4 900 ₽</p>
          </div>
        </body></html>"#;

    const OSTROVOK_ROOMS: &str = r#"
        <html><body>
          <div data-component="RoomCard">
            <h3>Standard Twin</h3>
            <span class="Price_amount">6 200 ₽</span>
            <span class="Price_amount">Prepayment 1 000 ₽</span>
          </div>
          <div data-component="RoomCard">
            <h3>Deluxe Suite</h3>
            <span class="Price_amount">12 300 ₽</span>
          </div>
        </body></html>"#;

    const OSTROVOK_SOLD_OUT: &str = r#"
        <html><body>
          <h1>Grand Hotel</h1>
          <div>На выбранные даты нет номеров</div>
          <div class="Recommended"><p class="Price_priceTitle">3 100 ₽</p></div>
        </body></html>"#;

    const AVITO_LISTING: &str = r#"
        <html><body>
          <h1>Квартира-студия у моря</h1>
          <li>15 м², 2 кровати</li>
          <span itemprop="price">2 500 ₽</span>
          <span>Залог 10 000 ₽</span>
          <span>Итого 5 000 ₽</span>
        </body></html>"#;

    #[test]
    fn ostrovok_headline_price_wins() {
        let out = OstrovokExtractor.extract(OSTROVOK_HEADLINE).unwrap();
        match out {
            Extraction::Found {
                amount,
                currency,
                room_name,
                ..
            } => {
                assert_eq!(amount, 4900.0);
                assert_eq!(currency, Currency::Rub);
                assert_eq!(room_name, None);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn ostrovok_cheapest_room_excluding_prepayment() {
        let out = OstrovokExtractor.extract(OSTROVOK_ROOMS).unwrap();
        match out {
            Extraction::Found {
                amount, room_name, ..
            } => {
                assert_eq!(amount, 6200.0);
                assert_eq!(room_name.as_deref(), Some("Standard Twin"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn sold_out_marker_beats_recommended_hotel_prices() {
        // The sold-out page still renders recommended hotels with prices;
        // the explicit absence marker must win.
        assert_eq!(
            OstrovokExtractor.extract(OSTROVOK_SOLD_OUT).unwrap(),
            Extraction::SoldOut
        );
    }

    #[test]
    fn unparseable_content_is_an_error_with_diagnostics() {
        let err = OstrovokExtractor
            .extract("<html><body><h1>Grand Hotel</h1></body></html>")
            .unwrap_err();
        assert!(err.snippet().contains("Grand Hotel"));
    }

    #[test]
    fn avito_nightly_rate_skips_deposit_and_total() {
        let out = AvitoExtractor.extract(AVITO_LISTING).unwrap();
        match out {
            Extraction::Found {
                amount,
                currency,
                room_name,
                ..
            } => {
                assert_eq!(amount, 2500.0);
                assert_eq!(currency, Currency::Rub);
                assert_eq!(room_name.as_deref(), Some("15 м², 2 кровати"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn amount_parsing_handles_separators() {
        assert_eq!(parse_amount("4 900 ₽"), Some(4900.0));
        assert_eq!(parse_amount("from 12\u{a0}300 ₽"), Some(12300.0));
        assert_eq!(parse_amount("1,234.50"), Some(1234.50));
        assert_eq!(parse_amount("2500"), Some(2500.0));
        assert_eq!(parse_amount("12 300,50 ₽"), Some(12300.50));
        assert_eq!(parse_amount("no digits"), None);
    }

    #[test]
    fn extractor_selection_is_explicit_by_platform() {
        assert_eq!(
            extractor_for(Platform::Ostrovok).platform(),
            Platform::Ostrovok
        );
        assert_eq!(extractor_for(Platform::Avito).platform(), Platform::Avito);
    }
}
