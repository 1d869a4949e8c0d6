use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::models::job::JobKey;

/// Canonical currency set the extractors normalize into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Rub,
    Usd,
    Eur,
    Gbp,
}

impl Currency {
    /// Map a currency symbol or code found in page text.
    pub fn from_marker(marker: &str) -> Option<Currency> {
        match marker {
            "₽" | "руб" | "руб." | "RUB" => Some(Currency::Rub),
            "$" | "USD" => Some(Currency::Usd),
            "€" | "EUR" => Some(Currency::Eur),
            "£" | "GBP" => Some(Currency::Gbp),
            _ => None,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Currency::Rub => "RUB",
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
            Currency::Gbp => "GBP",
        }
    }
}

/// One extraction result for a `(target, window)` pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceObservation {
    pub key: JobKey,
    pub amount: f64,
    pub currency: Currency,
    pub room_name: Option<String>,
    pub captured_at: DateTime<Utc>,
    /// Page text the amount was read from, kept for diagnostics.
    pub raw_snippet: String,
}

/// Status column of the output artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowStatus {
    Priced,
    SoldOut,
    Error,
}

/// One row of the final CSV: write-once per job key.
#[derive(Debug, Clone, Serialize)]
pub struct ScrapeResult {
    pub target_url: String,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub status: RowStatus,
    pub amount: Option<f64>,
    pub currency: Option<&'static str>,
    pub room_name: Option<String>,
    pub attempts: u32,
    pub error: Option<String>,
    pub group: Option<String>,
}
