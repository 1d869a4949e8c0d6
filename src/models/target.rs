use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

use crate::dates::StayWindow;

/// Stable identifier for one monitored listing, derived from its URL so the
/// same listing always maps to the same jobs across runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetId(String);

impl TargetId {
    pub fn from_url(url: &str) -> Self {
        TargetId(format!("{:x}", md5::compute(url.trim_end_matches('/'))))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Booking platform a listing lives on. Selected once from the URL host when
/// the target list is loaded; extraction logic is picked by this value, never
/// by sniffing page content at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Ostrovok,
    Avito,
}

impl Platform {
    pub fn from_host(url: &Url) -> Option<Platform> {
        let host = url.host_str()?;
        if host == "ostrovok.ru" || host.ends_with(".ostrovok.ru") {
            Some(Platform::Ostrovok)
        } else if host == "avito.ru" || host.ends_with(".avito.ru") {
            Some(Platform::Avito)
        } else {
            None
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TargetError {
    #[error("invalid listing URL '{line}': {source}")]
    InvalidUrl {
        line: String,
        source: url::ParseError,
    },

    #[error("unsupported platform for '{0}'")]
    UnsupportedPlatform(String),
}

/// One monitored listing.
#[derive(Debug, Clone)]
pub struct Target {
    pub id: TargetId,
    pub url: Url,
    pub platform: Platform,
    /// Best-effort listing name recovered from the URL path, used in logs
    /// until the page supplies a real title.
    pub name_hint: Option<String>,
}

impl Target {
    /// Parse one line of the target list.
    pub fn from_line(line: &str) -> Result<Target, TargetError> {
        let line = line.trim();
        let url = Url::parse(line).map_err(|source| TargetError::InvalidUrl {
            line: line.to_string(),
            source,
        })?;
        let platform = Platform::from_host(&url)
            .ok_or_else(|| TargetError::UnsupportedPlatform(line.to_string()))?;
        Ok(Target {
            id: TargetId::from_url(url.as_str()),
            name_hint: name_hint(&url),
            url,
            platform,
        })
    }

    /// URL for pricing one concrete window, with the platform's date query
    /// parameters rewritten. Any range already embedded in the source URL is
    /// replaced.
    pub fn window_url(&self, window: &StayWindow) -> Url {
        let mut url = self.url.clone();
        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| k != "dates" && k != "checkIn" && k != "checkOut")
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        {
            let mut qp = url.query_pairs_mut();
            qp.clear();
            for (k, v) in &kept {
                qp.append_pair(k, v);
            }
            match self.platform {
                Platform::Ostrovok => {
                    qp.append_pair(
                        "dates",
                        &format!(
                            "{}-{}",
                            window.check_in.format("%d.%m.%Y"),
                            window.check_out.format("%d.%m.%Y")
                        ),
                    );
                }
                Platform::Avito => {
                    qp.append_pair("checkIn", &window.check_in.format("%Y-%m-%d").to_string());
                    qp.append_pair("checkOut", &window.check_out.format("%Y-%m-%d").to_string());
                }
            }
        }
        url
    }
}

/// Recover a readable name from Ostrovok-style paths like
/// `/hotel/russia/sochi/mid9992800/grand_hotel/`.
fn name_hint(url: &Url) -> Option<String> {
    let segments: Vec<&str> = url.path_segments()?.filter(|s| !s.is_empty()).collect();
    let last = segments.last()?;
    if segments.iter().any(|s| s.starts_with("mid")) {
        let name = last
            .split('_')
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ");
        Some(name)
    } else {
        None
    }
}
