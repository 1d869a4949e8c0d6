//! Browser session lifecycle for workers.
//!
//! Each worker exclusively owns one automation session; sessions are never
//! shared across concurrent jobs because the underlying driver is
//! single-threaded per session. The `SessionManager` opens sessions lazily,
//! counts consecutive anti-bot outcomes and rotates the session (discard and
//! recreate, a fresh browser identity) once the configured threshold is hit.

use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions};
use std::time::Duration;
use tracing::{debug, info, warn};

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36";

/// Block pages and interstitial challenges the target sites serve to
/// suspected bots. Matched case-insensitively against fetched content.
const CHALLENGE_MARKERS: &[&str] = &[
    "captcha",
    "are you a robot",
    "access denied",
    "доступ ограничен",
    "подтвердите, что вы не робот",
    "запросы с вашего устройства похожи на автоматические",
];

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("failed to open browser session: {0}")]
    Session(String),

    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("timed out waiting for {0} to render")]
    Timeout(String),

    #[error("anti-bot challenge detected ('{0}')")]
    AntiBot(&'static str),
}

impl FetchError {
    pub fn is_antibot(&self) -> bool {
        matches!(self, FetchError::AntiBot(_))
    }
}

/// Return the matching challenge marker when content looks like a block page.
pub fn detect_challenge(html: &str) -> Option<&'static str> {
    let lowered = html.to_lowercase();
    CHALLENGE_MARKERS
        .iter()
        .find(|marker| lowered.contains(**marker))
        .copied()
}

/// One automation session able to fetch rendered page content.
#[async_trait]
pub trait PageSession: Send {
    async fn fetch(&mut self, url: &str) -> Result<String, FetchError>;
}

/// Opens fresh sessions; called at startup and on every rotation.
pub trait SessionFactory: Send + Sync {
    fn open(&self) -> Result<Box<dyn PageSession>, FetchError>;
}

// ───────────────────────── Chrome engine ─────────────────────────

/// Headless Chrome session. One browser per session; a fresh tab per fetch.
pub struct ChromeSession {
    browser: Browser,
    nav_timeout: Duration,
    stabilize: Duration,
}

#[async_trait]
impl PageSession for ChromeSession {
    async fn fetch(&mut self, url: &str) -> Result<String, FetchError> {
        let nav_err = |e: anyhow::Error| FetchError::Navigation {
            url: url.to_string(),
            reason: e.to_string(),
        };

        let tab = self.browser.new_tab().map_err(nav_err)?;
        tab.set_default_timeout(self.nav_timeout);
        tab.set_user_agent(USER_AGENT, None, None).map_err(nav_err)?;
        tab.navigate_to(url).map_err(nav_err)?;
        tab.wait_until_navigated()
            .map_err(|_| FetchError::Timeout(url.to_string()))?;

        // Let client-side rendering settle before reading the DOM.
        tokio::time::sleep(self.stabilize).await;

        let html = tab
            .evaluate("document.documentElement.outerHTML", false)
            .map_err(nav_err)?
            .value
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        let _ = tab.close(true);

        if html.is_empty() {
            return Err(FetchError::Timeout(url.to_string()));
        }
        if let Some(marker) = detect_challenge(&html) {
            return Err(FetchError::AntiBot(marker));
        }
        Ok(html)
    }
}

pub struct ChromeFactory {
    pub headless: bool,
    pub nav_timeout: Duration,
    pub stabilize: Duration,
}

impl SessionFactory for ChromeFactory {
    fn open(&self) -> Result<Box<dyn PageSession>, FetchError> {
        debug!("launching headless Chrome");
        let options = LaunchOptions::default_builder()
            .headless(self.headless)
            .build()
            .map_err(|e| FetchError::Session(e.to_string()))?;
        let browser = Browser::new(options).map_err(|e| FetchError::Session(e.to_string()))?;
        Ok(Box::new(ChromeSession {
            browser,
            nav_timeout: self.nav_timeout,
            stabilize: self.stabilize,
        }))
    }
}

// ───────────────────────── HTTP engine ─────────────────────────

/// Plain HTTP fetcher for pages that render server-side, and for running
/// the pipeline on hosts without Chrome.
pub struct HttpSession {
    client: reqwest::Client,
}

#[async_trait]
impl PageSession for HttpSession {
    async fn fetch(&mut self, url: &str) -> Result<String, FetchError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout(url.to_string())
            } else {
                FetchError::Navigation {
                    url: url.to_string(),
                    reason: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if status.as_u16() == 403 || status.as_u16() == 429 {
            return Err(FetchError::AntiBot("http block status"));
        }
        if !status.is_success() {
            return Err(FetchError::Navigation {
                url: url.to_string(),
                reason: format!("HTTP {status}"),
            });
        }

        let html = response.text().await.map_err(|e| FetchError::Navigation {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        if let Some(marker) = detect_challenge(&html) {
            return Err(FetchError::AntiBot(marker));
        }
        Ok(html)
    }
}

pub struct HttpFactory {
    pub timeout: Duration,
}

impl SessionFactory for HttpFactory {
    fn open(&self) -> Result<Box<dyn PageSession>, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(self.timeout)
            .build()
            .map_err(|e| FetchError::Session(e.to_string()))?;
        Ok(Box::new(HttpSession { client }))
    }
}

// ──────────────────────── Session manager ────────────────────────

/// Owns the worker's live session and its rotation policy.
pub struct SessionManager {
    factory: Box<dyn SessionFactory>,
    session: Option<Box<dyn PageSession>>,
    consecutive_antibot: u32,
    rotate_after: u32,
    rotations: u32,
}

impl SessionManager {
    pub fn new(factory: Box<dyn SessionFactory>, rotate_after: u32) -> SessionManager {
        SessionManager {
            factory,
            session: None,
            consecutive_antibot: 0,
            rotate_after: rotate_after.max(1),
            rotations: 0,
        }
    }

    /// Fetch a page through the current session, opening one if needed.
    /// Anti-bot outcomes are counted and trip a rotation at the threshold so
    /// the next fetch starts with a fresh identity.
    pub async fn fetch(&mut self, url: &str) -> Result<String, FetchError> {
        if self.session.is_none() {
            self.session = Some(self.factory.open()?);
        }
        let session = self.session.as_mut().expect("session just opened");

        let outcome = session.fetch(url).await;
        match &outcome {
            Ok(_) => self.consecutive_antibot = 0,
            Err(e) if e.is_antibot() => {
                self.consecutive_antibot += 1;
                warn!(
                    url,
                    consecutive = self.consecutive_antibot,
                    "anti-bot challenge detected"
                );
                metrics::counter!("roomwatch_antibot_detections").increment(1);
                if self.consecutive_antibot >= self.rotate_after {
                    self.rotate();
                }
            }
            Err(_) => {}
        }
        outcome
    }

    /// Discard the current session so the next fetch opens a fresh one.
    pub fn rotate(&mut self) {
        info!("rotating browser session after repeated anti-bot outcomes");
        self.session = None;
        self.consecutive_antibot = 0;
        self.rotations += 1;
        metrics::counter!("roomwatch_session_rotations").increment(1);
    }

    pub fn rotations(&self) -> u32 {
        self.rotations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ScriptedSession {
        outcomes: Vec<Result<String, FetchError>>,
    }

    #[async_trait]
    impl PageSession for ScriptedSession {
        async fn fetch(&mut self, _url: &str) -> Result<String, FetchError> {
            if self.outcomes.is_empty() {
                Ok("<html></html>".into())
            } else {
                self.outcomes.remove(0)
            }
        }
    }

    struct ScriptedFactory {
        script: std::sync::Mutex<Vec<Vec<Result<String, FetchError>>>>,
        opened: std::sync::Arc<std::sync::atomic::AtomicU32>,
    }

    impl SessionFactory for ScriptedFactory {
        fn open(&self) -> Result<Box<dyn PageSession>, FetchError> {
            self.opened
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            let mut script = self.script.lock().unwrap();
            let outcomes = if script.is_empty() {
                Vec::new()
            } else {
                script.remove(0)
            };
            Ok(Box::new(ScriptedSession { outcomes }))
        }
    }

    fn antibot() -> Result<String, FetchError> {
        Err(FetchError::AntiBot("captcha"))
    }

    #[test]
    fn challenge_markers_are_case_insensitive() {
        assert!(detect_challenge("<div>Please solve this CAPTCHA</div>").is_some());
        assert!(detect_challenge("<h1>Доступ ограничен</h1>").is_some());
        assert!(detect_challenge("<h1>Grand Hotel</h1><p>from 4 900 ₽</p>").is_none());
    }

    #[tokio::test]
    async fn rotates_after_threshold_consecutive_antibot_outcomes() {
        let opened = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
        let factory = ScriptedFactory {
            script: std::sync::Mutex::new(vec![
                vec![antibot(), antibot(), antibot()],
                vec![Ok("<html>priced</html>".into())],
            ]),
            opened: std::sync::Arc::clone(&opened),
        };
        let mut manager = SessionManager::new(Box::new(factory), 3);

        for _ in 0..3 {
            assert!(manager.fetch("https://ostrovok.ru/x").await.is_err());
        }
        assert_eq!(manager.rotations(), 1);

        // Fourth fetch runs on the fresh session and succeeds.
        let html = manager.fetch("https://ostrovok.ru/x").await.unwrap();
        assert!(html.contains("priced"));
        assert_eq!(manager.rotations(), 1);
        assert_eq!(opened.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn success_resets_the_antibot_streak() {
        let factory = ScriptedFactory {
            script: std::sync::Mutex::new(vec![vec![
                antibot(),
                antibot(),
                Ok("<html></html>".into()),
                antibot(),
                antibot(),
            ]]),
            opened: std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0)),
        };
        let mut manager = SessionManager::new(Box::new(factory), 3);

        for _ in 0..5 {
            let _ = manager.fetch("https://ostrovok.ru/x").await;
        }
        // Streak was broken by the success in the middle; never hit 3.
        assert_eq!(manager.rotations(), 0);
    }

    #[tokio::test]
    async fn network_failures_do_not_count_toward_rotation() {
        let factory = ScriptedFactory {
            script: std::sync::Mutex::new(vec![vec![
                Err(FetchError::Timeout("u".into())),
                antibot(),
                Err(FetchError::Timeout("u".into())),
                antibot(),
                antibot(),
            ]]),
            opened: std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0)),
        };
        let mut manager = SessionManager::new(Box::new(factory), 3);
        for _ in 0..5 {
            let _ = manager.fetch("https://ostrovok.ru/x").await;
        }
        assert_eq!(manager.rotations(), 1);
    }
}
