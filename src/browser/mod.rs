pub mod html;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::Locator;
use crate::error::{ConfigError, PageError};

pub use html::{HtmlPage, HttpPageFactory};

// ── Device profiles ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    Desktop,
    Mobile,
}

impl Profile {
    pub fn as_str(self) -> &'static str {
        match self {
            Profile::Desktop => "desktop",
            Profile::Mobile => "mobile",
        }
    }

    pub fn preset(self) -> ProfilePreset {
        match self {
            Profile::Desktop => ProfilePreset {
                viewport: (1366, 768),
                device_scale_factor: 1.0,
                is_mobile: false,
                has_touch: false,
                user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
                             (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
            },
            Profile::Mobile => ProfilePreset {
                viewport: (390, 844),
                device_scale_factor: 3.0,
                is_mobile: true,
                has_touch: true,
                user_agent: "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) \
                             AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 \
                             Mobile/15E148 Safari/604.1",
            },
        }
    }

    /// Parse a comma-separated list such as `desktop,mobile`.
    pub fn parse_list(s: &str) -> Result<Vec<Profile>, ConfigError> {
        s.split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(Profile::from_str)
            .collect()
    }
}

impl FromStr for Profile {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "desktop" => Ok(Profile::Desktop),
            "mobile" => Ok(Profile::Mobile),
            _ => Err(ConfigError::UnknownProfile(s.to_string())),
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProfilePreset {
    pub viewport: (u32, u32),
    pub device_scale_factor: f32,
    pub is_mobile: bool,
    pub has_touch: bool,
    pub user_agent: &'static str,
}

/// Everything needed to open one page context.
#[derive(Debug, Clone)]
pub struct BrowserConfig {
    pub profile: Profile,
    pub headless: bool,
    pub tracing: bool,
    pub proxy_url: Option<String>,
    pub user_agent_pool: Option<Vec<String>>,
}

impl BrowserConfig {
    pub fn new(profile: Profile) -> Self {
        BrowserConfig {
            profile,
            headless: true,
            tracing: false,
            proxy_url: None,
            user_agent_pool: None,
        }
    }

    /// User agent for the `nth` opened page: rotates through the pool, else the preset's.
    pub fn user_agent(&self, nth: usize) -> String {
        match self.user_agent_pool.as_deref() {
            Some(pool) if !pool.is_empty() => pool[nth % pool.len()].clone(),
            _ => self.profile.preset().user_agent.to_string(),
        }
    }
}

// ── Page capability ──

/// Navigation readiness condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitUntil {
    DomContentLoaded,
    Load,
    NetworkIdle,
}

/// A single page context. All DOM access on one page is sequential, so
/// implementations may use single-threaded interior mutability.
#[async_trait(?Send)]
pub trait Page {
    type Node: Clone;

    async fn navigate(&self, url: &str, wait: WaitUntil, timeout: Duration)
        -> Result<(), PageError>;

    /// Give late network activity time to finish.
    async fn settle(&self, idle: Duration) {
        tokio::time::sleep(idle).await;
    }

    /// All matches under `scope` (or the document), in document order.
    async fn locate(
        &self,
        scope: Option<&Self::Node>,
        locator: &Locator,
    ) -> Result<Vec<Self::Node>, PageError>;

    /// Nearest ancestor-or-self element with the given tag name.
    async fn ancestor_or_self(
        &self,
        node: &Self::Node,
        tag: &str,
    ) -> Result<Option<Self::Node>, PageError>;

    async fn inner_text(&self, node: &Self::Node) -> Result<String, PageError>;

    async fn attribute(&self, node: &Self::Node, name: &str)
        -> Result<Option<String>, PageError>;

    async fn screenshot(&self) -> Result<Vec<u8>, PageError>;

    async fn content(&self) -> Result<String, PageError>;

    /// Release the page and its context. Called exactly once per opened page.
    async fn close(&self) {}
}

#[async_trait(?Send)]
pub trait PageFactory {
    type Page: Page;

    async fn open(&self, config: &BrowserConfig) -> Result<Self::Page, PageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_profile_lists() {
        assert_eq!(
            Profile::parse_list("desktop, Mobile,").unwrap(),
            vec![Profile::Desktop, Profile::Mobile]
        );
        assert_eq!(
            Profile::parse_list("desktop,tablet"),
            Err(ConfigError::UnknownProfile("tablet".into()))
        );
    }

    #[test]
    fn presets_differ_by_profile() {
        let d = Profile::Desktop.preset();
        let m = Profile::Mobile.preset();
        assert_eq!(d.viewport, (1366, 768));
        assert!(m.is_mobile && m.has_touch);
        assert!(m.user_agent.contains("iPhone"));
    }

    #[test]
    fn user_agent_pool_rotates() {
        let mut cfg = BrowserConfig::new(Profile::Desktop);
        assert!(cfg.user_agent(0).contains("X11"));
        cfg.user_agent_pool = Some(vec!["a".into(), "b".into()]);
        assert_eq!(cfg.user_agent(0), "a");
        assert_eq!(cfg.user_agent(1), "b");
        assert_eq!(cfg.user_agent(2), "a");
    }
}
