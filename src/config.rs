use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::browser::WaitUntil;
use crate::error::ConfigError;
use crate::retry::RetryPolicy;

/// Sentinel selector: use the scope node itself instead of descending.
pub const SELF_SELECTOR: &str = ":self";

// ── Site configuration ──

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SiteConfig {
    pub site: SiteInfo,
    #[serde(default)]
    pub sections: Vec<SectionConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SiteInfo {
    pub entry_url: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SectionConfig {
    pub name: String,
    #[serde(default)]
    pub input: Option<Locator>,
    #[serde(default)]
    pub list: Option<ListSpec>,
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
    #[serde(default)]
    pub validation: Validation,
}

/// How a section's root node is found.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Locator {
    Css(String),
    Xpath(String),
    Text(String),
}

impl Locator {
    /// Interpret a field/item selector string: `xpath=` / `//` prefixes mean XPath,
    /// `text=` means a text match, anything else is CSS.
    pub fn from_selector(s: &str) -> Locator {
        let s = s.trim();
        if let Some(rest) = s.strip_prefix("xpath=") {
            Locator::Xpath(rest.to_string())
        } else if s.starts_with("//") || s.starts_with("..") {
            Locator::Xpath(s.to_string())
        } else if let Some(rest) = s.strip_prefix("text=") {
            Locator::Text(rest.to_string())
        } else {
            Locator::Css(s.to_string())
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListSpec {
    pub item_selector: String,
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: FieldType,
    pub selector: String,
    #[serde(default)]
    pub attr: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    TextOptional,
    Attr,
    Image,
    Srcset,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Validation {
    #[serde(default)]
    pub min_count: usize,
}

impl SectionConfig {
    /// Fields that apply to this section: the list's when enumerating, else the singleton's.
    pub fn active_fields(&self) -> &[FieldSpec] {
        match &self.list {
            Some(list) => &list.fields,
            None => &self.fields,
        }
    }
}

impl FieldSpec {
    /// Attribute to read, with the per-type default applied.
    pub fn attr_name(&self) -> Option<&str> {
        match (self.kind, self.attr.as_deref()) {
            (_, Some(a)) => Some(a),
            (FieldType::Image, None) => Some("src"),
            (FieldType::Srcset, None) => Some("srcset"),
            _ => None,
        }
    }
}

impl SiteConfig {
    /// Load a site config from a YAML/JSON/TOML file (format picked by extension).
    pub fn load(path: &Path) -> Result<Self> {
        let cfg: SiteConfig = ::config::Config::builder()
            .add_source(::config::File::from(path))
            .build()
            .with_context(|| format!("Failed to read site config {}", path.display()))?
            .try_deserialize()
            .with_context(|| format!("Invalid site config {}", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.site.entry_url.trim().is_empty() {
            return Err(ConfigError::EmptyEntryUrl);
        }
        let mut seen = HashSet::new();
        for section in &self.sections {
            if !seen.insert(section.name.as_str()) {
                return Err(ConfigError::DuplicateSection(section.name.clone()));
            }
            for field in section.active_fields() {
                if field.kind == FieldType::Attr && field.attr.is_none() {
                    return Err(ConfigError::MissingAttr {
                        section: section.name.clone(),
                        field: field.name.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

// ── Runtime settings ──

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub data_dir: PathBuf,
    pub nav_timeout_ms: u64,
    pub wait_until: WaitUntil,
    pub settle_ms: u64,
    pub section_timeout_ms: u64,
    pub retry_max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_multiplier: f64,
    pub retry_max_delay_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            data_dir: PathBuf::from("data"),
            nav_timeout_ms: 30_000,
            wait_until: WaitUntil::DomContentLoaded,
            settle_ms: 1_500,
            section_timeout_ms: 15_000,
            retry_max_attempts: 3,
            retry_base_delay_ms: 500,
            retry_multiplier: 2.0,
            retry_max_delay_ms: 5_000,
        }
    }
}

impl Settings {
    /// Defaults, overlaid by an optional settings file, overlaid by `WATCH_*` env vars.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(p) = path {
            builder = builder.add_source(::config::File::from(p));
        }
        let settings = builder
            .add_source(::config::Environment::with_prefix("WATCH").try_parsing(true))
            .build()
            .context("Failed to build settings")?
            .try_deserialize()
            .context("Invalid settings")?;
        Ok(settings)
    }

    pub fn nav_timeout(&self) -> Duration {
        Duration::from_millis(self.nav_timeout_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn section_timeout(&self) -> Duration {
        Duration::from_millis(self.section_timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts.max(1),
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            multiplier: self.retry_multiplier,
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
        }
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SiteConfig {
        serde_json::from_str(
            r##"{
                "site": {"entry_url": "https://shop.example"},
                "sections": [
                    {"name": "hero", "input": {"type": "css", "value": "#hero"},
                     "fields": [{"name": "title", "type": "text", "selector": "h1"}]},
                    {"name": "promos", "input": {"type": "text", "value": "Promocje"},
                     "list": {"item_selector": "li", "fields": [
                        {"name": "link", "type": "attr", "selector": "a", "attr": "href"},
                        {"name": "image", "type": "image", "selector": "img"}
                     ]},
                     "validation": {"min_count": 3}}
                ]
            }"##,
        )
        .unwrap()
    }

    #[test]
    fn parses_locators_and_defaults() {
        let cfg = sample();
        assert_eq!(cfg.sections[0].input, Some(Locator::Css("#hero".into())));
        assert_eq!(cfg.sections[0].validation.min_count, 0);
        assert_eq!(cfg.sections[1].input, Some(Locator::Text("Promocje".into())));
        assert_eq!(cfg.sections[1].validation.min_count, 3);
        assert_eq!(cfg.sections[1].active_fields().len(), 2);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn attr_defaults_by_type() {
        let cfg = sample();
        let fields = cfg.sections[1].active_fields();
        assert_eq!(fields[0].attr_name(), Some("href"));
        assert_eq!(fields[1].attr_name(), Some("src"));
        let srcset = FieldSpec {
            name: "img".into(),
            kind: FieldType::Srcset,
            selector: "img".into(),
            attr: None,
        };
        assert_eq!(srcset.attr_name(), Some("srcset"));
    }

    #[test]
    fn selector_strings_map_to_locators() {
        assert_eq!(Locator::from_selector("li.tile"), Locator::Css("li.tile".into()));
        assert_eq!(Locator::from_selector("xpath=//li"), Locator::Xpath("//li".into()));
        assert_eq!(Locator::from_selector("//li"), Locator::Xpath("//li".into()));
        assert_eq!(Locator::from_selector("text=Sale"), Locator::Text("Sale".into()));
    }

    #[test]
    fn rejects_duplicate_sections() {
        let mut cfg = sample();
        cfg.sections[1].name = "hero".into();
        assert_eq!(cfg.validate(), Err(ConfigError::DuplicateSection("hero".into())));
    }

    #[test]
    fn rejects_attr_field_without_name() {
        let mut cfg = sample();
        if let Some(list) = cfg.sections[1].list.as_mut() {
            list.fields[0].attr = None;
        }
        assert!(matches!(cfg.validate(), Err(ConfigError::MissingAttr { .. })));
    }

    #[test]
    fn loads_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("site.yaml");
        std::fs::write(
            &path,
            "site:\n  entry_url: https://shop.example\nsections:\n  - name: hero\n    input:\n      type: css\n      value: '#hero'\n    fields:\n      - name: title\n        type: text_optional\n        selector: h1\n",
        )
        .unwrap();
        let cfg = SiteConfig::load(&path).unwrap();
        assert_eq!(cfg.sections.len(), 1);
        assert_eq!(cfg.sections[0].fields[0].kind, FieldType::TextOptional);
    }

    #[test]
    fn settings_defaults() {
        let s = Settings::default();
        assert_eq!(s.nav_timeout(), Duration::from_secs(30));
        assert_eq!(s.wait_until, WaitUntil::DomContentLoaded);
        let policy = s.retry_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay, Duration::from_millis(500));
    }
}
