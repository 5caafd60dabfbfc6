use thiserror::Error;

/// Failures raised by a page capability.
#[derive(Debug, Error)]
pub enum PageError {
    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("timed out after {0} ms")]
    Timeout(u64),
    #[error("invalid selector `{0}`")]
    InvalidSelector(String),
    #[error("unsupported: {0}")]
    Unsupported(&'static str),
    #[error("no document loaded")]
    NotLoaded,
    #[error("no element matches `{0}`")]
    NoMatch(String),
    #[error("stale node handle")]
    StaleNode,
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("duplicate section name `{0}`")]
    DuplicateSection(String),
    #[error("section `{section}` field `{field}` has type attr but no attr name")]
    MissingAttr { section: String, field: String },
    #[error("site.entry_url is empty")]
    EmptyEntryUrl,
    #[error("unknown profile `{0}` (expected desktop or mobile)")]
    UnknownProfile(String),
}
