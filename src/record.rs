use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::browser::Profile;

pub const SECTION_KEY: &str = "_section";
pub const PROFILE_KEY: &str = "_profile";
pub const INDEX_KEY: &str = "_idx";

/// One extracted entity: field name → value (string, or null on a failed field),
/// plus the injected `_section` / `_profile` / `_idx` metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: &str, value: Option<String>) {
        let v = value.map(Value::String).unwrap_or(Value::Null);
        self.0.insert(key.to_string(), v);
    }

    /// Stamp metadata. Written after the fields, so it wins over a same-named field.
    pub fn tag(&mut self, section: &str, profile: Profile, idx: Option<usize>) {
        self.0
            .insert(SECTION_KEY.into(), Value::String(section.to_string()));
        if let Some(i) = idx {
            self.0.insert(INDEX_KEY.into(), Value::from(i));
        }
        self.0
            .insert(PROFILE_KEY.into(), Value::String(profile.as_str().to_string()));
    }

    #[cfg(test)]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    #[cfg(test)]
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn section(&self) -> Option<&str> {
        self.0.get(SECTION_KEY).and_then(Value::as_str)
    }

    #[cfg(test)]
    pub fn index(&self) -> Option<u64> {
        self.0.get(INDEX_KEY).and_then(Value::as_u64)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

impl From<Map<String, Value>> for Record {
    fn from(map: Map<String, Value>) -> Self {
        Record(map)
    }
}
