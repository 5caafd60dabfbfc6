use serde::{Deserialize, Serialize};

use crate::config::SectionConfig;
use crate::record::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Alert,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionHealth {
    pub name: String,
    pub count: usize,
    pub ok: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub sections: Vec<SectionHealth>,
}

impl HealthReport {
    pub fn is_alert(&self) -> bool {
        self.status == HealthStatus::Alert
    }

    pub fn failing(&self) -> impl Iterator<Item = &SectionHealth> {
        self.sections.iter().filter(|s| !s.ok)
    }
}

/// Count records per configured section and compare against `min_count`.
/// Output order follows `sections`; sections with no records report a count of 0.
pub fn validate(sections: &[SectionConfig], records: &[Record]) -> HealthReport {
    let sections: Vec<SectionHealth> = sections
        .iter()
        .map(|sc| {
            let count = records
                .iter()
                .filter(|r| r.section() == Some(sc.name.as_str()))
                .count();
            SectionHealth {
                name: sc.name.clone(),
                count,
                ok: count >= sc.validation.min_count,
            }
        })
        .collect();

    let status = if sections.iter().all(|s| s.ok) {
        HealthStatus::Ok
    } else {
        HealthStatus::Alert
    };
    HealthReport { status, sections }
}
