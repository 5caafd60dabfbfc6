use chrono::NaiveDate;
use tracing::{info, warn};

use crate::diff::DiffReport;
use crate::health::HealthReport;

/// Diff ratio at or above which a run alerts.
pub const RATIO_ALERT_THRESHOLD: f64 = 0.4;

pub fn should_alert(health: &HealthReport, diff: &DiffReport) -> bool {
    health.is_alert() || diff.ratio_change >= RATIO_ALERT_THRESHOLD
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub subject: String,
    pub body: String,
}

/// Build the alert payload, or `None` when neither trigger fires.
pub fn build_notification(
    site: &str,
    date: NaiveDate,
    health: &HealthReport,
    diff: &DiffReport,
) -> Option<Notification> {
    if !should_alert(health, diff) {
        return None;
    }

    let mut reasons = Vec::new();
    if health.is_alert() {
        let failing: Vec<String> = health
            .failing()
            .map(|s| format!("{} ({})", s.name, s.count))
            .collect();
        reasons.push(format!("health check failed: {}", failing.join(", ")));
    }
    if diff.ratio_change >= RATIO_ALERT_THRESHOLD {
        reasons.push(format!(
            "image set changed by {:.2} (+{} / -{}, threshold {})",
            diff.ratio_change,
            diff.added.len(),
            diff.removed.len(),
            RATIO_ALERT_THRESHOLD
        ));
    }

    let pretty = |v: serde_json::Result<String>| v.unwrap_or_else(|e| format!("<unserializable: {}>", e));
    let body = format!(
        "{}\n\nHealth report:\n{}\n\nDiff report:\n{}\n",
        reasons.join("\n"),
        pretty(serde_json::to_string_pretty(health)),
        pretty(serde_json::to_string_pretty(diff)),
    );

    Some(Notification {
        subject: format!("[{}] scrape alert {}", site, date.format("%Y-%m-%d")),
        body,
    })
}

/// Alert transport. Returns whether delivery succeeded.
pub trait Notifier {
    fn send(&self, subject: &str, body: &str) -> bool;
}

/// Emits alerts into the log stream.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send(&self, subject: &str, body: &str) -> bool {
        warn!(subject, "{}", body);
        true
    }
}

/// Decide and deliver. Delivery failure is logged only; the run result is unaffected.
pub fn dispatch(
    notifier: &dyn Notifier,
    site: &str,
    date: NaiveDate,
    health: &HealthReport,
    diff: &DiffReport,
) -> bool {
    let Some(note) = build_notification(site, date, health, diff) else {
        info!("No alert: health ok, ratio_change {:.3}", diff.ratio_change);
        return false;
    };
    if notifier.send(&note.subject, &note.body) {
        info!("Alert sent: {}", note.subject);
    } else {
        warn!("Alert delivery failed: {}", note.subject);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::{HealthStatus, SectionHealth};
    use std::cell::RefCell;

    fn health(ok: bool) -> HealthReport {
        HealthReport {
            status: if ok { HealthStatus::Ok } else { HealthStatus::Alert },
            sections: vec![SectionHealth { name: "promos".into(), count: 1, ok }],
        }
    }

    fn diff(ratio: f64) -> DiffReport {
        DiffReport {
            added: vec!["x".into()],
            removed: vec![],
            ratio_change: ratio,
            prev_dir: None,
        }
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 7).unwrap()
    }

    #[derive(Default)]
    struct Recorder {
        sent: RefCell<Vec<Notification>>,
        succeed: bool,
    }

    impl Notifier for Recorder {
        fn send(&self, subject: &str, body: &str) -> bool {
            self.sent.borrow_mut().push(Notification {
                subject: subject.into(),
                body: body.into(),
            });
            self.succeed
        }
    }

    #[test]
    fn threshold_is_inclusive() {
        assert!(should_alert(&health(true), &diff(0.4)));
        assert!(!should_alert(&health(true), &diff(0.399_999)));
        assert!(should_alert(&health(true), &diff(2.0)));
    }

    #[test]
    fn health_alert_fires_regardless_of_ratio() {
        assert!(should_alert(&health(false), &diff(0.0)));
    }

    #[test]
    fn payload_embeds_both_reports() {
        let note = build_notification("rossmann", date(), &health(false), &diff(0.5)).unwrap();
        assert_eq!(note.subject, "[rossmann] scrape alert 2025-03-07");
        assert!(note.body.contains("health check failed: promos (1)"));
        assert!(note.body.contains("image set changed by 0.50"));
        assert!(note.body.contains("\"status\": \"alert\""));
        assert!(note.body.contains("\"ratio_change\": 0.5"));
    }

    #[test]
    fn quiet_run_sends_nothing() {
        let rec = Recorder::default();
        assert!(!dispatch(&rec, "s", date(), &health(true), &diff(0.1)));
        assert!(rec.sent.borrow().is_empty());
    }

    #[test]
    fn failed_delivery_still_counts_as_triggered() {
        let rec = Recorder { succeed: false, ..Default::default() };
        assert!(dispatch(&rec, "s", date(), &health(false), &diff(0.0)));
        assert_eq!(rec.sent.borrow().len(), 1);
    }
}
