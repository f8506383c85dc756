use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// A metered action gated by plan entitlements.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ActionKind {
    Question,
    Report,
}

impl ActionKind {
    pub fn field(&self) -> UsageField {
        match self {
            ActionKind::Question => UsageField::QuestionsUsed,
            ActionKind::Report => UsageField::ReportsUsed,
        }
    }
}

/// Counter column on a usage row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum UsageField {
    QuestionsUsed,
    ReportsUsed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UsageCounter {
    pub account_id: Uuid,
    pub period_key: String,
    pub questions_used: i32,
    pub reports_used: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UsageCounter {
    pub fn zeroed(account_id: Uuid, period_key: &str) -> Self {
        let now = Utc::now();
        Self {
            account_id,
            period_key: period_key.to_string(),
            questions_used: 0,
            reports_used: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn used(&self, field: UsageField) -> i32 {
        match field {
            UsageField::QuestionsUsed => self.questions_used,
            UsageField::ReportsUsed => self.reports_used,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IncrementResult {
    pub granted: bool,
    pub used_after: i32,
}

/// Ledger key for the billing period starting at `period_start`.
///
/// Keyed on the period start rather than the calendar month so that counters follow the
/// subscription's own cycle.
pub fn period_key(period_start: DateTime<Utc>) -> String {
    period_start.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::str::FromStr;

    #[test]
    fn period_key_is_second_precision_utc() {
        let start = Utc.with_ymd_and_hms(2026, 10, 17, 12, 30, 5).unwrap();
        assert_eq!(period_key(start), "2026-10-17T12:30:05Z");
    }

    #[test]
    fn period_key_differs_within_same_calendar_month() {
        let a = Utc.with_ymd_and_hms(2026, 10, 1, 0, 0, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2026, 10, 31, 0, 0, 0).unwrap();
        assert_ne!(period_key(a), period_key(b));
    }

    #[test]
    fn action_kind_maps_to_counter_field() {
        assert_eq!(ActionKind::Question.field(), UsageField::QuestionsUsed);
        assert_eq!(ActionKind::Report.field(), UsageField::ReportsUsed);
        assert_eq!(ActionKind::from_str("report").unwrap(), ActionKind::Report);
    }

    #[test]
    fn zeroed_counter_reads_zero_for_every_field() {
        let counter = UsageCounter::zeroed(Uuid::new_v4(), "2026-10-17T00:00:00Z");
        assert_eq!(counter.used(UsageField::QuestionsUsed), 0);
        assert_eq!(counter.used(UsageField::ReportsUsed), 0);
    }
}
