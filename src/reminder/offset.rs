//! Compiled-in reminder offsets and the urgency rule.

use chrono::{DateTime, Duration, Utc};

/// A named lead time before a due date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReminderOffset {
    pub label: &'static str,
    pub lead_secs: i64,
}

pub const DEADLINE_LABEL: &str = "Deadline";

/// Every reminder a dated task can get, longest lead first.
pub const REMINDER_OFFSETS: [ReminderOffset; 4] = [
    ReminderOffset {
        label: "1 day before",
        lead_secs: 24 * 60 * 60,
    },
    ReminderOffset {
        label: "1 hour before",
        lead_secs: 60 * 60,
    },
    ReminderOffset {
        label: "30 minutes before",
        lead_secs: 30 * 60,
    },
    ReminderOffset {
        label: DEADLINE_LABEL,
        lead_secs: 0,
    },
];

impl ReminderOffset {
    pub fn lead_time(&self) -> Duration {
        Duration::seconds(self.lead_secs)
    }

    /// `due - lead`, or None if that falls outside chrono's range.
    pub fn fire_at(&self, due: DateTime<Utc>) -> Option<DateTime<Utc>> {
        due.checked_sub_signed(self.lead_time())
    }

    /// The deadline itself and the shortest non-zero lead are urgent.
    pub fn is_urgent(&self) -> bool {
        self.lead_secs == 0 || Some(self.lead_secs) == shortest_lead()
    }
}

fn shortest_lead() -> Option<i64> {
    REMINDER_OFFSETS
        .iter()
        .map(|o| o.lead_secs)
        .filter(|&secs| secs > 0)
        .min()
}
