//! Time-relative reminders for tasks with due dates.

pub mod clock;
pub mod notify;
pub mod offset;
pub mod scheduler;

pub use clock::{Clock, ManualClock, TimerHandle, TokioClock};
pub use notify::{Alert, AudioCue, Notifier, NotifyError, PermissionProvider};
pub use offset::{REMINDER_OFFSETS, ReminderOffset};
pub use scheduler::{ReminderKey, ReminderScheduler};
