//! Alert delivery capabilities used by the scheduler.
//!
//! A firing goes to up to three independent sinks: the in-app alert (always
//! attempted), the system alert (only once permission was granted) and an
//! audio cue. A failure in one never suppresses the others.

use async_trait::async_trait;
use std::io::{IsTerminal, Write};

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("{0} is not available on this platform")]
    Unavailable(&'static str),

    #[error("delivery failed: {0}")]
    Delivery(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub title: String,
    pub body: String,
    pub urgent: bool,
}

pub trait Notifier: Send + Sync {
    fn notify(&self, alert: &Alert) -> Result<(), NotifyError>;
}

pub trait AudioCue: Send + Sync {
    fn play(&self) -> Result<(), NotifyError>;
}

/// Asks the environment whether out-of-app alerts may be shown.
#[async_trait]
pub trait PermissionProvider: Send + Sync {
    async fn request(&self) -> bool;
}

/// In-app banner printed to stdout.
pub struct ConsoleBanner;

impl Notifier for ConsoleBanner {
    fn notify(&self, alert: &Alert) -> Result<(), NotifyError> {
        let marker = if alert.urgent { "!!" } else { "::" };
        let mut out = std::io::stdout().lock();
        writeln!(out, "{} {} {}  {}", marker, alert.title, marker, alert.body)?;
        out.flush()?;
        Ok(())
    }
}

/// System-level alert written to the log, which the binary routes to the journal.
pub struct JournalAlert;

impl Notifier for JournalAlert {
    fn notify(&self, alert: &Alert) -> Result<(), NotifyError> {
        if alert.urgent {
            log::warn!(target: "taskflow::alert", "{}: {}", alert.title, alert.body);
        } else {
            log::info!(target: "taskflow::alert", "{}: {}", alert.title, alert.body);
        }
        Ok(())
    }
}

/// Rings the terminal bell on stderr.
pub struct TerminalBell;

impl AudioCue for TerminalBell {
    fn play(&self) -> Result<(), NotifyError> {
        let mut err = std::io::stderr().lock();
        if !err.is_terminal() {
            return Err(NotifyError::Unavailable("terminal bell"));
        }
        // Three rings, like the two-tone chime it stands in for.
        err.write_all(b"\x07\x07\x07")?;
        err.flush()?;
        Ok(())
    }
}

/// Grants system alerts when someone is at a terminal to see them.
pub struct TerminalPermission;

#[async_trait]
impl PermissionProvider for TerminalPermission {
    async fn request(&self) -> bool {
        std::io::stdout().is_terminal()
    }
}

/// Fixed answer. Useful for headless runs and tests.
pub struct StaticPermission(pub bool);

#[async_trait]
impl PermissionProvider for StaticPermission {
    async fn request(&self) -> bool {
        self.0
    }
}
