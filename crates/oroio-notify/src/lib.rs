//! oroio-notify - Desktop alerts for oroio
//!
//! Works on macOS (osascript), Linux (notify-send) and WSL (PowerShell toasts).
//! Delivery is best effort: callers log failures and move on.

mod backend;

pub use backend::{Backend, Notification, Urgency};

use anyhow::Result;
use tracing::debug;

/// Default notification title
pub const DEFAULT_TITLE: &str = "oroio";

/// Something that can put a notification in front of the user
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: &Notification) -> Result<()>;
}

impl Notifier for Backend {
    fn notify(&self, notification: &Notification) -> Result<()> {
        self.send(notification)
    }
}

/// Notifier that drops everything, used when alerts are switched off
#[derive(Debug, Clone, Copy, Default)]
pub struct Silent;

impl Notifier for Silent {
    fn notify(&self, notification: &Notification) -> Result<()> {
        debug!(title = %notification.title, "alerts disabled, dropping notification");
        Ok(())
    }
}
