//! Maintenance gate
//!
//! Tracks a backend-declared maintenance window and short-circuits requests
//! while it is open. States are `Clear` and `Active(until)`:
//!
//! - `activate(d, reason)`: any state → `Active(now + d)`; last caller wins
//! - query (`is_active`, `remaining`, `status`): an `Active` window whose
//!   deadline has passed reverts to `Clear` on the spot; there is no timer
//! - `clear()`: `Active` → `Clear` immediately; no-op when already clear
//!
//! Queries are synchronous so UI code can render a banner without awaiting.
//! The lock is never held across an await point. Time comes from the tokio
//! clock, which tests can pause and advance.

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};

use crate::lock;

/// An open maintenance window.
#[derive(Debug, Clone)]
struct Window {
    activated_at: Instant,
    until: Instant,
    reason: Option<String>,
}

/// Snapshot of the gate for banner rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaintenanceStatus {
    pub active: bool,
    pub remaining: Duration,
    pub reason: Option<String>,
}

/// Process-wide maintenance state, shared by every `ApiClient` it is injected into.
#[derive(Debug, Default)]
pub struct MaintenanceGate {
    window: Mutex<Option<Window>>,
}

impl MaintenanceGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open (or overwrite) the maintenance window for `duration` from now.
    pub fn activate(&self, duration: Duration, reason: Option<String>) {
        let now = Instant::now();
        warn!(
            duration_secs = duration.as_secs(),
            reason = reason.as_deref().unwrap_or(""),
            "maintenance window activated"
        );
        *lock(&self.window) = Some(Window {
            activated_at: now,
            until: now + duration,
            reason,
        });
        metrics::gauge!("dashboard_client_maintenance_active").set(1.0);
    }

    /// Whether requests without bypass are currently blocked.
    pub fn is_active(&self) -> bool {
        self.current().is_some()
    }

    /// Time left in the window; zero when clear.
    pub fn remaining(&self) -> Duration {
        self.current()
            .map(|w| w.until.saturating_duration_since(Instant::now()))
            .unwrap_or(Duration::ZERO)
    }

    /// Reason given by the backend for the current window.
    pub fn reason(&self) -> Option<String> {
        self.current().and_then(|w| w.reason)
    }

    /// Consistent snapshot of active/remaining/reason.
    pub fn status(&self) -> MaintenanceStatus {
        let now = Instant::now();
        match self.current_at(now) {
            Some(window) => MaintenanceStatus {
                active: true,
                remaining: window.until.saturating_duration_since(now),
                reason: window.reason,
            },
            None => MaintenanceStatus {
                active: false,
                remaining: Duration::ZERO,
                reason: None,
            },
        }
    }

    /// Close the window. Returns whether one was open.
    pub fn clear(&self) -> bool {
        let was_active = self.take_if(|_| true);
        if was_active {
            info!("maintenance window cleared");
        }
        was_active
    }

    /// Close the window only if it opened before `dispatched_at`.
    ///
    /// Called after a successful call: a success proves the backend is back
    /// only if the call was sent after the window opened.
    pub fn clear_if_activated_before(&self, dispatched_at: Instant) -> bool {
        let cleared = self.take_if(|w| w.activated_at <= dispatched_at);
        if cleared {
            info!("maintenance window cleared by successful call");
        }
        cleared
    }

    fn current(&self) -> Option<Window> {
        self.current_at(Instant::now())
    }

    fn current_at(&self, now: Instant) -> Option<Window> {
        let mut window = lock(&self.window);
        match window.as_ref() {
            Some(w) if now >= w.until => {
                info!("maintenance window expired");
                *window = None;
                metrics::gauge!("dashboard_client_maintenance_active").set(0.0);
                None
            }
            other => other.cloned(),
        }
    }

    fn take_if(&self, predicate: impl FnOnce(&Window) -> bool) -> bool {
        let mut window = lock(&self.window);
        match window.as_ref() {
            Some(w) if predicate(w) => {
                *window = None;
                metrics::gauge!("dashboard_client_maintenance_active").set(0.0);
                true
            }
            _ => false,
        }
    }
}
