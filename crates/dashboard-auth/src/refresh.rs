//! Single-flight token refresh
//!
//! Every `CredentialStore` owns one coordinator, so all API clients sharing
//! a store share its in-flight exchange. The first caller starts the
//! exchange; callers arriving while it runs for the same refresh token get a
//! clone of the same `Shared` future and therefore the identical result.
//!
//! The exchange runs as its own tokio task. It completes and empties the
//! slot even when every waiter has gone away, and a caller holding a
//! different refresh token (a new login) never joins it.
//!
//! What the exchange sends and how it stores the result is supplied by the
//! caller; this module only coordinates.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use common::Secret;
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use tracing::{debug, warn};

/// Resolves to the new access token, or `None` when the session is gone.
pub type RefreshFuture = Shared<BoxFuture<'static, Option<String>>>;

struct InFlight {
    generation: u64,
    refresh_token: Secret<String>,
    future: RefreshFuture,
}

/// At most one refresh exchange per refresh token.
#[derive(Default)]
pub struct RefreshCoordinator {
    slot: Mutex<Option<InFlight>>,
    generation: AtomicU64,
    started: AtomicU64,
}

impl RefreshCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the exchange in flight for `refresh_token`, or start one with `start`.
    ///
    /// `start` runs only when no exchange for this refresh token is in
    /// flight. An exchange for a superseded token keeps running to
    /// completion but is no longer joinable. Must be called from within a
    /// tokio runtime.
    pub fn join_or_start<F>(self: &Arc<Self>, refresh_token: &str, start: F) -> RefreshFuture
    where
        F: FnOnce() -> BoxFuture<'static, Option<String>>,
    {
        let mut slot = self.lock_slot();
        if let Some(in_flight) = slot.as_ref() {
            if in_flight.refresh_token.expose() == refresh_token {
                debug!("joining in-flight token refresh");
                return in_flight.future.clone();
            }
            debug!("session replaced, starting refresh for the new refresh token");
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        self.started.fetch_add(1, Ordering::Relaxed);
        let settle = Settle {
            coordinator: Arc::clone(self),
            generation,
        };
        let exchange = start();
        let task = tokio::spawn(async move {
            let _settle = settle;
            exchange.await
        });
        let future = async move {
            task.await.unwrap_or_else(|e| {
                warn!(error = %e, "refresh exchange task failed");
                None
            })
        }
        .boxed()
        .shared();

        *slot = Some(InFlight {
            generation,
            refresh_token: Secret::new(refresh_token.to_owned()),
            future: future.clone(),
        });
        future
    }

    /// Whether an exchange is currently in flight.
    pub fn in_flight(&self) -> bool {
        self.lock_slot().is_some()
    }

    /// Number of exchanges started since construction.
    pub fn started(&self) -> u64 {
        self.started.load(Ordering::Relaxed)
    }

    fn settle(&self, generation: u64) {
        let mut slot = self.lock_slot();
        if matches!(slot.as_ref(), Some(in_flight) if in_flight.generation == generation) {
            *slot = None;
        }
    }

    fn lock_slot(&self) -> MutexGuard<'_, Option<InFlight>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Empties the slot when the exchange task finishes, including by panic.
struct Settle {
    coordinator: Arc<RefreshCoordinator>,
    generation: u64,
}

impl Drop for Settle {
    fn drop(&mut self) {
        self.coordinator.settle(self.generation);
    }
}
