//! Persistent store for the dashboard's access/refresh token pair
//!
//! The store holds at most one `Credential`. File-backed stores persist it as
//! `{"access_token": "...", "refresh_token": "..."}` using atomic temp-file +
//! rename writes; a missing file means "logged out". A tokio Mutex serializes
//! writers (login, refresh, logout). Reads clone the in-memory state.
//!
//! Every write is announced on a broadcast channel so that other API clients
//! and UI listeners sharing the store observe the same session.
//!
//! Writes made on behalf of a refresh exchange name the refresh token the
//! exchange used. They are dropped when the store has since moved on to
//! another session, so a late exchange can neither overwrite nor wipe a
//! newer login.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use common::Secret;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::refresh::RefreshCoordinator;

/// Capacity of the change channel. Slow subscribers see `Lagged` and should
/// re-read the store, which is always authoritative.
const CHANGE_CHANNEL_CAPACITY: usize = 16;

/// An access/refresh token pair. Both tokens are opaque strings.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    access_token: Secret<String>,
    refresh_token: Secret<String>,
}

impl Credential {
    pub fn new(access: impl Into<Secret<String>>, refresh: impl Into<Secret<String>>) -> Self {
        Self {
            access_token: access.into(),
            refresh_token: refresh.into(),
        }
    }

    /// Bearer token for API calls.
    pub fn access(&self) -> &str {
        self.access_token.expose()
    }

    /// Token exchanged for a new access token when the current one is rejected.
    pub fn refresh(&self) -> &str {
        self.refresh_token.expose()
    }

    pub(crate) fn refresh_secret(&self) -> Secret<String> {
        self.refresh_token.clone()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &self.access_token)
            .field("refresh_token", &self.refresh_token)
            .finish()
    }
}

/// Change notification sent after every successful store write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialChange {
    /// A new credential was stored (login or refresh).
    Updated,
    /// The store was emptied (logout or failed refresh).
    Cleared,
}

/// Holder of the session credential.
pub struct CredentialStore {
    path: Option<PathBuf>,
    state: Mutex<Option<Credential>>,
    changes: broadcast::Sender<CredentialChange>,
    refresh: Arc<RefreshCoordinator>,
}

impl CredentialStore {
    /// Load the credential from `path`.
    ///
    /// A missing file yields an empty store; nothing is created until the
    /// first `set`. A file that exists but cannot be parsed is an error rather
    /// than an implicit logout.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Io(format!("reading credential file: {e}")))?;
            let credential: Credential = serde_json::from_str(&contents)
                .map_err(|e| Error::CredentialParse(format!("parsing credential file: {e}")))?;
            info!(path = %path.display(), "loaded stored credential");
            Some(credential)
        } else {
            info!(path = %path.display(), "credential file not found, starting logged out");
            None
        };

        Ok(Self::with_state(Some(path), state))
    }

    /// In-memory store that never touches disk.
    pub fn ephemeral() -> Self {
        Self::with_state(None, None)
    }

    fn with_state(path: Option<PathBuf>, state: Option<Credential>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            path,
            state: Mutex::new(state),
            changes,
            refresh: Arc::new(RefreshCoordinator::new()),
        }
    }

    /// Get a clone of the current credential, if any.
    pub async fn get(&self) -> Option<Credential> {
        self.state.lock().await.clone()
    }

    /// Current access token, if logged in.
    pub async fn access_token(&self) -> Option<String> {
        self.state
            .lock()
            .await
            .as_ref()
            .map(|c| c.access().to_owned())
    }

    /// Replace the stored credential (last write wins) and persist it.
    pub async fn set(&self, credential: Credential) -> Result<()> {
        let mut state = self.state.lock().await;
        self.persist(Some(&credential)).await?;
        *state = Some(credential);
        debug!("stored credential");
        self.notify(CredentialChange::Updated);
        Ok(())
    }

    /// Store the access token obtained by exchanging `used_refresh`.
    ///
    /// Keeps the current refresh token unless `refresh` carries a rotated
    /// one. Returns `NotFound` if the store was cleared or now holds another
    /// session, so a logout or re-login is never undone by a late refresh.
    pub async fn update_access(
        &self,
        used_refresh: &str,
        access: Secret<String>,
        refresh: Option<Secret<String>>,
    ) -> Result<Credential> {
        let mut state = self.state.lock().await;
        let current = match state.as_ref() {
            Some(current) if current.refresh() == used_refresh => current,
            Some(_) => return Err(Error::NotFound("credential replaced during refresh".into())),
            None => return Err(Error::NotFound("no credential to update".into())),
        };
        let updated = Credential {
            access_token: access,
            refresh_token: refresh.unwrap_or_else(|| current.refresh_secret()),
        };
        self.persist(Some(&updated)).await?;
        *state = Some(updated.clone());
        debug!("updated access token");
        self.notify(CredentialChange::Updated);
        Ok(updated)
    }

    /// Remove the credential and its file.
    ///
    /// The in-memory credential is dropped even when the file cannot be
    /// removed; the persistence error is still returned.
    pub async fn clear(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.clear_locked(&mut state).await
    }

    /// Clear only if the stored session still uses `refresh_token`.
    ///
    /// Returns whether anything was cleared. Used when a refresh exchange
    /// fails, so a session established meanwhile survives.
    pub async fn clear_if_current(&self, refresh_token: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        if state.as_ref().is_none_or(|c| c.refresh() != refresh_token) {
            debug!("stored session changed, not clearing");
            return Ok(false);
        }
        self.clear_locked(&mut state).await?;
        Ok(true)
    }

    async fn clear_locked(&self, state: &mut Option<Credential>) -> Result<()> {
        let had_credential = state.take().is_some();
        debug!(had_credential, "cleared credential");
        self.notify(CredentialChange::Cleared);
        self.persist(None).await
    }

    /// Whether a credential is currently stored.
    pub async fn is_authenticated(&self) -> bool {
        self.state.lock().await.is_some()
    }

    /// Subscribe to change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<CredentialChange> {
        self.changes.subscribe()
    }

    /// Single-flight refresh shared by every client using this store.
    pub fn refresh_coordinator(&self) -> &Arc<RefreshCoordinator> {
        &self.refresh
    }

    /// Backing file, if this store is durable.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn notify(&self, change: CredentialChange) {
        // No receivers is fine: nobody is listening yet.
        let _ = self.changes.send(change);
    }

    async fn persist(&self, credential: Option<&Credential>) -> Result<()> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };
        match credential {
            Some(credential) => write_atomic(path, credential).await,
            None => remove_file(path).await,
        }
    }
}

/// Write the credential to a file atomically.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target. Sets file permissions to 0600 (owner read/write only) since
/// the file contains bearer tokens.
async fn write_atomic(path: &Path, credential: &Credential) -> Result<()> {
    let json = serde_json::to_string_pretty(credential)
        .map_err(|e| Error::CredentialParse(format!("serializing credential: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("credential path has no parent directory".into()))?;

    let tmp_path = dir.join(format!(".credentials.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp credential file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting credential file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp credential file: {e}")))?;

    debug!(path = %path.display(), "persisted credential");
    Ok(())
}

async fn remove_file(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::Io(format!("removing credential file: {e}"))),
    }
}
