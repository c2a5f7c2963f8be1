//! Messaging Platform Trait Abstractions
//!
//! These traits let the delivery core run against the HTTP gateway in
//! production and against `MockConnector` in tests.

use async_trait::async_trait;
use std::fmt;
use tracing::warn;

/// Messaging-platform account identifier (phone-number shaped, opaque to us)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccountId(pub String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Transport credentials for one account (application id + hash)
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub api_id: String,
    pub api_hash: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_id", &self.api_id)
            .field("api_hash", &"<redacted>")
            .finish()
    }
}

/// Result type for platform operations
pub type PlatformResult<T> = Result<T, PlatformError>;

/// Failure signals raised by the messaging platform or the transport beneath it
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlatformError {
    /// Recipient identifier could not be resolved to a peer
    #[error("PEER_ID_INVALID: {0}")]
    UnknownPeer(String),

    /// Platform requires a pause before it accepts another request
    #[error("FLOOD_WAIT: a wait of {seconds} seconds is required")]
    CoolDown { seconds: u64 },

    /// Request was malformed or its parameters were rejected
    #[error("{0}")]
    Rpc(String),

    /// Target conversation does not exist or is not valid
    #[error("CHAT_ID_INVALID: {0}")]
    InvalidChat(String),

    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("{0}")]
    Connection(String),

    /// Session storage behind the connection is locked by another session
    #[error("database is locked: {0}")]
    PersistenceConflict(String),

    /// Contact import was refused
    #[error("CONTACT_ADD_MISSING: {0}")]
    ContactAddMissing(String),

    #[error("{0}")]
    Other(String),
}

/// One account-bound session with the messaging platform.
///
/// A connection is owned by exactly one delivery attempt and must be handed
/// back through `close`. Use `ScopedConnection` rather than holding the box.
#[async_trait]
pub trait Connection: Send {
    /// Send a text message to a recipient
    async fn send_text(&mut self, recipient: &AccountId, text: &str) -> PlatformResult<()>;

    /// Import the recipient as a contact so that later sends can resolve it
    async fn register_contact(&mut self, recipient: &AccountId) -> PlatformResult<()>;

    /// Release the session
    async fn close(self: Box<Self>) -> PlatformResult<()>;
}

/// Yields credentials and scoped connections for an account
#[async_trait]
pub trait AccountConnector: Send + Sync {
    async fn resolve_credentials(&self, account: &AccountId) -> PlatformResult<Credentials>;

    async fn open(
        &self,
        account: &AccountId,
        credentials: Credentials,
    ) -> PlatformResult<Box<dyn Connection>>;
}

/// Connection guard that releases the session once the attempt is done.
///
/// `release` is the normal path. If the guard is dropped without it (the
/// owning future was cancelled or panicked) the close is spawned onto the
/// current runtime instead.
pub struct ScopedConnection {
    account: AccountId,
    inner: Option<Box<dyn Connection>>,
}

impl ScopedConnection {
    /// Resolve credentials for `account` and open a session with them
    pub async fn open(
        connector: &dyn AccountConnector,
        account: &AccountId,
    ) -> PlatformResult<Self> {
        let credentials = connector.resolve_credentials(account).await?;
        let inner = connector.open(account, credentials).await?;
        Ok(Self {
            account: account.clone(),
            inner: Some(inner),
        })
    }

    pub async fn send_text(&mut self, recipient: &AccountId, text: &str) -> PlatformResult<()> {
        match self.inner.as_mut() {
            Some(conn) => conn.send_text(recipient, text).await,
            None => Err(PlatformError::Connection("connection already released".into())),
        }
    }

    pub async fn register_contact(&mut self, recipient: &AccountId) -> PlatformResult<()> {
        match self.inner.as_mut() {
            Some(conn) => conn.register_contact(recipient).await,
            None => Err(PlatformError::Connection("connection already released".into())),
        }
    }

    /// Close the session. Close failures are logged, never returned, so the
    /// attempt's own result is what callers see.
    pub async fn release(mut self) {
        if let Some(conn) = self.inner.take() {
            if let Err(e) = conn.close().await {
                warn!(account = %self.account, error = %e, "failed to release connection");
            }
        }
    }
}

impl Drop for ScopedConnection {
    fn drop(&mut self) {
        let Some(conn) = self.inner.take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(account = %self.account, "connection dropped without release, closing in background");
                let account = self.account.clone();
                handle.spawn(async move {
                    if let Err(e) = conn.close().await {
                        warn!(account = %account, error = %e, "failed to release connection");
                    }
                });
            }
            Err(_) => {
                warn!(account = %self.account, "connection dropped outside a runtime, not closed");
            }
        }
    }
}
