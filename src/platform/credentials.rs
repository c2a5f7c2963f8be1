//! Account credential lookup.
//!
//! Credentials come either from the process environment (`API_ID_<account>`
//! and `API_HASH_<account>`) or from an `accounts` table in the queue database.

use super::traits::{AccountId, Credentials};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("no {variable} set for account {account}")]
    MissingVariable { account: AccountId, variable: String },

    #[error("account {0} not found in accounts table")]
    UnknownAccount(AccountId),

    #[error("accounts table lookup failed: {0}")]
    Database(String),
}

#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn credentials_for(&self, account: &AccountId) -> Result<Credentials, CredentialError>;
}

/// Reads `API_ID_<account>` / `API_HASH_<account>`.
///
/// Phone numbers usually carry a leading `+`, which many shells refuse in
/// variable names, so a second lookup with only the alphanumeric characters
/// of the account id is tried when the exact name is unset.
#[derive(Debug, Clone, Default)]
pub struct EnvCredentials;

impl EnvCredentials {
    fn lookup(prefix: &str, account: &AccountId) -> Result<String, CredentialError> {
        let exact = format!("{}_{}", prefix, account);
        if let Ok(value) = std::env::var(&exact) {
            return Ok(value);
        }

        let sanitized: String = account
            .as_str()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();
        std::env::var(format!("{}_{}", prefix, sanitized)).map_err(|_| {
            CredentialError::MissingVariable {
                account: account.clone(),
                variable: exact,
            }
        })
    }
}

#[async_trait]
impl CredentialSource for EnvCredentials {
    async fn credentials_for(&self, account: &AccountId) -> Result<Credentials, CredentialError> {
        Ok(Credentials {
            api_id: Self::lookup("API_ID", account)?,
            api_hash: Self::lookup("API_HASH", account)?,
        })
    }
}

/// Looks accounts up in `accounts(phone, api_id, api_hash)`.
#[derive(Debug, Clone)]
pub struct AccountsTable {
    pool: SqlitePool,
}

impl AccountsTable {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the table if it does not exist yet
    pub async fn ensure_schema(&self) -> Result<(), CredentialError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS accounts (
                phone    TEXT PRIMARY KEY NOT NULL,
                api_id   TEXT NOT NULL,
                api_hash TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| CredentialError::Database(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl CredentialSource for AccountsTable {
    async fn credentials_for(&self, account: &AccountId) -> Result<Credentials, CredentialError> {
        let row = sqlx::query("SELECT api_id, api_hash FROM accounts WHERE phone = ?")
            .bind(account.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CredentialError::Database(e.to_string()))?
            .ok_or_else(|| CredentialError::UnknownAccount(account.clone()))?;

        let api_id: String = row
            .try_get("api_id")
            .map_err(|e| CredentialError::Database(e.to_string()))?;
        let api_hash: String = row
            .try_get("api_hash")
            .map_err(|e| CredentialError::Database(e.to_string()))?;

        Ok(Credentials { api_id, api_hash })
    }
}
