//! HTTP gateway connector.
//!
//! Talks to a user-API gateway that keeps one platform session per account
//! under `session_dir/<account>`:
//!
//! - `POST   {base}/sessions`                 open a session
//! - `POST   {base}/sessions/{id}/messages`   send text
//! - `POST   {base}/sessions/{id}/contacts`   import a contact
//! - `DELETE {base}/sessions/{id}`            release the session
//!
//! Error bodies look like `{"error": "FLOOD_WAIT_30", "message": "..."}` and
//! are mapped onto `PlatformError` by `classify_code`.

use super::credentials::CredentialSource;
use super::traits::*;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Production connector backed by the HTTP gateway
#[derive(Clone)]
pub struct GatewayConnector {
    http: reqwest::Client,
    base_url: String,
    session_dir: PathBuf,
    credentials: Arc<dyn CredentialSource>,
}

impl GatewayConnector {
    pub fn new(
        base_url: impl Into<String>,
        session_dir: PathBuf,
        request_timeout: Duration,
        credentials: Arc<dyn CredentialSource>,
    ) -> PlatformResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| PlatformError::Connection(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            session_dir,
            credentials,
        })
    }

    fn session_name(&self, account: &AccountId) -> String {
        self.session_dir
            .join(account.as_str())
            .to_string_lossy()
            .into_owned()
    }
}

#[derive(Serialize)]
struct OpenSessionRequest<'a> {
    account: &'a str,
    session: String,
    api_id: &'a str,
    api_hash: &'a str,
}

#[derive(Deserialize)]
struct OpenSessionResponse {
    session_id: String,
}

#[derive(Serialize)]
struct SendTextRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
}

#[derive(Serialize)]
struct ImportContactRequest<'a> {
    phone: &'a str,
    first_name: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct GatewayErrorBody {
    error: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    retry_after: Option<u64>,
}

#[async_trait]
impl AccountConnector for GatewayConnector {
    async fn resolve_credentials(&self, account: &AccountId) -> PlatformResult<Credentials> {
        self.credentials
            .credentials_for(account)
            .await
            .map_err(|e| PlatformError::InvalidCredentials(e.to_string()))
    }

    async fn open(
        &self,
        account: &AccountId,
        credentials: Credentials,
    ) -> PlatformResult<Box<dyn Connection>> {
        let request = OpenSessionRequest {
            account: account.as_str(),
            session: self.session_name(account),
            api_id: &credentials.api_id,
            api_hash: &credentials.api_hash,
        };

        let response = self
            .http
            .post(format!("{}/sessions", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(transport_error)?;
        let opened: OpenSessionResponse = check(response)
            .await?
            .json()
            .await
            .map_err(|e| PlatformError::Other(format!("unexpected open response: {e}")))?;

        Ok(Box::new(GatewayConnection {
            http: self.http.clone(),
            session_url: format!("{}/sessions/{}", self.base_url, opened.session_id),
        }))
    }
}

struct GatewayConnection {
    http: reqwest::Client,
    session_url: String,
}

#[async_trait]
impl Connection for GatewayConnection {
    async fn send_text(&mut self, recipient: &AccountId, text: &str) -> PlatformResult<()> {
        let response = self
            .http
            .post(format!("{}/messages", self.session_url))
            .json(&SendTextRequest {
                chat_id: recipient.as_str(),
                text,
            })
            .send()
            .await
            .map_err(transport_error)?;
        check(response).await?;
        Ok(())
    }

    async fn register_contact(&mut self, recipient: &AccountId) -> PlatformResult<()> {
        let response = self
            .http
            .post(format!("{}/contacts", self.session_url))
            .json(&ImportContactRequest {
                phone: recipient.as_str(),
                first_name: recipient.as_str(),
            })
            .send()
            .await
            .map_err(transport_error)?;

        match check(response).await {
            Ok(_) => Ok(()),
            // Any refusal of the import is a contact failure, whatever the code
            Err(PlatformError::Rpc(message)) => Err(PlatformError::ContactAddMissing(message)),
            Err(e) => Err(e),
        }
    }

    async fn close(self: Box<Self>) -> PlatformResult<()> {
        let response = self
            .http
            .delete(&self.session_url)
            .send()
            .await
            .map_err(transport_error)?;
        check(response).await?;
        Ok(())
    }
}

fn transport_error(e: reqwest::Error) -> PlatformError {
    PlatformError::Connection(e.to_string())
}

async fn check(response: reqwest::Response) -> PlatformResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let raw = response.text().await.unwrap_or_default();
    let body: GatewayErrorBody = serde_json::from_str(&raw).unwrap_or_else(|_| GatewayErrorBody {
        error: format!("HTTP_{}", status.as_u16()),
        message: Some(raw),
        retry_after: None,
    });

    Err(classify_response(status, body))
}

fn classify_response(status: StatusCode, body: GatewayErrorBody) -> PlatformError {
    if let Some(seconds) = body.retry_after {
        return PlatformError::CoolDown { seconds };
    }
    if status == StatusCode::LOCKED {
        return PlatformError::PersistenceConflict(body.message.unwrap_or(body.error));
    }
    let message = body.message.unwrap_or_default();
    classify_code(&body.error, &message)
}

/// Map a platform error code onto the failure classes the delivery core knows.
pub fn classify_code(code: &str, message: &str) -> PlatformError {
    let code = code.trim().to_ascii_uppercase();
    let detail = if message.is_empty() {
        code.clone()
    } else {
        format!("[{}] {}", code, message)
    };

    if let Some(seconds) = code
        .strip_prefix("FLOOD_WAIT_")
        .or_else(|| code.strip_prefix("SLOWMODE_WAIT_"))
        .and_then(|n| n.parse::<u64>().ok())
    {
        return PlatformError::CoolDown { seconds };
    }

    match code.as_str() {
        "PEER_ID_INVALID" | "USERNAME_NOT_OCCUPIED" | "PHONE_NOT_OCCUPIED" => {
            PlatformError::UnknownPeer(detail)
        }
        "CHAT_ID_INVALID" | "CHANNEL_INVALID" | "CHAT_INVALID" => PlatformError::InvalidChat(detail),
        "API_ID_INVALID" | "API_ID_PUBLISHED_FLOOD" | "PHONE_NUMBER_INVALID" => {
            PlatformError::InvalidCredentials(detail)
        }
        c if c.starts_with("AUTH_KEY_") || c.starts_with("SESSION_") => {
            PlatformError::InvalidCredentials(detail)
        }
        "DATABASE_LOCKED" => PlatformError::PersistenceConflict(detail),
        "CONTACT_ADD_MISSING" | "CONTACT_ID_INVALID" => PlatformError::ContactAddMissing(detail),
        "CONNECTION_FAILED" | "NETWORK_ERROR" => PlatformError::Connection(detail),
        _ => PlatformError::Rpc(detail),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_flood_wait_code() {
        assert_eq!(
            classify_code("FLOOD_WAIT_42", "A wait of 42 seconds is required"),
            PlatformError::CoolDown { seconds: 42 }
        );
    }

    #[test]
    fn test_peer_and_chat_codes() {
        assert!(matches!(
            classify_code("PEER_ID_INVALID", "The peer id being used is invalid"),
            PlatformError::UnknownPeer(_)
        ));
        assert!(matches!(
            classify_code("chat_id_invalid", ""),
            PlatformError::InvalidChat(_)
        ));
    }

    #[test]
    fn test_credential_codes() {
        assert!(matches!(
            classify_code("API_ID_INVALID", ""),
            PlatformError::InvalidCredentials(_)
        ));
        assert!(matches!(
            classify_code("AUTH_KEY_UNREGISTERED", ""),
            PlatformError::InvalidCredentials(_)
        ));
    }

    #[test]
    fn test_unknown_code_is_rpc_with_message() {
        let err = classify_code("MESSAGE_EMPTY", "The message sent is empty");
        assert_eq!(
            err,
            PlatformError::Rpc("[MESSAGE_EMPTY] The message sent is empty".to_string())
        );
    }

    #[test]
    fn test_locked_status_is_conflict() {
        let body = GatewayErrorBody {
            error: "SESSION_BUSY".into(),
            message: Some("session file is in use".into()),
            retry_after: None,
        };
        assert!(matches!(
            classify_response(StatusCode::LOCKED, body),
            PlatformError::PersistenceConflict(_)
        ));
    }

    #[test]
    fn test_retry_after_wins() {
        let body = GatewayErrorBody {
            error: "TOO_MANY_REQUESTS".into(),
            message: None,
            retry_after: Some(7),
        };
        assert_eq!(
            classify_response(StatusCode::TOO_MANY_REQUESTS, body),
            PlatformError::CoolDown { seconds: 7 }
        );
    }

    #[test]
    fn test_session_name_uses_session_dir() {
        let connector = GatewayConnector::new(
            "http://localhost:9000/",
            PathBuf::from("sessions"),
            Duration::from_secs(5),
            Arc::new(crate::platform::EnvCredentials),
        )
        .unwrap();

        assert_eq!(connector.base_url, "http://localhost:9000");
        assert_eq!(
            connector.session_name(&AccountId::from("+15550001111")),
            PathBuf::from("sessions")
                .join("+15550001111")
                .to_string_lossy()
        );
    }

    proptest! {
        #[test]
        fn flood_wait_seconds_roundtrip(seconds in 0u64..1_000_000) {
            let code = format!("FLOOD_WAIT_{}", seconds);
            prop_assert_eq!(classify_code(&code, ""), PlatformError::CoolDown { seconds });
        }

        #[test]
        fn classification_never_loses_the_code(code in "[A-Z_]{3,24}") {
            let err = classify_code(&code, "detail");
            if let PlatformError::CoolDown { .. } = err {
                return Ok(());
            }
            prop_assert!(err.to_string().contains(&code));
        }
    }
}
