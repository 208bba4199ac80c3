//! Gmail-backed implementation of the remote mailbox interface.
//!
//! One service-account credential with domain-wide delegation authorizes
//! every account: the factory builds a per-account authenticator by
//! setting the delegated subject, requests a token immediately so a
//! rejected delegation fails the account up front, and hands out a
//! client that caches the account's label name→id mapping.
//!
//! Messages go through the `import` endpoint (not `insert`): it honors
//! the `Date` header, skips spam classification, and files the message
//! exactly like a mail client migration would. The core pipeline is
//! synchronous, so the factory owns a private tokio runtime and each
//! call blocks on it.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use google_gmail1::api::{Label, Message};
use google_gmail1::{Error as ApiError, Gmail};
use hyper::client::HttpConnector;
use hyper_rustls::HttpsConnector;
use tokio::runtime::Runtime;
use tracing::{debug, info};

use crate::error::ImportError;
use crate::importer::{AuthError, ClientFactory, MailboxClient, RemoteError};

type Hub = Gmail<HttpsConnector<HttpConnector>>;

/// Insert messages and manage labels; nothing broader.
const SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/gmail.insert",
    "https://www.googleapis.com/auth/gmail.labels",
];

/// Builds authorized per-account Gmail clients from one service-account
/// key file.
pub struct GmailFactory {
    runtime: Arc<Runtime>,
    key: yup_oauth2::ServiceAccountKey,
}

impl GmailFactory {
    /// Load the service-account key and spin up the runtime.
    pub fn new(credentials_path: &Path) -> crate::error::Result<Self> {
        let runtime = Runtime::new().map_err(|e| ImportError::io("<tokio runtime>", e))?;
        let key = runtime
            .block_on(yup_oauth2::read_service_account_key(credentials_path))
            .map_err(|e| {
                ImportError::Credentials(format!(
                    "cannot read service account key '{}': {e}",
                    credentials_path.display()
                ))
            })?;
        info!(
            client_email = key.client_email.as_str(),
            "Loaded service account key"
        );
        Ok(Self {
            runtime: Arc::new(runtime),
            key,
        })
    }
}

impl ClientFactory for GmailFactory {
    fn for_account(&self, account: &str) -> Result<Box<dyn MailboxClient>, AuthError> {
        let hub = self
            .runtime
            .block_on(async {
                let auth = yup_oauth2::ServiceAccountAuthenticator::builder(self.key.clone())
                    .subject(account)
                    .build()
                    .await?;
                // Fetch a token now: a rejected delegation should fail
                // the account before any message is read.
                auth.token(SCOPES).await?;

                let hub = Gmail::new(
                    hyper::Client::builder().build(
                        hyper_rustls::HttpsConnectorBuilder::new()
                            .with_native_roots()?
                            .https_only()
                            .enable_http1()
                            .build(),
                    ),
                    auth,
                );
                Ok::<Hub, anyhow::Error>(hub)
            })
            .map_err(|e| AuthError {
                reason: e.to_string(),
            })?;

        debug!(account, "Authorized delegated client");
        Ok(Box::new(GmailMailbox {
            runtime: Arc::clone(&self.runtime),
            hub,
            account: account.to_string(),
            labels: None,
        }))
    }
}

/// One account's authorized connection plus its label cache.
pub struct GmailMailbox {
    runtime: Arc<Runtime>,
    hub: Hub,
    account: String,
    /// Lowercased full label name → label id; `None` until first use.
    labels: Option<HashMap<String, String>>,
}

impl GmailMailbox {
    /// Fetch the account's labels once and cache them.
    fn load_labels(&mut self) -> Result<(), RemoteError> {
        if self.labels.is_some() {
            return Ok(());
        }
        let (_, list) = self
            .runtime
            .block_on(self.hub.users().labels_list(&self.account).doit())
            .map_err(classify)?;
        let map = list
            .labels
            .unwrap_or_default()
            .into_iter()
            .filter_map(|l| match (l.id, l.name) {
                (Some(id), Some(name)) => Some((name.to_lowercase(), id)),
                _ => None,
            })
            .collect::<HashMap<_, _>>();
        debug!(account = %self.account, count = map.len(), "Loaded label list");
        self.labels = Some(map);
        Ok(())
    }

    /// Resolve the label path to an id, creating missing levels.
    ///
    /// The platform nests labels by `/` in the name, so `A/B/C` needs
    /// `A` and `A/B` to exist first. Label matching is case-insensitive
    /// (creating `inbox` when `Inbox` exists is an error upstream).
    fn ensure_label(&mut self, label_path: &[String]) -> Result<String, RemoteError> {
        self.load_labels()?;

        let mut full_name = String::new();
        let mut id = String::new();
        for segment in label_path {
            if !full_name.is_empty() {
                full_name.push('/');
            }
            full_name.push_str(segment);
            let key = full_name.to_lowercase();

            if let Some(existing) = self.labels.as_ref().and_then(|m| m.get(&key)) {
                id = existing.clone();
                continue;
            }

            let label = Label {
                name: Some(full_name.clone()),
                message_list_visibility: Some("show".to_string()),
                label_list_visibility: Some("labelShow".to_string()),
                ..Default::default()
            };
            let (_, created) = self
                .runtime
                .block_on(self.hub.users().labels_create(label, &self.account).doit())
                .map_err(classify)?;
            let created_id = created.id.ok_or_else(|| {
                RemoteError::Permanent("label create response carried no id".to_string())
            })?;
            info!(account = %self.account, label = %full_name, "Created label");
            if let Some(map) = self.labels.as_mut() {
                map.insert(key, created_id.clone());
            }
            id = created_id;
        }
        Ok(id)
    }
}

impl MailboxClient for GmailMailbox {
    fn insert(&mut self, label_path: &[String], raw: &[u8]) -> Result<u64, RemoteError> {
        let label_id = self.ensure_label(label_path)?;

        let request = Message {
            label_ids: Some(vec![label_id]),
            ..Default::default()
        };
        let payload = std::io::Cursor::new(raw.to_vec());
        self.runtime
            .block_on(
                self.hub
                    .users()
                    .messages_import(request, &self.account)
                    .internal_date_source("dateHeader")
                    .never_mark_spam(true)
                    .process_for_calendar(false)
                    .deleted(false)
                    .upload(payload, "message/rfc822".parse().expect("static mime type")),
            )
            .map_err(classify)?;
        Ok(raw.len() as u64)
    }
}

/// Map an API error onto the retry taxonomy.
///
/// Transport-level failures and server-side 5xx/429 pushback are worth
/// retrying. 403 is ambiguous on this platform — it carries both quota
/// pushback and real permission denials — so the error body's reason
/// decides where the body is available.
fn classify(err: ApiError) -> RemoteError {
    match err {
        ApiError::HttpError(e) => RemoteError::Transient(format!("http transport: {e}")),
        ApiError::Io(e) => RemoteError::Transient(format!("io: {e}")),
        ApiError::Failure(response) => {
            let status = response.status();
            let detail = format!("http status {status}");
            if transient_status(status.as_u16()) {
                RemoteError::Transient(detail)
            } else {
                RemoteError::Permanent(detail)
            }
        }
        ApiError::BadRequest(body) => classify_error_body(&body),
        ApiError::MissingToken(e) => RemoteError::Permanent(format!("token refused: {e}")),
        other => RemoteError::Permanent(other.to_string()),
    }
}

/// Classify from the structured error body the API returns.
fn classify_error_body(body: &serde_json::Value) -> RemoteError {
    let error = body.get("error");
    let code = error
        .and_then(|e| e.get("code"))
        .and_then(|c| c.as_u64())
        .unwrap_or(400) as u16;
    let message = error
        .and_then(|e| e.get("message"))
        .and_then(|m| m.as_str())
        .unwrap_or("bad request");
    let reason = error
        .and_then(|e| e.get("errors"))
        .and_then(|errs| errs.get(0))
        .and_then(|e0| e0.get("reason"))
        .and_then(|r| r.as_str())
        .unwrap_or("");

    let detail = format!("{code} {reason}: {message}");
    let rate_limited = reason.to_lowercase().contains("ratelimit")
        || reason.to_lowercase().contains("quota")
        || reason == "userRateLimitExceeded"
        || reason == "backendError";

    if code == 403 {
        if rate_limited {
            RemoteError::Transient(detail)
        } else {
            RemoteError::Permanent(detail)
        }
    } else if transient_status(code) {
        RemoteError::Transient(detail)
    } else {
        RemoteError::Permanent(detail)
    }
}

/// Status codes worth retrying (403 is decided by the error body).
fn transient_status(code: u16) -> bool {
    matches!(code, 408 | 429 | 500 | 502 | 503 | 504)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body(code: u16, reason: &str) -> serde_json::Value {
        json!({
            "error": {
                "code": code,
                "message": "boom",
                "errors": [{"reason": reason}]
            }
        })
    }

    #[test]
    fn test_rate_limit_403_is_transient() {
        let err = classify_error_body(&body(403, "userRateLimitExceeded"));
        assert!(matches!(err, RemoteError::Transient(_)));
        let err = classify_error_body(&body(403, "quotaExceeded"));
        assert!(matches!(err, RemoteError::Transient(_)));
    }

    #[test]
    fn test_permission_403_is_permanent() {
        let err = classify_error_body(&body(403, "insufficientPermissions"));
        assert!(matches!(err, RemoteError::Permanent(_)));
    }

    #[test]
    fn test_429_and_5xx_are_transient() {
        assert!(matches!(
            classify_error_body(&body(429, "rateLimitExceeded")),
            RemoteError::Transient(_)
        ));
        assert!(matches!(
            classify_error_body(&body(503, "backendError")),
            RemoteError::Transient(_)
        ));
    }

    #[test]
    fn test_400_is_permanent() {
        let err = classify_error_body(&body(400, "invalidArgument"));
        assert!(matches!(err, RemoteError::Permanent(_)));
        if let RemoteError::Permanent(detail) = err {
            assert!(detail.contains("invalidArgument"));
        }
    }
}
