//! REST client for the agreement backend
//!
//! All durable state lives behind the backend's REST API; the real-time
//! channel is only a notification layer. Every call carries the session's
//! bearer credential. The `AgreementBackend` trait is the seam the session
//! engine is written against, so engine tests run against a mock instead
//! of a live server.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::model::{Agreement, ChatMessage, ClauseDef, PartyRole, Preference};
use crate::types::{ParleyError, Result};

/// Default timeout for backend requests
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Largest accepted signature image upload
pub const MAX_SIGNATURE_BYTES: usize = 2 * 1024 * 1024;

/// Accepted signature image content types
pub const SIGNATURE_CONTENT_TYPES: &[&str] = &["image/png", "image/jpeg"];

/// Generated document flavors the backend can render
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Pdf,
    Docx,
}

impl DocumentFormat {
    fn path_segment(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Docx => "docx",
        }
    }
}

/// Payload for a signature upload
#[derive(Debug, Clone, Serialize)]
pub struct SignatureUpload {
    /// Image content type, or "text/plain" for the typed flow
    pub content_type: String,
    /// Base64 image bytes, or the typed text verbatim
    pub data: String,
}

impl SignatureUpload {
    /// Build an image upload, enforcing the client-side type and size
    /// constraints before any bytes leave the process.
    pub fn image(content_type: &str, bytes: &[u8]) -> Result<Self> {
        if !SIGNATURE_CONTENT_TYPES.contains(&content_type) {
            return Err(ParleyError::BadRequest(format!(
                "Unsupported signature content type: {content_type}"
            )));
        }
        if bytes.len() > MAX_SIGNATURE_BYTES {
            return Err(ParleyError::BadRequest(format!(
                "Signature image too large: {} bytes (max {})",
                bytes.len(),
                MAX_SIGNATURE_BYTES
            )));
        }
        Ok(Self {
            content_type: content_type.to_string(),
            data: BASE64.encode(bytes),
        })
    }

    /// Build a typed-text upload.
    pub fn typed(text: &str) -> Result<Self> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ParleyError::BadRequest("Typed signature is empty".into()));
        }
        Ok(Self {
            content_type: "text/plain".to_string(),
            data: text.to_string(),
        })
    }
}

/// Reference returned by a signature upload, reusable across agreements
#[derive(Debug, Clone, Deserialize)]
pub struct SignatureRef {
    pub reference: String,
}

#[derive(Debug, Serialize)]
struct PreferenceUpdate<'a> {
    clause_id: &'a str,
    party: PartyRole,
    value: Preference,
}

#[derive(Debug, Serialize)]
struct SignRequest<'a> {
    party: PartyRole,
    signature_reference: &'a str,
}

/// The backend surface the session engine depends on
#[async_trait]
pub trait AgreementBackend: Send + Sync {
    /// Fetch the current agreement snapshot.
    async fn fetch_agreement(&self, agreement_id: &str) -> Result<Agreement>;

    /// Fetch the full message history, oldest first.
    async fn fetch_messages(&self, agreement_id: &str) -> Result<Vec<ChatMessage>>;

    /// Durably create a chat message; returns the confirmed message with
    /// its server id and the caller's client key echoed back.
    async fn create_message(&self, message: &ChatMessage) -> Result<ChatMessage>;

    /// Durably set one party's stance on a clause; returns the full
    /// agreement snapshot, which replaces local state wholesale.
    async fn update_clause_preference(
        &self,
        agreement_id: &str,
        clause_id: &str,
        party: PartyRole,
        value: Preference,
    ) -> Result<Agreement>;

    /// Append a custom clause mid-negotiation; returns the snapshot.
    async fn add_custom_clause(&self, agreement_id: &str, clause: &ClauseDef)
        -> Result<Agreement>;

    /// Store a signature artifact; returns its reusable reference.
    async fn upload_signature(&self, upload: &SignatureUpload) -> Result<SignatureRef>;

    /// Durably sign the agreement as the given party; returns the snapshot.
    /// The backend re-verifies every precondition the client checked.
    async fn sign(
        &self,
        agreement_id: &str,
        party: PartyRole,
        signature_reference: &str,
    ) -> Result<Agreement>;

    /// Download a generated document as opaque bytes.
    async fn download_document(
        &self,
        agreement_id: &str,
        format: DocumentFormat,
    ) -> Result<Bytes>;
}

/// `AgreementBackend` over HTTP
pub struct RestClient {
    base_url: String,
    token: String,
    http: reqwest::Client,
}

impl RestClient {
    /// Create a client for the given backend base URL.
    pub fn new(base_url: &str, token: &str) -> Self {
        Self::with_timeout(base_url, token, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(base_url: &str, token: &str, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("parley/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            http,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Map a non-success response to a typed error, reading whatever
    /// detail the backend put in the body.
    async fn check(&self, response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        debug!(status = status.as_u16(), %message, "Backend call failed");
        match status.as_u16() {
            401 => Err(ParleyError::Auth(message)),
            403 => Err(ParleyError::NotParticipant(message)),
            status => Err(ParleyError::BackendStatus { status, message }),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self
            .http
            .get(self.url(path))
            .bearer_auth(&self.token)
            .send()
            .await?;
        Ok(self.check(response).await?.json().await?)
    }

    async fn post_json<B: Serialize, T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let response = self
            .http
            .post(self.url(path))
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?;
        Ok(self.check(response).await?.json().await?)
    }
}

#[async_trait]
impl AgreementBackend for RestClient {
    async fn fetch_agreement(&self, agreement_id: &str) -> Result<Agreement> {
        self.get_json(&format!("/api/agreements/{agreement_id}")).await
    }

    async fn fetch_messages(&self, agreement_id: &str) -> Result<Vec<ChatMessage>> {
        self.get_json(&format!("/api/agreements/{agreement_id}/messages"))
            .await
    }

    async fn create_message(&self, message: &ChatMessage) -> Result<ChatMessage> {
        self.post_json(
            &format!("/api/agreements/{}/messages", message.agreement_id),
            message,
        )
        .await
    }

    async fn update_clause_preference(
        &self,
        agreement_id: &str,
        clause_id: &str,
        party: PartyRole,
        value: Preference,
    ) -> Result<Agreement> {
        self.post_json(
            &format!("/api/agreements/{agreement_id}/clauses/{clause_id}/preference"),
            &PreferenceUpdate {
                clause_id,
                party,
                value,
            },
        )
        .await
    }

    async fn add_custom_clause(
        &self,
        agreement_id: &str,
        clause: &ClauseDef,
    ) -> Result<Agreement> {
        self.post_json(&format!("/api/agreements/{agreement_id}/clauses"), clause)
            .await
    }

    async fn upload_signature(&self, upload: &SignatureUpload) -> Result<SignatureRef> {
        self.post_json("/api/signatures", upload).await
    }

    async fn sign(
        &self,
        agreement_id: &str,
        party: PartyRole,
        signature_reference: &str,
    ) -> Result<Agreement> {
        self.post_json(
            &format!("/api/agreements/{agreement_id}/sign"),
            &SignRequest {
                party,
                signature_reference,
            },
        )
        .await
    }

    async fn download_document(
        &self,
        agreement_id: &str,
        format: DocumentFormat,
    ) -> Result<Bytes> {
        let response = self
            .http
            .get(self.url(&format!(
                "/api/agreements/{agreement_id}/document/{}",
                format.path_segment()
            )))
            .bearer_auth(&self.token)
            .send()
            .await?;
        Ok(self.check(response).await?.bytes().await?)
    }
}
