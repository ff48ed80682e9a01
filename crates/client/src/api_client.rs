//! HTTP API client with bearer-token auth and envelope decoding.

use fva_shared::{ApiEnvelope, ApiError, CODE_SUCCESS, CODE_UNAUTHORIZED};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Envelope before the code is checked; `data` may be anything.
#[derive(Deserialize)]
struct RawEnvelope {
    code: i64,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    success: bool,
    #[serde(default)]
    time: Option<String>,
}

/// Decode an envelope body. Only the success code yields data; the
/// unauthorized code becomes [`ApiError::Unauthorized`].
pub fn decode_envelope<T: DeserializeOwned>(body: &str) -> Result<ApiEnvelope<T>, ApiError> {
    let raw: RawEnvelope = serde_json::from_str(body)?;
    let msg = raw.msg.unwrap_or_default();
    match raw.code {
        CODE_SUCCESS => Ok(ApiEnvelope {
            code: raw.code,
            data: serde_json::from_value(raw.data)?,
            msg,
            success: raw.success,
            time: raw.time.unwrap_or_default(),
        }),
        CODE_UNAUTHORIZED => Err(ApiError::Unauthorized(if msg.is_empty() {
            "unauthorized".to_string()
        } else {
            msg
        })),
        code => Err(ApiError::Envelope { code, msg }),
    }
}

/// HTTP client for the admin REST API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    /// Create a new API client
    pub fn new() -> Self {
        Self::with_client(Client::new())
    }

    /// Reuse an existing connection pool.
    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            base_url: String::new(),
            token: None,
        }
    }

    /// Set the base URL for API requests
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Send `Authorization: Bearer <token>` when a token is set.
    pub fn with_bearer(mut self, token: Option<String>) -> Self {
        self.token = token.filter(|t| !t.is_empty());
        self
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        if self.base_url.is_empty() {
            if path.starts_with('/') {
                path.to_string()
            } else {
                format!("/{path}")
            }
        } else {
            let base = self.base_url.trim_end_matches('/');
            let path = path.trim_start_matches('/');
            format!("{base}/{path}")
        }
    }

    fn authorize(&self, rb: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => rb.bearer_auth(token),
            None => rb,
        }
    }

    async fn send<T: DeserializeOwned>(&self, rb: RequestBuilder) -> Result<ApiEnvelope<T>, ApiError> {
        let resp = self
            .authorize(rb)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let status = resp.status().as_u16();
        let is_success = resp.status().is_success();

        let text = resp
            .text()
            .await
            .map_err(|e| ApiError::Network(format!("failed to read body: {e}")))?;

        if status == 401 {
            let msg = serde_json::from_str::<RawEnvelope>(&text)
                .ok()
                .and_then(|env| env.msg)
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| "unauthorized".to_string());
            return Err(ApiError::Unauthorized(msg));
        }

        if !is_success {
            return Err(ApiError::Http { status, body: text });
        }

        decode_envelope(&text)
    }

    /// GET an envelope
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<ApiEnvelope<T>, ApiError> {
        self.send(self.client.get(self.url(path))).await
    }

    /// POST without a body
    pub async fn post<T: DeserializeOwned>(&self, path: &str) -> Result<ApiEnvelope<T>, ApiError> {
        self.send(self.client.post(self.url(path))).await
    }

    /// POST an `application/x-www-form-urlencoded` body
    pub async fn post_form<TReq: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        form: &TReq,
    ) -> Result<ApiEnvelope<T>, ApiError> {
        self.send(self.client.post(self.url(path)).form(form)).await
    }
}

impl Default for ApiClient {
    fn default() -> Self {
        Self::new()
    }
}
