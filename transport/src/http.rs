//! `reqwest`-backed [`Transport`].
//!
//! Mutations are sent as JSON, or as `multipart/form-data` when an attachment is
//! present: the JSON body goes in the `payload` text field and the binary in a
//! `photo` file part. Every request carries the update's `Idempotency-Key` and
//! an `X-Retry-Count` so the server can collapse replays.

use std::time::Duration;

use reqwest::multipart::{Form, Part};
use serde_json::Value;
use url::Url;
use waypoint_types::{Attachment, GameId, HttpMethod, ServerSnapshot, TeamId};

use crate::{OutboundRequest, Transport, TransportError, TransportFut};

/// Reconciliation endpoint, keyed by `game_id` and `team_id` query parameters.
pub const STATE_ENDPOINT: &str = "/api/game/state";

const DEFAULT_TIMEOUT_SECS: u64 = 15;
const CONNECT_TIMEOUT_SECS: u64 = 10;
const TCP_KEEPALIVE_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    pub base_url: Url,
    /// Whole-request timeout. A timeout is retryable, never terminal.
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

impl HttpTransportConfig {
    #[must_use]
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpTransport {
    pub fn new(config: HttpTransportConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::none())
            .tcp_keepalive(Some(Duration::from_secs(TCP_KEEPALIVE_SECS)))
            .build()
            .map_err(|e| TransportError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.base_url,
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url_for(&self, path: &str) -> Result<Url, TransportError> {
        self.base_url
            .join(path)
            .map_err(|e| TransportError::Network(format!("invalid request url {path:?}: {e}")))
    }

    async fn send_inner(&self, request: &OutboundRequest) -> Result<Value, TransportError> {
        let url = self.url_for(&request.path)?;
        tracing::debug!(
            path = %request.path,
            retry_count = request.retry_count,
            multipart = request.is_multipart(),
            "Sending update"
        );

        let builder = match request.method {
            HttpMethod::Get => self.client.get(url),
            HttpMethod::Post => self.client.post(url),
        };
        let builder = builder
            .header("Idempotency-Key", &request.request_key)
            .header("X-Retry-Count", request.retry_count.to_string());
        let builder = match (&request.attachment, request.method) {
            (_, HttpMethod::Get) => builder,
            (Some(attachment), HttpMethod::Post) => {
                builder.multipart(multipart_form(&request.body, attachment)?)
            }
            (None, HttpMethod::Post) => builder.json(&request.body),
        };

        let response = builder.send().await.map_err(classify_error)?;
        decode_reply(response).await
    }

    async fn fetch_state_inner(
        &self,
        game_id: GameId,
        team_id: TeamId,
    ) -> Result<ServerSnapshot, TransportError> {
        let mut url = self.url_for(STATE_ENDPOINT)?;
        url.query_pairs_mut()
            .append_pair("game_id", &game_id.to_string())
            .append_pair("team_id", &team_id.to_string());

        let response = self.client.get(url).send().await.map_err(classify_error)?;
        match decode_reply(response).await? {
            Value::Null => Err(TransportError::Malformed(
                "empty game state response".to_string(),
            )),
            value => serde_json::from_value(value)
                .map_err(|e| TransportError::Malformed(format!("invalid game state: {e}"))),
        }
    }
}

impl Transport for HttpTransport {
    fn send<'a>(&'a self, request: &'a OutboundRequest) -> TransportFut<'a, Value> {
        Box::pin(self.send_inner(request))
    }

    fn fetch_state(&self, game_id: GameId, team_id: TeamId) -> TransportFut<'_, ServerSnapshot> {
        Box::pin(self.fetch_state_inner(game_id, team_id))
    }
}

fn multipart_form(body: &Value, attachment: &Attachment) -> Result<Form, TransportError> {
    let payload = serde_json::to_string(body)
        .map_err(|e| TransportError::Malformed(format!("unencodable payload: {e}")))?;
    let part = Part::bytes(attachment.bytes.clone()).file_name(attachment.file_name.clone());
    let part = match part.mime_str(&attachment.mime_type) {
        Ok(part) => part,
        Err(e) => {
            tracing::warn!(mime = %attachment.mime_type, "Invalid attachment mime type: {e}");
            Part::bytes(attachment.bytes.clone()).file_name(attachment.file_name.clone())
        }
    };
    Ok(Form::new()
        .text(Attachment::PAYLOAD_FIELD, payload)
        .part(Attachment::FIELD, part))
}

fn classify_error(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Network(error.to_string())
    }
}

async fn decode_reply(response: reqwest::Response) -> Result<Value, TransportError> {
    let status = response.status();
    if !status.is_success() {
        tracing::debug!(status = status.as_u16(), "Server answered with error status");
        return Err(TransportError::from_status(status.as_u16()));
    }
    let bytes = response.bytes().await.map_err(classify_error)?;
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(&bytes).map_err(|e| TransportError::Malformed(e.to_string()))
}
