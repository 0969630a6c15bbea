//! FDSN `dataselect` web-service client.
//!
//! Issues one `query` per request and streams the miniSEED body through the
//! caller's [`LinkControl`] so that the throttle sees every chunk. The body is
//! not decoded: a successful response becomes a single [`Block`] spanning the
//! requested interval.
//!
//! Status mapping:
//! - `200` with a body: data.
//! - `204` / `404`, or `200` with an empty body: nothing yet ([`FetchOutcome::Empty`]).
//! - `400` / `413`: the request can never be satisfied ([`FetchOutcome::NoData`]).
//! - anything else: transient [`SourceError::Api`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, header};
use secrecy::{ExposeSecret, SecretString};
use shared_utils::env::get_env_var;
use snafu::ResultExt;

use crate::{
    models::{block::Block, request::FetchRequest},
    sources::{
        ApiSnafu, CancelledSnafu, ClientBuildSnafu, DataSource, FetchOutcome,
        InvalidConfigSnafu, InvalidTokenSnafu, LinkControl, MissingEnvVarSnafu, RequestSnafu,
        SourceError, SourceInitError,
    },
};

const QUERY_PATH: &str = "fdsnws/dataselect/1/query";
const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f";

/// Settings for one FDSN endpoint.
#[derive(Debug, Clone)]
pub struct FdsnConfig {
    /// Service root, e.g. `https://service.iris.edu/`.
    pub base_url: String,
    /// Whole-request timeout.
    pub timeout: Duration,
    /// Wait for station latency to settle before each request.
    pub latency_aware: bool,
    /// Name of an environment variable holding a bearer token, if the
    /// endpoint serves restricted data.
    pub token_env: Option<String>,
}

/// Client for one FDSN dataselect endpoint.
pub struct FdsnSource {
    client: Client,
    query_url: String,
    latency_aware: bool,
}

impl FdsnSource {
    /// Build a client for `config`.
    ///
    /// Reads the bearer token from `config.token_env` when one is named.
    pub fn new(config: &FdsnConfig) -> Result<Self, SourceInitError> {
        let base = config.base_url.trim();
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return InvalidConfigSnafu {
                message: format!("FDSN base URL must be http(s): {base:?}"),
            }
            .fail();
        }

        let mut headers = header::HeaderMap::new();
        if let Some(var) = &config.token_env {
            let token = SecretString::new(get_env_var(var).context(MissingEnvVarSnafu)?.into());
            let mut value = header::HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))
                .context(InvalidTokenSnafu)?;
            value.set_sensitive(true);
            headers.insert(header::AUTHORIZATION, value);
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .context(ClientBuildSnafu)?;

        Ok(Self {
            client,
            query_url: format!("{}/{QUERY_PATH}", base.trim_end_matches('/')),
            latency_aware: config.latency_aware,
        })
    }

    /// The full query endpoint.
    pub fn query_url(&self) -> &str {
        &self.query_url
    }
}

/// Build the dataselect query parameters for a request.
pub fn query_params(request: &FetchRequest) -> Vec<(&'static str, String)> {
    let ch = &request.channel;
    let location = match ch.location() {
        "" => "--".to_string(),
        loc => loc.to_string(),
    };
    vec![
        ("net", ch.network().to_string()),
        ("sta", ch.station().to_string()),
        ("loc", location),
        ("cha", ch.channel().to_string()),
        ("start", request.start.format(TIME_FORMAT).to_string()),
        ("end", request.end().format(TIME_FORMAT).to_string()),
        ("nodata", "204".to_string()),
    ]
}

#[async_trait]
impl DataSource for FdsnSource {
    fn name(&self) -> &str {
        "fdsn"
    }

    async fn fetch(
        &self,
        request: &FetchRequest,
        link: &mut dyn LinkControl,
    ) -> Result<FetchOutcome, SourceError> {
        if self.latency_aware {
            link.wait_for_latency().await;
        }
        if link.is_cancelled() {
            return CancelledSnafu.fail();
        }

        let mut response = self
            .client
            .get(&self.query_url)
            .query(&query_params(request))
            .send()
            .await
            .context(RequestSnafu)?;

        match response.status() {
            StatusCode::OK => {}
            StatusCode::NO_CONTENT | StatusCode::NOT_FOUND => return Ok(FetchOutcome::Empty),
            StatusCode::BAD_REQUEST | StatusCode::PAYLOAD_TOO_LARGE => {
                tracing::warn!(
                    channel = %request.channel,
                    status = response.status().as_u16(),
                    "dataselect rejected request permanently"
                );
                return Ok(FetchOutcome::NoData);
            }
            status => {
                let message = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "unreadable error body".to_string());
                return ApiSnafu {
                    status: status.as_u16(),
                    message,
                }
                .fail();
            }
        }

        let mut payload = Vec::new();
        while let Some(chunk) = response.chunk().await.context(RequestSnafu)? {
            payload.extend_from_slice(&chunk);
            link.on_bytes_transferred(chunk.len()).await;
            if link.is_cancelled() {
                return CancelledSnafu.fail();
            }
        }

        if payload.is_empty() {
            return Ok(FetchOutcome::Empty);
        }
        tracing::debug!(channel = %request.channel, bytes = payload.len(), "dataselect ok");

        Ok(FetchOutcome::Blocks(vec![Block {
            channel: request.channel.clone(),
            start: request.start,
            duration: request.duration,
            payload,
        }]))
    }
}
