//! HTTP client for the SRS-compatible media relay.
//!
//! Covers the management API (`/api/v1/streams/`, `/api/v1/clients/`) and the
//! WebRTC ingest/egress endpoints (`/rtc/v1/whip/`, `/rtc/v1/whep/`).

use async_trait::async_trait;
use url::Url;

use crate::config::RelayConfig;
use crate::error::{Error, Result};
use crate::models::{ClientsResponse, RelayClientInfo, StreamInfo, StreamsResponse};

/// Which WebRTC endpoint of the relay an SDP offer goes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RtcEndpoint {
    /// Publish (WHIP)
    Whip,
    /// Subscribe (WHEP)
    Whep,
}

impl RtcEndpoint {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Whip => "whip",
            Self::Whep => "whep",
        }
    }

    /// Header telling the relay the client asked for low latency
    #[must_use]
    pub const fn low_latency_header(&self) -> &'static str {
        match self {
            Self::Whip => "X-Low-Latency",
            Self::Whep => "X-Low-Latency-Playback",
        }
    }
}

impl std::fmt::Display for RtcEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A relay response kept as-is so callers can pass it through untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

impl RelayResponse {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// Source of the relay's current stream list.
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
#[async_trait]
pub trait StreamSource: Send + Sync {
    async fn fetch_streams(&self) -> Result<Vec<StreamInfo>>;
}

#[derive(Debug, Clone)]
pub struct RelayClient {
    http: reqwest::Client,
    base: Url,
}

impl RelayClient {
    pub fn new(config: &RelayConfig) -> Result<Self> {
        let base = Url::parse(&config.api_url)
            .map_err(|e| Error::InvalidInput(format!("relay api_url {}: {e}", config.api_url)))?;
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self { http, base })
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| Error::Internal(format!("relay url {} cannot be a base", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// `GET /api/v1/streams/` without interpreting the body.
    pub async fn streams_raw(&self) -> Result<RelayResponse> {
        let url = self.endpoint(&["api", "v1", "streams", ""])?;
        let response = self.http.get(url).send().await?;
        read_response(response).await
    }

    pub async fn list_streams(&self) -> Result<Vec<StreamInfo>> {
        let raw = self.streams_raw().await?;
        if !raw.is_success() {
            return Err(Error::Relay {
                status: raw.status,
                body: raw.body,
            });
        }
        let parsed: StreamsResponse = serde_json::from_str(&raw.body)?;
        Ok(parsed.streams)
    }

    pub async fn list_clients(&self) -> Result<Vec<RelayClientInfo>> {
        let url = self.endpoint(&["api", "v1", "clients", ""])?;
        let raw = read_response(self.http.get(url).send().await?).await?;
        if !raw.is_success() {
            return Err(Error::Relay {
                status: raw.status,
                body: raw.body,
            });
        }
        let parsed: ClientsResponse = serde_json::from_str(&raw.body)?;
        Ok(parsed.clients)
    }

    /// `DELETE /api/v1/clients/{id}`
    pub async fn kick_client(&self, id: &str) -> Result<()> {
        let url = self.endpoint(&["api", "v1", "clients", id])?;
        let raw = read_response(self.http.delete(url).send().await?).await?;
        if raw.is_success() {
            Ok(())
        } else {
            Err(Error::Relay {
                status: raw.status,
                body: raw.body,
            })
        }
    }

    /// POST an SDP offer to the relay. Any status is returned, not only 2xx.
    pub async fn exchange_sdp(
        &self,
        endpoint: RtcEndpoint,
        app: &str,
        stream: &str,
        offer: String,
        low_latency: bool,
    ) -> Result<RelayResponse> {
        let mut url = self.endpoint(&["rtc", "v1", endpoint.as_str(), ""])?;
        url.query_pairs_mut()
            .append_pair("app", app)
            .append_pair("stream", stream);

        let mut request = self
            .http
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/sdp")
            .body(offer);
        if low_latency {
            request = request.header(endpoint.low_latency_header(), "true");
        }

        read_response(request.send().await?).await
    }
}

#[async_trait]
impl StreamSource for RelayClient {
    async fn fetch_streams(&self) -> Result<Vec<StreamInfo>> {
        self.list_streams().await
    }
}

async fn read_response(response: reqwest::Response) -> Result<RelayResponse> {
    let status = response.status().as_u16();
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = response.text().await?;
    Ok(RelayResponse {
        status,
        content_type,
        body,
    })
}
