//! SDP exchange with the gateway's `/whip` and `/whep` endpoints

use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::error::{ClientError, NegotiationError, Result};
use crate::session::{SessionRole, StreamTarget};

pub const PREFER_LOW_LATENCY_HEADER: &str = "X-Prefer-Low-Latency";

#[async_trait]
pub trait SignalingClient: Send + Sync {
    /// Send an offer and return the answer SDP
    async fn exchange(
        &self,
        role: SessionRole,
        target: &StreamTarget,
        offer: String,
    ) -> std::result::Result<String, NegotiationError>;
}

#[derive(Debug, Clone)]
pub struct HttpSignalingClient {
    http: reqwest::Client,
    base: Url,
    low_latency: bool,
}

impl HttpSignalingClient {
    pub fn new(gateway_url: &str) -> Result<Self> {
        let base = Url::parse(gateway_url)
            .map_err(|e| ClientError::InvalidUrl(format!("{gateway_url}: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(ClientError::InvalidUrl(gateway_url.to_string()));
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            base,
            low_latency: true,
        })
    }

    #[must_use]
    pub const fn with_low_latency(mut self, enabled: bool) -> Self {
        self.low_latency = enabled;
        self
    }

    fn endpoint(&self, role: SessionRole, target: &StreamTarget) -> Url {
        let name = match role {
            SessionRole::Publish => "whip",
            SessionRole::Subscribe => "whep",
        };
        let mut url = self.base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(name);
        }
        url.query_pairs_mut()
            .append_pair("app", target.room.as_str())
            .append_pair("stream", target.stream.as_str());
        url
    }
}

#[async_trait]
impl SignalingClient for HttpSignalingClient {
    async fn exchange(
        &self,
        role: SessionRole,
        target: &StreamTarget,
        offer: String,
    ) -> std::result::Result<String, NegotiationError> {
        let url = self.endpoint(role, target);
        tracing::debug!(%url, %role, "Sending SDP offer");

        let response = self
            .http
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/sdp")
            .header(PREFER_LOW_LATENCY_HEADER, self.low_latency.to_string())
            .body(offer)
            .send()
            .await
            .map_err(|e| NegotiationError::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| NegotiationError::Network(e.to_string()))?;

        if status.is_success() {
            Ok(body)
        } else {
            Err(NegotiationError::Rejected {
                status: status.as_u16(),
                body,
            })
        }
    }
}
