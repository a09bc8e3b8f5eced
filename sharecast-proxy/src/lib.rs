//! WebRTC signaling proxy
//!
//! Forwards WHIP (publish) and WHEP (subscribe) SDP exchanges to the media relay,
//! optionally rewriting both directions for low latency. Relay errors are passed
//! back with their original status and body. Also provides the best-effort stream
//! stop used by `/stop`.

pub mod cors;

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use futures::future::join_all;
use sharecast_core::models::{RoomId, StreamName};
use sharecast_core::{Error, LatencyMode, RelayClient, RelayResponse, Result, RtcEndpoint, SdpOptimizer};
use tracing::{debug, info, warn};

/// Proxies signaling requests to the relay
#[derive(Clone)]
pub struct SignalingProxy {
    relay: Arc<RelayClient>,
}

impl SignalingProxy {
    pub fn new(relay: Arc<RelayClient>) -> Self {
        Self { relay }
    }

    #[must_use]
    pub fn relay(&self) -> &Arc<RelayClient> {
        &self.relay
    }

    /// Forward a publish offer to the relay's WHIP endpoint.
    pub async fn publish(
        &self,
        room: &RoomId,
        stream: &StreamName,
        offer: &str,
        low_latency: bool,
    ) -> Result<RelayResponse> {
        self.exchange(RtcEndpoint::Whip, room, stream, offer, low_latency)
            .await
    }

    /// Forward a playback offer to the relay's WHEP endpoint.
    pub async fn subscribe(
        &self,
        room: &RoomId,
        stream: &StreamName,
        offer: &str,
        low_latency: bool,
    ) -> Result<RelayResponse> {
        self.exchange(RtcEndpoint::Whep, room, stream, offer, low_latency)
            .await
    }

    async fn exchange(
        &self,
        endpoint: RtcEndpoint,
        room: &RoomId,
        stream: &StreamName,
        offer: &str,
        low_latency: bool,
    ) -> Result<RelayResponse> {
        if offer.trim().is_empty() {
            return Err(Error::InvalidInput("Missing SDP offer in request body".to_string()));
        }

        let optimizer = SdpOptimizer::new(match endpoint {
            RtcEndpoint::Whip => LatencyMode::Publish,
            RtcEndpoint::Whep => LatencyMode::Playback,
        });

        let offer = if low_latency {
            optimizer.optimize(offer)
        } else {
            offer.to_string()
        };

        debug!(
            endpoint = %endpoint,
            room = %room,
            stream = %stream,
            offer_len = offer.len(),
            low_latency,
            "Forwarding SDP offer to relay"
        );

        let mut response = self
            .relay
            .exchange_sdp(endpoint, room.as_str(), stream.as_str(), offer, low_latency)
            .await?;

        if !response.is_success() {
            warn!(
                endpoint = %endpoint,
                room = %room,
                stream = %stream,
                status = response.status,
                body = %response.body,
                "Relay rejected SDP offer"
            );
            return Ok(response);
        }

        if low_latency {
            response.body = optimizer.optimize(&response.body);
        }

        info!(endpoint = %endpoint, room = %room, stream = %stream, "SDP exchange complete");
        Ok(response)
    }

    /// Ask the relay to drop a stream.
    ///
    /// Tries a direct kick by name first. If that fails, looks the stream up and kicks
    /// its publisher plus every client attached to it. Every step is best-effort.
    pub async fn stop(&self, stream: &str) -> StopOutcome {
        match self.relay.kick_client(stream).await {
            Ok(()) => {
                info!(stream, "Stream stopped by direct kick");
                return StopOutcome {
                    stream: stream.to_string(),
                    direct: true,
                    kicked: vec![stream.to_string()],
                };
            }
            Err(e) => warn!(stream, error = %e, "Could not kick client directly, falling back"),
        }

        let targets = match self.collect_kick_targets(stream).await {
            Ok(targets) => targets,
            Err(e) => {
                warn!(stream, error = %e, "Fallback stream lookup failed");
                BTreeSet::new()
            }
        };

        let results = join_all(targets.iter().map(|id| async move {
            (id, self.relay.kick_client(id).await)
        }))
        .await;

        let mut kicked = Vec::new();
        for (id, result) in results {
            match result {
                Ok(()) => {
                    info!(stream, client_id = %id, "Kicked client");
                    kicked.push(id.clone());
                }
                Err(e) => warn!(stream, client_id = %id, error = %e, "Could not kick client"),
            }
        }

        StopOutcome {
            stream: stream.to_string(),
            direct: false,
            kicked,
        }
    }

    async fn collect_kick_targets(&self, stream: &str) -> Result<BTreeSet<String>> {
        let streams = self.relay.list_streams().await?;
        let Some(target) = streams.into_iter().find(|s| s.name == stream) else {
            debug!(stream, "Stream not found on relay");
            return Ok(BTreeSet::new());
        };

        let mut ids = BTreeSet::new();
        if let Some(cid) = target.publish.cid {
            ids.insert(cid);
        }

        match self.relay.list_clients().await {
            Ok(clients) => ids.extend(
                clients
                    .into_iter()
                    .filter(|c| c.stream.as_deref() == Some(target.id.as_str()))
                    .map(|c| c.id),
            ),
            Err(e) => warn!(stream, error = %e, "Could not list relay clients"),
        }

        Ok(ids)
    }
}

/// What `stop` managed to do. The request itself always succeeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopOutcome {
    pub stream: String,
    pub direct: bool,
    pub kicked: Vec<String>,
}

impl StopOutcome {
    #[must_use]
    pub fn message(&self) -> String {
        format!("Stream {} stop requested", self.stream)
    }
}

/// Turn a relay response into an HTTP response without altering status or body.
#[must_use]
pub fn forward_relay_response(response: RelayResponse, default_content_type: &str) -> Response {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let content_type = response
        .content_type
        .unwrap_or_else(|| default_content_type.to_string());

    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from(response.body))
        .unwrap_or_else(|e| {
            warn!(error = %e, "Failed to build forwarded response");
            StatusCode::BAD_GATEWAY.into_response()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use sharecast_core::config::RelayConfig;
    use wiremock::matchers::{body_string_contains, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const OFFER: &str = "v=0\r\ns=-\r\nm=video 9 UDP/TLS/RTP/SAVPF 96\r\na=setup:actpass\r\na=rtpmap:96 H264/90000\r\n";
    const ANSWER: &str = "v=0\r\ns=-\r\nm=video 9 UDP/TLS/RTP/SAVPF 96\r\na=setup:passive\r\na=rtpmap:96 H264/90000\r\n";

    fn proxy_for(server: &MockServer) -> SignalingProxy {
        let relay = RelayClient::new(&RelayConfig {
            api_url: server.uri(),
            request_timeout_seconds: 5,
        })
        .expect("relay client");
        SignalingProxy::new(Arc::new(relay))
    }

    #[tokio::test]
    async fn test_publish_optimizes_both_directions() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rtc/v1/whip/"))
            .and(query_param("app", "demo"))
            .and(query_param("stream", "alice"))
            .and(header("X-Low-Latency", "true"))
            .and(body_string_contains("a=x-google-flag:low-latency\r\n"))
            .and(body_string_contains("a=rtcp-fb:96 nack pli"))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("content-type", "application/sdp")
                    .set_body_string(ANSWER),
            )
            .expect(1)
            .mount(&server)
            .await;

        let response = proxy_for(&server)
            .publish(&RoomId::from("demo"), &StreamName::from("alice"), OFFER, true)
            .await
            .expect("publish");

        assert_eq!(response.status, 201);
        assert!(response.body.contains("a=rtcp-fb:96 nack\r\n"));
        assert!(response.body.contains("a=x-google-max-playout-delay:100"));
    }

    #[tokio::test]
    async fn test_subscribe_without_low_latency_is_untouched() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rtc/v1/whep/"))
            .and(wiremock::matchers::body_string(OFFER))
            .respond_with(ResponseTemplate::new(200).set_body_string(ANSWER))
            .expect(1)
            .mount(&server)
            .await;

        let response = proxy_for(&server)
            .subscribe(&RoomId::from("demo"), &StreamName::from("alice"), OFFER, false)
            .await
            .expect("subscribe");

        assert_eq!(response.body, ANSWER);
    }

    #[tokio::test]
    async fn test_relay_error_passes_through() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rtc/v1/whip/"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid sdp: no ice-ufrag"))
            .mount(&server)
            .await;

        let response = proxy_for(&server)
            .publish(&RoomId::from("demo"), &StreamName::from("alice"), OFFER, true)
            .await
            .expect("response");

        assert_eq!(response.status, 400);
        assert_eq!(response.body, "invalid sdp: no ice-ufrag");

        let http = forward_relay_response(response, "application/sdp");
        assert_eq!(http.status(), StatusCode::BAD_REQUEST);
        let body = http.into_body().collect().await.expect("body").to_bytes();
        assert_eq!(&body[..], b"invalid sdp: no ice-ufrag");
    }

    #[tokio::test]
    async fn test_empty_offer_rejected() {
        let server = MockServer::start().await;
        let err = proxy_for(&server)
            .publish(&RoomId::from("demo"), &StreamName::from("alice"), "  ", true)
            .await
            .expect_err("empty offer");
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_stop_direct_kick() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/api/v1/clients/alice"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"code":0}"#))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = proxy_for(&server).stop("alice").await;
        assert!(outcome.direct);
        assert_eq!(outcome.message(), "Stream alice stop requested");
    }

    #[tokio::test]
    async fn test_stop_falls_back_to_stream_clients() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/api/v1/clients/alice"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/streams/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"streams":[{"id":"x1","app":"demo","name":"alice","publish":{"active":true,"cid":"pub1"}}]}"#,
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/clients/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"clients":[{"id":"pub1","stream":"x1","publish":true},{"id":"v1","stream":"x1"},{"id":"v2","stream":"x9"}]}"#,
            ))
            .mount(&server)
            .await;
        for id in ["pub1", "v1"] {
            Mock::given(method("DELETE"))
                .and(path(format!("/api/v1/clients/{id}")))
                .respond_with(ResponseTemplate::new(200))
                .expect(1)
                .mount(&server)
                .await;
        }

        let outcome = proxy_for(&server).stop("alice").await;
        assert!(!outcome.direct);
        assert_eq!(outcome.kicked, vec!["pub1".to_string(), "v1".to_string()]);
    }

    #[tokio::test]
    async fn test_stop_survives_unreachable_relay() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let outcome = proxy_for(&server).stop("ghost").await;
        assert!(!outcome.direct);
        assert!(outcome.kicked.is_empty());
    }
}
