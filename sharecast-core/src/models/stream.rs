//! Stream records as reported by the media relay, plus the typed view derived from them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishInfo {
    #[serde(default)]
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoInfo {
    pub codec: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioInfo {
    pub codec: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
}

/// One stream in the relay's `/api/v1/streams/` listing.
///
/// Fields the gateway does not interpret (`vhost`, `tcUrl`, `kbps`, ...) are kept in
/// `extra` so the record serializes back to what the relay sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub id: String,
    pub app: String,
    pub name: String,
    #[serde(default)]
    pub publish: PublishInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<VideoInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clients: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StreamInfo {
    /// Minimal record, mostly useful for tests and fixtures.
    pub fn new(app: impl Into<String>, name: impl Into<String>, active: bool) -> Self {
        let app = app.into();
        let name = name.into();
        Self {
            id: format!("{app}/{name}"),
            app,
            name,
            publish: PublishInfo { active, cid: None },
            video: None,
            audio: None,
            clients: None,
            extra: Map::new(),
        }
    }
}

/// Body of `GET /api/v1/streams/`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamsResponse {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub streams: Vec<StreamInfo>,
}

/// One entry of `GET /api/v1/clients/`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayClientInfo {
    pub id: String,
    /// Id of the stream this client is attached to
    #[serde(default)]
    pub stream: Option<String>,
    #[serde(default)]
    pub publish: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientsResponse {
    #[serde(default)]
    pub clients: Vec<RelayClientInfo>,
}

/// Which kinds of media a stream carries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaCapabilities {
    pub has_video: bool,
    pub has_audio: bool,
}

impl MediaCapabilities {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        !self.has_video && !self.has_audio
    }
}

/// Typed summary of a [`StreamInfo`] used by diffing and the client orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamDescriptor {
    pub id: String,
    pub name: String,
    pub publish_active: bool,
    pub has_video: bool,
    pub has_audio: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_codec: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_codec: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_count: Option<u64>,
}

impl StreamDescriptor {
    #[must_use]
    pub const fn capabilities(&self) -> MediaCapabilities {
        MediaCapabilities {
            has_video: self.has_video,
            has_audio: self.has_audio,
        }
    }
}

impl From<&StreamInfo> for StreamDescriptor {
    fn from(info: &StreamInfo) -> Self {
        Self {
            id: info.id.clone(),
            name: info.name.clone(),
            publish_active: info.publish.active,
            has_video: info.video.is_some(),
            has_audio: info.audio.is_some(),
            video_codec: info.video.as_ref().map(|v| v.codec.clone()),
            audio_codec: info.audio.as_ref().map(|a| a.codec.clone()),
            client_count: info.clients,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SRS_STREAM: &str = r#"{
        "id": "vid-0x1",
        "name": "alice",
        "vhost": "vid-0",
        "app": "demo",
        "tcUrl": "rtmp://localhost/demo",
        "url": "/demo/alice",
        "live_ms": 1700000000000,
        "clients": 2,
        "frames": 120,
        "send_bytes": 100,
        "recv_bytes": 200,
        "kbps": {"recv_30s": 1500, "send_30s": 3000},
        "publish": {"active": true, "cid": "c-1"},
        "video": {"codec": "H264", "profile": "High", "level": "3.1", "width": 1920, "height": 1080},
        "audio": {"codec": "opus", "sample_rate": 48000, "channel": 2}
    }"#;

    #[test]
    fn test_stream_info_preserves_unknown_fields() {
        let info: StreamInfo = serde_json::from_str(SRS_STREAM).expect("parse");
        assert_eq!(info.app, "demo");
        assert_eq!(info.publish.cid.as_deref(), Some("c-1"));
        assert_eq!(info.extra.get("vhost"), Some(&Value::from("vid-0")));

        let original: Value = serde_json::from_str(SRS_STREAM).expect("parse value");
        let reserialized = serde_json::to_value(&info).expect("serialize");
        assert_eq!(original, reserialized);
    }

    #[test]
    fn test_descriptor_from_info() {
        let info: StreamInfo = serde_json::from_str(SRS_STREAM).expect("parse");
        let descriptor = StreamDescriptor::from(&info);

        assert_eq!(descriptor.name, "alice");
        assert!(descriptor.publish_active);
        assert!(descriptor.has_video);
        assert!(descriptor.has_audio);
        assert_eq!(descriptor.video_codec.as_deref(), Some("H264"));
        assert_eq!(descriptor.client_count, Some(2));
    }

    #[test]
    fn test_streams_response_tolerates_missing_list() {
        let resp: StreamsResponse = serde_json::from_str(r#"{"code":0}"#).expect("parse");
        assert!(resp.streams.is_empty());
    }

    #[test]
    fn test_audio_only_capabilities() {
        let mut info = StreamInfo::new("demo", "radio", true);
        info.audio = Some(AudioInfo {
            codec: "opus".to_string(),
            sample_rate: None,
            channel: None,
            profile: None,
        });
        let caps = StreamDescriptor::from(&info).capabilities();
        assert!(caps.has_audio);
        assert!(!caps.has_video);
        assert!(!caps.is_empty());
        assert!(MediaCapabilities::default().is_empty());
    }
}
