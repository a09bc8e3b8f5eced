//! Low-latency SDP rewriting.
//!
//! The SDP is parsed into session-level lines and media sections, modified
//! structurally and written back with the line terminator it arrived with. Every
//! rewrite checks for its own output first, so running the optimizer on an already
//! optimized description is a no-op.
//!
//! Rewrites applied to each `m=video` section:
//! - RTCP feedback (`nack`, `nack pli`, `ccm fir`) per primary payload type when
//!   the section carries no `a=rtcp-fb:` at all
//! - `transport-cc` feedback when absent
//! - playout delay hints (0 ms min, 100 ms max)
//!
//! A vendor low-latency flag follows every `a=setup:actpass` line, with or
//! without video. Descriptions without a video section get only the flag.

use std::fmt;

use thiserror::Error;

pub const MIN_PLAYOUT_DELAY: &str = "a=x-google-min-playout-delay:0";
pub const MAX_PLAYOUT_DELAY: &str = "a=x-google-max-playout-delay:100";
const SETUP_ACTPASS: &str = "a=setup:actpass";
const RTCP_MUX: &str = "a=rtcp-mux";
const HIGH_FRAME_RATE_BANDWIDTH_KBPS: u32 = 8000;
const NON_PRIMARY_CODECS: [&str; 4] = ["rtx", "red", "ulpfec", "flexfec"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SdpError {
    #[error("SDP is empty")]
    Empty,

    #[error("SDP must start with a v= line")]
    MissingVersion,

    #[error("malformed SDP line {line}: {content:?}")]
    MalformedLine { line: usize, content: String },

    #[error("malformed media line: {0:?}")]
    MalformedMedia(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineEnding {
    Crlf,
    Lf,
}

impl LineEnding {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Crlf => "\r\n",
            Self::Lf => "\n",
        }
    }
}

/// One `m=` block: the media line followed by its attribute lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaSection {
    lines: Vec<String>,
}

impl MediaSection {
    #[must_use]
    pub fn media_line(&self) -> &str {
        self.lines.first().map_or("", String::as_str)
    }

    /// `audio`, `video`, `application`, ...
    #[must_use]
    pub fn kind(&self) -> &str {
        self.media_line()
            .strip_prefix("m=")
            .and_then(|rest| rest.split(' ').next())
            .unwrap_or("")
    }

    /// Payload types listed on the media line
    #[must_use]
    pub fn formats(&self) -> Vec<&str> {
        self.media_line().split(' ').skip(3).collect()
    }

    #[must_use]
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    fn has_line(&self, line: &str) -> bool {
        self.lines.iter().any(|l| l == line)
    }

    fn has_prefix(&self, prefix: &str) -> bool {
        self.lines.iter().any(|l| l.starts_with(prefix))
    }

    /// Codec name from `a=rtpmap:<pt> <name>/<clock>`
    fn codec_for(&self, pt: &str) -> Option<&str> {
        let prefix = format!("a=rtpmap:{pt} ");
        self.lines
            .iter()
            .find_map(|l| l.strip_prefix(prefix.as_str()))
            .and_then(|rest| rest.split('/').next())
    }

    /// Payload types carrying actual media (not retransmission or FEC)
    fn primary_payload_types(&self) -> Vec<String> {
        self.formats()
            .into_iter()
            .filter(|pt| {
                self.codec_for(pt).map_or(true, |codec| {
                    let codec = codec.to_ascii_lowercase();
                    !NON_PRIMARY_CODECS.iter().any(|np| codec.starts_with(np))
                })
            })
            .map(str::to_string)
            .collect()
    }

    /// Insert after the last rtpmap/fmtp/rtcp-fb line of `pt`, or at the end of the section.
    fn insert_after_payload(&mut self, pt: &str, new_lines: Vec<String>) {
        let prefixes = [
            format!("a=rtpmap:{pt} "),
            format!("a=fmtp:{pt} "),
            format!("a=rtcp-fb:{pt} "),
        ];
        let at = self
            .lines
            .iter()
            .rposition(|l| prefixes.iter().any(|p| l.starts_with(p.as_str())))
            .map_or(self.lines.len(), |i| i + 1);
        self.lines.splice(at..at, new_lines);
    }

    /// Insert before the first attribute, keeping `i=`/`c=`/`b=` lines ahead of it.
    fn insert_after_header(&mut self, new_lines: Vec<String>) {
        let at = self
            .lines
            .iter()
            .position(|l| l.starts_with("a="))
            .unwrap_or(self.lines.len());
        self.lines.splice(at..at, new_lines);
    }
}

/// A parsed session description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    line_ending: LineEnding,
    trailing_newline: bool,
    session: Vec<String>,
    media: Vec<MediaSection>,
}

impl SessionDescription {
    pub fn parse(sdp: &str) -> Result<Self, SdpError> {
        if sdp.trim().is_empty() {
            return Err(SdpError::Empty);
        }

        let line_ending = if sdp.contains("\r\n") {
            LineEnding::Crlf
        } else {
            LineEnding::Lf
        };
        let trailing_newline = sdp.ends_with('\n');
        let body = sdp
            .strip_suffix('\n')
            .map_or(sdp, |s| s.strip_suffix('\r').unwrap_or(s));

        let mut session = Vec::new();
        let mut media: Vec<MediaSection> = Vec::new();

        for (idx, raw) in body.split('\n').enumerate() {
            let line = raw.strip_suffix('\r').unwrap_or(raw);
            if !is_sdp_line(line) {
                return Err(SdpError::MalformedLine {
                    line: idx + 1,
                    content: line.to_string(),
                });
            }
            if idx == 0 && !line.starts_with("v=") {
                return Err(SdpError::MissingVersion);
            }

            if line.starts_with("m=") {
                if line.split(' ').count() < 4 {
                    return Err(SdpError::MalformedMedia(line.to_string()));
                }
                media.push(MediaSection {
                    lines: vec![line.to_string()],
                });
            } else if let Some(section) = media.last_mut() {
                section.lines.push(line.to_string());
            } else {
                session.push(line.to_string());
            }
        }

        Ok(Self {
            line_ending,
            trailing_newline,
            session,
            media,
        })
    }

    #[must_use]
    pub fn media(&self) -> &[MediaSection] {
        &self.media
    }

    #[must_use]
    pub fn has_video(&self) -> bool {
        self.media.iter().any(|m| m.kind() == "video")
    }
}

impl fmt::Display for SessionDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let eol = self.line_ending.as_str();
        let mut lines = self
            .session
            .iter()
            .chain(self.media.iter().flat_map(|m| m.lines.iter()))
            .peekable();
        while let Some(line) = lines.next() {
            f.write_str(line)?;
            if lines.peek().is_some() || self.trailing_newline {
                f.write_str(eol)?;
            }
        }
        Ok(())
    }
}

/// `<lowercase letter>=<value>`
fn is_sdp_line(line: &str) -> bool {
    let bytes = line.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_lowercase() && bytes[1] == b'='
}

/// Direction the description is used for. Selects the vendor flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LatencyMode {
    Publish,
    Playback,
}

impl LatencyMode {
    #[must_use]
    pub const fn flag_line(&self) -> &'static str {
        match self {
            Self::Publish => "a=x-google-flag:low-latency",
            Self::Playback => "a=x-google-flag:low-latency-playback",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SdpOptimizer {
    mode: LatencyMode,
    high_frame_rate: bool,
}

impl SdpOptimizer {
    #[must_use]
    pub const fn new(mode: LatencyMode) -> Self {
        Self {
            mode,
            high_frame_rate: false,
        }
    }

    #[must_use]
    pub const fn publish() -> Self {
        Self::new(LatencyMode::Publish)
    }

    #[must_use]
    pub const fn playback() -> Self {
        Self::new(LatencyMode::Playback)
    }

    /// Also raise `b=AS`, cap codecs at 60 fps and force `rtcp-mux`.
    #[must_use]
    pub const fn with_high_frame_rate(mut self, enabled: bool) -> Self {
        self.high_frame_rate = enabled;
        self
    }

    #[must_use]
    pub const fn mode(&self) -> LatencyMode {
        self.mode
    }

    /// Optimize, falling back to the input unchanged if it cannot be parsed.
    #[must_use]
    pub fn optimize(&self, sdp: &str) -> String {
        match self.try_optimize(sdp) {
            Ok(optimized) => optimized,
            Err(e) => {
                tracing::warn!(error = %e, mode = ?self.mode, "SDP optimization failed, using original");
                sdp.to_string()
            }
        }
    }

    pub fn try_optimize(&self, sdp: &str) -> Result<String, SdpError> {
        let mut description = SessionDescription::parse(sdp)?;
        self.apply(&mut description);
        Ok(description.to_string())
    }

    pub fn apply(&self, description: &mut SessionDescription) {
        for section in description
            .media
            .iter_mut()
            .filter(|m| m.kind() == "video")
        {
            ensure_feedback(section);
            ensure_transport_cc(section);
            ensure_playout_delay(section);
            if self.high_frame_rate {
                raise_bandwidth(section);
                cap_frame_rate(section);
                if !section.has_line(RTCP_MUX) {
                    section.insert_after_header(vec![RTCP_MUX.to_string()]);
                }
            }
        }

        let flag = self.mode.flag_line();
        insert_flag_after_actpass(&mut description.session, flag);
        for section in &mut description.media {
            insert_flag_after_actpass(&mut section.lines, flag);
        }
    }
}

fn ensure_feedback(section: &mut MediaSection) {
    if section.has_prefix("a=rtcp-fb:") {
        return;
    }
    for pt in section.primary_payload_types() {
        section.insert_after_payload(
            &pt,
            vec![
                format!("a=rtcp-fb:{pt} nack"),
                format!("a=rtcp-fb:{pt} nack pli"),
                format!("a=rtcp-fb:{pt} ccm fir"),
            ],
        );
    }
}

fn ensure_transport_cc(section: &mut MediaSection) {
    if section
        .lines
        .iter()
        .any(|l| l.starts_with("a=rtcp-fb:") && l.ends_with(" transport-cc"))
    {
        return;
    }
    for pt in section.primary_payload_types() {
        section.insert_after_payload(&pt, vec![format!("a=rtcp-fb:{pt} transport-cc")]);
    }
}

fn ensure_playout_delay(section: &mut MediaSection) {
    let missing: Vec<String> = [MIN_PLAYOUT_DELAY, MAX_PLAYOUT_DELAY]
        .into_iter()
        .filter(|line| !section.has_line(line))
        .map(str::to_string)
        .collect();
    if !missing.is_empty() {
        section.insert_after_header(missing);
    }
}

fn raise_bandwidth(section: &mut MediaSection) {
    for line in &mut section.lines {
        let current = line
            .strip_prefix("b=AS:")
            .and_then(|v| v.trim().parse::<u32>().ok());
        if current.is_some_and(|kbps| kbps < HIGH_FRAME_RATE_BANDWIDTH_KBPS) {
            *line = format!("b=AS:{HIGH_FRAME_RATE_BANDWIDTH_KBPS}");
        }
    }
}

fn cap_frame_rate(section: &mut MediaSection) {
    let rewrites: Vec<(usize, String)> = section
        .lines
        .iter()
        .enumerate()
        .filter_map(|(idx, line)| {
            let rest = line.strip_prefix("a=fmtp:")?;
            let (pt, params) = rest.split_once(' ')?;
            if params.contains("max-fr") {
                return None;
            }
            if params.contains("profile-level-id") {
                if params.contains("max-fs") {
                    return None;
                }
                return Some((idx, format!("{line};max-fr=60;max-fs=8160")));
            }
            let codec = section.codec_for(pt)?.to_ascii_uppercase();
            (codec == "VP8" || codec == "VP9").then(|| (idx, format!("{line};max-fr=60")))
        })
        .collect();

    for (idx, line) in rewrites {
        section.lines[idx] = line;
    }
}

fn insert_flag_after_actpass(lines: &mut Vec<String>, flag: &str) {
    if lines.iter().any(|l| l == flag) {
        return;
    }
    let mut idx = 0;
    while idx < lines.len() {
        if lines[idx] == SETUP_ACTPASS {
            lines.insert(idx + 1, flag.to_string());
            idx += 1;
        }
        idx += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OFFER: &str = "v=0\r\n\
o=- 4611731400430051336 2 IN IP4 127.0.0.1\r\n\
s=-\r\n\
t=0 0\r\n\
a=group:BUNDLE 0 1\r\n\
m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n\
c=IN IP4 0.0.0.0\r\n\
a=setup:actpass\r\n\
a=mid:0\r\n\
a=rtpmap:111 opus/48000/2\r\n\
m=video 9 UDP/TLS/RTP/SAVPF 96 97\r\n\
c=IN IP4 0.0.0.0\r\n\
b=AS:2500\r\n\
a=setup:actpass\r\n\
a=mid:1\r\n\
a=rtpmap:96 H264/90000\r\n\
a=fmtp:96 level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f\r\n\
a=rtpmap:97 rtx/90000\r\n\
a=fmtp:97 apt=96\r\n";

    fn assert_crlf_only(sdp: &str) {
        for segment in sdp.split("\r\n") {
            assert!(!segment.contains('\n'), "bare LF in {segment:?}");
            assert!(!segment.contains('\r'), "bare CR in {segment:?}");
        }
    }

    #[test]
    fn test_adds_feedback_to_video_without_rtcp_fb() {
        let out = SdpOptimizer::publish().optimize(OFFER);

        assert!(out.contains("a=fmtp:96 level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f\r\na=rtcp-fb:96 nack\r\na=rtcp-fb:96 nack pli\r\na=rtcp-fb:96 ccm fir\r\na=rtcp-fb:96 transport-cc\r\na=rtpmap:97 rtx/90000"));
        assert!(!out.contains("a=rtcp-fb:97"));
        assert!(!out.contains("a=rtcp-fb:111"));
        assert!(out.ends_with("\r\n"));
        assert_crlf_only(&out);
    }

    #[test]
    fn test_playout_delay_follows_media_header() {
        let out = SdpOptimizer::playback().optimize(OFFER);
        assert!(out.contains(
            "m=video 9 UDP/TLS/RTP/SAVPF 96 97\r\nc=IN IP4 0.0.0.0\r\nb=AS:2500\r\na=x-google-min-playout-delay:0\r\na=x-google-max-playout-delay:100\r\na=setup:actpass"
        ));
    }

    #[test]
    fn test_flag_after_every_actpass() {
        let publish = SdpOptimizer::publish().optimize(OFFER);
        assert_eq!(
            publish
                .matches("a=setup:actpass\r\na=x-google-flag:low-latency\r\n")
                .count(),
            2
        );

        let playback = SdpOptimizer::playback().optimize(OFFER);
        assert_eq!(
            playback
                .matches("a=setup:actpass\r\na=x-google-flag:low-latency-playback\r\n")
                .count(),
            2
        );
    }

    #[test]
    fn test_idempotent() {
        for optimizer in [
            SdpOptimizer::publish(),
            SdpOptimizer::playback(),
            SdpOptimizer::publish().with_high_frame_rate(true),
        ] {
            let once = optimizer.optimize(OFFER);
            let twice = optimizer.optimize(&once);
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn test_existing_feedback_is_kept() {
        let sdp = "v=0\r\ns=-\r\nm=video 9 UDP/TLS/RTP/SAVPF 96\r\na=rtpmap:96 VP8/90000\r\na=rtcp-fb:96 nack\r\na=rtcp-fb:96 transport-cc\r\n";
        let out = SdpOptimizer::publish().optimize(sdp);

        assert_eq!(out.matches("a=rtcp-fb:").count(), 2);
        assert!(!out.contains("nack pli"));
        assert!(out.contains(MIN_PLAYOUT_DELAY));
    }

    #[test]
    fn test_transport_cc_added_when_only_other_feedback_present() {
        let sdp = "v=0\r\ns=-\r\nm=video 9 UDP/TLS/RTP/SAVPF 96\r\na=rtpmap:96 VP8/90000\r\na=rtcp-fb:96 nack\r\n";
        let out = SdpOptimizer::publish().optimize(sdp);
        assert!(out.contains("a=rtcp-fb:96 nack\r\na=rtcp-fb:96 transport-cc\r\n"));
    }

    #[test]
    fn test_audio_only_gets_flag_only() {
        let sdp = "v=0\r\ns=-\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\na=setup:actpass\r\na=rtpmap:111 opus/48000/2\r\n";

        let publish = SdpOptimizer::publish().with_high_frame_rate(true).optimize(sdp);
        assert_eq!(
            publish,
            "v=0\r\ns=-\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\na=setup:actpass\r\na=x-google-flag:low-latency\r\na=rtpmap:111 opus/48000/2\r\n"
        );
        assert_eq!(SdpOptimizer::publish().optimize(&publish), publish);

        let playback = SdpOptimizer::playback().optimize(sdp);
        assert!(playback.contains("a=setup:actpass\r\na=x-google-flag:low-latency-playback\r\n"));
        assert!(!playback.contains("a=rtcp-fb:"));
        assert!(!playback.contains(MIN_PLAYOUT_DELAY));
    }

    #[test]
    fn test_no_actpass_no_video_is_untouched() {
        let sdp = "v=0\r\ns=-\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\na=setup:active\r\na=rtpmap:111 opus/48000/2\r\n";
        assert_eq!(SdpOptimizer::publish().optimize(sdp), sdp);
    }

    #[test]
    fn test_malformed_returns_original() {
        let garbage = "this is not sdp";
        assert_eq!(SdpOptimizer::publish().optimize(garbage), garbage);
        assert_eq!(
            SdpOptimizer::publish().try_optimize(""),
            Err(SdpError::Empty)
        );
        assert!(matches!(
            SdpOptimizer::publish().try_optimize("s=-\r\nv=0\r\n"),
            Err(SdpError::MissingVersion)
        ));
        assert!(matches!(
            SdpOptimizer::publish().try_optimize("v=0\r\nm=video 9\r\n"),
            Err(SdpError::MalformedMedia(_))
        ));
    }

    #[test]
    fn test_lf_line_endings_preserved() {
        let sdp = "v=0\ns=-\nm=video 9 UDP/TLS/RTP/SAVPF 96\na=rtpmap:96 H264/90000\n";
        let out = SdpOptimizer::publish().optimize(sdp);
        assert!(!out.contains('\r'));
        assert!(out.contains("a=rtpmap:96 H264/90000\na=rtcp-fb:96 nack\n"));
    }

    #[test]
    fn test_high_frame_rate_profile() {
        let out = SdpOptimizer::publish()
            .with_high_frame_rate(true)
            .optimize(OFFER);

        assert!(out.contains("b=AS:8000\r\n"));
        assert!(!out.contains("b=AS:2500"));
        assert!(out.contains("profile-level-id=42e01f;max-fr=60;max-fs=8160\r\n"));
        assert!(out.contains("a=fmtp:97 apt=96\r\n"));
        assert_eq!(out.matches("a=rtcp-mux\r\n").count(), 1);
    }

    #[test]
    fn test_high_frame_rate_keeps_larger_bandwidth() {
        let sdp = "v=0\r\ns=-\r\nm=video 9 UDP/TLS/RTP/SAVPF 98\r\nb=AS:12000\r\na=rtcp-mux\r\na=rtpmap:98 VP9/90000\r\na=fmtp:98 profile-id=0\r\n";
        let out = SdpOptimizer::publish()
            .with_high_frame_rate(true)
            .optimize(sdp);

        assert!(out.contains("b=AS:12000\r\n"));
        assert!(out.contains("a=fmtp:98 profile-id=0;max-fr=60\r\n"));
        assert_eq!(out.matches("a=rtcp-mux").count(), 1);
    }

    #[test]
    fn test_parse_sections() {
        let description = SessionDescription::parse(OFFER).expect("parse");
        assert_eq!(description.media().len(), 2);
        assert!(description.has_video());
        assert_eq!(description.media()[0].kind(), "audio");
        assert_eq!(description.media()[1].formats(), vec!["96", "97"]);
        assert_eq!(description.to_string(), OFFER);
    }
}
