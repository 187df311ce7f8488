//! Carrier media-stream WebSocket wire frames. Grounded on the `lowercase`
//! tagged-enum shape used by Twilio-style carriers (see `dnacenta-voice-echo`
//! `StreamEvent` and `basic_twilio`'s `StartMessage`/`MediaMessage`).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum InboundStreamEvent {
    Connected {
        #[serde(default)]
        protocol: Option<String>,
    },
    Start {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        start: StartMetadata,
    },
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        media: MediaPayload,
    },
    Mark {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        #[serde(default)]
        mark: Option<MarkPayload>,
    },
    Stop {
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartMetadata {
    pub call_sid: String,
    #[serde(default)]
    pub media_format: Option<MediaFormat>,
    #[serde(default, rename = "customParameters")]
    pub custom_parameters: std::collections::HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFormat {
    #[serde(default)]
    pub encoding: Option<String>,
    #[serde(default, rename = "sampleRate")]
    pub sample_rate: Option<u32>,
    #[serde(default)]
    pub channels: Option<u8>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaPayload {
    /// Base64-encoded mu-law audio.
    pub payload: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarkPayload {
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMediaMessage {
    pub event: &'static str,
    pub stream_sid: String,
    pub media: OutboundMedia,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutboundMedia {
    pub payload: String,
}

impl OutboundMediaMessage {
    pub fn new(stream_sid: impl Into<String>, base64_payload: impl Into<String>) -> Self {
        Self { event: "media", stream_sid: stream_sid.into(), media: OutboundMedia { payload: base64_payload.into() } }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMarkMessage {
    pub event: &'static str,
    pub stream_sid: String,
    pub mark: OutboundMark,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutboundMark {
    pub name: String,
}

impl OutboundMarkMessage {
    pub fn new(stream_sid: impl Into<String>, name: impl Into<String>) -> Self {
        Self { event: "mark", stream_sid: stream_sid.into(), mark: OutboundMark { name: name.into() } }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_start_event_with_custom_parameters() {
        let json = r#"{
            "event":"start",
            "streamSid":"MZ1",
            "start":{"callSid":"CA1","mediaFormat":{"encoding":"audio/x-mulaw","sampleRate":8000,"channels":1},"customParameters":{"callType":"outbound"}}
        }"#;
        let parsed: InboundStreamEvent = serde_json::from_str(json).unwrap();
        match parsed {
            InboundStreamEvent::Start { stream_sid, start } => {
                assert_eq!(stream_sid, "MZ1");
                assert_eq!(start.call_sid, "CA1");
                assert_eq!(start.custom_parameters.get("callType").map(String::as_str), Some("outbound"));
            }
            _ => panic!("expected Start"),
        }
    }

    #[test]
    fn media_message_serializes_event_tag() {
        let msg = OutboundMediaMessage::new("MZ1", "aGVsbG8=");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""event":"media""#));
    }
}
