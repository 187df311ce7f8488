//! Carrier webhook form bodies, normalized into one typed shape per endpoint
//! at the edge. The FSM never sees these — dispatch handlers translate them
//! into [`models::fsm::Input`] before calling `step`.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct VoiceInboundForm {
    #[serde(rename = "CallSid")]
    pub call_sid: String,
    #[serde(rename = "From")]
    pub from: String,
    #[serde(rename = "To")]
    pub to: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatherForm {
    #[serde(rename = "CallSid")]
    pub call_sid: String,
    #[serde(rename = "Digits", default)]
    pub digits: Option<String>,
    #[serde(rename = "SpeechResult", default)]
    pub speech_result: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusCallbackForm {
    #[serde(rename = "CallSid")]
    pub call_sid: String,
    #[serde(rename = "CallStatus")]
    pub call_status: String,
    #[serde(rename = "CallDuration", default)]
    pub call_duration_secs: Option<i64>,
    #[serde(rename = "RecordingUrl", default)]
    pub recording_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransferStatusForm {
    #[serde(rename = "CallSid")]
    pub call_sid: String,
    #[serde(rename = "DialCallStatus")]
    pub dial_call_status: String,
    #[serde(rename = "DialCallSid", default)]
    pub dial_call_sid: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AfterConnectForm {
    #[serde(rename = "CallSid")]
    pub call_sid: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueWaitForm {
    #[serde(rename = "CallSid")]
    pub call_sid: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutboundTwimlForm {
    #[serde(rename = "CallSid")]
    pub call_sid: String,
    #[serde(rename = "To")]
    pub to: String,
    #[serde(rename = "OccurrenceId")]
    pub occurrence_id: String,
    #[serde(rename = "EmployeeId")]
    pub employee_id: String,
    #[serde(rename = "Round")]
    pub round: u32,
}

/// Carrier call-status callback for a wave-dispatched outbound call. The
/// occurrence/employee/round context is carried as query parameters on the
/// `statusCallback` URL (set when the call is created) rather than in the
/// fixed-schema POST body.
#[derive(Debug, Clone, Deserialize)]
pub struct WaveStatusForm {
    #[serde(rename = "CallSid")]
    pub call_sid: String,
    #[serde(rename = "CallStatus")]
    pub call_status: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WaveStatusQuery {
    #[serde(rename = "occurrenceId")]
    pub occurrence_id: String,
    #[serde(rename = "employeeId")]
    pub employee_id: String,
    pub round: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialOutcome {
    Answered,
    Busy,
    NoAnswer,
    Failed,
    Canceled,
}

impl DialOutcome {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "completed" | "answered" => Some(Self::Answered),
            "busy" => Some(Self::Busy),
            "no-answer" => Some(Self::NoAnswer),
            "failed" => Some(Self::Failed),
            "canceled" => Some(Self::Canceled),
            _ => None,
        }
    }

    pub fn is_success(self) -> bool {
        matches!(self, Self::Answered)
    }
}
