//! Named interfaces for the out-of-scope collaborators (record backend,
//! blob storage, TTS/STT providers). These are consumed, not designed: the
//! core only depends on the trait surface so it can be exercised against a
//! fake in tests without a real Postgres/S3/speech backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::call_log::CallLog;

#[derive(Debug, Error)]
pub enum RecordStoreError {
    #[error("record not found")]
    NotFound,
    #[error("record backend unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum BlobStoreError {
    #[error("blob backend unavailable: {0}")]
    Unavailable(String),
    #[error("key prefix not allowed for presigned access: {0}")]
    PrefixNotAllowed(String),
}

#[derive(Debug, Error)]
pub enum SpeechError {
    #[error("speech provider unavailable: {0}")]
    Unavailable(String),
    #[error("speech provider timed out")]
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmployeeRef {
    pub employee_id: String,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderRef {
    pub provider_id: String,
    pub name: String,
    pub transfer_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobTemplateRef {
    pub job_template_id: String,
    pub provider_id: String,
    pub code: String,
    pub patient_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OccurrenceStatus {
    Scheduled,
    Unfilled,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OccurrenceRef {
    pub occurrence_id: String,
    pub job_template_id: String,
    pub scheduled_at: DateTime<Utc>,
    pub status: OccurrenceStatus,
}

/// CRUD surface over employees / patients / jobs / occurrences / call logs /
/// provider users, backed by whatever the deployment's record database is.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn employee_by_phone(&self, phone: &str) -> Result<Vec<EmployeeRef>, RecordStoreError>;
    async fn employee_by_pin(&self, pin: &str) -> Result<Vec<EmployeeRef>, RecordStoreError>;
    async fn providers_for_employee(&self, employee_id: &str) -> Result<Vec<ProviderRef>, RecordStoreError>;
    async fn job_template_by_code(&self, provider_id: &str, code: &str) -> Result<Option<JobTemplateRef>, RecordStoreError>;
    async fn occurrences_for_template(&self, template_id: &str) -> Result<Vec<OccurrenceRef>, RecordStoreError>;
    async fn create_occurrence(&self, template_id: &str, scheduled_at: DateTime<Utc>) -> Result<OccurrenceRef, RecordStoreError>;
    async fn update_occurrence_status(&self, occurrence_id: &str, status: OccurrenceStatus) -> Result<(), RecordStoreError>;
    async fn unfilled_shifts(&self, provider_id: &str) -> Result<Vec<OccurrenceRef>, RecordStoreError>;
    async fn eligible_employees_for_occurrence(&self, occurrence_id: &str, exclude: &[String]) -> Result<Vec<EmployeeRef>, RecordStoreError>;
    async fn provider_by_user(&self, user_id: &str) -> Result<Option<ProviderRef>, RecordStoreError>;
    async fn append_call_log(&self, log: &CallLog) -> Result<(), RecordStoreError>;
    async fn update_call_log(&self, sid: &str, update: CallLogUpdate) -> Result<(), RecordStoreError>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallLogUpdate {
    pub ended_at: Option<DateTime<Utc>>,
    pub seconds: Option<i64>,
    pub recording_url: Option<String>,
    pub detected_intent: Option<String>,
}

/// Object storage for recordings and generated reports. Presigned GETs are
/// scoped to `recordings/` and `reports/` key prefixes at the dispatcher
/// boundary (enforced by [`assert_allowed_prefix`]).
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<(), BlobStoreError>;
    async fn presigned_get(&self, key: &str, ttl_secs: u64) -> Result<String, BlobStoreError>;
}

pub const ALLOWED_BLOB_PREFIXES: [&str; 2] = ["recordings/", "reports/"];

pub fn assert_allowed_prefix(key: &str) -> Result<(), BlobStoreError> {
    if ALLOWED_BLOB_PREFIXES.iter().any(|p| key.starts_with(p)) {
        Ok(())
    } else {
        Err(BlobStoreError::PrefixNotAllowed(key.to_string()))
    }
}

/// `speak` returns mu-law encoded audio at 8kHz, already in the wire format
/// [`crate::codec`] frames for the carrier media-stream.
#[async_trait]
pub trait Tts: Send + Sync {
    async fn speak(&self, text: &str, voice: &str, lang: &str) -> Result<Vec<u8>, SpeechError>;
}

/// `transcribe` takes mu-law encoded audio at 8kHz (an accumulated VAD
/// utterance) and returns the recognized text with a confidence in `[0, 1]`.
#[async_trait]
pub trait Stt: Send + Sync {
    async fn transcribe(&self, audio: &[u8]) -> Result<(String, f32), SpeechError>;
}

/// In-memory `RecordStore` fake. The real record backend (employees /
/// patients / jobs / occurrences / call logs / provider users) is an
/// external collaborator per the design doc; this lets every service boot
/// and be exercised standalone without a provisioned database.
pub mod fakes {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    pub struct InMemoryRecordStore {
        employees_by_phone: HashMap<String, Vec<EmployeeRef>>,
        employees_by_pin: HashMap<String, Vec<EmployeeRef>>,
        providers_by_employee: HashMap<String, Vec<ProviderRef>>,
        job_templates: HashMap<(String, String), JobTemplateRef>,
        occurrences: Mutex<HashMap<String, Vec<OccurrenceRef>>>,
        call_logs: Mutex<HashMap<String, CallLog>>,
    }

    impl Default for InMemoryRecordStore {
        fn default() -> Self {
            Self {
                employees_by_phone: HashMap::new(),
                employees_by_pin: HashMap::new(),
                providers_by_employee: HashMap::new(),
                job_templates: HashMap::new(),
                occurrences: Mutex::new(HashMap::new()),
                call_logs: Mutex::new(HashMap::new()),
            }
        }
    }

    impl InMemoryRecordStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn seed_employee_phone(&mut self, phone: &str, employees: Vec<EmployeeRef>) {
            self.employees_by_phone.insert(phone.to_string(), employees);
        }

        pub fn seed_employee_pin(&mut self, pin: &str, employees: Vec<EmployeeRef>) {
            self.employees_by_pin.insert(pin.to_string(), employees);
        }

        pub fn seed_providers(&mut self, employee_id: &str, providers: Vec<ProviderRef>) {
            self.providers_by_employee.insert(employee_id.to_string(), providers);
        }

        pub fn seed_job_template(&mut self, template: JobTemplateRef) {
            self.job_templates.insert((template.provider_id.clone(), template.code.clone()), template);
        }

        pub fn seed_occurrence(&mut self, occ: OccurrenceRef) {
            self.occurrences.lock().unwrap().entry(occ.job_template_id.clone()).or_default().push(occ);
        }
    }

    #[async_trait]
    impl RecordStore for InMemoryRecordStore {
        async fn employee_by_phone(&self, phone: &str) -> Result<Vec<EmployeeRef>, RecordStoreError> {
            Ok(self.employees_by_phone.get(phone).cloned().unwrap_or_default())
        }

        async fn employee_by_pin(&self, pin: &str) -> Result<Vec<EmployeeRef>, RecordStoreError> {
            Ok(self.employees_by_pin.get(pin).cloned().unwrap_or_default())
        }

        async fn providers_for_employee(&self, employee_id: &str) -> Result<Vec<ProviderRef>, RecordStoreError> {
            Ok(self.providers_by_employee.get(employee_id).cloned().unwrap_or_default())
        }

        async fn job_template_by_code(&self, provider_id: &str, code: &str) -> Result<Option<JobTemplateRef>, RecordStoreError> {
            Ok(self.job_templates.get(&(provider_id.to_string(), code.to_string())).cloned())
        }

        async fn occurrences_for_template(&self, template_id: &str) -> Result<Vec<OccurrenceRef>, RecordStoreError> {
            Ok(self.occurrences.lock().unwrap().get(template_id).cloned().unwrap_or_default())
        }

        async fn create_occurrence(&self, template_id: &str, scheduled_at: DateTime<Utc>) -> Result<OccurrenceRef, RecordStoreError> {
            let occ = OccurrenceRef {
                occurrence_id: format!("OCC-{}-{}", template_id, scheduled_at.timestamp()),
                job_template_id: template_id.to_string(),
                scheduled_at,
                status: OccurrenceStatus::Scheduled,
            };
            self.occurrences.lock().unwrap().entry(template_id.to_string()).or_default().push(occ.clone());
            Ok(occ)
        }

        async fn update_occurrence_status(&self, occurrence_id: &str, status: OccurrenceStatus) -> Result<(), RecordStoreError> {
            for occs in self.occurrences.lock().unwrap().values_mut() {
                for occ in occs.iter_mut() {
                    if occ.occurrence_id == occurrence_id {
                        occ.status = status;
                        return Ok(());
                    }
                }
            }
            Err(RecordStoreError::NotFound)
        }

        async fn unfilled_shifts(&self, _provider_id: &str) -> Result<Vec<OccurrenceRef>, RecordStoreError> {
            Ok(self
                .occurrences
                .lock()
                .unwrap()
                .values()
                .flatten()
                .filter(|o| o.status == OccurrenceStatus::Unfilled)
                .cloned()
                .collect())
        }

        async fn eligible_employees_for_occurrence(&self, _occurrence_id: &str, exclude: &[String]) -> Result<Vec<EmployeeRef>, RecordStoreError> {
            Ok(self
                .employees_by_phone
                .values()
                .flatten()
                .filter(|e| !exclude.contains(&e.employee_id))
                .cloned()
                .collect())
        }

        async fn provider_by_user(&self, _user_id: &str) -> Result<Option<ProviderRef>, RecordStoreError> {
            Ok(self.providers_by_employee.values().flatten().next().cloned())
        }

        async fn append_call_log(&self, log: &CallLog) -> Result<(), RecordStoreError> {
            self.call_logs.lock().unwrap().insert(log.sid.clone(), log.clone());
            Ok(())
        }

        async fn update_call_log(&self, sid: &str, update: CallLogUpdate) -> Result<(), RecordStoreError> {
            let mut logs = self.call_logs.lock().unwrap();
            let log = logs.get_mut(sid).ok_or(RecordStoreError::NotFound)?;
            if let Some(ended_at) = update.ended_at {
                log.ended_at = Some(ended_at);
            }
            if let Some(seconds) = update.seconds {
                log.seconds = Some(seconds);
            }
            if update.recording_url.is_some() {
                log.recording_url = update.recording_url;
            }
            if update.detected_intent.is_some() {
                log.detected_intent = update.detected_intent;
            }
            Ok(())
        }
    }

    /// Deterministic `Tts` fake: renders a short confirmation tone instead of
    /// calling out to a real speech backend, so the media-stream server can
    /// be exercised end to end without network access.
    pub struct ToneTts;

    #[async_trait]
    impl Tts for ToneTts {
        async fn speak(&self, _text: &str, _voice: &str, _lang: &str) -> Result<Vec<u8>, SpeechError> {
            use crate::codec::confirmation_tone;
            let frames: Vec<u8> = confirmation_tone().take(25).flatten().collect();
            Ok(frames)
        }
    }

    /// `Stt` fake that always reports silence; real transcription is an
    /// external collaborator per the design doc.
    pub struct SilentStt;

    #[async_trait]
    impl Stt for SilentStt {
        async fn transcribe(&self, _audio: &[u8]) -> Result<(String, f32), SpeechError> {
            Ok((String::new(), 0.0))
        }
    }
}
