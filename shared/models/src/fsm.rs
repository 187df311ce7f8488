//! Pure phase functions mapping `(CallState, Input) -> (CallState, Output)`.
//!
//! `step` performs no I/O. When a phase needs an external lookup (employee
//! auth, job-code resolution, occurrence writes) it returns
//! `Output::Effect(effect)`; the webhook dispatcher (or media-stream server)
//! executes the effect against [`crate::external::RecordStore`] and calls
//! `step` again with `Input::ExternalEvent` carrying the result. A single
//! carrier turn may therefore involve several `step` calls chained by the
//! dispatcher before a carrier-facing `Output` (Say/AskDtmf/.../Hangup) is
//! produced and rendered.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

use crate::call_state::{ActionType, CallState, Phase};
use crate::config::MAX_ATTEMPTS_PER_FIELD;
use crate::external::{EmployeeRef, JobTemplateRef, OccurrenceRef, ProviderRef};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Input {
    StartInbound { caller_phone: String },
    StartOutbound { employee_id: String, occurrence_id: String, round: u32, caller_phone: String },
    SpeechResult { text: String },
    Digits { digits: String },
    Silence,
    ExternalEvent { name: String, payload: ExternalEventPayload },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExternalEventPayload {
    EmployeeLookup(Vec<EmployeeRef>),
    ProvidersLookup(Vec<ProviderRef>),
    JobTemplateLookup(Option<JobTemplateRef>),
    OccurrencesLookup(Vec<OccurrenceRef>),
    OccurrenceWritten(OccurrenceRef),
    Ack,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Effect {
    LookupEmployeeByPhone { phone: String },
    LookupEmployeeByPin { pin: String },
    LookupProvidersForEmployee { employee_id: String },
    LookupJobTemplate { provider_id: String, code: String },
    LookupOccurrencesForTemplate { template_id: String },
    MarkOccurrenceUnfilled { occurrence_id: String },
    MarkOccurrenceLeaveOpen { occurrence_id: String },
    CreateOccurrence { template_id: String, scheduled_at: DateTime<Utc> },
    PublishEvent { event_type: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamTarget {
    pub call_type: String,
    pub occurrence_id: Option<String>,
    pub round: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Output {
    Say(String),
    AskDtmf { text: String, timeout_secs: u64, max_digits: usize },
    AskSpeech { text: String, timeout_secs: u64 },
    Play(String),
    ConnectStream(StreamTarget),
    Hangup(String),
    Noop,
    Effect(Effect),
}

const APOLOGY: &str = "I'm sorry, I wasn't able to process that. Please call back and try again.";

fn gather_dtmf(text: impl Into<String>, max_digits: usize) -> Output {
    Output::AskDtmf { text: text.into(), timeout_secs: crate::config::GATHER_TIMEOUT_SECS, max_digits }
}

fn gather_speech(text: impl Into<String>) -> Output {
    Output::AskSpeech { text: text.into(), timeout_secs: crate::config::GATHER_TIMEOUT_SECS }
}

/// Shared invalid/no-input/max-attempts handling for a phase: bumps the
/// attempt counter and either re-prompts or apologizes and hangs up.
fn bump_or_fail(state: &mut CallState, now: DateTime<Utc>, phase: Phase, reprompt: Output) -> Output {
    let attempts = state.increment_attempts(phase);
    if attempts > MAX_ATTEMPTS_PER_FIELD {
        state.transition(Phase::Error, now);
        Output::Hangup(APOLOGY.to_string())
    } else {
        reprompt
    }
}

fn normalize_digits(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit() || *c == '#' || *c == '*').collect()
}

fn normalize_job_code(raw: &str) -> Option<String> {
    let cleaned: String = raw.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
    let cleaned = cleaned.to_ascii_uppercase();
    if cleaned.len() == 4 {
        Some(cleaned)
    } else {
        None
    }
}

fn is_affirmative(text: &str) -> bool {
    let t = text.trim().to_ascii_lowercase();
    matches!(t.as_str(), "yes" | "yeah" | "yep" | "correct" | "1")
}

fn is_negative(text: &str) -> bool {
    let t = text.trim().to_ascii_lowercase();
    matches!(t.as_str(), "no" | "nope" | "incorrect" | "2")
}

/// Pure FSM transition. Never performs I/O; lookups are requested via
/// `Output::Effect` and resumed via `Input::ExternalEvent`.
pub fn step(mut state: CallState, input: Input, now: DateTime<Utc>) -> (CallState, Output) {
    if state.is_terminal() {
        let output = match state.phase {
            Phase::Done => Output::Noop,
            _ => Output::Hangup(APOLOGY.to_string()),
        };
        return (state, output);
    }

    let output = match state.phase {
        Phase::PhoneAuth => step_phone_auth(&mut state, input, now),
        Phase::PinAuth => step_pin_auth(&mut state, input, now),
        Phase::ProviderSelect => step_provider_select(&mut state, input, now),
        Phase::ProviderGreeting => step_provider_greeting(&mut state, input, now),
        Phase::CollectJobCode => step_collect_job_code(&mut state, input, now),
        Phase::ConfirmJobCode => step_confirm_job_code(&mut state, input, now),
        Phase::JobOptions => step_job_options(&mut state, input, now),
        Phase::OccurrenceSelect => step_occurrence_select(&mut state, input, now),
        Phase::CollectReason => step_collect_reason(&mut state, input, now),
        Phase::ConfirmLeaveOpen => step_confirm_leave_open(&mut state, input, now),
        Phase::CollectDay => step_collect_day(&mut state, input, now),
        Phase::CollectMonth => step_collect_month(&mut state, input, now),
        Phase::CollectTime => step_collect_time(&mut state, input, now),
        Phase::ConfirmDateTime => step_confirm_date_time(&mut state, input, now),
        Phase::PendingTransfer => step_pending_transfer(&mut state, input, now),
        Phase::Done | Phase::Error => unreachable!("handled by is_terminal guard above"),
    };

    (state, output)
}

fn step_phone_auth(state: &mut CallState, input: Input, now: DateTime<Utc>) -> Output {
    match input {
        Input::StartInbound { caller_phone } => {
            state.identity.transfer_number = None;
            state.caller_phone = Some(caller_phone.clone());
            Output::Effect(Effect::LookupEmployeeByPhone { phone: caller_phone })
        }
        Input::StartOutbound { employee_id, occurrence_id, round, caller_phone } => {
            state.identity.employee_id = Some(employee_id);
            state.work_item.occurrence_id = Some(occurrence_id.clone());
            state.work_item.round = Some(round);
            state.caller_phone = Some(caller_phone);
            state.transition(Phase::ProviderGreeting, now);
            gather_speech("Hello, this is a call about an open shift. Are you available to work it?")
        }
        Input::ExternalEvent { payload: ExternalEventPayload::EmployeeLookup(matches), .. } => {
            match matches.len() {
                1 => {
                    let employee = &matches[0];
                    state.identity.employee_id = Some(employee.employee_id.clone());
                    state.transition(Phase::ProviderSelect, now);
                    Output::Effect(Effect::LookupProvidersForEmployee { employee_id: employee.employee_id.clone() })
                }
                0 => {
                    state.transition(Phase::PinAuth, now);
                    gather_dtmf("I couldn't find your number on file. Please enter your four digit PIN, followed by the pound sign.", 5)
                }
                _ => {
                    state.transition(Phase::PinAuth, now);
                    gather_dtmf("Multiple employees share this phone number. Please enter your four digit PIN, followed by the pound sign.", 5)
                }
            }
        }
        _ => bump_or_fail(state, now, Phase::PhoneAuth, gather_speech("Sorry, I didn't catch that.")),
    }
}

fn step_pin_auth(state: &mut CallState, input: Input, now: DateTime<Utc>) -> Output {
    match input {
        Input::Digits { digits } => {
            let pin = normalize_digits(&digits).trim_end_matches('#').to_string();
            if pin.is_empty() {
                return bump_or_fail(state, now, Phase::PinAuth, gather_dtmf("Please enter your PIN, followed by the pound sign.", 5));
            }
            Output::Effect(Effect::LookupEmployeeByPin { pin })
        }
        Input::Silence => bump_or_fail(state, now, Phase::PinAuth, gather_dtmf("I didn't receive a PIN. Please enter your four digit PIN, followed by the pound sign.", 5)),
        Input::ExternalEvent { payload: ExternalEventPayload::EmployeeLookup(matches), .. } => {
            if let Some(employee) = matches.into_iter().next() {
                state.identity.employee_id = Some(employee.employee_id.clone());
                state.reset_attempts(Phase::PinAuth);
                state.transition(Phase::ProviderSelect, now);
                Output::Effect(Effect::LookupProvidersForEmployee { employee_id: employee.employee_id })
            } else {
                bump_or_fail(state, now, Phase::PinAuth, gather_dtmf("That PIN wasn't recognized. Please try again.", 5))
            }
        }
        _ => bump_or_fail(state, now, Phase::PinAuth, gather_dtmf("Please enter your PIN, followed by the pound sign.", 5)),
    }
}

fn step_provider_select(state: &mut CallState, input: Input, now: DateTime<Utc>) -> Output {
    match input {
        Input::ExternalEvent { payload: ExternalEventPayload::ProvidersLookup(providers), .. } => {
            if let Some(choice) = state.pending_choice.take() {
                let idx = choice.parse::<usize>().ok().and_then(|n| n.checked_sub(1));
                match idx.and_then(|i| providers.get(i)) {
                    Some(p) => {
                        let p = p.clone();
                        apply_provider(state, &p);
                        state.reset_attempts(Phase::ProviderSelect);
                        state.transition(Phase::ProviderGreeting, now);
                        let name = state.identity.provider_name.clone().unwrap_or_default();
                        gather_speech(format!("Welcome to {name}. Please tell me or enter your job code."))
                    }
                    None => bump_or_fail(state, now, Phase::ProviderSelect, provider_menu_prompt(&providers)),
                }
            } else if providers.len() <= 1 {
                if let Some(p) = providers.into_iter().next() {
                    apply_provider(state, &p);
                }
                state.transition(Phase::ProviderGreeting, now);
                let name = state.identity.provider_name.clone().unwrap_or_default();
                gather_speech(format!("Welcome to {name}. Please tell me or enter your job code."))
            } else {
                provider_menu_prompt(&providers)
            }
        }
        Input::Digits { digits } => {
            let choice = normalize_digits(&digits).trim_end_matches('#').to_string();
            if choice.is_empty() {
                return bump_or_fail(state, now, Phase::ProviderSelect, gather_dtmf("Please choose a provider from the list.", 1));
            }
            state.pending_choice = Some(choice);
            Output::Effect(Effect::LookupProvidersForEmployee {
                employee_id: state.identity.employee_id.clone().unwrap_or_default(),
            })
        }
        _ => bump_or_fail(state, now, Phase::ProviderSelect, gather_dtmf("Please choose a provider from the list.", 1)),
    }
}

fn provider_menu_prompt(providers: &[ProviderRef]) -> Output {
    let menu: Vec<String> = providers
        .iter()
        .take(9)
        .enumerate()
        .map(|(i, p)| format!("{}: {}", i + 1, p.name))
        .collect();
    gather_dtmf(format!("Which provider are you calling about? {}", menu.join(". ")), 1)
}

fn apply_provider(state: &mut CallState, provider: &ProviderRef) {
    state.identity.provider_id = Some(provider.provider_id.clone());
    state.identity.provider_name = Some(provider.name.clone());
    state.identity.transfer_number = provider.transfer_number.clone();
}

fn step_provider_greeting(state: &mut CallState, input: Input, now: DateTime<Utc>) -> Output {
    if state.direction == crate::call_state::Direction::Outbound {
        return step_shift_offer(state, input, now);
    }
    match input {
        Input::SpeechResult { text } | Input::Digits { digits: text } => {
            let _ = text;
            state.transition(Phase::CollectJobCode, now);
            gather_dtmf("Please enter your four character job code.", 4)
        }
        Input::Silence => bump_or_fail(state, now, Phase::ProviderGreeting, gather_speech("I didn't hear anything. Please tell me your job code.")),
        _ => bump_or_fail(state, now, Phase::ProviderGreeting, gather_speech("Sorry, I didn't catch that.")),
    }
}

/// Outbound-wave counterpart of [`step_provider_greeting`]: the call exists
/// to ask one yes/no question (is the employee available to take the open
/// shift), not to walk through the self-service job-code menu.
fn step_shift_offer(state: &mut CallState, input: Input, now: DateTime<Utc>) -> Output {
    let reply = match &input {
        Input::SpeechResult { text } => Some(text.clone()),
        Input::Digits { digits } => Some(digits.clone()),
        _ => None,
    };

    match reply {
        Some(reply) if is_affirmative(&reply) => {
            state.work_item.action_type = Some(ActionType::AcceptShift);
            state.transition(Phase::Done, now);
            Output::Hangup("Great, thank you! We've recorded that you'll take this shift.".to_string())
        }
        Some(reply) if is_negative(&reply) => {
            state.work_item.action_type = Some(ActionType::DeclineShift);
            state.transition(Phase::Done, now);
            Output::Hangup("No problem, thanks for letting us know.".to_string())
        }
        Some(_) => bump_or_fail(
            state,
            now,
            Phase::ProviderGreeting,
            gather_speech("Sorry, please say yes or no: are you available to work this shift?"),
        ),
        None => bump_or_fail(
            state,
            now,
            Phase::ProviderGreeting,
            gather_speech("I didn't hear anything. Are you available to work this shift?"),
        ),
    }
}

fn step_collect_job_code(state: &mut CallState, input: Input, now: DateTime<Utc>) -> Output {
    let raw = match &input {
        Input::Digits { digits } => Some(digits.clone()),
        Input::SpeechResult { text } => Some(text.clone()),
        _ => None,
    };

    match raw {
        Some(raw) => match normalize_job_code(&raw) {
            Some(code) => {
                state.work_item.job_template_id = Some(code.clone());
                Output::Effect(Effect::LookupJobTemplate {
                    provider_id: state.identity.provider_id.clone().unwrap_or_default(),
                    code,
                })
            }
            None => bump_or_fail(state, now, Phase::CollectJobCode, gather_dtmf("That job code wasn't four characters. Please try again.", 4)),
        },
        None => bump_or_fail(state, now, Phase::CollectJobCode, gather_dtmf("Please enter your four character job code.", 4)),
    }
}

fn step_confirm_job_code(state: &mut CallState, input: Input, now: DateTime<Utc>) -> Output {
    match input {
        Input::ExternalEvent { payload: ExternalEventPayload::JobTemplateLookup(template), .. } => match template {
            Some(t) => {
                state.work_item.job_template_id = Some(t.job_template_id.clone());
                state.work_item.patient_id = Some(t.patient_id.clone());
                state.transition(Phase::ConfirmJobCode, now);
                gather_speech(format!("I heard job code {}. Is that correct?", t.code))
            }
            None => bump_or_fail(state, now, Phase::CollectJobCode, gather_dtmf("That job code wasn't recognized. Please try again.", 4)),
        },
        Input::SpeechResult { text } if is_affirmative(&text) => {
            state.reset_attempts(Phase::ConfirmJobCode);
            state.transition(Phase::JobOptions, now);
            job_options_prompt()
        }
        Input::Digits { digits } if is_affirmative(&digits) => {
            state.reset_attempts(Phase::ConfirmJobCode);
            state.transition(Phase::JobOptions, now);
            job_options_prompt()
        }
        Input::SpeechResult { text } if is_negative(&text) => {
            state.work_item.job_template_id = None;
            state.transition(Phase::CollectJobCode, now);
            gather_dtmf("Let's try again. Please enter your four character job code.", 4)
        }
        Input::Digits { digits } if is_negative(&digits) => {
            state.work_item.job_template_id = None;
            state.transition(Phase::CollectJobCode, now);
            gather_dtmf("Let's try again. Please enter your four character job code.", 4)
        }
        _ => bump_or_fail(state, now, Phase::ConfirmJobCode, gather_speech("Please say yes or no: was that job code correct?")),
    }
}

fn job_options_prompt() -> Output {
    gather_dtmf(
        "Press 1 to report an absence for today's shift, 2 to reschedule, 3 to leave the shift open, or 4 to speak with a representative.",
        1,
    )
}

fn step_job_options(state: &mut CallState, input: Input, now: DateTime<Utc>) -> Output {
    let choice = match &input {
        Input::Digits { digits } => Some(digits.trim_end_matches('#').to_string()),
        Input::SpeechResult { text } => Some(text.trim().to_string()),
        _ => None,
    };

    match choice.as_deref() {
        Some("1") => {
            state.work_item.action_type = Some(ActionType::ReportAbsence);
            state.transition(Phase::OccurrenceSelect, now);
            Output::Effect(Effect::LookupOccurrencesForTemplate {
                template_id: state.work_item.job_template_id.clone().unwrap_or_default(),
            })
        }
        Some("2") => {
            state.work_item.action_type = Some(ActionType::Reschedule);
            state.transition(Phase::CollectDay, now);
            gather_dtmf("What day would you like to reschedule to? Enter the day of the month, one or two digits.", 2)
        }
        Some("3") => {
            state.work_item.action_type = Some(ActionType::LeaveOpen);
            state.transition(Phase::ConfirmLeaveOpen, now);
            gather_speech("Are you sure you want to leave this shift open for someone else to pick up?")
        }
        Some("4") => {
            state.work_item.action_type = Some(ActionType::TransferToHuman);
            let rep_phone = state.identity.transfer_number.clone().unwrap_or_default();
            let caller_phone = state.caller_phone.clone().unwrap_or_default();
            state.pending_transfer = Some(crate::call_state::PendingTransfer {
                representative_phone: rep_phone,
                caller_phone,
            });
            state.transition(Phase::PendingTransfer, now);
            Output::ConnectStream(crate::fsm::StreamTarget { call_type: "transfer".to_string(), occurrence_id: None, round: None })
        }
        _ => bump_or_fail(state, now, Phase::JobOptions, job_options_prompt()),
    }
}

fn step_occurrence_select(state: &mut CallState, input: Input, now: DateTime<Utc>) -> Output {
    match input {
        Input::ExternalEvent { payload: ExternalEventPayload::OccurrencesLookup(occurrences), .. } => {
            let today = occurrences.into_iter().find(|o| o.scheduled_at.date_naive() == now.date_naive());
            match today {
                Some(occ) => {
                    state.work_item.occurrence_id = Some(occ.occurrence_id);
                    state.transition(Phase::CollectReason, now);
                    gather_speech("I'm sorry to hear that. Can you briefly tell me the reason for the absence?")
                }
                None => {
                    state.transition(Phase::Error, now);
                    Output::Hangup("I couldn't find a shift scheduled for today under that job code.".to_string())
                }
            }
        }
        _ => bump_or_fail(state, now, Phase::OccurrenceSelect, Output::Noop),
    }
}

fn step_collect_reason(state: &mut CallState, input: Input, now: DateTime<Utc>) -> Output {
    match input {
        Input::SpeechResult { text } if !text.trim().is_empty() => {
            state.work_item.reason = Some(text);
            Output::Effect(Effect::MarkOccurrenceUnfilled {
                occurrence_id: state.work_item.occurrence_id.clone().unwrap_or_default(),
            })
        }
        Input::ExternalEvent { payload: ExternalEventPayload::Ack, .. } => {
            state.transition(Phase::Done, now);
            Output::Hangup("Thanks, I've logged the absence and notified the team. Goodbye.".to_string())
        }
        _ => bump_or_fail(state, now, Phase::CollectReason, gather_speech("Sorry, can you repeat the reason for the absence?")),
    }
}

fn step_confirm_leave_open(state: &mut CallState, input: Input, now: DateTime<Utc>) -> Output {
    match input {
        Input::SpeechResult { text } if is_affirmative(&text) => Output::Effect(Effect::MarkOccurrenceLeaveOpen {
            occurrence_id: state.work_item.occurrence_id.clone().unwrap_or_default(),
        }),
        Input::Digits { digits } if is_affirmative(&digits) => Output::Effect(Effect::MarkOccurrenceLeaveOpen {
            occurrence_id: state.work_item.occurrence_id.clone().unwrap_or_default(),
        }),
        Input::SpeechResult { text } if is_negative(&text) => {
            state.transition(Phase::JobOptions, now);
            job_options_prompt()
        }
        Input::ExternalEvent { payload: ExternalEventPayload::Ack, .. } => {
            state.transition(Phase::Done, now);
            Output::Hangup("Understood, the shift has been left open. Goodbye.".to_string())
        }
        _ => bump_or_fail(state, now, Phase::ConfirmLeaveOpen, gather_speech("Please say yes or no.")),
    }
}

fn step_collect_day(state: &mut CallState, input: Input, now: DateTime<Utc>) -> Output {
    match input {
        Input::Digits { digits } => {
            let day = normalize_digits(&digits).trim_end_matches('#').to_string();
            match day.parse::<u32>() {
                Ok(d) if (1..=31).contains(&d) => {
                    state.work_item.reason = Some(format!("day:{d}"));
                    state.transition(Phase::CollectMonth, now);
                    gather_dtmf("What month? Enter one or two digits.", 2)
                }
                _ => bump_or_fail(state, now, Phase::CollectDay, gather_dtmf("That's not a valid day. Enter the day of the month.", 2)),
            }
        }
        _ => bump_or_fail(state, now, Phase::CollectDay, gather_dtmf("What day would you like to reschedule to?", 2)),
    }
}

fn step_collect_month(state: &mut CallState, input: Input, now: DateTime<Utc>) -> Output {
    match input {
        Input::Digits { digits } => {
            let month = normalize_digits(&digits).trim_end_matches('#').to_string();
            match month.parse::<u32>() {
                Ok(m) if (1..=12).contains(&m) => {
                    let day_part = state.work_item.reason.clone().unwrap_or_default();
                    state.work_item.reason = Some(format!("{day_part},month:{m}"));
                    state.transition(Phase::CollectTime, now);
                    gather_dtmf("What time? Enter four digits in 24 hour time, for example fourteen thirty.", 4)
                }
                _ => bump_or_fail(state, now, Phase::CollectMonth, gather_dtmf("That's not a valid month. Enter one or two digits.", 2)),
            }
        }
        _ => bump_or_fail(state, now, Phase::CollectMonth, gather_dtmf("What month would you like to reschedule to?", 2)),
    }
}

fn step_collect_time(state: &mut CallState, input: Input, now: DateTime<Utc>) -> Output {
    match input {
        Input::Digits { digits } => {
            let time = normalize_digits(&digits).trim_end_matches('#').to_string();
            if time.len() == 4 && time.parse::<u32>().is_ok() {
                let prior = state.work_item.reason.clone().unwrap_or_default();
                state.work_item.reason = Some(format!("{prior},time:{time}"));
                if let Some(proposed) = parse_proposed_date_time(&state.work_item.reason.clone().unwrap_or_default(), now) {
                    state.work_item.proposed_date_time = Some(proposed);
                    state.transition(Phase::ConfirmDateTime, now);
                    gather_speech(format!("I heard {}. Is that correct?", proposed.format("%A %B %-d at %H:%M")))
                } else {
                    bump_or_fail(state, now, Phase::CollectTime, gather_dtmf("That date wasn't valid. Please re-enter the day, month, and time from the beginning.", 4))
                }
            } else {
                bump_or_fail(state, now, Phase::CollectTime, gather_dtmf("Enter four digits for the time, in 24 hour format.", 4))
            }
        }
        _ => bump_or_fail(state, now, Phase::CollectTime, gather_dtmf("What time would you like to reschedule to?", 4)),
    }
}

fn parse_proposed_date_time(encoded: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let mut day = None;
    let mut month = None;
    let mut hm = None;
    for part in encoded.split(',') {
        if let Some(v) = part.strip_prefix("day:") {
            day = v.parse::<u32>().ok();
        } else if let Some(v) = part.strip_prefix("month:") {
            month = v.parse::<u32>().ok();
        } else if let Some(v) = part.strip_prefix("time:") {
            if v.len() == 4 {
                hm = Some((v[..2].parse::<u32>().ok()?, v[2..].parse::<u32>().ok()?));
            }
        }
    }
    let (day, month, (hour, minute)) = (day?, month?, hm?);
    if hour > 23 || minute > 59 {
        return None;
    }
    let year = now.date_naive().year();
    chrono::NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(hour, minute, 0))
        .map(|naive| DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
}

fn step_confirm_date_time(state: &mut CallState, input: Input, now: DateTime<Utc>) -> Output {
    match input {
        Input::SpeechResult { text } if is_affirmative(&text) => Output::Effect(Effect::CreateOccurrence {
            template_id: state.work_item.job_template_id.clone().unwrap_or_default(),
            scheduled_at: state.work_item.proposed_date_time.unwrap_or(now),
        }),
        Input::Digits { digits } if is_affirmative(&digits) => Output::Effect(Effect::CreateOccurrence {
            template_id: state.work_item.job_template_id.clone().unwrap_or_default(),
            scheduled_at: state.work_item.proposed_date_time.unwrap_or(now),
        }),
        Input::SpeechResult { text } if is_negative(&text) => {
            state.transition(Phase::CollectDay, now);
            gather_dtmf("Let's try again. What day would you like to reschedule to?", 2)
        }
        Input::ExternalEvent { payload: ExternalEventPayload::OccurrenceWritten(_), .. } => {
            state.transition(Phase::Done, now);
            Output::Hangup("Your shift has been rescheduled. Goodbye.".to_string())
        }
        _ => bump_or_fail(state, now, Phase::ConfirmDateTime, gather_speech("Please say yes or no.")),
    }
}

fn step_pending_transfer(_state: &mut CallState, _input: Input, _now: DateTime<Utc>) -> Output {
    // services/call-control's transfer orchestrator (transfer_after_connect,
    // transfer_status) owns Dial emission, pendingTransfer resolution, and
    // the eventual Done transition directly against the stored CallState;
    // this phase is never re-entered through `step` once ConnectStream is
    // emitted, so there is nothing for it to do.
    Output::Noop
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call_state::Direction;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, 9, 0, 0).unwrap()
    }

    fn fresh(phase: Phase) -> CallState {
        let mut s = CallState::new("CAtest", Direction::Inbound, "en-AU", now());
        s.phase = phase;
        s
    }

    #[test]
    fn phone_auth_requests_employee_lookup() {
        let state = fresh(Phase::PhoneAuth);
        let (state, out) = step(state, Input::StartInbound { caller_phone: "+61400000001".into() }, now());
        assert_eq!(state.caller_phone.as_deref(), Some("+61400000001"));
        assert_eq!(out, Output::Effect(Effect::LookupEmployeeByPhone { phone: "+61400000001".into() }));
    }

    #[test]
    fn unique_employee_match_goes_to_provider_select() {
        let state = fresh(Phase::PhoneAuth);
        let (state, out) = step(
            state,
            Input::ExternalEvent {
                name: "employee_lookup".into(),
                payload: ExternalEventPayload::EmployeeLookup(vec![EmployeeRef { employee_id: "E1".into(), display_name: "Jamie".into() }]),
            },
            now(),
        );
        assert_eq!(state.phase, Phase::ProviderSelect);
        assert_eq!(state.identity.employee_id.as_deref(), Some("E1"));
        assert!(matches!(out, Output::Effect(Effect::LookupProvidersForEmployee { .. })));
    }

    #[test]
    fn no_employee_match_enters_pin_auth() {
        let state = fresh(Phase::PhoneAuth);
        let (state, out) = step(
            state,
            Input::ExternalEvent { name: "employee_lookup".into(), payload: ExternalEventPayload::EmployeeLookup(vec![]) },
            now(),
        );
        assert_eq!(state.phase, Phase::PinAuth);
        assert!(matches!(out, Output::AskDtmf { .. }));
    }

    #[test]
    fn pin_auth_retries_then_succeeds() {
        let mut state = fresh(Phase::PinAuth);
        let (s1, out1) = step(state.clone(), Input::Digits { digits: "0000#".into() }, now());
        state = s1;
        assert!(matches!(out1, Output::Effect(Effect::LookupEmployeeByPin { .. })));
        let (s2, out2) = step(
            state,
            Input::ExternalEvent { name: "pin_lookup".into(), payload: ExternalEventPayload::EmployeeLookup(vec![]) },
            now(),
        );
        assert_eq!(s2.attempts_for(Phase::PinAuth), 1);
        assert!(matches!(out2, Output::AskDtmf { .. }));

        let (s3, out3) = step(
            s2,
            Input::ExternalEvent {
                name: "pin_lookup".into(),
                payload: ExternalEventPayload::EmployeeLookup(vec![EmployeeRef { employee_id: "E2".into(), display_name: "Robin".into() }]),
            },
            now(),
        );
        assert_eq!(s3.phase, Phase::ProviderSelect);
        assert!(matches!(out3, Output::Effect(Effect::LookupProvidersForEmployee { .. })));
    }

    #[test]
    fn max_attempts_terminates_to_hangup() {
        let mut state = fresh(Phase::CollectJobCode);
        let mut out = Output::Noop;
        for _ in 0..(MAX_ATTEMPTS_PER_FIELD + 1) {
            let (s, o) = step(state, Input::Digits { digits: "A".into() }, now());
            state = s;
            out = o;
        }
        assert_eq!(state.phase, Phase::Error);
        assert!(matches!(out, Output::Hangup(_)));
    }

    #[test]
    fn job_options_branch_four_sets_pending_transfer() {
        let mut state = fresh(Phase::JobOptions);
        state.caller_phone = Some("+61400000001".into());
        state.identity.transfer_number = Some("+61490550941".into());
        let (state, out) = step(state, Input::Digits { digits: "4#".into() }, now());
        assert_eq!(state.phase, Phase::PendingTransfer);
        assert!(state.pending_transfer.is_some());
        assert!(matches!(out, Output::ConnectStream(_)));
    }

    #[test]
    fn determinism_same_input_same_output() {
        let state = fresh(Phase::JobOptions);
        let (s1, o1) = step(state.clone(), Input::Digits { digits: "3#".into() }, now());
        let (s2, o2) = step(state, Input::Digits { digits: "3#".into() }, now());
        assert_eq!(s1, s2);
        assert_eq!(o1, o2);
    }

    #[test]
    fn done_phase_is_terminal_and_idempotent() {
        let state = fresh(Phase::Done);
        let (s1, o1) = step(state, Input::Silence, now());
        assert_eq!(s1.phase, Phase::Done);
        assert_eq!(o1, Output::Noop);
    }

    fn outbound_wave_call() -> CallState {
        let mut state = CallState::new("CAoutbound", Direction::Outbound, "en-AU", now());
        state.phase = Phase::ProviderGreeting;
        state.work_item.occurrence_id = Some("O1".into());
        state.work_item.round = Some(1);
        state.identity.employee_id = Some("E1".into());
        state
    }

    #[test]
    fn outbound_wave_accept_sets_action_type_and_hangs_up() {
        let state = outbound_wave_call();
        let (state, out) = step(state, Input::SpeechResult { text: "yes".into() }, now());
        assert_eq!(state.phase, Phase::Done);
        assert_eq!(state.work_item.action_type, Some(ActionType::AcceptShift));
        assert!(matches!(out, Output::Hangup(_)));
    }

    #[test]
    fn outbound_wave_decline_sets_action_type_and_hangs_up() {
        let state = outbound_wave_call();
        let (state, out) = step(state, Input::Digits { digits: "no".into() }, now());
        assert_eq!(state.phase, Phase::Done);
        assert_eq!(state.work_item.action_type, Some(ActionType::DeclineShift));
        assert!(matches!(out, Output::Hangup(_)));
    }

    #[test]
    fn outbound_wave_unclear_answer_reprompts_without_falling_into_job_code_menu() {
        let state = outbound_wave_call();
        let (state, out) = step(state, Input::SpeechResult { text: "maybe later".into() }, now());
        assert_eq!(state.phase, Phase::ProviderGreeting);
        assert!(state.work_item.action_type.is_none());
        assert!(matches!(out, Output::AskSpeech { .. }));
    }

    #[test]
    fn inbound_provider_greeting_still_routes_to_job_code_menu() {
        let state = fresh(Phase::ProviderGreeting);
        let (state, out) = step(state, Input::SpeechResult { text: "hello".into() }, now());
        assert_eq!(state.phase, Phase::CollectJobCode);
        assert!(matches!(out, Output::AskDtmf { .. }));
    }
}
