//! Thin REST client for placing outbound carrier calls. Grounded on the
//! Call resource shape from `rusty_twilio`'s `endpoints::voice::call`
//! module: we only need the `sid` the carrier assigns back, everything else
//! about the call's lifecycle arrives later over the webhook surface
//! `services/call-control` already serves.

use serde::Deserialize;

use crate::error::DialerError;

#[derive(Debug, Clone)]
pub struct CarrierClient {
    http: reqwest::Client,
    base_url: String,
    account_sid: String,
    auth_token: String,
}

#[derive(Debug, Deserialize)]
struct CallCreateResponse {
    sid: String,
}

impl CarrierClient {
    pub fn new(base_url: String, account_sid: String, auth_token: String) -> Self {
        Self { http: reqwest::Client::new(), base_url, account_sid, auth_token }
    }

    /// `POST {base}/Accounts/{sid}/Calls.json` — creates a call and returns
    /// the carrier-assigned `CallSid`. `answer_url` is hit once the callee
    /// picks up; `status_callback_url` receives the call's lifecycle events.
    pub async fn create_call(&self, to: &str, from: &str, answer_url: &str, status_callback_url: &str) -> Result<String, DialerError> {
        let url = format!("{}/Accounts/{}/Calls.json", self.base_url, self.account_sid);
        let params = [("To", to), ("From", from), ("Url", answer_url), ("StatusCallback", status_callback_url)];

        let response = self.http.post(&url).basic_auth(&self.account_sid, Some(&self.auth_token)).form(&params).send().await?;

        let response = response.error_for_status()?;
        let parsed: CallCreateResponse = response.json().await?;
        if parsed.sid.is_empty() {
            return Err(DialerError::CarrierResponse("empty call sid in carrier response".to_string()));
        }
        Ok(parsed.sid)
    }
}
