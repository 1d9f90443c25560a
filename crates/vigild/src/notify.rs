//! Alert dispatcher.
//!
//! One statically configured sender, one statically configured recipient.
//! Delivery failures are reported to the caller, which logs and moves on;
//! an undelivered alert never stalls the monitoring loop.

use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider rejected send (status {status}): {message}")]
    Rejected { status: u16, message: String },
}

/// Minimal contract against the notification provider.
pub trait Notifier: Send + Sync {
    /// Send `body` to the configured recipient; returns the provider's
    /// delivery id.
    fn send(&self, body: &str) -> Result<String, DispatchError>;
}

#[derive(Deserialize)]
struct TwilioMessageResponse {
    sid: String,
}

#[derive(Deserialize)]
struct TwilioErrorResponse {
    message: String,
}

/// SMS delivery through the Twilio Messages endpoint.
pub struct TwilioSms {
    http: reqwest::blocking::Client,
    base_url: String,
    account_sid: String,
    auth_token: String,
    from_number: String,
    to_number: String,
}

impl TwilioSms {
    pub fn new(
        base_url: &str,
        account_sid: &str,
        auth_token: &str,
        from_number: &str,
        to_number: &str,
        timeout: Duration,
    ) -> Result<Self, DispatchError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            account_sid: account_sid.to_string(),
            auth_token: auth_token.to_string(),
            from_number: from_number.to_string(),
            to_number: to_number.to_string(),
        })
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.base_url, self.account_sid
        )
    }
}

impl Notifier for TwilioSms {
    fn send(&self, body: &str) -> Result<String, DispatchError> {
        let response = self
            .http
            .post(self.messages_url())
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[
                ("To", self.to_number.as_str()),
                ("From", self.from_number.as_str()),
                ("Body", body),
            ])
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            let message = serde_json::from_str::<TwilioErrorResponse>(&text)
                .map(|e| e.message)
                .unwrap_or(text);
            return Err(DispatchError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: TwilioMessageResponse = response.json()?;
        Ok(parsed.sid)
    }
}
