//! Email and SMS delivery providers.
//!
//! Each provider sends one addressed message per call and reports success
//! or failure for that call only.

use super::message::{EmailMessage, SmsMessage};
use crate::error::DispatchError;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::info;

const SENDGRID_SEND_URL: &str = "https://api.sendgrid.com/v3/mail/send";
const TWILIO_API_BASE: &str = "https://api.twilio.com/2010-04-01";

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_email(&self, message: &EmailMessage) -> Result<(), DispatchError>;
}

#[async_trait]
pub trait Texter: Send + Sync {
    async fn send_sms(&self, message: &SmsMessage) -> Result<(), DispatchError>;
}

fn http_client() -> Result<Client, DispatchError> {
    Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(20))
        .build()
        .map_err(|e| DispatchError::Network {
            message: format!("Failed to build HTTP client: {}", e),
        })
}

async fn check_response(response: reqwest::Response) -> Result<(), DispatchError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    Err(DispatchError::Rejected {
        status: status.as_u16(),
        body,
    })
}

/// SendGrid v3 mail-send provider.
pub struct SendGridMailer {
    client: Client,
    api_key: Option<String>,
    from_email: String,
}

impl SendGridMailer {
    pub fn new(api_key: Option<String>, from_email: &str) -> Result<Self, DispatchError> {
        Ok(Self {
            client: http_client()?,
            api_key,
            from_email: from_email.to_string(),
        })
    }
}

/// Request body for SendGrid's mail-send endpoint.
pub fn sendgrid_payload(message: &EmailMessage, from_email: &str) -> Value {
    json!({
        "personalizations": [{ "to": [{ "email": message.to }] }],
        "from": { "email": from_email },
        "subject": message.subject,
        "content": [{ "type": "text/html", "value": message.html }],
    })
}

#[async_trait]
impl Mailer for SendGridMailer {
    async fn send_email(&self, message: &EmailMessage) -> Result<(), DispatchError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(DispatchError::NotConfigured { channel: "email" })?;

        let response = self
            .client
            .post(SENDGRID_SEND_URL)
            .bearer_auth(api_key)
            .json(&sendgrid_payload(message, &self.from_email))
            .send()
            .await?;

        check_response(response).await?;
        info!(to = %message.to, subject = %message.subject, "Email sent");
        Ok(())
    }
}

/// Twilio Messages provider.
pub struct TwilioTexter {
    client: Client,
    account: Option<TwilioAccount>,
}

#[derive(Debug, Clone)]
pub struct TwilioAccount {
    pub sid: String,
    pub token: String,
    pub from_phone: String,
}

impl TwilioTexter {
    pub fn new(account: Option<TwilioAccount>) -> Result<Self, DispatchError> {
        Ok(Self {
            client: http_client()?,
            account,
        })
    }
}

#[async_trait]
impl Texter for TwilioTexter {
    async fn send_sms(&self, message: &SmsMessage) -> Result<(), DispatchError> {
        let account = self
            .account
            .as_ref()
            .ok_or(DispatchError::NotConfigured { channel: "sms" })?;

        let url = format!("{}/Accounts/{}/Messages.json", TWILIO_API_BASE, account.sid);
        let response = self
            .client
            .post(url)
            .basic_auth(&account.sid, Some(&account.token))
            .form(&[
                ("To", message.to.as_str()),
                ("From", account.from_phone.as_str()),
                ("Body", message.body.as_str()),
            ])
            .send()
            .await?;

        check_response(response).await?;
        info!(to = %message.to, "SMS sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sendgrid_payload_shape() {
        let message = EmailMessage {
            to: "alice@princeton.edu".into(),
            subject: "TigerSnatch: a spot opened in COS126 L01".into(),
            html: "<p>hi</p>".into(),
        };
        let payload = sendgrid_payload(&message, "tigersnatch@princeton.edu");
        assert_eq!(payload["personalizations"][0]["to"][0]["email"], "alice@princeton.edu");
        assert_eq!(payload["from"]["email"], "tigersnatch@princeton.edu");
        assert_eq!(payload["content"][0]["type"], "text/html");
    }

    #[tokio::test]
    async fn test_unconfigured_providers_fail_fast() {
        let mailer = SendGridMailer::new(None, "tigersnatch@princeton.edu").unwrap();
        let err = mailer
            .send_email(&EmailMessage {
                to: "a@princeton.edu".into(),
                subject: "s".into(),
                html: "h".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::NotConfigured { channel: "email" }));

        let texter = TwilioTexter::new(None).unwrap();
        let err = texter
            .send_sms(&SmsMessage {
                to: "+16095551234".into(),
                body: "b".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::NotConfigured { channel: "sms" }));
    }
}
