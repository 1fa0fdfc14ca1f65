//! Who gets notified, what they are told, and how it is delivered.

pub mod eligibility;
pub mod message;
pub mod provider;

pub use eligibility::{decide, Decision, Recipient, SectionPlan, Throttle, ThrottlePolicy};
pub use message::{render_email, render_sms, EmailMessage, MessageLinks, SmsMessage};
pub use provider::{Mailer, SendGridMailer, Texter, TwilioAccount, TwilioTexter};
