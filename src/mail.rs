use std::str::FromStr;

use anyhow::{Context, Result};
use async_trait::async_trait;
use lettre::{
    message::{Mailbox, SinglePart},
    Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use serde::{Deserialize, Serialize};
use tracing::info;

/// A plain-text message addressed to a single recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Email {
    pub to: String,
    pub to_name: Option<String>,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait Mailer: Send + Sync + 'static {
    async fn send(&self, email: &Email) -> Result<()>;
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn from_url(smtp_url: &str, from: &str) -> Result<Self> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::from_url(smtp_url)
            .context("invalid SMTP_URL")?
            .build();
        let from = from
            .parse::<Mailbox>()
            .with_context(|| format!("invalid sender address {from}"))?;
        Ok(Self { transport, from })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: &Email) -> Result<()> {
        let address = Address::from_str(&email.to)
            .with_context(|| format!("invalid recipient address {}", email.to))?;
        let message = Message::builder()
            .from(self.from.clone())
            .to(Mailbox::new(email.to_name.clone(), address))
            .subject(email.subject.clone())
            .singlepart(SinglePart::plain(email.body.clone()))
            .context("failed to build email")?;

        self.transport
            .send(message)
            .await
            .context("failed to send email")?;
        Ok(())
    }
}

/// Writes outgoing mail to the log instead of delivering it. Used when no
/// SMTP server is configured.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: &Email) -> Result<()> {
        info!(
            to = %email.to,
            subject = %email.subject,
            "smtp not configured; email not delivered"
        );
        Ok(())
    }
}
