use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment as MailAttachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use thiserror::Error;
use tracing::info;

use crate::config::MailSection;
use crate::error::ErrorKind;
use crate::store::{Subscription, TicketDetails};
use crate::ticket::QrArtifact;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("invalid address {address}: {reason}")]
    Address { address: String, reason: String },
    #[error("failed to build email: {0}")]
    Build(String),
    #[error("smtp delivery failed: {0}")]
    Transport(String),
    #[error("mail configuration error: {0}")]
    Config(String),
}

impl MailError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MailError::Address { .. } => ErrorKind::ValidationFailure,
            MailError::Transport(_) => ErrorKind::ExternalServiceFailure,
            MailError::Build(_) | MailError::Config(_) => ErrorKind::Internal,
        }
    }
}

pub type MailResult<T> = std::result::Result<T, MailError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl Attachment {
    pub fn png(artifact: &QrArtifact) -> Self {
        Self {
            file_name: artifact.file_name.clone(),
            content_type: "image/png".into(),
            bytes: artifact.png.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub body_text: String,
    pub attachments: Vec<Attachment>,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: EmailMessage) -> MailResult<()>;
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from_email: String,
    from_name: String,
}

impl SmtpMailer {
    pub fn from_config(section: &MailSection) -> MailResult<Self> {
        let username = std::env::var(&section.username_env).map_err(|_| {
            MailError::Config(format!("SMTP username env var {} not set", section.username_env))
        })?;
        let password = std::env::var(&section.password_env).map_err(|_| {
            MailError::Config(format!("SMTP password env var {} not set", section.password_env))
        })?;
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&section.smtp_host)
            .map_err(|err| MailError::Config(err.to_string()))?
            .port(section.smtp_port)
            .credentials(Credentials::new(username, password))
            .build();
        Ok(Self {
            transport,
            from_email: section.from_email.clone(),
            from_name: section.from_name.clone(),
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, message: EmailMessage) -> MailResult<()> {
        let from_address = format!("{} <{}>", self.from_name, self.from_email);
        let from: Mailbox = from_address.parse().map_err(|err: lettre::address::AddressError| {
            MailError::Address {
                address: from_address.clone(),
                reason: err.to_string(),
            }
        })?;
        let to: Mailbox = message
            .to
            .parse()
            .map_err(|err: lettre::address::AddressError| MailError::Address {
                address: message.to.clone(),
                reason: err.to_string(),
            })?;

        let mut body = MultiPart::mixed().singlepart(
            SinglePart::builder()
                .header(ContentType::TEXT_PLAIN)
                .body(message.body_text.clone()),
        );
        for attachment in &message.attachments {
            let content_type = ContentType::parse(&attachment.content_type)
                .map_err(|err| MailError::Build(err.to_string()))?;
            body = body.singlepart(
                MailAttachment::new(attachment.file_name.clone())
                    .body(attachment.bytes.clone(), content_type),
            );
        }

        let email = Message::builder()
            .from(from)
            .to(to)
            .subject(&message.subject)
            .multipart(body)
            .map_err(|err| MailError::Build(err.to_string()))?;

        self.transport
            .send(email)
            .await
            .map_err(|err| MailError::Transport(err.to_string()))?;
        Ok(())
    }
}

/// Used when outbound mail is disabled: records the send in the log only.
#[derive(Debug, Clone, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, message: EmailMessage) -> MailResult<()> {
        info!(
            to = %message.to,
            subject = %message.subject,
            attachments = message.attachments.len(),
            "mail delivery disabled; message logged"
        );
        Ok(())
    }
}

pub fn reservation_confirmation(
    details: &TicketDetails,
    ticket_url: &str,
    qr: &QrArtifact,
) -> EmailMessage {
    let body_text = format!(
        "Hello {name},\n\n\
         Your reservation is confirmed!\n\n\
         Movie: {movie}\n\
         Seat: {seat}\n\
         Show Time: {show}\n\n\
         View your ticket: {ticket_url}\n\n\
         Thanks for booking with us!",
        name = details.reservation.user_name,
        movie = details.movie_title,
        seat = details.seat_label,
        show = details.show_time.format("%Y-%m-%d %H:%M UTC"),
    );
    EmailMessage {
        to: details.reservation.email.clone(),
        subject: "Your Movie Ticket Confirmation".into(),
        body_text,
        attachments: vec![Attachment::png(qr)],
    }
}

pub fn subscription_confirmation(subscription: &Subscription, qr: &QrArtifact) -> EmailMessage {
    let expires = subscription
        .expires_at
        .map(|at| at.format("%Y-%m-%d").to_string())
        .unwrap_or_default();
    let body_text = format!(
        "Hello {name},\n\n\
         Your {plan} subscription is active until {expires}.\n\n\
         Enjoy streaming!",
        name = subscription.full_name,
        plan = subscription.plan,
    );
    EmailMessage {
        to: subscription.email.clone(),
        subject: "Your Subscription Confirmation".into(),
        body_text,
        attachments: vec![Attachment::png(qr)],
    }
}
