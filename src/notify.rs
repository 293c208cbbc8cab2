use crate::config::EmailSettings;
use lettre::message::header::{ContentType, MIME_VERSION_1_0};
use lettre::message::Mailbox;
use lettre::transport::smtp::extension::ClientId;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::future::Future;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("SMTP transport error: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),
    #[error("invalid email address: {0}")]
    Address(#[from] lettre::address::AddressError),
    #[error("failed to build email: {0}")]
    Build(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub host: String,
    pub body: String,
}

impl Alert {
    pub fn subject(&self) -> String {
        format!("Bluetooth Battery Level Warning - Host:{}", self.host)
    }
}

pub trait Notifier {
    fn notify(&self, alert: &Alert) -> impl Future<Output = Result<(), NotifyError>> + Send;
}

/// Plain SMTP relay delivery: no authentication, no TLS, one connection per alert.
#[derive(Debug, Clone)]
pub struct SmtpNotifier {
    settings: EmailSettings,
}

impl SmtpNotifier {
    pub fn new(settings: EmailSettings) -> Self {
        Self { settings }
    }
}

impl Notifier for SmtpNotifier {
    async fn notify(&self, alert: &Alert) -> Result<(), NotifyError> {
        let message = compose_message(&self.settings.address, alert)?;

        let mailer = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(
            self.settings.server.as_str(),
        )
        .port(self.settings.port)
        .hello_name(ClientId::Domain(alert.host.clone()))
        .build();
        mailer.send(message).await?;

        info!(
            to = %self.settings.address,
            relay = %self.settings.server,
            port = self.settings.port,
            "alert email sent"
        );
        Ok(())
    }
}

/// Sender and recipient are the same mailbox. The body goes out as-is under
/// `text/html`; `<br>` tags in it are the only markup.
pub fn compose_message(address: &str, alert: &Alert) -> Result<Message, NotifyError> {
    let mailbox: Mailbox = address.parse()?;
    Message::builder()
        .from(mailbox.clone())
        .to(mailbox)
        .subject(alert.subject())
        .header(MIME_VERSION_1_0)
        .header(ContentType::TEXT_HTML)
        .body(alert.body.clone())
        .map_err(|e| NotifyError::Build(e.to_string()))
}
