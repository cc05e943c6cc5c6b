use crate::config::{NotificationConfig, SmtpConfig};
use crate::workflows::display::SlotTable;
use lettre::message::{Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info};

pub const TEXT_GREETING: &str = "Hi,\nPlease refer vaccine availability";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub text_body: String,
    pub html_body: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationOutcome {
    Sent { subject: String, rows: usize },
    Skipped,
}

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("mail transport failed: {0}")]
    Transport(String),
    #[error("unable to write message: {0}")]
    Io(#[from] std::io::Error),
    #[error("unable to encode message: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("invalid mail address: {0}")]
    Address(#[from] lettre::address::AddressError),
    #[error("unable to build email: {0}")]
    Email(#[from] lettre::error::Error),
}

/// Delivery backend for rendered messages.
pub trait Mailer: Send + Sync + fmt::Debug {
    fn deliver(&self, message: &NotificationMessage) -> Result<(), NotificationError>;
}

/// Keeps delivered messages in memory.
#[derive(Debug, Default)]
pub struct MemoryMailer {
    sent: Mutex<Vec<NotificationMessage>>,
}

impl MemoryMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<NotificationMessage> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Mailer for MemoryMailer {
    fn deliver(&self, message: &NotificationMessage) -> Result<(), NotificationError> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.clone());
        Ok(())
    }
}

impl<M: Mailer + ?Sized> Mailer for std::sync::Arc<M> {
    fn deliver(&self, message: &NotificationMessage) -> Result<(), NotificationError> {
        (**self).deliver(message)
    }
}

/// Sends messages through an implicit-TLS SMTP relay, authenticating as
/// the sender.
pub struct SmtpMailer {
    transport: SmtpTransport,
    host: String,
    port: u16,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig, username: &str) -> Result<Self, NotificationError> {
        let transport = SmtpTransport::relay(&config.host)
            .map_err(|err| NotificationError::Transport(err.to_string()))?
            .port(config.port)
            .credentials(Credentials::new(
                username.to_string(),
                config.password.clone(),
            ))
            .build();

        Ok(Self {
            transport,
            host: config.host.clone(),
            port: config.port,
        })
    }
}

impl fmt::Debug for SmtpMailer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpMailer")
            .field("host", &self.host)
            .field("port", &self.port)
            .finish_non_exhaustive()
    }
}

impl Mailer for SmtpMailer {
    fn deliver(&self, message: &NotificationMessage) -> Result<(), NotificationError> {
        let email = build_email(message)?;
        self.transport
            .send(&email)
            .map_err(|err| NotificationError::Transport(err.to_string()))?;
        debug!(host = %self.host, port = self.port, "message accepted by relay");
        Ok(())
    }
}

/// MIME form of a message: `multipart/alternative` with plain and HTML
/// parts when an HTML body is present, plain text otherwise.
pub fn build_email(message: &NotificationMessage) -> Result<Message, NotificationError> {
    let builder = Message::builder()
        .from(message.from.parse::<Mailbox>()?)
        .to(message.to.parse::<Mailbox>()?)
        .subject(message.subject.as_str());

    let email = match &message.html_body {
        Some(html) => builder.multipart(MultiPart::alternative_plain_html(
            message.text_body.clone(),
            html.clone(),
        ))?,
        None => builder.singlepart(SinglePart::plain(message.text_body.clone()))?,
    };
    Ok(email)
}

pub fn subject_line(age_threshold: u32, count: usize) -> String {
    format!("Availability for Max Age {age_threshold} Count {count}")
}

#[derive(Debug)]
pub struct Notifier {
    mailer: Box<dyn Mailer>,
    config: NotificationConfig,
}

impl Notifier {
    pub fn new(mailer: Box<dyn Mailer>, config: NotificationConfig) -> Self {
        Self { mailer, config }
    }

    pub fn config(&self) -> &NotificationConfig {
        &self.config
    }

    /// Render `table` into a message and hand it to the mailer. An empty
    /// table only produces the zero-results notice when configured to.
    pub fn notify(
        &self,
        table: &SlotTable,
        age_threshold: u32,
    ) -> Result<NotificationOutcome, NotificationError> {
        let Some(message) = self.compose(table, age_threshold) else {
            debug!(age_threshold, "empty result, notification skipped");
            return Ok(NotificationOutcome::Skipped);
        };

        self.mailer.deliver(&message)?;
        info!(to = %message.to, subject = %message.subject, "availability notification sent");
        Ok(NotificationOutcome::Sent {
            subject: message.subject,
            rows: table.rows.len(),
        })
    }

    pub fn compose(&self, table: &SlotTable, age_threshold: u32) -> Option<NotificationMessage> {
        let count = table.rows.len();
        if count == 0 {
            if !self.config.notify_on_empty {
                return None;
            }
            return Some(self.message(
                subject_line(age_threshold, 0),
                format!("No slots matched the age threshold of {age_threshold}."),
                None,
            ));
        }

        let html = format!("<html><body><p>{}</p></body></html>", table.render_html());
        Some(self.message(
            subject_line(age_threshold, count),
            TEXT_GREETING.to_string(),
            Some(html),
        ))
    }

    fn message(
        &self,
        subject: String,
        text_body: String,
        html_body: Option<String>,
    ) -> NotificationMessage {
        NotificationMessage {
            from: self.config.sender.clone(),
            to: self.config.recipient.clone(),
            subject,
            text_body,
            html_body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::availability::{FeeType, SlotRow};
    use chrono::NaiveDate;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn config(notify_on_empty: bool) -> NotificationConfig {
        NotificationConfig {
            sender: "alerts@example.com".to_string(),
            recipient: "me@example.com".to_string(),
            notify_on_empty,
            outbox_dir: PathBuf::from("outbox"),
            smtp: None,
        }
    }

    fn message(html_body: Option<&str>) -> NotificationMessage {
        NotificationMessage {
            from: "alerts@example.com".to_string(),
            to: "me@example.com".to_string(),
            subject: "Availability for Max Age 45 Count 1".to_string(),
            text_body: TEXT_GREETING.to_string(),
            html_body: html_body.map(str::to_string),
        }
    }

    fn row() -> SlotRow {
        SlotRow {
            center_id: 7,
            center_name: "PHC <Bopal>".to_string(),
            address: "Ring Road".to_string(),
            pincode: "380058".to_string(),
            state_name: "Gujarat".to_string(),
            district_name: "Ahmedabad".to_string(),
            date: NaiveDate::from_ymd_opt(2021, 5, 4).unwrap(),
            min_age_limit: 18,
            available_capacity: 12,
            vaccine: "COVAXIN".to_string(),
            fee_type: FeeType::Free,
            distance_km: None,
        }
    }

    #[test]
    fn sends_two_part_message_for_rows() {
        let mailer = Arc::new(MemoryMailer::new());
        let notifier = Notifier::new(Box::new(Arc::clone(&mailer)), config(false));
        let table = SlotTable::from_rows(&[row()], false);

        let outcome = notifier.notify(&table, 45).expect("delivered");
        assert_eq!(
            outcome,
            NotificationOutcome::Sent {
                subject: "Availability for Max Age 45 Count 1".to_string(),
                rows: 1
            }
        );

        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].text_body, TEXT_GREETING);
        let html = sent[0].html_body.as_deref().unwrap();
        assert!(html.starts_with("<html><body><p><table"));
        assert!(html.contains("PHC &lt;Bopal&gt;"));
    }

    #[test]
    fn empty_result_respects_notify_on_empty() {
        let table = SlotTable::from_rows(&[], false);

        let quiet = Arc::new(MemoryMailer::new());
        let notifier = Notifier::new(Box::new(Arc::clone(&quiet)), config(false));
        assert_eq!(notifier.notify(&table, 18).unwrap(), NotificationOutcome::Skipped);
        assert!(quiet.sent().is_empty());

        let loud = Arc::new(MemoryMailer::new());
        let notifier = Notifier::new(Box::new(Arc::clone(&loud)), config(true));
        notifier.notify(&table, 18).unwrap();
        let sent = loud.sent();
        assert_eq!(sent[0].subject, "Availability for Max Age 18 Count 0");
        assert!(sent[0].html_body.is_none());
    }

    #[test]
    fn email_with_html_is_multipart_alternative() {
        let email = build_email(&message(Some("<html><body><p>slots</p></body></html>")))
            .expect("email builds");
        let raw = String::from_utf8(email.formatted()).unwrap();

        assert!(raw.contains("Subject: Availability for Max Age 45 Count 1"));
        assert!(raw.contains("multipart/alternative"));
        let plain = raw.find("text/plain").expect("plain part");
        let html = raw.find("text/html").expect("html part");
        assert!(plain < html);
        assert!(raw.contains("Please refer vaccine availability"));
        assert!(raw.contains("<html><body><p>slots</p></body></html>"));
    }

    #[test]
    fn email_without_html_is_plain_text() {
        let email = build_email(&message(None)).expect("email builds");
        let raw = String::from_utf8(email.formatted()).unwrap();

        assert!(!raw.contains("multipart"));
        assert!(raw.contains("text/plain"));
        assert!(raw.contains("To: me@example.com"));
    }

    #[test]
    fn email_rejects_bad_addresses() {
        let mut bad = message(None);
        bad.to = "not an address".to_string();
        assert!(matches!(build_email(&bad), Err(NotificationError::Address(_))));
    }
}
