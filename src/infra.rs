use chrono::{Local, NaiveDate, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{debug, info};
use vaccine_slots::config::{AppConfig, NotificationConfig};
use vaccine_slots::error::AppError;
use vaccine_slots::workflows::availability::{
    parse_upstream_date, scan_date, AvailabilityScanner, CachedCalendar, CalendarSource,
    CowinClient, DistrictId, PostalCodeTable,
};
use vaccine_slots::workflows::districts::DistrictDirectory;
use vaccine_slots::workflows::notify::{
    Mailer, NotificationError, NotificationMessage, SmtpMailer,
};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Everything a request needs to run a scan. One instance is shared by all
/// requests so the calendar cache outlives individual page loads.
pub(crate) struct ScanContext<S> {
    pub(crate) scanner: AvailabilityScanner<S>,
    pub(crate) directory: DistrictDirectory,
    pub(crate) lookahead_days: u32,
}

impl<S: CalendarSource> ScanContext<S> {
    pub(crate) fn default_date(&self) -> Result<NaiveDate, AppError> {
        Ok(scan_date(Local::now().date_naive(), self.lookahead_days)?)
    }

    /// The requested date, or the lookahead date when none was given.
    pub(crate) fn date_or_default(&self, date: Option<NaiveDate>) -> Result<NaiveDate, AppError> {
        match date {
            Some(date) => Ok(date),
            None => self.default_date(),
        }
    }

    /// Explicit ids first, then names resolved through the directory.
    pub(crate) fn resolve_districts(
        &self,
        ids: &[DistrictId],
        names: &[String],
    ) -> Result<Vec<DistrictId>, AppError> {
        let mut districts = ids.to_vec();
        for name in names {
            districts.push(self.directory.resolve(name)?);
        }
        if districts.is_empty() {
            return Err(AppError::InvalidInput(
                "at least one district id or district name is required".to_string(),
            ));
        }
        Ok(districts)
    }
}

/// Scanner over the live upstream API with the configured cache, retry
/// policy and optional postal code table.
pub(crate) fn live_scanner(config: &AppConfig) -> Result<AvailabilityScanner<CowinClient>, AppError> {
    let client = CowinClient::new(&config.upstream)?;
    let calendar = CachedCalendar::from_config(client, &config.retry, &config.cache);
    let mut scanner = AvailabilityScanner::new(calendar);

    if let Some(path) = config.scan.postal_codes.as_deref() {
        let table = PostalCodeTable::from_path(path)?;
        info!(path = %path.display(), codes = table.len(), "postal code table loaded");
        scanner = scanner.with_geocoder(Arc::new(table));
    }

    Ok(scanner)
}

/// Missing directory files are treated as empty so id-only scans still work.
pub(crate) fn load_directory(path: &Path) -> Result<DistrictDirectory, AppError> {
    if !path.exists() {
        debug!(path = %path.display(), "district table not found, starting empty");
        return Ok(DistrictDirectory::default());
    }
    Ok(DistrictDirectory::from_path(path)?)
}

/// SMTP when a relay is configured, the outbox directory otherwise.
pub(crate) fn notification_mailer(config: &NotificationConfig) -> Result<Box<dyn Mailer>, AppError> {
    match &config.smtp {
        Some(smtp) => {
            info!(host = %smtp.host, port = smtp.port, "notifications go through smtp");
            Ok(Box::new(SmtpMailer::new(smtp, &config.sender)?))
        }
        None => {
            info!(dir = %config.outbox_dir.display(), "notifications go to the outbox");
            Ok(Box::new(OutboxMailer::new(config.outbox_dir.clone())))
        }
    }
}

/// Writes every message as a pretty-printed JSON file.
#[derive(Debug, Clone)]
pub(crate) struct OutboxMailer {
    dir: PathBuf,
}

impl OutboxMailer {
    pub(crate) fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl Mailer for OutboxMailer {
    fn deliver(&self, message: &NotificationMessage) -> Result<(), NotificationError> {
        std::fs::create_dir_all(&self.dir)?;
        let file_name = format!("{}.json", Utc::now().format("%Y%m%dT%H%M%S%.6fZ"));
        let path = self.dir.join(file_name);
        let payload = serde_json::to_vec_pretty(message)?;
        std::fs::write(&path, payload)?;
        info!(path = %path.display(), "notification written to outbox");
        Ok(())
    }
}

pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    parse_upstream_date(raw.trim())
}

pub(crate) fn deserialize_optional_date<'de, D>(
    deserializer: D,
) -> Result<Option<NaiveDate>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt = Option::<String>::deserialize(deserializer)?;
    opt.filter(|value| !value.trim().is_empty())
        .map(|value| parse_date(&value).map_err(serde::de::Error::custom))
        .transpose()
}

/// Split a comma separated list, skipping blanks, and parse each item.
pub(crate) fn parse_list<T>(raw: Option<&str>, field: &str) -> Result<Vec<T>, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| {
            item.parse::<T>()
                .map_err(|err| AppError::InvalidInput(format!("{field}: {err}")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use vaccine_slots::workflows::availability::FeeType;

    #[test]
    fn parse_list_splits_and_trims() {
        let ids: Vec<DistrictId> = parse_list(Some("154, 770,,"), "district_id").unwrap();
        assert_eq!(ids.iter().map(|id| id.get()).collect::<Vec<_>>(), vec![154, 770]);

        let fees: Vec<FeeType> = parse_list(None, "fee").unwrap();
        assert!(fees.is_empty());

        let err = parse_list::<FeeType>(Some("Free,Gratis"), "fee").unwrap_err();
        assert!(err.to_string().contains("fee"));
    }

    #[test]
    fn parse_date_uses_upstream_format() {
        assert_eq!(
            parse_date(" 04-05-2021 ").unwrap(),
            NaiveDate::from_ymd_opt(2021, 5, 4).unwrap()
        );
        let err = parse_date("2021-05-04").unwrap_err();
        assert_eq!(err.matches("failed to parse").count(), 1);
        assert!(err.contains("'2021-05-04'"));
    }

    #[test]
    fn outbox_is_the_fallback_mailer() {
        let config = NotificationConfig {
            sender: "alerts@example.com".to_string(),
            recipient: "me@example.com".to_string(),
            notify_on_empty: false,
            outbox_dir: PathBuf::from("outbox"),
            smtp: None,
        };
        let mailer = notification_mailer(&config).expect("mailer");
        assert!(format!("{mailer:?}").starts_with("OutboxMailer"));
    }

    #[test]
    fn outbox_mailer_writes_json_documents() {
        let dir = std::env::temp_dir().join(format!("vaccine-slots-outbox-{}", std::process::id()));
        std::fs::remove_dir_all(&dir).ok();
        let mailer = OutboxMailer::new(&dir);
        let message = NotificationMessage {
            from: "alerts@example.com".to_string(),
            to: "me@example.com".to_string(),
            subject: "Availability for Max Age 45 Count 0".to_string(),
            text_body: "No slots".to_string(),
            html_body: None,
        };

        mailer.deliver(&message).expect("written");

        let entries: Vec<_> = std::fs::read_dir(&dir).unwrap().collect();
        assert_eq!(entries.len(), 1);
        let path = entries[0].as_ref().unwrap().path();
        let stored: NotificationMessage =
            serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
        assert_eq!(stored, message);

        std::fs::remove_dir_all(&dir).ok();
    }
}
