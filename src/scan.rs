use crate::infra::{live_scanner, load_directory, notification_mailer, ScanContext};
use chrono::NaiveDate;
use clap::Args;
use std::path::PathBuf;
use tracing::{info, warn};
use vaccine_slots::config::AppConfig;
use vaccine_slots::error::AppError;
use vaccine_slots::telemetry;
use vaccine_slots::workflows::availability::{
    format_upstream_date, CowinClient, DistrictId, FeeType, ScanReport, ScanRequest, SlotQuery,
};
use vaccine_slots::workflows::display::{status_message, PivotTable, SlotTable};
use vaccine_slots::workflows::districts::{DistrictDirectory, STATE_CODES};
use vaccine_slots::workflows::notify::{NotificationOutcome, Notifier};

#[derive(Args, Debug)]
pub(crate) struct ScanArgs {
    /// District id to scan; repeat for several districts
    #[arg(long = "district-id")]
    pub(crate) district_ids: Vec<DistrictId>,
    /// District name resolved through the district table; repeatable
    #[arg(long = "district")]
    pub(crate) districts: Vec<String>,
    /// Age of the person booking
    #[arg(long)]
    pub(crate) age: u32,
    /// Rank by distance from this postal code
    #[arg(long)]
    pub(crate) pincode: Option<String>,
    /// Accepted fee types (Free, Paid); all when omitted
    #[arg(long = "fee")]
    pub(crate) fees: Vec<FeeType>,
    /// Keep sessions with no remaining capacity
    #[arg(long)]
    pub(crate) show_empty: bool,
    /// Scan date (DD-MM-YYYY). Defaults to the configured lookahead.
    #[arg(long, value_parser = crate::infra::parse_date)]
    pub(crate) date: Option<NaiveDate>,
    /// Print capacity pivoted by center and date
    #[arg(long)]
    pub(crate) pivot: bool,
    /// Write the printed view as CSV to this path
    #[arg(long)]
    pub(crate) csv: Option<PathBuf>,
    /// Email the result over SMTP, or write it to the outbox when no
    /// SENDER_PASSWORD is set
    #[arg(long)]
    pub(crate) notify: bool,
}

#[derive(Args, Debug, Default)]
pub(crate) struct DistrictsSyncArgs {
    /// Destination CSV (defaults to DISTRICTS_CSV)
    #[arg(long)]
    pub(crate) output: Option<PathBuf>,
}

pub(crate) async fn run_scan(args: ScanArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry)?;

    let notifier = if args.notify {
        let settings = config.notification.clone().ok_or_else(|| {
            AppError::InvalidInput(
                "--notify requires SENDER_EMAIL and RECEIVER_EMAIL to be set".to_string(),
            )
        })?;
        Some(Notifier::new(notification_mailer(&settings)?, settings))
    } else {
        None
    };

    let directory = if args.districts.is_empty() {
        DistrictDirectory::default()
    } else {
        load_directory(&config.scan.districts_csv)?
    };
    let context = ScanContext {
        scanner: live_scanner(&config)?,
        directory,
        lookahead_days: config.scan.lookahead_days,
    };

    let mut query = SlotQuery::new(args.age).showing_empty(args.show_empty);
    if !args.fees.is_empty() {
        query = query.with_fee_types(args.fees.iter().copied());
    }

    let request = ScanRequest {
        districts: context.resolve_districts(&args.district_ids, &args.districts)?,
        date: context.date_or_default(args.date)?,
        query,
        search_pincode: args.pincode.clone(),
    };

    let report = context.scanner.scan(&request).await?;
    print_report(&report, args.pivot);

    if let Some(path) = args.csv.as_deref() {
        let file = std::fs::File::create(path)?;
        if args.pivot {
            PivotTable::from_rows(report.rows()).write_csv(file)?;
        } else {
            SlotTable::from_report(&report).write_csv(file)?;
        }
        info!(path = %path.display(), "availability exported");
    }

    if let Some(notifier) = notifier {
        let table = SlotTable::from_report(&report);
        match notifier.notify(&table, args.age)? {
            NotificationOutcome::Sent { subject, .. } => println!("Notification sent: {subject}"),
            NotificationOutcome::Skipped => println!("Notification skipped: no slots to report."),
        }
    }

    Ok(())
}

fn print_report(report: &ScanReport, pivot: bool) {
    println!(
        "Availability for {} across {} district(s)",
        format_upstream_date(report.date),
        report.districts.len()
    );
    for failure in &report.failures {
        println!("  skipped {failure}");
    }
    println!();

    if let Some(message) = status_message(report) {
        println!("{message}");
        return;
    }

    if pivot {
        print!("{}", PivotTable::from_rows(report.rows()).render_text());
    } else {
        print!("{}", SlotTable::from_report(report).render_text());
    }
}

pub(crate) async fn run_districts_sync(args: DistrictsSyncArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry)?;

    let client = CowinClient::new(&config.upstream)?;
    let directory = DistrictDirectory::bootstrap(&client, STATE_CODES).await;
    if directory.is_empty() {
        warn!("no districts returned by upstream; keeping the existing table");
        return Ok(());
    }

    let output = args.output.unwrap_or(config.scan.districts_csv);
    directory.write_to_path(&output)?;
    println!(
        "Wrote {} districts to {}",
        directory.len(),
        output.display()
    );
    Ok(())
}

pub(crate) fn run_districts_list() -> Result<(), AppError> {
    let config = AppConfig::load()?;
    let directory = DistrictDirectory::from_path(&config.scan.districts_csv)?;

    for entry in directory.entries() {
        println!("{:>5}  {}", entry.district_id.get(), entry.district_name);
    }
    Ok(())
}
