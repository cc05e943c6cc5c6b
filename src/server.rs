use crate::cli::ServeArgs;
use crate::infra::{live_scanner, load_directory, AppState, ScanContext};
use crate::routes::with_service_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::info;
use vaccine_slots::config::AppConfig;
use vaccine_slots::error::AppError;
use vaccine_slots::telemetry;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let directory = load_directory(&config.scan.districts_csv)?;
    info!(districts = directory.len(), "district directory loaded");

    let context = Arc::new(ScanContext {
        scanner: live_scanner(&config)?,
        directory,
        lookahead_days: config.scan.lookahead_days,
    });

    let app = with_service_routes(context)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "vaccine slot service ready");

    axum::serve(listener, app).await?;
    Ok(())
}
