//! Headless walk through the console core against a live HR API.
//!
//! ```sh
//! RUST_LOG=roster=debug cargo run --example console -- roster.toml
//! ```
use std::sync::Arc;

use anyhow::Context;
use roster::{
    HttpApi, Services,
    config::{Configurable, ConsoleConfig, RosterConfig},
    telemetry::init_tracing,
    tracing::info,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing("roster=info,console=info");

    let config = match std::env::args().nth(1) {
        Some(path) => {
            let console = ConsoleConfig::from_file(&path)
                .with_context(|| format!("unable to load config from {path}"))?;
            if let Some(operator) = console.get_config_value("console.operator") {
                info!(%operator, "console session");
            }
            console.settings
        }
        None => RosterConfig::default(),
    };

    let api = Arc::new(HttpApi::new(&config.api)?);
    let services = Services::new(&config, api, None)?;

    services.employees.load(1).await?;
    let state = services.employees.snapshot();
    info!(
        shown = state.employees.len(),
        total = state.pagination.total(),
        pages = state.pagination.total_pages(),
        "employees loaded"
    );

    let summary = services.employees.summary().await?;
    info!(
        total = summary.total_employees,
        active = summary.active(),
        expiring = summary.documents_expiring_soon,
        expired = summary.documents_expired,
        "dashboard"
    );

    services.documents.load_all().await?;
    let warning_days = config.ui.expiry_warning_days;
    for document in services.documents.expiring(warning_days) {
        info!(
            employee_id = %document.employee_id,
            kind = document.kind.as_str(),
            expiry = ?document.expiry_date,
            "{} needs renewal",
            document.title
        );
    }

    for notification in services.ui.snapshot().notifications {
        info!(severity = %notification.severity, "{}", notification.message);
    }
    let queue_stats = services.queue.stats().borrow().clone();
    info!(queue = ?queue_stats, cache = ?services.cache.stats(), "done");

    services.shutdown().await;
    Ok(())
}
