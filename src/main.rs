use std::{process, sync::Arc, time::Duration};

use log::{error, info, warn};
use serde_json::json;

use request_orchestrator::{
    config::Config,
    core::{ErrorContext, OrchestratorResult},
    logging,
    orchestration::{BatchItem, RequestOrchestrator},
    service::{DataService, Filter, MemoryDataService, OrchestratedClient},
};

#[tokio::main]
async fn main() {
    // Load configuration, defaults unless a path is given
    let config = match std::env::args().nth(1) {
        Some(path) => match Config::load_from_yaml(&path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Failed to load configuration from {path}: {e}");
                process::exit(1);
            }
        },
        None => Config::default(),
    };

    // Initialize logging
    if let Err(e) = logging::init(&config.log) {
        eprintln!("{e}");
        process::exit(1);
    }

    if let Err(e) = run(config).await {
        error!("{e}");
        process::exit(1);
    }
}

fn demo_service() -> MemoryDataService {
    MemoryDataService::new()
        .with_latency(Duration::from_millis(20))
        .with_rows(
            "organizations",
            vec![
                json!({"id": "o1", "name": "Northside Clinic", "status": "approved"}),
                json!({"id": "o2", "name": "Lakeview School", "status": "pending"}),
            ],
        )
        .with_rows(
            "events",
            vec![
                json!({"id": "e1", "organization_id": "o1", "title": "Screening day"}),
                json!({"id": "e2", "organization_id": "o1", "title": "Walkathon"}),
            ],
        )
}

async fn run(config: Config) -> OrchestratorResult<()> {
    let service = Arc::new(demo_service());
    let orchestrator = Arc::new(RequestOrchestrator::new(config)?);
    let client = OrchestratedClient::new(service.clone(), orchestrator.clone());

    let approved = Filter::eq("status", "approved");

    info!("Reading approved organizations...");
    let outcome = client.select_with_outcome("organizations", &approved).await;
    info!("First read: {}", outcome.label());

    let outcome = client.select_with_outcome("organizations", &approved).await;
    info!("Repeated read: {}", outcome.label());

    info!("Approving an organization...");
    match client
        .update("organizations", &Filter::eq("id", "o2"), json!({"status": "approved"}))
        .await
    {
        Ok(rows) => info!("Updated {} organizations", rows.len()),
        Err(e) => warn!("Update failed: {} ({e})", e.user_message()),
    }

    let rows = client.select("organizations", &approved).await;
    info!("Approved organizations after update: {}", rows.len());

    info!("Counting rows per table...");
    let items = ["organizations", "events", "reports"]
        .into_iter()
        .map(|table| {
            let service = service.clone();
            BatchItem::new(format!("count:{table}"), 0usize, move || async move {
                service
                    .select(table, &Filter::all())
                    .await
                    .map(|rows| rows.len())
            })
        })
        .collect();
    let mut counts: Vec<_> = orchestrator.run_batch(items, None).await.into_iter().collect();
    counts.sort();
    for (key, count) in counts {
        info!("{key}: {count}");
    }

    let stats = serde_json::to_string(&orchestrator.stats()).with_context("encoding stats")?;
    info!("Stats: {stats}");
    println!("{}", orchestrator.gather_metrics()?);

    Ok(())
}
