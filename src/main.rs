use anyhow::{bail, Context, Result};
use arrow::record_batch::RecordBatch;
use macroscrape::{
    fetch::{browser_client, FixingHistoryRequest, FutureQuoteRequest, OisIndex},
    output::write_parquet,
    registry::ResourceRegistry,
};
use reqwest::Client;
use std::{env, path::PathBuf, time::Duration};
use tokio::time::Instant;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

const FIXING_LIMIT: usize = 1000;
const HTTP_TIMEOUT: Duration = Duration::from_secs(5);

fn usage(registry: &ResourceRegistry) -> String {
    let names: Vec<&str> = registry.names().collect();
    format!(
        "usage: macroscrape <resource> [registry.yaml]\n  resources: sofr effr obfr sr1 sr3 {}",
        names.join(" ")
    )
}

async fn run(name: &str, registry: ResourceRegistry) -> Result<RecordBatch> {
    if let Ok(index) = name.parse::<OisIndex>() {
        let client = Client::builder().timeout(HTTP_TIMEOUT).build()?;
        return FixingHistoryRequest::new(index, FIXING_LIMIT).load(&client).await;
    }
    match name {
        "sr3" | "sr1" => {
            let request = if name == "sr3" {
                FutureQuoteRequest::three_month_sofr()
            } else {
                FutureQuoteRequest::one_month_sofr()
            };
            request.load(&browser_client(HTTP_TIMEOUT)?).await
        }
        _ => {
            // the ftp session is blocking; keep it off the runtime threads
            let name = name.to_string();
            tokio::task::spawn_blocking(move || registry.fetch_table(&name)).await?
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // ─── 1) init logging ─────────────────────────────────────────────
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_span_events(fmt::format::FmtSpan::CLOSE)
        .init();

    // ─── 2) resolve resource + registry ──────────────────────────────
    let args: Vec<String> = env::args().skip(1).collect();
    let registry = match args.get(1) {
        Some(path) => ResourceRegistry::from_file(path)
            .with_context(|| format!("loading registry {}", path))?,
        None => ResourceRegistry::builtin(),
    };
    let Some(name) = args.first().cloned() else {
        bail!(usage(&registry));
    };
    info!(resource = %name, "startup");

    // ─── 3) fetch, normalize, persist ────────────────────────────────
    let start = Instant::now();
    let batch = match run(&name, registry).await {
        Ok(batch) => batch,
        Err(e) => {
            error!(resource = %name, "failed: {:#}", e);
            return Err(e);
        }
    };
    let out = PathBuf::from(format!("{}.parquet", name));
    write_parquet(&batch, &out)?;
    info!(
        resource = %name,
        rows = batch.num_rows(),
        path = %out.display(),
        elapsed = ?start.elapsed(),
        "done"
    );
    Ok(())
}
