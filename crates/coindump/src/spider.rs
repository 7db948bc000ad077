use coindump_spider::config::{EnvProfiles, Settings};
use coindump_spider::crypto::coingecko::CoinGecko;
use coindump_spider::crypto::memory::MemoryWarehouse;
use coindump_spider::dag::{self, DagContext, Sink, Task};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

// build the run context; `dry_run` swaps PostgreSQL for the in-memory warehouse
fn context(dry_run: bool) -> anyhow::Result<(DagContext, Option<Arc<Mutex<MemoryWarehouse>>>)> {
    let settings = Settings::from_env();
    debug!("settings: {settings:?}");

    let (sink, memory) = if dry_run {
        info!("dry run: prices are kept in memory");
        let memory = Arc::new(Mutex::new(MemoryWarehouse::new()));
        (Sink::Memory(memory.clone()), Some(memory))
    } else {
        (Sink::Postgres(Arc::new(EnvProfiles::default())), None)
    };

    Ok((DagContext::new(settings, sink)?, memory))
}

/// Run the whole pipeline once.
pub(crate) async fn run(dry_run: bool) -> anyhow::Result<()> {
    let (ctx, memory) = context(dry_run)?;
    let report = dag::run_dag(&ctx, ctx.settings.retry).await?;

    for task in Task::ALL {
        if let Ok(result) = report.results.pull(task) {
            println!("{task}: {result}");
        }
    }
    if let Some(memory) = memory {
        for summary in memory.lock().await.summaries() {
            println!("{summary:?}");
        }
    }

    Ok(())
}

/// Run the pipeline on its schedule until Ctrl-C.
pub(crate) async fn schedule(dry_run: bool) -> anyhow::Result<()> {
    let (ctx, _memory) = context(dry_run)?;
    let interval = ctx.settings.interval;
    let policy = ctx.settings.retry;

    dag::schedule(Arc::new(ctx), interval, policy, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await?;

    Ok(())
}

/// Ping the API.
pub(crate) async fn check() -> anyhow::Result<()> {
    let coingecko = CoinGecko::from_settings(&Settings::from_env())?;
    println!("{}", coingecko.check_api().await?);
    Ok(())
}

/// Fetch and print current prices.
pub(crate) async fn fetch() -> anyhow::Result<()> {
    let settings = Settings::from_env();
    let coingecko = CoinGecko::from_settings(&settings)?;
    let prices = coingecko.get_prices(&settings.coins).await?;
    println!("{}", serde_json::to_string_pretty(&prices)?);
    Ok(())
}
