use crate::config::{ProfileProvider, RetryPolicy, Settings};
use crate::crypto::coingecko::CoinGecko;
use crate::crypto::memory::MemoryWarehouse;
use crate::crypto::warehouse::{self, SnapshotTime, SAVED};
use crate::SpiderError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Future;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, trace, warn};

pub const DAG_ID: &str = "crypto_simple";
pub const DESCRIPTION: &str = "Simple crypto pipeline";
pub const OWNER: &str = "airflow";
pub const TAGS: [&str; 1] = ["crypto"];

/// Snapshots the in-memory sink keeps; one hour at the default cadence.
pub const MEMORY_SNAPSHOTS: usize = 6;

/// Cron expression equivalent of the schedule; runs are aligned on it.
pub const SCHEDULE: &str = "*/10 * * * *";

////////////////////////////////////////////////////////////////////////////
// tasks
////////////////////////////////////////////////////////////////////////////

/// The tasks of the DAG, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Task {
    CheckApi,
    GetPrices,
    SaveToDb,
}

impl Task {
    pub const ALL: [Task; 3] = [Task::CheckApi, Task::GetPrices, Task::SaveToDb];

    pub fn id(&self) -> &'static str {
        match self {
            Task::CheckApi => "check_api",
            Task::GetPrices => "get_prices",
            Task::SaveToDb => "save_to_db",
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Task results of one run, keyed by task id.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Handoff(HashMap<&'static str, Value>);

impl Handoff {
    pub fn push(&mut self, task: Task, value: Value) {
        self.0.insert(task.id(), value);
    }

    pub fn pull(&self, task: Task) -> Result<&Value, SpiderError> {
        self.0
            .get(task.id())
            .ok_or_else(|| SpiderError::MissingHandoff(task.id().to_string()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Executes a single task, given the results of the tasks before it.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run(&self, task: Task, handoff: &Handoff) -> Result<Value, SpiderError>;
}

/// Where `save_to_db` writes.
pub enum Sink {
    /// The Postgres warehouse, connected through the configured profile.
    Postgres(Arc<dyn ProfileProvider>),
    /// An in-process warehouse; nothing leaves the process.
    Memory(Arc<Mutex<MemoryWarehouse>>),
}

/// Everything a run needs: settings, API client and warehouse sink.
pub struct DagContext {
    pub settings: Settings,
    coingecko: CoinGecko,
    sink: Sink,
}

impl DagContext {
    pub fn new(settings: Settings, sink: Sink) -> Result<Self, SpiderError> {
        let coingecko = CoinGecko::from_settings(&settings)?;
        Ok(Self {
            settings,
            coingecko,
            sink,
        })
    }

    async fn save(&self, prices: &Value) -> Result<Value, SpiderError> {
        let snapshot_time = SnapshotTime::now();

        let report = match &self.sink {
            Sink::Postgres(profiles) => {
                let profile = profiles.profile(&self.settings.profile)?;
                warehouse::save_to_db(&profile, snapshot_time, prices).await?
            }
            Sink::Memory(memory) => {
                // stage on a copy so a failed pass leaves nothing behind
                let mut memory = memory.lock().await;
                let mut staged = memory.clone();
                let report = warehouse::persist(&mut staged, snapshot_time, prices).await?;
                staged.retain_latest(MEMORY_SNAPSHOTS);
                *memory = staged;
                info!("saved {} coin(s) in memory for {snapshot_time}", report.coins);
                report
            }
        };

        if !report.skipped.is_empty() {
            debug!("coins without a fact: {:?}", report.skipped);
        }
        Ok(Value::from(SAVED))
    }
}

#[async_trait]
impl TaskRunner for DagContext {
    async fn run(&self, task: Task, handoff: &Handoff) -> Result<Value, SpiderError> {
        match task {
            Task::CheckApi => self.coingecko.check_api().await.map(Value::from),
            Task::GetPrices => self.coingecko.get_prices(&self.settings.coins).await,
            Task::SaveToDb => self.save(handoff.pull(Task::GetPrices)?).await,
        }
    }
}

////////////////////////////////////////////////////////////////////////////
// runs
////////////////////////////////////////////////////////////////////////////

/// Run `attempt` until it succeeds or `policy` is exhausted.
pub async fn with_retries<T, F, Fut>(
    task: Task,
    policy: RetryPolicy,
    mut attempt: F,
) -> Result<T, SpiderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SpiderError>>,
{
    let mut attempts = 0;
    loop {
        attempts += 1;
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(err) if attempts <= policy.retries => {
                warn!(
                    "task {task} failed (attempt {attempts}), retrying in {:?}: {err}",
                    policy.delay
                );
                tokio::time::sleep(policy.delay).await;
            }
            Err(err) => {
                error!("task {task} failed after {attempts} attempt(s): {err}");
                return Err(SpiderError::TaskFailed {
                    task: task.id().to_string(),
                    attempts,
                    source: Box::new(err),
                });
            }
        }
    }
}

/// Outcome of a successful run.
#[derive(Debug, Clone)]
pub struct DagRunReport {
    pub dag_id: &'static str,
    pub started: DateTime<Utc>,
    pub results: Handoff,
}

/// One run: every task in order, each behind the retry policy. The first
/// task to exhaust its retries fails the run and the rest never start.
pub async fn run_dag<R>(runner: &R, policy: RetryPolicy) -> Result<DagRunReport, SpiderError>
where
    R: TaskRunner + ?Sized,
{
    let started = Utc::now();
    let time = std::time::Instant::now();
    info!(
        "{DAG_ID} run started at {started} ({DESCRIPTION}; owner {OWNER}; tags {})",
        TAGS.join(",")
    );

    let mut handoff = Handoff::default();
    for task in Task::ALL {
        trace!("starting task {task}");
        let result = with_retries(task, policy, || runner.run(task, &handoff))
            .await
            .map_err(|err| {
                error!("{DAG_ID} run started at {started} failed");
                err
            })?;
        debug!("task {task} returned {result}");
        handoff.push(task, result);
    }

    info!("{DAG_ID} run succeeded, {}", crate::time_elapsed(time));
    Ok(DagRunReport {
        dag_id: DAG_ID,
        started,
        results: handoff,
    })
}

////////////////////////////////////////////////////////////////////////////
// schedule
////////////////////////////////////////////////////////////////////////////

/// First interval boundary strictly after `now`, counted from the epoch.
pub fn next_tick(now: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
    let step = interval.as_secs().max(1) as i64;
    let next = (now.timestamp().div_euclid(step) + 1) * step;
    DateTime::from_timestamp(next, 0).unwrap_or(now)
}

/// Trigger a run on every interval boundary until `shutdown` resolves.
///
/// Missed boundaries are not caught up. Runs are spawned rather than
/// awaited, so a slow run can overlap the next one; overlaps are only
/// reported.
pub async fn schedule<R, S>(
    runner: Arc<R>,
    interval: Duration,
    policy: RetryPolicy,
    shutdown: S,
) -> Result<(), SpiderError>
where
    R: TaskRunner + 'static,
    S: Future,
{
    let active = Arc::new(AtomicUsize::new(0));
    tokio::pin!(shutdown);

    info!("scheduling {DAG_ID} on `{SCHEDULE}`");
    loop {
        let now = Utc::now();
        let tick = next_tick(now, interval);
        let wait = (tick - now).to_std().unwrap_or_default();
        debug!("next {DAG_ID} run at {tick}");

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = &mut shutdown => {
                info!("scheduler stopped, {} run(s) still active", active.load(Ordering::SeqCst));
                return Ok(());
            }
        }

        let running = active.fetch_add(1, Ordering::SeqCst);
        if running > 0 {
            warn!("{running} earlier {DAG_ID} run(s) still active at {tick}");
        }

        let runner = runner.clone();
        let active = active.clone();
        tokio::spawn(async move {
            // failures are already logged by the run itself
            let _ = run_dag(runner.as_ref(), policy).await;
            active.fetch_sub(1, Ordering::SeqCst);
        });
    }
}
