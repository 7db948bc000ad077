use super::coingecko::{self, PriceObservation};
use super::sql;
use crate::config::ConnectionProfile;
use crate::http::*;
use crate::SpiderError;
use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use serde_json::Value;
use std::fmt;
use tokio_postgres::{NoTls, Statement};
use tracing::{debug, error, info, trace, warn};

/// Token returned by a successful save.
pub const SAVED: &str = "Saved";

/////////////////////////////////////////////////////////////////////////////////
// rows
/////////////////////////////////////////////////////////////////////////////////

/// The timestamp shared by every row written in one run.
///
/// Captured once per run and passed to every write; truncated to microseconds
/// so it compares equal to what Postgres stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SnapshotTime(DateTime<Utc>);

impl SnapshotTime {
    pub fn now() -> Self {
        Self::at(Utc::now())
    }

    pub fn at(time: DateTime<Utc>) -> Self {
        Self(time.trunc_subsecs(6))
    }

    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }
}

impl fmt::Display for SnapshotTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S%.6f UTC"))
    }
}

/// `raw.crypto_snapshot`
#[derive(Debug, Clone, PartialEq)]
pub struct RawSnapshot {
    pub snapshot_time: SnapshotTime,
    pub observation: PriceObservation,
}

/// `dds.dim_coin`, minus the surrogate key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DimCoin {
    pub coin_code: String,
    pub coin_name: String,
    pub symbol: String,
}

impl DimCoin {
    /// Name and symbol are derived from the coin id: `bitcoin` is
    /// "Bitcoin" / "BIT".
    pub fn derive(coin_code: &str) -> Self {
        let mut chars = coin_code.chars();
        let coin_name = match chars.next() {
            Some(first) => first
                .to_uppercase()
                .chain(chars.as_str().to_lowercase().chars())
                .collect(),
            None => String::new(),
        };
        let symbol = coin_code.chars().take(3).collect::<String>().to_uppercase();

        Self {
            coin_code: coin_code.to_string(),
            coin_name,
            symbol,
        }
    }
}

/// `dds.fact_market_data`
#[derive(Debug, Clone, PartialEq)]
pub struct MarketFact {
    pub coin_key: i32,
    pub snapshot_time: SnapshotTime,
    pub price_usd: Option<f64>,
    pub market_cap_usd: Option<f64>,
    pub volume_24h_usd: Option<f64>,
    pub price_change_24h: Option<f64>,
}

impl MarketFact {
    pub fn new(coin_key: i32, snapshot_time: SnapshotTime, observation: &PriceObservation) -> Self {
        Self {
            coin_key,
            snapshot_time,
            price_usd: observation.price_usd,
            market_cap_usd: observation.market_cap_usd,
            volume_24h_usd: observation.volume_24h_usd,
            price_change_24h: observation.price_change_24h,
        }
    }
}

/// `dm.market_summary`
#[derive(Debug, Clone, PartialEq)]
pub struct MarketSummary {
    pub snapshot_time: SnapshotTime,
    pub total_market_cap: f64,
    pub btc_price: Option<f64>,
    pub total_volume: f64,
}

impl MarketSummary {
    /// Roll up `(coin_code, fact)` pairs of one snapshot.
    ///
    /// Null figures are skipped; sums over nothing are 0 and the bitcoin price
    /// is `None` unless a `bitcoin` fact carries one.
    pub fn aggregate<'a>(
        snapshot_time: SnapshotTime,
        facts: impl IntoIterator<Item = (&'a str, &'a MarketFact)>,
    ) -> Self {
        let mut summary = Self {
            snapshot_time,
            total_market_cap: 0.0,
            btc_price: None,
            total_volume: 0.0,
        };

        for (coin_code, fact) in facts {
            summary.total_market_cap += fact.market_cap_usd.unwrap_or(0.0);
            summary.total_volume += fact.volume_24h_usd.unwrap_or(0.0);
            if coin_code == "bitcoin" {
                summary.btc_price = match (summary.btc_price, fact.price_usd) {
                    (Some(seen), Some(price)) => Some(seen.max(price)),
                    (seen, price) => seen.or(price),
                };
            }
        }

        summary
    }
}

/// Result of looking a coin's surrogate key up right after its upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoinKey {
    Found(i32),
    /// The dimension row is not visible; the coin gets no fact this run.
    Missing,
}

/////////////////////////////////////////////////////////////////////////////////
// persister
/////////////////////////////////////////////////////////////////////////////////

/// The four warehouse tables, as the persister writes them.
#[async_trait]
pub trait Warehouse: Send {
    async fn insert_snapshot(&mut self, row: &RawSnapshot) -> Result<(), SpiderError>;

    /// Insert the coin unless its code is already registered.
    async fn upsert_coin(&mut self, coin: &DimCoin) -> Result<(), SpiderError>;

    async fn coin_key(&mut self, coin_code: &str) -> Result<CoinKey, SpiderError>;

    async fn insert_fact(&mut self, fact: &MarketFact) -> Result<(), SpiderError>;

    /// Aggregate the facts already written for `snapshot_time` into one
    /// summary row, and return it.
    async fn refresh_summary(
        &mut self,
        snapshot_time: SnapshotTime,
    ) -> Result<MarketSummary, SpiderError>;
}

/// What one persister pass wrote.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistReport {
    pub snapshot_time: SnapshotTime,
    /// Raw rows, one per coin in the payload.
    pub coins: usize,
    pub facts: usize,
    /// Coins whose key lookup came back empty.
    pub skipped: Vec<String>,
    pub summary: MarketSummary,
}

/// Write one `/simple/price` payload through every warehouse layer.
///
/// Per coin, in payload order: raw row, dimension upsert, key lookup, fact.
/// The summary is refreshed once all facts are in, even when there are none.
pub async fn persist<W>(
    warehouse: &mut W,
    snapshot_time: SnapshotTime,
    prices: &Value,
) -> Result<PersistReport, SpiderError>
where
    W: Warehouse + ?Sized,
{
    let observations = coingecko::observations(prices)?;
    let mut facts = 0;
    let mut skipped = Vec::new();

    for observation in observations.iter() {
        let coin_id = &observation.coin_id;

        trace!("inserting raw snapshot for {coin_id}");
        warehouse
            .insert_snapshot(&RawSnapshot {
                snapshot_time,
                observation: observation.clone(),
            })
            .await?;

        warehouse.upsert_coin(&DimCoin::derive(coin_id)).await?;

        match warehouse.coin_key(coin_id).await? {
            CoinKey::Found(coin_key) => {
                warehouse
                    .insert_fact(&MarketFact::new(coin_key, snapshot_time, observation))
                    .await?;
                facts += 1;
            }
            CoinKey::Missing => {
                debug!("no dds.dim_coin key for {coin_id}, skipping its fact");
                skipped.push(coin_id.clone());
            }
        }
    }

    let summary = warehouse.refresh_summary(snapshot_time).await?;
    trace!("market summary for {snapshot_time}: {summary:?}");

    Ok(PersistReport {
        snapshot_time,
        coins: observations.len(),
        facts,
        skipped,
        summary,
    })
}

/////////////////////////////////////////////////////////////////////////////////
// postgres
/////////////////////////////////////////////////////////////////////////////////

/// The warehouse behind one open transaction, statements prepared up front.
pub struct PgWarehouse<'a> {
    transaction: &'a PgTransaction<'a>,
    insert_snapshot: Statement,
    upsert_coin: Statement,
    select_coin_key: Statement,
    insert_fact: Statement,
    insert_summary: Statement,
}

impl<'a> PgWarehouse<'a> {
    pub async fn prepare(transaction: &'a PgTransaction<'a>) -> Result<Self, SpiderError> {
        Ok(Self {
            insert_snapshot: transaction.prepare(sql::INSERT_SNAPSHOT).await?,
            upsert_coin: transaction.prepare(sql::UPSERT_COIN).await?,
            select_coin_key: transaction.prepare(sql::SELECT_COIN_KEY).await?,
            insert_fact: transaction.prepare(sql::INSERT_FACT).await?,
            insert_summary: transaction.prepare(sql::INSERT_SUMMARY).await?,
            transaction,
        })
    }
}

#[async_trait]
impl Warehouse for PgWarehouse<'_> {
    async fn insert_snapshot(&mut self, row: &RawSnapshot) -> Result<(), SpiderError> {
        let observation = &row.observation;
        self.transaction
            .execute(
                &self.insert_snapshot,
                &[
                    &row.snapshot_time.as_datetime(),
                    &observation.coin_id,
                    &observation.price_usd,
                    &observation.market_cap_usd,
                    &observation.volume_24h_usd,
                    &observation.price_change_24h,
                ],
            )
            .await
            .map_err(|err| {
                error!("failed to insert raw.crypto_snapshot for {}, error({err})", observation.coin_id);
                err
            })?;
        Ok(())
    }

    async fn upsert_coin(&mut self, coin: &DimCoin) -> Result<(), SpiderError> {
        self.transaction
            .execute(
                &self.upsert_coin,
                &[&coin.coin_code, &coin.coin_name, &coin.symbol],
            )
            .await
            .map_err(|err| {
                error!("failed to upsert dds.dim_coin for {}, error({err})", coin.coin_code);
                err
            })?;
        Ok(())
    }

    async fn coin_key(&mut self, coin_code: &str) -> Result<CoinKey, SpiderError> {
        let row = self
            .transaction
            .query_opt(&self.select_coin_key, &[&coin_code])
            .await?;

        Ok(match row {
            Some(row) => CoinKey::Found(row.try_get(0)?),
            None => CoinKey::Missing,
        })
    }

    async fn insert_fact(&mut self, fact: &MarketFact) -> Result<(), SpiderError> {
        self.transaction
            .execute(
                &self.insert_fact,
                &[
                    &fact.coin_key,
                    &fact.snapshot_time.as_datetime(),
                    &fact.price_usd,
                    &fact.market_cap_usd,
                    &fact.volume_24h_usd,
                    &fact.price_change_24h,
                ],
            )
            .await
            .map_err(|err| {
                error!("failed to insert dds.fact_market_data for key {}, error({err})", fact.coin_key);
                err
            })?;
        Ok(())
    }

    async fn refresh_summary(
        &mut self,
        snapshot_time: SnapshotTime,
    ) -> Result<MarketSummary, SpiderError> {
        let row = self
            .transaction
            .query_one(&self.insert_summary, &[&snapshot_time.as_datetime()])
            .await
            .map_err(|err| {
                error!("failed to refresh dm.market_summary for {snapshot_time}, error({err})");
                err
            })?;

        Ok(MarketSummary {
            snapshot_time,
            total_market_cap: row.try_get(0)?,
            btc_price: row.try_get(1)?,
            total_volume: row.try_get(2)?,
        })
    }
}

/// Persist `prices` to the warehouse behind `profile`, in one transaction.
///
/// One connection per call. The transaction is committed on success and
/// rolled back on any failure; either way the connection is closed before
/// returning.
pub async fn save_to_db(
    profile: &ConnectionProfile,
    snapshot_time: SnapshotTime,
    prices: &Value,
) -> Result<PersistReport, SpiderError> {
    let time = std::time::Instant::now();

    trace!("connecting to {}:{}/{} ...", profile.host, profile.port, profile.schema);
    let (mut pg_client, pg_conn) = profile
        .pg_config()?
        .connect(NoTls)
        .await
        .map_err(|err| {
            error!("warehouse connection error: {err}");
            err
        })?;

    let connection = tokio::spawn(async move {
        if let Err(err) = pg_conn.await {
            error!("warehouse connection error: {err}");
        }
    });
    debug!("warehouse connection established");

    let result = write_snapshot(&mut pg_client, snapshot_time, prices).await;

    // dropping the client terminates the connection task
    drop(pg_client);
    if let Err(err) = connection.await {
        warn!("warehouse connection task did not shut down cleanly: {err}");
    }

    let report = result?;
    info!(
        "saved {} coin(s) to the warehouse for {snapshot_time}, {}",
        report.coins,
        crate::time_elapsed(time)
    );
    Ok(report)
}

/// Persist `prices` over an already open connection, in one transaction.
///
/// The transaction runs with its time zone pinned to UTC, so `TIMESTAMP`
/// columns store the snapshot's UTC wall time whatever the session's zone.
pub async fn write_snapshot(
    pg_client: &mut PgClient,
    snapshot_time: SnapshotTime,
    prices: &Value,
) -> Result<PersistReport, SpiderError> {
    let transaction = pg_client.transaction().await?;

    let outcome = async {
        transaction.batch_execute(sql::PIN_UTC).await?;
        let mut warehouse = PgWarehouse::prepare(&transaction).await?;
        persist(&mut warehouse, snapshot_time, prices).await
    }
    .await;

    match outcome {
        Ok(report) => {
            transaction.commit().await.map_err(|err| {
                error!("failed to commit the snapshot for {snapshot_time}, error({err})");
                err
            })?;
            Ok(report)
        }
        Err(err) => {
            if let Err(rollback) = transaction.rollback().await {
                warn!("failed to roll back the snapshot for {snapshot_time}, error({rollback})");
            }
            Err(err)
        }
    }
}
