use super::warehouse::{
    CoinKey, DimCoin, MarketFact, MarketSummary, RawSnapshot, SnapshotTime, Warehouse,
};
use crate::SpiderError;
use async_trait::async_trait;

/// The four warehouse tables held in memory.
///
/// Keys are handed out serially from 1, the first insert of a coin code wins,
/// and the summary is aggregated from the facts stored so far. Nothing is
/// transactional: a failed pass keeps whatever it wrote.
#[derive(Debug, Default, Clone)]
pub struct MemoryWarehouse {
    snapshots: Vec<RawSnapshot>,
    coins: Vec<(i32, DimCoin)>,
    facts: Vec<MarketFact>,
    summaries: Vec<MarketSummary>,
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshots(&self) -> &[RawSnapshot] {
        &self.snapshots
    }

    /// `(surrogate key, coin)` in insertion order.
    pub fn coins(&self) -> &[(i32, DimCoin)] {
        &self.coins
    }

    pub fn facts(&self) -> &[MarketFact] {
        &self.facts
    }

    pub fn summaries(&self) -> &[MarketSummary] {
        &self.summaries
    }

    /// Keep only the rows of the `keep` most recent snapshots; coins stay.
    pub fn retain_latest(&mut self, keep: usize) {
        let mut times: Vec<SnapshotTime> = self
            .snapshots
            .iter()
            .map(|row| row.snapshot_time)
            .chain(self.summaries.iter().map(|summary| summary.snapshot_time))
            .collect();
        times.sort_unstable();
        times.dedup();

        if times.len() <= keep {
            return;
        }
        if keep == 0 {
            self.snapshots.clear();
            self.facts.clear();
            self.summaries.clear();
            return;
        }

        let oldest_kept = times[times.len() - keep];
        self.snapshots.retain(|row| row.snapshot_time >= oldest_kept);
        self.facts.retain(|fact| fact.snapshot_time >= oldest_kept);
        self.summaries.retain(|summary| summary.snapshot_time >= oldest_kept);
    }

    fn coin_code(&self, coin_key: i32) -> Option<&str> {
        self.coins
            .iter()
            .find(|(key, _)| *key == coin_key)
            .map(|(_, coin)| coin.coin_code.as_str())
    }
}

#[async_trait]
impl Warehouse for MemoryWarehouse {
    async fn insert_snapshot(&mut self, row: &RawSnapshot) -> Result<(), SpiderError> {
        self.snapshots.push(row.clone());
        Ok(())
    }

    async fn upsert_coin(&mut self, coin: &DimCoin) -> Result<(), SpiderError> {
        if self.coins.iter().any(|(_, known)| known.coin_code == coin.coin_code) {
            return Ok(());
        }
        let key = self.coins.last().map_or(1, |(key, _)| key + 1);
        self.coins.push((key, coin.clone()));
        Ok(())
    }

    async fn coin_key(&mut self, coin_code: &str) -> Result<CoinKey, SpiderError> {
        Ok(self
            .coins
            .iter()
            .find(|(_, coin)| coin.coin_code == coin_code)
            .map_or(CoinKey::Missing, |(key, _)| CoinKey::Found(*key)))
    }

    async fn insert_fact(&mut self, fact: &MarketFact) -> Result<(), SpiderError> {
        self.facts.push(fact.clone());
        Ok(())
    }

    async fn refresh_summary(
        &mut self,
        snapshot_time: SnapshotTime,
    ) -> Result<MarketSummary, SpiderError> {
        // inner join: facts without a known coin drop out
        let facts = self
            .facts
            .iter()
            .filter(|fact| fact.snapshot_time == snapshot_time)
            .filter_map(|fact| self.coin_code(fact.coin_key).map(|code| (code, fact)));

        let summary = MarketSummary::aggregate(snapshot_time, facts);
        self.summaries.push(summary.clone());
        Ok(summary)
    }
}
