mod sql;

/// [CoinGecko API](https://docs.coingecko.com/reference/simple-price); availability check and price fetch.
pub mod coingecko;

/// In-process warehouse, for dry runs and tests.
pub mod memory;

/// The `raw` / `dds` / `dm` warehouse layers and the persister that fills them.
pub mod warehouse;
