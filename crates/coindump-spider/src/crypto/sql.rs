// Parameters are cast explicitly so the statements work whether the
// warehouse stores prices as FLOAT or NUMERIC, and snapshot times as
// TIMESTAMP or TIMESTAMPTZ.

/// Scope the transaction to UTC, so `timestamptz` parameters land in
/// `TIMESTAMP` columns as UTC wall time.
pub(crate) const PIN_UTC: &str = "SET LOCAL TIME ZONE 'UTC'";

///////////////////////////////////////////////////////
// raw
///////////////////////////////////////////////////////

/// Append one API observation, untouched.
pub(crate) const INSERT_SNAPSHOT: &str = "
    INSERT INTO raw.crypto_snapshot (
        snapshot_time,
        coin_id,
        price_usd,
        market_cap_usd,
        volume_24h_usd,
        price_change_24h
    )
    VALUES ($1::timestamptz, $2, $3::float8, $4::float8, $5::float8, $6::float8)
";

///////////////////////////////////////////////////////
// dds
///////////////////////////////////////////////////////

/// Register a coin; the first insert wins.
pub(crate) const UPSERT_COIN: &str = "
    INSERT INTO dds.dim_coin (coin_code, coin_name, symbol)
    VALUES ($1, $2, $3)
    ON CONFLICT (coin_code)
    DO NOTHING
";

/// Surrogate key of a coin.
pub(crate) const SELECT_COIN_KEY: &str = "
    SELECT coin_id
    FROM dds.dim_coin
    WHERE coin_code = $1
";

pub(crate) const INSERT_FACT: &str = "
    INSERT INTO dds.fact_market_data (
        coin_id,
        snapshot_time,
        price_usd,
        market_cap_usd,
        volume_24h_usd,
        price_change_24h
    )
    VALUES ($1, $2::timestamptz, $3::float8, $4::float8, $5::float8, $6::float8)
";

///////////////////////////////////////////////////////
// dm
///////////////////////////////////////////////////////

/// Roll the snapshot's facts up into one summary row.
///
/// Aggregates over zero facts still produce a row: the sums fall back to 0
/// and the bitcoin price stays NULL.
pub(crate) const INSERT_SUMMARY: &str = "
    INSERT INTO dm.market_summary (snapshot_time, total_market_cap, btc_price, total_volume)
    SELECT
        $1::timestamptz,
        COALESCE(SUM(f.market_cap_usd), 0),
        MAX(CASE WHEN c.coin_code = 'bitcoin' THEN f.price_usd END),
        COALESCE(SUM(f.volume_24h_usd), 0)
    FROM dds.fact_market_data f
    JOIN dds.dim_coin c ON f.coin_id = c.coin_id
    WHERE f.snapshot_time = $1::timestamptz
    RETURNING
        total_market_cap::float8,
        btc_price::float8,
        total_volume::float8
";
