use chrono::{Duration, Utc};
use coindump_spider::config::{EnvProfiles, ProfileProvider, DWH_PROFILE};
use coindump_spider::crypto::warehouse::{save_to_db, write_snapshot, SnapshotTime};
use serde_json::json;
use tokio_postgres::NoTls;

// Runs against the warehouse described by POSTGRES_DWH_*; the tables are
// created if missing. Run with `cargo test -- --ignored`.
//
// The layout in sql/dwh.sql stores snapshot times as TIMESTAMP, holding UTC
// wall time; counts compare against the UTC rendering of the snapshot.

const DWH_DDL: &str = include_str!("sql/dwh.sql");

async fn connect() -> tokio_postgres::Client {
    let profile = EnvProfiles::default().profile(DWH_PROFILE).unwrap();
    let (pg_client, pg_conn) = profile.pg_config().unwrap().connect(NoTls).await.unwrap();

    tokio::spawn(async move {
        if let Err(err) = pg_conn.await {
            panic!("warehouse connection error: {}", err)
        }
    });

    pg_client.batch_execute(DWH_DDL).await.unwrap();
    pg_client
}

async fn count(pg_client: &tokio_postgres::Client, stmt: &str, snapshot: SnapshotTime) -> i64 {
    pg_client
        .query_one(stmt, &[&snapshot.as_datetime()])
        .await
        .unwrap()
        .get(0)
}

#[tokio::test]
#[ignore = "needs a PostgreSQL warehouse (POSTGRES_DWH_*)"]
async fn save_snapshot_twice() {
    let pg_client = connect().await;
    let profile = EnvProfiles::default().profile(DWH_PROFILE).unwrap();
    let prices = json!({
        "bitcoin": {
            "usd": 50000,
            "usd_market_cap": 9.8e11,
            "usd_24h_vol": 3e10,
            "usd_24h_change": 1.2
        },
        "ethereum": { "usd": 3000 }
    });

    // -- TWO RUNS, TEN MINUTES APART --
    let first = SnapshotTime::at(Utc::now() - Duration::minutes(10));
    let second = SnapshotTime::now();
    for snapshot in [first, second] {
        let time = std::time::Instant::now();
        let report = save_to_db(&profile, snapshot, &prices).await.unwrap();
        println!("SAVE {snapshot}: {:?}s", time.elapsed().as_secs_f64());

        assert_eq!(report.coins, 2);
        assert_eq!(report.facts, 2);
        assert_eq!(report.summary.total_market_cap, 9.8e11);
        assert_eq!(report.summary.btc_price, Some(50000.0));
        assert_eq!(report.summary.total_volume, 3e10);
    }

    // -- ROW COUNTS PER SNAPSHOT --
    for snapshot in [first, second] {
        let raw = count(
            &pg_client,
            "SELECT COUNT(*) FROM raw.crypto_snapshot WHERE snapshot_time = ($1::timestamptz AT TIME ZONE 'UTC')",
            snapshot,
        )
        .await;
        let facts = count(
            &pg_client,
            "SELECT COUNT(*) FROM dds.fact_market_data WHERE snapshot_time = ($1::timestamptz AT TIME ZONE 'UTC')",
            snapshot,
        )
        .await;
        let summaries = count(
            &pg_client,
            "SELECT COUNT(*) FROM dm.market_summary WHERE snapshot_time = ($1::timestamptz AT TIME ZONE 'UTC')",
            snapshot,
        )
        .await;
        assert_eq!((raw, facts, summaries), (2, 2, 1));
    }

    // -- ONE DIMENSION ROW PER COIN --
    let rows = pg_client
        .query(
            "SELECT coin_code, coin_name, symbol FROM dds.dim_coin WHERE coin_code = ANY($1)",
            &[&vec!["bitcoin", "ethereum"]],
        )
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    for row in rows {
        let code: String = row.get(0);
        let symbol: String = row.get(2);
        assert_eq!(symbol, code[..3].to_uppercase());
    }
}

#[tokio::test]
#[ignore = "needs a PostgreSQL warehouse (POSTGRES_DWH_*)"]
async fn failed_save_commits_nothing() {
    let pg_client = connect().await;
    let profile = EnvProfiles::default().profile(DWH_PROFILE).unwrap();
    let snapshot = SnapshotTime::now();

    // one malformed coin fails the whole snapshot
    let prices = json!({ "bitcoin": { "usd": 50000 }, "ethereum": { "usd": "n/a" } });
    assert!(save_to_db(&profile, snapshot, &prices).await.is_err());

    let raw = count(
        &pg_client,
        "SELECT COUNT(*) FROM raw.crypto_snapshot WHERE snapshot_time = ($1::timestamptz AT TIME ZONE 'UTC')",
        snapshot,
    )
    .await;
    let summaries = count(
        &pg_client,
        "SELECT COUNT(*) FROM dm.market_summary WHERE snapshot_time = ($1::timestamptz AT TIME ZONE 'UTC')",
        snapshot,
    )
    .await;
    assert_eq!((raw, summaries), (0, 0));
}

#[tokio::test]
#[ignore = "needs a PostgreSQL warehouse (POSTGRES_DWH_*)"]
async fn snapshot_time_is_stored_as_utc() {
    let mut pg_client = connect().await;
    let snapshot = SnapshotTime::now();
    let prices = json!({ "bitcoin": { "usd": 50000, "usd_market_cap": 9.8e11 } });

    // -- WRITE FROM A SESSION THAT IS NOT ON UTC --
    pg_client
        .batch_execute("SET TIME ZONE 'Europe/Moscow'")
        .await
        .unwrap();
    let report = write_snapshot(&mut pg_client, snapshot, &prices)
        .await
        .unwrap();
    assert_eq!(report.facts, 1);

    // -- READ BACK THE STORED WALL TIME --
    let expected = snapshot
        .as_datetime()
        .format("%Y-%m-%d %H:%M:%S%.6f")
        .to_string();
    for table in [
        "raw.crypto_snapshot",
        "dds.fact_market_data",
        "dm.market_summary",
    ] {
        let stored: Vec<String> = pg_client
            .query(
                &format!(
                    "SELECT to_char(snapshot_time, 'YYYY-MM-DD HH24:MI:SS.US') FROM {table} \
                     WHERE snapshot_time = ($1::timestamptz AT TIME ZONE 'UTC')"
                ),
                &[&snapshot.as_datetime()],
            )
            .await
            .unwrap()
            .iter()
            .map(|row| row.get(0))
            .collect();
        assert_eq!(stored, vec![expected.clone()], "{table}");
    }

    // the session's own zone is untouched after the commit
    let zone: String = pg_client
        .query_one("SHOW TIME ZONE", &[])
        .await
        .unwrap()
        .get(0);
    assert_eq!(zone, "Europe/Moscow");
}
