use coindump_spider::config::{Settings, COINS};
use coindump_spider::crypto::coingecko::{observations, CoinGecko, API_OK};

// Live calls to the public CoinGecko API; run with `cargo test -- --ignored`.

#[tokio::test]
#[ignore = "calls the live CoinGecko API"]
async fn ping() {
    let coingecko = CoinGecko::from_settings(&Settings::default()).unwrap();

    let time = std::time::Instant::now();
    assert_eq!(coingecko.check_api().await.unwrap(), API_OK);
    println!("GET /ping: {:?}s", time.elapsed().as_secs_f64());
}

#[tokio::test]
#[ignore = "calls the live CoinGecko API"]
async fn simple_price() {
    let settings = Settings::default();
    let coingecko = CoinGecko::from_settings(&settings).unwrap();

    let time = std::time::Instant::now();
    let prices = coingecko.get_prices(&settings.coins).await.unwrap();
    println!("GET /simple/price: {:?}s", time.elapsed().as_secs_f64());

    // only requested coins, only requested fields
    let coins = prices.as_object().unwrap();
    assert!(coins.keys().all(|coin| COINS.contains(&coin.as_str())));
    for entry in coins.values() {
        assert!(entry.as_object().unwrap().keys().all(|field| {
            ["usd", "usd_market_cap", "usd_24h_vol", "usd_24h_change"].contains(&field.as_str())
        }));
    }

    let observed = observations(&prices).unwrap();
    assert_eq!(observed.len(), coins.len());
    assert!(observed.iter().all(|obs| obs.price_usd.is_some()));
}
