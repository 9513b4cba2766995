/*
[INPUT]:  FeedRunner against an unreachable loopback endpoint
[OUTPUT]: Startup and bounded shutdown verification
[POS]:    Integration test layer - feed orchestration
[UPDATE]: When changing FeedRunner startup or shutdown
*/

use std::net::TcpListener;
use std::time::Duration;

use dexplus_feed::{FeedConfig, FeedRunner};
use tokio::time::{sleep, timeout};
use tokio_test::assert_ok;

/// Port that refuses connections: bound once, then released.
fn refused_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("ws://127.0.0.1:{port}/ws")
}

fn config(url: &str) -> FeedConfig {
    let yaml = format!(
        r#"
streams:
  - id: kraken-local
    exchange: kraken
    channels:
      - kind: trades
        symbol: BTC/USD
    ws:
      url: {url}
      reconnect_backoff_min_ms: 50
      reconnect_backoff_max_ms: 200
  - id: binance-local
    exchange: binance
    channels:
      - kind: book
        symbol: BTCUSDT
        depth: 5
    ws:
      url: {url}
"#
    );
    FeedConfig::from_yaml(&yaml).unwrap()
}

#[tokio::test]
async fn test_runner_starts_and_shuts_down_while_reconnecting() {
    let config = config(&refused_url());
    let mut runner = FeedRunner::new();
    assert_ok!(runner.start(&config));
    assert_eq!(runner.stream_ids(), vec!["kraken-local", "binance-local"]);

    // Let a few dial attempts fail.
    sleep(Duration::from_millis(300)).await;
    let stats = runner.stats("kraken-local").unwrap();
    assert_eq!(stats.trades(), 0);

    let token = runner.shutdown_token();
    let result = timeout(Duration::from_secs(15), runner.shutdown_and_wait())
        .await
        .expect("shutdown timed out");
    assert_ok!(result);
    assert!(token.is_cancelled());
    assert!(runner.stream_ids().is_empty());
}

#[tokio::test]
async fn test_runner_rejects_running_stream_twice() {
    let config = config(&refused_url());
    let mut runner = FeedRunner::new();
    assert_ok!(runner.start(&config));

    let err = runner.start(&config).unwrap_err();
    assert!(err.to_string().contains("already running"), "{err}");

    assert_ok!(runner.shutdown_and_wait().await);
}

#[tokio::test]
async fn test_run_until_shutdown_returns_after_cancel() {
    let config = config(&refused_url());
    let mut runner = FeedRunner::new();
    assert_ok!(runner.start(&config));

    let token = runner.shutdown_token();
    tokio::spawn(async move {
        sleep(Duration::from_millis(100)).await;
        token.cancel();
    });

    let result = timeout(Duration::from_secs(15), runner.run_until_shutdown())
        .await
        .expect("runner did not stop");
    assert_ok!(result);
}

#[tokio::test]
async fn test_runner_starts_account_stream_behind_login() {
    let url = refused_url();
    let yaml = format!(
        r#"
streams:
  - id: okx-account
    exchange: okx
    credentials: {{api_key: key, secret_key: secret, passphrase: pass}}
    channels:
      - kind: orders
      - kind: positions
        symbol: BTC-USDT-SWAP
    ws:
      url: {url}
      reconnect_backoff_min_ms: 50
      reconnect_backoff_max_ms: 200
"#
    );
    let config = FeedConfig::from_yaml(&yaml).unwrap();
    let mut runner = FeedRunner::new();
    assert_ok!(runner.start(&config));

    sleep(Duration::from_millis(200)).await;
    assert_eq!(runner.stats("okx-account").unwrap().account_events(), 0);

    let result = timeout(Duration::from_secs(15), runner.shutdown_and_wait())
        .await
        .expect("shutdown timed out");
    assert_ok!(result);
}
