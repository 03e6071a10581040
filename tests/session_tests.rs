//! Session lifecycle tests
//!
//! Sessions run against the scripted `MockExchange` on a paused clock, so
//! intervals, retries and overlapping cycles are deterministic.

mod common;

use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

use common::{falling_closes, MockExchange};
use upbit_autotrader::cycle::DecisionSource;
use upbit_autotrader::error::ErrorKind;
use upbit_autotrader::session::EventKind;
use upbit_autotrader::upbit::Credentials;
use upbit_autotrader::{
    Market, RiskConfig, SessionController, SessionStatus, Side, StrategyConfig, TradingConfig,
    TradingError,
};

// =============================================================================
// Test Utilities
// =============================================================================

fn krw_btc() -> Market {
    Market::parse("KRW-BTC").unwrap()
}

fn krw_eth() -> Market {
    Market::parse("KRW-ETH").unwrap()
}

/// Credentials whose user id is the first eight characters of `access_key`
fn creds(access_key: &str) -> Credentials {
    Credentials::new(access_key, "secret-key")
}

fn controller(mock: &Arc<MockExchange>) -> SessionController<MockExchange> {
    SessionController::new(Arc::clone(mock))
}

fn config_with_interval(interval_ms: u64) -> TradingConfig {
    TradingConfig {
        interval: interval_ms,
        ..TradingConfig::default()
    }
}

/// RSI as the only voter; steadily falling closes read as oversold
fn rsi_only(test_mode: bool) -> TradingConfig {
    TradingConfig {
        strategy: StrategyConfig {
            use_ma: false,
            use_bollinger: false,
            ..StrategyConfig::default()
        },
        test_mode,
        ..TradingConfig::default()
    }
}

/// Let spawned scheduler and cycle tasks run
async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_one_session_per_user_and_market() {
    let mock = Arc::new(MockExchange::new());
    let controller = controller(&mock);

    let started = controller
        .start("alice-ac", krw_btc(), creds("alice-access"), TradingConfig::default())
        .await
        .unwrap();
    assert_eq!(started.status, SessionStatus::Running);
    assert!(started.is_running);
    assert_eq!(started.events.back().unwrap().kind, EventKind::Started);

    let err = controller
        .start("alice-ac", krw_btc(), creds("alice-access"), TradingConfig::default())
        .await
        .unwrap_err();
    assert!(matches!(err, TradingError::Conflict { .. }));

    // another user on the same market is independent
    controller
        .start("bob-acce", krw_btc(), creds("bob-access"), TradingConfig::default())
        .await
        .unwrap();
    assert_eq!(controller.live_count().await, 2);

    let stopped = controller.stop("alice-ac", &krw_btc()).await.unwrap();
    assert_eq!(stopped.id, started.id);
    assert_eq!(stopped.status, SessionStatus::Stopped);

    let restarted = controller
        .start("alice-ac", krw_btc(), creds("alice-access"), TradingConfig::default())
        .await
        .unwrap();
    assert_ne!(restarted.id, started.id);

    controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_stop_is_idempotent() {
    let mock = Arc::new(MockExchange::new());
    let controller = controller(&mock);

    controller
        .start("alice-ac", krw_btc(), creds("alice-access"), TradingConfig::default())
        .await
        .unwrap();
    settle().await;

    let first = controller.stop("alice-ac", &krw_btc()).await.unwrap();
    let second = controller.stop("alice-ac", &krw_btc()).await.unwrap();
    assert_eq!(first, second);
    assert!(!second.is_running);

    let stopped_events = second
        .events
        .iter()
        .filter(|e| e.kind == EventKind::Stopped)
        .count();
    assert_eq!(stopped_events, 1);

    let status = controller.status("alice-ac", &krw_btc()).await.unwrap();
    assert_eq!(status.status, SessionStatus::Stopped);
    assert_eq!(controller.live_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_only_the_starting_key_owns_a_session() {
    let mock = Arc::new(MockExchange::new());
    let controller = controller(&mock);

    controller
        .start("alice-ac", krw_btc(), creds("alice-access-1"), TradingConfig::default())
        .await
        .unwrap();
    settle().await;

    // same eight-character user id, different access key
    let intruder = creds("alice-access-2");
    assert_eq!(intruder.user_id(), "alice-ac");
    let err = controller
        .verify_owner(&intruder, &krw_btc())
        .await
        .unwrap_err();
    assert!(matches!(err, TradingError::Auth { status: 403, .. }));

    let owner = creds("alice-access-1");
    controller.verify_owner(&owner, &krw_btc()).await.unwrap();
    // no session on this market yet
    controller.verify_owner(&intruder, &krw_eth()).await.unwrap();

    // ownership carries over to the retained snapshot
    controller.stop("alice-ac", &krw_btc()).await.unwrap();
    assert!(controller.verify_owner(&intruder, &krw_btc()).await.is_err());
    controller.verify_owner(&owner, &krw_btc()).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_unknown_session_not_found() {
    let mock = Arc::new(MockExchange::new());
    let controller = controller(&mock);

    let err = controller.status("nobody00", &krw_btc()).await.unwrap_err();
    assert!(matches!(err, TradingError::NotFound { .. }));

    let err = controller.stop("nobody00", &krw_btc()).await.unwrap_err();
    assert!(matches!(err, TradingError::NotFound { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_start_rejects_missing_keys_and_bad_config() {
    let mock = Arc::new(MockExchange::new());
    let controller = controller(&mock);

    let err = controller
        .start(
            "",
            krw_btc(),
            Credentials::anonymous(),
            TradingConfig::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, TradingError::Auth { .. }));

    let err = controller
        .start("alice-ac", krw_btc(), creds("alice-access"), config_with_interval(500))
        .await
        .unwrap_err();
    assert!(matches!(err, TradingError::Validation(_)));
    assert_eq!(controller.live_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_first_cycle_runs_immediately() {
    let mock = Arc::new(MockExchange::new());
    let controller = controller(&mock);

    controller
        .start("alice-ac", krw_btc(), creds("alice-access"), TradingConfig::default())
        .await
        .unwrap();
    settle().await;

    let status = controller.status("alice-ac", &krw_btc()).await.unwrap();
    assert_eq!(status.cycles_completed, 1);
    assert_eq!(mock.candle_calls(), 1);

    let decision = status.last_decision.expect("decision recorded");
    assert_eq!(decision.source, DecisionSource::Signals);
    assert_eq!(decision.indicators.len(), 3);
    assert!(mock.orders().is_empty());

    // next cycle one interval later
    tokio::time::sleep(Duration::from_secs(60)).await;
    let status = controller.status("alice-ac", &krw_btc()).await.unwrap();
    assert_eq!(status.cycles_completed, 2);

    controller.shutdown().await;
}

// =============================================================================
// Scheduling and failure handling
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_overlapping_ticks_are_skipped() {
    let mock = Arc::new(MockExchange::new());
    mock.set_candle_delay(Duration::from_millis(2500));
    let controller = controller(&mock);

    controller
        .start("alice-ac", krw_btc(), creds("alice-access"), config_with_interval(1000))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(5200)).await;

    let status = controller.status("alice-ac", &krw_btc()).await.unwrap();
    assert_eq!(mock.max_in_flight(), 1);
    assert!(status.cycles_skipped >= 2, "skipped {}", status.cycles_skipped);
    assert!(status
        .events
        .iter()
        .any(|e| e.kind == EventKind::CycleSkipped));

    // stop waits for the cycle still in flight
    let stopped = controller.stop("alice-ac", &krw_btc()).await.unwrap();
    assert_eq!(stopped.cycles_completed, 2);
    assert_eq!(mock.max_in_flight(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_auth_failure_halts_session() {
    let mock = Arc::new(MockExchange::new());
    mock.fail_candles_with(TradingError::Auth {
        status: 401,
        message: "invalid access key".to_string(),
    });
    let controller = controller(&mock);

    controller
        .start("alice-ac", krw_btc(), creds("alice-access"), config_with_interval(1000))
        .await
        .unwrap();
    settle().await;

    let status = controller.status("alice-ac", &krw_btc()).await.unwrap();
    assert_eq!(status.status, SessionStatus::Error);
    assert!(!status.is_running);
    assert_eq!(status.last_error.as_ref().unwrap().kind, ErrorKind::AuthError);
    assert!(status.events.iter().any(|e| e.kind == EventKind::Halted));

    // no further cycles once halted
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(mock.candle_calls(), 1);

    let err = controller
        .start("alice-ac", krw_btc(), creds("alice-access"), TradingConfig::default())
        .await
        .unwrap_err();
    assert!(matches!(err, TradingError::Conflict { .. }));

    let stopped = controller.stop("alice-ac", &krw_btc()).await.unwrap();
    assert_eq!(stopped.status, SessionStatus::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_cycle_retried_once() {
    let mock = Arc::new(MockExchange::new());
    mock.fail_candles_with(TradingError::RateLimit {
        retry_after: Some(Duration::from_millis(500)),
    });
    let controller = controller(&mock);

    controller
        .start("alice-ac", krw_btc(), creds("alice-access"), TradingConfig::default())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    let status = controller.status("alice-ac", &krw_btc()).await.unwrap();
    assert_eq!(mock.candle_calls(), 2);
    assert_eq!(status.cycles_completed, 1);
    assert_eq!(status.cycles_failed, 0);
    assert!(status.events.iter().any(|e| e.kind == EventKind::Retry));
    assert_eq!(status.status, SessionStatus::Running);

    controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_second_rate_limit_fails_the_cycle() {
    let mock = Arc::new(MockExchange::new());
    for _ in 0..2 {
        mock.fail_candles_with(TradingError::RateLimit { retry_after: None });
    }
    let controller = controller(&mock);

    controller
        .start("alice-ac", krw_btc(), creds("alice-access"), TradingConfig::default())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;

    let status = controller.status("alice-ac", &krw_btc()).await.unwrap();
    assert_eq!(mock.candle_calls(), 2);
    assert_eq!(status.cycles_failed, 1);
    assert_eq!(
        status.last_error.as_ref().unwrap().kind,
        ErrorKind::RateLimitError
    );
    // transient failures keep the session alive
    assert_eq!(status.status, SessionStatus::Running);

    controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_network_failure_during_submission_not_retried() {
    let mock = Arc::new(MockExchange::new());
    mock.set_closes(falling_closes(100, 50_000.0, 10.0));
    mock.fail_orders_with(TradingError::Network("connection reset".to_string()));
    let controller = controller(&mock);

    controller
        .start("alice-ac", krw_btc(), creds("alice-access"), rsi_only(false))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;

    let status = controller.status("alice-ac", &krw_btc()).await.unwrap();
    assert_eq!(mock.orders().len(), 1);
    assert_eq!(status.cycles_failed, 1);
    assert_eq!(
        status.last_error.as_ref().unwrap().kind,
        ErrorKind::NetworkError
    );
    assert!(!status.events.iter().any(|e| e.kind == EventKind::Retry));
    assert!(status.open_position.is_none());

    controller.shutdown().await;
}

// =============================================================================
// Trading
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_live_buy_sends_capped_market_order() {
    let mock = Arc::new(MockExchange::new());
    mock.set_closes(falling_closes(100, 50_000.0, 10.0));
    let controller = controller(&mock);

    let mut config = rsi_only(false);
    config.risk_management = RiskConfig::default().with_max_order_amount(50_000.0);

    controller
        .start("alice-ac", krw_btc(), creds("alice-access"), config)
        .await
        .unwrap();
    settle().await;

    let orders = mock.orders();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].side, Side::Buy);
    assert_eq!(orders[0].wire_ord_type(), "price");
    // 10% of 1,000,000 capped at 50,000
    assert_eq!(orders[0].price, Some(dec!(50000)));
    assert!(orders[0].volume.is_none());

    let status = controller.status("alice-ac", &krw_btc()).await.unwrap();
    assert_eq!(status.orders_submitted, 1);
    assert!(status.paper_account.is_none());
    let position = status.open_position.expect("position opened");
    assert_eq!(position.market, krw_btc());
    assert!(position.volume > 0.0);

    // still oversold, but the open position blocks another buy
    tokio::time::sleep(Duration::from_secs(60)).await;
    let status = controller.status("alice-ac", &krw_btc()).await.unwrap();
    assert_eq!(mock.orders().len(), 1);
    assert_eq!(status.orders_rejected, 1);

    controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_stop_loss_forces_exit() {
    let mock = Arc::new(MockExchange::new());
    mock.set_closes(falling_closes(100, 50_000.0, 10.0));
    let controller = controller(&mock);

    controller
        .start("alice-ac", krw_btc(), creds("alice-access"), rsi_only(true))
        .await
        .unwrap();
    settle().await;

    let status = controller.status("alice-ac", &krw_btc()).await.unwrap();
    assert_eq!(status.orders_submitted, 1);
    let position = status.open_position.expect("paper buy opened a position");
    let paper = status.paper_account.unwrap();
    assert!((paper.quote - 900_000.0).abs() < 1e-6);
    assert!((paper.base - position.volume).abs() < 1e-12);

    // drop more than 5% below entry
    mock.push_close(46_000.0);
    tokio::time::sleep(Duration::from_secs(60)).await;

    let status = controller.status("alice-ac", &krw_btc()).await.unwrap();
    let decision = status.last_decision.unwrap();
    assert_eq!(decision.source, DecisionSource::StopLoss);
    assert_eq!(decision.price, 46_000.0);
    assert!(status.open_position.is_none());
    assert_eq!(status.orders_submitted, 2);
    assert!(status.events.iter().any(|e| e.kind == EventKind::ForcedExit));

    let paper = status.paper_account.unwrap();
    assert!(paper.base.abs() < 1e-12);
    assert!(paper.quote < 1_000_000.0);

    // paper mode never reaches the exchange
    assert!(mock.orders().is_empty());

    controller.shutdown().await;
}

// =============================================================================
// Multiple sessions
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_sessions_on_different_markets_run_concurrently() {
    let mock = Arc::new(MockExchange::new());
    let controller = controller(&mock);

    for market in [krw_btc(), krw_eth()] {
        controller
            .start("alice-ac", market, creds("alice-access"), TradingConfig::default())
            .await
            .unwrap();
    }
    settle().await;

    let sessions = controller.sessions_for("alice-ac").await;
    assert_eq!(sessions.len(), 2);
    assert_eq!(sessions[0].market, krw_btc());
    assert_eq!(sessions[1].market, krw_eth());
    assert!(sessions.iter().all(|s| s.cycles_completed == 1));

    let err = controller.sole_market("alice-ac").await.unwrap_err();
    assert!(matches!(err, TradingError::Validation(_)));
    assert_eq!(controller.sole_market("bob-acce").await.unwrap(), None);

    controller.stop("alice-ac", &krw_eth()).await.unwrap();
    assert_eq!(
        controller.sole_market("alice-ac").await.unwrap(),
        Some(krw_btc())
    );

    controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_every_session() {
    let mock = Arc::new(MockExchange::new());
    let controller = controller(&mock);

    controller
        .start("alice-ac", krw_btc(), creds("alice-access"), TradingConfig::default())
        .await
        .unwrap();
    controller
        .start("bob-acce", krw_eth(), creds("bob-access"), TradingConfig::default())
        .await
        .unwrap();
    settle().await;

    controller.shutdown().await;
    assert_eq!(controller.live_count().await, 0);

    let calls = mock.candle_calls();
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(mock.candle_calls(), calls);

    for (user, market) in [("alice-ac", krw_btc()), ("bob-acce", krw_eth())] {
        let status = controller.status(user, &market).await.unwrap();
        assert_eq!(status.status, SessionStatus::Stopped);
    }
}
