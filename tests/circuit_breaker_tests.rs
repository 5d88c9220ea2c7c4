use portico::services::circuit_breaker::{
    BreakerRegistry, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState,
};
use tokio::time::{sleep, Duration};

fn config(threshold: u32, open_ms: u64) -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        failure_threshold: threshold,
        open_duration: Duration::from_millis(open_ms),
        half_open_probe_limit: 1,
    }
}

#[tokio::test]
async fn breaker_starts_closed() {
    let cb = CircuitBreaker::new("b".to_string(), CircuitBreakerConfig::default());
    assert_eq!(cb.state(), CircuitState::Closed);

    let result = cb.call(async { Ok::<i32, &str>(42) }).await;
    assert_eq!(result.unwrap(), 42);
    assert_eq!(cb.state(), CircuitState::Closed);
}

#[tokio::test]
async fn opens_and_recovers() {
    // Five consecutive connection refusals open the circuit; the sixth
    // dispatch is refused without running; after the open window a single
    // successful probe closes it again.
    let cb = CircuitBreaker::new("backend-b".to_string(), config(5, 100));

    for i in 0..5 {
        let result = cb.call(async { Err::<(), _>("connection refused") }).await;
        assert!(matches!(
            result,
            Err(CircuitBreakerError::OperationFailed(_))
        ));
        if i < 4 {
            assert_eq!(cb.state(), CircuitState::Closed, "failure {i}");
        }
    }
    assert_eq!(cb.state(), CircuitState::Open);
    assert_eq!(cb.consecutive_failures(), 5);

    let result = cb.call(async { Ok::<_, &str>("must not run") }).await;
    assert!(matches!(result, Err(CircuitBreakerError::CircuitOpen)));

    sleep(Duration::from_millis(120)).await;

    let result = cb.call(async { Ok::<_, &str>("recovered") }).await;
    assert_eq!(result.unwrap(), "recovered");
    assert_eq!(cb.state(), CircuitState::Closed);
    assert_eq!(cb.consecutive_failures(), 0);

    // Subsequent dispatches keep succeeding.
    let result = cb.call(async { Ok::<_, &str>("steady") }).await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn failed_probe_restarts_open_window() {
    let cb = CircuitBreaker::new("b".to_string(), config(1, 80));

    let _ = cb.call(async { Err::<(), _>("down") }).await;
    assert_eq!(cb.state(), CircuitState::Open);

    sleep(Duration::from_millis(100)).await;

    let _ = cb.call(async { Err::<(), _>("still down") }).await;
    assert_eq!(cb.state(), CircuitState::Open);

    // Freshly re-opened: still refusing before the window elapses again.
    let result = cb.call(async { Ok::<(), &str>(()) }).await;
    assert!(matches!(result, Err(CircuitBreakerError::CircuitOpen)));

    sleep(Duration::from_millis(100)).await;
    let result = cb.call(async { Ok::<(), &str>(()) }).await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn intermittent_failures_below_threshold_never_open() {
    let cb = CircuitBreaker::new("b".to_string(), config(3, 100));

    for _ in 0..10 {
        let _ = cb.call(async { Err::<(), _>("blip") }).await;
        let _ = cb.call(async { Err::<(), _>("blip") }).await;
        let _ = cb.call(async { Ok::<(), &str>(()) }).await;
    }
    assert_eq!(cb.state(), CircuitState::Closed);
}

#[tokio::test]
async fn half_open_rejects_calls_beyond_probe_limit() {
    let cb = CircuitBreaker::new("b".to_string(), config(1, 50));
    let _ = cb.call(async { Err::<(), _>("down") }).await;
    sleep(Duration::from_millis(70)).await;

    // The probe holds its slot across an await; a second concurrent call
    // must be refused while it is in flight.
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    let probe = cb.call(async {
        let _ = rx.await;
        Ok::<(), &str>(())
    });
    tokio::pin!(probe);

    // Drive the probe until it parks on the channel.
    tokio::select! {
        biased;
        _ = &mut probe => panic!("probe must still be waiting"),
        _ = tokio::task::yield_now() => {}
    }
    assert_eq!(cb.state(), CircuitState::HalfOpen);

    let refused = cb.call(async { Ok::<(), &str>(()) }).await;
    assert!(matches!(refused, Err(CircuitBreakerError::CircuitOpen)));

    tx.send(()).unwrap();
    assert!(probe.await.is_ok());
    assert_eq!(cb.state(), CircuitState::Closed);
}

#[tokio::test]
async fn registry_creates_breakers_lazily_and_shares_them() {
    let registry = BreakerRegistry::new(config(2, 50));
    assert!(registry.snapshot().is_empty());

    let a = registry.breaker_for("http://users:8080");
    let _ = a.call(async { Err::<(), _>("refused") }).await;
    let _ = a.call(async { Err::<(), _>("refused") }).await;

    // Another request to the same backend sees the same open breaker.
    let again = registry.breaker_for("http://users:8080");
    assert_eq!(again.state(), CircuitState::Open);

    // A different backend is unaffected.
    let other = registry.breaker_for("http://orders:8080");
    assert_eq!(other.state(), CircuitState::Closed);

    let snapshot = registry.snapshot();
    assert_eq!(snapshot.len(), 2);
}
