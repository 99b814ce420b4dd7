//! Backend resilience: retries, timeouts, size cap, breaker, quotas, headers.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{json, Value};
use tokio::sync::Semaphore;

use rpc_gateway::backend::{Backend, BackendError, BackendGroup, BackendOpt, ForwardContext};
use rpc_gateway::rpc::RpcErrorKind;
use rpc_gateway::security::{BackendRateLimiter, LocalRateLimiter, RateLimitError};

mod common;

use common::{answer, MockBackend, MockReply};

const CALL: &[u8] = br#"{"jsonrpc":"2.0","method":"eth_call","params":[],"id":1}"#;

fn fast_retries() -> BackendOpt {
    BackendOpt::RetryBackoff {
        base: Duration::from_millis(1),
        max: Duration::from_millis(5),
    }
}

fn backend(name: &str, url: &str, opts: Vec<BackendOpt>) -> Backend {
    let limiter: Arc<dyn BackendRateLimiter> = Arc::new(LocalRateLimiter::new());
    Backend::new(
        name,
        url,
        "ws://127.0.0.1:1",
        limiter,
        Arc::new(Semaphore::new(16)),
        opts,
    )
    .unwrap()
}

/// Fails with `status` for the first `failures` calls, then answers.
async fn flaky(failures: u32, status: u16) -> (MockBackend, Arc<AtomicU32>) {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let mock = MockBackend::start(move |req| {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        async move {
            if n < failures {
                MockReply::status(status)
            } else {
                MockReply::ok(answer(&req.body, |_| json!("0xok")).to_string())
            }
        }
    })
    .await;
    (mock, calls)
}

#[tokio::test]
async fn test_retries_until_success() {
    let (mock, calls) = flaky(2, 503).await;
    let node = backend("node", &mock.url(), vec![BackendOpt::MaxRetries(2), fast_retries()]);

    let raw = node
        .forward(Bytes::from_static(CALL), &ForwardContext::default())
        .await
        .unwrap();
    let res: Value = serde_json::from_slice(&raw).unwrap();

    assert_eq!(res["result"], "0xok");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(node.is_online());
}

#[tokio::test]
async fn test_upstream_400_is_a_response() {
    let mock = MockBackend::start(|_| async {
        MockReply {
            status: 400,
            body: r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32602,"message":"bad params"}}"#.into(),
            delay: Duration::ZERO,
        }
    })
    .await;
    let node = backend("node", &mock.url(), vec![]);

    let raw = node
        .forward(Bytes::from_static(CALL), &ForwardContext::default())
        .await
        .unwrap();
    let res: Value = serde_json::from_slice(&raw).unwrap();
    assert_eq!(res["error"]["code"], -32602);
}

#[tokio::test]
async fn test_timeout_exhausts_retries() {
    let mock = MockBackend::start(|req| async move {
        MockReply::ok(answer(&req.body, |_| json!("0x1")).to_string())
            .delayed(Duration::from_millis(500))
    })
    .await;
    let node = backend(
        "slow",
        &mock.url(),
        vec![
            BackendOpt::Timeout(Duration::from_millis(100)),
            BackendOpt::MaxRetries(1),
            fast_retries(),
        ],
    );

    let err = node
        .forward(Bytes::from_static(CALL), &ForwardContext::default())
        .await
        .unwrap_err();
    match err {
        BackendError::RetriesExhausted { attempts, source } => {
            assert_eq!(attempts, 2);
            assert!(matches!(*source, BackendError::Timeout(_)));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(mock.hits(), 2);
}

#[tokio::test]
async fn test_oversize_response_not_retried() {
    let big = format!(r#"{{"jsonrpc":"2.0","id":1,"result":"{}"}}"#, "a".repeat(4096));
    let mock = MockBackend::start(move |_| {
        let big = big.clone();
        async move { MockReply::ok(big) }
    })
    .await;
    let node = backend(
        "big",
        &mock.url(),
        vec![
            BackendOpt::MaxResponseSize(1024),
            BackendOpt::MaxRetries(3),
            fast_retries(),
        ],
    );

    let err = node
        .forward(Bytes::from_static(CALL), &ForwardContext::default())
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::ResponseTooLarge { limit: 1024 }));
    assert_eq!(mock.hits(), 1);
    assert!(node.is_online());
}

#[tokio::test]
async fn test_exhausted_backend_goes_out_of_service() {
    let (mock, calls) = flaky(u32::MAX, 502).await;
    let node = backend(
        "down",
        &mock.url(),
        vec![
            BackendOpt::MaxRetries(1),
            BackendOpt::OutOfServiceDuration(Duration::from_millis(200)),
            fast_retries(),
        ],
    );

    let err = node
        .forward(Bytes::from_static(CALL), &ForwardContext::default())
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::RetriesExhausted { .. }));
    assert!(!node.is_online());

    let err = node
        .forward(Bytes::from_static(CALL), &ForwardContext::default())
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::Offline(_)));
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(node.is_online());
}

#[tokio::test]
async fn test_rps_cap_denies_extra_calls() {
    let mock = MockBackend::echo(json!("0x1")).await;
    let node = backend("capped", &mock.url(), vec![BackendOpt::MaxRps(2)]);
    let ctx = ForwardContext::default();

    assert!(node.forward(Bytes::from_static(CALL), &ctx).await.is_ok());
    assert!(node.forward(Bytes::from_static(CALL), &ctx).await.is_ok());
    let err = node.forward(Bytes::from_static(CALL), &ctx).await.unwrap_err();
    assert!(matches!(err, BackendError::OverCapacity(_)));
    assert_eq!(mock.hits(), 2);

    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert!(node.forward(Bytes::from_static(CALL), &ctx).await.is_ok());
}

#[tokio::test]
async fn test_outbound_headers() {
    let mock = MockBackend::echo(json!("0x1")).await;
    let node = backend(
        "authed",
        &mock.url(),
        vec![
            BackendOpt::BasicAuth {
                username: "user".into(),
                password: "pass".into(),
            },
            BackendOpt::ProxyIp("10.0.0.9".into()),
        ],
    );
    let ctx = ForwardContext {
        forwarded_for: "1.2.3.4".into(),
        request_id: Some("req-42".into()),
    };

    node.forward(Bytes::from_static(CALL), &ctx).await.unwrap();

    let seen = &mock.requests()[0];
    assert_eq!(seen.header("authorization"), Some("Basic dXNlcjpwYXNz"));
    assert_eq!(seen.header("x-forwarded-for"), Some("1.2.3.4, 10.0.0.9"));
    assert_eq!(seen.header("x-request-id"), Some("req-42"));
    assert_eq!(seen.header("content-type"), Some("application/json"));
    assert_eq!(seen.body["method"], "eth_call");
}

#[tokio::test]
async fn test_strip_trailing_xff() {
    let mock = MockBackend::echo(json!("0x1")).await;
    let node = backend("strip", &mock.url(), vec![BackendOpt::StripTrailingXff]);
    let ctx = ForwardContext {
        forwarded_for: "1.2.3.4, 5.6.7.8".into(),
        request_id: None,
    };

    node.forward(Bytes::from_static(CALL), &ctx).await.unwrap();
    assert_eq!(mock.requests()[0].header("x-forwarded-for"), Some("1.2.3.4"));
}

#[tokio::test]
async fn test_group_falls_back_in_order() {
    let (bad, bad_calls) = flaky(u32::MAX, 500).await;
    let good = MockBackend::echo(json!("0xgood")).await;

    let limiter: Arc<dyn BackendRateLimiter> = Arc::new(LocalRateLimiter::new());
    let semaphore = Arc::new(Semaphore::new(16));
    let mut backends = BTreeMap::new();
    for (name, url) in [("a", bad.url()), ("b", good.url())] {
        let node = Backend::new(
            name,
            &url,
            "ws://127.0.0.1:1",
            limiter.clone(),
            semaphore.clone(),
            vec![fast_retries()],
        )
        .unwrap();
        backends.insert(name.to_string(), Arc::new(node));
    }
    let group = BackendGroup::new("main", &["a".to_string(), "b".to_string()], &backends).unwrap();

    let raw = group
        .forward(Bytes::from_static(CALL), &ForwardContext::default())
        .await
        .unwrap();
    let res: Value = serde_json::from_slice(&raw).unwrap();
    assert_eq!(res["result"], "0xgood");
    assert_eq!(bad_calls.load(Ordering::SeqCst), 1);

    // "a" is now out of service and is skipped without a call.
    group
        .forward(Bytes::from_static(CALL), &ForwardContext::default())
        .await
        .unwrap();
    assert_eq!(bad_calls.load(Ordering::SeqCst), 1);
    assert_eq!(good.hits(), 2);
}

/// Limiter whose store is always down.
#[derive(Debug)]
struct UnreachableLimiter;

#[async_trait]
impl BackendRateLimiter for UnreachableLimiter {
    async fn take_backend_rps(&self, _: &str, _: u32) -> Result<bool, RateLimitError> {
        Err(RateLimitError::Unavailable("connection refused".into()))
    }

    async fn take_ws_conn(&self, _: &str, _: u32) -> Result<bool, RateLimitError> {
        Err(RateLimitError::Unavailable("connection refused".into()))
    }

    async fn release_ws_conn(&self, _: &str) -> Result<(), RateLimitError> {
        Err(RateLimitError::Unavailable("connection refused".into()))
    }

    async fn flush_backend_ws_conns(&self, _: &[String]) -> Result<(), RateLimitError> {
        Err(RateLimitError::Unavailable("connection refused".into()))
    }
}

#[tokio::test]
async fn test_limiter_outage_denies_calls() {
    let mock = MockBackend::echo(json!("0x1")).await;
    let limiter: Arc<dyn BackendRateLimiter> = Arc::new(UnreachableLimiter);
    let node = Arc::new(
        Backend::new(
            "node",
            &mock.url(),
            "ws://127.0.0.1:1",
            limiter,
            Arc::new(Semaphore::new(16)),
            vec![BackendOpt::MaxRps(100), BackendOpt::MaxWsConns(10)],
        )
        .unwrap(),
    );

    let err = node
        .forward(Bytes::from_static(CALL), &ForwardContext::default())
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::RateLimiter(RateLimitError::Unavailable(_))));
    assert!(matches!(
        node.acquire_ws_permit().await.unwrap_err(),
        BackendError::RateLimiter(_)
    ));

    let backends = BTreeMap::from([("node".to_string(), node.clone())]);
    let group = BackendGroup::new("main", &["node".to_string()], &backends).unwrap();
    let err = group
        .forward(Bytes::from_static(CALL), &ForwardContext::default())
        .await
        .unwrap_err();
    assert_eq!(err.rpc_kind(), RpcErrorKind::OverCapacity);

    // Denied locally: nothing reached the upstream and the breaker stays closed.
    assert_eq!(mock.hits(), 0);
    assert!(node.is_online());
}
