use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::json;

use courier_core::app::{PoolConfig, SubmitOptions, WorkerPool};
use courier_core::domain::{
    CourierError, EnqueueOptions, ExponentialBackoff, HandlerError, JobEvent, JobId, JobRecord,
    JobStatus, NewJob, QueueCounts, QueueName, Result, RetryDecision, RetryPolicy,
};
use courier_core::impls::{FileJobStore, InMemoryJobStore};
use courier_core::ports::{ClaimRequest, EventSink, JobStore, Release};
use courier_core::typed::{JobContext, JobOptions};
use courier_core::{Courier, CourierBuilder};

fn fast_retry() -> Arc<dyn RetryPolicy> {
    Arc::new(ExponentialBackoff::new(
        Duration::from_millis(10),
        1.0,
        Duration::from_millis(10),
    ))
}

fn pool_config(concurrency: usize) -> PoolConfig {
    PoolConfig::new("default", concurrency)
        .poll_interval(Duration::from_millis(20))
        .shutdown_grace(Duration::from_secs(5))
        .store_backoff(Duration::from_millis(10))
}

fn builder(store: &InMemoryJobStore) -> CourierBuilder {
    CourierBuilder::new()
        .store(Arc::new(store.clone()))
        .retry_policy(fast_retry())
}

async fn wait_for_status(store: &InMemoryJobStore, id: JobId, status: JobStatus) -> JobRecord {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let record = store.get(id).await.unwrap().unwrap();
        if record.status == status {
            return record;
        }
        assert!(
            Instant::now() < deadline,
            "job {id} stuck in {:?}, expected {status:?}",
            record.status
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn wait_settled(store: &InMemoryJobStore, expected_total: usize) -> QueueCounts {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let counts = store.counts(&QueueName::default()).await.unwrap();
        if counts.is_settled() && counts.total() == expected_total {
            return counts;
        }
        assert!(Instant::now() < deadline, "queue not settled: {counts:?}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Tracks how many handlers run at once and the peak.
#[derive(Default)]
struct Gauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl Gauge {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<JobEvent>>,
}

impl RecordingSink {
    fn events(&self) -> Vec<JobEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: JobEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrency_one_runs_jobs_sequentially() {
    let store = InMemoryJobStore::new();
    let windows: Arc<Mutex<Vec<(Instant, Instant)>>> = Arc::default();

    let courier = {
        let windows = Arc::clone(&windows);
        builder(&store)
            .register_fn("send-email", JobOptions::new().concurrency(1), move |_ctx, _payload| {
                let windows = Arc::clone(&windows);
                async move {
                    let start = Instant::now();
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    windows.lock().unwrap().push((start, Instant::now()));
                    Ok::<(), HandlerError>(())
                }
            })
            .unwrap()
            .build()
            .unwrap()
    };
    // pool has room for more; the per-type limit is what serializes
    let pool = courier.start_pool(pool_config(4)).unwrap();

    for n in 0..3 {
        courier
            .dispatcher()
            .submit("send-email", json!({ "n": n }), SubmitOptions::new())
            .await
            .unwrap();
    }
    wait_settled(&store, 3).await;
    assert!(pool.stop().await.clean);

    let mut windows = windows.lock().unwrap().clone();
    assert_eq!(windows.len(), 3);
    windows.sort_by_key(|(start, _)| *start);
    for pair in windows.windows(2) {
        assert!(pair[1].0 >= pair[0].1, "executions overlapped: {pair:?}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn fails_twice_then_completes_within_budget() {
    let store = InMemoryJobStore::new();
    let calls = Arc::new(AtomicU32::new(0));

    let courier = {
        let calls = Arc::clone(&calls);
        builder(&store)
            .register_fn("flaky", JobOptions::new().max_attempts(3), move |_ctx, _payload| {
                let calls = Arc::clone(&calls);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        return Err(HandlerError::new("not yet"));
                    }
                    Ok::<(), HandlerError>(())
                }
            })
            .unwrap()
            .build()
            .unwrap()
    };
    let pool = courier.start_pool(pool_config(2)).unwrap();

    let id = courier
        .dispatcher()
        .submit("flaky", json!({}), SubmitOptions::new())
        .await
        .unwrap();
    let record = wait_for_status(&store, id, JobStatus::Completed).await;
    pool.stop().await;

    assert_eq!(record.attempts, 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn always_failing_job_is_dead_after_exactly_max_attempts() {
    let store = InMemoryJobStore::new();
    let sink = Arc::new(RecordingSink::default());
    let calls = Arc::new(AtomicU32::new(0));

    let courier = {
        let calls = Arc::clone(&calls);
        builder(&store)
            .event_sink(sink.clone())
            .register_fn("doomed", JobOptions::new(), move |_ctx, _payload| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(HandlerError::new("always broken"))
                }
            })
            .unwrap()
            .build()
            .unwrap()
    };
    let pool = courier.start_pool(pool_config(2)).unwrap();

    let id = courier
        .dispatcher()
        .submit("doomed", json!({}), SubmitOptions::new().max_attempts(2))
        .await
        .unwrap();
    let record = wait_for_status(&store, id, JobStatus::Dead).await;

    // give a stray third attempt the chance to show up
    tokio::time::sleep(Duration::from_millis(100)).await;
    pool.stop().await;

    assert_eq!(record.attempts, 2);
    assert_eq!(record.last_error.as_deref(), Some("always broken"));
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let events = sink.events();
    let retries = events
        .iter()
        .filter(|e| matches!(e, JobEvent::RetryScheduled { .. }))
        .count();
    let dead = events
        .iter()
        .filter(|e| matches!(e, JobEvent::DeadLettered { attempts: 2, .. }))
        .count();
    assert_eq!(retries, 1);
    assert_eq!(dead, 1);

    let dead_jobs = store.list_dead(&QueueName::default()).await.unwrap();
    assert_eq!(dead_jobs.len(), 1);
    assert_eq!(dead_jobs[0].id, id);
}

#[tokio::test]
async fn submitting_unregistered_type_fails_and_persists_nothing() {
    let store = InMemoryJobStore::new();
    let courier = builder(&store).build().unwrap();

    let err = courier
        .dispatcher()
        .submit("send-email", json!({}), SubmitOptions::new())
        .await
        .unwrap_err();

    assert!(matches!(err, CourierError::UnknownJobType(t) if t.as_str() == "send-email"));
    assert_eq!(store.counts(&QueueName::default()).await.unwrap().total(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pool_never_exceeds_its_concurrency() {
    let store = InMemoryJobStore::new();
    let gauge = Arc::new(Gauge::default());

    let courier = {
        let gauge = Arc::clone(&gauge);
        builder(&store)
            .register_fn("work", JobOptions::new().concurrency(100), move |_ctx, _payload| {
                let gauge = Arc::clone(&gauge);
                async move {
                    gauge.enter();
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    gauge.exit();
                    Ok::<(), HandlerError>(())
                }
            })
            .unwrap()
            .build()
            .unwrap()
    };
    let pool = courier.start_pool(pool_config(3)).unwrap();

    for _ in 0..15 {
        courier
            .dispatcher()
            .submit("work", json!({}), SubmitOptions::new())
            .await
            .unwrap();
    }

    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        assert!(pool.status().running <= 3);
        let counts = store.counts(&QueueName::default()).await.unwrap();
        if counts.completed == 15 {
            break;
        }
        assert!(Instant::now() < deadline, "jobs did not finish: {counts:?}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    pool.stop().await;

    assert!(gauge.peak() <= 3, "peak was {}", gauge.peak());
    assert!(gauge.peak() >= 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn saturated_type_does_not_block_other_types() {
    let store = InMemoryJobStore::new();
    let a = Arc::new(Gauge::default());
    let b = Arc::new(Gauge::default());
    let total = Arc::new(Gauge::default());

    let handler = |own: Arc<Gauge>, total: Arc<Gauge>| {
        move |_ctx: JobContext, _payload: serde_json::Value| {
            let own = Arc::clone(&own);
            let total = Arc::clone(&total);
            async move {
                own.enter();
                total.enter();
                tokio::time::sleep(Duration::from_millis(50)).await;
                total.exit();
                own.exit();
                Ok::<(), HandlerError>(())
            }
        }
    };

    let courier = builder(&store)
        .register_fn("a", JobOptions::new().concurrency(1), handler(a.clone(), total.clone()))
        .unwrap()
        .register_fn("b", JobOptions::new().concurrency(1), handler(b.clone(), total.clone()))
        .unwrap()
        .build()
        .unwrap();
    let pool = courier.start_pool(pool_config(4)).unwrap();

    for job_type in ["a", "a", "a", "b", "b", "b"] {
        courier
            .dispatcher()
            .submit(job_type, json!({}), SubmitOptions::new())
            .await
            .unwrap();
    }
    wait_settled(&store, 6).await;
    pool.stop().await;

    assert_eq!(a.peak(), 1);
    assert_eq!(b.peak(), 1);
    assert_eq!(total.peak(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn delayed_job_does_not_run_early() {
    let store = InMemoryJobStore::new();
    let started: Arc<Mutex<Option<Instant>>> = Arc::default();

    let courier = {
        let started = Arc::clone(&started);
        builder(&store)
            .register_fn("later", JobOptions::new(), move |_ctx, _payload| {
                let started = Arc::clone(&started);
                async move {
                    *started.lock().unwrap() = Some(Instant::now());
                    Ok::<(), HandlerError>(())
                }
            })
            .unwrap()
            .build()
            .unwrap()
    };
    let pool = courier.start_pool(pool_config(2)).unwrap();

    let submitted = Instant::now();
    let id = courier
        .dispatcher()
        .submit("later", json!({}), SubmitOptions::new().delay_ms(200))
        .await
        .unwrap();
    wait_for_status(&store, id, JobStatus::Completed).await;
    pool.stop().await;

    let started = started.lock().unwrap().unwrap();
    assert!(started.duration_since(submitted) >= Duration::from_millis(190));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_waits_for_in_flight_handlers() {
    let store = InMemoryJobStore::new();
    let courier = builder(&store)
        .register_fn("slow", JobOptions::new(), |_ctx, _payload| async {
            tokio::time::sleep(Duration::from_millis(150)).await;
            Ok::<(), HandlerError>(())
        })
        .unwrap()
        .build()
        .unwrap();
    let pool = courier.start_pool(pool_config(1)).unwrap();

    let id = courier
        .dispatcher()
        .submit("slow", json!({}), SubmitOptions::new())
        .await
        .unwrap();
    wait_for_status(&store, id, JobStatus::Active).await;

    let report = pool.stop().await;
    assert!(report.clean);
    assert_eq!(report.in_flight, 0);
    assert_eq!(
        store.get(id).await.unwrap().unwrap().status,
        JobStatus::Completed
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_reports_handlers_still_running_after_grace() {
    let store = InMemoryJobStore::new();
    let courier = builder(&store)
        .register_fn("stuck", JobOptions::new(), |_ctx, _payload| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<(), HandlerError>(())
        })
        .unwrap()
        .build()
        .unwrap();
    let pool = courier
        .start_pool(pool_config(2).shutdown_grace(Duration::from_millis(50)))
        .unwrap();

    let id = courier
        .dispatcher()
        .submit("stuck", json!({}), SubmitOptions::new())
        .await
        .unwrap();
    wait_for_status(&store, id, JobStatus::Active).await;

    let report = pool.stop().await;
    assert!(!report.clean);
    assert_eq!(report.in_flight, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stopped_pool_claims_nothing_new() {
    let store = InMemoryJobStore::new();
    let courier = builder(&store)
        .register_fn("noop", JobOptions::new(), |_ctx, _payload| async { Ok::<(), HandlerError>(()) })
        .unwrap()
        .build()
        .unwrap();
    let pool = courier.start_pool(pool_config(2)).unwrap();
    assert!(pool.stop().await.clean);

    let id = courier
        .dispatcher()
        .submit("noop", json!({}), SubmitOptions::new())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        store.get(id).await.unwrap().unwrap().status,
        JobStatus::Pending
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn panicking_handler_is_isolated_and_retried() {
    let store = InMemoryJobStore::new();
    let courier = builder(&store)
        .register_fn("panics", JobOptions::new().max_attempts(2), |_ctx, _payload| async {
            if true {
                panic!("kaboom");
            }
            Ok::<(), HandlerError>(())
        })
        .unwrap()
        .register_fn("fine", JobOptions::new(), |_ctx, _payload| async { Ok::<(), HandlerError>(()) })
        .unwrap()
        .build()
        .unwrap();
    let pool = courier.start_pool(pool_config(2)).unwrap();

    let bad = courier
        .dispatcher()
        .submit("panics", json!({}), SubmitOptions::new())
        .await
        .unwrap();
    let good = courier
        .dispatcher()
        .submit("fine", json!({}), SubmitOptions::new())
        .await
        .unwrap();

    let dead = wait_for_status(&store, bad, JobStatus::Dead).await;
    wait_for_status(&store, good, JobStatus::Completed).await;
    pool.stop().await;

    assert_eq!(dead.attempts, 2);
    assert!(dead.last_error.unwrap().contains("handler panicked: kaboom"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn handler_exceeding_timeout_fails_the_attempt() {
    let store = InMemoryJobStore::new();
    let courier = builder(&store)
        .register_fn(
            "sleepy",
            JobOptions::new()
                .max_attempts(1)
                .timeout(Duration::from_millis(30)),
            |_ctx, _payload| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<(), HandlerError>(())
            },
        )
        .unwrap()
        .build()
        .unwrap();
    let pool = courier.start_pool(pool_config(1)).unwrap();

    let id = courier
        .dispatcher()
        .submit("sleepy", json!({}), SubmitOptions::new())
        .await
        .unwrap();
    let dead = wait_for_status(&store, id, JobStatus::Dead).await;
    assert!(pool.stop().await.clean);

    assert!(dead.last_error.unwrap().contains("timed out"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn job_without_handler_is_dead_lettered() {
    let store = InMemoryJobStore::new();
    let courier: Courier = builder(&store).build().unwrap();
    let pool = courier.start_pool(pool_config(1)).unwrap();

    // written by some other process that knows the type
    let id = store
        .enqueue(NewJob::new("ghost", "default", json!({})))
        .await
        .unwrap();
    let dead = wait_for_status(&store, id, JobStatus::Dead).await;
    pool.stop().await;

    assert_eq!(dead.last_error.as_deref(), Some("unknown job type"));
}

#[derive(Debug)]
struct GiveUpImmediately;

impl RetryPolicy for GiveUpImmediately {
    fn on_failure(&self, _job: &JobRecord, error: &HandlerError) -> RetryDecision {
        RetryDecision::DeadLetter {
            reason: format!("not retrying: {error}"),
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn per_type_policy_overrides_pool_policy() {
    let store = InMemoryJobStore::new();
    let courier = builder(&store)
        .register_fn(
            "strict",
            JobOptions::new()
                .max_attempts(5)
                .retry_policy(Arc::new(GiveUpImmediately)),
            |_ctx, _payload| async { Err::<(), _>(HandlerError::permanent("bad input")) },
        )
        .unwrap()
        .build()
        .unwrap();
    let pool = courier.start_pool(pool_config(1)).unwrap();

    let id = courier
        .dispatcher()
        .submit("strict", json!({}), SubmitOptions::new())
        .await
        .unwrap();
    let dead = wait_for_status(&store, id, JobStatus::Dead).await;
    pool.stop().await;

    assert_eq!(dead.attempts, 1);
}

/// Fails the first `failures` claims with `StoreUnavailable`.
struct FlakyStore {
    inner: InMemoryJobStore,
    failures: AtomicU32,
    ack_failures: AtomicU32,
}

fn take_failure(counter: &AtomicU32) -> Result<()> {
    if counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
        .is_ok()
    {
        return Err(CourierError::StoreUnavailable("connection refused".into()));
    }
    Ok(())
}

#[async_trait]
impl JobStore for FlakyStore {
    async fn enqueue(&self, job: NewJob) -> Result<JobId> {
        self.inner.enqueue(job).await
    }

    async fn claim_next(&self, request: &ClaimRequest) -> Result<Option<JobRecord>> {
        take_failure(&self.failures)?;
        self.inner.claim_next(request).await
    }

    async fn acknowledge(&self, id: JobId) -> Result<()> {
        take_failure(&self.ack_failures)?;
        self.inner.acknowledge(id).await
    }

    async fn release(&self, id: JobId, release: Release) -> Result<()> {
        self.inner.release(id, release).await
    }

    async fn get(&self, id: JobId) -> Result<Option<JobRecord>> {
        self.inner.get(id).await
    }

    async fn counts(&self, queue: &QueueName) -> Result<QueueCounts> {
        self.inner.counts(queue).await
    }

    async fn list_dead(&self, queue: &QueueName) -> Result<Vec<JobRecord>> {
        self.inner.list_dead(queue).await
    }

    async fn purge_completed(&self, queue: &QueueName, older_than: Duration) -> Result<usize> {
        self.inner.purge_completed(queue, older_than).await
    }

    async fn requeue_dead(&self, id: JobId) -> Result<()> {
        self.inner.requeue_dead(id).await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn claim_loop_backs_off_while_store_is_unavailable() {
    let inner = InMemoryJobStore::new();
    let store = Arc::new(FlakyStore {
        inner: inner.clone(),
        failures: AtomicU32::new(3),
        ack_failures: AtomicU32::new(0),
    });
    let courier = CourierBuilder::new()
        .store(store.clone())
        .register_fn("noop", JobOptions::new(), |_ctx, _payload| async { Ok::<(), HandlerError>(()) })
        .unwrap()
        .build()
        .unwrap();
    let pool = courier.start_pool(pool_config(1)).unwrap();

    let id = courier
        .dispatcher()
        .submit("noop", json!({}), SubmitOptions::new())
        .await
        .unwrap();
    wait_for_status(&inner, id, JobStatus::Completed).await;
    pool.stop().await;

    assert_eq!(store.failures.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn acknowledge_is_retried_until_store_recovers() {
    let inner = InMemoryJobStore::new();
    // more failures than a fixed retry count would absorb
    let store = Arc::new(FlakyStore {
        inner: inner.clone(),
        failures: AtomicU32::new(0),
        ack_failures: AtomicU32::new(5),
    });
    let courier = CourierBuilder::new()
        .store(store.clone())
        .register_fn("noop", JobOptions::new(), |_ctx, _payload| async { Ok::<(), HandlerError>(()) })
        .unwrap()
        .build()
        .unwrap();
    let pool = courier.start_pool(pool_config(1)).unwrap();

    let id = courier
        .dispatcher()
        .submit("noop", json!({}), SubmitOptions::new())
        .await
        .unwrap();
    let record = wait_for_status(&inner, id, JobStatus::Completed).await;
    assert!(pool.stop().await.clean);

    assert_eq!(store.ack_failures.load(Ordering::SeqCst), 0);
    assert_eq!(record.attempts, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn requeued_dead_job_runs_again() {
    let store = InMemoryJobStore::new();
    let calls = Arc::new(AtomicU32::new(0));
    let courier = {
        let calls = Arc::clone(&calls);
        builder(&store)
            .register_fn("second-time-lucky", JobOptions::new().max_attempts(1), move |_ctx, _payload| {
                let calls = Arc::clone(&calls);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        return Err(HandlerError::new("first run fails"));
                    }
                    Ok::<(), HandlerError>(())
                }
            })
            .unwrap()
            .build()
            .unwrap()
    };
    let pool = courier.start_pool(pool_config(1)).unwrap();

    let id = courier
        .dispatcher()
        .submit("second-time-lucky", json!({}), SubmitOptions::new())
        .await
        .unwrap();
    wait_for_status(&store, id, JobStatus::Dead).await;

    store.requeue_dead(id).await.unwrap();
    let record = wait_for_status(&store, id, JobStatus::Completed).await;
    pool.stop().await;

    assert_eq!(record.attempts, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn pool_started_directly_from_registry() {
    let store = InMemoryJobStore::new();
    let courier = builder(&store)
        .register_fn("noop", JobOptions::new(), |_ctx, _payload| async { Ok::<(), HandlerError>(()) })
        .unwrap()
        .build()
        .unwrap();

    let pool = WorkerPool::start(
        "default",
        Arc::clone(courier.registry()),
        Arc::new(store.clone()),
        2,
    )
    .unwrap();
    let id = courier
        .dispatcher()
        .submit("noop", json!({}), SubmitOptions::new())
        .await
        .unwrap();
    wait_for_status(&store, id, JobStatus::Completed).await;
    assert!(pool.stop().await.clean);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn per_type_limit_hands_over_without_waiting_for_poll() {
    let store = InMemoryJobStore::new();
    let courier = builder(&store)
        .register_fn("instant", JobOptions::new(), |_ctx, _payload| async {
            Ok::<(), HandlerError>(())
        })
        .unwrap()
        .build()
        .unwrap();
    for n in 0..5 {
        courier
            .dispatcher()
            .submit("instant", json!({ "n": n }), SubmitOptions::new())
            .await
            .unwrap();
    }

    // default poll interval; one slot per type, plenty of pool slots
    let config = PoolConfig::new("default", 10);
    assert_eq!(config.poll_interval, Duration::from_millis(250));
    let started = Instant::now();
    let pool = courier.start_pool(config).unwrap();
    wait_settled(&store, 5).await;
    let elapsed = started.elapsed();
    pool.stop().await;

    assert!(
        elapsed < Duration::from_millis(200),
        "5 instant jobs took {elapsed:?}"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn restart_never_reruns_a_spent_claim() {
    let path = std::env::temp_dir()
        .join(format!("courier-{}", ulid::Ulid::new()))
        .join("jobs.json");
    let id = {
        let store = FileJobStore::open(&path).unwrap();
        let job = NewJob::new("once", "default", json!({})).with_options(EnqueueOptions {
            max_attempts: 1,
            ..EnqueueOptions::default()
        });
        let id = store.enqueue(job).await.unwrap();
        // claimed, then the process goes away before settling
        store
            .claim_next(&ClaimRequest::poll("default"))
            .await
            .unwrap()
            .unwrap();
        id
    };

    let store = FileJobStore::open(&path).unwrap();
    let calls = Arc::new(AtomicU32::new(0));
    let courier = {
        let calls = Arc::clone(&calls);
        CourierBuilder::new()
            .store(Arc::new(store.clone()))
            .register_fn("once", JobOptions::new(), move |_ctx, _payload| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<(), HandlerError>(()) }
            })
            .unwrap()
            .build()
            .unwrap()
    };
    let pool = courier.start_pool(pool_config(1)).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    pool.stop().await;

    let record = store.get(id).await.unwrap().unwrap();
    assert_eq!(record.status, JobStatus::Dead);
    assert!(record.attempts <= record.max_attempts);
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let _ = std::fs::remove_dir_all(path.parent().unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn completed_jobs_are_purged_after_retention() {
    let store = InMemoryJobStore::new();
    let courier = builder(&store)
        .register_fn("noop", JobOptions::new(), |_ctx, _payload| async {
            Ok::<(), HandlerError>(())
        })
        .unwrap()
        .register_fn("doomed", JobOptions::new().max_attempts(1), |_ctx, _payload| async {
            Err::<(), HandlerError>(HandlerError::new("always fails"))
        })
        .unwrap()
        .build()
        .unwrap();
    let pool = courier
        .start_pool(
            pool_config(2)
                .completed_retention(Duration::ZERO)
                .retention_sweep(Duration::from_millis(20)),
        )
        .unwrap();

    let done = courier
        .dispatcher()
        .submit("noop", json!({}), SubmitOptions::new())
        .await
        .unwrap();
    let dead = courier
        .dispatcher()
        .submit("doomed", json!({}), SubmitOptions::new())
        .await
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    while store.get(done).await.unwrap().is_some() {
        assert!(Instant::now() < deadline, "completed job was never purged");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    wait_for_status(&store, dead, JobStatus::Dead).await;
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(pool.stop().await.clean);

    // dead-lettered jobs are kept for inspection
    assert_eq!(store.list_dead(&QueueName::default()).await.unwrap().len(), 1);
}
