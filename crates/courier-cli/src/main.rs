//! Webhooks ワーカー
//!
//! `webhooks` キューに 2 つのジョブ型を concurrency 50 で登録する:
//! - `processWebhookJob`: イベントを endpoint ごとのジョブに fan-out
//! - `processIndividualWebhookJob`: 1 つの endpoint へ配送
//!
//! イベントを 1 件投入し、この実行で投入したジョブがすべて終わったら停止する。

use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use courier_core::app::{Dispatcher, PoolConfig, SubmitOptions};
use courier_core::domain::{HandlerError, JobId, QueueName, Result};
use courier_core::impls::TracingEventSink;
use courier_core::observability::init_tracing;
use courier_core::ports::JobStore;
use courier_core::typed::{Handler, Job, JobContext, JobOptions};
use courier_core::{CourierBuilder, CourierConfig};

const WEBHOOKS_QUEUE: &str = "webhooks";
const WEBHOOKS_CONCURRENCY: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ProcessWebhook {
    event: String,
    endpoints: Vec<String>,
}

impl Job for ProcessWebhook {
    const TYPE: &'static str = "processWebhookJob";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ProcessIndividualWebhook {
    event: String,
    endpoint: String,
}

impl Job for ProcessIndividualWebhook {
    const TYPE: &'static str = "processIndividualWebhookJob";
}

/// Set once the courier is built; handlers run only after that.
type DispatcherCell = Arc<OnceLock<Dispatcher>>;

/// Ids of the delivery jobs submitted by fan-out.
type Submitted = Arc<Mutex<Vec<JobId>>>;

struct FanOutHandler {
    dispatcher: DispatcherCell,
    submitted: Submitted,
}

#[async_trait]
impl Handler<ProcessWebhook> for FanOutHandler {
    async fn handle(
        &self,
        ctx: JobContext,
        job: ProcessWebhook,
    ) -> std::result::Result<(), HandlerError> {
        let dispatcher = self
            .dispatcher
            .get()
            .ok_or_else(|| HandlerError::new("dispatcher not initialised"))?;

        for endpoint in &job.endpoints {
            let delivery = ProcessIndividualWebhook {
                event: job.event.clone(),
                endpoint: endpoint.clone(),
            };
            let id = dispatcher
                .submit_job(&delivery, SubmitOptions::new())
                .await
                .map_err(|e| HandlerError::new(e.to_string()))?;
            if let Ok(mut submitted) = self.submitted.lock() {
                submitted.push(id);
            }
        }
        tracing::info!(id = %ctx.id, event = %job.event, endpoints = job.endpoints.len(), "webhook fanned out");
        Ok(())
    }
}

/// Stand-in for the HTTP delivery. Endpoints with "flaky" in the host fail
/// their first attempt.
struct DeliveryHandler;

#[async_trait]
impl Handler<ProcessIndividualWebhook> for DeliveryHandler {
    async fn handle(
        &self,
        ctx: JobContext,
        job: ProcessIndividualWebhook,
    ) -> std::result::Result<(), HandlerError> {
        tokio::time::sleep(Duration::from_millis(20)).await;
        if job.endpoint.contains("flaky") && ctx.attempt == 1 {
            return Err(HandlerError::new(format!("{} responded 503", job.endpoint)));
        }
        tracing::info!(id = %ctx.id, endpoint = %job.endpoint, attempt = ctx.attempt, "webhook delivered");
        Ok(())
    }
}

/// Whether every job in `ids` reached a terminal status.
async fn all_finished(store: &dyn JobStore, ids: &[JobId]) -> Result<bool> {
    for id in ids {
        match store.get(*id).await? {
            Some(record) if record.status.is_terminal() => {}
            _ => return Ok(false),
        }
    }
    Ok(true)
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = CourierConfig::from_env()?;
    init_tracing(config.log_format);

    let dispatcher_cell: DispatcherCell = Arc::new(OnceLock::new());
    let submitted: Submitted = Arc::default();
    let options = JobOptions::new()
        .queue(WEBHOOKS_QUEUE)
        .concurrency(WEBHOOKS_CONCURRENCY);

    let courier = CourierBuilder::from_config(&config)?
        .register_job::<ProcessWebhook, _>(
            FanOutHandler {
                dispatcher: Arc::clone(&dispatcher_cell),
                submitted: Arc::clone(&submitted),
            },
            options.clone(),
        )?
        .register_job::<ProcessIndividualWebhook, _>(DeliveryHandler, options)?
        .expect_job_types(&[ProcessWebhook::TYPE, ProcessIndividualWebhook::TYPE])
        .event_sink(Arc::new(TracingEventSink))
        .build()?;
    let _ = dispatcher_cell.set(courier.dispatcher().clone());

    let pool = courier.start_pool(PoolConfig {
        queue: QueueName::new(WEBHOOKS_QUEUE),
        concurrency: WEBHOOKS_CONCURRENCY,
        ..config.pool_config()
    })?;

    let event = ProcessWebhook {
        event: "document.updated".to_string(),
        endpoints: vec![
            "https://a.example.com/hook".to_string(),
            "https://flaky.example.com/hook".to_string(),
            "https://c.example.com/hook".to_string(),
        ],
    };
    let id = courier
        .dispatcher()
        .submit_job(&event, SubmitOptions::new())
        .await?;
    tracing::info!(%id, "webhook event submitted");

    // only this run's jobs count; a reused store file may hold older ones
    let deadline = tokio::time::Instant::now() + Duration::from_secs(60);
    loop {
        let mut ids = vec![id];
        if let Ok(deliveries) = submitted.lock() {
            ids.extend(deliveries.iter().copied());
        }
        if ids.len() > event.endpoints.len()
            && all_finished(courier.store().as_ref(), &ids).await?
        {
            tracing::info!(jobs = ids.len(), "all submitted jobs finished");
            break;
        }
        if tokio::time::Instant::now() >= deadline {
            let counts = courier.store().counts(&QueueName::new(WEBHOOKS_QUEUE)).await?;
            tracing::warn!(?counts, "gave up waiting for submitted jobs");
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let report = pool.stop().await;
    tracing::info!(clean = report.clean, in_flight = report.in_flight, "worker pool stopped");
    Ok(())
}
