//! Integration manager
//!
//! Single entry point that wires the endpoint registry, call executor, health
//! monitor, sync scheduler and webhook registry together, owns their
//! background tasks, and exposes the operations the HTTP surface and embedding
//! applications use.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use crate::config::HubConfig;
use crate::endpoints::{
    ApiEndpoint, ApiRequest, ApiResponse, ApiStatus, CallExecutor, EndpointRegistry,
    HealthMonitor, HttpTransport, ProbeOutcome, ReqwestTransport,
};
use crate::error::{IntegrationError, IntegrationResult};
use crate::events::{EventBus, IntegrationEvent};
use crate::metrics::{
    CallMetrics, EndpointSummary, ManagerMetrics, ManagerStatus, SyncMetrics, SyncSummary,
    WebhookSummary,
};
use crate::sync::{HttpSyncRunner, SyncEvent, SyncJob, SyncRunner, SyncScheduler, SyncStatus};
use crate::webhooks::{
    RetentionPolicy, SyncTriggerConsumer, Webhook, WebhookConsumer, WebhookLog, WebhookRegistry,
    SYNC_TRIGGER_CONSUMER,
};

/// Handles of the running background activities.
struct Background {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    started_at: DateTime<Utc>,
}

/// Facade over every integration component.
pub struct IntegrationManager {
    config: HubConfig,
    events: EventBus,
    event_receiver: Mutex<Option<mpsc::Receiver<IntegrationEvent>>>,
    endpoints: Arc<EndpointRegistry>,
    executor: Arc<CallExecutor>,
    monitor: Arc<HealthMonitor>,
    scheduler: Arc<SyncScheduler>,
    webhooks: Arc<WebhookRegistry>,
    background: Mutex<Option<Background>>,
}

impl IntegrationManager {
    /// Build a manager that calls endpoints over `reqwest`.
    pub fn new(config: HubConfig) -> IntegrationResult<Self> {
        Self::with_transport(config, Arc::new(ReqwestTransport::new()))
    }

    /// Build a manager on a custom transport.
    ///
    /// Registers the built-in `http` sync runner and `sync-trigger` webhook
    /// consumer. Nothing runs until [`start`](Self::start).
    pub fn with_transport(config: HubConfig, transport: Arc<dyn HttpTransport>) -> IntegrationResult<Self> {
        config.validate()?;

        let (events, receiver) = EventBus::new(config.events.capacity);
        let endpoints = Arc::new(EndpointRegistry::with_default_timeout(
            events.clone(),
            config.calls.default_timeout(),
        ));
        let executor = Arc::new(
            CallExecutor::new(endpoints.clone(), transport)
                .with_backoff_unit(config.calls.backoff_unit()),
        );
        let monitor = Arc::new(HealthMonitor::new(
            executor.clone(),
            config.monitor.interval(),
            config.monitor.probe_timeout(),
        ));
        let scheduler = Arc::new(
            SyncScheduler::new(&config.sync, events.clone())
                .with_runner(Arc::new(HttpSyncRunner::new(executor.clone()))),
        );
        let webhooks = Arc::new(
            WebhookRegistry::new(RetentionPolicy::from(&config.webhooks.retention), events.clone())
                .with_consumer(
                    SYNC_TRIGGER_CONSUMER,
                    Arc::new(SyncTriggerConsumer::new(scheduler.clone())),
                ),
        );

        Ok(Self {
            config,
            events,
            event_receiver: Mutex::new(Some(receiver)),
            endpoints,
            executor,
            monitor,
            scheduler,
            webhooks,
            background: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Register the endpoints, sync jobs and webhooks declared in the configuration.
    pub async fn load_seeds(&self) -> IntegrationResult<()> {
        for seed in &self.config.endpoints {
            self.endpoints
                .register(seed.to_endpoint(&self.config.calls))
                .await?;
        }
        for seed in &self.config.sync_jobs {
            self.scheduler.create_job(seed.to_job()).await?;
        }
        for seed in &self.config.webhook_registrations {
            self.webhooks.register(seed.to_webhook()).await?;
        }
        tracing::info!(
            endpoints = self.config.endpoints.len(),
            sync_jobs = self.config.sync_jobs.len(),
            webhooks = self.config.webhook_registrations.len(),
            "Loaded configured integrations"
        );
        Ok(())
    }

    /// The receiving end of the event channel. Returns `None` after the first
    /// call, and after [`start`](Self::start) if it was never taken.
    pub async fn take_event_receiver(&self) -> Option<mpsc::Receiver<IntegrationEvent>> {
        self.event_receiver.lock().await.take()
    }

    /// Start the health monitor, sync supervisor and webhook log sweeper.
    ///
    /// # Errors
    /// `AlreadyStarted` if the activities are already running; nothing changes.
    pub async fn start(&self) -> IntegrationResult<()> {
        let mut background = self.background.lock().await;
        if background.is_some() {
            return Err(IntegrationError::AlreadyStarted);
        }

        if self.event_receiver.lock().await.take().is_some() {
            // Nobody listens; a closed channel drops events without warnings.
            tracing::debug!("No event consumer attached, closing event channel");
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let tasks = vec![
            tokio::spawn(self.monitor.clone().run(shutdown_rx.clone())),
            tokio::spawn(self.scheduler.clone().run_supervisor(shutdown_rx.clone())),
            tokio::spawn(
                self.webhooks
                    .clone()
                    .run_sweeper(self.config.webhooks.sweep_interval(), shutdown_rx),
            ),
        ];
        *background = Some(Background {
            shutdown,
            tasks,
            started_at: Utc::now(),
        });

        tracing::info!("Integration manager started");
        Ok(())
    }

    /// Stop the background activities and cancel running sync jobs.
    ///
    /// # Errors
    /// `NotStarted` if [`start`](Self::start) has not been called; nothing changes.
    pub async fn stop(&self) -> IntegrationResult<()> {
        let mut guard = self.background.lock().await;
        let background = guard.take().ok_or(IntegrationError::NotStarted)?;

        let _ = background.shutdown.send(true);
        for result in futures::future::join_all(background.tasks).await {
            if let Err(err) = result {
                tracing::warn!(error = %err, "Background task ended abnormally");
            }
        }
        self.scheduler.stop_all().await;

        tracing::info!("Integration manager stopped");
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.background.lock().await.is_some()
    }

    /// Aggregate counts across every store.
    pub async fn status(&self) -> ManagerStatus {
        let started_at = self
            .background
            .lock()
            .await
            .as_ref()
            .map(|background| background.started_at);
        let uptime_secs = started_at
            .map(|at| (Utc::now() - at).num_seconds().max(0) as u64)
            .unwrap_or(0);

        let endpoints = self.endpoints.list().await;
        let statuses = self.endpoints.statuses().await;
        let counts = self.scheduler.counts().await;
        let webhooks = self.webhooks.list().await;

        ManagerStatus {
            running: started_at.is_some(),
            started_at,
            uptime_secs,
            endpoints: EndpointSummary {
                total: endpoints.len(),
                active: endpoints.iter().filter(|e| e.active).count(),
                available: statuses.iter().filter(|s| s.is_available).count(),
            },
            sync_jobs: SyncSummary {
                total: counts.total,
                active: counts.active,
                running: self.scheduler.active_syncs().await,
            },
            webhooks: WebhookSummary {
                total: webhooks.len(),
                active: webhooks.iter().filter(|w| w.active).count(),
            },
        }
    }

    /// Call, sync and webhook counters.
    pub async fn metrics(&self) -> ManagerMetrics {
        let statuses = self.endpoints.statuses().await;
        let counts = self.scheduler.counts().await;
        ManagerMetrics {
            collected_at: Utc::now(),
            calls: CallMetrics::from_statuses(&statuses),
            sync: SyncMetrics::from_counts(
                &counts,
                self.scheduler.active_syncs().await,
                self.scheduler.max_concurrent(),
            ),
            webhooks: self.webhooks.delivery_metrics().await,
            events_dropped: self.events.dropped_count(),
        }
    }

    // Endpoints

    pub async fn register_endpoint(&self, endpoint: ApiEndpoint) -> IntegrationResult<ApiEndpoint> {
        self.endpoints.register(endpoint).await
    }

    pub async fn update_endpoint(&self, id: &str, endpoint: ApiEndpoint) -> IntegrationResult<ApiEndpoint> {
        self.endpoints.update(id, endpoint).await
    }

    pub async fn deactivate_endpoint(&self, id: &str) -> IntegrationResult<ApiEndpoint> {
        self.endpoints.deactivate(id).await
    }

    pub async fn get_endpoint(&self, id: &str) -> IntegrationResult<ApiEndpoint> {
        self.endpoints.get(id).await
    }

    pub async fn list_endpoints(&self) -> Vec<ApiEndpoint> {
        self.endpoints.list().await
    }

    pub async fn endpoint_status(&self, id: &str) -> IntegrationResult<ApiStatus> {
        self.endpoints.status(id).await
    }

    pub async fn endpoint_statuses(&self) -> Vec<ApiStatus> {
        self.endpoints.statuses().await
    }

    /// Call an endpoint, retries included, within the call deadline.
    pub async fn call_endpoint(&self, id: &str, request: ApiRequest) -> IntegrationResult<ApiResponse> {
        with_deadline(
            self.config.operations.call_deadline(),
            self.executor.call(id, request),
        )
        .await
    }

    /// Probe one endpoint within the per-entity deadline.
    pub async fn check_endpoint(&self, id: &str) -> IntegrationResult<ProbeOutcome> {
        with_deadline(
            self.config.operations.entity_deadline(),
            self.monitor.check_endpoint(id),
        )
        .await
    }

    /// Probe every active endpoint within the ecosystem deadline.
    pub async fn check_all_endpoints(&self) -> IntegrationResult<Vec<ProbeOutcome>> {
        with_deadline(self.config.operations.ecosystem_deadline(), async {
            Ok(self.monitor.check_all().await)
        })
        .await
    }

    // Sync jobs

    pub async fn register_sync_runner(&self, runner: Arc<dyn SyncRunner>) -> String {
        self.scheduler.register_runner(runner).await
    }

    pub async fn create_sync_job(&self, job: SyncJob) -> IntegrationResult<SyncJob> {
        self.scheduler.create_job(job).await
    }

    pub async fn update_sync_job(&self, id: &str, job: SyncJob) -> IntegrationResult<SyncJob> {
        self.scheduler.update_job(id, job).await
    }

    pub async fn deactivate_sync_job(&self, id: &str) -> IntegrationResult<SyncJob> {
        self.scheduler.deactivate_job(id).await
    }

    pub async fn get_sync_job(&self, id: &str) -> IntegrationResult<SyncJob> {
        self.scheduler.get_job(id).await
    }

    pub async fn list_sync_jobs(&self) -> Vec<SyncJob> {
        self.scheduler.list_jobs().await
    }

    pub async fn start_sync(&self, id: &str) -> IntegrationResult<SyncStatus> {
        self.scheduler.start(id).await
    }

    pub async fn stop_sync(&self, id: &str) -> IntegrationResult<SyncStatus> {
        self.scheduler.stop(id).await
    }

    pub async fn sync_status(&self, id: &str) -> IntegrationResult<SyncStatus> {
        self.scheduler.status(id).await
    }

    pub async fn sync_history(&self, id: &str) -> IntegrationResult<Vec<SyncEvent>> {
        self.scheduler.history(id).await
    }

    // Webhooks

    pub async fn register_webhook_consumer(
        &self,
        name: impl Into<String>,
        consumer: Arc<dyn WebhookConsumer>,
    ) -> IntegrationResult<()> {
        self.webhooks.register_consumer(name, consumer).await
    }

    pub async fn register_webhook(&self, webhook: Webhook) -> IntegrationResult<Webhook> {
        self.webhooks.register(webhook).await
    }

    pub async fn deactivate_webhook(&self, id: &str) -> IntegrationResult<Webhook> {
        self.webhooks.deactivate(id).await
    }

    pub async fn get_webhook(&self, id: &str) -> IntegrationResult<Webhook> {
        self.webhooks.get(id).await
    }

    pub async fn list_webhooks(&self) -> Vec<Webhook> {
        self.webhooks.list().await
    }

    pub async fn handle_webhook(&self, id: &str, payload: &[u8]) -> IntegrationResult<WebhookLog> {
        self.webhooks.handle(id, payload).await
    }

    pub async fn webhook_logs(&self, id: &str) -> IntegrationResult<Vec<WebhookLog>> {
        self.webhooks.logs(id).await
    }
}

/// Run `operation`, giving up with `DeadlineExceeded` after `deadline`.
/// Dropping the future cancels whatever request it had in flight.
async fn with_deadline<T, F>(deadline: Duration, operation: F) -> IntegrationResult<T>
where
    F: Future<Output = IntegrationResult<T>>,
{
    match tokio::time::timeout(deadline, operation).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(deadline_secs = deadline.as_secs(), "Operation deadline exceeded");
            Err(IntegrationError::DeadlineExceeded(deadline))
        }
    }
}
