use crate::context::SyncContext;
use crate::error::{Result, SyncError};
use crate::persistentvolumes::PersistentVolumeSyncer;
use crate::poddisruptionbudgets::PodDisruptionBudgetSyncer;
use crate::syncer::{Reconciler, SyncRequest};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use vkube_core::{GroupVersionKind, ResourceEvent, ResourceKey, WatchEventType};
use vkube_store::Cluster;

/// How often an idle-bound run checks whether all work has drained
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Configuration for the sync controller
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Number of concurrent reconcile workers
    pub workers: usize,
    /// Delay before the first retry of a failed key
    pub base_backoff: Duration,
    /// Upper bound for the retry delay
    pub max_backoff: Duration,
    /// Failed passes after which a key is dropped until its next event
    pub max_attempts: u32,
    /// Interval between full resyncs of both clusters
    pub resync_interval: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            base_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_secs(30),
            max_attempts: 15,
            resync_interval: Duration::from_secs(300),
        }
    }
}

impl ControllerConfig {
    /// Delay before retrying a key that already failed `failures` times
    pub fn backoff(&self, failures: u32) -> Duration {
        let factor = 1u32 << failures.min(20);
        self.base_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// A request for one registered reconciler
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct WorkItem {
    reconciler: usize,
    request: SyncRequest,
}

#[derive(Default)]
struct QueueState {
    queue: VecDeque<WorkItem>,
    queued: HashSet<WorkItem>,
    active: HashSet<WorkItem>,
    /// Re-added while active; queued again once the active pass ends
    dirty: HashSet<WorkItem>,
    failures: HashMap<WorkItem, u32>,
    /// Retries waiting on their backoff timer
    pending_retries: usize,
}

/// Coalescing work queue
///
/// A key queued twice is processed once, and a key is never handed to two
/// workers at the same time.
#[derive(Default)]
struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl QueueState {
    /// Queue `item`, returning whether a worker should be woken
    fn push(&mut self, item: WorkItem) -> bool {
        if self.queued.contains(&item) {
            return false;
        }
        if self.active.contains(&item) {
            self.dirty.insert(item);
            return false;
        }
        self.queued.insert(item.clone());
        self.queue.push_back(item);
        true
    }
}

impl WorkQueue {
    fn add(&self, item: WorkItem) {
        let pushed = self.state.lock().push(item);
        if pushed {
            self.notify.notify_one();
        }
    }

    fn try_pop(&self) -> Option<WorkItem> {
        let mut state = self.state.lock();
        let item = state.queue.pop_front()?;
        state.queued.remove(&item);
        state.active.insert(item.clone());
        Some(item)
    }

    /// Wait for the next item, or `None` once `token` is cancelled
    async fn next(&self, token: &CancellationToken) -> Option<WorkItem> {
        loop {
            let notified = self.notify.notified();
            if let Some(item) = self.try_pop() {
                return Some(item);
            }
            tokio::select! {
                _ = token.cancelled() => return None,
                _ = notified => {}
            }
        }
    }

    /// Mark the pass over `item` finished
    fn done(&self, item: &WorkItem) {
        let mut state = self.state.lock();
        state.active.remove(item);
        if state.dirty.remove(item) && state.queued.insert(item.clone()) {
            state.queue.push_back(item.clone());
            drop(state);
            self.notify.notify_one();
        }
    }

    fn forget(&self, item: &WorkItem) {
        self.state.lock().failures.remove(item);
    }

    /// Record a failure and return how many failures preceded it
    fn record_failure(&self, item: &WorkItem) -> u32 {
        let mut state = self.state.lock();
        let failures = state.failures.entry(item.clone()).or_insert(0);
        let previous = *failures;
        *failures += 1;
        previous
    }

    fn retry_scheduled(&self) {
        self.state.lock().pending_retries += 1;
    }

    /// The item is queued before the retry stops counting as pending
    fn retry_fired(&self, item: Option<WorkItem>) {
        let mut state = self.state.lock();
        let pushed = item.is_some_and(|item| state.push(item));
        state.pending_retries -= 1;
        drop(state);
        if pushed {
            self.notify.notify_one();
        }
    }

    fn is_idle(&self) -> bool {
        let state = self.state.lock();
        state.queue.is_empty() && state.active.is_empty() && state.pending_retries == 0
    }
}

struct Inner {
    ctx: SyncContext,
    config: ControllerConfig,
    reconcilers: Vec<Arc<dyn Reconciler>>,
    queue: WorkQueue,
    passes: AtomicU64,
    failures: AtomicU64,
}

impl Inner {
    fn enqueue_all(&self, request: impl Fn(ResourceKey) -> SyncRequest, cluster: &Cluster) {
        for (index, reconciler) in self.reconcilers.iter().enumerate() {
            let gvk = reconciler.gvk();
            let objects = match cluster.list_values(&gvk) {
                Ok(objects) => objects,
                Err(e) => {
                    error!("Failed to list {} in cluster {}: {}", gvk, cluster.name(), e);
                    continue;
                }
            };
            for object in objects {
                if let Some(key) = key_of(&gvk, &object) {
                    self.queue.add(WorkItem {
                        reconciler: index,
                        request: request(key),
                    });
                }
            }
        }
    }

    fn resync(&self) -> Result<()> {
        debug!("Resyncing all synchronized kinds");
        self.enqueue_all(SyncRequest::Virtual, self.ctx.virtual_client()?);
        self.enqueue_all(SyncRequest::Physical, self.ctx.physical_client()?);
        Ok(())
    }

    /// Queue the requests a watch event implies
    fn handle_event(&self, event: ResourceEvent, from_virtual: bool) {
        for (index, reconciler) in self.reconcilers.iter().enumerate() {
            if reconciler.gvk() != event.resource_key.gvk {
                continue;
            }

            let request = if from_virtual {
                SyncRequest::Virtual(event.resource_key.clone())
            } else {
                SyncRequest::Physical(event.resource_key.clone())
            };
            self.queue.add(WorkItem {
                reconciler: index,
                request,
            });

            // A deleted object can no longer be read, so queue its peer directly
            if event.event_type == WatchEventType::Deleted {
                let peer = if from_virtual {
                    reconciler
                        .physical_key_of(&self.ctx, &event.object)
                        .map(SyncRequest::Physical)
                } else {
                    reconciler
                        .virtual_key_of(&self.ctx, &event.object)
                        .map(SyncRequest::Virtual)
                };
                if let Some(request) = peer {
                    self.queue.add(WorkItem {
                        reconciler: index,
                        request,
                    });
                }
            }
        }
    }

    fn handle_recv(
        &self,
        received: std::result::Result<ResourceEvent, RecvError>,
        from_virtual: bool,
    ) -> Result<()> {
        match received {
            Ok(event) => self.handle_event(event, from_virtual),
            Err(RecvError::Lagged(skipped)) => {
                warn!("Watch fell behind by {} events, resyncing", skipped);
                self.resync()?;
            }
            Err(RecvError::Closed) => {
                return Err(SyncError::internal_error("cluster watch channel closed"));
            }
        }
        Ok(())
    }

    async fn worker(self: Arc<Self>, id: usize, token: CancellationToken) {
        debug!("Sync worker {} started", id);
        while let Some(item) = self.queue.next(&token).await {
            let inner = self.clone();
            let pass = item.clone();
            let result = tokio::task::spawn_blocking(move || {
                inner.reconcilers[pass.reconciler].reconcile(&inner.ctx, &pass.request)
            })
            .await
            .unwrap_or_else(|e| {
                Err(SyncError::internal_error(format!(
                    "reconcile task failed: {}",
                    e
                )))
            });
            self.passes.fetch_add(1, Ordering::Relaxed);

            let name = self.reconcilers[item.reconciler].syncer_name();
            match result {
                Ok(outcome) => {
                    debug!(syncer = name, "Synced {}: {}", item.request, outcome);
                    self.queue.forget(&item);
                }
                Err(SyncError::Cancelled) => {
                    self.queue.done(&item);
                    break;
                }
                Err(e) => {
                    self.failures.fetch_add(1, Ordering::Relaxed);
                    self.schedule_retry(&item, &e, &token);
                }
            }
            self.queue.done(&item);
        }
        debug!("Sync worker {} stopped", id);
    }

    fn schedule_retry(self: &Arc<Self>, item: &WorkItem, e: &SyncError, token: &CancellationToken) {
        let name = self.reconcilers[item.reconciler].syncer_name();
        let failures = self.queue.record_failure(item);
        if failures + 1 >= self.config.max_attempts {
            error!(
                syncer = name,
                "Giving up on {} after {} attempts: {}",
                item.request,
                failures + 1,
                e
            );
            self.queue.forget(item);
            return;
        }

        let delay = self.config.backoff(failures);
        if e.is_conflict() {
            debug!(syncer = name, "Conflict syncing {}, retrying in {:?}", item.request, delay);
        } else {
            warn!(
                syncer = name,
                "Failed to sync {}, retrying in {:?}: {}", item.request, delay, e
            );
        }

        self.queue.retry_scheduled();
        let inner = self.clone();
        let item = item.clone();
        let token = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => inner.queue.retry_fired(None),
                _ = tokio::time::sleep(delay) => inner.queue.retry_fired(Some(item)),
            }
        });
    }
}

/// Name and namespace of an object given as JSON
fn key_of(gvk: &GroupVersionKind, object: &Value) -> Option<ResourceKey> {
    let metadata = object.get("metadata")?;
    let name = metadata.get("name")?.as_str()?;
    match metadata.get("namespace").and_then(Value::as_str) {
        Some(namespace) if !namespace.is_empty() => {
            Some(ResourceKey::new(gvk.clone(), namespace, name))
        }
        _ => Some(ResourceKey::cluster_scoped(gvk.clone(), name)),
    }
}

/// Totals of a controller run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub passes: u64,
    pub failures: u64,
}

/// Drives the registered syncers from both clusters' watch feeds
pub struct SyncController {
    ctx: SyncContext,
    config: ControllerConfig,
    reconcilers: Vec<Arc<dyn Reconciler>>,
}

impl SyncController {
    pub fn new(ctx: SyncContext, config: ControllerConfig) -> Self {
        Self {
            ctx,
            config,
            reconcilers: Vec::new(),
        }
    }

    /// A controller with the PersistentVolume and PodDisruptionBudget syncers
    pub fn with_default_syncers(ctx: SyncContext, config: ControllerConfig) -> Self {
        let mut controller = Self::new(ctx, config);
        controller.register(PersistentVolumeSyncer::new());
        controller.register(PodDisruptionBudgetSyncer::new());
        controller
    }

    pub fn register<R: Reconciler + 'static>(&mut self, reconciler: R) -> &mut Self {
        self.reconcilers.push(Arc::new(reconciler));
        self
    }

    /// Run until the context's token is cancelled
    pub async fn run(&self) -> Result<RunSummary> {
        self.drive(false).await
    }

    /// Run until nothing is queued, in flight or waiting for a retry
    pub async fn run_until_idle(&self) -> Result<RunSummary> {
        self.drive(true).await
    }

    async fn drive(&self, stop_when_idle: bool) -> Result<RunSummary> {
        info!(
            "Starting sync controller with {} syncers and {} workers",
            self.reconcilers.len(),
            self.config.workers
        );

        for reconciler in &self.reconcilers {
            reconciler.setup(&self.ctx)?;
        }

        let inner = Arc::new(Inner {
            ctx: self.ctx.clone(),
            config: self.config.clone(),
            reconcilers: self.reconcilers.clone(),
            queue: WorkQueue::default(),
            passes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        });

        // Subscribe before the initial listing so no change falls in between
        let mut virtual_events = self.ctx.virtual_client()?.subscribe();
        let mut physical_events = self.ctx.physical_client()?.subscribe();
        inner.resync()?;

        let token = self.ctx.token().child_token();
        let workers: Vec<JoinHandle<()>> = (0..self.config.workers.max(1))
            .map(|id| tokio::spawn(inner.clone().worker(id, token.clone())))
            .collect();

        let result = self
            .pump(&inner, &mut virtual_events, &mut physical_events, stop_when_idle)
            .await;

        token.cancel();
        for worker in workers {
            if let Err(e) = worker.await {
                error!("Sync worker panicked: {}", e);
            }
        }

        let summary = RunSummary {
            passes: inner.passes.load(Ordering::Relaxed),
            failures: inner.failures.load(Ordering::Relaxed),
        };
        info!(
            "Sync controller stopped after {} passes ({} failed)",
            summary.passes, summary.failures
        );
        result.map(|()| summary)
    }

    async fn pump(
        &self,
        inner: &Arc<Inner>,
        virtual_events: &mut broadcast::Receiver<ResourceEvent>,
        physical_events: &mut broadcast::Receiver<ResourceEvent>,
        stop_when_idle: bool,
    ) -> Result<()> {
        let token = self.ctx.token();
        let mut resync = tokio::time::interval(self.config.resync_interval);
        // Consume the first immediate tick, the initial listing already ran
        resync.tick().await;
        let mut idle_check = tokio::time::interval(IDLE_POLL_INTERVAL);

        loop {
            // Events are drained before idleness is judged
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    info!("Sync controller shutting down");
                    return Ok(());
                }
                received = virtual_events.recv() => inner.handle_recv(received, true)?,
                received = physical_events.recv() => inner.handle_recv(received, false)?,
                _ = resync.tick() => inner.resync()?,
                _ = idle_check.tick(), if stop_when_idle => {
                    if inner.queue.is_idle() {
                        debug!("All work drained");
                        return Ok(());
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{TestEnv, TEST_SUFFIX};
    use crate::translate::HOST_CLUSTER_PERSISTENT_VOLUME_ANNOTATION;
    use k8s_openapi::api::core::v1::{
        ObjectReference, PersistentVolume, PersistentVolumeClaim, PersistentVolumeSpec,
    };
    use k8s_openapi::api::policy::v1::{PodDisruptionBudget, PodDisruptionBudgetSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
    use vkube_core::Resource;

    fn item(name: &str) -> WorkItem {
        WorkItem {
            reconciler: 0,
            request: SyncRequest::Virtual(ResourceKey::cluster_scoped(
                GroupVersionKind::persistent_volume(),
                name,
            )),
        }
    }

    fn pdb(name: &str) -> PodDisruptionBudget {
        PodDisruptionBudget {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("team".to_string()),
                ..Default::default()
            },
            spec: Some(PodDisruptionBudgetSpec {
                max_unavailable: Some(IntOrString::Int(1)),
                ..Default::default()
            }),
            status: None,
        }
    }

    fn controller(env: &TestEnv) -> SyncController {
        SyncController::with_default_syncers(
            env.ctx().clone(),
            ControllerConfig {
                workers: 2,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_queue_coalesces() {
        let queue = WorkQueue::default();
        queue.add(item("a"));
        queue.add(item("a"));
        queue.add(item("b"));

        assert_eq!(queue.try_pop(), Some(item("a")));
        assert_eq!(queue.try_pop(), Some(item("b")));
        assert_eq!(queue.try_pop(), None);
    }

    #[test]
    fn test_queue_defers_active_keys() {
        let queue = WorkQueue::default();
        queue.add(item("a"));
        let active = queue.try_pop().unwrap();

        // Re-added while in flight: not handed out until the pass ends
        queue.add(item("a"));
        assert_eq!(queue.try_pop(), None);
        assert!(!queue.is_idle());

        queue.done(&active);
        assert_eq!(queue.try_pop(), Some(item("a")));
        queue.done(&item("a"));
        assert!(queue.is_idle());
    }

    #[test]
    fn test_queue_counts_failures() {
        let queue = WorkQueue::default();
        assert_eq!(queue.record_failure(&item("a")), 0);
        assert_eq!(queue.record_failure(&item("a")), 1);
        queue.forget(&item("a"));
        assert_eq!(queue.record_failure(&item("a")), 0);

        queue.retry_scheduled();
        assert!(!queue.is_idle());
        queue.retry_fired(None);
        assert!(queue.is_idle());
    }

    #[test]
    fn test_fired_retry_is_never_idle() {
        let queue = WorkQueue::default();
        queue.retry_scheduled();
        queue.retry_fired(Some(item("a")));
        assert!(!queue.is_idle());
        assert_eq!(queue.try_pop(), Some(item("a")));
        queue.done(&item("a"));
        assert!(queue.is_idle());
    }

    #[test]
    fn test_backoff() {
        let config = ControllerConfig {
            base_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(100),
            ..Default::default()
        };
        assert_eq!(config.backoff(0), Duration::from_millis(10));
        assert_eq!(config.backoff(1), Duration::from_millis(20));
        assert_eq!(config.backoff(3), Duration::from_millis(80));
        assert_eq!(config.backoff(4), Duration::from_millis(100));
        assert_eq!(config.backoff(40), Duration::from_millis(100));
    }

    #[test]
    fn test_key_of() {
        let gvk = GroupVersionKind::pod_disruption_budget();
        let value = serde_json::to_value(pdb("web")).unwrap();
        assert_eq!(
            key_of(&gvk, &value),
            Some(ResourceKey::new(gvk.clone(), "team", "web"))
        );
        assert_eq!(key_of(&gvk, &serde_json::json!({})), None);
    }

    #[tokio::test]
    async fn test_run_until_idle_converges() {
        let env = TestEnv::new();
        env.seed_virtual(pdb("web").into());

        let mut claim = PersistentVolumeClaim::default();
        claim.metadata.name = Some("data".to_string());
        claim.metadata.namespace = Some("test".to_string());
        env.seed_virtual(claim.into());

        let host_volume = PersistentVolume {
            metadata: ObjectMeta {
                name: Some("pvc-1234".to_string()),
                ..Default::default()
            },
            spec: Some(PersistentVolumeSpec {
                claim_ref: Some(ObjectReference {
                    name: Some(format!("data-x-test-x-{}", TEST_SUFFIX)),
                    namespace: Some("test".to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            status: None,
        };
        env.seed_physical(host_volume.into());

        let summary = controller(&env).run_until_idle().await.unwrap();
        assert_eq!(summary.failures, 0);

        let budgets = env
            .physical_cluster()
            .list::<PodDisruptionBudget>(Some("test"))
            .unwrap();
        assert_eq!(budgets.len(), 1);
        assert_eq!(budgets[0].name(), "web-x-team-x-suffix");

        let mirrored = env
            .virtual_cluster()
            .list::<PersistentVolume>(None)
            .unwrap();
        assert_eq!(mirrored.len(), 1);
        assert_eq!(
            mirrored[0].annotation(HOST_CLUSTER_PERSISTENT_VOLUME_ANNOTATION),
            Some("pvc-1234")
        );

        // A second run over a converged pair writes nothing
        let writes = env.writes();
        controller(&env).run_until_idle().await.unwrap();
        assert_eq!(env.writes(), writes);
    }

    /// Budget syncer whose first pass loses a write race
    struct ConflictingSyncer {
        inner: PodDisruptionBudgetSyncer,
        calls: AtomicU64,
    }

    impl Reconciler for ConflictingSyncer {
        fn syncer_name(&self) -> &'static str {
            "conflicting"
        }

        fn gvk(&self) -> GroupVersionKind {
            GroupVersionKind::pod_disruption_budget()
        }

        fn setup(&self, ctx: &SyncContext) -> Result<()> {
            Reconciler::setup(&self.inner, ctx)
        }

        fn reconcile(
            &self,
            ctx: &SyncContext,
            request: &SyncRequest,
        ) -> Result<crate::syncer::SyncOutcome> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                if let SyncRequest::Virtual(key) = request {
                    let stale: PodDisruptionBudget = ctx.virtual_client()?.get(key)?;
                    ctx.virtual_client()?.update(stale.clone())?;
                    ctx.virtual_client()?.update(stale)?;
                }
            }
            Reconciler::reconcile(&self.inner, ctx, request)
        }

        fn physical_key_of(&self, ctx: &SyncContext, virtual_obj: &Value) -> Option<ResourceKey> {
            self.inner.physical_key_of(ctx, virtual_obj)
        }

        fn virtual_key_of(&self, ctx: &SyncContext, physical_obj: &Value) -> Option<ResourceKey> {
            self.inner.virtual_key_of(ctx, physical_obj)
        }
    }

    #[tokio::test]
    async fn test_conflict_is_retried() {
        let env = TestEnv::new();
        env.seed_virtual(pdb("web").into());

        let mut controller = SyncController::new(
            env.ctx().clone(),
            ControllerConfig {
                workers: 1,
                ..Default::default()
            },
        );
        controller.register(ConflictingSyncer {
            inner: PodDisruptionBudgetSyncer::new(),
            calls: AtomicU64::new(0),
        });

        let summary = controller.run_until_idle().await.unwrap();
        assert_eq!(summary.failures, 1);
        assert!(summary.passes >= 2);

        let budgets = env
            .physical_cluster()
            .list::<PodDisruptionBudget>(Some("test"))
            .unwrap();
        assert_eq!(budgets.len(), 1);
        assert_eq!(budgets[0].name(), "web-x-team-x-suffix");
    }

    #[tokio::test]
    async fn test_run_follows_watch_events() {
        let env = TestEnv::new();
        let controller = Arc::new(controller(&env));
        let running = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.run().await })
        };

        // Let the controller subscribe before writing
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        env.virtual_cluster().create(pdb("api")).unwrap();

        let physical_key = ResourceKey::new(
            GroupVersionKind::pod_disruption_budget(),
            "test",
            "api-x-team-x-suffix",
        );
        let mut found = false;
        for _ in 0..200 {
            if env
                .physical_cluster()
                .try_get::<PodDisruptionBudget>(&physical_key)
                .unwrap()
                .is_some()
            {
                found = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(found, "physical budget was never created");

        // Deleting the virtual budget garbage-collects the physical one
        env.virtual_cluster()
            .delete::<PodDisruptionBudget>(
                &ResourceKey::new(GroupVersionKind::pod_disruption_budget(), "team", "api"),
                None,
            )
            .unwrap();
        let mut gone = false;
        for _ in 0..200 {
            if env
                .physical_cluster()
                .try_get::<PodDisruptionBudget>(&physical_key)
                .unwrap()
                .is_none()
            {
                gone = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(gone, "physical budget was never deleted");

        env.ctx().token().cancel();
        let summary = running.await.unwrap().unwrap();
        assert!(summary.passes > 0);
    }
}
