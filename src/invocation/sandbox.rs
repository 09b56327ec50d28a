//! # Invocation Sandbox Pool
//!
//! One pool per function. A pool hands out leases on sandboxes: long-lived
//! containers of the function's runtime image in which the runtime shim is
//! executed once per invocation.
//!
//! - Sandboxes are created lazily on first use and reused afterwards (warm start)
//! - At most `max_concurrency` invocations run per function; excess requests
//!   wait on a FIFO-fair semaphore
//! - At most `max_idle` warm sandboxes are retained; idle ones expire after
//!   `idle_ttl`
//! - A sandbox that timed out or crashed is destroyed, never reused
//! - Starting a sandbox is bounded by `engine.create_timeout`
//!
//! Pools are independent: there is no process-wide lock, and a slow function
//! never delays another.
//!
//! ## Rust Concepts Used
//!
//! - `tokio::sync::Semaphore` with owned permits tied to the lease lifetime
//! - `parking_lot::Mutex` for the short, non-async idle queue critical sections
//! - `DashMap` for the live sandbox registry used at shutdown
//! - `Drop` on the lease so an abandoned invocation still cleans up
//! - `TaskTracker` so shutdown waits for background teardown

use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::core::config::{EngineConfig, PoolConfig};
use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::FunctionDescriptor;
use crate::invocation::engine::{ContainerEngine, ContainerId, ExecOutput, SandboxSpec};
use crate::invocation::runtime::RuntimeRegistry;
use crate::observability::metrics;

/// Lifecycle state of a sandbox
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxState {
    /// Created, never used
    Cold,
    /// Idle and ready for reuse
    WarmIdle,
    /// Leased to an invocation
    Busy,
    /// Timed out or crashed; about to be destroyed
    Unhealthy,
}

impl fmt::Display for SandboxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SandboxState::Cold => "cold",
            SandboxState::WarmIdle => "warm-idle",
            SandboxState::Busy => "busy",
            SandboxState::Unhealthy => "unhealthy",
        };
        f.write_str(name)
    }
}

/// Why a sandbox was destroyed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestroyReason {
    Unhealthy,
    IdleExpired,
    ExcessIdle,
    Abandoned,
    Shutdown,
}

impl DestroyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DestroyReason::Unhealthy => "unhealthy",
            DestroyReason::IdleExpired => "idle_expired",
            DestroyReason::ExcessIdle => "excess_idle",
            DestroyReason::Abandoned => "abandoned",
            DestroyReason::Shutdown => "shutdown",
        }
    }
}

/// Handle to one sandbox, owned by its function's pool
#[derive(Debug, Clone)]
pub struct Sandbox {
    pub id: String,
    pub container: ContainerId,
    pub function: String,
    pub state: SandboxState,
    pub created_at: Instant,
    pub last_used: Instant,
    pub invocations: u64,
}

/// Point-in-time pool statistics for one function
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub function: String,
    pub idle: usize,
    pub busy: usize,
    pub created: u64,
    pub destroyed: u64,
    pub invocations: u64,
}

#[derive(Debug, Default)]
struct PoolCounters {
    created: AtomicU64,
    destroyed: AtomicU64,
    invocations: AtomicU64,
}

/// Sandbox pool of a single function
pub struct FunctionPool {
    function: Arc<FunctionDescriptor>,
    template: SandboxSpec,
    shim: Vec<String>,
    engine: Arc<dyn ContainerEngine>,
    permits: Arc<Semaphore>,
    idle: Mutex<VecDeque<Sandbox>>,
    live: DashMap<String, (ContainerId, SandboxState)>,
    max_idle: usize,
    idle_ttl: Duration,
    create_timeout: Duration,
    counters: PoolCounters,
    closed: AtomicBool,
    teardown: TaskTracker,
}

impl fmt::Debug for FunctionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionPool")
            .field("function", &self.function.name)
            .field("stats", &self.stats())
            .finish()
    }
}

impl FunctionPool {
    pub fn new(
        function: Arc<FunctionDescriptor>,
        template: SandboxSpec,
        shim: Vec<String>,
        engine: Arc<dyn ContainerEngine>,
        config: &PoolConfig,
        create_timeout: Duration,
    ) -> Self {
        Self {
            function,
            template,
            shim,
            engine,
            permits: Arc::new(Semaphore::new(config.max_concurrency)),
            idle: Mutex::new(VecDeque::with_capacity(config.max_idle)),
            live: DashMap::new(),
            max_idle: config.max_idle,
            idle_ttl: config.idle_ttl,
            create_timeout,
            counters: PoolCounters::default(),
            closed: AtomicBool::new(false),
            teardown: TaskTracker::new(),
        }
    }

    /// Acquire a lease, waiting in FIFO order when the function is saturated
    pub async fn acquire(self: &Arc<Self>) -> GatewayResult<SandboxLease> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| GatewayError::internal(format!(
                "sandbox pool for '{}' is shut down",
                self.function.name
            )))?;

        let (mut sandbox, cold_start) = match self.take_idle() {
            Some(sandbox) => (sandbox, false),
            None => (self.create_sandbox().await?, true),
        };

        sandbox.state = SandboxState::Busy;
        self.set_state(&sandbox.id, SandboxState::Busy);

        debug!(
            function = %self.function.name,
            sandbox_id = %sandbox.id,
            cold_start,
            "Sandbox leased"
        );

        Ok(SandboxLease {
            sandbox,
            pool: Arc::clone(self),
            _permit: permit,
            cold_start,
            finished: false,
        })
    }

    /// Most recently used idle sandbox that has not expired
    fn take_idle(&self) -> Option<Sandbox> {
        let mut expired = Vec::new();
        let found = {
            let mut idle = self.idle.lock();
            loop {
                match idle.pop_back() {
                    Some(sandbox) if sandbox.last_used.elapsed() >= self.idle_ttl => {
                        expired.push(sandbox)
                    }
                    other => break other,
                }
            }
        };

        for sandbox in expired {
            self.destroy_in_background(&sandbox.id, DestroyReason::IdleExpired);
        }
        found
    }

    async fn create_sandbox(&self) -> GatewayResult<Sandbox> {
        let started = Instant::now();
        // Dropping the create future kills the engine client
        let created = tokio::time::timeout(self.create_timeout, self.engine.create(&self.template))
            .await
            .unwrap_or_else(|_| {
                Err(GatewayError::internal(format!(
                    "sandbox for '{}' did not start within {:?}",
                    self.function.name, self.create_timeout
                )))
            });
        let container = created.map_err(|e| {
            warn!(function = %self.function.name, error = %e, "Failed to create sandbox");
            e
        })?;

        let id = uuid::Uuid::new_v4().simple().to_string()[..12].to_string();
        self.live.insert(id.clone(), (container.clone(), SandboxState::Cold));
        self.counters.created.fetch_add(1, Ordering::Relaxed);
        metrics::sandbox_created(&self.function.name);

        // Shutdown raced with creation
        if self.closed.load(Ordering::SeqCst) {
            self.destroy_in_background(&id, DestroyReason::Shutdown);
            return Err(GatewayError::internal(format!(
                "sandbox pool for '{}' is shut down",
                self.function.name
            )));
        }

        info!(
            function = %self.function.name,
            sandbox_id = %id,
            container = %container,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Sandbox created"
        );

        let now = Instant::now();
        Ok(Sandbox {
            id,
            container,
            function: self.function.name.clone(),
            state: SandboxState::Cold,
            created_at: now,
            last_used: now,
            invocations: 0,
        })
    }

    fn set_state(&self, id: &str, state: SandboxState) {
        if let Some(mut entry) = self.live.get_mut(id) {
            entry.1 = state;
        }
    }

    /// Return a healthy sandbox to the idle queue, or destroy it if the queue is full
    fn return_idle(&self, mut sandbox: Sandbox) {
        if self.closed.load(Ordering::SeqCst) {
            self.destroy_in_background(&sandbox.id, DestroyReason::Shutdown);
            return;
        }

        sandbox.state = SandboxState::WarmIdle;
        sandbox.last_used = Instant::now();
        self.set_state(&sandbox.id, SandboxState::WarmIdle);

        let overflow = {
            let mut idle = self.idle.lock();
            idle.push_back(sandbox);
            if idle.len() > self.max_idle {
                // Oldest first
                idle.pop_front()
            } else {
                None
            }
        };

        if let Some(extra) = overflow {
            self.destroy_in_background(&extra.id, DestroyReason::ExcessIdle);
        }
    }

    /// Remove a sandbox from the live registry and destroy its container
    ///
    /// Idempotent per sandbox id.
    fn destroy_in_background(&self, id: &str, reason: DestroyReason) {
        let Some((_, (container, _))) = self.live.remove(id) else {
            return;
        };
        self.record_destroyed(id, reason);

        if tokio::runtime::Handle::try_current().is_err() {
            warn!(sandbox_id = %id, container = %container, "No runtime available to destroy sandbox");
            return;
        }

        let engine = Arc::clone(&self.engine);
        let function = self.function.name.clone();
        self.teardown.spawn(async move {
            if let Err(e) = engine.destroy(&container).await {
                warn!(function = %function, container = %container, error = %e, "Failed to destroy sandbox");
            }
        });
    }

    fn record_destroyed(&self, id: &str, reason: DestroyReason) {
        self.counters.destroyed.fetch_add(1, Ordering::Relaxed);
        metrics::sandbox_destroyed(&self.function.name, reason.as_str());
        debug!(
            function = %self.function.name,
            sandbox_id = %id,
            reason = reason.as_str(),
            "Sandbox destroyed"
        );
    }

    /// Destroy idle sandboxes unused for longer than the idle TTL
    pub fn reap_idle(&self) -> usize {
        let expired: Vec<Sandbox> = {
            let mut idle = self.idle.lock();
            let (expired, kept): (VecDeque<_>, VecDeque<_>) = idle
                .drain(..)
                .partition(|s| s.last_used.elapsed() >= self.idle_ttl);
            *idle = kept;
            expired.into_iter().collect()
        };

        for sandbox in &expired {
            self.destroy_in_background(&sandbox.id, DestroyReason::IdleExpired);
        }
        expired.len()
    }

    /// Destroy every live sandbox, idle or busy, and reject further leases
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.permits.close();
        self.idle.lock().clear();

        let ids: Vec<String> = self.live.iter().map(|entry| entry.key().clone()).collect();
        let removals = ids.into_iter().filter_map(|id| {
            let (_, (container, _)) = self.live.remove(&id)?;
            self.record_destroyed(&id, DestroyReason::Shutdown);
            let engine = Arc::clone(&self.engine);
            Some(async move {
                if let Err(e) = engine.destroy(&container).await {
                    warn!(container = %container, error = %e, "Failed to destroy sandbox during shutdown");
                }
            })
        });
        join_all(removals.collect::<Vec<_>>()).await;

        self.teardown.close();
        self.teardown.wait().await;
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            function: self.function.name.clone(),
            idle: self.idle.lock().len(),
            busy: self
                .live
                .iter()
                .filter(|entry| entry.value().1 == SandboxState::Busy)
                .count(),
            created: self.counters.created.load(Ordering::Relaxed),
            destroyed: self.counters.destroyed.load(Ordering::Relaxed),
            invocations: self.counters.invocations.load(Ordering::Relaxed),
        }
    }
}

/// A checked-out sandbox together with its concurrency permit
///
/// Finish with [`SandboxLease::release`] (sandbox stays warm) or
/// [`SandboxLease::discard`] (sandbox is destroyed). A lease dropped without
/// either destroys its sandbox in the background.
pub struct SandboxLease {
    sandbox: Sandbox,
    pool: Arc<FunctionPool>,
    _permit: OwnedSemaphorePermit,
    cold_start: bool,
    finished: bool,
}

impl fmt::Debug for SandboxLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SandboxLease")
            .field("sandbox", &self.sandbox)
            .field("cold_start", &self.cold_start)
            .finish()
    }
}

impl SandboxLease {
    pub fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    pub fn cold_start(&self) -> bool {
        self.cold_start
    }

    /// Run the function's shim in the sandbox with `stdin` as input
    pub async fn exec(&self, stdin: Vec<u8>) -> GatewayResult<ExecOutput> {
        self.pool
            .engine
            .exec(&self.sandbox.container, &self.pool.shim, stdin)
            .await
    }

    fn finish(&mut self) -> Sandbox {
        self.finished = true;
        self.pool.counters.invocations.fetch_add(1, Ordering::Relaxed);
        let mut sandbox = self.sandbox.clone();
        sandbox.invocations += 1;
        sandbox
    }

    /// Return the sandbox to the pool as warm-idle
    pub fn release(mut self) {
        let sandbox = self.finish();
        self.pool.return_idle(sandbox);
    }

    /// Mark the sandbox unhealthy and destroy it
    pub fn discard(mut self) {
        let mut sandbox = self.finish();
        sandbox.state = SandboxState::Unhealthy;
        self.pool.set_state(&sandbox.id, SandboxState::Unhealthy);
        self.pool.destroy_in_background(&sandbox.id, DestroyReason::Unhealthy);
    }
}

impl Drop for SandboxLease {
    fn drop(&mut self) {
        if !self.finished {
            warn!(
                function = %self.sandbox.function,
                sandbox_id = %self.sandbox.id,
                "Invocation abandoned; destroying its sandbox"
            );
            self.pool
                .destroy_in_background(&self.sandbox.id, DestroyReason::Abandoned);
        }
    }
}

/// All function pools, built once at startup
pub struct SandboxPool {
    pools: HashMap<String, Arc<FunctionPool>>,
}

impl fmt::Debug for SandboxPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SandboxPool")
            .field("functions", &self.pools.len())
            .finish()
    }
}

impl SandboxPool {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        functions: &[Arc<FunctionDescriptor>],
        runtimes: &RuntimeRegistry,
        engine_config: &EngineConfig,
        config: &PoolConfig,
    ) -> GatewayResult<Self> {
        let mut pools = HashMap::new();

        for function in functions {
            let runtime = runtimes.get(&function.runtime).ok_or_else(|| {
                GatewayError::config(format!(
                    "Function \"{}\" uses unsupported runtime \"{}\"",
                    function.name, function.runtime
                ))
            })?;

            let mut labels = BTreeMap::new();
            labels.insert(engine_config.label.clone(), function.name.clone());

            let template = SandboxSpec {
                function: function.name.clone(),
                image: runtime.image.clone(),
                code_dir: function.code_dir.clone(),
                layer_dir: engine_config.layer_dir.clone(),
                network: engine_config.network.clone(),
                environment: function.environment.clone(),
                labels,
                keepalive: engine_config.keepalive.clone(),
            };
            let shim = runtime.shim_command(&function.handler.to_string());

            pools.insert(
                function.name.clone(),
                Arc::new(FunctionPool::new(
                    Arc::clone(function),
                    template,
                    shim,
                    Arc::clone(&engine),
                    config,
                    engine_config.create_timeout,
                )),
            );
        }

        Ok(Self { pools })
    }

    pub fn get(&self, function: &str) -> Option<&Arc<FunctionPool>> {
        self.pools.get(function)
    }

    /// Acquire a lease on a sandbox of `function`
    pub async fn acquire(&self, function: &str) -> GatewayResult<SandboxLease> {
        let pool = self
            .pools
            .get(function)
            .ok_or_else(|| GatewayError::internal(format!("no sandbox pool for '{}'", function)))?;
        pool.acquire().await
    }

    /// Destroy expired idle sandboxes of every function
    pub fn reap_idle(&self) -> usize {
        self.pools.values().map(|pool| pool.reap_idle()).sum()
    }

    /// Periodically reap idle sandboxes until `token` is cancelled
    pub fn spawn_reaper(self: &Arc<Self>, interval: Duration, token: CancellationToken) -> JoinHandle<()> {
        let pools = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let reaped = pools.reap_idle();
                        if reaped > 0 {
                            debug!(reaped, "Reaped idle sandboxes");
                        }
                    }
                }
            }
        })
    }

    /// Destroy every sandbox of every function
    pub async fn shutdown(&self) {
        join_all(self.pools.values().map(|pool| pool.shutdown())).await;
        let destroyed: u64 = self.stats().iter().map(|s| s.destroyed).sum();
        info!(destroyed, "All sandboxes torn down");
    }

    pub fn stats(&self) -> Vec<PoolStats> {
        let mut stats: Vec<PoolStats> = self.pools.values().map(|pool| pool.stats()).collect();
        stats.sort_by(|a, b| a.function.cmp(&b.function));
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::HandlerRef;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingEngine {
        created: AtomicUsize,
        destroyed: AtomicUsize,
        stall_create: AtomicBool,
    }

    #[async_trait]
    impl ContainerEngine for CountingEngine {
        fn name(&self) -> &str {
            "counting"
        }

        async fn check_available(&self) -> GatewayResult<()> {
            Ok(())
        }

        async fn ensure_image(&self, _image: &str, _pull: bool) -> GatewayResult<()> {
            Ok(())
        }

        async fn ensure_executable(&self, _image: &str, _path: &str) -> GatewayResult<()> {
            Ok(())
        }

        async fn create(&self, _spec: &SandboxSpec) -> GatewayResult<ContainerId> {
            if self.stall_create.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            let n = self.created.fetch_add(1, Ordering::SeqCst);
            Ok(ContainerId(format!("container-{}", n)))
        }

        async fn exec(
            &self,
            _container: &ContainerId,
            _command: &[String],
            stdin: Vec<u8>,
        ) -> GatewayResult<ExecOutput> {
            Ok(ExecOutput {
                exit_code: 0,
                stdout: stdin,
                stderr: Vec::new(),
            })
        }

        async fn destroy(&self, _container: &ContainerId) -> GatewayResult<()> {
            self.destroyed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn pool_with(engine: Arc<CountingEngine>, config: PoolConfig) -> Arc<FunctionPool> {
        pool_with_engine(engine, config, &EngineConfig::default())
    }

    fn pool_with_engine(
        engine: Arc<CountingEngine>,
        config: PoolConfig,
        engine_config: &EngineConfig,
    ) -> Arc<FunctionPool> {
        let function = Arc::new(FunctionDescriptor {
            name: "echo".to_string(),
            handler: HandlerRef::parse("handler.main").unwrap(),
            runtime: "python3.12".to_string(),
            code_dir: PathBuf::from("/srv/echo"),
            routes: vec![],
            environment: BTreeMap::new(),
            timeout: Duration::from_secs(3),
        });
        let pools = SandboxPool::new(
            engine,
            &[function],
            &RuntimeRegistry::builtin(),
            engine_config,
            &config,
        )
        .unwrap();
        Arc::clone(pools.get("echo").unwrap())
    }

    #[tokio::test]
    async fn test_warm_reuse() {
        let engine = Arc::new(CountingEngine::default());
        let pool = pool_with(engine.clone(), PoolConfig::default());

        let lease = pool.acquire().await.unwrap();
        assert!(lease.cold_start());
        let first = lease.sandbox().id.clone();
        lease.release();

        let lease = pool.acquire().await.unwrap();
        assert!(!lease.cold_start());
        assert_eq!(lease.sandbox().id, first);
        assert_eq!(lease.sandbox().invocations, 1);
        lease.release();

        let stats = pool.stats();
        assert_eq!(stats.created, 1);
        assert_eq!(stats.idle, 1);
        assert_eq!(stats.invocations, 2);
        assert_eq!(engine.created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_discard_destroys_sandbox() {
        let engine = Arc::new(CountingEngine::default());
        let pool = pool_with(engine.clone(), PoolConfig::default());

        pool.acquire().await.unwrap().discard();
        let lease = pool.acquire().await.unwrap();
        assert!(lease.cold_start());
        lease.release();

        pool.shutdown().await;
        assert_eq!(engine.created.load(Ordering::SeqCst), 2);
        assert_eq!(engine.destroyed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_excess_idle_destroyed() {
        let engine = Arc::new(CountingEngine::default());
        let config = PoolConfig {
            max_concurrency: 3,
            max_idle: 1,
            ..PoolConfig::default()
        };
        let pool = pool_with(engine, config);

        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        let c = pool.acquire().await.unwrap();
        assert_eq!(pool.stats().busy, 3);
        a.release();
        b.release();
        c.release();

        let stats = pool.stats();
        assert_eq!(stats.idle, 1);
        assert_eq!(stats.destroyed, 2);
        assert_eq!(stats.busy, 0);
    }

    #[tokio::test]
    async fn test_concurrency_ceiling_queues() {
        let engine = Arc::new(CountingEngine::default());
        let config = PoolConfig {
            max_concurrency: 1,
            max_idle: 1,
            ..PoolConfig::default()
        };
        let pool = pool_with(engine, config);

        let lease = pool.acquire().await.unwrap();
        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.acquire().await.map(|l| l.release()) })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        lease.release();
        waiter.await.unwrap().unwrap();
        assert_eq!(pool.stats().created, 1);
    }

    #[tokio::test]
    async fn test_stalled_create_times_out_and_frees_permit() {
        let engine = Arc::new(CountingEngine::default());
        engine.stall_create.store(true, Ordering::SeqCst);
        let engine_config = EngineConfig {
            create_timeout: Duration::from_millis(50),
            ..EngineConfig::default()
        };
        let config = PoolConfig {
            max_concurrency: 1,
            max_idle: 1,
            ..PoolConfig::default()
        };
        let pool = pool_with_engine(engine.clone(), config, &engine_config);

        let started = Instant::now();
        let err = pool.acquire().await.unwrap_err();
        assert!(err.to_string().contains("did not start"));
        assert!(started.elapsed() < Duration::from_secs(1));

        engine.stall_create.store(false, Ordering::SeqCst);
        let lease = tokio::time::timeout(Duration::from_secs(1), pool.acquire())
            .await
            .expect("permit still held by the stalled create")
            .unwrap();
        assert!(lease.cold_start());
        lease.release();
        assert_eq!(pool.stats().created, 1);
    }

    #[tokio::test]
    async fn test_dropped_lease_is_destroyed() {
        let engine = Arc::new(CountingEngine::default());
        let pool = pool_with(engine, PoolConfig::default());

        drop(pool.acquire().await.unwrap());

        let stats = pool.stats();
        assert_eq!(stats.destroyed, 1);
        assert_eq!(stats.idle, 0);
    }

    #[tokio::test]
    async fn test_reap_idle_after_ttl() {
        let engine = Arc::new(CountingEngine::default());
        let config = PoolConfig {
            idle_ttl: Duration::from_millis(20),
            ..PoolConfig::default()
        };
        let pool = pool_with(engine, config);

        pool.acquire().await.unwrap().release();
        assert_eq!(pool.reap_idle(), 0);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(pool.reap_idle(), 1);
        assert_eq!(pool.stats().idle, 0);
    }

    #[tokio::test]
    async fn test_shutdown_destroys_busy_and_rejects_new_leases() {
        let engine = Arc::new(CountingEngine::default());
        let pool = pool_with(engine.clone(), PoolConfig::default());

        let busy = pool.acquire().await.unwrap();
        pool.shutdown().await;
        assert_eq!(engine.destroyed.load(Ordering::SeqCst), 1);

        // Releasing after shutdown must not destroy twice
        busy.release();
        assert_eq!(pool.stats().destroyed, 1);
        assert!(pool.acquire().await.is_err());
    }

    #[test]
    fn test_sandbox_state_display() {
        assert_eq!(SandboxState::WarmIdle.to_string(), "warm-idle");
        assert_eq!(DestroyReason::IdleExpired.as_str(), "idle_expired");
    }
}
