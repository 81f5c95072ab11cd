//! The process-wide configuration root: executor pools and the model
//! registry.
//!
//! The library itself holds no hidden global mutable state. `Context` is
//! an explicit handle that the embedder constructs once (directly, or
//! wrapped in their own `once_cell`/`lazy_static`-style process-wide
//! static if they prefer a singleton) and threads through to node
//! constructors that need executor access -- an `In` configured `BACK`,
//! or the `exit`-pool deactivation cascade.

use std::any::{Any, TypeId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::error::Result;
use crate::executor::Pool;

/// Process-wide debug-mode flag, set via [`Context::set_debug_mode`].
///
/// This lives outside `Context` itself because the extra structural
/// checks it gates (e.g. `Activator`'s active-count symmetry assertion)
/// run deep inside nodes that hold no back-reference to the `Context`
/// that constructed them -- the same reason the model registry documents
/// itself as effectively a process singleton even though it is modeled
/// as an explicit handle.
static DEBUG_MODE: AtomicBool = AtomicBool::new(false);

/// Whether debug-mode structural checks are currently enabled. Only has
/// an effect in builds with `debug_assertions` on.
pub(crate) fn debug_mode() -> bool {
    DEBUG_MODE.load(Ordering::Relaxed)
}

/// How eagerly a registered model is brought up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleKind {
    /// Activated as part of `activate_model_store`.
    Core,
    /// Activated only on first demand, but still eligible for bulk
    /// teardown on `shutdown_now`.
    LazyCore,
    /// Never auto-activated; must be looked up explicitly.
    Guest,
    /// A plain value with no activation semantics of its own.
    Plain,
}

/// Which of the two executor pools a piece of work belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorKind {
    /// Recompute + observer dispatch for `BACK`-configured sources.
    Work,
    /// Deactivation cascades (parent `decr` chains).
    Exit,
}

struct ModelEntry {
    kind: LifecycleKind,
    factory: Box<dyn Fn(&Context) -> Arc<dyn Any + Send + Sync> + Send + Sync>,
    instance: RwLock<Option<Arc<dyn Any + Send + Sync>>>,
}

/// The configuration root: executor pools plus a lazily-instantiated
/// model registry.
pub struct Context {
    work: Pool,
    exit: Pool,
    models: RwLock<FxHashMap<TypeId, ModelEntry>>,
}

type PoolFactory = Box<dyn FnOnce(usize) -> Pool + Send>;

/// Builds a [`Context`] with non-default executor sizing, or with a
/// wholesale custom executor swapped in for one of the two pool kinds.
pub struct ContextBuilder {
    work_threads: usize,
    exit_threads: usize,
    work_factory: Option<PoolFactory>,
    exit_factory: Option<PoolFactory>,
}

impl Context {
    /// A context with default executor sizing, derived from the number of
    /// available CPUs.
    pub fn new() -> Arc<Context> {
        Context::builder().build()
    }

    /// Start building a context with custom executor sizing.
    pub fn builder() -> ContextBuilder {
        let default_parallelism = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        ContextBuilder {
            work_threads: default_parallelism,
            exit_threads: (default_parallelism / 2).max(1),
            work_factory: None,
            exit_factory: None,
        }
    }

    /// Schedule `job` on the named pool.
    pub fn spawn(&self, kind: ExecutorKind, job: impl FnOnce() + Send + 'static) -> Result<()> {
        match kind {
            ExecutorKind::Work => self.work.spawn(job),
            ExecutorKind::Exit => self.exit.spawn(job),
        }
    }

    /// Register a model factory under type `T`, with the given lifecycle.
    /// Re-registering the same `T` replaces the prior factory and clears
    /// any cached instance.
    pub fn load<T, F>(&self, kind: LifecycleKind, factory: F)
    where
        T: Send + Sync + 'static,
        F: Fn(&Context) -> T + Send + Sync + 'static,
    {
        let entry = ModelEntry {
            kind,
            factory: Box::new(move |ctx| Arc::new(factory(ctx)) as Arc<dyn Any + Send + Sync>),
            instance: RwLock::new(None),
        };
        self.models.write().insert(TypeId::of::<T>(), entry);
    }

    /// Fetch (constructing lazily if needed) the singleton instance
    /// registered for `T`.
    pub fn get<T>(self: &Arc<Self>) -> Option<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        let type_id = TypeId::of::<T>();
        {
            let models = self.models.read();
            let entry = models.get(&type_id)?;
            if let Some(instance) = entry.instance.read().clone() {
                return instance.downcast::<T>().ok();
            }
        }
        // Slow path: construct under the write lock held just long
        // enough to install the instance, not for the factory call
        // itself, so a slow constructor doesn't stall unrelated lookups.
        let constructed = {
            let models = self.models.read();
            let entry = models.get(&type_id)?;
            (entry.factory)(self)
        };
        let mut models = self.models.write();
        let entry = models.get_mut(&type_id)?;
        let mut slot = entry.instance.write();
        if slot.is_none() {
            log::info!("constructed model for {:?}", type_id);
            *slot = Some(constructed);
        }
        slot.clone()?.downcast::<T>().ok()
    }

    /// Activate every registered `Core` (and, transitively, `LazyCore`
    /// once first demanded) model by constructing it eagerly.
    pub fn activate_model_store(self: &Arc<Self>) {
        let core_types: Vec<TypeId> = self
            .models
            .read()
            .iter()
            .filter(|(_, entry)| entry.kind == LifecycleKind::Core)
            .map(|(id, _)| *id)
            .collect();
        for type_id in core_types {
            let constructed = {
                let models = self.models.read();
                match models.get(&type_id) {
                    Some(entry) => (entry.factory)(self),
                    None => continue,
                }
            };
            let models = self.models.read();
            if let Some(entry) = models.get(&type_id) {
                *entry.instance.write() = Some(constructed);
            }
        }
    }

    /// Drop all cached model instances (`Core` and `LazyCore` alike).
    pub fn deactivate_model_store(&self) {
        for entry in self.models.read().values() {
            entry.instance.write().take();
        }
    }

    /// Terminate both executor pools and clear the model registry. Any
    /// in-flight `BACK` dispatch that has not yet been submitted will
    /// observe `ShutdownInProgress`.
    pub fn shutdown_now(&self) {
        self.work.shutdown();
        self.exit.shutdown();
        self.models.write().clear();
    }

    /// Enable or disable the extra `debug_assert!`-guarded structural
    /// checks (e.g. `Activator`'s active-count symmetry assertion). This
    /// is a process-wide setting, not per-`Context`: it does not gate the
    /// `log` crate's own level filtering, and it only has any effect in
    /// builds compiled with `debug_assertions` on.
    pub fn set_debug_mode(&self, enabled: bool) {
        DEBUG_MODE.store(enabled, Ordering::Relaxed);
        log::info!("debug mode {}", if enabled { "enabled" } else { "disabled" });
    }
}

impl ContextBuilder {
    /// Override the `work` pool's thread count.
    pub fn work_threads(mut self, n: usize) -> Self {
        self.work_threads = n;
        self
    }

    /// Override the `exit` pool's thread count.
    pub fn exit_threads(mut self, n: usize) -> Self {
        self.exit_threads = n;
        self
    }

    /// Swap in a custom executor for `kind`, overriding the default
    /// `Pool::new` construction entirely. `factory` receives the thread
    /// count configured via `work_threads`/`exit_threads` (or the
    /// CPU-derived default) as a sizing hint. Only effective before
    /// `build()` is called -- this is how "swap executors before first
    /// use" is enforced, since there is no way to call it on an already-
    /// built `Context`.
    pub fn redefine_default(
        mut self,
        kind: ExecutorKind,
        factory: impl FnOnce(usize) -> Pool + Send + 'static,
    ) -> Self {
        match kind {
            ExecutorKind::Work => self.work_factory = Some(Box::new(factory)),
            ExecutorKind::Exit => self.exit_factory = Some(Box::new(factory)),
        }
        self
    }

    /// Build the context, starting both executor pools.
    pub fn build(self) -> Arc<Context> {
        let work = match self.work_factory {
            Some(factory) => factory(self.work_threads),
            None => Pool::new("work", self.work_threads),
        };
        let exit = match self.exit_factory {
            Some(factory) => factory(self.exit_threads),
            None => Pool::new("exit", self.exit_threads),
        };
        Arc::new(Context {
            work,
            exit,
            models: RwLock::new(FxHashMap::default()),
        })
    }
}
