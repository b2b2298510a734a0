//! Process-level runtime state: load once, resolve exports, report failures.

use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc, OnceLock,
        atomic::{AtomicU8, Ordering},
    },
};

use parking_lot::{Condvar, Mutex};

use crate::{
    entry_cache::{EntryPoint, EntryPointCache, ExportTarget},
    failure::{FailureHandler, FailureManager, HostError},
    host_instance::HostSettings,
};

/// Locates and initializes a managed runtime for one module.
pub trait RuntimeLoader: Send + Sync {
    fn load(&self, settings: &HostSettings) -> Result<Box<dyn LoadedRuntime>, HostError>;
}

/// A runtime that finished loading and can hand out function pointers.
pub trait LoadedRuntime: Send + Sync {
    /// Exact, case-sensitive lookup of one export.
    fn lookup(&self, target: &ExportTarget<'_>) -> Result<EntryPoint, HostError>;
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Unloaded = 0,
    Loading = 1,
    Ready = 2,
    Failed = 3,
}

impl LoadState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => LoadState::Unloaded,
            1 => LoadState::Loading,
            2 => LoadState::Ready,
            _ => LoadState::Failed,
        }
    }
}

/// The managed runtime as seen from one native binary.
///
/// `Unloaded -> Loading -> Ready | Failed`; both end states are terminal. The
/// C ABI in [`crate::exports`] owns one process-wide instance, tests build
/// their own.
pub struct RuntimeContext {
    settings: HostSettings,
    loader: Box<dyn RuntimeLoader>,

    state: AtomicU8,
    runtime: OnceLock<Box<dyn LoadedRuntime>>,
    failure: OnceLock<HostError>,
    transition: Mutex<()>,
    transitioned: Condvar,

    entry_points: EntryPointCache,
    failures: Arc<FailureManager>,
}

impl RuntimeContext {
    pub fn new(settings: HostSettings, loader: Box<dyn RuntimeLoader>) -> Self {
        Self {
            settings,
            loader,
            state: AtomicU8::new(LoadState::Unloaded as u8),
            runtime: OnceLock::new(),
            failure: OnceLock::new(),
            transition: Mutex::new(()),
            transitioned: Condvar::new(),
            entry_points: EntryPointCache::new(),
            failures: Arc::new(FailureManager::new()),
        }
    }

    /// Shares a failure manager with other owners, e.g. the C ABI which may
    /// receive a callback before any context exists.
    pub fn with_failures(mut self, failures: Arc<FailureManager>) -> Self {
        self.failures = failures;
        self
    }

    pub fn settings(&self) -> &HostSettings {
        &self.settings
    }

    pub fn state(&self) -> LoadState {
        LoadState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn entry_points(&self) -> &EntryPointCache {
        &self.entry_points
    }

    pub fn set_failure_callback(&self, handler: Option<FailureHandler>) {
        self.failures.set_handler(handler);
    }

    /// Loads the runtime on first use. Concurrent callers wait for the one
    /// doing the work and all observe the same outcome; a failed load is never
    /// retried.
    ///
    /// Does not report failures, see [`Self::preload_runtime`].
    pub fn ensure_loaded(&self) -> Result<&dyn LoadedRuntime, HostError> {
        match self.state() {
            LoadState::Ready => return Ok(self.loaded()),
            LoadState::Failed => return Err(self.terminal_failure()),
            LoadState::Unloaded | LoadState::Loading => {}
        }

        let claimed = self
            .state
            .compare_exchange(
                LoadState::Unloaded as u8,
                LoadState::Loading as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();

        if claimed {
            self.load_now();
        } else {
            let mut guard = self.transition.lock();
            while self.state() == LoadState::Loading {
                self.transitioned.wait(&mut guard);
            }
        }

        match self.state() {
            LoadState::Ready => Ok(self.loaded()),
            _ => Err(self.terminal_failure()),
        }
    }

    /// Eagerly loads the runtime so the first export call does not pay for it.
    pub fn preload_runtime(&self) -> Result<(), HostError> {
        self.ensure_loaded()
            .map(|_| ())
            .inspect_err(|err| self.failures.report(err))
    }

    /// Resolves `target`, loading the runtime first if needed. The pointer is
    /// cached under `target.entry_point`.
    pub fn resolve(&self, target: &ExportTarget<'_>) -> Result<EntryPoint, HostError> {
        self.ensure_loaded()
            .and_then(|runtime| {
                self.entry_points
                    .get_or_resolve(target.entry_point, || runtime.lookup(target))
            })
            .inspect_err(|err| self.failures.report(err))
    }

    fn load_now(&self) {
        tracing::debug!(assembly = %self.settings.assembly_name, "loading managed runtime");

        // A panicking loader still ends in `Failed`.
        let outcome = catch_unwind(AssertUnwindSafe(|| self.loader.load(&self.settings)))
            .unwrap_or_else(|_| {
                Err(HostError::RuntimeInitFailed {
                    name: self.settings.assembly_name.clone(),
                    message: "runtime loader panicked".to_owned(),
                })
            });

        // Publish under the lock so waiters cannot miss the wakeup.
        let _guard = self.transition.lock();
        match outcome {
            Ok(runtime) => {
                let _ = self.runtime.set(runtime);
                self.state.store(LoadState::Ready as u8, Ordering::Release);
                tracing::info!(assembly = %self.settings.assembly_name, "managed runtime ready");
            }
            Err(err) => {
                let _ = self.failure.set(err);
                self.state.store(LoadState::Failed as u8, Ordering::Release);
            }
        }
        self.transitioned.notify_all();
    }

    fn loaded(&self) -> &dyn LoadedRuntime {
        match self.runtime.get() {
            Some(runtime) => runtime.as_ref(),
            None => unreachable!("runtime state is Ready but no runtime was published"),
        }
    }

    fn terminal_failure(&self) -> HostError {
        match self.failure.get() {
            Some(err) => err.clone(),
            None => unreachable!("runtime state is Failed but no failure was published"),
        }
    }
}
