use std::{
    ffi::{CString, c_char},
    path::PathBuf,
    sync::Arc,
};

use parking_lot::RwLock;
use thiserror::Error;

/// Phase in which a runtime failure happened. Passed across the C ABI, so the
/// discriminants are fixed.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    LocateRuntime = 1,
    LoadRuntime = 2,
    ResolveExport = 3,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::LocateRuntime => f.write_str("locate"),
            FailureKind::LoadRuntime => f.write_str("load"),
            FailureKind::ResolveExport => f.write_str("resolve"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    #[error("failed to locate hostfxr: {message}")]
    RuntimeNotFound { name: String, message: String },

    #[error("managed assembly `{name}` not found at {}", path.display())]
    AssemblyNotFound { name: String, path: PathBuf },

    #[error("runtime configuration for `{name}` not found at {}", path.display())]
    RuntimeConfigNotFound { name: String, path: PathBuf },

    #[error("runtime configuration {} is malformed: {message}", path.display())]
    RuntimeConfigMalformed {
        name: String,
        path: PathBuf,
        message: String,
    },

    #[error("failed to initialize the runtime for `{name}`: {message}")]
    RuntimeInitFailed { name: String, message: String },

    #[error("entry point `{entry_point}` could not be resolved: {message}")]
    EntryPointNotFound {
        entry_point: String,
        message: String,
    },

    #[error("invalid {what} passed to the host")]
    InvalidArgument {
        phase: FailureKind,
        what: &'static str,
    },
}

impl HostError {
    pub fn kind(&self) -> FailureKind {
        match self {
            HostError::RuntimeNotFound { .. }
            | HostError::AssemblyNotFound { .. }
            | HostError::RuntimeConfigNotFound { .. } => FailureKind::LocateRuntime,
            HostError::RuntimeConfigMalformed { .. } | HostError::RuntimeInitFailed { .. } => {
                FailureKind::LoadRuntime
            }
            HostError::EntryPointNotFound { .. } => FailureKind::ResolveExport,
            HostError::InvalidArgument { phase, .. } => *phase,
        }
    }

    /// Stable numeric code handed to native failure callbacks.
    pub fn code(&self) -> i32 {
        match self {
            HostError::RuntimeNotFound { .. } => 1,
            HostError::AssemblyNotFound { .. } => 2,
            HostError::RuntimeConfigNotFound { .. } => 3,
            HostError::RuntimeConfigMalformed { .. } => 4,
            HostError::RuntimeInitFailed { .. } => 5,
            HostError::EntryPointNotFound { .. } => 6,
            HostError::InvalidArgument { .. } => 7,
        }
    }

    /// The module or entry point the failure is about.
    pub fn subject(&self) -> &str {
        match self {
            HostError::RuntimeNotFound { name, .. }
            | HostError::AssemblyNotFound { name, .. }
            | HostError::RuntimeConfigNotFound { name, .. }
            | HostError::RuntimeConfigMalformed { name, .. }
            | HostError::RuntimeInitFailed { name, .. } => name,
            HostError::EntryPointNotFound { entry_point, .. } => entry_point,
            HostError::InvalidArgument { what, .. } => what,
        }
    }
}

pub type FailureHandler = Arc<dyn Fn(&HostError) + Send + Sync>;

/// Callback signature used by native code, see `sharpen_set_failure_callback`.
pub type NativeFailureCallback = extern "C" fn(FailureKind, i32, *const c_char);

/// Holds the failure callback and decides between reporting and terminating.
#[derive(Default)]
pub struct FailureManager {
    handler: RwLock<Option<FailureHandler>>,
}

impl FailureManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the handler, returning the previous one. `None` restores
    /// terminate-on-failure.
    pub fn set_handler(&self, handler: Option<FailureHandler>) -> Option<FailureHandler> {
        std::mem::replace(&mut *self.handler.write(), handler)
    }

    pub fn has_handler(&self) -> bool {
        self.handler.read().is_some()
    }

    /// Hands `error` to the registered handler. Without one the process is
    /// aborted, since a native caller has nothing to fall back on.
    pub fn report(&self, error: &HostError) {
        tracing::error!(
            phase = %error.kind(),
            code = error.code(),
            subject = error.subject(),
            "{error}"
        );

        // Clone out of the lock so a handler may replace itself.
        let handler = self.handler.read().clone();
        match handler {
            Some(handler) => handler(error),
            None => {
                eprintln!("[Sharpen](Fatal): {error}");
                std::process::abort();
            }
        }
    }
}

pub(crate) fn native_handler(callback: NativeFailureCallback) -> FailureHandler {
    Arc::new(move |error: &HostError| {
        let subject = CString::new(error.subject().replace('\0', "?")).unwrap_or_default();
        callback(error.kind(), error.code(), subject.as_ptr());
    })
}
