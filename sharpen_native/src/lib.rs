//! Run-time half of Sharpen: loads the .NET runtime into a native process on
//! first use and hands generated shims callable pointers to managed exports.

pub mod entry_cache;
pub mod exports;
pub mod failure;
pub mod host_instance;
pub mod runtime;
pub mod runtime_config;

mod string;

pub use entry_cache::{EntryPoint, EntryPointCache, ExportTarget};
pub use failure::{FailureHandler, FailureKind, FailureManager, HostError, NativeFailureCallback};
pub use host_instance::{HostSettings, HostfxrLoader};
pub use runtime::{LoadState, LoadedRuntime, RuntimeContext, RuntimeLoader};
