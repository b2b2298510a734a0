use std::{ffi::c_void, ptr::NonNull, sync::Arc};

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;

use crate::failure::HostError;

/// A resolved, callable function pointer inside the managed runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryPoint(NonNull<c_void>);

// SAFETY: the pointer refers to runtime-generated code that lives for the rest
// of the process; it is never dereferenced as data.
unsafe impl Send for EntryPoint {}
unsafe impl Sync for EntryPoint {}

impl EntryPoint {
    pub fn new(ptr: *mut c_void) -> Option<Self> {
        NonNull::new(ptr).map(Self)
    }

    pub fn as_ptr(self) -> *mut c_void {
        self.0.as_ptr()
    }

    /// Reinterprets the entry point as a typed function pointer.
    ///
    /// ## Safety
    /// `F` must be a function pointer type matching the managed signature and
    /// calling convention exactly.
    pub unsafe fn cast<F: Copy>(self) -> F {
        assert_eq!(
            std::mem::size_of::<F>(),
            std::mem::size_of::<*mut c_void>(),
            "EntryPoint can only be cast to a function pointer"
        );
        unsafe { std::mem::transmute_copy(&self.0) }
    }
}

/// Everything needed to look up one export inside the loaded runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportTarget<'a> {
    /// Cache key; the exact symbol name native callers use.
    pub entry_point: &'a str,
    /// Assembly-qualified declaring type, e.g. `Ns.Exports, Managed`.
    pub type_name: &'a str,
    pub method_name: &'a str,
    /// Set for exports dispatched through a delegate instead of
    /// `UnmanagedCallersOnly`.
    pub delegate_type: Option<&'a str>,
}

/// Append-only map from entry-point name to resolved pointer.
///
/// Lookups for one name are serialized so the runtime is asked at most once
/// per successful resolution; different names resolve in parallel.
#[derive(Default)]
pub struct EntryPointCache {
    resolved: RwLock<FxHashMap<Box<str>, EntryPoint>>,
    gates: Mutex<FxHashMap<Box<str>, Arc<Mutex<()>>>>,
}

impl EntryPointCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, entry_point: &str) -> Option<EntryPoint> {
        self.resolved.read().get(entry_point).copied()
    }

    pub fn len(&self) -> usize {
        self.resolved.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the cached pointer for `entry_point`, running `resolve` only if
    /// no other caller has published one. Failures are not cached.
    pub fn get_or_resolve<F>(&self, entry_point: &str, resolve: F) -> Result<EntryPoint, HostError>
    where
        F: FnOnce() -> Result<EntryPoint, HostError>,
    {
        if let Some(found) = self.get(entry_point) {
            tracing::trace!(entry_point, "entry point cache hit");
            return Ok(found);
        }

        let gate = self.gate(entry_point);
        let _guard = gate.lock();

        // Another thread may have published while we waited on the gate.
        if let Some(found) = self.get(entry_point) {
            return Ok(found);
        }

        let resolved = resolve()?;
        self.resolved.write().insert(entry_point.into(), resolved);
        tracing::debug!(entry_point, ptr = ?resolved.as_ptr(), "entry point resolved");

        Ok(resolved)
    }

    fn gate(&self, entry_point: &str) -> Arc<Mutex<()>> {
        self.gates
            .lock()
            .entry(entry_point.into())
            .or_default()
            .clone()
    }
}
