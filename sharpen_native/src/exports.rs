//! C ABI called by generated shims.
//!
//! Generated source passes its compile-time `SHARPEN_ASSEMBLY_NAME` on every
//! call; the first name seen configures the process-wide [`RuntimeContext`].

use std::{
    ffi::{c_char, c_void},
    sync::{Arc, LazyLock, OnceLock},
};

use crate::{
    entry_cache::ExportTarget,
    failure::{FailureKind, FailureManager, HostError, NativeFailureCallback, native_handler},
    host_instance::{HostSettings, HostfxrLoader},
    runtime::RuntimeContext,
    string::{native_str, optional_native_str},
};

static FAILURES: LazyLock<Arc<FailureManager>> = LazyLock::new(|| Arc::new(FailureManager::new()));
static HOST: OnceLock<RuntimeContext> = OnceLock::new();

fn host(assembly_name: &str) -> &'static RuntimeContext {
    let host = HOST.get_or_init(|| {
        RuntimeContext::new(
            HostSettings::for_assembly(assembly_name),
            Box::new(HostfxrLoader),
        )
        .with_failures(FAILURES.clone())
    });

    if host.settings().assembly_name != assembly_name {
        tracing::debug!(
            requested = assembly_name,
            configured = %host.settings().assembly_name,
            "ignoring second assembly name; one managed module per process"
        );
    }

    host
}

/// Registers (or, with null, clears) the process-wide failure callback.
#[unsafe(no_mangle)]
pub extern "C" fn sharpen_set_failure_callback(callback: Option<NativeFailureCallback>) {
    FAILURES.set_handler(callback.map(native_handler));
}

/// Loads the runtime for `assembly_name` ahead of the first export call.
/// Returns 0 on success, otherwise the failure's error code.
///
/// ## Safety
/// `assembly_name` must be null or a NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sharpen_preload_runtime(assembly_name: *const c_char) -> i32 {
    let outcome = unsafe { native_str(assembly_name, FailureKind::LoadRuntime, "assembly name") }
        .inspect_err(|err| FAILURES.report(err))
        .and_then(|assembly_name| host(assembly_name).preload_runtime());

    match outcome {
        Ok(()) => 0,
        Err(err) => err.code(),
    }
}

/// Resolves an export to a callable pointer, loading the runtime on first use.
/// Returns null only after a registered failure callback has returned.
///
/// ## Safety
/// Every argument must be null or a NUL-terminated string; only
/// `delegate_type_name` may legitimately be null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sharpen_resolve_export(
    assembly_name: *const c_char,
    entry_point: *const c_char,
    type_name: *const c_char,
    method_name: *const c_char,
    delegate_type_name: *const c_char,
) -> *mut c_void {
    let outcome = unsafe {
        read_target(
            assembly_name,
            entry_point,
            type_name,
            method_name,
            delegate_type_name,
        )
    }
    .inspect_err(|err| FAILURES.report(err))
    .and_then(|(assembly_name, target)| host(assembly_name).resolve(&target));

    match outcome {
        Ok(entry) => entry.as_ptr(),
        Err(_) => std::ptr::null_mut(),
    }
}

unsafe fn read_target<'a>(
    assembly_name: *const c_char,
    entry_point: *const c_char,
    type_name: *const c_char,
    method_name: *const c_char,
    delegate_type_name: *const c_char,
) -> Result<(&'a str, ExportTarget<'a>), HostError> {
    let phase = FailureKind::ResolveExport;
    unsafe {
        let assembly_name = native_str(assembly_name, FailureKind::LoadRuntime, "assembly name")?;
        let target = ExportTarget {
            entry_point: native_str(entry_point, phase, "entry point")?,
            type_name: native_str(type_name, phase, "type name")?,
            method_name: native_str(method_name, phase, "method name")?,
            delegate_type: optional_native_str(delegate_type_name, phase, "delegate type name")?,
        };
        Ok((assembly_name, target))
    }
}
