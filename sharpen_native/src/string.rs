use std::{
    ffi::{CStr, c_char},
    path::Path,
    str::FromStr,
};

use netcorehost::pdcstring::PdCString;

use crate::failure::{FailureKind, HostError};

/// Borrows a NUL-terminated UTF-8 argument passed in from native code.
///
/// ## Safety
/// `ptr` must be null or point to a NUL-terminated string that outlives `'a`.
pub(crate) unsafe fn native_str<'a>(
    ptr: *const c_char,
    phase: FailureKind,
    what: &'static str,
) -> Result<&'a str, HostError> {
    if ptr.is_null() {
        return Err(HostError::InvalidArgument { phase, what });
    }

    unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .map_err(|_| HostError::InvalidArgument { phase, what })
}

/// Like [`native_str`], but null means "not provided".
pub(crate) unsafe fn optional_native_str<'a>(
    ptr: *const c_char,
    phase: FailureKind,
    what: &'static str,
) -> Result<Option<&'a str>, HostError> {
    if ptr.is_null() {
        return Ok(None);
    }

    unsafe { native_str(ptr, phase, what) }.map(Some)
}

pub(crate) fn pdcstring_from_path(
    path: &Path,
    phase: FailureKind,
    what: &'static str,
) -> Result<PdCString, HostError> {
    PdCString::from_os_str(path.as_os_str()).map_err(|_| HostError::InvalidArgument { phase, what })
}

pub(crate) fn pdcstring_from_str(
    value: &str,
    phase: FailureKind,
    what: &'static str,
) -> Result<PdCString, HostError> {
    PdCString::from_str(value).map_err(|_| HostError::InvalidArgument { phase, what })
}
