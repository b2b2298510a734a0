use std::{
    ffi::c_void,
    path::{Path, PathBuf},
};

use netcorehost::{hostfxr, nethost, pdcstring::PdCString};

use crate::{
    entry_cache::{EntryPoint, ExportTarget},
    failure::{FailureKind, HostError},
    runtime::{LoadedRuntime, RuntimeLoader},
    runtime_config::RuntimeConfig,
    string::{pdcstring_from_path, pdcstring_from_str},
};

/// Overrides the directory the managed assembly is deployed to.
pub const ASSEMBLY_DIR_ENV: &str = "SHARPEN_ASSEMBLY_DIR";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostSettings {
    /// Managed assembly name without extension, e.g. `Example.Managed`.
    pub assembly_name: String,

    /// Directory holding `<name>.dll` and `<name>.runtimeconfig.json`.
    pub assembly_dir: PathBuf,
}

impl HostSettings {
    pub fn new(assembly_name: impl Into<String>, assembly_dir: impl Into<PathBuf>) -> Self {
        Self {
            assembly_name: assembly_name.into(),
            assembly_dir: assembly_dir.into(),
        }
    }

    /// Settings for a deployed native binary: the assembly sits next to the
    /// executable unless `SHARPEN_ASSEMBLY_DIR` says otherwise.
    pub fn for_assembly(assembly_name: &str) -> Self {
        let assembly_dir = std::env::var_os(ASSEMBLY_DIR_ENV)
            .map(PathBuf::from)
            .or_else(|| {
                std::env::current_exe()
                    .ok()
                    .and_then(|exe| exe.parent().map(Path::to_path_buf))
            })
            .unwrap_or_else(|| PathBuf::from("."));

        Self::new(assembly_name, assembly_dir)
    }

    pub fn assembly_path(&self) -> PathBuf {
        self.assembly_dir.join(format!("{}.dll", self.assembly_name))
    }

    pub fn runtime_config_path(&self) -> PathBuf {
        self.assembly_dir
            .join(format!("{}.runtimeconfig.json", self.assembly_name))
    }

    /// Checks the deployment is complete before touching hostfxr.
    pub fn locate(&self) -> Result<(PathBuf, PathBuf), HostError> {
        let assembly_path = self.assembly_path();
        if !assembly_path.exists() {
            return Err(HostError::AssemblyNotFound {
                name: self.assembly_name.clone(),
                path: assembly_path,
            });
        }

        let runtime_config_path = self.runtime_config_path();
        if !runtime_config_path.exists() {
            return Err(HostError::RuntimeConfigNotFound {
                name: self.assembly_name.clone(),
                path: runtime_config_path,
            });
        }

        Ok((assembly_path, runtime_config_path))
    }
}

/// Loads the .NET runtime through nethost/hostfxr.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostfxrLoader;

impl RuntimeLoader for HostfxrLoader {
    fn load(&self, settings: &HostSettings) -> Result<Box<dyn LoadedRuntime>, HostError> {
        let (assembly_path, runtime_config_path) = settings.locate()?;

        let hostfxr = nethost::load_hostfxr().map_err(|err| HostError::RuntimeNotFound {
            name: settings.assembly_name.clone(),
            message: err.to_string(),
        })?;

        let config = RuntimeConfig::read(&runtime_config_path).map_err(|err| {
            HostError::RuntimeConfigMalformed {
                name: settings.assembly_name.clone(),
                path: runtime_config_path.clone(),
                message: err.to_string(),
            }
        })?;
        for framework in config.frameworks() {
            tracing::debug!(
                framework = %framework.name,
                version = framework.version.as_deref().unwrap_or("*"),
                "runtime configuration requests framework"
            );
        }

        let delegate_loader = initialize_for_runtime_config(&hostfxr, settings, &runtime_config_path)?;
        let assembly_path =
            pdcstring_from_path(&assembly_path, FailureKind::LoadRuntime, "assembly path")?;

        Ok(Box::new(HostfxrRuntime {
            delegate_loader,
            assembly_path,
        }))
    }
}

fn initialize_for_runtime_config(
    hostfxr: &hostfxr::Hostfxr,
    settings: &HostSettings,
    runtime_config_path: &Path,
) -> Result<hostfxr::DelegateLoader, HostError> {
    let init_failed = |message: String| HostError::RuntimeInitFailed {
        name: settings.assembly_name.clone(),
        message,
    };

    let runtime_config_path_pdcstr = pdcstring_from_path(
        runtime_config_path,
        FailureKind::LoadRuntime,
        "runtime configuration path",
    )?;

    let context = hostfxr
        .initialize_for_runtime_config(&runtime_config_path_pdcstr)
        .map_err(|err| init_failed(err.to_string()))?;

    context
        .get_delegate_loader()
        .map_err(|err| init_failed(err.to_string()))
}

/// Managed exports are looked up through this; both the plain and the
/// delegate form go through `load_assembly_and_get_function_pointer`.
type RawManagedFn = extern "system" fn();

struct HostfxrRuntime {
    delegate_loader: hostfxr::DelegateLoader,
    assembly_path: PdCString,
}

// SAFETY: hostfxr's load_assembly_and_get_function_pointer is safe to call from
// any thread once the runtime is initialized; the loader holds no thread-bound
// state.
unsafe impl Send for HostfxrRuntime {}
unsafe impl Sync for HostfxrRuntime {}

impl LoadedRuntime for HostfxrRuntime {
    fn lookup(&self, target: &ExportTarget<'_>) -> Result<EntryPoint, HostError> {
        let not_found = |message: String| HostError::EntryPointNotFound {
            entry_point: target.entry_point.to_owned(),
            message,
        };

        let type_name = pdcstring_from_str(target.type_name, FailureKind::ResolveExport, "type name")?;
        let method_name =
            pdcstring_from_str(target.method_name, FailureKind::ResolveExport, "method name")?;

        let function = match target.delegate_type {
            None => self
                .delegate_loader
                .load_assembly_and_get_function_with_unmanaged_callers_only::<RawManagedFn>(
                    &self.assembly_path,
                    &type_name,
                    &method_name,
                ),
            Some(delegate_type) => {
                let delegate_type =
                    pdcstring_from_str(delegate_type, FailureKind::ResolveExport, "delegate type")?;
                self.delegate_loader
                    .load_assembly_and_get_function::<RawManagedFn>(
                        &self.assembly_path,
                        &type_name,
                        &method_name,
                        &delegate_type,
                    )
            }
        }
        .map_err(|err| not_found(err.to_string()))?;

        let raw: RawManagedFn = *function;
        EntryPoint::new(raw as *mut c_void)
            .ok_or_else(|| not_found("runtime returned a null function pointer".to_owned()))
    }
}
