//! Build-time half of sharpen: reads a managed module's metadata, finds its
//! exported methods and writes a C header plus dispatch stubs for them.

use std::path::{Path, PathBuf};

pub mod assembly;
pub mod binding;
pub mod emit;
pub mod error;
pub mod managed_type;
pub mod meta_info;
pub mod metadata;
pub mod scanner;

pub use assembly::ManagedModule;
pub use binding::{ExportBinding, TypeBinding, TypeResolver};
pub use emit::GeneratedArtifact;
pub use error::{Diagnostic, Diagnostics, GenerateError, Severity};
pub use managed_type::ManagedType;
pub use scanner::{CallingConvention, ExportDescriptor, ExportKind};

/// Where the generated files go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorOptions {
    pub header_path: PathBuf,
    pub source_path: PathBuf,
}

impl GeneratorOptions {
    /// `<dir>/<module>.g.h` and `<dir>/<module>.g.c`.
    pub fn in_dir(dir: &Path, module_name: &str) -> Self {
        Self {
            header_path: dir.join(format!("{module_name}.g.h")),
            source_path: dir.join(format!("{module_name}.g.c")),
        }
    }

    /// Default placement: next to the assembly.
    pub fn beside(assembly: &Path, module_name: &str) -> Self {
        let dir = assembly.parent().unwrap_or_else(|| Path::new("."));
        Self::in_dir(dir, module_name)
    }
}

/// Result of one generator run.
#[derive(Debug, Clone)]
pub struct Generation {
    pub artifact: GeneratedArtifact,
    pub exports: Vec<ExportBinding>,
    pub diagnostics: Diagnostics,
}

/// Scans, binds and emits every export of `module`.
///
/// Exports with problems are left out of the artifact and reported in
/// [`Generation::diagnostics`].
pub fn generate(module: &ManagedModule, header_name: &str) -> Result<Generation, GenerateError> {
    let scanned = scanner::scan(module).map_err(|source| GenerateError::Metadata {
        path: module
            .path()
            .map_or_else(|| PathBuf::from(module.name()), Path::to_owned),
        source,
    })?;

    let mut diagnostics = scanned.diagnostics;
    let mut resolver = TypeResolver::new(module);
    let mut exports = Vec::with_capacity(scanned.exports.len());
    for export in &scanned.exports {
        match resolver.bind_export(export) {
            Ok(binding) => exports.push(binding),
            Err(err) => diagnostics.error(Some(&export.entry_point), err.to_string()),
        }
    }

    tracing::info!(
        module = %module.name(),
        exports = exports.len(),
        diagnostics = diagnostics.len(),
        "generated native exports"
    );

    Ok(Generation {
        artifact: emit::emit(module.name(), header_name, &scanned.includes, &exports),
        exports,
        diagnostics,
    })
}

/// Opens `assembly`, generates, and writes both files.
pub fn generate_to_files(
    assembly: &Path,
    options: Option<GeneratorOptions>,
) -> Result<Generation, GenerateError> {
    let module = ManagedModule::open(assembly)?;
    let options = options.unwrap_or_else(|| GeneratorOptions::beside(assembly, module.name()));
    write_generation(&module, &options)
}

/// Generates for an already opened `module` and writes both files.
pub fn write_generation(
    module: &ManagedModule,
    options: &GeneratorOptions,
) -> Result<Generation, GenerateError> {
    let header_name = options
        .header_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| format!("{}.g.h", module.name()));

    let generation = generate(module, &header_name)?;

    for (path, text) in [
        (&options.header_path, &generation.artifact.header),
        (&options.source_path, &generation.artifact.source),
    ] {
        std::fs::write(path, text).map_err(|source| GenerateError::Write {
            path: path.clone(),
            source,
        })?;
        tracing::info!(path = %path.display(), "wrote");
    }

    Ok(generation)
}
