use std::path::{Path, PathBuf};

use sharpen::{ExportTarget, HostError, HostSettings, HostfxrLoader, RuntimeContext};
use sharpen_gen::{GenerateError, GeneratorOptions, ManagedModule, generate};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Debug)]
#[allow(unused)]
enum ExampleError {
    GenerateError(GenerateError),
    HostError(HostError),
    MissingExport(&'static str),
}

const ASSEMBLY_PATH: &str = "./Example.Managed/bin/Debug/net8.0/Example.Managed.dll";
const ENTRY_POINT: &str = "FancyName";

type FancyNameFn = extern "system" fn(i32) -> i32;

fn write_artifacts(module: &ManagedModule, out_dir: &Path) -> Result<(), ExampleError> {
    let options = GeneratorOptions::in_dir(out_dir, module.name());
    let header_name = format!("{}.g.h", module.name());
    let generation = generate(module, &header_name).map_err(ExampleError::GenerateError)?;

    for diagnostic in generation.diagnostics.iter() {
        println!("[Sharpen](Generator): {diagnostic}");
    }

    for (path, text) in [
        (options.header_path, generation.artifact.header),
        (options.source_path, generation.artifact.source),
    ] {
        std::fs::write(&path, text).map_err(|source| {
            ExampleError::GenerateError(GenerateError::Write { path: path.clone(), source })
        })?;
        tracing::info!(path = %path.display(), "wrote generated file");
    }

    Ok(())
}

fn main() -> Result<(), ExampleError> {
    if std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(EnvFilter::from_default_env())
            .init();
    }

    let assembly_path = PathBuf::from(ASSEMBLY_PATH);
    let module = ManagedModule::open(&assembly_path).map_err(ExampleError::GenerateError)?;
    write_artifacts(&module, Path::new("."))?;

    let export = sharpen_gen::scanner::scan(&module)
        .map_err(|source| {
            ExampleError::GenerateError(GenerateError::Metadata {
                path: assembly_path.clone(),
                source,
            })
        })?
        .exports
        .into_iter()
        .find(|export| export.entry_point == ENTRY_POINT)
        .ok_or(ExampleError::MissingExport(ENTRY_POINT))?;

    let assembly_dir = assembly_path.parent().unwrap_or(Path::new("."));
    let host = RuntimeContext::new(
        HostSettings::new(module.name(), assembly_dir),
        Box::new(HostfxrLoader),
    );
    host.set_failure_callback(Some(std::sync::Arc::new(|err: &HostError| {
        println!("[Sharpen](Error): {err}");
    })));

    host.preload_runtime().map_err(ExampleError::HostError)?;

    let type_name = export.assembly_qualified_type(module.name());
    let entry = host
        .resolve(&ExportTarget {
            entry_point: &export.entry_point,
            type_name: &type_name,
            method_name: &export.method_name,
            delegate_type: export.delegate_type(),
        })
        .map_err(ExampleError::HostError)?;

    // SAFETY: MyExport is `static int MyExport(int a)` with the default
    // unmanaged calling convention.
    let fancy_name: FancyNameFn = unsafe { entry.cast() };
    println!("{ENTRY_POINT}(7) = {}", fancy_name(7));

    Ok(())
}
