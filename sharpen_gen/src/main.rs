//! sharpen-gen: writes a C header and dispatch stubs for a managed module.

use std::{
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Once,
};

use sharpen_gen::{GeneratorOptions, ManagedModule, write_generation};

static TRACING_INIT: Once = Once::new();

/// Enable with `RUST_LOG=sharpen_gen=debug`.
fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::{EnvFilter, fmt, prelude::*};

        if std::env::var("RUST_LOG").is_ok() {
            tracing_subscriber::registry()
                .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
                .with(EnvFilter::from_default_env())
                .init();
        }
    });
}

fn print_usage() {
    eprintln!("Usage: sharpen-gen <assembly.dll> [options]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --header <path>    Header to write (default: <name>.g.h next to the assembly)");
    eprintln!("  --source <path>    Stub source to write (default: <name>.g.c next to the assembly)");
    eprintln!("  --out-dir <dir>    Directory for both files");
    eprintln!("  -h, --help         Show this message");
}

#[derive(Debug, Default)]
struct Args {
    assembly: Option<PathBuf>,
    header: Option<PathBuf>,
    source: Option<PathBuf>,
    out_dir: Option<PathBuf>,
}

fn parse_args(args: &[String]) -> Result<Option<Args>, String> {
    let mut parsed = Args::default();
    let mut i = 0;
    while i < args.len() {
        let arg = args[i].as_str();
        let mut value = |flag: &str| {
            i += 1;
            args.get(i)
                .map(PathBuf::from)
                .ok_or_else(|| format!("{flag} needs a value"))
        };
        match arg {
            "-h" | "--help" => return Ok(None),
            "--header" => parsed.header = Some(value("--header")?),
            "--source" => parsed.source = Some(value("--source")?),
            "--out-dir" => parsed.out_dir = Some(value("--out-dir")?),
            flag if flag.starts_with('-') => return Err(format!("unknown option {flag}")),
            path if parsed.assembly.is_none() => parsed.assembly = Some(PathBuf::from(path)),
            extra => return Err(format!("unexpected argument {extra}")),
        }
        i += 1;
    }
    if parsed.assembly.is_none() {
        return Err("missing assembly path".into());
    }
    Ok(Some(parsed))
}

/// Explicit paths win; the rest are named after the module and placed in
/// `out_dir` or next to the assembly.
fn output_paths(
    header: Option<PathBuf>,
    source: Option<PathBuf>,
    out_dir: Option<&Path>,
    assembly: &Path,
    module_name: &str,
) -> GeneratorOptions {
    let defaults = match out_dir {
        Some(dir) => GeneratorOptions::in_dir(dir, module_name),
        None => GeneratorOptions::beside(assembly, module_name),
    };
    GeneratorOptions {
        header_path: header.unwrap_or(defaults.header_path),
        source_path: source.unwrap_or(defaults.source_path),
    }
}

fn main() -> ExitCode {
    init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let args = match parse_args(&args) {
        Ok(Some(args)) => args,
        Ok(None) => {
            print_usage();
            return ExitCode::SUCCESS;
        }
        Err(message) => {
            eprintln!("error: {message}");
            print_usage();
            return ExitCode::from(2);
        }
    };
    let Some(assembly) = args.assembly else {
        return ExitCode::from(2);
    };

    let module = match ManagedModule::open(&assembly) {
        Ok(module) => module,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::from(1);
        }
    };
    let options = output_paths(
        args.header,
        args.source,
        args.out_dir.as_deref(),
        &assembly,
        module.name(),
    );

    match write_generation(&module, &options) {
        Ok(generation) => {
            for diagnostic in generation.diagnostics.iter() {
                eprintln!("{diagnostic}");
            }
            eprintln!(
                "{}: {} export(s) written",
                assembly.display(),
                generation.exports.len()
            );
            if generation.diagnostics.has_errors() {
                ExitCode::from(1)
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(1)
        }
    }
}
