use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use runwasm::run::{DEFAULT_ENTRY, DEFAULT_MODULE_PATH};
use runwasm::{
    DEFAULT_MAX_CALL_DEPTH, Engine, EngineConfig, ExportKind, ImportKind, Module, RunConfig, host,
};
use wasmparser::{FuncType, ValType};

#[derive(Parser)]
#[command(
    name = "runwasm",
    about = "Load a WebAssembly module, link it against env.negate and call an export",
    long_about = "Without a subcommand, loads out.wasm from the working directory, \
                  calls `main` and prints `main: <value>`."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Instruction budget per call. Unlimited when omitted.
    #[arg(long, global = true)]
    fuel: Option<u64>,

    /// Maximum nesting of wasm calls before trapping.
    #[arg(long, global = true, default_value_t = DEFAULT_MAX_CALL_DEPTH)]
    max_call_depth: usize,
}

#[derive(Subcommand)]
enum Command {
    /// Call an export and print its result.
    Run {
        /// Module image to load.
        #[arg(default_value = DEFAULT_MODULE_PATH)]
        path: PathBuf,

        /// Export to call.
        #[arg(long, default_value = DEFAULT_ENTRY)]
        invoke: String,

        /// Argument for the export, parsed against its parameter type.
        /// Repeat once per parameter.
        #[arg(long = "arg", allow_hyphen_values = true)]
        args: Vec<String>,

        /// Print the exported memory as text (up to the first NUL) after
        /// the call.
        #[arg(long)]
        dump_memory: bool,
    },

    /// List a module's imports and exports.
    Exports {
        #[arg(default_value = DEFAULT_MODULE_PATH)]
        path: PathBuf,
    },

    /// Write the sample module: `main` returns 42.0, or negate(42.0).
    Emit {
        #[arg(default_value = DEFAULT_MODULE_PATH)]
        path: PathBuf,

        /// Route the result through the `env.negate` import.
        #[arg(long)]
        negate: bool,
    },
}

fn main() -> anyhow::Result<()> {
    init_logging();
    let cli = Cli::parse();
    let engine = EngineConfig {
        fuel: cli.fuel,
        max_call_depth: cli.max_call_depth,
    };

    match cli.command {
        None => run(RunConfig {
            engine,
            ..RunConfig::default()
        }),
        Some(Command::Run {
            path,
            invoke,
            args,
            dump_memory,
        }) => run(RunConfig {
            path,
            entry: invoke,
            args,
            dump_memory,
            engine,
        }),
        Some(Command::Exports { path }) => exports(&path, engine),
        Some(Command::Emit { path, negate }) => emit(&path, negate),
    }
}

/// Logs go to stderr so stdout carries only the result line.
fn init_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let subscriber = fmt::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .compact()
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn run(config: RunConfig) -> anyhow::Result<()> {
    let mut out = std::io::stdout().lock();
    runwasm::run::run(&config, &mut out)?;
    Ok(())
}

fn exports(path: &Path, config: EngineConfig) -> anyhow::Result<()> {
    let engine = Engine::new(config);
    let module = Module::from_file(&engine, path)?;

    for import in module.imports() {
        let kind = match &import.kind {
            ImportKind::Func(ty) => format!("func {}", signature(ty)),
            ImportKind::Table => "table".to_string(),
            ImportKind::Memory => "memory".to_string(),
            ImportKind::Global(ty) => format!("global {}", type_name(ty.content_type)),
        };
        println!("import {}.{}: {kind}", import.module, import.name);
    }
    for export in module.exports() {
        let kind = match export.kind {
            ExportKind::Func => match module.export_func_type(&export.name) {
                Some(ty) => format!("func {}", signature(ty)),
                None => "func".to_string(),
            },
            ExportKind::Memory => "memory".to_string(),
            ExportKind::Global => "global".to_string(),
            ExportKind::Table => "table".to_string(),
        };
        println!("export {}: {kind}", export.name);
    }
    Ok(())
}

fn emit(path: &Path, negate: bool) -> anyhow::Result<()> {
    let bytes = host::sample_module(negate)?;
    std::fs::write(path, &bytes).with_context(|| format!("failed to write {}", path.display()))?;
    tracing::info!(path = %path.display(), bytes = bytes.len(), negate, "wrote sample module");
    println!("wrote {}", path.display());
    Ok(())
}

fn signature(ty: &FuncType) -> String {
    let list = |types: &[ValType]| {
        types
            .iter()
            .map(|&ty| type_name(ty))
            .collect::<Vec<_>>()
            .join(", ")
    };
    format!("({}) -> ({})", list(ty.params()), list(ty.results()))
}

fn type_name(ty: ValType) -> &'static str {
    match ty {
        ValType::I32 => "i32",
        ValType::I64 => "i64",
        ValType::F32 => "f32",
        ValType::F64 => "f64",
        ValType::V128 => "v128",
        ValType::Ref(_) => "ref",
    }
}
