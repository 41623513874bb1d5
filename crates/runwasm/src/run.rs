//! Load a module image from disk, link it against the host environment,
//! call one export and print its result.

use std::io::{self, Write};
use std::path::PathBuf;

use thiserror::Error;

use crate::engine::EngineConfig;
use crate::instance::Extern;
use crate::{Engine, Instance, Module, Store, Val, host};

pub const DEFAULT_MODULE_PATH: &str = "out.wasm";
pub const DEFAULT_ENTRY: &str = "main";

/// What to run and how.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    /// Module image to load.
    pub path: PathBuf,
    /// Export to call.
    pub entry: String,
    /// Textual arguments, parsed against the export's parameter types.
    pub args: Vec<String>,
    /// After the call, print the exported memory as text up to the
    /// first NUL byte.
    pub dump_memory: bool,
    pub engine: EngineConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_MODULE_PATH),
            entry: DEFAULT_ENTRY.to_string(),
            args: Vec::new(),
            dump_memory: false,
            engine: EngineConfig::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("failed to read module image {}", .path.display())]
    FileNotFoundOrUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to instantiate module")]
    ModuleInstantiation(#[source] anyhow::Error),

    #[error("export `{name}` not found")]
    ExportNotFound { name: String },

    #[error("invalid arguments for `{name}`")]
    InvalidArguments {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("execution trapped")]
    Trap(#[source] anyhow::Error),

    #[error("failed to write output")]
    Output(#[source] io::Error),
}

/// Compile `bytes` and instantiate them against the host environment.
pub fn instantiate(engine: &Engine, bytes: &[u8]) -> Result<(Store<()>, Instance), anyhow::Error> {
    let module = Module::from_bytes(engine, bytes)?;
    let linker = host::host_linker(engine)?;
    let mut store = Store::new(engine, ());
    let instance = linker.instantiate(&mut store, &module)?;
    Ok((store, instance))
}

/// Read, instantiate, call and print. Returns the call's results.
///
/// Stages run strictly in order and the first failure aborts the run, so
/// nothing is written to `out` unless the call succeeds.
pub fn run(config: &RunConfig, out: &mut impl Write) -> Result<Vec<Val>, RunError> {
    let bytes = std::fs::read(&config.path).map_err(|source| {
        RunError::FileNotFoundOrUnreadable {
            path: config.path.clone(),
            source,
        }
    })?;
    tracing::debug!(path = %config.path.display(), bytes = bytes.len(), "read module image");

    let engine = Engine::new(config.engine);
    let (mut store, mut instance) =
        instantiate(&engine, &bytes).map_err(RunError::ModuleInstantiation)?;
    drop(bytes);

    let func_type = instance
        .get_func_type(&config.entry)
        .cloned()
        .ok_or_else(|| RunError::ExportNotFound {
            name: config.entry.clone(),
        })?;
    let args = parse_args(&func_type, &config.args).map_err(|source| {
        RunError::InvalidArguments {
            name: config.entry.clone(),
            source,
        }
    })?;

    tracing::debug!(entry = %config.entry, ?args, "calling export");
    let results = instance
        .call_dynamic(&mut store, &config.entry, &args)
        .map_err(RunError::Trap)?;
    tracing::info!(entry = %config.entry, ?results, "call finished");

    writeln!(out, "{}", render(&config.entry, &results)).map_err(RunError::Output)?;
    if config.dump_memory {
        dump_memory(&instance, out).map_err(RunError::Output)?;
    }
    Ok(results)
}

fn parse_args(func_type: &wasmparser::FuncType, args: &[String]) -> Result<Vec<Val>, anyhow::Error> {
    let params = func_type.params();
    anyhow::ensure!(
        params.len() == args.len(),
        "expected {} arguments, got {}",
        params.len(),
        args.len()
    );
    params
        .iter()
        .zip(args)
        .map(|(&ty, text)| Val::parse(text, ty))
        .collect()
}

/// `"<entry>: <value>"`. No result renders as `undefined` and several
/// render as an array, `[ 1, 0.5 ]`.
pub fn render(entry: &str, results: &[Val]) -> String {
    match results {
        [] => format!("{entry}: undefined"),
        [value] => format!("{entry}: {value}"),
        values => {
            let items = values
                .iter()
                .map(Val::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            format!("{entry}: [ {items} ]")
        }
    }
}

fn dump_memory(instance: &Instance, out: &mut impl Write) -> io::Result<()> {
    let exported = instance
        .exports()
        .any(|(_, item)| item == Extern::Memory);
    match instance.memory() {
        Some(memory) if exported => writeln!(out, "{}", memory.read_c_str()),
        _ => {
            tracing::warn!("module exports no memory to dump");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_one_line_per_call() {
        assert_eq!(render("main", &[Val::I32(7)]), "main: 7");
        assert_eq!(render("main", &[Val::F32(-5.0)]), "main: -5");
        assert_eq!(render("main", &[]), "main: undefined");
        assert_eq!(render("main", &[Val::I64(5)]), "main: 5n");
        assert_eq!(render("main", &[Val::F32(-0.0)]), "main: -0");
        assert_eq!(render("pair", &[Val::I32(1), Val::F64(0.5)]), "pair: [ 1, 0.5 ]");
        assert_eq!(
            render("triple", &[Val::I64(-2), Val::F64(1e21), Val::FuncRef(None)]),
            "triple: [ -2n, 1e+21, null ]"
        );
    }

    #[test]
    fn defaults_match_the_fixed_run() {
        let config = RunConfig::default();
        assert_eq!(config.path, PathBuf::from("out.wasm"));
        assert_eq!(config.entry, "main");
        assert!(config.args.is_empty());
        assert!(!config.dump_memory);
        assert_eq!(config.engine.fuel, None);
    }
}
