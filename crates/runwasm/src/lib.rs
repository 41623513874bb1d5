mod engine;
pub mod host;
mod instance;
mod interpreter;
mod linker;
mod module;
mod parse;
pub mod run;
mod store;
mod value;

pub use engine::{DEFAULT_MAX_CALL_DEPTH, Engine, EngineConfig};
pub use instance::{Extern, Instance, Memory, PAGE_SIZE};
pub use interpreter::Trap;
pub use linker::{LinkError, Linker};
pub use module::Module;
pub use parse::func::FuncIdx;
pub use parse::{Export, ExportKind, Import, ImportKind};
pub use run::{RunConfig, RunError};
pub use store::{Caller, HostFunc, Store};
pub use value::{Val, WasmArgs, WasmResults, WasmVal};
