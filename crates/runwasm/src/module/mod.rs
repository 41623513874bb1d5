use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use wasmparser::FuncType;

use crate::Engine;
use crate::parse::func::{FuncIdx, ParsedFunction};
use crate::parse::{Export, ExportKind, Import, ParsedModule, parse};

/// A parsed and validated WASM module (immutable, cheap to clone).
#[derive(Debug, Clone)]
pub struct Module {
    pub(crate) inner: Arc<ParsedModule>,
}

impl Module {
    /// Parse a WAT string into a module.
    pub fn new(engine: &Engine, wat: &str) -> Result<Self, anyhow::Error> {
        let bytes = wat::parse_str(wat)?;
        Self::from_bytes(engine, &bytes)
    }

    /// Create a module from raw WASM bytes.
    pub fn from_bytes(engine: &Engine, bytes: &[u8]) -> Result<Self, anyhow::Error> {
        let parsed = parse(engine, bytes)?;
        tracing::debug!(
            imports = parsed.imports.len(),
            funcs = parsed.funcs.len(),
            exports = parsed.exports.len(),
            "module compiled"
        );
        Ok(Module {
            inner: Arc::new(parsed),
        })
    }

    /// Read and compile a module from a `.wasm` file.
    pub fn from_file(engine: &Engine, path: impl AsRef<Path>) -> Result<Self, anyhow::Error> {
        let path = path.as_ref();
        let bytes =
            std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_bytes(engine, &bytes)
    }

    /// Imports in declaration order.
    pub fn imports(&self) -> &[Import] {
        &self.inner.imports
    }

    /// Exports in declaration order.
    pub fn exports(&self) -> &[Export] {
        &self.inner.exports
    }

    pub fn get_export(&self, name: &str) -> Option<&Export> {
        let &idx = self.inner.export_index.get(name)?;
        self.inner.exports.get(idx)
    }

    /// Signature of an exported function.
    pub fn export_func_type(&self, name: &str) -> Option<&FuncType> {
        let export = self.get_export(name)?;
        if export.kind != ExportKind::Func {
            return None;
        }
        self.inner.func_type(export.index).ok()
    }

    /// Signature of any function in the index space, imports included.
    pub fn func_type(&self, func_idx: FuncIdx) -> Result<&FuncType, anyhow::Error> {
        self.inner.func_type(func_idx.0)
    }
}

impl ParsedModule {
    pub(crate) fn func_type(&self, func_idx: u32) -> Result<&FuncType, anyhow::Error> {
        let type_idx = *self
            .func_types
            .get(func_idx as usize)
            .ok_or_else(|| anyhow::anyhow!("function {func_idx} not found"))?;
        self.types
            .get(type_idx as usize)
            .ok_or_else(|| anyhow::anyhow!("type index {type_idx} out of bounds"))
    }

    /// Body of a module-defined function; `None` for imports.
    pub(crate) fn local_func(&self, func_idx: u32) -> Option<&ParsedFunction> {
        let local = func_idx.checked_sub(self.num_func_imports)?;
        self.funcs.get(local as usize)
    }
}
