mod memory;

use std::sync::Arc;

pub use memory::{Memory, PAGE_SIZE};
use wasmparser::{FuncType, ValType};

use crate::parse::ExportKind;
use crate::parse::func::FuncIdx;
use crate::store::StoreId;
use crate::value::{Val, WasmArgs, WasmResults};
use crate::{Module, Store, interpreter};

/// An item exported by an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extern {
    Func(FuncIdx),
    Memory,
    Global(u32),
    Table(u32),
}

#[derive(Debug, Clone)]
pub(crate) struct Global {
    pub(crate) ty: ValType,
    pub(crate) bits: u64,
}

/// A funcref table. `None` slots are uninitialized.
#[derive(Debug, Clone, Default)]
pub(crate) struct Table {
    pub(crate) elems: Vec<Option<u32>>,
}

/// An instantiated WASM module.
pub struct Instance {
    pub(crate) module: Module,
    pub(crate) memory: Option<Memory>,
    pub(crate) globals: Vec<Global>,
    pub(crate) tables: Vec<Table>,
    /// Passive and active data segments; `None` once dropped.
    pub(crate) data: Vec<Option<Arc<[u8]>>>,
    /// Store index of the host function behind each imported function.
    pub(crate) host_funcs: Vec<usize>,
    /// Store the instance was created in; `host_funcs` index into it.
    pub(crate) store_id: StoreId,
}

impl Instance {
    /// Call an exported function by name (typed API).
    pub fn call<T, A: WasmArgs, R: WasmResults>(
        &mut self,
        store: &mut Store<T>,
        name: &str,
        args: A,
    ) -> Result<R, anyhow::Error> {
        let vals = self.call_dynamic(store, name, &args.to_vals())?;
        R::from_vals(&vals)
    }

    /// Call an exported function by name (dynamic API).
    ///
    /// Arguments are checked against the export's parameter types before
    /// any code runs. Traps surface as [`crate::Trap`] inside the error.
    pub fn call_dynamic<T>(
        &mut self,
        store: &mut Store<T>,
        name: &str,
        args: &[Val],
    ) -> Result<Vec<Val>, anyhow::Error> {
        anyhow::ensure!(
            store.id() == self.store_id,
            "instance called with a store it was not instantiated in"
        );
        let func_idx = self.resolve_export_func_idx(name)?;
        let ty = self.module.func_type(func_idx)?;
        anyhow::ensure!(
            ty.params().len() == args.len(),
            "`{name}` expects {} arguments, got {}",
            ty.params().len(),
            args.len()
        );
        for (i, (arg, &expected)) in args.iter().zip(ty.params()).enumerate() {
            anyhow::ensure!(
                arg.ty() == expected,
                "argument {i} of `{name}` should be {expected:?}, got {:?}",
                arg.ty()
            );
        }

        interpreter::call(self, store, func_idx, args)
    }

    /// Look up an export by name.
    pub fn get_export(&self, name: &str) -> Option<Extern> {
        self.module.get_export(name).map(to_extern)
    }

    /// All exports in declaration order.
    pub fn exports(&self) -> impl Iterator<Item = (&str, Extern)> + '_ {
        self.module
            .exports()
            .iter()
            .map(|export| (export.name.as_str(), to_extern(export)))
    }

    /// Signature of an exported function.
    pub fn get_func_type(&self, name: &str) -> Option<&FuncType> {
        self.module.export_func_type(name)
    }

    /// The instance's linear memory, if it defines one.
    pub fn memory(&self) -> Option<&Memory> {
        self.memory.as_ref()
    }

    pub fn memory_mut(&mut self) -> Option<&mut Memory> {
        self.memory.as_mut()
    }

    /// Get an exported global's value by name.
    pub fn get_global(&self, name: &str) -> Option<Val> {
        let Extern::Global(idx) = self.get_export(name)? else {
            return None;
        };
        let global = self.globals.get(idx as usize)?;
        Val::from_bits(global.bits, global.ty).ok()
    }

    pub(crate) fn resolve_export_func_idx(&self, name: &str) -> Result<FuncIdx, anyhow::Error> {
        match self.get_export(name) {
            Some(Extern::Func(idx)) => Ok(idx),
            Some(other) => anyhow::bail!("export {name} is not a function: {other:?}"),
            None => anyhow::bail!("export {name} not found"),
        }
    }
}

fn to_extern(export: &crate::parse::Export) -> Extern {
    match export.kind {
        ExportKind::Func => Extern::Func(FuncIdx(export.index)),
        ExportKind::Memory => Extern::Memory,
        ExportKind::Global => Extern::Global(export.index),
        ExportKind::Table => Extern::Table(export.index),
    }
}
