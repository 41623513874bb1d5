//! Host import registry and module instantiation.
//!
//! The [`Linker`] collects host functions keyed by `(module, name)` and
//! resolves a module's imports against them. Instantiation then builds the
//! instance state (memory, globals, tables, segments) and runs the start
//! function.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use wasmparser::{FuncType, ValType};

use crate::instance::{Global, Memory, Table};
use crate::parse::func::FuncIdx;
use crate::parse::{ConstOp, ElemMode, ImportKind};
use crate::store::{Caller, HostFunc};
use crate::value::{NULL_REF, Val};
use crate::{Engine, Instance, Module, Store, interpreter};

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("unresolved import: {module}.{name}")]
    UnresolvedImport { module: String, name: String },

    #[error("type mismatch (import {module}.{name}): expected {expected}, found {found}")]
    TypeMismatch {
        module: String,
        name: String,
        expected: String,
        found: String,
    },

    #[error("unsupported import: {module}.{name} is a {kind} import")]
    UnsupportedImport {
        module: String,
        name: String,
        kind: &'static str,
    },

    #[error("element segment initialization out of bounds")]
    ElemOutOfBounds,

    #[error("data segment initialization out of bounds")]
    DataOutOfBounds,

    #[error("trap while running start function")]
    StartTrap(#[source] anyhow::Error),
}

/// Signatures a host function accepts.
enum HostSignature {
    Exact(FuncType),
    /// Any `(t) -> t` with `t` one of the four numeric types.
    UnaryNumeric,
}

impl HostSignature {
    /// Check an import's declared type, returning the accepted signature
    /// as text on mismatch.
    fn check(&self, ty: &FuncType) -> Result<(), String> {
        match self {
            HostSignature::Exact(expected) if expected == ty => Ok(()),
            HostSignature::Exact(expected) => Err(describe(expected)),
            HostSignature::UnaryNumeric => {
                let numeric = matches!(
                    ty.params(),
                    [ValType::I32] | [ValType::I64] | [ValType::F32] | [ValType::F64]
                );
                if numeric && ty.params() == ty.results() {
                    Ok(())
                } else {
                    Err("(t) -> t for t in i32, i64, f32, f64".to_string())
                }
            }
        }
    }
}

fn describe(ty: &FuncType) -> String {
    format!("{:?} -> {:?}", ty.params(), ty.results())
}

struct Definition<T> {
    signature: HostSignature,
    func: Arc<HostFunc<T>>,
}

/// A named host-function registry used to instantiate modules.
///
/// # Examples
///
/// ```ignore
/// let mut linker = Linker::new(&engine);
/// linker.func_unary_numeric("env", "negate", |_, v| Ok(v))?;
/// let instance = linker.instantiate(&mut store, &module)?;
/// ```
pub struct Linker<T> {
    defs: HashMap<(String, String), Definition<T>>,
}

impl<T: 'static> Linker<T> {
    pub fn new(_engine: &Engine) -> Self {
        Linker {
            defs: HashMap::new(),
        }
    }

    /// Register a host function with an exact signature.
    pub fn func_new<F>(
        &mut self,
        module: &str,
        name: &str,
        ty: FuncType,
        func: F,
    ) -> Result<&mut Self, anyhow::Error>
    where
        F: Fn(Caller<'_, T>, &[Val]) -> Result<Vec<Val>, anyhow::Error> + Send + Sync + 'static,
    {
        self.define(module, name, HostSignature::Exact(ty), host_func(func))
    }

    /// Register a host function that links against any `(t) -> t` import
    /// for numeric `t`. The argument arrives with the import's type and
    /// the returned value must have the same type.
    pub fn func_unary_numeric<F>(
        &mut self,
        module: &str,
        name: &str,
        func: F,
    ) -> Result<&mut Self, anyhow::Error>
    where
        F: Fn(Caller<'_, T>, Val) -> Result<Val, anyhow::Error> + Send + Sync + 'static,
    {
        let wrapped = host_func(move |caller, args| {
            let &[arg] = args else {
                anyhow::bail!("expected 1 argument, got {}", args.len());
            };
            Ok(vec![func(caller, arg)?])
        });
        self.define(module, name, HostSignature::UnaryNumeric, wrapped)
    }

    fn define(
        &mut self,
        module: &str,
        name: &str,
        signature: HostSignature,
        func: Arc<HostFunc<T>>,
    ) -> Result<&mut Self, anyhow::Error> {
        let key = (module.to_string(), name.to_string());
        anyhow::ensure!(
            !self.defs.contains_key(&key),
            "duplicate definition of {module}.{name}"
        );
        self.defs.insert(key, Definition { signature, func });
        Ok(self)
    }

    /// Resolve a module's imports and instantiate it.
    ///
    /// Every import must be a function registered under the same
    /// `(module, name)` with a compatible signature. Errors carry a
    /// [`LinkError`].
    pub fn instantiate(
        &self,
        store: &mut Store<T>,
        module: &Module,
    ) -> Result<Instance, anyhow::Error> {
        let parsed = &module.inner;

        let mut host_funcs = Vec::new();
        for import in &parsed.imports {
            let ty = match &import.kind {
                ImportKind::Func(ty) => ty,
                other => {
                    return Err(LinkError::UnsupportedImport {
                        module: import.module.clone(),
                        name: import.name.clone(),
                        kind: match other {
                            ImportKind::Table => "table",
                            ImportKind::Memory => "memory",
                            _ => "global",
                        },
                    }
                    .into());
                }
            };
            let key = (import.module.clone(), import.name.clone());
            let def = self
                .defs
                .get(&key)
                .ok_or_else(|| LinkError::UnresolvedImport {
                    module: import.module.clone(),
                    name: import.name.clone(),
                })?;
            def.signature
                .check(ty)
                .map_err(|expected| LinkError::TypeMismatch {
                    module: import.module.clone(),
                    name: import.name.clone(),
                    expected,
                    found: describe(ty),
                })?;
            tracing::debug!(module = %import.module, name = %import.name, "resolved import");
            let name = format!("{}.{}", import.module, import.name);
            host_funcs.push(store.push_host_func(name, Arc::clone(&def.func)));
        }

        let memory = parsed
            .memory
            .map(|def| Memory::new(def.min_pages, def.max_pages))
            .transpose()?;
        let mut instance = Instance {
            module: module.clone(),
            memory,
            globals: Vec::with_capacity(parsed.globals.len()),
            tables: Vec::with_capacity(parsed.tables.len()),
            data: parsed
                .data
                .iter()
                .map(|seg| Some(Arc::clone(&seg.bytes)))
                .collect(),
            host_funcs,
            store_id: store.id(),
        };

        for def in &parsed.globals {
            let bits = eval_const(&def.init, &instance.globals)?;
            instance.globals.push(Global { ty: def.ty, bits });
        }

        for def in &parsed.tables {
            let init = match &def.init {
                Some(expr) => to_func_ref(eval_const(expr, &instance.globals)?),
                None => None,
            };
            instance.tables.push(Table {
                elems: vec![init; def.min as usize],
            });
        }

        for seg in &parsed.elements {
            let ElemMode::Active { table, offset } = &seg.mode else {
                continue;
            };
            let offset = eval_const(offset, &instance.globals)? as u32 as usize;
            let mut refs = Vec::with_capacity(seg.items.len());
            for item in &seg.items {
                refs.push(to_func_ref(eval_const(item, &instance.globals)?));
            }
            let table = instance
                .tables
                .get_mut(*table as usize)
                .ok_or(LinkError::ElemOutOfBounds)?;
            let end = offset
                .checked_add(refs.len())
                .filter(|&end| end <= table.elems.len())
                .ok_or(LinkError::ElemOutOfBounds)?;
            table.elems[offset..end].copy_from_slice(&refs);
        }

        for (idx, seg) in parsed.data.iter().enumerate() {
            let Some(offset) = &seg.offset else {
                continue;
            };
            let offset = eval_const(offset, &instance.globals)? as u32 as u64;
            let memory = instance
                .memory
                .as_mut()
                .ok_or(LinkError::DataOutOfBounds)?;
            memory
                .store(offset, &seg.bytes)
                .map_err(|_| LinkError::DataOutOfBounds)?;
            // Active segments behave as dropped once applied.
            instance.data[idx] = None;
        }

        if let Some(start) = parsed.start {
            tracing::debug!(func = start, "running start function");
            interpreter::call(&mut instance, store, FuncIdx(start), &[])
                .map_err(LinkError::StartTrap)?;
        }

        Ok(instance)
    }
}

fn host_func<T, F>(func: F) -> Arc<HostFunc<T>>
where
    F: Fn(Caller<'_, T>, &[Val]) -> Result<Vec<Val>, anyhow::Error> + Send + Sync + 'static,
{
    Arc::new(func)
}

fn to_func_ref(bits: u64) -> Option<u32> {
    (bits != NULL_REF).then_some(bits as u32)
}

/// Evaluate a constant expression against the globals initialized so far.
fn eval_const(expr: &[ConstOp], globals: &[Global]) -> Result<u64, anyhow::Error> {
    let mut stack: Vec<u64> = Vec::with_capacity(expr.len());
    for op in expr {
        match *op {
            ConstOp::Val(val) => stack.push(val.to_bits()),
            ConstOp::GlobalGet(idx) => {
                let global = globals
                    .get(idx as usize)
                    .ok_or_else(|| anyhow::anyhow!("global {idx} read before initialization"))?;
                stack.push(global.bits);
            }
            ConstOp::RefNull => stack.push(NULL_REF),
            ConstOp::RefFunc(idx) => stack.push(idx as u64),
            ConstOp::I32Add => const_binop(&mut stack, |a, b| (a as u32).wrapping_add(b as u32) as u64)?,
            ConstOp::I32Sub => const_binop(&mut stack, |a, b| (a as u32).wrapping_sub(b as u32) as u64)?,
            ConstOp::I32Mul => const_binop(&mut stack, |a, b| (a as u32).wrapping_mul(b as u32) as u64)?,
            ConstOp::I64Add => const_binop(&mut stack, u64::wrapping_add)?,
            ConstOp::I64Sub => const_binop(&mut stack, u64::wrapping_sub)?,
            ConstOp::I64Mul => const_binop(&mut stack, u64::wrapping_mul)?,
        }
    }
    stack
        .pop()
        .ok_or_else(|| anyhow::anyhow!("empty constant expression"))
}

fn const_binop(stack: &mut Vec<u64>, f: impl Fn(u64, u64) -> u64) -> Result<(), anyhow::Error> {
    let (Some(b), Some(a)) = (stack.pop(), stack.pop()) else {
        anyhow::bail!("constant expression stack underflow");
    };
    stack.push(f(a, b));
    Ok(())
}
