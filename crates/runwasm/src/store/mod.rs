use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use wasmparser::ValType;

use crate::Engine;
use crate::engine::EngineConfig;
use crate::interpreter::Trap;
use crate::value::Val;

/// Signature-erased host function. Receives the caller context and the
/// arguments already converted to [`Val`]s.
pub type HostFunc<T> = dyn Fn(Caller<'_, T>, &[Val]) -> Result<Vec<Val>, anyhow::Error> + Send + Sync;

/// View of the calling instance handed to host functions.
pub struct Caller<'a, T> {
    pub(crate) data: &'a mut T,
    pub(crate) memory: Option<&'a mut [u8]>,
}

impl<T> Caller<'_, T> {
    pub fn data(&self) -> &T {
        self.data
    }

    pub fn data_mut(&mut self) -> &mut T {
        self.data
    }

    /// The instance's linear memory, if it has one.
    pub fn memory(&mut self) -> Option<&mut [u8]> {
        self.memory.as_deref_mut()
    }
}

/// A host function resolved during instantiation.
pub(crate) struct HostEntry<T> {
    pub(crate) name: String,
    pub(crate) func: Arc<HostFunc<T>>,
}

static NEXT_STORE_ID: AtomicU64 = AtomicU64::new(0);

/// Identifies the store an instance was created in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StoreId(u64);

/// Runtime state shared by instances: user data plus the host functions
/// their imports resolved to.
pub struct Store<T> {
    id: StoreId,
    data: T,
    config: EngineConfig,
    pub(crate) host_funcs: Vec<HostEntry<T>>,
}

impl<T> Store<T> {
    pub fn new(engine: &Engine, data: T) -> Self {
        Self {
            id: StoreId(NEXT_STORE_ID.fetch_add(1, Ordering::Relaxed)),
            data,
            config: *engine.config(),
            host_funcs: Vec::new(),
        }
    }

    pub fn data(&self) -> &T {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut T {
        &mut self.data
    }

    pub fn into_data(self) -> T {
        self.data
    }

    pub(crate) fn id(&self) -> StoreId {
        self.id
    }

    pub(crate) fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Record a resolved host function, returning its store index. A
    /// function already recorded under the same name is reused.
    pub(crate) fn push_host_func(&mut self, name: String, func: Arc<HostFunc<T>>) -> usize {
        let existing = self
            .host_funcs
            .iter()
            .position(|entry| entry.name == name && Arc::ptr_eq(&entry.func, &func));
        if let Some(idx) = existing {
            return idx;
        }
        self.host_funcs.push(HostEntry { name, func });
        self.host_funcs.len() - 1
    }

    /// Invoke the host function at `idx` and check its results against
    /// the import's declared result types.
    pub(crate) fn call_host(
        &mut self,
        idx: usize,
        memory: Option<&mut [u8]>,
        args: &[Val],
        result_types: &[ValType],
    ) -> Result<Vec<Val>, Trap> {
        let entry = self.host_funcs.get(idx).ok_or_else(|| Trap::Host {
            name: format!("#{idx}"),
            message: "host function not defined in this store".to_string(),
        })?;
        let func = Arc::clone(&entry.func);
        let name = entry.name.clone();
        tracing::trace!(host = %name, ?args, "calling host function");
        let caller = Caller {
            data: &mut self.data,
            memory,
        };
        let results = match func(caller, args) {
            Ok(results) => results,
            Err(e) => {
                return Err(Trap::Host {
                    name,
                    message: format!("{e:#}"),
                });
            }
        };
        let matches = results.len() == result_types.len()
            && results.iter().zip(result_types).all(|(val, &ty)| val.ty() == ty);
        if !matches {
            return Err(Trap::Host {
                message: format!("returned {results:?}, expected {result_types:?}"),
                name,
            });
        }
        Ok(results)
    }
}
