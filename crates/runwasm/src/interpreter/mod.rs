use std::sync::Arc;

use crate::parse::func::FuncIdx;
use crate::{Instance, Store, Val};

mod exec;
mod numeric;
mod trap;
pub use trap::Trap;

/// Run `func_idx` to completion and convert its results back to [`Val`]s.
///
/// Arguments must already match the function's parameter types.
pub(crate) fn call<T>(
    instance: &mut Instance,
    store: &mut Store<T>,
    func_idx: FuncIdx,
    args: &[Val],
) -> Result<Vec<Val>, anyhow::Error> {
    let module = Arc::clone(&instance.module.inner);
    let func_type = module.func_type(func_idx.0)?;

    let mut machine = exec::Machine::new(&module, instance, store);
    let results = machine.invoke(func_idx.0, args)?;

    func_type
        .results()
        .iter()
        .zip(results)
        .map(|(&ty, bits)| Val::from_bits(bits, ty))
        .collect()
}
