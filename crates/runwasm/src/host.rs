//! The `env` namespace offered to loaded modules.

use crate::{Engine, Linker, Val};

pub const ENV_MODULE: &str = "env";
pub const NEGATE: &str = "negate";

/// Arithmetic negation. Integers wrap, so `i32::MIN` negates to itself.
pub fn negate(val: Val) -> Result<Val, anyhow::Error> {
    Ok(match val {
        Val::I32(v) => Val::I32(v.wrapping_neg()),
        Val::I64(v) => Val::I64(v.wrapping_neg()),
        Val::F32(v) => Val::F32(-v),
        Val::F64(v) => Val::F64(-v),
        other => anyhow::bail!("negate expects a number, got {other:?}"),
    })
}

/// Linker exposing the host environment: `env.negate`.
pub fn host_linker<T: 'static>(engine: &Engine) -> Result<Linker<T>, anyhow::Error> {
    let mut linker = Linker::new(engine);
    linker.func_unary_numeric(ENV_MODULE, NEGATE, |_caller, val| negate(val))?;
    Ok(linker)
}

/// The sample module image: imports `env.negate: (f32) -> f32` and
/// exports `main`, which returns `42.0`, or `negate(42.0)` when `negate`
/// is set.
pub fn sample_module(negate: bool) -> Result<Vec<u8>, anyhow::Error> {
    let body = if negate {
        "f32.const 42\n    call $negate"
    } else {
        "f32.const 42"
    };
    let wat = format!(
        r#"(module
  (import "{ENV_MODULE}" "{NEGATE}" (func $negate (param f32) (result f32)))
  (func (export "main") (result f32)
    {body}))"#
    );
    Ok(wat::parse_str(wat)?)
}
