use std::fmt;

use wasmparser::{HeapType, RefType, ValType};

/// Raw bit pattern of a null function reference on the operand stack.
pub(crate) const NULL_REF: u64 = u64::MAX;

/// Dynamic WASM value crossing the host boundary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Val {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    /// Function reference: `Some(func_idx)` or `None` for `ref.null func`.
    FuncRef(Option<u32>),
}

impl Val {
    /// The WASM type of this value.
    pub fn ty(&self) -> ValType {
        match self {
            Val::I32(_) => ValType::I32,
            Val::I64(_) => ValType::I64,
            Val::F32(_) => ValType::F32,
            Val::F64(_) => ValType::F64,
            Val::FuncRef(_) => ValType::Ref(RefType::FUNCREF),
        }
    }

    /// Default (zero) value for a local or global of type `ty`.
    pub fn zero_for(ty: ValType) -> Result<Val, anyhow::Error> {
        Val::from_bits(0, ty).map(|val| match val {
            Val::FuncRef(_) => Val::FuncRef(None),
            other => other,
        })
    }

    /// Pack into an untyped stack slot.
    pub(crate) fn to_bits(self) -> u64 {
        match self {
            Val::I32(v) => v as u32 as u64,
            Val::I64(v) => v as u64,
            Val::F32(v) => v.to_bits() as u64,
            Val::F64(v) => v.to_bits(),
            Val::FuncRef(Some(idx)) => idx as u64,
            Val::FuncRef(None) => NULL_REF,
        }
    }

    /// Reinterpret an untyped stack slot as a value of type `ty`.
    pub(crate) fn from_bits(bits: u64, ty: ValType) -> Result<Val, anyhow::Error> {
        Ok(match ty {
            ValType::I32 => Val::I32(bits as i32),
            ValType::I64 => Val::I64(bits as i64),
            ValType::F32 => Val::F32(f32::from_bits(bits as u32)),
            ValType::F64 => Val::F64(f64::from_bits(bits)),
            ValType::Ref(r) if is_funcref(r) => {
                Val::FuncRef((bits != NULL_REF).then_some(bits as u32))
            }
            other => anyhow::bail!("unsupported value type: {other:?}"),
        })
    }

    /// Parse a textual argument as a value of type `ty`.
    ///
    /// Integers accept decimal with an optional sign; floats accept
    /// anything `str::parse` does plus `Infinity`/`-Infinity`.
    pub fn parse(text: &str, ty: ValType) -> Result<Val, anyhow::Error> {
        let text = text.trim();
        let parsed = match ty {
            ValType::I32 => text.parse().map(Val::I32).ok(),
            ValType::I64 => text.parse().map(Val::I64).ok(),
            ValType::F32 => parse_float(text).map(|v| Val::F32(v as f32)),
            ValType::F64 => parse_float(text).map(Val::F64),
            other => anyhow::bail!("cannot pass {other:?} arguments from the command line"),
        };
        parsed.ok_or_else(|| anyhow::anyhow!("invalid {ty:?} argument: {text:?}"))
    }
}

pub(crate) fn is_funcref(r: RefType) -> bool {
    r.heap_type() == HeapType::FUNC
}

fn parse_float(text: &str) -> Option<f64> {
    match text {
        "Infinity" | "+Infinity" => Some(f64::INFINITY),
        "-Infinity" => Some(f64::NEG_INFINITY),
        _ => text.parse().ok(),
    }
}

/// Renders values the way a JavaScript console prints what the JS API
/// hands back: `i64` as a BigInt (`5n`), floats through Number-to-String
/// (`-0`, `1e+21`, `1e-7`), function references as function objects.
impl fmt::Display for Val {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Val::I32(v) => write!(f, "{v}"),
            Val::I64(v) => write!(f, "{v}n"),
            Val::F32(v) => fmt_number(f, *v as f64),
            Val::F64(v) => fmt_number(f, *v),
            Val::FuncRef(Some(idx)) => write!(f, "[Function: {idx}]"),
            Val::FuncRef(None) => write!(f, "null"),
        }
    }
}

/// ECMAScript Number::toString for a finite or non-finite `f64`.
fn fmt_number(f: &mut fmt::Formatter<'_>, v: f64) -> fmt::Result {
    if v.is_nan() {
        return write!(f, "NaN");
    }
    if v.is_sign_negative() {
        write!(f, "-")?;
    }
    let v = v.abs();
    if v.is_infinite() {
        return write!(f, "Infinity");
    }
    if v == 0.0 {
        return write!(f, "0");
    }

    // Shortest round-trip digits, e.g. "1.25e-7".
    let sci = format!("{v:e}");
    let (mantissa, exp) = sci.split_once('e').ok_or(fmt::Error)?;
    let exp: i32 = exp.parse().map_err(|_| fmt::Error)?;
    let digits = mantissa.replace('.', "");
    let k = digits.len() as i32;
    // Position of the decimal point relative to the digit string.
    let n = exp + 1;

    if k <= n && n <= 21 {
        write!(f, "{digits}{}", "0".repeat((n - k) as usize))
    } else if 0 < n && n <= 21 {
        let (int, frac) = digits.split_at(n as usize);
        write!(f, "{int}.{frac}")
    } else if -6 < n && n <= 0 {
        write!(f, "0.{}{digits}", "0".repeat((-n) as usize))
    } else {
        let sign = if n >= 1 { '+' } else { '-' };
        let (first, rest) = digits.split_at(1);
        if rest.is_empty() {
            write!(f, "{first}e{sign}{}", (n - 1).abs())
        } else {
            write!(f, "{first}.{rest}e{sign}{}", (n - 1).abs())
        }
    }
}

/// Convert a single Rust value to/from a `Val`.
pub trait WasmVal: Sized {
    fn to_val(&self) -> Val;
    fn from_val(val: &Val) -> Result<Self, anyhow::Error>;
}

macro_rules! impl_wasm_val {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl WasmVal for $ty {
                fn to_val(&self) -> Val {
                    Val::$variant(*self)
                }
                fn from_val(val: &Val) -> Result<Self, anyhow::Error> {
                    match val {
                        Val::$variant(v) => Ok(*v),
                        _ => anyhow::bail!(concat!("expected ", stringify!($ty), ", got {:?}"), val),
                    }
                }
            }
        )*
    };
}

impl_wasm_val!(i32 => I32, i64 => I64, f32 => F32, f64 => F64);

/// Convert Rust types into WASM call arguments.
pub trait WasmArgs {
    fn to_vals(&self) -> Vec<Val>;
}

/// Convert WASM results back into Rust types.
pub trait WasmResults: Sized {
    fn from_vals(vals: &[Val]) -> Result<Self, anyhow::Error>;
}

impl WasmArgs for () {
    fn to_vals(&self) -> Vec<Val> {
        vec![]
    }
}

impl WasmResults for () {
    fn from_vals(vals: &[Val]) -> Result<Self, anyhow::Error> {
        anyhow::ensure!(vals.is_empty(), "expected no results, got {}", vals.len());
        Ok(())
    }
}

macro_rules! impl_wasm_tuples {
    ($(($($T:ident),+)),* $(,)?) => {
        $(
            impl<$($T: WasmVal),+> WasmArgs for ($($T,)+) {
                #[allow(non_snake_case)]
                fn to_vals(&self) -> Vec<Val> {
                    let ($($T,)+) = self;
                    vec![$($T.to_val()),+]
                }
            }

            impl<$($T: WasmVal),+> WasmResults for ($($T,)+) {
                fn from_vals(vals: &[Val]) -> Result<Self, anyhow::Error> {
                    let expected = [$(stringify!($T)),+].len();
                    anyhow::ensure!(
                        vals.len() == expected,
                        "expected {} results, got {}",
                        expected,
                        vals.len()
                    );
                    let mut iter = vals.iter();
                    Ok(($(
                        $T::from_val(
                            iter.next().ok_or_else(|| anyhow::anyhow!("missing result"))?,
                        )?,
                    )+))
                }
            }
        )*
    };
}

impl_wasm_tuples!(
    (A),
    (A, B),
    (A, B, C),
    (A, B, C, D),
    (A, B, C, D, E),
    (A, B, C, D, E, F),
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_like_a_console() {
        assert_eq!(Val::I32(7).to_string(), "7");
        assert_eq!(Val::I64(-3).to_string(), "-3n");
        assert_eq!(Val::F32(42.0).to_string(), "42");
        assert_eq!(Val::F32(-5.0).to_string(), "-5");
        assert_eq!(Val::F64(2.5).to_string(), "2.5");
        assert_eq!(Val::F64(-0.0).to_string(), "-0");
        assert_eq!(Val::F32(-0.0).to_string(), "-0");
        assert_eq!(Val::F64(0.0).to_string(), "0");
        assert_eq!(Val::F32(f32::NAN).to_string(), "NaN");
        assert_eq!(Val::F64(f64::NEG_INFINITY).to_string(), "-Infinity");
        assert_eq!(Val::FuncRef(Some(2)).to_string(), "[Function: 2]");
        assert_eq!(Val::FuncRef(None).to_string(), "null");
    }

    #[test]
    fn floats_switch_to_exponent_form_outside_js_thresholds() {
        let cases = [
            (1e21, "1e+21"),
            (1e20, "100000000000000000000"),
            (1.5e21, "1.5e+21"),
            (1e300, "1e+300"),
            (1e-6, "0.000001"),
            (1e-7, "1e-7"),
            (-1.25e-7, "-1.25e-7"),
            (123.456, "123.456"),
            (0.1, "0.1"),
            (f64::MAX, "1.7976931348623157e+308"),
            (5e-324, "5e-324"),
        ];
        for (v, expected) in cases {
            assert_eq!(Val::F64(v).to_string(), expected, "{v:e}");
        }
        assert_eq!(Val::F32(0.1).to_string(), "0.10000000149011612");
        assert_eq!(Val::F32(16_777_216.0).to_string(), "16777216");
    }

    #[test]
    fn bits_follow_the_declared_type() -> Result<(), anyhow::Error> {
        let bits = Val::I32(-1).to_bits();
        assert_eq!(bits, 0xFFFF_FFFF);
        assert_eq!(Val::from_bits(bits, ValType::I32)?, Val::I32(-1));
        assert_eq!(Val::from_bits(bits, ValType::I64)?, Val::I64(0xFFFF_FFFF));
        let null = Val::FuncRef(None).to_bits();
        assert_eq!(
            Val::from_bits(null, ValType::Ref(RefType::FUNCREF))?,
            Val::FuncRef(None)
        );
        Ok(())
    }

    #[test]
    fn parses_arguments_against_param_types() -> Result<(), anyhow::Error> {
        assert_eq!(Val::parse("25", ValType::F64)?, Val::F64(25.0));
        assert_eq!(Val::parse("-4", ValType::I32)?, Val::I32(-4));
        assert_eq!(Val::parse("Infinity", ValType::F32)?, Val::F32(f32::INFINITY));
        assert!(Val::parse("1.5", ValType::I32).is_err());
        assert!(Val::parse("abc", ValType::F64).is_err());
        Ok(())
    }

    #[test]
    fn tuples_round_trip_through_vals() -> Result<(), anyhow::Error> {
        let vals = (1i32, 2.5f64).to_vals();
        assert_eq!(vals, vec![Val::I32(1), Val::F64(2.5)]);
        let back: (i32, f64) = WasmResults::from_vals(&vals)?;
        assert_eq!(back, (1, 2.5));
        assert!(<(i32,)>::from_vals(&vals).is_err());
        Ok(())
    }
}
