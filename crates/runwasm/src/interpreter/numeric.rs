//! Stack-only numeric instructions over the untyped `u64` operand stack.
//!
//! Every value occupies one slot. 32-bit values are stored zero-extended,
//! which makes the reinterpret instructions no-ops.

use super::Trap;
use crate::parse::body::NumOp;

// Validated code never pops an empty stack.
#[inline(always)]
fn pop_raw(stack: &mut Vec<u64>) -> u64 {
    stack.pop().unwrap_or_default()
}

#[inline(always)]
fn pop_i32(stack: &mut Vec<u64>) -> i32 {
    pop_raw(stack) as i32
}

#[inline(always)]
fn pop_u32(stack: &mut Vec<u64>) -> u32 {
    pop_raw(stack) as u32
}

#[inline(always)]
fn pop_i64(stack: &mut Vec<u64>) -> i64 {
    pop_raw(stack) as i64
}

#[inline(always)]
fn pop_u64(stack: &mut Vec<u64>) -> u64 {
    pop_raw(stack)
}

#[inline(always)]
fn pop_f32(stack: &mut Vec<u64>) -> f32 {
    f32::from_bits(pop_raw(stack) as u32)
}

#[inline(always)]
fn pop_f64(stack: &mut Vec<u64>) -> f64 {
    f64::from_bits(pop_raw(stack))
}

#[inline(always)]
fn push_i32(stack: &mut Vec<u64>, v: i32) {
    stack.push(v as u32 as u64)
}

#[inline(always)]
fn push_u32(stack: &mut Vec<u64>, v: u32) {
    stack.push(v as u64)
}

#[inline(always)]
fn push_i64(stack: &mut Vec<u64>, v: i64) {
    stack.push(v as u64)
}

#[inline(always)]
fn push_u64(stack: &mut Vec<u64>, v: u64) {
    stack.push(v)
}

#[inline(always)]
fn push_f32(stack: &mut Vec<u64>, v: f32) {
    stack.push(v.to_bits() as u64)
}

#[inline(always)]
fn push_f64(stack: &mut Vec<u64>, v: f64) {
    stack.push(v.to_bits())
}

#[inline(always)]
fn push_bool(stack: &mut Vec<u64>, v: bool) {
    stack.push(v as u64)
}

macro_rules! unop {
    ($stack:ident, $pop:ident => $push:ident, |$a:ident| $body:expr) => {{
        let $a = $pop($stack);
        $push($stack, $body);
    }};
}

macro_rules! binop {
    ($stack:ident, $pop:ident => $push:ident, |$a:ident, $b:ident| $body:expr) => {{
        let $b = $pop($stack);
        let $a = $pop($stack);
        $push($stack, $body);
    }};
}

/// Float min/max with NaN propagation and signed zero ordering.
trait WasmFloat: Copy {
    fn wasm_min(self, other: Self) -> Self;
    fn wasm_max(self, other: Self) -> Self;
}

macro_rules! impl_wasm_float {
    ($($ty:ty),*) => {
        $(
            impl WasmFloat for $ty {
                fn wasm_min(self, other: Self) -> Self {
                    if self.is_nan() || other.is_nan() {
                        <$ty>::NAN
                    } else if self == 0.0 && other == 0.0 {
                        if self.is_sign_negative() { self } else { other }
                    } else {
                        self.min(other)
                    }
                }

                fn wasm_max(self, other: Self) -> Self {
                    if self.is_nan() || other.is_nan() {
                        <$ty>::NAN
                    } else if self == 0.0 && other == 0.0 {
                        if self.is_sign_positive() { self } else { other }
                    } else {
                        self.max(other)
                    }
                }
            }
        )*
    };
}

impl_wasm_float!(f32, f64);

/// Truncate toward zero, trapping when the result is outside
/// `[min, max_exclusive)`. f32 inputs widen to f64 exactly.
fn trunc_checked(v: f64, min: f64, max_exclusive: f64) -> Result<f64, Trap> {
    if v.is_nan() {
        return Err(Trap::InvalidConversion);
    }
    let t = v.trunc();
    if t < min || t >= max_exclusive {
        return Err(Trap::IntegerOverflow);
    }
    Ok(t)
}

const I32_MIN: f64 = -2_147_483_648.0;
const I32_END: f64 = 2_147_483_648.0;
const U32_END: f64 = 4_294_967_296.0;
const I64_MIN: f64 = -9_223_372_036_854_775_808.0;
const I64_END: f64 = 9_223_372_036_854_775_808.0;
const U64_END: f64 = 18_446_744_073_709_551_616.0;

pub(super) fn exec(stack: &mut Vec<u64>, op: NumOp) -> Result<(), Trap> {
    use NumOp::*;
    match op {
        // i32 comparison
        I32Eqz => unop!(stack, pop_i32 => push_bool, |a| a == 0),
        I32Eq => binop!(stack, pop_i32 => push_bool, |a, b| a == b),
        I32Ne => binop!(stack, pop_i32 => push_bool, |a, b| a != b),
        I32LtS => binop!(stack, pop_i32 => push_bool, |a, b| a < b),
        I32LtU => binop!(stack, pop_u32 => push_bool, |a, b| a < b),
        I32GtS => binop!(stack, pop_i32 => push_bool, |a, b| a > b),
        I32GtU => binop!(stack, pop_u32 => push_bool, |a, b| a > b),
        I32LeS => binop!(stack, pop_i32 => push_bool, |a, b| a <= b),
        I32LeU => binop!(stack, pop_u32 => push_bool, |a, b| a <= b),
        I32GeS => binop!(stack, pop_i32 => push_bool, |a, b| a >= b),
        I32GeU => binop!(stack, pop_u32 => push_bool, |a, b| a >= b),

        // i64 comparison
        I64Eqz => unop!(stack, pop_i64 => push_bool, |a| a == 0),
        I64Eq => binop!(stack, pop_i64 => push_bool, |a, b| a == b),
        I64Ne => binop!(stack, pop_i64 => push_bool, |a, b| a != b),
        I64LtS => binop!(stack, pop_i64 => push_bool, |a, b| a < b),
        I64LtU => binop!(stack, pop_u64 => push_bool, |a, b| a < b),
        I64GtS => binop!(stack, pop_i64 => push_bool, |a, b| a > b),
        I64GtU => binop!(stack, pop_u64 => push_bool, |a, b| a > b),
        I64LeS => binop!(stack, pop_i64 => push_bool, |a, b| a <= b),
        I64LeU => binop!(stack, pop_u64 => push_bool, |a, b| a <= b),
        I64GeS => binop!(stack, pop_i64 => push_bool, |a, b| a >= b),
        I64GeU => binop!(stack, pop_u64 => push_bool, |a, b| a >= b),

        // float comparison
        F32Eq => binop!(stack, pop_f32 => push_bool, |a, b| a == b),
        F32Ne => binop!(stack, pop_f32 => push_bool, |a, b| a != b),
        F32Lt => binop!(stack, pop_f32 => push_bool, |a, b| a < b),
        F32Gt => binop!(stack, pop_f32 => push_bool, |a, b| a > b),
        F32Le => binop!(stack, pop_f32 => push_bool, |a, b| a <= b),
        F32Ge => binop!(stack, pop_f32 => push_bool, |a, b| a >= b),
        F64Eq => binop!(stack, pop_f64 => push_bool, |a, b| a == b),
        F64Ne => binop!(stack, pop_f64 => push_bool, |a, b| a != b),
        F64Lt => binop!(stack, pop_f64 => push_bool, |a, b| a < b),
        F64Gt => binop!(stack, pop_f64 => push_bool, |a, b| a > b),
        F64Le => binop!(stack, pop_f64 => push_bool, |a, b| a <= b),
        F64Ge => binop!(stack, pop_f64 => push_bool, |a, b| a >= b),

        // i32 arithmetic
        I32Clz => unop!(stack, pop_u32 => push_u32, |a| a.leading_zeros()),
        I32Ctz => unop!(stack, pop_u32 => push_u32, |a| a.trailing_zeros()),
        I32Popcnt => unop!(stack, pop_u32 => push_u32, |a| a.count_ones()),
        I32Add => binop!(stack, pop_i32 => push_i32, |a, b| a.wrapping_add(b)),
        I32Sub => binop!(stack, pop_i32 => push_i32, |a, b| a.wrapping_sub(b)),
        I32Mul => binop!(stack, pop_i32 => push_i32, |a, b| a.wrapping_mul(b)),
        I32DivS => binop!(stack, pop_i32 => push_i32, |a, b| {
            if b == 0 {
                return Err(Trap::DivisionByZero);
            }
            if a == i32::MIN && b == -1 {
                return Err(Trap::IntegerOverflow);
            }
            a / b
        }),
        I32DivU => binop!(stack, pop_u32 => push_u32, |a, b| {
            a.checked_div(b).ok_or(Trap::DivisionByZero)?
        }),
        I32RemS => binop!(stack, pop_i32 => push_i32, |a, b| {
            if b == 0 {
                return Err(Trap::DivisionByZero);
            }
            a.wrapping_rem(b)
        }),
        I32RemU => binop!(stack, pop_u32 => push_u32, |a, b| {
            a.checked_rem(b).ok_or(Trap::DivisionByZero)?
        }),
        I32And => binop!(stack, pop_u32 => push_u32, |a, b| a & b),
        I32Or => binop!(stack, pop_u32 => push_u32, |a, b| a | b),
        I32Xor => binop!(stack, pop_u32 => push_u32, |a, b| a ^ b),
        I32Shl => binop!(stack, pop_u32 => push_u32, |a, b| a.wrapping_shl(b)),
        I32ShrS => binop!(stack, pop_i32 => push_i32, |a, b| a.wrapping_shr(b as u32)),
        I32ShrU => binop!(stack, pop_u32 => push_u32, |a, b| a.wrapping_shr(b)),
        I32Rotl => binop!(stack, pop_u32 => push_u32, |a, b| a.rotate_left(b % 32)),
        I32Rotr => binop!(stack, pop_u32 => push_u32, |a, b| a.rotate_right(b % 32)),

        // i64 arithmetic
        I64Clz => unop!(stack, pop_u64 => push_u64, |a| a.leading_zeros() as u64),
        I64Ctz => unop!(stack, pop_u64 => push_u64, |a| a.trailing_zeros() as u64),
        I64Popcnt => unop!(stack, pop_u64 => push_u64, |a| a.count_ones() as u64),
        I64Add => binop!(stack, pop_i64 => push_i64, |a, b| a.wrapping_add(b)),
        I64Sub => binop!(stack, pop_i64 => push_i64, |a, b| a.wrapping_sub(b)),
        I64Mul => binop!(stack, pop_i64 => push_i64, |a, b| a.wrapping_mul(b)),
        I64DivS => binop!(stack, pop_i64 => push_i64, |a, b| {
            if b == 0 {
                return Err(Trap::DivisionByZero);
            }
            if a == i64::MIN && b == -1 {
                return Err(Trap::IntegerOverflow);
            }
            a / b
        }),
        I64DivU => binop!(stack, pop_u64 => push_u64, |a, b| {
            a.checked_div(b).ok_or(Trap::DivisionByZero)?
        }),
        I64RemS => binop!(stack, pop_i64 => push_i64, |a, b| {
            if b == 0 {
                return Err(Trap::DivisionByZero);
            }
            a.wrapping_rem(b)
        }),
        I64RemU => binop!(stack, pop_u64 => push_u64, |a, b| {
            a.checked_rem(b).ok_or(Trap::DivisionByZero)?
        }),
        I64And => binop!(stack, pop_u64 => push_u64, |a, b| a & b),
        I64Or => binop!(stack, pop_u64 => push_u64, |a, b| a | b),
        I64Xor => binop!(stack, pop_u64 => push_u64, |a, b| a ^ b),
        I64Shl => binop!(stack, pop_u64 => push_u64, |a, b| a.wrapping_shl(b as u32)),
        I64ShrS => binop!(stack, pop_i64 => push_i64, |a, b| a.wrapping_shr(b as u32)),
        I64ShrU => binop!(stack, pop_u64 => push_u64, |a, b| a.wrapping_shr(b as u32)),
        I64Rotl => binop!(stack, pop_u64 => push_u64, |a, b| a.rotate_left((b % 64) as u32)),
        I64Rotr => binop!(stack, pop_u64 => push_u64, |a, b| a.rotate_right((b % 64) as u32)),

        // f32 arithmetic
        F32Abs => unop!(stack, pop_f32 => push_f32, |a| a.abs()),
        F32Neg => unop!(stack, pop_f32 => push_f32, |a| -a),
        F32Ceil => unop!(stack, pop_f32 => push_f32, |a| a.ceil()),
        F32Floor => unop!(stack, pop_f32 => push_f32, |a| a.floor()),
        F32Trunc => unop!(stack, pop_f32 => push_f32, |a| a.trunc()),
        F32Nearest => unop!(stack, pop_f32 => push_f32, |a| a.round_ties_even()),
        F32Sqrt => unop!(stack, pop_f32 => push_f32, |a| a.sqrt()),
        F32Add => binop!(stack, pop_f32 => push_f32, |a, b| a + b),
        F32Sub => binop!(stack, pop_f32 => push_f32, |a, b| a - b),
        F32Mul => binop!(stack, pop_f32 => push_f32, |a, b| a * b),
        F32Div => binop!(stack, pop_f32 => push_f32, |a, b| a / b),
        F32Min => binop!(stack, pop_f32 => push_f32, |a, b| a.wasm_min(b)),
        F32Max => binop!(stack, pop_f32 => push_f32, |a, b| a.wasm_max(b)),
        F32Copysign => binop!(stack, pop_f32 => push_f32, |a, b| a.copysign(b)),

        // f64 arithmetic
        F64Abs => unop!(stack, pop_f64 => push_f64, |a| a.abs()),
        F64Neg => unop!(stack, pop_f64 => push_f64, |a| -a),
        F64Ceil => unop!(stack, pop_f64 => push_f64, |a| a.ceil()),
        F64Floor => unop!(stack, pop_f64 => push_f64, |a| a.floor()),
        F64Trunc => unop!(stack, pop_f64 => push_f64, |a| a.trunc()),
        F64Nearest => unop!(stack, pop_f64 => push_f64, |a| a.round_ties_even()),
        F64Sqrt => unop!(stack, pop_f64 => push_f64, |a| a.sqrt()),
        F64Add => binop!(stack, pop_f64 => push_f64, |a, b| a + b),
        F64Sub => binop!(stack, pop_f64 => push_f64, |a, b| a - b),
        F64Mul => binop!(stack, pop_f64 => push_f64, |a, b| a * b),
        F64Div => binop!(stack, pop_f64 => push_f64, |a, b| a / b),
        F64Min => binop!(stack, pop_f64 => push_f64, |a, b| a.wasm_min(b)),
        F64Max => binop!(stack, pop_f64 => push_f64, |a, b| a.wasm_max(b)),
        F64Copysign => binop!(stack, pop_f64 => push_f64, |a, b| a.copysign(b)),

        // conversions
        I32WrapI64 => unop!(stack, pop_i64 => push_i32, |a| a as i32),
        I32TruncF32S => unop!(stack, pop_f32 => push_i32, |a| {
            trunc_checked(a as f64, I32_MIN, I32_END)? as i32
        }),
        I32TruncF32U => unop!(stack, pop_f32 => push_u32, |a| {
            trunc_checked(a as f64, 0.0, U32_END)? as u32
        }),
        I32TruncF64S => unop!(stack, pop_f64 => push_i32, |a| {
            trunc_checked(a, I32_MIN, I32_END)? as i32
        }),
        I32TruncF64U => unop!(stack, pop_f64 => push_u32, |a| {
            trunc_checked(a, 0.0, U32_END)? as u32
        }),
        I64ExtendI32S => unop!(stack, pop_i32 => push_i64, |a| a as i64),
        I64ExtendI32U => unop!(stack, pop_u32 => push_u64, |a| a as u64),
        I64TruncF32S => unop!(stack, pop_f32 => push_i64, |a| {
            trunc_checked(a as f64, I64_MIN, I64_END)? as i64
        }),
        I64TruncF32U => unop!(stack, pop_f32 => push_u64, |a| {
            trunc_checked(a as f64, 0.0, U64_END)? as u64
        }),
        I64TruncF64S => unop!(stack, pop_f64 => push_i64, |a| {
            trunc_checked(a, I64_MIN, I64_END)? as i64
        }),
        I64TruncF64U => unop!(stack, pop_f64 => push_u64, |a| {
            trunc_checked(a, 0.0, U64_END)? as u64
        }),
        F32ConvertI32S => unop!(stack, pop_i32 => push_f32, |a| a as f32),
        F32ConvertI32U => unop!(stack, pop_u32 => push_f32, |a| a as f32),
        F32ConvertI64S => unop!(stack, pop_i64 => push_f32, |a| a as f32),
        F32ConvertI64U => unop!(stack, pop_u64 => push_f32, |a| a as f32),
        F32DemoteF64 => unop!(stack, pop_f64 => push_f32, |a| a as f32),
        F64ConvertI32S => unop!(stack, pop_i32 => push_f64, |a| a as f64),
        F64ConvertI32U => unop!(stack, pop_u32 => push_f64, |a| a as f64),
        F64ConvertI64S => unop!(stack, pop_i64 => push_f64, |a| a as f64),
        F64ConvertI64U => unop!(stack, pop_u64 => push_f64, |a| a as f64),
        F64PromoteF32 => unop!(stack, pop_f32 => push_f64, |a| a as f64),
        I32ReinterpretF32 | I64ReinterpretF64 | F32ReinterpretI32 | F64ReinterpretI64 => {}

        // sign extension
        I32Extend8S => unop!(stack, pop_i32 => push_i32, |a| a as i8 as i32),
        I32Extend16S => unop!(stack, pop_i32 => push_i32, |a| a as i16 as i32),
        I64Extend8S => unop!(stack, pop_i64 => push_i64, |a| a as i8 as i64),
        I64Extend16S => unop!(stack, pop_i64 => push_i64, |a| a as i16 as i64),
        I64Extend32S => unop!(stack, pop_i64 => push_i64, |a| a as i32 as i64),

        // saturating truncation: `as` already saturates and maps NaN to 0
        I32TruncSatF32S => unop!(stack, pop_f32 => push_i32, |a| a as i32),
        I32TruncSatF32U => unop!(stack, pop_f32 => push_u32, |a| a as u32),
        I32TruncSatF64S => unop!(stack, pop_f64 => push_i32, |a| a as i32),
        I32TruncSatF64U => unop!(stack, pop_f64 => push_u32, |a| a as u32),
        I64TruncSatF32S => unop!(stack, pop_f32 => push_i64, |a| a as i64),
        I64TruncSatF32U => unop!(stack, pop_f32 => push_u64, |a| a as u64),
        I64TruncSatF64S => unop!(stack, pop_f64 => push_i64, |a| a as i64),
        I64TruncSatF64U => unop!(stack, pop_f64 => push_u64, |a| a as u64),
    }
    Ok(())
}
