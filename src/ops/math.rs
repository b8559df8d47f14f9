//! Per-element math for every ufunc.
//!
//! Inputs arrive already cast to the loop dtypes. Integer arithmetic runs
//! wrapping in 64 bits and is truncated to the loop width afterwards, which
//! gives the same result as wrapping at the narrow width. Float arithmetic
//! runs in `f64` and is rounded to the loop precision.
//!
//! Integer division or remainder by zero yields zero, and an integer raised to
//! a negative power yields zero. Both the eager path and the host backend go
//! through this module, so they always agree.

use crate::dtype::Kind;
use crate::ops::ufunc::{Loop, Ufunc};
use crate::scalar::Elem;
use crate::DType;
use half::f16;
use std::cmp::Ordering;

/// Applies `ufunc` to one set of elements.
///
/// Only the first `lp.outputs.len()` entries of the result are meaningful.
pub fn apply(ufunc: Ufunc, lp: &Loop, args: &[Elem]) -> [Elem; 2] {
    let raw = eval(ufunc, lp.compute(), args);
    let second = match lp.outputs.get(1) {
        Some(&d) => raw[1].cast(d),
        None => raw[1],
    };
    [raw[0].cast(lp.outputs[0]), second]
}

/// Applies a binary single-output ufunc in `dtype`, returning a `dtype` element.
pub fn combine(ufunc: Ufunc, dtype: DType, a: Elem, b: Elem) -> Elem {
    eval(ufunc, dtype, &[a, b])[0].cast(dtype)
}

fn eval(ufunc: Ufunc, d: DType, args: &[Elem]) -> [Elem; 2] {
    use Ufunc::*;
    let a = args[0];
    let b = args.get(1).copied().unwrap_or(a);
    let one = |e: Elem| [e, Elem::Bool(false)];

    match ufunc {
        Add => one(arith(d, a, b, i64::wrapping_add, u64::wrapping_add, |x, y| x + y, |x, y| x | y)),
        Subtract => one(arith(d, a, b, i64::wrapping_sub, u64::wrapping_sub, |x, y| x - y, |x, y| x ^ y)),
        Multiply => one(arith(d, a, b, i64::wrapping_mul, u64::wrapping_mul, |x, y| x * y, |x, y| x & y)),
        TrueDivide => one(Elem::Float(a.as_f64() / b.as_f64())),
        FloorDivide => one(arith(d, a, b, floor_div_i, div_u, floor_div_f, |x, _| x)),
        Remainder => one(arith(d, a, b, py_mod_i, rem_u, py_mod_f, |_, _| false)),
        Fmod => one(arith(d, a, b, fmod_i, rem_u, |x, y| x % y, |_, _| false)),
        Power => one(arith(d, a, b, pow_i, pow_u, f64::powf, |x, _| x)),
        Maximum => one(arith(d, a, b, i64::max, u64::max, nan_max, |x, y| x | y)),
        Minimum => one(arith(d, a, b, i64::min, u64::min, nan_min, |x, y| x & y)),
        Fmax => one(arith(d, a, b, i64::max, u64::max, f64::max, |x, y| x | y)),
        Fmin => one(arith(d, a, b, i64::min, u64::min, f64::min, |x, y| x & y)),
        Absolute => one(unary(d, a, i64::wrapping_abs, |x| x, f64::abs, |x| x)),
        Negative => one(unary(d, a, i64::wrapping_neg, u64::wrapping_neg, |x| -x, |x| x)),
        Sign => one(unary(d, a, i64::signum, |x| (x > 0) as u64, sign_f, |x| x)),
        Square => one(arith(d, a, a, i64::wrapping_mul, u64::wrapping_mul, |x, y| x * y, |x, y| x & y)),
        Reciprocal => one(unary(d, a, recip_i, recip_u, |x| 1.0 / x, |x| x)),

        Sqrt => one(float(a, f64::sqrt)),
        Cbrt => one(float(a, f64::cbrt)),
        Exp => one(float(a, f64::exp)),
        Exp2 => one(float(a, f64::exp2)),
        Expm1 => one(float(a, f64::exp_m1)),
        Log => one(float(a, f64::ln)),
        Log2 => one(float(a, f64::log2)),
        Log10 => one(float(a, f64::log10)),
        Log1p => one(float(a, f64::ln_1p)),
        Sin => one(float(a, f64::sin)),
        Cos => one(float(a, f64::cos)),
        Tan => one(float(a, f64::tan)),
        Arcsin => one(float(a, f64::asin)),
        Arccos => one(float(a, f64::acos)),
        Arctan => one(float(a, f64::atan)),
        Sinh => one(float(a, f64::sinh)),
        Cosh => one(float(a, f64::cosh)),
        Tanh => one(float(a, f64::tanh)),
        Arcsinh => one(float(a, f64::asinh)),
        Arccosh => one(float(a, f64::acosh)),
        Arctanh => one(float(a, f64::atanh)),
        Deg2rad => one(float(a, f64::to_radians)),
        Rad2deg => one(float(a, f64::to_degrees)),
        Floor => one(float(a, f64::floor)),
        Ceil => one(float(a, f64::ceil)),
        Trunc => one(float(a, f64::trunc)),
        Rint => one(float(a, rint)),
        Arctan2 => one(float2(a, b, f64::atan2)),
        Hypot => one(float2(a, b, f64::hypot)),
        Copysign => one(float2(a, b, f64::copysign)),
        Nextafter => one(Elem::Float(next_after(d, a.as_f64(), b.as_f64()))),
        Logaddexp => one(float2(a, b, logaddexp)),
        Logaddexp2 => one(float2(a, b, logaddexp2)),

        Greater => one(Elem::Bool(compare(d, a, b) == Some(Ordering::Greater))),
        GreaterEqual => one(Elem::Bool(matches!(
            compare(d, a, b),
            Some(Ordering::Greater | Ordering::Equal)
        ))),
        Less => one(Elem::Bool(compare(d, a, b) == Some(Ordering::Less))),
        LessEqual => one(Elem::Bool(matches!(
            compare(d, a, b),
            Some(Ordering::Less | Ordering::Equal)
        ))),
        Equal => one(Elem::Bool(compare(d, a, b) == Some(Ordering::Equal))),
        NotEqual => one(Elem::Bool(compare(d, a, b) != Some(Ordering::Equal))),

        LogicalAnd => one(Elem::Bool(a.as_bool() && b.as_bool())),
        LogicalOr => one(Elem::Bool(a.as_bool() || b.as_bool())),
        LogicalXor => one(Elem::Bool(a.as_bool() != b.as_bool())),
        LogicalNot => one(Elem::Bool(!a.as_bool())),
        Isnan => one(Elem::Bool(a.as_f64().is_nan())),
        Isinf => one(Elem::Bool(a.as_f64().is_infinite())),
        Isfinite => one(Elem::Bool(a.as_f64().is_finite())),
        Signbit => one(Elem::Bool(a.as_f64().is_sign_negative())),

        BitwiseAnd => one(arith(d, a, b, |x, y| x & y, |x, y| x & y, |x, _| x, |x, y| x & y)),
        BitwiseOr => one(arith(d, a, b, |x, y| x | y, |x, y| x | y, |x, _| x, |x, y| x | y)),
        BitwiseXor => one(arith(d, a, b, |x, y| x ^ y, |x, y| x ^ y, |x, _| x, |x, y| x ^ y)),
        Invert => one(unary(d, a, |x| !x, |x| !x, |x| x, |x| !x)),
        LeftShift => one(shift_left(d, a, b)),
        RightShift => one(shift_right(d, a, b)),

        Modf => {
            let (frac, int) = modf(a.as_f64());
            [Elem::Float(frac), Elem::Float(int)]
        }
        Divmod => [
            arith(d, a, b, floor_div_i, div_u, floor_div_f, |x, _| x),
            arith(d, a, b, py_mod_i, rem_u, py_mod_f, |_, _| false),
        ],
        Frexp => {
            let (mantissa, exponent) = frexp(a.as_f64());
            [Elem::Float(mantissa), Elem::Int(exponent as i64)]
        }
        Ldexp => one(Elem::Float(ldexp(a.as_f64(), b.as_i64()))),
        Where => one(if a.as_bool() { b } else { args[2] }),
        Clip => {
            let hi = args[2];
            let lower = arith(d, a, b, i64::max, u64::max, nan_max, |x, y| x | y);
            one(arith(d, lower, hi, i64::min, u64::min, nan_min, |x, y| x & y))
        }
    }
}

fn arith(
    d: DType,
    a: Elem,
    b: Elem,
    int: impl Fn(i64, i64) -> i64,
    uint: impl Fn(u64, u64) -> u64,
    flt: impl Fn(f64, f64) -> f64,
    logic: impl Fn(bool, bool) -> bool,
) -> Elem {
    match d.kind() {
        Kind::Bool => Elem::Bool(logic(a.as_bool(), b.as_bool())),
        Kind::Signed => Elem::Int(int(a.as_i64(), b.as_i64())),
        Kind::Unsigned => Elem::UInt(uint(a.as_u64(), b.as_u64())),
        Kind::Float => Elem::Float(flt(a.as_f64(), b.as_f64())),
    }
}

fn unary(
    d: DType,
    a: Elem,
    int: impl Fn(i64) -> i64,
    uint: impl Fn(u64) -> u64,
    flt: impl Fn(f64) -> f64,
    logic: impl Fn(bool) -> bool,
) -> Elem {
    match d.kind() {
        Kind::Bool => Elem::Bool(logic(a.as_bool())),
        Kind::Signed => Elem::Int(int(a.as_i64())),
        Kind::Unsigned => Elem::UInt(uint(a.as_u64())),
        Kind::Float => Elem::Float(flt(a.as_f64())),
    }
}

#[inline]
fn float(a: Elem, f: impl Fn(f64) -> f64) -> Elem {
    Elem::Float(f(a.as_f64()))
}

#[inline]
fn float2(a: Elem, b: Elem, f: impl Fn(f64, f64) -> f64) -> Elem {
    Elem::Float(f(a.as_f64(), b.as_f64()))
}

fn compare(d: DType, a: Elem, b: Elem) -> Option<Ordering> {
    match d.kind() {
        Kind::Bool => Some(a.as_bool().cmp(&b.as_bool())),
        Kind::Signed => Some(a.as_i64().cmp(&b.as_i64())),
        Kind::Unsigned => Some(a.as_u64().cmp(&b.as_u64())),
        Kind::Float => a.as_f64().partial_cmp(&b.as_f64()),
    }
}

fn floor_div_i(a: i64, b: i64) -> i64 {
    if b == 0 {
        return 0;
    }
    let q = a.wrapping_div(b);
    if a.wrapping_rem(b) != 0 && ((a < 0) != (b < 0)) {
        q - 1
    } else {
        q
    }
}

fn div_u(a: u64, b: u64) -> u64 {
    a.checked_div(b).unwrap_or(0)
}

fn floor_div_f(a: f64, b: f64) -> f64 {
    if b == 0.0 {
        return a / b;
    }
    let m = a % b;
    let mut div = (a - m) / b;
    if m != 0.0 && ((b < 0.0) != (m < 0.0)) {
        div -= 1.0;
    }
    if div == 0.0 {
        0.0f64.copysign(a / b)
    } else {
        let floor = div.floor();
        if div - floor > 0.5 {
            floor + 1.0
        } else {
            floor
        }
    }
}

fn py_mod_i(a: i64, b: i64) -> i64 {
    if b == 0 {
        return 0;
    }
    let r = a.wrapping_rem(b);
    if r != 0 && ((r < 0) != (b < 0)) {
        r + b
    } else {
        r
    }
}

fn rem_u(a: u64, b: u64) -> u64 {
    a.checked_rem(b).unwrap_or(0)
}

fn fmod_i(a: i64, b: i64) -> i64 {
    if b == 0 {
        0
    } else {
        a.wrapping_rem(b)
    }
}

fn py_mod_f(a: f64, b: f64) -> f64 {
    let r = a % b;
    if r != 0.0 && ((r < 0.0) != (b < 0.0)) {
        r + b
    } else if r == 0.0 {
        0.0f64.copysign(b)
    } else {
        r
    }
}

fn pow_u(base: u64, mut exp: u64) -> u64 {
    let mut base = base;
    let mut acc: u64 = 1;
    while exp > 0 {
        if exp & 1 == 1 {
            acc = acc.wrapping_mul(base);
        }
        base = base.wrapping_mul(base);
        exp >>= 1;
    }
    acc
}

fn pow_i(base: i64, exp: i64) -> i64 {
    if exp < 0 {
        0
    } else {
        pow_u(base as u64, exp as u64) as i64
    }
}

fn recip_i(a: i64) -> i64 {
    if a == 0 {
        0
    } else {
        1i64.wrapping_div(a)
    }
}

fn recip_u(a: u64) -> u64 {
    div_u(1, a)
}

fn nan_max(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        f64::NAN
    } else {
        a.max(b)
    }
}

fn nan_min(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        f64::NAN
    } else {
        a.min(b)
    }
}

fn sign_f(a: f64) -> f64 {
    if a.is_nan() || a == 0.0 {
        a * 0.0
    } else {
        a.signum()
    }
}

fn rint(x: f64) -> f64 {
    let r = x.round();
    if (x - x.trunc()).abs() == 0.5 {
        2.0 * (x / 2.0).round()
    } else {
        r
    }
}

fn logaddexp(a: f64, b: f64) -> f64 {
    if a == b {
        return a + std::f64::consts::LN_2;
    }
    let m = nan_max(a, b);
    m + (-(a - b).abs()).exp().ln_1p()
}

fn logaddexp2(a: f64, b: f64) -> f64 {
    if a == b {
        return a + 1.0;
    }
    let m = nan_max(a, b);
    m + (-(a - b).abs()).exp2().ln_1p() / std::f64::consts::LN_2
}

fn shift_left(d: DType, a: Elem, b: Elem) -> Elem {
    let bits = (d.byte_width() * 8) as i64;
    let s = b.as_i64();
    match d.kind() {
        Kind::Unsigned => {
            let s = b.as_u64();
            Elem::UInt(if s >= bits as u64 { 0 } else { a.as_u64() << s })
        }
        _ => Elem::Int(if !(0..bits).contains(&s) { 0 } else { a.as_i64().wrapping_shl(s as u32) }),
    }
}

fn shift_right(d: DType, a: Elem, b: Elem) -> Elem {
    let bits = (d.byte_width() * 8) as i64;
    match d.kind() {
        Kind::Unsigned => {
            let s = b.as_u64();
            Elem::UInt(if s >= bits as u64 { 0 } else { a.as_u64() >> s })
        }
        _ => {
            let s = b.as_i64();
            let x = a.as_i64();
            Elem::Int(if (0..bits).contains(&s) {
                x >> s
            } else if x < 0 {
                -1
            } else {
                0
            })
        }
    }
}

fn modf(x: f64) -> (f64, f64) {
    if x.is_infinite() {
        (0.0f64.copysign(x), x)
    } else {
        let int = x.trunc();
        ((x - int).copysign(x), int)
    }
}

fn frexp(x: f64) -> (f64, i32) {
    if x == 0.0 || !x.is_finite() {
        return (x, 0);
    }
    let bits = x.to_bits();
    let raw_exp = ((bits >> 52) & 0x7ff) as i32;
    if raw_exp == 0 {
        // Subnormal: scale into the normal range first.
        let (m, e) = frexp(x * 2f64.powi(54));
        return (m, e - 54);
    }
    let mantissa = f64::from_bits((bits & !(0x7ff << 52)) | (1022 << 52));
    (mantissa, raw_exp - 1022)
}

fn ldexp(x: f64, e: i64) -> f64 {
    let mut e = e.clamp(-2200, 2200) as i32;
    let mut x = x;
    while e > 1000 {
        x *= 2f64.powi(1000);
        e -= 1000;
    }
    while e < -1000 {
        x *= 2f64.powi(-1000);
        e += 1000;
    }
    x * 2f64.powi(e)
}

fn next_after(d: DType, x: f64, y: f64) -> f64 {
    if x.is_nan() || y.is_nan() {
        return f64::NAN;
    }
    if x == y {
        return y;
    }
    let up = y > x;
    match d {
        DType::Float16 => {
            let h = f16::from_f64(x);
            if h.to_f64() == 0.0 {
                let tiny = f16::from_bits(1).to_f64();
                return if up { tiny } else { -tiny };
            }
            let bits = h.to_bits();
            let bits = if (h.to_f64() > 0.0) == up { bits + 1 } else { bits - 1 };
            f16::from_bits(bits).to_f64()
        }
        DType::Float32 => {
            let f = x as f32;
            if f == 0.0 {
                let tiny = f32::from_bits(1) as f64;
                return if up { tiny } else { -tiny };
            }
            let bits = f.to_bits();
            let bits = if (f > 0.0) == up { bits + 1 } else { bits - 1 };
            f32::from_bits(bits) as f64
        }
        _ => {
            if x == 0.0 {
                let tiny = f64::from_bits(1);
                return if up { tiny } else { -tiny };
            }
            let bits = x.to_bits();
            let bits = if (x > 0.0) == up { bits + 1 } else { bits - 1 };
            f64::from_bits(bits)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn run(ufunc: Ufunc, dtypes: &[DType], args: &[Elem]) -> [Elem; 2] {
        let operands: Vec<_> = dtypes.iter().map(|&d| (d, false)).collect();
        let lp = ufunc.resolve(&operands).unwrap();
        let cast: Vec<Elem> = args
            .iter()
            .zip(&lp.inputs)
            .map(|(e, &d)| e.cast(d))
            .collect();
        apply(ufunc, &lp, &cast)
    }

    #[test]
    fn test_integer_wraparound() {
        let r = run(Ufunc::Add, &[DType::Int8, DType::Int8], &[Elem::Int(100), Elem::Int(100)]);
        assert_eq!(r[0], Elem::Int(-56));
        let r = run(Ufunc::Negative, &[DType::Uint8], &[Elem::UInt(1)]);
        assert_eq!(r[0], Elem::UInt(255));
        let r = run(Ufunc::Absolute, &[DType::Int8], &[Elem::Int(-128)]);
        assert_eq!(r[0], Elem::Int(-128));
    }

    #[test]
    fn test_python_division_semantics() {
        let i = [DType::Int64, DType::Int64];
        assert_eq!(run(Ufunc::FloorDivide, &i, &[Elem::Int(-7), Elem::Int(2)])[0], Elem::Int(-4));
        assert_eq!(run(Ufunc::Remainder, &i, &[Elem::Int(-7), Elem::Int(2)])[0], Elem::Int(1));
        assert_eq!(run(Ufunc::Fmod, &i, &[Elem::Int(-7), Elem::Int(2)])[0], Elem::Int(-1));
        assert_eq!(run(Ufunc::FloorDivide, &i, &[Elem::Int(3), Elem::Int(0)])[0], Elem::Int(0));
        let f = [DType::Float64, DType::Float64];
        assert_eq!(
            run(Ufunc::Remainder, &f, &[Elem::Float(-7.0), Elem::Float(2.0)])[0],
            Elem::Float(1.0)
        );
        assert_eq!(
            run(Ufunc::FloorDivide, &f, &[Elem::Float(-7.0), Elem::Float(2.0)])[0],
            Elem::Float(-4.0)
        );
        let r = run(Ufunc::Divmod, &i, &[Elem::Int(7), Elem::Int(-2)]);
        assert_eq!(r, [Elem::Int(-4), Elem::Int(-1)]);
    }

    #[test]
    fn test_float_rounding() {
        let r = run(Ufunc::TrueDivide, &[DType::Float32, DType::Float32], &[Elem::Float(1.0), Elem::Float(3.0)]);
        assert_eq!(r[0], Elem::Float((1.0f32 / 3.0f32) as f64));
        let r = run(Ufunc::Sqrt, &[DType::Int8], &[Elem::Int(2)]);
        assert_eq!(r[0], Elem::Float(f16::from_f64(2f64.sqrt()).to_f64()));
    }

    #[test]
    fn test_nan_handling() {
        let f = [DType::Float64, DType::Float64];
        let nan = Elem::Float(f64::NAN);
        assert!(run(Ufunc::Maximum, &f, &[nan, Elem::Float(1.0)])[0].as_f64().is_nan());
        assert_eq!(run(Ufunc::Fmax, &f, &[nan, Elem::Float(1.0)])[0], Elem::Float(1.0));
        assert_eq!(run(Ufunc::NotEqual, &f, &[nan, nan])[0], Elem::Bool(true));
        assert_eq!(run(Ufunc::Equal, &f, &[nan, nan])[0], Elem::Bool(false));
    }

    #[test]
    fn test_multi_output() {
        let r = run(Ufunc::Modf, &[DType::Float64], &[Elem::Float(-2.5)]);
        assert_eq!(r, [Elem::Float(-0.5), Elem::Float(-2.0)]);
        let r = run(Ufunc::Frexp, &[DType::Float64], &[Elem::Float(8.0)]);
        assert_eq!(r, [Elem::Float(0.5), Elem::Int(4)]);
        let (m, e) = frexp(f64::MIN_POSITIVE / 4.0);
        assert_relative_eq!(ldexp(m, e as i64), f64::MIN_POSITIVE / 4.0);
    }

    #[test]
    fn test_shifts_and_rint() {
        let i = [DType::Int8, DType::Int8];
        assert_eq!(run(Ufunc::LeftShift, &i, &[Elem::Int(1), Elem::Int(7)])[0], Elem::Int(-128));
        assert_eq!(run(Ufunc::LeftShift, &i, &[Elem::Int(1), Elem::Int(8)])[0], Elem::Int(0));
        assert_eq!(run(Ufunc::RightShift, &i, &[Elem::Int(-4), Elem::Int(9)])[0], Elem::Int(-1));
        assert_eq!(rint(2.5), 2.0);
        assert_eq!(rint(3.5), 4.0);
        assert_eq!(rint(-2.5), -2.0);
        assert_eq!(rint(1.2), 1.0);
    }

    #[test]
    fn test_special_functions() {
        let f = [DType::Float64, DType::Float64];
        let r = run(Ufunc::Logaddexp, &f, &[Elem::Float(1.0), Elem::Float(2.0)]);
        assert_relative_eq!(r[0].as_f64(), (1f64.exp() + 2f64.exp()).ln(), epsilon = 1e-12);
        let r = run(Ufunc::Nextafter, &f, &[Elem::Float(1.0), Elem::Float(2.0)]);
        assert_eq!(r[0].as_f64(), 1.0 + f64::EPSILON);
        let r = run(Ufunc::Nextafter, &[DType::Float32, DType::Float32], &[Elem::Float(1.0), Elem::Float(0.0)]);
        assert_eq!(r[0].as_f64(), (1.0f32 - f32::EPSILON / 2.0) as f64);
        let r = run(
            Ufunc::Clip,
            &[DType::Int32, DType::Int32, DType::Int32],
            &[Elem::Int(7), Elem::Int(0), Elem::Int(5)],
        );
        assert_eq!(r[0], Elem::Int(5));
    }
}
