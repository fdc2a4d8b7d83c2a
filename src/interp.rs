//! Concrete evaluation of operators over fully concrete operands. Every
//! function answers `None` when the operand kinds do not line up; the
//! caller then degrades to the lattice-level operator.

use crate::ai::domains::{AValue, N64};
use crate::cfg::{Ast, BOp, COp, UOp, VOp};

pub fn interp_uop(op: UOp, v: &AValue) -> Option<AValue> {
    use AValue::*;
    Some(match (op, v) {
        (UOp::Neg, Math(n)) => Math(n.checked_neg()?),
        (UOp::Neg, Num(n)) => Num(N64(-n.0)),
        (UOp::Neg, BigInt(n)) => BigInt(n.checked_neg()?),
        (UOp::Not, Bool(b)) => Bool(!b),
        (UOp::BNot, Math(n)) => Math(!n),
        (UOp::BNot, BigInt(n)) => BigInt(!n),
        (UOp::Abs, Math(n)) => Math(n.checked_abs()?),
        (UOp::Abs, Num(n)) => Num(N64(n.0.abs())),
        (UOp::Floor, Math(n)) => Math(*n),
        (UOp::Floor, Num(n)) => Num(N64(n.0.floor())),
        _ => return None,
    })
}

/// Binary constant folding. `Eq` is absent on purpose: value identity needs
/// the heap for location operands and is answered by the state.
pub fn interp_bop(op: BOp, l: &AValue, r: &AValue) -> Option<AValue> {
    use AValue::*;
    Some(match (op, l, r) {
        (BOp::Add, Math(a), Math(b)) => Math(a.checked_add(*b)?),
        (BOp::Add, Num(a), Num(b)) => Num(N64(a.0 + b.0)),
        (BOp::Add, BigInt(a), BigInt(b)) => BigInt(a.checked_add(*b)?),
        (BOp::Sub, Math(a), Math(b)) => Math(a.checked_sub(*b)?),
        (BOp::Sub, Num(a), Num(b)) => Num(N64(a.0 - b.0)),
        (BOp::Sub, BigInt(a), BigInt(b)) => BigInt(a.checked_sub(*b)?),
        (BOp::Mul, Math(a), Math(b)) => Math(a.checked_mul(*b)?),
        (BOp::Mul, Num(a), Num(b)) => Num(N64(a.0 * b.0)),
        (BOp::Mul, BigInt(a), BigInt(b)) => BigInt(a.checked_mul(*b)?),
        (BOp::Div, Math(a), Math(b)) if *b != 0 => Math(a.checked_div(*b)?),
        (BOp::Div, Num(a), Num(b)) => Num(N64(a.0 / b.0)),
        (BOp::Div, BigInt(a), BigInt(b)) if *b != 0 => BigInt(a.checked_div(*b)?),
        (BOp::Mod, Math(a), Math(b)) if *b != 0 => Math(a.checked_rem(*b)?),
        (BOp::Mod, Num(a), Num(b)) => Num(N64(a.0 % b.0)),
        (BOp::Mod, BigInt(a), BigInt(b)) if *b != 0 => BigInt(a.checked_rem(*b)?),
        (BOp::UMod, Math(a), Math(b)) if *b != 0 => Math(a.checked_rem_euclid(*b)?),
        (BOp::UMod, Num(a), Num(b)) => Num(N64(a.0.rem_euclid(b.0))),
        (BOp::UMod, BigInt(a), BigInt(b)) if *b != 0 => BigInt(a.checked_rem_euclid(*b)?),
        (BOp::Pow, Math(a), Math(b)) => Math(a.checked_pow(u32::try_from(*b).ok()?)?),
        (BOp::Pow, Num(a), Num(b)) => Num(N64(a.0.powf(b.0))),
        (BOp::Pow, BigInt(a), BigInt(b)) => BigInt(a.checked_pow(u32::try_from(*b).ok()?)?),
        (BOp::Lt, Math(a), Math(b)) => Bool(a < b),
        (BOp::Lt, Num(a), Num(b)) => Bool(a.0 < b.0),
        (BOp::Lt, BigInt(a), BigInt(b)) => Bool(a < b),
        (BOp::Equal, Math(a), Math(b)) => Bool(a == b),
        (BOp::Equal, Num(a), Num(b)) => Bool(a.0 == b.0),
        (BOp::Equal, BigInt(a), BigInt(b)) => Bool(a == b),
        (BOp::And, Bool(a), Bool(b)) => Bool(*a && *b),
        (BOp::Or, Bool(a), Bool(b)) => Bool(*a || *b),
        (BOp::Xor, Bool(a), Bool(b)) => Bool(a != b),
        (BOp::BAnd, Math(a), Math(b)) => Math(a & b),
        (BOp::BAnd, BigInt(a), BigInt(b)) => BigInt(a & b),
        (BOp::BOr, Math(a), Math(b)) => Math(a | b),
        (BOp::BOr, BigInt(a), BigInt(b)) => BigInt(a | b),
        (BOp::BXOr, Math(a), Math(b)) => Math(a ^ b),
        (BOp::BXOr, BigInt(a), BigInt(b)) => BigInt(a ^ b),
        (BOp::LShift, Math(a), Math(b)) => Math(a.checked_shl(u32::try_from(*b).ok()?)?),
        (BOp::SRShift, Math(a), Math(b)) => Math(a.checked_shr(u32::try_from(*b).ok()?)?),
        (BOp::URShift, Math(a), Math(b)) => {
            let s = u32::try_from(*b).ok()?;
            let u = u64::try_from(a & 0xffff_ffff).ok()?;
            Math(i128::from(u >> (s % 32)))
        }
        _ => return None,
    })
}

/// Variadic folding over fully concrete operands.
pub fn interp_vop(op: VOp, vs: &[AValue]) -> Option<AValue> {
    use AValue::*;
    match op {
        VOp::Min | VOp::Max => {
            let mut acc: Option<AValue> = None;
            for v in vs {
                acc = Some(match (acc, v) {
                    (None, v) => v.clone(),
                    (Some(Math(a)), Math(b)) => {
                        if op == VOp::Min {
                            Math(a.min(*b))
                        } else {
                            Math(a.max(*b))
                        }
                    }
                    (Some(a), b) => {
                        let x = as_f64(&a)?;
                        let y = as_f64(b)?;
                        let z = if op == VOp::Min { x.min(y) } else { x.max(y) };
                        Num(N64(z))
                    }
                });
            }
            acc
        }
        VOp::Concat => {
            let mut s = String::new();
            for v in vs {
                match v {
                    Str(x) => s.push_str(x),
                    CodeUnit(c) => s.push_str(&String::from_utf16_lossy(&[*c])),
                    _ => return None,
                }
            }
            Some(Str(s))
        }
    }
}

fn as_f64(v: &AValue) -> Option<f64> {
    match v {
        AValue::Math(n) => Some(*n as f64),
        AValue::Num(n) => Some(n.0),
        _ => None,
    }
}

pub fn convert(op: COp, v: &AValue, radix: Option<i128>) -> Option<AValue> {
    use AValue::*;
    Some(match (op, v) {
        (COp::ToMath, Math(n)) => Math(*n),
        (COp::ToMath, Num(n)) if n.0.fract() == 0.0 && n.0.is_finite() => Math(n.0 as i128),
        (COp::ToMath, BigInt(n)) => Math(*n),
        (COp::ToMath, CodeUnit(c)) => Math(i128::from(*c)),
        (COp::ToNumber, Math(n)) => Num(N64(*n as f64)),
        (COp::ToNumber, Num(n)) => Num(*n),
        (COp::ToNumber, Str(s)) => Num(N64(parse_number(s))),
        (COp::ToBigInt, Math(n)) => BigInt(*n),
        (COp::ToBigInt, BigInt(n)) => BigInt(*n),
        (COp::ToBigInt, Num(n)) if n.0.fract() == 0.0 && n.0.is_finite() => BigInt(n.0 as i128),
        (COp::ToStr, Str(s)) => Str(s.clone()),
        (COp::ToStr, Num(n)) => Str(number_to_string(n.0)),
        (COp::ToStr, Math(n)) => {
            let radix = u32::try_from(radix.unwrap_or(10)).ok()?;
            Str(math_to_string(*n, radix)?)
        }
        _ => return None,
    })
}

fn parse_number(s: &str) -> f64 {
    let t = s.trim();
    if t.is_empty() {
        0.0
    } else {
        t.parse::<f64>().unwrap_or(f64::NAN)
    }
}

/// Canonical ECMAScript Number-to-String for the cases the analysis folds.
pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 {
            "Infinity".to_string()
        } else {
            "-Infinity".to_string()
        }
    } else if n == 0.0 {
        "0".to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{}", n as i128)
    } else {
        format!("{n}")
    }
}

fn math_to_string(n: i128, radix: u32) -> Option<String> {
    if !(2..=36).contains(&radix) {
        return None;
    }
    if radix == 10 {
        return Some(n.to_string());
    }
    let neg = n < 0;
    let mut m = n.unsigned_abs();
    let mut digits = vec![];
    loop {
        let d = (m % u128::from(radix)) as u32;
        digits.push(std::char::from_digit(d, radix)?);
        m /= u128::from(radix);
        if m == 0 {
            break;
        }
    }
    if neg {
        digits.push('-');
    }
    Some(digits.into_iter().rev().collect())
}

/// A string is an array index iff its canonical Number stringification
/// round-trips and decodes below 2^32 - 1.
pub fn is_array_index(s: &str) -> bool {
    let Ok(n) = s.parse::<f64>() else {
        return false;
    };
    if number_to_string(n) != s {
        return false;
    }
    n >= 0.0 && n.fract() == 0.0 && (n as u64) < u64::from(u32::MAX)
}

/// Lexical syntax-directed operations evaluated directly on the token text.
pub fn interp_lexical(ast: &Ast, method: &str) -> Option<AValue> {
    let Ast::Lexical { text, .. } = ast else {
        return None;
    };
    Some(match method {
        "StringValue" | "SV" | "TV" | "TRV" => AValue::Str(text.clone()),
        "NumericValue" | "MV" => match text.parse::<i128>() {
            Ok(n) => AValue::Math(n),
            Err(_) => AValue::Num(N64(parse_number(text))),
        },
        "Contains" => AValue::Bool(false),
        _ => return None,
    })
}

/// Declared return types of allocating operations, used to refine the type
/// of the returned object at return edges.
pub fn set_type(fname: &str) -> Option<&'static str> {
    Some(match fname {
        "OrdinaryObjectCreate" => "OrdinaryObject",
        "OrdinaryFunctionCreate" => "ECMAScriptFunctionObject",
        "ArrayCreate" => "ArrayExoticObject",
        _ => return None,
    })
}
