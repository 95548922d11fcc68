// Record values and the per-record kernels.
//
// Values are a tagged union over the types a field can carry. Two
// out-of-band tags ride along: Absent for fields not present in the
// current record, and Error for kernel failures. Kernels never panic;
// a bad operand produces Value::Error and record processing moves on.
//
// Disposition rules, applied uniformly:
//
// - Error in, error out.
// - Absent is the identity for + - * / and concatenation; unary
//   kernels map absent to absent; comparisons against absent yield
//   absent.
// - Empty (a present field with no text) flows through arithmetic
//   unchanged and reads as "" in string context.

use std::cmp::Ordering;
use std::fmt;
use std::fmt::Write as FmtWrite;
use std::rc::Rc;

use chrono::{NaiveDate, NaiveDateTime, TimeZone, Utc};
use regex::Regex;


// All values a field or subexpression can take.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Absent,
    Empty,
    Error,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<String>),
}


// How raw field text is mapped to a typed value at read time.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum TypeInference {
    IntFloatString,
    FloatString,
    StringOnly,
}


// Integer first (decimal or 0x hex), then float, else nothing.
fn parse_number(text: &str) -> Option<Value> {
    let t = text.trim();
    if t.is_empty() {
        return None;
    }
    let (sign, mag) = match t.strip_prefix('-') {
        Some(rest) => (-1i64, rest),
        None => (1i64, t),
    };
    if let Some(hex) = mag.strip_prefix("0x").or_else(|| mag.strip_prefix("0X")) {
        if let Ok(v) = i64::from_str_radix(hex, 16) {
            return Some(Value::Int(sign * v));
        }
        return None;
    }
    if let Ok(v) = t.parse::<i64>() {
        return Some(Value::Int(v));
    }
    if let Ok(v) = t.parse::<f64>() {
        return Some(Value::Float(v));
    }
    None
}


// Map raw field text to a typed value under the given inference mode.
pub fn infer_field_value(raw: &str, mode: TypeInference) -> Value {
    if raw.is_empty() {
        return Value::Empty;
    }
    match mode {
        TypeInference::StringOnly => Value::from_string(raw),
        TypeInference::FloatString => match raw.trim().parse::<f64>() {
            Ok(v) => Value::Float(v),
            Err(_) => Value::from_string(raw),
        },
        TypeInference::IntFloatString => match parse_number(raw) {
            Some(v) => v,
            None => Value::from_string(raw),
        },
    }
}


// Factors out the boiler plate in kernel implementations.
//
// There are two matchers: binary and unary. Both take the name of the
// method to be defined and a list of <pattern> => <expr> arms, which
// is the white-list of operands the kernel accepts. Error propagation
// and (for unary kernels) absent pass-through are prepended; anything
// not matched is a runtime error value.
macro_rules! kernel {
    (un $name:ident { $( $p:pat => $e:expr ),+ $(,)? } ) => {
        pub fn $name (&self) -> Value {
            use Value::*;
            #[allow(unreachable_patterns)]
            match self {
                Error => Error,
                Absent => Absent,
                $($p => $e),+ ,
                _ => Error
            }
        }
    };

    (bin $name:ident { $( $p:pat => $e:expr ),+ $(,)? } ) => {
        pub fn $name (&self, other: &Value) -> Value {
            use Value::*;
            #[allow(unreachable_patterns)]
            match (self, other) {
                (Error, _) | (_, Error) => Error,
                $($p => $e),+ ,
                _ => Error
            }
        }
    };
}


// One-argument math kernels that coerce to float.
macro_rules! float_kernel {
    ( $( $name:ident => $body:expr ),+ $(,)? ) => { $(
        pub fn $name (&self) -> Value {
            match self {
                Value::Error => Value::Error,
                Value::Absent => Value::Absent,
                v => match v.as_float() {
                    Some(x) => {
                        let f: fn(f64) -> f64 = $body;
                        Value::Float(f(x))
                    }
                    None => Value::Error,
                }
            }
        }
    )+ };
}


impl Value {
    pub fn from_string(s: &str) -> Value {
        Value::Str(Rc::new(String::from(s)))
    }

    // Numeric-literal token text from the parser.
    pub fn from_numeric_literal(text: &str) -> Value {
        match parse_number(text) {
            Some(v) => v,
            None => Value::Error,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Absent => "absent",
            Value::Empty => "empty",
            Value::Error => "error",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
        }
    }

    // Numeric view: ints, floats, and numeric strings.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            Value::Str(s) => match parse_number(s) {
                Some(Value::Int(v)) => Some(v as f64),
                Some(Value::Float(v)) => Some(v),
                _ => None,
            },
            _ => None,
        }
    }

    // Integral view: ints and integral strings. Floats are excluded;
    // bit-level kernels reject them.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Str(s) => match parse_number(s) {
                Some(Value::Int(v)) => Some(v),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn is_numeric_value(&self) -> bool {
        self.as_float().is_some()
    }

    // ----------------------------------------------------------------
    // Arithmetic

    kernel! { bin add {
        (Absent, Absent) => Absent,
        (Absent, b) => b.clone(),
        (a, Absent) => a.clone(),
        (Empty, _) => Empty,
        (_, Empty) => Empty,
        (Int(a), Int(b)) => match a.checked_add(*b) {
            Some(c) => Int(c),
            None => Float(*a as f64 + *b as f64),
        },
        (a, b) => match (a.as_float(), b.as_float()) {
            (Some(x), Some(y)) => Float(x + y),
            _ => Error,
        }
    } }

    kernel! { bin sub {
        (Absent, Absent) => Absent,
        (Absent, b) => b.neg(),
        (a, Absent) => a.clone(),
        (Empty, _) => Empty,
        (_, Empty) => Empty,
        (Int(a), Int(b)) => match a.checked_sub(*b) {
            Some(c) => Int(c),
            None => Float(*a as f64 - *b as f64),
        },
        (a, b) => match (a.as_float(), b.as_float()) {
            (Some(x), Some(y)) => Float(x - y),
            _ => Error,
        }
    } }

    kernel! { bin mul {
        (Absent, Absent) => Absent,
        (Absent, b) => b.clone(),
        (a, Absent) => a.clone(),
        (Empty, _) => Empty,
        (_, Empty) => Empty,
        (Int(a), Int(b)) => match a.checked_mul(*b) {
            Some(c) => Int(c),
            None => Float(*a as f64 * *b as f64),
        },
        (a, b) => match (a.as_float(), b.as_float()) {
            (Some(x), Some(y)) => Float(x * y),
            _ => Error,
        }
    } }

    // Integer division of exact multiples stays integer; everything
    // else goes to float.
    kernel! { bin div {
        (Absent, Absent) => Absent,
        (Absent, b) => match b.as_float() {
            Some(y) => Float(1.0 / y),
            None => Error,
        },
        (a, Absent) => a.clone(),
        (Empty, _) => Empty,
        (_, Empty) => Empty,
        (Int(a), Int(b)) => {
            if *b != 0 && a % b == 0 {
                Int(a / b)
            } else {
                Float(*a as f64 / *b as f64)
            }
        },
        (a, b) => match (a.as_float(), b.as_float()) {
            (Some(x), Some(y)) => Float(x / y),
            _ => Error,
        }
    } }

    // Floor division.
    kernel! { bin intdiv {
        (Empty, _) => Empty,
        (_, Empty) => Empty,
        (Int(a), Int(b)) => {
            if *b == 0 {
                Error
            } else {
                Int((*a as f64 / *b as f64).floor() as i64)
            }
        },
        (a, b) => match (a.as_float(), b.as_float()) {
            (Some(x), Some(y)) => Float((x / y).floor()),
            _ => Error,
        }
    } }

    // Floored modulus: the result carries the sign of the divisor.
    kernel! { bin modulo {
        (Empty, _) => Empty,
        (_, Empty) => Empty,
        (Int(a), Int(b)) => {
            if *b == 0 {
                Error
            } else {
                Int(((a % b) + b) % b)
            }
        },
        (a, b) => match (a.as_float(), b.as_float()) {
            (Some(x), Some(y)) => Float(x - y * (x / y).floor()),
            _ => Error,
        }
    } }

    // Exponentiation keeps small non-negative integer powers exact.
    kernel! { bin pow {
        (Empty, _) => Empty,
        (_, Empty) => Empty,
        (Int(a), Int(b)) => {
            if *b >= 0 && *b <= u32::MAX as i64 {
                match a.checked_pow(*b as u32) {
                    Some(c) => Int(c),
                    None => Float((*a as f64).powf(*b as f64)),
                }
            } else {
                Float((*a as f64).powf(*b as f64))
            }
        },
        (a, b) => match (a.as_float(), b.as_float()) {
            (Some(x), Some(y)) => Float(x.powf(y)),
            _ => Error,
        }
    } }

    kernel! { un neg {
        Int(a) => match a.checked_neg() {
            Some(c) => Int(c),
            None => Float(-(*a as f64)),
        },
        Float(a) => Float(-a),
        a => match a.as_float() {
            Some(x) => Float(-x),
            None => Error,
        }
    } }

    // Unary plus: numeric identity.
    kernel! { un upos {
        Int(a) => Int(*a),
        Float(a) => Float(*a),
        a => match a.as_float() {
            Some(x) => Float(x),
            None => Error,
        }
    } }

    kernel! { un abs {
        Int(a) => Int(a.wrapping_abs()),
        Float(a) => Float(a.abs()),
    } }

    kernel! { un sgn {
        Int(a) => Int(if *a > 0 { 1 } else if *a < 0 { -1 } else { 0 }),
        Float(a) => Float(if *a > 0.0 { 1.0 } else if *a < 0.0 { -1.0 } else { 0.0 }),
    } }

    kernel! { un ceil {
        Int(a) => Int(*a),
        Float(a) => Float(a.ceil()),
    } }

    kernel! { un floor {
        Int(a) => Int(*a),
        Float(a) => Float(a.floor()),
    } }

    kernel! { un round {
        Int(a) => Int(*a),
        Float(a) => Float(a.round()),
    } }

    // Round to the nearest multiple of m.
    kernel! { bin roundm {
        (Int(a), Int(m)) => {
            if *m == 0 {
                Error
            } else {
                Int((*a as f64 / *m as f64).round() as i64 * m)
            }
        },
        (a, m) => match (a.as_float(), m.as_float()) {
            (Some(x), Some(y)) => Float((x / y).round() * y),
            _ => Error,
        }
    } }

    // ----------------------------------------------------------------
    // Bit-level kernels: integers only.

    kernel! { bin bitand { (Int(a), Int(b)) => Int(a & b) } }
    kernel! { bin bitor  { (Int(a), Int(b)) => Int(a | b) } }
    kernel! { bin bitxor { (Int(a), Int(b)) => Int(a ^ b) } }
    kernel! { bin shl    { (Int(a), Int(b)) => Int(a.wrapping_shl(*b as u32)) } }
    kernel! { bin shr    { (Int(a), Int(b)) => Int(a.wrapping_shr(*b as u32)) } }
    kernel! { un  bitnot { Int(a) => Int(!a) } }

    // ----------------------------------------------------------------
    // Boolean kernels. && and || have dedicated short-circuit
    // evaluator nodes; the exclusive-or has no short circuit to take.

    kernel! { un not { Bool(a) => Bool(!a) } }
    kernel! { bin logical_xor { (Bool(a), Bool(b)) => Bool(a ^ b) } }

    // ----------------------------------------------------------------
    // Comparisons

    fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self.as_float(), other.as_float()) {
            (Some(x), Some(y)) => x.partial_cmp(&y),
            // Mixed or non-numeric operands compare as strings.
            _ => Some(self.to_string().cmp(&other.to_string())),
        }
    }

    kernel! { bin eq {
        (Absent, _) => Absent,
        (_, Absent) => Absent,
        (Bool(a), Bool(b)) => Bool(a == b),
        (a, b) => Bool(a.compare(b) == Some(Ordering::Equal)),
    } }

    kernel! { bin ne {
        (Absent, _) => Absent,
        (_, Absent) => Absent,
        (Bool(a), Bool(b)) => Bool(a != b),
        (a, b) => Bool(a.compare(b) != Some(Ordering::Equal)),
    } }

    kernel! { bin lt {
        (Absent, _) => Absent,
        (_, Absent) => Absent,
        (a, b) => match a.compare(b) {
            Some(ord) => Bool(ord == Ordering::Less),
            None => Error,
        }
    } }

    kernel! { bin gt {
        (Absent, _) => Absent,
        (_, Absent) => Absent,
        (a, b) => match a.compare(b) {
            Some(ord) => Bool(ord == Ordering::Greater),
            None => Error,
        }
    } }

    kernel! { bin le {
        (Absent, _) => Absent,
        (_, Absent) => Absent,
        (a, b) => match a.compare(b) {
            Some(ord) => Bool(ord != Ordering::Greater),
            None => Error,
        }
    } }

    kernel! { bin ge {
        (Absent, _) => Absent,
        (_, Absent) => Absent,
        (a, b) => match a.compare(b) {
            Some(ord) => Bool(ord != Ordering::Less),
            None => Error,
        }
    } }

    // ----------------------------------------------------------------
    // Strings

    kernel! { bin concat {
        (Absent, Absent) => Absent,
        (Absent, b) => b.clone(),
        (a, Absent) => a.clone(),
        (a, b) => Value::from_string(&format!("{}{}", a, b)),
    } }

    kernel! { un strlen {
        Empty => Int(0),
        Str(s) => Int(s.chars().count() as i64),
        a => Int(a.to_string().chars().count() as i64),
    } }

    kernel! { un tolower {
        Empty => Empty,
        Str(s) => Value::from_string(&s.to_lowercase()),
    } }

    kernel! { un toupper {
        Empty => Empty,
        Str(s) => Value::from_string(&s.to_uppercase()),
    } }

    kernel! { un hexfmt {
        Int(a) => Value::from_string(&format!("0x{:x}", a)),
    } }

    // substr(s, m, n): 0-indexed, inclusive on both ends, clamped to
    // the string bounds.
    pub fn substr(&self, m: &Value, n: &Value) -> Value {
        match self {
            Value::Error => return Value::Error,
            Value::Absent => return Value::Absent,
            _ => {}
        }
        let (lo, hi) = match (m.as_int(), n.as_int()) {
            (Some(lo), Some(hi)) => (lo, hi),
            _ => return Value::Error,
        };
        let text = self.to_string();
        let len = text.chars().count() as i64;
        let lo = lo.max(0);
        let hi = hi.min(len - 1);
        if lo > hi {
            return Value::from_string("");
        }
        let out: String = text
            .chars()
            .skip(lo as usize)
            .take((hi - lo + 1) as usize)
            .collect();
        Value::from_string(&out)
    }

    // printf-style numeric formatting; see fmtnum below.
    pub fn fmtnum(&self, fmt: &Value) -> Value {
        match (self, fmt) {
            (Value::Error, _) | (_, Value::Error) => Value::Error,
            (Value::Absent, _) => Value::Absent,
            (v, Value::Str(f)) => fmtnum(v, f),
            _ => Value::Error,
        }
    }

    // ----------------------------------------------------------------
    // Conversions

    kernel! { un to_boolean {
        Bool(a) => Bool(*a),
        Int(a) => Bool(*a != 0),
        Float(a) => Bool(*a != 0.0),
        Str(s) => match s.as_str() {
            "true" => Bool(true),
            "false" => Bool(false),
            _ => Error,
        },
    } }

    kernel! { un to_int {
        Int(a) => Int(*a),
        Float(a) => Int(*a as i64),
        Str(s) => match parse_number(s) {
            Some(Int(v)) => Int(v),
            Some(Float(v)) => Int(v as i64),
            _ => Error,
        },
    } }

    kernel! { un to_float {
        Int(a) => Float(*a as f64),
        Float(a) => Float(*a),
        Str(s) => match parse_number(s) {
            Some(Int(v)) => Float(v as f64),
            Some(Float(v)) => Float(v),
            _ => Error,
        },
    } }

    kernel! { un to_str {
        Empty => Empty,
        a => Value::from_string(&a.to_string()),
    } }

    // typeof applies to every tag, including the out-of-band ones.
    pub fn type_of(&self) -> Value {
        Value::from_string(self.type_name())
    }

    // ----------------------------------------------------------------
    // Predicates: total over all tags, always boolean.

    pub fn is_absent(&self) -> Value {
        Value::Bool(matches!(self, Value::Absent))
    }

    pub fn is_present(&self) -> Value {
        Value::Bool(!matches!(self, Value::Absent))
    }

    pub fn is_empty(&self) -> Value {
        Value::Bool(match self {
            Value::Empty => true,
            Value::Str(s) => s.is_empty(),
            _ => false,
        })
    }

    pub fn is_not_empty(&self) -> Value {
        match self.is_empty() {
            Value::Bool(b) => Value::Bool(!b),
            v => v,
        }
    }

    pub fn is_null(&self) -> Value {
        Value::Bool(match self {
            Value::Absent | Value::Empty => true,
            Value::Str(s) => s.is_empty(),
            _ => false,
        })
    }

    pub fn is_not_null(&self) -> Value {
        match self.is_null() {
            Value::Bool(b) => Value::Bool(!b),
            v => v,
        }
    }

    pub fn is_numeric(&self) -> Value {
        Value::Bool(self.is_numeric_value())
    }

    pub fn is_int(&self) -> Value {
        Value::Bool(matches!(self, Value::Int(_)))
    }

    pub fn is_float(&self) -> Value {
        Value::Bool(matches!(self, Value::Float(_)))
    }

    pub fn is_bool(&self) -> Value {
        Value::Bool(matches!(self, Value::Bool(_)))
    }

    pub fn is_string(&self) -> Value {
        Value::Bool(matches!(self, Value::Str(_) | Value::Empty))
    }

    // ----------------------------------------------------------------
    // Math

    float_kernel! {
        acos => |x| x.acos(),
        acosh => |x| x.acosh(),
        asin => |x| x.asin(),
        asinh => |x| x.asinh(),
        atan => |x| x.atan(),
        atanh => |x| x.atanh(),
        cbrt => |x| x.cbrt(),
        cos => |x| x.cos(),
        cosh => |x| x.cosh(),
        exp => |x| x.exp(),
        expm1 => |x| x.exp_m1(),
        log => |x| x.ln(),
        log10 => |x| x.log10(),
        log1p => |x| x.ln_1p(),
        sin => |x| x.sin(),
        sinh => |x| x.sinh(),
        sqrt => |x| x.sqrt(),
        tan => |x| x.tan(),
        tanh => |x| x.tanh(),
        erf => erf,
        erfc => erfc,
        qnorm => qnorm,
        invqnorm => invqnorm,
    }

    kernel! { bin atan2 {
        (a, b) => match (a.as_float(), b.as_float()) {
            (Some(y), Some(x)) => Float(y.atan2(x)),
            _ => Error,
        }
    } }

    // logifit(x, m, b) = 1 / (1 + exp(-m*x - b)).
    pub fn logifit(&self, m: &Value, b: &Value) -> Value {
        match (self.as_float(), m.as_float(), b.as_float()) {
            (Some(x), Some(m), Some(b)) => Value::Float(1.0 / (1.0 + (-m * x - b).exp())),
            _ => self.ternary_error(m, b),
        }
    }

    // ----------------------------------------------------------------
    // Modular arithmetic on integers.

    pub fn madd(&self, b: &Value, m: &Value) -> Value {
        match (self.as_int(), b.as_int(), m.as_int()) {
            (Some(a), Some(b), Some(m)) if m != 0 => {
                Value::Int((((a.wrapping_add(b)) % m) + m) % m)
            }
            _ => self.ternary_error(b, m),
        }
    }

    pub fn msub(&self, b: &Value, m: &Value) -> Value {
        match (self.as_int(), b.as_int(), m.as_int()) {
            (Some(a), Some(b), Some(m)) if m != 0 => {
                Value::Int((((a.wrapping_sub(b)) % m) + m) % m)
            }
            _ => self.ternary_error(b, m),
        }
    }

    pub fn mmul(&self, b: &Value, m: &Value) -> Value {
        match (self.as_int(), b.as_int(), m.as_int()) {
            (Some(a), Some(b), Some(m)) if m != 0 => {
                Value::Int((((a.wrapping_mul(b)) % m) + m) % m)
            }
            _ => self.ternary_error(b, m),
        }
    }

    // Square-and-multiply; exponent must be non-negative.
    pub fn mexp(&self, e: &Value, m: &Value) -> Value {
        match (self.as_int(), e.as_int(), m.as_int()) {
            (Some(a), Some(e), Some(m)) if e >= 0 && m != 0 => {
                let m128 = m as i128;
                let mut base = ((a as i128 % m128) + m128) % m128;
                let mut exp = e;
                let mut acc: i128 = 1 % m128;
                while exp > 0 {
                    if exp & 1 == 1 {
                        acc = acc * base % m128;
                    }
                    base = base * base % m128;
                    exp >>= 1;
                }
                Value::Int(acc as i64)
            }
            _ => self.ternary_error(e, m),
        }
    }

    fn ternary_error(&self, b: &Value, c: &Value) -> Value {
        if matches!(self, Value::Absent)
            || matches!(b, Value::Absent)
            || matches!(c, Value::Absent)
        {
            Value::Absent
        } else {
            Value::Error
        }
    }

    // ----------------------------------------------------------------
    // Variadic folds. Numbers sort below strings so that min prefers
    // numbers and max prefers strings; absent operands are skipped.

    pub fn min2(&self, other: &Value) -> Value {
        use Value::*;
        match (self, other) {
            (Error, _) | (_, Error) => Error,
            (Absent, b) => b.clone(),
            (a, Absent) => a.clone(),
            (a, b) => match (a.is_numeric_value(), b.is_numeric_value()) {
                (true, false) => a.clone(),
                (false, true) => b.clone(),
                _ => match a.compare(b) {
                    Some(Ordering::Greater) => b.clone(),
                    _ => a.clone(),
                },
            },
        }
    }

    pub fn max2(&self, other: &Value) -> Value {
        use Value::*;
        match (self, other) {
            (Error, _) | (_, Error) => Error,
            (Absent, b) => b.clone(),
            (a, Absent) => a.clone(),
            (a, b) => match (a.is_numeric_value(), b.is_numeric_value()) {
                (true, false) => b.clone(),
                (false, true) => a.clone(),
                _ => match a.compare(b) {
                    Some(Ordering::Less) => b.clone(),
                    _ => a.clone(),
                },
            },
        }
    }

    // ----------------------------------------------------------------
    // Time

    kernel! { un sec2gmt {
        a => match a.as_float() {
            Some(x) => format_epoch(x as i64, "%Y-%m-%dT%H:%M:%SZ"),
            None => Error,
        }
    } }

    kernel! { un sec2gmtdate {
        a => match a.as_float() {
            Some(x) => format_epoch(x as i64, "%Y-%m-%d"),
            None => Error,
        }
    } }

    kernel! { un gmt2sec {
        Str(s) => match NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%SZ") {
            Ok(dt) => Int(dt.timestamp()),
            Err(_) => match NaiveDate::parse_from_str(s, "%Y-%m-%d") {
                Ok(d) => Int(d.and_hms(0, 0, 0).timestamp()),
                Err(_) => Error,
            },
        },
    } }

    kernel! { bin strftime {
        (Absent, _) => Absent,
        (_, Absent) => Absent,
        (a, Str(f)) => match a.as_float() {
            Some(x) => format_epoch(x as i64, f),
            None => Error,
        }
    } }

    kernel! { bin strptime {
        (Absent, _) => Absent,
        (_, Absent) => Absent,
        (Str(s), Str(f)) => match NaiveDateTime::parse_from_str(s, f) {
            Ok(dt) => Int(dt.timestamp()),
            Err(_) => match NaiveDate::parse_from_str(s, f) {
                Ok(d) => Int(d.and_hms(0, 0, 0).timestamp()),
                Err(_) => Error,
            },
        },
    } }

    kernel! { un sec2dhms {
        a => match a.as_int() {
            Some(x) => Value::from_string(&sec2dhms(x)),
            None => Error,
        }
    } }

    kernel! { un fsec2dhms {
        a => match a.as_float() {
            Some(x) => Value::from_string(&fsec2dhms(x)),
            None => Error,
        }
    } }

    kernel! { un sec2hms {
        a => match a.as_int() {
            Some(x) => Value::from_string(&sec2hms(x)),
            None => Error,
        }
    } }

    kernel! { un fsec2hms {
        a => match a.as_float() {
            Some(x) => Value::from_string(&fsec2hms(x)),
            None => Error,
        }
    } }

    kernel! { un dhms2sec {
        Str(s) => match parse_dhms(s) {
            Some(x) => Int(x as i64),
            None => Error,
        },
    } }

    kernel! { un dhms2fsec {
        Str(s) => match parse_dhms(s) {
            Some(x) => Float(x),
            None => Error,
        },
    } }

    kernel! { un hms2sec {
        Str(s) => match parse_hms(s) {
            Some(x) => Int(x as i64),
            None => Error,
        },
    } }

    kernel! { un hms2fsec {
        Str(s) => match parse_hms(s) {
            Some(x) => Float(x),
            None => Error,
        },
    } }
}


impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Absent => write!(f, "(absent)"),
            Value::Empty => Ok(()),
            Value::Error => write!(f, "(error)"),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Str(v) => write!(f, "{}", v),
        }
    }
}


// ----------------------------------------------------------------
// Special functions. The standard library has no erf/erfc; these are
// the usual rational approximations, good to ~1.2e-7 relative error.

fn erfc(x: f64) -> f64 {
    let z = x.abs();
    let t = 1.0 / (1.0 + 0.5 * z);
    let ans = t
        * (-z * z - 1.26551223
            + t * (1.00002368
                + t * (0.37409196
                    + t * (0.09678418
                        + t * (-0.18628806
                            + t * (0.27886807
                                + t * (-1.13520398
                                    + t * (1.48851587
                                        + t * (-0.82215223 + t * 0.17087277)))))))))
            .exp();
    if x >= 0.0 {
        ans
    } else {
        2.0 - ans
    }
}

fn erf(x: f64) -> f64 {
    1.0 - erfc(x)
}

// Cumulative standard normal.
fn qnorm(x: f64) -> f64 {
    0.5 * erfc(-x / std::f64::consts::SQRT_2)
}

// Inverse cumulative standard normal, via Acklam's rational
// approximation with one Halley refinement step.
fn invqnorm(p: f64) -> f64 {
    if p <= 0.0 || p >= 1.0 {
        return 0.0;
    }
    const A: [f64; 6] = [
        -3.969683028665376e+01,
        2.209460984245205e+02,
        -2.759285104469687e+02,
        1.383577518672690e+02,
        -3.066479806614716e+01,
        2.506628277459239e+00,
    ];
    const B: [f64; 5] = [
        -5.447609879822406e+01,
        1.615858368580409e+02,
        -1.556989798598866e+02,
        6.680131188771972e+01,
        -1.328068155288572e+01,
    ];
    const C: [f64; 6] = [
        -7.784894002430293e-03,
        -3.223964580411365e-01,
        -2.400758277161838e+00,
        -2.549732539343734e+00,
        4.374664141464968e+00,
        2.938163982698783e+00,
    ];
    const D: [f64; 4] = [
        7.784695709041462e-03,
        3.224671290700398e-01,
        2.445134137142996e+00,
        3.754408661907416e+00,
    ];
    const P_LOW: f64 = 0.02425;

    let x = if p < P_LOW {
        let q = (-2.0 * p.ln()).sqrt();
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    } else if p <= 1.0 - P_LOW {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        let q = (-2.0 * (1.0 - p).ln()).sqrt();
        -(((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    };

    let e = qnorm(x) - p;
    let u = e * (2.0 * std::f64::consts::PI).sqrt() * (x * x / 2.0).exp();
    x - u / (1.0 + x * u / 2.0)
}


// ----------------------------------------------------------------
// Time formatting and parsing helpers.

fn format_epoch(sec: i64, fmt: &str) -> Value {
    match Utc.timestamp_opt(sec, 0).single() {
        Some(dt) => {
            // chrono reports bad format specifiers through the
            // formatter, so trap them here rather than panicking.
            let mut out = String::new();
            match write!(out, "{}", dt.format(fmt)) {
                Ok(_) => Value::from_string(&out),
                Err(_) => Value::Error,
            }
        }
        None => Value::Error,
    }
}

fn split_dhms(total: i64) -> (i64, i64, i64, i64, i64) {
    let sign = if total < 0 { -1 } else { 1 };
    let mut t = total.abs();
    let d = t / 86400;
    t %= 86400;
    let h = t / 3600;
    t %= 3600;
    (sign, d, h, t / 60, t % 60)
}

fn sec2dhms(total: i64) -> String {
    let (sign, d, h, m, s) = split_dhms(total);
    let sign = if sign < 0 { "-" } else { "" };
    if d > 0 {
        format!("{}{}d{:02}h{:02}m{:02}s", sign, d, h, m, s)
    } else if h > 0 {
        format!("{}{}h{:02}m{:02}s", sign, h, m, s)
    } else if m > 0 {
        format!("{}{}m{:02}s", sign, m, s)
    } else {
        format!("{}{}s", sign, s)
    }
}

fn fsec2dhms(total: f64) -> String {
    let (_, d, h, m, s) = split_dhms(total.trunc() as i64);
    let frac = total.abs().fract();
    let fs = s as f64 + frac;
    let sign = if total < 0.0 { "-" } else { "" };
    if d > 0 {
        format!("{}{}d{:02}h{:02}m{:09.6}s", sign, d, h, m, fs)
    } else if h > 0 {
        format!("{}{}h{:02}m{:09.6}s", sign, h, m, fs)
    } else if m > 0 {
        format!("{}{}m{:09.6}s", sign, m, fs)
    } else {
        format!("{}{:.6}s", sign, fs)
    }
}

fn sec2hms(total: i64) -> String {
    let (sign, d, h, m, s) = split_dhms(total);
    let sign = if sign < 0 { "-" } else { "" };
    format!("{}{:02}:{:02}:{:02}", sign, d * 24 + h, m, s)
}

fn fsec2hms(total: f64) -> String {
    let (_, d, h, m, s) = split_dhms(total.trunc() as i64);
    let fs = s as f64 + total.abs().fract();
    let sign = if total < 0.0 { "-" } else { "" };
    format!("{}{:02}:{:02}:{:09.6}", sign, d * 24 + h, m, fs)
}

fn parse_dhms(text: &str) -> Option<f64> {
    lazy_static! {
        static ref DHMS_REGEX: Regex = Regex::new(
            r"^(-)?(?:(\d+)d)?(?:(\d+)h)?(?:(\d+)m)?(?:(\d+(?:\.\d+)?)s)?$"
        ).unwrap();
    }
    let caps = DHMS_REGEX.captures(text)?;
    if caps.get(2).is_none() && caps.get(3).is_none() && caps.get(4).is_none()
        && caps.get(5).is_none()
    {
        return None;
    }
    let field = |i: usize| -> f64 {
        caps.get(i)
            .map(|m| m.as_str().parse::<f64>().unwrap_or(0.0))
            .unwrap_or(0.0)
    };
    let total =
        field(2) * 86400.0 + field(3) * 3600.0 + field(4) * 60.0 + field(5);
    Some(if caps.get(1).is_some() { -total } else { total })
}

fn parse_hms(text: &str) -> Option<f64> {
    let (sign, body) = match text.strip_prefix('-') {
        Some(rest) => (-1.0, rest),
        None => (1.0, text),
    };
    let parts: Vec<&str> = body.split(':').collect();
    if parts.is_empty() || parts.len() > 3 || parts.iter().any(|p| p.is_empty()) {
        return None;
    }
    let mut total = 0.0;
    for part in &parts {
        total = total * 60.0 + part.parse::<f64>().ok()?;
    }
    Some(sign * total)
}


// ----------------------------------------------------------------
// fmtnum: a printf-style formatter for one numeric value. Supports
// literal text around one %-spec with optional 0/- flags, width,
// precision, l/ll length modifiers, and the d i u x X o b e f g
// conversions.

fn fmtnum(v: &Value, spec: &str) -> Value {
    let bytes: Vec<char> = spec.chars().collect();
    let pct = match bytes.iter().position(|&c| c == '%') {
        Some(i) => i,
        None => return Value::Error,
    };
    let prefix: String = bytes[..pct].iter().collect();
    let mut i = pct + 1;

    let mut zero_pad = false;
    let mut left_align = false;
    while i < bytes.len() && (bytes[i] == '0' || bytes[i] == '-') {
        match bytes[i] {
            '0' => zero_pad = true,
            _ => left_align = true,
        }
        i += 1;
    }
    let mut width = 0usize;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        width = width * 10 + bytes[i].to_digit(10).unwrap() as usize;
        i += 1;
    }
    let mut precision: Option<usize> = None;
    if i < bytes.len() && bytes[i] == '.' {
        i += 1;
        let mut p = 0usize;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            p = p * 10 + bytes[i].to_digit(10).unwrap() as usize;
            i += 1;
        }
        precision = Some(p);
    }
    while i < bytes.len() && bytes[i] == 'l' {
        i += 1;
    }
    if i >= bytes.len() {
        return Value::Error;
    }
    let conv = bytes[i];
    let suffix: String = bytes[i + 1..].iter().collect();

    let body = match conv {
        'd' | 'i' | 'u' | 'x' | 'X' | 'o' | 'b' => {
            let n = match v.as_int() {
                Some(n) => n,
                None => match v.as_float() {
                    Some(f) => f as i64,
                    None => return Value::Error,
                },
            };
            let digits = match conv {
                'x' => format!("{:x}", n),
                'X' => format!("{:X}", n),
                'o' => format!("{:o}", n),
                'b' => format!("{:b}", n),
                _ => format!("{}", n),
            };
            pad(digits, width, zero_pad, left_align)
        }
        'e' | 'E' | 'f' | 'F' | 'g' | 'G' => {
            let x = match v.as_float() {
                Some(x) => x,
                None => return Value::Error,
            };
            let digits = match conv {
                'e' | 'E' => {
                    let p = precision.unwrap_or(6);
                    let s = format!("{:.*e}", p, x);
                    if conv == 'E' { s.to_uppercase() } else { s }
                }
                'g' | 'G' => format!("{}", x),
                _ => format!("{:.*}", precision.unwrap_or(6), x),
            };
            pad(digits, width, zero_pad, left_align)
        }
        's' => pad(v.to_string(), width, false, left_align),
        _ => return Value::Error,
    };

    Value::from_string(&format!("{}{}{}", prefix, body, suffix))
}

fn pad(digits: String, width: usize, zero_pad: bool, left_align: bool) -> String {
    if digits.len() >= width {
        return digits;
    }
    let fill = width - digits.len();
    if left_align {
        format!("{}{}", digits, " ".repeat(fill))
    } else if zero_pad {
        if let Some(rest) = digits.strip_prefix('-') {
            format!("-{}{}", "0".repeat(fill), rest)
        } else {
            format!("{}{}", "0".repeat(fill), digits)
        }
    } else {
        format!("{}{}", " ".repeat(fill), digits)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use Value::*;

    // Shortcut for creating a Str value from a literal.
    fn s(v: &'static str) -> Value {
        Value::from_string(v)
    }

    #[test]
    fn test_inference() {
        assert_eq!(infer_field_value("3", TypeInference::IntFloatString), Int(3));
        assert_eq!(
            infer_field_value("3", TypeInference::FloatString),
            Float(3.0)
        );
        assert_eq!(infer_field_value("3", TypeInference::StringOnly), s("3"));
        assert_eq!(
            infer_field_value("0xff", TypeInference::IntFloatString),
            Int(255)
        );
        assert_eq!(
            infer_field_value("-2.5", TypeInference::IntFloatString),
            Float(-2.5)
        );
        assert_eq!(infer_field_value("", TypeInference::IntFloatString), Empty);
        assert_eq!(
            infer_field_value("xyz", TypeInference::IntFloatString),
            s("xyz")
        );
    }

    #[test]
    fn test_arithmetic_promotion() {
        assert_eq!(Int(1).add(&Int(2)), Int(3));
        assert_eq!(Int(1).add(&Float(2.5)), Float(3.5));
        assert_eq!(Int(i64::MAX).add(&Int(1)), Float(i64::MAX as f64 + 1.0));
        assert_eq!(Int(6).div(&Int(2)), Int(3));
        assert_eq!(Int(7).div(&Int(2)), Float(3.5));
        assert_eq!(Int(7).intdiv(&Int(2)), Int(3));
        assert_eq!(Int(-7).intdiv(&Int(2)), Int(-4));
        assert_eq!(Int(-7).modulo(&Int(2)), Int(1));
        assert_eq!(Int(2).pow(&Int(10)), Int(1024));
        assert_eq!(Int(2).pow(&Int(-1)), Float(0.5));
    }

    #[test]
    fn test_absent_is_identity() {
        assert_eq!(Absent.add(&Int(2)), Int(2));
        assert_eq!(Int(2).add(&Absent), Int(2));
        assert_eq!(Absent.sub(&Int(2)), Int(-2));
        assert_eq!(Int(3).mul(&Absent), Int(3));
        assert_eq!(Absent.add(&Absent), Absent);
        assert_eq!(Absent.neg(), Absent);
        assert_eq!(s("x").concat(&Absent), s("x"));
    }

    #[test]
    fn test_error_propagates() {
        assert_eq!(Error.add(&Int(1)), Error);
        assert_eq!(Int(1).mul(&Error), Error);
        assert_eq!(Error.not(), Error);
        assert_eq!(Bool(true).logical_xor(&Int(1)), Error);
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(Int(2).lt(&Int(3)), Bool(true));
        assert_eq!(Int(2).lt(&Float(1.5)), Bool(false));
        assert_eq!(s("abc").lt(&s("abd")), Bool(true));
        assert_eq!(Int(2).eq(&Float(2.0)), Bool(true));
        assert_eq!(Int(2).eq(&s("2")), Bool(true));
        assert_eq!(Bool(true).eq(&Bool(true)), Bool(true));
        assert_eq!(Absent.lt(&Int(1)), Absent);
    }

    #[test]
    fn test_concat() {
        assert_eq!(s("foo").concat(&s("bar")), s("foobar"));
        assert_eq!(s("n=").concat(&Int(3)), s("n=3"));
        assert_eq!(Empty.concat(&s("x")), s("x"));
    }

    #[test]
    fn test_strings() {
        assert_eq!(s("hello").strlen(), Int(5));
        assert_eq!(Empty.strlen(), Int(0));
        assert_eq!(s("Hello").tolower(), s("hello"));
        assert_eq!(s("Hello").toupper(), s("HELLO"));
        assert_eq!(Int(255).hexfmt(), s("0xff"));
        assert_eq!(s("hello").substr(&Int(1), &Int(3)), s("ell"));
        assert_eq!(s("hello").substr(&Int(-2), &Int(99)), s("hello"));
        assert_eq!(s("hello").substr(&Int(3), &Int(1)), s(""));
        assert_eq!(Absent.substr(&Int(0), &Int(1)), Absent);
    }

    #[test]
    fn test_fmtnum() {
        assert_eq!(Int(255).fmtnum(&s("%08llx")), s("000000ff"));
        assert_eq!(Int(17).fmtnum(&s("%d")), s("17"));
        assert_eq!(Int(17).fmtnum(&s("[%5d]")), s("[   17]"));
        assert_eq!(Int(17).fmtnum(&s("%-5d|")), s("17   |"));
        assert_eq!(Float(3.14159).fmtnum(&s("%.2f")), s("3.14"));
        assert_eq!(Int(-5).fmtnum(&s("%04d")), s("-005"));
        assert_eq!(s("junk").fmtnum(&s("%d")), Error);
    }

    #[test]
    fn test_conversions() {
        assert_eq!(s("true").to_boolean(), Bool(true));
        assert_eq!(Int(0).to_boolean(), Bool(false));
        assert_eq!(Float(2.9).to_int(), Int(2));
        assert_eq!(s("2.5").to_float(), Float(2.5));
        assert_eq!(Int(3).to_str(), s("3"));
        assert_eq!(Float(2.5).type_of(), s("float"));
        assert_eq!(Absent.type_of(), s("absent"));
    }

    #[test]
    fn test_predicates() {
        assert_eq!(Absent.is_absent(), Bool(true));
        assert_eq!(Absent.is_null(), Bool(true));
        assert_eq!(Empty.is_empty(), Bool(true));
        assert_eq!(s("").is_empty(), Bool(true));
        assert_eq!(s("x").is_not_empty(), Bool(true));
        assert_eq!(Int(3).is_numeric(), Bool(true));
        assert_eq!(s("3.5").is_numeric(), Bool(true));
        assert_eq!(s("abc").is_numeric(), Bool(false));
        assert_eq!(Int(3).is_int(), Bool(true));
        assert_eq!(Float(3.0).is_float(), Bool(true));
        assert_eq!(Bool(true).is_bool(), Bool(true));
        assert_eq!(s("x").is_string(), Bool(true));
    }

    #[test]
    fn test_math() {
        assert_eq!(Int(-3).abs(), Int(3));
        assert_eq!(Float(-0.5).sgn(), Float(-1.0));
        assert_eq!(Int(0).sgn(), Int(0));
        assert_eq!(Float(2.5).floor(), Float(2.0));
        assert_eq!(Int(20).roundm(&Int(6)), Int(18));
        assert_eq!(Float(4.0).sqrt(), Float(2.0));
        match Float(0.0).erf() {
            Float(x) => assert!(x.abs() < 1e-9),
            v => panic!("unexpected {:?}", v),
        }
        match Float(0.5).invqnorm() {
            Float(x) => assert!(x.abs() < 1e-9),
            v => panic!("unexpected {:?}", v),
        }
        // qnorm and invqnorm are inverses away from the tails.
        match Float(1.0).qnorm() {
            Float(p) => match Float(p).invqnorm() {
                Float(x) => assert!((x - 1.0).abs() < 1e-6),
                v => panic!("unexpected {:?}", v),
            },
            v => panic!("unexpected {:?}", v),
        }
    }

    #[test]
    fn test_modular() {
        assert_eq!(Int(7).madd(&Int(8), &Int(10)), Int(5));
        assert_eq!(Int(3).msub(&Int(8), &Int(10)), Int(5));
        assert_eq!(Int(7).mmul(&Int(8), &Int(10)), Int(6));
        assert_eq!(Int(2).mexp(&Int(10), &Int(1000)), Int(24));
        assert_eq!(Int(2).mexp(&Int(0), &Int(7)), Int(1));
    }

    #[test]
    fn test_minmax() {
        assert_eq!(Int(2).min2(&Int(3)), Int(2));
        assert_eq!(Int(2).max2(&Float(2.5)), Float(2.5));
        assert_eq!(Int(2).min2(&s("abc")), Int(2));
        assert_eq!(Int(2).max2(&s("abc")), s("abc"));
        assert_eq!(Absent.min2(&Int(5)), Int(5));
    }

    #[test]
    fn test_time_formatting() {
        assert_eq!(Int(0).sec2gmt(), s("1970-01-01T00:00:00Z"));
        assert_eq!(Int(86400).sec2gmtdate(), s("1970-01-02"));
        assert_eq!(s("1970-01-01T00:01:00Z").gmt2sec(), Int(60));
        assert_eq!(
            Int(0).strftime(&s("%Y/%m/%d")),
            s("1970/01/01")
        );
        assert_eq!(
            s("1970-01-02 00:00:00").strptime(&s("%Y-%m-%d %H:%M:%S")),
            Int(86400)
        );
    }

    #[test]
    fn test_dhms() {
        assert_eq!(Int(90061).sec2dhms(), s("1d01h01m01s"));
        assert_eq!(Int(3661).sec2dhms(), s("1h01m01s"));
        assert_eq!(Int(61).sec2dhms(), s("1m01s"));
        assert_eq!(Int(7).sec2dhms(), s("7s"));
        assert_eq!(s("1d01h01m01s").dhms2sec(), Int(90061));
        assert_eq!(s("1h01m01s").dhms2sec(), Int(3661));
        assert_eq!(Int(3661).sec2hms(), s("01:01:01"));
        assert_eq!(s("01:01:01").hms2sec(), Int(3661));
        assert_eq!(s("-00:01:30").hms2fsec(), Float(-90.0));
        assert_eq!(Float(1.25).fsec2hms(), s("00:00:01.250000"));
    }
}
