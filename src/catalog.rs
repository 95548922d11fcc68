// The static catalog of built-in operators and functions: one row
// per (name, arity) pair, shared process-wide. Resolution selects by
// name and user-provided arity; a handful of names appear twice with
// different arities (unary and binary + and -).

use fnv::FnvHashSet;


#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FunctionClass {
    Arithmetic,
    Math,
    Boolean,
    String,
    Conversion,
    Time,
}

impl FunctionClass {
    pub fn name(self) -> &'static str {
        match self {
            FunctionClass::Arithmetic => "arithmetic",
            FunctionClass::Math => "math",
            FunctionClass::Boolean => "boolean",
            FunctionClass::String => "string",
            FunctionClass::Conversion => "conversion",
            FunctionClass::Time => "time",
        }
    }
}


pub struct FunctionLookup {
    pub class: FunctionClass,
    pub name: &'static str,
    pub arity: usize,
    pub variadic: bool,
    pub usage: &'static str,
}


macro_rules! entry {
    ($class:ident, $name:expr, $arity:expr, $usage:expr) => {
        FunctionLookup {
            class: FunctionClass::$class,
            name: $name,
            arity: $arity,
            variadic: false,
            usage: $usage,
        }
    };
}

macro_rules! variadic_entry {
    ($class:ident, $name:expr, $usage:expr) => {
        FunctionLookup {
            class: FunctionClass::$class,
            name: $name,
            arity: 0,
            variadic: true,
            usage: $usage,
        }
    };
}


pub static FUNCTION_LOOKUP_TABLE: &[FunctionLookup] = &[
    entry!(Arithmetic, "+", 2, "Addition."),
    entry!(Arithmetic, "+", 1, "Unary plus."),
    entry!(Arithmetic, "-", 2, "Subtraction."),
    entry!(Arithmetic, "-", 1, "Unary minus."),
    entry!(Arithmetic, "*", 2, "Multiplication."),
    entry!(Arithmetic, "/", 2, "Division."),
    entry!(Arithmetic, "//", 2, "Integer division, rounding toward negative."),
    entry!(Arithmetic, "%", 2, "Remainder; never negative-valued for positive modulus."),
    entry!(Arithmetic, "**", 2, "Exponentiation; same as pow."),
    entry!(Arithmetic, "&", 2, "Bitwise AND."),
    entry!(Arithmetic, "|", 2, "Bitwise OR."),
    entry!(Arithmetic, "^", 2, "Bitwise XOR."),
    entry!(Arithmetic, "<<", 2, "Bitwise left-shift."),
    entry!(Arithmetic, ">>", 2, "Bitwise right-shift."),
    entry!(Arithmetic, "~", 1, "Bitwise NOT."),
    entry!(Boolean, "!", 1, "Logical negation."),
    entry!(Boolean, "&&", 2, "Logical AND."),
    entry!(Boolean, "||", 2, "Logical OR."),
    entry!(Boolean, "^^", 2, "Logical XOR."),
    entry!(Boolean, "==", 2, "String/numeric equality. Mixing number and string results in string compare."),
    entry!(Boolean, "!=", 2, "String/numeric inequality. Mixing number and string results in string compare."),
    entry!(Boolean, ">", 2, "String/numeric greater-than. Mixing number and string results in string compare."),
    entry!(Boolean, ">=", 2, "String/numeric greater-than-or-equals."),
    entry!(Boolean, "<", 2, "String/numeric less-than. Mixing number and string results in string compare."),
    entry!(Boolean, "<=", 2, "String/numeric less-than-or-equals."),
    entry!(Boolean, "=~", 2, "String (left-hand side) matches regex (right-hand side), e.g. '$name =~ \"^a.*b$\"'."),
    entry!(Boolean, "!=~", 2, "String (left-hand side) does not match regex (right-hand side)."),
    entry!(Boolean, "? :", 3, "Standard ternary operator."),
    entry!(Math, "abs", 1, "Absolute value."),
    entry!(Math, "acos", 1, "Inverse trigonometric cosine."),
    entry!(Math, "acosh", 1, "Inverse hyperbolic cosine."),
    entry!(Math, "asin", 1, "Inverse trigonometric sine."),
    entry!(Math, "asinh", 1, "Inverse hyperbolic sine."),
    entry!(Math, "atan", 1, "One-argument arctangent."),
    entry!(Math, "atan2", 2, "Two-argument arctangent."),
    entry!(Math, "atanh", 1, "Inverse hyperbolic tangent."),
    entry!(Math, "cbrt", 1, "Cube root."),
    entry!(Math, "ceil", 1, "Ceiling: nearest integer at or above."),
    entry!(Math, "cos", 1, "Trigonometric cosine."),
    entry!(Math, "cosh", 1, "Hyperbolic cosine."),
    entry!(Math, "erf", 1, "Error function."),
    entry!(Math, "erfc", 1, "Complementary error function."),
    entry!(Math, "exp", 1, "Exponential function e**x."),
    entry!(Math, "expm1", 1, "e**x - 1."),
    entry!(Math, "floor", 1, "Floor: nearest integer at or below."),
    entry!(Math, "invqnorm", 1, "Inverse of normal cumulative distribution function."),
    entry!(Math, "log", 1, "Natural (base-e) logarithm."),
    entry!(Math, "log10", 1, "Base-10 logarithm."),
    entry!(Math, "log1p", 1, "log(1+x)."),
    entry!(Math, "logifit", 3, "Given m and b from logistic regression, compute fit: $yhat=logifit($x,$m,$b)."),
    entry!(Math, "madd", 3, "a + b mod m (integers)."),
    entry!(Math, "mexp", 3, "a ** b mod m (integers)."),
    variadic_entry!(Math, "max", "max of n numeric arguments; strings compare after numbers."),
    variadic_entry!(Math, "min", "min of n numeric arguments; numbers compare before strings."),
    entry!(Math, "mmul", 3, "a * b mod m (integers)."),
    entry!(Math, "msub", 3, "a - b mod m (integers)."),
    entry!(Math, "pow", 2, "Exponentiation; same as **."),
    entry!(Math, "qnorm", 1, "Normal cumulative distribution function."),
    entry!(Math, "round", 1, "Round to nearest integer."),
    entry!(Math, "roundm", 2, "Round to nearest multiple of m: roundm($x,$m) is the same as round($x/$m)*$m."),
    entry!(Math, "sgn", 1, "+1 for positive input, 0 for zero input, -1 for negative input."),
    entry!(Math, "sin", 1, "Trigonometric sine."),
    entry!(Math, "sinh", 1, "Hyperbolic sine."),
    entry!(Math, "sqrt", 1, "Square root."),
    entry!(Math, "tan", 1, "Trigonometric tangent."),
    entry!(Math, "tanh", 1, "Hyperbolic tangent."),
    entry!(Math, "urand", 0, "Floating-point numbers uniformly distributed on the unit interval."),
    entry!(Math, "urand32", 0, "Integer uniformly distributed 0 and 2**32-1 inclusive."),
    entry!(Math, "urandint", 2, "Integer uniformly distributed between inclusive integer endpoints."),
    entry!(Conversion, "boolean", 1, "Convert int/float/bool/string to boolean, or error if not possible."),
    entry!(Conversion, "float", 1, "Convert int/float/bool/string to float, or error if not possible."),
    entry!(Conversion, "fmtnum", 2, "Convert int/float/bool to string using printf-style format string, e.g. \"%06lld\"."),
    entry!(Conversion, "hexfmt", 1, "Convert int to string, e.g. 255 to \"0xff\"."),
    entry!(Conversion, "int", 1, "Convert int/float/bool/string to int, or error if not possible."),
    entry!(Conversion, "isabsent", 1, "True if field is absent in input, false otherwise"),
    entry!(Conversion, "isbool", 1, "True if field is present with boolean value, false otherwise."),
    entry!(Conversion, "isempty", 1, "True if field is present in input with empty value, false otherwise."),
    entry!(Conversion, "isfloat", 1, "True if field is present with value inferred as float"),
    entry!(Conversion, "isint", 1, "True if field is present with value inferred as int"),
    entry!(Conversion, "isnotempty", 1, "True if field is present in input with non-empty value, false otherwise"),
    entry!(Conversion, "isnotnull", 1, "False if field is absent or present with empty value, true otherwise"),
    entry!(Conversion, "isnull", 1, "True if field is absent or present with empty value, false otherwise"),
    entry!(Conversion, "isnumeric", 1, "True if field is present with value inferred as int or float"),
    entry!(Conversion, "ispresent", 1, "True if field is present in input, false otherwise."),
    entry!(Conversion, "isstring", 1, "True if field is present with string (including empty-string) value"),
    entry!(Conversion, "string", 1, "Convert int/float/bool/string to string."),
    entry!(Conversion, "typeof", 1, "Convert argument to type of argument (e.g. \"int\")."),
    entry!(String, ".", 2, "String concatenation."),
    entry!(String, "gsub", 3, "Example: '$name=gsub($name, \"old\", \"new\")' (replace all)."),
    entry!(String, "strlen", 1, "String length."),
    entry!(String, "sub", 3, "Example: '$name=sub($name, \"old\", \"new\")' (replace once)."),
    entry!(String, "substr", 3, "substr(s,m,n) gives substring of s from 0-up position m to n inclusive."),
    entry!(String, "tolower", 1, "Convert string to lowercase."),
    entry!(String, "toupper", 1, "Convert string to uppercase."),
    entry!(Time, "dhms2fsec", 1, "Recovers floating-point seconds as in dhms2fsec(\"5d18h53m20.250000s\") = 500000.250000"),
    entry!(Time, "dhms2sec", 1, "Recovers integer seconds as in dhms2sec(\"5d18h53m20s\") = 500000"),
    entry!(Time, "fsec2dhms", 1, "Formats floating-point seconds as in fsec2dhms(500000.25) = \"5d18h53m20.250000s\""),
    entry!(Time, "fsec2hms", 1, "Formats floating-point seconds as in fsec2hms(5000.25) = \"01:23:20.250000\""),
    entry!(Time, "gmt2sec", 1, "Parses GMT timestamp as integer seconds since the epoch."),
    entry!(Time, "hms2fsec", 1, "Recovers floating-point seconds as in hms2fsec(\"01:23:20.250000\") = 5000.250000"),
    entry!(Time, "hms2sec", 1, "Recovers integer seconds as in hms2sec(\"01:23:20\") = 5000"),
    entry!(Time, "sec2dhms", 1, "Formats integer seconds as in sec2dhms(500000) = \"5d18h53m20s\""),
    entry!(Time, "sec2gmt", 1, "Formats seconds since epoch (integer part only) as GMT timestamp, e.g. sec2gmt(1440768801.7) = \"2015-08-28T13:33:21Z\"."),
    entry!(Time, "sec2gmtdate", 1, "Formats seconds since epoch (integer part only) as GMT timestamp with year-month-date, e.g. sec2gmtdate(1440768801.7) = \"2015-08-28\"."),
    entry!(Time, "sec2hms", 1, "Formats integer seconds as in sec2hms(5000) = \"01:23:20\""),
    entry!(Time, "strftime", 2, "Formats seconds since epoch (integer part only) as timestamp, e.g. strftime(1440768801.7,\"%Y-%m-%dT%H:%M:%SZ\") = \"2015-08-28T13:33:21Z\"."),
    entry!(Time, "strptime", 2, "Parses timestamp as integer seconds since epoch, e.g. strptime(\"2015-08-28T13:33:21Z\",\"%Y-%m-%dT%H:%M:%SZ\") = 1440768801."),
    entry!(Time, "systime", 0, "Floating-point seconds since the epoch, e.g. 1440768801.748936."),
];


// Result of matching a callsite's name and argument count against
// the table.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum ArityCheck {
    Pass { variadic: bool },
    Fail { expected: usize },
    NoSuch,
}


// Scan the table. A variadic row passes any argument count; a fixed
// row passes on exact match. If the name occurred but no arity
// matched, report the last-seen declared arity.
pub fn check_arity(name: &str, user_arity: usize) -> ArityCheck {
    let mut name_seen = false;
    let mut expected = 0;
    for row in FUNCTION_LOOKUP_TABLE {
        if row.name == name {
            if row.variadic {
                return ArityCheck::Pass { variadic: true };
            }
            name_seen = true;
            expected = row.arity;
            if row.arity == user_arity {
                return ArityCheck::Pass { variadic: false };
            }
        }
    }
    if name_seen {
        ArityCheck::Fail { expected }
    } else {
        ArityCheck::NoSuch
    }
}


lazy_static! {
    // Immutable process-wide name set, for UDF collision checks.
    pub static ref BUILT_IN_NAMES: FnvHashSet<&'static str> =
        FUNCTION_LOOKUP_TABLE.iter().map(|row| row.name).collect();
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_arity_rows_are_unique() {
        for (i, a) in FUNCTION_LOOKUP_TABLE.iter().enumerate() {
            for b in &FUNCTION_LOOKUP_TABLE[i + 1..] {
                assert!(
                    a.name != b.name || a.arity != b.arity,
                    "duplicate row: {} arity {}",
                    a.name,
                    a.arity
                );
            }
        }
    }

    #[test]
    fn test_check_arity() {
        assert_eq!(check_arity("abs", 1), ArityCheck::Pass { variadic: false });
        assert_eq!(check_arity("abs", 2), ArityCheck::Fail { expected: 1 });
        assert_eq!(check_arity("no_such_fn", 1), ArityCheck::NoSuch);
        assert_eq!(check_arity("min", 0), ArityCheck::Pass { variadic: true });
        assert_eq!(check_arity("min", 7), ArityCheck::Pass { variadic: true });
    }

    #[test]
    fn test_plus_and_minus_are_unary_and_binary() {
        for name in &["+", "-"] {
            assert_eq!(check_arity(name, 1), ArityCheck::Pass { variadic: false });
            assert_eq!(check_arity(name, 2), ArityCheck::Pass { variadic: false });
            assert!(matches!(check_arity(name, 3), ArityCheck::Fail { .. }));
        }
    }

    #[test]
    fn test_built_in_name_set() {
        assert!(BUILT_IN_NAMES.contains("abs"));
        assert!(BUILT_IN_NAMES.contains("? :"));
        assert!(!BUILT_IN_NAMES.contains("frobnicate"));
    }
}
