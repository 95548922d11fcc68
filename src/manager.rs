// The function manager.
//
// During parsing, every call-shaped AST node is handed to the
// manager, which returns a placeholder evaluator and queues it for a
// second pass. A user-defined function may be referenced before it is
// defined, so dispatch cannot be computed while the parse is still in
// flight. Once parsing and UDF installation are done, resolve_all
// drains the queue and rewrites each placeholder in place into a
// concrete evaluator: a UDF callsite, or a built-in selected by name
// and arity, with literal regex arguments compiled once here rather
// than per record.
//
// Resolution errors are reported before any record is processed and
// are fatal. The try_-prefixed variants return them instead, for
// hosts and tests that want to observe the failure.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::io::{self, Write};
use std::rc::Rc;

use log::{debug, trace};

use crate::ast::{AstKind, AstNode, Node};
use crate::catalog::{check_arity, ArityCheck, FUNCTION_LOOKUP_TABLE, BUILT_IN_NAMES};
use crate::eval::{
    compile_regex, BinaryFunc, BoxedEvaluator, Callsite, CallsiteEvaluator, ContextFlags,
    ContextVar, FieldRef, Literal, LogicalAnd, LogicalOr, MatchesDynamic, MatchesPrecomp,
    MaxVariadic, MinVariadic, SubDynamic, SubPrecomp, SysTime, TernaryFunc, TernarySelect,
    UdfCallsite, UdfDefsite, UnaryFunc, Urand, Urand32, UrandInt,
};
use crate::util::fatal;
use crate::value::{TypeInference, Value};


#[derive(Clone, Debug, PartialEq)]
pub enum FmgrError {
    UnknownFunction(String),
    Arity {
        name: String,
        expected: usize,
        got: usize,
    },
    // The one name with both a unary and a binary row gets its own
    // diagnostic when neither fits.
    UnaryOrBinary {
        name: String,
        got: usize,
    },
    OverridesBuiltin(String),
    AlreadyDefined(String),
    BadRegex {
        pattern: String,
        message: String,
    },
}

impl fmt::Display for FmgrError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FmgrError::UnknownFunction(name) => {
                write!(f, "unknown function name \"{}\".", name)
            }
            FmgrError::Arity { name, expected, got } => write!(
                f,
                "function named \"{}\" takes {} argument{}; got {}.",
                name,
                expected,
                if *expected == 1 { "" } else { "s" },
                got
            ),
            FmgrError::UnaryOrBinary { name, got } => write!(
                f,
                "function named \"{}\" takes one argument or two; got {}.",
                name, got
            ),
            FmgrError::OverridesBuiltin(name) => write!(
                f,
                "function named \"{}\" must not override a built-in function of the same name.",
                name
            ),
            FmgrError::AlreadyDefined(name) => {
                write!(f, "function named \"{}\" has already been defined.", name)
            }
            FmgrError::BadRegex { pattern, message } => {
                write!(f, "couldn't compile regex \"{}\": {}", pattern, message)
            }
        }
    }
}

pub type FmgrResult<T> = Result<T, FmgrError>;


pub struct FunctionManager {
    udfs: crate::omap::OrderedStringMap<Rc<UdfDefsite>>,
    unresolved: VecDeque<Rc<RefCell<Callsite>>>,
}


impl FunctionManager {
    pub fn new() -> FunctionManager {
        FunctionManager {
            udfs: crate::omap::OrderedStringMap::new(),
            unresolved: VecDeque::new(),
        }
    }

    // ----------------------------------------------------------------
    // Registration

    pub fn try_install_udf(&mut self, defsite: UdfDefsite) -> FmgrResult<()> {
        if BUILT_IN_NAMES.contains(defsite.name.as_str()) {
            return Err(FmgrError::OverridesBuiltin(defsite.name));
        }
        if self.udfs.has(&[defsite.name.as_str()]) {
            return Err(FmgrError::AlreadyDefined(defsite.name));
        }
        debug!("installed udf \"{}\" arity {}", defsite.name, defsite.arity);
        let name = defsite.name.clone();
        self.udfs.put(&[name.as_str()], Rc::new(defsite));
        Ok(())
    }

    pub fn install_udf(&mut self, defsite: UdfDefsite) {
        if let Err(err) = self.try_install_udf(defsite) {
            fatal(err);
        }
    }

    // ----------------------------------------------------------------
    // Phase one: placeholders

    // Hand back a placeholder for a call-shaped node and queue it for
    // the resolve-all pass.
    pub fn alloc_from_operator_or_function_call(
        &mut self,
        ast: &Node<AstNode>,
        type_inferencing: TypeInference,
        context_flags: ContextFlags,
    ) -> BoxedEvaluator {
        let (ev, cell) = CallsiteEvaluator::unresolved(
            &ast.text,
            ast.arity(),
            type_inferencing,
            context_flags,
            ast.clone(),
        );
        trace!(
            "queued unresolved callsite \"{}\" with {} args",
            ast.text,
            ast.arity()
        );
        self.unresolved.push_back(cell);
        Box::new(ev)
    }

    // Build an evaluator for any consumable AST node. Call-shaped
    // nodes come back as placeholders; everything else is live
    // immediately.
    pub fn alloc_from_ast(
        &mut self,
        ast: &Node<AstNode>,
        type_inferencing: TypeInference,
        context_flags: ContextFlags,
    ) -> BoxedEvaluator {
        match ast.kind {
            AstKind::StringLiteral
            | AstKind::RegexLiteral
            | AstKind::CaseInsensitiveRegexLiteral => {
                Literal::new(Value::from_string(&ast.text))
            }
            AstKind::NumericLiteral => Literal::new(Value::from_numeric_literal(&ast.text)),
            AstKind::BooleanLiteral => Literal::new(Value::Bool(ast.text == "true")),
            AstKind::FieldName => FieldRef::new(&ast.text, type_inferencing),
            AstKind::ContextVariable => ContextVar::new(&ast.text),
            AstKind::Function => {
                self.alloc_from_operator_or_function_call(ast, type_inferencing, context_flags)
            }
        }
    }

    // ----------------------------------------------------------------
    // Phase two: resolution

    // Fixed-point drain. Resolving a UDF callsite builds its argument
    // evaluators, and those may queue placeholders of their own, so
    // the head is re-read until the queue is empty.
    pub fn try_resolve_all(&mut self) -> FmgrResult<()> {
        while let Some(cell) = self.unresolved.pop_front() {
            self.resolve_callsite(&cell)?;
        }
        Ok(())
    }

    pub fn resolve_all(&mut self) {
        if let Err(err) = self.try_resolve_all() {
            fatal(err);
        }
    }

    fn resolve_callsite(&mut self, cell: &Rc<RefCell<Callsite>>) -> FmgrResult<()> {
        let (name, user_arity, type_inferencing, context_flags, ast) = match &*cell.borrow() {
            Callsite::Unresolved {
                name,
                user_arity,
                type_inferencing,
                context_flags,
                ast,
            } => (
                name.clone(),
                *user_arity,
                *type_inferencing,
                *context_flags,
                ast.clone(),
            ),
            Callsite::Resolved(_) => {
                panic!("internal error: callsite queued for resolution twice")
            }
        };
        trace!("resolving callsite \"{}\" with {} args", name, user_arity);
        let ev =
            self.build_call_evaluator(&name, user_arity, type_inferencing, context_flags, &ast)?;
        // Rewrite in place: parents hold the cell, so swapping the
        // payload leaves their references valid.
        *cell.borrow_mut() = Callsite::Resolved(ev);
        Ok(())
    }

    fn build_call_evaluator(
        &mut self,
        name: &str,
        user_arity: usize,
        type_inferencing: TypeInference,
        context_flags: ContextFlags,
        ast: &Node<AstNode>,
    ) -> FmgrResult<BoxedEvaluator> {
        // User-defined functions shadow nothing: install rejects
        // collisions with the catalog, so lookup order is moot.
        let defsite = self.udfs.get(&[name]).cloned();
        if let Some(defsite) = defsite {
            if user_arity != defsite.arity {
                return Err(FmgrError::Arity {
                    name: String::from(name),
                    expected: defsite.arity,
                    got: user_arity,
                });
            }
            let args = ast
                .children
                .iter()
                .map(|c| self.alloc_from_ast(c, type_inferencing, context_flags))
                .collect();
            return Ok(UdfCallsite::new(defsite, args));
        }

        match check_arity(name, user_arity) {
            ArityCheck::NoSuch => Err(FmgrError::UnknownFunction(String::from(name))),
            ArityCheck::Fail { expected } => {
                if name == "-" {
                    Err(FmgrError::UnaryOrBinary {
                        name: String::from(name),
                        got: user_arity,
                    })
                } else {
                    Err(FmgrError::Arity {
                        name: String::from(name),
                        expected,
                        got: user_arity,
                    })
                }
            }
            ArityCheck::Pass { variadic: true } => {
                let args: Vec<BoxedEvaluator> = ast
                    .children
                    .iter()
                    .map(|c| self.alloc_from_ast(c, type_inferencing, context_flags))
                    .collect();
                Ok(match name {
                    "min" => MinVariadic::new(args),
                    "max" => MaxVariadic::new(args),
                    _ => panic!("internal error: unrecognized function name \"{}\"", name),
                })
            }
            ArityCheck::Pass { variadic: false } => match user_arity {
                0 => Ok(self.build_zary(name)),
                1 => {
                    let arg =
                        self.alloc_from_ast(&ast.children[0], type_inferencing, context_flags);
                    Ok(UnaryFunc::new(unary_kernel(name), arg))
                }
                2 => self.build_binary(name, ast, type_inferencing, context_flags),
                3 => self.build_ternary(name, ast, type_inferencing, context_flags),
                _ => panic!(
                    "internal error: catalog arity {} out of range for \"{}\"",
                    user_arity, name
                ),
            },
        }
    }

    fn build_zary(&mut self, name: &str) -> BoxedEvaluator {
        match name {
            "urand" => Urand::new(),
            "urand32" => Urand32::new(),
            "systime" => SysTime::new(),
            _ => panic!("internal error: unrecognized function name \"{}\"", name),
        }
    }

    // Binary calls, with the matcher specialization: when the
    // pattern operand of =~ or !=~ is a literal, the regex is
    // compiled here, once, and only the subject argument becomes a
    // child evaluator.
    fn build_binary(
        &mut self,
        name: &str,
        ast: &Node<AstNode>,
        type_inferencing: TypeInference,
        context_flags: ContextFlags,
    ) -> FmgrResult<BoxedEvaluator> {
        let pattern_node = &ast.children[1];
        if (name == "=~" || name == "!=~") && is_literal_pattern(pattern_node.kind) {
            let regex = self.compile_literal_pattern(pattern_node)?;
            let arg1 = self.alloc_from_ast(&ast.children[0], type_inferencing, context_flags);
            return Ok(MatchesPrecomp::new(arg1, regex, name == "!=~"));
        }

        let arg1 = self.alloc_from_ast(&ast.children[0], type_inferencing, context_flags);
        let arg2 = self.alloc_from_ast(&ast.children[1], type_inferencing, context_flags);
        Ok(match name {
            "&&" => LogicalAnd::new(arg1, arg2),
            "||" => LogicalOr::new(arg1, arg2),
            "=~" => MatchesDynamic::new(arg1, arg2, false),
            "!=~" => MatchesDynamic::new(arg1, arg2, true),
            "urandint" => UrandInt::new(arg1, arg2),
            _ => BinaryFunc::new(binary_kernel(name), arg1, arg2),
        })
    }

    // Ternary calls, with the analogous specialization for the
    // pattern operand of sub and gsub.
    fn build_ternary(
        &mut self,
        name: &str,
        ast: &Node<AstNode>,
        type_inferencing: TypeInference,
        context_flags: ContextFlags,
    ) -> FmgrResult<BoxedEvaluator> {
        let pattern_node = &ast.children[1];
        if (name == "sub" || name == "gsub") && is_literal_pattern(pattern_node.kind) {
            let regex = self.compile_literal_pattern(pattern_node)?;
            let arg1 = self.alloc_from_ast(&ast.children[0], type_inferencing, context_flags);
            let arg3 = self.alloc_from_ast(&ast.children[2], type_inferencing, context_flags);
            return Ok(SubPrecomp::new(arg1, regex, arg3, name == "gsub"));
        }

        let arg1 = self.alloc_from_ast(&ast.children[0], type_inferencing, context_flags);
        let arg2 = self.alloc_from_ast(&ast.children[1], type_inferencing, context_flags);
        let arg3 = self.alloc_from_ast(&ast.children[2], type_inferencing, context_flags);
        Ok(match name {
            "sub" => SubDynamic::new(arg1, arg2, arg3, false),
            "gsub" => SubDynamic::new(arg1, arg2, arg3, true),
            "? :" => TernarySelect::new(arg1, arg2, arg3),
            _ => TernaryFunc::new(ternary_kernel(name), arg1, arg2, arg3),
        })
    }

    fn compile_literal_pattern(&self, node: &AstNode) -> FmgrResult<regex::Regex> {
        let case_fold = node.kind == AstKind::CaseInsensitiveRegexLiteral;
        compile_regex(&node.text, case_fold).map_err(|err| FmgrError::BadRegex {
            pattern: node.text.clone(),
            message: err.to_string(),
        })
    }

    // ----------------------------------------------------------------
    // Reporting

    pub fn list_functions<W: Write>(&self, w: &mut W, leader: &str) -> io::Result<()> {
        crate::util::write_wrapped_names(w, leader, FUNCTION_LOOKUP_TABLE.iter().map(|r| r.name))
    }

    pub fn list_all_raw<W: Write>(&self, w: &mut W) -> io::Result<()> {
        for row in FUNCTION_LOOKUP_TABLE {
            writeln!(w, "{}", row.name)?;
        }
        Ok(())
    }

    // Usage for one function, or for all of them followed by a note
    // about the seeding flag and the built-in variables.
    pub fn function_usage<W: Write>(&self, w: &mut W, name: Option<&str>) -> io::Result<()> {
        match name {
            Some(name) => {
                let mut found = false;
                for row in FUNCTION_LOOKUP_TABLE {
                    if row.name == name {
                        write_usage_row(w, row)?;
                        found = true;
                    }
                }
                if !found {
                    writeln!(w, "function \"{}\" not found.", name)?;
                }
            }
            None => {
                for row in FUNCTION_LOOKUP_TABLE {
                    write_usage_row(w, row)?;
                }
                writeln!(w)?;
                writeln!(
                    w,
                    "To set the seed for urand, you may specify decimal or hexadecimal 32-bit"
                )?;
                writeln!(
                    w,
                    "numbers of the form \"{} --seed 123456789\" or \"{} --seed 0xcafefeed\".",
                    crate::util::PROGRAM_NAME,
                    crate::util::PROGRAM_NAME
                )?;
                writeln!(
                    w,
                    "The built-in variables are NF, NR, FNR, FILENUM, and FILENAME, along with"
                )?;
                writeln!(w, "the mathematical constants PI and E.")?;
            }
        }
        Ok(())
    }
}


fn write_usage_row<W: Write>(w: &mut W, row: &crate::catalog::FunctionLookup) -> io::Result<()> {
    if row.variadic {
        writeln!(
            w,
            "{} (class={} variadic): {}",
            row.name,
            row.class.name(),
            row.usage
        )
    } else {
        writeln!(
            w,
            "{} (class={} #args={}): {}",
            row.name,
            row.class.name(),
            row.arity,
            row.usage
        )
    }
}


fn is_literal_pattern(kind: AstKind) -> bool {
    matches!(
        kind,
        AstKind::StringLiteral | AstKind::RegexLiteral | AstKind::CaseInsensitiveRegexLiteral
    )
}


// ----------------------------------------------------------------
// Name-to-kernel dispatch. Arity has already been checked against
// the catalog, so an unmatched name here means the catalog and these
// tables have drifted apart.

fn unary_kernel(name: &str) -> fn(&Value) -> Value {
    match name {
        "!" => |a| a.not(),
        "+" => |a| a.upos(),
        "-" => |a| a.neg(),
        "~" => |a| a.bitnot(),
        "abs" => |a| a.abs(),
        "acos" => |a| a.acos(),
        "acosh" => |a| a.acosh(),
        "asin" => |a| a.asin(),
        "asinh" => |a| a.asinh(),
        "atan" => |a| a.atan(),
        "atanh" => |a| a.atanh(),
        "boolean" => |a| a.to_boolean(),
        "cbrt" => |a| a.cbrt(),
        "ceil" => |a| a.ceil(),
        "cos" => |a| a.cos(),
        "cosh" => |a| a.cosh(),
        "dhms2fsec" => |a| a.dhms2fsec(),
        "dhms2sec" => |a| a.dhms2sec(),
        "erf" => |a| a.erf(),
        "erfc" => |a| a.erfc(),
        "exp" => |a| a.exp(),
        "expm1" => |a| a.expm1(),
        "float" => |a| a.to_float(),
        "floor" => |a| a.floor(),
        "fsec2dhms" => |a| a.fsec2dhms(),
        "fsec2hms" => |a| a.fsec2hms(),
        "gmt2sec" => |a| a.gmt2sec(),
        "hexfmt" => |a| a.hexfmt(),
        "hms2fsec" => |a| a.hms2fsec(),
        "hms2sec" => |a| a.hms2sec(),
        "int" => |a| a.to_int(),
        "invqnorm" => |a| a.invqnorm(),
        "isabsent" => |a| a.is_absent(),
        "isbool" => |a| a.is_bool(),
        "isempty" => |a| a.is_empty(),
        "isfloat" => |a| a.is_float(),
        "isint" => |a| a.is_int(),
        "isnotempty" => |a| a.is_not_empty(),
        "isnotnull" => |a| a.is_not_null(),
        "isnull" => |a| a.is_null(),
        "isnumeric" => |a| a.is_numeric(),
        "ispresent" => |a| a.is_present(),
        "isstring" => |a| a.is_string(),
        "log" => |a| a.log(),
        "log10" => |a| a.log10(),
        "log1p" => |a| a.log1p(),
        "qnorm" => |a| a.qnorm(),
        "round" => |a| a.round(),
        "sec2dhms" => |a| a.sec2dhms(),
        "sec2gmt" => |a| a.sec2gmt(),
        "sec2gmtdate" => |a| a.sec2gmtdate(),
        "sec2hms" => |a| a.sec2hms(),
        "sgn" => |a| a.sgn(),
        "sin" => |a| a.sin(),
        "sinh" => |a| a.sinh(),
        "sqrt" => |a| a.sqrt(),
        "string" => |a| a.to_str(),
        "strlen" => |a| a.strlen(),
        "tan" => |a| a.tan(),
        "tanh" => |a| a.tanh(),
        "tolower" => |a| a.tolower(),
        "toupper" => |a| a.toupper(),
        "typeof" => |a| a.type_of(),
        _ => panic!("internal error: unrecognized function name \"{}\"", name),
    }
}

fn binary_kernel(name: &str) -> fn(&Value, &Value) -> Value {
    match name {
        "^^" => |a, b| a.logical_xor(b),
        "==" => |a, b| a.eq(b),
        "!=" => |a, b| a.ne(b),
        ">" => |a, b| a.gt(b),
        ">=" => |a, b| a.ge(b),
        "<" => |a, b| a.lt(b),
        "<=" => |a, b| a.le(b),
        "." => |a, b| a.concat(b),
        "+" => |a, b| a.add(b),
        "-" => |a, b| a.sub(b),
        "*" => |a, b| a.mul(b),
        "/" => |a, b| a.div(b),
        "//" => |a, b| a.intdiv(b),
        "%" => |a, b| a.modulo(b),
        "**" => |a, b| a.pow(b),
        "pow" => |a, b| a.pow(b),
        "atan2" => |a, b| a.atan2(b),
        "roundm" => |a, b| a.roundm(b),
        "fmtnum" => |a, b| a.fmtnum(b),
        "&" => |a, b| a.bitand(b),
        "|" => |a, b| a.bitor(b),
        "^" => |a, b| a.bitxor(b),
        "<<" => |a, b| a.shl(b),
        ">>" => |a, b| a.shr(b),
        "strftime" => |a, b| a.strftime(b),
        "strptime" => |a, b| a.strptime(b),
        _ => panic!("internal error: unrecognized function name \"{}\"", name),
    }
}

fn ternary_kernel(name: &str) -> fn(&Value, &Value, &Value) -> Value {
    match name {
        "logifit" => |a, b, c| a.logifit(b, c),
        "madd" => |a, b, c| a.madd(b, c),
        "msub" => |a, b, c| a.msub(b, c),
        "mmul" => |a, b, c| a.mmul(b, c),
        "mexp" => |a, b, c| a.mexp(b, c),
        "substr" => |a, b, c| a.substr(b, c),
        _ => panic!("internal error: unrecognized function name \"{}\"", name),
    }
}
