// Evaluator tree nodes.
//
// A resolved expression is a tree of Evaluator objects; walking it
// once per record is the hot path. Every constructor takes ownership
// of its child nodes and whatever per-node state it carries (compiled
// regex, RNG, argument scratch buffer); teardown is the ordinary
// ownership drop of the tree.
//
// Function callsites are special: while the parser runs, a call node
// may name a function that has not been defined yet, so the manager
// hands out an indirection cell in the Unresolved state and rewrites
// it in place during resolve-all. Parents hold the cell, never the
// payload, so the rewrite needs no parent patching.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

use enumflags2::BitFlags;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regex::{Regex, RegexBuilder};

use crate::ast::{AstNode, Node};
use crate::value::{TypeInference, Value};
use crate::vars::Variables;


// Statement-level context a callsite was parsed in. Opaque to the
// resolver; captured at parse time and immutable afterward.
#[derive(BitFlags, Copy, Clone, Debug, PartialEq)]
#[repr(u8)]
pub enum ContextFlag {
    InBeginOrEnd = 0b001,
    InFuncDef = 0b010,
    InBreakable = 0b100,
}

pub type ContextFlags = BitFlags<ContextFlag>;


pub trait Evaluator {
    fn process(&mut self, vars: &Variables) -> Value;
}

pub type BoxedEvaluator = Box<dyn Evaluator>;


// ----------------------------------------------------------------
// User-defined functions.

// The body of a UDF. The statement interpreter supplies these; any
// closure over (args, vars) will do.
pub trait UdfBody {
    fn process(&self, args: &[Value], vars: &Variables) -> Value;
}

impl<F> UdfBody for F
where
    F: Fn(&[Value], &Variables) -> Value,
{
    fn process(&self, args: &[Value], vars: &Variables) -> Value {
        self(args, vars)
    }
}


// One definition site per UDF, owned by the registry. Callsites hold
// shared handles.
pub struct UdfDefsite {
    pub name: String,
    pub arity: usize,
    body: Box<dyn UdfBody>,
}

impl UdfDefsite {
    pub fn new(name: &str, arity: usize, body: Box<dyn UdfBody>) -> UdfDefsite {
        UdfDefsite {
            name: String::from(name),
            arity,
            body,
        }
    }

    pub fn process(&self, args: &[Value], vars: &Variables) -> Value {
        self.body.process(args, vars)
    }
}


// Callsite node: evaluates each argument into a scratch buffer that
// is allocated once and reused per call, then invokes the definition
// site. Kernels must not retain references into the buffer.
pub struct UdfCallsite {
    defsite: Rc<UdfDefsite>,
    args: Vec<BoxedEvaluator>,
    buf: Vec<Value>,
}

impl UdfCallsite {
    pub fn new(defsite: Rc<UdfDefsite>, args: Vec<BoxedEvaluator>) -> BoxedEvaluator {
        let buf = vec![Value::Absent; args.len()];
        Box::new(UdfCallsite { defsite, args, buf })
    }
}

impl Evaluator for UdfCallsite {
    fn process(&mut self, vars: &Variables) -> Value {
        for (slot, arg) in self.buf.iter_mut().zip(self.args.iter_mut()) {
            *slot = arg.process(vars);
        }
        self.defsite.process(&self.buf, vars)
    }
}


// ----------------------------------------------------------------
// The two-phase callsite cell.

pub(crate) enum Callsite {
    Unresolved {
        name: String,
        user_arity: usize,
        type_inferencing: TypeInference,
        context_flags: ContextFlags,
        ast: Node<AstNode>,
    },
    Resolved(BoxedEvaluator),
}


// What the manager hands back for every call-shaped parse node. The
// payload starts Unresolved; resolve-all swaps in the live evaluator
// without disturbing the cell identity.
pub struct CallsiteEvaluator {
    cell: Rc<RefCell<Callsite>>,
}

impl CallsiteEvaluator {
    pub(crate) fn unresolved(
        name: &str,
        user_arity: usize,
        type_inferencing: TypeInference,
        context_flags: ContextFlags,
        ast: Node<AstNode>,
    ) -> (CallsiteEvaluator, Rc<RefCell<Callsite>>) {
        let cell = Rc::new(RefCell::new(Callsite::Unresolved {
            name: String::from(name),
            user_arity,
            type_inferencing,
            context_flags,
            ast,
        }));
        (CallsiteEvaluator { cell: cell.clone() }, cell)
    }
}

impl Evaluator for CallsiteEvaluator {
    fn process(&mut self, vars: &Variables) -> Value {
        match &mut *self.cell.borrow_mut() {
            Callsite::Resolved(ev) => ev.process(vars),
            Callsite::Unresolved { name, .. } => panic!(
                "internal error: unresolved callsite \"{}\" invoked",
                name
            ),
        }
    }
}


// ----------------------------------------------------------------
// Leaves.

pub struct Literal {
    value: Value,
}

impl Literal {
    pub fn new(value: Value) -> BoxedEvaluator {
        Box::new(Literal { value })
    }
}

impl Evaluator for Literal {
    fn process(&mut self, _vars: &Variables) -> Value {
        self.value.clone()
    }
}


pub struct FieldRef {
    name: String,
    mode: TypeInference,
}

impl FieldRef {
    pub fn new(name: &str, mode: TypeInference) -> BoxedEvaluator {
        Box::new(FieldRef {
            name: String::from(name),
            mode,
        })
    }
}

impl Evaluator for FieldRef {
    fn process(&mut self, vars: &Variables) -> Value {
        vars.field(&self.name, self.mode)
    }
}


pub struct ContextVar {
    name: String,
}

impl ContextVar {
    pub fn new(name: &str) -> BoxedEvaluator {
        Box::new(ContextVar {
            name: String::from(name),
        })
    }
}

impl Evaluator for ContextVar {
    fn process(&mut self, vars: &Variables) -> Value {
        vars.context_variable(&self.name)
    }
}


// ----------------------------------------------------------------
// Fixed-arity kernel dispatch nodes. The resolver maps a name to a
// kernel function pointer once; per record there is no further
// dispatch.

pub struct UnaryFunc {
    func: fn(&Value) -> Value,
    arg: BoxedEvaluator,
}

impl UnaryFunc {
    pub fn new(func: fn(&Value) -> Value, arg: BoxedEvaluator) -> BoxedEvaluator {
        Box::new(UnaryFunc { func, arg })
    }
}

impl Evaluator for UnaryFunc {
    fn process(&mut self, vars: &Variables) -> Value {
        (self.func)(&self.arg.process(vars))
    }
}


pub struct BinaryFunc {
    func: fn(&Value, &Value) -> Value,
    arg1: BoxedEvaluator,
    arg2: BoxedEvaluator,
}

impl BinaryFunc {
    pub fn new(
        func: fn(&Value, &Value) -> Value,
        arg1: BoxedEvaluator,
        arg2: BoxedEvaluator,
    ) -> BoxedEvaluator {
        Box::new(BinaryFunc { func, arg1, arg2 })
    }
}

impl Evaluator for BinaryFunc {
    fn process(&mut self, vars: &Variables) -> Value {
        let a = self.arg1.process(vars);
        let b = self.arg2.process(vars);
        (self.func)(&a, &b)
    }
}


pub struct TernaryFunc {
    func: fn(&Value, &Value, &Value) -> Value,
    arg1: BoxedEvaluator,
    arg2: BoxedEvaluator,
    arg3: BoxedEvaluator,
}

impl TernaryFunc {
    pub fn new(
        func: fn(&Value, &Value, &Value) -> Value,
        arg1: BoxedEvaluator,
        arg2: BoxedEvaluator,
        arg3: BoxedEvaluator,
    ) -> BoxedEvaluator {
        Box::new(TernaryFunc {
            func,
            arg1,
            arg2,
            arg3,
        })
    }
}

impl Evaluator for TernaryFunc {
    fn process(&mut self, vars: &Variables) -> Value {
        let a = self.arg1.process(vars);
        let b = self.arg2.process(vars);
        let c = self.arg3.process(vars);
        (self.func)(&a, &b, &c)
    }
}


// ----------------------------------------------------------------
// Short-circuit boolean nodes. The right operand is evaluated only
// when the left does not decide the result; an absent operand makes
// the whole expression absent.

pub struct LogicalAnd {
    arg1: BoxedEvaluator,
    arg2: BoxedEvaluator,
}

impl LogicalAnd {
    pub fn new(arg1: BoxedEvaluator, arg2: BoxedEvaluator) -> BoxedEvaluator {
        Box::new(LogicalAnd { arg1, arg2 })
    }
}

impl Evaluator for LogicalAnd {
    fn process(&mut self, vars: &Variables) -> Value {
        match self.arg1.process(vars) {
            Value::Bool(false) => Value::Bool(false),
            Value::Bool(true) => coerce_boolean(self.arg2.process(vars)),
            Value::Absent => Value::Absent,
            _ => Value::Error,
        }
    }
}


pub struct LogicalOr {
    arg1: BoxedEvaluator,
    arg2: BoxedEvaluator,
}

impl LogicalOr {
    pub fn new(arg1: BoxedEvaluator, arg2: BoxedEvaluator) -> BoxedEvaluator {
        Box::new(LogicalOr { arg1, arg2 })
    }
}

impl Evaluator for LogicalOr {
    fn process(&mut self, vars: &Variables) -> Value {
        match self.arg1.process(vars) {
            Value::Bool(true) => Value::Bool(true),
            Value::Bool(false) => coerce_boolean(self.arg2.process(vars)),
            Value::Absent => Value::Absent,
            _ => Value::Error,
        }
    }
}


fn coerce_boolean(v: Value) -> Value {
    match v {
        Value::Bool(_) | Value::Absent | Value::Error => v,
        _ => Value::Error,
    }
}


// ? : evaluates the condition and then exactly one branch.
pub struct TernarySelect {
    cond: BoxedEvaluator,
    then_arm: BoxedEvaluator,
    else_arm: BoxedEvaluator,
}

impl TernarySelect {
    pub fn new(
        cond: BoxedEvaluator,
        then_arm: BoxedEvaluator,
        else_arm: BoxedEvaluator,
    ) -> BoxedEvaluator {
        Box::new(TernarySelect {
            cond,
            then_arm,
            else_arm,
        })
    }
}

impl Evaluator for TernarySelect {
    fn process(&mut self, vars: &Variables) -> Value {
        match self.cond.process(vars) {
            Value::Bool(true) => self.then_arm.process(vars),
            Value::Bool(false) => self.else_arm.process(vars),
            Value::Absent => Value::Absent,
            _ => Value::Error,
        }
    }
}


// ----------------------------------------------------------------
// Regex nodes.
//
// When the pattern is a literal, the resolver compiles it exactly
// once and the node retains the compiled form. A non-literal pattern
// is recompiled from its evaluated text on every call.

pub(crate) fn compile_regex(pattern: &str, case_fold: bool) -> Result<Regex, regex::Error> {
    #[cfg(test)]
    test_hooks::REGEX_COMPILE_COUNT.with(|c| c.set(c.get() + 1));
    RegexBuilder::new(pattern)
        .case_insensitive(case_fold)
        .build()
}

#[cfg(test)]
pub(crate) mod test_hooks {
    use std::cell::Cell;

    thread_local! {
        pub static REGEX_COMPILE_COUNT: Cell<usize> = Cell::new(0);
    }

    pub fn reset_regex_compile_count() {
        REGEX_COMPILE_COUNT.with(|c| c.set(0));
    }

    pub fn regex_compile_count() -> usize {
        REGEX_COMPILE_COUNT.with(|c| c.get())
    }
}


fn apply_match(subject: &Value, regex: &Regex, invert: bool) -> Value {
    match subject {
        Value::Error => Value::Error,
        Value::Absent => Value::Absent,
        _ => {
            let matched = regex.is_match(&subject.to_string());
            Value::Bool(matched != invert)
        }
    }
}

// Replacement text uses \1..\9 for capture groups.
fn translate_replacement(repl: &str) -> String {
    let mut out = String::new();
    let mut chars = repl.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '$' => out.push_str("$$"),
            '\\' => match chars.peek() {
                Some(d) if d.is_ascii_digit() => {
                    out.push_str(&format!("${{{}}}", d));
                    chars.next();
                }
                _ => out.push('\\'),
            },
            _ => out.push(c),
        }
    }
    out
}

fn apply_sub(subject: &Value, regex: &Regex, repl: &Value, replace_all: bool) -> Value {
    match (subject, repl) {
        (Value::Error, _) | (_, Value::Error) => return Value::Error,
        (Value::Absent, _) | (_, Value::Absent) => return Value::Absent,
        _ => {}
    }
    let text = subject.to_string();
    let repl = translate_replacement(&repl.to_string());
    let out = if replace_all {
        regex.replace_all(&text, repl.as_str())
    } else {
        regex.replace(&text, repl.as_str())
    };
    Value::from_string(&out)
}


pub struct MatchesPrecomp {
    arg1: BoxedEvaluator,
    regex: Regex,
    invert: bool,
}

impl MatchesPrecomp {
    pub fn new(arg1: BoxedEvaluator, regex: Regex, invert: bool) -> BoxedEvaluator {
        Box::new(MatchesPrecomp { arg1, regex, invert })
    }
}

impl Evaluator for MatchesPrecomp {
    fn process(&mut self, vars: &Variables) -> Value {
        apply_match(&self.arg1.process(vars), &self.regex, self.invert)
    }
}


pub struct MatchesDynamic {
    arg1: BoxedEvaluator,
    arg2: BoxedEvaluator,
    invert: bool,
}

impl MatchesDynamic {
    pub fn new(arg1: BoxedEvaluator, arg2: BoxedEvaluator, invert: bool) -> BoxedEvaluator {
        Box::new(MatchesDynamic { arg1, arg2, invert })
    }
}

impl Evaluator for MatchesDynamic {
    fn process(&mut self, vars: &Variables) -> Value {
        let subject = self.arg1.process(vars);
        let pattern = self.arg2.process(vars);
        match pattern {
            Value::Error | Value::Absent => return pattern,
            _ => {}
        }
        match compile_regex(&pattern.to_string(), false) {
            Ok(regex) => apply_match(&subject, &regex, self.invert),
            Err(_) => Value::Error,
        }
    }
}


pub struct SubPrecomp {
    arg1: BoxedEvaluator,
    regex: Regex,
    replacement: BoxedEvaluator,
    replace_all: bool,
}

impl SubPrecomp {
    pub fn new(
        arg1: BoxedEvaluator,
        regex: Regex,
        replacement: BoxedEvaluator,
        replace_all: bool,
    ) -> BoxedEvaluator {
        Box::new(SubPrecomp {
            arg1,
            regex,
            replacement,
            replace_all,
        })
    }
}

impl Evaluator for SubPrecomp {
    fn process(&mut self, vars: &Variables) -> Value {
        let subject = self.arg1.process(vars);
        let repl = self.replacement.process(vars);
        apply_sub(&subject, &self.regex, &repl, self.replace_all)
    }
}


pub struct SubDynamic {
    arg1: BoxedEvaluator,
    pattern: BoxedEvaluator,
    replacement: BoxedEvaluator,
    replace_all: bool,
}

impl SubDynamic {
    pub fn new(
        arg1: BoxedEvaluator,
        pattern: BoxedEvaluator,
        replacement: BoxedEvaluator,
        replace_all: bool,
    ) -> BoxedEvaluator {
        Box::new(SubDynamic {
            arg1,
            pattern,
            replacement,
            replace_all,
        })
    }
}

impl Evaluator for SubDynamic {
    fn process(&mut self, vars: &Variables) -> Value {
        let subject = self.arg1.process(vars);
        let pattern = self.pattern.process(vars);
        let repl = self.replacement.process(vars);
        match pattern {
            Value::Error | Value::Absent => return pattern,
            _ => {}
        }
        match compile_regex(&pattern.to_string(), false) {
            Ok(regex) => apply_sub(&subject, &regex, &repl, self.replace_all),
            Err(_) => Value::Error,
        }
    }
}


// ----------------------------------------------------------------
// Variadic folds.

pub struct MinVariadic {
    args: Vec<BoxedEvaluator>,
}

impl MinVariadic {
    pub fn new(args: Vec<BoxedEvaluator>) -> BoxedEvaluator {
        Box::new(MinVariadic { args })
    }
}

impl Evaluator for MinVariadic {
    fn process(&mut self, vars: &Variables) -> Value {
        let mut acc = Value::Absent;
        for arg in self.args.iter_mut() {
            acc = acc.min2(&arg.process(vars));
        }
        acc
    }
}


pub struct MaxVariadic {
    args: Vec<BoxedEvaluator>,
}

impl MaxVariadic {
    pub fn new(args: Vec<BoxedEvaluator>) -> BoxedEvaluator {
        Box::new(MaxVariadic { args })
    }
}

impl Evaluator for MaxVariadic {
    fn process(&mut self, vars: &Variables) -> Value {
        let mut acc = Value::Absent;
        for arg in self.args.iter_mut() {
            acc = acc.max2(&arg.process(vars));
        }
        acc
    }
}


// ----------------------------------------------------------------
// Zero-argument nodes.

pub struct SysTime;

impl SysTime {
    pub fn new() -> BoxedEvaluator {
        Box::new(SysTime)
    }
}

impl Evaluator for SysTime {
    fn process(&mut self, _vars: &Variables) -> Value {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(d) => Value::Float(d.as_secs_f64()),
            Err(_) => Value::Error,
        }
    }
}


pub struct Urand {
    rng: StdRng,
}

impl Urand {
    pub fn new() -> BoxedEvaluator {
        Box::new(Urand {
            rng: StdRng::from_entropy(),
        })
    }
}

impl Evaluator for Urand {
    fn process(&mut self, _vars: &Variables) -> Value {
        Value::Float(self.rng.gen::<f64>())
    }
}


pub struct Urand32 {
    rng: StdRng,
}

impl Urand32 {
    pub fn new() -> BoxedEvaluator {
        Box::new(Urand32 {
            rng: StdRng::from_entropy(),
        })
    }
}

impl Evaluator for Urand32 {
    fn process(&mut self, _vars: &Variables) -> Value {
        Value::Int(self.rng.gen::<u32>() as i64)
    }
}


pub struct UrandInt {
    rng: StdRng,
    lo: BoxedEvaluator,
    hi: BoxedEvaluator,
}

impl UrandInt {
    pub fn new(lo: BoxedEvaluator, hi: BoxedEvaluator) -> BoxedEvaluator {
        Box::new(UrandInt {
            rng: StdRng::from_entropy(),
            lo,
            hi,
        })
    }
}

impl Evaluator for UrandInt {
    fn process(&mut self, vars: &Variables) -> Value {
        let lo = self.lo.process(vars);
        let hi = self.hi.process(vars);
        match (lo.as_int(), hi.as_int()) {
            (Some(a), Some(b)) => {
                let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
                Value::Int(self.rng.gen_range(lo..=hi))
            }
            _ => Value::Error,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn vars() -> Variables {
        let mut v = Variables::new();
        v.set_field("a", "xfooy");
        v.set_field("n", "7");
        v
    }

    // Counts how many times it is evaluated; used to observe
    // short-circuiting.
    struct Probe {
        hits: Rc<Cell<usize>>,
        value: Value,
    }

    impl Probe {
        fn new(value: Value) -> (BoxedEvaluator, Rc<Cell<usize>>) {
            let hits = Rc::new(Cell::new(0));
            (
                Box::new(Probe {
                    hits: hits.clone(),
                    value,
                }),
                hits,
            )
        }
    }

    impl Evaluator for Probe {
        fn process(&mut self, _vars: &Variables) -> Value {
            self.hits.set(self.hits.get() + 1);
            self.value.clone()
        }
    }

    #[test]
    fn test_leaves() {
        let v = vars();
        assert_eq!(Literal::new(Value::Int(3)).process(&v), Value::Int(3));
        assert_eq!(
            FieldRef::new("n", TypeInference::IntFloatString).process(&v),
            Value::Int(7)
        );
        assert_eq!(
            FieldRef::new("gone", TypeInference::IntFloatString).process(&v),
            Value::Absent
        );
        assert_eq!(ContextVar::new("NF").process(&v), Value::Int(2));
    }

    #[test]
    fn test_function_nodes() {
        let v = vars();
        let mut node = UnaryFunc::new(|a| a.abs(), Literal::new(Value::Int(-4)));
        assert_eq!(node.process(&v), Value::Int(4));

        let mut node = BinaryFunc::new(
            |a, b| a.add(b),
            Literal::new(Value::Int(1)),
            Literal::new(Value::Int(2)),
        );
        assert_eq!(node.process(&v), Value::Int(3));

        let mut node = TernaryFunc::new(
            |a, b, c| a.substr(b, c),
            Literal::new(Value::from_string("hello")),
            Literal::new(Value::Int(1)),
            Literal::new(Value::Int(3)),
        );
        assert_eq!(node.process(&v), Value::from_string("ell"));
    }

    #[test]
    fn test_short_circuit_and() {
        let v = vars();
        let (rhs, hits) = Probe::new(Value::Bool(true));
        let mut node = LogicalAnd::new(Literal::new(Value::Bool(false)), rhs);
        assert_eq!(node.process(&v), Value::Bool(false));
        assert_eq!(hits.get(), 0);

        let (rhs, hits) = Probe::new(Value::Bool(false));
        let mut node = LogicalAnd::new(Literal::new(Value::Bool(true)), rhs);
        assert_eq!(node.process(&v), Value::Bool(false));
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn test_short_circuit_or() {
        let v = vars();
        let (rhs, hits) = Probe::new(Value::Bool(false));
        let mut node = LogicalOr::new(Literal::new(Value::Bool(true)), rhs);
        assert_eq!(node.process(&v), Value::Bool(true));
        assert_eq!(hits.get(), 0);
    }

    #[test]
    fn test_ternary_select_evaluates_one_branch() {
        let v = vars();
        let (then_arm, then_hits) = Probe::new(Value::Int(1));
        let (else_arm, else_hits) = Probe::new(Value::Int(2));
        let mut node = TernarySelect::new(Literal::new(Value::Bool(false)), then_arm, else_arm);
        assert_eq!(node.process(&v), Value::Int(2));
        assert_eq!(then_hits.get(), 0);
        assert_eq!(else_hits.get(), 1);
    }

    #[test]
    fn test_matches_precomp() {
        let v = vars();
        let regex = compile_regex("^x.*y$", false).unwrap();
        let mut node = MatchesPrecomp::new(
            FieldRef::new("a", TypeInference::IntFloatString),
            regex,
            false,
        );
        assert_eq!(node.process(&v), Value::Bool(true));

        let regex = compile_regex("^X.*Y$", true).unwrap();
        let mut node = MatchesPrecomp::new(
            FieldRef::new("a", TypeInference::IntFloatString),
            regex,
            false,
        );
        assert_eq!(node.process(&v), Value::Bool(true));
    }

    #[test]
    fn test_sub_nodes() {
        let v = vars();
        let regex = compile_regex("a", false).unwrap();
        let mut node = SubPrecomp::new(
            Literal::new(Value::from_string("banana")),
            regex,
            Literal::new(Value::from_string("b")),
            true,
        );
        assert_eq!(node.process(&v), Value::from_string("bbnbnb"));

        let regex = compile_regex("(an)", false).unwrap();
        let mut node = SubPrecomp::new(
            Literal::new(Value::from_string("banana")),
            regex,
            Literal::new(Value::from_string("[\\1]")),
            false,
        );
        assert_eq!(node.process(&v), Value::from_string("b[an]ana"));

        let mut node = SubDynamic::new(
            Literal::new(Value::from_string("banana")),
            Literal::new(Value::from_string("n.")),
            Literal::new(Value::from_string("x")),
            true,
        );
        assert_eq!(node.process(&v), Value::from_string("baxx"));
    }

    #[test]
    fn test_variadic_folds() {
        let v = vars();
        let mut node = MinVariadic::new(vec![
            Literal::new(Value::Int(3)),
            Literal::new(Value::Float(2.5)),
            Literal::new(Value::Int(9)),
        ]);
        assert_eq!(node.process(&v), Value::Float(2.5));

        let mut node = MaxVariadic::new(vec![]);
        assert_eq!(node.process(&v), Value::Absent);
    }

    #[test]
    fn test_urandint_bounds() {
        let v = vars();
        let mut node = UrandInt::new(Literal::new(Value::Int(3)), Literal::new(Value::Int(5)));
        for _ in 0..100 {
            match node.process(&v) {
                Value::Int(x) => assert!((3..=5).contains(&x)),
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[test]
    fn test_udf_callsite_buffer_reuse() {
        let v = vars();
        let defsite = Rc::new(UdfDefsite::new(
            "f",
            2,
            Box::new(|args: &[Value], _vars: &Variables| {
                assert_eq!(args.len(), 2);
                args[0].add(&args[1])
            }),
        ));
        let mut node = UdfCallsite::new(
            defsite,
            vec![
                Literal::new(Value::Int(1)),
                FieldRef::new("n", TypeInference::IntFloatString),
            ],
        );
        assert_eq!(node.process(&v), Value::Int(8));
        assert_eq!(node.process(&v), Value::Int(8));
    }

    #[test]
    #[should_panic(expected = "internal error")]
    fn test_unresolved_callsite_panics() {
        let v = vars();
        let ast = AstNode::call("f", vec![]);
        let (mut ev, _cell) = CallsiteEvaluator::unresolved(
            "f",
            0,
            TypeInference::IntFloatString,
            ContextFlags::empty(),
            ast,
        );
        ev.process(&v);
    }
}
