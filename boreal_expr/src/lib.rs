// Expression engine for mathematical expressions provided as strings.
//
// Species response functions, establishment thresholds, management filters
// and user-defined output columns are all configured as expression strings
// ("1/(1+(x/p1)^p2)", "dbh>30 and stress<0.1", ...). This crate parses such
// a string once into a flat instruction list and evaluates it with a small
// stack machine, so per-tree/per-cell evaluation inside the annual loop is
// a tight loop over opcodes with no allocation.
//
// Module overview:
// - `parse.rs`:     Tokenizer + recursive-descent parser -> `Vec<Instr>`.
// - `eval.rs`:      The instruction set and the stack evaluator.
// - `linearize.rs`: Optional 1-D/2-D sample tables evaluated by linear
//                   interpolation, for expressions called many times with
//                   a bounded scalar argument.
//
// Syntax: `+ - * / ^`, unary minus, comparisons (`= <> < > <= >=`),
// `and`/`or`/`not`, and the functions sin, cos, tan, exp, ln, sqrt, min,
// max, if, mod, polygon, sigmoid, rnd, rndg. Logical true is 1, false is 0.
//
// Variables resolve in two spaces: *local* slots (created on demand while
// parsing, addressed by position) and *bound* variables supplied by a
// `VarSource` — the hook through which model objects (tree, resource unit,
// sapling) expose their state without this crate knowing their types.
//
// Parsing is `Expression::parse` -> immutable value; evaluation takes
// `&self`, so a parsed expression is shared freely across worker threads.
// The linearization tables are built once behind `OnceLock`.

pub mod eval;
pub mod linearize;
pub mod parse;

use std::sync::OnceLock;

use boreal_prng::GameRng;
use eval::{Instr, run};
use linearize::{Table1d, Table2d};

/// Errors raised while parsing (and, for usage errors, evaluating)
/// an expression.
#[derive(Debug, thiserror::Error)]
pub enum ExprError {
    #[error("syntax error in expression '{expr}': {msg}")]
    Syntax { expr: String, msg: String },
    #[error("unbalanced parentheses in expression '{0}'")]
    UnbalancedParens(String),
    #[error("unknown function '{0}'")]
    UnknownFunction(String),
    #[error("function '{func}' expects {expected} arguments, got {got}")]
    BadArgCount {
        func: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("variable '{0}' is not available in (strict) expression")]
    UnknownVariable(String),
}

/// Binding hook for model variables.
///
/// An implementor maps variable names to indices at parse time and serves
/// the current values at evaluation time. Implementations live next to the
/// model objects (tree wrapper, resource-unit wrapper, sapling wrapper).
pub trait VarSource {
    /// Index for a variable name, or `None` if this source does not
    /// provide it.
    fn var_index(&self, name: &str) -> Option<usize>;
    /// Current value of the variable with the given index.
    fn value(&self, index: usize) -> f64;
}

/// Names-only resolver used when parsing: evaluation may use a different
/// (per-thread) instance of the same wrapper type.
pub struct VarNames<'a>(pub &'a [&'a str]);

impl VarSource for VarNames<'_> {
    fn var_index(&self, name: &str) -> Option<usize> {
        self.0.iter().position(|n| *n == name)
    }
    fn value(&self, _index: usize) -> f64 {
        0.0
    }
}

/// A parsed, immutable expression.
pub struct Expression {
    text: String,
    program: Vec<Instr>,
    locals: Vec<String>,
    uses_random: bool,
    linear: OnceLock<Table1d>,
    linear2d: OnceLock<Table2d>,
}

impl std::fmt::Debug for Expression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Expression").field("text", &self.text).finish()
    }
}

impl Expression {
    /// Parse an expression without bound model variables. Unknown names
    /// become local slots (non-strict mode).
    pub fn parse(expr: &str) -> Result<Self, ExprError> {
        Self::parse_bound(expr, None, false)
    }

    /// Parse in strict mode: every variable must resolve against `names`.
    pub fn parse_strict(expr: &str, names: &[&str]) -> Result<Self, ExprError> {
        Self::parse_bound(expr, Some(&VarNames(names)), true)
    }

    /// Parse with an optional resolver for bound (model) variables.
    ///
    /// Names the resolver knows become `Instr::Bound` loads served by the
    /// `VarSource` passed at evaluation time; the rest become local slots,
    /// or an error in strict mode.
    pub fn parse_bound(
        expr: &str,
        resolver: Option<&dyn VarSource>,
        strict: bool,
    ) -> Result<Self, ExprError> {
        let parsed = parse::parse(expr, resolver, strict)?;
        Ok(Self {
            text: expr.to_string(),
            uses_random: parsed.uses_random,
            program: parsed.program,
            locals: parsed.locals,
            linear: OnceLock::new(),
            linear2d: OnceLock::new(),
        })
    }

    /// The source text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// True for an expression with no instructions (empty source).
    /// Evaluates to 0.
    pub fn is_empty(&self) -> bool {
        self.program.is_empty()
    }

    /// True if the program contains `rnd`/`rndg` calls; such expressions
    /// must be evaluated through [`Expression::execute`] with an rng.
    pub fn uses_random(&self) -> bool {
        self.uses_random
    }

    /// Number of local variable slots.
    pub fn var_count(&self) -> usize {
        self.locals.len()
    }

    /// Position of a local variable, by name.
    pub fn var_index(&self, name: &str) -> Option<usize> {
        self.locals.iter().position(|n| n == name)
    }

    /// Evaluate with local variable values, a bound-variable source, and a
    /// random generator. Missing local slots read as 0.
    ///
    /// Panics if the expression uses `rnd`/`rndg` and `rng` is `None` —
    /// callers gate on [`Expression::uses_random`].
    pub fn execute(
        &self,
        locals: &[f64],
        source: Option<&dyn VarSource>,
        rng: Option<&mut GameRng>,
    ) -> f64 {
        if self.program.is_empty() {
            return 0.0;
        }
        run(&self.program, locals, source, rng)
    }

    /// Evaluate a single-variable expression (slot 0 = `x`). Uses the
    /// linearization table when one was built and `x` is inside its range.
    pub fn calc1(&self, x: f64) -> f64 {
        if let Some(table) = self.linear.get()
            && let Some(v) = table.lookup(x)
        {
            return v;
        }
        self.execute(&[x], None, None)
    }

    /// Evaluate a two-variable expression (slots 0 and 1). Uses the 2-D
    /// linearization table when built and the point is inside its range.
    pub fn calc2(&self, x: f64, y: f64) -> f64 {
        if let Some(table) = self.linear2d.get()
            && let Some(v) = table.lookup(x, y)
        {
            return v;
        }
        self.execute(&[x, y], None, None)
    }

    /// Precompute `steps` samples over `[low, high]` for `calc1`.
    /// Building twice is a no-op; the first table wins.
    pub fn linearize(&self, low: f64, high: f64, steps: usize) {
        debug_assert!(!self.uses_random, "cannot linearize a random expression");
        self.linear
            .get_or_init(|| Table1d::build(low, high, steps, |x| self.execute(&[x], None, None)));
    }

    /// Precompute a (stepsx x stepsy) sample table for `calc2`.
    pub fn linearize2d(
        &self,
        low_x: f64,
        high_x: f64,
        low_y: f64,
        high_y: f64,
        steps_x: usize,
        steps_y: usize,
    ) {
        debug_assert!(!self.uses_random, "cannot linearize a random expression");
        self.linear2d.get_or_init(|| {
            Table2d::build(low_x, high_x, low_y, high_y, steps_x, steps_y, |x, y| {
                self.execute(&[x, y], None, None)
            })
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arithmetic_and_precedence() {
        let e = Expression::parse("1+2*3^2").unwrap();
        assert_eq!(e.execute(&[], None, None), 19.0);
        let e = Expression::parse("(1+2)*3").unwrap();
        assert_eq!(e.execute(&[], None, None), 9.0);
        // unary minus binds tighter than '^'
        let e = Expression::parse("-2^2").unwrap();
        assert_eq!(e.execute(&[], None, None), 4.0);
        let e = Expression::parse("10/4").unwrap();
        assert_eq!(e.execute(&[], None, None), 2.5);
    }

    #[test]
    fn variables_fill_slots_in_order() {
        let e = Expression::parse("dbh*dbh*3.1415/4").unwrap();
        assert_eq!(e.var_count(), 1);
        assert_eq!(e.var_index("dbh"), Some(0));
        let v = e.execute(&[20.0], None, None);
        assert!((v - 20.0 * 20.0 * 3.1415 / 4.0).abs() < 1e-9);
    }

    #[test]
    fn comparisons_and_logic() {
        let e = Expression::parse("x>2 and x<5").unwrap();
        assert_eq!(e.execute(&[3.0], None, None), 1.0);
        assert_eq!(e.execute(&[6.0], None, None), 0.0);
        let e = Expression::parse("x=1 or y=1").unwrap();
        assert_eq!(e.execute(&[0.0, 1.0], None, None), 1.0);
        let e = Expression::parse("not(x>10)").unwrap();
        assert_eq!(e.execute(&[3.0], None, None), 1.0);
        assert_eq!(e.execute(&[30.0], None, None), 0.0);
        let e = Expression::parse("x<>4").unwrap();
        assert_eq!(e.execute(&[4.0], None, None), 0.0);
    }

    #[test]
    fn functions() {
        let e = Expression::parse("min(x, 5, 3)").unwrap();
        assert_eq!(e.execute(&[4.0], None, None), 3.0);
        let e = Expression::parse("max(x, 0)").unwrap();
        assert_eq!(e.execute(&[-2.0], None, None), 0.0);
        let e = Expression::parse("if(x>0, 10, 20)").unwrap();
        assert_eq!(e.execute(&[1.0], None, None), 10.0);
        assert_eq!(e.execute(&[-1.0], None, None), 20.0);
        let e = Expression::parse("mod(x, 3)").unwrap();
        assert_eq!(e.execute(&[7.0], None, None), 1.0);
        let e = Expression::parse("sqrt(exp(ln(x)))").unwrap();
        assert!((e.execute(&[16.0], None, None) - 4.0).abs() < 1e-12);
        let e = Expression::parse("sin(0)+cos(0)+tan(0)").unwrap();
        assert!((e.execute(&[], None, None) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn polygon_interpolates() {
        // ramp from (0,0) to (1,1)
        let e = Expression::parse("polygon(x, 0, 0, 1, 1)").unwrap();
        assert_eq!(e.execute(&[-0.5], None, None), 0.0);
        assert!((e.execute(&[0.5], None, None) - 0.5).abs() < 1e-12);
        assert_eq!(e.execute(&[2.0], None, None), 1.0);
    }

    #[test]
    fn sigmoid_types() {
        let logistic = Expression::parse("sigmoid(x, 0, 1, 5)").unwrap();
        let v = logistic.execute(&[0.5], None, None);
        assert!((v - 1.0 / (1.0 + (-2.5f64).exp())).abs() < 1e-12);
        let hill = Expression::parse("sigmoid(x, 1, 2, 0.5)").unwrap();
        let v = hill.execute(&[0.5], None, None);
        assert!((v - 0.5).abs() < 1e-12);
    }

    #[test]
    fn rnd_is_deterministic_under_seed() {
        let e = Expression::parse("rnd(0, 10)").unwrap();
        assert!(e.uses_random());
        let mut a = GameRng::new(3);
        let mut b = GameRng::new(3);
        let va = e.execute(&[], None, Some(&mut a));
        let vb = e.execute(&[], None, Some(&mut b));
        assert_eq!(va, vb);
        assert!((0.0..10.0).contains(&va));
    }

    #[test]
    fn strict_mode_rejects_unknown() {
        let err = Expression::parse_strict("dbh+unknown", &["dbh"]).unwrap_err();
        assert!(matches!(err, ExprError::UnknownVariable(n) if n == "unknown"));
    }

    #[test]
    fn bound_variables_use_the_source() {
        struct Two;
        impl VarSource for Two {
            fn var_index(&self, name: &str) -> Option<usize> {
                match name {
                    "height" => Some(0),
                    "age" => Some(1),
                    _ => None,
                }
            }
            fn value(&self, index: usize) -> f64 {
                [31.5, 80.0][index]
            }
        }
        let e = Expression::parse_bound("height/age", Some(&Two), true).unwrap();
        assert!((e.execute(&[], Some(&Two), None) - 31.5 / 80.0).abs() < 1e-12);
    }

    #[test]
    fn empty_expression_is_zero() {
        let e = Expression::parse("").unwrap();
        assert!(e.is_empty());
        assert_eq!(e.execute(&[], None, None), 0.0);
    }

    #[test]
    fn syntax_errors_are_reported() {
        assert!(Expression::parse("1+").is_err());
        assert!(Expression::parse("foo(1)").is_err());
        assert!(Expression::parse("min()").is_err());
        assert!(Expression::parse("(1+2").is_err());
        assert!(Expression::parse("if(1,2)").is_err());
    }

    #[test]
    fn linearized_matches_exact_at_endpoints() {
        let e = Expression::parse("x^2+1").unwrap();
        e.linearize(0.0, 2.0, 100);
        assert_eq!(e.calc1(0.0), 1.0);
        assert_eq!(e.calc1(2.0), 5.0);
        // inside the range the error is bounded by the sample spacing
        assert!((e.calc1(1.3) - (1.3 * 1.3 + 1.0)).abs() < 1e-3);
        // outside the range we fall back to exact evaluation
        assert_eq!(e.calc1(3.0), 10.0);
    }

    #[test]
    fn linearized_2d() {
        let e = Expression::parse("x*y").unwrap();
        e.linearize2d(0.0, 1.0, 0.0, 1.0, 50, 50);
        assert!((e.calc2(0.0, 0.0)).abs() < 1e-12);
        assert!((e.calc2(1.0, 1.0) - 1.0).abs() < 1e-12);
        assert!((e.calc2(0.25, 0.5) - 0.125).abs() < 1e-3);
    }
}
