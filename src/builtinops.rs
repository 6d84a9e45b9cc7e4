//! Built-in operations registry.
//!
//! Every builtin procedure and special form is described once in a static
//! registry. Procedures are also bound in the global environment as
//! first-class values, so they can be passed to `map`, `apply` and friends;
//! special forms are only reachable through the evaluator's dispatch.
//!
//! ## Functions vs Special Forms
//!
//! - **Functions**: Evaluate all arguments before application (e.g., `+`, `not`, `car`)
//! - **Special Forms**: Control evaluation of their operands (e.g., `if`, `cond`, `and`)
//!
//! ## Strict Typing
//!
//! - Operations reject incorrect types (e.g., `(not 42)` errors)
//! - No coercion between numbers, strings and symbols
//! - Predicates passed to `filter` must return booleans
//! - Undefined arithmetic (division by zero, `sqrt` of a negative) is a domain error
//!
//! ## Adding New Operations
//!
//! 1. **Implement the function** with the [`BuiltinFn`] signature
//! 2. **Add to BUILTIN_OPS** with its identifier and arity
//! 3. **Add tests** covering edge cases and error conditions

use std::collections::HashMap;
use std::io::Write;
use std::sync::LazyLock;

use crate::Error;
use crate::ast::Node;
use crate::evaluator::{
    Arity, Interpreter, eval_and, eval_begin, eval_cond, eval_define, eval_defmacro, eval_if,
    eval_lambda, eval_or, eval_quasiquote, eval_quote, eval_set, eval_unquote,
    eval_unquote_splicing,
};
use crate::heap::{EnvRef, Value, ValueRef};

/// Procedure over evaluated arguments; `env` is the caller's environment
pub type BuiltinFn = fn(&mut Interpreter, &[ValueRef], EnvRef) -> Result<ValueRef, Error>;

/// Special form over unevaluated operands
pub type SpecialFormFn = fn(&mut Interpreter, &[Node], EnvRef) -> Result<ValueRef, Error>;

/// Represents the implementation of a built-in operation
#[derive(Clone, Copy)]
pub enum OpKind {
    /// Regular function that takes evaluated arguments and returns a value
    Function(BuiltinFn),
    /// Special form that receives its operands unevaluated
    SpecialForm(SpecialFormFn),
}

impl std::fmt::Debug for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OpKind::Function(_) => write!(f, "Function(<fn>)"),
            OpKind::SpecialForm(_) => write!(f, "SpecialForm(<fn>)"),
        }
    }
}

/// Definition of a built-in operation
#[derive(Debug, Clone)]
pub struct BuiltinOp {
    /// The identifier this operation is bound to
    pub id: &'static str,
    pub op_kind: OpKind,
    /// Expected number of arguments
    pub arity: Arity,
}

impl PartialEq for BuiltinOp {
    fn eq(&self, other: &Self) -> bool {
        // Identifiers are unique within the registry
        self.id == other.id
    }
}

impl BuiltinOp {
    #[cfg_attr(not(test), expect(dead_code))]
    pub(crate) fn is_special_form(&self) -> bool {
        matches!(self.op_kind, OpKind::SpecialForm(_))
    }
}

//
// Argument helpers
//

fn number_arg(interp: &Interpreter, value: ValueRef, op: &str) -> Result<f64, Error> {
    match interp.value(value) {
        Value::Number(n) => Ok(*n),
        _ => Err(Error::TypeError(format!(
            "{op} requires numbers, got: {}",
            interp.display(value)
        ))),
    }
}

fn numbers(interp: &Interpreter, args: &[ValueRef], op: &str) -> Result<Vec<f64>, Error> {
    args.iter()
        .map(|arg| number_arg(interp, *arg, op))
        .collect()
}

fn string_arg<'a>(interp: &'a Interpreter, value: ValueRef, op: &str) -> Result<&'a str, Error> {
    match interp.value(value) {
        Value::String(s) => Ok(s),
        _ => Err(Error::TypeError(format!(
            "{op} requires a string, got: {}",
            interp.display(value)
        ))),
    }
}

/// Elements of a list argument; atoms are type errors, dotted lists structural errors
fn list_arg(interp: &Interpreter, value: ValueRef, op: &str) -> Result<Vec<ValueRef>, Error> {
    match interp.value(value) {
        Value::Nil | Value::Cons { .. } => interp.heap().list_to_vec(value).map_err(|_| {
            Error::StructuralError(format!(
                "{op} expected proper list, got: {}",
                interp.display(value)
            ))
        }),
        _ => Err(Error::TypeError(format!(
            "{op} requires a list, got: {}",
            interp.display(value)
        ))),
    }
}

fn exact_args<const N: usize>(args: &[ValueRef]) -> Result<&[ValueRef; N], Error> {
    args.try_into()
        .map_err(|_| Error::arity_error(Arity::Exact(N), args.len()))
}

//
// Builtin Function Implementations
//

fn builtin_add(
    interp: &mut Interpreter,
    args: &[ValueRef],
    _env: EnvRef,
) -> Result<ValueRef, Error> {
    let sum = numbers(interp, args, "+")?.into_iter().sum();
    Ok(interp.heap.number(sum))
}

fn builtin_mul(
    interp: &mut Interpreter,
    args: &[ValueRef],
    _env: EnvRef,
) -> Result<ValueRef, Error> {
    let product = numbers(interp, args, "*")?.into_iter().product();
    Ok(interp.heap.number(product))
}

fn builtin_sub(
    interp: &mut Interpreter,
    args: &[ValueRef],
    _env: EnvRef,
) -> Result<ValueRef, Error> {
    let nums = numbers(interp, args, "-")?;
    let result = match nums.as_slice() {
        [] => return Err(Error::arity_error(Arity::AtLeast(1), 0)),
        [only] => -only,
        [first, rest @ ..] => rest.iter().fold(*first, |acc, n| acc - n),
    };
    Ok(interp.heap.number(result))
}

fn builtin_div(
    interp: &mut Interpreter,
    args: &[ValueRef],
    _env: EnvRef,
) -> Result<ValueRef, Error> {
    let nums = numbers(interp, args, "/")?;
    let [first, rest @ ..] = nums.as_slice() else {
        return Err(Error::arity_error(Arity::AtLeast(2), 0));
    };
    let mut result = *first;
    for divisor in rest {
        if *divisor == 0.0 {
            return Err(Error::DomainError("Division by zero".to_owned()));
        }
        result /= divisor;
    }
    Ok(interp.heap.number(result))
}

fn builtin_mod(
    interp: &mut Interpreter,
    args: &[ValueRef],
    _env: EnvRef,
) -> Result<ValueRef, Error> {
    let [a, b] = exact_args::<2>(args)?;
    let dividend = number_arg(interp, *a, "mod")?;
    let divisor = number_arg(interp, *b, "mod")?;
    if divisor == 0.0 {
        return Err(Error::DomainError("Modulo by zero".to_owned()));
    }
    Ok(interp.heap.number(dividend % divisor))
}

// Macro to generate single-argument numeric functions with no domain restriction
macro_rules! unary_math {
    ($name:ident, $op_str:expr, $f:expr) => {
        fn $name(
            interp: &mut Interpreter,
            args: &[ValueRef],
            _env: EnvRef,
        ) -> Result<ValueRef, Error> {
            let [arg] = exact_args::<1>(args)?;
            let f: fn(f64) -> f64 = $f;
            let n = number_arg(interp, *arg, $op_str)?;
            Ok(interp.heap.number(f(n)))
        }
    };
}

unary_math!(builtin_abs, "abs", f64::abs);
unary_math!(builtin_floor, "floor", f64::floor);
unary_math!(builtin_ceil, "ceil", f64::ceil);
unary_math!(builtin_round, "round", f64::round);
unary_math!(builtin_trunc, "trunc", f64::trunc);
unary_math!(builtin_exp, "exp", f64::exp);

fn builtin_sqrt(
    interp: &mut Interpreter,
    args: &[ValueRef],
    _env: EnvRef,
) -> Result<ValueRef, Error> {
    let [arg] = exact_args::<1>(args)?;
    let n = number_arg(interp, *arg, "sqrt")?;
    if n < 0.0 {
        return Err(Error::DomainError(format!(
            "sqrt of negative number: {n}"
        )));
    }
    Ok(interp.heap.number(n.sqrt()))
}

fn builtin_log(
    interp: &mut Interpreter,
    args: &[ValueRef],
    _env: EnvRef,
) -> Result<ValueRef, Error> {
    let [arg] = exact_args::<1>(args)?;
    let n = number_arg(interp, *arg, "log")?;
    if n <= 0.0 {
        return Err(Error::DomainError(format!(
            "log of non-positive number: {n}"
        )));
    }
    Ok(interp.heap.number(n.ln()))
}

fn builtin_min(
    interp: &mut Interpreter,
    args: &[ValueRef],
    _env: EnvRef,
) -> Result<ValueRef, Error> {
    let nums = numbers(interp, args, "min")?;
    let result = nums
        .into_iter()
        .reduce(f64::min)
        .ok_or_else(|| Error::arity_error(Arity::AtLeast(1), 0))?;
    Ok(interp.heap.number(result))
}

fn builtin_max(
    interp: &mut Interpreter,
    args: &[ValueRef],
    _env: EnvRef,
) -> Result<ValueRef, Error> {
    let nums = numbers(interp, args, "max")?;
    let result = nums
        .into_iter()
        .reduce(f64::max)
        .ok_or_else(|| Error::arity_error(Arity::AtLeast(1), 0))?;
    Ok(interp.heap.number(result))
}

// Macro to generate chained numeric comparison functions
macro_rules! numeric_comparison {
    ($name:ident, $op:tt, $op_str:expr) => {
        fn $name(
            interp: &mut Interpreter,
            args: &[ValueRef],
            _env: EnvRef,
        ) -> Result<ValueRef, Error> {
            // Every operand is type checked, even after the chain has failed
            let nums = numbers(interp, args, $op_str)?;
            if nums.len() < 2 {
                return Err(Error::arity_error(Arity::AtLeast(2), nums.len()));
            }
            let holds = nums.windows(2).all(|pair| pair[0] $op pair[1]);
            Ok(interp.heap.boolean(holds))
        }
    };
}

numeric_comparison!(builtin_num_eq, ==, "=");
numeric_comparison!(builtin_lt, <, "<");
numeric_comparison!(builtin_gt, >, ">");
numeric_comparison!(builtin_le, <=, "<=");
numeric_comparison!(builtin_ge, >=, ">=");

fn builtin_eq(
    interp: &mut Interpreter,
    args: &[ValueRef],
    _env: EnvRef,
) -> Result<ValueRef, Error> {
    let [a, b] = exact_args::<2>(args)?;
    let same = interp.heap().values_eq(*a, *b);
    Ok(interp.heap.boolean(same))
}

fn builtin_equal(
    interp: &mut Interpreter,
    args: &[ValueRef],
    _env: EnvRef,
) -> Result<ValueRef, Error> {
    let [a, b] = exact_args::<2>(args)?;
    let same = interp.heap().values_equal(*a, *b);
    Ok(interp.heap.boolean(same))
}

fn builtin_not(
    interp: &mut Interpreter,
    args: &[ValueRef],
    _env: EnvRef,
) -> Result<ValueRef, Error> {
    let [arg] = exact_args::<1>(args)?;
    let b = interp.expect_bool(*arg, "not")?;
    Ok(interp.heap.boolean(!b))
}

fn builtin_cons(
    interp: &mut Interpreter,
    args: &[ValueRef],
    _env: EnvRef,
) -> Result<ValueRef, Error> {
    let [car, cdr] = exact_args::<2>(args)?;
    Ok(interp.heap.cons(*car, *cdr))
}

fn builtin_car(
    interp: &mut Interpreter,
    args: &[ValueRef],
    _env: EnvRef,
) -> Result<ValueRef, Error> {
    let [arg] = exact_args::<1>(args)?;
    match interp.value(*arg) {
        Value::Cons { car, .. } => Ok(*car),
        _ => Err(Error::TypeError(format!(
            "car requires a pair, got: {}",
            interp.display(*arg)
        ))),
    }
}

fn builtin_cdr(
    interp: &mut Interpreter,
    args: &[ValueRef],
    _env: EnvRef,
) -> Result<ValueRef, Error> {
    let [arg] = exact_args::<1>(args)?;
    match interp.value(*arg) {
        Value::Cons { cdr, .. } => Ok(*cdr),
        _ => Err(Error::TypeError(format!(
            "cdr requires a pair, got: {}",
            interp.display(*arg)
        ))),
    }
}

fn builtin_list(
    interp: &mut Interpreter,
    args: &[ValueRef],
    _env: EnvRef,
) -> Result<ValueRef, Error> {
    Ok(interp.heap.list(args))
}

fn builtin_length(
    interp: &mut Interpreter,
    args: &[ValueRef],
    _env: EnvRef,
) -> Result<ValueRef, Error> {
    let [arg] = exact_args::<1>(args)?;
    let len = list_arg(interp, *arg, "length")?.len();
    Ok(interp.heap.number(len as f64))
}

/// All arguments but the last are copied; the last becomes the shared tail
fn builtin_append(
    interp: &mut Interpreter,
    args: &[ValueRef],
    _env: EnvRef,
) -> Result<ValueRef, Error> {
    let Some((last, prefix)) = args.split_last() else {
        return Ok(interp.heap.nil());
    };
    let mut items = Vec::new();
    for list in prefix {
        items.extend(list_arg(interp, *list, "append")?);
    }
    Ok(interp.heap.list_with_tail(&items, *last))
}

fn builtin_reverse(
    interp: &mut Interpreter,
    args: &[ValueRef],
    _env: EnvRef,
) -> Result<ValueRef, Error> {
    let [arg] = exact_args::<1>(args)?;
    let items = list_arg(interp, *arg, "reverse")?;
    let nil = interp.heap.nil();
    Ok(items
        .into_iter()
        .fold(nil, |rest, item| interp.heap.cons(item, rest)))
}

// Macro to generate single-argument type predicates
macro_rules! type_predicate {
    ($name:ident, $pattern:pat) => {
        fn $name(
            interp: &mut Interpreter,
            args: &[ValueRef],
            _env: EnvRef,
        ) -> Result<ValueRef, Error> {
            let [arg] = exact_args::<1>(args)?;
            let holds = matches!(interp.value(*arg), $pattern);
            Ok(interp.heap.boolean(holds))
        }
    };
}

type_predicate!(builtin_is_null, Value::Nil);
type_predicate!(builtin_is_pair, Value::Cons { .. });
type_predicate!(builtin_is_list, Value::Nil | Value::Cons { .. });
type_predicate!(builtin_is_number, Value::Number(_));
type_predicate!(builtin_is_symbol, Value::Symbol(_));
type_predicate!(builtin_is_string, Value::String(_));
type_predicate!(builtin_is_boolean, Value::Bool(_));

fn builtin_is_atom(
    interp: &mut Interpreter,
    args: &[ValueRef],
    _env: EnvRef,
) -> Result<ValueRef, Error> {
    let [arg] = exact_args::<1>(args)?;
    let holds = !matches!(interp.value(*arg), Value::Nil | Value::Cons { .. });
    Ok(interp.heap.boolean(holds))
}

fn builtin_is_function(
    interp: &mut Interpreter,
    args: &[ValueRef],
    _env: EnvRef,
) -> Result<ValueRef, Error> {
    let [arg] = exact_args::<1>(args)?;
    let holds = match interp.value(*arg) {
        Value::Closure(closure) => !closure.is_macro,
        Value::Builtin(_) => true,
        _ => false,
    };
    Ok(interp.heap.boolean(holds))
}

fn builtin_string_length(
    interp: &mut Interpreter,
    args: &[ValueRef],
    _env: EnvRef,
) -> Result<ValueRef, Error> {
    let [arg] = exact_args::<1>(args)?;
    let len = string_arg(interp, *arg, "string-length")?.chars().count();
    Ok(interp.heap.number(len as f64))
}

fn builtin_string_append(
    interp: &mut Interpreter,
    args: &[ValueRef],
    _env: EnvRef,
) -> Result<ValueRef, Error> {
    let mut result = String::new();
    for arg in args {
        result.push_str(string_arg(interp, *arg, "string-append")?);
    }
    Ok(interp.heap.string(result))
}

fn builtin_number_to_string(
    interp: &mut Interpreter,
    args: &[ValueRef],
    _env: EnvRef,
) -> Result<ValueRef, Error> {
    let [arg] = exact_args::<1>(args)?;
    let n = number_arg(interp, *arg, "number->string")?;
    Ok(interp.heap.string(n.to_string()))
}

fn builtin_string_to_number(
    interp: &mut Interpreter,
    args: &[ValueRef],
    _env: EnvRef,
) -> Result<ValueRef, Error> {
    let [arg] = exact_args::<1>(args)?;
    let text = string_arg(interp, *arg, "string->number")?.trim();
    let parsed = if crate::ast::looks_numeric(text) {
        text.parse::<f64>().ok()
    } else {
        None
    };
    match parsed {
        Some(n) => Ok(interp.heap.number(n)),
        None => Err(Error::DomainError(format!(
            "string->number: not a number: {text:?}"
        ))),
    }
}

fn builtin_symbol_to_string(
    interp: &mut Interpreter,
    args: &[ValueRef],
    _env: EnvRef,
) -> Result<ValueRef, Error> {
    let [arg] = exact_args::<1>(args)?;
    let name = match interp.value(*arg) {
        Value::Symbol(symbol) => interp.symbols().name(*symbol).to_owned(),
        _ => {
            return Err(Error::TypeError(format!(
                "symbol->string requires a symbol, got: {}",
                interp.display(*arg)
            )));
        }
    };
    Ok(interp.heap.string(name))
}

fn builtin_string_to_symbol(
    interp: &mut Interpreter,
    args: &[ValueRef],
    _env: EnvRef,
) -> Result<ValueRef, Error> {
    let [arg] = exact_args::<1>(args)?;
    let name = string_arg(interp, *arg, "string->symbol")?.to_owned();
    let symbol = interp.intern(&name)?;
    Ok(interp.heap.symbol(symbol))
}

/// `(apply f a b '(c d))` calls `(f a b c d)`
fn builtin_apply(
    interp: &mut Interpreter,
    args: &[ValueRef],
    env: EnvRef,
) -> Result<ValueRef, Error> {
    let [callee, rest @ ..] = args else {
        return Err(Error::arity_error(Arity::AtLeast(2), args.len()));
    };
    let Some((spread, leading)) = rest.split_last() else {
        return Err(Error::arity_error(Arity::AtLeast(2), args.len()));
    };
    let mut call_args = leading.to_vec();
    call_args.extend(list_arg(interp, *spread, "apply")?);
    interp.apply(*callee, &call_args, env)
}

fn builtin_map(
    interp: &mut Interpreter,
    args: &[ValueRef],
    env: EnvRef,
) -> Result<ValueRef, Error> {
    let [func, list] = exact_args::<2>(args)?;
    let items = list_arg(interp, *list, "map")?;
    let mut results = Vec::with_capacity(items.len());
    for item in items {
        results.push(interp.apply(*func, &[item], env)?);
    }
    Ok(interp.heap.list(&results))
}

fn builtin_filter(
    interp: &mut Interpreter,
    args: &[ValueRef],
    env: EnvRef,
) -> Result<ValueRef, Error> {
    let [predicate, list] = exact_args::<2>(args)?;
    let items = list_arg(interp, *list, "filter")?;
    let mut kept = Vec::new();
    for item in items {
        let verdict = interp.apply(*predicate, &[item], env)?;
        if interp.expect_bool(verdict, "filter predicate")? {
            kept.push(item);
        }
    }
    Ok(interp.heap.list(&kept))
}

/// Split `(f list)` / `(f init list)` into the function, optional seed and elements
fn fold_args(
    interp: &Interpreter,
    args: &[ValueRef],
    op: &str,
) -> Result<(ValueRef, Option<ValueRef>, Vec<ValueRef>), Error> {
    match args {
        [func, list] => Ok((*func, None, list_arg(interp, *list, op)?)),
        [func, init, list] => Ok((*func, Some(*init), list_arg(interp, *list, op)?)),
        _ => Err(Error::arity_error(Arity::Range(2, 3), args.len())),
    }
}

/// Left fold: `(f (f init x1) x2)`; without a seed the first element starts the fold
fn builtin_reduce(
    interp: &mut Interpreter,
    args: &[ValueRef],
    env: EnvRef,
) -> Result<ValueRef, Error> {
    let (func, init, items) = fold_args(interp, args, "reduce")?;
    let mut items = items.into_iter();
    let Some(mut acc) = init.or_else(|| items.next()) else {
        return Err(Error::DomainError(
            "reduce: empty list with no initial value".to_owned(),
        ));
    };
    for item in items {
        acc = interp.apply(func, &[acc, item], env)?;
    }
    Ok(acc)
}

/// Right fold: `(f x1 (f x2 init))`; without a seed the last element starts the fold
fn builtin_foldr(
    interp: &mut Interpreter,
    args: &[ValueRef],
    env: EnvRef,
) -> Result<ValueRef, Error> {
    let (func, init, items) = fold_args(interp, args, "foldr")?;
    let mut items = items.into_iter().rev();
    let Some(mut acc) = init.or_else(|| items.next()) else {
        return Err(Error::DomainError(
            "foldr: empty list with no initial value".to_owned(),
        ));
    };
    for item in items {
        acc = interp.apply(func, &[item, acc], env)?;
    }
    Ok(acc)
}

fn builtin_error(
    interp: &mut Interpreter,
    args: &[ValueRef],
    _env: EnvRef,
) -> Result<ValueRef, Error> {
    let [arg] = exact_args::<1>(args)?;
    let message = string_arg(interp, *arg, "error")?;
    Err(Error::EvalError(message.to_owned()))
}

fn builtin_gensym(
    interp: &mut Interpreter,
    args: &[ValueRef],
    _env: EnvRef,
) -> Result<ValueRef, Error> {
    let name = match args {
        [] => format!("G__{}", interp.next_gensym()),
        [prefix] => {
            let prefix = string_arg(interp, *prefix, "gensym")?.to_owned();
            format!("{prefix}_{}", interp.next_gensym())
        }
        _ => return Err(Error::arity_error(Arity::Range(0, 1), args.len())),
    };
    let symbol = interp.intern(&name)?;
    Ok(interp.heap.symbol(symbol))
}

fn builtin_eval(
    interp: &mut Interpreter,
    args: &[ValueRef],
    env: EnvRef,
) -> Result<ValueRef, Error> {
    let [arg] = exact_args::<1>(args)?;
    let form = interp.value_to_node(*arg)?;
    interp.evaluate(&form, env)
}

#[cfg(feature = "reader")]
fn builtin_load(
    interp: &mut Interpreter,
    args: &[ValueRef],
    env: EnvRef,
) -> Result<ValueRef, Error> {
    let [arg] = exact_args::<1>(args)?;
    let path = string_arg(interp, *arg, "load")?.to_owned();
    let source = std::fs::read_to_string(&path)
        .map_err(|err| Error::EvalError(format!("load: cannot read {path}: {err}")))?;
    let program = crate::reader::parse_program(&source)?;
    tracing::debug!(path = %path, forms = program.len(), "loading file");
    interp.evaluate_sequence(&program, env)
}

fn write_stdout(text: &str) -> Result<(), Error> {
    let mut stdout = std::io::stdout().lock();
    stdout
        .write_all(text.as_bytes())
        .and_then(|()| stdout.flush())
        .map_err(|err| Error::EvalError(format!("cannot write to stdout: {err}")))
}

/// Strings print without quotes; everything else prints as it would be read
fn builtin_print(
    interp: &mut Interpreter,
    args: &[ValueRef],
    _env: EnvRef,
) -> Result<ValueRef, Error> {
    let parts: Vec<String> = args
        .iter()
        .map(|arg| match interp.value(*arg) {
            Value::String(s) => s.clone(),
            _ => interp.display(*arg).to_string(),
        })
        .collect();
    write_stdout(&format!("{}\n", parts.join(" ")))?;
    Ok(interp.heap.nil())
}

fn builtin_newline(
    interp: &mut Interpreter,
    _args: &[ValueRef],
    _env: EnvRef,
) -> Result<ValueRef, Error> {
    write_stdout("\n")?;
    Ok(interp.heap.nil())
}

/// Global registry of all built-in operations.
static BUILTIN_OPS: LazyLock<Vec<BuiltinOp>> = LazyLock::new(|| {
    fn function(id: &'static str, func: BuiltinFn, arity: Arity) -> BuiltinOp {
        BuiltinOp {
            id,
            op_kind: OpKind::Function(func),
            arity,
        }
    }

    fn special_form(id: &'static str, handler: SpecialFormFn, arity: Arity) -> BuiltinOp {
        BuiltinOp {
            id,
            op_kind: OpKind::SpecialForm(handler),
            arity,
        }
    }

    #[cfg_attr(not(feature = "reader"), expect(unused_mut))]
    let mut ops = vec![
        // Special forms
        special_form("quote", eval_quote, Arity::Exact(1)),
        special_form("quasiquote", eval_quasiquote, Arity::Exact(1)),
        special_form("unquote", eval_unquote, Arity::Any),
        special_form("unquote-splicing", eval_unquote_splicing, Arity::Any),
        special_form("define", eval_define, Arity::Exact(2)),
        special_form("set", eval_set, Arity::Exact(2)),
        // Fixed-arity lambdas only: (lambda (a b c) body...)
        special_form("lambda", eval_lambda, Arity::AtLeast(1)),
        special_form("defmacro", eval_defmacro, Arity::AtLeast(2)),
        special_form("if", eval_if, Arity::Range(2, 3)),
        special_form("cond", eval_cond, Arity::Exact(1)),
        special_form("begin", eval_begin, Arity::Any),
        special_form("and", eval_and, Arity::Any),
        special_form("or", eval_or, Arity::Any),
        // Arithmetic operations
        function("+", builtin_add, Arity::Any),
        function("-", builtin_sub, Arity::AtLeast(1)),
        function("*", builtin_mul, Arity::Any),
        function("/", builtin_div, Arity::AtLeast(2)),
        function("mod", builtin_mod, Arity::Exact(2)),
        function("abs", builtin_abs, Arity::Exact(1)),
        function("min", builtin_min, Arity::AtLeast(1)),
        function("max", builtin_max, Arity::AtLeast(1)),
        function("floor", builtin_floor, Arity::Exact(1)),
        function("ceil", builtin_ceil, Arity::Exact(1)),
        function("round", builtin_round, Arity::Exact(1)),
        function("trunc", builtin_trunc, Arity::Exact(1)),
        function("sqrt", builtin_sqrt, Arity::Exact(1)),
        function("exp", builtin_exp, Arity::Exact(1)),
        function("log", builtin_log, Arity::Exact(1)),
        // Comparison operations
        function("=", builtin_num_eq, Arity::AtLeast(2)),
        function("<", builtin_lt, Arity::AtLeast(2)),
        function(">", builtin_gt, Arity::AtLeast(2)),
        function("<=", builtin_le, Arity::AtLeast(2)),
        function(">=", builtin_ge, Arity::AtLeast(2)),
        // Equality and logic
        function("eq", builtin_eq, Arity::Exact(2)),
        function("eq?", builtin_eq, Arity::Exact(2)),
        function("equal", builtin_equal, Arity::Exact(2)),
        function("equal?", builtin_equal, Arity::Exact(2)),
        function("not", builtin_not, Arity::Exact(1)),
        // List operations
        function("cons", builtin_cons, Arity::Exact(2)),
        function("car", builtin_car, Arity::Exact(1)),
        function("cdr", builtin_cdr, Arity::Exact(1)),
        function("list", builtin_list, Arity::Any),
        function("length", builtin_length, Arity::Exact(1)),
        function("append", builtin_append, Arity::Any),
        function("reverse", builtin_reverse, Arity::Exact(1)),
        // Predicates
        function("null?", builtin_is_null, Arity::Exact(1)),
        function("pair?", builtin_is_pair, Arity::Exact(1)),
        function("atom?", builtin_is_atom, Arity::Exact(1)),
        function("list?", builtin_is_list, Arity::Exact(1)),
        function("number?", builtin_is_number, Arity::Exact(1)),
        function("symbol?", builtin_is_symbol, Arity::Exact(1)),
        function("string?", builtin_is_string, Arity::Exact(1)),
        function("boolean?", builtin_is_boolean, Arity::Exact(1)),
        function("function?", builtin_is_function, Arity::Exact(1)),
        // String operations
        function("string-length", builtin_string_length, Arity::Exact(1)),
        function("string-append", builtin_string_append, Arity::Any),
        function("number->string", builtin_number_to_string, Arity::Exact(1)),
        function("string->number", builtin_string_to_number, Arity::Exact(1)),
        function("symbol->string", builtin_symbol_to_string, Arity::Exact(1)),
        function("string->symbol", builtin_string_to_symbol, Arity::Exact(1)),
        // Higher-order operations
        function("apply", builtin_apply, Arity::AtLeast(2)),
        function("map", builtin_map, Arity::Exact(2)),
        function("filter", builtin_filter, Arity::Exact(2)),
        function("reduce", builtin_reduce, Arity::Range(2, 3)),
        function("foldl", builtin_reduce, Arity::Range(2, 3)),
        function("foldr", builtin_foldr, Arity::Range(2, 3)),
        // Misc
        function("error", builtin_error, Arity::Exact(1)),
        function("gensym", builtin_gensym, Arity::Range(0, 1)),
        function("eval", builtin_eval, Arity::Exact(1)),
        function("print", builtin_print, Arity::Any),
        function("newline", builtin_newline, Arity::Exact(0)),
    ];
    #[cfg(feature = "reader")]
    ops.push(function("load", builtin_load, Arity::Exact(1)));
    ops
});

/// Lazy static map from identifier to BuiltinOp (private - use find_builtin / find_special_form)
static BUILTIN_INDEX: LazyLock<HashMap<&'static str, &'static BuiltinOp>> = LazyLock::new(|| {
    let ops: &'static [BuiltinOp] = BUILTIN_OPS.as_slice();
    ops.iter().map(|op| (op.id, op)).collect()
});

/// Get all builtin operations (for internal use by evaluator)
pub(crate) fn get_builtin_ops() -> &'static [BuiltinOp] {
    BUILTIN_OPS.as_slice()
}

/// Find a builtin function (not a special form) by identifier
pub(crate) fn find_builtin(id: &str) -> Option<&'static BuiltinOp> {
    BUILTIN_INDEX
        .get(id)
        .copied()
        .filter(|op| matches!(op.op_kind, OpKind::Function(_)))
}

/// Find a special form by identifier
pub(crate) fn find_special_form(id: &str) -> Option<&'static BuiltinOp> {
    BUILTIN_INDEX
        .get(id)
        .copied()
        .filter(|op| matches!(op.op_kind, OpKind::SpecialForm(_)))
}
