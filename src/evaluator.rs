use std::fmt;
use std::rc::Rc;

use tracing::{debug, trace};

use crate::ast::{Atom, Node};
use crate::builtinops::{BuiltinOp, OpKind, find_builtin, find_special_form, get_builtin_ops};
use crate::gc::GcStats;
use crate::heap::{Closure, EnvRef, Heap, Value, ValueDisplay, ValueRef};
use crate::quasiquote;
use crate::symbol::{Symbol, SymbolTable};
use crate::{Error, MAX_EVAL_DEPTH};

/// Number of arguments accepted by a builtin or special form
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// Exactly n arguments
    Exact(usize),
    /// At least n arguments
    AtLeast(usize),
    /// Between min and max arguments (inclusive)
    Range(usize, usize),
    /// Any number of arguments
    Any,
}

impl Arity {
    pub fn accepts(&self, count: usize) -> bool {
        match *self {
            Arity::Exact(n) => count == n,
            Arity::AtLeast(n) => count >= n,
            Arity::Range(min, max) => (min..=max).contains(&count),
            Arity::Any => true,
        }
    }

    pub fn validate(&self, count: usize) -> Result<(), Error> {
        if self.accepts(count) {
            Ok(())
        } else {
            Err(Error::arity_error(*self, count))
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exact(n) => write!(f, "{n}"),
            Arity::AtLeast(n) => write!(f, "at least {n}"),
            Arity::Range(min, max) => write!(f, "{min} to {max}"),
            Arity::Any => write!(f, "any number of"),
        }
    }
}

/// Interpreter settings
#[derive(Debug, Clone)]
pub struct InterpreterConfig {
    /// Nesting limit for `evaluate`; deeper recursion fails with an error
    pub max_eval_depth: usize,
    /// Collect after a top-level form in [`Interpreter::eval_str`] once this many values are live
    pub gc_threshold: Option<usize>,
    /// Preallocated slots in the global frame
    pub global_env_capacity: usize,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        InterpreterConfig {
            max_eval_depth: MAX_EVAL_DEPTH,
            gc_threshold: None,
            global_env_capacity: 128,
        }
    }
}

/// Interpreter context: symbol table, heap, global environment and settings.
///
/// Independent interpreters can coexist; nothing is process-global except the
/// immutable builtin registry.
pub struct Interpreter {
    pub(crate) heap: Heap,
    pub(crate) symbols: SymbolTable,
    global: EnvRef,
    config: InterpreterConfig,
    depth: usize,
    gensym_counter: u64,
}

impl Interpreter {
    pub fn new() -> Result<Self, Error> {
        Self::with_config(InterpreterConfig::default())
    }

    /// Create a context whose global environment binds every builtin function.
    pub fn with_config(config: InterpreterConfig) -> Result<Self, Error> {
        let mut heap = Heap::new();
        let mut symbols = SymbolTable::new();
        let global = heap
            .envs
            .create_with_capacity(None, config.global_env_capacity)?;

        let mut bound = 0;
        for builtin_op in get_builtin_ops() {
            if let OpKind::Function(_) = builtin_op.op_kind {
                let name = symbols.intern(builtin_op.id)?;
                let value = heap.alloc(Value::Builtin(builtin_op));
                heap.envs.define(global, name, value)?;
                bound += 1;
            }
        }
        debug!(builtins = bound, "interpreter context created");

        Ok(Interpreter {
            heap,
            symbols,
            global,
            config,
            depth: 0,
            gensym_counter: 0,
        })
    }

    pub fn global_env(&self) -> EnvRef {
        self.global
    }

    pub fn config(&self) -> &InterpreterConfig {
        &self.config
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn value(&self, value: ValueRef) -> &Value {
        self.heap.get(value)
    }

    pub fn display(&self, value: ValueRef) -> ValueDisplay<'_> {
        ValueDisplay::new(&self.heap, &self.symbols, value)
    }

    pub fn intern(&mut self, name: &str) -> Result<Symbol, Error> {
        self.symbols.intern(name)
    }

    /// Look a name up from `env` outward
    pub fn lookup(&self, env: EnvRef, name: &str) -> Option<ValueRef> {
        let symbol = self.symbols.lookup(name)?;
        self.heap.envs.get(env, symbol)
    }

    pub fn define(&mut self, env: EnvRef, name: &str, value: ValueRef) -> Result<(), Error> {
        let symbol = self.symbols.intern(name)?;
        self.heap.envs.define(env, symbol, value)
    }

    /// Global bindings sorted by name
    pub fn global_bindings(&self) -> Vec<(String, ValueRef)> {
        let mut bindings: Vec<(String, ValueRef)> = self
            .heap
            .envs
            .local_bindings(self.global)
            .map(|(name, value)| (self.symbols.name(name).to_owned(), value))
            .collect();
        bindings.sort_by(|a, b| a.0.cmp(&b.0));
        bindings
    }

    /// Run a collection rooted at the global environment plus `extra_roots`.
    ///
    /// Every other handle held by the caller is invalid afterwards.
    pub fn collect_garbage(&mut self, extra_roots: &[ValueRef]) -> GcStats {
        self.heap.collect(&[self.global], extra_roots)
    }

    /// Collect when the configured threshold is exceeded.
    pub fn maybe_collect(&mut self, extra_roots: &[ValueRef]) -> Option<GcStats> {
        match self.config.gc_threshold {
            Some(threshold) if self.heap.live_values() > threshold => {
                Some(self.collect_garbage(extra_roots))
            }
            _ => None,
        }
    }

    /// Parse `source` and evaluate each form in the global environment, returning the last result.
    #[cfg(feature = "reader")]
    pub fn eval_str(&mut self, source: &str) -> Result<ValueRef, Error> {
        let program = crate::reader::parse_program(source)?;
        let mut last = self.heap.nil();
        for node in &program {
            last = self.evaluate(node, self.global)?;
            self.maybe_collect(&[last]);
        }
        Ok(last)
    }

    /// Evaluate one node in `env`.
    pub fn evaluate(&mut self, node: &Node, env: EnvRef) -> Result<ValueRef, Error> {
        if self.depth >= self.config.max_eval_depth {
            return Err(Error::EvalError(format!(
                "Evaluation depth limit exceeded (max: {})",
                self.config.max_eval_depth
            )));
        }
        self.depth += 1;
        let result = self.eval_node(node, env);
        self.depth -= 1;
        result
    }

    /// Evaluate nodes in order in the same environment; the last value is the result.
    pub fn evaluate_sequence(&mut self, nodes: &[Node], env: EnvRef) -> Result<ValueRef, Error> {
        let mut last = self.heap.nil();
        for node in nodes {
            last = self.evaluate(node, env)?;
        }
        Ok(last)
    }

    fn eval_node(&mut self, node: &Node, env: EnvRef) -> Result<ValueRef, Error> {
        match node {
            Node::Atom(Atom::Symbol(name)) => self
                .lookup(env, name)
                .ok_or_else(|| Error::UnboundSymbol(name.clone())),
            Node::Atom(atom) => self.atom_value(atom),
            Node::List { elements, tail } => self.eval_list(elements, tail.as_deref(), env),
        }
    }

    fn eval_list(
        &mut self,
        elements: &[Node],
        tail: Option<&Node>,
        env: EnvRef,
    ) -> Result<ValueRef, Error> {
        let (head, operands) = match (elements.split_first(), tail) {
            (None, None) => return Ok(self.heap.nil()),
            (Some(split), None) => split,
            (_, Some(_)) => {
                return Err(Error::StructuralError(format!(
                    "Dotted list cannot be used as a function call: {}",
                    Node::List {
                        elements: elements.to_vec(),
                        tail: tail.map(|t| Box::new(t.clone())),
                    }
                )));
            }
        };

        let callee = match head {
            Node::Atom(Atom::Symbol(name)) => {
                if let Some(form) = find_special_form(name) {
                    return self.apply_special_form(form, operands, env);
                }
                match self.lookup(env, name) {
                    Some(value) if self.is_callable(value) => value,
                    bound => match find_builtin(name) {
                        Some(op) => {
                            let args = self.evaluate_args(operands, env)?;
                            return self.call_builtin(op, &args, env);
                        }
                        None => match bound {
                            Some(value) => value,
                            None => return Err(Error::UnboundSymbol(name.clone())),
                        },
                    },
                }
            }
            _ => self.evaluate(head, env)?,
        };

        if let Value::Closure(closure) = self.heap.get(callee)
            && closure.is_macro
        {
            let closure = closure.clone();
            let expansion = self.expand_macro(&closure, operands)?;
            return self.evaluate(&expansion, env);
        }

        let args = self.evaluate_args(operands, env)?;
        self.apply(callee, &args, env)
    }

    fn evaluate_args(&mut self, operands: &[Node], env: EnvRef) -> Result<Vec<ValueRef>, Error> {
        operands
            .iter()
            .map(|operand| self.evaluate(operand, env))
            .collect()
    }

    fn is_callable(&self, value: ValueRef) -> bool {
        matches!(
            self.heap.get(value),
            Value::Closure(_) | Value::Builtin(_)
        )
    }

    fn apply_special_form(
        &mut self,
        form: &'static BuiltinOp,
        operands: &[Node],
        env: EnvRef,
    ) -> Result<ValueRef, Error> {
        if !form.arity.accepts(operands.len()) {
            return Err(Error::arity_error_with_expr(
                form.arity,
                operands.len(),
                form.id.to_owned(),
            ));
        }
        match form.op_kind {
            OpKind::SpecialForm(handler) => handler(self, operands, env),
            OpKind::Function(_) => Err(Error::CallableError(format!(
                "{} is not a special form",
                form.id
            ))),
        }
    }

    /// Apply a procedure value to already evaluated arguments.
    pub fn apply(
        &mut self,
        callee: ValueRef,
        args: &[ValueRef],
        env: EnvRef,
    ) -> Result<ValueRef, Error> {
        match self.heap.get(callee) {
            Value::Builtin(op) => {
                let op = *op;
                self.call_builtin(op, args, env)
            }
            Value::Closure(closure) if !closure.is_macro => {
                let closure = closure.clone();
                self.apply_closure(&closure, args)
            }
            Value::Closure(_) => Err(Error::CallableError(
                "Cannot apply a macro as a function".to_owned(),
            )),
            _ => Err(Error::CallableError(format!(
                "Expected a function, got: {}",
                self.display(callee)
            ))),
        }
    }

    fn call_builtin(
        &mut self,
        op: &'static BuiltinOp,
        args: &[ValueRef],
        env: EnvRef,
    ) -> Result<ValueRef, Error> {
        if !op.arity.accepts(args.len()) {
            return Err(Error::arity_error_with_expr(
                op.arity,
                args.len(),
                op.id.to_owned(),
            ));
        }
        match op.op_kind {
            OpKind::Function(func) => func(self, args, env),
            OpKind::SpecialForm(_) => Err(Error::CallableError(format!(
                "Special form {} cannot be applied",
                op.id
            ))),
        }
    }

    /// Bind parameters in a fresh frame under the captured environment and run the body.
    fn apply_closure(&mut self, closure: &Closure, args: &[ValueRef]) -> Result<ValueRef, Error> {
        if closure.params.len() != args.len() {
            return Err(Error::arity_error(
                Arity::Exact(closure.params.len()),
                args.len(),
            ));
        }
        let frame = self.heap.envs.create(Some(closure.env));
        for (param, arg) in closure.params.iter().zip(args) {
            self.heap.envs.define(frame, *param, *arg)?;
        }
        trace!(
            params = closure.params.len(),
            is_macro = closure.is_macro,
            "applying closure"
        );
        self.evaluate_sequence(&closure.body, frame)
    }

    /// Run a macro body against the unevaluated operand forms and return the expansion.
    fn expand_macro(&mut self, closure: &Closure, operands: &[Node]) -> Result<Node, Error> {
        let args = operands
            .iter()
            .map(|operand| self.quote_node(operand))
            .collect::<Result<Vec<_>, _>>()?;
        let expansion = self.apply_closure(closure, &args)?;
        self.value_to_node(expansion)
    }

    pub(crate) fn atom_value(&mut self, atom: &Atom) -> Result<ValueRef, Error> {
        Ok(match atom {
            Atom::Symbol(name) => {
                let symbol = self.symbols.intern(name)?;
                self.heap.symbol(symbol)
            }
            Atom::Number(n) => self.heap.number(*n),
            Atom::String(s) => self.heap.string(s.as_str()),
            Atom::Bool(b) => self.heap.boolean(*b),
        })
    }

    /// Convert a node into data without evaluating anything.
    pub fn quote_node(&mut self, node: &Node) -> Result<ValueRef, Error> {
        match node {
            Node::Atom(atom) => self.atom_value(atom),
            Node::List { elements, tail } => {
                let tail = match tail {
                    Some(tail) => self.quote_node(tail)?,
                    None => self.heap.nil(),
                };
                let items = elements
                    .iter()
                    .map(|element| self.quote_node(element))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(self.heap.list_with_tail(&items, tail))
            }
        }
    }

    /// Convert data back into a form. Builtins become their names; closures cannot be converted.
    ///
    /// Nesting is bounded by `max_eval_depth`, since the form is evaluated next.
    pub fn value_to_node(&self, value: ValueRef) -> Result<Node, Error> {
        self.value_to_node_at(value, 0)
    }

    fn value_to_node_at(&self, value: ValueRef, depth: usize) -> Result<Node, Error> {
        if depth >= self.config.max_eval_depth {
            return Err(Error::EvalError(format!(
                "Expression too deeply nested to evaluate (max depth: {})",
                self.config.max_eval_depth
            )));
        }
        Ok(match self.heap.get(value) {
            Value::Nil => crate::ast::nil(),
            Value::Bool(b) => Node::Atom(Atom::Bool(*b)),
            Value::Number(n) => Node::Atom(Atom::Number(*n)),
            Value::String(s) => Node::Atom(Atom::String(s.clone())),
            Value::Symbol(symbol) => {
                Node::Atom(Atom::Symbol(self.symbols.name(*symbol).to_owned()))
            }
            Value::Builtin(op) => Node::Atom(Atom::Symbol(op.id.to_owned())),
            Value::Closure(_) => {
                return Err(Error::TypeError(format!(
                    "Cannot convert {} to an expression",
                    self.display(value)
                )));
            }
            Value::Cons { .. } => {
                let mut elements = Vec::new();
                let mut current = value;
                let tail = loop {
                    match self.heap.get(current) {
                        Value::Cons { car, cdr } => {
                            elements.push(self.value_to_node_at(*car, depth + 1)?);
                            current = *cdr;
                        }
                        Value::Nil => break None,
                        _ => break Some(Box::new(self.value_to_node_at(current, depth + 1)?)),
                    }
                };
                Node::List { elements, tail }
            }
        })
    }

    pub(crate) fn expect_bool(&self, value: ValueRef, context: &str) -> Result<bool, Error> {
        match self.heap.get(value) {
            Value::Bool(b) => Ok(*b),
            _ => Err(Error::TypeError(format!(
                "{context} requires a boolean, got: {}",
                self.display(value)
            ))),
        }
    }

    pub(crate) fn next_gensym(&mut self) -> u64 {
        let id = self.gensym_counter;
        self.gensym_counter += 1;
        id
    }
}

//
// Special forms
//

/// Evaluate quote special form
pub(crate) fn eval_quote(
    interp: &mut Interpreter,
    args: &[Node],
    _env: EnvRef,
) -> Result<ValueRef, Error> {
    match args {
        [expr] => interp.quote_node(expr),
        _ => Err(Error::arity_error(Arity::Exact(1), args.len())),
    }
}

/// Evaluate quasiquote special form
pub(crate) fn eval_quasiquote(
    interp: &mut Interpreter,
    args: &[Node],
    env: EnvRef,
) -> Result<ValueRef, Error> {
    match args {
        [template] => quasiquote::expand(interp, template, env, 1),
        _ => Err(Error::arity_error(Arity::Exact(1), args.len())),
    }
}

/// `unquote` is only meaningful inside a quasiquote template
pub(crate) fn eval_unquote(
    _interp: &mut Interpreter,
    _args: &[Node],
    _env: EnvRef,
) -> Result<ValueRef, Error> {
    Err(Error::StructuralError(
        "unquote used outside of quasiquote".to_owned(),
    ))
}

pub(crate) fn eval_unquote_splicing(
    _interp: &mut Interpreter,
    _args: &[Node],
    _env: EnvRef,
) -> Result<ValueRef, Error> {
    Err(Error::StructuralError(
        "unquote-splicing used outside of quasiquote".to_owned(),
    ))
}

/// Evaluate define special form; returns the defined name
pub(crate) fn eval_define(
    interp: &mut Interpreter,
    args: &[Node],
    env: EnvRef,
) -> Result<ValueRef, Error> {
    match args {
        [Node::Atom(Atom::Symbol(name)), expr] => {
            let value = interp.evaluate(expr, env)?;
            let symbol = interp.symbols.intern(name)?;
            interp.heap.envs.define(env, symbol, value)?;
            Ok(interp.heap.symbol(symbol))
        }
        [target, _] => Err(Error::TypeError(format!(
            "define requires a symbol, got: {target}"
        ))),
        _ => Err(Error::arity_error(Arity::Exact(2), args.len())),
    }
}

/// Evaluate set special form; returns the new value
pub(crate) fn eval_set(
    interp: &mut Interpreter,
    args: &[Node],
    env: EnvRef,
) -> Result<ValueRef, Error> {
    match args {
        [Node::Atom(Atom::Symbol(name)), expr] => {
            let value = interp.evaluate(expr, env)?;
            let updated = match interp.symbols.lookup(name) {
                Some(symbol) => interp.heap.envs.set(env, symbol, value),
                None => false,
            };
            if updated {
                Ok(value)
            } else {
                Err(Error::UnboundSymbol(name.clone()))
            }
        }
        [target, _] => Err(Error::TypeError(format!(
            "set requires a symbol, got: {target}"
        ))),
        _ => Err(Error::arity_error(Arity::Exact(2), args.len())),
    }
}

/// Parameter list of `lambda` and `defmacro`: a proper list of distinct symbols
fn parse_params(interp: &mut Interpreter, params: &Node) -> Result<Rc<[Symbol]>, Error> {
    let param_list = match params {
        Node::List {
            elements,
            tail: None,
        } => elements,
        Node::List { tail: Some(_), .. } => {
            return Err(Error::StructuralError(
                "Variadic parameter lists are not supported".to_owned(),
            ));
        }
        other => {
            return Err(Error::TypeError(format!(
                "Parameters must be a list, got: {other}"
            )));
        }
    };

    let mut symbols = Vec::with_capacity(param_list.len());
    for param in param_list {
        let Some(name) = param.as_symbol() else {
            return Err(Error::TypeError(format!(
                "Parameters must be symbols, got: {param}"
            )));
        };
        let symbol = interp.symbols.intern(name)?;
        if symbols.contains(&symbol) {
            return Err(Error::EvalError(format!("Duplicate parameter name: {name}")));
        }
        symbols.push(symbol);
    }
    Ok(Rc::from(symbols))
}

/// Evaluate lambda special form
pub(crate) fn eval_lambda(
    interp: &mut Interpreter,
    args: &[Node],
    env: EnvRef,
) -> Result<ValueRef, Error> {
    let [params, body @ ..] = args else {
        return Err(Error::arity_error(Arity::AtLeast(1), args.len()));
    };
    let params = parse_params(interp, params)?;
    Ok(interp.heap.alloc(Value::Closure(Closure {
        params,
        body: Rc::from(body),
        env,
        is_macro: false,
    })))
}

/// Evaluate defmacro special form: a macro closure bound in the defining environment
pub(crate) fn eval_defmacro(
    interp: &mut Interpreter,
    args: &[Node],
    env: EnvRef,
) -> Result<ValueRef, Error> {
    let [name, params, body @ ..] = args else {
        return Err(Error::arity_error(Arity::AtLeast(2), args.len()));
    };
    let Some(name) = name.as_symbol() else {
        return Err(Error::TypeError(format!(
            "defmacro requires a symbol name, got: {name}"
        )));
    };
    let params = parse_params(interp, params)?;
    let symbol = interp.symbols.intern(name)?;
    let closure = interp.heap.alloc(Value::Closure(Closure {
        params,
        body: Rc::from(body),
        env,
        is_macro: true,
    }));
    interp.heap.envs.define(env, symbol, closure)?;
    Ok(interp.heap.symbol(symbol))
}

/// Evaluate if special form: 2 or 3 operands, boolean condition, missing else yields nil
pub(crate) fn eval_if(
    interp: &mut Interpreter,
    args: &[Node],
    env: EnvRef,
) -> Result<ValueRef, Error> {
    let (condition_expr, then_expr, else_expr) = match args {
        [condition, then_branch] => (condition, then_branch, None),
        [condition, then_branch, else_branch] => (condition, then_branch, Some(else_branch)),
        _ => return Err(Error::arity_error(Arity::Range(2, 3), args.len())),
    };
    let condition = interp.evaluate(condition_expr, env)?;
    if interp.expect_bool(condition, "if condition")? {
        interp.evaluate(then_expr, env)
    } else {
        match else_expr {
            Some(expr) => interp.evaluate(expr, env),
            None => Ok(interp.heap.nil()),
        }
    }
}

/// Evaluate cond special form: `(cond (c1 r1 c2 r2 ...))`
pub(crate) fn eval_cond(
    interp: &mut Interpreter,
    args: &[Node],
    env: EnvRef,
) -> Result<ValueRef, Error> {
    let clauses = match args {
        [Node::List {
            elements,
            tail: None,
        }] => elements,
        [Node::List { tail: Some(_), .. }] => {
            return Err(Error::StructuralError(
                "cond clauses must be a proper list".to_owned(),
            ));
        }
        [other] => {
            return Err(Error::TypeError(format!(
                "cond expects a list of condition/result pairs, got: {other}"
            )));
        }
        _ => return Err(Error::arity_error(Arity::Exact(1), args.len())),
    };
    if clauses.len() % 2 != 0 {
        return Err(Error::StructuralError(format!(
            "cond requires condition/result pairs, got {} forms",
            clauses.len()
        )));
    }

    for pair in clauses.chunks_exact(2) {
        let condition = interp.evaluate(&pair[0], env)?;
        if interp.expect_bool(condition, "cond condition")? {
            return interp.evaluate(&pair[1], env);
        }
    }
    Ok(interp.heap.nil())
}

/// Evaluate begin special form
pub(crate) fn eval_begin(
    interp: &mut Interpreter,
    args: &[Node],
    env: EnvRef,
) -> Result<ValueRef, Error> {
    interp.evaluate_sequence(args, env)
}

/// Literal operands that can never produce a boolean
fn is_obviously_non_boolean(node: &Node) -> bool {
    matches!(
        node,
        Node::Atom(Atom::Number(_)) | Node::Atom(Atom::String(_))
    )
}

macro_rules! boolean_logic_op {
    ($name:ident, $op_name:expr, $short_circuit:literal, $default:literal) => {
        pub(crate) fn $name(
            interp: &mut Interpreter,
            args: &[Node],
            env: EnvRef,
        ) -> Result<ValueRef, Error> {
            // Reject literal non-booleans up front so short-circuiting cannot hide them
            if let Some(arg) = args.iter().find(|arg| is_obviously_non_boolean(arg)) {
                return Err(Error::TypeError(format!(
                    concat!("'", $op_name, "' requires boolean arguments, got: {}"),
                    arg
                )));
            }

            for arg in args {
                let result = interp.evaluate(arg, env)?;
                if interp.expect_bool(result, concat!("'", $op_name, "'"))? == $short_circuit {
                    return Ok(interp.heap.boolean($short_circuit));
                }
            }
            Ok(interp.heap.boolean($default))
        }
    };
}

boolean_logic_op!(eval_and, "and", false, true);
boolean_logic_op!(eval_or, "or", true, false);
