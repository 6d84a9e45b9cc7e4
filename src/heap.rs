//! Value heap.
//!
//! All runtime values live in an index-based arena and are referenced by
//! [`ValueRef`] handles. Environment frames live in a second arena owned by the
//! same [`Heap`] (see [`crate::env`]), so the collector in [`crate::gc`] can
//! trace closures through the frames they captured.
//!
//! Handles carry a generation; once the collector releases a slot, stale
//! handles to it are detected instead of silently aliasing a newer value.
//! `nil`, `#t` and `#f` are preallocated and never collected.

use std::fmt;
use std::rc::Rc;

use crate::Error;
use crate::ast::{Node, write_number, write_string_literal};
use crate::builtinops::BuiltinOp;
use crate::env::EnvStore;
use crate::symbol::{Symbol, SymbolTable};

/// Handle to a heap value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueRef {
    index: u32,
    generation: u32,
}

/// Handle to an environment frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EnvRef {
    index: u32,
    generation: u32,
}

/// Procedure created by `lambda` or `defmacro`
#[derive(Debug, Clone, PartialEq)]
pub struct Closure {
    pub params: Rc<[Symbol]>,
    pub body: Rc<[Node]>,
    pub env: EnvRef,
    pub is_macro: bool,
}

/// Runtime value stored in the heap
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Nil,
    Bool(bool),
    Number(f64),
    String(String),
    Symbol(Symbol),
    Cons { car: ValueRef, cdr: ValueRef },
    Closure(Closure),
    Builtin(&'static BuiltinOp),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Symbol(_) => "symbol",
            Value::Cons { .. } => "pair",
            Value::Closure(closure) if closure.is_macro => "macro",
            Value::Closure(_) => "function",
            Value::Builtin(_) => "builtin",
        }
    }
}

struct ArenaSlot<T> {
    generation: u32,
    marked: bool,
    item: Option<T>,
}

/// Generational slot arena with a mark bit per slot
pub(crate) struct Arena<T> {
    slots: Vec<ArenaSlot<T>>,
    free: Vec<u32>,
    live: usize,
}

impl<T> Arena<T> {
    pub(crate) fn new() -> Self {
        Arena {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
        }
    }

    /// Store an item and return its (index, generation).
    ///
    /// Growing the slot vector aborts the process on exhaustion, which is the
    /// heap's out-of-memory policy. Running out of `u32` indices is handled the
    /// same way, so handles never alias.
    pub(crate) fn insert(&mut self, item: T) -> (u32, u32) {
        if let Some(index) = self.free.pop() {
            self.live += 1;
            let slot = &mut self.slots[index as usize];
            slot.item = Some(item);
            slot.marked = false;
            return (index, slot.generation);
        }
        let Some(index) = next_index(self.slots.len()) else {
            std::alloc::handle_alloc_error(std::alloc::Layout::new::<ArenaSlot<T>>());
        };
        self.live += 1;
        self.slots.push(ArenaSlot {
            generation: 0,
            marked: false,
            item: Some(item),
        });
        (index, 0)
    }

    pub(crate) fn get(&self, index: u32, generation: u32) -> Option<&T> {
        self.slots
            .get(index as usize)
            .filter(|slot| slot.generation == generation)
            .and_then(|slot| slot.item.as_ref())
    }

    pub(crate) fn get_mut(&mut self, index: u32, generation: u32) -> Option<&mut T> {
        self.slots
            .get_mut(index as usize)
            .filter(|slot| slot.generation == generation)
            .and_then(|slot| slot.item.as_mut())
    }

    /// Set the mark bit; true when the slot is live and was not marked yet.
    pub(crate) fn mark(&mut self, index: u32, generation: u32) -> bool {
        match self.slots.get_mut(index as usize) {
            Some(slot) if slot.generation == generation && slot.item.is_some() && !slot.marked => {
                slot.marked = true;
                true
            }
            _ => false,
        }
    }

    /// Release every unmarked item and clear the marks of survivors.
    pub(crate) fn sweep(&mut self) -> usize {
        let mut released = 0;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.item.is_none() {
                continue;
            }
            if slot.marked {
                slot.marked = false;
            } else {
                slot.item = None;
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(index as u32);
                released += 1;
            }
        }
        self.live -= released;
        released
    }

    pub(crate) fn len(&self) -> usize {
        self.live
    }
}

/// Index of the next fresh slot, or `None` once the handle space is used up
fn next_index(len: usize) -> Option<u32> {
    u32::try_from(len).ok()
}

impl ValueRef {
    pub(crate) fn parts(self) -> (u32, u32) {
        (self.index, self.generation)
    }
}

impl EnvRef {
    pub(crate) fn from_parts((index, generation): (u32, u32)) -> Self {
        EnvRef { index, generation }
    }

    pub(crate) fn parts(self) -> (u32, u32) {
        (self.index, self.generation)
    }
}

pub struct Heap {
    values: Arena<Value>,
    pub(crate) envs: EnvStore,
    nil: ValueRef,
    true_value: ValueRef,
    false_value: ValueRef,
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl Heap {
    pub fn new() -> Self {
        let mut values = Arena::new();
        let mut permanent = |value| {
            let (index, generation) = values.insert(value);
            ValueRef { index, generation }
        };
        let nil = permanent(Value::Nil);
        let true_value = permanent(Value::Bool(true));
        let false_value = permanent(Value::Bool(false));
        Heap {
            values,
            envs: EnvStore::new(),
            nil,
            true_value,
            false_value,
        }
    }

    /// Allocate a value. `Nil` and booleans resolve to their shared singletons.
    pub fn alloc(&mut self, value: Value) -> ValueRef {
        match value {
            Value::Nil => self.nil,
            Value::Bool(b) => self.boolean(b),
            other => {
                let (index, generation) = self.values.insert(other);
                ValueRef { index, generation }
            }
        }
    }

    pub fn nil(&self) -> ValueRef {
        self.nil
    }

    pub fn boolean(&self, b: bool) -> ValueRef {
        if b { self.true_value } else { self.false_value }
    }

    pub fn number(&mut self, n: f64) -> ValueRef {
        self.alloc(Value::Number(n))
    }

    pub fn string(&mut self, s: impl Into<String>) -> ValueRef {
        self.alloc(Value::String(s.into()))
    }

    pub fn symbol(&mut self, symbol: Symbol) -> ValueRef {
        self.alloc(Value::Symbol(symbol))
    }

    pub fn cons(&mut self, car: ValueRef, cdr: ValueRef) -> ValueRef {
        self.alloc(Value::Cons { car, cdr })
    }

    /// Values that are never collected
    pub(crate) fn permanent_roots(&self) -> [ValueRef; 3] {
        [self.nil, self.true_value, self.false_value]
    }

    /// Access a value.
    ///
    /// # Panics
    ///
    /// Panics if the handle was released by a collection. Handles held outside
    /// the heap must be passed as extra roots to stay valid.
    pub fn get(&self, value: ValueRef) -> &Value {
        match self.values.get(value.index, value.generation) {
            Some(v) => v,
            None => panic!("dangling value handle {value:?}"),
        }
    }

    /// Whether the handle still refers to a live value
    pub fn contains(&self, value: ValueRef) -> bool {
        self.values.get(value.index, value.generation).is_some()
    }

    pub(crate) fn values_mut(&mut self) -> &mut Arena<Value> {
        &mut self.values
    }

    pub(crate) fn values(&self) -> &Arena<Value> {
        &self.values
    }

    pub fn live_values(&self) -> usize {
        self.values.len()
    }

    pub fn live_frames(&self) -> usize {
        self.envs.len()
    }

    pub fn envs(&self) -> &EnvStore {
        &self.envs
    }

    pub fn envs_mut(&mut self) -> &mut EnvStore {
        &mut self.envs
    }

    /// Build a list from `items` ending in `tail`, consing right to left.
    pub fn list_with_tail(&mut self, items: &[ValueRef], tail: ValueRef) -> ValueRef {
        items
            .iter()
            .rev()
            .fold(tail, |rest, item| self.cons(*item, rest))
    }

    pub fn list(&mut self, items: &[ValueRef]) -> ValueRef {
        let nil = self.nil;
        self.list_with_tail(items, nil)
    }

    /// Elements of a proper list; anything else is a structural error.
    pub fn list_to_vec(&self, list: ValueRef) -> Result<Vec<ValueRef>, Error> {
        let mut items = Vec::new();
        let mut current = list;
        loop {
            match self.get(current) {
                Value::Nil => return Ok(items),
                Value::Cons { car, cdr } => {
                    items.push(*car);
                    current = *cdr;
                }
                other => {
                    return Err(Error::StructuralError(format!(
                        "expected proper list, found a {} in tail position",
                        other.type_name()
                    )));
                }
            }
        }
    }

    pub fn is_proper_list(&self, list: ValueRef) -> bool {
        let mut current = list;
        loop {
            match self.get(current) {
                Value::Nil => return true,
                Value::Cons { cdr, .. } => current = *cdr,
                _ => return false,
            }
        }
    }

    /// `eq` semantics: identical handles, or equal immediate atoms
    pub fn values_eq(&self, a: ValueRef, b: ValueRef) -> bool {
        if a == b {
            return true;
        }
        match (self.get(a), self.get(b)) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(x), Value::Bool(y)) => x == y,
            (Value::Number(x), Value::Number(y)) => x == y,
            (Value::Symbol(x), Value::Symbol(y)) => x == y,
            (Value::Builtin(x), Value::Builtin(y)) => x == y,
            _ => false,
        }
    }

    /// `equal` semantics: structural comparison of lists and strings
    pub fn values_equal(&self, a: ValueRef, b: ValueRef) -> bool {
        let mut pending = vec![(a, b)];
        while let Some((a, b)) = pending.pop() {
            if self.values_eq(a, b) {
                continue;
            }
            match (self.get(a), self.get(b)) {
                (Value::String(x), Value::String(y)) if x == y => {}
                (
                    Value::Cons {
                        car: car_a,
                        cdr: cdr_a,
                    },
                    Value::Cons {
                        car: car_b,
                        cdr: cdr_b,
                    },
                ) => {
                    pending.push((*cdr_a, *cdr_b));
                    pending.push((*car_a, *car_b));
                }
                _ => return false,
            }
        }
        true
    }
}

/// Printer for heap values
pub struct ValueDisplay<'a> {
    heap: &'a Heap,
    symbols: &'a SymbolTable,
    value: ValueRef,
}

impl<'a> ValueDisplay<'a> {
    pub fn new(heap: &'a Heap, symbols: &'a SymbolTable, value: ValueRef) -> Self {
        ValueDisplay {
            heap,
            symbols,
            value,
        }
    }

    /// Writes with an explicit work stack; list nesting never grows the native stack.
    fn write_value(&self, f: &mut fmt::Formatter<'_>, value: ValueRef) -> fmt::Result {
        let mut pending = vec![PrintTask::Value(value)];
        while let Some(task) = pending.pop() {
            match task {
                PrintTask::Value(value) => match self.heap.get(value) {
                    Value::Nil => write!(f, "()")?,
                    Value::Bool(b) => write!(f, "{}", if *b { "#t" } else { "#f" })?,
                    Value::Number(n) => write_number(f, *n)?,
                    Value::String(s) => write_string_literal(f, s)?,
                    Value::Symbol(symbol) => write!(f, "{}", self.symbols.name(*symbol))?,
                    Value::Closure(closure) if closure.is_macro => write!(f, "#<macro>")?,
                    Value::Closure(_) => write!(f, "#<function>")?,
                    Value::Builtin(op) => write!(f, "#<builtin:{}>", op.id)?,
                    Value::Cons { car, cdr } => {
                        write!(f, "(")?;
                        pending.push(PrintTask::Rest(*cdr));
                        pending.push(PrintTask::Value(*car));
                    }
                },
                PrintTask::Rest(rest) => match self.heap.get(rest) {
                    Value::Nil => write!(f, ")")?,
                    Value::Cons { car, cdr } => {
                        write!(f, " ")?;
                        pending.push(PrintTask::Rest(*cdr));
                        pending.push(PrintTask::Value(*car));
                    }
                    _ => {
                        write!(f, " . ")?;
                        pending.push(PrintTask::Close);
                        pending.push(PrintTask::Value(rest));
                    }
                },
                PrintTask::Close => write!(f, ")")?,
            }
        }
        Ok(())
    }
}

/// Pending printer step
enum PrintTask {
    /// A complete value
    Value(ValueRef),
    /// The remainder of a list after its first element
    Rest(ValueRef),
    /// Closing paren after a dotted tail
    Close,
}

impl fmt::Display for ValueDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_value(f, self.value)
    }
}
