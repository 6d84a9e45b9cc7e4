//! Mark-and-sweep garbage collection.
//!
//! Collection is stop-the-world and only runs when the host asks for it.
//! The root set is the given environment frames plus any extra value handles
//! the caller is still holding. Marking uses explicit work lists, so deeply
//! nested lists cannot overflow the native stack:
//!
//! - a cons marks its car and cdr,
//! - a closure marks its captured frame,
//! - a frame marks every bound value and its parent frame.
//!
//! The sweep then releases every unmarked value and frame and clears the mark
//! bits of the survivors.

use tracing::debug;

use crate::heap::{EnvRef, Heap, Value, ValueRef};

/// Outcome of one collection cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcStats {
    pub marked_values: usize,
    pub marked_frames: usize,
    pub released_values: usize,
    pub released_frames: usize,
}

impl Heap {
    /// Collect everything not reachable from `root_envs` or `extra_roots`.
    pub fn collect(&mut self, root_envs: &[EnvRef], extra_roots: &[ValueRef]) -> GcStats {
        let mut stats = GcStats::default();
        let mut gray_values: Vec<ValueRef> = self.permanent_roots().to_vec();
        gray_values.extend_from_slice(extra_roots);
        let mut gray_frames: Vec<EnvRef> = root_envs.to_vec();

        loop {
            if let Some(value) = gray_values.pop() {
                let (index, generation) = value.parts();
                if !self.values_mut().mark(index, generation) {
                    continue;
                }
                stats.marked_values += 1;
                match self.values().get(index, generation) {
                    Some(Value::Cons { car, cdr }) => {
                        gray_values.push(*cdr);
                        gray_values.push(*car);
                    }
                    Some(Value::Closure(closure)) => gray_frames.push(closure.env),
                    _ => {}
                }
            } else if let Some(env) = gray_frames.pop() {
                let (index, generation) = env.parts();
                if !self.envs.frames_mut().mark(index, generation) {
                    continue;
                }
                stats.marked_frames += 1;
                if let Some(frame) = self.envs.frames().get(index, generation) {
                    gray_values.extend(frame.bindings.values().copied());
                    if let Some(parent) = frame.parent {
                        gray_frames.push(parent);
                    }
                }
            } else {
                break;
            }
        }

        stats.released_values = self.values_mut().sweep();
        stats.released_frames = self.envs.frames_mut().sweep();

        debug!(
            marked_values = stats.marked_values,
            marked_frames = stats.marked_frames,
            released_values = stats.released_values,
            released_frames = stats.released_frames,
            live_values = self.live_values(),
            live_frames = self.live_frames(),
            "garbage collection finished"
        );
        stats
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::ast::sym;
    use crate::heap::Closure;
    use crate::symbol::SymbolTable;
    use std::rc::Rc;

    #[test]
    fn test_reachable_values_survive_unreachable_released() {
        let mut heap = Heap::new();
        let mut symbols = SymbolTable::new();
        let global = heap.envs.create(None);
        let name = symbols.intern("kept").unwrap();

        let a = heap.number(1.0);
        let b = heap.string("two");
        let kept = heap.list(&[a, b]);
        heap.envs.define(global, name, kept).unwrap();

        let garbage_item = heap.number(3.0);
        let garbage = heap.list(&[garbage_item, garbage_item]);

        let stats = heap.collect(&[global], &[]);
        assert_eq!(stats.released_values, 3, "two conses and one number");
        assert!(heap.contains(kept));
        assert!(heap.contains(a));
        assert!(heap.contains(b));
        assert!(!heap.contains(garbage));
        assert!(!heap.contains(garbage_item));
        assert_eq!(heap.get(b), &Value::String("two".to_owned()));

        // survivors had their marks cleared: a second cycle releases nothing
        let again = heap.collect(&[global], &[]);
        assert_eq!(again.released_values, 0);
        assert_eq!(again.marked_values, stats.marked_values);
    }

    #[test]
    fn test_extra_roots_keep_values_alive() {
        let mut heap = Heap::new();
        let global = heap.envs.create(None);
        let pending = heap.string("in flight");
        let inner = heap.number(7.0);
        let holder = heap.list(&[inner]);

        heap.collect(&[global], &[pending, holder]);
        assert!(heap.contains(pending));
        assert!(heap.contains(inner));

        heap.collect(&[global], &[]);
        assert!(!heap.contains(pending));
        assert!(!heap.contains(holder));
    }

    #[test]
    fn test_closures_keep_captured_frames_alive() {
        let mut heap = Heap::new();
        let mut symbols = SymbolTable::new();
        let global = heap.envs.create(None);
        let a = symbols.intern("a").unwrap();
        let adder = symbols.intern("add7").unwrap();

        // frame of a finished call, only reachable through the closure
        let call_frame = heap.envs.create(Some(global));
        let seven = heap.number(7.0);
        heap.envs.define(call_frame, a, seven).unwrap();
        let closure = heap.alloc(Value::Closure(Closure {
            params: Rc::from(vec![symbols.intern("x").unwrap()]),
            body: Rc::from(vec![sym("x")]),
            env: call_frame,
            is_macro: false,
        }));
        heap.envs.define(global, adder, closure).unwrap();
        let orphan_frame = heap.envs.create(Some(global));

        let stats = heap.collect(&[global], &[]);
        assert_eq!(stats.released_frames, 1);
        assert!(heap.envs.contains(call_frame));
        assert!(!heap.envs.contains(orphan_frame));
        assert_eq!(heap.envs.get(call_frame, a), Some(seven));

        // unbinding the closure makes its frame and captured values garbage
        heap.envs.frame_mut(global).bindings.erase(&adder);
        let stats = heap.collect(&[global], &[]);
        assert_eq!(stats.released_frames, 1);
        assert!(!heap.contains(closure));
        assert!(!heap.contains(seven));
    }

    #[test]
    fn test_cycle_through_frame_is_collected() {
        let mut heap = Heap::new();
        let mut symbols = SymbolTable::new();
        let global = heap.envs.create(None);
        let f = symbols.intern("f").unwrap();

        // frame -> closure -> frame
        let frame = heap.envs.create(Some(global));
        let closure = heap.alloc(Value::Closure(Closure {
            params: Rc::from(Vec::new()),
            body: Rc::from(Vec::new()),
            env: frame,
            is_macro: false,
        }));
        heap.envs.define(frame, f, closure).unwrap();

        heap.collect(&[global], &[]);
        assert!(!heap.contains(closure));
        assert!(!heap.envs.contains(frame));
    }

    #[test]
    fn test_long_list_marking_is_iterative() {
        let mut heap = Heap::new();
        let global = heap.envs.create(None);
        let mut list = heap.nil();
        for i in 0..200_000 {
            let n = heap.number(f64::from(i));
            list = heap.cons(n, list);
        }
        let stats = heap.collect(&[global], &[list]);
        assert_eq!(stats.released_values, 0);
        assert!(stats.marked_values >= 400_000);
    }
}
