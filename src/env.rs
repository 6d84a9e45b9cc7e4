//! Lexical environments.
//!
//! Frames live in an arena inside the [`Heap`](crate::heap::Heap) and are
//! addressed by [`EnvRef`]. Each frame owns a [`HashTable`] of bindings and an
//! optional parent; lookup walks the chain outward and stops at the first
//! frame that has the name.

use crate::Error;
use crate::hashtable::HashTable;
use crate::heap::{Arena, EnvRef, ValueRef};
use crate::symbol::Symbol;

pub struct Frame {
    pub(crate) bindings: HashTable<Symbol, ValueRef>,
    pub(crate) parent: Option<EnvRef>,
}

pub struct EnvStore {
    frames: Arena<Frame>,
}

impl EnvStore {
    pub(crate) fn new() -> Self {
        EnvStore {
            frames: Arena::new(),
        }
    }

    /// Create a frame. Its binding table is allocated on first `define`.
    pub fn create(&mut self, parent: Option<EnvRef>) -> EnvRef {
        EnvRef::from_parts(self.frames.insert(Frame {
            bindings: HashTable::new(),
            parent,
        }))
    }

    /// Create a frame whose binding table is preallocated for `capacity` names.
    pub fn create_with_capacity(
        &mut self,
        parent: Option<EnvRef>,
        capacity: usize,
    ) -> Result<EnvRef, Error> {
        let bindings = HashTable::with_capacity(capacity)?;
        Ok(EnvRef::from_parts(
            self.frames.insert(Frame { bindings, parent }),
        ))
    }

    /// Bind `name` in this frame, shadowing any outer binding.
    pub fn define(&mut self, env: EnvRef, name: Symbol, value: ValueRef) -> Result<(), Error> {
        self.frame_mut(env).bindings.set(name, value)?;
        Ok(())
    }

    /// Update the nearest frame that already binds `name`.
    /// Returns false, leaving every frame untouched, when the name is unbound.
    #[must_use]
    pub fn set(&mut self, env: EnvRef, name: Symbol, value: ValueRef) -> bool {
        let mut current = Some(env);
        while let Some(env) = current {
            let frame = self.frame_mut(env);
            if let Some(slot) = frame.bindings.get_mut(&name) {
                *slot = value;
                return true;
            }
            current = frame.parent;
        }
        false
    }

    /// Look `name` up through the frame chain.
    pub fn get(&self, env: EnvRef, name: Symbol) -> Option<ValueRef> {
        let mut current = Some(env);
        while let Some(env) = current {
            let frame = self.frame(env);
            if let Some(value) = frame.bindings.get(&name) {
                return Some(*value);
            }
            current = frame.parent;
        }
        None
    }

    pub fn parent(&self, env: EnvRef) -> Option<EnvRef> {
        self.frame(env).parent
    }

    /// Bindings defined directly in this frame
    pub fn local_bindings(&self, env: EnvRef) -> impl Iterator<Item = (Symbol, ValueRef)> + '_ {
        self.frame(env)
            .bindings
            .iter()
            .map(|(name, value)| (*name, *value))
    }

    pub fn contains(&self, env: EnvRef) -> bool {
        let (index, generation) = env.parts();
        self.frames.get(index, generation).is_some()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.len() == 0
    }

    pub(crate) fn frames_mut(&mut self) -> &mut Arena<Frame> {
        &mut self.frames
    }

    pub(crate) fn frames(&self) -> &Arena<Frame> {
        &self.frames
    }

    /// # Panics
    ///
    /// Panics if the frame was released by a collection.
    pub fn frame(&self, env: EnvRef) -> &Frame {
        let (index, generation) = env.parts();
        match self.frames.get(index, generation) {
            Some(frame) => frame,
            None => panic!("dangling environment handle {env:?}"),
        }
    }

    pub(crate) fn frame_mut(&mut self, env: EnvRef) -> &mut Frame {
        let (index, generation) = env.parts();
        match self.frames.get_mut(index, generation) {
            Some(frame) => frame,
            None => panic!("dangling environment handle {env:?}"),
        }
    }
}

impl Frame {
    pub fn parent(&self) -> Option<EnvRef> {
        self.parent
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use crate::heap::Heap;
    use crate::symbol::SymbolTable;

    #[test]
    fn test_define_shadows_parent() {
        let mut heap = Heap::new();
        let mut symbols = SymbolTable::new();
        let x = symbols.intern("x").unwrap();
        let one = heap.number(1.0);
        let two = heap.number(2.0);

        let parent = heap.envs.create(None);
        let child = heap.envs.create(Some(parent));
        heap.envs.define(parent, x, one).unwrap();
        assert_eq!(heap.envs.get(child, x), Some(one));

        heap.envs.define(child, x, two).unwrap();
        assert_eq!(heap.envs.get(child, x), Some(two));
        assert_eq!(heap.envs.get(parent, x), Some(one), "parent binding unchanged");
    }

    #[test]
    fn test_set_mutates_nearest_binding() {
        let mut heap = Heap::new();
        let mut symbols = SymbolTable::new();
        let x = symbols.intern("x").unwrap();
        let y = symbols.intern("y").unwrap();
        let one = heap.number(1.0);
        let five = heap.number(5.0);

        let parent = heap.envs.create(None);
        let child = heap.envs.create(Some(parent));
        let grandchild = heap.envs.create(Some(child));
        heap.envs.define(parent, x, one).unwrap();

        assert!(heap.envs.set(grandchild, x, five));
        assert_eq!(heap.envs.get(parent, x), Some(five));
        assert_eq!(heap.envs.get(child, x), Some(five));
        assert_eq!(heap.envs.local_bindings(child).count(), 0);

        assert!(!heap.envs.set(grandchild, y, five), "set on unbound name fails");
        assert_eq!(heap.envs.get(grandchild, y), None);
        assert_eq!(heap.envs.parent(grandchild), Some(child));
    }

    #[test]
    fn test_preallocated_frame() {
        let mut heap = Heap::new();
        let mut symbols = SymbolTable::new();
        let env = heap.envs.create_with_capacity(None, 100).unwrap();
        assert!(heap.envs.frame(env).bindings.capacity() >= 100);
        for i in 0..100 {
            let name = symbols.intern(&format!("v{i}")).unwrap();
            let value = heap.number(f64::from(i));
            heap.envs.define(env, name, value).unwrap();
        }
        assert_eq!(heap.envs.frame(env).len(), 100);
    }
}
