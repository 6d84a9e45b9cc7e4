//! Identifier interning.
//!
//! Every identifier is stored once; a [`Symbol`] is a small handle into the
//! table, so two symbols with the same text are the same handle and compare
//! by identity.

use std::rc::Rc;

use crate::Error;
use crate::hashtable::{HashKey, HashTable, splitmix64};

/// Interned identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Symbol(u32);

impl Symbol {
    pub fn id(self) -> u32 {
        self.0
    }
}

impl HashKey for Symbol {
    fn hash_key(&self) -> u64 {
        splitmix64(u64::from(self.0))
    }
}

#[derive(Debug, Default)]
pub struct SymbolTable {
    index: HashTable<Rc<str>, Symbol>,
    names: Vec<Rc<str>>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the symbol for `name`, creating it on first use.
    pub fn intern(&mut self, name: &str) -> Result<Symbol, Error> {
        if let Some(symbol) = self.index.get(name) {
            return Ok(*symbol);
        }
        let id = u32::try_from(self.names.len())
            .map_err(|_| Error::AllocationFailure("symbol table is full".to_owned()))?;
        let symbol = Symbol(id);
        let shared: Rc<str> = Rc::from(name);
        self.index.set(Rc::clone(&shared), symbol)?;
        self.names.push(shared);
        Ok(symbol)
    }

    /// Look a name up without interning it.
    pub fn lookup(&self, name: &str) -> Option<Symbol> {
        self.index.get(name).copied()
    }

    /// Text of an interned symbol. Symbols from another table resolve to `""`.
    pub fn name(&self, symbol: Symbol) -> &str {
        self.names.get(symbol.0 as usize).map_or("", |name| &**name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;

    #[test]
    fn test_interning_is_identity() {
        let mut table = SymbolTable::new();
        let a = table.intern("lambda").unwrap();
        let b = table.intern("define").unwrap();
        let c = table.intern("lambda").unwrap();

        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(table.len(), 2);
        assert_eq!(table.name(a), "lambda");
        assert_eq!(table.name(b), "define");
        assert_eq!(table.lookup("define"), Some(b));
        assert_eq!(table.lookup("set"), None);
        assert_eq!(table.len(), 2, "lookup must not intern");
    }

    #[test]
    fn test_many_symbols_survive_growth() {
        let mut table = SymbolTable::new();
        let symbols: Vec<Symbol> = (0..500)
            .map(|i| table.intern(&format!("sym-{i}")).unwrap())
            .collect();
        for (i, symbol) in symbols.iter().enumerate() {
            assert_eq!(table.name(*symbol), format!("sym-{i}"));
            assert_eq!(table.intern(&format!("sym-{i}")).unwrap(), *symbol);
        }
    }
}
