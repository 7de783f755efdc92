use std::collections::HashMap;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum SymbolScope {
    Global,
    Local,
    Builtin,
}

#[derive(Debug, PartialEq, Clone)]
pub struct Symbol {
    pub name: String,
    pub scope: SymbolScope,
    pub index: usize,
}

/// Names visible in one compilation scope, chained to the enclosing scope.
/// Globals get dense indices into the VM's globals array; locals get slot
/// indices relative to the frame's base pointer.
#[derive(Debug, Default)]
pub struct SymbolTable {
    outer: Option<Box<SymbolTable>>,
    store: HashMap<String, Symbol>,
    num_definitions: usize,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_enclosed(outer: SymbolTable) -> Self {
        Self {
            outer: Some(Box::new(outer)),
            ..Self::default()
        }
    }

    /// Hands back the enclosing table when a scope is left.
    pub fn into_outer(self) -> Option<SymbolTable> {
        self.outer.map(|outer| *outer)
    }

    /// Drops any nested scopes, e.g. ones left behind by an aborted
    /// compilation, and returns the root table.
    pub fn into_root(mut self) -> SymbolTable {
        while let Some(outer) = self.outer.take() {
            self = *outer;
        }
        self
    }

    /// Defines `name` in this scope. Redefining a name reuses its slot, so
    /// indices handed out earlier stay valid.
    pub fn define(&mut self, name: &str) -> Symbol {
        let scope = if self.outer.is_none() {
            SymbolScope::Global
        } else {
            SymbolScope::Local
        };
        let index = match self.store.get(name) {
            Some(existing) if existing.scope == scope => existing.index,
            _ => {
                let index = self.num_definitions;
                self.num_definitions += 1;
                index
            }
        };

        let symbol = Symbol {
            name: name.to_string(),
            scope,
            index,
        };
        self.store.insert(name.to_string(), symbol.clone());
        symbol
    }

    pub fn define_builtin(&mut self, index: usize, name: &str) -> Symbol {
        let symbol = Symbol {
            name: name.to_string(),
            scope: SymbolScope::Builtin,
            index,
        };
        self.store.insert(name.to_string(), symbol.clone());
        symbol
    }

    pub fn resolve(&self, name: &str) -> Option<Symbol> {
        match self.store.get(name) {
            Some(symbol) => Some(symbol.clone()),
            None => self.outer.as_ref().and_then(|outer| outer.resolve(name)),
        }
    }

    pub fn num_definitions(&self) -> usize {
        self.num_definitions
    }
}
