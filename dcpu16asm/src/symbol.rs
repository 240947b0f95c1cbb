//! Symbol table for labels, constants and exports
//!
//! Labels carry the scope path they were defined in. Every `.repeat`
//! iteration pushes a fresh scope id, so a label inside a repeated body gets
//! one definition per iteration. A lookup from scope `S` can see a label
//! defined at scope `D` only when one path is a prefix of the other.

use std::collections::HashMap;

/// Anything expressions can be resolved against.
pub trait SymbolLookup {
    fn lookup(&self, name: &str, scope: &[u32]) -> Option<i64>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    pub name: String,
    pub offset: usize,
    pub scope: Vec<u32>,
}

pub fn scopes_compatible(a: &[u32], b: &[u32]) -> bool {
    a.starts_with(b) || b.starts_with(a)
}

#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    labels: HashMap<String, Vec<Label>>,
    defines: HashMap<String, i64>,
    exports: Vec<String>,
    provided: HashMap<String, u16>,
    base_offset: u16,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.labels.clear();
        self.defines.clear();
        self.exports.clear();
        self.provided.clear();
        self.base_offset = 0;
    }

    /// Offset added to every label when it is looked up.
    pub fn set_base_offset(&mut self, base: u16) {
        self.base_offset = base;
    }

    pub fn base_offset(&self) -> u16 {
        self.base_offset
    }

    /// An absolute symbol supplied from outside the source. Never relocated.
    pub fn provide(&mut self, name: impl Into<String>, value: u16) {
        self.provided.insert(name.into(), value);
    }

    pub fn define_label(&mut self, name: &str, offset: usize, scope: &[u32]) -> Result<(), String> {
        if self.defines.contains_key(name) {
            return Err(format!("Label '{}' clashes with a constant of the same name", name));
        }
        let defined = self.labels.entry(name.to_string()).or_default();
        if defined.iter().any(|l| scopes_compatible(&l.scope, scope)) {
            return Err(format!("Label '{}' is already defined", name));
        }
        defined.push(Label {
            name: name.to_string(),
            offset,
            scope: scope.to_vec(),
        });
        Ok(())
    }

    pub fn define_constant(&mut self, name: &str, value: i64) -> Result<(), String> {
        if self.labels.get(name).is_some_and(|l| !l.is_empty()) {
            return Err(format!("Constant '{}' clashes with a label of the same name", name));
        }
        if self.defines.contains_key(name) {
            return Err(format!("Constant '{}' is already defined", name));
        }
        self.defines.insert(name.to_string(), value);
        Ok(())
    }

    pub fn export(&mut self, name: &str) {
        if !self.exports.iter().any(|e| e == name) {
            self.exports.push(name.to_string());
        }
    }

    pub fn exports(&self) -> &[String] {
        &self.exports
    }

    /// The label `name` as seen from `scope`. The nearest enclosing (or same
    /// scope) definition wins; otherwise the earliest definition nested below.
    pub fn label(&self, name: &str, scope: &[u32]) -> Option<&Label> {
        let defined = self.labels.get(name)?;
        defined
            .iter()
            .filter(|l| scope.starts_with(&l.scope))
            .max_by_key(|l| l.scope.len())
            .or_else(|| defined.iter().find(|l| l.scope.starts_with(scope)))
    }

    pub fn constant(&self, name: &str) -> Option<i64> {
        self.defines.get(name).copied()
    }

    /// All labels in definition order per name, for listings and debugging.
    pub fn labels(&self) -> impl Iterator<Item = &Label> {
        self.labels.values().flatten()
    }
}

impl SymbolLookup for SymbolTable {
    fn lookup(&self, name: &str, scope: &[u32]) -> Option<i64> {
        if let Some(label) = self.label(name, scope) {
            return Some(label.offset as i64 + self.base_offset as i64);
        }
        self.defines
            .get(name)
            .copied()
            .or_else(|| self.provided.get(name).map(|&v| v as i64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_then_constants_then_provided() {
        let mut symbols = SymbolTable::new();
        symbols.define_label("start", 4, &[]).unwrap();
        symbols.define_constant("SIZE", 16).unwrap();
        symbols.provide("SCREEN", 0x8000);
        assert_eq!(symbols.lookup("start", &[]), Some(4));
        assert_eq!(symbols.lookup("SIZE", &[]), Some(16));
        assert_eq!(symbols.lookup("SCREEN", &[]), Some(0x8000));
        assert_eq!(symbols.lookup("nothing", &[]), None);
    }

    #[test]
    fn test_base_offset_only_moves_labels() {
        let mut symbols = SymbolTable::new();
        symbols.set_base_offset(0x100);
        symbols.define_label("start", 4, &[]).unwrap();
        symbols.define_constant("SIZE", 16).unwrap();
        symbols.provide("SCREEN", 0x8000);
        assert_eq!(symbols.lookup("start", &[]), Some(0x104));
        assert_eq!(symbols.lookup("SIZE", &[]), Some(16));
        assert_eq!(symbols.lookup("SCREEN", &[]), Some(0x8000));
    }

    #[test]
    fn test_scope_visibility() {
        let mut symbols = SymbolTable::new();
        symbols.define_label("loop", 10, &[1]).unwrap();
        symbols.define_label("loop", 20, &[2]).unwrap();
        symbols.define_label("inner", 30, &[2, 3]).unwrap();

        assert_eq!(symbols.lookup("loop", &[1]), Some(10));
        assert_eq!(symbols.lookup("loop", &[2]), Some(20));
        assert_eq!(symbols.lookup("loop", &[2, 3]), Some(20));
        assert_eq!(symbols.lookup("inner", &[2]), Some(30));
        assert_eq!(symbols.lookup("inner", &[1]), None);
        // from the root the earliest iteration is visible
        assert_eq!(symbols.lookup("loop", &[]), Some(10));
    }

    #[test]
    fn test_duplicates_rejected() {
        let mut symbols = SymbolTable::new();
        symbols.define_label("here", 0, &[]).unwrap();
        assert!(symbols.define_label("here", 1, &[]).is_err());
        assert!(symbols.define_label("here", 1, &[5]).is_err());
        assert!(symbols.define_constant("here", 1).is_err());

        symbols.define_constant("K", 1).unwrap();
        assert!(symbols.define_constant("K", 2).is_err());
        assert!(symbols.define_label("K", 0, &[]).is_err());
    }

    #[test]
    fn test_exports_deduplicated() {
        let mut symbols = SymbolTable::new();
        symbols.export("a");
        symbols.export("b");
        symbols.export("a");
        assert_eq!(symbols.exports(), &["a".to_string(), "b".to_string()]);
    }
}
