//! Deferred patch resolution, relocation and multi-module linking
//!
//! Operands that name a label not yet defined are emitted with a zero extra
//! word and recorded as a [`DelayedExpression`]. Once the whole source has been
//! read the patches are re-evaluated against the finished symbol table. When
//! several modules are linked, patches still open after their own module are
//! retried against the symbols other modules export.

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::addressing::{encode_resolved, to_word, ArgPos};
use crate::assembler::{Assembler, AssemblerSettings, ReturnInfo, MEM_SIZE};
use crate::error::{AsmError, ErrorInfo, ErrorKind};
use crate::eval::{ExpressionEvaluator, Resolved};
use crate::parser::ExpressionParser;
use crate::symbol::{SymbolLookup, SymbolTable};

/// Where a patch writes its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchPosition {
    /// An instruction operand; the value field of `base_word` is rewritten too.
    Operand(ArgPos),
    /// A `.dat` word.
    Data,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelayedExpression {
    pub base_word: usize,
    pub extra_word: usize,
    pub position: PatchPosition,
    pub expression: String,
    pub memory: bool,
    pub scope: Vec<u32>,
    pub character: usize,
    pub line: usize,
}

impl DelayedExpression {
    fn error(&self, kind: ErrorKind, message: impl Into<String>, token: impl Into<String>) -> ErrorInfo {
        ErrorInfo::new(kind, message, token, self.character).with_line(self.line)
    }

    fn is_bare_label(&self) -> bool {
        ExpressionParser::parse(&self.expression).is_ok_and(|e| e.is_bare_symbol())
    }

    /// Evaluate the expression and write the result into `mem`. Returns the
    /// name of a symbol that is still missing, leaving `mem` untouched.
    pub fn apply<S: SymbolLookup + ?Sized>(&self, mem: &mut [u16], symbols: &S) -> Result<Option<String>, ErrorInfo> {
        let expr = ExpressionParser::parse(&self.expression)
            .map_err(|e| self.error(e.kind, e.message, self.expression.as_str()))?;
        let resolved = ExpressionEvaluator::new(symbols, &self.scope)
            .evaluate(&expr)
            .map_err(|e| self.error(e.kind, e.message, self.expression.as_str()))?;

        match (&resolved, self.position) {
            (Resolved::Delay(name), _) => return Ok(Some(name.clone())),
            (Resolved::Value(v), PatchPosition::Data) => {
                mem[self.extra_word] = to_word(*v).map_err(|e| self.error(e.kind, e.message, self.expression.as_str()))?;
            }
            (_, PatchPosition::Data) => {
                return Err(self.error(
                    ErrorKind::Directive,
                    "Registers are not valid `.dat` values",
                    self.expression.as_str(),
                ));
            }
            (_, PatchPosition::Operand(pos)) => {
                let (code, extra) = encode_resolved(&resolved, self.memory, pos, false, true)
                    .map_err(|e| self.error(e.kind, e.message, self.expression.as_str()))?;
                let word = &mut mem[self.base_word];
                *word = (*word & pos.clear_mask()) | (code << pos.shift());
                mem[self.extra_word] = extra.unwrap_or(0);
            }
        }
        trace!(extra_word = self.extra_word, value = mem[self.extra_word], "patched");
        Ok(None)
    }

    fn shift(&mut self, words: usize) {
        self.base_word += words;
        self.extra_word += words;
    }
}

/// Apply every patch. With `allow_unresolved` the ones still naming undefined
/// symbols are handed back, otherwise the first one is an error.
pub(crate) fn resolve_patches<S: SymbolLookup + ?Sized>(
    mem: &mut [u16],
    patches: Vec<DelayedExpression>,
    symbols: &S,
    allow_unresolved: bool,
) -> Result<Vec<DelayedExpression>, ErrorInfo> {
    let mut open = Vec::new();
    for patch in patches {
        match patch.apply(mem, symbols)? {
            None => {}
            Some(_) if allow_unresolved => open.push(patch),
            Some(name) => {
                let message = if patch.is_bare_label() {
                    "Label used with no definition"
                } else {
                    "Expression contains undefined label"
                };
                return Err(patch.error(ErrorKind::UnresolvedSymbol, message, name));
            }
        }
    }
    Ok(open)
}

impl ReturnInfo {
    /// Move a module assembled for `location` to its place in the address
    /// space: the image is front-padded with zero words and every PC is shifted.
    pub(crate) fn relocate(&mut self, location: usize) {
        if location == 0 {
            return;
        }
        trace!(location, words = self.mem.len(), patches = self.unresolved.len(), "relocating");
        self.mem.splice(0..0, std::iter::repeat_n(0, location));
        self.pc_to_source_offset.splice(0..0, std::iter::repeat_n(0, location));
        self.pc_to_source_line.splice(0..0, std::iter::repeat_n(0, location));
        for pc in &mut self.source_line_to_pc {
            *pc += location;
        }
        for patch in &mut self.unresolved {
            patch.shift(location);
        }
    }
}

/// Symbols exported by already linked modules, plus the provided ones.
#[derive(Debug, Clone, Default)]
pub struct ExportTable {
    exports: HashMap<String, u16>,
    provided: HashMap<String, u16>,
}

impl ExportTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn provide(&mut self, name: impl Into<String>, value: u16) {
        self.provided.insert(name.into(), value);
    }

    /// Register an export; the name must not be exported yet.
    pub fn insert(&mut self, name: &str, addr: u16) -> Result<(), String> {
        if self.exports.contains_key(name) {
            return Err(format!("Symbol '{}' is exported by more than one module", name));
        }
        self.exports.insert(name.to_string(), addr);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<u16> {
        self.exports.get(name).copied()
    }
}

impl SymbolLookup for ExportTable {
    fn lookup(&self, name: &str, _scope: &[u32]) -> Option<i64> {
        self.exports
            .get(name)
            .or_else(|| self.provided.get(name))
            .map(|&v| v as i64)
    }
}

/// A module's own symbols first, then everything exported.
struct LinkScope<'a> {
    local: &'a SymbolTable,
    global: &'a ExportTable,
}

impl SymbolLookup for LinkScope<'_> {
    fn lookup(&self, name: &str, scope: &[u32]) -> Option<i64> {
        self.local
            .lookup(name, scope)
            .or_else(|| self.global.lookup(name, scope))
    }
}

fn link_error(message: impl Into<String>, token: impl Into<String>) -> AsmError {
    AsmError::Asm(ErrorInfo::new(ErrorKind::Link, message, token, 0))
}

/// Assemble `sources` back to back into one image. Each module is placed
/// right after the previous one, and may reference any symbol another module
/// `.export`s. Maps and error positions treat the modules as one concatenated
/// text.
pub fn assemble_multiple(sources: &[&str], settings: &AssemblerSettings) -> Result<ReturnInfo, AsmError> {
    let mut combined = ReturnInfo::default();
    let mut table = ExportTable::new();
    for (name, value) in &settings.provided_symbol_definitions {
        table.provide(name.clone(), *value);
    }

    let mut modules: Vec<SymbolTable> = Vec::with_capacity(sources.len());
    let mut pending: Vec<(usize, DelayedExpression)> = Vec::new();
    let mut char_base = 0;
    let mut line_base = 0;

    let base = settings.location as usize;
    for (index, src) in sources.iter().enumerate() {
        let start = base + combined.mem.len();
        let origin = u16::try_from(start).map_err(|_| {
            AsmError::Asm(ErrorInfo::new(
                ErrorKind::Capacity,
                format!("Linked image exceeds {} words", MEM_SIZE),
                "",
                char_base,
            ))
        })?;

        let mut module_settings = settings.clone().with_location(origin).with_unresolved_symbols(true);
        module_settings.label_values_to_extract.clear();

        let mut assembler = Assembler::with_settings(module_settings);
        let info = assembler.assemble(src).map_err(|e| match e {
            AsmError::Asm(mut info) => {
                info.character += char_base;
                info.line += line_base;
                AsmError::Asm(info)
            }
            other => other,
        })?;
        debug!(module = index, location = start, words = info.mem.len() - start, "linked module");

        let module_start = combined.mem.len();
        combined.mem.extend_from_slice(&info.mem[start..]);
        combined
            .pc_to_source_offset
            .extend(info.pc_to_source_offset[start..].iter().map(|o| o + char_base));
        combined
            .pc_to_source_line
            .extend(info.pc_to_source_line[start..].iter().map(|l| l + line_base));
        // A module that does not end in a newline shares its last line with
        // the next module's first one; the earlier entry wins.
        while combined.source_line_to_pc.len() < line_base {
            combined.source_line_to_pc.push(module_start);
        }
        for (line, pc) in info.source_line_to_pc.iter().enumerate() {
            if line_base + line >= combined.source_line_to_pc.len() {
                combined.source_line_to_pc.push(pc - base);
            }
        }

        for (addr, name) in info.exports {
            table
                .insert(&name, addr)
                .map_err(|m| link_error(m, name.as_str()))?;
            combined.exports.push((addr, name));
        }
        pending.extend(info.unresolved.into_iter().map(|mut patch| {
            patch.base_word -= base;
            patch.extra_word -= base;
            patch.character += char_base;
            patch.line += line_base;
            (index, patch)
        }));

        char_base += src.len();
        line_base += src.matches('\n').count();
        modules.push(assembler.into_symbols());
    }

    debug!(patches = pending.len(), exports = combined.exports.len(), "resolving across modules");
    for (index, patch) in &pending {
        let scope = LinkScope { local: &modules[*index], global: &table };
        if let Some(name) = patch.apply(&mut combined.mem, &scope)? {
            return Err(AsmError::Asm(patch.error(
                ErrorKind::Link,
                format!("Symbol '{}' is not defined or exported by any module", name),
                name,
            )));
        }
    }

    for name in &settings.label_values_to_extract {
        if combined.exports.iter().any(|(_, n)| n == name) {
            continue;
        }
        let addr = table
            .get(name)
            .ok_or_else(|| link_error("Symbol is not exported by any module", name.as_str()))?;
        combined.exports.push((addr, name.clone()));
    }

    combined.relocate(base);
    Ok(combined)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_patches_reports_first_missing() {
        let patch = DelayedExpression {
            base_word: 0,
            extra_word: 1,
            position: PatchPosition::Operand(ArgPos::A),
            expression: "missing * 2".to_string(),
            memory: false,
            scope: Vec::new(),
            character: 7,
            line: 0,
        };
        let mut mem = vec![0x7c01, 0];
        let symbols = SymbolTable::new();
        let err = resolve_patches(&mut mem, vec![patch.clone()], &symbols, false).unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnresolvedSymbol);
        assert_eq!(err.token, "missing");
        assert_eq!(err.character, 7);

        let open = resolve_patches(&mut mem, vec![patch], &symbols, true).unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(mem, vec![0x7c01, 0]);
    }

    #[test]
    fn test_patch_rewrites_field() {
        let patch = DelayedExpression {
            base_word: 0,
            extra_word: 1,
            position: PatchPosition::Operand(ArgPos::B),
            expression: "i + later".to_string(),
            memory: true,
            scope: Vec::new(),
            character: 0,
            line: 0,
        };
        let mut symbols = SymbolTable::new();
        symbols.define_label("later", 9, &[]).unwrap();
        // set [next word], 1
        let mut mem = vec![0x8801 | (0x1e << 5), 0];
        assert_eq!(patch.apply(&mut mem, &symbols).unwrap(), None);
        assert_eq!(mem, vec![0x8801 | (0x16 << 5), 9]);
    }

    #[test]
    fn test_relocate_shifts_everything() {
        let mut info = ReturnInfo {
            mem: vec![1, 2],
            pc_to_source_offset: vec![0, 4],
            pc_to_source_line: vec![0, 1],
            source_line_to_pc: vec![0, 1, 2],
            ..ReturnInfo::default()
        };
        info.relocate(3);
        assert_eq!(info.mem, vec![0, 0, 0, 1, 2]);
        assert_eq!(info.pc_to_source_line, vec![0, 0, 0, 0, 1]);
        assert_eq!(info.source_line_to_pc, vec![3, 4, 5]);
    }

    #[test]
    fn test_export_table_rejects_duplicates() {
        let mut table = ExportTable::new();
        table.insert("f", 1).unwrap();
        assert!(table.insert("f", 2).is_err());
        table.provide("SCREEN", 0x8000);
        assert_eq!(table.lookup("f", &[]), Some(1));
        assert_eq!(table.lookup("SCREEN", &[5]), Some(0x8000));
    }

    #[test]
    fn test_two_modules() {
        let main = ".export main\n:main jsr helper\nset pc, main\n";
        let lib = ".export helper\n:helper set a, 1\nset pc, pop\n";
        let info = assemble_multiple(&[main, lib], &AssemblerSettings::new()).unwrap();

        // jsr helper, helper ; set pc, main ; set a, 1 ; set pc, pop
        assert_eq!(info.mem, vec![0x7c20, 3, 0x8781, 0x8801, 0x6381]);
        assert_eq!(info.exports, vec![(0, "main".to_string()), (3, "helper".to_string())]);
        assert_eq!(info.pc_to_source_line, vec![1, 1, 2, 4, 5]);
        assert_eq!(info.pc_to_source_offset[3], main.len() + 23);
        assert_eq!(info.source_line_to_pc, vec![0, 0, 2, 3, 3, 4]);
        assert!(info.unresolved.is_empty());
    }

    #[test]
    fn test_shared_symbol_across_modules() {
        let a = "brk\n.export shared\n:shared .dat 0x1234\n";
        let b = "set a, [shared]\n";
        let info = assemble_multiple(&[a, b], &AssemblerSettings::new()).unwrap();
        // B's code sits after A and its reference points into A
        assert_eq!(info.mem, vec![0, 0x1234, 0x7801, 1]);
        assert_eq!(info.export("shared"), Some(1));
    }

    #[test]
    fn test_shared_symbol_at_module_start() {
        let a = ".export shared\n:shared .dat 0x1234\n";
        let b = "set a, [shared]\n";
        let info = assemble_multiple(&[a, b], &AssemblerSettings::new()).unwrap();
        assert_eq!(info.mem, vec![0x1234, 0x7801, 0]);
        assert_eq!(info.export("shared"), Some(0));
    }

    #[test]
    fn test_module_labels_stay_private() {
        let first = ":loop set pc, loop\n.export entry\n:entry set pc, tail\n:tail brk";
        let second = ":loop set pc, loop\njsr entry";
        let info = assemble_multiple(&[first, second], &AssemblerSettings::new()).unwrap();
        // each module's `loop` points into its own code
        assert_eq!(info.mem[0], 0x8781);
        assert_eq!(&info.mem[1..3], &[0x7f81, 3]);
        assert_eq!(info.mem[4], 0x9781);
        assert_eq!(&info.mem[5..7], &[0x7c20, 1]);
    }

    #[test]
    fn test_link_errors() {
        let dup = assemble_multiple(&[".export f\n:f brk", ".export f\n:f brk"], &AssemblerSettings::new());
        assert_eq!(dup.unwrap_err().kind(), Some(ErrorKind::Link));

        let missing = assemble_multiple(&["brk", "\njsr nowhere"], &AssemblerSettings::new()).unwrap_err();
        let info = missing.info().unwrap();
        assert_eq!(info.kind, ErrorKind::Link);
        assert_eq!(info.token, "nowhere");
        assert_eq!(info.line, 1);
    }

    #[test]
    fn test_module_errors_are_shifted() {
        let err = assemble_multiple(&["brk\n", "brk\nbogus"], &AssemblerSettings::new()).unwrap_err();
        let info = err.info().unwrap();
        assert_eq!(info.kind, ErrorKind::Syntax);
        assert_eq!(info.line, 2);
        assert_eq!(info.character, 8);
    }

    #[test]
    fn test_lines_follow_the_concatenated_text() {
        let first = "; header



brk


";
        let second = "set a, 1
bogus";
        let text = [first, second].concat();
        let err = assemble_multiple(&[first, second], &AssemblerSettings::new()).unwrap_err();
        let info = err.info().unwrap();
        let bogus = text.find("bogus").unwrap();
        assert_eq!((info.character, info.line), (bogus, text[..bogus].matches('\n').count()));

        let info = assemble_multiple(&[first, "set a, 1
"], &AssemblerSettings::new()).unwrap();
        assert_eq!(info.pc_to_source_line, vec![4, 7]);
        assert_eq!(info.source_line_to_pc, vec![0, 0, 0, 0, 0, 1, 1, 1]);
    }

    #[test]
    fn test_link_at_location_with_extraction() {
        let settings = AssemblerSettings::new().with_location(0x40).with_extracted("data");
        let info = assemble_multiple(&["set a, [data]", ".export data\n:data .dat 7"], &settings).unwrap();
        assert_eq!(info.mem.len(), 0x40 + 3);
        assert_eq!(&info.mem[0x40..], &[0x7801, 0x42, 7]);
        assert_eq!(info.export("data"), Some(0x42));
    }
}
