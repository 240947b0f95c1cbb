//! Main assembler implementation

use std::io::Write;

use tracing::{debug, trace};

use crate::addressing::{to_word, ArgPos, EncodedOperand, OperandEncoder, Register};
use crate::error::{AsmError, ErrorInfo, ErrorKind};
use crate::eval::{ExpressionEvaluator, Resolved};
use crate::link::{resolve_patches, DelayedExpression, PatchPosition};
use crate::opcodes::{self, OpClass, Opcode};
use crate::parser::lexer::unescape;
use crate::parser::{ExpressionParser, Lexer, LineIndex, Token};
use crate::symbol::{SymbolLookup, SymbolTable};

/// Number of addressable words.
pub const MEM_SIZE: usize = 0x10000;

const MAX_REPEAT: i64 = MEM_SIZE as i64;
/// Upper bound on `.repeat` body runs per assembly, summed over nesting.
const MAX_REPEAT_RUNS: usize = 0x100000;

#[derive(Debug, Clone, Default)]
pub struct AssemblerSettings {
    /// Always spend an extra word on literals instead of packing 0..=30 and -1
    /// into the A field.
    pub no_packed_constants: bool,
    /// Base address the module is assembled for.
    pub location: u16,
    /// Absolute symbols known up front. These are not relocated.
    pub provided_symbol_definitions: Vec<(String, u16)>,
    /// Symbols whose values are returned alongside `.export`ed ones.
    pub label_values_to_extract: Vec<String>,
    /// Return unresolved patches instead of failing, for later linking.
    pub allow_unresolved_symbols: bool,
}

impl AssemblerSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_location(mut self, location: u16) -> Self {
        self.location = location;
        self
    }

    pub fn with_packed_constants(mut self, enabled: bool) -> Self {
        self.no_packed_constants = !enabled;
        self
    }

    pub fn with_symbol(mut self, name: impl Into<String>, value: u16) -> Self {
        self.provided_symbol_definitions.push((name.into(), value));
        self
    }

    pub fn with_extracted(mut self, name: impl Into<String>) -> Self {
        self.label_values_to_extract.push(name.into());
        self
    }

    pub fn with_unresolved_symbols(mut self, allow: bool) -> Self {
        self.allow_unresolved_symbols = allow;
        self
    }
}

/// Byte order used when serializing words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endian {
    #[default]
    Little,
    Big,
}

/// Assembled image plus its diagnostic maps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReturnInfo {
    pub mem: Vec<u16>,
    /// Source byte offset of the statement that produced each word.
    pub pc_to_source_offset: Vec<usize>,
    /// Zero based source line of the statement that produced each word.
    pub pc_to_source_line: Vec<usize>,
    /// First PC at or after each source line.
    pub source_line_to_pc: Vec<usize>,
    pub exports: Vec<(u16, String)>,
    /// Patches left for a later link step.
    pub unresolved: Vec<DelayedExpression>,
}

impl ReturnInfo {
    pub fn export(&self, name: &str) -> Option<u16> {
        self.exports.iter().find(|(_, n)| n == name).map(|(addr, _)| *addr)
    }
}

/// Append-only word buffer with a hard capacity.
#[derive(Debug, Clone)]
pub struct MemoryImage {
    words: Vec<u16>,
    limit: usize,
}

impl MemoryImage {
    pub fn new(limit: usize) -> Self {
        Self { words: Vec::new(), limit: limit.min(MEM_SIZE) }
    }

    pub fn push(&mut self, word: u16, origin: &Token<'_>) -> Result<usize, ErrorInfo> {
        if self.words.len() >= self.limit {
            return Err(ErrorInfo::at_token(
                ErrorKind::Capacity,
                format!("Program does not fit in {} words", self.limit),
                origin,
            ));
        }
        self.words.push(word);
        Ok(self.words.len() - 1)
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn into_words(self) -> Vec<u16> {
        self.words
    }
}

pub struct Assembler {
    settings: AssemblerSettings,
    symbols: SymbolTable,
}

impl Default for Assembler {
    fn default() -> Self {
        Self::new()
    }
}

impl Assembler {
    pub fn new() -> Self {
        Self::with_settings(AssemblerSettings::default())
    }

    pub fn with_settings(settings: AssemblerSettings) -> Self {
        Self {
            settings,
            symbols: SymbolTable::new(),
        }
    }

    // ===== Public API =====

    pub fn settings(&self) -> &AssemblerSettings {
        &self.settings
    }

    pub fn set_origin(&mut self, addr: u16) {
        self.settings.location = addr;
    }

    pub fn origin(&self) -> u16 {
        self.settings.location
    }

    pub fn assemble(&mut self, src: &str) -> Result<ReturnInfo, AsmError> {
        self.symbols.clear();
        self.symbols.set_base_offset(self.settings.location);
        for (name, value) in &self.settings.provided_symbol_definitions {
            self.symbols.provide(name.clone(), *value);
        }

        debug!(bytes = src.len(), location = self.settings.location, "assembling");
        let driver = Driver::new(src, &mut self.symbols, &self.settings);
        let info = driver.assemble()?;
        debug!(
            words = info.mem.len(),
            exports = info.exports.len(),
            unresolved = info.unresolved.len(),
            "assembled"
        );
        Ok(info)
    }

    pub fn assemble_words(&mut self, src: &str) -> Result<Vec<u16>, AsmError> {
        Ok(self.assemble(src)?.mem)
    }

    /// Value of a symbol from the last assembly, as seen from the top level.
    pub fn lookup(&self, name: &str) -> Option<u16> {
        self.symbols.lookup(name, &[]).and_then(|v| u16::try_from(v).ok())
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn into_symbols(self) -> SymbolTable {
        self.symbols
    }

    pub fn write_bin<W: Write>(words: &[u16], mut w: W, endian: Endian) -> std::io::Result<()> {
        let mut bytes = Vec::with_capacity(words.len() * 2);
        for word in words {
            match endian {
                Endian::Little => bytes.extend_from_slice(&word.to_le_bytes()),
                Endian::Big => bytes.extend_from_slice(&word.to_be_bytes()),
            }
        }
        w.write_all(&bytes)
    }

    pub fn reset(&mut self) {
        self.symbols.clear();
        self.settings = AssemblerSettings::default();
    }
}

/// Assemble a single source with `settings`.
pub fn assemble(src: &str, settings: &AssemblerSettings) -> Result<ReturnInfo, AsmError> {
    Assembler::with_settings(settings.clone()).assemble(src)
}

/// `:name` or `name:`.
fn label_definition(text: &str) -> Option<&str> {
    text.strip_prefix(':').or_else(|| text.strip_suffix(':'))
}

const OPERAND_KEYWORDS: &[&str] = &["push", "pop", "peek", "pick", "pc", "ex"];

fn check_name(token: &Token<'_>, name: &str) -> Result<(), ErrorInfo> {
    let bytes = name.as_bytes();
    let valid = bytes.first().is_some_and(|&b| b.is_ascii_alphabetic() || b == b'_' || b == b'.')
        && bytes.iter().all(|&b| b.is_ascii_alphanumeric() || b == b'_' || b == b'.');
    if !valid {
        return Err(ErrorInfo::at_token(ErrorKind::Syntax, "Invalid symbol name", token));
    }
    if Register::from_name(name).is_some() || OPERAND_KEYWORDS.iter().any(|k| k.eq_ignore_ascii_case(name)) {
        return Err(ErrorInfo::at_token(
            ErrorKind::Syntax,
            "Symbol name clashes with a register or operand keyword",
            token,
        ));
    }
    Ok(())
}

/// State of one assembly run over a single source buffer.
struct Driver<'a> {
    src: &'a str,
    lines: LineIndex,
    symbols: &'a mut SymbolTable,
    settings: &'a AssemblerSettings,
    image: MemoryImage,
    pc_to_source_offset: Vec<usize>,
    pc_to_source_line: Vec<usize>,
    source_line_to_pc: Vec<usize>,
    delayed: Vec<DelayedExpression>,
    exported: Vec<Token<'a>>,
    scope: Vec<u32>,
    next_scope_id: u32,
    repeat_runs: usize,
}

impl<'a> Driver<'a> {
    fn new(src: &'a str, symbols: &'a mut SymbolTable, settings: &'a AssemblerSettings) -> Self {
        Self {
            src,
            lines: LineIndex::new(src),
            symbols,
            settings,
            image: MemoryImage::new(MEM_SIZE - settings.location as usize),
            pc_to_source_offset: Vec::new(),
            pc_to_source_line: Vec::new(),
            source_line_to_pc: Vec::new(),
            delayed: Vec::new(),
            exported: Vec::new(),
            scope: Vec::new(),
            next_scope_id: 1,
            repeat_runs: 0,
        }
    }

    fn assemble(mut self) -> Result<ReturnInfo, ErrorInfo> {
        let lines = self.lines.clone();
        let locate = |e: ErrorInfo| {
            let line = lines.line_of(e.character);
            e.with_line(line)
        };
        self.run(Lexer::new(self.src)).map_err(locate)?;
        self.finish().map_err(locate)
    }

    // ===== Scanning =====

    fn run(&mut self, mut lexer: Lexer<'a>) -> Result<(), ErrorInfo> {
        loop {
            let token = lexer.next_token()?;
            if token.is_empty() {
                return Ok(());
            }
            self.statement(&mut lexer, token)?;
        }
    }

    fn statement(&mut self, lexer: &mut Lexer<'a>, token: Token<'a>) -> Result<(), ErrorInfo> {
        if token.text == "," {
            return Err(ErrorInfo::at_token(ErrorKind::Syntax, "Unexpected ','", &token));
        }
        if let Some(name) = label_definition(token.text) {
            return self.define_label(&token, name);
        }

        match token.text.to_ascii_lowercase().as_str() {
            ".dat" | "dat" => self.data(lexer, &token),
            ".def" | "def" => self.define(lexer),
            ".export" | "export" => self.export(lexer),
            ".repeat" => self.repeat(lexer, &token),
            ".end" => Err(ErrorInfo::at_token(
                ErrorKind::Syntax,
                "`.end` without a matching `.repeat`",
                &token,
            )),
            _ => match opcodes::lookup(token.text) {
                Some(op) => self.instruction(lexer, &token, op),
                None => Err(ErrorInfo::at_token(
                    ErrorKind::Syntax,
                    "Unknown mnemonic or directive",
                    &token,
                )),
            },
        }
    }

    fn define_label(&mut self, token: &Token<'a>, name: &str) -> Result<(), ErrorInfo> {
        check_name(token, name)?;
        let pc = self.image.len();
        self.symbols
            .define_label(name, pc, &self.scope)
            .map_err(|m| ErrorInfo::at_token(ErrorKind::DuplicateSymbol, m, token))?;
        trace!(name, pc, scope = ?self.scope, "label");
        Ok(())
    }

    fn encode_operand(&self, token: &Token<'_>, pos: ArgPos) -> Result<EncodedOperand, ErrorInfo> {
        OperandEncoder::new(&*self.symbols, &self.scope, !self.settings.no_packed_constants).encode(token, pos)
    }

    fn instruction(&mut self, lexer: &mut Lexer<'a>, token: &Token<'a>, op: Opcode) -> Result<(), ErrorInfo> {
        match op.class {
            OpClass::Binary => {
                let b_tok = lexer.next_operand()?;
                let comma = lexer.next_token()?;
                if comma.text != "," {
                    let at = if comma.is_empty() { &b_tok } else { &comma };
                    return Err(ErrorInfo::at_token(ErrorKind::Syntax, "Expected ',' between operands", at));
                }
                let a_tok = lexer.next_operand()?;
                let b = self.encode_operand(&b_tok, ArgPos::B)?;
                let a = self.encode_operand(&a_tok, ArgPos::A)?;
                let word = opcodes::construct_binary(op.code, a.code, b.code);
                self.emit_instruction(token, word, [(a, ArgPos::A, a_tok), (b, ArgPos::B, b_tok)])
            }
            OpClass::Unary => {
                let a_tok = lexer.next_operand()?;
                let a = self.encode_operand(&a_tok, ArgPos::A)?;
                let word = opcodes::construct_unary(op.code, a.code);
                self.emit_instruction(token, word, [(a, ArgPos::A, a_tok)])
            }
            OpClass::Niladic => self.emit(opcodes::construct_niladic(op.code), token).map(|_| ()),
        }
    }

    /// Emit an instruction word followed by the extra words of its operands,
    /// A before B.
    fn emit_instruction(
        &mut self,
        origin: &Token<'a>,
        word: u16,
        operands: impl IntoIterator<Item = (EncodedOperand, ArgPos, Token<'a>)>,
    ) -> Result<(), ErrorInfo> {
        let base = self.emit(word, origin)?;
        for (operand, pos, token) in operands {
            let Some(extra) = operand.extra else {
                continue;
            };
            let at = self.emit(extra, origin)?;
            if let Some(pending) = operand.delayed {
                self.delay(base, at, PatchPosition::Operand(pos), pending.expression, pending.memory, &token);
            }
        }
        Ok(())
    }

    fn emit(&mut self, word: u16, origin: &Token<'_>) -> Result<usize, ErrorInfo> {
        let pc = self.image.push(word, origin)?;
        let line = self.lines.line_of(origin.offset);
        self.pc_to_source_offset.push(origin.offset);
        self.pc_to_source_line.push(line);
        while self.source_line_to_pc.len() <= line {
            self.source_line_to_pc.push(pc);
        }
        Ok(pc)
    }

    fn delay(
        &mut self,
        base_word: usize,
        extra_word: usize,
        position: PatchPosition,
        expression: String,
        memory: bool,
        token: &Token<'_>,
    ) {
        trace!(base_word, extra_word, expression = expression.as_str(), "delaying");
        self.delayed.push(DelayedExpression {
            base_word,
            extra_word,
            position,
            expression,
            memory,
            scope: self.scope.clone(),
            character: token.offset,
            line: self.lines.line_of(token.offset),
        });
    }

    // ===== Directives =====

    fn constant(&self, token: &Token<'_>, what: &str) -> Result<i64, ErrorInfo> {
        if token.is_empty() {
            return Err(ErrorInfo::at_token(ErrorKind::Directive, format!("{} is missing", what), token));
        }
        let expr = ExpressionParser::parse(token.text).map_err(|e| e.at(token))?;
        match ExpressionEvaluator::new(&*self.symbols, &self.scope).evaluate_constant(&expr) {
            Ok(Some(value)) => Ok(value),
            Err(e) if e.kind == ErrorKind::EncodeRange => Err(e.at(token)),
            Ok(None) | Err(_) => Err(ErrorInfo::at_token(
                ErrorKind::Directive,
                format!("{} must be a constant", what),
                token,
            )),
        }
    }

    fn data(&mut self, lexer: &mut Lexer<'a>, directive: &Token<'a>) -> Result<(), ErrorInfo> {
        loop {
            let item = lexer.next_operand()?;
            if item.is_empty() {
                let at = if item.offset == directive.end() { directive } else { &item };
                return Err(ErrorInfo::at_token(ErrorKind::Directive, "Expected a value in `.dat`", at));
            }

            if item.is_string() {
                for byte in unescape(&item)? {
                    self.emit(byte as u16, directive)?;
                }
            } else if item.text == "?" {
                self.emit(0, directive)?;
            } else {
                let expr = ExpressionParser::parse(item.text).map_err(|e| e.at(&item))?;
                let resolved = ExpressionEvaluator::new(&*self.symbols, &self.scope)
                    .evaluate(&expr)
                    .map_err(|e| e.at(&item))?;
                match resolved {
                    Resolved::Value(v) => {
                        let word = to_word(v).map_err(|e| e.at(&item))?;
                        self.emit(word, directive)?;
                    }
                    Resolved::Delay(_) => {
                        let at = self.emit(0, directive)?;
                        self.delay(at, at, PatchPosition::Data, item.text.to_string(), false, &item);
                    }
                    Resolved::Register(_) | Resolved::RegisterOffset(..) => {
                        return Err(ErrorInfo::at_token(
                            ErrorKind::Directive,
                            "Registers are not valid `.dat` values",
                            &item,
                        ));
                    }
                }
            }

            if lexer.peek_token()?.text != "," {
                return Ok(());
            }
            lexer.next_token()?;
        }
    }

    fn define(&mut self, lexer: &mut Lexer<'a>) -> Result<(), ErrorInfo> {
        let name = lexer.next_token()?;
        check_name(&name, name.text)?;
        let comma = lexer.next_token()?;
        if comma.text != "," {
            return Err(ErrorInfo::at_token(ErrorKind::Syntax, "Expected ',' after `.def` name", &name));
        }
        let value_tok = lexer.next_operand()?;
        let value = self.constant(&value_tok, "`.def` value")?;
        self.symbols
            .define_constant(name.text, value)
            .map_err(|m| ErrorInfo::at_token(ErrorKind::DuplicateSymbol, m, &name))?;
        trace!(name = name.text, value, "define");
        Ok(())
    }

    fn export(&mut self, lexer: &mut Lexer<'a>) -> Result<(), ErrorInfo> {
        let name = lexer.next_token()?;
        check_name(&name, name.text)?;
        self.symbols.export(name.text);
        self.exported.push(name);
        Ok(())
    }

    fn repeat(&mut self, lexer: &mut Lexer<'a>, directive: &Token<'a>) -> Result<(), ErrorInfo> {
        let count_tok = lexer.next_operand()?;
        let count = self.constant(&count_tok, "`.repeat` count")?;
        if !(0..=MAX_REPEAT).contains(&count) {
            return Err(ErrorInfo::at_token(
                ErrorKind::Directive,
                "`.repeat` count out of range",
                &count_tok,
            ));
        }

        let body_start = lexer.position();
        let mut depth = 1;
        let body_end = loop {
            let token = lexer.next_token()?;
            if token.is_empty() {
                return Err(ErrorInfo::at_token(
                    ErrorKind::Syntax,
                    "`.repeat` without a matching `.end`",
                    directive,
                ));
            }
            if token.text.eq_ignore_ascii_case(".repeat") {
                depth += 1;
            } else if token.text.eq_ignore_ascii_case(".end") {
                depth -= 1;
                if depth == 0 {
                    break token.offset;
                }
            }
        };

        debug!(count, body_start, body_end, "repeat block");
        for _ in 0..count {
            self.repeat_runs += 1;
            let id = self.next_scope_id;
            self.next_scope_id = match id.checked_add(1) {
                Some(next) if self.repeat_runs <= MAX_REPEAT_RUNS => next,
                _ => {
                    return Err(ErrorInfo::at_token(
                        ErrorKind::Capacity,
                        "Too many `.repeat` iterations",
                        directive,
                    ));
                }
            };
            self.scope.push(id);
            let result = self.run(Lexer::span(self.src, body_start, body_end));
            self.scope.pop();
            result?;
        }
        Ok(())
    }

    // ===== Resolving =====

    fn finish(self) -> Result<ReturnInfo, ErrorInfo> {
        let Driver {
            lines,
            symbols,
            settings,
            image,
            pc_to_source_offset,
            pc_to_source_line,
            mut source_line_to_pc,
            delayed,
            exported,
            ..
        } = self;

        let mut mem = image.into_words();
        debug!(patches = delayed.len(), "resolving");
        let unresolved = resolve_patches(&mut mem, delayed, &*symbols, settings.allow_unresolved_symbols)?;

        let requested = exported
            .iter()
            .map(|t| (t.text, t.offset))
            .chain(settings.label_values_to_extract.iter().map(|n| (n.as_str(), 0)));
        let mut exports: Vec<(u16, String)> = Vec::new();
        for (name, offset) in requested {
            if exports.iter().any(|(_, n)| n == name) {
                continue;
            }
            let value = symbols.lookup(name, &[]).ok_or_else(|| {
                ErrorInfo::new(ErrorKind::UnresolvedSymbol, "Exported symbol is never defined", name, offset)
            })?;
            let addr = to_word(value).map_err(|e| ErrorInfo::new(e.kind, e.message, name, offset))?;
            exports.push((addr, name.to_string()));
        }

        while source_line_to_pc.len() < lines.line_count() {
            source_line_to_pc.push(mem.len());
        }

        let mut info = ReturnInfo {
            mem,
            pc_to_source_offset,
            pc_to_source_line,
            source_line_to_pc,
            exports,
            unresolved,
        };
        info.relocate(settings.location as usize);
        Ok(info)
    }
}
