//! DCPU-16 opcode tables and instruction word layout

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpClass {
    /// `OP b, a`
    Binary,
    /// `OP a`
    Unary,
    /// `OP`
    Niladic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Opcode {
    pub mnemonic: &'static str,
    pub class: OpClass,
    pub code: u16,
}

/// Two operand instructions, `SND`/`RCV` are the multiprocessor extensions.
pub static BINARY_OPCODES: &[(&str, u16)] = &[
    ("SET", 0x01), ("ADD", 0x02), ("SUB", 0x03), ("MUL", 0x04),
    ("MLI", 0x05), ("DIV", 0x06), ("DVI", 0x07), ("MOD", 0x08),
    ("MDI", 0x09), ("AND", 0x0a), ("BOR", 0x0b), ("XOR", 0x0c),
    ("SHR", 0x0d), ("ASR", 0x0e), ("SHL", 0x0f),
    ("IFB", 0x10), ("IFC", 0x11), ("IFE", 0x12), ("IFN", 0x13),
    ("IFG", 0x14), ("IFA", 0x15), ("IFL", 0x16), ("IFU", 0x17),
    ("SND", 0x18), ("RCV", 0x19),
    ("ADX", 0x1a), ("SBX", 0x1b),
    ("STI", 0x1e), ("STD", 0x1f),
];

/// Single operand instructions, `IFW`/`IFR` are the multiprocessor extensions.
pub static UNARY_OPCODES: &[(&str, u16)] = &[
    ("JSR", 0x01),
    ("INT", 0x08), ("IAG", 0x09), ("IAS", 0x0a), ("RFI", 0x0b), ("IAQ", 0x0c),
    ("HWN", 0x10), ("HWQ", 0x11), ("HWI", 0x12),
    ("IFW", 0x13), ("IFR", 0x14),
];

pub static NILADIC_OPCODES: &[(&str, u16)] = &[("BRK", 0x00)];

fn find(table: &'static [(&'static str, u16)], class: OpClass, mnemonic: &str) -> Option<Opcode> {
    table
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(mnemonic))
        .map(|&(name, code)| Opcode { mnemonic: name, class, code })
}

/// Case-insensitive mnemonic lookup.
pub fn lookup(mnemonic: &str) -> Option<Opcode> {
    find(BINARY_OPCODES, OpClass::Binary, mnemonic)
        .or_else(|| find(UNARY_OPCODES, OpClass::Unary, mnemonic))
        .or_else(|| find(NILADIC_OPCODES, OpClass::Niladic, mnemonic))
}

pub fn construct_binary(opcode: u16, a: u16, b: u16) -> u16 {
    opcode | (b << 5) | (a << 10)
}

pub fn construct_unary(opcode: u16, a: u16) -> u16 {
    (opcode << 5) | (a << 10)
}

pub fn construct_niladic(opcode: u16) -> u16 {
    opcode << 10
}

/// Split an instruction word into `(opcode, b, a)` fields.
pub fn split_binary(word: u16) -> (u16, u16, u16) {
    (word & 0x1f, (word >> 5) & 0x1f, word >> 10)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_case_insensitive() {
        let set = lookup("set").unwrap();
        assert_eq!(set, Opcode { mnemonic: "SET", class: OpClass::Binary, code: 0x01 });
        assert_eq!(lookup("Jsr").unwrap().class, OpClass::Unary);
        assert_eq!(lookup("BRK").unwrap().class, OpClass::Niladic);
        assert_eq!(lookup("rcv").unwrap().code, 0x19);
        assert!(lookup("LDA").is_none());
    }

    #[test]
    fn test_mnemonics_unique() {
        let all: Vec<&str> = BINARY_OPCODES
            .iter()
            .chain(UNARY_OPCODES)
            .chain(NILADIC_OPCODES)
            .map(|(n, _)| *n)
            .collect();
        for (i, name) in all.iter().enumerate() {
            assert!(!all[i + 1..].contains(name), "{} listed twice", name);
        }
    }

    #[test]
    fn test_binary_layout_round_trips() {
        for &(_, op) in BINARY_OPCODES {
            for a in [0x00, 0x1f, 0x20, 0x3f] {
                for b in [0x00, 0x10, 0x1f] {
                    let word = construct_binary(op, a, b);
                    assert_eq!(split_binary(word), (op, b, a));
                }
            }
        }
    }

    #[test]
    fn test_unary_and_niladic_layout() {
        assert_eq!(construct_unary(0x01, 0x1f), 0x7c20);
        assert_eq!(split_binary(construct_unary(0x08, 0x21)), (0, 0x08, 0x21));
        assert_eq!(construct_niladic(0x00), 0x0000);
    }
}
