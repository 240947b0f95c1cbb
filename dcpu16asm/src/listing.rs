//! Human-readable assembly listing (feature: "listing")

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use crate::assembler::{Assembler, ReturnInfo};

const WORDS_PER_ROW: usize = 4;

fn statement_text(src: &str, offset: usize) -> &str {
    let rest = src.get(offset..).unwrap_or("");
    let end = rest.find('\n').unwrap_or(rest.len());
    rest[..end].trim_end()
}

/// One row per statement: address, the words it produced and its source text.
/// Words below `origin` are relocation padding and are skipped.
pub fn render_listing(info: &ReturnInfo, src: &str, origin: usize) -> String {
    let mut out = String::new();
    out.push_str("Assembly Listing:\n");
    out.push_str("Address:  Machine Code             Source\n");
    out.push_str(&"-".repeat(60));
    out.push('\n');

    let mut pc = origin;
    while pc < info.mem.len() {
        let offset = info.pc_to_source_offset[pc];
        let mut end = pc + 1;
        while end < info.mem.len() && info.pc_to_source_offset[end] == offset {
            end += 1;
        }

        let text = statement_text(src, offset);
        for (row, chunk) in info.mem[pc..end].chunks(WORDS_PER_ROW).enumerate() {
            let words = chunk
                .iter()
                .map(|w| format!("${:04X}", w))
                .collect::<Vec<_>>()
                .join(" ");
            let source = if row == 0 { text } else { "" };
            let line = format!("${:04X}: {:<24} {}", pc + row * WORDS_PER_ROW, words, source);
            out.push_str(line.trim_end());
            out.push('\n');
        }
        pc = end;
    }
    out
}

impl Assembler {
    pub fn print_assembly_listing(&self, info: &ReturnInfo, src: &str) {
        println!();
        print!("{}", render_listing(info, src, self.origin() as usize));
    }

    pub fn save_listing(&self, info: &ReturnInfo, src: &str, filename: impl AsRef<Path>) -> io::Result<()> {
        let mut f = File::create(filename)?;
        f.write_all(render_listing(info, src, self.origin() as usize).as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listing_rows() {
        let src = "set x, 10\n:loop add x, 0x100 ; bump\n.dat 1, 2, 3, 4, 5\n";
        let info = Assembler::new().assemble(src).unwrap();
        let listing = render_listing(&info, src, 0);
        let rows: Vec<&str> = listing.lines().skip(3).collect();
        assert_eq!(
            rows,
            vec![
                "$0000: $AC61                    set x, 10",
                "$0001: $7C62 $0100              add x, 0x100 ; bump",
                "$0003: $0001 $0002 $0003 $0004  .dat 1, 2, 3, 4, 5",
                "$0007: $0005",
            ]
        );
    }

    #[test]
    fn test_listing_skips_padding() {
        let src = "brk";
        let mut assembler = Assembler::new();
        assembler.set_origin(0x10);
        let info = assembler.assemble(src).unwrap();
        let listing = render_listing(&info, src, assembler.origin() as usize);
        assert_eq!(listing.lines().skip(3).collect::<Vec<_>>(), vec!["$0010: $0000                    brk"]);
    }

    #[test]
    fn test_save_listing() {
        let src = "set x, 10\n.dat 1, 2";
        let mut assembler = Assembler::new();
        assembler.set_origin(0x10);
        let info = assembler.assemble(src).unwrap();
        assembler.print_assembly_listing(&info, src);

        let path = std::env::temp_dir().join(format!("dcpu16asm-listing-{}.lst", std::process::id()));
        assembler.save_listing(&info, src, &path).unwrap();
        let saved = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(saved, render_listing(&info, src, 0x10));
        assert!(saved.starts_with("Assembly Listing:\n"));
        assert!(saved.contains("$0011: $0001 $0002              .dat 1, 2"));
    }
}
