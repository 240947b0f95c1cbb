use std::{
    error::Error,
    fs::{self, File},
    io::{self, BufWriter, Write},
    num::ParseIntError,
    path::PathBuf,
    process::ExitCode,
    str::FromStr,
};

use clap::Parser;
use dcpu16asm::{
    AsmError, Assembler, AssemblerSettings, Endian, ErrorInfo, assemble, assemble_multiple, render_listing,
};
use tracing::Level;

#[derive(Parser)]
#[command(version, about = "DCPU-16 assembler and linker", long_about = None)]
struct Args {
    /// Assembly source files, linked in order when more than one is given
    #[arg(required = true)]
    sources: Vec<PathBuf>,

    /// Output binary (defaults to the first source with a `.bin` extension)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Pre-defined absolute symbols (repeatable)
    #[arg(short = 'D', long, value_name = "KEY1=val", value_parser = parse_defines::<String, Word>)]
    define: Vec<(String, Word)>,

    /// Address the program is assembled for
    #[arg(long, default_value = "0")]
    origin: Word,

    /// Always encode literals in an extra word
    #[arg(long)]
    no_packed_constants: bool,

    /// Report the value of a symbol after assembly (repeatable)
    #[arg(short, long, value_name = "NAME")]
    extract: Vec<String>,

    /// Write words most significant byte first
    #[arg(long)]
    big_endian: bool,

    /// Write a human-readable listing
    #[arg(long, value_name = "PATH")]
    listing: Option<PathBuf>,

    /// One of `TRACE`, `DEBUG`, `INFO`, `WARN`, or `ERROR`
    #[arg(short, long, default_value_t = Level::INFO)]
    log_level: Level,
}

/// A 16 bit value written in decimal, `0x` hex or `0b` binary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Word(u16);

impl FromStr for Word {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let value = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            u16::from_str_radix(hex, 16)?
        } else if let Some(bin) = s.strip_prefix("0b").or_else(|| s.strip_prefix("0B")) {
            u16::from_str_radix(bin, 2)?
        } else {
            s.parse()?
        };
        Ok(Word(value))
    }
}

fn parse_defines<T, U>(s: &str) -> Result<(T, U), Box<dyn Error + Send + Sync + 'static>>
where
    T: FromStr,
    T::Err: Error + Send + Sync + 'static,
    U: FromStr,
    U::Err: Error + Send + Sync + 'static,
{
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid SYMBOL=value: no `=` found in `{s}`"))?;
    Ok((s[..pos].parse()?, s[pos + 1..].parse()?))
}

fn main() -> ExitCode {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .with_writer(io::stderr)
        .init();

    if let Err(e) = main_real(args) {
        tracing::error!("{e}");
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

/// File that holds the error, with its line and character rebased from the
/// concatenated sources to that file.
fn source_of<'a>(paths: &'a [PathBuf], texts: &[String], info: &mut ErrorInfo) -> Option<&'a PathBuf> {
    let mut start = 0;
    let mut lines = 0;
    for (i, (path, text)) in paths.iter().zip(texts).enumerate() {
        if info.character < start + text.len() || i + 1 == paths.len() {
            info.character -= start.min(info.character);
            info.line -= lines.min(info.line);
            return Some(path);
        }
        start += text.len();
        lines += text.matches('\n').count();
    }
    None
}

fn main_real(args: Args) -> Result<(), Box<dyn Error>> {
    let texts = args
        .sources
        .iter()
        .map(|path| fs::read_to_string(path).map_err(|e| format!("cant open file {}: {e}", path.display())))
        .collect::<Result<Vec<_>, _>>()?;

    let mut settings = AssemblerSettings::new()
        .with_location(args.origin.0)
        .with_packed_constants(!args.no_packed_constants);
    for (name, Word(value)) in &args.define {
        settings = settings.with_symbol(name.clone(), *value);
    }
    for name in &args.extract {
        settings = settings.with_extracted(name.clone());
    }

    tracing::debug!("assembling {} module(s) at {:#06x}", texts.len(), args.origin.0);
    let result = match texts.as_slice() {
        [single] => assemble(single, &settings),
        many => {
            let sources: Vec<&str> = many.iter().map(String::as_str).collect();
            assemble_multiple(&sources, &settings)
        }
    };
    let info = match result {
        Ok(info) => info,
        Err(AsmError::Asm(mut e)) => {
            if let Some(path) = source_of(&args.sources, &texts, &mut e) {
                tracing::error!("in {}", path.display());
            }
            return Err(AsmError::Asm(e).into());
        }
        Err(e) => return Err(e.into()),
    };

    let output = args
        .output
        .clone()
        .unwrap_or_else(|| args.sources[0].with_extension("bin"));
    tracing::trace!("writing {} words to {}", info.mem.len(), output.display());
    let endian = if args.big_endian { Endian::Big } else { Endian::Little };
    let mut out = BufWriter::new(File::create(&output)?);
    Assembler::write_bin(&info.mem, &mut out, endian)?;
    out.flush()?;

    if let Some(path) = &args.listing {
        tracing::trace!("writing listing to {}", path.display());
        fs::write(path, render_listing(&info, &texts.concat(), args.origin.0 as usize))?;
    }

    for (addr, name) in &info.exports {
        println!("{name} = {addr:#06x}");
    }
    tracing::info!("assembled {} words into {}", info.mem.len(), output.display());
    Ok(())
}
