//! deltapage CLI
//!
//! Dump, search and patch binary files without loading them whole

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use deltapage::{ByteView, DocumentConfig, HexEditor, HexEditorBuilder, SearchMode};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "deltapage")]
#[command(about = "Inspect and patch binary files")]
struct Args {
    /// Configuration file (TOML or JSON)
    #[arg(short = 'c', long, global = true)]
    config: Option<PathBuf>,

    /// Map files into memory
    #[arg(long, global = true)]
    mmap: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a hex dump
    Dump {
        file: PathBuf,

        /// First byte to print (decimal or 0x-prefixed)
        #[arg(short, long, default_value = "0", value_parser = parse_offset)]
        offset: u64,

        /// Number of bytes to print
        #[arg(short, long, default_value = "256", value_parser = parse_offset)]
        length: u64,

        /// Bytes per line
        #[arg(short, long, default_value = "16")]
        width: usize,
    },

    /// Print offsets of a byte pattern
    Find {
        file: PathBuf,

        /// Pattern as text, or as hex with --hex
        pattern: String,

        /// Interpret the pattern as hex digits
        #[arg(long)]
        hex: bool,

        /// Compare ASCII letters without regard to case
        #[arg(short, long)]
        ignore_case: bool,

        /// Start offset
        #[arg(long, default_value = "0", value_parser = parse_offset)]
        from: u64,

        /// Maximum number of matches
        #[arg(long, default_value = "100")]
        limit: usize,
    },

    /// Apply edits in order and save
    ///
    /// Edits: insert:OFFSET:HEX, fill:OFFSET:COUNT:HEXBYTE,
    /// delete:OFFSET:LENGTH, overwrite:OFFSET:HEX, replace-all:HEX:HEX
    Edit {
        file: PathBuf,

        #[arg(required = true, value_parser = parse_edit)]
        edits: Vec<Edit>,

        /// Write here instead of replacing the input file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print the resulting changes as JSON without saving
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Debug, Clone)]
enum Edit {
    Insert(u64, Vec<u8>),
    Fill(u64, u64, u8),
    Delete(u64, u64),
    Overwrite(u64, Vec<u8>),
    ReplaceAll(Vec<u8>, Vec<u8>),
}

fn parse_offset(s: &str) -> Result<u64, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid offset '{}': {}", s, e))
}

fn parse_hex(s: &str) -> Result<Vec<u8>, String> {
    let digits: String = s.chars().filter(|c| !c.is_whitespace()).collect();
    if !digits.is_ascii() {
        return Err(format!("invalid hex '{}'", s));
    }
    if digits.len() % 2 != 0 {
        return Err(format!("odd number of hex digits in '{}'", s));
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .map_err(|e| format!("invalid hex '{}': {}", &digits[i..i + 2], e))
        })
        .collect()
}

fn parse_edit(s: &str) -> Result<Edit, String> {
    let parts: Vec<&str> = s.splitn(3, ':').collect();
    match parts.as_slice() {
        ["insert", offset, hex] => Ok(Edit::Insert(parse_offset(offset)?, parse_hex(hex)?)),
        ["fill", offset, rest] => {
            let (count, byte) = rest
                .split_once(':')
                .ok_or_else(|| format!("fill needs COUNT:HEXBYTE, got '{}'", rest))?;
            match parse_hex(byte)?.as_slice() {
                [byte] => Ok(Edit::Fill(parse_offset(offset)?, parse_offset(count)?, *byte)),
                _ => Err(format!("fill byte must be one hex byte, got '{}'", byte)),
            }
        }
        ["delete", offset, length] => Ok(Edit::Delete(parse_offset(offset)?, parse_offset(length)?)),
        ["overwrite", offset, hex] => Ok(Edit::Overwrite(parse_offset(offset)?, parse_hex(hex)?)),
        ["replace-all", from, to] => Ok(Edit::ReplaceAll(parse_hex(from)?, parse_hex(to)?)),
        _ => Err(format!(
            "invalid edit '{}'. Valid forms: insert:OFFSET:HEX, fill:OFFSET:COUNT:HEXBYTE, \
             delete:OFFSET:LENGTH, overwrite:OFFSET:HEX, replace-all:HEX:HEX",
            s
        )),
    }
}

fn open(args: &Args, file: &Path, mode: SearchMode) -> anyhow::Result<HexEditor> {
    let config = match &args.config {
        Some(path) => DocumentConfig::load(path)
            .with_context(|| format!("loading config {:?}", path))?,
        None => DocumentConfig::default(),
    };
    let mut builder = HexEditorBuilder::new()
        .path(file)
        .config(config)
        .search_mode(mode);
    if args.mmap {
        builder = builder.with_mmap();
    }
    builder
        .build()
        .with_context(|| format!("opening {:?}", file))
}

fn dump(editor: &HexEditor, offset: u64, length: u64, width: usize) -> anyhow::Result<()> {
    if width == 0 {
        bail!("width must be at least 1");
    }
    let total = editor.len()?;
    if offset > total {
        bail!("offset {} is past the end ({} bytes)", offset, total);
    }
    let length = length.min(total - offset);
    let bytes = editor.read_range(offset, length)?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    for (i, line) in bytes.chunks(width).enumerate() {
        let hex: Vec<String> = line.iter().map(|b| format!("{:02x}", b)).collect();
        let text: String = line
            .iter()
            .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
            .collect();
        writeln!(
            out,
            "{:08x}  {:<pad$}  |{}|",
            offset + (i * width) as u64,
            hex.join(" "),
            text,
            pad = width * 3 - 1
        )?;
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();

    match &args.command {
        Command::Dump {
            file,
            offset,
            length,
            width,
        } => {
            let editor = open(&args, file, SearchMode::Exact)?;
            dump(&editor, *offset, *length, *width)?;
        }
        Command::Find {
            file,
            pattern,
            hex,
            ignore_case,
            from,
            limit,
        } => {
            let mode = if *ignore_case {
                SearchMode::IgnoreAsciiCase
            } else {
                SearchMode::Exact
            };
            let editor = open(&args, file, mode)?;
            let needle = if *hex {
                parse_hex(pattern).map_err(|e| anyhow!(e))?
            } else {
                pattern.as_bytes().to_vec()
            };
            let matches = editor.find_all(&needle, *from, *limit)?;
            for at in &matches {
                println!("0x{:08x}", at);
            }
            info!("{} matches", matches.len());
        }
        Command::Edit {
            file,
            edits,
            output,
            dry_run,
        } => {
            let mut editor = open(&args, file, SearchMode::Exact)?;
            for edit in edits {
                match edit {
                    Edit::Insert(offset, bytes) => editor.insert(*offset, bytes)?,
                    Edit::Fill(offset, count, byte) => editor.insert_fill(*offset, *count, *byte)?,
                    Edit::Delete(offset, length) => editor.delete(*offset, *length)?,
                    Edit::Overwrite(offset, bytes) => editor.overwrite(*offset, bytes)?,
                    Edit::ReplaceAll(from, to) => {
                        let count = editor.replace_all(from, to)?;
                        info!("Replaced {} occurrences", count);
                    }
                }
            }

            if *dry_run {
                let segments = editor.document().segments()?;
                println!("{}", serde_json::to_string_pretty(&segments)?);
                return Ok(());
            }

            let target = output.as_ref().unwrap_or(file);
            editor
                .save_as_file(target)
                .with_context(|| format!("saving {:?}", target))?;
            println!("{} bytes written to {}", editor.len()?, target.display());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fill_edit() {
        assert!(matches!(parse_edit("fill:0x10:4:ff"), Ok(Edit::Fill(16, 4, 0xff))));
        assert!(parse_edit("fill:0:4").is_err());
        assert!(parse_edit("fill:0:4:abcd").is_err());
    }
}
