//! A minimal diagnostic CLI over [`lsmdb`]'s memtable, for manually
//! exercising the write path during development. Not part of the library's
//! public contract: state lives only in this process's memtable and is
//! discarded on exit, since the write-ahead log and on-disk tables that
//! would make it durable are out of this crate's scope.

use std::io::{self, BufRead, Write};

use clap::Parser;
use colored::*;

use lsmdb::key::{SequenceNumber, ValueType};
use lsmdb::MemTable;

#[derive(Parser, Debug)]
#[command(name = "lsmdb", version, about = "Interactive memtable REPL")]
struct Cli {
    /// Print each command's internal key encoding alongside its result
    #[arg(long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();
    tracing_subscriber::fmt::init();

    let table = MemTable::with_default_comparator();
    let mut next_seq: u64 = 1;

    info("lsmdb memtable REPL -- commands: put <k> <v>, get <k>, del <k>, quit");

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                warn(&format!("read error: {e}"));
                break;
            }
        };
        let parts: Vec<&str> = line.split_whitespace().collect();
        match parts.as_slice() {
            ["put", key, value] => {
                let seq = SequenceNumber::new(next_seq);
                next_seq += 1;
                table.add(seq, ValueType::Value, key.as_bytes(), value.as_bytes());
                if cli.verbose {
                    info(&format!("seq={} put {key} = {value}", seq.0));
                } else {
                    success(&format!("put: {key} = {value}"));
                }
            }
            ["get", key] => {
                let lookup = lsmdb::key::LookupKey::new(key.as_bytes(), SequenceNumber::new(next_seq));
                match table.get(&lookup) {
                    Some(Some(value)) => info(&format!("{key} = {}", String::from_utf8_lossy(&value))),
                    Some(None) => warn(&format!("key deleted: {key}")),
                    None => warn(&format!("key not found: {key}")),
                }
            }
            ["del", key] => {
                let seq = SequenceNumber::new(next_seq);
                next_seq += 1;
                table.add(seq, ValueType::Deletion, key.as_bytes(), b"");
                success(&format!("deleted: {key}"));
            }
            ["quit"] | ["exit"] => break,
            [] => continue,
            _ => warn(&format!("unrecognized command: {line}")),
        }
        let _ = io::stdout().flush();
    }
}

fn success(msg: &str) {
    println!("{} {}", "\u{2714}".bright_green().bold(), msg.normal());
}

fn warn(msg: &str) {
    eprintln!("{} {}", "\u{26a0}".bright_yellow().bold(), msg.yellow());
}

fn info(msg: &str) {
    println!("{} {}", "\u{27a4}".bright_cyan().bold(), msg.cyan());
}
