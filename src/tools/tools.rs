mod dump_items;
use dump_items::dump_items;
mod dump_types;
use dump_types::dump_types;
mod dump_value;
use dump_value::dump_value;
mod dump_version;
use dump_version::dump_version;

use hkx_rs::TagFile;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

/// Parse HKX tag files and output their data
#[derive(Clone, Debug, Parser)]
struct Args {
    /// input filename to parse
    input: PathBuf,
    /// operation to execute, defaults to dump-value
    #[command(subcommand)]
    operation: Option<Operation>,
}

#[derive(Clone, Debug, Subcommand)]
enum Operation {
    /// Decode the root object and write the value tree as JSON
    DumpValue(DumpValueArgs),
    /// Print the reconstructed type dictionary
    DumpTypes,
    /// Print the item table
    DumpItems,
    /// Print the SDK version string
    DumpVersion,
}

#[derive(Clone, Debug, Parser)]
struct DumpValueArgs {
    /// output filename, defaults to stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let input = std::fs::read(&args.input)?;
    let file = TagFile::read(&input)?;

    match args.operation {
        None => dump_value(&file, &DumpValueArgs { output: None }),
        Some(Operation::DumpValue(value_args)) => dump_value(&file, &value_args),
        Some(Operation::DumpTypes) => dump_types(&file),
        Some(Operation::DumpItems) => dump_items(&file),
        Some(Operation::DumpVersion) => dump_version(&file),
    }
}
