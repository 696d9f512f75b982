use crate::DumpValueArgs;

use std::fs::File;
use std::io::Write;

use anyhow::Result;
use hkx_rs::TagFile;

pub fn dump_value(file: &TagFile, args: &DumpValueArgs) -> Result<()> {
    let tree = file.deserialize_root()?;
    let json = tree.to_json();
    match &args.output {
        Some(path) => {
            serde_json::to_writer_pretty(File::create(path)?, &json)?;
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            serde_json::to_writer_pretty(&mut stdout, &json)?;
            writeln!(stdout)?;
        }
    }
    Ok(())
}
