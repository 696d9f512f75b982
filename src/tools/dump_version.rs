use anyhow::Result;
use hkx_rs::TagFile;

pub fn dump_version(file: &TagFile) -> Result<()> {
    match &file.sdk_version {
        Some(version) => println!("{version}"),
        None => println!("<no SDKV section>"),
    }
    Ok(())
}
