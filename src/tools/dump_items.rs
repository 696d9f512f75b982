use anyhow::Result;
use hkx_rs::TagFile;

pub fn dump_items(file: &TagFile) -> Result<()> {
    for (ordinal, item) in file.items.iter().enumerate() {
        match item.typ {
            None => println!("{ordinal:4} <null>"),
            Some(typ) => println!(
                "{ordinal:4} type={} flags={:#04X} offset={:#X} count={}",
                file.types.render_name(typ),
                item.flags.into_raw(),
                item.offset,
                item.count,
            ),
        }
    }
    Ok(())
}
