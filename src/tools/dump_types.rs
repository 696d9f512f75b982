use anyhow::Result;
use hkx_rs::types::flag::opt;
use hkx_rs::TagFile;

pub fn dump_types(file: &TagFile) -> Result<()> {
    let types = &file.types;
    for (id, ty) in types.iter() {
        println!("{:4} {}", id.as_u32(), types.render_name(id));
        if let Some(parent) = ty.parent {
            println!("     parent    {}", types.render_name(parent));
        }
        if let Some(format) = ty.format {
            println!("     format    {format:#010X}");
        }
        if let Some(subtype) = ty.subtype {
            println!("     subtype   {}", types.render_name(subtype));
        }
        if let Some(version) = ty.version {
            println!("     version   {version}");
        }
        if let Some(sa) = ty.size_align {
            println!("     size      {} align {}", sa.size, sa.align);
        }
        if let Some(flags) = ty.flags {
            println!("     flags     {flags:#06X}");
        }
        if let Some(attribute) = ty.attribute {
            println!("     attribute {attribute}");
        }
        if ty.opts & opt::FIELDS != 0 {
            for field in &ty.fields {
                match (&field.name, field.typ) {
                    (Some(name), Some(typ)) => println!(
                        "     field     {name}: {} @ {}",
                        types.render_name(typ),
                        field.offset
                    ),
                    (Some(name), None) => println!("     field     {name}: ? @ {}", field.offset),
                    (None, _) => println!("     field     <placeholder>"),
                }
            }
        }
        for interface in &ty.interfaces {
            println!(
                "     interface {}: {}",
                interface.name,
                types.render_name(interface.typ)
            );
        }
    }
    Ok(())
}
