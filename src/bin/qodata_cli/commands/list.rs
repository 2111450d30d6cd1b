use anyhow::Result;

use crate::context::Context;

/// List entity sets with their type names and access flags
pub fn execute(context: &Context) -> Result<()> {
    context.require_schema()?;
    let sets: Vec<(String, String)> = context.registry().entities()
        .map(|entity| {
            let mut flags = Vec::new();
            if entity.access.browsable {
                flags.push("browse");
            }
            if entity.access.expandable {
                flags.push("expand");
            }
            if entity.access.modifiable {
                flags.push("modify");
            }
            (entity.set_name().to_string(), format!("{} [{}]", entity.name, flags.join(",")))
        })
        .collect();

    println!("{}", context.formatter().format_sets(&sets)?);
    Ok(())
}
