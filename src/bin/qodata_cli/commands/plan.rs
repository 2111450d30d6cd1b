use anyhow::Result;

use crate::context::Context;

pub fn execute(context: &Context, url: &str) -> Result<()> {
    context.require_schema()?;
    let plan = context.engine().query_url(url)?;
    println!("{}", context.formatter().format_plan(&plan)?);
    Ok(())
}
