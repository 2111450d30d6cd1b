use anyhow::Result;

use crate::context::Context;

/// Print the request descriptor of a URL; needs no schema
pub fn execute(context: &Context, url: &str) -> Result<()> {
    let request = context.engine().parser().parse(url)?;
    println!("{}", context.formatter().format_request(&request)?);
    Ok(())
}
