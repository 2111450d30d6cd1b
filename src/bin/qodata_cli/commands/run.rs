use anyhow::Result;
use log::debug;

use qodata::core::store::Executor;
use qodata::engine::replace_skiptoken;

use crate::context::Context;

/// Compile a URL, run it against the in-memory data and print the rows
/// with the link to the next page, if any
pub fn execute(context: &Context, url: &str) -> Result<()> {
    context.require_schema()?;
    let plan = context.engine().query_url(url)?;
    let result = context.store().fetch(&plan)?;

    let next_link = result.next_skiptoken.as_deref()
        .map(|token| replace_skiptoken(url, Some(token)))
        .transpose()?;
    debug!("{} row(s), next link {:?}", result.rows.len(), next_link);

    println!("{}", context.formatter().format_result(&result, next_link.as_deref())?);
    Ok(())
}
