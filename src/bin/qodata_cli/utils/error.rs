use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("No schema loaded; pass --schema <service.json>")]
    NoSchema,

    #[error("Unknown command: .{0} (try .help)")]
    UnknownCommand(String),

    #[error("Usage: {0}")]
    Usage(&'static str),

    #[error("Unknown format: {0}")]
    UnknownFormat(String),
}
