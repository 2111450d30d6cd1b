pub mod list;
pub mod parse;
pub mod plan;
pub mod run;
