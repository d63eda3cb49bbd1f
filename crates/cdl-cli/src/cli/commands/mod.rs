//! CLI command handlers, one file per command.

mod control;
mod run;
mod status;
mod submit;

pub use control::run_control;
#[cfg(test)]
pub use control::apply_offline;
pub use run::run_engine;
#[cfg(test)]
pub use run::describe_event;
pub use status::run_status;
pub use submit::run_submit;
