//! Console variable and command registry.
//!
//! This is the one piece of process-wide state the recorder keeps: a registry
//! of typed, named settings plus a command table, accessed by name from the
//! capture/main thread and handed to extensions as opaque keys. Everything
//! else is owned by the session for its lifetime.

mod args;
mod vars;

pub use args::CommandArgs;
pub use vars::{registry, Bounds, CommandHandler, Registry, Variable};
