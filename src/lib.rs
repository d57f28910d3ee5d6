//! Backend of the WTFToday daily brief: settings, per-source adapters, the
//! coalescing cache and the command surface the desktop UI calls.

#[cfg(feature = "desktop")]
pub mod commands;
pub mod database;
pub mod dispatcher;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use dispatcher::{CommandDispatcher, COMMAND_SCHEMA_VERSION};
pub use error::{BriefError, Result};
