//! Microlock CLI
//!
//! Command line front end for locks on an etcd cluster: one-shot `lock`,
//! `unlock`, `renew` and `status`, plus long-running `watch` and `hold`.

pub mod cli;
pub mod commands;
pub mod error;
pub mod logging;
pub mod settings;

pub use cli::{Cli, Command};
pub use error::CliError;
pub use settings::Settings;
