pub mod archive;
pub mod config;
pub mod deploy;
pub mod descriptor;
pub mod error;
pub mod io;
pub mod manager;
pub mod ordering;
pub mod paths;
pub mod pipeline;
pub mod placement;
pub mod process;
pub mod record;
pub mod register;
pub mod remove;
pub mod reregister;
pub mod starter;
pub mod startup;
pub mod state;
pub mod types;
pub mod validator;

#[cfg(test)]
mod testing;

pub use error::{ComponentError, ErrorKind, Result};
