pub mod args;
pub mod batch;
pub mod cmd;
pub mod config;
mod error;
pub mod events;
pub mod formats;
pub mod journal;
pub mod paths;
pub mod runner;
pub mod tools;
pub mod urls;
pub mod worker;

pub use error::{EngineError, Result};
