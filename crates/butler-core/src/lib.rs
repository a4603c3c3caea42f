pub mod action;
pub mod config;
pub mod context;
pub mod error;
pub mod host;
pub mod io;
pub mod paths;
pub mod pipeline;
pub mod runner;
pub mod stages;
pub mod state;

pub use context::Context;
pub use error::{ButlerError, Result};
pub use pipeline::{Pipeline, RunReport, RunState, Stage};
