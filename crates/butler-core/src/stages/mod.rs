//! Provisioning stages.
//!
//! Each stage splits into `observe` (read-only look at the host) and `plan`
//! (a pure function of the desired config and the observation that yields
//! the [`Plan`](crate::action::Plan) to apply).

pub mod audio;
pub mod models;
pub mod packages;
pub mod runtime;
pub mod service;
