pub mod collab;
pub mod config;
pub mod cost;
pub mod error;
pub mod geometry;
pub mod io;
pub mod limits;
pub mod outcome;
pub mod pending;
pub mod pricing;
pub mod schedule;
pub mod types;
pub mod union;
pub mod workflow;

pub use error::{ClaimFeeError, Result};
