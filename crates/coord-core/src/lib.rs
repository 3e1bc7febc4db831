pub mod action;
pub mod admission;
pub mod config;
pub mod coordinator;
pub mod dataset;
pub mod dependency;
pub mod error;
pub mod expr;
pub mod input_check;
pub mod io;
pub mod job;
pub mod lifecycle;
pub mod location;
pub mod materialize;
pub mod paths;
pub mod store;
pub mod submission;
pub mod time;
pub mod types;

pub use coordinator::Coordinator;
pub use error::{CoordError, Result};
