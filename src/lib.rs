// lib.rs - checkpoint evaluation service
pub mod checkpoint;
pub mod common;
pub mod data;
pub mod evaluation;
pub mod model;

pub use common::{EvalConfig, EvalError, EvalResult};
pub use evaluation::{build_poller, Poller};
