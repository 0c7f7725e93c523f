//! Model domain: architectures, restore and scoring.

pub mod domain;
pub mod networks;
pub mod service;

pub use domain::{Model, NetworkFn};
