// src/lib.rs

//! sitewatch: website change monitoring library

pub mod error;
pub mod models;
pub mod pipeline;
pub mod registry;
pub mod scheduler;
pub mod services;
pub mod storage;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;

pub use scheduler::Monitor;
