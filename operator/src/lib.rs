pub mod aggregate;
pub mod conditions;
pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod event;
pub mod function;
pub mod host;
pub mod jobs;
pub mod packages;
pub mod reconcile;
pub mod resolver;
pub mod router;
pub mod siblings;
pub mod sink;
pub mod store;
pub mod synthesize;
pub mod templates;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::{Error, Result};
