//! Core types for the CheckUser event-query and retention engine.
//!
//! This crate holds everything that does not touch a database: the IP range
//! key codec, the static description of the three event logs, target
//! classification, configuration, and the collaborator traits implemented by
//! storage backends (e.g. `checkuser-store-sqlite`).

// Native `async fn` in traits; the returned futures are declared `Send`
// explicitly where it matters.
#![allow(async_fn_in_trait)]

pub mod client_hints;
pub mod column;
pub mod config;
pub mod error;
pub mod event;
pub mod range_key;
pub mod source;
pub mod target;

pub use error::{Error, Result};
