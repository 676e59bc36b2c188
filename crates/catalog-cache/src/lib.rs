//! Keyed async resource caching for the catalog.
//!
//! A [`Resource`] describes how to fetch a value and how to derive its cache key from the fetch
//! input. Resources are registered with [`create_resource`], which hands out a [`Handle`] that is
//! used for every subsequent [`ResourceCache`] operation.
//!
//! The [`ResourceCache`] provides request coalescing: concurrent requests for the same key share
//! a single in-flight fetch. Results, successful or not, are kept until the cache is cleared.

#![warn(missing_docs)]

#[macro_use]
pub mod metrics;

mod cache;
mod defer;
mod entry;
mod error;
mod resource;

pub use cache::*;
pub use entry::*;
pub use error::*;
pub use resource::*;
