//! Catalog services backed by a shared resource cache.
//!
//! A [`CatalogSession`](session::CatalogSession) ties everything together: it loads the object
//! store, owns the session's [`ResourceCache`](catalog_cache::ResourceCache), and hands out the
//! settings service and the Voila preview loader that read through it.

pub mod config;
pub mod logging;
pub mod preview;
pub mod session;
pub mod settings;
pub mod store;

pub use catalog_cache;
