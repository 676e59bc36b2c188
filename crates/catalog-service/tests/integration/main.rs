// See <https://matklad.github.io/2021/02/27/delete-cargo-integration-tests.html>

pub mod settings;
pub mod utils;
pub mod voila;

pub use utils::*;
