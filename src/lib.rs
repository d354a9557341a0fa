pub mod core;
pub mod db;
pub mod facades;
pub mod plugins;

#[cfg(test)]
pub mod testutil;

pub use crate::core::error::MigrateError;
pub use crate::facades::FacadeBundle;
