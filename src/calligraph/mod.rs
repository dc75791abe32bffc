//! The bulk media pipeline: manifest in, matched and uploaded images out.

pub mod loader;
pub mod manifest;
pub mod matcher;
pub mod models;
pub mod progress;
pub mod reference;
pub mod report;
pub mod scheduler;
pub mod settings;
pub mod transform;
pub mod validate;

#[cfg(test)]
pub mod testing;
