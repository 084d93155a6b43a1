//! Wake word model discovery and lookup.

pub mod builtin;
pub mod catalog;
pub mod custom;

pub use builtin::BuiltinModel;
pub use catalog::{ModelCatalog, ModelMetadata, ModelRef};
pub use custom::CustomModel;
