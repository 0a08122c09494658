//! Domain layer: core business models, errors, and storage-port traits.
//!
//! Contains no I/O and no framework dependencies beyond `serde`/`uuid`/`chrono` —
//! the polymorphism boundary between the core and its backends ("class inheritance
//! maps to an interface per entity family").

pub mod errors;
pub mod models;
pub mod ports;
