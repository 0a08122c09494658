//! Storage backends implementing the `domain::ports` traits.
//!
//! Each backend is a concrete type per entity family ("class inheritance
//! maps to an interface per entity family; the polymorphism set is the
//! atomic multi-row operations" — spec.md §9). `sqlite` is the durable
//! default; `memory` backs the test suite and demonstrates that the core
//! never depends on `sqlx` directly.

pub mod memory;
pub mod sqlite;
