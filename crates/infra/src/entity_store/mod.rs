//! Entity store boundary.
//!
//! The pipeline reads websites, articles and ads to build job payloads, writes
//! content rows for content-insert jobs, and keeps the website/article links
//! that publishes record and removals drop.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryEntityStore;
pub use postgres::PostgresEntityStore;
pub use r#trait::{EntityStore, StoreError};
