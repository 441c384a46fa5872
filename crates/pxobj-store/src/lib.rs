//! Durable object and metadata store.
//!
//! One store instance exclusively owns a data directory. Metadata is a
//! single JSON document swapped atomically via rename; object bodies are
//! content files under `objects/<bucket>/`.

mod store;

pub use store::{ListPage, Store};
