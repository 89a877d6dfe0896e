//! # Registry
//!
//! Dynamic resources (sequences, JSON documents, text) held in an external
//! registry and cached locally.
//!
//! ## Architecture
//!
//! ```text
//! Registry Infrastructure
//! ├── Registry          (backend trait: metadata + content lookups)
//! ├── InMemoryRegistry  (versioned in-process backend)
//! ├── MapperRegistry    (content type -> ResourceMapper)
//! └── RegistryCache     (expiry-and-revalidate cache, key-scoped locks)
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use synapse_core::registry::{InMemoryRegistry, MapperRegistry, RegistryCache};
//! use std::sync::Arc;
//!
//! let registry = Arc::new(InMemoryRegistry::new());
//! registry.put("conf:/greeting", "text/plain", "hello");
//!
//! let cache = RegistryCache::new(registry, MapperRegistry::with_builtin());
//! let greeting = cache.get_resource("conf:/greeting").unwrap();
//! assert_eq!(greeting.as_text(), Some("hello"));
//! ```

pub mod cache;
pub mod entry;
pub mod errors;
pub mod in_memory;
pub mod mapper;
pub mod objects;
pub mod traits;

pub use cache::{RegistryCache, RegistryCacheStats};
pub use entry::{Entry, RegistryEntry};
pub use errors::{RegistryError, RegistryResult};
pub use in_memory::InMemoryRegistry;
pub use mapper::{
    JsonMapper, MapperRegistry, SequenceMapper, TextMapper, JSON_CONTENT_TYPE,
    SEQUENCE_CONTENT_TYPE, TEXT_CONTENT_TYPE,
};
pub use objects::RegistryObject;
pub use traits::{RawResource, Registry, ResourceMapper};
