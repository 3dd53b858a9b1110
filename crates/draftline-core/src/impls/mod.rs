//! In-memory port implementations for development and tests.

pub mod inmem_knowledge;
pub mod inmem_store;

pub use inmem_knowledge::InMemoryKnowledgeBase;
pub use inmem_store::InMemoryJobStore;
