//! Hybrid memory sub-system: tiered store, dual indices, decay.

pub mod bm25;
pub mod hub;
pub mod vector_index;

pub use bm25::{tokenize, Bm25Index};
pub use hub::{DecaySweep, MemoryHub};
pub use vector_index::VectorIndex;
