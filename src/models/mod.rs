//! Reference model implementations.
//!
//! - [`EmbeddingModel`]: lookup embeddings scored by a
//!   [`ScoringFunction`](crate::scoring::ScoringFunction)

pub mod embedding;

pub use embedding::{EmbeddingModel, LpRegularizer};
