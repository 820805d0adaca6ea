//! # Graph Analysis Module
//!
//! Static checks applied while a graph is being built.
//!
//! ## Available Passes
//!
//! - [`ShapeInference`](shape_inference::ShapeInference): infers the dtype and
//!   shape of every op output and rejects incompatible operands before
//!   anything is executed.
//!
//! ## How It Works
//!
//! ```text
//! op + operand metadata -> ShapeInference::infer_op -> output metadata
//! ```
//!
//! `ShapeInference::run` replays inference over a whole graph, which is how
//! dtype conversions propagate to computed variables.

pub mod shape_inference;
