//! # samediff: symbolic computation graphs with automatic differentiation
//!
//! A graph is built symbolically through a [`SameDiff`] handle: placeholders
//! receive data at execution time, constants and trainable variables carry
//! their own arrays, and every op appends a new variable. Gradients of the
//! loss variables are derived as a second graph, and a training configuration
//! drives minibatch fitting with an updater.
//!
//! ## Usage Example
//!
//! ```no_run
//! use samediff::{DType, SameDiff, Value};
//! use std::collections::HashMap;
//!
//! # fn main() -> samediff::Result<()> {
//! let sd = SameDiff::create();
//! let x = sd.placeholder("x", DType::F64, &[-1, 3])?;
//! let w = sd.var("w", Value::from_f64(&[3, 1], vec![0.1, 0.2, 0.3]).unwrap())?;
//! let y = x.mmul(&w)?.tanh()?;
//! let loss = y.sum_all()?.rename("loss")?;
//! loss.mark_as_loss()?;
//!
//! let mut feeds = HashMap::new();
//! feeds.insert("x".to_string(), Value::ones(DType::F64, &[2, 3]));
//! let grads = sd.calculate_gradients(&feeds, &["w"])?;
//! println!("dL/dw = {}", grads["w"]);
//! # Ok(())
//! # }
//! ```

pub mod analysis;
pub mod autograd;
pub mod control_flow;
pub mod data;
pub mod error;
pub mod graph;
pub mod init;
pub mod losses;
pub mod metrics;
pub mod optimizers;
pub mod runtime;
pub mod serialization;
pub mod tensor;
pub mod train;
pub mod validation;

pub use error::{Error, Result};
pub use graph::{DType, Graph, OpKind, Value, Variable, VariableType};
pub use tensor::{SameDiff, Tensor};
pub use train::{History, TrainingConfig};
