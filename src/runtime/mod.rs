//! Module containing the execution machinery for graphs.
//!
//! A [`Backend`](backend::Backend) executes single primitive ops on concrete
//! values; the [`InferenceSession`](session::InferenceSession) drives it over
//! a graph, binding placeholders and evaluating control flow.

pub mod backend;
pub mod cpu_backend;
pub mod session;

pub use backend::{Backend, RuntimeError};
pub use cpu_backend::CpuBackend;
pub use session::InferenceSession;
