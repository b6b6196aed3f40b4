//! Dual Workers
//!
//! - [`Speaker`]: the user-facing worker whose tokens stream to the client
//! - [`Executive`]: the background worker that checks the Speaker against
//!   the knowledge graph and may call for an interruption

mod executive;
mod speaker;

pub use executive::{EvalAction, EvalVerdict, Executive};
pub use speaker::Speaker;
