//! Pure adapters between the chat protocols.
//!
//! Every function in this crate is a transformation over `tingly-protocol`
//! data: no IO, no clocks (callers pass timestamps in), no global state. The
//! streaming converters are explicit state machines so they can be unit
//! tested event-by-event.

pub mod generate;
pub mod proto;
pub mod stream;
pub mod stream2nostream;
pub mod tokens;

pub use proto::{Proto, TransformError};
pub use stream::{ChatStreamEvent, StreamAdapter, UsageTally};
pub use tokens::TokenBudget;
