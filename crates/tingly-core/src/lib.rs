//! The request pipeline: HTTP surface, authentication seam, protocol
//! adaptation, upstream forwarding (buffered and streaming), and usage
//! recording.

pub mod auth;
pub mod config;
pub mod count_tokens;
pub mod error;
pub mod handlers;
pub mod obs;
pub mod pipeline;
pub mod routes;
pub mod state;

pub use auth::{AuthError, AuthProvider, NoopAuth, StaticTokenAuth};
pub use config::{GatewayConfig, ModelCap, SharedConfig};
pub use error::GatewayError;
pub use obs::ScenarioSink;
pub use routes::app;
pub use state::AppState;
