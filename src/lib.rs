//! formstream - conversational form session client library
//!
//! This library keeps a client-side view of a conversational form session
//! live: it streams session events from the server, folds them into an
//! immutable session snapshot, validates collected field values against
//! the agent's schema, and survives connection drops and capability
//! fallbacks without losing or reordering state.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `schema`: Field definitions, kinds, and values
//! - `validation`: The field validation engine and its rule table
//! - `stream`: Transports (WebSocket, SSE), the wire envelope, and the
//!   reconnecting stream transport
//! - `session`: Session state, the pure event reconciler, and the
//!   per-session orchestrator
//! - `api`: The REST collaborator (fetch/create/restart/complete, and the
//!   degraded outbound message path)
//! - `config`: Configuration management and validation
//! - `error`: Error types and result aliases
//! - `cli`: Command-line interface definition
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use formstream::session::orchestrator::{OrchestratorOptions, SessionOrchestrator};
//! use formstream::stream::sse::SseConnector;
//! use formstream::stream::websocket::WebSocketConnector;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let base_url = url::Url::parse("https://forms.example.com/api/")?;
//!     let headers = std::collections::HashMap::new();
//!
//!     let primary = Arc::new(WebSocketConnector::new(base_url.clone(), headers.clone()));
//!     let fallback = Arc::new(SseConnector::new(
//!         base_url,
//!         headers,
//!         std::time::Duration::from_secs(30),
//!     ));
//!
//!     let (orchestrator, mut views, mut events) = SessionOrchestrator::activate(
//!         "sess-1",
//!         primary,
//!         fallback,
//!         None,
//!         OrchestratorOptions::default(),
//!     );
//!
//!     views.changed().await?;
//!     println!("{:?}", views.borrow().session);
//!     orchestrator.deactivate();
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod schema;
pub mod session;
pub mod stream;
pub mod validation;

// Re-export commonly used types
pub use api::SessionApi;
pub use config::Config;
pub use error::{FormStreamError, Result};
pub use schema::{AgentField, FieldKind, FieldValue};
pub use session::orchestrator::{SessionEvent, SessionOrchestrator, SessionView};
pub use session::state::{Session, SessionStatus};
pub use stream::message::StreamMessage;
pub use validation::Verdict;
