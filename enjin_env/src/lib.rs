//! Enjin Environment Abstraction Layer
//!
//! This crate provides the "Sans-IO" abstraction allowing the globe client
//! engines to run in both **Production** (tokio + HTTP) and **Simulation**
//! (virtual clock + in-memory feed) environments.
//!
//! # Core Concept: The Reactor Pattern
//!
//! For deterministic testing, we intercept all I/O:
//! - Time (`now()`, `sleep()`)
//! - Tasks (`spawn()` returning an explicit, cancellable handle)
//! - Network (`FeedTransport::get()`)
//!
//! # Example
//!
//! ```ignore
//! use enjin_env::{EnjinContext, FeedTransport};
//!
//! async fn poll_loop<Ctx: EnjinContext, T: FeedTransport>(ctx: &Ctx, transport: &T) {
//!     loop {
//!         let response = transport.get(&request).await;
//!         ctx.sleep(Duration::from_secs(30)).await;
//!     }
//! }
//! ```

mod context;
mod error;
mod http;
mod manual;
mod tokio_impl;
mod transport;
mod types;

pub use context::EnjinContext;
pub use error::EnvError;
pub use http::HttpTransport;
pub use manual::ManualContext;
pub use tokio_impl::TokioContext;
pub use transport::FeedTransport;
pub use types::{FeedRequest, ResponseEnvelope, TaskHandle};
