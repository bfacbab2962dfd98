//! Backend Link - blocking request/response links to a text-command backend
//!
//! The backend speaks a tiny protocol over plain TCP: the first bytes on a
//! connection name a role (`reader` or `writer`), a writer then sends
//! discrete commands, and every reply that begins with `OK` is a success.
//! This crate has no HTTP dependencies and knows nothing about the front end
//! that drives it.
//!
//! All socket I/O here is blocking. The async entry points ([`BackendPool`]
//! and [`LinkHandle`]) move that work onto tokio's blocking pool so callers
//! on the event loop only ever await.
//!
//! # Example
//!
//! ```no_run
//! use backend_link::{BackendPool, LinkConfig, Role, is_success};
//!
//! #[tokio::main]
//! async fn main() {
//!     let pool = BackendPool::new(LinkConfig::default());
//!
//!     // Read-only query over a one-shot connection
//!     let dump = pool.one_shot(Role::Reader, None).await;
//!     println!("{dump}");
//!
//!     // Persistent writer link
//!     let link = pool.connect().await.unwrap();
//!     link.exchange(Role::Writer.tag()).await;
//!     if is_success(&link.exchange("start").await) {
//!         link.exchange("hello").await;
//!         link.exchange("stop").await;
//!     }
//!     link.close().await;
//! }
//! ```

mod error;
pub mod link;
mod pool;

pub use error::LinkError;
pub use link::{
    ExchangeOptions, LinkConfig, LinkHandle, LinkId, Role, SUCCESS_MARKER, TRANSPORT_ERROR_PREFIX,
    exchange, is_success, one_shot,
};
pub use pool::BackendPool;
