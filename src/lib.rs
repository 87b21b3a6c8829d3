//! # pesit-engine
//!
//! PeSIT file-transfer protocol engine for the direct TCP/IP profile.
//!
//! The crate covers both roles of a PeSIT exchange:
//!
//! - **Server**: accepts connections, drives one [`Session`] state machine
//!   per connection, and stores received files through a [`store::FileStore`]
//! - **Requester**: [`Client`] connects, sends or fetches files, and sends
//!   free-text messages
//!
//! ## Layers
//!
//! - [`catalog`] and [`diagnostic`]: closed tables of parameters, message
//!   types and diagnostic codes
//! - [`protocol`]: frame header, TLV parameters, the [`protocol::Fpdu`]
//!   value model and its codec
//! - [`session`]: the transition table, transfer context and validation
//! - [`server`], [`client`], [`writer`]: tokio transport
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use pesit_engine::{Config, LocalFileStore, Server};
//!
//! #[tokio::main]
//! async fn main() -> pesit_engine::Result<()> {
//!     let config = Config::load("pesit.toml")?;
//!     pesit_engine::config::init_logging(&config.logging);
//!
//!     let store = Arc::new(LocalFileStore::new("/var/spool/pesit"));
//!     Server::from_config(&config, store).run().await
//! }
//! ```

pub mod catalog;
pub mod client;
pub mod config;
pub mod diagnostic;
pub mod directory;
pub mod error;
pub mod journal;
pub mod protocol;
pub mod server;
pub mod session;
pub mod store;
pub mod writer;

pub use client::{Client, ClientBuilder, TransferOutcome};
pub use config::Config;
pub use diagnostic::Diagnostic;
pub use error::{PesitError, Result};
pub use server::Server;
pub use session::{Session, SessionEnv, SessionState, Step};
pub use store::{FileStore, LocalFileStore, MemoryFileStore};
