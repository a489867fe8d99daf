//! A sharded async Twitch chat (TMI) client framework.
//!
//! The client partitions a channel list across multiple concurrent
//! connections to the chat server, parses inbound protocol lines into typed
//! events and fans them out to a host [`EventHandler`] and to runtime-loaded
//! [`Module`]s.
//!
//! ```no_run
//! use std::sync::Arc;
//! use shoal::{Client, ClientConfig, DefaultHandler};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     shoal::logging::init();
//!     let config = ClientConfig::load()?;
//!     let client = Client::new(config, Arc::new(DefaultHandler));
//!     client.run().await
//! }
//! ```

pub mod client;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod logging;
pub mod module;
pub mod protocol;

pub use client::Client;
pub use config::ClientConfig;
pub use connection::{ConnectionError, ConnectionHandle, ConnectionSettings, ConnectionState};
pub use dispatch::{DefaultHandler, Dispatcher, EventHandler};
pub use module::{Module, ModuleError, ModuleRegistry};
pub use protocol::{
    parse_line, Chat, CommandMessage, Event, EventData, EventKind, GlobalState, HostTarget,
    Membership, ModeChange, Moderation, NamesReply, RawLine, StateChange, Tags,
};
