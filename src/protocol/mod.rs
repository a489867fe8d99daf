//! TMI wire protocol: typed events and the line parser.

pub mod event;
pub mod parser;

pub use event::{
    Chat, CommandMessage, Event, EventData, EventKind, GlobalState, HostTarget, Membership,
    ModeChange, Moderation, NamesReply, RawLine, StateChange, Tags,
};
pub use parser::parse_line;

/// Default chat server endpoint.
pub const TWITCH_HOST: &str = "irc.chat.twitch.tv";
pub const TWITCH_PORT: u16 = 6667;

/// Server keep-alive probe and its complement reply. A probe is answered
/// within the same read cycle and never reaches the parser.
pub const KEEPALIVE_PROBE: &str = "PING :tmi.twitch.tv";
pub const KEEPALIVE_REPLY: &str = "PONG :tmi.twitch.tv";

/// Capabilities requested during the handshake, in send order.
pub const CAPABILITIES: [&str; 3] = [
    "twitch.tv/membership",
    "twitch.tv/tags",
    "twitch.tv/commands",
];
