//! Typed events produced by the line parser.
//!
//! Every inbound protocol line is classified into exactly one [`EventData`]
//! variant. [`EventKind`] is the plain discriminant used for module
//! capability sets and dispatch routing, so routing is an exhaustive match
//! rather than any kind of runtime type inspection.

use std::collections::HashMap;

use crate::connection::ConnectionHandle;

/// Protocol tag key/value pairs from the `@key=value;...` block.
pub type Tags = HashMap<String, String>;

/// Discriminant for event routing and module capability sets.
///
/// `Raw` is not produced by the parser: it names the unconditional
/// every-event capability, i.e. a handler that wants `on_raw` for all
/// traffic regardless of variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Raw,
    Message,
    Join,
    Part,
    Mode,
    Names,
    ClearChat,
    ClearMessage,
    HostTarget,
    Notice,
    Reconnect,
    RoomState,
    UserState,
    GlobalUserState,
    UserNotice,
    Ritual,
    BitBadgeUpgrade,
    Raid,
    Subscriber,
    GiftedSubscriber,
    Whisper,
    Privmsg,
    Command,
}

/// A chat-bearing payload: channel, sender display name, message text and
/// the full tag map. Shared by PRIVMSG, WHISPER, NOTICE, CLEARMSG and the
/// USERNOTICE family.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Chat {
    pub channel: String,
    pub sender: String,
    pub text: String,
    pub tags: Tags,
}

/// A JOIN or PART membership change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Membership {
    pub channel: String,
    pub nick: String,
}

/// A MODE change applied to a user in a channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModeChange {
    pub channel: String,
    pub modes: String,
    pub nick: String,
}

/// A NAMES (353) reply listing channel occupants.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamesReply {
    pub channel: String,
    pub names: Vec<String>,
}

/// A CLEARCHAT action. `target` is empty when the whole channel was cleared.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Moderation {
    pub channel: String,
    pub target: String,
    pub tags: Tags,
}

/// A HOSTTARGET notification. `target` is `-` when hosting stops.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostTarget {
    pub channel: String,
    pub target: String,
}

/// A ROOMSTATE or USERSTATE update for one channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateChange {
    pub channel: String,
    pub tags: Tags,
}

/// A GLOBALUSERSTATE update; carries no channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalState {
    pub tags: Tags,
}

/// A PRIVMSG whose text starts with the configured activator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandMessage {
    pub channel: String,
    pub sender: String,
    pub text: String,
    /// First whitespace-delimited token after the activator prefix.
    pub keyword: String,
    pub tags: Tags,
}

/// Anything classifiable only generically: the unparsed line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawLine {
    pub line: String,
}

/// The closed set of parsed event variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventData {
    Message(RawLine),
    Join(Membership),
    Part(Membership),
    Mode(ModeChange),
    Names(NamesReply),
    ClearChat(Moderation),
    ClearMessage(Chat),
    HostTarget(HostTarget),
    Notice(Chat),
    Reconnect,
    RoomState(StateChange),
    UserState(StateChange),
    GlobalUserState(GlobalState),
    UserNotice(Chat),
    Ritual(Chat),
    BitBadgeUpgrade(Chat),
    Raid(Chat),
    Subscriber(Chat),
    GiftedSubscriber(Chat),
    Whisper(Chat),
    Privmsg(Chat),
    Command(CommandMessage),
}

impl EventData {
    pub fn kind(&self) -> EventKind {
        match self {
            EventData::Message(_) => EventKind::Message,
            EventData::Join(_) => EventKind::Join,
            EventData::Part(_) => EventKind::Part,
            EventData::Mode(_) => EventKind::Mode,
            EventData::Names(_) => EventKind::Names,
            EventData::ClearChat(_) => EventKind::ClearChat,
            EventData::ClearMessage(_) => EventKind::ClearMessage,
            EventData::HostTarget(_) => EventKind::HostTarget,
            EventData::Notice(_) => EventKind::Notice,
            EventData::Reconnect => EventKind::Reconnect,
            EventData::RoomState(_) => EventKind::RoomState,
            EventData::UserState(_) => EventKind::UserState,
            EventData::GlobalUserState(_) => EventKind::GlobalUserState,
            EventData::UserNotice(_) => EventKind::UserNotice,
            EventData::Ritual(_) => EventKind::Ritual,
            EventData::BitBadgeUpgrade(_) => EventKind::BitBadgeUpgrade,
            EventData::Raid(_) => EventKind::Raid,
            EventData::Subscriber(_) => EventKind::Subscriber,
            EventData::GiftedSubscriber(_) => EventKind::GiftedSubscriber,
            EventData::Whisper(_) => EventKind::Whisper,
            EventData::Privmsg(_) => EventKind::Privmsg,
            EventData::Command(_) => EventKind::Command,
        }
    }

    /// Channel the event belongs to, when it carries one.
    pub fn channel(&self) -> Option<&str> {
        match self {
            EventData::Message(_) | EventData::Reconnect | EventData::GlobalUserState(_) => None,
            EventData::Join(m) | EventData::Part(m) => Some(&m.channel),
            EventData::Mode(m) => Some(&m.channel),
            EventData::Names(n) => Some(&n.channel),
            EventData::ClearChat(m) => Some(&m.channel),
            EventData::HostTarget(h) => Some(&h.channel),
            EventData::RoomState(s) | EventData::UserState(s) => Some(&s.channel),
            EventData::ClearMessage(c)
            | EventData::Notice(c)
            | EventData::UserNotice(c)
            | EventData::Ritual(c)
            | EventData::BitBadgeUpgrade(c)
            | EventData::Raid(c)
            | EventData::Subscriber(c)
            | EventData::GiftedSubscriber(c)
            | EventData::Whisper(c)
            | EventData::Privmsg(c) => Some(&c.channel),
            EventData::Command(c) => Some(&c.channel),
        }
    }

    /// Sender display name for chat-bearing variants.
    pub fn sender(&self) -> Option<&str> {
        match self {
            EventData::ClearMessage(c)
            | EventData::Notice(c)
            | EventData::UserNotice(c)
            | EventData::Ritual(c)
            | EventData::BitBadgeUpgrade(c)
            | EventData::Raid(c)
            | EventData::Subscriber(c)
            | EventData::GiftedSubscriber(c)
            | EventData::Whisper(c)
            | EventData::Privmsg(c) => Some(&c.sender),
            EventData::Command(c) => Some(&c.sender),
            EventData::Join(m) | EventData::Part(m) => Some(&m.nick),
            _ => None,
        }
    }

    /// Whether this variant counts toward the per-channel event counter.
    /// Keep-alive probes never get here and pure control frames are excluded.
    pub fn counts_as_traffic(&self) -> bool {
        matches!(
            self.kind(),
            EventKind::UserState
                | EventKind::GlobalUserState
                | EventKind::UserNotice
                | EventKind::Ritual
                | EventKind::BitBadgeUpgrade
                | EventKind::Raid
                | EventKind::Subscriber
                | EventKind::GiftedSubscriber
                | EventKind::Whisper
                | EventKind::Privmsg
                | EventKind::Command
        )
    }
}

/// A parsed event plus the handle of the connection that produced it.
///
/// The handle is used to reply (`say`, `send_raw`) or adjust channel
/// membership; it never moves the event to another shard. Events are
/// immutable once constructed.
#[derive(Debug, Clone)]
pub struct Event {
    pub conn: ConnectionHandle,
    pub data: EventData,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        self.data.kind()
    }

    pub fn channel(&self) -> Option<&str> {
        self.data.channel()
    }

    pub fn sender(&self) -> Option<&str> {
        self.data.sender()
    }
}
