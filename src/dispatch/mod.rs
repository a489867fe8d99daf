//! Event fan-out.
//!
//! [`EventHandler`] is the callback surface shared by the host application
//! and by extension modules: one override-able async method per event kind,
//! every one a no-op by default, plus [`EventHandler::on_raw`] which sees
//! every event regardless of kind.
//!
//! [`Dispatcher`] delivers each parsed event to every loaded module with a
//! matching capability and then to the host, spawning one task per delivery
//! so a slow or failing handler never delays its siblings or the read loop
//! that submitted the event.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::error;

use crate::connection::ConnectionHandle;
use crate::module::{Module, ModuleRegistry};
use crate::protocol::{
    Chat, CommandMessage, Event, EventData, EventKind, GlobalState, HostTarget, Membership,
    ModeChange, Moderation, NamesReply, RawLine, StateChange,
};

/// Per-event-kind callbacks. Handlers return `Err` to report a failure; the
/// dispatcher logs it and carries on.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Called for every event, before the kind-specific callback.
    async fn on_raw(&self, _event: &Event) -> Result<()> {
        Ok(())
    }

    /// Called for lines classifiable only generically.
    async fn on_message(&self, _conn: &ConnectionHandle, _msg: &RawLine) -> Result<()> {
        Ok(())
    }

    async fn on_join(&self, _conn: &ConnectionHandle, _msg: &Membership) -> Result<()> {
        Ok(())
    }

    async fn on_part(&self, _conn: &ConnectionHandle, _msg: &Membership) -> Result<()> {
        Ok(())
    }

    async fn on_mode(&self, _conn: &ConnectionHandle, _msg: &ModeChange) -> Result<()> {
        Ok(())
    }

    async fn on_names(&self, _conn: &ConnectionHandle, _msg: &NamesReply) -> Result<()> {
        Ok(())
    }

    async fn on_clearchat(&self, _conn: &ConnectionHandle, _msg: &Moderation) -> Result<()> {
        Ok(())
    }

    async fn on_clearmessage(&self, _conn: &ConnectionHandle, _msg: &Chat) -> Result<()> {
        Ok(())
    }

    async fn on_hosttarget(&self, _conn: &ConnectionHandle, _msg: &HostTarget) -> Result<()> {
        Ok(())
    }

    async fn on_notice(&self, _conn: &ConnectionHandle, _msg: &Chat) -> Result<()> {
        Ok(())
    }

    async fn on_reconnect(&self, _conn: &ConnectionHandle) -> Result<()> {
        Ok(())
    }

    async fn on_roomstate(&self, _conn: &ConnectionHandle, _msg: &StateChange) -> Result<()> {
        Ok(())
    }

    async fn on_userstate(&self, _conn: &ConnectionHandle, _msg: &StateChange) -> Result<()> {
        Ok(())
    }

    async fn on_globaluserstate(&self, _conn: &ConnectionHandle, _msg: &GlobalState) -> Result<()> {
        Ok(())
    }

    async fn on_usernotice(&self, _conn: &ConnectionHandle, _msg: &Chat) -> Result<()> {
        Ok(())
    }

    async fn on_ritual(&self, _conn: &ConnectionHandle, _msg: &Chat) -> Result<()> {
        Ok(())
    }

    async fn on_bit_badge_upgrade(&self, _conn: &ConnectionHandle, _msg: &Chat) -> Result<()> {
        Ok(())
    }

    async fn on_raid(&self, _conn: &ConnectionHandle, _msg: &Chat) -> Result<()> {
        Ok(())
    }

    async fn on_subscriber(&self, _conn: &ConnectionHandle, _msg: &Chat) -> Result<()> {
        Ok(())
    }

    async fn on_gifted_subscriber(&self, _conn: &ConnectionHandle, _msg: &Chat) -> Result<()> {
        Ok(())
    }

    async fn on_whisper(&self, _conn: &ConnectionHandle, _msg: &Chat) -> Result<()> {
        Ok(())
    }

    async fn on_privmsg(&self, _conn: &ConnectionHandle, _msg: &Chat) -> Result<()> {
        Ok(())
    }

    async fn on_command(&self, _conn: &ConnectionHandle, _msg: &CommandMessage) -> Result<()> {
        Ok(())
    }
}

/// A host that overrides nothing. Useful when all behavior lives in modules.
pub struct DefaultHandler;

#[async_trait]
impl EventHandler for DefaultHandler {}

/// Route one event to the kind-specific callback of `handler`.
pub(crate) async fn deliver<H>(handler: &H, event: &Event) -> Result<()>
where
    H: EventHandler + ?Sized,
{
    let conn = &event.conn;
    match &event.data {
        EventData::Message(msg) => handler.on_message(conn, msg).await,
        EventData::Join(msg) => handler.on_join(conn, msg).await,
        EventData::Part(msg) => handler.on_part(conn, msg).await,
        EventData::Mode(msg) => handler.on_mode(conn, msg).await,
        EventData::Names(msg) => handler.on_names(conn, msg).await,
        EventData::ClearChat(msg) => handler.on_clearchat(conn, msg).await,
        EventData::ClearMessage(msg) => handler.on_clearmessage(conn, msg).await,
        EventData::HostTarget(msg) => handler.on_hosttarget(conn, msg).await,
        EventData::Notice(msg) => handler.on_notice(conn, msg).await,
        EventData::Reconnect => handler.on_reconnect(conn).await,
        EventData::RoomState(msg) => handler.on_roomstate(conn, msg).await,
        EventData::UserState(msg) => handler.on_userstate(conn, msg).await,
        EventData::GlobalUserState(msg) => handler.on_globaluserstate(conn, msg).await,
        EventData::UserNotice(msg) => handler.on_usernotice(conn, msg).await,
        EventData::Ritual(msg) => handler.on_ritual(conn, msg).await,
        EventData::BitBadgeUpgrade(msg) => handler.on_bit_badge_upgrade(conn, msg).await,
        EventData::Raid(msg) => handler.on_raid(conn, msg).await,
        EventData::Subscriber(msg) => handler.on_subscriber(conn, msg).await,
        EventData::GiftedSubscriber(msg) => handler.on_gifted_subscriber(conn, msg).await,
        EventData::Whisper(msg) => handler.on_whisper(conn, msg).await,
        EventData::Privmsg(msg) => handler.on_privmsg(conn, msg).await,
        EventData::Command(msg) => handler.on_command(conn, msg).await,
    }
}

/// Fans parsed events out to modules and the host.
pub struct Dispatcher {
    registry: Arc<ModuleRegistry>,
    host: Arc<dyn EventHandler>,
}

impl Dispatcher {
    pub fn new(registry: Arc<ModuleRegistry>, host: Arc<dyn EventHandler>) -> Self {
        Self { registry, host }
    }

    /// Schedule delivery of `event` to every compatible module handler and
    /// to the host. Module deliveries are submitted first (registry order),
    /// then the host's; each runs as its own task, so completion order is
    /// unspecified and a failure in one never reaches another.
    pub fn dispatch(&self, event: Event) {
        self.fan_out(event, true);
    }

    /// Deliver only the unconditional `on_raw` callbacks, skipping every
    /// kind-specific one. Used for traffic that is observed but not acted
    /// on, such as the client's own echoed messages.
    pub fn dispatch_raw(&self, event: Event) {
        self.fan_out(event, false);
    }

    fn fan_out(&self, event: Event, with_kind: bool) {
        let kind = event.kind();
        let event = Arc::new(event);

        for module in self.registry.snapshot() {
            let capabilities = module.capabilities();
            if capabilities.contains(&EventKind::Raw) {
                spawn_module_raw(Arc::clone(&module), Arc::clone(&event));
            }
            if with_kind && capabilities.contains(&kind) {
                spawn_module_delivery(module, Arc::clone(&event));
            }
        }

        let host = Arc::clone(&self.host);
        let raw_event = Arc::clone(&event);
        tokio::spawn(async move {
            if let Err(e) = host.on_raw(&raw_event).await {
                error!(kind = ?raw_event.kind(), "suppressing host on_raw error: {e:#}");
            }
        });

        if with_kind {
            let host = Arc::clone(&self.host);
            tokio::spawn(async move {
                if let Err(e) = deliver(host.as_ref(), &event).await {
                    error!(kind = ?event.kind(), "suppressing host handler error: {e:#}");
                }
            });
        }
    }
}

fn spawn_module_raw(module: Arc<dyn Module>, event: Arc<Event>) {
    tokio::spawn(async move {
        if let Err(e) = module.on_raw(&event).await {
            error!(
                module = %module.name(),
                kind = ?event.kind(),
                "suppressing module on_raw error: {e:#}"
            );
        }
    });
}

fn spawn_module_delivery(module: Arc<dyn Module>, event: Arc<Event>) {
    tokio::spawn(async move {
        if let Err(e) = deliver(module.as_ref(), &event).await {
            error!(
                module = %module.name(),
                kind = ?event.kind(),
                "suppressing module handler error: {e:#}"
            );
        }
    });
}
