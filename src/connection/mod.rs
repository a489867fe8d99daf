//! A single sharded connection to the chat server.
//!
//! Each [`Connection`] owns one TCP session and its bounded subset of
//! channels: it performs the PASS/NICK/CAP handshake, joins its channels,
//! then loops reading chunks, reassembling lines and handing complete lines
//! to the parser. Outbound lines flow through a dedicated writer task that
//! applies a small fixed throttle after every line.
//!
//! Transport failures move the connection through
//! `Connected -> Reconnecting -> Connecting` with a fixed delay and no retry
//! limit; an explicit disconnect parts every channel and is final.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::dispatch::Dispatcher;
use crate::protocol::{
    parse_line, Event, EventData, EventKind, CAPABILITIES, KEEPALIVE_PROBE, KEEPALIVE_REPLY,
    TWITCH_HOST, TWITCH_PORT,
};

/// Size of one socket read.
const READ_CHUNK: usize = 1024;

/// Grace period for the writer to flush queued PART lines on close.
const CLOSE_DRAIN: Duration = Duration::from_millis(100);

/// Errors surfaced by connection setup.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("channel list hasn't been set")]
    EmptyChannelList,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Transport endpoint and timing knobs. Defaults target the production chat
/// server; tests point these at a local fixture.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub server: String,
    pub port: u16,
    pub reconnect_delay: Duration,
    pub send_throttle: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            server: TWITCH_HOST.to_string(),
            port: TWITCH_PORT,
            reconnect_delay: Duration::from_secs(10),
            send_throttle: Duration::from_millis(1),
        }
    }
}

/// State shared between a connection task and its handles. Only the
/// connection task mutates counters and lifecycle state; handles mutate the
/// channel set through join/depart.
#[derive(Debug)]
struct ConnState {
    id: String,
    active: AtomicBool,
    state: Mutex<ConnectionState>,
    channels: Mutex<Vec<String>>,
    counters: Mutex<HashMap<String, u64>>,
    last_keepalive: Mutex<Option<DateTime<Utc>>>,
    counters_reset_at: Mutex<DateTime<Utc>>,
    shutdown: Notify,
}

/// Cloneable handle to a live connection, carried by every [`Event`].
///
/// Used to reply and to adjust channel membership at runtime; it never moves
/// channels between shards.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    shared: Arc<ConnState>,
    out_tx: mpsc::UnboundedSender<String>,
}

impl ConnectionHandle {
    /// Opaque short id of this shard.
    pub fn id(&self) -> String {
        self.shared.id.clone()
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.lock().expect("state lock poisoned")
    }

    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::SeqCst)
    }

    /// Channels currently assigned to this shard.
    pub fn channels(&self) -> Vec<String> {
        self.shared.channels.lock().expect("channels lock poisoned").clone()
    }

    pub fn channel_count(&self) -> usize {
        self.shared.channels.lock().expect("channels lock poisoned").len()
    }

    pub fn has_channel(&self, channel: &str) -> bool {
        self.shared
            .channels
            .lock()
            .expect("channels lock poisoned")
            .iter()
            .any(|c| c == channel)
    }

    /// Snapshot of the per-channel event counters.
    pub fn message_counter(&self) -> HashMap<String, u64> {
        self.shared.counters.lock().expect("counters lock poisoned").clone()
    }

    /// Zero every counter and stamp the reset time.
    pub fn reset_message_counter(&self) {
        let mut counters = self.shared.counters.lock().expect("counters lock poisoned");
        for value in counters.values_mut() {
            *value = 0;
        }
        *self
            .shared
            .counters_reset_at
            .lock()
            .expect("reset lock poisoned") = Utc::now();
    }

    /// When the last keep-alive probe was answered.
    pub fn last_keepalive(&self) -> Option<DateTime<Utc>> {
        *self
            .shared
            .last_keepalive
            .lock()
            .expect("keepalive lock poisoned")
    }

    /// Queue one raw line for the throttled writer. A failure to queue is
    /// reported in the log and otherwise ignored.
    pub fn send_raw(&self, line: &str) {
        if self.out_tx.send(line.to_string()).is_err() {
            warn!(shard = %self.shared.id, "socket is closed, dropping outbound line: {line}");
        }
    }

    /// Send a chat message to a channel.
    pub fn say(&self, channel: &str, text: &str) {
        info!(shard = %self.shared.id, "Sent ({channel}): {text}");
        self.send_raw(&format!("PRIVMSG #{} :{text}", channel.to_lowercase()));
    }

    /// Add a channel to this shard and issue the JOIN.
    ///
    /// Deliberately permissive: the channel set and counter are updated
    /// before the JOIN line is queued, and a failed send rolls nothing back.
    /// The reconnect path re-issues JOINs from the set, so a dropped line
    /// heals on the next reconnect.
    pub fn join_channel(&self, channel: &str) {
        info!(shard = %self.shared.id, "Sending request to join channel `{channel}`");
        self.shared
            .channels
            .lock()
            .expect("channels lock poisoned")
            .push(channel.to_string());
        self.shared
            .counters
            .lock()
            .expect("counters lock poisoned")
            .insert(channel.to_string(), 0);
        self.send_raw(&format!("JOIN #{channel}"));
    }

    /// Remove a channel from this shard and issue the PART.
    pub fn depart_channel(&self, channel: &str) {
        info!(shard = %self.shared.id, "Sending request to leave channel `{channel}`");
        self.shared
            .channels
            .lock()
            .expect("channels lock poisoned")
            .retain(|c| c != channel);
        self.shared
            .counters
            .lock()
            .expect("counters lock poisoned")
            .remove(channel);
        self.send_raw(&format!("PART #{channel}"));
    }

    /// Explicit, final disconnect: part every channel, then signal the read
    /// loop to close the transport. No automatic reconnection follows.
    pub fn disconnect(&self) {
        info!(shard = %self.shared.id, "departing channels");
        self.shared.active.store(false, Ordering::SeqCst);
        for channel in self.channels() {
            self.send_raw(&format!("PART #{channel}"));
        }
        // notify_one stores a permit, so the signal is not lost if the read
        // loop is mid-line rather than parked on notified().
        self.shared.shutdown.notify_one();
    }
}

/// One socket shard: the connection state machine and read loop.
pub struct Connection {
    shared: Arc<ConnState>,
    out_tx: mpsc::UnboundedSender<String>,
    out_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>>,
    writer: Option<JoinHandle<()>>,
    reader: Option<OwnedReadHalf>,
    buffer: String,
    dispatcher: Arc<Dispatcher>,
    nick: String,
    token: String,
    activator: String,
    settings: ConnectionSettings,
}

impl Connection {
    pub fn new(
        nick: impl Into<String>,
        token: impl Into<String>,
        activator: impl Into<String>,
        channels: Vec<String>,
        dispatcher: Arc<Dispatcher>,
        settings: ConnectionSettings,
    ) -> Self {
        let id = format!("{:08x}", rand::random::<u32>());
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(ConnState {
                id,
                active: AtomicBool::new(true),
                state: Mutex::new(ConnectionState::Disconnected),
                channels: Mutex::new(channels),
                counters: Mutex::new(HashMap::new()),
                last_keepalive: Mutex::new(None),
                counters_reset_at: Mutex::new(Utc::now()),
                shutdown: Notify::new(),
            }),
            out_tx,
            out_rx: Arc::new(tokio::sync::Mutex::new(out_rx)),
            writer: None,
            reader: None,
            buffer: String::new(),
            dispatcher,
            nick: nick.into(),
            token: token.into(),
            activator: activator.into(),
            settings,
        }
    }

    pub fn id(&self) -> String {
        self.shared.id.clone()
    }

    pub fn handle(&self) -> ConnectionHandle {
        ConnectionHandle {
            shared: Arc::clone(&self.shared),
            out_tx: self.out_tx.clone(),
        }
    }

    fn set_state(&self, state: ConnectionState) {
        *self.shared.state.lock().expect("state lock poisoned") = state;
    }

    fn queue(&self, line: impl Into<String>) {
        if self.out_tx.send(line.into()).is_err() {
            warn!(shard = %self.shared.id, "outbound queue closed");
        }
    }

    /// Open the TCP session, send the handshake and join every assigned
    /// channel. Counters are zeroed for the fresh session.
    pub async fn connect(&mut self) -> Result<(), ConnectionError> {
        let channels = self.shared.channels.lock().expect("channels lock poisoned").clone();
        if channels.is_empty() {
            return Err(ConnectionError::EmptyChannelList);
        }
        info!(shard = %self.shared.id, "Initialising connection to: {channels:?}");
        self.set_state(ConnectionState::Connecting);

        let stream =
            TcpStream::connect((self.settings.server.as_str(), self.settings.port)).await?;
        let (read_half, write_half) = stream.into_split();

        if let Some(writer) = self.writer.take() {
            writer.abort();
        }
        self.reader = Some(read_half);
        self.writer = Some(tokio::spawn(writer_loop(
            self.shared.id.clone(),
            Arc::clone(&self.out_rx),
            write_half,
            self.settings.send_throttle,
        )));

        self.queue(format!("PASS {}", self.token));
        self.queue(format!("NICK {}", self.nick));
        for capability in CAPABILITIES {
            self.queue(format!("CAP REQ :{capability}"));
        }
        {
            let mut counters = self.shared.counters.lock().expect("counters lock poisoned");
            counters.clear();
            for channel in &channels {
                self.queue(format!("JOIN #{channel}"));
                counters.insert(channel.clone(), 0);
            }
        }
        *self
            .shared
            .last_keepalive
            .lock()
            .expect("keepalive lock poisoned") = Some(Utc::now());
        *self
            .shared
            .counters_reset_at
            .lock()
            .expect("reset lock poisoned") = Utc::now();

        self.set_state(ConnectionState::Connected);
        info!(shard = %self.shared.id, "Socket engaged.");
        Ok(())
    }

    /// The read loop. Returns when the connection is explicitly disconnected;
    /// transport failures are absorbed by the reconnection path.
    pub async fn run(&mut self) {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if !self.shared.active.load(Ordering::SeqCst) {
                break;
            }
            let shared = Arc::clone(&self.shared);
            let read = {
                let Some(reader) = self.reader.as_mut() else {
                    break;
                };
                tokio::select! {
                    _ = shared.shutdown.notified() => None,
                    result = reader.read(&mut chunk) => Some(result),
                }
            };
            match read {
                None => break,
                Some(Ok(0)) => {
                    info!(shard = %self.shared.id, "Socket connection has closed");
                    if self.shared.active.load(Ordering::SeqCst) {
                        self.reconnect().await;
                    } else {
                        break;
                    }
                }
                Some(Ok(n)) => self.ingest(&chunk[..n]).await,
                Some(Err(e)) => {
                    warn!(shard = %self.shared.id, "socket issue identified: {e}");
                    if self.shared.active.load(Ordering::SeqCst) {
                        self.reconnect().await;
                    } else {
                        break;
                    }
                }
            }
        }
        self.close().await;
    }

    /// Append a chunk to the buffer and process every complete line.
    ///
    /// A malformed byte sequence discards the buffer and continues reading;
    /// it is not a reconnection trigger.
    async fn ingest(&mut self, bytes: &[u8]) {
        let chunk = match std::str::from_utf8(bytes) {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!(
                    shard = %self.shared.id,
                    "decode error detected, regenerating buffer: {e}"
                );
                self.buffer.clear();
                return;
            }
        };
        for line in drain_lines(&mut self.buffer, chunk) {
            debug!(shard = %self.shared.id, " > {line}");
            if line.contains(KEEPALIVE_PROBE) {
                self.queue(KEEPALIVE_REPLY);
                *self
                    .shared
                    .last_keepalive
                    .lock()
                    .expect("keepalive lock poisoned") = Some(Utc::now());
                continue;
            }
            // One yield per line so a burst never monopolizes the scheduler.
            tokio::task::yield_now().await;
            self.process_line(&line);
        }
    }

    fn process_line(&self, line: &str) {
        let data = parse_line(line, &self.activator);

        if data.counts_as_traffic() {
            if let Some(channel) = data.channel() {
                if !channel.is_empty() {
                    let mut counters =
                        self.shared.counters.lock().expect("counters lock poisoned");
                    *counters.entry(channel.to_string()).or_insert(0) += 1;
                }
            }
        }

        // Traffic echoed back for our own nick is counted and still reaches
        // the raw observers, but the kind-specific callbacks are skipped.
        let own_echo = matches!(
            data.kind(),
            EventKind::Privmsg
                | EventKind::Command
                | EventKind::Subscriber
                | EventKind::GiftedSubscriber
        ) && data
            .sender()
            .is_some_and(|sender| sender.eq_ignore_ascii_case(&self.nick));
        if own_echo {
            self.dispatcher.dispatch_raw(Event {
                conn: self.handle(),
                data,
            });
            return;
        }

        match &data {
            EventData::Privmsg(chat) => {
                info!(shard = %self.shared.id, "[CHAT].[{}]: ({}) {}", chat.channel, chat.sender, chat.text);
            }
            EventData::Command(cmd) => {
                info!(shard = %self.shared.id, "[CMD].[{}]: ({}) {}", cmd.channel, cmd.sender, cmd.text);
            }
            EventData::Whisper(chat) => {
                info!(shard = %self.shared.id, "[WHISPER]: ({}) {}", chat.sender, chat.text);
            }
            _ => {}
        }

        self.dispatcher.dispatch(Event {
            conn: self.handle(),
            data,
        });
    }

    /// Fixed-delay reconnection: drop the transport, wait, re-run the full
    /// handshake with the same channel set. Retries indefinitely.
    async fn reconnect(&mut self) {
        info!(shard = %self.shared.id, "Reconnect detected!");
        self.set_state(ConnectionState::Reconnecting);
        self.reader = None;
        if let Some(writer) = self.writer.take() {
            writer.abort();
        }
        self.buffer.clear();
        loop {
            info!(shard = %self.shared.id, "Waiting to reconnect.");
            tokio::time::sleep(self.settings.reconnect_delay).await;
            if !self.shared.active.load(Ordering::SeqCst) {
                return;
            }
            match self.connect().await {
                Ok(()) => return,
                Err(ConnectionError::EmptyChannelList) => {
                    error!(shard = %self.shared.id, "no channels left to rejoin, giving up");
                    self.shared.active.store(false, Ordering::SeqCst);
                    return;
                }
                Err(e) => {
                    error!(shard = %self.shared.id, "reconnect attempt failed: {e}");
                    self.set_state(ConnectionState::Reconnecting);
                }
            }
        }
    }

    async fn close(&mut self) {
        self.set_state(ConnectionState::Disconnected);
        self.shared.active.store(false, Ordering::SeqCst);
        self.reader = None;
        // Let the writer flush any queued PART lines before tearing it down.
        tokio::time::sleep(CLOSE_DRAIN).await;
        if let Some(writer) = self.writer.take() {
            writer.abort();
        }
        info!(shard = %self.shared.id, "Closing socket.");
    }
}

/// Drains queued outbound lines onto the transport, one line per throttle
/// interval. Exits when the transport write fails; a reconnect spawns a
/// replacement against the new write half.
async fn writer_loop(
    id: String,
    out_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>>,
    mut write_half: OwnedWriteHalf,
    throttle: Duration,
) {
    let mut out_rx = out_rx.lock().await;
    while let Some(line) = out_rx.recv().await {
        if line.starts_with("PASS") {
            debug!(shard = %id, " < PASS ****");
        } else {
            debug!(shard = %id, " < {line}");
        }
        if let Err(e) = write_half.write_all(format!("{line}\r\n").as_bytes()).await {
            warn!(shard = %id, "socket is closed and must be reopened to send the message '{line}': {e}");
            break;
        }
        tokio::time::sleep(throttle).await;
    }
}

/// Append `chunk` to `buffer`, split out every complete line (stripping the
/// `\r`), and leave the unterminated tail in `buffer`.
pub(crate) fn drain_lines(buffer: &mut String, chunk: &str) -> Vec<String> {
    buffer.push_str(chunk);
    let mut parts: Vec<String> = buffer.split('\n').map(str::to_string).collect();
    let tail = parts.pop().unwrap_or_default();
    *buffer = tail;
    for line in &mut parts {
        while line.ends_with('\r') {
            line.pop();
        }
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn drain_lines_keeps_partial_tail() {
        let mut buffer = String::new();
        let lines = drain_lines(&mut buffer, "one\r\ntwo\r\npartial");
        assert_eq!(lines, vec!["one".to_string(), "two".to_string()]);
        assert_eq!(buffer, "partial");
    }

    #[test]
    fn drain_lines_completes_tail_on_next_chunk() {
        let mut buffer = String::from("par");
        let lines = drain_lines(&mut buffer, "tial\r\n");
        assert_eq!(lines, vec!["partial".to_string()]);
        assert_eq!(buffer, "");
    }

    #[test]
    fn arbitrary_chunking_reconstructs_identical_lines() {
        let stream = ":a!a@a PRIVMSG #c :hello\r\n:b!b@b JOIN #c\r\nPING :tmi.twitch.tv\r\n";

        let mut single_buffer = String::new();
        let single = drain_lines(&mut single_buffer, stream);

        for split_at in 0..stream.len() {
            let mut buffer = String::new();
            let mut chunked = drain_lines(&mut buffer, &stream[..split_at]);
            chunked.extend(drain_lines(&mut buffer, &stream[split_at..]));
            assert_eq!(chunked, single, "split at byte {split_at}");
            assert_eq!(buffer, "", "split at byte {split_at}");
        }
    }

    #[test]
    fn drain_lines_handles_bare_newlines() {
        let mut buffer = String::new();
        let lines = drain_lines(&mut buffer, "one\ntwo\n");
        assert_eq!(lines, vec!["one".to_string(), "two".to_string()]);
        assert_eq!(buffer, "");
    }
}
