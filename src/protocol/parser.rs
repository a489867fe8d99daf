//! TMI line parser.
//!
//! Classifies one raw protocol line into exactly one [`EventData`] variant.
//! The parser is pure and total: identical input always yields an identical
//! event, and malformed input degrades to the generic [`EventData::Message`]
//! variant with best-effort fields instead of returning an error.
//!
//! Line shape (tag block and prefix both optional):
//!
//! ```text
//! @key=value;key=value :nick!user@host COMMAND #channel :trailing text
//! ```

use super::event::{
    Chat, CommandMessage, EventData, GlobalState, HostTarget, Membership, ModeChange, Moderation,
    NamesReply, RawLine, StateChange, Tags,
};

/// Parse one raw line (without any framing terminator) into an event.
///
/// `activator` is the configured command prefix: a PRIVMSG whose text starts
/// with it, immediately followed by a non-whitespace keyword, becomes a
/// [`EventData::Command`] instead of a plain [`EventData::Privmsg`].
pub fn parse_line(line: &str, activator: &str) -> EventData {
    let line = line.trim_end_matches(['\r', '\n']);
    let mut rest = line;

    let mut tags = Tags::new();
    if let Some(block) = rest.strip_prefix('@') {
        match block.split_once(' ') {
            Some((block, after)) => {
                tags = parse_tags(block);
                rest = after;
            }
            // A tag block with nothing after it is not a command line.
            None => return generic(line),
        }
    }

    let mut prefix = "";
    if let Some(after) = rest.strip_prefix(':') {
        match after.split_once(' ') {
            Some((p, r)) => {
                prefix = p;
                rest = r;
            }
            None => return generic(line),
        }
    }

    let command = rest.split(' ').next().unwrap_or("");
    let channel = channel_of(rest);

    match command {
        "JOIN" => EventData::Join(Membership {
            channel,
            nick: nick_of(prefix).to_string(),
        }),
        "PART" => EventData::Part(Membership {
            channel,
            nick: nick_of(prefix).to_string(),
        }),
        "MODE" => {
            // MODE #channel +o nick
            let mut after = rest.split(' ').skip_while(|t| !t.starts_with('#'));
            after.next();
            EventData::Mode(ModeChange {
                channel,
                modes: after.next().unwrap_or("").to_string(),
                nick: after.next().unwrap_or("").to_string(),
            })
        }
        "353" => EventData::Names(NamesReply {
            channel,
            names: trailing_after_channel(rest)
                .split_whitespace()
                .map(str::to_string)
                .collect(),
        }),
        "CLEARCHAT" => EventData::ClearChat(Moderation {
            channel,
            target: trailing_after_channel(rest),
            tags,
        }),
        "CLEARMSG" => {
            let sender = tags.get("login").cloned().unwrap_or_default();
            EventData::ClearMessage(Chat {
                channel,
                sender,
                text: trailing_after_channel(rest),
                tags,
            })
        }
        "HOSTTARGET" => {
            // HOSTTARGET #hosting :<target|-> [viewers]
            let trailing = trailing_after_channel(rest);
            EventData::HostTarget(HostTarget {
                channel,
                target: trailing.split_whitespace().next().unwrap_or("").to_string(),
            })
        }
        "NOTICE" => EventData::Notice(Chat {
            channel,
            sender: String::new(),
            text: trailing_after_channel(rest),
            tags,
        }),
        "RECONNECT" => EventData::Reconnect,
        "ROOMSTATE" => EventData::RoomState(StateChange { channel, tags }),
        "USERSTATE" => EventData::UserState(StateChange { channel, tags }),
        "GLOBALUSERSTATE" => EventData::GlobalUserState(GlobalState { tags }),
        "USERNOTICE" => {
            let chat = Chat {
                channel,
                sender: sender_from(&tags, prefix),
                text: trailing_after_channel(rest),
                tags,
            };
            classify_usernotice(chat)
        }
        "WHISPER" => {
            // WHISPER <target> :text. No channel; the sender's login keys
            // the counter and is also where replies go.
            let sender = sender_from(&tags, prefix);
            let from = rest.find(' ').map(|i| i + 1).unwrap_or(rest.len());
            EventData::Whisper(Chat {
                channel: nick_of(prefix).to_string(),
                sender,
                text: text_after_colon(rest, from),
                tags,
            })
        }
        "PRIVMSG" => {
            let chat = Chat {
                channel,
                sender: sender_from(&tags, prefix),
                text: trailing_after_channel(rest),
                tags,
            };
            classify_privmsg(chat, activator)
        }
        _ => generic(line),
    }
}

fn generic(line: &str) -> EventData {
    EventData::Message(RawLine {
        line: line.to_string(),
    })
}

/// Split a `key=value;key=value` tag block into a map, unescaping values.
fn parse_tags(block: &str) -> Tags {
    let mut tags = Tags::new();
    for pair in block.split(';') {
        if pair.is_empty() {
            continue;
        }
        match pair.split_once('=') {
            Some((key, value)) => tags.insert(key.to_string(), unescape_tag_value(value)),
            None => tags.insert(pair.to_string(), String::new()),
        };
    }
    tags
}

/// IRCv3 tag value unescaping: `\:` -> `;`, `\s` -> space, `\\` -> `\`,
/// `\r`/`\n` -> CR/LF. A dangling backslash is dropped.
fn unescape_tag_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(':') => out.push(';'),
            Some('s') => out.push(' '),
            Some('\\') => out.push('\\'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

/// The channel name following a `#`, without the `#`.
fn channel_of(rest: &str) -> String {
    rest.split(' ')
        .find(|t| t.starts_with('#'))
        .map(|t| t.trim_start_matches('#').to_string())
        .unwrap_or_default()
}

/// Nick portion of a `nick!user@host` prefix.
fn nick_of(prefix: &str) -> &str {
    prefix.split('!').next().unwrap_or("")
}

/// Display name from tags, falling back to the prefix hostmask nick.
fn sender_from(tags: &Tags, prefix: &str) -> String {
    match tags.get("display-name") {
        Some(name) if !name.is_empty() => name.clone(),
        _ => nick_of(prefix).to_string(),
    }
}

/// Text after the first `:` that follows the channel token.
fn trailing_after_channel(rest: &str) -> String {
    let from = rest.find('#').unwrap_or(0);
    text_after_colon(rest, from)
}

fn text_after_colon(rest: &str, from: usize) -> String {
    match rest.get(from..).and_then(|s| s.find(':')) {
        Some(i) => rest[from + i + 1..].to_string(),
        None => String::new(),
    }
}

/// Sub-classify a USERNOTICE by its `msg-id` tag.
fn classify_usernotice(chat: Chat) -> EventData {
    let msg_id = chat.tags.get("msg-id").cloned().unwrap_or_default();
    match msg_id.as_str() {
        "ritual" => EventData::Ritual(chat),
        "bitsbadgetier" => EventData::BitBadgeUpgrade(chat),
        "raid" => EventData::Raid(chat),
        "sub" | "resub" => EventData::Subscriber(chat),
        "subgift" | "anonsubgift" | "submysterygift" => EventData::GiftedSubscriber(chat),
        _ => EventData::UserNotice(chat),
    }
}

/// Sub-classify a PRIVMSG into Command when the text begins with the
/// activator immediately followed by a non-whitespace keyword.
fn classify_privmsg(chat: Chat, activator: &str) -> EventData {
    if !activator.is_empty() {
        if let Some(after) = chat.text.strip_prefix(activator) {
            let keyword: String = after.chars().take_while(|c| !c.is_whitespace()).collect();
            if !keyword.is_empty() {
                return EventData::Command(CommandMessage {
                    channel: chat.channel,
                    sender: chat.sender,
                    text: chat.text,
                    keyword,
                    tags: chat.tags,
                });
            }
        }
    }
    EventData::Privmsg(chat)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(line: &str) -> EventData {
        parse_line(line, "!")
    }

    // --- Membership and channel control ---

    #[test]
    fn parse_join() {
        let ev = parse(":wings!wings@wings.tmi.twitch.tv JOIN #lagoon");
        assert_eq!(
            ev,
            EventData::Join(Membership {
                channel: "lagoon".into(),
                nick: "wings".into(),
            })
        );
    }

    #[test]
    fn parse_part() {
        let ev = parse(":wings!wings@wings.tmi.twitch.tv PART #lagoon");
        assert_eq!(
            ev,
            EventData::Part(Membership {
                channel: "lagoon".into(),
                nick: "wings".into(),
            })
        );
    }

    #[test]
    fn parse_mode() {
        let ev = parse(":jtv MODE #lagoon +o wings");
        assert_eq!(
            ev,
            EventData::Mode(ModeChange {
                channel: "lagoon".into(),
                modes: "+o".into(),
                nick: "wings".into(),
            })
        );
    }

    #[test]
    fn parse_names_reply() {
        let ev = parse(":wings.tmi.twitch.tv 353 wings = #lagoon :wings coral shrimp");
        assert_eq!(
            ev,
            EventData::Names(NamesReply {
                channel: "lagoon".into(),
                names: vec!["wings".into(), "coral".into(), "shrimp".into()],
            })
        );
    }

    // --- Chat messages ---

    #[test]
    fn parse_privmsg_with_display_name() {
        let ev = parse(
            "@badges=;color=#FF0000;display-name=Wings :wings!wings@wings.tmi.twitch.tv \
             PRIVMSG #lagoon :hello chat",
        );
        match ev {
            EventData::Privmsg(chat) => {
                assert_eq!(chat.channel, "lagoon");
                assert_eq!(chat.sender, "Wings");
                assert_eq!(chat.text, "hello chat");
                assert_eq!(chat.tags.get("color").map(String::as_str), Some("#FF0000"));
            }
            other => panic!("expected Privmsg, got {other:?}"),
        }
    }

    #[test]
    fn privmsg_sender_falls_back_to_prefix() {
        let ev = parse(":wings!wings@wings.tmi.twitch.tv PRIVMSG #lagoon :hi");
        match ev {
            EventData::Privmsg(chat) => assert_eq!(chat.sender, "wings"),
            other => panic!("expected Privmsg, got {other:?}"),
        }
    }

    #[test]
    fn privmsg_text_may_contain_colons() {
        let ev = parse(":w!w@w.tmi.twitch.tv PRIVMSG #lagoon :note: 10:30 works");
        match ev {
            EventData::Privmsg(chat) => assert_eq!(chat.text, "note: 10:30 works"),
            other => panic!("expected Privmsg, got {other:?}"),
        }
    }

    #[test]
    fn parse_whisper() {
        let ev = parse(":coral!coral@coral.tmi.twitch.tv WHISPER wings :psst");
        match ev {
            EventData::Whisper(chat) => {
                assert_eq!(chat.channel, "coral");
                assert_eq!(chat.sender, "coral");
                assert_eq!(chat.text, "psst");
            }
            other => panic!("expected Whisper, got {other:?}"),
        }
    }

    // --- Command activator ---

    #[test]
    fn activator_yields_command_with_keyword() {
        let ev = parse(":w!w@w.tmi.twitch.tv PRIVMSG #lagoon :!sleep 10 seconds");
        match ev {
            EventData::Command(cmd) => {
                assert_eq!(cmd.keyword, "sleep");
                assert_eq!(cmd.text, "!sleep 10 seconds");
                assert_eq!(cmd.channel, "lagoon");
            }
            other => panic!("expected Command, got {other:?}"),
        }
    }

    #[test]
    fn same_text_without_activator_is_privmsg() {
        let ev = parse(":w!w@w.tmi.twitch.tv PRIVMSG #lagoon :sleep 10 seconds");
        assert!(matches!(ev, EventData::Privmsg(_)));
    }

    #[test]
    fn bare_activator_is_privmsg() {
        let ev = parse(":w!w@w.tmi.twitch.tv PRIVMSG #lagoon :!");
        assert!(matches!(ev, EventData::Privmsg(_)));
    }

    #[test]
    fn activator_followed_by_space_is_privmsg() {
        let ev = parse(":w!w@w.tmi.twitch.tv PRIVMSG #lagoon :! hello");
        assert!(matches!(ev, EventData::Privmsg(_)));
    }

    #[test]
    fn multi_char_activator() {
        let ev = parse_line(":w!w@w.tmi.twitch.tv PRIVMSG #lagoon :>>roll d20", ">>");
        match ev {
            EventData::Command(cmd) => assert_eq!(cmd.keyword, "roll"),
            other => panic!("expected Command, got {other:?}"),
        }
    }

    // --- USERNOTICE sub-classification ---

    fn usernotice(msg_id: &str) -> EventData {
        parse(&format!(
            "@msg-id={msg_id};display-name=Coral :tmi.twitch.tv USERNOTICE #lagoon :body"
        ))
    }

    #[test]
    fn usernotice_msg_id_variants() {
        assert!(matches!(usernotice("ritual"), EventData::Ritual(_)));
        assert!(matches!(
            usernotice("bitsbadgetier"),
            EventData::BitBadgeUpgrade(_)
        ));
        assert!(matches!(usernotice("raid"), EventData::Raid(_)));
        assert!(matches!(usernotice("sub"), EventData::Subscriber(_)));
        assert!(matches!(usernotice("resub"), EventData::Subscriber(_)));
        assert!(matches!(
            usernotice("subgift"),
            EventData::GiftedSubscriber(_)
        ));
        assert!(matches!(
            usernotice("submysterygift"),
            EventData::GiftedSubscriber(_)
        ));
        assert!(matches!(
            usernotice("unrecognized"),
            EventData::UserNotice(_)
        ));
    }

    #[test]
    fn usernotice_without_msg_id_is_generic_usernotice() {
        let ev = parse("@display-name=Coral :tmi.twitch.tv USERNOTICE #lagoon :hi");
        assert!(matches!(ev, EventData::UserNotice(_)));
    }

    // --- Room control frames ---

    #[test]
    fn parse_clearchat_with_target() {
        let ev = parse("@ban-duration=600 :tmi.twitch.tv CLEARCHAT #lagoon :shrimp");
        match ev {
            EventData::ClearChat(m) => {
                assert_eq!(m.channel, "lagoon");
                assert_eq!(m.target, "shrimp");
                assert_eq!(m.tags.get("ban-duration").map(String::as_str), Some("600"));
            }
            other => panic!("expected ClearChat, got {other:?}"),
        }
    }

    #[test]
    fn parse_clearchat_whole_channel() {
        let ev = parse(":tmi.twitch.tv CLEARCHAT #lagoon");
        match ev {
            EventData::ClearChat(m) => assert_eq!(m.target, ""),
            other => panic!("expected ClearChat, got {other:?}"),
        }
    }

    #[test]
    fn parse_clearmsg_sender_from_login_tag() {
        let ev = parse("@login=shrimp;target-msg-id=abc :tmi.twitch.tv CLEARMSG #lagoon :bad msg");
        match ev {
            EventData::ClearMessage(chat) => {
                assert_eq!(chat.sender, "shrimp");
                assert_eq!(chat.text, "bad msg");
            }
            other => panic!("expected ClearMessage, got {other:?}"),
        }
    }

    #[test]
    fn parse_hosttarget() {
        let ev = parse(":tmi.twitch.tv HOSTTARGET #lagoon :coral 120");
        assert_eq!(
            ev,
            EventData::HostTarget(HostTarget {
                channel: "lagoon".into(),
                target: "coral".into(),
            })
        );
    }

    #[test]
    fn parse_notice() {
        let ev = parse("@msg-id=slow_on :tmi.twitch.tv NOTICE #lagoon :This room is in slow mode.");
        match ev {
            EventData::Notice(chat) => {
                assert_eq!(chat.text, "This room is in slow mode.");
                assert_eq!(chat.tags.get("msg-id").map(String::as_str), Some("slow_on"));
            }
            other => panic!("expected Notice, got {other:?}"),
        }
    }

    #[test]
    fn parse_reconnect() {
        assert_eq!(parse(":tmi.twitch.tv RECONNECT"), EventData::Reconnect);
    }

    #[test]
    fn parse_roomstate_and_userstate() {
        let ev = parse("@emote-only=0;slow=0 :tmi.twitch.tv ROOMSTATE #lagoon");
        assert!(matches!(ev, EventData::RoomState(ref s) if s.channel == "lagoon"));
        let ev = parse("@mod=1 :tmi.twitch.tv USERSTATE #lagoon");
        assert!(matches!(ev, EventData::UserState(ref s) if s.channel == "lagoon"));
    }

    #[test]
    fn parse_globaluserstate_has_no_channel() {
        let ev = parse("@color=#00FF00 :tmi.twitch.tv GLOBALUSERSTATE");
        match &ev {
            EventData::GlobalUserState(s) => {
                assert_eq!(s.tags.get("color").map(String::as_str), Some("#00FF00"));
            }
            other => panic!("expected GlobalUserState, got {other:?}"),
        }
        assert_eq!(ev.channel(), None);
    }

    // --- Degradation and tag handling ---

    #[test]
    fn unknown_command_degrades_to_generic() {
        let line = ":server.example 001 wings :Welcome";
        assert_eq!(parse(line), EventData::Message(RawLine { line: line.into() }));
    }

    #[test]
    fn empty_line_degrades_to_generic() {
        assert_eq!(parse(""), EventData::Message(RawLine { line: "".into() }));
    }

    #[test]
    fn bare_tag_block_degrades_to_generic() {
        let line = "@only=tags";
        assert_eq!(parse(line), EventData::Message(RawLine { line: line.into() }));
    }

    #[test]
    fn bare_prefix_degrades_to_generic() {
        let line = ":prefix_only";
        assert_eq!(parse(line), EventData::Message(RawLine { line: line.into() }));
    }

    #[test]
    fn identical_input_yields_identical_event() {
        let line = "@a=b :w!w@w PRIVMSG #lagoon :!cmd arg";
        assert_eq!(parse(line), parse(line));
    }

    #[test]
    fn tag_values_are_unescaped() {
        let ev = parse(
            r"@system-msg=5\smonths!;other=a\:b\\c :tmi.twitch.tv USERNOTICE #lagoon :hi",
        );
        let tags = match ev {
            EventData::UserNotice(chat) => chat.tags,
            other => panic!("expected UserNotice, got {other:?}"),
        };
        assert_eq!(tags.get("system-msg").map(String::as_str), Some("5 months!"));
        assert_eq!(tags.get("other").map(String::as_str), Some(r"a;b\c"));
    }

    #[test]
    fn empty_tag_values_are_kept() {
        let ev = parse("@badges=;mod=0 :w!w@w PRIVMSG #lagoon :hi");
        let tags = match ev {
            EventData::Privmsg(chat) => chat.tags,
            other => panic!("expected Privmsg, got {other:?}"),
        };
        assert_eq!(tags.get("badges").map(String::as_str), Some(""));
        assert_eq!(tags.get("mod").map(String::as_str), Some("0"));
    }

    #[test]
    fn crlf_terminator_is_stripped() {
        let ev = parse(":w!w@w PRIVMSG #lagoon :hi\r\n");
        match ev {
            EventData::Privmsg(chat) => assert_eq!(chat.text, "hi"),
            other => panic!("expected Privmsg, got {other:?}"),
        }
    }

    // --- Round-trip: synthesize a line from fields, parse it back ---

    #[test]
    fn privmsg_round_trip() {
        let (channel, sender, text) = ("lagoon", "Wings", "tide is high");
        let line =
            format!(":ignored!i@i PRIVMSG #{channel} :{text}");
        let line = format!("@display-name={sender} {line}");
        match parse(&line) {
            EventData::Privmsg(chat) => {
                assert_eq!(chat.channel, channel);
                assert_eq!(chat.sender, sender);
                assert_eq!(chat.text, text);
            }
            other => panic!("expected Privmsg, got {other:?}"),
        }
    }
}
