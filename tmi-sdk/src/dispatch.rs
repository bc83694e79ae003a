//! Inbound message dispatch.
//!
//! Classifies one parsed line by (prefix class, command, msg-id tag) and
//! returns the actions the session loop applies, in order. The only
//! state touched here is the cached local username and the per-channel
//! USERSTATE map; lifecycle transitions stay in the session loop.

use tracing::{error, info, warn};

use crate::client::Session;
use crate::event::Event;
use crate::irc::{Message, Prefix};

/// What the session loop should do in response to one message.
#[derive(Debug)]
pub(crate) enum Action {
    /// Deliver an event to the consumer.
    Emit(Event),
    /// Write a raw line on the wire.
    Send(String),
    /// End of MOTD: request capabilities and start the paced joins.
    BeginJoin,
    /// Fatal for this connection: mark the close explicit and close.
    CloseExplicit,
}

pub(crate) fn dispatch(session: &mut Session, msg: &Message) -> Vec<Action> {
    let mut actions = Vec::new();

    match (msg.prefix_class(), msg.command.as_str()) {
        (Prefix::None, "PING") => {
            actions.push(Action::Emit(Event::Ping));
            actions.push(Action::Send("PONG".to_string()));
        }
        (Prefix::None, "PONG") => actions.push(Action::Emit(Event::Pong)),

        // Our confirmed login name.
        (Prefix::Server, "001") => {
            session.username = msg.params.first().cloned().unwrap_or_default();
        }
        // Handshake noise.
        (Prefix::Server, "002" | "003" | "004" | "375" | "376" | "CAP") => {}

        // End of MOTD: the connection is usable.
        (Prefix::Server, "372") => {
            info!("connected to server");
            actions.push(Action::Emit(Event::Connected {
                server: session.server.clone(),
                port: session.port,
            }));
            actions.push(Action::BeginJoin);
        }

        (Prefix::Server, "NOTICE") => {
            let channel = msg.params.first().cloned().unwrap_or_default();
            match msg.tags.get("msg-id").map(String::as_str) {
                Some("subs_on") => {
                    info!(%channel, "room is now in subscribers-only mode");
                    actions.push(Action::Emit(Event::Subscribers { channel, enabled: true }));
                }
                Some("subs_off") => {
                    info!(%channel, "room is no longer in subscribers-only mode");
                    actions.push(Action::Emit(Event::Subscribers { channel, enabled: false }));
                }
                Some("slow_on") => {
                    info!(%channel, "room is now in slow mode");
                    actions.push(Action::Emit(Event::Slow { channel, enabled: true }));
                }
                Some("slow_off") => {
                    info!(%channel, "room is no longer in slow mode");
                    actions.push(Action::Emit(Event::Slow { channel, enabled: false }));
                }
                Some("r9k_on") => {
                    info!(%channel, "room is now in r9k mode");
                    actions.push(Action::Emit(Event::R9kMode { channel, enabled: true }));
                }
                Some("r9k_off") => {
                    info!(%channel, "room is no longer in r9k mode");
                    actions.push(Action::Emit(Event::R9kMode { channel, enabled: false }));
                }
                Some("host_on") => {
                    info!(%channel, "now hosting another channel");
                    actions.push(Action::Emit(Event::Hosting { channel, target: None }));
                }
                Some("host_off") => {
                    info!(%channel, "exited host mode");
                    actions.push(Action::Emit(Event::Unhost { channel }));
                }
                _ => {}
            }
            // Rejected credentials are fatal for this connection; do not
            // retry them even with reconnect enabled.
            if msg.params.get(1).is_some_and(|text| text == "Login unsuccessful") {
                error!("login unsuccessful");
                actions.push(Action::CloseExplicit);
            }
        }

        (Prefix::Server, "HOSTTARGET") => {
            let channel = msg.params.first().cloned().unwrap_or_default();
            let target = msg
                .params
                .get(1)
                .and_then(|p| p.split_whitespace().next())
                .unwrap_or_default()
                .to_string();
            info!(%channel, %target, "now hosting");
            actions.push(Action::Emit(Event::Hosting { channel, target: Some(target) }));
        }

        (Prefix::Server, "CLEARCHAT") => {
            let channel = msg.params.first().cloned().unwrap_or_default();
            if let Some(user) = msg.params.get(1) {
                info!(%channel, user = %user, "user has been timed out");
                actions.push(Action::Emit(Event::Timeout {
                    channel,
                    username: user.clone(),
                }));
            } else {
                info!(%channel, "chat was cleared by a moderator");
                actions.push(Action::Emit(Event::ClearChat { channel }));
            }
        }

        (Prefix::Server, "RECONNECT") => {
            info!(message = ?msg, "server requested a reconnect");
        }

        // Room-level tags for the local user; last write wins.
        (Prefix::Server, "USERSTATE") => {
            let channel = msg.params.first().cloned().unwrap_or_default();
            let mut tags = msg.tags.clone();
            tags.insert("username".to_string(), session.username.clone());
            session.userstate.lock().insert(channel, tags);
        }

        (Prefix::Jtv, "MODE") => {}

        // NAMES replies arrive with a connection-specific prefix.
        (_, "353") => {
            if msg.params.len() >= 4 {
                let channel = msg.params[2].clone();
                let nicks = msg.params[3]
                    .split_whitespace()
                    .map(str::to_string)
                    .collect();
                actions.push(Action::Emit(Event::Names { channel, nicks }));
            }
        }
        (_, "366") => {} // end of NAMES

        (Prefix::User(nick), "JOIN") => {
            let channel = msg.params.first().cloned().unwrap_or_default();
            if nick == session.username {
                info!(%channel, "joined");
            }
            actions.push(Action::Emit(Event::Join { channel, username: nick }));
        }

        (Prefix::User(nick), "PART") => {
            let channel = msg.params.first().cloned().unwrap_or_default();
            if nick == session.username {
                info!(%channel, "left");
            }
            actions.push(Action::Emit(Event::Part { channel, username: nick }));
        }

        (Prefix::User(nick), "PRIVMSG") => {
            let channel = msg.params.first().cloned().unwrap_or_default();
            let body = msg.params.get(1).cloned().unwrap_or_default();
            let username = nick.to_lowercase();
            let mut tags = msg.tags.clone();
            tags.insert("username".to_string(), username.clone());

            if let Some(text) = strip_action(&body) {
                info!(%channel, user = %username, text, "action");
                actions.push(Action::Emit(Event::Action {
                    channel,
                    tags,
                    message: text.to_string(),
                }));
            } else {
                info!(%channel, user = %username, message = %body, "chat");
                actions.push(Action::Emit(Event::Chat { channel, tags, message: body }));
            }
        }

        // Unrecognized combinations are never fatal.
        (Prefix::None, _) => warn!(message = ?msg, "could not parse message with no prefix"),
        (Prefix::Server, _) => warn!(message = ?msg, "could not parse message from server"),
        (Prefix::Jtv, _) => warn!(message = ?msg, "could not parse message from jtv"),
        (Prefix::User(_), _) => warn!(message = ?msg, "could not parse message"),
    }

    actions
}

/// Strip the `\u{1}ACTION ...\u{1}` wrapper from a `/me` message.
/// Returns `None` when the body is not a well-formed action.
fn strip_action(body: &str) -> Option<&str> {
    let inner = body.strip_prefix("\u{1}ACTION ")?.strip_suffix('\u{1}')?;
    if inner.is_empty() || inner.contains('\u{1}') {
        return None;
    }
    Some(inner)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::collections::VecDeque;
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;
    use crate::client::ConnectionState;

    fn session() -> Session {
        Session {
            server: "irc-ws.chat.twitch.tv".to_string(),
            port: 443,
            username: "testuser".to_string(),
            password: "oauth:token".to_string(),
            state: ConnectionState::Ready,
            close_called: false,
            channels: Vec::new(),
            join_queue: VecDeque::new(),
            userstate: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn run(session: &mut Session, line: &str) -> Vec<Action> {
        dispatch(session, &Message::parse(line).unwrap())
    }

    fn only_event(mut actions: Vec<Action>) -> Event {
        assert_eq!(actions.len(), 1, "expected one action, got {actions:?}");
        match actions.remove(0) {
            Action::Emit(event) => event,
            other => panic!("expected Emit, got {other:?}"),
        }
    }

    #[test]
    fn ping_is_answered_immediately() {
        let actions = run(&mut session(), "PING :tmi.twitch.tv");
        assert!(matches!(actions[0], Action::Emit(Event::Ping)));
        assert!(matches!(&actions[1], Action::Send(line) if line == "PONG"));
    }

    #[test]
    fn pong_emits_pong() {
        let event = only_event(run(&mut session(), "PONG :tmi.twitch.tv"));
        assert!(matches!(event, Event::Pong));
    }

    #[test]
    fn numeric_001_captures_username() {
        let mut s = session();
        run(&mut s, ":tmi.twitch.tv 001 somebody :Welcome, GLHF!");
        assert_eq!(s.username, "somebody");
    }

    #[test]
    fn handshake_numerics_are_silent() {
        let mut s = session();
        for line in [
            ":tmi.twitch.tv 002 x :Your host is tmi.twitch.tv",
            ":tmi.twitch.tv 003 x :This server is rather new",
            ":tmi.twitch.tv 004 x :-",
            ":tmi.twitch.tv 375 x :-",
            ":tmi.twitch.tv 376 x :>",
            ":tmi.twitch.tv CAP * ACK :twitch.tv/tags",
        ] {
            assert!(run(&mut s, line).is_empty(), "{line} produced actions");
        }
    }

    #[test]
    fn end_of_motd_connects_and_begins_joins() {
        let actions = run(&mut session(), ":tmi.twitch.tv 372 x :You are in a maze");
        assert!(matches!(
            &actions[0],
            Action::Emit(Event::Connected { server, port: 443 })
                if server == "irc-ws.chat.twitch.tv"
        ));
        assert!(matches!(actions[1], Action::BeginJoin));
    }

    #[test]
    fn notice_msg_ids_toggle_room_modes() {
        let mut s = session();
        let cases: &[(&str, fn(&Event) -> bool)] = &[
            ("subs_on", |e| matches!(e, Event::Subscribers { channel, enabled: true } if channel == "#foo")),
            ("subs_off", |e| matches!(e, Event::Subscribers { channel, enabled: false } if channel == "#foo")),
            ("slow_on", |e| matches!(e, Event::Slow { enabled: true, .. })),
            ("slow_off", |e| matches!(e, Event::Slow { enabled: false, .. })),
            ("r9k_on", |e| matches!(e, Event::R9kMode { enabled: true, .. })),
            ("r9k_off", |e| matches!(e, Event::R9kMode { enabled: false, .. })),
            ("host_on", |e| matches!(e, Event::Hosting { target: None, .. })),
            ("host_off", |e| matches!(e, Event::Unhost { .. })),
        ];
        for (msg_id, check) in cases {
            let line = format!("@msg-id={msg_id} :tmi.twitch.tv NOTICE #foo :whatever");
            let event = only_event(run(&mut s, &line));
            assert!(check(&event), "msg-id {msg_id} produced {event:?}");
        }
    }

    #[test]
    fn unknown_notice_msg_id_is_ignored() {
        let actions = run(&mut session(), "@msg-id=emote_only_on :tmi.twitch.tv NOTICE #foo :x");
        assert!(actions.is_empty());
    }

    #[test]
    fn login_unsuccessful_closes_explicitly() {
        let actions = run(&mut session(), ":tmi.twitch.tv NOTICE * :Login unsuccessful");
        assert_eq!(actions.len(), 1);
        assert!(matches!(actions[0], Action::CloseExplicit));
    }

    #[test]
    fn hosttarget_takes_first_token_of_payload() {
        let event = only_event(run(
            &mut session(),
            ":tmi.twitch.tv HOSTTARGET #foo :targetchan 1337",
        ));
        assert!(matches!(
            event,
            Event::Hosting { channel, target: Some(target) }
                if channel == "#foo" && target == "targetchan"
        ));
    }

    #[test]
    fn clearchat_with_user_is_a_timeout() {
        let event = only_event(run(&mut session(), ":tmi.twitch.tv CLEARCHAT #foo :baduser"));
        assert!(matches!(
            event,
            Event::Timeout { channel, username } if channel == "#foo" && username == "baduser"
        ));
    }

    #[test]
    fn clearchat_without_user_clears_chat() {
        let event = only_event(run(&mut session(), ":tmi.twitch.tv CLEARCHAT #foo"));
        assert!(matches!(event, Event::ClearChat { channel } if channel == "#foo"));
    }

    #[test]
    fn userstate_is_stored_per_channel_last_write_wins() {
        let mut s = session();
        run(&mut s, "@color=#FF0000;mod=0 :tmi.twitch.tv USERSTATE #foo");
        run(&mut s, "@color=#00FF00;mod=1 :tmi.twitch.tv USERSTATE #bar");
        run(&mut s, "@color=#0000FF;mod=1 :tmi.twitch.tv USERSTATE #foo");

        let map = s.userstate.lock();
        let foo = &map["#foo"];
        assert_eq!(foo["color"], "#0000FF");
        assert_eq!(foo["mod"], "1");
        assert_eq!(foo["username"], "testuser");
        // The other channel's entry is untouched.
        assert_eq!(map["#bar"]["color"], "#00FF00");
    }

    #[test]
    fn jtv_mode_is_silent() {
        assert!(run(&mut session(), ":jtv MODE #foo +o someone").is_empty());
    }

    #[test]
    fn names_reply_splits_nick_list() {
        let event = only_event(run(
            &mut session(),
            ":testuser.tmi.twitch.tv 353 testuser = #foo :alpha beta gamma",
        ));
        assert!(matches!(
            event,
            Event::Names { channel, nicks }
                if channel == "#foo" && nicks == ["alpha", "beta", "gamma"]
        ));
    }

    #[test]
    fn end_of_names_is_silent() {
        let actions = run(
            &mut session(),
            ":testuser.tmi.twitch.tv 366 testuser #foo :End of /NAMES list",
        );
        assert!(actions.is_empty());
    }

    #[test]
    fn join_and_part_extract_nick_from_mask() {
        let mut s = session();
        let join = only_event(run(&mut s, ":other!other@other.tmi.twitch.tv JOIN #foo"));
        assert!(matches!(
            join,
            Event::Join { channel, username } if channel == "#foo" && username == "other"
        ));
        let part = only_event(run(&mut s, ":other!other@other.tmi.twitch.tv PART #foo"));
        assert!(matches!(
            part,
            Event::Part { channel, username } if channel == "#foo" && username == "other"
        ));
    }

    #[test]
    fn privmsg_emits_chat_with_lowercase_username_tag() {
        let event = only_event(run(
            &mut session(),
            "@display-name=Shouty :Shouty!shouty@shouty.tmi.twitch.tv PRIVMSG #foo :hello",
        ));
        let Event::Chat { channel, tags, message } = event else {
            panic!("expected chat");
        };
        assert_eq!(channel, "#foo");
        assert_eq!(message, "hello");
        assert_eq!(tags["username"], "shouty");
        assert_eq!(tags["display-name"], "Shouty");
    }

    #[test]
    fn privmsg_action_wrapper_is_stripped() {
        let event = only_event(run(
            &mut session(),
            ":u!u@u.tmi.twitch.tv PRIVMSG #foo :\u{1}ACTION waves\u{1}",
        ));
        assert!(matches!(
            event,
            Event::Action { message, .. } if message == "waves"
        ));
    }

    #[test]
    fn malformed_action_wrapper_stays_chat() {
        for body in ["\u{1}ACTION \u{1}", "\u{1}ACTION waves", "ACTION waves\u{1}"] {
            let line = format!(":u!u@u.tmi.twitch.tv PRIVMSG #foo :{body}");
            let event = only_event(run(&mut session(), &line));
            assert!(matches!(event, Event::Chat { .. }), "{body:?} was not chat");
        }
    }

    #[test]
    fn unrecognized_messages_produce_no_actions() {
        let mut s = session();
        for line in [
            "WIBBLE",
            ":tmi.twitch.tv WIBBLE #foo",
            ":jtv WIBBLE #foo",
            ":u!u@u.tmi.twitch.tv WIBBLE #foo",
        ] {
            assert!(run(&mut s, line).is_empty(), "{line} produced actions");
        }
    }
}
