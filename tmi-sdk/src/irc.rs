//! Raw IRC line parsing.
//!
//! Twitch chat speaks IRCv3 framed as WebSocket text. This module turns
//! one raw line into a [`Message`] and classifies its prefix for the
//! dispatcher. It holds no state.

use std::collections::HashMap;

/// Hostname the server uses as its own prefix on protocol messages.
pub const TMI_HOST: &str = "tmi.twitch.tv";

/// A parsed protocol line: `@tags :prefix COMMAND params :trailing`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    /// IRCv3 tags, unescaped. Empty when the line carried none.
    pub tags: HashMap<String, String>,
    pub prefix: Option<String>,
    /// Command token or 3-digit numeric, matched as an exact string.
    pub command: String,
    pub params: Vec<String>,
}

/// Who a message came from, derived from its prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prefix {
    /// No prefix at all (PING, PONG).
    None,
    /// The server itself (`tmi.twitch.tv`).
    Server,
    /// The legacy `jtv` pseudo-user.
    Jtv,
    /// Anything else; carries the nick (text before the first `!`).
    User(String),
}

impl Message {
    /// Parse one line, with any trailing CR-LF stripped first.
    /// Returns `None` for blank or unparseable lines.
    pub fn parse(line: &str) -> Option<Message> {
        let mut rest = line.trim_end_matches(['\r', '\n']);
        if rest.is_empty() {
            return None;
        }

        let mut tags = HashMap::new();
        if let Some(tail) = rest.strip_prefix('@') {
            let (raw_tags, tail) = tail.split_once(' ')?;
            for tag in raw_tags.split(';') {
                match tag.split_once('=') {
                    Some((key, value)) => tags.insert(key.to_string(), unescape_tag(value)),
                    None => tags.insert(tag.to_string(), String::new()),
                };
            }
            rest = tail;
        }

        let mut prefix = None;
        if let Some(tail) = rest.strip_prefix(':') {
            let (pfx, tail) = tail.split_once(' ')?;
            prefix = Some(pfx.to_string());
            rest = tail;
        }

        let mut params = Vec::new();
        let command = match rest.split_once(' ') {
            Some((command, mut tail)) => {
                loop {
                    if let Some(trailing) = tail.strip_prefix(':') {
                        params.push(trailing.to_string());
                        break;
                    }
                    match tail.split_once(' ') {
                        Some((param, next)) => {
                            if !param.is_empty() {
                                params.push(param.to_string());
                            }
                            tail = next;
                        }
                        None => {
                            if !tail.is_empty() {
                                params.push(tail.to_string());
                            }
                            break;
                        }
                    }
                }
                command.to_string()
            }
            None => rest.to_string(),
        };

        if command.is_empty() {
            return None;
        }
        Some(Message { tags, prefix, command, params })
    }

    /// Prefix classification used as the dispatch key.
    pub fn prefix_class(&self) -> Prefix {
        match self.prefix.as_deref() {
            None => Prefix::None,
            Some(TMI_HOST) => Prefix::Server,
            Some("jtv") => Prefix::Jtv,
            Some(mask) => Prefix::User(nick_of(mask)),
        }
    }
}

/// Nick from a `nick!user@host` mask: the text before the first `!`.
pub fn nick_of(mask: &str) -> String {
    mask.split('!').next().unwrap_or(mask).to_string()
}

/// Undo IRCv3 tag value escaping.
fn unescape_tag(value: &str) -> String {
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
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some('\\') => out.push('\\'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_privmsg_with_tags_and_trailing() {
        let line = "@badges=broadcaster/1;display-name=Pajlada :pajlada!pajlada@pajlada.tmi.twitch.tv PRIVMSG #pajlada :KKona foobar\r\n";
        let msg = Message::parse(line).unwrap();
        assert_eq!(msg.command, "PRIVMSG");
        assert_eq!(msg.prefix.as_deref(), Some("pajlada!pajlada@pajlada.tmi.twitch.tv"));
        assert_eq!(msg.params, vec!["#pajlada", "KKona foobar"]);
        assert_eq!(msg.tags["display-name"], "Pajlada");
        assert_eq!(msg.tags["badges"], "broadcaster/1");
    }

    #[test]
    fn parses_bare_ping() {
        let msg = Message::parse("PING :tmi.twitch.tv").unwrap();
        assert_eq!(msg.command, "PING");
        assert!(msg.prefix.is_none());
        assert_eq!(msg.params, vec!["tmi.twitch.tv"]);
    }

    #[test]
    fn parses_numeric_with_middle_params() {
        let msg =
            Message::parse(":justinfan1.tmi.twitch.tv 353 justinfan1 = #chan :a b c").unwrap();
        assert_eq!(msg.command, "353");
        assert_eq!(msg.params, vec!["justinfan1", "=", "#chan", "a b c"]);
    }

    #[test]
    fn unescapes_tag_values() {
        let msg = Message::parse(
            "@system-msg=hello\\sworld\\:\\\\ :tmi.twitch.tv NOTICE #chan :x",
        )
        .unwrap();
        assert_eq!(msg.tags["system-msg"], "hello world;\\");
    }

    #[test]
    fn valueless_tag_is_empty_string() {
        let msg = Message::parse("@flag :tmi.twitch.tv NOTICE #chan :x").unwrap();
        assert_eq!(msg.tags["flag"], "");
    }

    #[test]
    fn blank_line_is_rejected() {
        assert!(Message::parse("").is_none());
        assert!(Message::parse("\r\n").is_none());
    }

    #[test]
    fn classifies_prefixes() {
        let server = Message::parse(":tmi.twitch.tv 372 :motd").unwrap();
        assert_eq!(server.prefix_class(), Prefix::Server);

        let jtv = Message::parse(":jtv MODE #chan +o someone").unwrap();
        assert_eq!(jtv.prefix_class(), Prefix::Jtv);

        let none = Message::parse("PING").unwrap();
        assert_eq!(none.prefix_class(), Prefix::None);

        let user = Message::parse(":Nick!nick@nick.tmi.twitch.tv JOIN #chan").unwrap();
        assert_eq!(user.prefix_class(), Prefix::User("Nick".to_string()));
    }

    #[test]
    fn nick_extraction_handles_bare_prefixes() {
        assert_eq!(nick_of("nick!user@host"), "nick");
        assert_eq!(nick_of("justinfan1.tmi.twitch.tv"), "justinfan1.tmi.twitch.tv");
    }
}
