//! IRC line parser: IRCv3 tags, prefix, command, params and CTCP
//! decoration. Shared by the twitch and plain-irc drivers.

use std::collections::HashMap;

const CTCP_DELIM: char = '\u{1}';

/// One parsed IRC line. Slices borrow from the input line.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IrcMessage<'a> {
    pub tags: HashMap<&'a str, String>,

    /// The full prefix, without the leading `:`.
    pub prefix: Option<&'a str>,

    /// nick and user split out of `nick!user@host`.
    pub nick: Option<&'a str>,
    pub user: Option<&'a str>,

    pub command: &'a str,
    pub params: Vec<&'a str>,

    /// Set when the trailing param was `\x01CMD body\x01`.
    pub ctcp_command: Option<&'a str>,
    pub ctcp_body: Option<&'a str>,
}

impl IrcMessage<'_> {
    pub fn is_ctcp(&self) -> bool {
        self.ctcp_command.is_some()
    }
}

// IRCv3 tag value escapes: \: \s \\ \r \n
fn unescape_tag_value(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();

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

/// Parses one line (without the trailing `\r\n`). Returns `None` for
/// lines with no command.
pub fn parse(line: &str) -> Option<IrcMessage<'_>> {
    let mut rest = line.trim_end_matches(['\r', '\n']);
    let mut msg = IrcMessage::default();

    if let Some(tagged) = rest.strip_prefix('@') {
        let (tag_str, after) = tagged.split_once(' ')?;
        rest = after;

        for pair in tag_str.split(';') {
            match pair.split_once('=') {
                Some((key, value)) => msg.tags.insert(key, unescape_tag_value(value)),
                None => msg.tags.insert(pair, String::new()),
            };
        }
    }

    rest = rest.trim_start();

    if let Some(prefixed) = rest.strip_prefix(':') {
        let (prefix, after) = prefixed.split_once(' ')?;
        rest = after;
        msg.prefix = Some(prefix);

        if let Some((nick, userhost)) = prefix.split_once('!') {
            msg.nick = Some(nick);
            msg.user = Some(userhost.split_once('@').map_or(userhost, |(u, _)| u));
        } else {
            msg.nick = Some(prefix.split_once('@').map_or(prefix, |(n, _)| n));
        }
    }

    rest = rest.trim_start();

    // params up to the trailing `:` param
    let (middle, trailing) = match rest.split_once(" :") {
        Some((middle, trailing)) => (middle, Some(trailing)),
        None => (rest, None),
    };

    let mut parts = middle.split_ascii_whitespace();
    msg.command = parts.next()?;
    msg.params = parts.collect();

    if let Some(trailing) = trailing {
        // CTCP: \x01COMMAND body\x01
        if let Some(inner) = trailing
            .strip_prefix(CTCP_DELIM)
            .map(|s| s.strip_suffix(CTCP_DELIM).unwrap_or(s))
        {
            match inner.split_once(' ') {
                Some((cmd, body)) => {
                    msg.ctcp_command = Some(cmd);
                    msg.ctcp_body = Some(body);
                    msg.params.push(body);
                }
                None => {
                    msg.ctcp_command = Some(inner);
                    msg.params.push(inner);
                }
            }
        } else {
            msg.params.push(trailing);
        }
    }

    if msg.command.is_empty() {
        return None;
    }

    Some(msg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_privmsg() {
        let msg = parse(":alice!alice@alice.tmi.twitch.tv PRIVMSG #chan :hello there").unwrap();
        assert_eq!(msg.command, "PRIVMSG");
        assert_eq!(msg.nick, Some("alice"));
        assert_eq!(msg.user, Some("alice"));
        assert_eq!(msg.params, vec!["#chan", "hello there"]);
        assert!(!msg.is_ctcp());
    }

    #[test]
    fn test_tagged_message() {
        let msg = parse(
            "@badges=moderator/1;user-id=42;display-name=Alice :alice!alice@host PRIVMSG #chan :!eval 1+2*3",
        )
        .unwrap();

        assert_eq!(msg.tags.get("user-id").unwrap(), "42");
        assert_eq!(msg.tags.get("display-name").unwrap(), "Alice");
        assert_eq!(msg.tags.get("badges").unwrap(), "moderator/1");
        assert_eq!(msg.params[1], "!eval 1+2*3");
    }

    #[test]
    fn test_tag_value_unescaping() {
        let msg = parse("@key=semi\\:space\\sslash\\\\ :x!y@z PRIVMSG #c :m").unwrap();
        assert_eq!(msg.tags.get("key").unwrap(), "semi;space slash\\");
    }

    #[test]
    fn test_valueless_tag() {
        let msg = parse("@flag :x!y@z PRIVMSG #c :m").unwrap();
        assert_eq!(msg.tags.get("flag").unwrap(), "");
    }

    #[test]
    fn test_ping_without_prefix() {
        let msg = parse("PING :tmi.twitch.tv").unwrap();
        assert_eq!(msg.command, "PING");
        assert_eq!(msg.params, vec!["tmi.twitch.tv"]);
    }

    #[test]
    fn test_numeric_with_params() {
        let msg = parse(":tmi.twitch.tv 001 somebot :Welcome, GLHF!").unwrap();
        assert_eq!(msg.command, "001");
        assert_eq!(msg.params, vec!["somebot", "Welcome, GLHF!"]);
    }

    #[test]
    fn test_ctcp_action() {
        let msg = parse(":a!b@c PRIVMSG #chan :\u{1}ACTION waves\u{1}").unwrap();
        assert!(msg.is_ctcp());
        assert_eq!(msg.ctcp_command, Some("ACTION"));
        assert_eq!(msg.ctcp_body, Some("waves"));
        assert_eq!(msg.params, vec!["#chan", "waves"]);
    }

    #[test]
    fn test_ctcp_version_no_body() {
        let msg = parse(":a!b@c PRIVMSG bot :\u{1}VERSION\u{1}").unwrap();
        assert_eq!(msg.ctcp_command, Some("VERSION"));
        assert_eq!(msg.ctcp_body, None);
    }

    #[test]
    fn test_garbage_returns_none() {
        assert!(parse("").is_none());
        assert!(parse("@tags-only").is_none());
        assert!(parse(":prefix-only").is_none());
    }
}
