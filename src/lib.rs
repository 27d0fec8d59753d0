//! ikura: a multi-protocol chat bot with an embedded command language,
//! an append-only binary database, and a markov-chain chatter.

pub mod backends;
pub mod config;
pub mod console;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod interp;
pub mod markov;
pub mod perms;
pub mod rate;
pub mod serialise;

pub use error::{Error, Result};

use crate::serialise::{CodecError, CodecResult, Deserialise, Reader, Serialise, Writer};

/// Which protocol a channel or user record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    Twitch,
    Discord,
    Irc,
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::Twitch => write!(f, "twitch"),
            Backend::Discord => write!(f, "discord"),
            Backend::Irc => write!(f, "irc"),
        }
    }
}

impl Serialise for Backend {
    fn serialise(&self, wr: &mut Writer) {
        let x: u64 = match self {
            Backend::Twitch => 0,
            Backend::Discord => 1,
            Backend::Irc => 2,
        };
        wr.write_u64(x);
    }
}

impl Deserialise for Backend {
    fn deserialise(rd: &mut Reader) -> CodecResult<Self> {
        match rd.read_u64()? {
            0 => Ok(Backend::Twitch),
            1 => Ok(Backend::Discord),
            2 => Ok(Backend::Irc),
            x => Err(CodecError::InvalidTag(x as u8)),
        }
    }
}

/// A named emote reference inside a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Emote {
    pub name: String,
}

impl Emote {
    pub fn new(name: impl Into<String>) -> Self {
        Emote { name: name.into() }
    }
}

/// One piece of an outbound message: literal text or an emote that the
/// backend renders in its own syntax.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    Text(String),
    Emote(Emote),
}

/// An ordered sequence of fragments. Empty messages are never sent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    pub fragments: Vec<Fragment>,
}

impl Message {
    pub fn new() -> Self {
        Message::default()
    }

    pub fn text(s: impl Into<String>) -> Self {
        let mut msg = Message::new();
        msg.add_text(s);
        msg
    }

    pub fn add_text(&mut self, s: impl Into<String>) -> &mut Self {
        self.fragments.push(Fragment::Text(s.into()));
        self
    }

    pub fn add_emote(&mut self, e: Emote) -> &mut Self {
        self.fragments.push(Fragment::Emote(e));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Renders the message as plain text. Fragments are joined by single
    /// spaces, except fragments starting with `.`, `,`, `?` or `!`, which
    /// attach to the previous fragment.
    pub fn render_plain(&self) -> String {
        let mut out = String::new();
        for frag in &self.fragments {
            let piece = match frag {
                Fragment::Text(s) => s.as_str(),
                Fragment::Emote(e) => e.name.as_str(),
            };

            if piece.is_empty() {
                continue;
            }

            let no_space = matches!(piece.as_bytes()[0], b'.' | b',' | b'?' | b'!')
                && matches!(frag, Fragment::Text(_));

            if !out.is_empty() && !no_space {
                out.push(' ');
            }

            out.push_str(piece);
        }

        out
    }
}

/// The handles every subsystem needs; created once in `main` and cloned
/// freely, so tests can wire up fresh instances.
#[derive(Clone)]
pub struct BotContext {
    pub db: db::DbHandle,
    pub interp: interp::Interp,
    pub markov: markov::MarkovHandle,
    pub markov_tx: markov::MarkovSender,
    pub config: std::sync::Arc<config::Config>,
    pub shutdown: tokio::sync::watch::Sender<bool>,
}

impl BotContext {
    /// Signals every worker to wind down.
    pub fn request_shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn shutdown_rx(&self) -> tokio::sync::watch::Receiver<bool> {
        self.shutdown.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_plain_spacing() {
        let mut msg = Message::new();
        msg.add_text("hello");
        msg.add_text("world");
        msg.add_text("!");
        msg.add_emote(Emote::new("Kappa"));
        assert_eq!(msg.render_plain(), "hello world! Kappa");
    }

    #[test]
    fn test_render_plain_punctuation_emote_still_spaced() {
        // only text fragments attach without a space; an emote whose name
        // begins with punctuation keeps its separator.
        let mut msg = Message::new();
        msg.add_text("hi");
        msg.add_emote(Emote::new("!wave"));
        assert_eq!(msg.render_plain(), "hi !wave");
    }
}
