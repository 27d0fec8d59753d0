//! Twitch chat driver: IRC over WebSocket, tag-driven permissions, and a
//! rate-limited send pump.

use crate::backends::{connect_ws_with_retries, irc_proto, Channel, UserPerms};
use crate::config::{ChannelConfig, TwitchConfig};
use crate::error::BackendError;
use crate::perms::flags;
use crate::rate::RateLimit;
use crate::{dispatch, Backend, BotContext, Message};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;

const TWITCH_WSS_URL: &str = "wss://irc-ws.chat.twitch.tv";

/// Twitch counts the limit in unicode codepoints.
const MESSAGE_LIMIT: usize = 500;

/// Token buckets per 30 s window; moderators get the raised limit.
const RATE_LIMIT_NORMAL: u64 = 20;
const RATE_LIMIT_MODERATOR: u64 = 100;
const RATE_WINDOW: Duration = Duration::from_secs(30);

/// Messages starting with `/` or `.` would run as twitch commands; they
/// get re-addressed to a dummy channel instead.
const DUMMY_CHANNEL: &str = "jebaited";

struct TxLine {
    line: String,
    moderator: bool,
    rated: bool,
}

#[derive(Clone)]
struct TwitchSender {
    tx: mpsc::Sender<TxLine>,
}

impl TwitchSender {
    async fn raw(&self, line: impl Into<String>) {
        let mut line = line.into();
        // never let a payload smuggle in a second command
        if let Some(at) = line.find(['\r', '\n']) {
            line.truncate(at);
        }
        line.push_str("\r\n");

        let _ = self
            .tx
            .send(TxLine {
                line,
                moderator: false,
                rated: false,
            })
            .await;
    }

    async fn privmsg(&self, channel: &str, text: &str, moderator: bool) {
        let mut line = format!("PRIVMSG #{channel} :{text}");
        if let Some(at) = line.find(['\r', '\n']) {
            line.truncate(at);
        }
        line.push_str("\r\n");

        let _ = self
            .tx
            .send(TxLine {
                line,
                moderator,
                rated: true,
            })
            .await;
    }
}

/// One joined twitch channel, as seen by the dispatcher.
pub struct TwitchChannel {
    ctx: BotContext,
    sender: TwitchSender,
    name: String,
    username: String,
    config: ChannelConfig,
}

#[async_trait]
impl Channel for TwitchChannel {
    fn backend(&self) -> Backend {
        Backend::Twitch
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn username(&self) -> String {
        self.username.clone()
    }

    fn command_prefixes(&self) -> Vec<String> {
        vec![self.config.command_prefix.clone()]
    }

    fn should_reply_mentions(&self) -> bool {
        self.config.respond_to_pings
    }

    fn should_print_interp_errors(&self) -> bool {
        !self.config.silent_interp_errors
    }

    fn should_lurk(&self) -> bool {
        self.config.lurk
    }

    async fn user_permissions(&self, user_id: &str) -> UserPerms {
        let db = self.ctx.db.read().await;
        let user = db
            .twitch
            .get_channel(&self.name)
            .and_then(|chan| chan.get_user(user_id));

        match user {
            Some(user) => UserPerms {
                flags: user.permissions,
                groups: user.groups.clone(),
                roles: Vec::new(),
            },
            None => UserPerms::default(),
        }
    }

    async fn send_message(&self, msg: &Message) {
        let text = msg.render_plain();
        let text = text.trim();
        if text.is_empty() {
            return;
        }

        for chunk in split_message(text, MESSAGE_LIMIT) {
            if chunk.starts_with(['/', '.']) {
                self.sender
                    .privmsg(DUMMY_CHANNEL, &chunk, self.config.moderator)
                    .await;
            } else {
                self.sender
                    .privmsg(&self.name, &chunk, self.config.moderator)
                    .await;
            }
        }
    }
}

/// Splits at the last space at or before the limit when one exists, else
/// hard-cuts at the limit. No characters are lost at the boundary; the
/// splitting space itself is dropped.
fn split_message(text: &str, limit: usize) -> Vec<String> {
    let codepoints: Vec<char> = text.chars().collect();
    let mut rest = codepoints.as_slice();
    let mut out = Vec::new();

    while !rest.is_empty() {
        if rest.len() <= limit {
            out.push(rest.iter().collect());
            break;
        }

        let window = &rest[..limit];
        match window.iter().rposition(|&c| c == ' ') {
            Some(at) if at > 0 => {
                out.push(rest[..at].iter().collect());
                rest = &rest[at + 1..];
            }
            _ => {
                out.push(window.iter().collect());
                rest = &rest[limit..];
            }
        }
    }

    out.retain(|s: &String| !s.trim().is_empty());
    out
}

/// Maps the `emotes=ID:a-b,a-b/...` tag (inclusive codepoint indices) to
/// byte ranges into the message.
fn emote_ranges(tag: &str, message: &str) -> Vec<(usize, usize)> {
    let mut cp_ranges: Vec<(usize, usize)> = Vec::new();

    for emote in tag.split('/') {
        let Some((_id, positions)) = emote.split_once(':') else {
            continue;
        };

        for pos in positions.split(',') {
            if let Some((a, b)) = pos.split_once('-') {
                if let (Ok(a), Ok(b)) = (a.parse::<usize>(), b.parse::<usize>()) {
                    if a <= b {
                        cp_ranges.push((a, b));
                    }
                }
            }
        }
    }

    cp_ranges.sort_unstable();

    let offsets: Vec<usize> = message.char_indices().map(|(i, _)| i).collect();
    let mut out = Vec::with_capacity(cp_ranges.len());

    for (a, b) in cp_ranges {
        if a >= offsets.len() || b >= offsets.len() {
            continue;
        }

        let start = offsets[a];
        let end = offsets.get(b + 1).copied().unwrap_or(message.len());
        out.push((start, end - start));
    }

    out
}

async fn send_pump(
    mut rx: mpsc::Receiver<TxLine>,
    mut sink: futures::stream::SplitSink<super::WsStream, WsMessage>,
) {
    let mut normal = RateLimit::new(RATE_LIMIT_NORMAL, RATE_WINDOW);
    let mut moderator = RateLimit::new(RATE_LIMIT_MODERATOR, RATE_WINDOW);

    while let Some(item) = rx.recv().await {
        if item.rated {
            let bucket = if item.moderator { &mut moderator } else { &mut normal };
            while !bucket.attempt() {
                tokio::time::sleep_until(bucket.next_refill().into()).await;
            }
        }

        tracing::debug!(target: "twitch", line = %item.line.trim_end(), ">>");
        if sink.send(WsMessage::Text(item.line.into())).await.is_err() {
            break;
        }
    }

    tracing::info!(target: "twitch", "send pump exited");
}

/// Runs the twitch driver until shutdown: connect, authenticate, join the
/// configured channels, then pump messages into the dispatcher.
pub async fn run(ctx: BotContext, cfg: TwitchConfig) -> Result<(), BackendError> {
    tracing::info!(target: "twitch", "connecting");
    let ws = connect_ws_with_retries(TWITCH_WSS_URL).await?;
    let (sink, mut stream) = ws.split();

    let (tx, rx) = mpsc::channel(256);
    let sender = TwitchSender { tx };
    tokio::spawn(send_pump(rx, sink));

    sender
        .raw("CAP REQ :twitch.tv/tags twitch.tv/commands")
        .await;
    sender.raw(format!("PASS oauth:{}", cfg.oauth_token)).await;
    sender.raw(format!("NICK {}", cfg.username)).await;

    let mut shutdown = ctx.shutdown_rx();

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }

            frame = stream.next() => {
                match frame {
                    Some(Ok(WsMessage::Text(payload))) => {
                        for line in payload.as_str().split_terminator("\r\n") {
                            handle_line(&ctx, &cfg, &sender, line).await;
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => {
                        tracing::warn!(target: "twitch", "connection closed");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(error)) => {
                        tracing::error!(target: "twitch", %error, "read error");
                        break;
                    }
                }
            }
        }
    }

    for chan in &cfg.channels {
        sender.raw(format!("PART #{}", chan.name)).await;
    }

    tracing::info!(target: "twitch", "driver exited");
    Ok(())
}

async fn handle_line(ctx: &BotContext, cfg: &TwitchConfig, sender: &TwitchSender, line: &str) {
    if line.is_empty() {
        return;
    }

    let Some(msg) = irc_proto::parse(line) else {
        tracing::error!(target: "twitch", %line, "malformed irc line");
        return;
    };

    match msg.command {
        "PING" => {
            let server = msg.params.first().copied().unwrap_or("");
            sender.raw(format!("PONG :{server}")).await;
        }

        // ready marker; join the configured channels
        "001" => {
            tracing::info!(target: "twitch", "connected");
            for chan in &cfg.channels {
                sender.raw(format!("JOIN #{}", chan.name)).await;
            }
        }

        "CAP" => {
            if let Some(cap) = msg.params.last() {
                tracing::info!(target: "twitch", %cap, "negotiated capability");
            }
        }

        "JOIN" => {
            tracing::info!(target: "twitch", channel = ?msg.params.first(), "joined");
        }

        "PART" => {
            tracing::info!(target: "twitch", channel = ?msg.params.last(), "parted");
        }

        "NOTICE" => {
            tracing::info!(target: "twitch", params = ?msg.params, "notice");
        }

        "PRIVMSG" => process_privmsg(ctx, cfg, sender, &msg).await,

        "353" | "366" | "CLEARCHAT" | "CLEARMSG" | "HOSTTARGET" | "RECONNECT" | "ROOMSTATE"
        | "USERNOTICE" | "USERSTATE" => {}

        other => {
            tracing::warn!(target: "twitch", command = %other, "ignoring unhandled irc command");
        }
    }
}

async fn process_privmsg(
    ctx: &BotContext,
    cfg: &TwitchConfig,
    sender: &TwitchSender,
    msg: &irc_proto::IrcMessage<'_>,
) {
    if msg.params.len() < 2 {
        tracing::error!(target: "twitch", "malformed PRIVMSG: fewer than 2 params");
        return;
    }

    // other ctcp commands (VERSION etc.) aren't chat
    if msg.is_ctcp() && msg.ctcp_command != Some("ACTION") {
        return;
    }

    let Some(username) = msg.nick else { return };

    if username.eq_ignore_ascii_case(&cfg.username) {
        return;
    }

    if cfg.ignored_users.iter().any(|u| u.eq_ignore_ascii_case(username)) {
        return;
    }

    let Some(channel_name) = msg.params[0].strip_prefix('#') else {
        tracing::error!(target: "twitch", channel = %msg.params[0], "malformed channel");
        return;
    };

    let Some(chan_cfg) = cfg.channels.iter().find(|c| c.name == channel_name) else {
        return;
    };

    let message = msg.params[msg.params.len() - 1].trim();
    let emotes = msg
        .tags
        .get("emotes")
        .map(|tag| emote_ranges(tag, message))
        .unwrap_or_default();

    let Some(user_id) = update_user_credentials(ctx, cfg, channel_name, username, msg).await else {
        tracing::warn!(target: "twitch", %username, "message contained no user id");
        return;
    };

    let display_name = msg
        .tags
        .get("display-name")
        .filter(|n| !n.is_empty())
        .map(|n| n.as_str())
        .unwrap_or(username);

    let channel: Arc<dyn Channel> = Arc::new(TwitchChannel {
        ctx: ctx.clone(),
        sender: sender.clone(),
        name: channel_name.to_string(),
        username: cfg.username.clone(),
        config: chan_cfg.clone(),
    });

    dispatch::process_message(
        ctx,
        channel,
        &user_id,
        display_name,
        message,
        emotes,
        /* enable_pings: */ true,
        /* is_edit: */ false,
    )
    .await;
}

/// Refreshes the stored user record from the message tags: permissions
/// from badges, subscription length from badge-info, plus the
/// username/display-name mappings. Returns the user id.
async fn update_user_credentials(
    ctx: &BotContext,
    cfg: &TwitchConfig,
    channel: &str,
    username: &str,
    msg: &irc_proto::IrcMessage<'_>,
) -> Option<String> {
    let user_id = msg.tags.get("user-id").filter(|v| !v.is_empty())?.clone();

    let mut perms = flags::EVERYONE;
    let mut sub_months = 0u64;

    if cfg.owner == username || cfg.owner == user_id {
        perms |= flags::OWNER;
    }

    if let Some(badges) = msg.tags.get("badges") {
        for badge in badges.split(',') {
            if badge.starts_with("subscriber") || badge.starts_with("founder") {
                perms |= flags::SUBSCRIBER;
            } else if badge.starts_with("vip") {
                perms |= flags::VIP;
            } else if badge.starts_with("moderator") {
                perms |= flags::MODERATOR;
            } else if badge.starts_with("broadcaster") {
                perms |= flags::BROADCASTER;
            }
        }
    }

    if let Some(info) = msg.tags.get("badge-info") {
        for badge in info.split(',') {
            if badge.starts_with("subscriber") || badge.starts_with("founder") {
                if let Some((_, months)) = badge.split_once('/') {
                    sub_months = months.parse().unwrap_or(0);
                }
            }
        }
    }

    let display_name = msg.tags.get("display-name").cloned().unwrap_or_default();

    let mut db = ctx.db.write().await;
    let chan = db.twitch.channels.entry(channel.to_string()).or_default();
    let user = chan.known_users.entry(user_id.clone()).or_default();

    if user.id.is_empty() {
        tracing::info!(target: "twitch", %username, %user_id, %channel, "adding user");
    } else if user.id != user_id {
        tracing::warn!(
            target: "twitch",
            %username,
            old = %user.id,
            new = %user_id,
            "user changed id"
        );
    }

    user.id = user_id.clone();
    user.username = username.to_string();
    user.display_name = display_name;
    user.permissions = perms;
    user.subscribed_months = sub_months;

    chan.username_mapping
        .insert(username.to_string(), user_id.clone());

    Some(user_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_message_short_passthrough() {
        let text = "a".repeat(500);
        assert_eq!(split_message(&text, 500), vec![text]);
    }

    #[test]
    fn test_split_message_at_last_space() {
        // 501 codepoints with a space at index 497
        let text = format!("{} {}", "a".repeat(497), "b".repeat(3));
        let chunks = split_message(&text, 500);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], "a".repeat(497));
        assert_eq!(chunks[1], "b".repeat(3));
    }

    #[test]
    fn test_split_message_hard_cut_without_spaces() {
        let text = "x".repeat(501);
        let chunks = split_message(&text, 500);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].chars().count(), 500);
        assert_eq!(chunks[1].chars().count(), 1);
    }

    #[test]
    fn test_split_message_two_frames_no_lost_characters() {
        // 1001 codepoints: 500 + space + 500 emits exactly two frames
        let text = format!("{} {}", "a".repeat(500), "b".repeat(500));
        let chunks = split_message(&text, 500);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].chars().count(), 500);
        assert_eq!(chunks[1].chars().count(), 500);

        let rejoined: usize = chunks.iter().map(|c| c.chars().count()).sum();
        assert_eq!(rejoined, 1000); // only the splitting space is dropped
    }

    #[test]
    fn test_split_message_counts_codepoints_not_bytes() {
        let text = "é".repeat(501);
        let chunks = split_message(&text, 500);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].chars().count(), 500);
    }

    #[test]
    fn test_emote_ranges_codepoints_to_bytes() {
        //        0123456789...
        let msg = "héllo Kappa x";
        // "Kappa" spans codepoints 6..=10
        let ranges = emote_ranges("25:6-10", msg);
        assert_eq!(ranges.len(), 1);

        let (start, len) = ranges[0];
        assert_eq!(&msg[start..start + len], "Kappa");
    }

    #[test]
    fn test_emote_ranges_multiple_and_sorted() {
        let msg = "Kappa mid Kappa";
        let ranges = emote_ranges("25:10-14,0-4", msg);
        assert_eq!(ranges.len(), 2);
        assert_eq!(&msg[ranges[0].0..ranges[0].0 + ranges[0].1], "Kappa");
        assert!(ranges[0].0 < ranges[1].0);
    }

    #[test]
    fn test_emote_ranges_ignores_garbage() {
        assert!(emote_ranges("bogus", "text").is_empty());
        assert!(emote_ranges("1:9-5", "text").is_empty());
        assert!(emote_ranges("1:50-60", "short").is_empty());
    }
}
