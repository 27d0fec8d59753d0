//! Discord driver: gateway WebSocket for inbound events, REST for
//! outbound messages.
//!
//! The connection runs the state machine from `gateway::ConnState`: HELLO
//! moves us to identifying, READY to connected; a heartbeat whose ack
//! never arrived closes with a non-normal code and reconnects from
//! scratch, and INVALID_SESS restarts the identify handshake.

pub mod dispatch;
pub mod gateway;

use crate::backends::{connect_ws_with_retries, Channel, UserPerms};
use crate::config::{DiscordConfig, GuildConfig};
use crate::db::Snowflake;
use crate::error::BackendError;
use crate::{Backend, BotContext, Fragment, Message};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use gateway::{opcode, ConnState};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;

const API_URL: &str = "https://discord.com/api";
const API_VERSION: u32 = 6;

const USER_AGENT: &str = concat!(
    "DiscordBot (https://github.com/ikura-bot/ikura, ",
    env!("CARGO_PKG_VERSION"),
    ")"
);

const HTTP_TIMEOUT: Duration = Duration::from_secs(2);
const IDENTIFY_TIMEOUT: Duration = Duration::from_millis(1500);
const IDENTIFY_RETRY_PAUSE: Duration = Duration::from_secs(6);

enum WsOut {
    Frame(String),
    Close(u16),
}

/// One guild text channel, addressed over REST.
pub struct DiscordChannel {
    pub(crate) ctx: BotContext,
    pub(crate) http: reqwest::Client,
    pub(crate) token: String,
    pub(crate) guild_id: Snowflake,
    pub(crate) channel_id: Snowflake,
    pub(crate) channel_name: String,
    pub(crate) username: String,
    pub(crate) config: GuildConfig,
}

impl DiscordChannel {
    /// Renders fragments into Discord syntax: emotes that resolve in the
    /// guild's emote table become `<:name:id>` (or `<a:name:id>` when
    /// animated), unresolved ones fall back to the bare name.
    async fn render(&self, msg: &Message) -> String {
        let db = self.ctx.db.read().await;
        let emotes = db.discord.guilds.get(&self.guild_id).map(|g| &g.emotes);

        let mut out = String::new();
        for frag in &msg.fragments {
            let piece = match frag {
                Fragment::Text(s) => s.clone(),
                Fragment::Emote(e) => match emotes.and_then(|table| table.get(&e.name)) {
                    Some(emote) if emote.animated => format!("<a:{}:{}>", e.name, emote.id),
                    Some(emote) => format!("<:{}:{}>", e.name, emote.id),
                    None => e.name.clone(),
                },
            };

            if piece.is_empty() {
                continue;
            }

            let no_space = matches!(frag, Fragment::Text(_))
                && matches!(piece.as_bytes()[0], b'.' | b',' | b'?' | b'!');

            if !out.is_empty() && !no_space {
                out.push(' ');
            }
            out.push_str(&piece);
        }

        out
    }
}

#[async_trait]
impl Channel for DiscordChannel {
    fn backend(&self) -> Backend {
        Backend::Discord
    }

    fn name(&self) -> String {
        self.channel_name.clone()
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

    fn guild_id(&self) -> Option<Snowflake> {
        Some(self.guild_id)
    }

    async fn user_permissions(&self, user_id: &str) -> UserPerms {
        let Ok(id) = user_id.parse::<Snowflake>() else {
            return UserPerms::default();
        };

        let db = self.ctx.db.read().await;
        let user = db
            .discord
            .guilds
            .get(&self.guild_id)
            .and_then(|g| g.get_user(id));

        match user {
            Some(user) => UserPerms {
                flags: user.permissions,
                groups: user.groups.clone(),
                roles: user.roles.clone(),
            },
            None => UserPerms::default(),
        }
    }

    async fn send_message(&self, msg: &Message) {
        let content = self.render(msg).await;
        if content.trim().is_empty() {
            return;
        }

        let url = format!(
            "{API_URL}/v{API_VERSION}/channels/{}/messages",
            self.channel_id
        );

        let result = self
            .http
            .post(&url)
            .header(reqwest::header::AUTHORIZATION, format!("Bot {}", self.token))
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .json(&serde_json::json!({ "content": content }))
            .send()
            .await;

        match result {
            Ok(response) if !response.status().is_success() => {
                tracing::error!(
                    target: "discord",
                    status = %response.status(),
                    channel = %self.channel_id,
                    "failed to send message"
                );
            }
            Ok(_) => {}
            Err(error) => {
                tracing::error!(target: "discord", %error, "failed to send message");
            }
        }
    }
}

enum ConnectionEnd {
    Shutdown,
    Reconnect,
}

/// Runs the discord driver until shutdown, reconnecting from scratch
/// whenever a connection dies.
pub async fn run(ctx: BotContext, cfg: DiscordConfig) -> Result<(), BackendError> {
    let http = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;

    let gw: gateway::GatewayBot = http
        .get(format!("{API_URL}/v{API_VERSION}/gateway/bot"))
        .header(reqwest::header::AUTHORIZATION, format!("Bot {}", cfg.oauth_token))
        .header(reqwest::header::USER_AGENT, USER_AGENT)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    let limit = &gw.session_start_limit;
    if limit.remaining == 0 {
        tracing::error!(
            target: "discord",
            reset_after = limit.reset_after,
            "connection rate limit reached"
        );
        return Err(BackendError::Protocol(String::from(
            "session start limit exhausted",
        )));
    } else if limit.remaining <= 20 {
        tracing::warn!(
            target: "discord",
            remaining = limit.remaining,
            reset_after = limit.reset_after,
            "few gateway sessions remaining"
        );
    } else {
        tracing::info!(target: "discord", remaining = limit.remaining, "sessions left");
    }

    let url = format!("{}?v={API_VERSION}&encoding=json", gw.url);
    let mut shutdown = ctx.shutdown_rx();

    loop {
        if *shutdown.borrow() {
            break;
        }

        match run_connection(&ctx, &cfg, &http, &url, &mut shutdown).await {
            Ok(ConnectionEnd::Shutdown) => break,
            Ok(ConnectionEnd::Reconnect) => {
                tracing::info!(target: "discord", "reconnecting");
            }
            Err(error) => {
                tracing::error!(target: "discord", %error, "connection failed");
                tokio::time::sleep(IDENTIFY_RETRY_PAUSE).await;
            }
        }
    }

    tracing::info!(target: "discord", "driver exited");
    Ok(())
}

async fn run_connection(
    ctx: &BotContext,
    cfg: &DiscordConfig,
    http: &reqwest::Client,
    url: &str,
    shutdown: &mut tokio::sync::watch::Receiver<bool>,
) -> Result<ConnectionEnd, BackendError> {
    let mut state = ConnState::Connecting;
    let enter = |s: &mut ConnState, next: ConnState| {
        tracing::debug!(target: "discord", from = ?*s, to = ?next, "state");
        *s = next;
    };

    tracing::info!(target: "discord", %url, "connecting to gateway");

    let ws = connect_ws_with_retries(url).await?;
    let (mut sink, mut stream) = ws.split();

    // one writer task; the reader and the heartbeat both feed it
    let (tx, mut rx) = mpsc::channel::<WsOut>(64);
    tokio::spawn(async move {
        while let Some(out) = rx.recv().await {
            let frame = match out {
                WsOut::Frame(text) => WsMessage::Text(text.into()),
                WsOut::Close(code) => WsMessage::Close(Some(CloseFrame {
                    code: CloseCode::from(code),
                    reason: "".into(),
                })),
            };

            if sink.send(frame).await.is_err() {
                break;
            }
        }
    });

    let mut sequence: Option<i64> = None;
    let mut acked = false;

    // replaced once HELLO supplies the real cadence
    let mut heartbeat = tokio::time::interval(Duration::from_secs(3600));
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut heartbeat_active = false;

    let mut identify_deadline: Option<tokio::time::Instant> = None;

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    let _ = tx.send(WsOut::Close(1000)).await;
                    return Ok(ConnectionEnd::Shutdown);
                }
            }

            _ = heartbeat.tick(), if heartbeat_active => {
                if !acked {
                    // no ack between intervals: close with a non-normal
                    // code and reconnect from scratch
                    tracing::warn!(target: "discord", "did not receive heartbeat ack, disconnecting");
                    enter(&mut state, ConnState::Disconnecting);
                    let _ = tx.send(WsOut::Close(1002)).await;
                    return Ok(ConnectionEnd::Reconnect);
                }

                acked = false;
                let _ = tx
                    .send(WsOut::Frame(gateway::heartbeat_payload(sequence).to_string()))
                    .await;
            }

            _ = async {
                match identify_deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            } => {
                // READY never arrived; wait a little and re-identify
                tracing::warn!(target: "discord", "identify timed out, retrying");
                tokio::time::sleep(IDENTIFY_RETRY_PAUSE).await;
                let _ = tx
                    .send(WsOut::Frame(gateway::identify_payload(&cfg.oauth_token).to_string()))
                    .await;
                identify_deadline = Some(tokio::time::Instant::now() + IDENTIFY_TIMEOUT);
            }

            frame = stream.next() => {
                let payload = match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        match serde_json::from_str::<gateway::Payload>(text.as_str()) {
                            Ok(payload) => payload,
                            Err(error) => {
                                tracing::warn!(target: "discord", %error, "bad gateway payload");
                                continue;
                            }
                        }
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        tracing::warn!(target: "discord", ?frame, "gateway closed");
                        return Ok(ConnectionEnd::Reconnect);
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(error)) => {
                        tracing::error!(target: "discord", %error, "gateway read error");
                        return Ok(ConnectionEnd::Reconnect);
                    }
                    None => return Ok(ConnectionEnd::Reconnect),
                };

                match payload.op {
                    opcode::HELLO => {
                        let hello: gateway::Hello = serde_json::from_value(payload.d)
                            .map_err(|e| BackendError::Protocol(e.to_string()))?;

                        tracing::info!(
                            target: "discord",
                            heartbeat_ms = hello.heartbeat_interval,
                            "connected"
                        );

                        heartbeat = tokio::time::interval(Duration::from_millis(hello.heartbeat_interval));
                        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                        heartbeat.reset();
                        heartbeat_active = true;
                        acked = true;

                        enter(&mut state, ConnState::Identifying);
                        let _ = tx
                            .send(WsOut::Frame(gateway::identify_payload(&cfg.oauth_token).to_string()))
                            .await;
                        enter(&mut state, ConnState::AwaitingReady);
                        identify_deadline = Some(tokio::time::Instant::now() + IDENTIFY_TIMEOUT);
                    }

                    opcode::HEARTBEAT => {
                        let _ = tx
                            .send(WsOut::Frame(gateway::heartbeat_payload(sequence).to_string()))
                            .await;
                    }

                    opcode::HEARTBEAT_ACK => {
                        acked = true;
                    }

                    opcode::INVALID_SESS => {
                        tracing::warn!(target: "discord", "received invalid session");
                        enter(&mut state, ConnState::Reconnecting);
                        let _ = tx.send(WsOut::Close(1000)).await;
                        return Ok(ConnectionEnd::Reconnect);
                    }

                    opcode::RECONNECT => {
                        tracing::warn!(target: "discord", "server requested reconnect");
                        return Ok(ConnectionEnd::Reconnect);
                    }

                    opcode::DISPATCH => {
                        if let Some(seq) = payload.s {
                            if sequence.is_some_and(|cur| seq < cur) {
                                tracing::warn!(
                                    target: "discord",
                                    current = sequence,
                                    received = seq,
                                    "outdated sequence"
                                );
                            }
                            sequence = Some(sequence.map_or(seq, |cur| cur.max(seq)));
                            ctx.db.write().await.discord.last_sequence = sequence.unwrap_or(0).max(0) as u64;
                        }

                        let event = payload.t.as_deref().unwrap_or_default();
                        if event == "READY" {
                            enter(&mut state, ConnState::Connected);
                            identify_deadline = None;

                            let session = payload.d["session_id"].as_str().unwrap_or_default();
                            tracing::info!(target: "discord", %session, "identified");
                            ctx.db.write().await.discord.last_session = session.to_string();
                            continue;
                        }

                        if state != ConnState::Connected {
                            // events can arrive in fast succession right
                            // after READY is sent; process them anyway
                            enter(&mut state, ConnState::Connected);
                            identify_deadline = None;
                        }

                        handle_dispatch(ctx, cfg, http, event, &payload.d).await;
                    }

                    other => {
                        tracing::warn!(target: "discord", op = other, "unhandled opcode");
                    }
                }
            }
        }
    }
}

async fn handle_dispatch(
    ctx: &BotContext,
    cfg: &DiscordConfig,
    http: &reqwest::Client,
    event: &str,
    d: &serde_json::Value,
) {
    match event {
        "GUILD_CREATE" => dispatch::update_guild(ctx, d).await,
        "MESSAGE_CREATE" => dispatch::process_message(ctx, cfg, http, d, false).await,
        "MESSAGE_UPDATE" => dispatch::process_message(ctx, cfg, http, d, true).await,
        "MESSAGE_REACTION_ADD" | "MESSAGE_REACTION_REMOVE" => {}
        other => {
            tracing::warn!(target: "discord", event = %other, "ignoring message type");
        }
    }
}
