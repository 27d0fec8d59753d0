//! Plain IRC driver: TCP or TLS per server, optional SASL PLAIN with a
//! NickServ fallback, CTCP replies, and channel/private message routing.

use crate::backends::{irc_proto, Channel, UserPerms, CONNECT_RETRIES};
use crate::config::{ChannelConfig, IrcConfig, IrcServerConfig};
use crate::error::BackendError;
use crate::perms::flags;
use crate::{dispatch, Backend, BotContext, Message};

use async_trait::async_trait;
use base64::Engine as _;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

const SASL_CAP_TIMEOUT: Duration = Duration::from_millis(1500);
const SASL_PLUS_TIMEOUT: Duration = Duration::from_secs(10);
const SASL_RESULT_TIMEOUT: Duration = Duration::from_secs(3);

const CTCP: char = '\u{1}';

trait AsyncReadWrite: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncReadWrite for T {}

type IrcStream = Box<dyn AsyncReadWrite>;
type Reader = BufReader<ReadHalf<IrcStream>>;
type Writer = WriteHalf<IrcStream>;

async fn connect(server: &IrcServerConfig) -> Result<IrcStream, BackendError> {
    let mut backoff = Duration::from_millis(500);

    for attempt in 1..=CONNECT_RETRIES {
        match try_connect(server).await {
            Ok(stream) => return Ok(stream),
            Err(error) => {
                tracing::warn!(
                    target: "irc",
                    server = %server.hostname,
                    %error,
                    attempt,
                    max = CONNECT_RETRIES,
                    "connection failed, retrying"
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
        }
    }

    Err(BackendError::Connect {
        attempts: CONNECT_RETRIES,
    })
}

async fn try_connect(server: &IrcServerConfig) -> Result<IrcStream, BackendError> {
    let tcp = TcpStream::connect((server.hostname.as_str(), server.port)).await?;

    if !server.use_ssl {
        return Ok(Box::new(tcp));
    }

    let roots = rustls::RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };
    let config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();

    let connector = tokio_rustls::TlsConnector::from(Arc::new(config));
    let name = rustls::pki_types::ServerName::try_from(server.hostname.clone())
        .map_err(|e| BackendError::Protocol(format!("invalid server name: {e}")))?;

    let tls = connector.connect(name, tcp).await?;
    Ok(Box::new(tls))
}

async fn send_raw(writer: &mut Writer, line: &str) -> Result<(), BackendError> {
    tracing::debug!(target: "irc", %line, ">>");
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\r\n").await?;
    writer.flush().await?;
    Ok(())
}

async fn read_line(reader: &mut Reader) -> Result<Option<String>, BackendError> {
    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Ok(None);
    }

    while line.ends_with(['\r', '\n']) {
        line.pop();
    }
    Ok(Some(line))
}

/// Waits for a line matching `pred` within `limit`; other lines are
/// handed back for logging only.
async fn await_line<F, T>(
    reader: &mut Reader,
    limit: Duration,
    mut pred: F,
) -> Result<Option<T>, BackendError>
where
    F: FnMut(&irc_proto::IrcMessage<'_>) -> Option<T>,
{
    let deadline = tokio::time::Instant::now() + limit;

    loop {
        let line = match tokio::time::timeout_at(deadline, read_line(reader)).await {
            Ok(result) => result?,
            Err(_elapsed) => return Ok(None),
        };

        let Some(line) = line else {
            return Err(BackendError::Protocol(String::from("connection closed")));
        };

        if let Some(msg) = irc_proto::parse(&line) {
            if let Some(out) = pred(&msg) {
                return Ok(Some(out));
            }
        }
    }
}

/// SASL PLAIN: CAP REQ, AUTHENTICATE PLAIN, then the base64 of
/// `user\0user\0password`. Falls back to NickServ when the server NAKs or
/// times out.
async fn authenticate(
    server: &IrcServerConfig,
    reader: &mut Reader,
    writer: &mut Writer,
) -> Result<(), BackendError> {
    let mut use_sasl = server.use_sasl && !server.password.is_empty();

    if use_sasl {
        send_raw(writer, "CAP REQ :sasl").await?;

        let ack = await_line(reader, SASL_CAP_TIMEOUT, |msg| {
            (msg.command == "CAP").then(|| msg.params.iter().any(|p| *p == "ACK"))
        })
        .await?;

        if ack != Some(true) {
            tracing::warn!(target: "irc", server = %server.name, "failed to negotiate SASL, falling back on NickServ");
            use_sasl = false;
        }
    }

    send_raw(writer, &format!("NICK {}", server.nickname)).await?;
    send_raw(
        writer,
        &format!("USER {} * * :{}", server.username, server.username),
    )
    .await?;

    if use_sasl {
        send_raw(writer, "AUTHENTICATE PLAIN").await?;

        let plus = await_line(reader, SASL_PLUS_TIMEOUT, |msg| {
            (msg.command == "AUTHENTICATE").then(|| msg.params.first() == Some(&"+"))
        })
        .await?;

        if plus != Some(true) {
            return Err(BackendError::Auth(String::from(
                "did not receive SASL response from server",
            )));
        }

        let mut blob = Vec::new();
        blob.extend_from_slice(server.username.as_bytes());
        blob.push(0);
        blob.extend_from_slice(server.username.as_bytes());
        blob.push(0);
        blob.extend_from_slice(server.password.as_bytes());

        let encoded = base64::engine::general_purpose::STANDARD.encode(&blob);
        send_raw(writer, &format!("AUTHENTICATE {encoded}")).await?;

        let outcome = await_line(reader, SASL_RESULT_TIMEOUT, |msg| match msg.command {
            "903" => Some(Ok(())),
            "902" => Some(Err(String::from("nickname unavailable"))),
            "904" => Some(Err(String::from("invalid credentials"))),
            _ => None,
        })
        .await?;

        match outcome {
            Some(Ok(())) => send_raw(writer, "CAP END").await?,
            Some(Err(reason)) => return Err(BackendError::Auth(reason)),
            None => return Err(BackendError::Auth(String::from("authentication timed out"))),
        }
    } else if !server.password.is_empty() {
        send_raw(
            writer,
            &format!("PRIVMSG NickServ :IDENTIFY {}", server.password),
        )
        .await?;
    }

    Ok(())
}

/// One joined irc channel.
pub struct IrcChannel {
    ctx: BotContext,
    tx: mpsc::Sender<String>,
    server: String,
    name: String,
    nickname: String,
    config: ChannelConfig,
}

#[async_trait]
impl Channel for IrcChannel {
    fn backend(&self) -> Backend {
        Backend::Irc
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn username(&self) -> String {
        self.nickname.clone()
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
            .irc
            .servers
            .get(&self.server)
            .and_then(|s| s.known_users.get(user_id));

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
        if text.trim().is_empty() {
            return;
        }

        for line in text.lines() {
            let _ = self.tx.send(format!("PRIVMSG #{} :{}", self.name, line)).await;
        }
    }
}

/// Runs one irc server connection until shutdown.
pub async fn run_server(
    ctx: BotContext,
    server: IrcServerConfig,
    ignored_users: Vec<String>,
) -> Result<(), BackendError> {
    let name = if server.name.is_empty() {
        server.hostname.clone()
    } else {
        server.name.clone()
    };

    tracing::info!(target: "irc", server = %name, "connecting");
    let stream = connect(&server).await?;
    let (read_half, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(read_half);

    authenticate(&server, &mut reader, &mut writer).await?;

    // past this point writes go through the pump
    let (tx, mut rx) = mpsc::channel::<String>(256);
    let mut write_pump = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            if send_raw(&mut writer, &line).await.is_err() {
                break;
            }
        }
    });

    let mut shutdown = ctx.shutdown_rx();

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    let _ = tx.send(String::from("QUIT :shutting down")).await;
                    break;
                }
            }

            _ = &mut write_pump => {
                tracing::warn!(target: "irc", server = %name, "write pump exited");
                break;
            }

            line = read_line(&mut reader) => {
                match line {
                    Ok(Some(line)) => handle_line(&ctx, &server, &name, &ignored_users, &tx, &line).await,
                    Ok(None) => {
                        tracing::warn!(target: "irc", server = %name, "connection closed");
                        break;
                    }
                    Err(error) => {
                        tracing::error!(target: "irc", server = %name, %error, "read error");
                        break;
                    }
                }
            }
        }
    }

    tracing::info!(target: "irc", server = %name, "driver exited");
    Ok(())
}

/// Spawns one task per configured server.
pub async fn run(ctx: BotContext, cfg: IrcConfig) {
    let mut handles = Vec::new();
    for server in cfg.servers {
        let ctx = ctx.clone();
        let ignored = cfg.ignored_users.clone();
        handles.push(tokio::spawn(async move {
            let hostname = server.hostname.clone();
            if let Err(error) = run_server(ctx, server, ignored).await {
                tracing::error!(target: "irc", server = %hostname, %error, "server failed");
            }
        }));
    }

    for handle in handles {
        let _ = handle.await;
    }
}

async fn handle_line(
    ctx: &BotContext,
    server: &IrcServerConfig,
    server_name: &str,
    ignored_users: &[String],
    tx: &mpsc::Sender<String>,
    line: &str,
) {
    let Some(msg) = irc_proto::parse(line) else {
        tracing::warn!(target: "irc", %line, "received invalid irc message");
        return;
    };

    match msg.command {
        "PING" => {
            let token = msg.params.first().copied().unwrap_or("");
            let _ = tx.send(format!("PONG :{token}")).await;
        }

        "001" => {
            tracing::info!(target: "irc", server = %server_name, "registered");
            for chan in &server.channels {
                let _ = tx.send(format!("JOIN #{}", chan.name)).await;
            }
        }

        "PRIVMSG" => {
            process_privmsg(ctx, server, server_name, ignored_users, tx, &msg).await;
        }

        _ => {}
    }
}

async fn process_privmsg(
    ctx: &BotContext,
    server: &IrcServerConfig,
    server_name: &str,
    ignored_users: &[String],
    tx: &mpsc::Sender<String>,
    msg: &irc_proto::IrcMessage<'_>,
) {
    let Some(nick) = msg.nick else { return };
    if nick.eq_ignore_ascii_case(&server.nickname) {
        return;
    }

    // a leading '~' on the ident is decoration, not identity
    let ident = msg.user.map(|u| u.strip_prefix('~').unwrap_or(u));
    if ignored_users.iter().any(|u| {
        u.eq_ignore_ascii_case(nick) || ident.is_some_and(|i| u.eq_ignore_ascii_case(i))
    }) {
        return;
    }

    if msg.params.len() < 2 {
        return;
    }

    let target = msg.params[0];
    let text = msg.params[msg.params.len() - 1];

    // CTCP queries get NOTICE replies wrapped in \x01
    if msg.is_ctcp() && msg.ctcp_command != Some("ACTION") {
        let reply = match msg.ctcp_command {
            Some("VERSION") => Some(format!("VERSION ikura {}", env!("CARGO_PKG_VERSION"))),
            Some("CLIENTINFO") => Some(String::from("CLIENTINFO ACTION CLIENTINFO PING TIME VERSION")),
            Some("PING") => Some(match msg.ctcp_body {
                Some(body) => format!("PING {body}"),
                None => String::from("PING"),
            }),
            Some("TIME") => Some(format!("TIME {}", chrono::Local::now().to_rfc2822())),
            _ => None,
        };

        if let Some(reply) = reply {
            let _ = tx.send(format!("NOTICE {nick} :{CTCP}{reply}{CTCP}")).await;
        }
        return;
    }

    update_user(ctx, server, server_name, nick, ident).await;

    if let Some(channel_name) = target.strip_prefix('#') {
        let Some(chan_cfg) = server.channels.iter().find(|c| c.name == channel_name) else {
            return;
        };

        let channel: Arc<dyn Channel> = Arc::new(IrcChannel {
            ctx: ctx.clone(),
            tx: tx.clone(),
            server: server_name.to_string(),
            name: channel_name.to_string(),
            nickname: server.nickname.clone(),
            config: chan_cfg.clone(),
        });

        dispatch::process_message(
            ctx,
            channel,
            nick,
            nick,
            text,
            Vec::new(),
            /* enable_pings: */ true,
            /* is_edit: */ false,
        )
        .await;
    } else if target.eq_ignore_ascii_case(&server.nickname) {
        // private messages only get logged
        let mut db = ctx.db.write().await;
        let interned = db.messages.intern(text);
        let entry = crate::db::irc::IrcMessage {
            timestamp: chrono::Utc::now().timestamp_millis().max(0) as u64,
            nickname: nick.to_string(),
            server: server_name.to_string(),
            channel: String::new(),
            message: interned,
            is_command: false,
            is_private: true,
        };
        db.irc.message_log.messages.push(entry);
    }
}

async fn update_user(
    ctx: &BotContext,
    server: &IrcServerConfig,
    server_name: &str,
    nick: &str,
    ident: Option<&str>,
) {
    let mut db = ctx.db.write().await;
    let srv = db.irc.servers.entry(server_name.to_string()).or_default();
    let user = srv.known_users.entry(nick.to_string()).or_default();

    user.nickname = nick.to_string();
    if let Some(ident) = ident {
        user.username = ident.to_string();
    }

    user.permissions |= flags::EVERYONE;
    if server.owner == nick {
        user.permissions |= flags::OWNER;
    }
}
