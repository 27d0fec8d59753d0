//! Backend drivers. Each backend presents the same `Channel` surface to
//! the dispatcher; everything protocol-specific stays behind it.

pub mod discord;
pub mod irc;
pub mod irc_proto;
pub mod twitch;

use crate::db::Snowflake;
use crate::error::BackendError;
use crate::perms::PermissionSet;
use crate::{Backend, Message};

use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const CONNECT_RETRIES: u32 = 5;
const CONNECT_BACKOFF_START: Duration = Duration::from_millis(500);

/// What a backend knows about a user when asked to gate a command.
#[derive(Debug, Clone, Default)]
pub struct UserPerms {
    pub flags: u64,
    pub groups: Vec<u64>,
    pub roles: Vec<Snowflake>,
}

/// The abstract endpoint a message came from and replies go to. One per
/// (backend, id); the dispatcher never sees anything more concrete.
#[async_trait]
pub trait Channel: Send + Sync {
    fn backend(&self) -> Backend;
    fn name(&self) -> String;

    /// The bot's own username on this backend.
    fn username(&self) -> String;

    fn command_prefixes(&self) -> Vec<String>;
    fn should_reply_mentions(&self) -> bool;
    fn should_print_interp_errors(&self) -> bool;
    fn should_lurk(&self) -> bool;

    /// The guild this channel belongs to, when the backend has guilds.
    fn guild_id(&self) -> Option<Snowflake> {
        None
    }

    async fn user_permissions(&self, user_id: &str) -> UserPerms;

    async fn check_user_permissions(&self, user_id: &str, required: &PermissionSet) -> bool {
        let perms = self.user_permissions(user_id).await;
        required.check(perms.flags, &perms.groups, &perms.roles)
    }

    async fn send_message(&self, msg: &Message);
}

/// Dials a websocket with exponential backoff, starting at 500 ms and
/// doubling on each of the 5 attempts.
pub async fn connect_ws_with_retries(url: &str) -> Result<WsStream, BackendError> {
    let mut backoff = CONNECT_BACKOFF_START;

    for attempt in 1..=CONNECT_RETRIES {
        match tokio_tungstenite::connect_async(url).await {
            Ok((ws, _response)) => return Ok(ws),
            Err(error) => {
                tracing::warn!(
                    %url,
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
