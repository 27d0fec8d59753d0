//! Persistent irc state: per-server user records and the message log,
//! including private messages sent directly to the bot.

use crate::db::message::RelativeStr;
use crate::serialise::{self, CodecResult, Deserialise, Reader, Serialise, Writer};
use std::collections::HashMap;

/// An irc user, identified by `nick!user`.
#[derive(Debug, Clone, Default)]
pub struct IrcUser {
    pub nickname: String,
    pub username: String,

    pub permissions: u64,
    pub groups: Vec<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct IrcServerDb {
    /// nickname -> user.
    pub known_users: HashMap<String, IrcUser>,
}

#[derive(Debug, Clone, Default)]
pub struct IrcMessage {
    pub timestamp: u64,
    pub nickname: String,
    pub server: String,

    /// Empty for private messages sent directly to the bot.
    pub channel: String,

    pub message: RelativeStr,
    pub is_command: bool,
    pub is_private: bool,
}

#[derive(Debug, Clone, Default)]
pub struct IrcMessageLog {
    pub messages: Vec<IrcMessage>,
}

#[derive(Debug, Clone, Default)]
pub struct IrcDb {
    /// server name -> server data.
    pub servers: HashMap<String, IrcServerDb>,
    pub message_log: IrcMessageLog,
}

impl Serialise for IrcUser {
    fn serialise(&self, wr: &mut Writer) {
        wr.tag(serialise::TAG_IRC_USER);
        wr.write_str(&self.nickname);
        wr.write_str(&self.username);
        wr.write_u64(self.permissions);
        wr.write(&self.groups);
    }
}

impl Deserialise for IrcUser {
    fn deserialise(rd: &mut Reader) -> CodecResult<Self> {
        rd.expect_tag(serialise::TAG_IRC_USER)?;
        Ok(IrcUser {
            nickname: rd.read_str()?,
            username: rd.read_str()?,
            permissions: rd.read_u64()?,
            groups: rd.read()?,
        })
    }
}

impl Serialise for IrcServerDb {
    fn serialise(&self, wr: &mut Writer) {
        wr.tag(serialise::TAG_IRC_SERVER);
        wr.write(&self.known_users);
    }
}

impl Deserialise for IrcServerDb {
    fn deserialise(rd: &mut Reader) -> CodecResult<Self> {
        rd.expect_tag(serialise::TAG_IRC_SERVER)?;
        Ok(IrcServerDb {
            known_users: rd.read()?,
        })
    }
}

impl Serialise for IrcMessage {
    fn serialise(&self, wr: &mut Writer) {
        wr.tag(serialise::TAG_IRC_LOG_MSG);
        wr.write_u64(self.timestamp);
        wr.write_str(&self.nickname);
        wr.write_str(&self.server);
        wr.write_str(&self.channel);
        wr.write(&self.message);
        wr.write_bool(self.is_command);
        wr.write_bool(self.is_private);
    }
}

impl Deserialise for IrcMessage {
    fn deserialise(rd: &mut Reader) -> CodecResult<Self> {
        rd.expect_tag(serialise::TAG_IRC_LOG_MSG)?;
        Ok(IrcMessage {
            timestamp: rd.read_u64()?,
            nickname: rd.read_str()?,
            server: rd.read_str()?,
            channel: rd.read_str()?,
            message: rd.read()?,
            is_command: rd.read_bool()?,
            is_private: rd.read_bool()?,
        })
    }
}

impl Serialise for IrcMessageLog {
    fn serialise(&self, wr: &mut Writer) {
        wr.tag(serialise::TAG_IRC_LOG);
        wr.write(&self.messages);
    }
}

impl Deserialise for IrcMessageLog {
    fn deserialise(rd: &mut Reader) -> CodecResult<Self> {
        rd.expect_tag(serialise::TAG_IRC_LOG)?;
        Ok(IrcMessageLog {
            messages: rd.read()?,
        })
    }
}

impl Serialise for IrcDb {
    fn serialise(&self, wr: &mut Writer) {
        wr.tag(serialise::TAG_IRC_DB);
        wr.write(&self.servers);
        wr.write(&self.message_log);
    }
}

impl Deserialise for IrcDb {
    fn deserialise(rd: &mut Reader) -> CodecResult<Self> {
        rd.expect_tag(serialise::TAG_IRC_DB)?;
        Ok(IrcDb {
            servers: rd.read()?,
            message_log: rd.read()?,
        })
    }
}
