//! Persistent twitch state: per-channel user records and the message log.

use crate::db::message::RelativeStr;
use crate::serialise::{self, CodecResult, Deserialise, Reader, Serialise, Writer};
use std::collections::HashMap;

/// A twitch user as last observed in some channel. Users are created lazily
/// on first observation and never deleted.
#[derive(Debug, Clone, Default)]
pub struct TwitchUser {
    pub id: String,
    pub username: String,
    pub display_name: String,

    /// Permission flag mask, refreshed from message badges.
    pub permissions: u64,
    pub subscribed_months: u64,

    /// Cross-backend group ids this user belongs to.
    pub groups: Vec<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct TwitchChannelData {
    /// userid -> user.
    pub known_users: HashMap<String, TwitchUser>,

    /// username -> userid cache.
    pub username_mapping: HashMap<String, String>,
}

impl TwitchChannelData {
    pub fn get_user(&self, userid: &str) -> Option<&TwitchUser> {
        self.known_users.get(userid)
    }
}

#[derive(Debug, Clone, Default)]
pub struct TwitchMessage {
    pub timestamp: u64,
    pub user_id: String,
    pub username: String,
    pub channel: String,
    pub message: RelativeStr,
    pub emote_positions: Vec<RelativeStr>,
    pub is_command: bool,
}

#[derive(Debug, Clone, Default)]
pub struct TwitchMessageLog {
    pub messages: Vec<TwitchMessage>,
}

#[derive(Debug, Clone, Default)]
pub struct TwitchDb {
    /// channel name -> channel data.
    pub channels: HashMap<String, TwitchChannelData>,
    pub message_log: TwitchMessageLog,
}

impl TwitchDb {
    pub fn get_channel(&self, name: &str) -> Option<&TwitchChannelData> {
        self.channels.get(name)
    }
}

impl Serialise for TwitchUser {
    fn serialise(&self, wr: &mut Writer) {
        wr.tag(serialise::TAG_TWITCH_USER);
        wr.write_str(&self.id);
        wr.write_str(&self.username);
        wr.write_str(&self.display_name);
        wr.write_u64(self.permissions);
        wr.write_u64(self.subscribed_months);
        wr.write(&self.groups);
    }
}

impl Deserialise for TwitchUser {
    fn deserialise(rd: &mut Reader) -> CodecResult<Self> {
        rd.expect_tag(serialise::TAG_TWITCH_USER)?;
        Ok(TwitchUser {
            id: rd.read_str()?,
            username: rd.read_str()?,
            display_name: rd.read_str()?,
            permissions: rd.read_u64()?,
            subscribed_months: rd.read_u64()?,
            groups: rd.read()?,
        })
    }
}

impl Serialise for TwitchChannelData {
    fn serialise(&self, wr: &mut Writer) {
        wr.tag(serialise::TAG_TWITCH_CHANNEL);
        wr.write(&self.known_users);
        wr.write(&self.username_mapping);
    }
}

impl Deserialise for TwitchChannelData {
    fn deserialise(rd: &mut Reader) -> CodecResult<Self> {
        rd.expect_tag(serialise::TAG_TWITCH_CHANNEL)?;
        Ok(TwitchChannelData {
            known_users: rd.read()?,
            username_mapping: rd.read()?,
        })
    }
}

impl Serialise for TwitchMessage {
    fn serialise(&self, wr: &mut Writer) {
        wr.tag(serialise::TAG_TWITCH_LOG_MSG);
        wr.write_u64(self.timestamp);
        wr.write_str(&self.user_id);
        wr.write_str(&self.username);
        wr.write_str(&self.channel);
        wr.write(&self.message);
        wr.write(&self.emote_positions);
        wr.write_bool(self.is_command);
    }
}

impl Deserialise for TwitchMessage {
    fn deserialise(rd: &mut Reader) -> CodecResult<Self> {
        rd.expect_tag(serialise::TAG_TWITCH_LOG_MSG)?;
        Ok(TwitchMessage {
            timestamp: rd.read_u64()?,
            user_id: rd.read_str()?,
            username: rd.read_str()?,
            channel: rd.read_str()?,
            message: rd.read()?,
            emote_positions: rd.read()?,
            is_command: rd.read_bool()?,
        })
    }
}

impl Serialise for TwitchMessageLog {
    fn serialise(&self, wr: &mut Writer) {
        wr.tag(serialise::TAG_TWITCH_LOG);
        wr.write(&self.messages);
    }
}

impl Deserialise for TwitchMessageLog {
    fn deserialise(rd: &mut Reader) -> CodecResult<Self> {
        rd.expect_tag(serialise::TAG_TWITCH_LOG)?;
        Ok(TwitchMessageLog {
            messages: rd.read()?,
        })
    }
}

impl Serialise for TwitchDb {
    fn serialise(&self, wr: &mut Writer) {
        wr.tag(serialise::TAG_TWITCH_DB);
        wr.write(&self.channels);
        wr.write(&self.message_log);
    }
}

impl Deserialise for TwitchDb {
    fn deserialise(rd: &mut Reader) -> CodecResult<Self> {
        rd.expect_tag(serialise::TAG_TWITCH_DB)?;
        Ok(TwitchDb {
            channels: rd.read()?,
            message_log: rd.read()?,
        })
    }
}
