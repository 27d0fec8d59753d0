//! Persistent discord state: guilds with their roles, channels, users and
//! emotes, plus the discord message log.

use crate::db::message::RelativeStr;
use crate::serialise::{self, CodecResult, Deserialise, Reader, Serialise, Writer};
use std::collections::HashMap;

/// Discord's 64-bit unique id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Snowflake(pub u64);

impl Snowflake {
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for Snowflake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for Snowflake {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Snowflake(s.parse()?))
    }
}

impl Serialise for Snowflake {
    fn serialise(&self, wr: &mut Writer) {
        wr.write_u64(self.0);
    }
}

impl Deserialise for Snowflake {
    fn deserialise(rd: &mut Reader) -> CodecResult<Self> {
        Ok(Snowflake(rd.read_u64()?))
    }
}

#[derive(Debug, Clone, Default)]
pub struct DiscordUser {
    pub id: Snowflake,
    pub username: String,
    pub nickname: String,

    pub permissions: u64,

    /// Cross-backend group ids, shared with the other backends.
    pub groups: Vec<u64>,

    pub roles: Vec<Snowflake>,
}

#[derive(Debug, Clone, Default)]
pub struct DiscordRole {
    pub id: Snowflake,
    pub name: String,

    /// Discord's own permission bitmask, as reported upstream.
    pub discord_perms: u64,
}

#[derive(Debug, Clone, Default)]
pub struct DiscordChannelData {
    pub id: Snowflake,
    pub name: String,
}

/// A guild emote: `<:name:id>` on the wire, `<a:name:id>` when animated.
#[derive(Debug, Clone, Default)]
pub struct GuildEmote {
    pub id: Snowflake,
    pub animated: bool,
}

#[derive(Debug, Clone, Default)]
pub struct DiscordGuild {
    pub id: Snowflake,
    pub name: String,

    pub roles: HashMap<Snowflake, DiscordRole>,
    pub channels: HashMap<Snowflake, DiscordChannelData>,
    pub known_users: HashMap<Snowflake, DiscordUser>,
    pub emotes: HashMap<String, GuildEmote>,

    // name-lookup indices, kept in sync with the maps above.
    pub role_names: HashMap<String, Snowflake>,
    pub username_map: HashMap<String, Snowflake>,
    pub nickname_map: HashMap<String, Snowflake>,
}

impl DiscordGuild {
    pub fn get_role(&self, name: &str) -> Option<&DiscordRole> {
        self.role_names.get(name).and_then(|id| self.roles.get(id))
    }

    pub fn get_user(&self, id: Snowflake) -> Option<&DiscordUser> {
        self.known_users.get(&id)
    }
}

#[derive(Debug, Clone, Default)]
pub struct DiscordMessage {
    pub timestamp: u64,
    pub message_id: Snowflake,

    pub user_id: Snowflake,
    pub username: String,
    pub nickname: String,

    pub guild_id: Snowflake,
    pub channel_id: Snowflake,
    pub channel_name: String,

    pub message: RelativeStr,
    pub emote_positions: Vec<RelativeStr>,

    pub is_edit: bool,
    pub is_command: bool,
}

#[derive(Debug, Clone, Default)]
pub struct DiscordMessageLog {
    pub messages: Vec<DiscordMessage>,
}

#[derive(Debug, Clone, Default)]
pub struct DiscordDb {
    pub guilds: HashMap<Snowflake, DiscordGuild>,
    pub message_log: DiscordMessageLog,

    pub last_sequence: u64,
    pub last_session: String,
}

impl Serialise for DiscordUser {
    fn serialise(&self, wr: &mut Writer) {
        wr.tag(serialise::TAG_DISCORD_USER);
        wr.write(&self.id);
        wr.write_str(&self.username);
        wr.write_str(&self.nickname);
        wr.write_u64(self.permissions);
        wr.write(&self.groups);
        wr.write(&self.roles);
    }
}

impl Deserialise for DiscordUser {
    fn deserialise(rd: &mut Reader) -> CodecResult<Self> {
        rd.expect_tag(serialise::TAG_DISCORD_USER)?;
        Ok(DiscordUser {
            id: rd.read()?,
            username: rd.read_str()?,
            nickname: rd.read_str()?,
            permissions: rd.read_u64()?,
            groups: rd.read()?,
            roles: rd.read()?,
        })
    }
}

impl Serialise for DiscordRole {
    fn serialise(&self, wr: &mut Writer) {
        wr.tag(serialise::TAG_DISCORD_ROLE);
        wr.write(&self.id);
        wr.write_str(&self.name);
        wr.write_u64(self.discord_perms);
    }
}

impl Deserialise for DiscordRole {
    fn deserialise(rd: &mut Reader) -> CodecResult<Self> {
        rd.expect_tag(serialise::TAG_DISCORD_ROLE)?;
        Ok(DiscordRole {
            id: rd.read()?,
            name: rd.read_str()?,
            discord_perms: rd.read_u64()?,
        })
    }
}

impl Serialise for DiscordChannelData {
    fn serialise(&self, wr: &mut Writer) {
        wr.tag(serialise::TAG_DISCORD_CHANNEL);
        wr.write(&self.id);
        wr.write_str(&self.name);
    }
}

impl Deserialise for DiscordChannelData {
    fn deserialise(rd: &mut Reader) -> CodecResult<Self> {
        rd.expect_tag(serialise::TAG_DISCORD_CHANNEL)?;
        Ok(DiscordChannelData {
            id: rd.read()?,
            name: rd.read_str()?,
        })
    }
}

impl Serialise for GuildEmote {
    fn serialise(&self, wr: &mut Writer) {
        wr.tag(serialise::TAG_DISCORD_EMOTE);
        wr.write(&self.id);
        wr.write_bool(self.animated);
    }
}

impl Deserialise for GuildEmote {
    fn deserialise(rd: &mut Reader) -> CodecResult<Self> {
        rd.expect_tag(serialise::TAG_DISCORD_EMOTE)?;
        Ok(GuildEmote {
            id: rd.read()?,
            animated: rd.read_bool()?,
        })
    }
}

impl Serialise for DiscordGuild {
    fn serialise(&self, wr: &mut Writer) {
        wr.tag(serialise::TAG_DISCORD_GUILD);
        wr.write(&self.id);
        wr.write_str(&self.name);
        wr.write(&self.roles);
        wr.write(&self.channels);
        wr.write(&self.known_users);
        wr.write(&self.emotes);
        wr.write(&self.role_names);
        wr.write(&self.username_map);
        wr.write(&self.nickname_map);
    }
}

impl Deserialise for DiscordGuild {
    fn deserialise(rd: &mut Reader) -> CodecResult<Self> {
        rd.expect_tag(serialise::TAG_DISCORD_GUILD)?;
        Ok(DiscordGuild {
            id: rd.read()?,
            name: rd.read_str()?,
            roles: rd.read()?,
            channels: rd.read()?,
            known_users: rd.read()?,
            emotes: rd.read()?,
            role_names: rd.read()?,
            username_map: rd.read()?,
            nickname_map: rd.read()?,
        })
    }
}

impl Serialise for DiscordMessage {
    fn serialise(&self, wr: &mut Writer) {
        wr.tag(serialise::TAG_DISCORD_LOG_MSG);
        wr.write_u64(self.timestamp);
        wr.write(&self.message_id);
        wr.write(&self.user_id);
        wr.write_str(&self.username);
        wr.write_str(&self.nickname);
        wr.write(&self.guild_id);
        wr.write(&self.channel_id);
        wr.write_str(&self.channel_name);
        wr.write(&self.message);
        wr.write(&self.emote_positions);
        wr.write_bool(self.is_edit);
        wr.write_bool(self.is_command);
    }
}

impl Deserialise for DiscordMessage {
    fn deserialise(rd: &mut Reader) -> CodecResult<Self> {
        rd.expect_tag(serialise::TAG_DISCORD_LOG_MSG)?;
        Ok(DiscordMessage {
            timestamp: rd.read_u64()?,
            message_id: rd.read()?,
            user_id: rd.read()?,
            username: rd.read_str()?,
            nickname: rd.read_str()?,
            guild_id: rd.read()?,
            channel_id: rd.read()?,
            channel_name: rd.read_str()?,
            message: rd.read()?,
            emote_positions: rd.read()?,
            is_edit: rd.read_bool()?,
            is_command: rd.read_bool()?,
        })
    }
}

impl Serialise for DiscordMessageLog {
    fn serialise(&self, wr: &mut Writer) {
        wr.tag(serialise::TAG_DISCORD_LOG);
        wr.write(&self.messages);
    }
}

impl Deserialise for DiscordMessageLog {
    fn deserialise(rd: &mut Reader) -> CodecResult<Self> {
        rd.expect_tag(serialise::TAG_DISCORD_LOG)?;
        Ok(DiscordMessageLog {
            messages: rd.read()?,
        })
    }
}

impl Serialise for DiscordDb {
    fn serialise(&self, wr: &mut Writer) {
        wr.tag(serialise::TAG_DISCORD_DB);
        wr.write(&self.guilds);
        wr.write(&self.message_log);
        wr.write_u64(self.last_sequence);
        wr.write_str(&self.last_session);
    }
}

impl Deserialise for DiscordDb {
    fn deserialise(rd: &mut Reader) -> CodecResult<Self> {
        rd.expect_tag(serialise::TAG_DISCORD_DB)?;
        Ok(DiscordDb {
            guilds: rd.read()?,
            message_log: rd.read()?,
            last_sequence: rd.read_u64()?,
            last_session: rd.read_str()?,
        })
    }
}
