//! Discord event handling: guild mirroring, message sanitising, and the
//! hand-off into the shared dispatcher.

use crate::backends::discord::DiscordChannel;
use crate::backends::Channel;
use crate::config::{DiscordConfig, GuildConfig};
use crate::db::discord::{DiscordGuild, GuildEmote};
use crate::db::Snowflake;
use crate::perms::flags;
use crate::{dispatch, BotContext};

use serde_json::Value as Json;
use std::sync::Arc;

fn snowflake(v: &Json) -> Option<Snowflake> {
    v.as_str().and_then(|s| s.parse().ok())
}

/// Mirrors a GUILD_CREATE payload into the database: roles, text
/// channels, guild emotes, and the name-lookup indices.
pub async fn update_guild(ctx: &BotContext, json: &Json) {
    let Some(guild_id) = snowflake(&json["id"]) else {
        return;
    };

    let mut db = ctx.db.write().await;
    let guild = db.discord.guilds.entry(guild_id).or_default();

    guild.id = guild_id;
    if let Some(name) = json["name"].as_str() {
        guild.name = name.to_string();
    }

    if let Some(roles) = json["roles"].as_array() {
        for r in roles {
            let Some(id) = snowflake(&r["id"]) else { continue };
            let role = guild.roles.entry(id).or_default();
            role.id = id;
            role.name = r["name"].as_str().unwrap_or_default().to_string();
            role.discord_perms = r["permissions"]
                .as_u64()
                .or_else(|| r["permissions"].as_str().and_then(|s| s.parse().ok()))
                .unwrap_or(0);

            guild.role_names.insert(role.name.clone(), id);
        }
    }

    if let Some(channels) = json["channels"].as_array() {
        for c in channels {
            // text channels only (type 0)
            if c["type"].as_i64() != Some(0) {
                continue;
            }

            let Some(id) = snowflake(&c["id"]) else { continue };
            let chan = guild.channels.entry(id).or_default();
            chan.id = id;
            chan.name = c["name"].as_str().unwrap_or_default().to_string();
        }
    }

    update_guild_emotes(guild, json);

    tracing::info!(target: "discord", guild = %guild.name, "updated guild");
}

pub fn update_guild_emotes(guild: &mut DiscordGuild, json: &Json) {
    let Some(emojis) = json["emojis"].as_array() else {
        return;
    };

    for e in emojis {
        if e["available"].as_bool() == Some(false) {
            continue;
        }

        let (Some(name), Some(id)) = (e["name"].as_str(), snowflake(&e["id"])) else {
            continue;
        };

        guild.emotes.insert(
            name.to_string(),
            GuildEmote {
                id,
                animated: e["animated"].as_bool().unwrap_or(false),
            },
        );
    }
}

/// Mention forms: `<@ID>`, `<@!ID>` (nickname), `<@&ID>` (role), `<#ID>`
/// (channel). Returns the id and the bytes consumed.
pub fn parse_mention(s: &str) -> Option<(Snowflake, usize)> {
    let digits_at = if s.starts_with("<@!") || s.starts_with("<@&") {
        3
    } else if s.starts_with("<@") || s.starts_with("<#") {
        2
    } else {
        return None;
    };

    let rest = &s[digits_at..];
    let end = rest.find('>')?;
    let id: Snowflake = rest[..end].parse().ok()?;
    Some((id, digits_at + end + 1))
}

/// Replaces `<:name:id>` emotes with their bare name (recording the byte
/// positions) and mentions with the referenced name, keeping word
/// boundaries intact.
pub fn sanitise_message(msg: &str, guild: &DiscordGuild) -> (String, Vec<(usize, usize)>) {
    let mut output = String::with_capacity(msg.len());
    let mut emotes = Vec::new();
    let mut rest = msg;
    let mut was_space = true;

    let next_is_space =
        |s: &str| s.chars().next().is_none_or(|c| c == ' ' || c == '\t');

    while !rest.is_empty() {
        if rest.starts_with('<') && rest.len() > 4 {
            // emote: <:name:id> or <a:name:id>
            let emote_body = rest
                .strip_prefix("<a:")
                .or_else(|| rest.strip_prefix("<:"));

            if let Some(body) = emote_body {
                let header = rest.len() - body.len();

                if let Some(colon) = body.find(':') {
                    let name = &body[..colon];
                    let tail = &body[colon + 1..];

                    if let Some(gt) = tail.find('>') {
                        if !name.is_empty()
                            && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
                            && tail[..gt].bytes().all(|b| b.is_ascii_digit())
                        {
                            if !was_space {
                                output.push(' ');
                            }

                            emotes.push((output.len(), name.len()));
                            output.push_str(name);

                            rest = &rest[header + colon + 1 + gt + 1..];
                            if !next_is_space(rest) {
                                output.push(' ');
                            }
                            was_space = true;
                            continue;
                        }
                    }
                }
            }

            if let Some((id, consumed)) = parse_mention(rest) {
                if !was_space {
                    output.push(' ');
                }

                if rest.starts_with("<@&") {
                    output.push('@');
                    output.push_str(
                        guild.roles.get(&id).map(|r| r.name.as_str()).unwrap_or(""),
                    );
                } else if rest.starts_with("<#") {
                    output.push('#');
                    output.push_str(
                        guild
                            .channels
                            .get(&id)
                            .map(|c| c.name.as_str())
                            .unwrap_or(""),
                    );
                } else if rest.starts_with("<@!") {
                    output.push_str(
                        guild
                            .known_users
                            .get(&id)
                            .map(|u| u.nickname.as_str())
                            .unwrap_or(""),
                    );
                } else {
                    output.push_str(
                        guild
                            .known_users
                            .get(&id)
                            .map(|u| u.username.as_str())
                            .unwrap_or(""),
                    );
                }

                rest = &rest[consumed..];
                if !next_is_space(rest) {
                    output.push(' ');
                }
                was_space = true;
                continue;
            }
        }

        let c = rest.chars().next().unwrap();
        was_space = c == ' ' || c == '\t';
        output.push(c);
        rest = &rest[c.len_utf8()..];
    }

    (output, emotes)
}

/// Discord timestamps are RFC 3339 with a fractional part, e.g.
/// `2017-07-11T17:27:07.299000+00:00`.
pub fn parse_timestamp(s: &str) -> Option<u64> {
    chrono::DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.timestamp_millis().max(0) as u64)
}

/// Refreshes the stored user record from a message payload: names, roles
/// and the name-lookup maps.
fn update_user(
    guild: &mut DiscordGuild,
    cfg: &DiscordConfig,
    author: &Json,
    member: &Json,
) -> Option<Snowflake> {
    let id = snowflake(&author["id"])?;
    let user = guild.known_users.entry(id).or_default();

    let old_username = user.username.clone();
    let old_nickname = user.nickname.clone();

    user.username = author["username"].as_str().unwrap_or_default().to_string();
    user.nickname = member["nick"]
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| user.username.clone());

    user.permissions |= flags::EVERYONE;
    if cfg.owner == id.to_string() || cfg.owner == user.username {
        user.permissions |= flags::OWNER;
    }

    if user.id.is_empty() {
        user.id = id;
        tracing::info!(
            target: "discord",
            nick = %user.nickname,
            user = %user.username,
            %id,
            guild = %guild.name,
            "adding user"
        );
    }

    user.roles = member["roles"]
        .as_array()
        .map(|roles| roles.iter().filter_map(snowflake).collect())
        .unwrap_or_default();

    let username = user.username.clone();
    let nickname = user.nickname.clone();

    if !old_username.is_empty() && old_username != username {
        guild.username_map.remove(&old_username);
    }
    if !old_nickname.is_empty() && old_nickname != nickname {
        guild.nickname_map.remove(&old_nickname);
    }

    guild.username_map.insert(username, id);
    guild.nickname_map.insert(nickname, id);

    Some(id)
}

/// Handles MESSAGE_CREATE / MESSAGE_UPDATE. Edits run through the same
/// path with the edit flag set.
pub async fn process_message(
    ctx: &BotContext,
    cfg: &DiscordConfig,
    http: &reqwest::Client,
    json: &Json,
    was_edit: bool,
) {
    // no author, no content, or a webhook: nothing to do
    if json["author"].is_null() || json["content"].is_null() || !json["webhook_id"].is_null() {
        return;
    }

    let Some(guild_id) = snowflake(&json["guild_id"]) else {
        return;
    };
    let Some(channel_id) = snowflake(&json["channel_id"]) else {
        return;
    };

    // bots don't get to run commands or train the model
    if json["author"]["bot"].as_bool() == Some(true) {
        return;
    }

    let content = json["content"].as_str().unwrap_or_default();

    let (author_id, nickname, channel_name, sanitised, emotes) = {
        let mut db = ctx.db.write().await;
        let guild = db.discord.guilds.entry(guild_id).or_default();

        let Some(author_id) = update_user(guild, cfg, &json["author"], &json["member"]) else {
            return;
        };

        let nickname = guild
            .known_users
            .get(&author_id)
            .map(|u| u.nickname.clone())
            .unwrap_or_default();
        let channel_name = guild
            .channels
            .get(&channel_id)
            .map(|c| c.name.clone())
            .unwrap_or_default();

        let (sanitised, emotes) = sanitise_message(content, guild);
        (author_id, nickname, channel_name, sanitised, emotes)
    };

    if author_id.to_string() == cfg.user_id {
        return;
    }

    if cfg
        .ignored_users
        .iter()
        .any(|u| *u == author_id.to_string() || u.eq_ignore_ascii_case(&nickname))
    {
        return;
    }

    let guild_cfg = cfg
        .guilds
        .iter()
        .find(|g| g.id == guild_id.to_string())
        .cloned()
        .unwrap_or(GuildConfig {
            id: guild_id.to_string(),
            ..Default::default()
        });

    let channel: Arc<dyn Channel> = Arc::new(DiscordChannel {
        ctx: ctx.clone(),
        http: http.clone(),
        token: cfg.oauth_token.clone(),
        guild_id,
        channel_id,
        channel_name,
        username: cfg.username.clone(),
        config: guild_cfg,
    });

    dispatch::process_message(
        ctx,
        channel,
        &author_id.to_string(),
        &nickname,
        &sanitised,
        emotes,
        /* enable_pings: */ true,
        was_edit,
    )
    .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::discord::{DiscordChannelData, DiscordRole, DiscordUser};

    fn guild_with_fixtures() -> DiscordGuild {
        let mut guild = DiscordGuild::default();

        guild.roles.insert(
            Snowflake(7),
            DiscordRole {
                id: Snowflake(7),
                name: String::from("admins"),
                discord_perms: 8,
            },
        );
        guild.channels.insert(
            Snowflake(8),
            DiscordChannelData {
                id: Snowflake(8),
                name: String::from("general"),
            },
        );
        guild.known_users.insert(
            Snowflake(9),
            DiscordUser {
                id: Snowflake(9),
                username: String::from("alice"),
                nickname: String::from("al"),
                ..Default::default()
            },
        );

        guild
    }

    #[test]
    fn test_parse_mention_forms() {
        assert_eq!(parse_mention("<@123> x"), Some((Snowflake(123), 6)));
        assert_eq!(parse_mention("<@!123>"), Some((Snowflake(123), 7)));
        assert_eq!(parse_mention("<@&55>"), Some((Snowflake(55), 6)));
        assert_eq!(parse_mention("<#9>"), Some((Snowflake(9), 4)));
        assert_eq!(parse_mention("<:emote:1>"), None);
        assert_eq!(parse_mention("plain"), None);
    }

    #[test]
    fn test_sanitise_replaces_emotes_and_records_positions() {
        let guild = guild_with_fixtures();
        let (out, emotes) = sanitise_message("hi <:KEKW:123456> there", &guild);
        assert_eq!(out, "hi KEKW there");
        assert_eq!(emotes, vec![(3, 4)]);
        assert_eq!(&out[3..7], "KEKW");
    }

    #[test]
    fn test_sanitise_animated_emote_and_spacing() {
        let guild = guild_with_fixtures();
        let (out, emotes) = sanitise_message("x<a:Wiggle:1>y", &guild);
        assert_eq!(out, "x Wiggle y");
        assert_eq!(emotes.len(), 1);
        let (at, len) = emotes[0];
        assert_eq!(&out[at..at + len], "Wiggle");
    }

    #[test]
    fn test_sanitise_mentions() {
        let guild = guild_with_fixtures();

        let (out, _) = sanitise_message("hey <@9>!", &guild);
        assert_eq!(out, "hey alice !");

        let (out, _) = sanitise_message("hey <@!9>", &guild);
        assert_eq!(out, "hey al");

        let (out, _) = sanitise_message("ping <@&7> in <#8>", &guild);
        assert_eq!(out, "ping @admins in #general");
    }

    #[test]
    fn test_sanitise_leaves_plain_text_alone() {
        let guild = guild_with_fixtures();
        let (out, emotes) = sanitise_message("1 < 2 and 3 > 2", &guild);
        assert_eq!(out, "1 < 2 and 3 > 2");
        assert!(emotes.is_empty());
    }

    #[test]
    fn test_parse_timestamp_fixed_format() {
        let ts = parse_timestamp("2017-07-11T17:27:07.299000+00:00").unwrap();
        assert_eq!(ts, 1_499_794_027_299);
        assert!(parse_timestamp("not a timestamp").is_none());
    }

    #[test]
    fn test_update_guild_emotes() {
        let mut guild = DiscordGuild::default();
        let json = serde_json::json!({
            "emojis": [
                { "name": "KEKW", "id": "111", "animated": false, "available": true },
                { "name": "Wiggle", "id": "222", "animated": true },
                { "name": "Gone", "id": "333", "available": false },
            ]
        });

        update_guild_emotes(&mut guild, &json);
        assert_eq!(guild.emotes.len(), 2);
        assert!(!guild.emotes.get("KEKW").unwrap().animated);
        assert!(guild.emotes.get("Wiggle").unwrap().animated);
    }
}
