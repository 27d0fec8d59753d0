//! The persistent store: one in-memory aggregate of all durable state,
//! loaded from a single tagged blob at startup and rewritten atomically in
//! full by a background sync worker.

pub mod discord;
pub mod irc;
pub mod message;
pub mod shared;
pub mod twitch;

pub use discord::Snowflake;
pub use message::{MessageDb, RelativeStr};
pub use shared::{GenericUser, Group, SharedDb};

use crate::error::DbError;
use crate::interp::{Interp, InterpState};
use crate::markov::{MarkovHandle, MarkovModel};
use crate::serialise::{Reader, Serialise, Writer};
use crate::Backend;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub const DB_MAGIC: &[u8; 8] = b"ikura_db";
pub const DB_VERSION: u32 = 30;

/// File versions at which optional sections first appeared.
const VERSION_DISCORD_DATA: u32 = 18;
const VERSION_IRC_DATA: u32 = 25;

const SYNC_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30);

/// Superblock layout: 8-byte magic, u32 version, u32 flags, u64 last
/// modified (ms since epoch). 24 bytes, written raw ahead of the sections.
const SUPERBLOCK_SIZE: usize = 24;

/// All persistent state except the interpreter and markov tables, which
/// live behind their own locks but serialise into the same file.
#[derive(Debug, Clone, Default)]
pub struct Database {
    pub twitch: twitch::TwitchDb,
    pub shared: shared::SharedDb,
    pub discord: discord::DiscordDb,
    pub irc: irc::IrcDb,
    pub messages: message::MessageDb,

    flags: u32,
}

/// One message-log entry, routed into the right backend section by
/// `Database::log_message`.
pub struct LogRecord<'a> {
    pub timestamp: u64,
    pub user_id: &'a str,
    pub username: &'a str,
    pub channel: &'a str,
    pub guild: Option<Snowflake>,
    pub message_id: Option<Snowflake>,
    pub message: &'a str,
    pub emotes: &'a [(usize, usize)],
    pub is_command: bool,
    pub is_edit: bool,
}

impl Database {
    /// Interns the message body into the shared arena and appends a log
    /// entry to the backend's own log.
    pub fn log_message(&mut self, backend: Backend, record: LogRecord<'_>) {
        let interned = self.messages.intern(record.message);
        let emotes = record
            .emotes
            .iter()
            .map(|&(start, len)| RelativeStr::new(interned.start as usize + start, len))
            .collect::<Vec<_>>();

        match backend {
            Backend::Twitch => self.twitch.message_log.messages.push(twitch::TwitchMessage {
                timestamp: record.timestamp,
                user_id: record.user_id.to_string(),
                username: record.username.to_string(),
                channel: record.channel.to_string(),
                message: interned,
                emote_positions: emotes,
                is_command: record.is_command,
            }),

            Backend::Discord => self
                .discord
                .message_log
                .messages
                .push(discord::DiscordMessage {
                    timestamp: record.timestamp,
                    message_id: record.message_id.unwrap_or_default(),
                    user_id: record.user_id.parse().unwrap_or_default(),
                    username: record.username.to_string(),
                    nickname: record.username.to_string(),
                    guild_id: record.guild.unwrap_or_default(),
                    channel_id: Snowflake::default(),
                    channel_name: record.channel.to_string(),
                    message: interned,
                    emote_positions: emotes,
                    is_edit: record.is_edit,
                    is_command: record.is_command,
                }),

            Backend::Irc => self.irc.message_log.messages.push(irc::IrcMessage {
                timestamp: record.timestamp,
                nickname: record.username.to_string(),
                server: record.user_id.to_string(),
                channel: record.channel.to_string(),
                message: interned,
                is_command: record.is_command,
                is_private: false,
            }),
        }
    }
}

fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

fn serialise_all(db: &Database, interp: &InterpState, markov: &MarkovModel) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4096);

    buf.extend_from_slice(DB_MAGIC);
    buf.extend_from_slice(&DB_VERSION.to_le_bytes());
    buf.extend_from_slice(&db.flags.to_le_bytes());
    buf.extend_from_slice(&now_millis().to_le_bytes());

    let mut wr = Writer::new(&mut buf);
    wr.write(&db.twitch);
    wr.write(interp);
    wr.write(markov);
    wr.write(&db.shared);
    wr.write(&db.discord);
    wr.write(&db.irc);
    wr.write(&db.messages);

    buf
}

/// Everything `load` recovers from disk.
pub struct LoadedDatabase {
    pub db: Database,
    pub interp: InterpState,
    pub markov: MarkovModel,

    /// The version found on disk (<= DB_VERSION). The next sync writes the
    /// current version.
    pub disk_version: u32,
}

fn parse_superblock(bytes: &[u8]) -> Result<(u32, u32), DbError> {
    if bytes.len() < SUPERBLOCK_SIZE {
        return Err(DbError::Truncated);
    }

    if &bytes[0..8] != DB_MAGIC {
        return Err(DbError::BadMagic {
            expected: String::from_utf8_lossy(DB_MAGIC).into_owned(),
            found: String::from_utf8_lossy(&bytes[0..8]).into_owned(),
        });
    }

    let version = u32::from_le_bytes(bytes[8..12].try_into().unwrap());
    let flags = u32::from_le_bytes(bytes[12..16].try_into().unwrap());

    if version > DB_VERSION {
        return Err(DbError::VersionTooNew {
            found: version,
            current: DB_VERSION,
        });
    }

    Ok((version, flags))
}

fn deserialise_all(bytes: &[u8]) -> Result<LoadedDatabase, DbError> {
    let (version, flags) = parse_superblock(bytes)?;
    let mut rd = Reader::new(&bytes[SUPERBLOCK_SIZE..]);

    let mut db = Database {
        flags,
        ..Default::default()
    };

    db.twitch = rd.read().map_err(|_| DbError::Section("twitch"))?;
    let interp: InterpState = rd
        .read()
        .map_err(|_| DbError::Section("command interpreter"))?;
    let markov: MarkovModel = rd.read().map_err(|_| DbError::Section("markov"))?;
    db.shared = rd.read().map_err(|_| DbError::Section("shared"))?;

    if version >= VERSION_DISCORD_DATA {
        db.discord = rd.read().map_err(|_| DbError::Section("discord"))?;
    }

    if version >= VERSION_IRC_DATA {
        db.irc = rd.read().map_err(|_| DbError::Section("irc"))?;
    }

    db.messages = rd.read().map_err(|_| DbError::Section("message log"))?;

    Ok(LoadedDatabase {
        db,
        interp,
        markov,
        disk_version: version,
    })
}

/// Loads the database file, creating a fresh one first if `create` is set
/// and no file exists. An on-disk version older than the current one gets a
/// backup copy (`db-backup-vN.db`) before the next write upgrades it.
pub fn load(path: &Path, create: bool, read_only: bool) -> Result<LoadedDatabase, DbError> {
    if !path.exists() {
        if !create {
            return Err(DbError::Missing);
        }

        tracing::info!(target: "db", path = %path.display(), "creating new database");
        let fresh = LoadedDatabase {
            db: Database::default(),
            interp: InterpState::new(),
            markov: MarkovModel::new(),
            disk_version: DB_VERSION,
        };

        let bytes = serialise_all(&fresh.db, &fresh.interp, &fresh.markov);
        std::fs::write(path, bytes)?;
        return Ok(fresh);
    } else if create {
        tracing::warn!(target: "db", path = %path.display(), "database exists, ignoring --create");
    }

    let bytes = std::fs::read(path)?;
    let loaded = deserialise_all(&bytes)?;

    if loaded.disk_version < DB_VERSION && !read_only {
        let backup = path.with_file_name(format!("db-backup-v{}.db", loaded.disk_version));
        tracing::info!(
            target: "db",
            from = loaded.disk_version,
            to = DB_VERSION,
            backup = %backup.display(),
            "upgrading database, making a backup"
        );
        std::fs::copy(path, &backup)?;
    }

    tracing::info!(target: "db", version = loaded.disk_version, read_only, "database loaded");
    Ok(loaded)
}

/// Cloneable handle to the database. Taking the write side marks the
/// database dirty so the sync worker knows to flush it.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<tokio::sync::RwLock<Database>>,
    dirty: Arc<AtomicBool>,
    path: Arc<PathBuf>,
    read_only: bool,
}

impl DbHandle {
    pub fn new(db: Database, path: PathBuf, read_only: bool) -> Self {
        DbHandle {
            inner: Arc::new(tokio::sync::RwLock::new(db)),
            dirty: Arc::new(AtomicBool::new(false)),
            path: Arc::new(path),
            read_only,
        }
    }

    pub async fn read(&self) -> tokio::sync::RwLockReadGuard<'_, Database> {
        self.inner.read().await
    }

    pub async fn write(&self) -> tokio::sync::RwLockWriteGuard<'_, Database> {
        if !self.read_only {
            self.dirty.store(true, Ordering::Relaxed);
        }

        self.inner.write().await
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Relaxed)
    }

    fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::Relaxed)
    }

    /// Serialises everything to `<path>.new` and renames it over the
    /// database file. On failure the previous file is left intact; a stale
    /// `.new` is simply overwritten by the next attempt.
    pub async fn sync(&self, interp: &Interp, markov: &MarkovHandle) -> Result<(), DbError> {
        if self.read_only {
            return Ok(());
        }

        let bytes = {
            let db = self.inner.read().await;
            let interp = interp.read().await;
            let markov = markov.read().await;
            serialise_all(&db, &interp, &markov)
        };

        let new_path = {
            let mut os = self.path.as_os_str().to_owned();
            os.push(".new");
            PathBuf::from(os)
        };
        tokio::fs::write(&new_path, &bytes).await?;
        tokio::fs::rename(&new_path, self.path.as_ref()).await?;

        tracing::debug!(target: "db", bytes = bytes.len(), "synced database");
        Ok(())
    }
}

/// Background worker: wakes every 30 seconds and flushes the database if
/// anything took a write lock since the last flush.
pub async fn sync_worker(
    db: DbHandle,
    interp: Interp,
    markov: MarkovHandle,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    if db.read_only {
        return;
    }

    let mut ticker = tokio::time::interval(SYNC_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if db.take_dirty() {
                    if let Err(error) = db.sync(&interp, &markov).await {
                        tracing::error!(target: "db", %error, "sync failed, will retry");
                        db.dirty.store(true, Ordering::Relaxed);
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    tracing::info!(target: "db", "sync worker exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perms::PermissionSet;

    fn sample_database() -> Database {
        let mut db = Database::default();

        let chan = db.twitch.channels.entry(String::from("somechannel")).or_default();
        chan.known_users.insert(
            String::from("42"),
            twitch::TwitchUser {
                id: String::from("42"),
                username: String::from("alice"),
                display_name: String::from("Alice"),
                permissions: 0x41,
                subscribed_months: 3,
                groups: vec![1],
            },
        );
        chan.username_mapping
            .insert(String::from("alice"), String::from("42"));

        db.shared.add_group("trusted").unwrap();

        db.log_message(
            Backend::Twitch,
            LogRecord {
                timestamp: 1000,
                user_id: "42",
                username: "alice",
                channel: "somechannel",
                guild: None,
                message_id: None,
                message: "hello world Kappa",
                emotes: &[(12, 5)],
                is_command: false,
                is_edit: false,
            },
        );

        db
    }

    #[test]
    fn test_full_roundtrip() {
        let db = sample_database();
        let mut interp = InterpState::new();
        interp
            .builtin_perms
            .insert(String::from("chmod"), PermissionSet::from_flags(0x40));
        let markov = MarkovModel::new();

        let bytes = serialise_all(&db, &interp, &markov);
        assert_eq!(&bytes[0..8], DB_MAGIC);

        let loaded = deserialise_all(&bytes).expect("load failed");
        assert_eq!(loaded.disk_version, DB_VERSION);

        let chan = loaded.db.twitch.get_channel("somechannel").unwrap();
        assert_eq!(chan.get_user("42").unwrap().username, "alice");
        assert_eq!(chan.username_mapping.get("alice").unwrap(), "42");

        assert!(loaded.db.shared.get_group("trusted").is_some());

        let log = &loaded.db.twitch.message_log.messages;
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].message.get(loaded.db.messages.arena()), "hello world Kappa");
        assert_eq!(log[0].emote_positions[0].get(loaded.db.messages.arena()), "Kappa");

        assert_eq!(
            loaded.interp.builtin_perms.get("chmod").unwrap().flags,
            0x40
        );
    }

    #[test]
    fn test_version_too_new_refuses() {
        let db = Database::default();
        let mut bytes = serialise_all(&db, &InterpState::new(), &MarkovModel::new());
        bytes[8..12].copy_from_slice(&(DB_VERSION + 1).to_le_bytes());

        assert!(matches!(
            deserialise_all(&bytes),
            Err(DbError::VersionTooNew { .. })
        ));
    }

    #[test]
    fn test_bad_magic_refuses() {
        let db = Database::default();
        let mut bytes = serialise_all(&db, &InterpState::new(), &MarkovModel::new());
        bytes[0] = b'x';

        assert!(matches!(deserialise_all(&bytes), Err(DbError::BadMagic { .. })));
    }

    #[test]
    fn test_corrupt_section_aborts_load() {
        let db = sample_database();
        let mut bytes = serialise_all(&db, &InterpState::new(), &MarkovModel::new());

        // stomp the first section's type tag.
        bytes[SUPERBLOCK_SIZE] = 0x77;
        assert!(matches!(
            deserialise_all(&bytes),
            Err(DbError::Section("twitch"))
        ));
    }

    #[test]
    fn test_load_creates_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ikura.db");

        let created = load(&path, true, false).unwrap();
        assert_eq!(created.disk_version, DB_VERSION);
        assert!(path.exists());

        let reloaded = load(&path, false, false).unwrap();
        assert_eq!(reloaded.disk_version, DB_VERSION);
    }

    #[test]
    fn test_load_missing_without_create() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.db");
        assert!(matches!(load(&path, false, false), Err(DbError::Missing)));
    }

    #[test]
    fn test_old_version_makes_backup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ikura.db");

        // write a file claiming an older version. the optional discord/irc
        // sections still serialise, since 26 is past both thresholds.
        let db = Database::default();
        let mut bytes = serialise_all(&db, &InterpState::new(), &MarkovModel::new());
        bytes[8..12].copy_from_slice(&26u32.to_le_bytes());
        std::fs::write(&path, &bytes).unwrap();

        let loaded = load(&path, false, false).unwrap();
        assert_eq!(loaded.disk_version, 26);
        assert!(dir.path().join("db-backup-v26.db").exists());
    }
}
