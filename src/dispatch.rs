//! The message dispatcher: prefix detection, permission gating, command
//! execution, response emission, markov training and message logging.

use crate::backends::Channel;
use crate::db::{LogRecord, Snowflake};
use crate::interp::{builtin, parser, CmdContext, Command, CommandKind, Value};
use crate::markov::MarkovInput;
use crate::perms::{self, NameResolver, PermissionSet};
use crate::{BotContext, Emote, Message};

use std::collections::HashMap;
use std::sync::Arc;

/// Entry point for every inbound chat message the driver didn't already
/// drop (own messages, ignored users, non-chat CTCP).
///
/// Returns whether a command ran.
#[allow(clippy::too_many_arguments)]
pub async fn process_message(
    ctx: &BotContext,
    channel: Arc<dyn Channel>,
    user_id: &str,
    user_name: &str,
    message: &str,
    emotes: Vec<(usize, usize)>,
    enable_pings: bool,
    is_edit: bool,
) -> bool {
    let mut ran_command = false;

    let stripped = channel
        .command_prefixes()
        .into_iter()
        .filter(|p| !p.is_empty())
        .find_map(|p| message.strip_prefix(p.as_str()).map(str::to_string));

    if let Some(input) = stripped {
        process_command(ctx, &channel, user_id, user_name, input.trim()).await;
        ran_command = true;
    } else if enable_pings
        && channel.should_reply_mentions()
        && message
            .to_lowercase()
            .contains(&channel.username().to_lowercase())
    {
        channel
            .send_message(&Message::text(format!("{user_name} AYAYA /")))
            .await;
    } else if !channel.should_lurk() {
        let _ = ctx
            .markov_tx
            .send(MarkovInput {
                text: message.to_string(),
                emotes: emotes.clone(),
            })
            .await;
    }

    let record = LogRecord {
        timestamp: chrono::Utc::now().timestamp_millis().max(0) as u64,
        user_id,
        username: user_name,
        channel: &channel.name(),
        guild: channel.guild_id(),
        message_id: None,
        message,
        emotes: &emotes,
        is_command: ran_command,
        is_edit,
    };
    ctx.db.write().await.log_message(channel.backend(), record);

    ran_command
}

async fn process_command(
    ctx: &BotContext,
    channel: &Arc<dyn Channel>,
    user_id: &str,
    user_name: &str,
    input: &str,
) {
    let (head, tail) = match input.split_once(char::is_whitespace) {
        Some((head, tail)) => (head, tail.trim()),
        None => (input, ""),
    };

    if head.is_empty() {
        return;
    }

    let denied = |perms_failed: &str| {
        tracing::warn!(
            target: "cmd",
            user = %user_name,
            command = %perms_failed,
            "insufficient permissions"
        );
    };

    if builtin::is_builtin_command(head) {
        let required = ctx
            .interp
            .read()
            .await
            .builtin_perms
            .get(head)
            .cloned()
            .unwrap_or_default();

        if !channel.check_user_permissions(user_id, &required).await {
            denied(head);
            channel
                .send_message(&Message::text("insufficient permissions"))
                .await;
            return;
        }

        run_builtin_command(ctx, channel, user_id, user_name, head, tail).await;
        return;
    }

    let Some(cmd) = ctx.interp.read().await.find_command(head) else {
        tracing::warn!(target: "cmd", user = %user_name, command = %head, "non-existent command");
        return;
    };

    if !channel.check_user_permissions(user_id, &cmd.perms).await {
        denied(head);
        channel
            .send_message(&Message::text("insufficient permissions"))
            .await;
        return;
    }

    let mut cx = make_context(channel, user_id, user_name).with_args(
        tail.split_whitespace().map(Value::of_string).collect(),
        tail,
    );

    let result = {
        let mut interp = ctx.interp.write().await;
        cmd.run(&mut interp, &mut cx)
    };

    respond(channel, result).await;
}

fn make_context(channel: &Arc<dyn Channel>, user_id: &str, user_name: &str) -> CmdContext {
    CmdContext::new(user_id, user_name, &channel.name(), &channel.username())
}

async fn respond(
    channel: &Arc<dyn Channel>,
    result: Result<Value, crate::interp::ScriptError>,
) {
    match result {
        Ok(value) => {
            let msg = value_to_message(&value);
            if !msg.is_empty() {
                channel.send_message(&msg).await;
            }
        }
        Err(error) => {
            if channel.should_print_interp_errors() {
                channel.send_message(&Message::text(error.0)).await;
            }
        }
    }
}

/// Renders an interpreter value into a message. `:NAME` strings become
/// emote fragments, `\:` escapes a literal leading colon, lists flatten.
pub fn value_to_message(value: &Value) -> Message {
    let mut msg = Message::new();
    add_value(&mut msg, value);
    msg
}

fn add_value(msg: &mut Message, value: &Value) {
    match value {
        Value::Void => {}

        v if v.is_string() => {
            let s = v.get_string().unwrap();
            if let Some(rest) = s.strip_prefix("\\:") {
                msg.add_text(format!(":{rest}"));
            } else if let Some(name) = s.strip_prefix(':') {
                msg.add_emote(Emote::new(name));
            } else {
                msg.add_text(s);
            }
        }

        Value::List(_, xs) | Value::VariadicList(_, xs) => {
            for x in xs {
                add_value(msg, x);
            }
        }

        other => {
            msg.add_text(other.str());
        }
    }
}

/// Group/role name resolution for the permission grammar, snapshotted out
/// of the database so parsing stays pure.
struct SnapshotResolver {
    groups: HashMap<String, u64>,
    roles: HashMap<String, Snowflake>,
}

impl SnapshotResolver {
    async fn new(ctx: &BotContext, channel: &Arc<dyn Channel>) -> Self {
        let db = ctx.db.read().await;

        let groups = db
            .shared
            .groups
            .values()
            .map(|g| (g.name.clone(), g.id))
            .collect();

        let roles = channel
            .guild_id()
            .and_then(|id| db.discord.guilds.get(&id))
            .map(|g| g.role_names.clone())
            .unwrap_or_default();

        SnapshotResolver { groups, roles }
    }
}

impl NameResolver for SnapshotResolver {
    fn group_id(&self, name: &str) -> Option<u64> {
        self.groups.get(name).copied()
    }

    fn role_id(&self, name: &str) -> Option<Snowflake> {
        self.roles.get(name).copied()
    }
}

async fn run_builtin_command(
    ctx: &BotContext,
    channel: &Arc<dyn Channel>,
    user_id: &str,
    user_name: &str,
    name: &str,
    args: &str,
) {
    match name {
        "def" => command_def(ctx, channel, args, false).await,
        "redef" => command_def(ctx, channel, args, true).await,
        "undef" => command_undef(ctx, channel, args).await,
        "show" => command_show(ctx, channel, args).await,
        "chmod" => command_chmod(ctx, channel, args).await,
        "global" => command_global(ctx, channel, args).await,
        "eval" => command_eval(ctx, channel, user_id, user_name, args).await,
        "markov" => command_markov(ctx, channel).await,
        "usermod" => command_usermod(ctx, channel, args).await,
        _ => {}
    }
}

/// `def <name> [=>] <expansion>` / `def fn <name> <sig> <body>`.
///
/// A `=>` body that parses as a single expression becomes a function in
/// macro clothing; anything else becomes a word-expanded macro.
async fn command_def(ctx: &BotContext, channel: &Arc<dyn Channel>, args: &str, redef: bool) {
    let verb = if redef { "redef" } else { "def" };

    let (name, expansion) = match args.split_once(char::is_whitespace) {
        Some((name, rest)) => (name.trim(), rest.trim()),
        None => (args.trim(), ""),
    };

    if name.is_empty() {
        channel
            .send_message(&Message::text(format!("not enough arguments to '{verb}'")))
            .await;
        return;
    }

    if expansion.is_empty() {
        channel
            .send_message(&Message::text(format!("'{verb}' expansion cannot be empty")))
            .await;
        return;
    }

    let command = if name == "fn" {
        match parser::parse_function_defn(args) {
            Ok(defn) => Command::new_function(defn),
            Err(error) => {
                channel.send_message(&Message::text(error)).await;
                return;
            }
        }
    } else {
        let body = expansion.strip_prefix("=>").map(str::trim).unwrap_or(expansion);

        match parser::parse_expr(body) {
            Ok(expr) => Command::new_expression(name, expr),
            Err(_) => Command::new_macro(name, body),
        }
    };

    let target = command.name.clone();

    {
        let mut interp = ctx.interp.write().await;
        let exists = interp.find_command(&target).is_some();

        if exists && !redef {
            channel
                .send_message(&Message::text(format!("'{target}' is already defined")))
                .await;
            return;
        }

        if !exists && redef {
            channel
                .send_message(&Message::text(format!("'{target}' does not exist")))
                .await;
            return;
        }

        if redef {
            interp.remove_command_or_alias(&target);
        }

        interp.commands.insert(target.clone(), command);
    }

    let prefix = if redef { "re" } else { "" };
    channel
        .send_message(&Message::text(format!("{prefix}defined '{target}'")))
        .await;
}

async fn command_undef(ctx: &BotContext, channel: &Arc<dyn Channel>, args: &str) {
    let args = args.trim();
    if args.is_empty() || args.contains(char::is_whitespace) {
        channel
            .send_message(&Message::text("'undef' takes exactly 1 argument"))
            .await;
        return;
    }

    let done = ctx.interp.write().await.remove_command_or_alias(args);
    let reply = if done {
        format!("removed '{args}'")
    } else {
        format!("'{args}' does not exist")
    };
    channel.send_message(&Message::text(reply)).await;
}

async fn command_show(ctx: &BotContext, channel: &Arc<dyn Channel>, args: &str) {
    let args = args.trim();
    if args.is_empty() || args.contains(char::is_whitespace) {
        channel
            .send_message(&Message::text("'show' takes exactly 1 argument"))
            .await;
        return;
    }

    if builtin::is_builtin_command(args) {
        channel
            .send_message(&Message::text(format!("'{args}' is a builtin command")))
            .await;
        return;
    }

    let Some(cmd) = ctx.interp.read().await.find_command(args) else {
        channel
            .send_message(&Message::text(format!("'{args}' does not exist")))
            .await;
        return;
    };

    match &cmd.kind {
        CommandKind::Macro(code) => {
            let mut msg = Message::new();
            msg.add_text(format!("'{args}' is defined as:"));
            for word in code {
                msg.add_text(word.clone());
            }
            channel.send_message(&msg).await;
        }
        CommandKind::Function(defn) => {
            channel
                .send_message(&Message::text(format!(
                    "'{args}' is a function with signature {}",
                    defn.signature
                )))
                .await;
        }
    }
}

async fn command_chmod(ctx: &BotContext, channel: &Arc<dyn Channel>, args: &str) {
    let (name, perm_str) = match args.split_once(char::is_whitespace) {
        Some((name, rest)) => (name.trim(), rest.trim()),
        None => (args.trim(), ""),
    };

    if name.is_empty() || perm_str.is_empty() {
        channel
            .send_message(&Message::text("not enough arguments to chmod"))
            .await;
        return;
    }

    let resolver = SnapshotResolver::new(ctx, channel).await;

    let current = {
        let interp = ctx.interp.read().await;
        if builtin::is_builtin_command(name) {
            interp.builtin_perms.get(name).cloned().unwrap_or_default()
        } else if let Some(cmd) = interp.find_command(name) {
            cmd.perms
        } else {
            channel
                .send_message(&Message::text(format!("'{name}' does not exist")))
                .await;
            return;
        }
    };

    let updated = match perms::parse(perm_str, current, &resolver) {
        Ok(updated) => updated,
        Err(error) => {
            channel.send_message(&Message::text(error)).await;
            return;
        }
    };

    let flags = updated.flags;
    {
        let mut interp = ctx.interp.write().await;
        if builtin::is_builtin_command(name) {
            interp.builtin_perms.insert(name.to_string(), updated);
        } else if let Some(cmd) = interp.commands.get_mut(name) {
            cmd.perms = updated;
        } else if let Some(resolved) = interp.find_command(name).map(|c| c.name) {
            // name was an alias; chmod applies to the resolved command
            if let Some(cmd) = interp.commands.get_mut(&resolved) {
                cmd.perms = updated;
            }
        }
    }

    channel
        .send_message(&Message::text(format!(
            "permissions for '{name}' changed to {flags:x}"
        )))
        .await;
}

async fn command_global(ctx: &BotContext, channel: &Arc<dyn Channel>, args: &str) {
    let (name, type_str) = match args.split_once(char::is_whitespace) {
        Some((name, rest)) => (name.trim(), rest.trim()),
        None => (args.trim(), ""),
    };

    if name.is_empty() || type_str.is_empty() {
        channel
            .send_message(&Message::text("not enough arguments to global"))
            .await;
        return;
    }

    let ty = match parser::parse_type(type_str) {
        Ok(ty) => ty,
        Err(_) => {
            channel
                .send_message(&Message::text(format!("invalid type '{type_str}'")))
                .await;
            return;
        }
    };

    let Some(value) = Value::default_of(&ty) else {
        channel
            .send_message(&Message::text(format!(
                "cannot create a global of type '{ty}'"
            )))
            .await;
        return;
    };

    let result = ctx.interp.write().await.add_global(name, value);
    let reply = match result {
        Ok(()) => format!("added global '{name}' with type '{ty}'"),
        Err(error) => error.0,
    };
    channel.send_message(&Message::text(reply)).await;
}

async fn command_eval(
    ctx: &BotContext,
    channel: &Arc<dyn Channel>,
    user_id: &str,
    user_name: &str,
    args: &str,
) {
    let mut cx = make_context(channel, user_id, user_name).with_args(Vec::new(), args);

    let started = std::time::Instant::now();
    let result = ctx.interp.write().await.evaluate_expr(args, &mut cx);
    tracing::debug!(
        target: "interp",
        elapsed_ms = started.elapsed().as_millis() as u64,
        "eval finished"
    );

    respond(channel, result).await;
}

async fn command_markov(ctx: &BotContext, channel: &Arc<dyn Channel>) {
    let msg = ctx.markov.read().await.generate(&mut rand::rng());
    if !msg.is_empty() {
        channel.send_message(&msg).await;
    }
}

/// `usermod <user> <groupspec>`: applies a `+group-group` spec to a
/// user's memberships, keeping `Group::members` in sync.
async fn command_usermod(ctx: &BotContext, channel: &Arc<dyn Channel>, args: &str) {
    let (user, spec) = match args.split_once(char::is_whitespace) {
        Some((user, rest)) => (user.trim(), rest.trim()),
        None => (args.trim(), ""),
    };

    if user.is_empty() || spec.is_empty() {
        channel
            .send_message(&Message::text("not enough arguments to usermod"))
            .await;
        return;
    }

    let resolver = SnapshotResolver::new(ctx, channel).await;
    let parsed = match perms::parse_groups(spec, PermissionSet::default(), &resolver) {
        Ok(parsed) => parsed,
        Err(error) => {
            channel.send_message(&Message::text(error)).await;
            return;
        }
    };

    if !parsed.role_whitelist.is_empty() || !parsed.role_blacklist.is_empty() {
        channel
            .send_message(&Message::text("cannot modify discord roles"))
            .await;
        return;
    }

    let backend = channel.backend();
    let channel_name = channel.name();
    let mut db = ctx.db.write().await;

    // resolve the user per backend, then re-borrow the groups
    let user_key: Option<String> = match backend {
        crate::Backend::Twitch => db
            .twitch
            .get_channel(&channel_name)
            .and_then(|c| c.username_mapping.get(user).cloned()),
        crate::Backend::Discord => channel.guild_id().and_then(|gid| {
            let guild = db.discord.guilds.get(&gid)?;
            crate::backends::discord::dispatch::parse_mention(user)
                .map(|(id, _)| id)
                .or_else(|| guild.username_map.get(user).copied())
                .or_else(|| guild.nickname_map.get(user).copied())
                .map(|id| id.to_string())
        }),
        crate::Backend::Irc => Some(user.to_string()),
    };

    let Some(user_key) = user_key else {
        channel
            .send_message(&Message::text(format!("unknown user '{user}'")))
            .await;
        return;
    };

    // the whitelist adds memberships, the blacklist removes them
    for group_id in &parsed.whitelist {
        if let Some(group) = db.shared.get_group_by_id_mut(*group_id) {
            group.add_member(&user_key, backend);
        }
    }
    for group_id in &parsed.blacklist {
        if let Some(group) = db.shared.get_group_by_id_mut(*group_id) {
            group.remove_member(&user_key, backend);
        }
    }

    let update_user_groups = |groups: &mut Vec<u64>| {
        for id in &parsed.whitelist {
            if !groups.contains(id) {
                groups.push(*id);
            }
        }
        groups.retain(|id| !parsed.blacklist.contains(id));
    };

    let found = match backend {
        crate::Backend::Twitch => db
            .twitch
            .channels
            .get_mut(&channel_name)
            .and_then(|c| c.known_users.get_mut(&user_key))
            .map(|u| update_user_groups(&mut u.groups))
            .is_some(),
        crate::Backend::Discord => channel
            .guild_id()
            .and_then(|gid| db.discord.guilds.get_mut(&gid))
            .and_then(|g| {
                let id: Snowflake = user_key.parse().ok()?;
                g.known_users.get_mut(&id)
            })
            .map(|u| update_user_groups(&mut u.groups))
            .is_some(),
        crate::Backend::Irc => {
            // nicks are per-server; scan every server record for the nick
            db.irc
                .servers
                .values_mut()
                .flat_map(|s| s.known_users.get_mut(&user_key))
                .map(|u| update_user_groups(&mut u.groups))
                .next()
                .is_some()
        }
    };

    drop(db);

    let reply = if found {
        format!("updated groups for '{user}'")
    } else {
        format!("unknown user '{user}'")
    };
    channel.send_message(&Message::text(reply)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::UserPerms;
    use crate::config::Config;
    use crate::db::{Database, DbHandle};
    use crate::interp::{new_interp, InterpState, Type};
    use crate::markov::{self, MarkovHandle, MarkovModel};
    use crate::perms::flags;
    use crate::Fragment;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct TestChannel {
        sent: Mutex<Vec<String>>,
        prefix: String,
        lurk: bool,
        user_flags: u64,
        respond_to_pings: bool,
        silent_errors: bool,
    }

    impl TestChannel {
        fn new(user_flags: u64) -> Arc<Self> {
            Arc::new(TestChannel {
                sent: Mutex::new(Vec::new()),
                prefix: String::from("!"),
                lurk: false,
                user_flags,
                respond_to_pings: false,
                silent_errors: false,
            })
        }

        fn sent(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Channel for TestChannel {
        fn backend(&self) -> crate::Backend {
            crate::Backend::Twitch
        }

        fn name(&self) -> String {
            String::from("testchannel")
        }

        fn username(&self) -> String {
            String::from("ikura")
        }

        fn command_prefixes(&self) -> Vec<String> {
            vec![self.prefix.clone()]
        }

        fn should_reply_mentions(&self) -> bool {
            self.respond_to_pings
        }

        fn should_print_interp_errors(&self) -> bool {
            !self.silent_errors
        }

        fn should_lurk(&self) -> bool {
            self.lurk
        }

        async fn user_permissions(&self, _user_id: &str) -> UserPerms {
            UserPerms {
                flags: self.user_flags,
                groups: Vec::new(),
                roles: Vec::new(),
            }
        }

        async fn send_message(&self, msg: &Message) {
            self.sent.lock().unwrap().push(msg.render_plain());
        }
    }

    fn test_ctx() -> (BotContext, tokio::sync::mpsc::Receiver<MarkovInput>) {
        let dir = std::env::temp_dir().join("ikura-dispatch-test.db");
        let (markov_tx, markov_rx) = markov::channel();
        let (shutdown, _) = tokio::sync::watch::channel(false);

        (
            BotContext {
                db: DbHandle::new(Database::default(), dir, true),
                interp: new_interp(InterpState::new()),
                markov: MarkovHandle::new(MarkovModel::new()),
                markov_tx,
                config: std::sync::Arc::new(Config::default()),
                shutdown,
            },
            markov_rx,
        )
    }

    async fn say(ctx: &BotContext, chan: &Arc<TestChannel>, text: &str) {
        let channel: Arc<dyn Channel> = chan.clone();
        process_message(ctx, channel, "42", "alice", text, Vec::new(), true, false).await;
    }

    #[tokio::test]
    async fn test_eval_arithmetic() {
        let (ctx, _rx) = test_ctx();
        let chan = TestChannel::new(flags::EVERYONE);

        say(&ctx, &chan, "!eval 1+2*3").await;
        assert_eq!(chan.sent(), vec!["7"]);
    }

    #[tokio::test]
    async fn test_def_and_invoke_macro_function() {
        let (ctx, _rx) = test_ctx();
        let chan = TestChannel::new(flags::MODERATOR);

        say(&ctx, &chan, r#"!def greet => "hello, " + $user"#).await;
        assert_eq!(chan.sent(), vec!["defined 'greet'"]);

        let bob = TestChannel::new(flags::EVERYONE);
        let channel: Arc<dyn Channel> = bob.clone();
        process_message(&ctx, channel, "77", "bob", "!greet", Vec::new(), true, false).await;
        assert_eq!(bob.sent(), vec!["hello, bob"]);
    }

    #[tokio::test]
    async fn test_def_twice_reports_already_defined() {
        let (ctx, _rx) = test_ctx();
        let chan = TestChannel::new(flags::MODERATOR);

        say(&ctx, &chan, "!def foo => bar").await;
        say(&ctx, &chan, "!def foo => bar").await;
        assert_eq!(
            chan.sent(),
            vec!["defined 'foo'", "'foo' is already defined"]
        );
    }

    #[tokio::test]
    async fn test_redef_is_idempotent() {
        let (ctx, _rx) = test_ctx();
        let chan = TestChannel::new(flags::MODERATOR);

        say(&ctx, &chan, "!def foo => 1").await;
        say(&ctx, &chan, "!redef foo => 2").await;
        say(&ctx, &chan, "!redef foo => 2").await;

        let sent = chan.sent();
        assert_eq!(sent[1], "redefined 'foo'");
        assert_eq!(sent[2], "redefined 'foo'");

        say(&ctx, &chan, "!foo").await;
        assert_eq!(chan.sent().last().unwrap(), "2");
    }

    #[tokio::test]
    async fn test_permission_denied_leaves_state_unchanged() {
        let (ctx, _rx) = test_ctx();

        // chmod requires MODERATOR (0x40); EVERYONE (0x01) is denied
        let chan = TestChannel::new(flags::EVERYONE);
        say(&ctx, &chan, "!chmod foo 20").await;
        assert_eq!(chan.sent(), vec!["insufficient permissions"]);

        let interp = ctx.interp.read().await;
        assert_eq!(interp.builtin_perms.get("chmod").unwrap().flags, 0x40);
        assert!(interp.find_command("foo").is_none());
    }

    #[tokio::test]
    async fn test_chmod_merge_and_replace() {
        let (ctx, _rx) = test_ctx();
        let chan = TestChannel::new(flags::MODERATOR);

        say(&ctx, &chan, "!def foo => 1").await;
        say(&ctx, &chan, "!chmod foo 3f").await;
        say(&ctx, &chan, "!chmod foo +40").await;

        let interp = ctx.interp.read().await;
        assert_eq!(interp.find_command("foo").unwrap().perms.flags, 0x7f);
        drop(interp);

        say(&ctx, &chan, "!chmod foo 40").await;
        let interp = ctx.interp.read().await;
        assert_eq!(interp.find_command("foo").unwrap().perms.flags, 0x40);
    }

    #[tokio::test]
    async fn test_overload_outputs() {
        let (ctx, _rx) = test_ctx();
        let chan = TestChannel::new(flags::EVERYONE);

        say(&ctx, &chan, "!eval str(3.14)").await;
        say(&ctx, &chan, "!eval str([1,2,3])").await;
        assert_eq!(chan.sent(), vec!["3.140", "[1, 2, 3]"]);
    }

    #[tokio::test]
    async fn test_markov_training_feed_respects_lurk() {
        let (ctx, mut rx) = test_ctx();
        let chan = TestChannel::new(flags::EVERYONE);

        say(&ctx, &chan, "just chatting here").await;
        let input = rx.try_recv().unwrap();
        assert_eq!(input.text, "just chatting here");

        // commands never train the model
        say(&ctx, &chan, "!eval 1").await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_mention_reply() {
        let (ctx, _rx) = test_ctx();
        let chan = Arc::new(TestChannel {
            sent: Mutex::new(Vec::new()),
            prefix: String::from("!"),
            lurk: false,
            user_flags: flags::EVERYONE,
            respond_to_pings: true,
            silent_errors: false,
        });

        say(&ctx, &chan, "hey Ikura how are you").await;
        assert_eq!(chan.sent(), vec!["alice AYAYA /"]);
    }

    #[tokio::test]
    async fn test_messages_are_logged_with_interning() {
        let (ctx, _rx) = test_ctx();
        let chan = TestChannel::new(flags::EVERYONE);

        say(&ctx, &chan, "hello log").await;

        let db = ctx.db.read().await;
        let log = &db.twitch.message_log.messages;
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].message.get(db.messages.arena()), "hello log");
        assert!(!log[0].is_command);
    }

    #[tokio::test]
    async fn test_undef_and_unknown_command() {
        let (ctx, _rx) = test_ctx();
        let chan = TestChannel::new(flags::MODERATOR);

        say(&ctx, &chan, "!def foo => 1").await;
        say(&ctx, &chan, "!undef foo").await;
        say(&ctx, &chan, "!undef foo").await;

        let sent = chan.sent();
        assert_eq!(sent[1], "removed 'foo'");
        assert_eq!(sent[2], "'foo' does not exist");

        // unknown commands warn silently
        say(&ctx, &chan, "!ghost").await;
        assert_eq!(chan.sent().len(), 3);
    }

    #[tokio::test]
    async fn test_global_command() {
        let (ctx, _rx) = test_ctx();
        let chan = TestChannel::new(flags::MODERATOR);

        say(&ctx, &chan, "!global counter int").await;
        assert_eq!(chan.sent(), vec!["added global 'counter' with type 'int'"]);

        say(&ctx, &chan, "!eval counter += 5").await;
        say(&ctx, &chan, "!eval counter").await;
        assert_eq!(chan.sent().last().unwrap(), "5");
    }

    #[tokio::test]
    async fn test_usermod_updates_groups_both_ways() {
        let (ctx, _rx) = test_ctx();

        {
            let mut db = ctx.db.write().await;
            db.shared.add_group("regulars").unwrap();

            let chan = db
                .twitch
                .channels
                .entry(String::from("testchannel"))
                .or_default();
            chan.known_users.insert(
                String::from("42"),
                crate::db::twitch::TwitchUser {
                    id: String::from("42"),
                    username: String::from("alice"),
                    ..Default::default()
                },
            );
            chan.username_mapping
                .insert(String::from("alice"), String::from("42"));
        }

        let chan = TestChannel::new(flags::MODERATOR);
        say(&ctx, &chan, "!usermod alice +regulars").await;
        assert_eq!(chan.sent().last().unwrap(), "updated groups for 'alice'");

        let db = ctx.db.read().await;
        let group = db.shared.get_group("regulars").unwrap();
        assert!(group.members.iter().any(|m| m.id == "42"));

        let user = db
            .twitch
            .get_channel("testchannel")
            .unwrap()
            .get_user("42")
            .unwrap();
        assert!(user.groups.contains(&group.id));
        drop(db);

        // '-' undoes the membership on both sides
        say(&ctx, &chan, "!usermod alice -regulars").await;
        let db = ctx.db.read().await;
        assert!(db.shared.get_group("regulars").unwrap().members.is_empty());
        assert!(db
            .twitch
            .get_channel("testchannel")
            .unwrap()
            .get_user("42")
            .unwrap()
            .groups
            .is_empty());
    }

    #[tokio::test]
    async fn test_value_to_message_emote_syntax() {
        let list = Value::of_list(
            Type::string(),
            vec![
                Value::of_string("hello"),
                Value::of_string(":Kappa"),
                Value::of_string("\\:notemote"),
            ],
        );

        let msg = value_to_message(&list);
        assert_eq!(
            msg.fragments,
            vec![
                Fragment::Text(String::from("hello")),
                Fragment::Emote(Emote::new("Kappa")),
                Fragment::Text(String::from(":notemote")),
            ]
        );
    }

    #[tokio::test]
    async fn test_script_errors_respect_silent_flag() {
        let (ctx, _rx) = test_ctx();

        let loud = TestChannel::new(flags::EVERYONE);
        say(&ctx, &loud, "!eval 1 +").await;
        assert_eq!(loud.sent().len(), 1);

        let quiet = Arc::new(TestChannel {
            sent: Mutex::new(Vec::new()),
            prefix: String::from("!"),
            lurk: false,
            user_flags: flags::EVERYONE,
            respond_to_pings: false,
            silent_errors: true,
        });
        say(&ctx, &quiet, "!eval 1 +").await;
        assert!(quiet.sent().is_empty());
    }
}
