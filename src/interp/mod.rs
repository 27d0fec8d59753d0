//! The embedded command language: lexer, parser, type system and
//! tree-walking evaluator, plus the command registry the dispatcher runs
//! user commands through.

pub mod ast;
pub mod builtin;
pub mod command;
pub mod lexer;
pub mod parser;
pub mod ser;
pub mod types;
pub mod value;

pub use command::{Command, CommandKind};
pub use types::Type;
pub use value::Value;

use crate::perms::PermissionSet;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Scripts fail with deterministic, user-visible message strings.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ScriptError(pub String);

pub type ScriptResult<T> = Result<T, ScriptError>;

pub(crate) fn script_error<T>(msg: impl Into<String>) -> ScriptResult<T> {
    Err(ScriptError(msg.into()))
}

/// Wall-clock budget for one top-level evaluation; rechecked at every
/// function call.
pub const EXECUTION_TIME_LIMIT: Duration = Duration::from_millis(500);

/// Everything an evaluation needs to know about where it came from.
#[derive(Debug, Clone)]
pub struct CmdContext {
    pub caller_id: String,
    pub caller_name: String,
    pub channel_name: String,
    pub bot_username: String,

    /// Positional arguments (`$0`, `$1`, ...).
    pub args: Vec<Value>,

    /// The argument tail exactly as typed.
    pub raw_args: String,

    /// When the top-level invocation started; the time budget is measured
    /// against this.
    pub start: Instant,
}

impl CmdContext {
    pub fn new(caller_id: &str, caller_name: &str, channel_name: &str, bot_username: &str) -> Self {
        CmdContext {
            caller_id: caller_id.to_string(),
            caller_name: caller_name.to_string(),
            channel_name: channel_name.to_string(),
            bot_username: bot_username.to_string(),
            args: Vec::new(),
            raw_args: String::new(),
            start: Instant::now(),
        }
    }

    pub fn with_args(mut self, args: Vec<Value>, raw: &str) -> Self {
        self.args = args;
        self.raw_args = raw.to_string();
        self
    }
}

const RESERVED_GLOBALS: &[&str] = &["e", "i", "pi", "tau", "inf"];

pub fn is_reserved_global(name: &str) -> bool {
    RESERVED_GLOBALS.contains(&name)
}

fn is_context_var(name: &str) -> bool {
    matches!(name, "user" | "self" | "channel" | "args" | "raw_args")
}

/// The interpreter's mutable state: the command registry, alias table,
/// builtin-command permissions, and global variables.
#[derive(Debug, Clone, Default)]
pub struct InterpState {
    pub commands: HashMap<String, Command>,
    pub aliases: HashMap<String, String>,
    pub builtin_perms: HashMap<String, PermissionSet>,
    globals: HashMap<String, Value>,
}

impl InterpState {
    pub fn new() -> Self {
        let mut state = InterpState {
            builtin_perms: builtin::default_builtin_permissions(),
            ..Default::default()
        };
        state.insert_reserved_globals();
        state
    }

    fn insert_reserved_globals(&mut self) {
        use value::Complex;

        self.globals
            .insert(String::from("i"), Value::Complex(Complex::new(0.0, 1.0)));
        self.globals
            .insert(String::from("e"), Value::Double(std::f64::consts::E));
        self.globals
            .insert(String::from("pi"), Value::Double(std::f64::consts::PI));
        self.globals
            .insert(String::from("tau"), Value::Double(std::f64::consts::TAU));
        self.globals
            .insert(String::from("inf"), Value::Double(f64::INFINITY));
    }

    /// Resolves `$name` / `name` in order: positional argument, context
    /// variable, global, builtin function, user command.
    pub fn resolve_variable(&self, name: &str, cx: &CmdContext) -> Option<Value> {
        if let Some(rest) = name.strip_prefix('$') {
            if rest.is_empty() {
                return None;
            }

            if rest.bytes().all(|b| b.is_ascii_digit()) {
                let idx: usize = rest.parse().ok()?;
                return cx.args.get(idx).cloned();
            }

            return match rest {
                "user" => Some(Value::of_string(&cx.caller_name)),
                "self" => Some(Value::of_string(&cx.bot_username)),
                "channel" => Some(Value::of_string(&cx.channel_name)),
                "args" => Some(Value::of_list(
                    Type::string(),
                    cx.args.iter().map(|a| Value::of_string(&a.raw_str())).collect(),
                )),
                "raw_args" => Some(Value::of_string(&cx.raw_args)),
                _ => None,
            };
        }

        if let Some(value) = self.globals.get(name) {
            return Some(value.clone());
        }

        if let Some(builtin) = builtin::lookup(name) {
            return Some(Value::Function(builtin.signature(), name.to_string()));
        }

        if let Some(command) = self.find_command(name) {
            return Some(Value::Function(command.signature(), command.name.clone()));
        }

        None
    }

    pub fn get_global(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    pub fn get_global_mut(&mut self, name: &str) -> Option<&mut Value> {
        if is_reserved_global(name) {
            return None;
        }
        self.globals.get_mut(name)
    }

    /// Iterates the user-defined globals (reserved builtins excluded).
    pub fn user_globals(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.globals
            .iter()
            .filter(|(name, _)| !is_reserved_global(name))
    }

    pub(crate) fn insert_global_raw(&mut self, name: String, value: Value) {
        self.globals.insert(name, value);
    }

    pub fn add_global(&mut self, name: &str, value: Value) -> ScriptResult<()> {
        if is_reserved_global(name) || is_context_var(name) || name.starts_with(|c: char| c.is_ascii_digit()) {
            return script_error(format!("'{name}' is already a builtin global"));
        }

        if self.globals.contains_key(name) {
            return script_error(format!("global '{name}' already defined"));
        }

        if value.type_of().has_generics() {
            return script_error(format!(
                "cannot create values of generic type ('{}')",
                value.type_of()
            ));
        }

        self.globals.insert(name.to_string(), value);
        Ok(())
    }

    pub fn remove_global(&mut self, name: &str) -> ScriptResult<()> {
        if is_reserved_global(name) || is_context_var(name) {
            return script_error("cannot remove builtin globals");
        }

        if self.globals.remove(name).is_none() {
            return script_error(format!("'{name}' does not exist"));
        }

        Ok(())
    }

    /// Looks a command up by name, following alias chains. A cycle is
    /// reported and treated as unresolved.
    pub fn find_command(&self, name: &str) -> Option<Command> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut current = name;

        loop {
            if let Some(command) = self.commands.get(current) {
                return Some(command.clone());
            }

            let Some(next) = self.aliases.get(current) else {
                return None;
            };

            if !seen.insert(next.as_str()) {
                tracing::error!(target: "cmd", from = name, via = %next, "circular aliases");
                return None;
            }

            current = next;
        }
    }

    /// Removes a command or an alias; commands win when both exist.
    pub fn remove_command_or_alias(&mut self, name: &str) -> bool {
        self.commands.remove(name).is_some() || self.aliases.remove(name).is_some()
    }

    /// Parses and evaluates a single expression.
    pub fn evaluate_expr(&mut self, src: &str, cx: &mut CmdContext) -> ScriptResult<Value> {
        let expr = parser::parse_expr(src).map_err(ScriptError)?;
        ast::evaluate(&expr, self, cx)
    }
}

/// Shared handle to the interpreter state. Lookups take the read side;
/// `def`/`undef`/`global` and evaluation (which may assign globals) take
/// the write side.
pub type Interp = Arc<tokio::sync::RwLock<InterpState>>;

pub fn new_interp(state: InterpState) -> Interp {
    Arc::new(tokio::sync::RwLock::new(state))
}

#[cfg(test)]
pub(crate) fn test_context() -> CmdContext {
    CmdContext::new("1042", "alice", "testchannel", "ikura")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_globals_exist_and_resist_change() {
        let mut state = InterpState::new();
        assert!(state.get_global("pi").is_some());
        assert!(state.get_global_mut("pi").is_none());
        assert!(state.add_global("pi", Value::Integer(3)).is_err());
        assert!(state.remove_global("pi").is_err());
    }

    #[test]
    fn test_positional_and_context_variables() {
        let state = InterpState::new();
        let cx = test_context().with_args(
            vec![Value::of_string("first"), Value::of_string("second")],
            "first second",
        );

        assert_eq!(
            state.resolve_variable("$0", &cx),
            Some(Value::of_string("first"))
        );
        assert_eq!(state.resolve_variable("$2", &cx), None);
        assert_eq!(
            state.resolve_variable("$user", &cx),
            Some(Value::of_string("alice"))
        );
        assert_eq!(
            state.resolve_variable("$raw_args", &cx),
            Some(Value::of_string("first second"))
        );
    }

    #[test]
    fn test_alias_chain_and_cycle() {
        let mut state = InterpState::new();
        state
            .commands
            .insert(String::from("real"), Command::new_macro("real", "hello"));
        state
            .aliases
            .insert(String::from("a"), String::from("b"));
        state
            .aliases
            .insert(String::from("b"), String::from("real"));

        assert!(state.find_command("a").is_some());

        // cycle: c -> d -> c
        state.aliases.insert(String::from("c"), String::from("d"));
        state.aliases.insert(String::from("d"), String::from("c"));
        assert!(state.find_command("c").is_none());
    }

    #[test]
    fn test_add_and_remove_global() {
        let mut state = InterpState::new();
        state.add_global("greeting", Value::of_string("hi")).unwrap();
        assert!(state.add_global("greeting", Value::of_string("again")).is_err());
        state.remove_global("greeting").unwrap();
        assert!(state.remove_global("greeting").is_err());
    }
}
