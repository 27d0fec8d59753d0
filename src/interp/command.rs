//! Commands: named macros and functions, overload resolution, and the
//! macro word-expansion machinery.

use crate::interp::ast::FunctionDefn;
use crate::interp::types::Type;
use crate::interp::value::Value;
use crate::interp::{builtin, script_error, CmdContext, InterpState, ScriptResult};
use crate::perms::PermissionSet;
use std::sync::Arc;

/// What a registered command actually is. Builtin functions and overload
/// sets live in static tables (`builtin.rs`) and are not persisted.
#[derive(Debug, Clone)]
pub enum CommandKind {
    /// A pre-split list of code words, expanded textually on each run.
    Macro(Vec<String>),

    /// A parsed function definition with a typed signature.
    Function(Arc<FunctionDefn>),
}

#[derive(Debug, Clone)]
pub struct Command {
    pub name: String,
    pub perms: PermissionSet,
    pub kind: CommandKind,
}

impl Command {
    pub fn new_macro(name: &str, code: &str) -> Command {
        Command {
            name: name.to_string(),
            perms: PermissionSet::from_flags(crate::perms::flags::EVERYONE),
            kind: CommandKind::Macro(
                perform_expansion(code).into_iter().map(String::from).collect(),
            ),
        }
    }

    pub fn new_function(defn: FunctionDefn) -> Command {
        Command {
            name: defn.name.clone(),
            perms: PermissionSet::from_flags(crate::perms::flags::EVERYONE),
            kind: CommandKind::Function(Arc::new(defn)),
        }
    }

    /// Wraps a single expression as a function with the macro calling
    /// convention (arguments arrive as strings in `$0`, `$1`, ...).
    pub fn new_expression(name: &str, expr: crate::interp::ast::Expr) -> Command {
        Command::new_function(FunctionDefn {
            name: name.to_string(),
            signature: Type::macro_function(),
            generics: Vec::new(),
            body: crate::interp::ast::Block {
                stmts: vec![crate::interp::ast::Stmt::Expr(expr)],
            },
        })
    }

    pub fn signature(&self) -> Type {
        match &self.kind {
            CommandKind::Macro(_) => Type::macro_function(),
            CommandKind::Function(defn) => defn.signature.clone(),
        }
    }

    pub fn run(&self, interp: &mut InterpState, cx: &mut CmdContext) -> ScriptResult<Value> {
        match &self.kind {
            CommandKind::Macro(code) => Ok(Value::of_list(
                Type::string(),
                evaluate_macro(interp, cx, code),
            )),
            CommandKind::Function(defn) => defn.evaluate(interp, cx),
        }
    }
}

/// Splits a macro body into code words. Ordinary words break on
/// whitespace; a word starting with `\` is an inline expression and runs
/// until a space or `;` outside any brackets; a word starting with `\\`
/// is a literal.
pub fn perform_expansion(code: &str) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut rest = code.trim();

    while !rest.is_empty() {
        let end = if rest.starts_with('\\') && !rest.starts_with("\\\\") {
            let mut depth: i32 = 0;
            let mut end = rest.len();

            for (i, c) in rest.char_indices().skip(1) {
                match c {
                    '(' | '{' | '[' => depth += 1,
                    ')' | '}' | ']' => depth -= 1,
                    ' ' | ';' if depth == 0 => {
                        end = i;
                        break;
                    }
                    _ => {}
                }
            }

            if depth > 0 {
                tracing::error!(target: "interp", "unterminated inline expr");
            }

            end
        } else {
            rest.find(char::is_whitespace).unwrap_or(rest.len())
        };

        if end > 0 {
            pieces.push(&rest[..end]);
        }

        rest = rest[end..].trim_start_matches(';').trim_start();
    }

    pieces
}

/// Expands macro code words into a list of strings: `\\` keeps a literal
/// backslash, `\<expr>` evaluates the suffix, everything else echoes.
pub fn evaluate_macro(
    interp: &mut InterpState,
    cx: &mut CmdContext,
    code: &[String],
) -> Vec<Value> {
    let mut list = Vec::new();

    for word in code {
        if word.is_empty() {
            continue;
        }

        if let Some(rest) = word.strip_prefix("\\\\") {
            list.push(Value::of_string(&format!("\\{rest}")));
        } else if let Some(expr) = word.strip_prefix('\\') {
            match interp.evaluate_expr(expr, cx) {
                Ok(value) => {
                    // a non-string list is dismantled into words
                    if value.is_list() && !value.is_string() {
                        for x in value.get_list().unwrap() {
                            list.push(Value::of_string(&x.raw_str()));
                        }
                    } else {
                        list.push(Value::of_string(&value.raw_str()));
                    }
                }
                Err(error) => {
                    tracing::warn!(target: "macro", %error, "expansion error");
                    list.push(Value::of_string("<error>"));
                }
            }
        } else {
            list.push(Value::of_string(word));
        }
    }

    list
}

/// The summed cast distance of calling a signature with `given` argument
/// types; `None` when the call cannot work. A trailing variadic parameter
/// matches any remaining arity at a flat cost of 10 plus per-element casts.
pub fn overload_distance(target: &[Type], given: &[Type]) -> Option<u32> {
    let variadic = target.last().is_some_and(Type::is_variadic_list);
    let fixed = if variadic { target.len() - 1 } else { target.len() };

    if !variadic && target.len() != given.len() {
        return None;
    }

    if given.len() < fixed {
        return None;
    }

    let mut cost = 0;
    for i in 0..fixed {
        cost += given[i].cast_distance(&target[i])?;
    }

    if variadic {
        let elm = target.last().unwrap().elm_type().unwrap();

        cost += 10;
        for g in &given[fixed..] {
            cost += g.cast_distance(elm)?;
        }
    }

    Some(cost)
}

/// Casts every argument to the signature's parameter type, packing a
/// variadic tail into one list argument. Rejects on any uncastable
/// argument.
pub fn coerce_args(
    name: &str,
    signature: &Type,
    given: Vec<Value>,
) -> ScriptResult<Vec<Value>> {
    let target = signature.arg_types();
    let variadic = target.last().is_some_and(Type::is_variadic_list);
    let fixed = if variadic { target.len() - 1 } else { target.len() };

    if (!variadic && target.len() != given.len()) || given.len() < fixed {
        return script_error(format!(
            "call to '{name}' with wrong number of arguments (expected {}, found {})",
            target.len(),
            given.len()
        ));
    }

    let mismatch = |i: usize, expected: &Type, found: &Type| {
        crate::interp::ScriptError(format!(
            "'{name}': arg {}: type mismatch, expected '{expected}', found '{found}'",
            i + 1
        ))
    };

    let mut rest = given;
    let tail: Vec<Value> = rest.split_off(fixed);

    let mut out = Vec::with_capacity(target.len());
    for (i, (value, expected)) in rest.into_iter().zip(target).enumerate() {
        let coerced = value
            .cast_to(expected)
            .ok_or_else(|| mismatch(i, expected, &value.type_of()))?;
        out.push(coerced);
    }

    if variadic {
        let vla_type = target.last().unwrap();
        let elm = vla_type.elm_type().unwrap();

        // forwarding: a single trailing list of the right shape spreads
        let forward = tail.len() == 1 && tail[0].type_of().is_same(vla_type);
        let spread = if forward {
            match tail.into_iter().next() {
                Some(Value::List(_, xs)) | Some(Value::VariadicList(_, xs)) => xs,
                _ => Vec::new(),
            }
        } else {
            tail
        };

        let mut vla = Vec::with_capacity(spread.len());
        for (i, value) in spread.into_iter().enumerate() {
            let coerced = value
                .cast_to(elm)
                .ok_or_else(|| mismatch(fixed + i, elm, &value.type_of()))?;
            vla.push(coerced);
        }

        out.push(Value::VariadicList(elm.clone(), vla));
    }

    Ok(out)
}

/// Calls a function by name: builtin functions and overload sets first,
/// then the user command registry. Macros get their arguments as strings.
pub fn call_named(
    interp: &mut InterpState,
    cx: &mut CmdContext,
    name: &str,
    args: Vec<Value>,
) -> ScriptResult<Value> {
    if let Some(builtin) = builtin::lookup(name) {
        return builtin.run(args);
    }

    let Some(command) = interp.find_command(name) else {
        return script_error(format!("'{name}' is not defined"));
    };

    let args = match &command.kind {
        CommandKind::Macro(_) => args
            .into_iter()
            .map(|a| Value::of_string(&a.raw_str()))
            .collect(),
        // expression commands use the macro calling convention too
        CommandKind::Function(defn) if defn.signature == Type::macro_function() => args
            .into_iter()
            .map(|a| Value::of_string(&a.raw_str()))
            .collect(),
        CommandKind::Function(defn) => coerce_args(name, &defn.signature, args)?,
    };

    let mut inner = cx.clone();
    inner.args = args;
    command.run(interp, &mut inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::{test_context, InterpState};

    #[test]
    fn test_perform_expansion_plain_words() {
        assert_eq!(perform_expansion("hello there  world"), vec!["hello", "there", "world"]);
        assert_eq!(perform_expansion(""), Vec::<&str>::new());
    }

    #[test]
    fn test_perform_expansion_inline_exprs() {
        let words = perform_expansion(r"count: \(1 + 2) end");
        assert_eq!(words, vec!["count:", r"\(1 + 2)", "end"]);

        // brackets protect spaces inside the expression
        let words = perform_expansion(r"\f([1, 2], x) tail");
        assert_eq!(words, vec![r"\f([1, 2], x)", "tail"]);
    }

    #[test]
    fn test_perform_expansion_literal_backslash() {
        assert_eq!(perform_expansion(r"\\word next"), vec![r"\\word", "next"]);
    }

    #[test]
    fn test_evaluate_macro_words() {
        let mut state = InterpState::new();
        let mut cx = test_context().with_args(vec![Value::of_string("bob")], "bob");

        let code: Vec<String> = [r"hello,", r"\$0", r"\\x", r"\(1+2)"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let out = evaluate_macro(&mut state, &mut cx, &code);
        let words: Vec<String> = out.iter().map(Value::raw_str).collect();
        assert_eq!(words, vec!["hello,", "bob", r"\x", "3"]);
    }

    #[test]
    fn test_evaluate_macro_dismantles_lists() {
        let mut state = InterpState::new();
        let mut cx = test_context();

        let code = vec![String::from(r"\[1, 2, 3]")];
        let out = evaluate_macro(&mut state, &mut cx, &code);
        let words: Vec<String> = out.iter().map(Value::raw_str).collect();
        assert_eq!(words, vec!["1", "2", "3"]);
    }

    #[test]
    fn test_evaluate_macro_error_word() {
        let mut state = InterpState::new();
        let mut cx = test_context();

        let code = vec![String::from(r"\(1 +)")];
        let out = evaluate_macro(&mut state, &mut cx, &code);
        assert_eq!(out[0].raw_str(), "<error>");
    }

    #[test]
    fn test_overload_distance() {
        let target = [Type::Double];
        assert_eq!(overload_distance(&target, &[Type::Double]), Some(0));
        assert_eq!(overload_distance(&target, &[Type::Integer]), Some(1));
        assert_eq!(overload_distance(&target, &[Type::string()]), None);
        assert_eq!(overload_distance(&target, &[]), None);

        let variadic = [Type::Integer, Type::VariadicList(Box::new(Type::Integer))];
        assert_eq!(overload_distance(&variadic, &[Type::Integer]), Some(10));
        assert_eq!(
            overload_distance(&variadic, &[Type::Integer, Type::Integer, Type::Integer]),
            Some(10)
        );
        assert_eq!(overload_distance(&variadic, &[]), None);
    }

    #[test]
    fn test_coerce_args_casts_and_packs() {
        let sig = Type::Function(
            Box::new(Type::Void),
            vec![Type::Double, Type::VariadicList(Box::new(Type::Double))],
        );

        let out = coerce_args(
            "f",
            &sig,
            vec![Value::Integer(1), Value::Integer(2), Value::Double(3.5)],
        )
        .unwrap();

        assert_eq!(out[0], Value::Double(1.0));
        let Value::VariadicList(_, tail) = &out[1] else {
            panic!("expected packed variadic tail");
        };
        assert_eq!(tail, &vec![Value::Double(2.0), Value::Double(3.5)]);
    }

    #[test]
    fn test_coerce_args_arity_error_message() {
        let sig = Type::Function(Box::new(Type::Void), vec![Type::Integer]);
        let err = coerce_args("f", &sig, vec![]).unwrap_err();
        assert_eq!(
            err.0,
            "call to 'f' with wrong number of arguments (expected 1, found 0)"
        );
    }

    #[test]
    fn test_macro_command_stringifies_args() {
        let mut state = InterpState::new();
        state.commands.insert(
            String::from("echo"),
            Command::new_macro("echo", r"\$0"),
        );

        let mut cx = test_context();
        let out = call_named(&mut state, &mut cx, "echo", vec![Value::Integer(42)]).unwrap();
        assert_eq!(out.raw_str(), "42");
    }

    #[test]
    fn test_call_unknown_name() {
        let mut state = InterpState::new();
        let mut cx = test_context();
        let err = call_named(&mut state, &mut cx, "ghost", vec![]).unwrap_err();
        assert_eq!(err.0, "'ghost' is not defined");
    }
}
