//! Builtin functions and overload sets, plus the default permissions for
//! the builtin admin commands.
//!
//! These live in static tables and are never persisted; the admin commands
//! themselves (`def`, `chmod`, ...) are dispatched in `dispatch.rs` since
//! they talk to channels and the database.

use crate::interp::command::overload_distance;
use crate::interp::types::Type;
use crate::interp::value::{Complex, Value};
use crate::interp::{script_error, ScriptResult};
use crate::perms::{flags, PermissionSet};
use std::collections::HashMap;
use std::sync::LazyLock;

type Action = fn(&[Value]) -> ScriptResult<Value>;

pub struct BuiltinFunction {
    pub name: &'static str,
    pub signature: Type,
    action: Action,
}

impl BuiltinFunction {
    fn new(name: &'static str, ret: Type, args: Vec<Type>, action: Action) -> Self {
        BuiltinFunction {
            name,
            signature: Type::Function(Box::new(ret), args),
            action,
        }
    }

    pub fn run(&self, args: Vec<Value>) -> ScriptResult<Value> {
        let params = self.signature.arg_types();
        if params.len() != args.len() {
            return script_error(format!(
                "call to '{}' with wrong number of arguments (expected {}, found {})",
                self.name,
                params.len(),
                args.len()
            ));
        }

        let mut coerced = Vec::with_capacity(args.len());
        for (i, (value, expected)) in args.into_iter().zip(params).enumerate() {
            match value.cast_to(expected) {
                Some(v) => coerced.push(v),
                None => {
                    return script_error(format!(
                        "argument {}: type mismatch, expected '{expected}', found '{}'",
                        i + 1,
                        value.type_of()
                    ))
                }
            }
        }

        (self.action)(&coerced)
    }
}

/// A named group of builtins sharing a base name; the candidate with the
/// lowest summed cast distance wins, declaration order breaking ties.
pub struct OverloadSet {
    pub name: &'static str,
    overloads: Vec<BuiltinFunction>,
}

impl OverloadSet {
    pub fn run(&self, args: Vec<Value>) -> ScriptResult<Value> {
        let given: Vec<Type> = args.iter().map(Value::type_of).collect();

        let mut best: Option<(u32, &BuiltinFunction)> = None;
        for cand in &self.overloads {
            let Some(cost) = overload_distance(cand.signature.arg_types(), &given) else {
                continue;
            };

            if best.as_ref().is_none_or(|(score, _)| cost < *score) {
                best = Some((cost, cand));
            }
        }

        match best {
            Some((_, cand)) => cand.run(args),
            None => script_error(format!("no matching function for call to '{}'", self.name)),
        }
    }

    fn signature(&self) -> Type {
        self.overloads[0].signature.clone()
    }
}

pub enum Builtin {
    Function(BuiltinFunction),
    Set(OverloadSet),
}

impl Builtin {
    pub fn run(&self, args: Vec<Value>) -> ScriptResult<Value> {
        match self {
            Builtin::Function(f) => f.run(args),
            Builtin::Set(s) => s.run(args),
        }
    }

    pub fn signature(&self) -> Type {
        match self {
            Builtin::Function(f) => f.signature.clone(),
            Builtin::Set(s) => s.signature(),
        }
    }
}

fn arg_double(args: &[Value], i: usize) -> ScriptResult<f64> {
    match args.get(i) {
        Some(Value::Double(x)) => Ok(*x),
        _ => script_error("invalid argument"),
    }
}

fn arg_complex(args: &[Value], i: usize) -> ScriptResult<Complex> {
    match args.get(i) {
        Some(Value::Complex(c)) => Ok(*c),
        _ => script_error("invalid argument"),
    }
}

fn fn_int(args: &[Value]) -> ScriptResult<Value> {
    match &args[0] {
        Value::Integer(x) => Ok(Value::Integer(*x)),
        Value::Double(x) => Ok(Value::Integer(*x as i64)),
        Value::Char(c) => Ok(Value::Integer(*c as i64)),
        Value::Bool(b) => Ok(Value::Integer(*b as i64)),
        s if s.is_string() => match s.get_string().unwrap().trim().parse::<i64>() {
            Ok(x) => Ok(Value::Integer(x)),
            Err(_) => script_error("invalid argument"),
        },
        _ => script_error("invalid argument"),
    }
}

fn fn_str(args: &[Value]) -> ScriptResult<Value> {
    match &args[0] {
        s if s.is_string() => Ok(s.clone()),
        other => Ok(Value::of_string(&other.str())),
    }
}

macro_rules! real_fn {
    ($name:ident, $op:expr) => {
        fn $name(args: &[Value]) -> ScriptResult<Value> {
            let x = arg_double(args, 0)?;
            let f: fn(f64) -> f64 = $op;
            Ok(Value::Double(f(x)))
        }
    };
}

macro_rules! complex_fn {
    ($name:ident, $method:ident) => {
        fn $name(args: &[Value]) -> ScriptResult<Value> {
            let z = arg_complex(args, 0)?;
            Ok(Value::Complex(z.$method()))
        }
    };
}

real_fn!(fn_ln_real, |x: f64| x.ln());
real_fn!(fn_lg_real, |x: f64| x.log10());
real_fn!(fn_exp_real, |x: f64| x.exp());
real_fn!(fn_abs_real, |x: f64| x.abs());
real_fn!(fn_sqrt_real, |x: f64| x.sqrt());
real_fn!(fn_sin_real, |x: f64| x.sin());
real_fn!(fn_cos_real, |x: f64| x.cos());
real_fn!(fn_tan_real, |x: f64| x.tan());
real_fn!(fn_asin_real, |x: f64| x.asin());
real_fn!(fn_acos_real, |x: f64| x.acos());
real_fn!(fn_atan_real, |x: f64| x.atan());

complex_fn!(fn_ln_complex, ln);
complex_fn!(fn_lg_complex, log10);
complex_fn!(fn_exp_complex, exp);
complex_fn!(fn_sqrt_complex, sqrt);
complex_fn!(fn_sin_complex, sin);
complex_fn!(fn_cos_complex, cos);
complex_fn!(fn_tan_complex, tan);
complex_fn!(fn_asin_complex, asin);
complex_fn!(fn_acos_complex, acos);
complex_fn!(fn_atan_complex, atan);

fn fn_abs_complex(args: &[Value]) -> ScriptResult<Value> {
    Ok(Value::Double(arg_complex(args, 0)?.abs()))
}

fn fn_log_real(args: &[Value]) -> ScriptResult<Value> {
    // change of base: log(base, x)
    let base = arg_double(args, 0)?;
    let x = arg_double(args, 1)?;
    Ok(Value::Double(x.ln() / base.ln()))
}

fn fn_log_complex(args: &[Value]) -> ScriptResult<Value> {
    let base = arg_complex(args, 0)?;
    let x = arg_complex(args, 1)?;
    Ok(Value::Complex(x.ln() / base.ln()))
}

fn fn_atan2(args: &[Value]) -> ScriptResult<Value> {
    let y = arg_double(args, 0)?;
    let x = arg_double(args, 1)?;
    Ok(Value::Double(y.atan2(x)))
}

fn fn_rtod(args: &[Value]) -> ScriptResult<Value> {
    Ok(Value::Double(arg_double(args, 0)?.to_degrees()))
}

fn fn_dtor(args: &[Value]) -> ScriptResult<Value> {
    Ok(Value::Double(arg_double(args, 0)?.to_radians()))
}

fn t_dbl() -> Type {
    Type::Double
}

fn t_cpx() -> Type {
    Type::Complex
}

fn real_complex_set(name: &'static str, real: Action, complex: Action) -> OverloadSet {
    OverloadSet {
        name,
        overloads: vec![
            BuiltinFunction::new(name, t_dbl(), vec![t_dbl()], real),
            BuiltinFunction::new(name, t_cpx(), vec![t_cpx()], complex),
        ],
    }
}

static BUILTINS: LazyLock<HashMap<&'static str, Builtin>> = LazyLock::new(|| {
    let mut table = HashMap::new();

    table.insert(
        "int",
        Builtin::Set(OverloadSet {
            name: "int",
            overloads: vec![
                BuiltinFunction::new("int", Type::Integer, vec![Type::Integer], fn_int),
                BuiltinFunction::new("int", Type::Integer, vec![Type::string()], fn_int),
                BuiltinFunction::new("int", Type::Integer, vec![Type::Double], fn_int),
                BuiltinFunction::new("int", Type::Integer, vec![Type::Bool], fn_int),
                BuiltinFunction::new("int", Type::Integer, vec![Type::Char], fn_int),
            ],
        }),
    );

    table.insert(
        "str",
        Builtin::Set(OverloadSet {
            name: "str",
            overloads: vec![
                BuiltinFunction::new("str", Type::string(), vec![Type::string()], fn_str),
                BuiltinFunction::new("str", Type::string(), vec![Type::Integer], fn_str),
                BuiltinFunction::new("str", Type::string(), vec![Type::Double], fn_str),
                BuiltinFunction::new("str", Type::string(), vec![Type::Bool], fn_str),
                BuiltinFunction::new("str", Type::string(), vec![Type::Char], fn_str),
                BuiltinFunction::new("str", Type::string(), vec![Type::Complex], fn_str),
                BuiltinFunction::new(
                    "str",
                    Type::string(),
                    vec![Type::List(Box::new(Type::Void))],
                    fn_str,
                ),
                BuiltinFunction::new(
                    "str",
                    Type::string(),
                    vec![Type::Map(Box::new(Type::Void), Box::new(Type::Void))],
                    fn_str,
                ),
            ],
        }),
    );

    table.insert("ln", Builtin::Set(real_complex_set("ln", fn_ln_real, fn_ln_complex)));
    table.insert("lg", Builtin::Set(real_complex_set("lg", fn_lg_real, fn_lg_complex)));
    table.insert("exp", Builtin::Set(real_complex_set("exp", fn_exp_real, fn_exp_complex)));
    table.insert("abs", Builtin::Set(real_complex_set("abs", fn_abs_real, fn_abs_complex)));
    table.insert("sqrt", Builtin::Set(real_complex_set("sqrt", fn_sqrt_real, fn_sqrt_complex)));
    table.insert("sin", Builtin::Set(real_complex_set("sin", fn_sin_real, fn_sin_complex)));
    table.insert("cos", Builtin::Set(real_complex_set("cos", fn_cos_real, fn_cos_complex)));
    table.insert("tan", Builtin::Set(real_complex_set("tan", fn_tan_real, fn_tan_complex)));
    table.insert("asin", Builtin::Set(real_complex_set("asin", fn_asin_real, fn_asin_complex)));
    table.insert("acos", Builtin::Set(real_complex_set("acos", fn_acos_real, fn_acos_complex)));
    table.insert("atan", Builtin::Set(real_complex_set("atan", fn_atan_real, fn_atan_complex)));

    table.insert(
        "log",
        Builtin::Set(OverloadSet {
            name: "log",
            overloads: vec![
                BuiltinFunction::new("log", t_dbl(), vec![t_dbl(), t_dbl()], fn_log_real),
                BuiltinFunction::new("log", t_cpx(), vec![t_cpx(), t_cpx()], fn_log_complex),
            ],
        }),
    );

    table.insert(
        "atan2",
        Builtin::Function(BuiltinFunction::new(
            "atan2",
            t_dbl(),
            vec![t_dbl(), t_dbl()],
            fn_atan2,
        )),
    );
    table.insert(
        "rtod",
        Builtin::Function(BuiltinFunction::new("rtod", t_dbl(), vec![t_dbl()], fn_rtod)),
    );
    table.insert(
        "dtor",
        Builtin::Function(BuiltinFunction::new("dtor", t_dbl(), vec![t_dbl()], fn_dtor)),
    );

    table
});

/// Finds a builtin function or overload set by name.
pub fn lookup(name: &str) -> Option<&'static Builtin> {
    BUILTINS.get(name)
}

/// The builtin admin commands the dispatcher handles directly.
pub fn is_builtin_command(name: &str) -> bool {
    matches!(
        name,
        "def" | "redef" | "undef" | "show" | "chmod" | "global" | "eval" | "markov" | "usermod"
    )
}

/// Default permissions for the admin commands; persisted in the
/// interpreter state and editable with `chmod`.
pub fn default_builtin_permissions() -> HashMap<String, PermissionSet> {
    let mut table = HashMap::new();

    for name in ["eval", "show", "markov"] {
        table.insert(name.to_string(), PermissionSet::from_flags(flags::EVERYONE));
    }

    for name in ["def", "redef", "undef", "chmod", "global", "usermod"] {
        table.insert(name.to_string(), PermissionSet::from_flags(flags::MODERATOR));
    }

    table
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, args: Vec<Value>) -> ScriptResult<Value> {
        lookup(name).expect("missing builtin").run(args)
    }

    #[test]
    fn test_str_overload_resolution() {
        assert_eq!(call("str", vec![Value::Double(3.14)]).unwrap().raw_str(), "3.140");
        assert_eq!(
            call("str", vec![Value::of_list(
                Type::Integer,
                vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)],
            )])
            .unwrap()
            .raw_str(),
            "[1, 2, 3]"
        );
        assert_eq!(
            call("str", vec![Value::of_string("already")]).unwrap().raw_str(),
            "already"
        );
    }

    #[test]
    fn test_int_conversions() {
        assert_eq!(call("int", vec![Value::of_string(" 42 ")]).unwrap(), Value::Integer(42));
        assert_eq!(call("int", vec![Value::Double(9.9)]).unwrap(), Value::Integer(9));
        assert_eq!(call("int", vec![Value::Bool(true)]).unwrap(), Value::Integer(1));
        assert_eq!(call("int", vec![Value::Char('A')]).unwrap(), Value::Integer(65));
        assert!(call("int", vec![Value::of_string("not a number")]).is_err());
    }

    #[test]
    fn test_math_picks_real_or_complex() {
        // an integer argument promotes to the double overload (distance 1)
        // rather than complex (distance 2)
        let v = call("sqrt", vec![Value::Integer(9)]).unwrap();
        assert_eq!(v, Value::Double(3.0));

        let v = call("sqrt", vec![Value::Complex(Complex::new(-1.0, 0.0))]).unwrap();
        let Value::Complex(c) = v else { panic!("expected complex") };
        assert!((c.im - 1.0).abs() < 1e-9 && c.re.abs() < 1e-9);
    }

    #[test]
    fn test_abs_complex_returns_magnitude() {
        let v = call("abs", vec![Value::Complex(Complex::new(3.0, 4.0))]).unwrap();
        assert_eq!(v, Value::Double(5.0));
    }

    #[test]
    fn test_no_matching_overload() {
        let err = call("sqrt", vec![Value::of_string("x")]).unwrap_err();
        assert_eq!(err.0, "no matching function for call to 'sqrt'");
    }

    #[test]
    fn test_log_change_of_base() {
        let v = call("log", vec![Value::Double(2.0), Value::Double(8.0)]).unwrap();
        let Value::Double(x) = v else { panic!("expected double") };
        assert!((x - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_default_permissions() {
        let perms = default_builtin_permissions();
        assert_eq!(perms.get("chmod").unwrap().flags, 0x40);
        assert_eq!(perms.get("eval").unwrap().flags, 0x01);
        assert!(is_builtin_command("def"));
        assert!(!is_builtin_command("sqrt"));
    }
}
