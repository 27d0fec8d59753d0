//! AST nodes and the tree-walking evaluator.
//!
//! Assignment targets are resolved to `Place` paths (a global plus a chain
//! of subscripts) instead of interior pointers, so in-place mutation never
//! holds references across container edits.

use crate::interp::command;
use crate::interp::types::Type;
use crate::interp::value::{Complex, Value};
use crate::interp::{script_error, CmdContext, InterpState, ScriptResult, EXECUTION_TIME_LIMIT};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Plus,
    Minus,
    Not,
    BitNot,
}

impl UnaryOp {
    fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Plus => "+",
            UnaryOp::Minus => "-",
            UnaryOp::Not => "!",
            UnaryOp::BitNot => "~",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
    ShiftLeft,
    ShiftRight,
    BitAnd,
    BitOr,
    LogicalAnd,
    LogicalOr,
}

impl BinaryOp {
    fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Pow => "^",
            BinaryOp::ShiftLeft => "<<",
            BinaryOp::ShiftRight => ">>",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::LogicalAnd => "&&",
            BinaryOp::LogicalOr => "||",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

impl CompareOp {
    fn symbol(self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Gt => ">",
            CompareOp::Le => "<=",
            CompareOp::Ge => ">=",
        }
    }
}

/// Compound assignment carries the arithmetic op; plain `=` is `Set`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Set,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
    ShiftLeft,
    ShiftRight,
    BitAnd,
    BitOr,
}

impl AssignOp {
    fn binary(self) -> Option<BinaryOp> {
        Some(match self {
            AssignOp::Set => return None,
            AssignOp::Add => BinaryOp::Add,
            AssignOp::Sub => BinaryOp::Sub,
            AssignOp::Mul => BinaryOp::Mul,
            AssignOp::Div => BinaryOp::Div,
            AssignOp::Rem => BinaryOp::Rem,
            AssignOp::Pow => BinaryOp::Pow,
            AssignOp::ShiftLeft => BinaryOp::ShiftLeft,
            AssignOp::ShiftRight => BinaryOp::ShiftRight,
            AssignOp::BitAnd => BinaryOp::BitAnd,
            AssignOp::BitOr => BinaryOp::BitOr,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    LitChar(char),
    LitString(String),
    LitInteger { value: i64, imaginary: bool },
    LitDouble { value: f64, imaginary: bool },
    LitBool(bool),
    LitList(Vec<Expr>),
    Var(String),
    Subscript {
        base: Box<Expr>,
        index: Box<Expr>,
    },
    Slice {
        base: Box<Expr>,
        start: Option<Box<Expr>>,
        end: Option<Box<Expr>>,
    },
    Splat(Box<Expr>),
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// Chained comparisons collapse into one node that short-circuits.
    Comparison {
        first: Box<Expr>,
        rest: Vec<(CompareOp, Expr)>,
    },
    Ternary {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    Assign {
        op: AssignOp,
        target: Box<Expr>,
        value: Box<Expr>,
    },
    /// `a.f(x)` sugar: call with `a` prepended to the arguments.
    Dot {
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// `a |> f` pipeline, same calling convention as `Dot`.
    Pipeline {
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Expr(Expr),
    Block(Block),
    FnDefn(FunctionDefn),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub stmts: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDefn {
    pub name: String,
    pub signature: Type,
    pub generics: Vec<String>,
    pub body: Block,
}

impl FunctionDefn {
    pub fn evaluate(&self, interp: &mut InterpState, cx: &mut CmdContext) -> ScriptResult<Value> {
        evaluate_block(&self.body, interp, cx)
    }
}

/// A mutation target: a user global plus a path of container steps.
#[derive(Debug, Clone)]
pub struct Place {
    root: String,
    path: Vec<PathStep>,
}

#[derive(Debug, Clone)]
enum PathStep {
    Index(usize),
    Key(Value),
}

pub fn evaluate_block(block: &Block, interp: &mut InterpState, cx: &mut CmdContext) -> ScriptResult<Value> {
    let mut last = Value::Void;
    for (i, stmt) in block.stmts.iter().enumerate() {
        let result = match stmt {
            Stmt::Expr(e) => evaluate(e, interp, cx)?,
            Stmt::Block(b) => evaluate_block(b, interp, cx)?,
            Stmt::FnDefn(defn) => defn.evaluate(interp, cx)?,
        };

        if i + 1 == block.stmts.len() && matches!(stmt, Stmt::Expr(_)) {
            last = result;
        }
    }

    Ok(last)
}

pub fn evaluate(expr: &Expr, interp: &mut InterpState, cx: &mut CmdContext) -> ScriptResult<Value> {
    match expr {
        Expr::LitChar(c) => Ok(Value::Char(*c)),
        Expr::LitString(s) => Ok(Value::of_string(s)),
        Expr::LitBool(b) => Ok(Value::Bool(*b)),

        Expr::LitInteger { value, imaginary } => Ok(if *imaginary {
            Value::Complex(Complex::new(0.0, *value as f64))
        } else {
            Value::Integer(*value)
        }),

        Expr::LitDouble { value, imaginary } => Ok(if *imaginary {
            Value::Complex(Complex::new(0.0, *value))
        } else {
            Value::Double(*value)
        }),

        Expr::LitList(elements) => {
            let mut values = Vec::with_capacity(elements.len());
            for e in elements {
                values.push(evaluate(e, interp, cx)?);
            }

            let elm = match values.first() {
                None => Type::Void,
                Some(first) => first.type_of(),
            };

            for v in &values[1.min(values.len())..] {
                if !v.type_of().is_same(&elm) {
                    return script_error(format!(
                        "inconsistent types in list literal ('{}' vs '{}')",
                        elm,
                        v.type_of()
                    ));
                }
            }

            Ok(Value::of_list(elm, values))
        }

        Expr::Var(name) => match interp.resolve_variable(name, cx) {
            Some(value) => Ok(value),
            None => script_error(format!("'{name}' is not defined")),
        },

        Expr::Unary { op, expr } => {
            let value = evaluate(expr, interp, cx)?;
            eval_unary(*op, value)
        }

        Expr::Binary { op, lhs, rhs } => match op {
            BinaryOp::LogicalAnd | BinaryOp::LogicalOr => {
                let left = evaluate(lhs, interp, cx)?;
                let Value::Bool(a) = left else {
                    return script_error(format!(
                        "invalid binary '{}' on type '{}'",
                        op.symbol(),
                        left.type_of()
                    ));
                };

                // short-circuit
                if *op == BinaryOp::LogicalAnd && !a {
                    return Ok(Value::Bool(false));
                }
                if *op == BinaryOp::LogicalOr && a {
                    return Ok(Value::Bool(true));
                }

                let right = evaluate(rhs, interp, cx)?;
                match right {
                    Value::Bool(b) => Ok(Value::Bool(b)),
                    other => script_error(format!(
                        "invalid binary '{}' on type '{}'",
                        op.symbol(),
                        other.type_of()
                    )),
                }
            }
            _ => {
                let left = evaluate(lhs, interp, cx)?;
                let right = evaluate(rhs, interp, cx)?;
                eval_binary(*op, left, right)
            }
        },

        Expr::Comparison { first, rest } => {
            let mut prev = evaluate(first, interp, cx)?;
            for (op, next_expr) in rest {
                let next = evaluate(next_expr, interp, cx)?;
                if !compare_values(*op, &prev, &next)? {
                    return Ok(Value::Bool(false));
                }
                prev = next;
            }
            Ok(Value::Bool(true))
        }

        Expr::Ternary { cond, then, otherwise } => {
            let c = evaluate(cond, interp, cx)?;
            match c {
                Value::Bool(true) => evaluate(then, interp, cx),
                Value::Bool(false) => evaluate(otherwise, interp, cx),
                other => script_error(format!(
                    "invalid use of ?: with type '{}' as first operand",
                    other.type_of()
                )),
            }
        }

        Expr::Subscript { base, index } => {
            let container = evaluate(base, interp, cx)?;
            let idx = evaluate(index, interp, cx)?;
            eval_subscript(container, idx)
        }

        Expr::Slice { base, start, end } => {
            let container = evaluate(base, interp, cx)?;

            let start = match start {
                Some(e) => Some(evaluate(e, interp, cx)?),
                None => None,
            };
            let end = match end {
                Some(e) => Some(evaluate(e, interp, cx)?),
                None => None,
            };

            eval_slice(container, start, end)
        }

        Expr::Splat(inner) => evaluate(inner, interp, cx),

        Expr::Assign { op, target, value } => {
            let rhs = evaluate(value, interp, cx)?;
            eval_assign(*op, target, rhs, interp, cx)
        }

        Expr::Dot { lhs, rhs } | Expr::Pipeline { lhs, rhs } => {
            let subject = evaluate(lhs, interp, cx)?;
            match rhs.as_ref() {
                Expr::Call { callee, args } => {
                    let callee = evaluate(callee, interp, cx)?;
                    eval_call(callee, Some(subject), args, interp, cx)
                }
                other => {
                    let callee = evaluate(other, interp, cx)?;
                    eval_call(callee, Some(subject), &[], interp, cx)
                }
            }
        }

        Expr::Call { callee, args } => {
            let callee = evaluate(callee, interp, cx)?;
            eval_call(callee, None, args, interp, cx)
        }
    }
}

fn eval_call(
    callee: Value,
    prepend: Option<Value>,
    args: &[Expr],
    interp: &mut InterpState,
    cx: &mut CmdContext,
) -> ScriptResult<Value> {
    let Value::Function(_, name) = &callee else {
        return script_error(format!("type '{}' is not callable", callee.type_of()));
    };

    if cx.start.elapsed() > EXECUTION_TIME_LIMIT {
        return script_error("time limit exceeded");
    }

    let mut arg_values = Vec::with_capacity(args.len() + 1);
    if let Some(v) = prepend {
        arg_values.push(v);
    }

    for e in args {
        let value = evaluate(e, interp, cx)?;

        // a splat argument whose value is a list flattens into the call
        if matches!(e, Expr::Splat(_)) {
            match value {
                Value::List(_, xs) | Value::VariadicList(_, xs) => arg_values.extend(xs),
                other => {
                    return script_error(format!(
                        "cannot splat a value of type '{}'",
                        other.type_of()
                    ))
                }
            }
        } else {
            arg_values.push(value);
        }
    }

    command::call_named(interp, cx, name, arg_values)
}

fn eval_unary(op: UnaryOp, value: Value) -> ScriptResult<Value> {
    match (op, &value) {
        (UnaryOp::Plus, Value::Integer(_) | Value::Double(_) | Value::Complex(_)) => Ok(value),
        (UnaryOp::Minus, Value::Integer(x)) => Ok(Value::Integer(-x)),
        (UnaryOp::Minus, Value::Double(x)) => Ok(Value::Double(-x)),
        (UnaryOp::Minus, Value::Complex(c)) => Ok(Value::Complex(-*c)),
        (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
        (UnaryOp::BitNot, Value::Integer(x)) => Ok(Value::Integer(!x)),
        _ => script_error(format!(
            "invalid unary '{}' on type '{}'",
            op.symbol(),
            value.type_of()
        )),
    }
}

enum NumericPair {
    Ints(i64, i64),
    Doubles(f64, f64),
    Complexes(Complex, Complex),
}

fn promote(lhs: &Value, rhs: &Value) -> Option<NumericPair> {
    use NumericPair::*;
    Some(match (lhs, rhs) {
        (Value::Integer(a), Value::Integer(b)) => Ints(*a, *b),
        (Value::Integer(a), Value::Double(b)) => Doubles(*a as f64, *b),
        (Value::Double(a), Value::Integer(b)) => Doubles(*a, *b as f64),
        (Value::Double(a), Value::Double(b)) => Doubles(*a, *b),
        (Value::Complex(a), Value::Complex(b)) => Complexes(*a, *b),
        (Value::Complex(a), Value::Integer(b)) => Complexes(*a, Complex::new(*b as f64, 0.0)),
        (Value::Complex(a), Value::Double(b)) => Complexes(*a, Complex::new(*b, 0.0)),
        (Value::Integer(a), Value::Complex(b)) => Complexes(Complex::new(*a as f64, 0.0), *b),
        (Value::Double(a), Value::Complex(b)) => Complexes(Complex::new(*a, 0.0), *b),
        _ => return None,
    })
}

fn list_elm_compatible(elm: &Type, other: &Type) -> bool {
    elm.is_void() || other.is_void() || elm.is_same(other)
}

fn eval_binary(op: BinaryOp, lhs: Value, rhs: Value) -> ScriptResult<Value> {
    use BinaryOp::*;

    let type_error = |lhs: &Value, rhs: &Value| {
        script_error(format!(
            "invalid binary '{}' between types '{}' and '{}'",
            op.symbol(),
            lhs.type_of(),
            rhs.type_of()
        ))
    };

    // list concatenation / append, and string repetition
    if op == Add && lhs.is_list() {
        let (elm, mut xs) = match lhs {
            Value::List(elm, xs) | Value::VariadicList(elm, xs) => (elm, xs),
            _ => unreachable!(),
        };

        return match rhs {
            Value::List(relm, rest) | Value::VariadicList(relm, rest) => {
                if !list_elm_compatible(&elm, &relm) {
                    return script_error(format!(
                        "cannot concatenate lists of type '[{elm}]' and '[{relm}]'"
                    ));
                }

                let elm = if elm.is_void() { relm } else { elm };
                xs.extend(rest);
                Ok(Value::List(elm, xs))
            }
            other => {
                let oty = other.type_of();
                if !list_elm_compatible(&elm, &oty) {
                    return script_error(format!(
                        "cannot append value of type '{oty}' to a list of type '[{elm}]'"
                    ));
                }

                let elm = if elm.is_void() { oty } else { elm };
                xs.push(other);
                Ok(Value::List(elm, xs))
            }
        };
    }

    if op == Mul {
        let repeated = match (&lhs, &rhs) {
            (Value::Integer(n), s) if s.is_string() => Some((*n, s.get_string().unwrap())),
            (s, Value::Integer(n)) if s.is_string() => Some((*n, s.get_string().unwrap())),
            _ => None,
        };

        if let Some((n, s)) = repeated {
            let n = n.max(0) as usize;
            return Ok(Value::of_string(&s.repeat(n)));
        }
    }

    if matches!(op, ShiftLeft | ShiftRight | BitAnd | BitOr) {
        return match (&lhs, &rhs) {
            (Value::Integer(a), Value::Integer(b)) => Ok(Value::Integer(match op {
                ShiftLeft => a.wrapping_shl(*b as u32),
                ShiftRight => a.wrapping_shr(*b as u32),
                BitAnd => a & b,
                BitOr => a | b,
                _ => unreachable!(),
            })),
            _ => type_error(&lhs, &rhs),
        };
    }

    let Some(pair) = promote(&lhs, &rhs) else {
        return type_error(&lhs, &rhs);
    };

    match pair {
        NumericPair::Ints(a, b) => match op {
            Add => Ok(Value::Integer(a.wrapping_add(b))),
            Sub => Ok(Value::Integer(a.wrapping_sub(b))),
            Mul => Ok(Value::Integer(a.wrapping_mul(b))),
            Div => {
                if b == 0 {
                    script_error("division by zero")
                } else {
                    Ok(Value::Integer(a.wrapping_div(b)))
                }
            }
            Rem => {
                if b == 0 {
                    script_error("division by zero")
                } else {
                    Ok(Value::Integer(a.wrapping_rem(b)))
                }
            }
            Pow => Ok(Value::Integer((a as f64).powf(b as f64) as i64)),
            _ => type_error(&lhs, &rhs),
        },

        NumericPair::Doubles(a, b) => match op {
            Add => Ok(Value::Double(a + b)),
            Sub => Ok(Value::Double(a - b)),
            Mul => Ok(Value::Double(a * b)),
            Div => Ok(Value::Double(a / b)),
            Rem => Ok(Value::Double(a % b)),
            Pow => Ok(Value::Double(a.powf(b))),
            _ => type_error(&lhs, &rhs),
        },

        NumericPair::Complexes(a, b) => match op {
            Add => Ok(Value::Complex(a + b)),
            Sub => Ok(Value::Complex(a - b)),
            Mul => Ok(Value::Complex(a * b)),
            Div => Ok(Value::Complex(a / b)),
            Pow => Ok(Value::Complex(a.powc(b))),
            _ => type_error(&lhs, &rhs),
        },
    }
}

fn compare_values(op: CompareOp, lhs: &Value, rhs: &Value) -> ScriptResult<bool> {
    use CompareOp::*;
    use std::cmp::Ordering;

    let type_error = || {
        script_error::<bool>(format!(
            "invalid comparison '{}' between types '{}' and '{}'",
            op.symbol(),
            lhs.type_of(),
            rhs.type_of()
        ))
    };

    if matches!(op, Eq | Ne) {
        let equal = match (lhs, rhs) {
            (Value::Complex(_), _) | (_, Value::Complex(_)) => match promote(lhs, rhs) {
                Some(NumericPair::Complexes(a, b)) => a == b,
                _ => return type_error(),
            },
            (Value::Integer(_) | Value::Double(_), Value::Integer(_) | Value::Double(_)) => {
                match promote(lhs, rhs).unwrap() {
                    NumericPair::Ints(a, b) => a == b,
                    NumericPair::Doubles(a, b) => a == b,
                    NumericPair::Complexes(..) => unreachable!(),
                }
            }
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Char(a), Value::Char(b)) => a == b,
            (Value::Void, Value::Void) => true,
            (a, b) if a.is_list() && b.is_list() => a == b,
            (Value::Map(..), Value::Map(..)) => lhs == rhs,
            _ => return type_error(),
        };

        return Ok(if op == Ne { !equal } else { equal });
    }

    let ordering = match (lhs, rhs) {
        (Value::Integer(_) | Value::Double(_), Value::Integer(_) | Value::Double(_)) => {
            match promote(lhs, rhs).unwrap() {
                NumericPair::Ints(a, b) => a.cmp(&b),
                NumericPair::Doubles(a, b) => a.total_cmp(&b),
                NumericPair::Complexes(..) => unreachable!(),
            }
        }
        (Value::Char(a), Value::Char(b)) => a.cmp(b),
        (a, b) if a.is_list() && b.is_list() => a.cmp(b),
        (Value::Map(..), Value::Map(..)) => lhs.cmp(rhs),
        _ => return type_error(),
    };

    Ok(match op {
        Lt => ordering == Ordering::Less,
        Gt => ordering == Ordering::Greater,
        Le => ordering != Ordering::Greater,
        Ge => ordering != Ordering::Less,
        Eq | Ne => unreachable!(),
    })
}

fn eval_subscript(container: Value, index: Value) -> ScriptResult<Value> {
    match container {
        Value::List(_, xs) | Value::VariadicList(_, xs) => {
            let Value::Integer(i) = index else {
                return script_error("index on a list must be an integer");
            };

            let Some(at) = normalise_index(i, xs.len()) else {
                return script_error("index out of range");
            };

            Ok(xs[at].clone())
        }

        Value::Map(key_ty, elm_ty, map) => {
            if !index.type_of().is_same(&key_ty) {
                return script_error(format!(
                    "cannot index '[{key_ty}: {elm_ty}]' with key of type '{}'",
                    index.type_of()
                ));
            }

            match map.get(&index) {
                Some(v) => Ok(v.clone()),
                None => Value::default_of(&elm_ty)
                    .ok_or_else(|| crate::interp::ScriptError(String::from("index out of range"))),
            }
        }

        other => script_error(format!("type '{}' cannot be indexed", other.type_of())),
    }
}

fn normalise_index(i: i64, len: usize) -> Option<usize> {
    let at = if i < 0 {
        let back = i.unsigned_abs() as usize;
        if back > len {
            return None;
        }
        len - back
    } else {
        i as usize
    };

    (at < len).then_some(at)
}

fn eval_slice(container: Value, start: Option<Value>, end: Option<Value>) -> ScriptResult<Value> {
    let (elm, xs) = match container {
        Value::List(elm, xs) | Value::VariadicList(elm, xs) => (elm, xs),
        other => return script_error(format!("type '{}' cannot be sliced", other.type_of())),
    };

    let size = xs.len();
    let empty = || Ok(Value::List(elm.clone(), Vec::new()));

    if size == 0 {
        return empty();
    }

    let mut first = 0usize;
    let mut last = size;

    if let Some(value) = start {
        let Value::Integer(i) = value else {
            return script_error("slice indices must be integers");
        };

        if i < 0 {
            // too far negative just means "from the beginning"
            let back = i.unsigned_abs() as usize;
            if back <= size {
                first = size - back;
            }
        } else {
            if i as usize >= size {
                return empty();
            }
            first = i as usize;
        }
    }

    if let Some(value) = end {
        let Value::Integer(i) = value else {
            return script_error("slice indices must be integers");
        };

        if i < 0 {
            let back = i.unsigned_abs() as usize;
            if back > size {
                return empty();
            }
            last = size - back;
        } else if (i as usize) < size {
            last = i as usize;
        }
    }

    if first >= last {
        return empty();
    }

    Ok(Value::List(elm, xs[first..last].to_vec()))
}

fn resolve_place(
    expr: &Expr,
    interp: &mut InterpState,
    cx: &mut CmdContext,
) -> ScriptResult<Place> {
    match expr {
        Expr::Var(name) => {
            if name.starts_with('$') || crate::interp::is_reserved_global(name) {
                return script_error("cannot assign to rvalue");
            }

            if interp.get_global(name).is_none() {
                return script_error("cannot assign to rvalue");
            }

            Ok(Place {
                root: name.clone(),
                path: Vec::new(),
            })
        }

        Expr::Subscript { base, index } => {
            let mut place = resolve_place(base, interp, cx)?;
            let idx = evaluate(index, interp, cx)?;

            let current = read_place(interp, &place)?;
            match current {
                Value::List(_, xs) | Value::VariadicList(_, xs) => {
                    let Value::Integer(i) = idx else {
                        return script_error("index on a list must be an integer");
                    };

                    let Some(at) = normalise_index(i, xs.len()) else {
                        return script_error("index out of range");
                    };

                    place.path.push(PathStep::Index(at));
                }
                Value::Map(key_ty, elm_ty, _) => {
                    if !idx.type_of().is_same(&key_ty) {
                        return script_error(format!(
                            "cannot index '[{key_ty}: {elm_ty}]' with key of type '{}'",
                            idx.type_of()
                        ));
                    }

                    place.path.push(PathStep::Key(idx));
                }
                other => {
                    return script_error(format!("type '{}' cannot be indexed", other.type_of()))
                }
            }

            Ok(place)
        }

        _ => script_error("cannot assign to rvalue"),
    }
}

fn read_place(interp: &InterpState, place: &Place) -> ScriptResult<Value> {
    let Some(mut current) = interp.get_global(&place.root).cloned() else {
        return script_error("cannot assign to rvalue");
    };

    for step in &place.path {
        current = match (step, current) {
            (PathStep::Index(i), Value::List(_, xs) | Value::VariadicList(_, xs)) => {
                match xs.get(*i) {
                    Some(v) => v.clone(),
                    None => return script_error("index out of range"),
                }
            }
            (PathStep::Key(k), Value::Map(_, elm, map)) => match map.get(k) {
                Some(v) => v.clone(),
                None => Value::default_of(&elm)
                    .ok_or_else(|| crate::interp::ScriptError(String::from("index out of range")))?,
            },
            _ => return script_error("cannot assign to rvalue"),
        };
    }

    Ok(current)
}

fn place_slot_mut<'a>(
    interp: &'a mut InterpState,
    place: &Place,
) -> ScriptResult<&'a mut Value> {
    let Some(mut slot) = interp.get_global_mut(&place.root) else {
        return script_error("cannot assign to rvalue");
    };

    for step in &place.path {
        slot = match (step, slot) {
            (PathStep::Index(i), Value::List(_, xs) | Value::VariadicList(_, xs)) => {
                match xs.get_mut(*i) {
                    Some(v) => v,
                    None => return script_error("index out of range"),
                }
            }
            (PathStep::Key(k), Value::Map(_, elm, map)) => {
                let default = Value::default_of(elm)
                    .ok_or_else(|| crate::interp::ScriptError(String::from("index out of range")))?;
                map.entry(k.clone()).or_insert(default)
            }
            _ => return script_error("cannot assign to rvalue"),
        };
    }

    Ok(slot)
}

fn assignable(slot: &Type, value: &Type) -> bool {
    if slot.is_same(value) {
        return true;
    }

    // [void] is the anonymous empty-list type and assigns both ways
    if slot.is_list() && value.is_list() {
        let (a, b) = (slot.elm_type().unwrap(), value.elm_type().unwrap());
        return a.is_void() || b.is_void();
    }

    false
}

fn eval_assign(
    op: AssignOp,
    target: &Expr,
    rhs: Value,
    interp: &mut InterpState,
    cx: &mut CmdContext,
) -> ScriptResult<Value> {
    let place = resolve_place(target, interp, cx)?;

    let Some(binop) = op.binary() else {
        // plain assignment
        let slot = place_slot_mut(interp, &place)?;
        if !assignable(&slot.type_of(), &rhs.type_of()) {
            return script_error(format!(
                "cannot assign value of type '{}' to variable of type '{}'",
                rhs.type_of(),
                slot.type_of()
            ));
        }

        *slot = rhs.clone();
        return Ok(rhs);
    };

    // compound assignment on a list appends in place, no new list
    if binop == BinaryOp::Add {
        let slot = place_slot_mut(interp, &place)?;
        if let Value::List(elm, xs) = &mut *slot {
            match rhs {
                Value::List(relm, rest) | Value::VariadicList(relm, rest) => {
                    if !list_elm_compatible(elm, &relm) {
                        return script_error(format!(
                            "cannot concatenate lists of type '[{elm}]' and '[{relm}]'"
                        ));
                    }

                    if elm.is_void() {
                        *elm = relm;
                    }
                    xs.extend(rest);
                }
                other => {
                    let oty = other.type_of();
                    if !list_elm_compatible(elm, &oty) {
                        return script_error(format!(
                            "cannot append value of type '{oty}' to a list of type '[{elm}]'"
                        ));
                    }

                    if elm.is_void() {
                        *elm = oty;
                    }
                    xs.push(other);
                }
            }

            return Ok(slot.clone());
        }
    }

    let current = read_place(interp, &place)?;
    let result = eval_binary(binop, current.clone(), rhs)?;

    if !assignable(&current.type_of(), &result.type_of()) {
        return script_error(format!(
            "cannot assign value of type '{}' to variable of type '{}'",
            result.type_of(),
            current.type_of()
        ));
    }

    let slot = place_slot_mut(interp, &place)?;
    *slot = result.clone();
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::{parser, test_context, InterpState};

    fn eval(state: &mut InterpState, src: &str) -> ScriptResult<Value> {
        let mut cx = test_context();
        state.evaluate_expr(src, &mut cx)
    }

    fn eval_ok(state: &mut InterpState, src: &str) -> Value {
        eval(state, src).unwrap_or_else(|e| panic!("eval '{src}' failed: {e}"))
    }

    #[test]
    fn test_arithmetic_precedence() {
        let mut state = InterpState::new();
        assert_eq!(eval_ok(&mut state, "1+2*3"), Value::Integer(7));
        assert_eq!(eval_ok(&mut state, "(1+2)*3"), Value::Integer(9));
        assert_eq!(eval_ok(&mut state, "2^10"), Value::Integer(1024));
        assert_eq!(eval_ok(&mut state, "2^3^2"), Value::Integer(512)); // right assoc
        assert_eq!(eval_ok(&mut state, "7 % 3"), Value::Integer(1));
        assert_eq!(eval_ok(&mut state, "1 << 4"), Value::Integer(16));
    }

    #[test]
    fn test_division_by_zero_is_an_error() {
        let mut state = InterpState::new();
        assert_eq!(eval(&mut state, "1/0").unwrap_err().0, "division by zero");
        assert_eq!(eval(&mut state, "1%0").unwrap_err().0, "division by zero");
    }

    #[test]
    fn test_mixed_numeric_promotion() {
        let mut state = InterpState::new();
        assert_eq!(eval_ok(&mut state, "1 + 0.5"), Value::Double(1.5));
        assert_eq!(
            eval_ok(&mut state, "2 * i"),
            Value::Complex(Complex::new(0.0, 2.0))
        );
        assert_eq!(
            eval_ok(&mut state, "1i * 1i"),
            Value::Complex(Complex::new(-1.0, 0.0))
        );
    }

    #[test]
    fn test_string_concat_and_repeat() {
        let mut state = InterpState::new();
        assert_eq!(
            eval_ok(&mut state, "\"foo\" + \"bar\""),
            Value::of_string("foobar")
        );
        assert_eq!(eval_ok(&mut state, "\"ab\" * 3"), Value::of_string("ababab"));
        assert_eq!(eval_ok(&mut state, "3 * \"ab\""), Value::of_string("ababab"));
    }

    #[test]
    fn test_list_concat_and_append() {
        let mut state = InterpState::new();
        assert_eq!(
            eval_ok(&mut state, "[1,2] + [3]").str(),
            "[1, 2, 3]"
        );
        assert_eq!(eval_ok(&mut state, "[1,2] + 3").str(), "[1, 2, 3]");
        assert!(eval(&mut state, "[1,2] + \"x\"").is_err());
    }

    #[test]
    fn test_chained_comparisons() {
        let mut state = InterpState::new();
        assert_eq!(eval_ok(&mut state, "1 < 2 < 3"), Value::Bool(true));
        assert_eq!(eval_ok(&mut state, "1 < 2 > 3"), Value::Bool(false));
        assert_eq!(eval_ok(&mut state, "3 >= 3 >= 2 == 2"), Value::Bool(true));
        assert!(eval(&mut state, "1 < \"x\"").is_err());
    }

    #[test]
    fn test_comparison_operands_evaluate_once() {
        // each bound evaluates exactly once: appending to a global inside
        // the chain would otherwise double up.
        let mut state = InterpState::new();
        state.add_global("n", Value::Integer(0)).unwrap();
        assert_eq!(eval_ok(&mut state, "0 < (n += 1) < 2"), Value::Bool(true));
        assert_eq!(state.get_global("n"), Some(&Value::Integer(1)));
    }

    #[test]
    fn test_ternary_right_associative() {
        let mut state = InterpState::new();
        assert_eq!(
            eval_ok(&mut state, "true ? 1 : false ? 2 : 3"),
            Value::Integer(1)
        );
        assert_eq!(
            eval_ok(&mut state, "false ? 1 : false ? 2 : 3"),
            Value::Integer(3)
        );
    }

    #[test]
    fn test_logical_short_circuit() {
        let mut state = InterpState::new();
        // rhs would be a type error if evaluated
        assert_eq!(eval_ok(&mut state, "false && (1 / 0 == 0)"), Value::Bool(false));
        assert_eq!(eval_ok(&mut state, "true || (1 / 0 == 0)"), Value::Bool(true));
    }

    #[test]
    fn test_subscripts() {
        let mut state = InterpState::new();
        assert_eq!(eval_ok(&mut state, "[10,20,30][1]"), Value::Integer(20));
        assert_eq!(eval_ok(&mut state, "[10,20,30][-1]"), Value::Integer(30));
        assert_eq!(eval(&mut state, "[10][5]").unwrap_err().0, "index out of range");
        assert_eq!(eval_ok(&mut state, "\"abc\"[0]"), Value::Char('a'));
    }

    #[test]
    fn test_slices() {
        let mut state = InterpState::new();
        assert_eq!(eval_ok(&mut state, "[1,2,3,4][1:3]").str(), "[2, 3]");
        assert_eq!(eval_ok(&mut state, "[1,2,3,4][:2]").str(), "[1, 2]");
        assert_eq!(eval_ok(&mut state, "[1,2,3,4][2:]").str(), "[3, 4]");
        assert_eq!(eval_ok(&mut state, "[1,2,3,4][:]").str(), "[1, 2, 3, 4]");

        // boundary cases: out-of-range starts/ends clamp or empty
        assert_eq!(eval_ok(&mut state, "[1,2,3][-5:]").str(), "[1, 2, 3]");
        assert_eq!(eval_ok(&mut state, "[1,2,3][:7]").str(), "[1, 2, 3]");
        assert_eq!(eval_ok(&mut state, "[1,2,3][2:1]").str(), "[]");
        assert_eq!(eval_ok(&mut state, "[1,2,3][5:]").str(), "[]");
    }

    #[test]
    fn test_global_assignment() {
        let mut state = InterpState::new();
        state.add_global("x", Value::Integer(1)).unwrap();

        assert_eq!(eval_ok(&mut state, "x = 5"), Value::Integer(5));
        assert_eq!(state.get_global("x"), Some(&Value::Integer(5)));

        assert_eq!(eval_ok(&mut state, "x += 2"), Value::Integer(7));
        assert_eq!(eval_ok(&mut state, "x <<= 1"), Value::Integer(14));

        assert!(eval(&mut state, "x = \"nope\"").is_err());
        assert!(eval(&mut state, "3 = 4").is_err());
        assert_eq!(eval(&mut state, "pi = 3").unwrap_err().0, "cannot assign to rvalue");
    }

    #[test]
    fn test_list_compound_append_mutates_in_place() {
        let mut state = InterpState::new();
        state
            .add_global("xs", Value::of_list(Type::Integer, vec![Value::Integer(1)]))
            .unwrap();

        eval_ok(&mut state, "xs += 2");
        eval_ok(&mut state, "xs += [3, 4]");
        assert_eq!(state.get_global("xs").unwrap().str(), "[1, 2, 3, 4]");

        // element mutation through a subscript place
        eval_ok(&mut state, "xs[0] = 10");
        eval_ok(&mut state, "xs[1] += 5");
        assert_eq!(state.get_global("xs").unwrap().str(), "[10, 7, 3, 4]");
    }

    #[test]
    fn test_unary_operators() {
        let mut state = InterpState::new();
        assert_eq!(eval_ok(&mut state, "-3"), Value::Integer(-3));
        assert_eq!(eval_ok(&mut state, "!true"), Value::Bool(false));
        assert_eq!(eval_ok(&mut state, "~0"), Value::Integer(-1));
        assert!(eval(&mut state, "-true").is_err());
    }

    #[test]
    fn test_variables_from_context() {
        let mut state = InterpState::new();
        let mut cx = test_context().with_args(
            vec![Value::of_string("one"), Value::of_string("two")],
            "one two",
        );

        let v = state.evaluate_expr("$0 + \"!\"", &mut cx).unwrap();
        assert_eq!(v, Value::of_string("one!"));

        let v = state.evaluate_expr("$user", &mut cx).unwrap();
        assert_eq!(v, Value::of_string("alice"));

        let err = state.evaluate_expr("$5", &mut cx).unwrap_err();
        assert_eq!(err.0, "'$5' is not defined");
    }

    #[test]
    fn test_undefined_variable() {
        let mut state = InterpState::new();
        assert_eq!(
            eval(&mut state, "nonsense").unwrap_err().0,
            "'nonsense' is not defined"
        );
    }

    #[test]
    fn test_call_non_function_fails() {
        let mut state = InterpState::new();
        assert_eq!(
            eval(&mut state, "3(4)").unwrap_err().0,
            "type 'int' is not callable"
        );
    }

    #[test]
    fn test_inconsistent_list_literal() {
        let mut state = InterpState::new();
        assert!(eval(&mut state, "[1, \"two\"]").is_err());
    }

    #[test]
    fn test_parse_and_eval_via_parser_module() {
        // sanity check that the parser wires into evaluate()
        let expr = parser::parse_expr("1 + 2").unwrap();
        let mut state = InterpState::new();
        let mut cx = test_context();
        assert_eq!(evaluate(&expr, &mut state, &mut cx).unwrap(), Value::Integer(3));
    }
}
