//! Persistence for the interpreter: types, values, AST nodes, commands and
//! the interpreter state itself.
//!
//! Polymorphic families (AST nodes, commands) dispatch on a leading tag
//! byte; new variants extend the tag space, existing tags never change.

use crate::interp::ast::{
    AssignOp, BinaryOp, Block, CompareOp, Expr, FunctionDefn, Stmt, UnaryOp,
};
use crate::interp::command::{Command, CommandKind};
use crate::interp::types::Type;
use crate::interp::value::{Complex, Value};
use crate::interp::{is_reserved_global, InterpState};
use crate::serialise::{self, CodecError, CodecResult, Deserialise, Reader, Serialise, Writer};
use std::collections::HashMap;
use std::sync::Arc;

// raw type-id bytes; these are a sub-format of the value encoding.
const TY_VOID: u8 = 0;
const TY_BOOL: u8 = 1;
const TY_CHAR: u8 = 2;
const TY_INTEGER: u8 = 3;
const TY_DOUBLE: u8 = 4;
const TY_COMPLEX: u8 = 5;
const TY_LIST: u8 = 6;
const TY_VAR_LIST: u8 = 7;
const TY_MAP: u8 = 8;
const TY_FUNCTION: u8 = 9;
const TY_GENERIC: u8 = 10;

impl Serialise for Type {
    fn serialise(&self, wr: &mut Writer) {
        match self {
            Type::Void => wr.tag(TY_VOID),
            Type::Bool => wr.tag(TY_BOOL),
            Type::Char => wr.tag(TY_CHAR),
            Type::Integer => wr.tag(TY_INTEGER),
            Type::Double => wr.tag(TY_DOUBLE),
            Type::Complex => wr.tag(TY_COMPLEX),
            Type::List(elm) => {
                wr.tag(TY_LIST);
                elm.serialise(wr);
            }
            Type::VariadicList(elm) => {
                wr.tag(TY_VAR_LIST);
                elm.serialise(wr);
            }
            Type::Map(key, elm) => {
                wr.tag(TY_MAP);
                key.serialise(wr);
                elm.serialise(wr);
            }
            Type::Function(ret, args) => {
                wr.tag(TY_FUNCTION);
                ret.serialise(wr);
                wr.write_u64(args.len() as u64);
                for a in args {
                    a.serialise(wr);
                }
            }
            Type::Generic(name, group) => {
                wr.tag(TY_GENERIC);
                wr.write_str(name);
                wr.write_u64(*group);
            }
        }
    }
}

impl Deserialise for Type {
    fn deserialise(rd: &mut Reader) -> CodecResult<Self> {
        Ok(match rd.tag()? {
            TY_VOID => Type::Void,
            TY_BOOL => Type::Bool,
            TY_CHAR => Type::Char,
            TY_INTEGER => Type::Integer,
            TY_DOUBLE => Type::Double,
            TY_COMPLEX => Type::Complex,
            TY_LIST => Type::List(Box::new(rd.read()?)),
            TY_VAR_LIST => Type::VariadicList(Box::new(rd.read()?)),
            TY_MAP => Type::Map(Box::new(rd.read()?), Box::new(rd.read()?)),
            TY_FUNCTION => {
                let ret: Type = rd.read()?;
                let count = rd.read_u64()?;

                let mut args = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    args.push(rd.read()?);
                }

                Type::Function(Box::new(ret), args)
            }
            TY_GENERIC => Type::Generic(rd.read_str()?, rd.read_u64()?),
            other => return Err(CodecError::InvalidTag(other)),
        })
    }
}

impl Serialise for Value {
    fn serialise(&self, wr: &mut Writer) {
        wr.tag(serialise::TAG_INTERP_VALUE);
        self.type_of().serialise(wr);

        match self {
            Value::Void => {}
            Value::Bool(b) => wr.write_bool(*b),
            Value::Char(c) => wr.write_u64(*c as u64),
            Value::Double(x) => wr.write_f64(*x),
            Value::Complex(c) => {
                wr.write_f64(c.re);
                wr.write_f64(c.im);
            }
            // integers ride the unsigned compaction; readers convert back
            Value::Integer(x) => wr.write_u64(*x as u64),
            Value::List(_, xs) | Value::VariadicList(_, xs) => wr.write(xs),
            Value::Map(_, _, map) => wr.write(map),
            Value::Function(_, name) => wr.write_str(name),
        }
    }
}

impl Deserialise for Value {
    fn deserialise(rd: &mut Reader) -> CodecResult<Self> {
        rd.expect_tag(serialise::TAG_INTERP_VALUE)?;
        let ty: Type = rd.read()?;

        Ok(match ty {
            Type::Void => Value::Void,
            Type::Bool => Value::Bool(rd.read_bool()?),
            Type::Char => {
                let cp = rd.read_u64()? as u32;
                Value::Char(char::from_u32(cp).ok_or(CodecError::InvalidUtf8)?)
            }
            Type::Integer => Value::Integer(rd.read_u64()? as i64),
            Type::Double => Value::Double(rd.read_f64()?),
            Type::Complex => Value::Complex(Complex::new(rd.read_f64()?, rd.read_f64()?)),
            Type::List(elm) => Value::List(*elm, rd.read()?),
            Type::VariadicList(elm) => Value::VariadicList(*elm, rd.read()?),
            Type::Map(key, elm) => Value::Map(*key, *elm, rd.read()?),
            ty @ Type::Function(..) => Value::Function(ty, rd.read_str()?),
            Type::Generic(..) => return Err(CodecError::InvalidTag(TY_GENERIC)),
        })
    }
}

fn unary_op_id(op: UnaryOp) -> u8 {
    match op {
        UnaryOp::Plus => 0,
        UnaryOp::Minus => 1,
        UnaryOp::Not => 2,
        UnaryOp::BitNot => 3,
    }
}

fn unary_op_from(id: u8) -> CodecResult<UnaryOp> {
    Ok(match id {
        0 => UnaryOp::Plus,
        1 => UnaryOp::Minus,
        2 => UnaryOp::Not,
        3 => UnaryOp::BitNot,
        other => return Err(CodecError::InvalidTag(other)),
    })
}

fn binary_op_id(op: BinaryOp) -> u8 {
    match op {
        BinaryOp::Add => 0,
        BinaryOp::Sub => 1,
        BinaryOp::Mul => 2,
        BinaryOp::Div => 3,
        BinaryOp::Rem => 4,
        BinaryOp::Pow => 5,
        BinaryOp::ShiftLeft => 6,
        BinaryOp::ShiftRight => 7,
        BinaryOp::BitAnd => 8,
        BinaryOp::BitOr => 9,
        BinaryOp::LogicalAnd => 10,
        BinaryOp::LogicalOr => 11,
    }
}

fn binary_op_from(id: u8) -> CodecResult<BinaryOp> {
    Ok(match id {
        0 => BinaryOp::Add,
        1 => BinaryOp::Sub,
        2 => BinaryOp::Mul,
        3 => BinaryOp::Div,
        4 => BinaryOp::Rem,
        5 => BinaryOp::Pow,
        6 => BinaryOp::ShiftLeft,
        7 => BinaryOp::ShiftRight,
        8 => BinaryOp::BitAnd,
        9 => BinaryOp::BitOr,
        10 => BinaryOp::LogicalAnd,
        11 => BinaryOp::LogicalOr,
        other => return Err(CodecError::InvalidTag(other)),
    })
}

fn compare_op_id(op: CompareOp) -> u8 {
    match op {
        CompareOp::Eq => 0,
        CompareOp::Ne => 1,
        CompareOp::Lt => 2,
        CompareOp::Gt => 3,
        CompareOp::Le => 4,
        CompareOp::Ge => 5,
    }
}

fn compare_op_from(id: u8) -> CodecResult<CompareOp> {
    Ok(match id {
        0 => CompareOp::Eq,
        1 => CompareOp::Ne,
        2 => CompareOp::Lt,
        3 => CompareOp::Gt,
        4 => CompareOp::Le,
        5 => CompareOp::Ge,
        other => return Err(CodecError::InvalidTag(other)),
    })
}

fn assign_op_id(op: AssignOp) -> u8 {
    match op {
        AssignOp::Set => 0,
        AssignOp::Add => 1,
        AssignOp::Sub => 2,
        AssignOp::Mul => 3,
        AssignOp::Div => 4,
        AssignOp::Rem => 5,
        AssignOp::Pow => 6,
        AssignOp::ShiftLeft => 7,
        AssignOp::ShiftRight => 8,
        AssignOp::BitAnd => 9,
        AssignOp::BitOr => 10,
    }
}

fn assign_op_from(id: u8) -> CodecResult<AssignOp> {
    Ok(match id {
        0 => AssignOp::Set,
        1 => AssignOp::Add,
        2 => AssignOp::Sub,
        3 => AssignOp::Mul,
        4 => AssignOp::Div,
        5 => AssignOp::Rem,
        6 => AssignOp::Pow,
        7 => AssignOp::ShiftLeft,
        8 => AssignOp::ShiftRight,
        9 => AssignOp::BitAnd,
        10 => AssignOp::BitOr,
        other => return Err(CodecError::InvalidTag(other)),
    })
}

fn write_opt_expr(wr: &mut Writer, e: &Option<Box<Expr>>) {
    match e {
        Some(e) => {
            wr.write_bool(true);
            e.serialise(wr);
        }
        None => wr.write_bool(false),
    }
}

fn read_opt_expr(rd: &mut Reader) -> CodecResult<Option<Box<Expr>>> {
    if rd.read_bool()? {
        Ok(Some(Box::new(rd.read()?)))
    } else {
        Ok(None)
    }
}

impl Serialise for Expr {
    fn serialise(&self, wr: &mut Writer) {
        match self {
            Expr::LitChar(c) => {
                wr.tag(serialise::TAG_AST_LIT_CHAR);
                wr.write_u64(*c as u64);
            }
            Expr::LitString(s) => {
                wr.tag(serialise::TAG_AST_LIT_STRING);
                wr.write_str(s);
            }
            Expr::LitInteger { value, imaginary } => {
                wr.tag(serialise::TAG_AST_LIT_INTEGER);
                wr.write_i64(*value);
                wr.write_bool(*imaginary);
            }
            Expr::LitDouble { value, imaginary } => {
                wr.tag(serialise::TAG_AST_LIT_DOUBLE);
                wr.write_f64(*value);
                wr.write_bool(*imaginary);
            }
            Expr::LitBool(b) => {
                wr.tag(serialise::TAG_AST_LIT_BOOLEAN);
                wr.write_bool(*b);
            }
            Expr::LitList(elements) => {
                wr.tag(serialise::TAG_AST_LIT_LIST);
                wr.write(elements);
            }
            Expr::Var(name) => {
                wr.tag(serialise::TAG_AST_VAR_REF);
                wr.write_str(name);
            }
            Expr::Subscript { base, index } => {
                wr.tag(serialise::TAG_AST_OP_SUBSCRIPT);
                base.serialise(wr);
                index.serialise(wr);
            }
            Expr::Slice { base, start, end } => {
                wr.tag(serialise::TAG_AST_OP_SLICE);
                base.serialise(wr);
                write_opt_expr(wr, start);
                write_opt_expr(wr, end);
            }
            Expr::Splat(inner) => {
                wr.tag(serialise::TAG_AST_OP_SPLAT);
                inner.serialise(wr);
            }
            Expr::Unary { op, expr } => {
                wr.tag(serialise::TAG_AST_OP_UNARY);
                wr.write_u8(unary_op_id(*op));
                expr.serialise(wr);
            }
            Expr::Binary { op, lhs, rhs } => {
                wr.tag(serialise::TAG_AST_OP_BINARY);
                wr.write_u8(binary_op_id(*op));
                lhs.serialise(wr);
                rhs.serialise(wr);
            }
            Expr::Comparison { first, rest } => {
                wr.tag(serialise::TAG_AST_OP_COMPARISON);
                first.serialise(wr);
                wr.write_u64(rest.len() as u64);
                for (op, e) in rest {
                    wr.write_u8(compare_op_id(*op));
                    e.serialise(wr);
                }
            }
            Expr::Ternary { cond, then, otherwise } => {
                wr.tag(serialise::TAG_AST_OP_TERNARY);
                cond.serialise(wr);
                then.serialise(wr);
                otherwise.serialise(wr);
            }
            Expr::Assign { op, target, value } => {
                wr.tag(serialise::TAG_AST_OP_ASSIGN);
                wr.write_u8(assign_op_id(*op));
                target.serialise(wr);
                value.serialise(wr);
            }
            Expr::Dot { lhs, rhs } => {
                wr.tag(serialise::TAG_AST_OP_DOT);
                wr.write_bool(false);
                lhs.serialise(wr);
                rhs.serialise(wr);
            }
            Expr::Pipeline { lhs, rhs } => {
                wr.tag(serialise::TAG_AST_OP_DOT);
                wr.write_bool(true);
                lhs.serialise(wr);
                rhs.serialise(wr);
            }
            Expr::Call { callee, args } => {
                wr.tag(serialise::TAG_AST_FUNCTION_CALL);
                callee.serialise(wr);
                wr.write(args);
            }
        }
    }
}

impl Deserialise for Expr {
    fn deserialise(rd: &mut Reader) -> CodecResult<Self> {
        Ok(match rd.tag()? {
            serialise::TAG_AST_LIT_CHAR => {
                let cp = rd.read_u64()? as u32;
                Expr::LitChar(char::from_u32(cp).ok_or(CodecError::InvalidUtf8)?)
            }
            serialise::TAG_AST_LIT_STRING => Expr::LitString(rd.read_str()?),
            serialise::TAG_AST_LIT_INTEGER => Expr::LitInteger {
                value: rd.read_i64()?,
                imaginary: rd.read_bool()?,
            },
            serialise::TAG_AST_LIT_DOUBLE => Expr::LitDouble {
                value: rd.read_f64()?,
                imaginary: rd.read_bool()?,
            },
            serialise::TAG_AST_LIT_BOOLEAN => Expr::LitBool(rd.read_bool()?),
            serialise::TAG_AST_LIT_LIST => Expr::LitList(rd.read()?),
            serialise::TAG_AST_VAR_REF => Expr::Var(rd.read_str()?),
            serialise::TAG_AST_OP_SUBSCRIPT => Expr::Subscript {
                base: Box::new(rd.read()?),
                index: Box::new(rd.read()?),
            },
            serialise::TAG_AST_OP_SLICE => Expr::Slice {
                base: Box::new(rd.read()?),
                start: read_opt_expr(rd)?,
                end: read_opt_expr(rd)?,
            },
            serialise::TAG_AST_OP_SPLAT => Expr::Splat(Box::new(rd.read()?)),
            serialise::TAG_AST_OP_UNARY => Expr::Unary {
                op: unary_op_from(rd.read_u8()?)?,
                expr: Box::new(rd.read()?),
            },
            serialise::TAG_AST_OP_BINARY => Expr::Binary {
                op: binary_op_from(rd.read_u8()?)?,
                lhs: Box::new(rd.read()?),
                rhs: Box::new(rd.read()?),
            },
            serialise::TAG_AST_OP_COMPARISON => {
                let first: Expr = rd.read()?;
                let count = rd.read_u64()?;

                let mut rest = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let op = compare_op_from(rd.read_u8()?)?;
                    rest.push((op, rd.read()?));
                }

                Expr::Comparison {
                    first: Box::new(first),
                    rest,
                }
            }
            serialise::TAG_AST_OP_TERNARY => Expr::Ternary {
                cond: Box::new(rd.read()?),
                then: Box::new(rd.read()?),
                otherwise: Box::new(rd.read()?),
            },
            serialise::TAG_AST_OP_ASSIGN => Expr::Assign {
                op: assign_op_from(rd.read_u8()?)?,
                target: Box::new(rd.read()?),
                value: Box::new(rd.read()?),
            },
            serialise::TAG_AST_OP_DOT => {
                let pipeline = rd.read_bool()?;
                let lhs = Box::new(rd.read()?);
                let rhs = Box::new(rd.read()?);
                if pipeline {
                    Expr::Pipeline { lhs, rhs }
                } else {
                    Expr::Dot { lhs, rhs }
                }
            }
            serialise::TAG_AST_FUNCTION_CALL => Expr::Call {
                callee: Box::new(rd.read()?),
                args: rd.read()?,
            },
            other => return Err(CodecError::InvalidTag(other)),
        })
    }
}

impl Serialise for Stmt {
    fn serialise(&self, wr: &mut Writer) {
        match self {
            Stmt::Expr(e) => e.serialise(wr),
            Stmt::Block(b) => b.serialise(wr),
            Stmt::FnDefn(d) => d.serialise(wr),
        }
    }
}

impl Deserialise for Stmt {
    fn deserialise(rd: &mut Reader) -> CodecResult<Self> {
        Ok(match rd.peek_tag()? {
            serialise::TAG_AST_BLOCK => Stmt::Block(rd.read()?),
            serialise::TAG_AST_FUNCTION_DEFN => Stmt::FnDefn(rd.read()?),
            _ => Stmt::Expr(rd.read()?),
        })
    }
}

impl Serialise for Block {
    fn serialise(&self, wr: &mut Writer) {
        wr.tag(serialise::TAG_AST_BLOCK);
        wr.write(&self.stmts);
    }
}

impl Deserialise for Block {
    fn deserialise(rd: &mut Reader) -> CodecResult<Self> {
        rd.expect_tag(serialise::TAG_AST_BLOCK)?;
        Ok(Block { stmts: rd.read()? })
    }
}

impl Serialise for FunctionDefn {
    fn serialise(&self, wr: &mut Writer) {
        wr.tag(serialise::TAG_AST_FUNCTION_DEFN);
        wr.write_str(&self.name);
        self.signature.serialise(wr);
        wr.write(&self.generics);
        self.body.serialise(wr);
    }
}

impl Deserialise for FunctionDefn {
    fn deserialise(rd: &mut Reader) -> CodecResult<Self> {
        rd.expect_tag(serialise::TAG_AST_FUNCTION_DEFN)?;
        Ok(FunctionDefn {
            name: rd.read_str()?,
            signature: rd.read()?,
            generics: rd.read()?,
            body: rd.read()?,
        })
    }
}

impl Serialise for Command {
    fn serialise(&self, wr: &mut Writer) {
        match &self.kind {
            CommandKind::Macro(code) => {
                wr.tag(serialise::TAG_MACRO);
                wr.write_str(&self.name);
                wr.write(&self.perms);
                wr.write(code);
            }
            CommandKind::Function(defn) => {
                wr.tag(serialise::TAG_FUNCTION);
                wr.write_str(&self.name);
                wr.write(&self.perms);
                defn.serialise(wr);
            }
        }
    }
}

impl Deserialise for Command {
    fn deserialise(rd: &mut Reader) -> CodecResult<Self> {
        let tag = rd.tag()?;
        let name = rd.read_str()?;
        let perms = rd.read()?;

        let kind = match tag {
            serialise::TAG_MACRO => CommandKind::Macro(rd.read()?),
            serialise::TAG_FUNCTION => CommandKind::Function(Arc::new(rd.read()?)),
            other => return Err(CodecError::InvalidTag(other)),
        };

        Ok(Command { name, perms, kind })
    }
}

impl Serialise for InterpState {
    fn serialise(&self, wr: &mut Writer) {
        wr.tag(serialise::TAG_INTERP_STATE);

        wr.write(&self.commands);
        wr.write(&self.aliases);
        wr.write(&self.builtin_perms);

        // reserved globals are reconstructed, not stored
        let globals: HashMap<&String, &Value> = self.user_globals().collect();
        wr.tag(serialise::TAG_HASHMAP);
        wr.raw_bytes(&(globals.len() as u64).to_le_bytes());
        for (name, value) in globals {
            wr.write_str(name);
            wr.write(value);
        }
    }
}

impl Deserialise for InterpState {
    fn deserialise(rd: &mut Reader) -> CodecResult<Self> {
        rd.expect_tag(serialise::TAG_INTERP_STATE)?;

        let mut state = InterpState::new();
        state.commands = rd.read()?;
        state.aliases = rd.read()?;

        let builtin_perms: HashMap<String, crate::perms::PermissionSet> = rd.read()?;
        if !builtin_perms.is_empty() {
            state.builtin_perms = builtin_perms;
        }

        let globals: HashMap<String, Value> = rd.read()?;
        for (name, value) in globals {
            if !is_reserved_global(&name) {
                state.insert_global_raw(name, value);
            }
        }

        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::parser;

    fn roundtrip_expr(src: &str) {
        let expr = parser::parse_expr(src).unwrap();

        let mut buf = Vec::new();
        expr.serialise(&mut Writer::new(&mut buf));

        let back: Expr = Reader::new(&buf).read().unwrap();
        assert_eq!(back, expr, "roundtrip mismatch for '{src}'");
    }

    #[test]
    fn test_expr_roundtrips() {
        roundtrip_expr("1 + 2 * 3");
        roundtrip_expr("\"hello\" + $0");
        roundtrip_expr("xs[1:2] + xs[:-1]");
        roundtrip_expr("f(a, b...) |> g");
        roundtrip_expr("a ? b : c");
        roundtrip_expr("1 < 2 < 3");
        roundtrip_expr("x += [1, 2i, 3.5]");
        roundtrip_expr("!flag && ~bits == 0");
    }

    #[test]
    fn test_type_roundtrips() {
        for src in ["int", "str", "[double]", "[str: [int]]", "(int, str) -> [char]"] {
            let ty = parser::parse_type(src).unwrap();

            let mut buf = Vec::new();
            ty.serialise(&mut Writer::new(&mut buf));
            let back: Type = Reader::new(&buf).read().unwrap();
            assert_eq!(back, ty);
        }
    }

    #[test]
    fn test_value_roundtrips() {
        let values = vec![
            Value::Void,
            Value::Bool(true),
            Value::Char('λ'),
            Value::Integer(-42),
            Value::Double(2.5),
            Value::Complex(Complex::new(1.0, -1.0)),
            Value::of_string("some text"),
            Value::of_list(Type::Integer, vec![Value::Integer(1), Value::Integer(2)]),
        ];

        for v in values {
            let mut buf = Vec::new();
            v.serialise(&mut Writer::new(&mut buf));
            let back: Value = Reader::new(&buf).read().unwrap();
            assert_eq!(back, v);
        }
    }

    #[test]
    fn test_command_roundtrip() {
        let mut macro_cmd = Command::new_macro("greet", r"hello, \$user");
        macro_cmd.perms = crate::perms::PermissionSet::from_flags(0x41);

        let fn_cmd = Command::new_function(
            parser::parse_function_defn("fn double (int) -> int => $0 * 2").unwrap(),
        );

        for cmd in [macro_cmd, fn_cmd] {
            let mut buf = Vec::new();
            cmd.serialise(&mut Writer::new(&mut buf));
            let back: Command = Reader::new(&buf).read().unwrap();

            assert_eq!(back.name, cmd.name);
            assert_eq!(back.perms, cmd.perms);
            match (&back.kind, &cmd.kind) {
                (CommandKind::Macro(a), CommandKind::Macro(b)) => assert_eq!(a, b),
                (CommandKind::Function(a), CommandKind::Function(b)) => assert_eq!(a, b),
                _ => panic!("command kind changed across roundtrip"),
            }
        }
    }

    #[test]
    fn test_interp_state_roundtrip() {
        let mut state = InterpState::new();
        state
            .commands
            .insert(String::from("hi"), Command::new_macro("hi", "hello there"));
        state
            .aliases
            .insert(String::from("hello"), String::from("hi"));
        state.add_global("count", Value::Integer(7)).unwrap();

        let mut buf = Vec::new();
        state.serialise(&mut Writer::new(&mut buf));
        let back: InterpState = Reader::new(&buf).read().unwrap();

        assert!(back.find_command("hello").is_some());
        assert_eq!(back.get_global("count"), Some(&Value::Integer(7)));
        // reserved globals come back even though they're not stored
        assert!(back.get_global("pi").is_some());
        assert_eq!(
            back.builtin_perms.get("chmod").unwrap().flags,
            state.builtin_perms.get("chmod").unwrap().flags
        );
    }
}
