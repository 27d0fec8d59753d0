//! Pratt-style expression parser, plus the statement, function-definition
//! and type parsers.

use crate::interp::ast::{
    AssignOp, BinaryOp, Block, CompareOp, Expr, FunctionDefn, Stmt, UnaryOp,
};
use crate::interp::lexer::{self, Token, TokenKind};
use crate::interp::types::Type;
use unicode_normalization::UnicodeNormalization;

type ParseResult<T> = Result<T, String>;

struct State<'a> {
    tokens: &'a [Token<'a>],
    known_generics: Vec<Vec<String>>,
}

impl<'a> State<'a> {
    fn new(tokens: &'a [Token<'a>]) -> Self {
        State {
            tokens,
            known_generics: Vec::new(),
        }
    }

    fn peek(&self) -> Option<&Token<'a>> {
        self.tokens.first()
    }

    fn peek_kind(&self) -> Option<TokenKind> {
        self.peek().map(|t| t.kind)
    }

    fn pop(&mut self) -> Option<Token<'a>> {
        let (first, rest) = self.tokens.split_first()?;
        self.tokens = rest;
        Some(*first)
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        if self.peek_kind() == Some(kind) {
            self.pop();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> ParseResult<Token<'a>> {
        if self.peek_kind() == Some(kind) {
            Ok(self.pop().unwrap())
        } else {
            Err(format!("expected '{what}'"))
        }
    }

    fn is_known_generic(&self, name: &str) -> bool {
        self.known_generics
            .iter()
            .rev()
            .any(|scope| scope.iter().any(|g| g == name))
    }
}

fn precedence(kind: TokenKind) -> i32 {
    use TokenKind::*;
    match kind {
        Period => 8000,

        LParen => 3000,
        LSquare => 2800,

        Caret => 2600,

        Asterisk => 2400,
        Slash => 2200,
        Percent => 2000,

        Plus | Minus => 1800,

        ShiftLeft | ShiftRight => 1600,

        Ampersand => 1400,

        Pipe => 1000,

        EqualTo | NotEqual | LAngle | RAngle | LessThanEqual | GreaterThanEqual => 800,

        LogicalAnd => 600,
        LogicalOr => 400,

        Equal | PlusEquals | MinusEquals | TimesEquals | DivideEquals | RemainderEquals
        | ShiftLeftEquals | ShiftRightEquals | BitwiseAndEquals | BitwiseOrEquals
        | ExponentEquals => 200,

        Question => 10,

        Pipeline => 1,

        _ => -1,
    }
}

fn is_postfix(kind: TokenKind) -> bool {
    matches!(kind, TokenKind::LSquare | TokenKind::LParen | TokenKind::Ellipsis)
}

fn is_right_associative(kind: TokenKind) -> bool {
    kind == TokenKind::Caret
}

fn assignment_op(kind: TokenKind) -> Option<AssignOp> {
    use TokenKind::*;
    Some(match kind {
        Equal => AssignOp::Set,
        PlusEquals => AssignOp::Add,
        MinusEquals => AssignOp::Sub,
        TimesEquals => AssignOp::Mul,
        DivideEquals => AssignOp::Div,
        RemainderEquals => AssignOp::Rem,
        ExponentEquals => AssignOp::Pow,
        ShiftLeftEquals => AssignOp::ShiftLeft,
        ShiftRightEquals => AssignOp::ShiftRight,
        BitwiseAndEquals => AssignOp::BitAnd,
        BitwiseOrEquals => AssignOp::BitOr,
        _ => return None,
    })
}

fn comparison_op(kind: TokenKind) -> Option<CompareOp> {
    use TokenKind::*;
    Some(match kind {
        EqualTo => CompareOp::Eq,
        NotEqual => CompareOp::Ne,
        LAngle => CompareOp::Lt,
        RAngle => CompareOp::Gt,
        LessThanEqual => CompareOp::Le,
        GreaterThanEqual => CompareOp::Ge,
        _ => return None,
    })
}

fn binary_op(kind: TokenKind) -> Option<BinaryOp> {
    use TokenKind::*;
    Some(match kind {
        Plus => BinaryOp::Add,
        Minus => BinaryOp::Sub,
        Asterisk => BinaryOp::Mul,
        Slash => BinaryOp::Div,
        Percent => BinaryOp::Rem,
        Caret => BinaryOp::Pow,
        ShiftLeft => BinaryOp::ShiftLeft,
        ShiftRight => BinaryOp::ShiftRight,
        Ampersand => BinaryOp::BitAnd,
        Pipe => BinaryOp::BitOr,
        LogicalAnd => BinaryOp::LogicalAnd,
        LogicalOr => BinaryOp::LogicalOr,
        _ => return None,
    })
}

/// Parses a single expression from source text.
pub fn parse_expr(src: &str) -> ParseResult<Expr> {
    let tokens = lexer::lex(src)?;
    let mut st = State::new(&tokens);
    let expr = parse_expression(&mut st)?;

    if let Some(tok) = st.peek() {
        return Err(format!("unexpected token '{}'", tok.text));
    }

    Ok(expr)
}

/// Parses one statement (expression, block, or function definition).
pub fn parse_stmt(src: &str) -> ParseResult<Stmt> {
    let tokens = lexer::lex(src)?;
    let mut st = State::new(&tokens);
    parse_statement(&mut st)
}

/// Parses a function definition, leading `fn` keyword included.
pub fn parse_function_defn(src: &str) -> ParseResult<FunctionDefn> {
    let tokens = lexer::lex(src)?;
    let mut st = State::new(&tokens);
    parse_fn_defn(&mut st, true)
}

/// Parses a bare type, e.g. `[str: int]` or `(int, int) -> int`.
pub fn parse_type(src: &str) -> ParseResult<Type> {
    let tokens = lexer::lex(src)?;
    let mut st = State::new(&tokens);
    let ty = parse_type_inner(&mut st, 0)?;

    if st.peek().is_some() {
        return Err(String::from("junk after type"));
    }

    Ok(ty)
}

fn parse_expression(st: &mut State) -> ParseResult<Expr> {
    let lhs = parse_unary(st)?;
    parse_rhs(st, lhs, 0)
}

fn parse_rhs(st: &mut State, mut lhs: Expr, prio: i32) -> ParseResult<Expr> {
    loop {
        let Some(oper) = st.peek().copied() else {
            return Ok(lhs);
        };

        let prec = precedence(oper.kind);
        if prec < prio && !is_right_associative(oper.kind) && !is_postfix(oper.kind) {
            return Ok(lhs);
        }

        st.pop();

        if is_postfix(oper.kind) {
            lhs = parse_postfix(st, lhs, oper.kind)?;
            continue;
        }

        let mut rhs = parse_unary(st)?;

        if let Some(next) = st.peek() {
            if precedence(next.kind) > prec || is_right_associative(next.kind) {
                rhs = parse_rhs(st, rhs, prec + 1)?;
            }
        }

        if let Some(op) = assignment_op(oper.kind) {
            lhs = Expr::Assign {
                op,
                target: Box::new(lhs),
                value: Box::new(rhs),
            };
        } else if oper.kind == TokenKind::Question {
            st.expect(TokenKind::Colon, ":")?;
            let otherwise = parse_expression(st)?;
            lhs = Expr::Ternary {
                cond: Box::new(lhs),
                then: Box::new(rhs),
                otherwise: Box::new(otherwise),
            };
        } else if let Some(op) = comparison_op(oper.kind) {
            // chained comparisons collapse into one short-circuiting node
            if let Expr::Comparison { first, mut rest } = lhs {
                rest.push((op, rhs));
                lhs = Expr::Comparison { first, rest };
            } else {
                lhs = Expr::Comparison {
                    first: Box::new(lhs),
                    rest: vec![(op, rhs)],
                };
            }
        } else if oper.kind == TokenKind::Period {
            lhs = Expr::Dot {
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        } else if oper.kind == TokenKind::Pipeline {
            lhs = Expr::Pipeline {
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        } else if let Some(op) = binary_op(oper.kind) {
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        } else {
            return Err(format!("invalid operator '{}'", oper.text));
        }
    }
}

fn parse_unary(st: &mut State) -> ParseResult<Expr> {
    let op = match st.peek_kind() {
        Some(TokenKind::Exclamation) => Some(UnaryOp::Not),
        Some(TokenKind::Minus) => Some(UnaryOp::Minus),
        Some(TokenKind::Plus) => Some(UnaryOp::Plus),
        Some(TokenKind::Tilde) => Some(UnaryOp::BitNot),
        _ => None,
    };

    if let Some(op) = op {
        st.pop();
        let expr = parse_unary(st)?;
        return Ok(Expr::Unary {
            op,
            expr: Box::new(expr),
        });
    }

    parse_primary(st)
}

fn parse_primary(st: &mut State) -> ParseResult<Expr> {
    match st.peek_kind() {
        Some(TokenKind::StringLit) => parse_string(st),
        Some(TokenKind::CharLit) => parse_char(st),
        Some(TokenKind::NumberLit) => parse_number(st),
        Some(TokenKind::BooleanLit) => {
            let tok = st.pop().unwrap();
            Ok(Expr::LitBool(tok.text == "true"))
        }
        Some(TokenKind::LParen) => {
            st.pop();
            let inside = parse_expression(st)?;
            st.expect(TokenKind::RParen, ")")?;
            Ok(inside)
        }
        Some(TokenKind::LSquare) => parse_list(st),
        Some(TokenKind::Dollar) | Some(TokenKind::Identifier) => parse_identifier(st),
        None => Err(String::from("unexpected end of input")),
        Some(_) => Err(format!("unexpected token '{}'", st.peek().unwrap().text)),
    }
}

fn parse_list(st: &mut State) -> ParseResult<Expr> {
    st.expect(TokenKind::LSquare, "[")?;

    let mut elements = Vec::new();
    while st.peek_kind().is_some_and(|k| k != TokenKind::RSquare) {
        elements.push(parse_expression(st)?);

        if st.matches(TokenKind::Comma) {
            continue;
        } else if st.peek_kind() == Some(TokenKind::RSquare) {
            break;
        } else {
            return Err(String::from("expected ',' or ']' in list literal"));
        }
    }

    st.expect(TokenKind::RSquare, "]")?;
    Ok(Expr::LitList(elements))
}

fn parse_number(st: &mut State) -> ParseResult<Expr> {
    let tok = st.pop().unwrap();
    let text = tok.text;

    let lower_prefix = text.get(0..2).map(str::to_ascii_lowercase);
    let (base, digits) = match lower_prefix.as_deref() {
        Some("0x") => (16, &text[2..]),
        Some("0b") => (2, &text[2..]),
        _ => (10, text),
    };

    let is_floating =
        base == 10 && (text.contains('.') || text.contains('e') || text.contains('E'));

    // `1i`, `2.5i` are imaginary literals
    let imaginary = st
        .peek()
        .is_some_and(|t| t.kind == TokenKind::Identifier && t.text == "i");
    if imaginary {
        st.pop();
    }

    if is_floating {
        let value: f64 = digits
            .parse()
            .map_err(|_| format!("invalid number literal '{text}'"))?;
        Ok(Expr::LitDouble { value, imaginary })
    } else {
        let value = i64::from_str_radix(digits, base)
            .map_err(|_| format!("invalid number literal '{text}'"))?;
        Ok(Expr::LitInteger { value, imaginary })
    }
}

fn parse_char(st: &mut State) -> ParseResult<Expr> {
    let tok = st.pop().unwrap();
    let mut chars = tok.text.chars();
    let c = chars.next().ok_or("empty character literal")?;

    if chars.next().is_some() {
        return Err(String::from("character literal must be a single codepoint"));
    }

    Ok(Expr::LitChar(c))
}

fn parse_string(st: &mut State) -> ParseResult<Expr> {
    let tok = st.pop().unwrap();

    let mut out = String::with_capacity(tok.text.len());
    let mut chars = tok.text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }

        match chars.next() {
            Some('n') => out.push('\n'),
            Some('b') => out.push('\u{0008}'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            // unknown escapes pass through literally
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }

    Ok(Expr::LitString(out))
}

fn parse_identifier(st: &mut State) -> ParseResult<Expr> {
    let tok = st.pop().unwrap();

    if tok.kind == TokenKind::Dollar {
        let name = match st.peek() {
            Some(t) if t.kind == TokenKind::Identifier => t.text.to_string(),
            Some(t) if t.kind == TokenKind::NumberLit => {
                if !t.text.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(format!("invalid numeric literal after '$' ({})", t.text));
                }
                t.text.to_string()
            }
            Some(t) => return Err(format!("invalid token '{}' after '$'", t.text)),
            None => return Err(String::from("unexpected end of input after '$'")),
        };
        st.pop();

        return Ok(Expr::Var(format!("${name}")));
    }

    let name: String = tok.text.nfc().collect();
    Ok(Expr::Var(name))
}

fn parse_postfix(st: &mut State, lhs: Expr, op: TokenKind) -> ParseResult<Expr> {
    match op {
        TokenKind::Ellipsis => Ok(Expr::Splat(Box::new(lhs))),

        TokenKind::LParen => {
            let mut args = Vec::new();
            while st.peek_kind().is_some_and(|k| k != TokenKind::RParen) {
                args.push(parse_expression(st)?);

                if st.matches(TokenKind::Comma) {
                    continue;
                } else if st.peek_kind() == Some(TokenKind::RParen) {
                    break;
                } else {
                    return Err(String::from("expected ',' or ')'"));
                }
            }

            st.expect(TokenKind::RParen, ")")?;
            Ok(Expr::Call {
                callee: Box::new(lhs),
                args,
            })
        }

        TokenKind::LSquare => {
            // 5 cases: [N], [:], [N:], [:M], [N:M]
            if st.matches(TokenKind::Colon) {
                if st.matches(TokenKind::RSquare) {
                    return Ok(Expr::Slice {
                        base: Box::new(lhs),
                        start: None,
                        end: None,
                    });
                }

                let end = parse_expression(st)?;
                st.expect(TokenKind::RSquare, "]")?;
                return Ok(Expr::Slice {
                    base: Box::new(lhs),
                    start: None,
                    end: Some(Box::new(end)),
                });
            }

            let index = parse_expression(st)?;
            if st.matches(TokenKind::Colon) {
                if st.matches(TokenKind::RSquare) {
                    return Ok(Expr::Slice {
                        base: Box::new(lhs),
                        start: Some(Box::new(index)),
                        end: None,
                    });
                }

                let end = parse_expression(st)?;
                st.expect(TokenKind::RSquare, "]")?;
                Ok(Expr::Slice {
                    base: Box::new(lhs),
                    start: Some(Box::new(index)),
                    end: Some(Box::new(end)),
                })
            } else if st.matches(TokenKind::RSquare) {
                Ok(Expr::Subscript {
                    base: Box::new(lhs),
                    index: Box::new(index),
                })
            } else {
                Err(String::from("expected either ']' or ':'"))
            }
        }

        _ => Err(String::from("invalid postfix operator")),
    }
}

fn parse_statement(st: &mut State) -> ParseResult<Stmt> {
    match st.peek_kind() {
        Some(TokenKind::Function) => Ok(Stmt::FnDefn(parse_fn_defn(st, true)?)),
        Some(TokenKind::LBrace) | Some(TokenKind::FatRightArrow) => {
            Ok(Stmt::Block(parse_block(st)?))
        }
        _ => Ok(Stmt::Expr(parse_expression(st)?)),
    }
}

fn parse_block(st: &mut State) -> ParseResult<Block> {
    let single = match st.peek_kind() {
        Some(TokenKind::FatRightArrow) => true,
        Some(TokenKind::LBrace) => false,
        _ => return Err(String::from("expected either '{' or '=>'")),
    };
    st.pop();

    let mut stmts = Vec::new();

    if single {
        stmts.push(parse_statement(st)?);
        return Ok(Block { stmts });
    }

    while st.peek_kind().is_some_and(|k| k != TokenKind::RBrace) {
        stmts.push(parse_statement(st)?);

        if !st.matches(TokenKind::Semicolon) {
            break;
        }
    }

    st.expect(TokenKind::RBrace, "}")?;
    Ok(Block { stmts })
}

fn parse_fn_defn(st: &mut State, require_keyword: bool) -> ParseResult<FunctionDefn> {
    if require_keyword {
        st.expect(TokenKind::Function, "fn")?;
    }

    let name_tok = st.expect(TokenKind::Identifier, "identifier after 'fn'")?;
    let name: String = name_tok.text.nfc().collect();

    let mut generics = Vec::new();
    if st.matches(TokenKind::LAngle) {
        while st.peek_kind().is_some_and(|k| k != TokenKind::RAngle) {
            let g = st.expect(TokenKind::Identifier, "identifier in <>")?;
            generics.push(g.text.to_string());

            if st.matches(TokenKind::Comma) {
                continue;
            } else if st.peek_kind() == Some(TokenKind::RAngle) {
                break;
            } else {
                return Err(String::from("unexpected token in <>"));
            }
        }
        st.expect(TokenKind::RAngle, ">")?;
    }

    st.known_generics.push(generics.clone());
    let signature = parse_type_inner(st, 0)?;

    if !signature.is_function() {
        st.known_generics.pop();
        return Err(format!("'{signature}' is not a function type"));
    }

    let body = parse_block(st)?;
    st.known_generics.pop();

    Ok(FunctionDefn {
        name,
        signature,
        generics,
        body,
    })
}

fn parse_type_inner(st: &mut State, group: u64) -> ParseResult<Type> {
    match st.peek_kind() {
        Some(TokenKind::Identifier) => {
            let tok = st.pop().unwrap();
            match tok.text {
                "int" => Ok(Type::Integer),
                "double" => Ok(Type::Double),
                "bool" => Ok(Type::Bool),
                "char" => Ok(Type::Char),
                "str" => Ok(Type::string()),
                "void" => Ok(Type::Void),
                "complex" => Ok(Type::Complex),
                name if st.is_known_generic(name) => {
                    Ok(Type::Generic(name.to_string(), group))
                }
                name => Err(format!("unknown type '{name}'")),
            }
        }

        Some(TokenKind::LSquare) => {
            st.pop();
            let elm = parse_type_inner(st, group)?;

            if st.matches(TokenKind::Colon) {
                let value = parse_type_inner(st, group)?;
                st.expect(TokenKind::RSquare, "]")?;
                Ok(Type::Map(Box::new(elm), Box::new(value)))
            } else if st.matches(TokenKind::Ellipsis) {
                st.expect(TokenKind::RSquare, "]")?;
                Ok(Type::VariadicList(Box::new(elm)))
            } else {
                st.expect(TokenKind::RSquare, "]")?;
                Ok(Type::List(Box::new(elm)))
            }
        }

        Some(TokenKind::LParen) => {
            st.pop();

            let mut args = Vec::new();
            while st.peek_kind().is_some_and(|k| k != TokenKind::RParen) {
                args.push(parse_type_inner(st, group)?);

                if st.matches(TokenKind::Comma) {
                    continue;
                } else if st.peek_kind() == Some(TokenKind::RParen) {
                    break;
                } else {
                    return Err(String::from("expected either ',' or ')'"));
                }
            }
            st.expect(TokenKind::RParen, ")")?;

            st.expect(TokenKind::RightArrow, "->")?;
            let ret = parse_type_inner(st, group)?;
            Ok(Type::Function(Box::new(ret), args))
        }

        _ => Err(String::from("unexpected token in type")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precedence_shapes() {
        // 1+2*3 parses as 1+(2*3)
        let e = parse_expr("1+2*3").unwrap();
        let Expr::Binary { op: BinaryOp::Add, rhs, .. } = e else {
            panic!("expected add at the top");
        };
        assert!(matches!(*rhs, Expr::Binary { op: BinaryOp::Mul, .. }));
    }

    #[test]
    fn test_chained_comparison_collapses() {
        let e = parse_expr("1 < 2 < 3").unwrap();
        let Expr::Comparison { rest, .. } = e else {
            panic!("expected a comparison node");
        };
        assert_eq!(rest.len(), 2);
        assert_eq!(rest[0].0, CompareOp::Lt);
    }

    #[test]
    fn test_ternary_is_right_associative() {
        let e = parse_expr("a ? 1 : b ? 2 : 3").unwrap();
        let Expr::Ternary { otherwise, .. } = e else {
            panic!("expected ternary");
        };
        assert!(matches!(*otherwise, Expr::Ternary { .. }));
    }

    #[test]
    fn test_postfix_forms() {
        assert!(matches!(parse_expr("xs[1]").unwrap(), Expr::Subscript { .. }));
        assert!(matches!(
            parse_expr("xs[1:2]").unwrap(),
            Expr::Slice { start: Some(_), end: Some(_), .. }
        ));
        assert!(matches!(
            parse_expr("xs[:2]").unwrap(),
            Expr::Slice { start: None, end: Some(_), .. }
        ));
        assert!(matches!(
            parse_expr("xs[1:]").unwrap(),
            Expr::Slice { start: Some(_), end: None, .. }
        ));
        assert!(matches!(
            parse_expr("xs[:]").unwrap(),
            Expr::Slice { start: None, end: None, .. }
        ));
        assert!(matches!(parse_expr("xs...").unwrap(), Expr::Splat(_)));
        assert!(matches!(parse_expr("f(1, 2)").unwrap(), Expr::Call { .. }));
    }

    #[test]
    fn test_call_binds_tighter_than_arithmetic() {
        let e = parse_expr("f(1) + 2").unwrap();
        let Expr::Binary { op: BinaryOp::Add, lhs, .. } = e else {
            panic!("expected add at the top");
        };
        assert!(matches!(*lhs, Expr::Call { .. }));
    }

    #[test]
    fn test_string_escapes() {
        let Expr::LitString(s) = parse_expr(r#""a\nb\t\"c\"\q""#).unwrap() else {
            panic!("expected string literal");
        };
        assert_eq!(s, "a\nb\t\"c\"\\q");
    }

    #[test]
    fn test_number_forms() {
        assert_eq!(
            parse_expr("0x40").unwrap(),
            Expr::LitInteger { value: 64, imaginary: false }
        );
        assert_eq!(
            parse_expr("0b101").unwrap(),
            Expr::LitInteger { value: 5, imaginary: false }
        );
        assert_eq!(
            parse_expr("2i").unwrap(),
            Expr::LitInteger { value: 2, imaginary: true }
        );
        assert!(matches!(
            parse_expr("1.5e3").unwrap(),
            Expr::LitDouble { imaginary: false, .. }
        ));
    }

    #[test]
    fn test_dollar_variables() {
        assert_eq!(parse_expr("$0").unwrap(), Expr::Var(String::from("$0")));
        assert_eq!(parse_expr("$user").unwrap(), Expr::Var(String::from("$user")));
        assert!(parse_expr("$+").is_err());
    }

    #[test]
    fn test_pipeline_binds_loosest() {
        let e = parse_expr("1 + 2 |> f").unwrap();
        let Expr::Pipeline { lhs, .. } = e else {
            panic!("expected pipeline at the top");
        };
        assert!(matches!(*lhs, Expr::Binary { op: BinaryOp::Add, .. }));
    }

    #[test]
    fn test_type_parser() {
        assert_eq!(parse_type("int").unwrap(), Type::Integer);
        assert_eq!(parse_type("str").unwrap(), Type::string());
        assert_eq!(
            parse_type("[int]").unwrap(),
            Type::List(Box::new(Type::Integer))
        );
        assert_eq!(
            parse_type("[str: int]").unwrap(),
            Type::Map(Box::new(Type::string()), Box::new(Type::Integer))
        );
        assert_eq!(
            parse_type("(int, double) -> str").unwrap(),
            Type::Function(Box::new(Type::string()), vec![Type::Integer, Type::Double])
        );
        assert_eq!(
            parse_type("[int...]").unwrap(),
            Type::VariadicList(Box::new(Type::Integer))
        );
        assert!(parse_type("wibble").is_err());
    }

    #[test]
    fn test_function_definition() {
        let defn = parse_function_defn("fn double (int) -> int => $0 * 2").unwrap();
        assert_eq!(defn.name, "double");
        assert_eq!(
            defn.signature,
            Type::Function(Box::new(Type::Integer), vec![Type::Integer])
        );
        assert_eq!(defn.body.stmts.len(), 1);
    }

    #[test]
    fn test_function_definition_with_generics_and_block() {
        let defn =
            parse_function_defn("fn first<T> ([T]) -> T { $0[0] }").unwrap();
        assert_eq!(defn.generics, vec!["T"]);
        let Type::Function(ret, args) = &defn.signature else {
            panic!("expected function type");
        };
        assert_eq!(**ret, Type::Generic(String::from("T"), 0));
        assert_eq!(args[0], Type::List(Box::new(Type::Generic(String::from("T"), 0))));
    }

    #[test]
    fn test_non_function_signature_rejected() {
        assert!(parse_function_defn("fn nope int => 1").is_err());
    }

    #[test]
    fn test_trailing_junk_rejected() {
        assert!(parse_expr("1 + 2 )").is_err());
    }
}
