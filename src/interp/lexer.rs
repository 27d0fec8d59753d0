//! UTF-8 aware tokenizer for the command language.

/// Token kinds. Multi-character operators are matched before their
/// single-character prefixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Function,
    If,
    Let,
    Else,
    While,
    Return,
    For,

    Semicolon,
    Dollar,
    Colon,
    Pipe,
    Ampersand,
    Period,
    Asterisk,
    Caret,
    Exclamation,
    Plus,
    Comma,
    Minus,
    Slash,
    LParen,
    RParen,
    LSquare,
    RSquare,
    LBrace,
    RBrace,
    LAngle,
    RAngle,
    Equal,
    Percent,
    Tilde,
    Question,

    LogicalOr,
    LogicalAnd,
    EqualTo,
    NotEqual,
    LessThanEqual,
    GreaterThanEqual,
    ShiftLeft,
    ShiftRight,
    RightArrow,
    FatRightArrow,
    Ellipsis,

    PlusEquals,
    MinusEquals,
    TimesEquals,
    DivideEquals,
    RemainderEquals,
    ShiftLeftEquals,
    ShiftRightEquals,
    BitwiseAndEquals,
    BitwiseOrEquals,
    ExponentEquals,

    Pipeline,

    StringLit,
    NumberLit,
    BooleanLit,
    CharLit,
    Identifier,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub text: &'a str,
}

impl<'a> Token<'a> {
    fn new(kind: TokenKind, text: &'a str) -> Self {
        Token { kind, text }
    }
}

// longest-match first; every prefix of a longer operator appears later.
const MULTI_CHAR_OPS: &[(&str, TokenKind)] = &[
    ("<<=", TokenKind::ShiftLeftEquals),
    (">>=", TokenKind::ShiftRightEquals),
    ("...", TokenKind::Ellipsis),
    ("&&", TokenKind::LogicalAnd),
    ("||", TokenKind::LogicalOr),
    ("==", TokenKind::EqualTo),
    ("!=", TokenKind::NotEqual),
    ("<=", TokenKind::LessThanEqual),
    (">=", TokenKind::GreaterThanEqual),
    ("<<", TokenKind::ShiftLeft),
    (">>", TokenKind::ShiftRight),
    ("|>", TokenKind::Pipeline),
    ("+=", TokenKind::PlusEquals),
    ("-=", TokenKind::MinusEquals),
    ("*=", TokenKind::TimesEquals),
    ("/=", TokenKind::DivideEquals),
    ("%=", TokenKind::RemainderEquals),
    ("^=", TokenKind::ExponentEquals),
    ("&=", TokenKind::BitwiseAndEquals),
    ("|=", TokenKind::BitwiseOrEquals),
    ("->", TokenKind::RightArrow),
    ("=>", TokenKind::FatRightArrow),
];

fn keyword(text: &str) -> Option<TokenKind> {
    Some(match text {
        "fn" => TokenKind::Function,
        "if" => TokenKind::If,
        "let" => TokenKind::Let,
        "else" => TokenKind::Else,
        "while" => TokenKind::While,
        "return" => TokenKind::Return,
        "for" => TokenKind::For,
        "true" | "false" => TokenKind::BooleanLit,
        _ => return None,
    })
}

fn is_ident_start(c: char) -> bool {
    c == '_' || c.is_alphabetic()
}

fn is_ident_continue(c: char) -> bool {
    c == '_' || c.is_alphanumeric()
}

fn is_digit(c: char) -> bool {
    c.is_ascii_digit()
}

struct Lexer<'a> {
    src: &'a str,
    pos: usize,
    prev: Option<TokenKind>,
}

impl<'a> Lexer<'a> {
    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn slice(&self, start: usize) -> &'a str {
        &self.src[start..self.pos]
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.bump();
            } else {
                break;
            }
        }
    }

    fn lex_number(&mut self) -> Result<Token<'a>, String> {
        let start = self.pos;
        let rest = self.rest();

        let base = if rest.starts_with("0x") || rest.starts_with("0X") {
            self.pos += 2;
            16
        } else if rest.starts_with("0b") || rest.starts_with("0B") {
            self.pos += 2;
            2
        } else {
            10
        };

        let digit_ok = |c: char| match base {
            16 => c.is_ascii_hexdigit(),
            2 => c == '0' || c == '1',
            _ => c.is_ascii_digit(),
        };

        while self.peek().is_some_and(digit_ok) {
            self.bump();
        }

        // a decimal point only continues the number when the previous token
        // was not '.' and a digit follows; otherwise it's left for postfix
        // handling (x.0.1 style accesses).
        if self.peek() == Some('.') {
            let after = self.rest().chars().nth(1);
            if self.prev != Some(TokenKind::Period) && after.is_some_and(is_digit) {
                if base != 10 {
                    return Err(String::from(
                        "invalid floating point literal; only valid in base 10",
                    ));
                }

                self.bump();
                while self.peek().is_some_and(is_digit) {
                    self.bump();
                }
            }
        }

        // exponent, base 10 only; 'e' not followed by a digit is left alone
        if matches!(self.peek(), Some('e') | Some('E'))
            && self.rest().chars().nth(1).is_some_and(is_digit)
        {
            if base != 10 {
                return Err(String::from(
                    "exponential form is supported with neither hexadecimal nor binary literals",
                ));
            }

            self.bump();
            while self.peek().is_some_and(is_digit) {
                self.bump();
            }
        }

        Ok(Token::new(TokenKind::NumberLit, self.slice(start)))
    }

    fn lex_char(&mut self) -> Result<Token<'a>, String> {
        self.bump(); // opening '
        let start = self.pos;

        if self.bump().is_none() {
            return Err(String::from("unexpected end of input"));
        }

        let text = self.slice(start);
        if self.bump() != Some('\'') {
            return Err(String::from("expected closing '"));
        }

        Ok(Token::new(TokenKind::CharLit, text))
    }

    fn lex_string(&mut self) -> Result<Token<'a>, String> {
        self.bump(); // opening "
        let start = self.pos;

        loop {
            match self.peek() {
                None => return Err(String::from("unterminated string literal")),
                Some('"') => break,
                Some('\\') => {
                    self.bump();
                    if self.bump().is_none() {
                        return Err(String::from("unterminated string literal"));
                    }
                }
                Some(_) => {
                    self.bump();
                }
            }
        }

        let text = self.slice(start);
        self.bump(); // closing "
        Ok(Token::new(TokenKind::StringLit, text))
    }

    fn lex_one(&mut self) -> Result<Option<Token<'a>>, String> {
        self.skip_whitespace();
        if self.rest().is_empty() {
            return Ok(None);
        }

        for (op, kind) in MULTI_CHAR_OPS {
            if self.rest().starts_with(op) {
                let start = self.pos;
                self.pos += op.len();
                return Ok(Some(Token::new(*kind, self.slice(start))));
            }
        }

        let c = self.peek().unwrap();

        if is_digit(c) {
            return self.lex_number().map(Some);
        }

        if c == '\'' {
            return self.lex_char().map(Some);
        }

        if c == '"' {
            return self.lex_string().map(Some);
        }

        if is_ident_start(c) {
            let start = self.pos;
            while self.peek().is_some_and(is_ident_continue) {
                self.bump();
            }

            let text = self.slice(start);
            let kind = keyword(text).unwrap_or(TokenKind::Identifier);
            return Ok(Some(Token::new(kind, text)));
        }

        let start = self.pos;
        self.bump();
        let kind = match c {
            ';' => TokenKind::Semicolon,
            '$' => TokenKind::Dollar,
            ':' => TokenKind::Colon,
            '|' => TokenKind::Pipe,
            '&' => TokenKind::Ampersand,
            '.' => TokenKind::Period,
            '*' => TokenKind::Asterisk,
            '^' => TokenKind::Caret,
            '!' => TokenKind::Exclamation,
            '+' => TokenKind::Plus,
            ',' => TokenKind::Comma,
            '-' => TokenKind::Minus,
            '/' => TokenKind::Slash,
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '[' => TokenKind::LSquare,
            ']' => TokenKind::RSquare,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            '<' => TokenKind::LAngle,
            '>' => TokenKind::RAngle,
            '=' => TokenKind::Equal,
            '%' => TokenKind::Percent,
            '~' => TokenKind::Tilde,
            '?' => TokenKind::Question,
            other => return Err(format!("invalid token '{other}'")),
        };

        Ok(Some(Token::new(kind, self.slice(start))))
    }
}

/// Tokenizes `src` completely.
pub fn lex(src: &str) -> Result<Vec<Token<'_>>, String> {
    let mut lexer = Lexer {
        src,
        pos: 0,
        prev: None,
    };

    let mut tokens = Vec::new();
    while let Some(token) = lexer.lex_one()? {
        lexer.prev = Some(token.kind);
        tokens.push(token);
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        lex(src).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_multi_char_operators_win() {
        assert_eq!(kinds("<<="), vec![TokenKind::ShiftLeftEquals]);
        assert_eq!(kinds("<<"), vec![TokenKind::ShiftLeft]);
        assert_eq!(kinds("<"), vec![TokenKind::LAngle]);
        assert_eq!(kinds("..."), vec![TokenKind::Ellipsis]);
        assert_eq!(kinds("|>"), vec![TokenKind::Pipeline]);
        assert_eq!(kinds("|"), vec![TokenKind::Pipe]);
        assert_eq!(
            kinds("a==b"),
            vec![TokenKind::Identifier, TokenKind::EqualTo, TokenKind::Identifier]
        );
    }

    #[test]
    fn test_numbers() {
        let toks = lex("123 0x1f 0b101 1.5 2e10 1.5e3").unwrap();
        assert!(toks.iter().all(|t| t.kind == TokenKind::NumberLit));
        assert_eq!(toks[0].text, "123");
        assert_eq!(toks[1].text, "0x1f");
        assert_eq!(toks[2].text, "0b101");
        assert_eq!(toks[3].text, "1.5");
        assert_eq!(toks[4].text, "2e10");
    }

    #[test]
    fn test_float_after_period_stays_integer() {
        // x.0.1 style accesses must not lex "0.1" as a float.
        let toks = lex("x.0.1").unwrap();
        let kinds: Vec<_> = toks.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Identifier,
                TokenKind::Period,
                TokenKind::NumberLit,
                TokenKind::Period,
                TokenKind::NumberLit,
            ]
        );
    }

    #[test]
    fn test_bad_hex_float_rejected() {
        assert!(lex("0x1.5").is_err());
        assert!(lex("0x1e5").is_ok()); // 'e' is a hex digit here, not an exponent
    }

    #[test]
    fn test_string_and_char_literals() {
        let toks = lex(r#""hello \"world\"" 'x'"#).unwrap();
        assert_eq!(toks[0].kind, TokenKind::StringLit);
        assert_eq!(toks[0].text, r#"hello \"world\""#);
        assert_eq!(toks[1].kind, TokenKind::CharLit);
        assert_eq!(toks[1].text, "x");
    }

    #[test]
    fn test_unicode_identifiers_and_chars() {
        let toks = lex("héllo 'λ'").unwrap();
        assert_eq!(toks[0].kind, TokenKind::Identifier);
        assert_eq!(toks[0].text, "héllo");
        assert_eq!(toks[1].text, "λ");
    }

    #[test]
    fn test_keywords() {
        assert_eq!(
            kinds("fn true false while"),
            vec![
                TokenKind::Function,
                TokenKind::BooleanLit,
                TokenKind::BooleanLit,
                TokenKind::While
            ]
        );
    }

    #[test]
    fn test_dollar_args() {
        assert_eq!(
            kinds("$1 $user"),
            vec![
                TokenKind::Dollar,
                TokenKind::NumberLit,
                TokenKind::Dollar,
                TokenKind::Identifier
            ]
        );
    }

    #[test]
    fn test_unterminated_string_fails() {
        assert!(lex("\"oops").is_err());
    }
}
