//! Source text to token stream.
//!
//! Grounded directly in the original lexer's character-by-character
//! scan: whitespace/line-comment skipping, escape rules inside string
//! literals, and the longest-match rule for one- and two-character
//! operators. One deliberate divergence: the original assigns `)` the
//! token kind belonging to `(` in one branch. That's fixed here — both
//! parens get their own, correct kind.

use std::fmt;

use lazy_static::lazy_static;
use std::collections::HashMap;

use crate::config::{MAX_STRING_LITERAL_LENGTH, MAX_TOKEN_COUNT, MAX_TOKEN_LENGTH};
use crate::pool::PoolRef;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    OpenParen,
    CloseParen,
    OpenBrace,
    CloseBrace,
    OpenBracket,
    CloseBracket,
    Semicolon,
    Comma,

    Add,
    Sub,
    Mul,
    Div,
    Not,
    BinaryNot,
    Assign,
    RefAssign,
    Eq,
    Neq,
    Increment,
    Decrement,
    Ge,
    Le,
    Gt,
    Lt,
    And,
    Or,

    IntLiteral(i64),
    FloatLiteral(f64),
    StringLiteral(String),
    Identifier(String),

    Function,
    Var,
    Return,
    Break,
    Continue,
    Dbgout,
    If,
    Else,
    While,
    Do,
    For,

    Eof,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::OpenParen => "(",
            TokenKind::CloseParen => ")",
            TokenKind::OpenBrace => "{",
            TokenKind::CloseBrace => "}",
            TokenKind::OpenBracket => "[",
            TokenKind::CloseBracket => "]",
            TokenKind::Semicolon => ";",
            TokenKind::Comma => ",",
            TokenKind::Add => "+",
            TokenKind::Sub => "-",
            TokenKind::Mul => "*",
            TokenKind::Div => "/",
            TokenKind::Not => "!",
            TokenKind::BinaryNot => "~",
            TokenKind::Assign => "=",
            TokenKind::RefAssign => ":=",
            TokenKind::Eq => "==",
            TokenKind::Neq => "!=",
            TokenKind::Increment => "++",
            TokenKind::Decrement => "--",
            TokenKind::Ge => ">=",
            TokenKind::Le => "<=",
            TokenKind::Gt => ">",
            TokenKind::Lt => "<",
            TokenKind::And => "&&",
            TokenKind::Or => "||",
            TokenKind::IntLiteral(_) => "<int>",
            TokenKind::FloatLiteral(_) => "<float>",
            TokenKind::StringLiteral(_) => "<string>",
            TokenKind::Identifier(_) => "<identifier>",
            TokenKind::Function => "function",
            TokenKind::Var => "var",
            TokenKind::Return => "return",
            TokenKind::Break => "break",
            TokenKind::Continue => "continue",
            TokenKind::Dbgout => "dbgout",
            TokenKind::If => "if",
            TokenKind::Else => "else",
            TokenKind::While => "while",
            TokenKind::Do => "do",
            TokenKind::For => "for",
            TokenKind::Eof => "<eof>",
        }
    }
}

lazy_static! {
    static ref KEYWORDS: HashMap<&'static str, TokenKind> = {
        let mut m = HashMap::new();
        m.insert("function", TokenKind::Function);
        m.insert("var", TokenKind::Var);
        m.insert("return", TokenKind::Return);
        m.insert("break", TokenKind::Break);
        m.insert("continue", TokenKind::Continue);
        m.insert("dbgout", TokenKind::Dbgout);
        m.insert("if", TokenKind::If);
        m.insert("else", TokenKind::Else);
        m.insert("while", TokenKind::While);
        m.insert("do", TokenKind::Do);
        m.insert("for", TokenKind::For);
        m
    };
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub file: PoolRef,
    pub line: u32,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct LexError {
    pub message: String,
    pub line: u32,
}

pub fn lex(src: &str, file: PoolRef) -> Result<Vec<Token>, LexError> {
    let chars: Vec<char> = src.chars().collect();
    let mut pos = 0usize;
    let mut line = 1u32;
    let mut tokens = Vec::new();

    macro_rules! push {
        ($kind:expr) => {
            tokens.push(Token {
                kind: $kind,
                file: file.clone(),
                line,
            })
        };
    }

    while pos < chars.len() {
        if tokens.len() > MAX_TOKEN_COUNT {
            return Err(LexError {
                message: "token count exceeds configured maximum".into(),
                line,
            });
        }

        let c = chars[pos];

        if c == '\n' {
            line += 1;
            pos += 1;
            continue;
        }
        if c.is_whitespace() {
            pos += 1;
            continue;
        }
        if c == '/' && chars.get(pos + 1) == Some(&'/') {
            while pos < chars.len() && chars[pos] != '\n' {
                pos += 1;
            }
            continue;
        }

        if c.is_ascii_digit() {
            let start = pos;
            let mut is_float = false;
            while pos < chars.len() && (chars[pos].is_ascii_digit() || (chars[pos] == '.' && !is_float)) {
                if chars[pos] == '.' {
                    is_float = true;
                }
                pos += 1;
            }
            let text: String = chars[start..pos].iter().collect();
            if text.len() > MAX_TOKEN_LENGTH {
                return Err(LexError {
                    message: "numeric token exceeds configured maximum length".into(),
                    line,
                });
            }
            if is_float {
                let v: f64 = text.parse().map_err(|_| LexError {
                    message: format!("malformed float literal: {text}"),
                    line,
                })?;
                push!(TokenKind::FloatLiteral(v));
            } else {
                let v: i64 = text.parse().map_err(|_| LexError {
                    message: format!("malformed integer literal: {text}"),
                    line,
                })?;
                push!(TokenKind::IntLiteral(v));
            }
            continue;
        }

        if c.is_alphabetic() || c == '_' {
            let start = pos;
            while pos < chars.len() && (chars[pos].is_alphanumeric() || chars[pos] == '_') {
                pos += 1;
            }
            let text: String = chars[start..pos].iter().collect();
            if text.len() > MAX_TOKEN_LENGTH {
                return Err(LexError {
                    message: "identifier exceeds configured maximum length".into(),
                    line,
                });
            }
            match KEYWORDS.get(text.as_str()) {
                Some(kw) => push!(kw.clone()),
                None => push!(TokenKind::Identifier(text)),
            }
            continue;
        }

        if c == '"' {
            pos += 1;
            let mut s = String::new();
            loop {
                if pos >= chars.len() {
                    return Err(LexError {
                        message: "unterminated string literal".into(),
                        line,
                    });
                }
                let ch = chars[pos];
                if ch == '"' {
                    pos += 1;
                    break;
                }
                if ch == '\\' {
                    pos += 1;
                    let esc = chars.get(pos).copied().ok_or(LexError {
                        message: "unterminated string literal".into(),
                        line,
                    })?;
                    s.push(match esc {
                        '"' => '"',
                        '\\' => '\\',
                        'n' => '\n',
                        'r' => '\r',
                        other => other,
                    });
                    pos += 1;
                    continue;
                }
                if ch == '\n' {
                    return Err(LexError {
                        message: "unterminated string literal".into(),
                        line,
                    });
                }
                s.push(ch);
                pos += 1;
                if s.len() > MAX_STRING_LITERAL_LENGTH {
                    return Err(LexError {
                        message: "string literal exceeds configured maximum length".into(),
                        line,
                    });
                }
            }
            // Adjacent string literals concatenate, C-style.
            if let Some(Token {
                kind: TokenKind::StringLiteral(prev),
                ..
            }) = tokens.last_mut()
            {
                prev.push_str(&s);
            } else {
                push!(TokenKind::StringLiteral(s));
            }
            continue;
        }

        macro_rules! two_char {
            ($next:expr, $kind:expr) => {
                if chars.get(pos + 1) == Some(&$next) {
                    push!($kind);
                    pos += 2;
                    continue;
                }
            };
        }

        match c {
            '(' => {
                push!(TokenKind::OpenParen);
                pos += 1;
            }
            ')' => {
                push!(TokenKind::CloseParen);
                pos += 1;
            }
            '{' => {
                push!(TokenKind::OpenBrace);
                pos += 1;
            }
            '}' => {
                push!(TokenKind::CloseBrace);
                pos += 1;
            }
            '[' => {
                push!(TokenKind::OpenBracket);
                pos += 1;
            }
            ']' => {
                push!(TokenKind::CloseBracket);
                pos += 1;
            }
            ';' => {
                push!(TokenKind::Semicolon);
                pos += 1;
            }
            ',' => {
                push!(TokenKind::Comma);
                pos += 1;
            }
            ':' => {
                two_char!('=', TokenKind::RefAssign);
                return Err(LexError {
                    message: "unexpected character: ':'".into(),
                    line,
                });
            }
            '=' => {
                two_char!('=', TokenKind::Eq);
                push!(TokenKind::Assign);
                pos += 1;
            }
            '!' => {
                two_char!('=', TokenKind::Neq);
                push!(TokenKind::Not);
                pos += 1;
            }
            '+' => {
                two_char!('+', TokenKind::Increment);
                push!(TokenKind::Add);
                pos += 1;
            }
            '-' => {
                two_char!('-', TokenKind::Decrement);
                push!(TokenKind::Sub);
                pos += 1;
            }
            '*' => {
                push!(TokenKind::Mul);
                pos += 1;
            }
            '/' => {
                push!(TokenKind::Div);
                pos += 1;
            }
            '~' => {
                push!(TokenKind::BinaryNot);
                pos += 1;
            }
            '>' => {
                two_char!('=', TokenKind::Ge);
                push!(TokenKind::Gt);
                pos += 1;
            }
            '<' => {
                two_char!('=', TokenKind::Le);
                push!(TokenKind::Lt);
                pos += 1;
            }
            '&' => {
                two_char!('&', TokenKind::And);
                return Err(LexError {
                    message: "unexpected character: '&'".into(),
                    line,
                });
            }
            '|' => {
                two_char!('|', TokenKind::Or);
                return Err(LexError {
                    message: "unexpected character: '|'".into(),
                    line,
                });
            }
            other => {
                return Err(LexError {
                    message: format!("unexpected character: '{other}'"),
                    line,
                });
            }
        }
    }

    tokens.push(Token {
        kind: TokenKind::Eof,
        file,
        line,
    });
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::StringPool;

    fn toks(src: &str) -> Vec<TokenKind> {
        let pool = StringPool::new();
        lex(src, pool.get_or_add("test.derp"))
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn parens_are_distinct() {
        let t = toks("()");
        assert_eq!(t[0], TokenKind::OpenParen);
        assert_eq!(t[1], TokenKind::CloseParen);
    }

    #[test]
    fn adjacent_strings_concatenate() {
        let t = toks("\"foo\" \"bar\"");
        assert_eq!(t[0], TokenKind::StringLiteral("foobar".into()));
    }

    #[test]
    fn keyword_beats_identifier() {
        let t = toks("if ifx");
        assert_eq!(t[0], TokenKind::If);
        assert_eq!(t[1], TokenKind::Identifier("ifx".into()));
    }

    #[test]
    fn number_forms() {
        let t = toks("3 3.5");
        assert_eq!(t[0], TokenKind::IntLiteral(3));
        assert_eq!(t[1], TokenKind::FloatLiteral(3.5));
    }

    #[test]
    fn two_char_operators() {
        let t = toks(":= == != ++ -- >= <= && ||");
        assert_eq!(
            t,
            vec![
                TokenKind::RefAssign,
                TokenKind::Eq,
                TokenKind::Neq,
                TokenKind::Increment,
                TokenKind::Decrement,
                TokenKind::Ge,
                TokenKind::Le,
                TokenKind::And,
                TokenKind::Or,
            ]
        );
    }

    #[test]
    fn line_comment_to_eol() {
        let t = toks("1; // comment\n2;");
        assert_eq!(t[0], TokenKind::IntLiteral(1));
        assert_eq!(t[2], TokenKind::IntLiteral(2));
    }
}
