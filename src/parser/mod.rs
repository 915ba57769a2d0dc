//! Token stream to `ExecNode` tree.
//!
//! Statements are recursive descent (`parse_block`/`parse_statement`,
//! dispatching on the leading token); expressions are precedence
//! climbing over the numeric table from the original shift-reduce
//! parser (see `parse_expr`). Parenthesized subexpressions recurse;
//! postfix forms (`++`, `--`, call, index) reduce immediately against
//! whatever value is on top, exactly as the original describes it.

pub mod lexer;

use std::rc::Rc;

use thiserror::Error;

use crate::ast::{ExecNode, Literal, Op};
use crate::config::MAX_PARSER_DEPTH;
use crate::pool::{PoolRef, StringPool};
use lexer::{lex, Token, TokenKind};

#[derive(Debug, Clone)]
pub struct ParseError {
    pub message: String,
    pub line: u32,
    pub file: PoolRef,
}

#[derive(Debug, Clone, Error)]
#[error("{file}:{line}: error: {message}")]
pub struct ParseException {
    pub message: String,
    pub line: u32,
    pub file: String,
}

impl From<ParseError> for ParseException {
    fn from(e: ParseError) -> Self {
        ParseException {
            message: e.message,
            line: e.line,
            file: e.file.as_str().to_string(),
        }
    }
}

fn precedence(kind: &TokenKind) -> Option<u8> {
    use TokenKind::*;
    match kind {
        Assign | RefAssign => Some(2),
        And | Or => Some(3),
        Eq | Neq => Some(4),
        Add | Sub => Some(5),
        Mul | Div => Some(6),
        Gt | Lt | Ge | Le => Some(10),
        _ => None,
    }
}

fn binop(kind: &TokenKind) -> Option<Op> {
    use TokenKind::*;
    match kind {
        Assign => Some(Op::Assign),
        RefAssign => Some(Op::RefAssign),
        And => Some(Op::And),
        Or => Some(Op::Or),
        Eq => Some(Op::Eq),
        Neq => Some(Op::Neq),
        Add => Some(Op::Add),
        Sub => Some(Op::Sub),
        Mul => Some(Op::Mul),
        Div => Some(Op::Div),
        Gt => Some(Op::Gt),
        Lt => Some(Op::Lt),
        Ge => Some(Op::Ge),
        Le => Some(Op::Le),
        _ => None,
    }
}

/// Prefix-unary precedence for `!`/`~`. Notably *lower* (looser) than
/// the relational level (10): a relational comparison binds tighter
/// than a leading `!`/`~`, matching the original's numeric table.
const PREFIX_PRECEDENCE: u8 = 9;

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn advance(&mut self) -> Token {
        let t = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, kind: &TokenKind) -> Result<Token, ParseError> {
        if std::mem::discriminant(&self.peek().kind) == std::mem::discriminant(kind) {
            Ok(self.advance())
        } else {
            let tok = self.peek().clone();
            Err(ParseError {
                message: format!("expected '{}', got '{}'", kind.as_str(), tok.kind.as_str()),
                line: tok.line,
                file: tok.file,
            })
        }
    }

    fn enter(&mut self) -> Result<(), ParseError> {
        self.depth += 1;
        if self.depth > MAX_PARSER_DEPTH {
            let tok = self.peek().clone();
            return Err(ParseError {
                message: "parser recursion depth exceeded".into(),
                line: tok.line,
                file: tok.file,
            });
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    // -- statements --

    fn parse_block_stmts(&mut self, terminator: Option<&TokenKind>) -> Result<Vec<ExecNode>, ParseError> {
        let mut stmts = Vec::new();
        loop {
            if let Some(term) = terminator {
                if std::mem::discriminant(&self.peek().kind) == std::mem::discriminant(term) {
                    break;
                }
            } else if matches!(self.peek().kind, TokenKind::Eof) {
                break;
            }
            stmts.push(self.parse_statement()?);
        }
        Ok(stmts)
    }

    fn parse_block(&mut self) -> Result<ExecNode, ParseError> {
        self.enter()?;
        let tok = self.expect(&TokenKind::OpenBrace)?;
        let stmts = self.parse_block_stmts(Some(&TokenKind::CloseBrace))?;
        self.expect(&TokenKind::CloseBrace)?;
        self.leave();
        Ok(ExecNode::new(Op::Block, tok.file, tok.line).with_children(stmts))
    }

    fn parse_statement(&mut self) -> Result<ExecNode, ParseError> {
        self.enter()?;
        let tok = self.peek().clone();
        let node = match &tok.kind {
            TokenKind::OpenBrace => self.parse_block()?,
            TokenKind::If => self.parse_if()?,
            TokenKind::While => self.parse_while()?,
            TokenKind::Do => self.parse_do_while()?,
            TokenKind::For => self.parse_for()?,
            TokenKind::Return => {
                self.advance();
                let expr = self.parse_expr(0)?;
                self.expect(&TokenKind::Semicolon)?;
                ExecNode::new(Op::Return, tok.file, tok.line).with_children(vec![expr])
            }
            TokenKind::Break => {
                self.advance();
                self.expect(&TokenKind::Semicolon)?;
                ExecNode::new(Op::Break, tok.file, tok.line)
            }
            TokenKind::Continue => {
                self.advance();
                self.expect(&TokenKind::Semicolon)?;
                ExecNode::new(Op::Continue, tok.file, tok.line)
            }
            TokenKind::Dbgout => {
                self.advance();
                let expr = self.parse_expr(0)?;
                self.expect(&TokenKind::Semicolon)?;
                ExecNode::new(Op::DebugPrint, tok.file, tok.line).with_children(vec![expr])
            }
            _ => {
                let expr = self.parse_expr(0)?;
                self.expect(&TokenKind::Semicolon)?;
                expr
            }
        };
        self.leave();
        Ok(node)
    }

    fn parse_if(&mut self) -> Result<ExecNode, ParseError> {
        let tok = self.expect(&TokenKind::If)?;
        self.expect(&TokenKind::OpenParen)?;
        let cond = self.parse_expr(0)?;
        self.expect(&TokenKind::CloseParen)?;
        let then_branch = self.parse_statement()?;
        let else_branch = if matches!(self.peek().kind, TokenKind::Else) {
            self.advance();
            Some(self.parse_statement()?)
        } else {
            None
        };
        let mut children = vec![cond, then_branch];
        if let Some(e) = else_branch {
            children.push(e);
        }
        Ok(ExecNode::new(Op::IfElse, tok.file, tok.line).with_children(children))
    }

    /// The uniform loop node's five slots: `[action, pre_condition,
    /// post_condition, init, iterate]`. `for`'s condition goes in the
    /// *pre*-condition slot here — the original source's parser places
    /// it in the post-condition slot instead, which would make `for`
    /// check its condition after the body runs once, contradicting
    /// standard C-style `for` semantics. Fixed here; see DESIGN.md.
    fn parse_while(&mut self) -> Result<ExecNode, ParseError> {
        let tok = self.expect(&TokenKind::While)?;
        self.expect(&TokenKind::OpenParen)?;
        let cond = self.parse_expr(0)?;
        self.expect(&TokenKind::CloseParen)?;
        let action = self.parse_statement()?;
        Ok(loop_node(tok, Some(action), Some(cond), None, None, None))
    }

    fn parse_do_while(&mut self) -> Result<ExecNode, ParseError> {
        let tok = self.expect(&TokenKind::Do)?;
        let action = self.parse_statement()?;
        self.expect(&TokenKind::While)?;
        self.expect(&TokenKind::OpenParen)?;
        let cond = self.parse_expr(0)?;
        self.expect(&TokenKind::CloseParen)?;
        self.expect(&TokenKind::Semicolon)?;
        Ok(loop_node(tok, Some(action), None, Some(cond), None, None))
    }

    fn parse_for(&mut self) -> Result<ExecNode, ParseError> {
        let tok = self.expect(&TokenKind::For)?;
        self.expect(&TokenKind::OpenParen)?;
        let init = if matches!(self.peek().kind, TokenKind::Semicolon) {
            None
        } else {
            Some(self.parse_expr(0)?)
        };
        self.expect(&TokenKind::Semicolon)?;
        let cond = if matches!(self.peek().kind, TokenKind::Semicolon) {
            None
        } else {
            Some(self.parse_expr(0)?)
        };
        self.expect(&TokenKind::Semicolon)?;
        let iter = if matches!(self.peek().kind, TokenKind::CloseParen) {
            None
        } else {
            Some(self.parse_expr(0)?)
        };
        self.expect(&TokenKind::CloseParen)?;
        let action = self.parse_statement()?;
        Ok(loop_node(tok, Some(action), cond, None, init, iter))
    }

    // -- expressions --

    fn parse_expr(&mut self, min_prec: u8) -> Result<ExecNode, ParseError> {
        self.enter()?;
        let mut lhs = self.parse_unary()?;
        loop {
            let kind = self.peek().kind.clone();
            match precedence(&kind) {
                Some(prec) if prec >= min_prec => {
                    let tok = self.advance();
                    let op = binop(&kind).expect("precedence implies binop");
                    let rhs = self.parse_expr(prec + 1)?;
                    lhs = ExecNode::new(op, tok.file, tok.line).with_children(vec![lhs, rhs]);
                }
                _ => break,
            }
        }
        self.leave();
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<ExecNode, ParseError> {
        let tok = self.peek().clone();
        match tok.kind {
            TokenKind::Not | TokenKind::BinaryNot => {
                self.advance();
                let operand = self.parse_expr(PREFIX_PRECEDENCE)?;
                Ok(self.parse_postfix(
                    ExecNode::new(Op::Not, tok.file, tok.line).with_children(vec![operand]),
                )?)
            }
            TokenKind::Sub => {
                self.advance();
                let operand = self.parse_expr(PREFIX_PRECEDENCE)?;
                let zero = ExecNode::new(Op::Literal, tok.file.clone(), tok.line)
                    .with_literal(Literal::Int(0));
                Ok(self.parse_postfix(
                    ExecNode::new(Op::Sub, tok.file, tok.line).with_children(vec![zero, operand]),
                )?)
            }
            _ => {
                let primary = self.parse_primary()?;
                self.parse_postfix(primary)
            }
        }
    }

    fn parse_postfix(&mut self, mut value: ExecNode) -> Result<ExecNode, ParseError> {
        loop {
            let tok = self.peek().clone();
            match tok.kind {
                TokenKind::Increment => {
                    self.advance();
                    value = ExecNode::new(Op::Increment, tok.file, tok.line).with_children(vec![value]);
                }
                TokenKind::Decrement => {
                    self.advance();
                    value = ExecNode::new(Op::Decrement, tok.file, tok.line).with_children(vec![value]);
                }
                TokenKind::OpenParen => {
                    self.advance();
                    let mut children = vec![value];
                    if !matches!(self.peek().kind, TokenKind::CloseParen) {
                        children.push(self.parse_expr(0)?);
                        while matches!(self.peek().kind, TokenKind::Comma) {
                            self.advance();
                            children.push(self.parse_expr(0)?);
                        }
                    }
                    self.expect(&TokenKind::CloseParen)?;
                    value = ExecNode::new(Op::FunctionCall, tok.file, tok.line).with_children(children);
                }
                TokenKind::OpenBracket => {
                    self.advance();
                    let key = self.parse_expr(0)?;
                    self.expect(&TokenKind::CloseBracket)?;
                    value = ExecNode::new(Op::Index, tok.file, tok.line).with_children(vec![value, key]);
                }
                _ => break,
            }
        }
        Ok(value)
    }

    fn parse_primary(&mut self) -> Result<ExecNode, ParseError> {
        let tok = self.advance();
        match tok.kind {
            TokenKind::OpenParen => {
                let expr = self.parse_expr(0)?;
                self.expect(&TokenKind::CloseParen)?;
                Ok(expr)
            }
            TokenKind::IntLiteral(v) => {
                Ok(ExecNode::new(Op::Literal, tok.file, tok.line).with_literal(Literal::Int(v)))
            }
            TokenKind::FloatLiteral(v) => {
                Ok(ExecNode::new(Op::Literal, tok.file, tok.line).with_literal(Literal::Float(v)))
            }
            TokenKind::StringLiteral(v) => {
                Ok(ExecNode::new(Op::Literal, tok.file, tok.line).with_literal(Literal::String(v)))
            }
            TokenKind::Identifier(name) => {
                Ok(ExecNode::new(Op::VarLookup, tok.file, tok.line).with_literal(Literal::Ident(name)))
            }
            TokenKind::Var => {
                let name_tok = self.advance();
                match name_tok.kind {
                    TokenKind::Identifier(name) => Ok(ExecNode::new(Op::VariableDec, tok.file, tok.line)
                        .with_literal(Literal::Ident(name))),
                    other => Err(ParseError {
                        message: format!("expected identifier after 'var', got '{}'", other.as_str()),
                        line: name_tok.line,
                        file: name_tok.file,
                    }),
                }
            }
            TokenKind::Function => self.parse_function_literal(tok.file, tok.line),
            other => Err(ParseError {
                message: format!("expected value, got '{}'", other.as_str()),
                line: tok.line,
                file: tok.file,
            }),
        }
    }

    fn parse_function_literal(&mut self, file: PoolRef, line: u32) -> Result<ExecNode, ParseError> {
        self.expect(&TokenKind::OpenParen)?;
        let mut params = Vec::new();
        if !matches!(self.peek().kind, TokenKind::CloseParen) {
            loop {
                let tok = self.advance();
                match tok.kind {
                    TokenKind::Identifier(name) => params.push(name),
                    other => {
                        return Err(ParseError {
                            message: format!("expected parameter name, got '{}'", other.as_str()),
                            line: tok.line,
                            file: tok.file,
                        })
                    }
                }
                if matches!(self.peek().kind, TokenKind::Comma) {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        self.expect(&TokenKind::CloseParen)?;
        let body = self.parse_statement()?;
        Ok(ExecNode::new(Op::Literal, file, line).with_literal(Literal::Function(Rc::new(body), params)))
    }
}

fn loop_node(
    tok: Token,
    action: Option<ExecNode>,
    pre_condition: Option<ExecNode>,
    post_condition: Option<ExecNode>,
    init: Option<ExecNode>,
    iterate: Option<ExecNode>,
) -> ExecNode {
    let placeholder = |file: PoolRef, line: u32| ExecNode::new(Op::FreeBlock, file, line);
    let slot = |n: Option<ExecNode>| n.unwrap_or_else(|| placeholder(tok.file.clone(), tok.line));
    ExecNode::new(Op::Loop, tok.file.clone(), tok.line).with_children(vec![
        slot(action),
        slot(pre_condition),
        slot(post_condition),
        slot(init),
        slot(iterate),
    ])
}

/// Tokenizes and parses `src`, returning the root block node (an
/// implicit top-level function body). Equivalent to the original's
/// `derpParseText`: parses a block without requiring braces, then
/// checks every token was consumed.
pub fn parse(src: &str, pool: &StringPool, file_name: &str) -> Result<ExecNode, ParseException> {
    let file = pool.get_or_add(file_name);
    let tokens = lex(src, file.clone()).map_err(|e| ParseException {
        message: e.message,
        line: e.line,
        file: file_name.to_string(),
    })?;
    let mut parser = Parser::new(tokens);
    let stmts = parser
        .parse_block_stmts(None)
        .map_err(ParseException::from)?;
    if !matches!(parser.peek().kind, TokenKind::Eof) {
        let tok = parser.peek().clone();
        return Err(ParseException {
            message: format!("expected end of input, got '{}'", tok.kind.as_str()),
            line: tok.line,
            file: file_name.to_string(),
        });
    }
    Ok(ExecNode::new(Op::Block, file, 0).with_children(stmts))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_arithmetic_with_precedence() {
        let pool = StringPool::new();
        let root = parse("1 + 2 * 3;", &pool, "t.derp").unwrap();
        let top = &root.children[0];
        assert_eq!(top.op, Op::Add);
        assert_eq!(top.children[1].op, Op::Mul);
    }

    #[test]
    fn relational_binds_tighter_than_prefix_not() {
        let pool = StringPool::new();
        let root = parse("!a < b;", &pool, "t.derp").unwrap();
        let top = &root.children[0];
        assert_eq!(top.op, Op::Not);
        assert_eq!(top.children[0].op, Op::Lt);
    }

    #[test]
    fn for_condition_is_prechecked() {
        let pool = StringPool::new();
        let root = parse("for(i = 0; i < 10; ++i) {}", &pool, "t.derp").unwrap();
        let loop_n = &root.children[0];
        assert_eq!(loop_n.op, Op::Loop);
        assert_eq!(loop_n.children[1].op, Op::Lt);
    }

    #[test]
    fn postfix_call_and_index() {
        let pool = StringPool::new();
        let root = parse("f(1, 2)[0];", &pool, "t.derp").unwrap();
        let top = &root.children[0];
        assert_eq!(top.op, Op::Index);
        assert_eq!(top.children[0].op, Op::FunctionCall);
    }
}
