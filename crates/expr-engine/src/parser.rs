//! Recursive-descent parser producing the AST in `ast.rs`.

use crate::ast::{BinOp, Expr, Program, Stmt};
use crate::lexer::{Span, SpannedToken, Token};

#[derive(Debug, Clone, thiserror::Error, PartialEq)]
#[error("{span}: {message}")]
pub struct ParseError {
    pub span: Span,
    pub message: String,
}

struct Parser {
    tokens: Vec<SpannedToken>,
    pos: usize,
}

pub fn parse(tokens: Vec<SpannedToken>) -> Result<Program, ParseError> {
    let mut parser = Parser { tokens, pos: 0 };
    parser.parse_program()
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos].token
    }

    fn span(&self) -> Span {
        self.tokens[self.pos].span
    }

    fn advance(&mut self) -> SpannedToken {
        let t = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        t
    }

    fn err(&self, message: impl Into<String>) -> ParseError {
        ParseError { span: self.span(), message: message.into() }
    }

    fn expect(&mut self, tok: &Token, what: &str) -> Result<(), ParseError> {
        if self.peek() == tok {
            self.advance();
            Ok(())
        } else {
            Err(self.err(format!("expected {what}, found {:?}", self.peek())))
        }
    }

    fn skip_semis(&mut self) {
        while matches!(self.peek(), Token::Semi) {
            self.advance();
        }
    }

    fn parse_program(&mut self) -> Result<Program, ParseError> {
        let mut statements = Vec::new();
        self.skip_semis();
        while !matches!(self.peek(), Token::Eof) {
            statements.push(self.parse_stmt()?);
            if !matches!(self.peek(), Token::Eof) {
                if !matches!(self.peek(), Token::Semi) {
                    return Err(self.err(format!(
                        "expected ';' or newline between statements, found {:?}",
                        self.peek()
                    )));
                }
                self.skip_semis();
            }
        }
        if statements.is_empty() {
            return Err(self.err("empty program"));
        }
        Ok(Program { statements })
    }

    fn parse_stmt(&mut self) -> Result<Stmt, ParseError> {
        // `name = expr` vs a bare expression: only an Ident immediately
        // followed by '=' (not '==') is an assignment.
        if let Token::Ident(name) = self.peek().clone() {
            if matches!(self.tokens.get(self.pos + 1).map(|t| &t.token), Some(Token::Assign)) {
                let span = self.span();
                self.advance(); // name
                self.advance(); // '='
                let value = self.parse_expr()?;
                return Ok(Stmt::Assign { name, value, span });
            }
        }
        Ok(Stmt::Expr(self.parse_expr()?))
    }

    fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_xor()?;
        while matches!(self.peek(), Token::Or) {
            let span = self.span();
            self.advance();
            let rhs = self.parse_xor()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs), span);
        }
        Ok(lhs)
    }

    fn parse_xor(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_and()?;
        while matches!(self.peek(), Token::Xor) {
            let span = self.span();
            self.advance();
            let rhs = self.parse_and()?;
            lhs = Expr::Xor(Box::new(lhs), Box::new(rhs), span);
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_comparison()?;
        while matches!(self.peek(), Token::And) {
            let span = self.span();
            self.advance();
            let rhs = self.parse_comparison()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs), span);
        }
        Ok(lhs)
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Token::Gt => BinOp::Gt,
                Token::Lt => BinOp::Lt,
                Token::Ge => BinOp::Ge,
                Token::Le => BinOp::Le,
                Token::EqEq => BinOp::Eq,
                Token::NotEq => BinOp::Ne,
                _ => break,
            };
            let span = self.span();
            self.advance();
            let rhs = self.parse_additive()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs), span);
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinOp::Add,
                Token::Minus => BinOp::Sub,
                _ => break,
            };
            let span = self.span();
            self.advance();
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs), span);
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinOp::Mul,
                Token::Slash => BinOp::Div,
                _ => break,
            };
            let span = self.span();
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs), span);
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        if matches!(self.peek(), Token::Minus) {
            let span = self.span();
            self.advance();
            let operand = self.parse_unary()?;
            return Ok(Expr::Neg(Box::new(operand), span));
        }
        self.parse_power()
    }

    fn parse_power(&mut self) -> Result<Expr, ParseError> {
        let base = self.parse_primary()?;
        if matches!(self.peek(), Token::Caret) {
            let span = self.span();
            self.advance();
            let exponent = self.parse_unary()?; // right-associative
            return Ok(Expr::Binary(BinOp::Pow, Box::new(base), Box::new(exponent), span));
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let span = self.span();
        match self.peek().clone() {
            Token::Number(n) => {
                self.advance();
                Ok(Expr::Number(n))
            }
            Token::Null => {
                self.advance();
                Ok(Expr::Null)
            }
            Token::ItemRef(n) => {
                self.advance();
                Ok(Expr::ItemRef(n, span))
            }
            Token::LParen => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect(&Token::RParen, "')'")?;
                Ok(inner)
            }
            Token::If => self.parse_if(),
            Token::Ident(name) => {
                self.advance();
                if matches!(self.peek(), Token::LParen) {
                    self.advance();
                    let mut args = Vec::new();
                    if !matches!(self.peek(), Token::RParen) {
                        args.push(self.parse_expr()?);
                        while matches!(self.peek(), Token::Comma) {
                            self.advance();
                            args.push(self.parse_expr()?);
                        }
                    }
                    self.expect(&Token::RParen, "')'")?;
                    Ok(Expr::Call(name, args, span))
                } else {
                    Ok(Expr::Var(name, span))
                }
            }
            other => Err(self.err(format!("unexpected token {other:?}"))),
        }
    }

    fn parse_if(&mut self) -> Result<Expr, ParseError> {
        let span = self.span();
        self.expect(&Token::If, "'if'")?;
        let mut arms = Vec::new();
        let cond = self.parse_expr()?;
        self.expect(&Token::Then, "'then'")?;
        let then_branch = self.parse_expr()?;
        arms.push((cond, then_branch));
        loop {
            match self.peek() {
                Token::Elif => {
                    self.advance();
                    let cond = self.parse_expr()?;
                    self.expect(&Token::Then, "'then'")?;
                    let branch = self.parse_expr()?;
                    arms.push((cond, branch));
                }
                Token::Else => {
                    self.advance();
                    let else_branch = self.parse_expr()?;
                    return Ok(Expr::If { arms, else_branch: Box::new(else_branch), span });
                }
                other => return Err(self.err(format!("expected 'elif' or 'else', found {other:?}"))),
            }
        }
    }
}
