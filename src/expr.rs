//! Expression grammar.
//!
//! Directive values are parsed into a small typed AST by a recursive-descent
//! parser. The grammar covers literals (including array/object literals for
//! `x-state` initializers), member/index access, calls, arithmetic,
//! comparison, logic, ternary, assignment and postfix increment/decrement.
//! Nothing else: expressions cannot declare bindings, loop, or reach host
//! facilities that the scope does not expose.
//!
//! Errors carry a byte position into the original directive text so
//! diagnostics can point at the offending character.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
#[error("{message} at byte {pos}")]
pub struct ExprError {
    pub pos: usize,
    pub message: String,
}

impl ExprError {
    fn new(pos: usize, message: impl Into<String>) -> Self {
        Self {
            pos,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Set,
    AddAssign,
    SubAssign,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOp {
    Inc,
    Dec,
}

/// Assignable places: a scope key, a map member, or a list slot.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Ident(String),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    Ident(String),
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Call(Box<Expr>, Vec<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
    Assign(AssignOp, Target, Box<Expr>),
    Step(StepOp, Target),
}

// ═══════════════════════════════════════════════════════════════════════════════
// LEXER
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Number(f64),
    Str(String),
    Ident(String),
    Punct(&'static str),
    Eof,
}

#[derive(Debug, Clone)]
struct Token {
    tok: Tok,
    pos: usize,
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

fn lex(input: &str) -> Result<Vec<Token>, ExprError> {
    let mut tokens = Vec::new();
    let bytes: Vec<(usize, char)> = input.char_indices().collect();
    let mut i = 0;

    while i < bytes.len() {
        let (pos, c) = bytes[i];

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c.is_ascii_digit() {
            while i < bytes.len() && (bytes[i].1.is_ascii_digit() || bytes[i].1 == '.') {
                i += 1;
            }
            let end = if i < bytes.len() { bytes[i].0 } else { input.len() };
            let text = &input[pos..end];
            let n = text
                .parse::<f64>()
                .map_err(|_| ExprError::new(pos, format!("invalid number '{}'", text)))?;
            tokens.push(Token {
                tok: Tok::Number(n),
                pos,
            });
            continue;
        }

        if c == '"' || c == '\'' {
            let quote = c;
            let mut s = String::new();
            i += 1;
            loop {
                if i >= bytes.len() {
                    return Err(ExprError::new(pos, "unterminated string literal"));
                }
                let (_, ch) = bytes[i];
                if ch == quote {
                    i += 1;
                    break;
                }
                if ch == '\\' {
                    i += 1;
                    if i >= bytes.len() {
                        return Err(ExprError::new(pos, "unterminated string literal"));
                    }
                    s.push(match bytes[i].1 {
                        'n' => '\n',
                        'r' => '\r',
                        't' => '\t',
                        other => other,
                    });
                } else {
                    s.push(ch);
                }
                i += 1;
            }
            tokens.push(Token {
                tok: Tok::Str(s),
                pos,
            });
            continue;
        }

        if is_ident_start(c) {
            let mut j = i;
            while j < bytes.len() && is_ident_continue(bytes[j].1) {
                j += 1;
            }
            let end = if j < bytes.len() { bytes[j].0 } else { input.len() };
            tokens.push(Token {
                tok: Tok::Ident(input[pos..end].to_string()),
                pos,
            });
            i = j;
            continue;
        }

        // Multi-char punctuation first, longest match wins.
        let rest = &input[pos..];
        let punct = [
            "===", "!==", "==", "!=", "<=", ">=", "&&", "||", "++", "--", "+=", "-=", "?", ":",
            "(", ")", "[", "]", "{", "}", ",", ".", "+", "-", "*", "/", "%", "<", ">", "!", "=",
        ]
        .iter()
        .find(|p| rest.starts_with(**p));

        match punct {
            Some(p) => {
                // Normalize strict equality to the single comparison the
                // runtime supports.
                let p = match *p {
                    "===" => "==",
                    "!==" => "!=",
                    other => other,
                };
                tokens.push(Token { tok: Tok::Punct(p), pos });
                i += p.len().max(1);
                // Strict forms consumed one extra character.
                if rest.starts_with("===") || rest.starts_with("!==") {
                    i += 1;
                }
            }
            None => return Err(ExprError::new(pos, format!("unexpected character '{}'", c))),
        }
    }

    tokens.push(Token {
        tok: Tok::Eof,
        pos: input.len(),
    });
    Ok(tokens)
}

// ═══════════════════════════════════════════════════════════════════════════════
// PARSER
// ═══════════════════════════════════════════════════════════════════════════════

struct Parser {
    tokens: Vec<Token>,
    cursor: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.cursor]
    }

    fn bump(&mut self) -> Token {
        let t = self.tokens[self.cursor].clone();
        if self.cursor + 1 < self.tokens.len() {
            self.cursor += 1;
        }
        t
    }

    fn eat(&mut self, punct: &str) -> bool {
        if let Tok::Punct(p) = self.peek().tok {
            if p == punct {
                self.bump();
                return true;
            }
        }
        false
    }

    fn expect(&mut self, punct: &str) -> Result<(), ExprError> {
        if self.eat(punct) {
            Ok(())
        } else {
            let t = self.peek();
            Err(ExprError::new(t.pos, format!("expected '{}'", punct)))
        }
    }

    fn parse_expression(&mut self) -> Result<Expr, ExprError> {
        let lhs = self.parse_ternary()?;

        let op = match &self.peek().tok {
            Tok::Punct("=") => Some(AssignOp::Set),
            Tok::Punct("+=") => Some(AssignOp::AddAssign),
            Tok::Punct("-=") => Some(AssignOp::SubAssign),
            _ => None,
        };
        if let Some(op) = op {
            let pos = self.peek().pos;
            self.bump();
            let target = as_target(lhs)
                .ok_or_else(|| ExprError::new(pos, "invalid assignment target"))?;
            let rhs = self.parse_expression()?;
            return Ok(Expr::Assign(op, target, Box::new(rhs)));
        }

        Ok(lhs)
    }

    fn parse_ternary(&mut self) -> Result<Expr, ExprError> {
        let cond = self.parse_or()?;
        if self.eat("?") {
            let then = self.parse_expression()?;
            self.expect(":")?;
            let alt = self.parse_expression()?;
            return Ok(Expr::Ternary(Box::new(cond), Box::new(then), Box::new(alt)));
        }
        Ok(cond)
    }

    fn parse_or(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.parse_and()?;
        while self.eat("||") {
            let rhs = self.parse_and()?;
            lhs = Expr::Binary(BinaryOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.parse_equality()?;
        while self.eat("&&") {
            let rhs = self.parse_equality()?;
            lhs = Expr::Binary(BinaryOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_equality(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.parse_relational()?;
        loop {
            let op = match self.peek().tok {
                Tok::Punct("==") => BinaryOp::Eq,
                Tok::Punct("!=") => BinaryOp::Ne,
                _ => break,
            };
            self.bump();
            let rhs = self.parse_relational()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_relational(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.parse_additive()?;
        loop {
            let op = match self.peek().tok {
                Tok::Punct("<") => BinaryOp::Lt,
                Tok::Punct("<=") => BinaryOp::Le,
                Tok::Punct(">") => BinaryOp::Gt,
                Tok::Punct(">=") => BinaryOp::Ge,
                _ => break,
            };
            self.bump();
            let rhs = self.parse_additive()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek().tok {
                Tok::Punct("+") => BinaryOp::Add,
                Tok::Punct("-") => BinaryOp::Sub,
                _ => break,
            };
            self.bump();
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek().tok {
                Tok::Punct("*") => BinaryOp::Mul,
                Tok::Punct("/") => BinaryOp::Div,
                Tok::Punct("%") => BinaryOp::Rem,
                _ => break,
            };
            self.bump();
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ExprError> {
        if self.eat("!") {
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(self.parse_unary()?)));
        }
        if self.eat("-") {
            return Ok(Expr::Unary(UnaryOp::Neg, Box::new(self.parse_unary()?)));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, ExprError> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat(".") {
                let t = self.bump();
                match t.tok {
                    Tok::Ident(name) => expr = Expr::Member(Box::new(expr), name),
                    _ => return Err(ExprError::new(t.pos, "expected member name after '.'")),
                }
            } else if self.eat("[") {
                let index = self.parse_expression()?;
                self.expect("]")?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else if self.eat("(") {
                let mut args = Vec::new();
                if !self.eat(")") {
                    loop {
                        args.push(self.parse_expression()?);
                        if self.eat(")") {
                            break;
                        }
                        self.expect(",")?;
                    }
                }
                expr = Expr::Call(Box::new(expr), args);
            } else if self.peek().tok == Tok::Punct("++") || self.peek().tok == Tok::Punct("--") {
                let t = self.bump();
                let op = if t.tok == Tok::Punct("++") {
                    StepOp::Inc
                } else {
                    StepOp::Dec
                };
                let target = as_target(expr)
                    .ok_or_else(|| ExprError::new(t.pos, "invalid increment target"))?;
                return Ok(Expr::Step(op, target));
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, ExprError> {
        let t = self.bump();
        match t.tok {
            Tok::Number(n) => Ok(Expr::Number(n)),
            Tok::Str(s) => Ok(Expr::Str(s)),
            Tok::Ident(name) => match name.as_str() {
                "true" => Ok(Expr::Bool(true)),
                "false" => Ok(Expr::Bool(false)),
                "null" | "undefined" => Ok(Expr::Null),
                _ => Ok(Expr::Ident(name)),
            },
            Tok::Punct("(") => {
                let inner = self.parse_expression()?;
                self.expect(")")?;
                Ok(inner)
            }
            Tok::Punct("[") => {
                let mut items = Vec::new();
                if !self.eat("]") {
                    loop {
                        items.push(self.parse_expression()?);
                        if self.eat("]") {
                            break;
                        }
                        self.expect(",")?;
                    }
                }
                Ok(Expr::Array(items))
            }
            Tok::Punct("{") => {
                let mut entries = Vec::new();
                if !self.eat("}") {
                    loop {
                        let key_tok = self.bump();
                        let key = match key_tok.tok {
                            Tok::Ident(name) => name,
                            Tok::Str(s) => s,
                            _ => {
                                return Err(ExprError::new(key_tok.pos, "expected object key"))
                            }
                        };
                        self.expect(":")?;
                        let value = self.parse_expression()?;
                        entries.push((key, value));
                        if self.eat("}") {
                            break;
                        }
                        self.expect(",")?;
                    }
                }
                Ok(Expr::Object(entries))
            }
            Tok::Eof => Err(ExprError::new(t.pos, "unexpected end of expression")),
            Tok::Punct(p) => Err(ExprError::new(t.pos, format!("unexpected '{}'", p))),
        }
    }
}

fn as_target(expr: Expr) -> Option<Target> {
    match expr {
        Expr::Ident(name) => Some(Target::Ident(name)),
        Expr::Member(obj, name) => Some(Target::Member(obj, name)),
        Expr::Index(obj, index) => Some(Target::Index(obj, index)),
        _ => None,
    }
}

/// Parse a full expression; trailing input is an error.
pub fn parse(input: &str) -> Result<Expr, ExprError> {
    let tokens = lex(input)?;
    let mut parser = Parser { tokens, cursor: 0 };
    let expr = parser.parse_expression()?;
    match parser.peek().tok {
        Tok::Eof => Ok(expr),
        _ => Err(ExprError::new(
            parser.peek().pos,
            "unexpected trailing input",
        )),
    }
}

/// Parse the two-part loop grammar `<ident> in <expr>`.
pub fn parse_loop(input: &str) -> Result<(String, Expr), ExprError> {
    let tokens = lex(input)?;
    let mut parser = Parser { tokens, cursor: 0 };

    let alias_tok = parser.bump();
    let alias = match alias_tok.tok {
        Tok::Ident(name) if name != "in" => name,
        _ => return Err(ExprError::new(alias_tok.pos, "expected loop variable name")),
    };

    let in_tok = parser.bump();
    match in_tok.tok {
        Tok::Ident(kw) if kw == "in" => {}
        _ => return Err(ExprError::new(in_tok.pos, "expected 'in'")),
    }

    let source = parser.parse_expression()?;
    match parser.peek().tok {
        Tok::Eof => Ok((alias, source)),
        _ => Err(ExprError::new(
            parser.peek().pos,
            "unexpected trailing input",
        )),
    }
}
