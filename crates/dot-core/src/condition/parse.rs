//! Lexer and recursive-descent parser for job conditions.
//!
//! Grammar (lowest to highest precedence):
//!
//! ```text
//! expr    := or
//! or      := and (("||" | "or") and)*
//! and     := unary (("&&" | "and") unary)*
//! unary   := ("!" | "not") unary | cmp
//! cmp     := primary (("==" | "!=" | "<" | "<=" | ">" | ">=") primary)?
//! primary := "-" primary | "true" | "false" | INT | FLOAT | STRING | IDENT | "(" expr ")"
//! ```

use dot_model::VarValue;

use super::ConditionError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Ident(String),
    Lit(VarValue),
    LParen,
    RParen,
    And,
    Or,
    Not,
    Minus,
    Cmp(CmpOp),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    pub(crate) fn symbol(self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LogicOp {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Lit(VarValue),
    Var(String),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    Logic(LogicOp, Box<Expr>, Box<Expr>),
    Cmp(CmpOp, Box<Expr>, Box<Expr>),
}

pub(crate) fn parse(src: &str) -> Result<Expr, ConditionError> {
    let tokens = lex(src)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.or()?;
    match parser.tokens.get(parser.pos) {
        None => Ok(expr),
        Some((at, tok)) => Err(ConditionError::Unexpected {
            at: *at,
            found: format!("{tok:?}"),
        }),
    }
}

fn lex(src: &str) -> Result<Vec<(usize, Token)>, ConditionError> {
    let mut out = Vec::new();
    let mut chars = src.char_indices().peekable();

    while let Some(&(at, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        let tok = match c {
            '(' => {
                chars.next();
                Token::LParen
            }
            ')' => {
                chars.next();
                Token::RParen
            }
            '-' => {
                chars.next();
                Token::Minus
            }
            '&' | '|' => {
                chars.next();
                match chars.next() {
                    Some((_, n)) if n == c => {}
                    _ => return Err(ConditionError::Lex { at, found: c }),
                }
                if c == '&' { Token::And } else { Token::Or }
            }
            '=' | '!' | '<' | '>' => {
                chars.next();
                let eq = matches!(chars.peek(), Some((_, '=')));
                if eq {
                    chars.next();
                }
                match (c, eq) {
                    ('=', true) => Token::Cmp(CmpOp::Eq),
                    ('=', false) => return Err(ConditionError::Lex { at, found: c }),
                    ('!', true) => Token::Cmp(CmpOp::Ne),
                    ('!', false) => Token::Not,
                    ('<', true) => Token::Cmp(CmpOp::Le),
                    ('<', false) => Token::Cmp(CmpOp::Lt),
                    ('>', true) => Token::Cmp(CmpOp::Ge),
                    _ => Token::Cmp(CmpOp::Gt),
                }
            }
            '"' | '\'' => {
                chars.next();
                Token::Lit(VarValue::Str(lex_string(&mut chars, c, at)?))
            }
            c if c.is_ascii_digit() => {
                let mut text = String::new();
                while let Some(&(_, d)) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' || d == '_' {
                        if d != '_' {
                            text.push(d);
                        }
                        chars.next();
                    } else {
                        break;
                    }
                }
                lex_number(&text, at)?
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&(_, d)) = chars.peek() {
                    if d.is_ascii_alphanumeric() || d == '_' {
                        ident.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                match ident.as_str() {
                    "true" => Token::Lit(VarValue::Bool(true)),
                    "false" => Token::Lit(VarValue::Bool(false)),
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    _ => Token::Ident(ident),
                }
            }
            other => return Err(ConditionError::Lex { at, found: other }),
        };
        out.push((at, tok));
    }
    Ok(out)
}

fn lex_string(
    chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>,
    quote: char,
    start: usize,
) -> Result<String, ConditionError> {
    let mut s = String::new();
    loop {
        match chars.next() {
            None => return Err(ConditionError::UnterminatedString { at: start }),
            Some((_, c)) if c == quote => return Ok(s),
            Some((_, '\\')) => match chars.next() {
                Some((_, 'n')) => s.push('\n'),
                Some((_, 't')) => s.push('\t'),
                Some((_, c)) => s.push(c),
                None => return Err(ConditionError::UnterminatedString { at: start }),
            },
            Some((_, c)) => s.push(c),
        }
    }
}

fn lex_number(text: &str, at: usize) -> Result<Token, ConditionError> {
    let invalid = || ConditionError::InvalidNumber {
        at,
        text: text.to_string(),
    };
    if text.contains('.') {
        text.parse::<f64>()
            .map(|x| Token::Lit(VarValue::Float(x)))
            .map_err(|_| invalid())
    } else {
        text.parse::<i64>()
            .map(|i| Token::Lit(VarValue::Int(i)))
            .map_err(|_| invalid())
    }
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn next(&mut self) -> Result<(usize, Token), ConditionError> {
        let tok = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or(ConditionError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(tok)
    }

    fn or(&mut self) -> Result<Expr, ConditionError> {
        let mut lhs = self.and()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let rhs = self.and()?;
            lhs = Expr::Logic(LogicOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn and(&mut self) -> Result<Expr, ConditionError> {
        let mut lhs = self.unary()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = Expr::Logic(LogicOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, ConditionError> {
        match self.peek() {
            Some(Token::Not) => {
                self.pos += 1;
                Ok(Expr::Not(Box::new(self.unary()?)))
            }
            _ => self.cmp(),
        }
    }

    fn cmp(&mut self) -> Result<Expr, ConditionError> {
        let lhs = self.primary()?;
        if let Some(Token::Cmp(op)) = self.peek() {
            let op = *op;
            self.pos += 1;
            let rhs = self.primary()?;
            return Ok(Expr::Cmp(op, Box::new(lhs), Box::new(rhs)));
        }
        Ok(lhs)
    }

    fn primary(&mut self) -> Result<Expr, ConditionError> {
        let (at, tok) = self.next()?;
        match tok {
            Token::Lit(v) => Ok(Expr::Lit(v)),
            Token::Ident(name) => Ok(Expr::Var(name)),
            Token::Minus => Ok(Expr::Neg(Box::new(self.primary()?))),
            Token::LParen => {
                let inner = self.or()?;
                match self.next()? {
                    (_, Token::RParen) => Ok(inner),
                    (at, tok) => Err(ConditionError::Unexpected {
                        at,
                        found: format!("{tok:?}"),
                    }),
                }
            }
            other => Err(ConditionError::Unexpected {
                at,
                found: format!("{other:?}"),
            }),
        }
    }
}
