//! Small numeric expression language for reactive pulse timing.
//!
//! Expressions see a fixed set of variables (see [`Scope`]) and nothing else:
//! no assignment, no I/O, no loops.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExprError {
    #[error("unexpected character '{0}' at {1}")]
    UnexpectedChar(char, usize),
    #[error("invalid number \"{0}\"")]
    InvalidNumber(String),
    #[error("unexpected {0}")]
    UnexpectedToken(String),
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("unknown function \"{0}\"")]
    UnknownFunction(String),
    #[error("{name} takes {expected} argument(s), got {got}")]
    Arity {
        name: String,
        expected: usize,
        got: usize,
    },
    #[error("unknown variable \"{0}\"")]
    UnknownVariable(String),
    #[error("result is not a finite number")]
    NonFinite,
    #[error("expression nests deeper than {0} levels")]
    TooDeep(usize),
}

/// Variables visible to an expression.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    /// Seconds since the current node was entered.
    pub elapsed: f64,
    pub density: f64,
    /// One uniform sample in `[0, 1)`, fixed for the whole evaluation.
    pub random: f64,
    /// Latest "post" value per participant identity.
    pub participants: Vec<(String, f64)>,
}

impl Scope {
    fn lookup(&self, name: &str) -> Option<f64> {
        match name {
            "elapsed" => Some(self.elapsed),
            "density" => Some(self.density),
            "random" => Some(self.random),
            _ => self
                .participants
                .iter()
                .find(|(id, _)| id == name)
                .map(|(_, v)| *v),
        }
    }
}

/// Anything that can turn a scope into a number. Implemented by the built-in
/// parser; another engine only has to implement this.
pub trait Evaluator: Send + Sync + fmt::Debug {
    fn evaluate(&self, scope: &Scope) -> Result<f64, ExprError>;
}

/// Parse `source` with the built-in engine.
pub fn compile(source: &str) -> Result<Arc<dyn Evaluator>, ExprError> {
    let tokens = lex(source)?;
    let mut parser = Parser::new(tokens);
    let (expr, _) = parser.parse_expr()?;
    if let Some(tok) = parser.peek() {
        return Err(ExprError::UnexpectedToken(tok.to_string()));
    }
    Ok(Arc::new(Expression {
        source: source.to_string(),
        root: expr,
    }))
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Num(f64),
    Id(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
    LParen,
    RParen,
    Comma,
}

impl fmt::Display for Tok {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tok::Num(n) => write!(f, "number {n}"),
            Tok::Id(id) => write!(f, "identifier \"{id}\""),
            Tok::Plus => f.write_str("'+'"),
            Tok::Minus => f.write_str("'-'"),
            Tok::Star => f.write_str("'*'"),
            Tok::Slash => f.write_str("'/'"),
            Tok::Percent => f.write_str("'%'"),
            Tok::Caret => f.write_str("'^'"),
            Tok::LParen => f.write_str("'('"),
            Tok::RParen => f.write_str("')'"),
            Tok::Comma => f.write_str("','"),
        }
    }
}

fn is_id_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_id(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Names that always mean a built-in, whatever participants are called.
pub const RESERVED: [&str; 5] = ["elapsed", "density", "random", "pi", "e"];

/// Whether `name` can be read as a participant variable in an expression.
pub fn is_variable_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(is_id_start) && chars.all(is_id) && !RESERVED.contains(&name)
}

fn lex(s: &str) -> Result<Vec<Tok>, ExprError> {
    let mut it = s.char_indices().peekable();
    let mut out = Vec::new();
    while let Some(&(pos, c)) = it.peek() {
        let single = match c {
            '+' => Some(Tok::Plus),
            '-' => Some(Tok::Minus),
            '*' => Some(Tok::Star),
            '/' => Some(Tok::Slash),
            '%' => Some(Tok::Percent),
            '^' => Some(Tok::Caret),
            '(' => Some(Tok::LParen),
            ')' => Some(Tok::RParen),
            ',' => Some(Tok::Comma),
            _ => None,
        };
        if let Some(tok) = single {
            it.next();
            out.push(tok);
            continue;
        }

        if c.is_whitespace() {
            it.next();
        } else if c.is_ascii_digit() || c == '.' {
            let mut num = String::new();
            while let Some(&(_, d)) = it.peek() {
                if d.is_ascii_digit() || d == '.' {
                    num.push(d);
                    it.next();
                } else {
                    break;
                }
            }
            let value = num
                .parse::<f64>()
                .map_err(|_| ExprError::InvalidNumber(num.clone()))?;
            out.push(Tok::Num(value));
        } else if is_id_start(c) {
            let mut id = String::new();
            while let Some(&(_, d)) = it.peek() {
                if is_id(d) {
                    id.push(d);
                    it.next();
                } else {
                    break;
                }
            }
            out.push(Tok::Id(id));
        } else {
            return Err(ExprError::UnexpectedChar(c, pos));
        }
    }
    Ok(out)
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Func {
    Abs,
    Sin,
    Cos,
    Tan,
    Sqrt,
    Exp,
    Ln,
    Log,
    Floor,
    Ceil,
    Round,
    Min,
    Max,
    Pow,
    Clamp,
}

impl Func {
    fn lookup(name: &str) -> Option<Self> {
        Some(match name {
            "abs" => Func::Abs,
            "sin" => Func::Sin,
            "cos" => Func::Cos,
            "tan" => Func::Tan,
            "sqrt" => Func::Sqrt,
            "exp" => Func::Exp,
            "ln" => Func::Ln,
            "log" => Func::Log,
            "floor" => Func::Floor,
            "ceil" => Func::Ceil,
            "round" => Func::Round,
            "min" => Func::Min,
            "max" => Func::Max,
            "pow" => Func::Pow,
            "clamp" => Func::Clamp,
            _ => return None,
        })
    }

    fn arity(self) -> usize {
        match self {
            Func::Min | Func::Max | Func::Pow => 2,
            Func::Clamp => 3,
            _ => 1,
        }
    }

    fn apply(self, a: &[f64]) -> f64 {
        match self {
            Func::Abs => a[0].abs(),
            Func::Sin => a[0].sin(),
            Func::Cos => a[0].cos(),
            Func::Tan => a[0].tan(),
            Func::Sqrt => a[0].sqrt(),
            Func::Exp => a[0].exp(),
            Func::Ln => a[0].ln(),
            Func::Log => a[0].log10(),
            Func::Floor => a[0].floor(),
            Func::Ceil => a[0].ceil(),
            Func::Round => a[0].round(),
            Func::Min => a[0].min(a[1]),
            Func::Max => a[0].max(a[1]),
            Func::Pow => a[0].powf(a[1]),
            Func::Clamp => a[0].max(a[1]).min(a[2]),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Num(f64),
    Var(String),
    Neg(Box<Node>),
    Bin(BinOp, Box<Node>, Box<Node>),
    Call(Func, Vec<Node>),
}

impl Node {
    fn eval(&self, scope: &Scope) -> Result<f64, ExprError> {
        Ok(match self {
            Node::Num(n) => *n,
            Node::Var(name) => scope
                .lookup(name)
                .ok_or_else(|| ExprError::UnknownVariable(name.clone()))?,
            Node::Neg(inner) => -inner.eval(scope)?,
            Node::Bin(op, l, r) => {
                let (l, r) = (l.eval(scope)?, r.eval(scope)?);
                match op {
                    BinOp::Add => l + r,
                    BinOp::Sub => l - r,
                    BinOp::Mul => l * r,
                    BinOp::Div => l / r,
                    BinOp::Rem => l % r,
                    BinOp::Pow => l.powf(r),
                }
            }
            Node::Call(func, args) => {
                let values = args
                    .iter()
                    .map(|a| a.eval(scope))
                    .collect::<Result<Vec<_>, _>>()?;
                func.apply(&values)
            }
        })
    }
}

/// Deepest nesting the parser accepts, and the deepest tree it will build.
/// Keeps both parsing and evaluation well inside a worker thread's stack.
pub const MAX_DEPTH: usize = 256;

struct Parser {
    tokens: Vec<Tok>,
    i: usize,
    nesting: usize,
}

/// A parsed subtree and its height.
type Parsed = (Node, usize);

fn deeper(depth: usize) -> Result<usize, ExprError> {
    let depth = depth + 1;
    if depth > MAX_DEPTH {
        return Err(ExprError::TooDeep(MAX_DEPTH));
    }
    Ok(depth)
}

impl Parser {
    fn new(tokens: Vec<Tok>) -> Self {
        Self {
            tokens,
            i: 0,
            nesting: 0,
        }
    }

    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.i)
    }

    fn bump(&mut self) -> Result<Tok, ExprError> {
        let tok = self
            .tokens
            .get(self.i)
            .cloned()
            .ok_or(ExprError::UnexpectedEnd)?;
        self.i += 1;
        Ok(tok)
    }

    fn expect(&mut self, want: Tok) -> Result<(), ExprError> {
        let got = self.bump()?;
        if got == want {
            Ok(())
        } else {
            Err(ExprError::UnexpectedToken(got.to_string()))
        }
    }

    fn parse_expr(&mut self) -> Result<Parsed, ExprError> {
        let (mut node, mut depth) = self.parse_mul()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Plus) => BinOp::Add,
                Some(Tok::Minus) => BinOp::Sub,
                _ => break,
            };
            self.i += 1;
            let (rhs, rhs_depth) = self.parse_mul()?;
            depth = deeper(depth.max(rhs_depth))?;
            node = Node::Bin(op, Box::new(node), Box::new(rhs));
        }
        Ok((node, depth))
    }

    fn parse_mul(&mut self) -> Result<Parsed, ExprError> {
        let (mut node, mut depth) = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Star) => BinOp::Mul,
                Some(Tok::Slash) => BinOp::Div,
                Some(Tok::Percent) => BinOp::Rem,
                _ => break,
            };
            self.i += 1;
            let (rhs, rhs_depth) = self.parse_unary()?;
            depth = deeper(depth.max(rhs_depth))?;
            node = Node::Bin(op, Box::new(node), Box::new(rhs));
        }
        Ok((node, depth))
    }

    // Every recursive path passes through here, so this is where nesting is counted.
    fn parse_unary(&mut self) -> Result<Parsed, ExprError> {
        self.nesting = deeper(self.nesting)?;
        let parsed = match self.peek() {
            Some(Tok::Minus) => {
                self.i += 1;
                let (inner, depth) = self.parse_unary()?;
                (Node::Neg(Box::new(inner)), deeper(depth)?)
            }
            Some(Tok::Plus) => {
                self.i += 1;
                self.parse_unary()?
            }
            _ => self.parse_pow()?,
        };
        self.nesting -= 1;
        Ok(parsed)
    }

    // Right associative, binds tighter than unary minus on its left.
    fn parse_pow(&mut self) -> Result<Parsed, ExprError> {
        let (base, base_depth) = self.parse_primary()?;
        if matches!(self.peek(), Some(Tok::Caret)) {
            self.i += 1;
            let (exponent, exp_depth) = self.parse_unary()?;
            let depth = deeper(base_depth.max(exp_depth))?;
            return Ok((
                Node::Bin(BinOp::Pow, Box::new(base), Box::new(exponent)),
                depth,
            ));
        }
        Ok((base, base_depth))
    }

    fn parse_primary(&mut self) -> Result<Parsed, ExprError> {
        match self.bump()? {
            Tok::Num(n) => Ok((Node::Num(n), 1)),
            Tok::LParen => {
                let inner = self.parse_expr()?;
                self.expect(Tok::RParen)?;
                Ok(inner)
            }
            Tok::Id(id) => {
                if matches!(self.peek(), Some(Tok::LParen)) {
                    self.i += 1;
                    return self.parse_call(id);
                }
                let node = match id.as_str() {
                    "pi" => Node::Num(std::f64::consts::PI),
                    "e" => Node::Num(std::f64::consts::E),
                    _ => Node::Var(id),
                };
                Ok((node, 1))
            }
            other => Err(ExprError::UnexpectedToken(other.to_string())),
        }
    }

    fn parse_call(&mut self, name: String) -> Result<Parsed, ExprError> {
        let func = Func::lookup(&name).ok_or_else(|| ExprError::UnknownFunction(name.clone()))?;
        let mut args = Vec::new();
        let mut depth = 0;
        if matches!(self.peek(), Some(Tok::RParen)) {
            self.i += 1;
        } else {
            loop {
                let (arg, arg_depth) = self.parse_expr()?;
                depth = depth.max(arg_depth);
                args.push(arg);
                match self.bump()? {
                    Tok::Comma => continue,
                    Tok::RParen => break,
                    other => return Err(ExprError::UnexpectedToken(other.to_string())),
                }
            }
        }
        if args.len() != func.arity() {
            return Err(ExprError::Arity {
                name,
                expected: func.arity(),
                got: args.len(),
            });
        }
        Ok((Node::Call(func, args), deeper(depth)?))
    }
}

/// Expression compiled by the built-in parser.
#[derive(Debug, Clone)]
pub struct Expression {
    source: String,
    root: Node,
}

impl Expression {
    pub fn source(&self) -> &str {
        &self.source
    }
}

impl Evaluator for Expression {
    fn evaluate(&self, scope: &Scope) -> Result<f64, ExprError> {
        let value = self.root.eval(scope)?;
        if value.is_finite() {
            Ok(value)
        } else {
            Err(ExprError::NonFinite)
        }
    }
}
