use std::fmt;
use std::rc::Rc;

use crate::token::TokenKind;

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Null => f.write_str("null"),
            Literal::Bool(value) => write!(f, "{value}"),
            Literal::Number(value) => write!(f, "{value}"),
            Literal::String(value) => write!(f, "{value:?}"),
        }
    }
}

/// A concrete location key inside a container.
///
/// Array positions are `Index`, object properties are `Name`. The same type
/// is used for literal path segments at compile time and for tracking keys
/// at run time, so both sides agree on what "the same location" means.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Key {
    Index(usize),
    Name(Rc<str>),
}

impl Key {
    pub fn name(name: &str) -> Self {
        Key::Name(Rc::from(name))
    }

    pub fn from_literal(literal: &Literal) -> Self {
        match literal {
            Literal::Number(value) if value.fract() == 0.0 && *value >= 0.0 => {
                Key::Index(*value as usize)
            }
            Literal::String(value) => Key::name(value),
            other => Key::Name(Rc::from(other.to_string())),
        }
    }

    pub fn as_name(&self) -> Rc<str> {
        match self {
            Key::Index(index) => Rc::from(index.to_string()),
            Key::Name(name) => Rc::clone(name),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Index(index) => write!(f, "{index}"),
            Key::Name(name) => write!(f, "{name:?}"),
        }
    }
}

/// Raw getter expression as produced by the declaration layer.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    /// Bare marker token (`root`, `val`, `key`, ...).
    Token(TokenKind),
    /// Setter argument placeholder; only valid inside setter patterns.
    Arg(usize),
    Node { kind: TokenKind, args: Vec<Expr> },
}

impl Expr {
    pub fn node(kind: TokenKind, args: Vec<Expr>) -> Self {
        Expr::Node { kind, args }
    }

    pub fn root() -> Self {
        Expr::Token(TokenKind::Root)
    }

    pub fn top_level() -> Self {
        Expr::Token(TokenKind::TopLevel)
    }

    pub fn val() -> Self {
        Expr::Token(TokenKind::Val)
    }

    pub fn key() -> Self {
        Expr::Token(TokenKind::Key)
    }

    pub fn context() -> Self {
        Expr::Token(TokenKind::Context)
    }

    pub fn str(value: &str) -> Self {
        Expr::Literal(Literal::String(value.to_string()))
    }

    pub fn num(value: f64) -> Self {
        Expr::Literal(Literal::Number(value))
    }

    pub fn bool(value: bool) -> Self {
        Expr::Literal(Literal::Bool(value))
    }

    pub fn get(obj: Expr, key: Expr) -> Self {
        Expr::node(TokenKind::Get, vec![obj, key])
    }

    /// `root.a.b...` as a chain of `get` nodes with literal keys.
    pub fn model_path(keys: &[&str]) -> Self {
        keys.iter()
            .fold(Expr::root(), |obj, key| Expr::get(obj, Expr::str(key)))
    }

    pub fn func(body: Expr) -> Self {
        Expr::node(TokenKind::Func, vec![body])
    }

    /// Collection verb with an inline callback body.
    pub fn collection(kind: TokenKind, body: Expr, source: Expr) -> Self {
        Expr::node(kind, vec![Expr::func(body), source])
    }

    pub fn kind(&self) -> Option<TokenKind> {
        match self {
            Expr::Token(kind) | Expr::Node { kind, .. } => Some(*kind),
            Expr::Literal(_) | Expr::Arg(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetterKind {
    /// Assign (or delete, when the value is absent) at the path.
    Set,
    /// Replace a run of array elements; the last path segment is the start index.
    Splice,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SetterSegment {
    Fixed(Key),
    Arg(usize),
}

/// Setter declaration: a path pattern below the model root.
#[derive(Debug, Clone, PartialEq)]
pub struct SetterDecl {
    pub kind: SetterKind,
    pub path: Vec<Expr>,
}

impl SetterDecl {
    pub fn set(path: Vec<Expr>) -> Self {
        Self {
            kind: SetterKind::Set,
            path,
        }
    }

    pub fn splice(path: Vec<Expr>) -> Self {
        Self {
            kind: SetterKind::Splice,
            path,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Declaration {
    Getter(Expr),
    Setter(SetterDecl),
}

/// Ordered list of named declarations, as written by the author.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Model {
    pub declarations: Vec<(String, Declaration)>,
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn getter(mut self, name: &str, expr: Expr) -> Self {
        self.declarations
            .push((name.to_string(), Declaration::Getter(expr)));
        self
    }

    pub fn setter(mut self, name: &str, setter: SetterDecl) -> Self {
        self.declarations
            .push((name.to_string(), Declaration::Setter(setter)));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_keys_prefer_indices_for_whole_numbers() {
        assert_eq!(Key::from_literal(&Literal::Number(3.0)), Key::Index(3));
        assert_eq!(Key::from_literal(&Literal::Number(1.5)), Key::name("1.5"));
        assert_eq!(
            Key::from_literal(&Literal::String("a".to_string())),
            Key::name("a")
        );
    }

    #[test]
    fn model_path_builds_nested_gets() {
        let expr = Expr::model_path(&["items", "first"]);
        assert_eq!(
            expr,
            Expr::get(Expr::get(Expr::root(), Expr::str("items")), Expr::str("first"))
        );
    }
}
