use std::fmt;

/// Discriminant of an expression node or of a bare marker token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TokenKind {
    // Markers
    Root,
    TopLevel,
    Key,
    Val,
    Context,
    Loop,
    Wildcard,

    // Lookups and constructors
    Get,
    Object,
    Array,
    Func,
    Recur,

    // Structural primitives
    Keys,
    Values,
    Size,
    Assign,
    Defaults,
    Range,

    // Collection verbs
    Map,
    Any,
    MapValues,
    AnyValues,
    RecursiveMap,
    RecursiveMapValues,
    FilterBy,
    GroupBy,
    KeyBy,
    Filter,
    MapKeys,

    // Scalar operators
    Not,
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
    Plus,
    Minus,
    Mult,
    Div,
    Mod,
    Ternary,
    And,
    Or,
}

/// Number of children a node accepts, not counting the head token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// Bare marker; never appears as a node head.
    Marker,
    Exactly(usize),
    Between(usize, usize),
    /// `object` takes name/value pairs.
    Pairs,
    AtLeast(usize),
}

impl Arity {
    pub fn accepts(self, count: usize) -> bool {
        match self {
            Arity::Marker => false,
            Arity::Exactly(expected) => count == expected,
            Arity::Between(min, max) => (min..=max).contains(&count),
            Arity::Pairs => count % 2 == 0,
            Arity::AtLeast(min) => count >= min,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Marker => write!(f, "no arguments (marker token)"),
            Arity::Exactly(expected) => write!(f, "{expected}"),
            Arity::Between(min, max) => write!(f, "{min} to {max}"),
            Arity::Pairs => write!(f, "an even number of"),
            Arity::AtLeast(min) => write!(f, "at least {min}"),
        }
    }
}

/// Static metadata attached to each token kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenData {
    pub arity: Arity,
    /// Takes a `func` callback, a source collection and an optional context.
    pub collection_verb: bool,
    /// Iterates array-like sources (`forArray`) rather than objects (`forObject`).
    pub array_verb: bool,
    /// Callback may call `recur` on the `loop` token.
    pub recursive: bool,
}

const fn data(arity: Arity) -> TokenData {
    TokenData {
        arity,
        collection_verb: false,
        array_verb: false,
        recursive: false,
    }
}

const fn verb(array_verb: bool, recursive: bool) -> TokenData {
    TokenData {
        arity: Arity::Between(2, 3),
        collection_verb: true,
        array_verb,
        recursive,
    }
}

const NAMES: &[(TokenKind, &str)] = &[
    (TokenKind::Root, "root"),
    (TokenKind::TopLevel, "topLevel"),
    (TokenKind::Key, "key"),
    (TokenKind::Val, "val"),
    (TokenKind::Context, "context"),
    (TokenKind::Loop, "loop"),
    (TokenKind::Wildcard, "wildcard"),
    (TokenKind::Get, "get"),
    (TokenKind::Object, "object"),
    (TokenKind::Array, "array"),
    (TokenKind::Func, "func"),
    (TokenKind::Recur, "recur"),
    (TokenKind::Keys, "keys"),
    (TokenKind::Values, "values"),
    (TokenKind::Size, "size"),
    (TokenKind::Assign, "assign"),
    (TokenKind::Defaults, "defaults"),
    (TokenKind::Range, "range"),
    (TokenKind::Map, "map"),
    (TokenKind::Any, "any"),
    (TokenKind::MapValues, "mapValues"),
    (TokenKind::AnyValues, "anyValues"),
    (TokenKind::RecursiveMap, "recursiveMap"),
    (TokenKind::RecursiveMapValues, "recursiveMapValues"),
    (TokenKind::FilterBy, "filterBy"),
    (TokenKind::GroupBy, "groupBy"),
    (TokenKind::KeyBy, "keyBy"),
    (TokenKind::Filter, "filter"),
    (TokenKind::MapKeys, "mapKeys"),
    (TokenKind::Not, "not"),
    (TokenKind::Eq, "eq"),
    (TokenKind::Gt, "gt"),
    (TokenKind::Gte, "gte"),
    (TokenKind::Lt, "lt"),
    (TokenKind::Lte, "lte"),
    (TokenKind::Plus, "plus"),
    (TokenKind::Minus, "minus"),
    (TokenKind::Mult, "mult"),
    (TokenKind::Div, "div"),
    (TokenKind::Mod, "mod"),
    (TokenKind::Ternary, "ternary"),
    (TokenKind::And, "and"),
    (TokenKind::Or, "or"),
];

impl TokenKind {
    pub fn from_name(name: &str) -> Option<Self> {
        NAMES
            .iter()
            .find(|(_, candidate)| *candidate == name)
            .map(|(kind, _)| *kind)
    }

    pub fn name(self) -> &'static str {
        NAMES
            .iter()
            .find(|(kind, _)| *kind == self)
            .map(|(_, name)| *name)
            .unwrap_or("?")
    }

    pub fn data(self) -> TokenData {
        use TokenKind::*;
        match self {
            Root | TopLevel | Key | Val | Context | Loop | Wildcard => data(Arity::Marker),
            Get => data(Arity::Exactly(2)),
            Object => data(Arity::Pairs),
            Array => data(Arity::AtLeast(0)),
            Func => data(Arity::Exactly(1)),
            Recur => data(Arity::Exactly(2)),
            Keys | Values | Size | Assign | Defaults | Not => data(Arity::Exactly(1)),
            Range => data(Arity::Between(1, 3)),
            Map | Any | Filter | KeyBy => verb(true, false),
            RecursiveMap => verb(true, true),
            MapValues | AnyValues | FilterBy | GroupBy | MapKeys => verb(false, false),
            RecursiveMapValues => verb(false, true),
            Eq | Gt | Gte | Lt | Lte | Minus | Div | Mod => data(Arity::Exactly(2)),
            Plus | Mult => data(Arity::AtLeast(2)),
            Ternary => data(Arity::Exactly(3)),
            And | Or => data(Arity::AtLeast(1)),
        }
    }

    pub fn is_marker(self) -> bool {
        self.data().arity == Arity::Marker
    }

    /// Kinds whose non-first operands only run when an earlier operand allows it.
    pub fn is_branching(self) -> bool {
        matches!(self, TokenKind::Ternary | TokenKind::And | TokenKind::Or)
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_for_every_kind() {
        for (kind, name) in NAMES {
            assert_eq!(TokenKind::from_name(name), Some(*kind));
            assert_eq!(kind.name(), *name);
        }
        assert_eq!(TokenKind::from_name("setter"), None);
    }

    #[test]
    fn collection_metadata_selects_iteration_shape() {
        assert!(TokenKind::Map.data().array_verb);
        assert!(TokenKind::Filter.data().collection_verb);
        assert!(!TokenKind::MapValues.data().array_verb);
        assert!(TokenKind::RecursiveMapValues.data().recursive);
        assert!(!TokenKind::Size.data().collection_verb);
    }

    #[test]
    fn object_arity_requires_pairs() {
        let arity = TokenKind::Object.data().arity;
        assert!(arity.accepts(0));
        assert!(arity.accepts(4));
        assert!(!arity.accepts(3));
        assert!(!TokenKind::Val.data().arity.accepts(0));
    }
}
