use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use indexmap::IndexMap;

use super::{CondId, Node};
use crate::ast::{Key, SetterSegment};
use crate::split::Setter;

/// Key expression embedded in a path, re-evaluated when the path is tracked.
///
/// Two occurrences with the same rendering denote the same location, so
/// equality and hashing go through `shape` rather than the node id.
#[derive(Debug, Clone)]
pub struct KeyExpr {
    pub node: Rc<Node>,
    pub shape: Rc<str>,
}

impl KeyExpr {
    pub fn new(node: &Rc<Node>) -> Self {
        Self {
            node: Rc::clone(node),
            shape: Rc::from(node.to_string()),
        }
    }
}

impl PartialEq for KeyExpr {
    fn eq(&self, other: &Self) -> bool {
        self.shape == other.shape
    }
}

impl Eq for KeyExpr {}

impl Hash for KeyExpr {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.shape.hash(state);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    Root,
    TopLevel,
    Fixed(Key),
    /// Current key of the function at this nesting depth.
    IterKey(usize),
    Computed(KeyExpr),
    Wildcard,
}

impl PathSegment {
    fn is_base(&self) -> bool {
        matches!(self, PathSegment::Root | PathSegment::TopLevel)
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Root => f.write_str("root"),
            PathSegment::TopLevel => f.write_str("topLevel"),
            PathSegment::Fixed(key) => write!(f, "{key}"),
            PathSegment::IterKey(depth) => write!(f, "key@{depth}"),
            PathSegment::Computed(expr) => write!(f, "({})", expr.shape),
            PathSegment::Wildcard => f.write_str("*"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Path(pub Vec<PathSegment>);

/// Invalidating path → condition that must have fired for it to be live.
pub type PathMap = IndexMap<Path, Option<CondId>>;

impl Path {
    pub fn root() -> Self {
        Path(vec![PathSegment::Root])
    }

    pub fn top_level() -> Self {
        Path(vec![PathSegment::TopLevel])
    }

    pub fn with(&self, segment: PathSegment) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment);
        Path(segments)
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn base(&self) -> Option<&PathSegment> {
        self.0.first()
    }

    pub fn last(&self) -> Option<&PathSegment> {
        self.0.last()
    }

    pub fn is_root_based(&self) -> bool {
        self.base() == Some(&PathSegment::Root)
    }

    pub fn is_top_level_based(&self) -> bool {
        self.base() == Some(&PathSegment::TopLevel)
    }

    /// A concrete leaf is needed to register a tracking edge.
    pub fn is_trackable(&self) -> bool {
        self.len() >= 2 && self.last() != Some(&PathSegment::Wildcard)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = self
            .0
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" / ");
        write!(f, "[{rendered}]")
    }
}

fn segments_compatible(left: &PathSegment, right: &PathSegment) -> bool {
    match (left, right) {
        (PathSegment::Fixed(left), PathSegment::Fixed(right)) => left == right,
        (left, right) if left.is_base() || right.is_base() => left == right,
        _ => true,
    }
}

/// True when one path is an ancestor of, equal to, or a possible instance of
/// the other: fixed keys must agree position by position, anything else
/// matches any key, and the comparison stops at the shorter path.
pub fn paths_overlap(left: &Path, right: &Path) -> bool {
    left.0
        .iter()
        .zip(right.0.iter())
        .all(|(left, right)| segments_compatible(left, right))
}

/// The setter's pattern as a root-based path, arguments as wildcards.
pub fn setter_path(setter: &Setter) -> Path {
    let mut segments = vec![PathSegment::Root];
    segments.extend(setter.path.iter().map(|segment| match segment {
        SetterSegment::Fixed(key) => PathSegment::Fixed(key.clone()),
        SetterSegment::Arg(_) => PathSegment::Wildcard,
    }));
    Path(segments)
}

/// Positional match of a root-based invalidating path against a setter pattern.
pub fn path_matches(path: &Path, setter: &Setter) -> bool {
    path.is_root_based() && paths_overlap(path, &setter_path(setter))
}

/// Concrete location a setter write reaches for this invalidating path.
///
/// Argument positions of the setter take the path's own segment, fixed
/// positions keep the setter's key; the result is never longer than `path`.
pub fn resolve_against_setter(path: &Path, setter: &Setter) -> Path {
    let mut segments = vec![PathSegment::Root];
    for (index, segment) in setter.path.iter().enumerate().take(path.len().saturating_sub(1)) {
        segments.push(match segment {
            SetterSegment::Fixed(key) => PathSegment::Fixed(key.clone()),
            SetterSegment::Arg(_) => path.0[index + 1].clone(),
        });
    }
    Path(segments)
}
