//! Dependency tagging.
//!
//! Every getter is rebuilt as an immutable tree of [`Node`]s carrying fresh
//! structural ids. Analysis results live in the [`Annotations`] side table:
//! root name and depth for every node, and for every function head (the
//! getter root or a collection callback) the map of model paths whose
//! mutation can invalidate that function, each optionally guarded by a
//! condition id.

use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use rustc_hash::FxHashMap;

use crate::ast::{Expr, Key, Literal};
use crate::error::{CompileError, CompileResult};
use crate::split::{Getters, Setters};
use crate::token::TokenKind;

mod path;
mod references;

pub use path::{
    KeyExpr, Path, PathMap, PathSegment, path_matches, paths_overlap, resolve_against_setter,
    setter_path,
};
pub use references::{
    find_references_to_path_in_all_getters, invalidates, path_of_expr, reverse_index,
};

pub type ExprId = u32;
/// Condition ids are the structural id of the guarded lookup.
pub type CondId = ExprId;

#[derive(Debug, PartialEq)]
pub struct Node {
    pub id: ExprId,
    pub kind: NodeKind,
}

#[derive(Debug, PartialEq)]
pub enum NodeKind {
    Literal(Literal),
    Token(TokenKind),
    Call { kind: TokenKind, args: Vec<Rc<Node>> },
}

impl Node {
    pub fn token(&self) -> Option<TokenKind> {
        match &self.kind {
            NodeKind::Token(kind) | NodeKind::Call { kind, .. } => Some(*kind),
            NodeKind::Literal(_) => None,
        }
    }

    pub fn args(&self) -> &[Rc<Node>] {
        match &self.kind {
            NodeKind::Call { args, .. } => args,
            NodeKind::Literal(_) | NodeKind::Token(_) => &[],
        }
    }

    /// Body of a `func` node.
    pub fn body(&self) -> Option<&Rc<Node>> {
        match &self.kind {
            NodeKind::Call {
                kind: TokenKind::Func,
                args,
            } => args.first(),
            _ => None,
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            NodeKind::Literal(literal) => write!(f, "{literal}"),
            NodeKind::Token(kind) => write!(f, "{kind}"),
            NodeKind::Call { kind, args } => {
                write!(f, "{kind}(")?;
                for (index, arg) in args.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_str(")")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub root_name: Rc<str>,
    /// Function nesting depth below the getter root.
    pub depth: usize,
    /// Head of the function this node is evaluated in.
    pub func_id: ExprId,
    /// Evaluation is control-dependent (branch operand or guarded lookup).
    pub conditional: bool,
    /// Invalidating paths; present on function heads only.
    pub paths: Option<PathMap>,
    /// Statically known path of a collection node's source.
    pub source_path: Option<Path>,
}

#[derive(Debug, Clone, Default)]
pub struct Annotations(FxHashMap<ExprId, Annotation>);

impl Annotations {
    pub fn get(&self, id: ExprId) -> Option<&Annotation> {
        self.0.get(&id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug)]
pub struct TaggedGetter {
    pub name: String,
    pub root: Rc<Node>,
    /// Function heads: the root first, then every `func` node in pre-order.
    pub functions: Vec<Rc<Node>>,
}

#[derive(Debug)]
pub struct TaggedModel {
    pub getters: IndexMap<String, TaggedGetter>,
    pub setters: Setters,
    pub annotations: Annotations,
    getter_paths: IndexMap<String, PathMap>,
}

impl TaggedModel {
    pub fn annotation(&self, id: ExprId) -> &Annotation {
        self.annotations
            .get(id)
            .expect("every tagged node has an annotation")
    }

    /// Union of the path maps of every function in the getter.
    pub fn all_paths_in_getter(&self, name: &str) -> Option<&PathMap> {
        self.getter_paths.get(name)
    }

    pub fn getter_paths(&self) -> impl Iterator<Item = (&String, &PathMap)> {
        self.getter_paths.iter()
    }
}

/// Tags every getter and builds the per-getter path tables.
pub fn normalize_and_tag_all_getters(
    getters: &Getters,
    setters: &Setters,
) -> CompileResult<TaggedModel> {
    let mut tagger = Tagger {
        next_id: 0,
        annotations: FxHashMap::default(),
        getters,
    };
    let mut tagged = IndexMap::new();
    let mut getter_paths = IndexMap::new();

    for (name, expr) in getters {
        let getter = tagger.tag_getter(name, expr)?;
        let mut combined = PathMap::new();
        for head in &getter.functions {
            let paths = tagger.annotations[&head.id]
                .paths
                .as_ref()
                .expect("function heads carry a path map");
            for (path, condition) in paths {
                combined.entry(path.clone()).or_insert(*condition);
            }
        }
        tracing::debug!(
            getter = %name,
            functions = getter.functions.len(),
            paths = combined.len(),
            "tagged getter"
        );
        getter_paths.insert(name.clone(), combined);
        tagged.insert(name.clone(), getter);
    }

    Ok(TaggedModel {
        getters: tagged,
        setters: setters.clone(),
        annotations: Annotations(tagger.annotations),
        getter_paths,
    })
}

#[derive(Clone)]
struct Position {
    root_name: Rc<str>,
    depth: usize,
    func_id: ExprId,
    conditional: bool,
    recursive: bool,
}

struct Scope {
    depth: usize,
    val_path: Option<Path>,
    context_path: Option<Path>,
}

struct Tagger<'a> {
    next_id: ExprId,
    annotations: FxHashMap<ExprId, Annotation>,
    getters: &'a Getters,
}

impl Tagger<'_> {
    fn tag_getter(&mut self, name: &str, expr: &Expr) -> CompileResult<TaggedGetter> {
        let position = Position {
            root_name: Rc::from(name),
            depth: 0,
            func_id: self.next_id + 1,
            conditional: false,
            recursive: false,
        };
        let mut functions = Vec::new();
        let root = self.tag(name, expr, &position, &mut functions)?;
        functions.insert(0, Rc::clone(&root));

        let mut scopes = vec![Scope {
            depth: 0,
            val_path: None,
            context_path: None,
        }];
        self.analyze_function(name, &root, &root, &mut scopes)?;

        Ok(TaggedGetter {
            name: name.to_string(),
            root,
            functions,
        })
    }

    fn fresh_id(&mut self) -> ExprId {
        self.next_id += 1;
        self.next_id
    }

    fn annotate(&mut self, id: ExprId, position: &Position) {
        self.annotations.insert(
            id,
            Annotation {
                root_name: Rc::clone(&position.root_name),
                depth: position.depth,
                func_id: position.func_id,
                conditional: position.conditional,
                paths: None,
                source_path: None,
            },
        );
    }

    fn annotation_mut(&mut self, id: ExprId) -> &mut Annotation {
        self.annotations
            .get_mut(&id)
            .expect("annotation exists for tagged node")
    }

    fn tag(
        &mut self,
        getter: &str,
        expr: &Expr,
        position: &Position,
        functions: &mut Vec<Rc<Node>>,
    ) -> CompileResult<Rc<Node>> {
        let id = self.fresh_id();
        self.annotate(id, position);

        let kind = match expr {
            Expr::Literal(literal) => NodeKind::Literal(literal.clone()),
            Expr::Arg(_) => {
                return Err(misplaced(
                    getter,
                    "arg",
                    "setter arguments only appear in setter paths",
                ));
            }
            Expr::Token(kind) => {
                check_marker(getter, *kind, position)?;
                NodeKind::Token(*kind)
            }
            Expr::Node { kind, args } => {
                let arity = kind.data().arity;
                if !arity.accepts(args.len()) {
                    return Err(CompileError::Arity {
                        getter: getter.to_string(),
                        kind: kind.name().to_string(),
                        expected: arity.to_string(),
                        found: args.len(),
                    });
                }
                let args = self.tag_args(getter, *kind, args, position, functions)?;
                NodeKind::Call { kind: *kind, args }
            }
        };

        Ok(Rc::new(Node { id, kind }))
    }

    fn tag_args(
        &mut self,
        getter: &str,
        kind: TokenKind,
        args: &[Expr],
        position: &Position,
        functions: &mut Vec<Rc<Node>>,
    ) -> CompileResult<Vec<Rc<Node>>> {
        if kind.data().collection_verb {
            let mut tagged = vec![self.tag_function(getter, kind, &args[0], position, functions)?];
            for arg in &args[1..] {
                tagged.push(self.tag(getter, arg, position, functions)?);
            }
            return Ok(tagged);
        }

        match kind {
            TokenKind::Func => Err(misplaced(
                getter,
                "func",
                "callbacks are only accepted as the first argument of a collection verb",
            )),
            TokenKind::Recur if args[0] != Expr::Token(TokenKind::Loop) => Err(misplaced(
                getter,
                "recur",
                "the first argument must be the loop token",
            )),
            TokenKind::Object
                if args
                    .iter()
                    .step_by(2)
                    .any(|name| !matches!(name, Expr::Literal(Literal::String(_)))) =>
            {
                Err(CompileError::InvalidDeclaration {
                    message: format!("object property names in '{getter}' must be string literals"),
                })
            }
            _ if kind.is_branching() => {
                let mut branch = position.clone();
                branch.conditional = true;
                let mut tagged = vec![self.tag(getter, &args[0], position, functions)?];
                for arg in &args[1..] {
                    tagged.push(self.tag(getter, arg, &branch, functions)?);
                }
                Ok(tagged)
            }
            _ => args
                .iter()
                .map(|arg| self.tag(getter, arg, position, functions))
                .collect(),
        }
    }

    fn tag_function(
        &mut self,
        getter: &str,
        verb: TokenKind,
        expr: &Expr,
        position: &Position,
        functions: &mut Vec<Rc<Node>>,
    ) -> CompileResult<Rc<Node>> {
        let Expr::Node {
            kind: TokenKind::Func,
            args,
        } = expr
        else {
            return Err(misplaced(
                getter,
                verb.name(),
                "the first argument must be a func callback",
            ));
        };
        if args.len() != 1 {
            return Err(CompileError::Arity {
                getter: getter.to_string(),
                kind: "func".to_string(),
                expected: "1".to_string(),
                found: args.len(),
            });
        }

        let id = self.fresh_id();
        let inner = Position {
            root_name: Rc::clone(&position.root_name),
            depth: position.depth + 1,
            func_id: id,
            conditional: position.conditional,
            recursive: verb.data().recursive,
        };
        self.annotate(id, &inner);
        let body = self.tag(getter, &args[0], &inner, functions)?;
        let node = Rc::new(Node {
            id,
            kind: NodeKind::Call {
                kind: TokenKind::Func,
                args: vec![body],
            },
        });
        functions.push(Rc::clone(&node));
        Ok(node)
    }

    fn analyze_function(
        &mut self,
        getter: &str,
        head: &Rc<Node>,
        body: &Rc<Node>,
        scopes: &mut Vec<Scope>,
    ) -> CompileResult<()> {
        let mut paths = PathMap::new();
        self.collect(getter, body, scopes, &mut paths, false)?;
        self.annotation_mut(head.id).paths = Some(paths);
        Ok(())
    }

    /// Records the paths read by `node` into the current function's map.
    ///
    /// `chain_object` is set while walking the object operand of a `get`, whose
    /// chain has already been resolved by the outermost `get`.
    fn collect(
        &mut self,
        getter: &str,
        node: &Rc<Node>,
        scopes: &mut Vec<Scope>,
        paths: &mut PathMap,
        chain_object: bool,
    ) -> CompileResult<()> {
        match &node.kind {
            NodeKind::Literal(_) => Ok(()),
            NodeKind::Token(_) if chain_object => Ok(()),
            NodeKind::Token(kind @ (TokenKind::Root | TokenKind::TopLevel)) => {
                Err(CompileError::UntrackableReference {
                    getter: getter.to_string(),
                    token: kind.name().to_string(),
                })
            }
            NodeKind::Token(TokenKind::Val) => {
                if let Some(path) = current(scopes).val_path.clone() {
                    merge(paths, path, None);
                }
                Ok(())
            }
            NodeKind::Token(TokenKind::Context) => {
                if let Some(path) = current(scopes).context_path.clone() {
                    merge(paths, path, None);
                }
                Ok(())
            }
            NodeKind::Token(_) => Ok(()),
            NodeKind::Call {
                kind: TokenKind::Get,
                args,
            } => {
                if !chain_object && let Some((path, condition)) = self.resolve_chain(getter, node, scopes)? {
                    let branch = self
                        .annotations
                        .get(&node.id)
                        .is_some_and(|annotation| annotation.conditional);
                    let condition = condition.or(branch.then_some(node.id));
                    if let Some(condition) = condition {
                        self.annotation_mut(condition).conditional = true;
                    }
                    merge(paths, path, condition);
                }
                self.collect(getter, &args[0], scopes, paths, true)?;
                self.collect(getter, &args[1], scopes, paths, false)
            }
            NodeKind::Call { kind, args } if kind.data().collection_verb => {
                let source = &args[1];
                let context = args.get(2);
                self.collect(getter, source, scopes, paths, false)?;
                if let Some(context) = context {
                    self.collect(getter, context, scopes, paths, false)?;
                }

                let source_path = self.static_path(getter, source, scopes)?;
                let context_path = match context {
                    Some(context) => self.static_path(getter, context, scopes)?,
                    None => None,
                };
                if let Some(source_path) = &source_path {
                    merge(paths, source_path.with(PathSegment::Wildcard), None);
                }
                self.annotation_mut(node.id).source_path = source_path.clone();

                let depth = current(scopes).depth + 1;
                scopes.push(Scope {
                    depth,
                    val_path: source_path.map(|path| path.with(PathSegment::IterKey(depth))),
                    context_path,
                });
                let func = &args[0];
                let body = Rc::clone(func.body().expect("collection callbacks are func nodes"));
                let analyzed = self.analyze_function(getter, func, &body, scopes);
                scopes.pop();
                analyzed
            }
            NodeKind::Call { args, .. } => {
                for arg in args {
                    self.collect(getter, arg, scopes, paths, false)?;
                }
                Ok(())
            }
        }
    }

    /// Path of an expression usable as a collection source or context: an
    /// unguarded chain, `val` or `context`.
    fn static_path(
        &self,
        getter: &str,
        node: &Rc<Node>,
        scopes: &[Scope],
    ) -> CompileResult<Option<Path>> {
        Ok(match &node.kind {
            NodeKind::Token(TokenKind::Val) => current(scopes).val_path.clone(),
            NodeKind::Token(TokenKind::Context) => current(scopes).context_path.clone(),
            NodeKind::Call {
                kind: TokenKind::Get,
                ..
            } => match self.resolve_chain(getter, node, scopes)? {
                Some((path, None)) => Some(path),
                _ => None,
            },
            _ => None,
        })
    }

    /// Resolves a maximal `get` chain to the path it reads.
    ///
    /// The guard of a chain with computed keys is its outermost computed
    /// lookup: if that one ran, every inner key was evaluated too.
    fn resolve_chain(
        &self,
        getter: &str,
        node: &Rc<Node>,
        scopes: &[Scope],
    ) -> CompileResult<Option<(Path, Option<CondId>)>> {
        let depth = current(scopes).depth;
        let mut keys = Vec::new();
        let mut condition = None;
        let mut cursor = node;

        while let NodeKind::Call {
            kind: TokenKind::Get,
            args,
        } = &cursor.kind
        {
            let key = &args[1];
            let segment = match &key.kind {
                NodeKind::Literal(literal) => PathSegment::Fixed(Key::from_literal(literal)),
                NodeKind::Token(TokenKind::Key | TokenKind::Wildcard) => PathSegment::IterKey(depth),
                _ => {
                    condition.get_or_insert(cursor.id);
                    PathSegment::Computed(KeyExpr::new(key))
                }
            };
            keys.push(segment);
            cursor = &args[0];
        }

        let base = match &cursor.kind {
            NodeKind::Token(TokenKind::Root) => Path::root(),
            NodeKind::Token(TokenKind::TopLevel) => Path::top_level(),
            NodeKind::Token(TokenKind::Val) => match &current(scopes).val_path {
                Some(path) => path.clone(),
                None => return Ok(None),
            },
            NodeKind::Token(TokenKind::Context) => match &current(scopes).context_path {
                Some(path) => path.clone(),
                None => return Ok(None),
            },
            _ => return Ok(None),
        };

        keys.reverse();
        let mut segments = base.0;
        segments.extend(keys);
        let path = Path(segments);

        if path.is_top_level_based()
            && let Some(PathSegment::Fixed(name)) = path.segments().get(1)
            && !self.getters.contains_key(&*name.as_name())
        {
            return Err(CompileError::UnknownGetter {
                getter: getter.to_string(),
                name: name.as_name().to_string(),
            });
        }

        Ok(Some((path, condition)))
    }
}

fn current(scopes: &[Scope]) -> &Scope {
    scopes.last().expect("analysis always runs inside a scope")
}

/// Unconditional dominates conditional; a path reached under two different
/// guards is tracked whenever it is read.
fn merge(paths: &mut PathMap, path: Path, condition: Option<CondId>) {
    match paths.get_mut(&path) {
        None => {
            paths.insert(path, condition);
        }
        Some(existing) => {
            if *existing != condition {
                *existing = None;
            }
        }
    }
}

fn check_marker(getter: &str, kind: TokenKind, position: &Position) -> CompileResult<()> {
    match kind {
        TokenKind::Val | TokenKind::Key | TokenKind::Context if position.depth == 0 => Err(
            misplaced(getter, kind.name(), "only valid inside a collection callback"),
        ),
        TokenKind::Loop if !position.recursive => Err(misplaced(
            getter,
            "loop",
            "only valid inside a recursive collection callback",
        )),
        _ => Ok(()),
    }
}

fn misplaced(getter: &str, token: &str, reason: &str) -> CompileError {
    CompileError::MisplacedToken {
        getter: getter.to_string(),
        token: token.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Model, SetterDecl};
    use crate::split::split_setters_getters;

    fn tag(model: &Model) -> CompileResult<TaggedModel> {
        let (getters, setters) = split_setters_getters(model)?;
        normalize_and_tag_all_getters(&getters, &setters)
    }

    fn fixed(name: &str) -> PathSegment {
        PathSegment::Fixed(Key::name(name))
    }

    fn root_paths(model: &TaggedModel, getter: &str) -> PathMap {
        let root = &model.getters[getter].root;
        model.annotation(root.id).paths.clone().expect("root has paths")
    }

    #[test]
    fn get_chain_contributes_its_path() {
        let model = Model::new().getter(
            "total",
            Expr::node(TokenKind::Size, vec![Expr::model_path(&["items"])]),
        );
        let tagged = tag(&model).expect("tagging succeeds");

        let paths = root_paths(&tagged, "total");
        assert_eq!(paths.len(), 1);
        assert_eq!(
            paths.get(&Path(vec![PathSegment::Root, fixed("items")])),
            Some(&None)
        );
    }

    #[test]
    fn structural_ids_are_unique_and_sequential() {
        let model = Model::new()
            .getter("a", Expr::model_path(&["a"]))
            .getter("b", Expr::model_path(&["b", "c"]));
        let tagged = tag(&model).expect("tagging succeeds");

        assert_eq!(tagged.getters["a"].root.id, 1);
        assert_eq!(tagged.getters["b"].root.id, 4);
        assert_eq!(tagged.annotations.len(), 7);
        assert_eq!(&*tagged.annotation(5).root_name, "b");
    }

    #[test]
    fn computed_key_is_guarded_but_its_inputs_are_not() {
        let selected = Expr::model_path(&["selected"]);
        let model = Model::new().getter(
            "current",
            Expr::get(Expr::model_path(&["items"]), selected),
        );
        let tagged = tag(&model).expect("tagging succeeds");
        let root = &tagged.getters["current"].root;

        let paths = root_paths(&tagged, "current");
        assert_eq!(
            paths.get(&Path(vec![PathSegment::Root, fixed("selected")])),
            Some(&None)
        );
        let guarded: Vec<_> = paths
            .iter()
            .filter(|(_, condition)| condition.is_some())
            .collect();
        assert_eq!(guarded.len(), 1);
        let (path, condition) = guarded[0];
        assert_eq!(*condition, Some(root.id));
        assert!(matches!(path.last(), Some(PathSegment::Computed(_))));
        assert!(tagged.annotation(root.id).conditional);
    }

    #[test]
    fn callbacks_track_their_source_entry() {
        let model = Model::new().getter(
            "names",
            Expr::collection(
                TokenKind::MapValues,
                Expr::get(Expr::val(), Expr::str("name")),
                Expr::model_path(&["users"]),
            ),
        );
        let tagged = tag(&model).expect("tagging succeeds");
        let getter = &tagged.getters["names"];
        assert_eq!(getter.functions.len(), 2);

        let callback = &getter.functions[1];
        let annotation = tagged.annotation(callback.id);
        assert_eq!(annotation.depth, 1);
        let paths = annotation.paths.as_ref().expect("callback has paths");
        assert_eq!(
            paths.keys().collect::<Vec<_>>(),
            vec![&Path(vec![
                PathSegment::Root,
                fixed("users"),
                PathSegment::IterKey(1),
                fixed("name"),
            ])]
        );

        let root_paths = root_paths(&tagged, "names");
        assert!(root_paths.contains_key(&Path(vec![PathSegment::Root, fixed("users")])));
        assert!(root_paths.contains_key(&Path(vec![
            PathSegment::Root,
            fixed("users"),
            PathSegment::Wildcard,
        ])));
        assert_eq!(
            tagged.annotation(getter.root.id).source_path,
            Some(Path(vec![PathSegment::Root, fixed("users")]))
        );
    }

    #[test]
    fn unconditional_read_dominates_guarded_read() {
        let mut paths = PathMap::new();
        let path = Path(vec![PathSegment::Root, fixed("a")]);
        merge(&mut paths, path.clone(), Some(3));
        merge(&mut paths, path.clone(), None);
        assert_eq!(paths.get(&path), Some(&None));
        merge(&mut paths, path.clone(), Some(7));
        assert_eq!(paths.get(&path), Some(&None));
    }

    #[test]
    fn differently_guarded_reads_of_one_path_are_always_tracked() {
        let lookup = || Expr::get(Expr::model_path(&["items"]), Expr::model_path(&["selected"]));
        let model = Model::new().getter(
            "twice",
            Expr::node(TokenKind::And, vec![lookup(), lookup()]),
        );
        let tagged = tag(&model).expect("model tags");
        let paths = root_paths(&tagged, "twice");
        let guarded: Vec<_> = paths
            .iter()
            .filter(|(path, _)| path.segments().len() == 3)
            .collect();
        assert_eq!(guarded.len(), 1);
        assert_eq!(guarded[0].1, &None);
    }

    #[test]
    fn branch_reads_are_guarded_by_their_own_lookup() {
        let then = Expr::get(Expr::model_path(&["a"]), Expr::str("x"));
        let model = Model::new().getter(
            "pick",
            Expr::node(
                TokenKind::Ternary,
                vec![Expr::model_path(&["useA"]), then, Expr::num(0.0)],
            ),
        );
        let tagged = tag(&model).expect("model tags");
        let getter = &tagged.getters["pick"];
        let NodeKind::Call { args, .. } = &getter.root.kind else {
            panic!("ternary call");
        };
        let paths = root_paths(&tagged, "pick");
        assert_eq!(
            paths.get(&Path(vec![PathSegment::Root, fixed("useA")])),
            Some(&None)
        );
        assert_eq!(
            paths.get(&Path(vec![PathSegment::Root, fixed("a"), fixed("x")])),
            Some(&Some(args[1].id))
        );
    }

    #[test]
    fn branch_operands_are_flagged_conditional() {
        let model = Model::new().getter(
            "pick",
            Expr::node(
                TokenKind::Ternary,
                vec![
                    Expr::model_path(&["flag"]),
                    Expr::model_path(&["a"]),
                    Expr::model_path(&["b"]),
                ],
            ),
        );
        let tagged = tag(&model).expect("tagging succeeds");
        let root = &tagged.getters["pick"].root;
        let [test, then, otherwise] = root.args() else {
            panic!("ternary has three operands");
        };
        assert!(!tagged.annotation(test.id).conditional);
        assert!(tagged.annotation(then.id).conditional);
        assert!(tagged.annotation(otherwise.id).conditional);
    }

    #[test]
    fn rejects_unknown_top_level_references() {
        let model = Model::new().getter(
            "double",
            Expr::get(Expr::top_level(), Expr::str("missing")),
        );
        assert_eq!(
            tag(&model).err(),
            Some(CompileError::UnknownGetter {
                getter: "double".to_string(),
                name: "missing".to_string(),
            })
        );
    }

    #[test]
    fn rejects_bare_root_and_misplaced_tokens() {
        let bare = Model::new().getter("all", Expr::node(TokenKind::Keys, vec![Expr::root()]));
        assert!(matches!(
            tag(&bare),
            Err(CompileError::UntrackableReference { .. })
        ));

        let val = Model::new().getter("v", Expr::val());
        assert!(matches!(tag(&val), Err(CompileError::MisplacedToken { .. })));

        let arity = Model::new().getter("s", Expr::node(TokenKind::Size, vec![]));
        assert!(matches!(tag(&arity), Err(CompileError::Arity { .. })));
    }

    #[test]
    fn setters_are_carried_through() {
        let model = Model::new()
            .getter("a", Expr::model_path(&["a"]))
            .setter("setA", SetterDecl::set(vec![Expr::str("a")]));
        let tagged = tag(&model).expect("tagging succeeds");
        assert!(tagged.setters.contains_key("setA"));
    }
}
