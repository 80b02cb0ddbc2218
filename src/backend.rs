use std::rc::Rc;

use anyhow::{Context, Result, bail};
use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use serde_json::Value as Json;

use crate::ast::{Literal, Model};
use crate::error::{CompileError, CompileResult};
use crate::program::{Function, GetterProc, Mode, Op, Program, ScopeVar, SetterProc};
use crate::runtime::{Instance, Value};
use crate::split::{Setter, split_setters_getters};
use crate::tagging::{Node, NodeKind, PathSegment, TaggedModel, normalize_and_tag_all_getters};
use crate::token::TokenKind;

pub mod naive;
pub mod optimizing;

pub use naive::Naive;
pub use optimizing::Optimizing;

/// Compiled model produced by a backend `prepare` step.
///
/// Compilation and instantiation stay separate so benchmarks and tests can
/// measure and validate the two phases independently.
pub trait PreparedBackend {
    fn program(&self) -> &Rc<Program>;

    fn instantiate(&self, data: &Json) -> Result<Instance> {
        let program = self.program();
        Instance::new(Rc::clone(program), Value::from_json(data))
            .with_context(|| format!("Building {} instance", program.mode.name()))
    }
}

/// Common interface implemented by each code generator.
///
/// `prepare` compiles a declaration into an executable program, while `run`
/// offers the convenience path of compiling and instantiating in one go.
pub trait Backend {
    fn name(&self) -> &'static str;
    fn prepare(&self, model: &Model) -> Result<Box<dyn PreparedBackend>>;

    fn run(&self, model: &Model, data: &Json) -> Result<Instance> {
        self.prepare(model)?.instantiate(data)
    }
}

pub fn backends() -> Vec<Box<dyn Backend>> {
    vec![Box::new(Naive::new()), Box::new(Optimizing::new())]
}

pub fn backend_by_name(name: &str) -> Result<Box<dyn Backend>> {
    match backends().into_iter().find(|backend| backend.name() == name) {
        Some(backend) => Ok(backend),
        None => bail!("Unknown backend '{name}' (expected naive or optimizing)"),
    }
}

pub struct Compiled {
    program: Rc<Program>,
}

impl PreparedBackend for Compiled {
    fn program(&self) -> &Rc<Program> {
        &self.program
    }
}

/// Splits and tags a declaration; the shared front half of every backend.
pub fn tag_model(model: &Model) -> CompileResult<TaggedModel> {
    let (getters, setters) = split_setters_getters(model)?;
    normalize_and_tag_all_getters(&getters, &setters)
}

pub(crate) fn prepare_with<G: Generator>(generator: &G) -> Result<Box<dyn PreparedBackend>> {
    let program = generator
        .generate()
        .with_context(|| format!("Generating {} program", generator.mode().name()))?;
    Ok(Box::new(Compiled {
        program: Rc::new(program),
    }))
}

/// Translation of tagged getters and setters into a [`Program`].
///
/// The provided methods are the base translation. A generator overrides the
/// kinds it specializes and falls back to [`base_expr`] for everything else;
/// children are always translated through `generate_expr`, so overrides
/// apply at every depth.
pub trait Generator {
    fn mode(&self) -> Mode;
    fn model(&self) -> &TaggedModel;
    fn generate_setter(&self, setter: &Setter) -> CompileResult<SetterProc>;

    fn generate_expr(&self, node: &Rc<Node>) -> CompileResult<Op> {
        base_expr(self, node)
    }

    fn generate_function(&self, head: &Rc<Node>) -> CompileResult<Function> {
        base_function(self, head)
    }

    fn getter_invalidates(&self, _name: &str) -> bool {
        false
    }

    fn generate(&self) -> CompileResult<Program> {
        let model = self.model();
        let mut getters = Vec::with_capacity(model.getters.len());
        for name in getter_order(model) {
            let getter = &model.getters[name.as_str()];
            getters.push(GetterProc {
                name: Rc::from(name.as_str()),
                function: Rc::new(self.generate_function(&getter.root)?),
                invalidates: self.getter_invalidates(&name),
            });
        }
        let setters = model
            .setters
            .values()
            .map(|setter| Ok((setter.name.clone(), self.generate_setter(setter)?)))
            .collect::<CompileResult<IndexMap<_, _>>>()?;

        Ok(Program {
            mode: self.mode(),
            getters,
            setters,
        })
    }
}

pub fn function_name(model: &TaggedModel, head: &Node) -> String {
    let annotation = model.annotation(head.id);
    if annotation.depth == 0 {
        format!("${}", annotation.root_name)
    } else {
        format!("${}{}", annotation.root_name, head.id)
    }
}

/// Body of a function head: the `func` body, or the getter root itself.
pub fn function_body(head: &Rc<Node>) -> &Rc<Node> {
    head.body().unwrap_or(head)
}

pub fn base_function<G: Generator + ?Sized>(
    generator: &G,
    head: &Rc<Node>,
) -> CompileResult<Function> {
    let model = generator.model();
    Ok(Function {
        id: head.id,
        name: function_name(model, head),
        depth: model.annotation(head.id).depth,
        conditions: Vec::new(),
        body: generator.generate_expr(function_body(head))?,
        tracking: Default::default(),
    })
}

pub fn base_expr<G: Generator + ?Sized>(generator: &G, node: &Rc<Node>) -> CompileResult<Op> {
    let model = generator.model();
    let annotation = model.annotation(node.id);
    let generate = |child: &Rc<Node>| generator.generate_expr(child);
    let boxed = |child: &Rc<Node>| generate(child).map(Box::new);

    match &node.kind {
        NodeKind::Literal(literal) => Ok(Op::Literal(literal.clone())),
        NodeKind::Token(kind) => {
            let scope = |var| Op::Scope {
                var,
                depth: annotation.depth,
            };
            match kind {
                TokenKind::Root => Ok(Op::Root),
                TokenKind::TopLevel => Ok(Op::TopLevel),
                TokenKind::Val => Ok(scope(ScopeVar::Val)),
                TokenKind::Key => Ok(scope(ScopeVar::Key)),
                TokenKind::Context => Ok(scope(ScopeVar::Context)),
                TokenKind::Wildcard => Ok(Op::CurrentKey),
                other => Err(CompileError::MisplacedToken {
                    getter: annotation.root_name.to_string(),
                    token: other.name().to_string(),
                    reason: match other {
                        TokenKind::Loop => "only accepted as the first argument of recur",
                        _ => "expects arguments",
                    }
                    .to_string(),
                }),
            }
        }
        NodeKind::Call { kind, args } => match kind {
            TokenKind::Get => Ok(Op::Get {
                object: boxed(&args[0])?,
                key: boxed(&args[1])?,
            }),
            TokenKind::Object => {
                let mut entries = Vec::with_capacity(args.len() / 2);
                for pair in args.chunks(2) {
                    let name = property_name(&pair[0], &annotation.root_name)?;
                    entries.push((name, generate(&pair[1])?));
                }
                Ok(Op::Object(entries))
            }
            TokenKind::Array => Ok(Op::Array(
                args.iter().map(generate).collect::<CompileResult<_>>()?,
            )),
            TokenKind::Ternary => Ok(Op::Ternary {
                test: boxed(&args[0])?,
                then: boxed(&args[1])?,
                otherwise: boxed(&args[2])?,
            }),
            TokenKind::And => Ok(Op::And(
                args.iter().map(generate).collect::<CompileResult<_>>()?,
            )),
            TokenKind::Or => Ok(Op::Or(
                args.iter().map(generate).collect::<CompileResult<_>>()?,
            )),
            TokenKind::Recur => Ok(Op::Recur {
                depth: annotation.depth,
                key: boxed(&args[1])?,
            }),
            kind if kind.data().collection_verb => Ok(Op::Collection {
                verb: *kind,
                func: Rc::new(generator.generate_function(&args[0])?),
                source: boxed(&args[1])?,
                context: match args.get(2) {
                    Some(context) => boxed(context)?,
                    None => Box::new(Op::NoValue),
                },
            }),
            kind => Ok(Op::Apply {
                kind: *kind,
                args: args.iter().map(generate).collect::<CompileResult<_>>()?,
            }),
        },
    }
}

/// Name of an `object` property; only string literals are accepted.
pub fn property_name(node: &Node, getter: &str) -> CompileResult<Rc<str>> {
    match &node.kind {
        NodeKind::Literal(Literal::String(name)) => Ok(Rc::from(name.as_str())),
        _ => Err(CompileError::InvalidDeclaration {
            message: format!("object property names in '{getter}' must be string literals"),
        }),
    }
}

/// Getter names ordered so every getter follows the getters it reads
/// through `topLevel`.
///
/// Getters that read each other form a group kept in declaration order; a
/// member reads the last published result of any peer ordered after it, and
/// recalculation repeats until the group settles.
pub fn getter_order(model: &TaggedModel) -> Vec<String> {
    let names: Vec<&str> = model.getter_paths().map(|(name, _)| name.as_str()).collect();
    let positions: FxHashMap<&str, usize> = names
        .iter()
        .enumerate()
        .map(|(position, name)| (*name, position))
        .collect();
    let edges: Vec<Vec<usize>> = model
        .getter_paths()
        .map(|(_, paths)| {
            let mut reads = Vec::new();
            for path in paths.keys().filter(|path| path.is_top_level_based()) {
                if let Some(PathSegment::Fixed(key)) = path.segments().get(1)
                    && let Some(&position) = positions.get(&*key.as_name())
                    && !reads.contains(&position)
                {
                    reads.push(position);
                }
            }
            reads
        })
        .collect();

    let mut groups = Groups::new(&edges);
    for position in 0..names.len() {
        if groups.index[position].is_none() {
            groups.visit(position);
        }
    }
    groups
        .order
        .into_iter()
        .map(|position| names[position].to_string())
        .collect()
}

/// Strongly connected components of the `topLevel` read graph, emitted
/// dependencies first.
struct Groups<'a> {
    edges: &'a [Vec<usize>],
    index: Vec<Option<usize>>,
    low: Vec<usize>,
    stack: Vec<usize>,
    on_stack: Vec<bool>,
    counter: usize,
    order: Vec<usize>,
}

impl<'a> Groups<'a> {
    fn new(edges: &'a [Vec<usize>]) -> Self {
        Self {
            edges,
            index: vec![None; edges.len()],
            low: vec![0; edges.len()],
            stack: Vec::new(),
            on_stack: vec![false; edges.len()],
            counter: 0,
            order: Vec::with_capacity(edges.len()),
        }
    }

    fn visit(&mut self, node: usize) {
        self.index[node] = Some(self.counter);
        self.low[node] = self.counter;
        self.counter += 1;
        self.stack.push(node);
        self.on_stack[node] = true;

        let edges = self.edges;
        for &next in &edges[node] {
            match self.index[next] {
                None => {
                    self.visit(next);
                    self.low[node] = self.low[node].min(self.low[next]);
                }
                Some(index) if self.on_stack[next] => {
                    self.low[node] = self.low[node].min(index);
                }
                Some(_) => {}
            }
        }

        if self.index[node] == Some(self.low[node]) {
            let mut group = Vec::new();
            while let Some(member) = self.stack.pop() {
                self.on_stack[member] = false;
                group.push(member);
                if member == node {
                    break;
                }
            }
            group.sort_unstable();
            self.order.extend(group);
        }
    }
}
