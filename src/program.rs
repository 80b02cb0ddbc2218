//! Generated program: the executable artifact both backends emit.
//!
//! A [`Program`] is an operation tree per getter plus a step list per setter.
//! The runtime executes it directly; `Display` renders it as readable
//! pseudo-source, which is what `deriva compile` prints.

use std::fmt::{self, Write as _};
use std::rc::Rc;

use crate::ast::{Key, Literal, SetterKind, SetterSegment};
use crate::tagging::{CondId, ExprId};
use crate::token::TokenKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Naive,
    Optimizing,
}

impl Mode {
    pub fn name(self) -> &'static str {
        match self {
            Mode::Naive => "naive",
            Mode::Optimizing => "optimizing",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeVar {
    Val,
    Key,
    Context,
}

impl ScopeVar {
    fn name(self) -> &'static str {
        match self {
            ScopeVar::Val => "val",
            ScopeVar::Key => "key",
            ScopeVar::Context => "context",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Array,
    Object,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Constructor {
    Object(Vec<Rc<str>>),
    Array(usize),
}

#[derive(Debug, Clone)]
pub enum Op {
    Literal(Literal),
    /// Explicit no-value marker for an absent optional operand.
    NoValue,
    Root,
    TopLevel,
    Scope { var: ScopeVar, depth: usize },
    /// Ambient key of the running invocation.
    CurrentKey,
    Get { object: Box<Op>, key: Box<Op> },
    /// Lookup that raises the function's condition flag when it runs.
    GuardedGet {
        condition: usize,
        object: Box<Op>,
        key: Box<Op>,
    },
    /// Scalar operators and the non-persistent structural primitives.
    Apply { kind: TokenKind, args: Vec<Op> },
    Ternary {
        test: Box<Op>,
        then: Box<Op>,
        otherwise: Box<Op>,
    },
    And(Vec<Op>),
    Or(Vec<Op>),
    Object(Vec<(Rc<str>, Op)>),
    Array(Vec<Op>),
    Collection {
        verb: TokenKind,
        func: Rc<Function>,
        source: Box<Op>,
        context: Box<Op>,
    },
    Recur { depth: usize, key: Box<Op> },

    /// Constructor whose identity is kept while its entries are unchanged.
    Persistent {
        constructor: Constructor,
        slot: ExprId,
        raw: Box<Op>,
        invalidates: bool,
    },
    ValuesOrKeys {
        slot: ExprId,
        values: bool,
        source: Box<Op>,
    },
    Size { slot: ExprId, source: Box<Op> },
    AssignOrDefaults {
        slot: ExprId,
        assign: bool,
        source: Box<Op>,
    },
    Range {
        slot: ExprId,
        end: Box<Op>,
        start: Box<Op>,
        step: Box<Op>,
    },
    ForEach {
        shape: Shape,
        verb: TokenKind,
        slot: ExprId,
        func: Rc<Function>,
        source: Box<Op>,
        context: Box<Op>,
        /// Per-key results may be reused across runs.
        incremental: bool,
        invalidates: bool,
    },
}

#[derive(Debug, Clone)]
pub enum KeyStep {
    Fixed(Key),
    /// Current key of the function at this depth.
    Current(usize),
    Computed(Op),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackBase {
    Root,
    TopLevel,
}

/// One `track` call: the location is `base` walked through `steps`, the
/// last step being the tracked key.
#[derive(Debug, Clone)]
pub struct TrackLine {
    pub comment: String,
    pub condition: Option<usize>,
    pub base: TrackBase,
    pub steps: Vec<KeyStep>,
}

#[derive(Debug, Clone, Default)]
pub struct Tracking {
    pub untrack: bool,
    pub lines: Vec<TrackLine>,
}

#[derive(Debug, Clone)]
pub struct Function {
    pub id: ExprId,
    pub name: String,
    pub depth: usize,
    /// Condition ids owning a flag; the flag index is the position here.
    pub conditions: Vec<CondId>,
    pub body: Op,
    pub tracking: Tracking,
}

#[derive(Debug, Clone)]
pub struct GetterProc {
    pub name: Rc<str>,
    pub function: Rc<Function>,
    pub invalidates: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetterStep {
    /// Invalidate the location reached after `prefix` path segments.
    Invalidate { prefix: usize },
    /// Invalidate every index a splice can shift.
    InvalidateSpliced,
    Taint,
    Write,
    Splice,
    Recalculate,
    RebuildAll,
}

#[derive(Debug, Clone)]
pub struct SetterProc {
    pub name: String,
    pub kind: SetterKind,
    pub params: Vec<String>,
    pub path: Vec<SetterSegment>,
    pub invalidates: bool,
    pub steps: Vec<SetterStep>,
}

impl SetterProc {
    pub fn arg_count(&self) -> usize {
        self.path
            .iter()
            .filter(|segment| matches!(segment, SetterSegment::Arg(_)))
            .count()
    }

    pub fn triggers_invalidations(&self) -> bool {
        self.steps.iter().any(|step| {
            matches!(
                step,
                SetterStep::Invalidate { .. } | SetterStep::InvalidateSpliced
            )
        })
    }
}

#[derive(Debug, Clone)]
pub struct Program {
    pub mode: Mode,
    /// Build procedures in dependency order.
    pub getters: Vec<GetterProc>,
    pub setters: indexmap::IndexMap<String, SetterProc>,
}

impl Program {
    pub fn getter(&self, name: &str) -> Option<&GetterProc> {
        self.getters.iter().find(|getter| &*getter.name == name)
    }

    pub fn getter_index(&self, name: &str) -> Option<usize> {
        self.getters.iter().position(|getter| &*getter.name == name)
    }
}

impl Op {
    pub fn boxed(self) -> Box<Op> {
        Box::new(self)
    }

    fn functions<'a>(&'a self, out: &mut Vec<&'a Rc<Function>>) {
        match self {
            Op::Collection {
                func,
                source,
                context,
                ..
            }
            | Op::ForEach {
                func,
                source,
                context,
                ..
            } => {
                source.functions(out);
                context.functions(out);
                func.body.functions(out);
                out.push(func);
            }
            Op::Get { object, key } | Op::GuardedGet { object, key, .. } => {
                object.functions(out);
                key.functions(out);
            }
            Op::Apply { args, .. } | Op::And(args) | Op::Or(args) | Op::Array(args) => {
                args.iter().for_each(|arg| arg.functions(out));
            }
            Op::Object(entries) => entries.iter().for_each(|(_, op)| op.functions(out)),
            Op::Ternary {
                test,
                then,
                otherwise,
            } => {
                test.functions(out);
                then.functions(out);
                otherwise.functions(out);
            }
            Op::Persistent { raw, .. } => raw.functions(out),
            Op::Recur { key, .. } => key.functions(out),
            Op::ValuesOrKeys { source, .. }
            | Op::Size { source, .. }
            | Op::AssignOrDefaults { source, .. } => source.functions(out),
            Op::Range {
                end, start, step, ..
            } => {
                end.functions(out);
                start.functions(out);
                step.functions(out);
            }
            Op::Literal(_)
            | Op::NoValue
            | Op::Root
            | Op::TopLevel
            | Op::Scope { .. }
            | Op::CurrentKey => {}
        }
    }
}

fn join(ops: &[Op], separator: &str) -> String {
    ops.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(separator)
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::Literal(literal) => write!(f, "{literal}"),
            Op::NoValue => f.write_str("null"),
            Op::Root => f.write_str("$model"),
            Op::TopLevel => f.write_str("$res"),
            Op::Scope { var, depth } => write!(f, "{}{depth}", var.name()),
            Op::CurrentKey => f.write_str("$wildcard"),
            Op::Get { object, key } => write!(f, "{object}[{key}]"),
            Op::GuardedGet {
                condition,
                object,
                key,
            } => write!(f, "{object}[($cond_{condition} = true) && {key}]"),
            Op::Apply { kind, args } => write!(f, "{kind}({})", join(args, ", ")),
            Op::Ternary {
                test,
                then,
                otherwise,
            } => write!(f, "(({test}) ? ({then}) : ({otherwise}))"),
            Op::And(args) => write!(f, "({})", join(args, " && ")),
            Op::Or(args) => write!(f, "({})", join(args, " || ")),
            Op::Object(entries) => {
                let rendered = entries
                    .iter()
                    .map(|(name, op)| format!("{name:?}: {op}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "{{{rendered}}}")
            }
            Op::Array(items) => write!(f, "[{}]", join(items, ", ")),
            Op::Collection {
                verb,
                func,
                source,
                context,
            } => write!(f, "{verb}({}, {source}, {context})", func.name),
            Op::Recur { depth, key } => write!(f, "loop{depth}.recursiveSteps({key})"),
            Op::Persistent {
                constructor,
                slot,
                raw,
                invalidates,
            } => match constructor {
                Constructor::Object(names) => write!(
                    f,
                    "object($invalidatedKeys, key, {raw}, getUniquePersistenObject({slot}), {names:?}, {invalidates})"
                ),
                Constructor::Array(len) => write!(
                    f,
                    "array($invalidatedKeys, key, {raw}, getUniquePersistenObject({slot}), {len}, {invalidates})"
                ),
            },
            Op::ValuesOrKeys {
                slot,
                values,
                source,
            } => write!(
                f,
                "valuesOrKeysForObject($invalidatedKeys, key, getUniquePersistenObject({slot}), {source}, {values})"
            ),
            Op::Size { slot, source } => write!(
                f,
                "size($invalidatedKeys, key, {source}, getUniquePersistenObject({slot}))"
            ),
            Op::AssignOrDefaults {
                slot,
                assign,
                source,
            } => write!(
                f,
                "assignOrDefaults($invalidatedKeys, key, getUniquePersistenObject({slot}), {source}, {assign})"
            ),
            Op::Range {
                slot,
                end,
                start,
                step,
            } => write!(
                f,
                "range($invalidatedKeys, key, {end}, {start}, {step}, getUniquePersistenObject({slot}))"
            ),
            Op::ForEach {
                shape,
                verb,
                slot,
                func,
                source,
                context,
                incremental,
                ..
            } => {
                let primitive = match shape {
                    Shape::Array => "forArray",
                    Shape::Object => "forObject",
                };
                write!(
                    f,
                    "{primitive}({verb}, $invalidatedKeys, key, {}, {source}, {context}, getUniquePersistenObject({slot}), {incremental})",
                    func.name
                )
            }
        }
    }
}

impl fmt::Display for KeyStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyStep::Fixed(key) => write!(f, "{key}"),
            KeyStep::Current(depth) => write!(f, "key{depth}"),
            KeyStep::Computed(op) => write!(f, "{op}"),
        }
    }
}

impl fmt::Display for TrackLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut target = match self.base {
            TrackBase::Root => "$model".to_string(),
            TrackBase::TopLevel => "$res".to_string(),
        };
        let Some((key, containers)) = self.steps.split_last() else {
            return write!(f, "// {}", self.comment);
        };
        for step in containers {
            let _ = write!(target, "[{step}]");
        }
        if let Some(condition) = self.condition {
            write!(f, "$cond_{condition} && ")?;
        }
        write!(f, "track($invalidatedKeys, key, {target}, {key});")
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "function {}($invalidatedKeys, key, val, context) {{", self.name)?;
        for condition in 0..self.conditions.len() {
            writeln!(f, "  let $cond_{condition} = false;")?;
        }
        writeln!(f, "  const res = {};", self.body)?;
        if self.tracking.untrack {
            writeln!(f, "  untrack($invalidatedKeys, key);")?;
        }
        for line in &self.tracking.lines {
            writeln!(f, "  // {}", line.comment)?;
            if !line.steps.is_empty() {
                writeln!(f, "  {line}")?;
            }
        }
        writeln!(f, "  return res;")?;
        writeln!(f, "}}")
    }
}

fn render_path(path: &[SetterSegment], params: &[String], depth: usize) -> String {
    let mut rendered = "$model".to_string();
    for segment in &path[..depth] {
        match segment {
            SetterSegment::Fixed(key) => {
                let _ = write!(rendered, "[{key}]");
            }
            SetterSegment::Arg(index) => {
                let _ = write!(rendered, "[{}]", params[*index]);
            }
        }
    }
    rendered
}

impl fmt::Display for SetterProc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut params = self.params.clone();
        match self.kind {
            SetterKind::Set => params.push("value".to_string()),
            SetterKind::Splice => {
                params.push("removedLength".to_string());
                params.push("...insertedItems".to_string());
            }
        }
        writeln!(f, "function {}({}) {{", self.name, params.join(", "))?;

        let len = self.path.len();
        let key = |depth: usize| match &self.path[depth] {
            SetterSegment::Fixed(key) => key.to_string(),
            SetterSegment::Arg(index) => self.params[*index].clone(),
        };
        for step in &self.steps {
            match step {
                SetterStep::Invalidate { prefix } => writeln!(
                    f,
                    "  triggerInvalidations({}, {});",
                    render_path(&self.path, &self.params, *prefix),
                    key(*prefix)
                )?,
                SetterStep::InvalidateSpliced => {
                    let array = render_path(&self.path, &self.params, len - 1);
                    let start = key(len - 1);
                    writeln!(f, "  const len = {array}.length;")?;
                    writeln!(
                        f,
                        "  const end = removedLength === insertedItems.length ? {start} + removedLength : Math.max(len, len + insertedItems.length - removedLength);"
                    )?;
                    writeln!(
                        f,
                        "  for (let i = {start}; i < end; i++) triggerInvalidations({array}, i);"
                    )?;
                }
                SetterStep::Taint => {
                    for depth in 0..len {
                        writeln!(
                            f,
                            "  $tainted.add({});",
                            render_path(&self.path, &self.params, depth)
                        )?;
                    }
                }
                SetterStep::Write => {
                    let target = render_path(&self.path, &self.params, len);
                    writeln!(
                        f,
                        "  if (value === undefined) {{ delete {target}; }} else {{ {target} = value; }}"
                    )?;
                }
                SetterStep::Splice => writeln!(
                    f,
                    "  {}.splice({}, removedLength, ...insertedItems);",
                    render_path(&self.path, &self.params, len - 1),
                    key(len - 1)
                )?,
                SetterStep::Recalculate => writeln!(f, "  recalculate();")?,
                SetterStep::RebuildAll => writeln!(f, "  rebuildAll();")?,
            }
        }
        writeln!(f, "}}")
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "// {} program", self.mode.name())?;
        for getter in &self.getters {
            let mut callbacks = Vec::new();
            getter.function.body.functions(&mut callbacks);
            for callback in callbacks {
                writeln!(f, "{callback}")?;
            }
            writeln!(f, "{}", getter.function)?;
            writeln!(
                f,
                "$res[{:?}] = {}($rootKeys, {:?}); // invalidates: {}\n",
                getter.name, getter.function.name, getter.name, getter.invalidates
            )?;
        }
        for setter in self.setters.values() {
            writeln!(f, "{setter}")?;
        }
        Ok(())
    }
}
