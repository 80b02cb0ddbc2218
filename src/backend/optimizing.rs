use std::rc::Rc;

use anyhow::{Context, Result};
use indexmap::IndexMap;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::ast::{Key, Literal, Model, SetterKind};
use crate::backend::{
    Backend, Generator, PreparedBackend, base_expr, base_function, function_body, prepare_with,
    property_name, tag_model,
};
use crate::error::{CompileError, CompileResult};
use crate::program::{
    Constructor, Function, KeyStep, Mode, Op, SetterProc, SetterStep, Shape, TrackBase, TrackLine,
    Tracking,
};
use crate::split::Setter;
use crate::tagging::{
    Annotation, CondId, ExprId, Node, NodeKind, Path, PathSegment, TaggedModel,
    find_references_to_path_in_all_getters, invalidates, path_matches, path_of_expr,
    resolve_against_setter, setter_path,
};
use crate::token::TokenKind;

/// Dependency-tracking generator: fine-grained invalidation, persistent
/// outputs and setters specialized to the getters they can reach.
pub struct Optimizing;

impl Optimizing {
    pub fn new() -> Self {
        Self
    }
}

impl Default for Optimizing {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for Optimizing {
    fn name(&self) -> &'static str {
        "optimizing"
    }

    fn prepare(&self, model: &Model) -> Result<Box<dyn PreparedBackend>> {
        let tagged = tag_model(model).context("Compiling model for the optimizing backend")?;
        prepare_with(&OptimizingGenerator::new(&tagged))
    }
}

pub struct OptimizingGenerator<'a> {
    model: &'a TaggedModel,
    /// Function head → condition ids owning a flag, in path map order.
    conditions: FxHashMap<ExprId, Vec<CondId>>,
}

impl<'a> OptimizingGenerator<'a> {
    pub fn new(model: &'a TaggedModel) -> Self {
        let mut conditions = FxHashMap::default();
        for getter in model.getters.values() {
            for head in &getter.functions {
                let mut ids = Vec::new();
                if let Some(paths) = &model.annotation(head.id).paths {
                    for condition in paths.values().flatten() {
                        if !ids.contains(condition) {
                            ids.push(*condition);
                        }
                    }
                }
                conditions.insert(head.id, ids);
            }
        }
        Self { model, conditions }
    }

    fn condition_slot(&self, node: &Node) -> Option<usize> {
        let annotation = self.model.annotation(node.id);
        self.conditions
            .get(&annotation.func_id)?
            .iter()
            .position(|condition| *condition == node.id)
    }

    fn invalidates_expr(&self, annotation: &Annotation) -> bool {
        invalidates(&path_of_expr(annotation), self.model)
    }

    fn key_steps(&self, path: &Path) -> CompileResult<Option<Vec<KeyStep>>> {
        let mut steps = Vec::with_capacity(path.len().saturating_sub(1));
        for segment in &path.segments()[1..] {
            steps.push(match segment {
                PathSegment::Fixed(key) => KeyStep::Fixed(key.clone()),
                PathSegment::IterKey(depth) => KeyStep::Current(*depth),
                PathSegment::Computed(expr) => KeyStep::Computed(self.generate_expr(&expr.node)?),
                PathSegment::Wildcard | PathSegment::Root | PathSegment::TopLevel => {
                    return Ok(None);
                }
            });
        }
        Ok(Some(steps))
    }

    /// Track calls for one function, in path map order.
    fn tracking(&self, head: &Node, conditions: &[CondId]) -> CompileResult<Tracking> {
        let annotation = self.model.annotation(head.id);
        let paths = annotation
            .paths
            .as_ref()
            .expect("function heads carry a path map");

        let mut lines = Vec::new();
        let mut resolved: IndexMap<(Path, Option<usize>), String> = IndexMap::new();
        for (path, condition) in paths {
            let slot = match condition {
                Some(condition) => Some(
                    conditions
                        .iter()
                        .position(|candidate| candidate == condition)
                        .ok_or_else(|| CompileError::UnresolvedCondition {
                            getter: annotation.root_name.to_string(),
                            condition: *condition,
                        })?,
                ),
                None => None,
            };

            let targets: Vec<Path> = if path.is_top_level_based() {
                vec![path.clone()]
            } else {
                self.model
                    .setters
                    .values()
                    .filter(|setter| path_matches(path, setter))
                    .map(|setter| resolve_against_setter(path, setter))
                    .collect()
            };
            let trackable: Vec<Path> = targets
                .into_iter()
                .filter(Path::is_trackable)
                .collect();
            if trackable.is_empty() {
                lines.push(TrackLine {
                    comment: format!("{path} (not tracked)"),
                    condition: slot,
                    base: TrackBase::Root,
                    steps: Vec::new(),
                });
            }
            for target in trackable {
                resolved
                    .entry((target, slot))
                    .or_insert_with(|| path.to_string());
            }
        }

        let unconditional: FxHashSet<&Path> = resolved
            .keys()
            .filter(|(_, slot)| slot.is_none())
            .map(|(path, _)| path)
            .collect();
        for ((target, slot), comment) in &resolved {
            if slot.is_some() && unconditional.contains(target) {
                continue;
            }
            let Some(steps) = self.key_steps(target)? else {
                continue;
            };
            let base = if target.is_top_level_based() {
                TrackBase::TopLevel
            } else {
                TrackBase::Root
            };
            lines.push(TrackLine {
                comment: comment.clone(),
                condition: *slot,
                base,
                steps,
            });
        }

        Ok(Tracking {
            untrack: lines.iter().any(|line| !line.steps.is_empty()),
            lines,
        })
    }
}

impl Generator for OptimizingGenerator<'_> {
    fn mode(&self) -> Mode {
        Mode::Optimizing
    }

    fn model(&self) -> &TaggedModel {
        self.model
    }

    fn generate_expr(&self, node: &Rc<Node>) -> CompileResult<Op> {
        let annotation = self.model.annotation(node.id);
        let NodeKind::Call { kind, args } = &node.kind else {
            return base_expr(self, node);
        };
        let boxed = |child: &Rc<Node>| self.generate_expr(child).map(Box::new);

        match kind {
            TokenKind::Get if annotation.conditional => match self.condition_slot(node) {
                Some(condition) => Ok(Op::GuardedGet {
                    condition,
                    object: boxed(&args[0])?,
                    key: boxed(&args[1])?,
                }),
                None => base_expr(self, node),
            },
            TokenKind::Object | TokenKind::Array => {
                let constructor = match kind {
                    TokenKind::Object => Constructor::Object(
                        args.iter()
                            .step_by(2)
                            .map(|name| property_name(name, &annotation.root_name))
                            .collect::<CompileResult<_>>()?,
                    ),
                    _ => Constructor::Array(args.len()),
                };
                Ok(Op::Persistent {
                    constructor,
                    slot: node.id,
                    raw: Box::new(base_expr(self, node)?),
                    invalidates: self.invalidates_expr(annotation),
                })
            }
            TokenKind::Keys | TokenKind::Values => Ok(Op::ValuesOrKeys {
                slot: node.id,
                values: *kind == TokenKind::Values,
                source: boxed(&args[0])?,
            }),
            TokenKind::Size => Ok(Op::Size {
                slot: node.id,
                source: boxed(&args[0])?,
            }),
            TokenKind::Assign | TokenKind::Defaults => Ok(Op::AssignOrDefaults {
                slot: node.id,
                assign: *kind == TokenKind::Assign,
                source: boxed(&args[0])?,
            }),
            TokenKind::Range => {
                let or_default = |index: usize, default: f64| match args.get(index) {
                    Some(arg) => boxed(arg),
                    None => Ok(Box::new(Op::Literal(Literal::Number(default)))),
                };
                Ok(Op::Range {
                    slot: node.id,
                    end: boxed(&args[0])?,
                    start: or_default(1, 0.0)?,
                    step: or_default(2, 1.0)?,
                })
            }
            kind if kind.data().collection_verb => Ok(Op::ForEach {
                shape: if kind.data().array_verb {
                    Shape::Array
                } else {
                    Shape::Object
                },
                verb: *kind,
                slot: node.id,
                func: Rc::new(self.generate_function(&args[0])?),
                source: boxed(&args[1])?,
                context: match args.get(2) {
                    Some(context) => boxed(context)?,
                    None => Box::new(Op::NoValue),
                },
                incremental: annotation.source_path.is_some(),
                invalidates: self.invalidates_expr(annotation),
            }),
            _ => base_expr(self, node),
        }
    }

    fn generate_function(&self, head: &Rc<Node>) -> CompileResult<Function> {
        let conditions = self.conditions.get(&head.id).cloned().unwrap_or_default();
        for condition in &conditions {
            let owner = self
                .model
                .annotations
                .get(*condition)
                .map(|annotation| annotation.func_id);
            if owner != Some(head.id) {
                return Err(CompileError::UnresolvedCondition {
                    getter: self.model.annotation(head.id).root_name.to_string(),
                    condition: *condition,
                });
            }
        }

        let mut function = base_function(self, head)?;
        function.tracking = self.tracking(head, &conditions)?;
        function.conditions = conditions;
        tracing::trace!(
            function = %function.name,
            body = %function_body(head),
            tracks = function.tracking.lines.len(),
            "generated function"
        );
        Ok(function)
    }

    fn getter_invalidates(&self, name: &str) -> bool {
        let path = Path(vec![PathSegment::TopLevel, PathSegment::Fixed(Key::name(name))]);
        invalidates(&path, self.model)
    }

    fn generate_setter(&self, setter: &Setter) -> CompileResult<SetterProc> {
        let affected = find_references_to_path_in_all_getters(&setter_path(setter), self.model);
        let invalidates = !affected.is_empty();
        tracing::debug!(
            setter = %setter.name,
            invalidates,
            affected = ?affected,
            "specialized setter"
        );

        let mut steps = Vec::new();
        if invalidates {
            let prefixes = match setter.kind {
                SetterKind::Set => setter.path.len(),
                SetterKind::Splice => setter.path.len() - 1,
            };
            steps.extend((0..prefixes).map(|prefix| SetterStep::Invalidate { prefix }));
            if setter.kind == SetterKind::Splice {
                steps.push(SetterStep::InvalidateSpliced);
            }
        }
        steps.push(SetterStep::Taint);
        steps.push(match setter.kind {
            SetterKind::Set => SetterStep::Write,
            SetterKind::Splice => SetterStep::Splice,
        });
        steps.push(SetterStep::Recalculate);

        Ok(SetterProc {
            name: setter.name.clone(),
            kind: setter.kind,
            params: setter.param_names(),
            path: setter.path.clone(),
            invalidates,
            steps,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Expr, SetterDecl};
    use crate::program::Program;

    fn compile(model: &Model) -> Program {
        let tagged = tag_model(model).expect("model tags");
        OptimizingGenerator::new(&tagged)
            .generate()
            .expect("program generates")
    }

    fn shop() -> Model {
        Model::new()
            .getter(
                "total",
                Expr::node(TokenKind::Size, vec![Expr::model_path(&["items"])]),
            )
            .getter(
                "current",
                Expr::get(Expr::model_path(&["items"]), Expr::model_path(&["selected"])),
            )
            .setter("setItem", SetterDecl::set(vec![Expr::str("items"), Expr::Arg(0)]))
            .setter("select", SetterDecl::set(vec![Expr::str("selected")]))
            .setter("setLog", SetterDecl::set(vec![Expr::str("log")]))
            .setter("spliceItems", SetterDecl::splice(vec![Expr::str("items"), Expr::Arg(0)]))
    }

    #[test]
    fn unreferenced_setters_never_invalidate() {
        let program = compile(&shop());
        let set_log = &program.setters["setLog"];
        assert!(!set_log.invalidates);
        assert!(!set_log.triggers_invalidations());
        assert_eq!(
            set_log.steps,
            vec![SetterStep::Taint, SetterStep::Write, SetterStep::Recalculate]
        );
    }

    #[test]
    fn referenced_setters_invalidate_every_prefix() {
        let program = compile(&shop());
        assert_eq!(
            program.setters["setItem"].steps,
            vec![
                SetterStep::Invalidate { prefix: 0 },
                SetterStep::Invalidate { prefix: 1 },
                SetterStep::Taint,
                SetterStep::Write,
                SetterStep::Recalculate,
            ]
        );
        assert_eq!(
            program.setters["spliceItems"].steps,
            vec![
                SetterStep::Invalidate { prefix: 0 },
                SetterStep::InvalidateSpliced,
                SetterStep::Taint,
                SetterStep::Splice,
                SetterStep::Recalculate,
            ]
        );
    }

    #[test]
    fn computed_lookup_is_guarded_and_tracked_conditionally() {
        let program = compile(&shop());
        let current = &program.getter("current").expect("getter").function;

        assert_eq!(current.conditions.len(), 1);
        assert!(matches!(current.body, Op::GuardedGet { condition: 0, .. }));
        assert!(current.tracking.untrack);

        let tracked: Vec<_> = current
            .tracking
            .lines
            .iter()
            .filter(|line| !line.steps.is_empty())
            .collect();
        let selected = tracked
            .iter()
            .find(|line| matches!(line.steps.as_slice(), [KeyStep::Fixed(key)] if *key == Key::name("selected")))
            .expect("selector tracked");
        assert_eq!(selected.condition, None);

        let item = tracked
            .iter()
            .find(|line| matches!(line.steps.as_slice(), [_, KeyStep::Computed(_)]))
            .expect("selected item tracked");
        assert_eq!(item.condition, Some(0));
    }

    #[test]
    fn reachability_paths_are_never_tracked() {
        let program = compile(
            &Model::new()
                .getter(
                    "names",
                    Expr::collection(
                        TokenKind::MapValues,
                        Expr::get(Expr::val(), Expr::str("name")),
                        Expr::model_path(&["users"]),
                    ),
                )
                .setter(
                    "setName",
                    SetterDecl::set(vec![Expr::str("users"), Expr::Arg(0), Expr::str("name")]),
                ),
        );
        let root = &program.getter("names").expect("getter").function;
        let tracked: Vec<_> = root
            .tracking
            .lines
            .iter()
            .filter(|line| !line.steps.is_empty())
            .map(|line| line.steps.as_slice())
            .collect();
        assert!(matches!(tracked.as_slice(), [[KeyStep::Fixed(key)]] if *key == Key::name("users")));
        let Op::ForEach {
            func, incremental, ..
        } = &root.body
        else {
            panic!("expected forObject, got {}", root.body);
        };
        assert!(incremental);
        assert!(matches!(
            func.tracking.lines.iter().find(|line| !line.steps.is_empty()).map(|line| line.steps.as_slice()),
            Some([KeyStep::Fixed(_), KeyStep::Current(1), KeyStep::Fixed(_)])
        ));
    }

    #[test]
    fn functions_without_tracked_paths_skip_untrack() {
        let program = compile(&Model::new().getter("answer", Expr::num(42.0)));
        let answer = &program.getter("answer").expect("getter").function;
        assert!(!answer.tracking.untrack);
        assert!(answer.tracking.lines.is_empty());
    }

    #[test]
    fn compilation_is_idempotent() {
        let first = compile(&shop()).to_string();
        let second = compile(&shop()).to_string();
        assert_eq!(first, second);
    }
}
