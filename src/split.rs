use indexmap::IndexMap;

use crate::ast::{Declaration, Expr, Key, Model, SetterKind, SetterSegment};
use crate::error::{CompileError, CompileResult};

pub type Getters = IndexMap<String, Expr>;
pub type Setters = IndexMap<String, Setter>;

/// A validated setter: its path pattern below the model root.
#[derive(Debug, Clone, PartialEq)]
pub struct Setter {
    pub name: String,
    pub kind: SetterKind,
    pub path: Vec<SetterSegment>,
}

impl Setter {
    /// Number of static arguments (the `[arg, n]` positions in the path).
    pub fn arg_count(&self) -> usize {
        self.path
            .iter()
            .filter(|segment| matches!(segment, SetterSegment::Arg(_)))
            .count()
    }

    pub fn param_names(&self) -> Vec<String> {
        (0..self.arg_count()).map(|index| format!("arg{index}")).collect()
    }
}

/// Partitions a declaration into getters and setters, keeping declaration order.
pub fn split_setters_getters(model: &Model) -> CompileResult<(Getters, Setters)> {
    let mut getters = Getters::new();
    let mut setters = Setters::new();

    for (name, declaration) in &model.declarations {
        if getters.contains_key(name) || setters.contains_key(name) {
            return Err(CompileError::NameCollision { name: name.clone() });
        }
        match declaration {
            Declaration::Getter(expr) => {
                getters.insert(name.clone(), expr.clone());
            }
            Declaration::Setter(decl) => {
                let path = decl
                    .path
                    .iter()
                    .map(|segment| setter_segment(name, segment))
                    .collect::<CompileResult<Vec<_>>>()?;
                let setter = Setter {
                    name: name.clone(),
                    kind: decl.kind,
                    path,
                };
                validate_setter(&setter)?;
                setters.insert(name.clone(), setter);
            }
        }
    }

    Ok((getters, setters))
}

fn setter_segment(name: &str, segment: &Expr) -> CompileResult<SetterSegment> {
    match segment {
        Expr::Literal(literal) => Ok(SetterSegment::Fixed(Key::from_literal(literal))),
        Expr::Arg(index) => Ok(SetterSegment::Arg(*index)),
        other => Err(malformed(
            name,
            format!("path segment {other:?} is neither a literal key nor an argument"),
        )),
    }
}

fn validate_setter(setter: &Setter) -> CompileResult<()> {
    if setter.path.is_empty() {
        return Err(malformed(&setter.name, "path is empty".to_string()));
    }
    let mut indices: Vec<usize> = setter
        .path
        .iter()
        .filter_map(|segment| match segment {
            SetterSegment::Arg(index) => Some(*index),
            SetterSegment::Fixed(_) => None,
        })
        .collect();
    indices.sort_unstable();
    if indices.iter().enumerate().any(|(position, index)| position != *index) {
        return Err(malformed(
            &setter.name,
            format!("arguments must be numbered 0..n without gaps or repeats, got {indices:?}"),
        ));
    }
    if setter.kind == SetterKind::Splice
        && !matches!(setter.path.last(), Some(SetterSegment::Arg(_)))
    {
        return Err(malformed(
            &setter.name,
            "splice path must end with the start index argument".to_string(),
        ));
    }
    Ok(())
}

fn malformed(name: &str, reason: String) -> CompileError {
    CompileError::MalformedSetter {
        name: name.to_string(),
        reason,
    }
}
