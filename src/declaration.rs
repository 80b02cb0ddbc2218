//! Loader for model declarations written as YAML or JSON.
//!
//! Expressions are nested arrays whose first element names the kind:
//! `[get, [root], items]` reads `items` from the model root, `[arg, 0]` is
//! the first setter argument and a lone `[val]` is a bare token. Scalars are
//! literals. A declaration is an ordered list of entries:
//!
//! ```yaml
//! - name: total
//!   getter: [size, [get, [root], items]]
//! - name: setItem
//!   setter: [items, [arg, 0]]
//! ```

use serde::Deserialize;
use serde_json::Value as Json;

use crate::ast::{Declaration, Expr, Literal, Model, SetterDecl};
use crate::error::{CompileError, CompileResult};
use crate::token::TokenKind;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeclarationEntry {
    pub name: String,
    #[serde(default)]
    pub getter: Option<Json>,
    #[serde(default)]
    pub setter: Option<Json>,
    #[serde(default)]
    pub splice: Option<Json>,
}

pub fn parse_yaml(source: &str) -> CompileResult<Model> {
    let entries: Vec<DeclarationEntry> =
        serde_yaml::from_str(source).map_err(|error| CompileError::InvalidDeclaration {
            message: error.to_string(),
        })?;
    from_entries(entries)
}

/// Same entry list as [`parse_yaml`], already decoded as JSON.
pub fn from_json(value: &Json) -> CompileResult<Model> {
    let entries: Vec<DeclarationEntry> =
        serde_json::from_value(value.clone()).map_err(|error| CompileError::InvalidDeclaration {
            message: error.to_string(),
        })?;
    from_entries(entries)
}

pub fn from_entries(entries: Vec<DeclarationEntry>) -> CompileResult<Model> {
    let mut model = Model::new();
    for entry in entries {
        let declaration = match (&entry.getter, &entry.setter, &entry.splice) {
            (Some(getter), None, None) => Declaration::Getter(expr_from_json(&entry.name, getter)?),
            (None, Some(path), None) => {
                Declaration::Setter(SetterDecl::set(setter_path(&entry.name, path)?))
            }
            (None, None, Some(path)) => {
                Declaration::Setter(SetterDecl::splice(setter_path(&entry.name, path)?))
            }
            _ => {
                return Err(CompileError::InvalidDeclaration {
                    message: format!(
                        "entry '{}' must have exactly one of getter, setter or splice",
                        entry.name
                    ),
                });
            }
        };
        model.declarations.push((entry.name, declaration));
    }
    Ok(model)
}

fn setter_path(name: &str, path: &Json) -> CompileResult<Vec<Expr>> {
    let Json::Array(segments) = path else {
        return Err(CompileError::InvalidDeclaration {
            message: format!("setter '{name}' path must be a list"),
        });
    };
    segments
        .iter()
        .map(|segment| expr_from_json(name, segment))
        .collect()
}

pub fn expr_from_json(name: &str, value: &Json) -> CompileResult<Expr> {
    match value {
        Json::Null => Ok(Expr::Literal(Literal::Null)),
        Json::Bool(value) => Ok(Expr::Literal(Literal::Bool(*value))),
        Json::Number(number) => number
            .as_f64()
            .map(|value| Expr::Literal(Literal::Number(value)))
            .ok_or_else(|| CompileError::InvalidDeclaration {
                message: format!("number {number} in '{name}' is out of range"),
            }),
        Json::String(value) => Ok(Expr::Literal(Literal::String(value.clone()))),
        Json::Array(items) => {
            let Some((Json::String(head), rest)) = items.split_first() else {
                return Err(CompileError::InvalidDeclaration {
                    message: format!("expression in '{name}' must start with a token name"),
                });
            };
            if head == "arg" {
                return match rest {
                    [Json::Number(index)] => index
                        .as_u64()
                        .map(|index| Expr::Arg(index as usize))
                        .ok_or_else(|| CompileError::InvalidDeclaration {
                            message: format!("argument index {index} in '{name}' is invalid"),
                        }),
                    _ => Err(CompileError::InvalidDeclaration {
                        message: format!("[arg, n] in '{name}' takes one index"),
                    }),
                };
            }
            let kind = TokenKind::from_name(head).ok_or_else(|| CompileError::UnknownToken {
                name: name.to_string(),
                token: head.clone(),
            })?;
            if kind.is_marker() {
                if !rest.is_empty() {
                    return Err(CompileError::InvalidDeclaration {
                        message: format!("marker token '{head}' in '{name}' takes no arguments"),
                    });
                }
                return Ok(Expr::Token(kind));
            }
            let args = rest
                .iter()
                .map(|item| expr_from_json(name, item))
                .collect::<CompileResult<Vec<_>>>()?;
            Ok(Expr::node(kind, args))
        }
        Json::Object(_) => Err(CompileError::InvalidDeclaration {
            message: format!("maps are not expressions in '{name}'; use [object, name, value, ...]"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::SetterKind;

    #[test]
    fn parses_getters_and_setters_in_order() {
        let model = parse_yaml(
            r#"
- name: total
  getter: [size, [get, [root], items]]
- name: setItem
  setter: [items, [arg, 0]]
- name: spliceItems
  splice: [items, [arg, 0]]
"#,
        )
        .expect("declaration parses");

        let names: Vec<&str> = model
            .declarations
            .iter()
            .map(|(name, _)| name.as_str())
            .collect();
        assert_eq!(names, ["total", "setItem", "spliceItems"]);
        assert_eq!(
            model.declarations[0].1,
            Declaration::Getter(Expr::node(
                TokenKind::Size,
                vec![Expr::model_path(&["items"])]
            ))
        );
        match &model.declarations[2].1 {
            Declaration::Setter(setter) => {
                assert_eq!(setter.kind, SetterKind::Splice);
                assert_eq!(setter.path, vec![Expr::str("items"), Expr::Arg(0)]);
            }
            other => panic!("expected splice setter, got {other:?}"),
        }
    }

    #[test]
    fn json_and_yaml_declarations_agree() {
        let from_json = from_json(&serde_json::json!([
            {"name": "total", "getter": ["size", ["get", ["root"], "items"]]},
            {"name": "setItem", "setter": ["items", ["arg", 0]]}
        ]))
        .expect("json declaration parses");
        let from_yaml = parse_yaml(
            "- name: total\n  getter: [size, [get, [root], items]]\n- name: setItem\n  setter: [items, [arg, 0]]\n",
        )
        .expect("yaml declaration parses");
        assert_eq!(from_json, from_yaml);
    }

    #[test]
    fn rejects_unknown_tokens() {
        let error = parse_yaml("- name: broken\n  getter: [frobnicate, 1]\n")
            .expect_err("unknown token must fail");
        assert_eq!(
            error,
            CompileError::UnknownToken {
                name: "broken".to_string(),
                token: "frobnicate".to_string(),
            }
        );
    }

    #[test]
    fn rejects_entries_with_two_bodies() {
        let error = parse_yaml("- name: both\n  getter: 1\n  setter: [a]\n")
            .expect_err("two bodies must fail");
        assert!(matches!(error, CompileError::InvalidDeclaration { .. }));
    }
}
