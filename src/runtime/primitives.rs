//! Value-level semantics shared by both backends: scalar operators, the
//! structural primitives and the assembly of collection outputs.

use std::cmp::Ordering;
use std::rc::Rc;

use indexmap::IndexMap;

use super::value::{Entries, Value};
use crate::ast::Key;
use crate::token::TokenKind;

pub fn apply(kind: TokenKind, args: &[Value]) -> Value {
    let arg = |index: usize| args.get(index).cloned().unwrap_or(Value::Null);
    match kind {
        TokenKind::Not => Value::Bool(!arg(0).is_truthy()),
        TokenKind::Eq => Value::Bool(strict_equal(&arg(0), &arg(1))),
        TokenKind::Gt => Value::Bool(compare(&arg(0), &arg(1)) == Some(Ordering::Greater)),
        TokenKind::Gte => Value::Bool(matches!(
            compare(&arg(0), &arg(1)),
            Some(Ordering::Greater | Ordering::Equal)
        )),
        TokenKind::Lt => Value::Bool(compare(&arg(0), &arg(1)) == Some(Ordering::Less)),
        TokenKind::Lte => Value::Bool(matches!(
            compare(&arg(0), &arg(1)),
            Some(Ordering::Less | Ordering::Equal)
        )),
        TokenKind::Plus => plus(args),
        TokenKind::Minus => Value::Number(arg(0).to_number() - arg(1).to_number()),
        TokenKind::Mult => Value::Number(args.iter().map(Value::to_number).product()),
        TokenKind::Div => Value::Number(arg(0).to_number() / arg(1).to_number()),
        TokenKind::Mod => Value::Number(arg(0).to_number() % arg(1).to_number()),
        TokenKind::Keys => keys_or_values(&arg(0), false),
        TokenKind::Values => keys_or_values(&arg(0), true),
        TokenKind::Size => size(&arg(0)),
        TokenKind::Assign => assign_or_defaults(&arg(0), true),
        TokenKind::Defaults => assign_or_defaults(&arg(0), false),
        TokenKind::Range => range(
            &arg(0),
            args.get(1).unwrap_or(&Value::Number(0.0)),
            args.get(2).unwrap_or(&Value::Number(1.0)),
        ),
        _ => Value::Null,
    }
}

fn strict_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(left), Value::Number(right)) => left == right,
        (left, right) => left.same(right),
    }
}

fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::String(left), Value::String(right)) => Some(left.cmp(right)),
        (left, right) => left.to_number().partial_cmp(&right.to_number()),
    }
}

fn plus(args: &[Value]) -> Value {
    if args.iter().any(|arg| matches!(arg, Value::String(_))) {
        let joined: String = args.iter().map(ToString::to_string).collect();
        Value::String(Rc::from(joined))
    } else {
        Value::Number(args.iter().map(Value::to_number).sum())
    }
}

pub fn keys_or_values(source: &Value, values: bool) -> Value {
    let entries = source.entries().unwrap_or_default();
    Value::array(
        entries
            .into_iter()
            .map(|(key, value)| {
                if values {
                    value
                } else {
                    Value::String(key.as_name())
                }
            })
            .collect(),
    )
}

pub fn size(source: &Value) -> Value {
    Value::Number(source.len() as f64)
}

/// Merges an array of objects; `assign` lets later entries win, defaults
/// keeps the first value seen for each name.
pub fn assign_or_defaults(source: &Value, assign: bool) -> Value {
    let mut merged = Entries::new();
    let parts = match source {
        Value::Array(array) => array.borrow().clone(),
        Value::Null => Vec::new(),
        other => vec![other.clone()],
    };
    for part in parts {
        let Value::Object(object) = part else {
            continue;
        };
        for (name, value) in object.borrow().iter() {
            if assign || !merged.contains_key(name) {
                merged.insert(Rc::clone(name), value.clone());
            }
        }
    }
    Value::object(merged)
}

pub fn range(end: &Value, start: &Value, step: &Value) -> Value {
    let (end, start, step) = (end.to_number(), start.to_number(), step.to_number());
    let mut items = Vec::new();
    if step.is_nan() || step == 0.0 || end.is_nan() || start.is_nan() {
        return Value::array(items);
    }
    let mut current = start;
    while (step > 0.0 && current < end) || (step < 0.0 && current > end) {
        items.push(Value::Number(current));
        current += step;
    }
    Value::array(items)
}

/// Builds a collection verb's output from its source entries and the
/// callback result of every key.
///
/// `previous` is the last output of the same invocation; unchanged groups of
/// `groupBy` keep their identity.
pub fn assemble(
    verb: TokenKind,
    entries: &[(Key, Value)],
    results: &IndexMap<Key, Value>,
    previous: Option<&Value>,
) -> Value {
    let result = |key: &Key| results.get(key).cloned().unwrap_or(Value::Null);
    let truthy = |key: &Key| results.get(key).is_some_and(Value::is_truthy);
    let named = |pairs: Vec<(Rc<str>, Value)>| Value::object(pairs.into_iter().collect());

    match verb {
        TokenKind::Map | TokenKind::RecursiveMap => {
            Value::array(entries.iter().map(|(key, _)| result(key)).collect())
        }
        TokenKind::MapValues | TokenKind::RecursiveMapValues => named(
            entries
                .iter()
                .map(|(key, _)| (key.as_name(), result(key)))
                .collect(),
        ),
        TokenKind::Any | TokenKind::AnyValues => {
            Value::Bool(entries.iter().any(|(key, _)| truthy(key)))
        }
        TokenKind::Filter => Value::array(
            entries
                .iter()
                .filter(|(key, _)| truthy(key))
                .map(|(_, value)| value.clone())
                .collect(),
        ),
        TokenKind::FilterBy => named(
            entries
                .iter()
                .filter(|(key, _)| truthy(key))
                .map(|(key, value)| (key.as_name(), value.clone()))
                .collect(),
        ),
        TokenKind::KeyBy | TokenKind::MapKeys => named(
            entries
                .iter()
                .map(|(key, value)| (result(key).to_key_string(), value.clone()))
                .collect(),
        ),
        TokenKind::GroupBy => {
            let mut groups: IndexMap<Rc<str>, Entries> = IndexMap::new();
            for (key, value) in entries {
                groups
                    .entry(result(key).to_key_string())
                    .or_default()
                    .insert(key.as_name(), value.clone());
            }
            named(
                groups
                    .into_iter()
                    .map(|(name, members)| {
                        let fresh = Value::object(members);
                        let kept = previous
                            .map(|previous| previous.get_key(&Key::Name(Rc::clone(&name))))
                            .filter(|old| old.shallow_equal(&fresh));
                        (name, kept.unwrap_or(fresh))
                    })
                    .collect(),
            )
        }
        _ => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entries(value: &Value) -> Vec<(Key, Value)> {
        value.entries().expect("container")
    }

    #[test]
    fn scalar_operators_follow_loose_number_rules() {
        assert_eq!(
            apply(TokenKind::Plus, &[Value::Number(1.0), Value::Number(2.0)]),
            Value::Number(3.0)
        );
        assert_eq!(
            apply(TokenKind::Plus, &[Value::string("a"), Value::Number(2.0)]),
            Value::string("a2")
        );
        assert_eq!(
            apply(TokenKind::Gt, &[Value::Number(3.0), Value::Null]),
            Value::Bool(true)
        );
        assert_eq!(
            apply(TokenKind::Eq, &[Value::string("x"), Value::string("x")]),
            Value::Bool(true)
        );
        assert_eq!(
            apply(TokenKind::Mod, &[Value::Number(7.0), Value::Number(4.0)]),
            Value::Number(3.0)
        );
    }

    #[test]
    fn range_defaults_and_negative_steps() {
        assert_eq!(
            apply(TokenKind::Range, &[Value::Number(3.0)]).to_json(),
            json!([0, 1, 2])
        );
        assert_eq!(
            range(&Value::Number(0.0), &Value::Number(3.0), &Value::Number(-1.0)).to_json(),
            json!([3, 2, 1])
        );
        assert_eq!(
            range(&Value::Number(5.0), &Value::Number(0.0), &Value::Number(0.0)).to_json(),
            json!([])
        );
    }

    #[test]
    fn assign_and_defaults_disagree_on_precedence() {
        let parts = Value::from_json(&json!([{"a": 1, "b": 1}, {"b": 2}]));
        assert_eq!(assign_or_defaults(&parts, true).to_json(), json!({"a": 1, "b": 2}));
        assert_eq!(assign_or_defaults(&parts, false).to_json(), json!({"a": 1, "b": 1}));
    }

    #[test]
    fn group_by_keeps_unchanged_groups() {
        let source = Value::from_json(&json!({"a": 1, "b": 2, "c": 3}));
        let source_entries = entries(&source);
        let parity: IndexMap<Key, Value> = source_entries
            .iter()
            .map(|(key, value)| {
                let odd = value.to_number() % 2.0 == 1.0;
                (key.clone(), Value::string(if odd { "odd" } else { "even" }))
            })
            .collect();

        let first = assemble(TokenKind::GroupBy, &source_entries, &parity, None);
        assert_eq!(
            first.to_json(),
            json!({"odd": {"a": 1, "c": 3}, "even": {"b": 2}})
        );

        let second = assemble(TokenKind::GroupBy, &source_entries, &parity, Some(&first));
        let odd = Value::string("odd");
        assert!(second.get(&odd).same(&first.get(&odd)));
    }

    #[test]
    fn filter_and_key_by_use_source_values() {
        let source = Value::from_json(&json!([{"id": "x"}, {"id": "y"}]));
        let source_entries = entries(&source);
        let ids: IndexMap<Key, Value> = source_entries
            .iter()
            .map(|(key, value)| (key.clone(), value.get(&Value::string("id"))))
            .collect();
        assert_eq!(
            assemble(TokenKind::KeyBy, &source_entries, &ids, None).to_json(),
            json!({"x": {"id": "x"}, "y": {"id": "y"}})
        );

        let keep_first: IndexMap<Key, Value> = [
            (Key::Index(0), Value::Bool(true)),
            (Key::Index(1), Value::Bool(false)),
        ]
        .into_iter()
        .collect();
        assert_eq!(
            assemble(TokenKind::Filter, &source_entries, &keep_first, None).to_json(),
            json!([{"id": "x"}])
        );
    }
}
