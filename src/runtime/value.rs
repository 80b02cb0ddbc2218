use std::cell::{Cell, Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use serde_json::Value as Json;

use crate::ast::{Key, Literal};

pub type ContainerId = u64;

static NEXT_CONTAINER_ID: AtomicU64 = AtomicU64::new(1);

/// Shared, mutable collection with a stable identity.
#[derive(Debug)]
pub struct Container<T> {
    id: ContainerId,
    revision: Cell<u64>,
    items: RefCell<T>,
}

impl<T> Container<T> {
    pub fn new(items: T) -> Rc<Self> {
        Rc::new(Self {
            id: NEXT_CONTAINER_ID.fetch_add(1, Ordering::Relaxed),
            revision: Cell::new(0),
            items: RefCell::new(items),
        })
    }

    pub fn id(&self) -> ContainerId {
        self.id
    }

    pub fn borrow(&self) -> Ref<'_, T> {
        self.items.borrow()
    }

    /// Number of mutable borrows so far.
    pub fn revision(&self) -> u64 {
        self.revision.get()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, T> {
        self.revision.set(self.revision.get() + 1);
        self.items.borrow_mut()
    }
}

pub type Entries = IndexMap<Rc<str>, Value>;
pub type ArrayRef = Rc<Container<Vec<Value>>>;
pub type ObjectRef = Rc<Container<Entries>>;

#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    Array(ArrayRef),
    Object(ObjectRef),
}

impl Value {
    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Container::new(items))
    }

    pub fn object(entries: Entries) -> Self {
        Value::Object(Container::new(entries))
    }

    pub fn string(value: &str) -> Self {
        Value::String(Rc::from(value))
    }

    pub fn from_literal(literal: &Literal) -> Self {
        match literal {
            Literal::Null => Value::Null,
            Literal::Bool(value) => Value::Bool(*value),
            Literal::Number(value) => Value::Number(*value),
            Literal::String(value) => Value::string(value),
        }
    }

    pub fn from_key(key: &Key) -> Self {
        match key {
            Key::Index(index) => Value::Number(*index as f64),
            Key::Name(name) => Value::String(Rc::clone(name)),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }

    pub fn container_id(&self) -> Option<ContainerId> {
        match self {
            Value::Array(array) => Some(array.id()),
            Value::Object(object) => Some(object.id()),
            _ => None,
        }
    }

    /// Identity plus revision: changes whenever the container is written.
    pub fn stamp(&self) -> Option<(ContainerId, u64)> {
        match self {
            Value::Array(array) => Some((array.id(), array.revision())),
            Value::Object(object) => Some((object.id(), object.revision())),
            _ => None,
        }
    }

    pub fn is_container(&self) -> bool {
        self.container_id().is_some()
    }

    /// Identity: the same container, or equal scalars.
    pub fn same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(left), Value::Bool(right)) => left == right,
            (Value::Number(left), Value::Number(right)) => left.to_bits() == right.to_bits(),
            (Value::String(left), Value::String(right)) => left == right,
            (Value::Array(left), Value::Array(right)) => Rc::ptr_eq(left, right),
            (Value::Object(left), Value::Object(right)) => Rc::ptr_eq(left, right),
            _ => false,
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(value) => *value,
            Value::Number(value) => *value != 0.0 && !value.is_nan(),
            Value::String(value) => !value.is_empty(),
            Value::Array(_) | Value::Object(_) => true,
        }
    }

    pub fn to_number(&self) -> f64 {
        match self {
            Value::Null => 0.0,
            Value::Bool(value) => f64::from(u8::from(*value)),
            Value::Number(value) => *value,
            Value::String(value) if value.trim().is_empty() => 0.0,
            Value::String(value) => value.trim().parse().unwrap_or(f64::NAN),
            Value::Array(_) | Value::Object(_) => f64::NAN,
        }
    }

    /// Property name this value stands for when used as an object key.
    pub fn to_key_string(&self) -> Rc<str> {
        match self {
            Value::String(value) => Rc::clone(value),
            other => Rc::from(other.to_string()),
        }
    }

    /// Raw key before it is matched against a container kind.
    pub fn to_key(&self) -> Option<Key> {
        match self {
            Value::Number(value) if value.fract() == 0.0 && *value >= 0.0 => {
                Some(Key::Index(*value as usize))
            }
            Value::Array(_) | Value::Object(_) => None,
            other => Some(Key::Name(other.to_key_string())),
        }
    }

    /// `key` in the form this container stores it: positions for arrays,
    /// property names for objects.
    pub fn normalize_key(&self, key: Key) -> Option<Key> {
        match (self, key) {
            (Value::Array(_), Key::Index(index)) => Some(Key::Index(index)),
            (Value::Array(_), Key::Name(name)) => name.parse().ok().map(Key::Index),
            (Value::Object(_), key) => Some(Key::Name(key.as_name())),
            _ => None,
        }
    }

    pub fn get_key(&self, key: &Key) -> Value {
        match (self, key) {
            (Value::Array(array), Key::Index(index)) => {
                array.borrow().get(*index).cloned().unwrap_or(Value::Null)
            }
            (Value::Object(object), Key::Name(name)) => {
                object.borrow().get(name).cloned().unwrap_or(Value::Null)
            }
            (container @ (Value::Array(_) | Value::Object(_)), key) => {
                match container.normalize_key(key.clone()) {
                    Some(normalized) if &normalized != key => container.get_key(&normalized),
                    _ => Value::Null,
                }
            }
            _ => Value::Null,
        }
    }

    /// Property lookup; anything missing reads as null.
    pub fn get(&self, key: &Value) -> Value {
        match key.to_key() {
            Some(key) => self.get_key(&key),
            None => Value::Null,
        }
    }

    /// Entries in iteration order, or `None` for scalars.
    pub fn entries(&self) -> Option<Vec<(Key, Value)>> {
        match self {
            Value::Array(array) => Some(
                array
                    .borrow()
                    .iter()
                    .enumerate()
                    .map(|(index, value)| (Key::Index(index), value.clone()))
                    .collect(),
            ),
            Value::Object(object) => Some(
                object
                    .borrow()
                    .iter()
                    .map(|(name, value)| (Key::Name(Rc::clone(name)), value.clone()))
                    .collect(),
            ),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Value::Array(array) => array.borrow().len(),
            Value::Object(object) => object.borrow().len(),
            Value::String(value) => value.chars().count(),
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Same kind, same keys in the same order and identical entries.
    pub fn shallow_equal(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Array(left), Value::Array(right)) => {
                Rc::ptr_eq(left, right) || {
                    let (left, right) = (left.borrow(), right.borrow());
                    left.len() == right.len()
                        && left.iter().zip(right.iter()).all(|(l, r)| l.same(r))
                }
            }
            (Value::Object(left), Value::Object(right)) => {
                Rc::ptr_eq(left, right) || {
                    let (left, right) = (left.borrow(), right.borrow());
                    left.len() == right.len()
                        && left
                            .iter()
                            .zip(right.iter())
                            .all(|((lk, lv), (rk, rv))| lk == rk && lv.same(rv))
                }
            }
            (left, right) => left.same(right),
        }
    }

    pub fn from_json(json: &Json) -> Value {
        match json {
            Json::Null => Value::Null,
            Json::Bool(value) => Value::Bool(*value),
            Json::Number(number) => Value::Number(number.as_f64().unwrap_or(f64::NAN)),
            Json::String(value) => Value::string(value),
            Json::Array(items) => Value::array(items.iter().map(Value::from_json).collect()),
            Json::Object(entries) => Value::object(
                entries
                    .iter()
                    .map(|(name, value)| (Rc::from(name.as_str()), Value::from_json(value)))
                    .collect(),
            ),
        }
    }

    pub fn to_json(&self) -> Json {
        match self {
            Value::Null => Json::Null,
            Value::Bool(value) => Json::Bool(*value),
            Value::Number(value) => number_to_json(*value),
            Value::String(value) => Json::String(value.to_string()),
            Value::Array(array) => Json::Array(array.borrow().iter().map(Value::to_json).collect()),
            Value::Object(object) => Json::Object(
                object
                    .borrow()
                    .iter()
                    .map(|(name, value)| (name.to_string(), value.to_json()))
                    .collect(),
            ),
        }
    }
}

fn number_to_json(value: f64) -> Json {
    if value.fract() == 0.0 && value.abs() < 9_007_199_254_740_992.0 {
        Json::from(value as i64)
    } else {
        serde_json::Number::from_f64(value).map_or(Json::Null, Json::Number)
    }
}

/// Deep structural equality; identity is [`Value::same`].
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Array(left), Value::Array(right)) => {
                Rc::ptr_eq(left, right) || *left.borrow() == *right.borrow()
            }
            (Value::Object(left), Value::Object(right)) => {
                Rc::ptr_eq(left, right) || *left.borrow() == *right.borrow()
            }
            (Value::Number(left), Value::Number(right)) => left == right,
            (left, right) => left.same(right),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(value) => write!(f, "{value}"),
            Value::Number(value) if value.is_nan() => f.write_str("NaN"),
            Value::Number(value) => write!(f, "{value}"),
            Value::String(value) => f.write_str(value),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identity_differs_from_structural_equality() {
        let left = Value::from_json(&json!({"a": [1, 2]}));
        let right = Value::from_json(&json!({"a": [1, 2]}));
        assert_eq!(left, right);
        assert!(!left.same(&right));
        assert!(left.same(&left.clone()));
    }

    #[test]
    fn keys_follow_the_container_kind() {
        let array = Value::from_json(&json!(["a", "b"]));
        let object = Value::from_json(&json!({"0": "zero"}));

        assert_eq!(array.get(&Value::Number(1.0)), Value::string("b"));
        assert_eq!(array.get(&Value::string("0")), Value::string("a"));
        assert_eq!(object.get(&Value::Number(0.0)), Value::string("zero"));
        assert_eq!(object.get(&Value::string("missing")), Value::Null);
        assert_eq!(
            object.normalize_key(Key::Index(3)),
            Some(Key::name("3"))
        );
        assert_eq!(array.normalize_key(Key::name("x")), None);
    }

    #[test]
    fn whole_numbers_serialize_as_integers() {
        let value = Value::from_json(&json!({"n": 3, "f": 1.5}));
        assert_eq!(value.to_json(), json!({"n": 3, "f": 1.5}));
        assert_eq!(Value::Number(f64::NAN).to_json(), Json::Null);
    }

    #[test]
    fn shallow_equality_compares_entry_identity() {
        let shared = Value::from_json(&json!({"x": 1}));
        let left = Value::array(vec![shared.clone(), Value::Number(2.0)]);
        let right = Value::array(vec![shared, Value::Number(2.0)]);
        assert!(left.shallow_equal(&right));

        let copy = Value::array(vec![Value::from_json(&json!({"x": 1})), Value::Number(2.0)]);
        assert!(!left.shallow_equal(&copy));
    }
}
