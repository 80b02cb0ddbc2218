use std::rc::Rc;

use serde_json::{Map, Value as Json};

use super::error::{RuntimeError, RuntimeResult};
use super::eval::{Frame, Runtime, Stats};
use super::keysets::ROOT_KEYS;
use super::value::Value;
use crate::ast::{Key, SetterKind, SetterSegment};
use crate::program::{Mode, Program, SetterProc, SetterStep};

/// Upper bound on recalculation passes before a cycle is reported as unstable.
const MAX_PASSES: usize = 16;

/// Most `null` entries a single write may append to pad an array.
const MAX_PADDING: usize = 1 << 16;

enum Mutation {
    Assign(Option<Value>),
    Splice { removed: usize, items: Vec<Value> },
}

impl Mutation {
    fn kind(&self) -> SetterKind {
        match self {
            Mutation::Assign(_) => SetterKind::Set,
            Mutation::Splice { .. } => SetterKind::Splice,
        }
    }
}

/// Resolved setter path: the container at every depth and the key into it.
struct Target {
    containers: Vec<Value>,
    keys: Vec<Key>,
}

impl Target {
    fn leaf(&self) -> (&Value, &Key) {
        let last = self.keys.len() - 1;
        (&self.containers[last], &self.keys[last])
    }
}

/// A live model: the data, the current getter results and the state needed
/// to keep them up to date as setters run.
pub struct Instance {
    program: Rc<Program>,
    runtime: Runtime,
    build_counts: Vec<usize>,
}

impl Instance {
    pub fn new(program: Rc<Program>, model: Value) -> RuntimeResult<Self> {
        let mut instance = Self {
            runtime: Runtime::new(model),
            build_counts: vec![0; program.getters.len()],
            program,
        };
        match instance.program.mode {
            Mode::Naive => instance.rebuild_all()?,
            Mode::Optimizing => {
                for getter in &instance.program.getters {
                    instance
                        .runtime
                        .keysets
                        .invalidate(ROOT_KEYS, Key::Name(Rc::clone(&getter.name)));
                }
                instance.recalculate()?;
            }
        }
        tracing::debug!(
            mode = instance.program.mode.name(),
            getters = instance.program.getters.len(),
            tracked = instance.runtime.ledger.len() + instance.runtime.derived.len(),
            slots = instance.runtime.persistent_slots(),
            "instance ready"
        );
        Ok(instance)
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn model(&self) -> &Value {
        &self.runtime.model
    }

    pub fn get(&self, name: &str) -> RuntimeResult<Value> {
        let getter = self
            .program
            .getter(name)
            .ok_or_else(|| RuntimeError::UnknownGetter {
                name: name.to_string(),
            })?;
        Ok(self
            .runtime
            .results
            .borrow()
            .get(&getter.name)
            .cloned()
            .unwrap_or(Value::Null))
    }

    /// Every getter result as JSON, in build order.
    pub fn snapshot(&self) -> Json {
        let results = self.runtime.results.borrow();
        let mut snapshot = Map::new();
        for getter in &self.program.getters {
            let value = results.get(&getter.name).map_or(Json::Null, Value::to_json);
            snapshot.insert(getter.name.to_string(), value);
        }
        Json::Object(snapshot)
    }

    /// How many times the getter has been rebuilt, the initial build included.
    pub fn build_count(&self, name: &str) -> Option<usize> {
        self.program
            .getter_index(name)
            .map(|index| self.build_counts[index])
    }

    pub fn stats(&self) -> Stats {
        self.runtime.stats
    }

    /// Runs a `set` setter; `None` deletes the addressed entry.
    pub fn set(&mut self, name: &str, args: &[Value], value: Option<Value>) -> RuntimeResult<()> {
        self.run_setter(name, args, Mutation::Assign(value))
    }

    /// Runs a `splice` setter; the last path segment is the start index.
    pub fn splice(
        &mut self,
        name: &str,
        args: &[Value],
        removed: usize,
        items: Vec<Value>,
    ) -> RuntimeResult<()> {
        self.run_setter(name, args, Mutation::Splice { removed, items })
    }

    fn run_setter(&mut self, name: &str, args: &[Value], mutation: Mutation) -> RuntimeResult<()> {
        let program = Rc::clone(&self.program);
        let setter = program
            .setters
            .get(name)
            .ok_or_else(|| RuntimeError::UnknownSetter {
                name: name.to_string(),
            })?;
        if setter.kind != mutation.kind() {
            return Err(RuntimeError::WrongSetterKind {
                setter: setter.name.clone(),
                kind: kind_name(setter.kind).to_string(),
            });
        }
        if args.len() != setter.arg_count() {
            return Err(RuntimeError::ArgumentCount {
                setter: setter.name.clone(),
                expected: setter.arg_count(),
                found: args.len(),
            });
        }

        let target = resolve(setter, &self.runtime.model, args)?;
        if let Mutation::Assign(Some(_)) = &mutation {
            check_padding(&target)?;
        }
        tracing::debug!(setter = name, path = %describe(&target.keys), "run setter");
        let mut mutation = Some(mutation);
        for step in &setter.steps {
            match step {
                SetterStep::Invalidate { prefix } => {
                    let container = target.containers[*prefix].clone();
                    let key = target.keys[*prefix].clone();
                    self.runtime.trigger_invalidations(&container, key);
                }
                SetterStep::InvalidateSpliced => {
                    if let Some(Mutation::Splice { removed, items }) = &mutation {
                        let (array, start) = target.leaf();
                        for index in spliced_indices(array, start, *removed, items.len()) {
                            self.runtime.trigger_invalidations(array, Key::Index(index));
                        }
                    }
                }
                SetterStep::Taint => {
                    for container in &target.containers {
                        if let Some(id) = container.container_id() {
                            self.runtime.tainted.insert(id);
                        }
                    }
                }
                SetterStep::Write | SetterStep::Splice => match mutation.take() {
                    Some(Mutation::Assign(value)) => {
                        let (container, key) = target.leaf();
                        write(container, key, value);
                    }
                    Some(Mutation::Splice { removed, items }) => {
                        let (array, start) = target.leaf();
                        splice(array, start, removed, items);
                    }
                    None => {}
                },
                SetterStep::Recalculate => self.recalculate()?,
                SetterStep::RebuildAll => self.rebuild_all()?,
            }
        }
        Ok(())
    }

    /// Rebuilds invalidated getters in dependency order until none is left.
    fn recalculate(&mut self) -> RuntimeResult<()> {
        let program = Rc::clone(&self.program);
        let mut passes = 0;
        while !self.runtime.keysets.is_empty(ROOT_KEYS) {
            if passes == MAX_PASSES {
                return Err(RuntimeError::Unstable { passes });
            }
            passes += 1;
            for (index, getter) in program.getters.iter().enumerate() {
                let key = Key::Name(Rc::clone(&getter.name));
                if self.runtime.keysets.remove(ROOT_KEYS, &key) {
                    self.build(index)?;
                }
            }
        }
        self.runtime.tainted.clear();
        tracing::trace!(passes, "recalculated");
        Ok(())
    }

    fn rebuild_all(&mut self) -> RuntimeResult<()> {
        for index in 0..self.program.getters.len() {
            self.build(index)?;
        }
        self.runtime.keysets.take(ROOT_KEYS);
        self.runtime.tainted.clear();
        Ok(())
    }

    fn build(&mut self, index: usize) -> RuntimeResult<()> {
        let program = Rc::clone(&self.program);
        let getter = &program.getters[index];
        let frame = Frame::root(&getter.function, &getter.name);
        let value = self.runtime.call_function(&getter.function, &frame)?;
        self.runtime
            .set_result(&getter.name, value, getter.invalidates);
        self.build_counts[index] += 1;
        tracing::trace!(getter = %getter.name, builds = self.build_counts[index], "built getter");
        Ok(())
    }
}

fn kind_name(kind: SetterKind) -> &'static str {
    match kind {
        SetterKind::Set => "set",
        SetterKind::Splice => "splice",
    }
}

fn describe(keys: &[Key]) -> String {
    let mut path = String::from("$model");
    for key in keys {
        path.push('.');
        path.push_str(&key.as_name());
    }
    path
}

fn resolve(setter: &SetterProc, model: &Value, args: &[Value]) -> RuntimeResult<Target> {
    let mut containers = vec![model.clone()];
    let mut keys = Vec::with_capacity(setter.path.len());
    for (depth, segment) in setter.path.iter().enumerate() {
        let container = &containers[depth];
        let raw = match segment {
            SetterSegment::Fixed(key) => Some(key.clone()),
            SetterSegment::Arg(index) => args.get(*index).and_then(Value::to_key),
        };
        let key = raw
            .clone()
            .and_then(|key| container.normalize_key(key))
            .ok_or_else(|| RuntimeError::InvalidKey {
                key: raw.map_or_else(|| "<container>".to_string(), |key| key.to_string()),
                container: describe(&keys),
            })?;
        keys.push(key);
        if depth + 1 < setter.path.len() {
            let next = container.get_key(&keys[depth]);
            let spliced = setter.kind == SetterKind::Splice && depth + 2 == setter.path.len();
            if spliced && !matches!(next, Value::Array(_)) {
                return Err(RuntimeError::NotAnArray {
                    setter: setter.name.clone(),
                    path: describe(&keys),
                    got: next.type_name().to_string(),
                });
            }
            if !next.is_container() {
                return Err(RuntimeError::MissingContainer {
                    setter: setter.name.clone(),
                    path: describe(&keys),
                });
            }
            containers.push(next);
        }
    }

    if setter.kind == SetterKind::Splice {
        let depth = keys.len() - 1;
        if !matches!(containers[depth], Value::Array(_)) {
            return Err(RuntimeError::NotAnArray {
                setter: setter.name.clone(),
                path: describe(&keys[..depth]),
                got: containers[depth].type_name().to_string(),
            });
        }
    }
    Ok(Target { containers, keys })
}

/// Indices whose content can change: the removed run when the length is
/// kept, otherwise everything from `start` to the longer of both lengths.
fn spliced_indices(
    array: &Value,
    start: &Key,
    removed: usize,
    inserted: usize,
) -> std::ops::Range<usize> {
    let Key::Index(start) = *start else {
        return 0..0;
    };
    let len = array.len();
    let end = if removed == inserted {
        start.saturating_add(removed)
    } else {
        len.max(len.saturating_add(inserted).saturating_sub(removed))
    };
    start..end
}

/// Rejects array writes that would pad past [`MAX_PADDING`].
fn check_padding(target: &Target) -> RuntimeResult<()> {
    let (container, key) = target.leaf();
    let (Value::Array(_), Key::Index(index)) = (container, key) else {
        return Ok(());
    };
    let fits = index
        .checked_add(1)
        .is_some_and(|end| end.saturating_sub(container.len()) <= MAX_PADDING);
    if fits {
        Ok(())
    } else {
        Err(RuntimeError::InvalidKey {
            key: index.to_string(),
            container: describe(&target.keys[..target.keys.len() - 1]),
        })
    }
}

fn write(container: &Value, key: &Key, value: Option<Value>) {
    match (container, key) {
        (Value::Object(object), Key::Name(name)) => {
            let mut entries = object.borrow_mut();
            match value {
                Some(value) => {
                    entries.insert(Rc::clone(name), value);
                }
                None => {
                    entries.shift_remove(name);
                }
            }
        }
        (Value::Array(array), Key::Index(index)) => {
            let mut items = array.borrow_mut();
            match value {
                Some(value) => {
                    if *index >= items.len() {
                        items.resize(*index + 1, Value::Null);
                    }
                    items[*index] = value;
                }
                None => {
                    if let Some(slot) = items.get_mut(*index) {
                        *slot = Value::Null;
                    }
                }
            }
        }
        _ => {}
    }
}

fn splice(array: &Value, start: &Key, removed: usize, items: Vec<Value>) {
    let (Value::Array(array), Key::Index(start)) = (array, start) else {
        return;
    };
    let mut current = array.borrow_mut();
    let start = (*start).min(current.len());
    let end = start + removed.min(current.len() - start);
    current.splice(start..end, items);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Backend, Naive, Optimizing};
    use crate::declaration::parse_yaml;
    use serde_json::json;

    fn instance(backend: &dyn Backend, declaration: &str, data: Json) -> Instance {
        let model = parse_yaml(declaration).expect("declaration parses");
        backend.run(&model, &data).expect("instance builds")
    }

    fn optimizing(declaration: &str, data: Json) -> Instance {
        instance(&Optimizing, declaration, data)
    }

    fn num(value: f64) -> Value {
        Value::Number(value)
    }

    const TOTALS: &str = r#"
- name: total
  getter: [size, [get, [root], items]]
- name: label
  getter: [get, [root], title]
- name: setItem
  setter: [items, [arg, 0]]
- name: setLog
  setter: [log]
"#;

    #[test]
    fn setter_rebuilds_only_affected_getters() {
        let mut instance = optimizing(TOTALS, json!({"items": [1, 2], "title": "t", "log": 0}));
        assert_eq!(instance.snapshot(), json!({"total": 2, "label": "t"}));

        instance
            .set("setItem", &[num(2.0)], Some(num(3.0)))
            .expect("setItem runs");

        assert_eq!(instance.get("total").expect("known getter"), num(3.0));
        assert_eq!(instance.build_count("total"), Some(2));
        assert_eq!(instance.build_count("label"), Some(1));
    }

    #[test]
    fn unreferenced_setter_triggers_nothing() {
        let mut instance = optimizing(TOTALS, json!({"items": [], "title": "t", "log": 0}));
        let before = instance.stats();

        instance
            .set("setLog", &[], Some(num(1.0)))
            .expect("setLog runs");

        assert_eq!(instance.stats().triggers, before.triggers);
        assert_eq!(instance.build_count("total"), Some(1));
        assert_eq!(instance.model().get(&Value::string("log")), num(1.0));
    }

    #[test]
    fn unchanged_entries_keep_their_identity() {
        let declaration = r#"
- name: doubled
  getter: [mapValues, [func, [object, n, [mult, [get, [val], n], 2]]], [get, [root], items]]
- name: setN
  setter: [items, [arg, 0], n]
"#;
        let mut instance = optimizing(
            declaration,
            json!({"items": {"a": {"n": 1}, "b": {"n": 2}, "c": {"n": 3}}}),
        );
        let before = instance.get("doubled").expect("known getter");

        instance
            .set("setN", &[Value::string("b")], Some(num(5.0)))
            .expect("setN runs");

        let after = instance.get("doubled").expect("known getter");
        assert_eq!(
            after.to_json(),
            json!({"a": {"n": 2}, "b": {"n": 10}, "c": {"n": 6}})
        );
        assert!(!after.same(&before));
        for name in ["a", "c"] {
            let key = Value::string(name);
            assert!(after.get(&key).same(&before.get(&key)), "{name} was rebuilt");
        }
        assert!(!after.get(&Value::string("b")).same(&before.get(&Value::string("b"))));
        assert_eq!(instance.stats().callbacks, 4);
    }

    #[test]
    fn splice_invalidates_shifted_indices() {
        let declaration = r#"
- name: third
  getter: [get, [get, [root], items], 3]
- name: first
  getter: [get, [get, [root], items], 0]
- name: spliceItems
  splice: [items, [arg, 0]]
"#;
        let mut instance = optimizing(declaration, json!({"items": [0, 1, 2, 3, 4]}));
        assert_eq!(
            spliced_indices(
                &instance.model().get(&Value::string("items")),
                &Key::Index(2),
                1,
                3
            ),
            2..7
        );

        instance
            .splice("spliceItems", &[num(2.0)], 1, vec![num(7.0), num(8.0), num(9.0)])
            .expect("splice runs");

        assert_eq!(
            instance.model().get(&Value::string("items")).to_json(),
            json!([0, 1, 7, 8, 9, 3, 4])
        );
        assert_eq!(instance.get("third").expect("known getter"), num(8.0));
        assert_eq!(instance.build_count("third"), Some(2));
        assert_eq!(instance.build_count("first"), Some(1));
    }

    #[test]
    fn same_length_splice_only_touches_the_removed_run() {
        let items = Value::from_json(&json!([0, 1, 2, 3, 4]));
        assert_eq!(spliced_indices(&items, &Key::Index(1), 2, 2), 1..3);
        assert_eq!(spliced_indices(&items, &Key::Index(3), 2, 0), 3..5);
    }

    #[test]
    fn untaken_branch_is_not_tracked() {
        let declaration = r#"
- name: pick
  getter: [ternary, [get, [root], useA], [get, [get, [root], a], x], 0]
- name: setAx
  setter: [a, x]
- name: setUseA
  setter: [useA]
"#;
        let mut instance = optimizing(declaration, json!({"useA": false, "a": {"x": 1}}));

        instance
            .set("setAx", &[], Some(num(2.0)))
            .expect("setAx runs");
        assert_eq!(instance.build_count("pick"), Some(1));

        instance
            .set("setUseA", &[], Some(Value::Bool(true)))
            .expect("setUseA runs");
        assert_eq!(instance.get("pick").expect("known getter"), num(2.0));

        instance
            .set("setAx", &[], Some(num(3.0)))
            .expect("setAx runs");
        assert_eq!(instance.get("pick").expect("known getter"), num(3.0));
        assert_eq!(instance.build_count("pick"), Some(3));
    }

    #[test]
    fn recursive_results_follow_their_dependencies() {
        let declaration = r#"
- name: sums
  getter:
    - recursiveMap
    - [func, [ternary, [eq, [key], 0], [val], [plus, [val], [recur, [loop], [minus, [key], 1]]]]]
    - [get, [root], xs]
- name: setX
  setter: [xs, [arg, 0]]
"#;
        let mut instance = optimizing(declaration, json!({"xs": [1, 2, 3, 4]}));
        assert_eq!(instance.snapshot(), json!({"sums": [1, 3, 6, 10]}));

        instance
            .set("setX", &[num(1.0)], Some(num(20.0)))
            .expect("setX runs");
        assert_eq!(instance.snapshot(), json!({"sums": [1, 21, 24, 28]}));
    }

    #[test]
    fn derived_getters_see_fresh_results() {
        let declaration = r#"
- name: prices
  getter: [mapValues, [func, [get, [val], price]], [get, [root], products]]
- name: applePrice
  getter: [get, [get, [topLevel], prices], apple]
- name: setPrice
  setter: [products, [arg, 0], price]
"#;
        let mut instance = optimizing(
            declaration,
            json!({"products": {"apple": {"price": 1}, "pear": {"price": 2}}}),
        );

        instance
            .set("setPrice", &[Value::string("pear")], Some(num(4.0)))
            .expect("setPrice runs");
        assert_eq!(instance.build_count("prices"), Some(2));
        assert_eq!(instance.build_count("applePrice"), Some(1));

        instance
            .set("setPrice", &[Value::string("apple")], Some(num(9.0)))
            .expect("setPrice runs");
        assert_eq!(instance.get("applePrice").expect("known getter"), num(9.0));
        assert_eq!(instance.build_count("applePrice"), Some(2));
    }

    #[test]
    fn naive_instances_rebuild_everything() {
        let mut instance = instance(&Naive, TOTALS, json!({"items": [1], "title": "t", "log": 0}));

        instance
            .set("setLog", &[], Some(num(2.0)))
            .expect("setLog runs");

        assert_eq!(instance.build_count("total"), Some(2));
        assert_eq!(instance.build_count("label"), Some(2));
        assert_eq!(instance.stats().triggers, 0);
    }

    #[test]
    fn deleting_an_entry_reads_as_null() {
        let declaration = r#"
- name: name
  getter: [get, [get, [root], user], name]
- name: setName
  setter: [user, name]
"#;
        let mut instance = optimizing(declaration, json!({"user": {"name": "ada"}}));

        instance.set("setName", &[], None).expect("delete runs");

        assert_eq!(instance.get("name").expect("known getter"), Value::Null);
        assert_eq!(instance.model().to_json(), json!({"user": {}}));
    }

    #[test]
    fn setter_errors_leave_the_model_untouched() {
        let declaration = r#"
- name: total
  getter: [size, [get, [root], items]]
- name: setDeep
  setter: [items, [arg, 0], name]
- name: spliceItems
  splice: [items, [arg, 0]]
- name: spliceTitle
  splice: [title, [arg, 0]]
"#;
        let data = json!({"items": [1, 2], "title": "t"});
        let mut instance = optimizing(declaration, data.clone());

        assert_eq!(
            instance.set("setDeep", &[num(0.0)], Some(num(1.0))),
            Err(RuntimeError::MissingContainer {
                setter: "setDeep".to_string(),
                path: "$model.items.0".to_string(),
            })
        );
        assert_eq!(
            instance.set("setDeep", &[], Some(num(1.0))),
            Err(RuntimeError::ArgumentCount {
                setter: "setDeep".to_string(),
                expected: 1,
                found: 0,
            })
        );
        assert!(matches!(
            instance.set("spliceItems", &[num(0.0)], None),
            Err(RuntimeError::WrongSetterKind { .. })
        ));
        assert!(matches!(
            instance.splice("spliceTitle", &[num(0.0)], 0, Vec::new()),
            Err(RuntimeError::NotAnArray { .. })
        ));
        assert!(matches!(
            instance.set("nope", &[], None),
            Err(RuntimeError::UnknownSetter { .. })
        ));
        assert_eq!(instance.model().to_json(), data);
        assert_eq!(instance.build_count("total"), Some(1));
    }

    #[test]
    fn oversized_indices_are_rejected_before_any_write() {
        let declaration = r#"
- name: total
  getter: [size, [get, [root], items]]
- name: setItem
  setter: [items, [arg, 0]]
- name: spliceItems
  splice: [items, [arg, 0]]
"#;
        let data = json!({"items": [1, 2]});
        let mut instance = optimizing(declaration, data.clone());
        let before = instance.stats();

        for index in [1e300, 1e12] {
            assert!(
                matches!(
                    instance.set("setItem", &[num(index)], Some(num(1.0))),
                    Err(RuntimeError::InvalidKey { container, .. }) if container == "$model.items"
                ),
                "{index}"
            );
        }
        assert_eq!(instance.model().to_json(), data);
        assert_eq!(instance.stats().triggers, before.triggers);
        assert_eq!(instance.build_count("total"), Some(1));

        instance
            .set("setItem", &[num(4.0)], Some(num(5.0)))
            .expect("short padding is allowed");
        assert_eq!(instance.get("total").expect("known getter"), num(5.0));

        let items = instance.model().get(&Value::string("items"));
        assert_eq!(
            spliced_indices(&items, &Key::Index(usize::MAX), 1, 1),
            usize::MAX..usize::MAX
        );
        instance
            .splice("spliceItems", &[num(1e300)], 0, vec![num(6.0)])
            .expect("splice start clamps to the end");
        assert_eq!(
            instance.model().get(&Value::string("items")).to_json(),
            json!([1, 2, null, null, 5, 6])
        );
    }

    #[test]
    fn dropped_collection_keys_release_their_state() {
        let declaration = r#"
- name: nested
  getter: [mapValues, [func, [mapValues, [func, [size, [val]]], [val]]], [get, [root], items]]
- name: setItems
  setter: [items]
"#;
        let mut instance = optimizing(declaration, json!({"items": {"k0": {"x": [1]}}}));
        let keysets = instance.runtime.keysets.len();
        let slots = instance.runtime.persistent_slots();

        for round in 1..=50 {
            let name = format!("k{round}");
            let items = json!({ name.clone(): {"x": vec![0; round]} });
            instance
                .set("setItems", &[], Some(Value::from_json(&items)))
                .expect("setItems runs");
            assert_eq!(
                instance.snapshot(),
                json!({"nested": { name: {"x": round} }})
            );
        }

        assert_eq!(instance.runtime.keysets.len(), keysets);
        assert_eq!(instance.runtime.keysets.live(), keysets);
        assert_eq!(instance.runtime.persistent_slots(), slots);
    }

    #[test]
    fn self_reading_getter_settles() {
        let declaration = r#"
- name: seen
  getter: [or, [get, [topLevel], seen], [get, [root], flag]]
- name: setFlag
  setter: [flag]
"#;
        let mut instance = optimizing(declaration, json!({"flag": false}));
        assert_eq!(instance.snapshot(), json!({"seen": false}));
        assert_eq!(instance.build_count("seen"), Some(2));

        instance
            .set("setFlag", &[], Some(Value::Bool(true)))
            .expect("setFlag runs");
        instance
            .set("setFlag", &[], Some(Value::Bool(false)))
            .expect("setFlag runs");

        assert_eq!(instance.snapshot(), json!({"seen": true}));
        assert_eq!(instance.build_count("seen"), Some(4));
    }

    #[test]
    fn diverging_self_reference_is_unstable() {
        let declaration = r#"
- name: counter
  getter: [plus, [get, [topLevel], counter], 1]
"#;
        let model = parse_yaml(declaration).expect("declaration parses");
        let error = Optimizing
            .run(&model, &json!({}))
            .err()
            .expect("counter never settles");
        assert!(
            format!("{error:#}").contains("did not settle after 16"),
            "{error:#}"
        );

        let naive = instance(&Naive, declaration, json!({}));
        assert_eq!(naive.snapshot(), json!({"counter": 1}));
    }

    #[test]
    fn recursion_into_itself_is_reported() {
        let declaration = r#"
- name: loops
  getter: [recursiveMap, [func, [recur, [loop], [key]]], [get, [root], xs]]
"#;
        let model = parse_yaml(declaration).expect("declaration parses");
        let error = Optimizing
            .run(&model, &json!({"xs": [1]}))
            .err()
            .expect("self recursion fails");
        assert!(
            format!("{error:#}").contains("Recursive callback reached key 0"),
            "{error:#}"
        );
    }
}
