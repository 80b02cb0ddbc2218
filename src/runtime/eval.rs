use std::cell::{Cell, RefCell};
use std::rc::Rc;

use indexmap::IndexMap;
use rustc_hash::FxHashSet;

use super::error::{RuntimeError, RuntimeResult};
use super::keysets::{KeySetId, KeySets, ROOT_KEYS};
use super::ledger::{Ledger, Location, Owner};
use super::primitives::{self, assemble};
use super::store::{Cached, CollectionState, SlotId, Store};
use super::value::{Container, ContainerId, ObjectRef, Value};
use crate::ast::Key;
use crate::program::{Function, KeyStep, Op, ScopeVar, Shape, TrackBase, TrackLine};
use crate::tagging::ExprId;
use crate::token::TokenKind;

/// Counters exposed for inspection by tests and the CLI.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    /// Invalidations requested by setters.
    pub triggers: usize,
    /// Invalidations raised by derived values replacing their entries.
    pub propagations: usize,
    pub tracks: usize,
    pub callbacks: usize,
}

/// One function invocation: its key set, key, inputs and condition flags.
pub(crate) struct Frame<'a> {
    depth: usize,
    keys: KeySetId,
    key: Key,
    val: Value,
    context: Value,
    conditions: Vec<Cell<bool>>,
    parent: Option<&'a Frame<'a>>,
    recursion: Option<&'a Run<'a>>,
}

impl<'a> Frame<'a> {
    pub(crate) fn root(function: &Function, name: &Rc<str>) -> Self {
        Self::invocation(
            function,
            ROOT_KEYS,
            Key::Name(Rc::clone(name)),
            Value::Null,
            Value::Null,
            None,
            None,
        )
    }

    fn invocation(
        function: &Function,
        keys: KeySetId,
        key: Key,
        val: Value,
        context: Value,
        parent: Option<&'a Frame<'a>>,
        recursion: Option<&'a Run<'a>>,
    ) -> Self {
        Self {
            depth: function.depth,
            keys,
            key,
            val,
            context,
            conditions: (0..function.conditions.len())
                .map(|_| Cell::new(false))
                .collect(),
            parent,
            recursion,
        }
    }

    fn at_depth(&self, depth: usize) -> &Frame<'a> {
        let mut frame = self;
        while frame.depth > depth {
            match frame.parent {
                Some(parent) => frame = parent,
                None => break,
            }
        }
        frame
    }

    fn slot(&self, slot: ExprId) -> SlotId {
        (slot, self.keys, self.key.clone())
    }
}

/// A collection pass in progress; recursive callbacks reach it through `recur`.
pub(crate) struct Run<'a> {
    func: &'a Function,
    source: &'a Value,
    inputs: &'a IndexMap<Key, Value>,
    context: &'a Value,
    parent: &'a Frame<'a>,
    keys: KeySetId,
    recursive: bool,
    state: &'a RefCell<CollectionState>,
    in_progress: RefCell<FxHashSet<Key>>,
}

/// Evaluation state owned by one model instance.
pub struct Runtime {
    pub(crate) model: Value,
    pub(crate) results: ObjectRef,
    pub(crate) keysets: KeySets,
    /// Reads reached from the model root.
    pub(crate) ledger: Ledger,
    /// Reads reached through `$res`; they follow derived containers that
    /// replace each other.
    pub(crate) derived: Ledger,
    pub(crate) tainted: FxHashSet<ContainerId>,
    pub(crate) stats: Stats,
    cache: Store<Cached>,
    collections: Store<CollectionState>,
}

impl Runtime {
    pub fn new(model: Value) -> Self {
        Self {
            model,
            results: Container::new(IndexMap::new()),
            keysets: KeySets::new(),
            ledger: Ledger::new(),
            derived: Ledger::new(),
            tainted: FxHashSet::default(),
            stats: Stats::default(),
            cache: Store::default(),
            collections: Store::default(),
        }
    }

    pub(crate) fn call_function(
        &mut self,
        function: &Function,
        frame: &Frame<'_>,
    ) -> RuntimeResult<Value> {
        let value = self.eval(&function.body, frame)?;
        if function.tracking.untrack {
            let owner = (frame.keys, frame.key.clone());
            self.ledger.untrack(&owner);
            self.derived.untrack(&owner);
        }
        for line in &function.tracking.lines {
            self.track_line(line, frame)?;
        }
        Ok(value)
    }

    fn track_line(&mut self, line: &TrackLine, frame: &Frame<'_>) -> RuntimeResult<()> {
        let Some((last, path)) = line.steps.split_last() else {
            return Ok(());
        };
        if let Some(condition) = line.condition
            && !frame.conditions.get(condition).is_some_and(Cell::get)
        {
            return Ok(());
        }

        let mut container = match line.base {
            TrackBase::Root => self.model.clone(),
            TrackBase::TopLevel => Value::Object(Rc::clone(&self.results)),
        };
        for step in path {
            let Some(key) = self.step_key(step, frame)? else {
                return Ok(());
            };
            let Some(key) = container.normalize_key(key) else {
                return Ok(());
            };
            container = container.get_key(&key);
        }
        let Some(key) = self.step_key(last, frame)? else {
            return Ok(());
        };
        let (Some(id), Some(key)) = (container.container_id(), container.normalize_key(key)) else {
            return Ok(());
        };
        let ledger = match line.base {
            TrackBase::Root => &mut self.ledger,
            TrackBase::TopLevel => &mut self.derived,
        };
        ledger.track((frame.keys, frame.key.clone()), (id, key));
        self.stats.tracks += 1;
        Ok(())
    }

    fn step_key(&mut self, step: &KeyStep, frame: &Frame<'_>) -> RuntimeResult<Option<Key>> {
        Ok(match step {
            KeyStep::Fixed(key) => Some(key.clone()),
            KeyStep::Current(depth) => Some(frame.at_depth(*depth).key.clone()),
            KeyStep::Computed(op) => self.eval(op, frame)?.to_key(),
        })
    }

    /// Invalidates every reader of `container[key]` on behalf of a setter.
    pub(crate) fn trigger_invalidations(&mut self, container: &Value, key: Key) {
        let (Some(id), Some(key)) = (container.container_id(), container.normalize_key(key)) else {
            return;
        };
        self.stats.triggers += 1;
        let location = (id, key);
        let mut readers = self.ledger.readers(&location);
        readers.extend(self.derived.readers(&location));
        self.invalidate(&location, readers);
    }

    fn notify(&mut self, location: Location) {
        self.stats.propagations += 1;
        let readers = self.derived.readers(&location);
        self.invalidate(&location, readers);
    }

    fn invalidate(&mut self, location: &Location, readers: Vec<Owner>) {
        for (keys, key) in readers {
            tracing::trace!(container = location.0, at = %location.1, keys, key = %key, "invalidate");
            self.keysets.invalidate(keys, key);
        }
    }

    /// Notifies readers of every entry that differs between a replaced
    /// container and its successor, descending into replaced children. Readers
    /// of the rest move over to the successor.
    fn trigger_replaced(&mut self, old: &Value, new: &Value) {
        let Some(id) = old.container_id() else {
            return;
        };
        if old.same(new) {
            return;
        }
        let old_entries = old.entries().unwrap_or_default();
        let known: FxHashSet<&Key> = old_entries.iter().map(|(key, _)| key).collect();
        for (key, value) in &old_entries {
            let replacement = new.get_key(key);
            if !value.same(&replacement) {
                self.notify((id, key.clone()));
                self.trigger_replaced(value, &replacement);
            }
        }
        for (key, _) in new.entries().unwrap_or_default() {
            if let Some(key) = old.normalize_key(key)
                && !known.contains(&key)
            {
                self.notify((id, key));
            }
        }
        if let Some(successor) = new.container_id() {
            self.derived.migrate(id, successor);
        }
    }

    /// Keeps the previous identity when nothing changed, otherwise reports the
    /// replaced entries and adopts `fresh`.
    fn settle(&mut self, previous: Option<Value>, fresh: Value, invalidates: bool) -> Value {
        match previous {
            Some(previous) if previous.shallow_equal(&fresh) => previous,
            Some(previous) => {
                if invalidates {
                    self.trigger_replaced(&previous, &fresh);
                }
                fresh
            }
            None => fresh,
        }
    }

    fn publish(
        &mut self,
        id: SlotId,
        source: Option<(ContainerId, u64)>,
        fresh: Value,
        invalidates: bool,
    ) -> Value {
        let previous = self.cache.take(&id).map(|cached| cached.value);
        let value = self.settle(previous, fresh, invalidates);
        self.cache.put(
            id,
            Cached {
                source,
                value: value.clone(),
            },
        );
        value
    }

    /// Cached result derived from `source`, unless the source was written
    /// since, in this cycle or an earlier one.
    fn cached(&self, id: &SlotId, source: &Value) -> Option<Value> {
        let stamp = source.stamp()?;
        let cached = self.cache.get(id)?;
        (cached.source == Some(stamp) && !self.tainted.contains(&stamp.0))
            .then(|| cached.value.clone())
    }

    fn derive(
        &mut self,
        id: SlotId,
        source: Value,
        compute: impl FnOnce(&Value) -> Value,
    ) -> Value {
        if let Some(hit) = self.cached(&id, &source) {
            return hit;
        }
        let fresh = compute(&source);
        self.publish(id, source.stamp(), fresh, true)
    }

    /// Stores a getter result in `$res`; readers of the entry are notified
    /// when the identity changes.
    pub(crate) fn set_result(&mut self, name: &Rc<str>, value: Value, invalidates: bool) {
        let previous = self.results.borrow().get(name).cloned();
        if previous.as_ref().is_some_and(|previous| previous.same(&value)) {
            return;
        }
        self.results
            .borrow_mut()
            .insert(Rc::clone(name), value.clone());
        if invalidates {
            self.notify((self.results.id(), Key::Name(Rc::clone(name))));
            if let Some(previous) = previous {
                self.trigger_replaced(&previous, &value);
            }
        }
    }

    pub(crate) fn eval(&mut self, op: &Op, frame: &Frame<'_>) -> RuntimeResult<Value> {
        match op {
            Op::Literal(literal) => Ok(Value::from_literal(literal)),
            Op::NoValue => Ok(Value::Null),
            Op::Root => Ok(self.model.clone()),
            Op::TopLevel => Ok(Value::Object(Rc::clone(&self.results))),
            Op::Scope { var, depth } => {
                let owner = frame.at_depth(*depth);
                Ok(match var {
                    ScopeVar::Val => owner.val.clone(),
                    ScopeVar::Key => Value::from_key(&owner.key),
                    ScopeVar::Context => owner.context.clone(),
                })
            }
            Op::CurrentKey => Ok(Value::from_key(&frame.key)),
            Op::Get { object, key } => {
                let object = self.eval(object, frame)?;
                let key = self.eval(key, frame)?;
                Ok(object.get(&key))
            }
            Op::GuardedGet {
                condition,
                object,
                key,
            } => {
                let object = self.eval(object, frame)?;
                if let Some(flag) = frame.conditions.get(*condition) {
                    flag.set(true);
                }
                let key = self.eval(key, frame)?;
                Ok(object.get(&key))
            }
            Op::Apply { kind, args } => {
                let args = args
                    .iter()
                    .map(|arg| self.eval(arg, frame))
                    .collect::<RuntimeResult<Vec<_>>>()?;
                Ok(primitives::apply(*kind, &args))
            }
            Op::Ternary {
                test,
                then,
                otherwise,
            } => {
                if self.eval(test, frame)?.is_truthy() {
                    self.eval(then, frame)
                } else {
                    self.eval(otherwise, frame)
                }
            }
            Op::And(args) => {
                let mut last = Value::Bool(true);
                for arg in args {
                    last = self.eval(arg, frame)?;
                    if !last.is_truthy() {
                        break;
                    }
                }
                Ok(last)
            }
            Op::Or(args) => {
                let mut last = Value::Bool(false);
                for arg in args {
                    last = self.eval(arg, frame)?;
                    if last.is_truthy() {
                        break;
                    }
                }
                Ok(last)
            }
            Op::Object(entries) => {
                let mut object = IndexMap::with_capacity(entries.len());
                for (name, op) in entries {
                    object.insert(Rc::clone(name), self.eval(op, frame)?);
                }
                Ok(Value::object(object))
            }
            Op::Array(items) => Ok(Value::array(
                items
                    .iter()
                    .map(|item| self.eval(item, frame))
                    .collect::<RuntimeResult<_>>()?,
            )),
            Op::Collection {
                verb,
                func,
                source,
                context,
            } => self.collection(*verb, func, source, context, frame),
            Op::Recur { depth, key } => {
                let owner = frame.at_depth(*depth);
                let Some(run) = owner.recursion else {
                    return Ok(Value::Null);
                };
                let key = self.eval(key, frame)?;
                let requester = owner.key.clone();
                self.recur(run, &key, requester)
            }
            Op::Persistent {
                slot,
                raw,
                invalidates,
                ..
            } => {
                let fresh = self.eval(raw, frame)?;
                Ok(self.publish(frame.slot(*slot), None, fresh, *invalidates))
            }
            Op::ValuesOrKeys {
                slot,
                values,
                source,
            } => {
                let source = self.eval(source, frame)?;
                let values = *values;
                Ok(self.derive(frame.slot(*slot), source, |source| {
                    primitives::keys_or_values(source, values)
                }))
            }
            Op::Size { slot, source } => {
                let source = self.eval(source, frame)?;
                Ok(self.derive(frame.slot(*slot), source, primitives::size))
            }
            Op::AssignOrDefaults {
                slot,
                assign,
                source,
            } => {
                let source = self.eval(source, frame)?;
                let assign = *assign;
                Ok(self.derive(frame.slot(*slot), source, |source| {
                    primitives::assign_or_defaults(source, assign)
                }))
            }
            Op::Range {
                slot,
                end,
                start,
                step,
            } => {
                let end = self.eval(end, frame)?;
                let start = self.eval(start, frame)?;
                let step = self.eval(step, frame)?;
                let fresh = primitives::range(&end, &start, &step);
                Ok(self.publish(frame.slot(*slot), None, fresh, true))
            }
            Op::ForEach {
                verb,
                slot,
                func,
                source,
                context,
                incremental,
                invalidates,
                ..
            } => self.for_each(
                *verb,
                *slot,
                func,
                source,
                context,
                (*incremental, *invalidates),
                frame,
            ),
        }
    }

    /// Collection verb without persistence: every key runs every time.
    fn collection(
        &mut self,
        verb: TokenKind,
        func: &Function,
        source: &Op,
        context: &Op,
        frame: &Frame<'_>,
    ) -> RuntimeResult<Value> {
        let source = self.eval(source, frame)?;
        let context = self.eval(context, frame)?;
        let entries = iterate(verb, &source)?;
        let inputs: IndexMap<Key, Value> = entries.iter().cloned().collect();
        let state = RefCell::new(CollectionState::new(frame.keys));
        {
            let run = Run {
                func,
                source: &source,
                inputs: &inputs,
                context: &context,
                parent: frame,
                keys: frame.keys,
                recursive: verb.data().recursive,
                state: &state,
                in_progress: RefCell::new(FxHashSet::default()),
            };
            for (key, _) in &entries {
                self.compute_key(&run, key)?;
            }
        }
        Ok(assemble(verb, &entries, &state.into_inner().results, None))
    }

    /// `forArray` / `forObject`: reuses the result of every key whose input
    /// and tracked dependencies are unchanged since the last run.
    #[allow(clippy::too_many_arguments)]
    fn for_each(
        &mut self,
        verb: TokenKind,
        slot: ExprId,
        func: &Function,
        source: &Op,
        context: &Op,
        (incremental, invalidates): (bool, bool),
        frame: &Frame<'_>,
    ) -> RuntimeResult<Value> {
        let source = self.eval(source, frame)?;
        let context = self.eval(context, frame)?;
        let entries = iterate(verb, &source)?;
        let id = frame.slot(slot);

        let mut state = match self.collections.take(&id) {
            Some(state) => state,
            None => CollectionState::new(self.keysets.child(frame.keys, frame.key.clone())),
        };
        let dirty = self.keysets.take(state.keys);
        let reusable = incremental
            && state
                .context
                .as_ref()
                .is_some_and(|previous| previous.same(&context));

        let inputs: IndexMap<Key, Value> = entries.iter().cloned().collect();
        let mut stale: Vec<Key> = state
            .inputs
            .keys()
            .filter(|key| !inputs.contains_key(*key))
            .cloned()
            .collect();
        for key in &stale {
            self.release(state.keys, key);
        }
        if !reusable {
            state.reset();
        }
        stale.extend(
            entries
                .iter()
                .filter(|(key, value)| {
                    dirty.contains(key)
                        || !state
                            .inputs
                            .get(key)
                            .is_some_and(|previous| previous.same(value))
                })
                .map(|(key, _)| key.clone()),
        );
        state.expire(&mut stale);
        state.inputs = inputs.clone();
        tracing::trace!(
            verb = verb.name(),
            slot,
            stale = stale.len(),
            total = entries.len(),
            "collection pass"
        );

        let keys = state.keys;
        let state = RefCell::new(state);
        {
            let run = Run {
                func,
                source: &source,
                inputs: &inputs,
                context: &context,
                parent: frame,
                keys,
                recursive: verb.data().recursive,
                state: &state,
                in_progress: RefCell::new(FxHashSet::default()),
            };
            for (key, _) in &entries {
                self.compute_key(&run, key)?;
            }
        }

        let mut state = state.into_inner();
        let fresh = assemble(verb, &entries, &state.results, state.output.as_ref());
        let output = self.settle(state.output.take(), fresh, invalidates);
        state.output = Some(output.clone());
        state.context = Some(context);
        self.collections.put(id, state);
        Ok(output)
    }

    /// Forgets the invocation at `(keys, key)`: its reads, its cached
    /// values and every nested collection it ran, with their key sets.
    fn release(&mut self, keys: KeySetId, key: &Key) {
        let owner = (keys, key.clone());
        self.ledger.untrack(&owner);
        self.derived.untrack(&owner);
        self.cache.release(keys, key);
        for state in self.collections.release(keys, key) {
            for inner in state.inputs.keys() {
                self.release(state.keys, inner);
            }
            self.keysets.release(state.keys);
        }
    }

    /// Cached values plus collection states currently held.
    pub(crate) fn persistent_slots(&self) -> usize {
        self.cache.len() + self.collections.len()
    }

    fn compute_key(&mut self, run: &Run<'_>, key: &Key) -> RuntimeResult<Value> {
        if let Some(value) = run.state.borrow().results.get(key) {
            return Ok(value.clone());
        }
        let Some(val) = run.inputs.get(key) else {
            return Ok(Value::Null);
        };
        if !run.in_progress.borrow_mut().insert(key.clone()) {
            return Err(RuntimeError::RecursiveCycle {
                key: key.to_string(),
            });
        }

        let frame = Frame::invocation(
            run.func,
            run.keys,
            key.clone(),
            val.clone(),
            run.context.clone(),
            Some(run.parent),
            run.recursive.then_some(run),
        );
        self.stats.callbacks += 1;
        let value = self.call_function(run.func, &frame);
        run.in_progress.borrow_mut().remove(key);
        let value = value?;

        run.state
            .borrow_mut()
            .results
            .insert(key.clone(), value.clone());
        Ok(value)
    }

    fn recur(&mut self, run: &Run<'_>, key: &Value, requester: Key) -> RuntimeResult<Value> {
        let Some(key) = key.to_key().and_then(|key| run.source.normalize_key(key)) else {
            return Ok(Value::Null);
        };
        run.state
            .borrow_mut()
            .dependents
            .entry(key.clone())
            .or_default()
            .insert(requester);
        self.compute_key(run, &key)
    }
}

fn iterate(verb: TokenKind, source: &Value) -> RuntimeResult<Vec<(Key, Value)>> {
    let shape = if verb.data().array_verb {
        Shape::Array
    } else {
        Shape::Object
    };
    match (shape, source) {
        (_, Value::Null) => Ok(Vec::new()),
        (Shape::Array, Value::Array(_)) | (Shape::Object, Value::Array(_) | Value::Object(_)) => {
            Ok(source.entries().unwrap_or_default())
        }
        _ => Err(RuntimeError::NotIterable {
            verb: verb.name().to_string(),
            got: source.type_name().to_string(),
        }),
    }
}
