//! Reactive scope container.
//!
//! The scope is a typed mapping from key to [`ObservableCell`] rather than a
//! transparently intercepted record: a cell holds the current value plus the
//! insertion-ordered list of effects that read it. The [`Reactor`] owns the
//! effect arena and an explicit tracking-context stack; the stack is pushed
//! around every effect run, so effect creation during another effect's first
//! run cannot corrupt tracking and no effect is ever invoked re-entrantly
//! while it is itself tracking.
//!
//! Scope chains implement the inheritance-write asymmetry: reads fall
//! through to the parent when the key is absent locally, writes land on the
//! most specific scope that declares the key (or create it locally if no
//! scope declares it).
//!
//! Cells never prune their subscriber lists. An effect whose target node was
//! detached stays registered until the runtime is dropped; this is the
//! documented leak of the design.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::value::Value;

pub type EffectId = usize;

// ═══════════════════════════════════════════════════════════════════════════════
// REACTOR
// ═══════════════════════════════════════════════════════════════════════════════

pub struct Reactor {
    effects: RefCell<Vec<Rc<dyn Fn()>>>,
    stack: RefCell<Vec<EffectId>>,
}

impl Reactor {
    pub fn new() -> Rc<Reactor> {
        Rc::new(Reactor {
            effects: RefCell::new(Vec::new()),
            stack: RefCell::new(Vec::new()),
        })
    }

    /// Register `f` and run it once immediately. The first run performs the
    /// tracked reads that build the effect's dependency set.
    pub fn create_effect(self: &Rc<Self>, f: impl Fn() + 'static) -> EffectId {
        let id = {
            let mut effects = self.effects.borrow_mut();
            effects.push(Rc::new(f));
            effects.len() - 1
        };
        self.run_effect(id);
        id
    }

    /// Re-run one effect with tracking context. Invocations of an effect
    /// already on the context stack are skipped: a write performed inside an
    /// effect to a key that same effect reads must not recurse into it.
    pub fn run_effect(&self, id: EffectId) {
        if self.stack.borrow().contains(&id) {
            return;
        }
        let f = match self.effects.borrow().get(id) {
            Some(f) => Rc::clone(f),
            None => return,
        };
        self.stack.borrow_mut().push(id);
        f();
        self.stack.borrow_mut().pop();
    }

    /// The innermost effect currently running, if any.
    pub fn current(&self) -> Option<EffectId> {
        self.stack.borrow().last().copied()
    }

    #[cfg(test)]
    pub fn effect_count(&self) -> usize {
        self.effects.borrow().len()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// OBSERVABLE CELL
// ═══════════════════════════════════════════════════════════════════════════════

/// One scope key: current value plus the effects that read it, in first-read
/// order.
pub struct ObservableCell {
    value: RefCell<Value>,
    subscribers: RefCell<Vec<EffectId>>,
}

impl ObservableCell {
    fn new(value: Value) -> Rc<ObservableCell> {
        Rc::new(ObservableCell {
            value: RefCell::new(value),
            subscribers: RefCell::new(Vec::new()),
        })
    }

    /// Read, registering the currently tracking effect as a dependent.
    fn read(&self, reactor: &Reactor) -> Value {
        if let Some(id) = reactor.current() {
            let mut subscribers = self.subscribers.borrow_mut();
            if !subscribers.contains(&id) {
                subscribers.push(id);
            }
        }
        self.value.borrow().clone()
    }

    /// Write; returns the dependents to re-run if the value changed.
    /// Scalars compare by value, aggregates by identity.
    fn write(&self, value: Value) -> Option<Vec<EffectId>> {
        {
            let mut current = self.value.borrow_mut();
            if *current == value {
                return None;
            }
            *current = value;
        }
        Some(self.subscribers.borrow().clone())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SCOPE
// ═══════════════════════════════════════════════════════════════════════════════

pub struct Scope {
    cells: RefCell<HashMap<String, Rc<ObservableCell>>>,
    /// Reserved, never-tracked values: the refs table, the fetch helper, the
    /// `$event` payload on handler scopes.
    statics: RefCell<HashMap<String, Value>>,
    parent: Option<Rc<Scope>>,
}

impl Scope {
    pub fn root() -> Rc<Scope> {
        Rc::new(Scope {
            cells: RefCell::new(HashMap::new()),
            statics: RefCell::new(HashMap::new()),
            parent: None,
        })
    }

    /// A value-extended view inheriting from `parent`.
    pub fn child(parent: &Rc<Scope>) -> Rc<Scope> {
        Rc::new(Scope {
            cells: RefCell::new(HashMap::new()),
            statics: RefCell::new(HashMap::new()),
            parent: Some(Rc::clone(parent)),
        })
    }

    /// Create or replace a local key without triggering effects. Used for
    /// initial state and loop-alias bindings.
    pub fn declare(&self, key: &str, value: Value) {
        self.cells
            .borrow_mut()
            .insert(key.to_string(), ObservableCell::new(value));
    }

    /// Install a reserved non-reactive value; reads of it never register a
    /// dependency.
    pub fn define_static(&self, key: &str, value: Value) {
        self.statics.borrow_mut().insert(key.to_string(), value);
    }

    /// Tracked read along the scope chain.
    pub fn get(&self, key: &str, reactor: &Reactor) -> Option<Value> {
        if let Some(value) = self.statics.borrow().get(key) {
            return Some(value.clone());
        }
        if let Some(cell) = self.cells.borrow().get(key) {
            return Some(cell.read(reactor));
        }
        self.parent.as_ref().and_then(|p| p.get(key, reactor))
    }

    /// Untracked read, for diagnostics and tests.
    pub fn peek(&self, key: &str) -> Option<Value> {
        if let Some(value) = self.statics.borrow().get(key) {
            return Some(value.clone());
        }
        if let Some(cell) = self.cells.borrow().get(key) {
            return Some(cell.value.borrow().clone());
        }
        self.parent.as_ref().and_then(|p| p.peek(key))
    }

    /// Write along the chain: lands on the most specific scope declaring the
    /// key, or creates the key locally. Dependent effects run synchronously,
    /// in first-registration order, before this call returns.
    pub fn set(&self, key: &str, value: Value, reactor: &Reactor) {
        let mut scope = self;
        loop {
            let cell = scope.cells.borrow().get(key).cloned();
            if let Some(cell) = cell {
                if let Some(dependents) = cell.write(value) {
                    for id in dependents {
                        reactor.run_effect(id);
                    }
                }
                return;
            }
            match &scope.parent {
                Some(parent) => scope = parent,
                None => break,
            }
        }
        self.declare(key, value);
    }

    pub fn declares(&self, key: &str) -> bool {
        self.cells.borrow().contains_key(key)
    }
}
