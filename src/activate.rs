//! Runtime activation and the directive processor.
//!
//! [`Runtime`] owns everything one page shares: the reactor (effect arena +
//! tracking stack), the event-listener registry, focus state, the shadow
//! subtrees of mounted components, and the resource fetcher. Activation
//! walks a subtree, wires each collected directive to the scope, and leaves
//! behind effects that patch the live tree in place on every dependency
//! write.
//!
//! Failure policy: nothing here throws past its boundary. Malformed
//! directives are logged and skipped; evaluation failures inside an effect
//! degrade to the empty/falsy branch and retry on the next dependency
//! change.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use markup5ever_rcdom::Handle;

use crate::directive::{self, Directive, DirectiveKind};
use crate::dom;
use crate::eval::{self, eval_expr};
use crate::expr;
use crate::loader::{self, ResourceFetcher};
use crate::scope::{Reactor, Scope};
use crate::value::Value;

/// Reserved scope key exposing the triggering event to `x-on:` handlers.
pub const EVENT_KEY: &str = "$event";
/// Reserved scope key for the refs table.
pub const REFS_KEY: &str = "refs";
/// Reserved scope key for the JSON fetch helper.
pub const FETCH_KEY: &str = "fetch";

/// Marker attribute tagging nodes generated by a structural directive run.
pub const GENERATED_ATTR: &str = "data-x-generated";

/// A delivered event: a name plus an arbitrary payload value exposed to the
/// handler scope as `$event`.
#[derive(Clone)]
pub struct Event {
    pub name: String,
    pub payload: Value,
}

impl Event {
    pub fn new(name: &str) -> Event {
        Event {
            name: name.to_string(),
            payload: Value::Null,
        }
    }

    pub fn with_payload(name: &str, payload: Value) -> Event {
        Event {
            name: name.to_string(),
            payload,
        }
    }
}

struct Listener {
    event: String,
    handler: Rc<dyn Fn(&Event)>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// RUNTIME
// ═══════════════════════════════════════════════════════════════════════════════

pub struct Runtime {
    reactor: Rc<Reactor>,
    fetcher: Rc<dyn ResourceFetcher>,
    listeners: RefCell<HashMap<usize, Vec<Listener>>>,
    focused: Cell<Option<usize>>,
    shadow_roots: RefCell<HashMap<usize, Handle>>,
}

impl Runtime {
    pub fn new(fetcher: Rc<dyn ResourceFetcher>) -> Rc<Runtime> {
        Rc::new(Runtime {
            reactor: Reactor::new(),
            fetcher,
            listeners: RefCell::new(HashMap::new()),
            focused: Cell::new(None),
            shadow_roots: RefCell::new(HashMap::new()),
        })
    }

    pub fn reactor(&self) -> &Rc<Reactor> {
        &self.reactor
    }

    pub fn fetcher(&self) -> Rc<dyn ResourceFetcher> {
        Rc::clone(&self.fetcher)
    }

    /// Entry point once the host document is parsed: find every root-state
    /// element and component host under `root` and activate each.
    pub fn activate_document(self: &Rc<Self>, root: &Handle) {
        let mut roots = Vec::new();
        let mut components = Vec::new();
        dom::walk(root, &mut |node| {
            if dom::has_attr(node, directive::STATE_ATTR) {
                roots.push(node.clone());
                return false;
            }
            if dom::is_element(node, directive::COMPONENT_TAG) {
                components.push(node.clone());
                return false;
            }
            true
        });
        for element in roots {
            self.activate_root(&element);
        }
        for host in components {
            loader::attach_component(self, &host);
        }
    }

    /// Build a scope from an element's declared initial state and wire its
    /// subtree.
    pub fn activate_root(self: &Rc<Self>, element: &Handle) -> Rc<Scope> {
        let scope = Scope::root();
        scope.define_static(REFS_KEY, Value::map(Default::default()));
        scope.define_static(FETCH_KEY, self.fetch_helper());

        let initializer = dom::get_attr(element, directive::STATE_ATTR).unwrap_or_default();
        if !initializer.trim().is_empty() {
            match eval::evaluate(&scope, &self.reactor, &initializer) {
                Some(Value::Map(entries)) => {
                    for (key, value) in entries.borrow().iter() {
                        scope.declare(key, value.clone());
                    }
                }
                Some(other) => log::error!(
                    "x-state initializer must be an object literal, got {}",
                    other.type_name()
                ),
                // Parse/eval failure already logged; activate with empty state.
                None => {}
            }
        }

        self.activate_subtree(element, &scope);
        scope
    }

    /// Scan one subtree and wire everything found: directives against
    /// `scope`, component hosts to the loader, nested state roots to fresh
    /// scopes.
    pub fn activate_subtree(self: &Rc<Self>, root: &Handle, scope: &Rc<Scope>) {
        let result = directive::scan(root);
        for d in &result.directives {
            self.apply(d, scope);
        }
        for host in &result.components {
            loader::attach_component(self, host);
        }
        for nested in &result.nested_roots {
            self.activate_root(nested);
        }
    }

    /// The non-reactive JSON fetch helper installed under the reserved
    /// `fetch` scope key.
    fn fetch_helper(&self) -> Value {
        let fetcher = Rc::clone(&self.fetcher);
        Value::native(move |args| {
            let source = match args.first() {
                Some(Value::Str(s)) => s.clone(),
                _ => {
                    log::warn!("fetch helper requires a string argument");
                    return Value::Null;
                }
            };
            let text = match fetcher.fetch_text(&source) {
                Ok(text) => text,
                Err(err) => {
                    log::warn!("fetch('{}') failed: {}", source, err);
                    return Value::Null;
                }
            };
            match serde_json::from_str::<serde_json::Value>(&text) {
                Ok(json) => Value::from_json(&json),
                Err(err) => {
                    log::warn!("fetch('{}') returned invalid JSON: {}", source, err);
                    Value::Null
                }
            }
        })
    }

    // ═══════════════════════════════════════════════════════════════════════
    // EVENTS & FOCUS
    // ═══════════════════════════════════════════════════════════════════════

    pub fn add_listener(&self, node: &Handle, event: &str, handler: Rc<dyn Fn(&Event)>) {
        self.listeners
            .borrow_mut()
            .entry(dom::node_key(node))
            .or_default()
            .push(Listener {
                event: event.to_string(),
                handler,
            });
    }

    /// Deliver an event to a node's listeners, in subscription order.
    pub fn dispatch(&self, node: &Handle, event: &Event) {
        let handlers: Vec<Rc<dyn Fn(&Event)>> = self
            .listeners
            .borrow()
            .get(&dom::node_key(node))
            .map(|listeners| {
                listeners
                    .iter()
                    .filter(|l| l.event == event.name)
                    .map(|l| Rc::clone(&l.handler))
                    .collect()
            })
            .unwrap_or_default();
        for handler in handlers {
            handler(event);
        }
    }

    pub fn focus(&self, node: &Handle) {
        self.focused.set(Some(dom::node_key(node)));
    }

    pub fn blur(&self) {
        self.focused.set(None);
    }

    fn is_focused(&self, node: &Handle) -> bool {
        self.focused.get() == Some(dom::node_key(node))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // SHADOW SUBTREES
    // ═══════════════════════════════════════════════════════════════════════

    pub fn register_shadow_root(&self, host: &Handle, root: Handle) {
        self.shadow_roots
            .borrow_mut()
            .insert(dom::node_key(host), root);
    }

    pub fn shadow_root_of(&self, host: &Handle) -> Option<Handle> {
        self.shadow_roots
            .borrow()
            .get(&dom::node_key(host))
            .cloned()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // DIRECTIVE PROCESSOR
    // ═══════════════════════════════════════════════════════════════════════

    fn apply(self: &Rc<Self>, d: &Directive, scope: &Rc<Scope>) {
        match &d.kind {
            DirectiveKind::For => self.apply_for(d, scope),
            DirectiveKind::If => self.apply_if(d, scope),
            DirectiveKind::Init => eval::execute(scope, &self.reactor, &d.value),
            DirectiveKind::Ref => self.apply_ref(d, scope),
            DirectiveKind::Bind(attr) => self.apply_bind(d, attr, scope),
            DirectiveKind::On(event) => self.apply_on(d, event, scope),
            DirectiveKind::Model => self.apply_model(d, scope),
            DirectiveKind::Text => self.apply_text(d, scope),
        }
    }

    /// One-time: store the live node in the refs table.
    fn apply_ref(self: &Rc<Self>, d: &Directive, scope: &Rc<Scope>) {
        let name = d.value.trim();
        if name.is_empty() {
            log::warn!("x-ref requires a name");
            return;
        }
        match scope.peek(REFS_KEY) {
            Some(Value::Map(refs)) => {
                refs.borrow_mut()
                    .insert(name.to_string(), Value::Node(d.node.clone()));
            }
            _ => log::warn!("no refs table on scope chain for x-ref=\"{}\"", name),
        }
    }

    /// Structural list rendering: full teardown and rebuild on every re-run.
    /// No key-based reconciliation, deliberately.
    fn apply_for(self: &Rc<Self>, d: &Directive, scope: &Rc<Scope>) {
        let (alias, source) = match expr::parse_loop(&d.value) {
            Ok(parsed) => parsed,
            Err(err) => {
                log::error!("invalid x-for expression '{}': {}", d.value, err);
                return;
            }
        };

        let anchor = dom::create_comment("x-for");
        dom::replace_node(&d.node, &anchor);
        let template = dom::deep_clone(&d.node);
        dom::remove_attr(&template, "x-for");

        let generated: Rc<RefCell<Vec<Handle>>> = Rc::new(RefCell::new(Vec::new()));
        let runtime = Rc::clone(self);
        let scope = Rc::clone(scope);
        let reactor = Rc::clone(&self.reactor);
        let expression = d.value.clone();

        self.reactor.create_effect(move || {
            let items: Vec<Value> = match eval_expr(&source, &scope, &reactor) {
                Ok(Value::List(items)) => items.borrow().clone(),
                Ok(_) => Vec::new(),
                Err(err) => {
                    log::warn!("x-for '{}' failed: {}", expression, err.message);
                    Vec::new()
                }
            };

            for old in generated.borrow_mut().drain(..) {
                dom::detach(&old);
            }

            let mut last = anchor.clone();
            for item in items {
                let clone = dom::deep_clone(&template);
                dom::set_attr(&clone, GENERATED_ATTR, "for");
                dom::insert_after(&last, &clone);
                last = clone.clone();

                let child = Scope::child(&scope);
                child.declare(&alias, item);
                runtime.activate_subtree(&clone, &child);

                generated.borrow_mut().push(clone);
            }
        });
    }

    /// Structural conditional: mount on false→true, unmount on true→false,
    /// no-op otherwise. The mounted content shares the enclosing scope.
    fn apply_if(self: &Rc<Self>, d: &Directive, scope: &Rc<Scope>) {
        let ast = match expr::parse(&d.value) {
            Ok(ast) => ast,
            Err(err) => {
                log::error!("invalid x-if expression '{}': {}", d.value, err);
                return;
            }
        };

        let anchor = dom::create_comment("x-if");
        dom::replace_node(&d.node, &anchor);
        let template = dom::deep_clone(&d.node);
        dom::remove_attr(&template, "x-if");

        let mounted: Rc<RefCell<Option<Handle>>> = Rc::new(RefCell::new(None));
        let runtime = Rc::clone(self);
        let scope = Rc::clone(scope);
        let reactor = Rc::clone(&self.reactor);

        self.reactor.create_effect(move || {
            let condition = match eval_expr(&ast, &scope, &reactor) {
                Ok(value) => value.is_truthy(),
                Err(err) => {
                    log::warn!("x-if evaluation failed: {}", err.message);
                    false
                }
            };

            let currently = mounted.borrow().clone();
            match (condition, currently) {
                (true, None) => {
                    let clone = dom::deep_clone(&template);
                    dom::set_attr(&clone, GENERATED_ATTR, "if");
                    dom::insert_after(&anchor, &clone);
                    runtime.activate_subtree(&clone, &scope);
                    *mounted.borrow_mut() = Some(clone);
                }
                (false, Some(node)) => {
                    dom::detach(&node);
                    *mounted.borrow_mut() = None;
                }
                _ => {}
            }
        });
    }

    /// Attribute binding with the boolean-attribute convention.
    fn apply_bind(self: &Rc<Self>, d: &Directive, attr: &str, scope: &Rc<Scope>) {
        let ast = match expr::parse(&d.value) {
            Ok(ast) => ast,
            Err(err) => {
                log::error!("invalid x-bind:{} expression '{}': {}", attr, d.value, err);
                return;
            }
        };
        let node = d.node.clone();
        let attr = attr.to_string();
        let scope = Rc::clone(scope);
        let reactor = Rc::clone(&self.reactor);

        self.reactor.create_effect(move || {
            let value = match eval_expr(&ast, &scope, &reactor) {
                Ok(value) => value,
                Err(err) => {
                    log::warn!("x-bind:{} evaluation failed: {}", attr, err.message);
                    Value::Null
                }
            };
            match value {
                Value::Null | Value::Bool(false) => dom::remove_attr(&node, &attr),
                Value::Bool(true) => dom::set_attr(&node, &attr, ""),
                other => dom::set_attr(&node, &attr, &other.to_display_string()),
            }
        });
    }

    /// One-time event subscription. The handler runs against a derived scope
    /// exposing the event payload under `$event`, for side effects only.
    fn apply_on(self: &Rc<Self>, d: &Directive, event: &str, scope: &Rc<Scope>) {
        let ast = match expr::parse(&d.value) {
            Ok(ast) => ast,
            Err(err) => {
                log::error!("invalid x-on:{} expression '{}': {}", event, d.value, err);
                return;
            }
        };
        let scope = Rc::clone(scope);
        let reactor = Rc::clone(&self.reactor);

        let handler: Rc<dyn Fn(&Event)> = Rc::new(move |event: &Event| {
            let derived = Scope::child(&scope);
            derived.define_static(EVENT_KEY, event.payload.clone());
            if let Err(err) = eval_expr(&ast, &derived, &reactor) {
                log::warn!("event handler failed: {}", err.message);
            }
        });
        self.add_listener(&d.node, event, handler);
    }

    /// Two-way binding between a form control and a scope key.
    fn apply_model(self: &Rc<Self>, d: &Directive, scope: &Rc<Scope>) {
        let key = d.value.trim().to_string();
        if key.is_empty() || !key.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '$') {
            log::error!("x-model requires a plain scope key, got '{}'", d.value);
            return;
        }

        let node = d.node.clone();
        let uses_checked = matches!(
            dom::get_attr(&node, "type").as_deref(),
            Some("checkbox") | Some("radio")
        );
        let listen_event = if uses_checked || dom::is_element(&node, "select") {
            "change"
        } else {
            "input"
        };

        // Scope → control. Skipped while the control holds focus so a re-run
        // cannot clobber in-progress typing.
        {
            let runtime = Rc::clone(self);
            let node = node.clone();
            let key = key.clone();
            let scope = Rc::clone(scope);
            let reactor = Rc::clone(&self.reactor);
            self.reactor.create_effect(move || {
                let value = scope.get(&key, &reactor).unwrap_or(Value::Null);
                if runtime.is_focused(&node) {
                    return;
                }
                if uses_checked {
                    if value.is_truthy() {
                        dom::set_attr(&node, "checked", "");
                    } else {
                        dom::remove_attr(&node, "checked");
                    }
                } else {
                    dom::set_attr(&node, "value", &value.to_display_string());
                }
            });
        }

        // Control → scope.
        {
            let node2 = node.clone();
            let scope = Rc::clone(scope);
            let reactor = Rc::clone(&self.reactor);
            let handler: Rc<dyn Fn(&Event)> = Rc::new(move |_event: &Event| {
                let value = if uses_checked {
                    Value::Bool(dom::has_attr(&node2, "checked"))
                } else {
                    Value::Str(dom::get_attr(&node2, "value").unwrap_or_default())
                };
                scope.set(&key, value, &reactor);
            });
            self.add_listener(&node, listen_event, handler);
        }
    }

    /// Text content binding; null-ish results render empty.
    fn apply_text(self: &Rc<Self>, d: &Directive, scope: &Rc<Scope>) {
        let ast = match expr::parse(&d.value) {
            Ok(ast) => ast,
            Err(err) => {
                log::error!("invalid x-text expression '{}': {}", d.value, err);
                return;
            }
        };
        let node = d.node.clone();
        let scope = Rc::clone(scope);
        let reactor = Rc::clone(&self.reactor);

        self.reactor.create_effect(move || {
            let text = match eval_expr(&ast, &scope, &reactor) {
                Ok(value) => value.to_display_string(),
                Err(err) => {
                    log::warn!("x-text evaluation failed: {}", err.message);
                    String::new()
                }
            };
            dom::set_text(&node, &text);
        });
    }
}
