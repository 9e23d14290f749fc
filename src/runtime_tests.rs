//! End-to-end activation scenarios over parsed documents.

use std::rc::Rc;

use markup5ever_rcdom::Handle;

use crate::activate::{Event, Runtime};
use crate::dom;
use crate::loader::StaticFetcher;
use crate::scope::Scope;
use crate::value::Value;

/// Parse a page, activate the first state root, and hand back the live
/// pieces a scenario needs. The returned handle is the document node:
/// holding it keeps the whole tree alive for the test body.
fn boot(html: &str) -> (Rc<Runtime>, Rc<Scope>, Handle) {
    boot_with(html, &[])
}

fn boot_with(html: &str, components: &[(&str, &str)]) -> (Rc<Runtime>, Rc<Scope>, Handle) {
    let _ = env_logger::builder().is_test(true).try_init();
    let runtime = Runtime::new(Rc::new(StaticFetcher::with(components)));
    let parsed = dom::parse_document(html);
    let page = parsed.document.clone();
    let root = {
        let mut found = None;
        dom::walk(&page, &mut |node| {
            if found.is_none() && dom::has_attr(node, "x-state") {
                found = Some(node.clone());
                return false;
            }
            true
        });
        found.expect("page has a state root")
    };
    let scope = runtime.activate_root(&root);
    (runtime, scope, page)
}

#[test]
fn test_counter_updates_on_click() {
    let (runtime, _scope, page) = boot(
        r#"<div x-state="{ count: 0 }">
             <span x-text="count"></span>
             <button x-on:click="count++"></button>
           </div>"#,
    );
    let span = dom::find_element(&page, "span").unwrap();
    let button = dom::find_element(&page, "button").unwrap();
    assert_eq!(dom::text_content(&span), "0");

    runtime.dispatch(&button, &Event::new("click"));
    assert_eq!(dom::text_content(&span), "1");
    runtime.dispatch(&button, &Event::new("click"));
    assert_eq!(dom::text_content(&span), "2");
}

#[test]
fn test_bind_removes_attribute_for_nullish_value() {
    let (runtime, scope, page) = boot(
        r#"<div x-state="{ url: null }"><a x-bind:href="url">link</a></div>"#,
    );
    let link = dom::find_element(&page, "a").unwrap();
    assert!(!dom::has_attr(&link, "href"));

    scope.set("url", Value::Str("/docs".into()), runtime.reactor());
    assert_eq!(dom::get_attr(&link, "href"), Some("/docs".into()));

    scope.set("url", Value::Null, runtime.reactor());
    assert!(!dom::has_attr(&link, "href"));
}

#[test]
fn test_bind_boolean_attribute_convention() {
    let (runtime, scope, page) = boot(
        r#"<div x-state="{ busy: true }"><button x-bind:disabled="busy"></button></div>"#,
    );
    let button = dom::find_element(&page, "button").unwrap();
    assert_eq!(dom::get_attr(&button, "disabled"), Some("".into()));

    scope.set("busy", Value::Bool(false), runtime.reactor());
    assert!(!dom::has_attr(&button, "disabled"));
}

#[test]
fn test_for_rebuilds_in_sequence_order() {
    let (runtime, scope, page) = boot(
        r#"<div x-state="{ items: ['a', 'b', 'c'] }">
             <ul><li x-for="item in items" x-text="item"></li></ul>
           </div>"#,
    );
    let texts = |page: &Handle| -> Vec<String> {
        dom::find_all_elements(page, "li")
            .iter()
            .map(dom::text_content)
            .collect()
    };
    assert_eq!(texts(&page), vec!["a", "b", "c"]);

    scope.set(
        "items",
        Value::list(vec![Value::Str("a".into()), Value::Str("c".into())]),
        runtime.reactor(),
    );
    assert_eq!(texts(&page), vec!["a", "c"]);

    scope.set("items", Value::list(vec![]), runtime.reactor());
    assert!(texts(&page).is_empty());
}

#[test]
fn test_for_over_non_sequence_renders_nothing() {
    let (_runtime, _scope, page) = boot(
        r#"<div x-state="{ items: 7 }">
             <ul><li x-for="item in items" x-text="item"></li></ul>
           </div>"#,
    );
    assert!(dom::find_all_elements(&page, "li").is_empty());
}

#[test]
fn test_malformed_loop_is_skipped_without_disturbing_siblings() {
    let (runtime, _scope, page) = boot(
        r#"<div x-state="{ count: 0 }">
             <li x-for="items"></li>
             <span x-text="count"></span>
             <button x-on:click="count++"></button>
           </div>"#,
    );
    // The host with the unparseable loop stays in place, inert.
    assert!(dom::find_element(&page, "li").is_some());

    // Sibling directives still activate.
    let span = dom::find_element(&page, "span").unwrap();
    let button = dom::find_element(&page, "button").unwrap();
    assert_eq!(dom::text_content(&span), "0");
    runtime.dispatch(&button, &Event::new("click"));
    assert_eq!(dom::text_content(&span), "1");
}

#[test]
fn test_if_mounts_and_unmounts_on_transitions() {
    let (runtime, scope, page) = boot(
        r#"<div x-state="{ show: false }"><p x-if="show">hi</p></div>"#,
    );
    assert!(dom::find_element(&page, "p").is_none());

    scope.set("show", Value::Bool(true), runtime.reactor());
    let mounted = dom::find_element(&page, "p").unwrap();
    assert_eq!(dom::text_content(&mounted), "hi");

    // true -> true is a no-op: the same node stays mounted.
    scope.set("show", Value::Str("yes".into()), runtime.reactor());
    let still = dom::find_element(&page, "p").unwrap();
    assert!(dom::same_node(&mounted, &still));

    scope.set("show", Value::Bool(false), runtime.reactor());
    assert!(dom::find_element(&page, "p").is_none());
}

#[test]
fn test_nested_for_inherits_outer_alias() {
    let (_runtime, _scope, page) = boot(
        r#"<div x-state="{ rows: [['a', 'b'], ['c']] }">
             <div x-for="row in rows"><span x-for="cell in row" x-text="cell"></span></div>
           </div>"#,
    );
    let cells: Vec<String> = dom::find_all_elements(&page, "span")
        .iter()
        .map(dom::text_content)
        .collect();
    assert_eq!(cells, vec!["a", "b", "c"]);
}

#[test]
fn test_init_runs_before_bindings_read() {
    let (_runtime, _scope, page) = boot(
        r#"<div x-state="{ count: 0 }" x-init="count = 5">
             <span x-text="count"></span>
           </div>"#,
    );
    let span = dom::find_element(&page, "span").unwrap();
    assert_eq!(dom::text_content(&span), "5");
}

#[test]
fn test_ref_lands_in_refs_table() {
    let (_runtime, scope, page) = boot(
        r#"<div x-state="{}"><span x-ref="label">x</span></div>"#,
    );
    let span = dom::find_element(&page, "span").unwrap();
    match scope.peek("refs") {
        Some(Value::Map(refs)) => match refs.borrow().get("label") {
            Some(Value::Node(node)) => assert!(dom::same_node(node, &span)),
            other => panic!("expected node ref, got {:?}", other),
        },
        other => panic!("expected refs table, got {:?}", other),
    }
}

#[test]
fn test_event_payload_is_visible_to_handler() {
    let (runtime, scope, page) = boot(
        r#"<div x-state="{ last: '' }"><button x-on:click="last = $event.msg"></button></div>"#,
    );
    let button = dom::find_element(&page, "button").unwrap();
    let mut payload = std::collections::BTreeMap::new();
    payload.insert("msg".to_string(), Value::Str("hi".into()));
    runtime.dispatch(&button, &Event::with_payload("click", Value::map(payload)));
    assert_eq!(scope.peek("last"), Some(Value::Str("hi".into())));
}

#[test]
fn test_model_round_trip() {
    let (runtime, scope, page) = boot(
        r#"<div x-state="{ name: 'x' }"><input x-model="name"></div>"#,
    );
    let input = dom::find_element(&page, "input").unwrap();
    assert_eq!(dom::get_attr(&input, "value"), Some("x".into()));

    // Control -> scope.
    dom::set_attr(&input, "value", "y");
    runtime.dispatch(&input, &Event::new("input"));
    assert_eq!(scope.peek("name"), Some(Value::Str("y".into())));

    // Scope -> control, unless the control holds focus.
    runtime.focus(&input);
    scope.set("name", Value::Str("z".into()), runtime.reactor());
    assert_eq!(dom::get_attr(&input, "value"), Some("y".into()));

    runtime.blur();
    scope.set("name", Value::Str("w".into()), runtime.reactor());
    assert_eq!(dom::get_attr(&input, "value"), Some("w".into()));
}

#[test]
fn test_model_checkbox_uses_checked() {
    let (runtime, scope, page) = boot(
        r#"<div x-state="{ agreed: false }"><input type="checkbox" x-model="agreed"></div>"#,
    );
    let input = dom::find_element(&page, "input").unwrap();
    assert!(!dom::has_attr(&input, "checked"));

    dom::set_attr(&input, "checked", "");
    runtime.dispatch(&input, &Event::new("change"));
    assert_eq!(scope.peek("agreed"), Some(Value::Bool(true)));

    scope.set("agreed", Value::Bool(false), runtime.reactor());
    assert!(!dom::has_attr(&input, "checked"));
}

#[test]
fn test_text_renders_null_as_empty() {
    let (runtime, scope, page) = boot(
        r#"<div x-state="{ v: null }"><span x-text="v">stale</span></div>"#,
    );
    let span = dom::find_element(&page, "span").unwrap();
    assert_eq!(dom::text_content(&span), "");

    scope.set("v", Value::Number(3.0), runtime.reactor());
    assert_eq!(dom::text_content(&span), "3");
}

#[test]
fn test_component_host_mounts_isolated_subtree() {
    let runtime = Runtime::new(Rc::new(StaticFetcher::with(&[(
        "badge.xiv",
        r#"<xiv type="template"><b>{{label}}</b></xiv>"#,
    )])));
    let parsed = dom::parse_document(
        r#"<body><x-comp src="badge.xiv" t-label="new"></x-comp></body>"#,
    );
    runtime.activate_document(&parsed.document);

    let host = dom::find_element(&parsed.document, "x-comp").unwrap();
    let shadow = runtime.shadow_root_of(&host).unwrap();
    assert_eq!(dom::text_content(&shadow), "new");
}

#[test]
fn test_nested_state_root_is_independent() {
    let (runtime, outer, page) = boot(
        r#"<div x-state="{ n: 1 }">
             <span x-text="n"></span>
             <section x-state="{ n: 10 }"><em x-text="n"></em></section>
           </div>"#,
    );
    let span = dom::find_element(&page, "span").unwrap();
    let em = dom::find_element(&page, "em").unwrap();
    assert_eq!(dom::text_content(&span), "1");
    assert_eq!(dom::text_content(&em), "10");

    outer.set("n", Value::Number(2.0), runtime.reactor());
    assert_eq!(dom::text_content(&span), "2");
    assert_eq!(dom::text_content(&em), "10");
}

#[test]
fn test_conditional_content_activates_against_live_scope() {
    let (runtime, scope, page) = boot(
        r#"<div x-state="{ show: false, msg: 'a' }">
             <p x-if="show"><span x-text="msg"></span></p>
           </div>"#,
    );
    scope.set("show", Value::Bool(true), runtime.reactor());
    let span = dom::find_element(&page, "span").unwrap();
    assert_eq!(dom::text_content(&span), "a");

    scope.set("msg", Value::Str("b".into()), runtime.reactor());
    assert_eq!(dom::text_content(&span), "b");
}
