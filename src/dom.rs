//! Live-tree utilities.
//!
//! The runtime mutates an html5ever-parsed rcdom tree in place: attributes,
//! text content, anchors for structural directives, and generated subtree
//! bookkeeping all go through here. Nodes are shared `Handle`s (`Rc`), so
//! identity comparisons use pointer equality.

use html5ever::serialize::{serialize, SerializeOpts, TraversalScope};
use html5ever::tendril::TendrilSink;
use html5ever::{namespace_url, ns, Attribute, LocalName, QualName};
use markup5ever_rcdom::{Handle, Node, NodeData, RcDom, SerializableHandle};
use std::cell::RefCell;
use std::rc::Rc;
use tendril::StrTendril;

/// Stable identity key for listener/shadow registries.
pub fn node_key(node: &Handle) -> usize {
    Rc::as_ptr(node) as usize
}

pub fn same_node(a: &Handle, b: &Handle) -> bool {
    Rc::ptr_eq(a, b)
}

// ═══════════════════════════════════════════════════════════════════════════════
// PARSING & SERIALIZATION
// ═══════════════════════════════════════════════════════════════════════════════

pub fn parse_document(html: &str) -> RcDom {
    html5ever::parse_document(RcDom::default(), Default::default())
        .from_utf8()
        .read_from(&mut html.as_bytes())
        .expect("reading from a string is infallible")
}

/// Parse a markup fragment and return its body children, detached. html5ever
/// always builds the full html/head/body scaffold; fragment callers only
/// want the content.
pub fn parse_fragment(html: &str) -> Vec<Handle> {
    let dom = parse_document(html);
    let body = match find_element(&dom.document, "body") {
        Some(body) => body,
        None => return Vec::new(),
    };
    let children: Vec<Handle> = body.children.borrow_mut().drain(..).collect();
    for child in &children {
        child.parent.set(None);
    }
    children
}

pub fn serialize_subtree(node: &Handle) -> String {
    let mut buf = Vec::new();
    let opts = SerializeOpts {
        traversal_scope: TraversalScope::IncludeNode,
        ..Default::default()
    };
    let handle: SerializableHandle = node.clone().into();
    serialize(&mut buf, &handle, opts).expect("serializing to a Vec is infallible");
    String::from_utf8_lossy(&buf).into_owned()
}

pub fn serialize_children(node: &Handle) -> String {
    let mut buf = Vec::new();
    let handle: SerializableHandle = node.clone().into();
    serialize(&mut buf, &handle, SerializeOpts::default())
        .expect("serializing to a Vec is infallible");
    String::from_utf8_lossy(&buf).into_owned()
}

// ═══════════════════════════════════════════════════════════════════════════════
// NODE CONSTRUCTION
// ═══════════════════════════════════════════════════════════════════════════════

pub fn create_element(tag: &str) -> Handle {
    Node::new(NodeData::Element {
        name: QualName::new(None, ns!(html), LocalName::from(tag)),
        attrs: RefCell::new(Vec::new()),
        template_contents: RefCell::new(None),
        mathml_annotation_xml_integration_point: false,
    })
}

pub fn create_text(text: &str) -> Handle {
    Node::new(NodeData::Text {
        contents: RefCell::new(StrTendril::from(text)),
    })
}

pub fn create_comment(text: &str) -> Handle {
    Node::new(NodeData::Comment {
        contents: StrTendril::from(text),
    })
}

/// Detached container used as an isolated render target (the shadow-subtree
/// analog for nested components).
pub fn create_isolated_root() -> Handle {
    Node::new(NodeData::Document)
}

// ═══════════════════════════════════════════════════════════════════════════════
// TREE QUERIES
// ═══════════════════════════════════════════════════════════════════════════════

pub fn tag_name(node: &Handle) -> Option<String> {
    match &node.data {
        NodeData::Element { name, .. } => Some(name.local.to_string()),
        _ => None,
    }
}

pub fn is_element(node: &Handle, tag: &str) -> bool {
    tag_name(node).as_deref() == Some(tag)
}

pub fn parent_of(node: &Handle) -> Option<Handle> {
    let weak = node.parent.take();
    let parent = weak.as_ref().and_then(|w| w.upgrade());
    node.parent.set(weak);
    parent
}

/// Preorder walk. `visit` returns false to skip a node's children.
pub fn walk<F: FnMut(&Handle) -> bool>(node: &Handle, visit: &mut F) {
    if !visit(node) {
        return;
    }
    let children: Vec<Handle> = node.children.borrow().clone();
    for child in children {
        walk(&child, visit);
    }
}

pub fn find_element(root: &Handle, tag: &str) -> Option<Handle> {
    let mut found = None;
    walk(root, &mut |node| {
        if found.is_some() {
            return false;
        }
        if is_element(node, tag) {
            found = Some(node.clone());
            return false;
        }
        true
    });
    found
}

pub fn find_all_elements(root: &Handle, tag: &str) -> Vec<Handle> {
    let mut found = Vec::new();
    walk(root, &mut |node| {
        if is_element(node, tag) {
            found.push(node.clone());
        }
        true
    });
    found
}

/// Concatenated descendant text, for assertions and diagnostics.
pub fn text_content(node: &Handle) -> String {
    let mut out = String::new();
    walk(node, &mut |n| {
        if let NodeData::Text { contents } = &n.data {
            out.push_str(&contents.borrow());
        }
        true
    });
    out
}

// ═══════════════════════════════════════════════════════════════════════════════
// ATTRIBUTES
// ═══════════════════════════════════════════════════════════════════════════════

pub fn get_attr(node: &Handle, name: &str) -> Option<String> {
    match &node.data {
        NodeData::Element { attrs, .. } => attrs
            .borrow()
            .iter()
            .find(|a| a.name.local.as_ref() == name)
            .map(|a| a.value.to_string()),
        _ => None,
    }
}

pub fn has_attr(node: &Handle, name: &str) -> bool {
    get_attr(node, name).is_some()
}

pub fn set_attr(node: &Handle, name: &str, value: &str) {
    if let NodeData::Element { attrs, .. } = &node.data {
        let mut attrs = attrs.borrow_mut();
        if let Some(attr) = attrs.iter_mut().find(|a| a.name.local.as_ref() == name) {
            attr.value = StrTendril::from(value);
        } else {
            attrs.push(Attribute {
                name: QualName::new(None, ns!(), LocalName::from(name)),
                value: StrTendril::from(value),
            });
        }
    }
}

pub fn remove_attr(node: &Handle, name: &str) {
    if let NodeData::Element { attrs, .. } = &node.data {
        attrs.borrow_mut().retain(|a| a.name.local.as_ref() != name);
    }
}

/// All attributes as (name, value) pairs, document order.
pub fn attr_pairs(node: &Handle) -> Vec<(String, String)> {
    match &node.data {
        NodeData::Element { attrs, .. } => attrs
            .borrow()
            .iter()
            .map(|a| (a.name.local.to_string(), a.value.to_string()))
            .collect(),
        _ => Vec::new(),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// MUTATION
// ═══════════════════════════════════════════════════════════════════════════════

pub fn append_child(parent: &Handle, child: &Handle) {
    detach(child);
    parent.children.borrow_mut().push(child.clone());
    child.parent.set(Some(Rc::downgrade(parent)));
}

pub fn detach(node: &Handle) {
    if let Some(parent) = parent_of(node) {
        parent
            .children
            .borrow_mut()
            .retain(|c| !Rc::ptr_eq(c, node));
    }
    node.parent.set(None);
}

fn position_in_parent(parent: &Handle, node: &Handle) -> Option<usize> {
    parent
        .children
        .borrow()
        .iter()
        .position(|c| Rc::ptr_eq(c, node))
}

/// Insert `node` as the next sibling of `reference`.
pub fn insert_after(reference: &Handle, node: &Handle) {
    let parent = match parent_of(reference) {
        Some(parent) => parent,
        None => return,
    };
    detach(node);
    let index = position_in_parent(&parent, reference);
    match index {
        Some(i) => parent.children.borrow_mut().insert(i + 1, node.clone()),
        None => parent.children.borrow_mut().push(node.clone()),
    }
    node.parent.set(Some(Rc::downgrade(&parent)));
}

/// Swap `old` out of the tree for `new` at the same position.
pub fn replace_node(old: &Handle, new: &Handle) {
    let parent = match parent_of(old) {
        Some(parent) => parent,
        None => return,
    };
    detach(new);
    if let Some(i) = position_in_parent(&parent, old) {
        parent.children.borrow_mut()[i] = new.clone();
        new.parent.set(Some(Rc::downgrade(&parent)));
        old.parent.set(None);
    }
}

/// Replace the node's content with a single text node.
pub fn set_text(node: &Handle, text: &str) {
    let mut children = node.children.borrow_mut();
    for child in children.iter() {
        child.parent.set(None);
    }
    children.clear();
    let text_node = create_text(text);
    text_node.parent.set(Some(Rc::downgrade(node)));
    children.push(text_node);
}

/// Structure-preserving deep clone. Template contents are not carried over;
/// per-instance activation re-reads the live element.
pub fn deep_clone(node: &Handle) -> Handle {
    let cloned = match &node.data {
        NodeData::Document => Node::new(NodeData::Document),
        NodeData::Doctype {
            name,
            public_id,
            system_id,
        } => Node::new(NodeData::Doctype {
            name: name.clone(),
            public_id: public_id.clone(),
            system_id: system_id.clone(),
        }),
        NodeData::Text { contents } => create_text(&contents.borrow()),
        NodeData::Comment { contents } => create_comment(contents),
        NodeData::Element { name, attrs, .. } => Node::new(NodeData::Element {
            name: name.clone(),
            attrs: RefCell::new(attrs.borrow().clone()),
            template_contents: RefCell::new(None),
            mathml_annotation_xml_integration_point: false,
        }),
        NodeData::ProcessingInstruction { target, contents } => {
            Node::new(NodeData::ProcessingInstruction {
                target: target.clone(),
                contents: contents.clone(),
            })
        }
    };
    for child in node.children.borrow().iter() {
        let child_clone = deep_clone(child);
        append_child(&cloned, &child_clone);
    }
    cloned
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attr_roundtrip() {
        let div = create_element("div");
        assert_eq!(get_attr(&div, "class"), None);
        set_attr(&div, "class", "card");
        assert_eq!(get_attr(&div, "class"), Some("card".into()));
        set_attr(&div, "class", "panel");
        assert_eq!(get_attr(&div, "class"), Some("panel".into()));
        remove_attr(&div, "class");
        assert!(!has_attr(&div, "class"));
    }

    #[test]
    fn test_set_text_replaces_content() {
        let div = create_element("div");
        let span = create_element("span");
        append_child(&div, &span);
        set_text(&div, "hello");
        assert_eq!(div.children.borrow().len(), 1);
        assert_eq!(text_content(&div), "hello");
        set_text(&div, "hello");
        assert_eq!(div.children.borrow().len(), 1);
    }

    #[test]
    fn test_insert_after_and_detach() {
        let parent = create_element("ul");
        let a = create_element("li");
        let c = create_element("li");
        append_child(&parent, &a);
        append_child(&parent, &c);

        let b = create_element("li");
        insert_after(&a, &b);
        let order: Vec<usize> = parent.children.borrow().iter().map(node_key).collect();
        assert_eq!(order, vec![node_key(&a), node_key(&b), node_key(&c)]);

        detach(&b);
        assert_eq!(parent.children.borrow().len(), 2);
        assert!(parent_of(&b).is_none());
    }

    #[test]
    fn test_replace_node_keeps_position() {
        let parent = create_element("div");
        let old = create_element("span");
        let tail = create_element("em");
        append_child(&parent, &old);
        append_child(&parent, &tail);

        let anchor = create_comment("anchor");
        replace_node(&old, &anchor);

        let children = parent.children.borrow();
        assert!(matches!(children[0].data, NodeData::Comment { .. }));
        assert!(same_node(&children[1], &tail));
    }

    #[test]
    fn test_deep_clone_is_independent() {
        let fragment = parse_fragment("<div class=\"a\"><span>text</span></div>");
        let div = fragment
            .iter()
            .find(|n| is_element(n, "div"))
            .cloned()
            .unwrap();
        let clone = deep_clone(&div);
        assert_eq!(get_attr(&clone, "class"), Some("a".into()));
        assert_eq!(text_content(&clone), "text");

        set_attr(&clone, "class", "b");
        assert_eq!(get_attr(&div, "class"), Some("a".into()));
    }

    #[test]
    fn test_parse_fragment_detaches_body_children() {
        let nodes = parse_fragment("<p>one</p><p>two</p>");
        let elements: Vec<Handle> = nodes
            .into_iter()
            .filter(|n| is_element(n, "p"))
            .collect();
        assert_eq!(elements.len(), 2);
        assert!(parent_of(&elements[0]).is_none());
    }

    #[test]
    fn test_serialize_subtree() {
        let div = create_element("div");
        set_attr(&div, "id", "x");
        set_text(&div, "hi");
        assert_eq!(serialize_subtree(&div), "<div id=\"x\">hi</div>");
    }
}
