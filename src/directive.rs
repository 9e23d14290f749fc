//! Directive model and subtree scanner.
//!
//! A directive is a `(node, kind, raw value)` triple read from a reserved
//! `x-` attribute at scan time; nothing here is persisted past activation.
//! The scanner performs a full element-order traversal and then stable-sorts
//! by a fixed kind priority: structural directives must replace their host
//! with an anchor before sibling directives would touch now-stale nodes, and
//! refs must be populated before expressions can reference them.

use markup5ever_rcdom::Handle;

use crate::dom;

pub const DIRECTIVE_PREFIX: &str = "x-";

/// Attribute marking a reactive state root; handled by activation, not
/// collected as a directive.
pub const STATE_ATTR: &str = "x-state";

/// Nested-component host tag.
pub const COMPONENT_TAG: &str = "x-comp";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectiveKind {
    For,
    If,
    Init,
    Ref,
    Bind(String),
    On(String),
    Model,
    Text,
}

impl DirectiveKind {
    /// Parse an attribute name into a directive kind. `None` for attributes
    /// outside the directive namespace or with unknown names.
    pub fn parse(attr_name: &str) -> Option<DirectiveKind> {
        let rest = attr_name.strip_prefix(DIRECTIVE_PREFIX)?;
        match rest {
            "for" => Some(DirectiveKind::For),
            "if" => Some(DirectiveKind::If),
            "init" => Some(DirectiveKind::Init),
            "ref" => Some(DirectiveKind::Ref),
            "model" => Some(DirectiveKind::Model),
            "text" => Some(DirectiveKind::Text),
            _ => {
                if let Some(attr) = rest.strip_prefix("bind:") {
                    Some(DirectiveKind::Bind(attr.to_string()))
                } else {
                    rest.strip_prefix("on:")
                        .map(|event| DirectiveKind::On(event.to_string()))
                }
            }
        }
    }

    /// Attribute name this kind was read from; used to strip the directive
    /// off per-instance clones.
    pub fn attr_name(&self) -> String {
        match self {
            DirectiveKind::For => "x-for".to_string(),
            DirectiveKind::If => "x-if".to_string(),
            DirectiveKind::Init => "x-init".to_string(),
            DirectiveKind::Ref => "x-ref".to_string(),
            DirectiveKind::Bind(attr) => format!("x-bind:{}", attr),
            DirectiveKind::On(event) => format!("x-on:{}", event),
            DirectiveKind::Model => "x-model".to_string(),
            DirectiveKind::Text => "x-text".to_string(),
        }
    }

    /// Fixed processing priority: list rendering, then conditionals, then
    /// one-time initializers, then ref bindings, then everything else in
    /// encountered order.
    pub fn priority(&self) -> u8 {
        match self {
            DirectiveKind::For => 0,
            DirectiveKind::If => 1,
            DirectiveKind::Init => 2,
            DirectiveKind::Ref => 3,
            _ => 4,
        }
    }

    pub fn is_structural(&self) -> bool {
        matches!(self, DirectiveKind::For | DirectiveKind::If)
    }
}

#[derive(Clone)]
pub struct Directive {
    pub node: Handle,
    pub kind: DirectiveKind,
    pub value: String,
}

/// Everything activation needs from one subtree pass.
#[derive(Default)]
pub struct ScanResult {
    pub directives: Vec<Directive>,
    /// `<x-comp>` hosts found in the subtree, for loader attachment.
    pub components: Vec<Handle>,
    /// Nested `x-state` roots; activated independently with their own scope.
    pub nested_roots: Vec<Handle>,
}

/// Collect directives under `root` in document order, then stable-sort by
/// kind priority.
///
/// Traversal does not descend into:
/// - inert `<template>` definitions,
/// - elements carrying a structural directive (their content is cloned and
///   activated per instance, not at scan time),
/// - nested `x-state` roots (they own their subtree),
/// - component hosts (their content mounts into a shadow subtree).
pub fn scan(root: &Handle) -> ScanResult {
    let mut result = ScanResult::default();

    dom::walk(root, &mut |node| {
        let tag = match dom::tag_name(node) {
            Some(tag) => tag,
            None => return true,
        };

        if tag == "template" {
            return false;
        }

        if !dom::same_node(node, root) && dom::has_attr(node, STATE_ATTR) {
            result.nested_roots.push(node.clone());
            return false;
        }

        // Component hosts are opaque: their light children are projected
        // into the mounted shadow subtree and activated there.
        if tag == COMPONENT_TAG {
            result.components.push(node.clone());
            return false;
        }

        // A structural host contributes exactly its structural directive;
        // everything else on it and below activates per instance.
        for structural in [DirectiveKind::For, DirectiveKind::If] {
            if let Some(value) = dom::get_attr(node, &structural.attr_name()) {
                result.directives.push(Directive {
                    node: node.clone(),
                    kind: structural,
                    value,
                });
                return false;
            }
        }

        for (name, value) in dom::attr_pairs(node) {
            if name == STATE_ATTR || !name.starts_with(DIRECTIVE_PREFIX) {
                continue;
            }
            match DirectiveKind::parse(&name) {
                Some(kind) => result.directives.push(Directive {
                    node: node.clone(),
                    kind,
                    value,
                }),
                None => log::warn!("unknown directive attribute '{}' skipped", name),
            }
        }
        true
    });

    result
        .directives
        .sort_by_key(|directive| directive.kind.priority());
    result
}
