//! Component loading and attachment.
//!
//! A `<x-comp src="...">` host names a component file. Attachment fetches
//! the file text, substitutes `t-` props verbatim into the raw markup,
//! unwraps the `<xiv type="template">` envelope, projects the host's light
//! children into the first `<slot>`, and mounts the result into an isolated
//! subtree registered on the runtime. The mounted markup is then activated
//! like any document, so components carry their own state roots.
//!
//! Prop substitution is verbatim by design: values land in the markup
//! unescaped, and pre-escaping unsafe content is the caller's job.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::rc::Rc;

use lazy_static::lazy_static;
use markup5ever_rcdom::Handle;
use regex::Regex;
use thiserror::Error;

use crate::activate::Runtime;
use crate::dom;
use crate::placeholder;

/// Host attribute naming the component source.
pub const SRC_ATTR: &str = "src";

/// Prefix for prop attributes on the host.
pub const PROP_PREFIX: &str = "t-";

/// Slot marker tag inside component markup.
pub const SLOT_TAG: &str = "x-slot";

lazy_static! {
    static ref TEMPLATE_WRAPPER: Regex = Regex::new(
        r#"(?s)<xiv\b[^>]*\btype\s*=\s*["']?template["']?[^>]*>(.*?)</xiv>"#
    )
    .expect("wrapper pattern is valid");
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("component source '{0}' not found")]
    NotFound(String),
    #[error("component source '{0}' escapes the component directory")]
    Forbidden(String),
    #[error("failed to read component source: {0}")]
    Io(#[from] std::io::Error),
}

/// How the runtime resolves component sources and the `fetch` helper.
pub trait ResourceFetcher {
    fn fetch_text(&self, source: &str) -> Result<String, LoadError>;
}

/// Filesystem-backed fetcher rooted at a directory. Sources are relative
/// paths; absolute paths and parent traversal are rejected.
pub struct FsFetcher {
    base: PathBuf,
}

impl FsFetcher {
    pub fn new(base: impl Into<PathBuf>) -> FsFetcher {
        FsFetcher { base: base.into() }
    }
}

impl ResourceFetcher for FsFetcher {
    fn fetch_text(&self, source: &str) -> Result<String, LoadError> {
        let relative = Path::new(source);
        let escapes = relative.is_absolute()
            || relative
                .components()
                .any(|c| matches!(c, Component::ParentDir));
        if escapes {
            return Err(LoadError::Forbidden(source.to_string()));
        }
        let path = self.base.join(relative);
        if !path.is_file() {
            return Err(LoadError::NotFound(source.to_string()));
        }
        Ok(std::fs::read_to_string(path)?)
    }
}

/// In-memory fetcher for embedding and tests.
#[derive(Default)]
pub struct StaticFetcher {
    entries: RefCell<HashMap<String, String>>,
}

impl StaticFetcher {
    pub fn new() -> StaticFetcher {
        StaticFetcher::default()
    }

    pub fn insert(&self, source: &str, text: &str) {
        self.entries
            .borrow_mut()
            .insert(source.to_string(), text.to_string());
    }

    pub fn with(pairs: &[(&str, &str)]) -> StaticFetcher {
        let fetcher = StaticFetcher::new();
        for (source, text) in pairs {
            fetcher.insert(source, text);
        }
        fetcher
    }
}

impl ResourceFetcher for StaticFetcher {
    fn fetch_text(&self, source: &str) -> Result<String, LoadError> {
        self.entries
            .borrow()
            .get(source)
            .cloned()
            .ok_or_else(|| LoadError::NotFound(source.to_string()))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ATTACHMENT
// ═══════════════════════════════════════════════════════════════════════════════

/// Mount a component host. Fire-and-forget: failures are logged and leave
/// the host untouched.
pub fn attach_component(runtime: &Rc<Runtime>, host: &Handle) {
    let source = match dom::get_attr(host, SRC_ATTR) {
        Some(source) if !source.trim().is_empty() => source,
        _ => {
            log::error!("component host has no {} attribute", SRC_ATTR);
            return;
        }
    };

    let text = match runtime.fetcher().fetch_text(&source) {
        Ok(text) => text,
        Err(err) => {
            log::error!("cannot load component '{}': {}", source, err);
            return;
        }
    };

    let props = collect_props(host);
    let substituted = placeholder::substitute_verbatim(&text, |key| props.get(key).cloned());
    let markup = unwrap_template(&substituted);

    let shadow = dom::create_isolated_root();
    for node in dom::parse_fragment(&markup) {
        dom::append_child(&shadow, &node);
    }
    project_slot(&shadow, host);

    runtime.register_shadow_root(host, shadow.clone());
    runtime.activate_document(&shadow);
}

/// `t-` attributes on the host become the prop table, prefix stripped.
fn collect_props(host: &Handle) -> HashMap<String, String> {
    dom::attr_pairs(host)
        .into_iter()
        .filter_map(|(name, value)| {
            name.strip_prefix(PROP_PREFIX)
                .map(|key| (key.to_string(), value))
        })
        .collect()
}

/// Extract the body of a `<xiv type="template">` envelope; markup without
/// one is used as-is.
fn unwrap_template(text: &str) -> String {
    match TEMPLATE_WRAPPER.captures(text) {
        Some(captures) => captures[1].to_string(),
        None => text.to_string(),
    }
}

/// Rewrite `<x-slot>` markers to `<slot>` and project the host's light
/// children into the first one. Fallback content inside a slot survives only
/// when the host has nothing to project.
fn project_slot(shadow: &Handle, host: &Handle) {
    let markers = dom::find_all_elements(shadow, SLOT_TAG);
    let light: Vec<Handle> = host.children.borrow().clone();

    let mut first = true;
    for marker in markers {
        let slot = dom::create_element("slot");
        // Snapshot before reparenting: append_child re-borrows the marker's
        // child list while detaching.
        let fallback: Vec<Handle> = marker.children.borrow().clone();
        for child in fallback {
            dom::append_child(&slot, &child);
        }
        dom::replace_node(&marker, &slot);

        if first && !light.is_empty() {
            slot.children.borrow_mut().clear();
            for child in &light {
                dom::append_child(&slot, child);
            }
        }
        first = false;
    }
}
