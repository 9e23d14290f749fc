//! Static template compiler.
//!
//! Turns a main `.xiv` file plus a template directory into a standalone
//! HTML page. Static directives resolve at compile time against an argument
//! table: `x-for` duplicates its host per item of a JSON array, `x-if`
//! keeps or drops its host, and `<x-temp x-name="...">` splices another
//! template in with its own `t-` argument table. Remaining `{{key|default}}`
//! placeholders substitute last, HTML-escaped.
//!
//! Includes are guarded twice: a visited set rejects circular template
//! chains, and template names may not traverse out of the template
//! directory.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use lazy_static::lazy_static;
use markup5ever_rcdom::Handle;
use regex::Regex;
use serde_json::Value as Json;
use thiserror::Error;

use crate::dom;
use crate::placeholder;

/// Compile-time argument table. Values come from `t-` attributes (strings)
/// and from loop items (arbitrary JSON).
pub type Args = serde_json::Map<String, Json>;

pub const COMMENT_MARKER: &str = "<!--xiv-comment-->";
pub const INCLUDE_TAG: &str = "x-temp";
pub const INCLUDE_NAME_ATTR: &str = "x-name";

lazy_static! {
    static ref LOOP_EXPR: Regex =
        Regex::new(r"^\s*(\w+)\s+in\s+([\w.]+)\s*$").expect("loop pattern is valid");
    static ref TEMPLATE_WRAPPER: Regex =
        Regex::new(r#"(?s)<xiv type="template">(.*?)</xiv>"#).expect("wrapper pattern is valid");
    static ref UNSAFE_NAME_CHARS: Regex =
        Regex::new(r"[^\w-]").expect("name pattern is valid");
}

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("main file not found: {}", .0.display())]
    MainNotFound(PathBuf),
    #[error("template directory not found: {}", .0.display())]
    TemplatesDirNotFound(PathBuf),
    #[error("template '{name}' not found (referenced from {context})")]
    TemplateNotFound { name: String, context: String },
    #[error("circular template reference: '{context}' -> '{name}'")]
    CircularInclude { name: String, context: String },
    #[error("template name '{0}' escapes the template directory")]
    Traversal(String),
    #[error("<x-temp> in {0} is missing its x-name attribute")]
    MissingName(String),
    #[error("invalid x-for expression '{expr}' in {context}")]
    InvalidLoop { expr: String, context: String },
    #[error("x-for data for '{var}' in {context} must be a JSON array")]
    InvalidLoopData { var: String, context: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Default)]
pub struct Compiler {
    visited: HashSet<PathBuf>,
}

impl Compiler {
    pub fn new() -> Compiler {
        Compiler::default()
    }

    /// Compile `main_file` against `templates_dir` into a complete page.
    pub fn compile(
        &mut self,
        main_file: &Path,
        templates_dir: &Path,
    ) -> Result<String, CompileError> {
        self.visited.clear();

        if !main_file.is_file() {
            return Err(CompileError::MainNotFound(main_file.to_path_buf()));
        }
        if !templates_dir.is_dir() {
            return Err(CompileError::TemplatesDirNotFound(templates_dir.to_path_buf()));
        }

        let raw = std::fs::read_to_string(main_file)?;
        let processed = self.process_content(&raw, templates_dir, "main.xiv", &Args::new())?;

        // Unwrap the <xiv type="main"> envelope; everything else passes
        // through as-is.
        let mut out = String::new();
        for node in fragment_nodes(&processed) {
            let is_main_envelope = dom::is_element(&node, "xiv")
                && dom::get_attr(&node, "type").as_deref() == Some("main");
            if is_main_envelope {
                out.push_str(&dom::serialize_children(&node));
            } else {
                out.push_str(&dom::serialize_subtree(&node));
            }
        }

        Ok(format!(
            "<!DOCTYPE html>\n<html>\n{}\n</html>\n",
            out.trim()
        ))
    }

    /// One full pass over a piece of template text: strip comment markers,
    /// resolve loops, conditionals and includes in that order, then
    /// substitute placeholders over the serialized result.
    fn process_content(
        &mut self,
        content: &str,
        templates_dir: &Path,
        context: &str,
        args: &Args,
    ) -> Result<String, CompileError> {
        let cleaned = content.replace(COMMENT_MARKER, "");

        let root = dom::create_isolated_root();
        for node in fragment_nodes(&cleaned) {
            dom::append_child(&root, &node);
        }

        self.process_loops(&root, templates_dir, context, args)?;
        process_conditionals(&root, args);
        self.process_includes(&root, templates_dir, context, args)?;

        let serialized = dom::serialize_children(&root);
        Ok(placeholder::substitute_escaped(&serialized, |key| {
            get_path(key, args).map(display_json)
        }))
    }

    /// Static `x-for`: duplicate the host once per item, recursing with the
    /// loop variable added to the argument table.
    fn process_loops(
        &mut self,
        root: &Handle,
        templates_dir: &Path,
        context: &str,
        args: &Args,
    ) -> Result<(), CompileError> {
        for element in collect_topmost(root, |n| dom::has_attr(n, "x-for")) {
            let expr = dom::get_attr(&element, "x-for").unwrap_or_default();
            dom::remove_attr(&element, "x-for");

            let captures = LOOP_EXPR.captures(&expr).ok_or_else(|| {
                CompileError::InvalidLoop {
                    expr: expr.clone(),
                    context: context.to_string(),
                }
            })?;
            let item_var = &captures[1];
            let items_var = &captures[2];

            let items = loop_items(items_var, args, context)?;
            let template = dom::serialize_subtree(&element);

            let mut anchor = element.clone();
            for item in items {
                let mut loop_args = args.clone();
                loop_args.insert(item_var.to_string(), item);
                let rendered =
                    self.process_content(&template, templates_dir, context, &loop_args)?;
                for node in fragment_nodes(&rendered) {
                    dom::insert_after(&anchor, &node);
                    anchor = node;
                }
            }
            dom::detach(&element);
        }
        Ok(())
    }

    /// `<x-temp x-name="card" t-title="...">slot content</x-temp>` splices
    /// the named template in, wrapped in a `<div class="x-card">` marker.
    fn process_includes(
        &mut self,
        root: &Handle,
        templates_dir: &Path,
        context: &str,
        args: &Args,
    ) -> Result<(), CompileError> {
        for host in collect_topmost(root, |n| dom::is_element(n, INCLUDE_TAG)) {
            let slot_html = dom::serialize_children(&host);
            let slot_rendered =
                self.process_content(&slot_html, templates_dir, context, args)?;

            let name = dom::get_attr(&host, INCLUDE_NAME_ATTR)
                .filter(|n| !n.trim().is_empty())
                .ok_or_else(|| CompileError::MissingName(context.to_string()))?;

            let relative = Path::new(&name);
            let escapes = relative.is_absolute()
                || relative
                    .components()
                    .any(|c| matches!(c, Component::ParentDir));
            if escapes {
                return Err(CompileError::Traversal(name));
            }
            let path = templates_dir.join(format!("{}.xiv", name));

            if self.visited.contains(&path) {
                return Err(CompileError::CircularInclude {
                    name,
                    context: context.to_string(),
                });
            }
            if !path.is_file() {
                return Err(CompileError::TemplateNotFound {
                    name,
                    context: context.to_string(),
                });
            }

            let mut template_args = Args::new();
            for (attr, value) in dom::attr_pairs(&host) {
                if let Some(key) = attr.strip_prefix("t-") {
                    template_args.insert(key.to_string(), Json::String(value));
                }
            }

            let template_raw = std::fs::read_to_string(&path)?;
            let template_body = match TEMPLATE_WRAPPER.captures(&template_raw) {
                Some(captures) => captures[1].to_string(),
                None => template_raw,
            };

            self.visited.insert(path.clone());
            let rendered = self.process_content(
                &template_body,
                templates_dir,
                &path.display().to_string(),
                &template_args,
            )?;
            self.visited.remove(&path);

            let safe_name = UNSAFE_NAME_CHARS.replace_all(&name, "");
            let wrapper = dom::create_element("div");
            dom::set_attr(&wrapper, "class", &format!("x-{}", safe_name));
            for node in fragment_nodes(&rendered) {
                dom::append_child(&wrapper, &node);
            }

            if let Some(slot) = dom::find_element(&wrapper, "x-slot") {
                let mut anchor = slot.clone();
                for node in fragment_nodes(&slot_rendered) {
                    dom::insert_after(&anchor, &node);
                    anchor = node;
                }
                dom::detach(&slot);
            }

            dom::replace_node(&host, &wrapper);
        }
        Ok(())
    }
}

/// Static `x-if`: `not <path>` negation plus string/number falsiness rules.
fn process_conditionals(root: &Handle, args: &Args) {
    let hosts: Vec<Handle> = {
        let mut found = Vec::new();
        dom::walk(root, &mut |node| {
            if dom::has_attr(node, "x-if") {
                found.push(node.clone());
            }
            true
        });
        found
    };
    for element in hosts {
        let condition = dom::get_attr(&element, "x-if").unwrap_or_default();
        dom::remove_attr(&element, "x-if");
        if !evaluate_condition(&condition, args) {
            dom::detach(&element);
        }
    }
}

fn evaluate_condition(condition: &str, args: &Args) -> bool {
    let (negated, path) = match condition.strip_prefix("not ") {
        Some(rest) => (true, rest.trim()),
        None => (false, condition.trim()),
    };
    let truthy = match get_path(path, args) {
        None | Some(Json::Null) => false,
        Some(Json::Bool(b)) => *b,
        Some(Json::String(s)) => {
            !matches!(s.to_ascii_lowercase().as_str(), "false" | "0" | "")
        }
        Some(Json::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Some(_) => true,
    };
    truthy != negated
}

/// Dotted-path lookup into the argument table. `Null` reads as absent.
fn get_path<'a>(path: &str, args: &'a Args) -> Option<&'a Json> {
    let mut keys = path.split('.');
    let mut current = args.get(keys.next()?)?;
    for key in keys {
        current = current.as_object()?.get(key)?;
    }
    if current.is_null() {
        None
    } else {
        Some(current)
    }
}

fn display_json(value: &Json) -> String {
    match value {
        Json::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Loop data is either a JSON array already or a string holding one.
fn loop_items(var: &str, args: &Args, context: &str) -> Result<Vec<Json>, CompileError> {
    let invalid = || CompileError::InvalidLoopData {
        var: var.to_string(),
        context: context.to_string(),
    };
    match get_path(var, args) {
        None => Ok(Vec::new()),
        Some(Json::Array(items)) => Ok(items.clone()),
        Some(Json::String(text)) => match serde_json::from_str::<Json>(text) {
            Ok(Json::Array(items)) => Ok(items),
            _ => Err(invalid()),
        },
        Some(_) => Err(invalid()),
    }
}

/// Parse a piece of markup and return its head and body children, detached.
/// Template text can legitimately carry `<title>` or `<meta>`, which the
/// parser relocates into head.
fn fragment_nodes(html: &str) -> Vec<Handle> {
    let parsed = dom::parse_document(html);
    let mut nodes = Vec::new();
    for section in ["head", "body"] {
        if let Some(element) = dom::find_element(&parsed.document, section) {
            nodes.extend(element.children.borrow_mut().drain(..));
        }
    }
    for node in &nodes {
        node.parent.set(None);
    }
    nodes
}

/// Topmost matching elements only; content below a match is handled by the
/// per-match recursion, never by this pass.
fn collect_topmost<F: Fn(&Handle) -> bool>(root: &Handle, matches: F) -> Vec<Handle> {
    let mut found = Vec::new();
    dom::walk(root, &mut |node| {
        if !dom::same_node(node, root) && matches(node) {
            found.push(node.clone());
            return false;
        }
        true
    });
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    struct Workspace {
        root: PathBuf,
    }

    impl Workspace {
        fn new(tag: &str) -> Workspace {
            let root = std::env::temp_dir().join(format!(
                "xiv-compile-{}-{}",
                tag,
                std::process::id()
            ));
            let _ = fs::remove_dir_all(&root);
            fs::create_dir_all(root.join("templates")).unwrap();
            Workspace { root }
        }

        fn write_main(&self, content: &str) -> PathBuf {
            let path = self.root.join("main.xiv");
            fs::write(&path, content).unwrap();
            path
        }

        fn write_template(&self, name: &str, content: &str) {
            fs::write(self.root.join("templates").join(name), content).unwrap();
        }

        fn templates(&self) -> PathBuf {
            self.root.join("templates")
        }
    }

    impl Drop for Workspace {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.root);
        }
    }

    #[test]
    fn test_main_envelope_is_unwrapped() {
        let ws = Workspace::new("envelope");
        let main = ws.write_main(r#"<xiv type="main"><p>hello</p></xiv>"#);
        let out = Compiler::new().compile(&main, &ws.templates()).unwrap();
        assert!(out.starts_with("<!DOCTYPE html>"));
        assert!(out.contains("<p>hello</p>"));
        assert!(!out.contains("<xiv"));
    }

    #[test]
    fn test_include_with_props_and_escaping() {
        let ws = Workspace::new("include");
        ws.write_template(
            "card.xiv",
            r#"<xiv type="template"><h2>{{title|untitled}}</h2></xiv>"#,
        );
        let main = ws.write_main(
            r#"<xiv type="main"><x-temp x-name="card" t-title="a < b"></x-temp></xiv>"#,
        );
        let out = Compiler::new().compile(&main, &ws.templates()).unwrap();
        assert!(out.contains(r#"<div class="x-card">"#));
        assert!(out.contains("<h2>a &lt; b</h2>"));
    }

    #[test]
    fn test_placeholder_default_applies() {
        let ws = Workspace::new("default");
        ws.write_template(
            "card.xiv",
            r#"<xiv type="template"><h2>{{title|untitled}}</h2></xiv>"#,
        );
        let main =
            ws.write_main(r#"<xiv type="main"><x-temp x-name="card"></x-temp></xiv>"#);
        let out = Compiler::new().compile(&main, &ws.templates()).unwrap();
        assert!(out.contains("<h2>untitled</h2>"));
    }

    #[test]
    fn test_slot_projection() {
        let ws = Workspace::new("slot");
        ws.write_template(
            "frame.xiv",
            r#"<xiv type="template"><section><x-slot></x-slot></section></xiv>"#,
        );
        let main = ws.write_main(
            r#"<xiv type="main"><x-temp x-name="frame"><em>inner</em></x-temp></xiv>"#,
        );
        let out = Compiler::new().compile(&main, &ws.templates()).unwrap();
        assert!(out.contains("<section><em>inner</em></section>"));
    }

    #[test]
    fn test_static_loop_over_json_data() {
        let ws = Workspace::new("loop");
        ws.write_template(
            "list.xiv",
            r#"<xiv type="template"><ul><li x-for="item in items">{{item}}</li></ul></xiv>"#,
        );
        let main = ws.write_main(
            r#"<xiv type="main"><x-temp x-name="list" t-items='["a","b"]'></x-temp></xiv>"#,
        );
        let out = Compiler::new().compile(&main, &ws.templates()).unwrap();
        assert!(out.contains("<li>a</li><li>b</li>"));
    }

    #[test]
    fn test_static_conditional_with_negation() {
        let ws = Workspace::new("cond");
        ws.write_template(
            "flags.xiv",
            concat!(
                r#"<xiv type="template">"#,
                r#"<p x-if="shown">yes</p>"#,
                r#"<p x-if="hidden">no</p>"#,
                r#"<p x-if="not hidden">negated</p>"#,
                r#"</xiv>"#,
            ),
        );
        let main = ws.write_main(
            r#"<xiv type="main"><x-temp x-name="flags" t-shown="1" t-hidden="false"></x-temp></xiv>"#,
        );
        let out = Compiler::new().compile(&main, &ws.templates()).unwrap();
        assert!(out.contains("yes"));
        assert!(!out.contains(">no<"));
        assert!(out.contains("negated"));
    }

    #[test]
    fn test_circular_include_is_rejected() {
        let ws = Workspace::new("circular");
        ws.write_template(
            "a.xiv",
            r#"<xiv type="template"><x-temp x-name="b"></x-temp></xiv>"#,
        );
        ws.write_template(
            "b.xiv",
            r#"<xiv type="template"><x-temp x-name="a"></x-temp></xiv>"#,
        );
        let main =
            ws.write_main(r#"<xiv type="main"><x-temp x-name="a"></x-temp></xiv>"#);
        let err = Compiler::new().compile(&main, &ws.templates()).unwrap_err();
        assert!(matches!(err, CompileError::CircularInclude { .. }));
    }

    #[test]
    fn test_traversal_is_rejected() {
        let ws = Workspace::new("traversal");
        let main = ws.write_main(
            r#"<xiv type="main"><x-temp x-name="../secret"></x-temp></xiv>"#,
        );
        let err = Compiler::new().compile(&main, &ws.templates()).unwrap_err();
        assert!(matches!(err, CompileError::Traversal(_)));
    }

    #[test]
    fn test_comment_markers_are_stripped() {
        let ws = Workspace::new("comment");
        let main = ws.write_main(
            r#"<xiv type="main"><p>keep</p><!--xiv-comment--></xiv>"#,
        );
        let out = Compiler::new().compile(&main, &ws.templates()).unwrap();
        assert!(!out.contains("xiv-comment"));
        assert!(out.contains("<p>keep</p>"));
    }

    #[test]
    fn test_missing_template_reports_context() {
        let ws = Workspace::new("missing");
        let main =
            ws.write_main(r#"<xiv type="main"><x-temp x-name="ghost"></x-temp></xiv>"#);
        let err = Compiler::new().compile(&main, &ws.templates()).unwrap_err();
        assert!(matches!(err, CompileError::TemplateNotFound { .. }));
    }
}
