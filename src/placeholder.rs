//! Placeholder substitution over raw template text.
//!
//! Two dialects share one scanner:
//!
//! - the runtime loader substitutes `{{name}}` verbatim — no escaping, no
//!   defaults; pre-escaping unsafe content is the template author's
//!   responsibility (documented trust boundary);
//! - the static compiler substitutes `{{key|default}}` with HTML escaping
//!   applied to both the resolved value and the fallback.
//!
//! Unterminated tokens are left in the output verbatim rather than being
//! guessed at.

/// Minimal HTML escape, attribute-safe.
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            other => out.push(other),
        }
    }
    out
}

fn substitute_with<F>(input: &str, allow_default: bool, escape: bool, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];
        let close = match after_open.find("}}") {
            Some(close) => close,
            None => {
                // Unterminated token: emit the remainder untouched.
                out.push_str(&rest[start..]);
                return out;
            }
        };
        let inner = &after_open[..close];

        let (key, default) = if allow_default {
            match inner.split_once('|') {
                Some((key, default)) => (key.trim(), Some(default.trim())),
                None => (inner.trim(), None),
            }
        } else {
            (inner.trim(), None)
        };

        let resolved = lookup(key).unwrap_or_else(|| default.unwrap_or("").to_string());
        if escape {
            out.push_str(&escape_html(&resolved));
        } else {
            out.push_str(&resolved);
        }

        rest = &after_open[close + 2..];
    }

    out.push_str(rest);
    out
}

/// Runtime prop substitution: verbatim, absent keys become empty strings.
pub fn substitute_verbatim<F>(input: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    substitute_with(input, false, false, lookup)
}

/// Compiler substitution: `{{key|default}}` with HTML escaping.
pub fn substitute_escaped<F>(input: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    substitute_with(input, true, true, lookup)
}
