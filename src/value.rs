//! Runtime value model.
//!
//! Scopes are dynamically keyed, so every value a directive can read or
//! write flows through this enum. Scalars compare by value; lists, maps and
//! functions compare by identity, which is what decides whether a scope
//! write re-triggers effects.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use markup5ever_rcdom::Handle;

/// Host-provided callable exposed to expressions (scope functions, the
/// `fetch` helper). Arguments are evaluated eagerly.
pub type NativeFn = Rc<dyn Fn(&[Value]) -> Value>;

#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    List(Rc<RefCell<Vec<Value>>>),
    Map(Rc<RefCell<BTreeMap<String, Value>>>),
    Fn(NativeFn),
    /// Live tree node, used by the refs table and event payloads.
    Node(Handle),
}

impl Value {
    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn map(entries: BTreeMap<String, Value>) -> Value {
        Value::Map(Rc::new(RefCell::new(entries)))
    }

    pub fn native<F>(f: F) -> Value
    where
        F: Fn(&[Value]) -> Value + 'static,
    {
        Value::Fn(Rc::new(f))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Fn(_) => "function",
            Value::Node(_) => "node",
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
            Value::List(_) | Value::Map(_) | Value::Fn(_) | Value::Node(_) => true,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Str(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    /// Member lookup on maps. Absent members read as `Null`, matching the
    /// "no applicable value" contract of the evaluator.
    pub fn get_member(&self, name: &str) -> Option<Value> {
        match self {
            Value::Map(m) => Some(m.borrow().get(name).cloned().unwrap_or(Value::Null)),
            Value::List(items) if name == "length" => {
                Some(Value::Number(items.borrow().len() as f64))
            }
            Value::Str(s) if name == "length" => Some(Value::Number(s.chars().count() as f64)),
            _ => None,
        }
    }

    pub fn get_index(&self, index: &Value) -> Option<Value> {
        match (self, index) {
            (Value::List(items), Value::Number(n)) => {
                let items = items.borrow();
                let i = *n as usize;
                Some(items.get(i).cloned().unwrap_or(Value::Null))
            }
            (Value::Map(_), Value::Str(key)) => self.get_member(key),
            _ => None,
        }
    }

    /// String form used when a value lands in text content or an attribute.
    /// `Null` renders empty per the text-directive contract.
    pub fn to_display_string(&self) -> String {
        match self {
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }

    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::Str(s.clone()),
            serde_json::Value::Array(items) => {
                Value::list(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(entries) => Value::map(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.is_finite() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", format_number(*n)),
            Value::Str(s) => write!(f, "{}", s),
            Value::List(items) => {
                let items = items.borrow();
                let parts: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            Value::Map(entries) => {
                let entries = entries.borrow();
                let parts: Vec<String> =
                    entries.iter().map(|(k, v)| format!("{}: {}", k, v)).collect();
                write!(f, "{{{}}}", parts.join(", "))
            }
            Value::Fn(_) => write!(f, "[function]"),
            Value::Node(_) => write!(f, "[node]"),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.type_name(), self)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b),
            (Value::Map(a), Value::Map(b)) => Rc::ptr_eq(a, b),
            (Value::Fn(a), Value::Fn(b)) => Rc::ptr_eq(a, b),
            (Value::Node(a), Value::Node(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthiness() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(!Value::Number(0.0).is_truthy());
        assert!(!Value::Str(String::new()).is_truthy());
        assert!(Value::Number(2.0).is_truthy());
        assert!(Value::Str("x".into()).is_truthy());
        assert!(Value::list(vec![]).is_truthy());
    }

    #[test]
    fn test_display_trims_integral_floats() {
        assert_eq!(Value::Number(1.0).to_string(), "1");
        assert_eq!(Value::Number(1.5).to_string(), "1.5");
        assert_eq!(Value::Number(-3.0).to_string(), "-3");
    }

    #[test]
    fn test_null_displays_empty_in_content_position() {
        assert_eq!(Value::Null.to_display_string(), "");
        assert_eq!(Value::Str("hi".into()).to_display_string(), "hi");
    }

    #[test]
    fn test_aggregate_equality_is_identity() {
        let a = Value::list(vec![Value::Number(1.0)]);
        let b = Value::list(vec![Value::Number(1.0)]);
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn test_from_json() {
        let json: serde_json::Value =
            serde_json::from_str(r#"{"name": "A", "tags": [1, 2]}"#).unwrap();
        let value = Value::from_json(&json);
        assert_eq!(
            value.get_member("name"),
            Some(Value::Str("A".into()))
        );
        let tags = value.get_member("tags").unwrap();
        assert_eq!(tags.get_member("length"), Some(Value::Number(2.0)));
    }
}
