//! Expression evaluation against a scope chain.
//!
//! Two entry points mirror the two ways directives use expressions:
//! [`evaluate`] returns a value (or `None` after logging — evaluation
//! failures never cross this boundary), and [`execute`] runs an expression
//! for its side effects, as event handlers and two-way bindings do.
//!
//! The tracking context is threaded explicitly: every read goes through
//! `Scope::get(key, reactor)` so dependency registration is decided by the
//! reactor's context stack, never by ambient global state.

use std::rc::Rc;

use crate::expr::{self, AssignOp, BinaryOp, Expr, StepOp, Target, UnaryOp};
use crate::scope::{Reactor, Scope};
use crate::value::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct EvalError {
    pub message: String,
}

impl EvalError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Evaluate `text` against `scope`. Failures are logged and collapse to
/// `None`; callers treat `None` as "no applicable value".
pub fn evaluate(scope: &Rc<Scope>, reactor: &Rc<Reactor>, text: &str) -> Option<Value> {
    let ast = match expr::parse(text) {
        Ok(ast) => ast,
        Err(err) => {
            log::warn!("expression parse failed: '{}': {}", text, err);
            return None;
        }
    };
    match eval_expr(&ast, scope, reactor) {
        Ok(value) => Some(value),
        Err(err) => {
            log::warn!("expression evaluation failed: '{}': {}", text, err.message);
            None
        }
    }
}

/// Run `text` for its side effects. Failures are logged and absorbed.
pub fn execute(scope: &Rc<Scope>, reactor: &Rc<Reactor>, text: &str) {
    let _ = evaluate(scope, reactor, text);
}

/// Evaluate an already-parsed expression; used by directives that keep the
/// AST across effect re-runs.
pub fn eval_expr(
    ast: &Expr,
    scope: &Rc<Scope>,
    reactor: &Rc<Reactor>,
) -> Result<Value, EvalError> {
    match ast {
        Expr::Null => Ok(Value::Null),
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::Number(n) => Ok(Value::Number(*n)),
        Expr::Str(s) => Ok(Value::Str(s.clone())),

        Expr::Ident(name) => scope
            .get(name, reactor)
            .ok_or_else(|| EvalError::new(format!("unknown identifier '{}'", name))),

        Expr::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(eval_expr(item, scope, reactor)?);
            }
            Ok(Value::list(out))
        }

        Expr::Object(entries) => {
            let mut out = std::collections::BTreeMap::new();
            for (key, value) in entries {
                out.insert(key.clone(), eval_expr(value, scope, reactor)?);
            }
            Ok(Value::map(out))
        }

        Expr::Member(obj, name) => {
            let obj = eval_expr(obj, scope, reactor)?;
            obj.get_member(name).ok_or_else(|| {
                EvalError::new(format!("no member '{}' on {}", name, obj.type_name()))
            })
        }

        Expr::Index(obj, index) => {
            let obj = eval_expr(obj, scope, reactor)?;
            let index = eval_expr(index, scope, reactor)?;
            obj.get_index(&index).ok_or_else(|| {
                EvalError::new(format!(
                    "cannot index {} with {}",
                    obj.type_name(),
                    index.type_name()
                ))
            })
        }

        Expr::Call(callee, args) => {
            let callee = eval_expr(callee, scope, reactor)?;
            let mut evaluated = Vec::with_capacity(args.len());
            for arg in args {
                evaluated.push(eval_expr(arg, scope, reactor)?);
            }
            match callee {
                Value::Fn(f) => Ok(f(&evaluated)),
                other => Err(EvalError::new(format!(
                    "{} is not callable",
                    other.type_name()
                ))),
            }
        }

        Expr::Unary(op, inner) => {
            let inner = eval_expr(inner, scope, reactor)?;
            match op {
                UnaryOp::Not => Ok(Value::Bool(!inner.is_truthy())),
                UnaryOp::Neg => inner
                    .as_number()
                    .map(|n| Value::Number(-n))
                    .ok_or_else(|| EvalError::new("cannot negate non-number")),
            }
        }

        Expr::Binary(op, lhs, rhs) => eval_binary(*op, lhs, rhs, scope, reactor),

        Expr::Ternary(cond, then, alt) => {
            if eval_expr(cond, scope, reactor)?.is_truthy() {
                eval_expr(then, scope, reactor)
            } else {
                eval_expr(alt, scope, reactor)
            }
        }

        Expr::Assign(op, target, rhs) => {
            let rhs = eval_expr(rhs, scope, reactor)?;
            let value = match op {
                AssignOp::Set => rhs,
                AssignOp::AddAssign => {
                    let old = read_target(target, scope, reactor)?;
                    arith(BinaryOp::Add, &old, &rhs)?
                }
                AssignOp::SubAssign => {
                    let old = read_target(target, scope, reactor)?;
                    arith(BinaryOp::Sub, &old, &rhs)?
                }
            };
            write_target(target, value.clone(), scope, reactor)?;
            Ok(value)
        }

        Expr::Step(op, target) => {
            let old = read_target(target, scope, reactor)?;
            let n = old
                .as_number()
                .ok_or_else(|| EvalError::new("cannot step non-number"))?;
            let delta = match op {
                StepOp::Inc => 1.0,
                StepOp::Dec => -1.0,
            };
            write_target(target, Value::Number(n + delta), scope, reactor)?;
            Ok(old)
        }
    }
}

fn eval_binary(
    op: BinaryOp,
    lhs: &Expr,
    rhs: &Expr,
    scope: &Rc<Scope>,
    reactor: &Rc<Reactor>,
) -> Result<Value, EvalError> {
    // Short-circuit forms return the deciding operand, so expressions like
    // `items || []` read naturally.
    match op {
        BinaryOp::And => {
            let lhs = eval_expr(lhs, scope, reactor)?;
            return if lhs.is_truthy() {
                eval_expr(rhs, scope, reactor)
            } else {
                Ok(lhs)
            };
        }
        BinaryOp::Or => {
            let lhs = eval_expr(lhs, scope, reactor)?;
            return if lhs.is_truthy() {
                Ok(lhs)
            } else {
                eval_expr(rhs, scope, reactor)
            };
        }
        _ => {}
    }

    let lhs = eval_expr(lhs, scope, reactor)?;
    let rhs = eval_expr(rhs, scope, reactor)?;

    match op {
        BinaryOp::Eq => Ok(Value::Bool(lhs == rhs)),
        BinaryOp::Ne => Ok(Value::Bool(lhs != rhs)),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => compare(op, &lhs, &rhs),
        _ => arith(op, &lhs, &rhs),
    }
}

fn compare(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value, EvalError> {
    let ordering = match (lhs, rhs) {
        (Value::Str(a), Value::Str(b)) => a.partial_cmp(b),
        _ => match (lhs.as_number(), rhs.as_number()) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => None,
        },
    };
    let ordering = ordering.ok_or_else(|| {
        EvalError::new(format!(
            "cannot compare {} with {}",
            lhs.type_name(),
            rhs.type_name()
        ))
    })?;
    let result = match op {
        BinaryOp::Lt => ordering.is_lt(),
        BinaryOp::Le => ordering.is_le(),
        BinaryOp::Gt => ordering.is_gt(),
        BinaryOp::Ge => ordering.is_ge(),
        _ => unreachable!(),
    };
    Ok(Value::Bool(result))
}

fn arith(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value, EvalError> {
    // `+` concatenates when either side is a string.
    if op == BinaryOp::Add {
        if let (Value::Str(_), _) | (_, Value::Str(_)) = (lhs, rhs) {
            return Ok(Value::Str(format!(
                "{}{}",
                lhs.to_display_string(),
                rhs.to_display_string()
            )));
        }
    }

    let (a, b) = match (lhs.as_number(), rhs.as_number()) {
        (Some(a), Some(b)) => (a, b),
        _ => {
            return Err(EvalError::new(format!(
                "arithmetic on {} and {}",
                lhs.type_name(),
                rhs.type_name()
            )))
        }
    };
    let n = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
        BinaryOp::Rem => a % b,
        _ => unreachable!(),
    };
    Ok(Value::Number(n))
}

fn read_target(
    target: &Target,
    scope: &Rc<Scope>,
    reactor: &Rc<Reactor>,
) -> Result<Value, EvalError> {
    match target {
        Target::Ident(name) => scope
            .get(name, reactor)
            .ok_or_else(|| EvalError::new(format!("unknown identifier '{}'", name))),
        Target::Member(obj, name) => {
            eval_expr(&Expr::Member(obj.clone(), name.clone()), scope, reactor)
        }
        Target::Index(obj, index) => {
            eval_expr(&Expr::Index(obj.clone(), index.clone()), scope, reactor)
        }
    }
}

/// Assignment lands on the most specific scope declaring the key, or is
/// created locally if declared nowhere. Writes into map members and list
/// slots mutate the aggregate in place and do not re-trigger effects; only
/// top-level key writes are reactive.
fn write_target(
    target: &Target,
    value: Value,
    scope: &Rc<Scope>,
    reactor: &Rc<Reactor>,
) -> Result<(), EvalError> {
    match target {
        Target::Ident(name) => {
            scope.set(name, value, reactor);
            Ok(())
        }
        Target::Member(obj, name) => {
            let obj = eval_expr(obj, scope, reactor)?;
            match obj {
                Value::Map(entries) => {
                    entries.borrow_mut().insert(name.clone(), value);
                    Ok(())
                }
                other => Err(EvalError::new(format!(
                    "cannot assign member on {}",
                    other.type_name()
                ))),
            }
        }
        Target::Index(obj, index) => {
            let obj = eval_expr(obj, scope, reactor)?;
            let index = eval_expr(index, scope, reactor)?;
            match (obj, &index) {
                (Value::List(items), Value::Number(n)) => {
                    let mut items = items.borrow_mut();
                    let i = *n as usize;
                    if i < items.len() {
                        items[i] = value;
                        Ok(())
                    } else {
                        Err(EvalError::new(format!("index {} out of bounds", i)))
                    }
                }
                (Value::Map(entries), Value::Str(key)) => {
                    entries.borrow_mut().insert(key.clone(), value);
                    Ok(())
                }
                (other, _) => Err(EvalError::new(format!(
                    "cannot index-assign on {}",
                    other.type_name()
                ))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::Reactor;

    fn fixture(pairs: &[(&str, Value)]) -> (Rc<Scope>, Rc<Reactor>) {
        let reactor = Reactor::new();
        let scope = Scope::root();
        for (key, value) in pairs {
            scope.declare(key, value.clone());
        }
        (scope, reactor)
    }

    #[test]
    fn test_arithmetic_and_comparison() {
        let (scope, reactor) = fixture(&[("count", Value::Number(4.0))]);
        assert_eq!(
            evaluate(&scope, &reactor, "count * 2 + 1"),
            Some(Value::Number(9.0))
        );
        assert_eq!(
            evaluate(&scope, &reactor, "count >= 4 && count < 10"),
            Some(Value::Bool(true))
        );
        assert_eq!(
            evaluate(&scope, &reactor, "count == 4 ? 'yes' : 'no'"),
            Some(Value::Str("yes".into()))
        );
    }

    #[test]
    fn test_string_concatenation() {
        let (scope, reactor) = fixture(&[("name", Value::Str("xiv".into()))]);
        assert_eq!(
            evaluate(&scope, &reactor, "'hello ' + name"),
            Some(Value::Str("hello xiv".into()))
        );
    }

    #[test]
    fn test_member_and_index_access() {
        let mut entries = std::collections::BTreeMap::new();
        entries.insert("name".to_string(), Value::Str("A".into()));
        let (scope, reactor) = fixture(&[
            ("user", Value::map(entries)),
            ("items", Value::list(vec![Value::Number(7.0)])),
        ]);
        assert_eq!(
            evaluate(&scope, &reactor, "user.name"),
            Some(Value::Str("A".into()))
        );
        assert_eq!(
            evaluate(&scope, &reactor, "items[0]"),
            Some(Value::Number(7.0))
        );
        assert_eq!(
            evaluate(&scope, &reactor, "items.length"),
            Some(Value::Number(1.0))
        );
        // Absent members read as null, not as an error.
        assert_eq!(evaluate(&scope, &reactor, "user.missing"), Some(Value::Null));
    }

    #[test]
    fn test_unknown_identifier_fails_silently() {
        let (scope, reactor) = fixture(&[]);
        assert_eq!(evaluate(&scope, &reactor, "nope + 1"), None);
    }

    #[test]
    fn test_increment_writes_back() {
        let (scope, reactor) = fixture(&[("count", Value::Number(0.0))]);
        execute(&scope, &reactor, "count++");
        assert_eq!(scope.peek("count"), Some(Value::Number(1.0)));
        execute(&scope, &reactor, "count += 5");
        assert_eq!(scope.peek("count"), Some(Value::Number(6.0)));
        execute(&scope, &reactor, "count--");
        assert_eq!(scope.peek("count"), Some(Value::Number(5.0)));
    }

    #[test]
    fn test_call_native_function() {
        let doubler = Value::native(|args| {
            Value::Number(args[0].as_number().unwrap_or(0.0) * 2.0)
        });
        let (scope, reactor) = fixture(&[("double", doubler), ("n", Value::Number(3.0))]);
        assert_eq!(
            evaluate(&scope, &reactor, "double(n)"),
            Some(Value::Number(6.0))
        );
    }

    #[test]
    fn test_short_circuit_returns_operand() {
        let (scope, reactor) = fixture(&[("items", Value::Null)]);
        let fallback = evaluate(&scope, &reactor, "items || []").unwrap();
        assert!(matches!(fallback, Value::List(_)));
    }
}
