//! # xiv-native
//!
//! A native implementation of the xiv template system: a fine-grained
//! reactive runtime that activates directives on a parsed HTML tree, plus a
//! static compiler that resolves template includes ahead of time.
//!
//! ## Runtime Invariants
//!
//! 1. **Explicit tracking context**: dependency registration is decided by
//!    the reactor's context stack. There is no ambient "current effect"
//!    global; every tracked read goes through `Scope::get(key, reactor)`.
//!
//! 2. **Write asymmetry**: reads fall through the scope chain to the
//!    outermost parent; writes land on the most specific scope that declares
//!    the key, or create the key locally when nothing declares it.
//!
//! 3. **Change-gated triggering**: a scope write re-runs dependents only
//!    when the value actually changed. Scalars compare by value; lists, maps
//!    and functions compare by identity.
//!
//! 4. **Structural hosts are inert**: an element carrying `x-for` or `x-if`
//!    contributes exactly that directive at scan time. Its content activates
//!    per mounted instance, against the instance's scope.
//!
//! 5. **Processing priority**: within one subtree pass, directives apply in
//!    the fixed order for, if, init, ref, then everything else in document
//!    order.
//!
//! 6. **Failures stay local**: a directive with a malformed expression is
//!    logged and skipped; an evaluation failure inside an effect degrades to
//!    the empty or falsy branch and retries on the next dependency change.
//!
//! ## Known Leak
//!
//! Effect subscriptions are never pruned when a node leaves the tree.
//! Detached instances keep their effects registered until the reactor is
//! dropped; this is accepted for page-lifetime scopes.

pub mod activate;
pub mod compile;
pub mod directive;
pub mod dom;
pub mod eval;
pub mod expr;
pub mod loader;
pub mod placeholder;
pub mod scope;
pub mod value;

#[cfg(test)]
mod runtime_tests;

pub use activate::{Event, Runtime};
pub use compile::{CompileError, Compiler};
pub use loader::{FsFetcher, LoadError, ResourceFetcher, StaticFetcher};
pub use scope::{Reactor, Scope};
pub use value::Value;
