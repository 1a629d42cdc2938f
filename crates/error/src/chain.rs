//! Traversal and matching over cause chains.
//!
//! Everything here works on `&dyn std::error::Error`, following
//! [`source`](std::error::Error::source) links, so custom [`Error`]s and
//! foreign errors mix freely in one chain.

use std::collections::HashMap;
use std::error::Error as StdError;

use serde_json::Value;

use crate::error::Error;
use crate::multi::MultiError;
use crate::sentinel::{Cancelled, DeadlineExceeded};

/// Borrowed link in a cause chain.
pub type Link<'a> = &'a (dyn StdError + 'static);

/// Iterate `err` and its causes, outermost first.
pub fn iter(err: Link<'_>) -> impl Iterator<Item = Link<'_>> {
    std::iter::successors(Some(err), |&e| e.source())
}

/// Visit every link, outermost first.
pub fn walk(err: Link<'_>, mut visit: impl FnMut(Link<'_>)) {
    for link in iter(err) {
        visit(link);
    }
}

/// First link satisfying `predicate`.
pub fn find<'a>(err: Link<'a>, mut predicate: impl FnMut(Link<'a>) -> bool) -> Option<Link<'a>> {
    iter(err).find(|link| predicate(*link))
}

/// Innermost link.
pub fn root(err: Link<'_>) -> Link<'_> {
    iter(err).last().unwrap_or(err)
}

/// Every layer as a standalone [`Error`], outermost first.
///
/// Custom layers keep their own message, context and identity but lose the
/// cause, so no layer's text leaks into another. Foreign layers become plain
/// errors carrying their display text.
pub fn unwrap_all(err: Link<'_>) -> Vec<Error> {
    iter(err)
        .map(|link| match link.downcast_ref::<Error>() {
            Some(custom) => custom.detached(),
            None => Error::new(link.to_string()),
        })
        .collect()
}

/// Whether any link in `err` matches `target`.
///
/// A link matches when it is the same object, when both are custom errors
/// with the same non-empty name (or, both unnamed, the same identity), or
/// when the texts agree for foreign targets.
pub fn is(err: Link<'_>, target: Link<'_>) -> bool {
    let target_custom = target.downcast_ref::<Error>();
    iter(err).any(|link| link_matches(link, target, target_custom))
}

fn link_matches(link: Link<'_>, target: Link<'_>, target_custom: Option<&Error>) -> bool {
    if std::ptr::addr_eq(link as *const dyn StdError, target as *const dyn StdError) {
        return true;
    }
    match (link.downcast_ref::<Error>(), target_custom) {
        (Some(a), Some(b)) => match (a.name().is_empty(), b.name().is_empty()) {
            (false, false) => a.name() == b.name(),
            (true, true) => a.id() == b.id(),
            _ => false,
        },
        (Some(a), None) => !a.message().is_empty() && a.message() == target.to_string(),
        (None, Some(_)) => false,
        (None, None) => link.to_string() == target.to_string(),
    }
}

/// [`is`] for optional values: two absent errors match.
pub fn matches(err: Option<Link<'_>>, target: Option<Link<'_>>) -> bool {
    match (err, target) {
        (None, None) => true,
        (Some(err), Some(target)) => is(err, target),
        _ => false,
    }
}

/// First link of concrete type `T`.
pub fn as_type<T: StdError + 'static>(err: Link<'_>) -> Option<&T> {
    iter(err).find_map(|link| link.downcast_ref::<T>())
}

/// First custom link named `name`.
pub fn find_named<'a>(err: Link<'a>, name: &str) -> Option<&'a Error> {
    customs(err).find(|e| e.name() == name)
}

fn customs(err: Link<'_>) -> impl Iterator<Item = &Error> {
    iter(err).filter_map(|link| link.downcast_ref::<Error>())
}

/// Turn any error into a custom [`Error`].
///
/// A custom error is cloned as is. Anything else becomes an error carrying
/// its text, picking up context, code and category from the first custom
/// error further down.
pub fn convert(err: Link<'_>) -> Error {
    if let Some(custom) = err.downcast_ref::<Error>() {
        return custom.clone();
    }
    let mut converted = Error::new(err.to_string());
    if let Some(inner) = customs(err).next() {
        for (key, value) in inner.context() {
            converted = converted.with(key, value);
        }
        converted = converted
            .with_code(inner.code())
            .with_category(inner.category());
    }
    converted
}

/// Independent copy of `err` passed through `f`. The original is untouched.
pub fn transform(err: Link<'_>, f: impl FnOnce(Error) -> Error) -> Error {
    let base = match err.downcast_ref::<Error>() {
        Some(custom) => custom.copy(),
        None => convert(err),
    };
    f(base)
}

/// First non-zero code in the chain.
pub fn code(err: Link<'_>) -> i32 {
    customs(err).map(Error::code).find(|&c| c != 0).unwrap_or(0)
}

/// First non-empty category in the chain.
pub fn category(err: Link<'_>) -> Option<String> {
    customs(err)
        .map(Error::category)
        .find(|c| !c.is_empty())
        .map(str::to_owned)
}

/// First non-empty name in the chain.
pub fn name(err: Link<'_>) -> Option<String> {
    customs(err)
        .map(Error::name)
        .find(|n| !n.is_empty())
        .map(str::to_owned)
}

/// Context merged over the whole chain; outer layers win on conflicts.
pub fn context(err: Link<'_>) -> HashMap<String, Value> {
    let layers: Vec<&Error> = customs(err).collect();
    let mut merged = HashMap::new();
    for layer in layers.into_iter().rev() {
        merged.extend(layer.context());
    }
    merged
}

/// Whether any custom link has `key` in its context.
pub fn has_context_key(err: Link<'_>, key: &str) -> bool {
    customs(err).any(|e| e.has_context_key(key))
}

/// Whether any link is flagged retryable.
pub fn is_retryable(err: Link<'_>) -> bool {
    customs(err).any(Error::is_retryable)
}

/// Whether any link is a timeout: flagged, a [`DeadlineExceeded`] sentinel
/// or an I/O timeout.
pub fn is_timeout(err: Link<'_>) -> bool {
    iter(err).any(|link| {
        if let Some(custom) = link.downcast_ref::<Error>() {
            return custom.is_timeout();
        }
        link.is::<DeadlineExceeded>()
            || link
                .downcast_ref::<std::io::Error>()
                .is_some_and(|io| io.kind() == std::io::ErrorKind::TimedOut)
    })
}

/// Whether the chain contains a [`Cancelled`] or [`DeadlineExceeded`] sentinel.
pub fn is_cancelled(err: Link<'_>) -> bool {
    iter(err).any(|link| link.is::<Cancelled>() || link.is::<DeadlineExceeded>())
}

/// Frames from the first custom link that captured a stack.
pub fn stack(err: Link<'_>) -> Vec<String> {
    customs(err)
        .find(|e| e.has_stack())
        .map(Error::stack)
        .unwrap_or_default()
}

/// No error, or one with nothing to say.
pub fn is_empty(err: Option<Link<'_>>) -> bool {
    match err {
        None => true,
        Some(err) => match err.downcast_ref::<Error>() {
            Some(custom) => custom.is_empty(),
            None => err.to_string().trim().is_empty(),
        },
    }
}

/// No error, or one whose context is entirely null somewhere in the chain.
pub fn is_null(err: Option<Link<'_>>) -> bool {
    match err {
        None => true,
        Some(err) => {
            if let Some(custom) = err.downcast_ref::<Error>() {
                custom.is_null()
            } else if let Some(multi) = err.downcast_ref::<MultiError>() {
                multi.is_null()
            } else {
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[derive(Debug)]
    struct Layer {
        msg: &'static str,
        cause: Option<Box<Layer>>,
    }

    impl std::fmt::Display for Layer {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(self.msg)
        }
    }

    impl StdError for Layer {
        fn source(&self) -> Option<&(dyn StdError + 'static)> {
            self.cause.as_deref().map(|c| c as &(dyn StdError + 'static))
        }
    }

    fn three_layers() -> Layer {
        Layer {
            msg: "third error",
            cause: Some(Box::new(Layer {
                msg: "second error",
                cause: Some(Box::new(Layer {
                    msg: "first error",
                    cause: None,
                })),
            })),
        }
    }

    #[test]
    fn iter_links_borrow_from_the_outer_error() {
        let err = three_layers();
        let links: Vec<Link<'_>> = iter(&err).collect();
        assert_eq!(links.len(), 3);
        assert_eq!(links[2].to_string(), "first error");
    }

    #[test]
    fn walk_visits_outer_to_inner() {
        let err = three_layers();
        let mut seen = Vec::new();
        walk(&err, |e| seen.push(e.to_string()));
        assert_eq!(seen, ["third error", "second error", "first error"]);
    }

    #[test]
    fn find_returns_first_match() {
        let err = three_layers();
        let found = find(&err, |e| e.to_string() == "second error");
        assert_eq!(found.map(ToString::to_string).as_deref(), Some("second error"));
        assert!(find(&err, |e| e.to_string() == "missing").is_none());
        assert_eq!(root(&err).to_string(), "first error");
    }

    #[test]
    fn named_errors_match_by_name() {
        let a = Error::named("test_error");
        let b = Error::named("test_error");
        let c = Error::named("other_error");
        assert!(is(&a, &b));
        assert!(!is(&a, &c));

        let cause = Error::named("cause_error");
        let wrapped = Error::named("wrapper").wrap(cause.clone());
        assert!(is(&wrapped, &cause));
    }

    #[test]
    fn unnamed_errors_match_by_identity() {
        let err = Error::new("empty name");
        assert!(is(&err, &err));
        assert!(is(&err, &err.clone()));
        assert!(!is(&err, &err.copy()));
        assert!(!is(&err, &Error::named("")));
    }

    #[test]
    fn foreign_targets_match_through_wrapping() {
        let io = std::io::Error::other("std error");
        let wrapped = Error::new("custom").wrap(std::io::Error::other("std error"));
        assert!(is(&wrapped, &io));
        assert!(matches(None, None));
        assert!(!matches(Some(&wrapped), None));
    }

    #[test]
    fn as_type_finds_concrete_links() {
        let err = Error::new("base").wrap(Error::named("target"));
        let found = find_named(&err, "target");
        assert_eq!(found.map(Error::name), Some("target"));

        let err = Error::new("wrapper").wrap(std::io::Error::other("std error"));
        let io = as_type::<std::io::Error>(&err);
        assert_eq!(io.map(ToString::to_string).as_deref(), Some("std error"));
    }

    #[test]
    fn unwrap_all_isolates_layers() {
        let outer = Error::new("outer")
            .with("layer", "outer")
            .wrap(Error::new("middle").wrap(Error::new("inner")));
        let layers = unwrap_all(&outer);
        let texts: Vec<String> = layers.iter().map(ToString::to_string).collect();
        assert_eq!(texts, ["outer", "middle", "inner"]);
        assert!(layers[1].context().is_empty());
        assert_eq!(layers[0].id(), outer.id());
    }

    #[test]
    fn helpers_read_the_whole_chain() {
        let err = Error::new("api")
            .with("request", "r1")
            .wrap(
                Error::new("db")
                    .with("request", "inner")
                    .with("table", "users")
                    .with_code(503)
                    .with_category("database")
                    .with_retryable(),
            );
        assert_eq!(code(&err), 503);
        assert_eq!(category(&err).as_deref(), Some("database"));
        assert!(is_retryable(&err));
        assert!(has_context_key(&err, "table"));
        let merged = context(&err);
        assert_eq!(merged["request"], "r1");
        assert_eq!(merged["table"], "users");
    }

    #[test]
    fn cancellation_sentinels_are_detected() {
        let cancelled = Error::new("retry cancelled").wrap(Cancelled);
        assert!(is_cancelled(&cancelled));
        assert!(!is_timeout(&cancelled));

        let deadline = Error::new("retry deadline exceeded").wrap(DeadlineExceeded);
        assert!(is_cancelled(&deadline));
        assert!(is_timeout(&deadline));
    }

    #[test]
    fn convert_and_transform() {
        let io = std::io::Error::other("standard");
        let converted = transform(&io, |e| e);
        assert_eq!(converted.to_string(), "standard");

        let orig = Error::new("original");
        let changed = transform(&orig, |e| e.with("key", "value"));
        assert_eq!(changed.to_string(), "original");
        assert_eq!(changed.context_value("key"), Some(Value::from("value")));
        assert!(orig.context().is_empty());
        assert_ne!(changed.id(), orig.id());
    }

    #[test]
    fn emptiness_of_foreign_errors() {
        assert!(is_empty(None));
        assert!(is_empty(Some(&std::io::Error::other(""))));
        assert!(is_empty(Some(&std::io::Error::other("   "))));
        assert!(!is_empty(Some(&std::io::Error::other("test"))));
        assert!(is_null(None));
        assert!(!is_null(Some(&std::io::Error::other("test"))));
    }
}
