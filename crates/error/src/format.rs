//! Runtime `%`-verb templates.
//!
//! Templates are plain strings chosen at runtime (errmgr definitions, step
//! metadata), so they cannot go through `format!`. The supported verbs are
//! `%s`, `%v`, `%d`, `%q` and `%%`; flags and widths between `%` and the verb
//! are accepted and ignored. `%w` is only meaningful to
//! [`Error::newf`](crate::Error::newf), which turns it into a cause.

use std::fmt::Write as _;
use std::sync::Arc;

use serde_json::Value;

use crate::SharedError;

/// Positional argument for a runtime template.
#[derive(Clone)]
pub enum Arg {
    /// Any JSON-representable value.
    Value(Value),
    /// An error, or `None` for an absent one.
    Error(Option<SharedError>),
}

impl std::fmt::Debug for Arg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Self::Error(Some(e)) => f.debug_tuple("Error").field(&e.to_string()).finish(),
            Self::Error(None) => f.write_str("Error(<nil>)"),
        }
    }
}

impl Arg {
    /// Type label used in formatting diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Value(Value::Null) | Self::Error(None) => "<nil>",
            Self::Value(Value::Bool(_)) => "bool",
            Self::Value(Value::Number(n)) if n.is_f64() => "float",
            Self::Value(Value::Number(_)) => "int",
            Self::Value(Value::String(_)) => "string",
            Self::Value(Value::Array(_)) => "array",
            Self::Value(Value::Object(_)) => "object",
            Self::Error(Some(_)) => "error",
        }
    }

    fn plain(&self) -> String {
        match self {
            Self::Value(Value::String(s)) => s.clone(),
            Self::Value(Value::Null) | Self::Error(None) => "<nil>".to_owned(),
            Self::Value(other) => other.to_string(),
            Self::Error(Some(e)) => e.to_string(),
        }
    }
}

macro_rules! arg_from_value {
    ($($t:ty),* $(,)?) => {
        $(
            impl From<$t> for Arg {
                fn from(value: $t) -> Self {
                    Self::Value(Value::from(value))
                }
            }
        )*
    };
}

arg_from_value!(&str, String, bool, i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64);

impl From<&String> for Arg {
    fn from(value: &String) -> Self {
        Self::Value(Value::String(value.clone()))
    }
}

impl From<Value> for Arg {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<crate::Error> for Arg {
    fn from(err: crate::Error) -> Self {
        Self::Error(Some(Arc::new(err)))
    }
}

impl From<SharedError> for Arg {
    fn from(err: SharedError) -> Self {
        Self::Error(Some(err))
    }
}

impl From<Option<SharedError>> for Arg {
    fn from(err: Option<SharedError>) -> Self {
        Self::Error(err)
    }
}

/// Build a `&[Arg]` from heterogeneous expressions.
///
/// ```
/// use faultline_error::{args, format::render};
/// assert_eq!(render("%s=%d", args!["retries", 3]), "retries=3");
/// ```
#[macro_export]
macro_rules! args {
    () => {{
        let empty: &[$crate::Arg] = &[];
        empty
    }};
    ($($arg:expr),+ $(,)?) => { &[$($crate::Arg::from($arg)),+][..] };
}

/// Malformed `%w` usage detected by [`render_wrapping`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum WrapFault {
    Multiple,
    NotEnoughArgs,
    NotAnError { index: usize, type_name: &'static str },
    TrailingPercent,
}

impl WrapFault {
    pub(crate) fn describe(&self, template: &str) -> String {
        match self {
            Self::Multiple => format!("newf: format {template:?} has multiple %w verbs"),
            Self::NotEnoughArgs => {
                format!("newf: format {template:?} has %w but not enough arguments")
            }
            Self::NotAnError { index, type_name } => {
                format!("newf: argument {index} for %w is not a non-nil error ({type_name})")
            }
            Self::TrailingPercent => format!("newf: format {template:?} ends with %"),
        }
    }
}

/// Result of rendering a template that may carry a `%w` cause.
pub(crate) struct Rendered {
    pub(crate) text: String,
    pub(crate) cause: Option<SharedError>,
}

/// Render `template` with `args`. `%w` is treated like `%v`.
pub fn render(template: &str, args: &[Arg]) -> String {
    let mut out = String::with_capacity(template.len() + args.len() * 8);
    let mut next = 0usize;
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let Some(verb) = take_verb(&mut chars) else {
            out.push_str("%!(NOVERB)");
            break;
        };
        if verb == '%' {
            out.push('%');
            continue;
        }
        match args.get(next) {
            Some(arg) => write_verb(&mut out, verb, arg),
            None => {
                let _ = write!(out, "%!{verb}(MISSING)");
            }
        }
        next += 1;
    }
    out
}

/// Render a template that may contain a single `%w`, returning the cause.
pub(crate) fn render_wrapping(template: &str, args: &[Arg]) -> Result<Rendered, WrapFault> {
    let wraps = scan(template)?;
    if wraps > 1 {
        return Err(WrapFault::Multiple);
    }

    let mut out = String::with_capacity(template.len() + args.len() * 8);
    let mut cause = None;
    let mut next = 0usize;
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let Some(verb) = take_verb(&mut chars) else {
            return Err(WrapFault::TrailingPercent);
        };
        if verb == '%' {
            out.push('%');
            continue;
        }
        if verb == 'w' {
            match args.get(next) {
                None => return Err(WrapFault::NotEnoughArgs),
                Some(Arg::Error(Some(err))) => {
                    out.push_str(&err.to_string());
                    cause = Some(Arc::clone(err));
                }
                Some(other) => {
                    return Err(WrapFault::NotAnError {
                        index: next,
                        type_name: other.type_name(),
                    });
                }
            }
        } else {
            match args.get(next) {
                Some(arg) => write_verb(&mut out, verb, arg),
                None => {
                    let _ = write!(out, "%!{verb}(MISSING)");
                }
            }
        }
        next += 1;
    }

    Ok(Rendered { text: out, cause })
}

/// Count `%w` verbs, rejecting a template that ends in a bare `%`.
fn scan(template: &str) -> Result<usize, WrapFault> {
    let mut wraps = 0;
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            continue;
        }
        match take_verb(&mut chars) {
            None => return Err(WrapFault::TrailingPercent),
            Some('w') => wraps += 1,
            Some(_) => {}
        }
    }
    Ok(wraps)
}

/// Consume flags and width after a `%` and return the verb character.
fn take_verb(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> Option<char> {
    while let Some(&c) = chars.peek() {
        if matches!(c, '+' | '-' | '#' | ' ' | '.' | '0'..='9') {
            chars.next();
        } else {
            break;
        }
    }
    chars.next()
}

fn write_verb(out: &mut String, verb: char, arg: &Arg) {
    match verb {
        'd' => match arg {
            Arg::Value(Value::Number(n)) => {
                if let Some(i) = n.as_i64() {
                    let _ = write!(out, "{i}");
                } else if let Some(u) = n.as_u64() {
                    let _ = write!(out, "{u}");
                } else {
                    let _ = write!(out, "%!d(float={n})");
                }
            }
            other => {
                let _ = write!(out, "%!d({}={})", other.type_name(), other.plain());
            }
        },
        'q' => {
            let _ = write!(out, "{:?}", arg.plain());
        }
        _ => out.push_str(&arg.plain()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn io(msg: &str) -> SharedError {
        Arc::new(std::io::Error::other(msg.to_owned()))
    }

    #[rstest]
    #[case("plain", vec![], "plain")]
    #[case("user %s", vec![Arg::from("bob")], "user bob")]
    #[case("%d items", vec![Arg::from(42)], "42 items")]
    #[case("%v/%v", vec![Arg::from(true), Arg::from(1.5)], "true/1.5")]
    #[case("%q", vec![Arg::from("a\"b")], "\"a\\\"b\"")]
    #[case("100%%", vec![], "100%")]
    #[case("%5s|%-3d", vec![Arg::from("x"), Arg::from(7)], "x|7")]
    #[case("missing %s", vec![], "missing %!s(MISSING)")]
    #[case("%d", vec![Arg::from("abc")], "%!d(string=abc)")]
    #[case("trailing %", vec![], "trailing %!(NOVERB)")]
    #[case("null %v", vec![Arg::Value(Value::Null)], "null <nil>")]
    fn renders_verbs(#[case] template: &str, #[case] args: Vec<Arg>, #[case] expected: &str) {
        assert_eq!(render(template, &args), expected);
    }

    #[test]
    fn surplus_arguments_are_ignored() {
        assert_eq!(render("only %s", args!["one", "two"]), "only one");
    }

    #[test]
    fn wrap_verb_inlines_cause() {
        let rendered = render_wrapping("prefix %w", &[Arg::from(io("std error"))]).unwrap();
        assert_eq!(rendered.text, "prefix std error");
        assert!(rendered.cause.is_some());
    }

    #[test]
    fn escaped_percent_around_wrap() {
        let rendered =
            render_wrapping("%%prefix %% %w %%suffix", &[Arg::from(io("error"))]).unwrap();
        assert_eq!(rendered.text, "%prefix % error %suffix");
    }

    #[rstest]
    #[case("%w %w", vec![Arg::from(io("a")), Arg::from(io("b"))], r#"newf: format "%w %w" has multiple %w verbs"#)]
    #[case("prefix %w", vec![], r#"newf: format "prefix %w" has %w but not enough arguments"#)]
    #[case("%w", vec![Arg::from("not an error")], "newf: argument 0 for %w is not a non-nil error (string)")]
    #[case("%w", vec![Arg::Error(None)], "newf: argument 0 for %w is not a non-nil error (<nil>)")]
    #[case("test %w %", vec![Arg::from(io("x"))], r#"newf: format "test %w %" ends with %"#)]
    fn wrap_faults(#[case] template: &str, #[case] args: Vec<Arg>, #[case] expected: &str) {
        let fault = render_wrapping(template, &args).err().unwrap();
        assert_eq!(fault.describe(template), expected);
    }

    #[test]
    fn type_names() {
        assert_eq!(Arg::from(1).type_name(), "int");
        assert_eq!(Arg::from(1.5).type_name(), "float");
        assert_eq!(Arg::from(false).type_name(), "bool");
        assert_eq!(Arg::Value(serde_json::json!([1])).type_name(), "array");
        assert_eq!(Arg::Value(serde_json::json!({"a": 1})).type_name(), "object");
    }
}
