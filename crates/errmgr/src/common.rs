//! Predefined categories, codes and errors.
//!
//! Static errors are plain functions returning a fresh [`Error`]. Templated
//! errors are [`Constructor`]s registered on the global registry the first
//! time they are used, so their occurrences show up in
//! [`metrics`](crate::metrics).

use std::sync::LazyLock;

use faultline_error::Error;

use crate::global::{categorized, coded, define};
use crate::registry::Constructor;

/// Error categories.
pub mod category {
    /// Authentication failures.
    pub const AUTH: &str = "auth";
    /// Business rule violations.
    pub const BUSINESS: &str = "business";
    /// Database failures.
    pub const DATABASE: &str = "database";
    /// File and stream I/O.
    pub const IO: &str = "io";
    /// Network failures.
    pub const NETWORK: &str = "network";
    /// Resource exhaustion and other system-level failures.
    pub const SYSTEM: &str = "system";
    /// Problems caused by the user.
    pub const USER: &str = "user";
    /// Invalid input.
    pub const VALIDATION: &str = "validation";
}

/// HTTP-style status codes.
pub mod code {
    /// 400
    pub const BAD_REQUEST: i32 = 400;
    /// 401
    pub const UNAUTHORIZED: i32 = 401;
    /// 403
    pub const FORBIDDEN: i32 = 403;
    /// 404
    pub const NOT_FOUND: i32 = 404;
    /// 405
    pub const METHOD_NOT_ALLOWED: i32 = 405;
    /// 409
    pub const CONFLICT: i32 = 409;
    /// 422
    pub const UNPROCESSABLE: i32 = 422;
    /// 429
    pub const TOO_MANY_REQUESTS: i32 = 429;
    /// 500
    pub const INTERNAL_ERROR: i32 = 500;
    /// 501
    pub const NOT_IMPLEMENTED: i32 = 501;
    /// 503
    pub const SERVICE_UNAVAILABLE: i32 = 503;
}

// =============================================================================
// Static errors
// =============================================================================

/// "invalid argument", 400.
pub fn invalid_arg() -> Error {
    Error::new("invalid argument").with_code(code::BAD_REQUEST)
}

/// "not found", 404.
pub fn not_found() -> Error {
    Error::new("not found").with_code(code::NOT_FOUND)
}

/// "permission denied", 403.
pub fn permission() -> Error {
    Error::new("permission denied").with_code(code::FORBIDDEN)
}

/// "operation timed out", flagged timeout.
pub fn timeout() -> Error {
    Error::new("operation timed out").with_timeout()
}

/// "unknown error", 500.
pub fn unknown() -> Error {
    Error::new("unknown error").with_code(code::INTERNAL_ERROR)
}

/// Retryable database connection failure.
pub fn db_conn_retryable() -> Error {
    Error::new("database connection failed")
        .with_category(category::DATABASE)
        .with_retryable()
}

/// Retryable network failure.
pub fn network_retryable() -> Error {
    Error::new("network failure")
        .with_category(category::NETWORK)
        .with_retryable()
}

/// Retryable network timeout.
pub fn network_timed_out() -> Error {
    Error::new("network timeout")
        .with_category(category::NETWORK)
        .with_timeout()
        .with_retryable()
}

/// Retryable "service unavailable", 503.
pub fn service_retryable() -> Error {
    Error::new("service unavailable")
        .with_code(code::SERVICE_UNAVAILABLE)
        .with_retryable()
}

/// Retryable "rate limit exceeded", 429.
pub fn rate_limit_retryable() -> Error {
    Error::new("rate limit exceeded")
        .with_code(code::TOO_MANY_REQUESTS)
        .with_retryable()
}

// =============================================================================
// Templated errors
// =============================================================================

macro_rules! coded_errors {
    ($($ident:ident => ($name:literal, $template:literal, $code:expr);)+) => {$(
        #[doc = concat!("`\"", $template, "\"` registered as `", $name, "`.")]
        pub static $ident: LazyLock<Constructor> =
            LazyLock::new(|| coded($name, $template, $code));
    )+};
}

macro_rules! categorized_errors {
    ($($ident:ident => ($category:expr, $name:literal, $template:literal);)+) => {$(
        #[doc = concat!("`\"", $template, "\"` registered as `", $name, "`.")]
        pub static $ident: LazyLock<Constructor> =
            LazyLock::new(|| categorized($category, $name, $template));
    )+};
}

macro_rules! defined_errors {
    ($($ident:ident => ($name:literal, $template:literal);)+) => {$(
        #[doc = concat!("`\"", $template, "\"` registered as `", $name, "`.")]
        pub static $ident: LazyLock<Constructor> = LazyLock::new(|| define($name, $template));
    )+};
}

// Authentication
coded_errors! {
    AUTH_FAILED => ("ErrAuthFailed", "authentication failed for %s: %s", code::UNAUTHORIZED);
    INVALID_TOKEN => ("ErrInvalidToken", "invalid authentication token: %s", code::UNAUTHORIZED);
    MISSING_CREDS => ("ErrMissingCreds", "missing credentials: %s", code::BAD_REQUEST);
    TOKEN_EXPIRED => ("ErrTokenExpired", "authentication token expired: %s", code::UNAUTHORIZED);
}

// Business
categorized_errors! {
    BUSINESS_RULE => (category::BUSINESS, "ErrBusinessRule", "business rule violation: %s");
    INSUFFICIENT_FUNDS => (category::BUSINESS, "ErrInsufficientFunds", "insufficient funds: %s");
}

// Database
categorized_errors! {
    DB_CONNECTION => (category::DATABASE, "ErrDBConnection", "database connection failed: %s");
    DB_QUERY => (category::DATABASE, "ErrDBQuery", "database query failed: %s");
    DB_TIMEOUT => (category::DATABASE, "ErrDBTimeout", "database operation timed out: %s");
}
coded_errors! {
    DB_CONSTRAINT => ("ErrDBConstraint", "database constraint violation: %s", code::CONFLICT);
}

// I/O
coded_errors! {
    FILE_NOT_FOUND => ("ErrFileNotFound", "file (%s) not found", code::NOT_FOUND);
}
categorized_errors! {
    IO_READ => (category::IO, "ErrIORead", "I/O read error: %s");
    IO_WRITE => (category::IO, "ErrIOWrite", "I/O write error: %s");
}

// Network
categorized_errors! {
    NETWORK_CONN_REFUSED => (category::NETWORK, "ErrNetworkConnRefused", "connection refused: %s");
    NETWORK_TIMEOUT => (category::NETWORK, "ErrNetworkTimeout", "network timeout: %s");
    NETWORK_UNREACHABLE => (category::NETWORK, "ErrNetworkUnreachable", "network unreachable: %s");
}

// System
coded_errors! {
    CONFIG_INVALID => ("ErrConfigInvalid", "invalid configuration: %s", code::INTERNAL_ERROR);
    RESOURCE_EXHAUSTED => ("ErrResourceExhausted", "resource exhausted: %s", code::SERVICE_UNAVAILABLE);
    SYSTEM_FAILURE => ("ErrSystemFailure", "system failure: %s", code::INTERNAL_ERROR);
    SYSTEM_UNHEALTHY => ("ErrSystemUnhealthy", "system unhealthy: %s", code::SERVICE_UNAVAILABLE);
}

// Users
coded_errors! {
    USER_LOCKED => ("ErrUserLocked", "user %s is locked: %s", code::FORBIDDEN);
    USER_NOT_FOUND => ("ErrUserNotFound", "user %s not found: %s", code::NOT_FOUND);
    USER_PERMISSION => ("ErrUserPermission", "user %s lacks permission: %s", code::FORBIDDEN);
    USER_SUSPENDED => ("ErrUserSuspended", "user %s is suspended: %s", code::FORBIDDEN);
}

// Validation
coded_errors! {
    INVALID_FORMAT => ("ErrInvalidFormat", "invalid format: %s", code::BAD_REQUEST);
    VALIDATION_FAILED => ("ErrValidationFailed", "validation failed: %s", code::BAD_REQUEST);
}

// HTTP-style
coded_errors! {
    CONFLICT => ("ErrConflict", "conflict occurred: %s", code::CONFLICT);
    METHOD_NOT_ALLOWED => ("ErrMethodNotAllowed", "method %s not allowed", code::METHOD_NOT_ALLOWED);
    NOT_IMPLEMENTED => ("ErrNotImplemented", "%s not implemented", code::NOT_IMPLEMENTED);
    RATE_LIMIT_EXCEEDED => ("ErrRateLimitExceeded", "rate limit exceeded: %s", code::TOO_MANY_REQUESTS);
    SERVICE_UNAVAILABLE => ("ErrServiceUnavailable", "service (%s) unavailable", code::SERVICE_UNAVAILABLE);
    UNPROCESSABLE => ("ErrUnprocessable", "unprocessable entity: %s", code::UNPROCESSABLE);
    UNSUPPORTED_OPERATION => ("ErrUnsupportedOperation", "unsupported operation %s", code::NOT_IMPLEMENTED);
}

// Serialization and external services
defined_errors! {
    DESERIALIZATION => ("ErrDeserialization", "deserialization error: %s");
    EXTERNAL_SERVICE => ("ErrExternalService", "external service (%s) error");
    SERIALIZATION => ("ErrSerialization", "serialization error: %s");
}

// Generic per-category constructors
categorized_errors! {
    AUTH_ERROR => (category::AUTH, "AuthFailed", "authentication failed for %s: %s");
    BUSINESS_ERROR => (category::BUSINESS, "BusinessError", "business error: %s");
    DB_ERROR => (category::DATABASE, "DBError", "database error: %s");
    IO_ERROR => (category::IO, "IOError", "I/O error: %s");
    NETWORK_ERROR => (category::NETWORK, "NetworkError", "network failure: %s");
    SYSTEM_ERROR => (category::SYSTEM, "SystemError", "system error: %s");
    USER_ERROR => (category::USER, "UserError", "user error: %s");
    VALIDATION_ERROR => (category::VALIDATION, "ValidationError", "validation error: %s");
}

#[cfg(test)]
mod tests {
    use super::*;
    use faultline_error::args;
    use rstest::rstest;

    #[rstest]
    #[case(invalid_arg(), "invalid argument", 400)]
    #[case(not_found(), "not found", 404)]
    #[case(permission(), "permission denied", 403)]
    #[case(unknown(), "unknown error", 500)]
    #[case(service_retryable(), "service unavailable", 503)]
    #[case(rate_limit_retryable(), "rate limit exceeded", 429)]
    fn static_errors(#[case] err: Error, #[case] message: &str, #[case] code: i32) {
        assert_eq!(err.to_string(), message);
        assert_eq!(err.code(), code);
    }

    #[test]
    fn static_error_flags() {
        assert!(timeout().is_timeout());
        assert!(db_conn_retryable().is_retryable());
        assert_eq!(db_conn_retryable().category(), category::DATABASE);
        let timed_out = network_timed_out();
        assert!(timed_out.is_timeout());
        assert!(timed_out.is_retryable());
        assert_eq!(timed_out.category(), category::NETWORK);
    }

    #[test]
    fn static_errors_are_fresh_values() {
        assert_ne!(not_found().id(), not_found().id());
    }

    #[test]
    fn coded_templates() {
        let err = AUTH_FAILED(args!["alice", "bad password"]);
        assert_eq!(err.to_string(), "authentication failed for alice: bad password");
        assert_eq!(err.code(), code::UNAUTHORIZED);
        assert_eq!(err.name(), "ErrAuthFailed");

        let err = FILE_NOT_FOUND(args!["config.toml"]);
        assert_eq!(err.to_string(), "file (config.toml) not found");
        assert_eq!(err.code(), code::NOT_FOUND);

        let err = USER_LOCKED(args!["bob", "too many attempts"]);
        assert_eq!(err.to_string(), "user bob is locked: too many attempts");
        assert_eq!(err.code(), code::FORBIDDEN);
    }

    #[test]
    fn categorized_templates() {
        let err = DB_QUERY(args!["syntax error"]);
        assert_eq!(err.to_string(), "database query failed: syntax error");
        assert_eq!(err.category(), category::DATABASE);

        let err = VALIDATION_ERROR(args!["email"]);
        assert_eq!(err.to_string(), "validation error: email");
        assert_eq!(err.category(), category::VALIDATION);
    }

    #[test]
    fn templated_errors_register_on_global() {
        let _ = SERIALIZATION(args!["bad json"]);
        assert!(crate::Registry::global().value("ErrSerialization") >= 1);
        assert_eq!(
            crate::Registry::global().template_for("ErrSerialization").as_deref(),
            Some("serialization error: %s")
        );
        let _ = CONFLICT(args!["x"]);
        assert_eq!(crate::code_for("ErrConflict"), Some(code::CONFLICT));
    }
}
