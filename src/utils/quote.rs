// dbsynctool/src/utils/quote.rs
use crate::errors::{Result, SyncError};

/// Characters that never need quoting in a POSIX shell word.
fn is_shell_safe(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '@' | '%' | '+' | '=' | ':' | ',' | '.' | '/' | '-')
}

/// Quotes `value` so a POSIX shell treats it as exactly one literal word.
///
/// Plain words (`users`, `/tmp/dump.sql`, `3306`) are returned as-is, the empty
/// string becomes `''`, everything else is wrapped in single quotes with every
/// embedded `'` written as `'"'"'`.
pub fn quote_shell_arg(value: &str) -> String {
    if value.is_empty() {
        return "''".to_string();
    }
    if value.chars().all(is_shell_safe) {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', "'\"'\"'"))
}

/// Validates a table (or other SQL object) name and returns it backtick-quoted.
///
/// Only ASCII letters, digits and `_ $ . -` are accepted.
pub fn sanitize_identifier(name: &str) -> Result<String> {
    if name.is_empty() {
        return Err(SyncError::Validation("Table name cannot be empty".to_string()));
    }
    if name.contains(|c: char| !c.is_ascii_alphanumeric() && !matches!(c, '_' | '$' | '.' | '-')) {
        return Err(SyncError::Validation(format!("Invalid table name: {:?}", name)));
    }
    Ok(format!("`{}`", name))
}
