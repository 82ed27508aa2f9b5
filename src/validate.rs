//! Spawn input validation
//!
//! Pure predicate functions that gate everything headed for process
//! creation: command allow-list, argument hygiene, working-directory paths,
//! instance keys, and message length. Expected-invalid input never panics;
//! callers get a [`Validation`] result and must refuse the downstream
//! operation on failure rather than sanitizing and proceeding.

/// Characters that have meaning to a shell and are never allowed in args.
const SHELL_METACHARACTERS: &[char] = &[
    ';', '|', '&', '$', '`', '<', '>', '(', ')', '{', '}', '!', '*', '?', '~', '#', '\n', '\r',
];

/// Outcome of a validation check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validation {
    /// Whether the input passed
    pub valid: bool,
    /// Rejection reason when invalid
    pub reason: Option<String>,
}

impl Validation {
    /// Create a passing result
    pub fn ok() -> Self {
        Self {
            valid: true,
            reason: None,
        }
    }

    /// Create a failing result with a reason
    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: Some(reason.into()),
        }
    }
}

/// Validate a command and its argument vector against the allow-list.
///
/// Rejects commands outside `allowed`, args containing shell
/// metacharacters, null bytes, or `..` traversal, and a `--model` value
/// that does not look like a model identifier.
pub fn validate_spawn_args(command: &str, args: &[String], allowed: &[String]) -> Validation {
    if !allowed.iter().any(|a| a == command) {
        return Validation::fail(format!("command '{}' is not allow-listed", command));
    }

    let mut expect_model = false;
    for arg in args {
        if arg.contains('\0') {
            return Validation::fail("argument contains a null byte");
        }
        if arg.contains("..") {
            return Validation::fail(format!("argument '{}' contains directory traversal", arg));
        }
        if let Some(c) = arg.chars().find(|c| SHELL_METACHARACTERS.contains(c)) {
            return Validation::fail(format!("argument '{}' contains shell metacharacter '{}'", arg, c));
        }
        if expect_model && !is_model_identifier(arg) {
            return Validation::fail(format!("'{}' is not a valid model identifier", arg));
        }
        expect_model = arg == "--model";
    }

    Validation::ok()
}

/// Model identifiers: alphanumeric start, then alphanumerics, `.`, `_`, `-`.
fn is_model_identifier(value: &str) -> bool {
    let mut chars = value.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphanumeric() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-')
}

/// Validate a working-directory path.
///
/// Platform-agnostic: both `/` and `\` separators are accepted. Rejects
/// empty, over-length, `..`, null bytes, and raw spaces outside quoting.
pub fn validate_path(path: &str, max_len: usize) -> Validation {
    if path.is_empty() {
        return Validation::fail("path is empty");
    }
    if path.len() > max_len {
        return Validation::fail(format!("path exceeds {} bytes", max_len));
    }
    if path.contains('\0') {
        return Validation::fail("path contains a null byte");
    }
    if path.contains("..") {
        return Validation::fail("path contains directory traversal");
    }
    if path.contains(' ') && !is_quoted(path) {
        return Validation::fail("path contains an unquoted space");
    }

    Validation::ok()
}

fn is_quoted(path: &str) -> bool {
    (path.starts_with('"') && path.ends_with('"') && path.len() >= 2)
        || (path.starts_with('\'') && path.ends_with('\'') && path.len() >= 2)
}

/// Validate an instance key: `^[A-Za-z][A-Za-z0-9]*$`.
pub fn validate_instance_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric())
}

/// Validate message length against the configured maximum.
pub fn validate_message_length(text: &str, max_len: usize) -> Validation {
    if text.len() > max_len {
        return Validation::fail(format!("message exceeds {} bytes", max_len));
    }
    Validation::ok()
}
