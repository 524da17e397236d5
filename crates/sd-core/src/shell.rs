//! Shell quoting for commands sent to nodes.
//!
//! Remote commands are assembled as strings and run by a POSIX shell on the
//! node, so every interpolated path, branch or commit goes through [`quote`].

use std::borrow::Cow;

use shell_escape::unix::escape;

/// Quote a value for interpolation into a POSIX shell command
pub fn quote(value: &str) -> String {
    escape(Cow::Borrowed(value)).into_owned()
}

/// Join a root and a relative path with exactly one separator, then quote
pub fn quote_join(root: &str, relative: &str) -> String {
    quote(&join(root, relative))
}

/// Join a root and a relative path with exactly one separator
pub fn join(root: &str, relative: &str) -> String {
    format!(
        "{}/{}",
        root.trim_end_matches('/'),
        relative.trim_start_matches('/')
    )
}
