//! Quoting for command lines executed by a remote shell.

use std::borrow::Cow;

/// Quote a single word for a POSIX shell.
pub fn quote(word: &str) -> String {
    shell_escape::unix::escape(Cow::Borrowed(word)).into_owned()
}

/// Quote a remote path while keeping a leading `~` expandable.
pub fn quote_path(path: &str) -> String {
    if path == "~" {
        return "~".to_string();
    }
    match path.strip_prefix("~/") {
        Some("") => "~/".to_string(),
        Some(rest) => format!("~/{}", quote(rest)),
        None => quote(path),
    }
}

/// Split a remote directory into `(parent, leaf)`, ignoring trailing slashes.
///
/// `~/public_html/` becomes `("~", "public_html")`.
pub fn split_dir(path: &str) -> (String, String) {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) => ("/".to_string(), trimmed[1..].to_string()),
        Some(idx) => (trimmed[..idx].to_string(), trimmed[idx + 1..].to_string()),
        None => (".".to_string(), trimmed.to_string()),
    }
}
