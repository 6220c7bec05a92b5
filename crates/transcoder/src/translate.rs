/// Rewrites local recording paths into the form stored in the database,
/// e.g. a local mount point into a network share path.
#[derive(Debug, Clone, Default)]
pub struct PathTranslator {
    prefix: String,
    replacement: String,
}

impl PathTranslator {
    pub fn new(prefix: impl Into<String>, replacement: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            replacement: replacement.into(),
        }
    }

    /// Replace a case-insensitive `prefix` match with the replacement.
    ///
    /// Paths without the prefix (and every path when the prefix is empty) are
    /// returned unchanged. When the replacement is a backslash-only share path,
    /// `/` separators in the remainder become `\`; otherwise the remainder is kept
    /// as is, since `\` is an ordinary filename character on Unix.
    pub fn translate(&self, path: &str) -> String {
        if self.prefix.is_empty() {
            return path.to_string();
        }
        let Some(rest) = strip_prefix_ignore_case(path, &self.prefix) else {
            return path.to_string();
        };

        if uses_backslash_only(&self.replacement) {
            format!("{}{}", self.replacement, rest.replace('/', "\\"))
        } else {
            format!("{}{}", self.replacement, rest)
        }
    }
}

fn strip_prefix_ignore_case<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    let mut chars = path.char_indices();
    for expected in prefix.chars() {
        let (_, actual) = chars.next()?;
        if !actual.to_lowercase().eq(expected.to_lowercase()) {
            return None;
        }
    }
    Some(chars.as_str())
}

fn uses_backslash_only(replacement: &str) -> bool {
    replacement.contains('\\') && !replacement.contains('/')
}
