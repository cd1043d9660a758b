//! Boundary protection for paths, strings, and payload sizes.
//!
//! Every component that touches user-controlled paths, renders strings to a
//! terminal or log, or ingests bytes from the network goes through this
//! module. Path validation returns a [`ValidatedPath`] newtype so that code
//! paths accepting raw user paths do not exist downstream.

use once_cell::sync::Lazy;
use regex::Regex;
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Errors produced by path validation and bounded reads.
#[derive(Error, Debug)]
pub enum SafeIoError {
    #[error("empty path given for {purpose}")]
    EmptyPath { purpose: &'static str },

    #[error("path for {purpose} contains a forbidden character: {path}")]
    ForbiddenCharacter { purpose: &'static str, path: String },

    #[error("path for {purpose} contains an encoded traversal sequence: {path}")]
    EncodedTraversal { purpose: &'static str, path: String },

    #[error("path for {purpose} contains parent directory traversal: {path}")]
    Traversal { purpose: &'static str, path: String },

    #[error("absolute path not allowed for {purpose}: {path}")]
    AbsoluteNotAllowed { purpose: &'static str, path: String },

    #[error("path for {purpose} escapes its base directory: {path}")]
    EscapesBase { purpose: &'static str, path: String },

    #[error("path for {purpose} resolves into a protected system directory: {path}")]
    SystemPath { purpose: &'static str, path: String },

    #[error("path for {purpose} does not exist: {path}")]
    NotFound { purpose: &'static str, path: String },

    #[error("invalid path component: {name}")]
    InvalidComponent { name: String },

    #[error("input exceeds size limit of {limit} bytes")]
    SizeExceeded { limit: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A path that has passed [`validate_path`]. The only way to obtain one is
/// through validation or [`ValidatedPath::join_name`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedPath(PathBuf);

impl ValidatedPath {
    #[must_use]
    pub fn as_path(&self) -> &Path {
        &self.0
    }

    #[must_use]
    pub fn to_path_buf(&self) -> PathBuf {
        self.0.clone()
    }

    /// Append a single trusted-but-checked name (no separators, no
    /// traversal, no forbidden bytes). Used for filesystem entries that
    /// came from `read_dir` rather than from the user.
    pub fn join_name(&self, name: &str) -> Result<ValidatedPath, SafeIoError> {
        if name.is_empty()
            || name == "."
            || name == ".."
            || name.contains(['/', '\\'])
            || name.chars().any(is_forbidden_char)
        {
            return Err(SafeIoError::InvalidComponent {
                name: name.to_string(),
            });
        }
        Ok(ValidatedPath(self.0.join(name)))
    }
}

impl AsRef<Path> for ValidatedPath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl std::fmt::Display for ValidatedPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.display().fmt(f)
    }
}

/// Validation rules for one call to [`validate_path`].
#[derive(Debug, Clone, Copy)]
pub struct PathRules<'a> {
    pub allow_absolute: bool,
    pub must_exist: bool,
    /// When `allow_absolute` is false, inputs are confined beneath this
    /// base directory.
    pub base: Option<&'a Path>,
    /// Short label used in error messages ("cache directory", ...).
    pub purpose: &'static str,
}

impl<'a> PathRules<'a> {
    /// Accept absolute (and tilde-expanded) paths.
    #[must_use]
    pub fn absolute(purpose: &'static str) -> Self {
        Self {
            allow_absolute: true,
            must_exist: false,
            base: None,
            purpose,
        }
    }

    /// Accept absolute paths that must already exist.
    #[must_use]
    pub fn existing_absolute(purpose: &'static str) -> Self {
        Self {
            must_exist: true,
            ..Self::absolute(purpose)
        }
    }

    /// Confine relative inputs beneath `base`.
    #[must_use]
    pub fn under(base: &'a Path, purpose: &'static str) -> Self {
        Self {
            allow_absolute: false,
            must_exist: false,
            base: Some(base),
            purpose,
        }
    }
}

fn is_forbidden_char(c: char) -> bool {
    c == '\0' || c == '|' || c == ';' || c == '`' || c.is_control()
}

fn has_encoded_traversal(input: &str) -> bool {
    let lower = input.to_ascii_lowercase();
    lower.contains("%2e%2e")
        || lower.contains("%252e")
        || lower.contains(".%2e")
        || lower.contains("%2e.")
}

/// Directories no validated path may resolve into.
fn denied_roots() -> &'static [&'static str] {
    #[cfg(windows)]
    {
        &[
            "C:\\Windows",
            "C:\\Program Files",
            "C:\\Program Files (x86)",
        ]
    }
    #[cfg(not(windows))]
    {
        &["/etc", "/sys", "/proc", "/dev", "/boot", "/System"]
    }
}

fn components_eq(a: &str, b: &str) -> bool {
    if cfg!(any(windows, target_os = "macos")) {
        a.eq_ignore_ascii_case(b)
    } else {
        a == b
    }
}

/// Lexical normalization: drops `.` components. `..` components must have
/// been rejected before this is called.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn in_denied_root(path: &Path) -> bool {
    for deny in denied_roots() {
        let deny_path = Path::new(deny);
        let mut path_iter = path.components();
        let mut matched = true;
        for deny_comp in deny_path.components() {
            let Some(path_comp) = path_iter.next() else {
                matched = false;
                break;
            };
            let a = deny_comp.as_os_str().to_string_lossy();
            let b = path_comp.as_os_str().to_string_lossy();
            if !components_eq(&a, &b) {
                matched = false;
                break;
            }
        }
        if matched {
            return true;
        }
    }
    false
}

fn expand_tilde(input: &str) -> Option<PathBuf> {
    if input == "~" {
        return dirs::home_dir();
    }
    if let Some(rest) = input.strip_prefix("~/") {
        return dirs::home_dir().map(|h| h.join(rest));
    }
    #[cfg(windows)]
    if let Some(rest) = input.strip_prefix("~\\") {
        return dirs::home_dir().map(|h| h.join(rest));
    }
    None
}

/// Validate a user-supplied path string.
///
/// Rejects traversal (`..`), URL-encoded traversal, NUL and control bytes,
/// shell metacharacters (`|`, `;`, backtick), and paths that resolve into
/// protected system directories. Tilde expansion is applied when absolute
/// paths are allowed.
///
/// # Errors
///
/// Returns a [`SafeIoError`] naming the violated rule; any failure is
/// terminal for the operation that needed the path.
pub fn validate_path(input: &str, rules: &PathRules<'_>) -> Result<ValidatedPath, SafeIoError> {
    let purpose = rules.purpose;

    if input.is_empty() {
        return Err(SafeIoError::EmptyPath { purpose });
    }
    if input.chars().any(is_forbidden_char) {
        return Err(SafeIoError::ForbiddenCharacter {
            purpose,
            path: input.to_string(),
        });
    }
    if has_encoded_traversal(input) {
        return Err(SafeIoError::EncodedTraversal {
            purpose,
            path: input.to_string(),
        });
    }

    let expanded = match expand_tilde(input) {
        Some(home) if rules.allow_absolute => home,
        Some(_) => {
            return Err(SafeIoError::AbsoluteNotAllowed {
                purpose,
                path: input.to_string(),
            });
        }
        None => PathBuf::from(input),
    };

    if expanded
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(SafeIoError::Traversal {
            purpose,
            path: input.to_string(),
        });
    }

    let joined = if expanded.is_absolute() {
        if !rules.allow_absolute {
            return Err(SafeIoError::AbsoluteNotAllowed {
                purpose,
                path: input.to_string(),
            });
        }
        expanded
    } else if let Some(base) = rules.base {
        base.join(&expanded)
    } else if rules.allow_absolute {
        std::env::current_dir()?.join(&expanded)
    } else {
        return Err(SafeIoError::AbsoluteNotAllowed {
            purpose,
            path: input.to_string(),
        });
    };

    let normalized = normalize(&joined);

    if let Some(base) = rules.base {
        let base_norm = normalize(base);
        if !normalized.starts_with(&base_norm) {
            return Err(SafeIoError::EscapesBase {
                purpose,
                path: input.to_string(),
            });
        }
    }

    if in_denied_root(&normalized) {
        return Err(SafeIoError::SystemPath {
            purpose,
            path: input.to_string(),
        });
    }

    if rules.must_exist && !normalized.exists() {
        return Err(SafeIoError::NotFound {
            purpose,
            path: input.to_string(),
        });
    }

    Ok(ValidatedPath(normalized))
}

/// Rendering context for [`sanitize_string`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SanitizeContext {
    /// Terminal output: strip control characters except tab/newline.
    Output,
    /// Log lines: additionally collapse newlines.
    Log,
    /// Error messages: additionally elide absolute paths to basenames.
    Error,
}

static UNIX_ABS_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:/[A-Za-z0-9_.@+-]+){2,}").unwrap());

static WINDOWS_ABS_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[A-Za-z]:\\[^\s:*?"<>|]+"#).unwrap());

fn elide_paths(input: &str) -> String {
    let basename = |caps: &regex::Captures<'_>| {
        let m = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
        let name = m
            .rsplit(['/', '\\'])
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or(m);
        name.to_string()
    };
    let out = UNIX_ABS_PATH.replace_all(input, basename);
    WINDOWS_ABS_PATH.replace_all(&out, basename).into_owned()
}

/// Sanitize a user- or network-controlled string for the given context.
///
/// Control characters (including terminal escape introducers) never
/// survive. Tab and newline are preserved only in the `Output` context.
#[must_use]
pub fn sanitize_string(input: &str, context: SanitizeContext) -> String {
    let keep_layout = context == SanitizeContext::Output;
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '\t' | '\n' if keep_layout => out.push(c),
            '\r' if keep_layout => {}
            '\n' | '\r' => {
                // Log/Error context: collapse line breaks into spaces.
                if !out.ends_with(' ') {
                    out.push(' ');
                }
            }
            '\u{9b}' => {}
            c if c.is_control() => {}
            c => out.push(c),
        }
    }

    match context {
        SanitizeContext::Error => elide_paths(&out),
        _ => out,
    }
}

/// A running byte-count ceiling. Shared by the sync reader below and the
/// resolver's streamed response ingestion.
#[derive(Debug, Clone)]
pub struct SizeBudget {
    limit: u64,
    used: u64,
}

impl SizeBudget {
    #[must_use]
    pub fn new(limit: u64) -> Self {
        Self { limit, used: 0 }
    }

    /// Account for `n` more bytes.
    ///
    /// # Errors
    ///
    /// Returns [`SafeIoError::SizeExceeded`] once the running total passes
    /// the limit.
    pub fn consume(&mut self, n: u64) -> Result<(), SafeIoError> {
        self.used = self.used.saturating_add(n);
        if self.used > self.limit {
            return Err(SafeIoError::SizeExceeded { limit: self.limit });
        }
        Ok(())
    }

    #[must_use]
    pub fn used(&self) -> u64 {
        self.used
    }
}

const READ_CHUNK: usize = 8192;

/// Read at most `limit` bytes from `reader`, streaming in chunks and
/// aborting on overflow rather than buffering unbounded input.
///
/// # Errors
///
/// Returns [`SafeIoError::SizeExceeded`] when the source is larger than
/// `limit`, or the underlying I/O error.
pub fn bounded_read<R: Read>(reader: &mut R, limit: u64) -> Result<Vec<u8>, SafeIoError> {
    let mut budget = SizeBudget::new(limit);
    let mut out = Vec::new();
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        let n = reader.read(&mut chunk)?;
        if n == 0 {
            return Ok(out);
        }
        budget.consume(n as u64)?;
        out.extend_from_slice(&chunk[..n]);
    }
}

/// [`bounded_read`] over a file path.
pub fn bounded_read_file(path: &Path, limit: u64) -> Result<Vec<u8>, SafeIoError> {
    let mut file = std::fs::File::open(path)?;
    bounded_read(&mut file, limit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Cursor;

    fn abs(purpose: &'static str) -> PathRules<'static> {
        PathRules::absolute(purpose)
    }

    #[test]
    fn rejects_empty_path() {
        let err = validate_path("", &abs("test")).unwrap_err();
        assert!(matches!(err, SafeIoError::EmptyPath { .. }));
    }

    #[test]
    fn rejects_parent_traversal() {
        for p in ["../escape", "a/../../b", "a/..", ".."] {
            let err = validate_path(p, &abs("test")).unwrap_err();
            assert!(matches!(err, SafeIoError::Traversal { .. }), "path: {p}");
        }
    }

    #[test]
    fn rejects_encoded_traversal() {
        for p in ["%2e%2e/etc", "a/%2E%2E/b", "%252e%252e/x", "a/.%2e/b"] {
            let err = validate_path(p, &abs("test")).unwrap_err();
            assert!(
                matches!(err, SafeIoError::EncodedTraversal { .. }),
                "path: {p}"
            );
        }
    }

    #[test]
    fn rejects_forbidden_bytes() {
        for p in ["a\0b", "a|b", "a;b", "a`b", "a\nb", "a\rb", "a\x1bb"] {
            let err = validate_path(p, &abs("test")).unwrap_err();
            assert!(
                matches!(err, SafeIoError::ForbiddenCharacter { .. }),
                "path: {p:?}"
            );
        }
    }

    #[cfg(unix)]
    #[test]
    fn rejects_system_roots() {
        for p in ["/etc/passwd", "/proc/self/environ", "/sys/kernel", "/dev/null"] {
            let err = validate_path(p, &abs("test")).unwrap_err();
            assert!(matches!(err, SafeIoError::SystemPath { .. }), "path: {p}");
        }
    }

    #[test]
    fn rejects_absolute_when_not_allowed() {
        let tmp = tempfile::TempDir::new().unwrap();
        let rules = PathRules::under(tmp.path(), "test");
        #[cfg(unix)]
        let input = "/tmp/other";
        #[cfg(windows)]
        let input = "D:\\other";
        let err = validate_path(input, &rules).unwrap_err();
        assert!(matches!(err, SafeIoError::AbsoluteNotAllowed { .. }));
    }

    #[test]
    fn confines_relative_paths_to_base() {
        let tmp = tempfile::TempDir::new().unwrap();
        let rules = PathRules::under(tmp.path(), "test");
        let ok = validate_path("sub/file.json", &rules).unwrap();
        assert!(ok.as_path().starts_with(tmp.path()));
    }

    #[test]
    fn tilde_expands_to_home() {
        if dirs::home_dir().is_none() {
            return;
        }
        let ok = validate_path("~/some-dir", &abs("test")).unwrap();
        assert!(ok.as_path().is_absolute());
        assert!(ok.as_path().ends_with("some-dir"));
    }

    #[test]
    fn must_exist_is_enforced() {
        let tmp = tempfile::TempDir::new().unwrap();
        let missing = tmp.path().join("missing");
        let err = validate_path(
            missing.to_str().unwrap(),
            &PathRules::existing_absolute("test"),
        )
        .unwrap_err();
        assert!(matches!(err, SafeIoError::NotFound { .. }));

        let present = tmp.path().to_str().unwrap();
        assert!(validate_path(present, &PathRules::existing_absolute("test")).is_ok());
    }

    #[test]
    fn normalizes_curdir_components() {
        let tmp = tempfile::TempDir::new().unwrap();
        let input = format!("{}/./sub/./x", tmp.path().display());
        let ok = validate_path(&input, &abs("test")).unwrap();
        assert_eq!(ok.as_path(), tmp.path().join("sub/x"));
    }

    #[test]
    fn join_name_rejects_separators_and_dots() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = validate_path(tmp.path().to_str().unwrap(), &abs("test")).unwrap();
        assert!(root.join_name("ok-name").is_ok());
        for bad in ["", ".", "..", "a/b", "a\\b", "a\0b"] {
            assert!(root.join_name(bad).is_err(), "component: {bad:?}");
        }
    }

    proptest! {
        /// Any path containing a forbidden byte or traversal marker fails
        /// validation, whatever surrounds it.
        #[test]
        fn forbidden_fragments_always_fail(
            prefix in "[a-z]{0,8}",
            bad in prop::sample::select(vec!["..", "\0", "|", ";", "`", "\n", "\r", "%2e%2e", "%252e"]),
            suffix in "[a-z]{0,8}",
        ) {
            let path = format!("{prefix}/{bad}/{suffix}");
            prop_assert!(validate_path(&path, &PathRules::absolute("prop")).is_err());
        }
    }

    #[test]
    fn sanitize_output_keeps_layout_strips_escapes() {
        let s = "line1\n\tok\x1b[31mred\x07";
        let out = sanitize_string(s, SanitizeContext::Output);
        assert_eq!(out, "line1\n\tok[31mred");
    }

    #[test]
    fn sanitize_log_collapses_newlines() {
        let s = "a\nb\r\nc";
        let out = sanitize_string(s, SanitizeContext::Log);
        assert_eq!(out, "a b c");
    }

    #[test]
    fn sanitize_error_elides_absolute_paths() {
        let s = "failed to open /home/user/.vscan/cache.db today";
        let out = sanitize_string(s, SanitizeContext::Error);
        assert!(!out.contains("/home/user"), "got: {out}");
        assert!(out.contains("cache.db"));
    }

    #[test]
    fn bounded_read_within_limit() {
        let data = vec![7u8; 1000];
        let out = bounded_read(&mut Cursor::new(&data), 1000).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn bounded_read_aborts_on_overflow() {
        let data = vec![7u8; 10_000];
        let err = bounded_read(&mut Cursor::new(&data), 9_999).unwrap_err();
        assert!(matches!(err, SafeIoError::SizeExceeded { limit: 9_999 }));
    }

    #[test]
    fn size_budget_saturates() {
        let mut budget = SizeBudget::new(10);
        assert!(budget.consume(10).is_ok());
        assert!(budget.consume(1).is_err());
    }
}
