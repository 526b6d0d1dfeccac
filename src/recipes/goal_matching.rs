//! Goal-text extraction helpers for recipe matching.
//!
//! Every helper is a pure function of the goal string (or of a directory
//! listing for build/test detection). Regexes compile once per process.

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

/// Compile `pattern` into `cell` on first use; `None` never matches.
fn cached(cell: &'static OnceLock<Option<Regex>>, pattern: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| Regex::new(pattern).ok()).as_ref()
}

fn first_capture(re: Option<&Regex>, text: &str) -> Option<String> {
    re?.captures(text)?
        .get(1)
        .map(|m| m.as_str().to_string())
}

fn is_match(re: Option<&Regex>, text: &str) -> bool {
    re.is_some_and(|re| re.is_match(text))
}

/// Remove one layer of matching quotes.
fn unquote(raw: &str) -> String {
    let trimmed = raw.trim();
    for quote in ['"', '\''] {
        if trimmed.len() >= 2 && trimmed.starts_with(quote) && trimmed.ends_with(quote) {
            return trimmed[1..trimmed.len() - 1].to_string();
        }
    }
    trimmed.to_string()
}

// ─── Repository goals ────────────────────────────────────────────────────────

/// First `http(s)://` or `git@host:path` URL in the goal.
pub fn extract_repo_url(goal: &str) -> Option<String> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    first_capture(cached(&RE, r"(https?://\S+|git@[^\s:]+:\S+)"), goal)
}

/// Last path segment of a repository URL without `.git`.
pub fn repo_name_from_url(url: &str) -> Option<String> {
    let last = url.trim_end_matches('/').rsplit(|c: char| c == '/' || c == ':').next()?;
    let name = last.strip_suffix(".git").unwrap_or(last);
    (!name.is_empty()).then(|| name.to_string())
}

/// Destination after `to` / `into`.
pub fn extract_dest_dir(goal: &str) -> Option<String> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    first_capture(cached(&RE, r"(?i)\b(?:to|into)\s+([\w./~-]+)"), goal)
}

pub fn mentions_tests(goal: &str) -> bool {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    let re = cached(
        &RE,
        r"(?i)\bpytest\b|\btest suite\b|\b(?:unit|integration)\s+tests?\b|\b(?:run|rerun|execute)\s+(?:the\s+)?tests?\b",
    );
    is_match(re, goal)
}

pub fn mentions_git_status(goal: &str) -> bool {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    is_match(cached(&RE, r"(?i)\bgit\s+status\b"), goal)
}

pub fn mentions_bootstrap(goal: &str) -> bool {
    let lower = goal.to_lowercase();
    ["bootstrap", "venv", "virtualenv"]
        .iter()
        .any(|token| lower.contains(token))
}

pub fn mentions_build(goal: &str) -> bool {
    goal.to_lowercase().contains("build")
}

// ─── File goals ──────────────────────────────────────────────────────────────

/// Absolute path ending in `.log`.
pub fn extract_log_path(goal: &str) -> Option<String> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    first_capture(cached(&RE, r"(/\S+\.log)\b"), goal)
}

/// Path after `to` / `at` / `in` / `into` / `path`, else after `file [named]`.
pub fn extract_file_path(goal: &str) -> Option<String> {
    static PREPOSITION: OnceLock<Option<Regex>> = OnceLock::new();
    static NAMED: OnceLock<Option<Regex>> = OnceLock::new();
    let raw = first_capture(
        cached(&PREPOSITION, r#"(?i)\b(?:to|at|in|into|path)\s+("[^"]+"|'[^']+'|\S+)"#),
        goal,
    )
    .or_else(|| {
        first_capture(
            cached(&NAMED, r#"(?i)\bfile\s+(?:named\s+)?("[^"]+"|'[^']+'|\S+)"#),
            goal,
        )
    })?;
    Some(unquote(&raw))
}

/// Quoted text after `content` / `text`.
pub fn extract_file_content(goal: &str) -> Option<String> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    let raw = first_capture(
        cached(&RE, r#"(?i)\b(?:content|text)\b\s*[:=]?\s*("[^"]+"|'[^']+')"#),
        goal,
    )?;
    Some(unquote(&raw))
}

/// `(path, content)` for "create / write / save ... file" goals.
pub fn extract_file_request(goal: &str) -> Option<(String, String)> {
    static VERB: OnceLock<Option<Regex>> = OnceLock::new();
    if !is_match(cached(&VERB, r"(?i)\b(?:create|write|save)\b"), goal) {
        return None;
    }
    let path = extract_file_path(goal)?;
    Some((path, extract_file_content(goal).unwrap_or_default()))
}

/// Path for "list / show ... files / directory" goals.
pub fn extract_list_request(goal: &str) -> Option<String> {
    static VERB: OnceLock<Option<Regex>> = OnceLock::new();
    static NOUN: OnceLock<Option<Regex>> = OnceLock::new();
    if !is_match(cached(&VERB, r"(?i)\b(?:list|show)\b"), goal) {
        return None;
    }
    if !is_match(
        cached(&NOUN, r"(?i)\b(?:files?|directory|dir|folders?)\b"),
        goal,
    ) {
        return None;
    }
    extract_file_path(goal)
}

// ─── Project detection ───────────────────────────────────────────────────────

/// Build command for the project at `root`, by marker file.
pub fn detect_build_command(root: &Path) -> &'static str {
    const MARKERS: &[(&str, &str)] = &[
        ("Cargo.toml", "cargo build"),
        ("pyproject.toml", "python -m build"),
        ("package.json", "npm run build"),
        ("Makefile", "make build"),
        ("CMakeLists.txt", "cmake --build build"),
    ];
    MARKERS
        .iter()
        .find(|(marker, _)| root.join(marker).exists())
        .map(|(_, command)| *command)
        .unwrap_or("make")
}

/// Test command for the project at `root`; pytest unless a marker says otherwise.
pub fn detect_test_command(root: &Path) -> &'static str {
    if root.join("Cargo.toml").exists() {
        "cargo test"
    } else if root.join("package.json").exists() {
        "npm test"
    } else {
        "pytest -q"
    }
}

/// Split a detected command into an argv.
pub fn argv_of(command: &str) -> Vec<String> {
    command.split_whitespace().map(str::to_string).collect()
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repo_url_and_name() {
        let goal = "clone https://github.com/acme/widgets.git into work/widgets";
        let url = extract_repo_url(goal).unwrap();
        assert_eq!(url, "https://github.com/acme/widgets.git");
        assert_eq!(repo_name_from_url(&url).as_deref(), Some("widgets"));
        assert_eq!(extract_dest_dir(goal).as_deref(), Some("work/widgets"));
        assert_eq!(
            repo_name_from_url("git@github.com:acme/tools.git").as_deref(),
            Some("tools")
        );
    }

    #[test]
    fn test_file_request_with_quoted_content() {
        let (path, content) =
            extract_file_request("Create a file named notes.txt with content 'hello world'").unwrap();
        assert_eq!(path, "notes.txt");
        assert_eq!(content, "hello world");

        let (path, content) = extract_file_request(r#"write "a b.txt" to "out/a b.txt""#).unwrap();
        assert_eq!(path, "out/a b.txt");
        assert_eq!(content, "");
        assert!(extract_file_request("read notes.txt").is_none());
    }

    #[test]
    fn test_list_request_needs_verb_and_noun() {
        assert_eq!(extract_list_request("list files in src").as_deref(), Some("src"));
        assert!(extract_list_request("list everything").is_none());
        assert!(extract_list_request("files in src").is_none());
    }

    #[test]
    fn test_test_and_status_phrasing() {
        assert!(mentions_tests("please run the tests"));
        assert!(mentions_tests("run pytest"));
        assert!(mentions_tests("check the unit tests"));
        assert!(!mentions_tests("write a test plan"));
        assert!(mentions_git_status("show git  status"));
        assert!(!mentions_git_status("git log"));
    }

    #[test]
    fn test_log_path() {
        assert_eq!(
            extract_log_path("tail /var/log/app/server.log please").as_deref(),
            Some("/var/log/app/server.log")
        );
        assert!(extract_log_path("tail the logs").is_none());
    }

    #[test]
    fn test_detect_commands_by_marker() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(detect_build_command(dir.path()), "make");
        assert_eq!(detect_test_command(dir.path()), "pytest -q");
        std::fs::write(dir.path().join("package.json"), "{}").unwrap();
        assert_eq!(detect_build_command(dir.path()), "npm run build");
        assert_eq!(detect_test_command(dir.path()), "npm test");
        std::fs::write(dir.path().join("Cargo.toml"), "").unwrap();
        assert_eq!(detect_build_command(dir.path()), "cargo build");
        assert_eq!(argv_of("cargo build"), vec!["cargo", "build"]);
    }
}
