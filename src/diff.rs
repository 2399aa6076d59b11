use std::path::Path;

use regex::Regex;
use tracing::warn;

/// Extract the source file paths named by a unified diff's `+++`/`---`
/// headers, skipping `/dev/null` and test files. Sorted and deduplicated.
pub fn source_files_from_diff(diff: &str) -> Vec<String> {
    let header_re = Regex::new(r"^(?:\+\+\+|---) [ab]/(.+)$").unwrap();

    let mut files: Vec<String> = diff
        .lines()
        .filter_map(|line| header_re.captures(line))
        .map(|caps| caps[1].to_string())
        .filter(|f| !f.starts_with("/dev/null") && !is_test_file(f))
        .collect();

    files.sort();
    files.dedup();
    files
}

fn is_test_file(path: &str) -> bool {
    let name = Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(path);
    name.starts_with("test") || path.starts_with("tests/")
}

/// Build the prompt context block from the working-copy content of the given
/// files. Missing or unreadable files are skipped with a warning.
pub fn build_file_context(repo_path: &Path, files: &[String]) -> String {
    let mut context = String::new();
    for file in files {
        let path = repo_path.join(file);
        match std::fs::read_to_string(&path) {
            Ok(content) => {
                context.push_str(&format!("FILE: {file}\n```\n{content}\n```\n\n"));
            }
            Err(e) => {
                warn!(file, error = %e, "skipping unreadable file");
            }
        }
    }
    context
}

/// Truncate to at most `max` characters, on a character boundary.
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
