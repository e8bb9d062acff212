use std::path::{Path, PathBuf};
use std::process::Command;

const MAX_LINES: usize = 750;

const CHECKED_EXTENSIONS: &[&str] = &["rs", "md", "yaml", "toml"];

const EXCLUDED_DIRS: &[&str] = &["target", ".git", "examples"];

const SKIP_PATTERNS: &[&str] = &["Skipping test", "skipping test", "Test skipped", "test skipped"];

const ENV_MUTATIONS: &[&str] = &["env::set_var", "env::remove_var"];

type Violation = (PathBuf, usize, String);

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/heads/main");

    let sha = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|output| output.status.success())
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|sha| sha.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    println!("cargo:rustc-env=CMMN_ENGINE_GIT_SHA={}", sha);

    let root = PathBuf::from(std::env::var("CARGO_MANIFEST_DIR").unwrap_or_else(|_| ".".into()));
    let mut files = Vec::new();
    walk(&root, &mut files);
    for file in &files {
        println!("cargo:rerun-if-changed={}", file.display());
    }

    let sources: Vec<(PathBuf, String)> = files
        .iter()
        .filter_map(|path| {
            let content = std::fs::read_to_string(path).ok()?;
            let relative = path.strip_prefix(&root).unwrap_or(path).to_path_buf();
            Some((relative, content))
        })
        .collect();

    fail_on(
        "FILE LINE LIMIT EXCEEDED",
        "Split these files into smaller modules.",
        line_limit_violations(&sources),
    );
    let rust: Vec<&(PathBuf, String)> = sources
        .iter()
        .filter(|(path, _)| {
            path.extension().is_some_and(|ext| ext == "rs") && !path.ends_with("build.rs")
        })
        .collect();
    fail_on(
        "#[allow(dead_code)] IS NOT ALLOWED",
        "Delete unused code or gate test helpers behind #[cfg(test)].",
        dead_code_violations(&rust),
    );
    fail_on(
        "TEST RULES VIOLATED",
        "Tests must fail instead of skipping, and env mutations need #[serial].",
        test_body_violations(&rust),
    );
}

fn walk(dir: &Path, files: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for path in entries.flatten().map(|entry| entry.path()) {
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        if path.is_dir() {
            if !EXCLUDED_DIRS.contains(&name) {
                walk(&path, files);
            }
        } else if path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| CHECKED_EXTENSIONS.contains(&ext))
        {
            files.push(path);
        }
    }
}

fn line_limit_violations(sources: &[(PathBuf, String)]) -> Vec<Violation> {
    sources
        .iter()
        .filter_map(|(path, content)| {
            let lines = content.lines().filter(|line| !line.trim().is_empty()).count();
            (lines > MAX_LINES).then(|| {
                (
                    path.clone(),
                    0,
                    format!("{} non-empty lines (max {})", lines, MAX_LINES),
                )
            })
        })
        .collect()
}

fn dead_code_violations(sources: &[&(PathBuf, String)]) -> Vec<Violation> {
    let mut violations = Vec::new();
    for (path, content) in sources {
        for (number, line) in content.lines().enumerate() {
            let trimmed = line.trim();
            if (trimmed.starts_with("#[allow(") || trimmed.starts_with("#![allow("))
                && trimmed.contains("dead_code")
            {
                violations.push((path.clone(), number + 1, trimmed.to_string()));
            }
        }
    }
    violations
}

/// Scans each test body for silent skips and unserialized env mutations.
fn test_body_violations(sources: &[&(PathBuf, String)]) -> Vec<Violation> {
    let mut violations = Vec::new();
    for (path, content) in sources {
        let mut serial = false;
        let mut test_start: Option<usize> = None;
        let mut depth = 0i32;
        let mut entered = false;
        for (number, line) in content.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed == "#[serial]" || trimmed == "#[serial_test::serial]" {
                serial = true;
            }
            if trimmed == "#[test]" || trimmed.starts_with("#[tokio::test") {
                test_start = Some(number + 1);
                depth = 0;
                entered = false;
                continue;
            }
            let Some(start) = test_start else {
                continue;
            };
            for c in line.chars() {
                match c {
                    '{' => {
                        depth += 1;
                        entered = true;
                    }
                    '}' => depth -= 1,
                    _ => {}
                }
            }
            let commented = trimmed.starts_with("//");
            let problem = if SKIP_PATTERNS.iter().any(|p| line.contains(p)) {
                Some("silently skips")
            } else if trimmed == "return;" && depth > 1 {
                Some("returns early")
            } else if !serial && !commented && ENV_MUTATIONS.iter().any(|p| trimmed.contains(p)) {
                Some("mutates env without #[serial]")
            } else {
                None
            };
            if let Some(problem) = problem {
                violations.push((path.clone(), start, format!("test {}", problem)));
                test_start = None;
                serial = false;
            } else if entered && depth == 0 {
                test_start = None;
                serial = false;
            }
        }
    }
    violations
}

fn fail_on(title: &str, advice: &str, violations: Vec<Violation>) {
    if violations.is_empty() {
        return;
    }
    eprintln!("\n========================================");
    eprintln!("{}", title);
    eprintln!("========================================");
    for (path, line, message) in &violations {
        eprintln!("  {}:{} {}", path.display(), line, message);
    }
    eprintln!("\n{}\n", advice);
    panic!("Build failed: {} violation(s): {}", violations.len(), title);
}
