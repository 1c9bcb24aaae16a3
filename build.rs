//! Embeds the git revision and enforces repository hygiene rules at build time.

use std::path::{Path, PathBuf};
use std::process::Command;

const MAX_LINES: usize = 750;
const CHECKED_EXTENSIONS: &[&str] = &["rs", "md", "yaml", "toml"];
const EXCLUDED_DIRS: &[&str] = &["target", ".git", "examples"];
const EXCLUDED_FILES: &[&str] = &["Cargo.lock"];

/// Variables the monitor reads; tests touching them share process state.
const MONITOR_ENV_VARS: &[&str] = &[
    "AG_MONITOR_HOME",
    "AG_MONITOR_CLIENT_SECRET",
    "AG_MONITOR_LOG",
];
const SKIP_MARKERS: &[&str] = &[
    "Skipping test",
    "skipping test",
    "Test skipped",
    "test skipped",
];

struct Violation {
    path: PathBuf,
    line: usize,
    note: String,
}

/// A `#[test]` function located in a source file.
struct TestFn<'a> {
    name: String,
    line: usize,
    serial: bool,
    body: Vec<(usize, &'a str)>,
}

fn main() {
    for watched in [".git/HEAD", ".git/refs/heads/main", ".git/packed-refs"] {
        println!("cargo:rerun-if-changed={}", watched);
    }
    println!("cargo:rustc-env=AG_MONITOR_GIT_SHA={}", git_sha());

    let root = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let files = tracked_files(&root);
    for file in &files {
        println!("cargo:rerun-if-changed={}", file.display());
    }

    let sources: Vec<(PathBuf, String)> = files
        .iter()
        .filter_map(|file| {
            let rel = file.strip_prefix(&root).unwrap_or(file).to_path_buf();
            match std::fs::read_to_string(file) {
                Ok(content) => Some((rel, content)),
                Err(e) => {
                    println!("cargo:warning=Could not read {}: {}", rel.display(), e);
                    None
                }
            }
        })
        .collect();
    let rust: Vec<&(PathBuf, String)> = sources
        .iter()
        .filter(|(path, _)| {
            path.extension().is_some_and(|e| e == "rs") && path.as_path() != Path::new("build.rs")
        })
        .collect();

    fail(
        &format!("files over {} non-empty lines; split them", MAX_LINES),
        oversized_files(&sources),
    );
    fail(
        "#[allow(dead_code)] found; delete the code or gate it with #[cfg(test)]",
        rust.iter().flat_map(|(path, content)| dead_code_allows(path, content)).collect(),
    );
    fail(
        "tests that skip instead of failing",
        rust.iter().flat_map(|(path, content)| silent_skips(path, content)).collect(),
    );
    fail(
        "tests that mutate the environment without #[serial]",
        rust.iter().flat_map(|(path, content)| unserialized_env(path, content)).collect(),
    );
}

fn git_sha() -> String {
    Command::new("git")
        .args(["rev-parse", "HEAD"])
        .output()
        .ok()
        .filter(|output| output.status.success())
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|sha| sha.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn fail(title: &str, violations: Vec<Violation>) {
    if violations.is_empty() {
        return;
    }
    eprintln!("\n{} ({}):", title, violations.len());
    for v in &violations {
        eprintln!("  {}:{}  {}", v.path.display(), v.line, v.note);
    }
    panic!("Build failed: {}", title);
}

/// Tracked files when git is available, otherwise a filtered directory walk.
fn tracked_files(root: &Path) -> Vec<PathBuf> {
    let listed = Command::new("git")
        .arg("ls-files")
        .current_dir(root)
        .output()
        .ok()
        .filter(|output| output.status.success())
        .and_then(|output| String::from_utf8(output.stdout).ok());
    match listed {
        Some(listing) => listing
            .lines()
            .map(|line| root.join(line))
            .filter(|path| is_checked(root, path))
            .collect(),
        None => {
            let mut files = Vec::new();
            walk(root, root, &mut files);
            files
        }
    }
}

fn walk(root: &Path, dir: &Path, files: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for path in entries.flatten().map(|entry| entry.path()) {
        if path.is_dir() {
            let excluded = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|name| EXCLUDED_DIRS.contains(&name));
            if !excluded {
                walk(root, &path, files);
            }
        } else if is_checked(root, &path) {
            files.push(path);
        }
    }
}

fn is_checked(root: &Path, path: &Path) -> bool {
    let ext_ok = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| CHECKED_EXTENSIONS.contains(&ext));
    let Ok(rel) = path.strip_prefix(root) else {
        return ext_ok;
    };
    ext_ok
        && !EXCLUDED_FILES.iter().any(|f| rel == Path::new(f))
        && !rel
            .components()
            .filter_map(|c| c.as_os_str().to_str())
            .any(|name| EXCLUDED_DIRS.contains(&name))
}

fn oversized_files(sources: &[(PathBuf, String)]) -> Vec<Violation> {
    sources
        .iter()
        .filter_map(|(path, content)| {
            let count = content.lines().filter(|l| !l.trim().is_empty()).count();
            (count > MAX_LINES).then(|| Violation {
                path: path.clone(),
                line: 1,
                note: format!("{} lines", count),
            })
        })
        .collect()
}

fn dead_code_allows(path: &Path, content: &str) -> Vec<Violation> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| {
            let t = line.trim();
            (t.starts_with("#[allow(") || t.starts_with("#![allow(")) && t.contains("dead_code")
        })
        .map(|(i, line)| Violation {
            path: path.to_path_buf(),
            line: i + 1,
            note: line.trim().to_string(),
        })
        .collect()
}

/// Splits a file into its test functions by attribute and brace depth.
fn test_fns(content: &str) -> Vec<TestFn<'_>> {
    let lines: Vec<&str> = content.lines().collect();
    let mut found = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        let t = lines[i].trim();
        if t != "#[test]" && !t.starts_with("#[tokio::test") {
            i += 1;
            continue;
        }
        let attrs_from = (0..i)
            .rev()
            .take_while(|&k| lines[k].trim().starts_with("#["))
            .last()
            .unwrap_or(i);
        let mut serial = (attrs_from..i).any(|k| is_serial_attr(lines[k]));
        let Some(sig) = (i + 1..lines.len().min(i + 6)).find(|&k| lines[k].contains("fn ")) else {
            i += 1;
            continue;
        };
        serial |= (i + 1..sig).any(|k| is_serial_attr(lines[k]));
        let name = lines[sig]
            .split("fn ")
            .nth(1)
            .and_then(|rest| rest.split('(').next())
            .unwrap_or_default()
            .trim()
            .to_string();

        let mut depth = 0i32;
        let mut opened = false;
        let mut body = Vec::new();
        let mut k = sig;
        while k < lines.len() {
            for c in lines[k].chars() {
                match c {
                    '{' => {
                        depth += 1;
                        opened = true;
                    }
                    '}' => depth -= 1,
                    _ => {}
                }
            }
            body.push((k + 1, lines[k]));
            if opened && depth <= 0 {
                break;
            }
            k += 1;
        }
        found.push(TestFn {
            name,
            line: i + 1,
            serial,
            body,
        });
        i = k + 1;
    }
    found
}

fn is_serial_attr(line: &str) -> bool {
    matches!(line.trim(), "#[serial]" | "#[serial_test::serial]")
}

fn silent_skips(path: &Path, content: &str) -> Vec<Violation> {
    test_fns(content)
        .into_iter()
        .filter_map(|test| {
            let mut depth = 0i32;
            let note = test.body.iter().find_map(|(_, line)| {
                if let Some(marker) = SKIP_MARKERS.iter().find(|m| line.contains(*m)) {
                    return Some(format!("`{}` prints \"{}\"", test.name, marker));
                }
                let early_return = line.trim() == "return;" && depth > 1;
                depth += line.matches('{').count() as i32 - line.matches('}').count() as i32;
                early_return.then(|| format!("`{}` returns early from a nested block", test.name))
            })?;
            Some(Violation {
                path: path.to_path_buf(),
                line: test.line,
                note,
            })
        })
        .collect()
}

fn unserialized_env(path: &Path, content: &str) -> Vec<Violation> {
    test_fns(content)
        .into_iter()
        .filter(|test| !test.serial)
        .filter_map(|test| {
            let (line, code) = test.body.iter().find(|(_, line)| {
                let t = line.trim();
                !t.starts_with("//")
                    && (t.contains("env::set_var")
                        || t.contains("env::remove_var")
                        || MONITOR_ENV_VARS.iter().any(|var| t.contains(var)))
            })?;
            Some(Violation {
                path: path.to_path_buf(),
                line: *line,
                note: format!("`{}`: {}", test.name, code.trim()),
            })
        })
        .collect()
}
