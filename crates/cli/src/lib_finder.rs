//! Library module location.
//!
//! Bundled library modules are plain `.ja`/`.jb` files looked up by name.
//! The search order is: every entry of the `JV_LIB_PATH` environment
//! variable (colon-separated), then a `lib/` directory beside the running
//! executable, then the current directory.

use std::path::PathBuf;

const EXTENSIONS: [&str; 2] = ["ja", "jb"];

/// Returns the directories searched for library modules.
pub fn search_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Ok(paths) = std::env::var("JV_LIB_PATH") {
        for entry in paths.split(':').filter(|p| !p.is_empty()) {
            dirs.push(PathBuf::from(entry));
        }
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            dirs.push(dir.join("lib"));
        }
    }
    dirs.push(PathBuf::from("."));
    dirs
}

/// Locates the file backing a library module, if any.
pub fn find_module(name: &str) -> Option<PathBuf> {
    for dir in search_dirs() {
        for ext in EXTENSIONS {
            let candidate = dir.join(format!("{name}.{ext}"));
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }
    None
}

/// Lists every library module file under the search directories, used to
/// pre-register importable modules with the VM.
pub fn all_modules() -> Vec<PathBuf> {
    let mut found = Vec::new();
    for dir in search_dirs() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
            if EXTENSIONS.contains(&ext) {
                found.push(path);
            }
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_modules_through_the_lib_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("geometry.ja"), "module geometry\n  exit 0\n").unwrap();
        std::env::set_var("JV_LIB_PATH", dir.path());

        let found = find_module("geometry").expect("module on the lib path");
        assert_eq!(found, dir.path().join("geometry.ja"));
        assert!(find_module("no_such_module").is_none());
        assert!(all_modules().contains(&found));

        std::env::remove_var("JV_LIB_PATH");
    }
}
