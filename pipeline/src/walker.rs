use std::path::{Path, PathBuf};

use anyhow::{bail, Error};
use walkdir::WalkDir;

fn is_hidden(entry: &walkdir::DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .map(|s| s.starts_with('.'))
            .unwrap_or(false)
}

/// Depth-first walk of `root`, yielding every regular file (symlinks and
/// hidden entries excluded) with its path relative to `root`.
///
/// A permission-denied error partway through the walk aborts the whole
/// backup rather than silently skipping the subtree, since a partial
/// snapshot that looks complete is worse than a loud failure.
pub fn walk_regular_files(root: &Path) -> Result<Vec<PathBuf>, Error> {
    let mut files = Vec::new();

    for entry in WalkDir::new(root)
        .same_file_system(true)
        .into_iter()
        .filter_entry(|e| !is_hidden(e))
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                if let Some(path) = err.path() {
                    bail!("cannot continue backup walk, error at {path:?}: {err}");
                }
                bail!("cannot continue backup walk: {err}");
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
        files.push(relative.to_path_buf());
    }

    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn walks_nested_regular_files_only() {
        let mut dir = std::env::temp_dir();
        dir.push(format!("strongbox-walker-test-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(dir.join("sub")).unwrap();
        fs::write(dir.join("a.txt"), b"a").unwrap();
        fs::write(dir.join("sub/b.txt"), b"b").unwrap();
        fs::create_dir_all(dir.join(".hidden")).unwrap();
        fs::write(dir.join(".hidden/c.txt"), b"c").unwrap();

        let files = walk_regular_files(&dir).unwrap();
        assert_eq!(files, vec![PathBuf::from("a.txt"), PathBuf::from("sub/b.txt")]);

        fs::remove_dir_all(&dir).ok();
    }
}
