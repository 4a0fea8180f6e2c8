use anyhow::Result;
use ignore::WalkBuilder;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use tracing::{debug, warn};

/// Files under `root` accepted by `predicate`, sorted by path. Only direct children are
/// visited unless `recursive` is set. Hidden and git-ignored files are not special.
pub fn enumerate<F>(root: &Path, recursive: bool, predicate: F) -> Result<Vec<PathBuf>>
where
    F: Fn(&Path) -> bool + Sync,
{
    let (tx, rx) = mpsc::channel();

    let mut builder = WalkBuilder::new(root);
    builder
        .hidden(false)
        .ignore(false)
        .parents(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false);
    if !recursive {
        builder.max_depth(Some(1));
    }
    let walker = builder.build_parallel();

    let predicate = &predicate;
    walker.run(|| {
        let tx = tx.clone();
        Box::new(move |entry| {
            match entry {
                Ok(entry) => {
                    let path = entry.path();
                    if entry.file_type().is_some_and(|t| t.is_file()) {
                        if predicate(path) {
                            let _ = tx.send(Ok(path.to_path_buf()));
                        } else {
                            debug!(path = %path.display(), "skip file");
                        }
                    }
                }
                Err(err) => {
                    let _ = tx.send(Err(err));
                }
            }
            ignore::WalkState::Continue
        })
    });

    drop(tx);
    let mut files = Vec::new();
    for result in rx.iter() {
        match result {
            Ok(path) => files.push(path),
            Err(err) => warn!(error = %err, "skip unreadable path"),
        }
    }
    files.sort();
    Ok(files)
}

pub fn mirror_path(root: &Path, path: &Path, output: &Path) -> PathBuf {
    match path.strip_prefix(root) {
        Ok(relative) => output.join(relative),
        Err(_) => output.join(path.file_name().unwrap_or(path.as_os_str())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn temp_dir(prefix: &str) -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!(
            "{prefix}-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        p
    }

    fn is_class(path: &Path) -> bool {
        path.extension().is_some_and(|e| e == "class")
    }

    #[test]
    fn enumerate_respects_recursion_flag() {
        let base = temp_dir("class-stubber-scan");
        fs::create_dir_all(base.join("a/b")).unwrap();
        fs::write(base.join("Top.class"), b"x").unwrap();
        fs::write(base.join("notes.txt"), b"x").unwrap();
        fs::write(base.join("a/Mid.class"), b"x").unwrap();
        fs::write(base.join("a/b/.Hidden.class"), b"x").unwrap();

        let flat = enumerate(&base, false, is_class).unwrap();
        assert_eq!(flat, vec![base.join("Top.class")]);

        let deep = enumerate(&base, true, is_class).unwrap();
        assert_eq!(
            deep,
            vec![
                base.join("Top.class"),
                base.join("a/Mid.class"),
                base.join("a/b/.Hidden.class"),
            ]
        );
        let _ = fs::remove_dir_all(&base);
    }

    #[test]
    fn walk_errors_are_logged_not_dropped() {
        let missing = temp_dir("class-stubber-missing");
        let mut files = None;
        let logs = crate::test_support::capture_logs(|| {
            files = Some(enumerate(&missing, true, is_class).unwrap());
        });
        assert_eq!(files, Some(Vec::new()));
        assert!(logs.contains("skip unreadable path"), "logs: {logs}");
    }

    #[test]
    fn mirror_path_keeps_relative_layout() {
        assert_eq!(
            mirror_path(Path::new("/in"), Path::new("/in/a/B.class"), Path::new("/out")),
            PathBuf::from("/out/a/B.class")
        );
    }
}
