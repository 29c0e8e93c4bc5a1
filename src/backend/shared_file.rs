//! Line-level edits for files the kiosk shares with other software
//! (`.bashrc`, session autostart scripts, `rc.local`, crontabs).
//!
//! Content is always read in full, rewritten with targeted line changes and
//! written back; bytes outside the touched lines are preserved exactly.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use crate::error::ProbeError;

/// Read a file, treating "not there" as `None` rather than an error.
pub fn read_optional(path: &Path) -> Result<Option<String>, ProbeError> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(source) => Err(ProbeError::Read {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Write via a temp file + rename in the same directory so a reader never
/// sees a half-written file. A symlinked target (dotfile managers) is
/// followed, so the link survives and its target gets the new content.
pub fn write_atomic(path: &Path, content: &str, mode: Option<u32>) -> std::io::Result<()> {
    let path = match fs::canonicalize(path) {
        Ok(real) => real,
        Err(e) if e.kind() == ErrorKind::NotFound => path.to_path_buf(),
        Err(e) => return Err(e),
    };
    let dir = path
        .parent()
        .ok_or_else(|| std::io::Error::new(ErrorKind::InvalidInput, "path has no parent"))?;
    fs::create_dir_all(dir)?;

    let file_name = path
        .file_name()
        .ok_or_else(|| std::io::Error::new(ErrorKind::InvalidInput, "path has no file name"))?;
    let tmp = dir.join(format!(".{}.tmp", file_name.to_string_lossy()));

    let result = fs::write(&tmp, content)
        .and_then(|()| match_original(&tmp, &path, dir, mode))
        .and_then(|()| fs::rename(&tmp, &path));
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

/// Give the temp file the mode (rc.local must stay executable) and, when
/// running as root for another user, the owner of whatever it replaces.
fn match_original(tmp: &Path, path: &Path, dir: &Path, mode: Option<u32>) -> std::io::Result<()> {
    use std::os::unix::fs::{MetadataExt, PermissionsExt};

    let existing = fs::metadata(path).ok();
    let mode = mode.or_else(|| existing.as_ref().map(|m| m.permissions().mode() & 0o7777));
    if let Some(mode) = mode {
        fs::set_permissions(tmp, fs::Permissions::from_mode(mode))?;
    }

    if nix::unistd::geteuid().is_root() {
        let owner = match existing {
            Some(meta) => meta,
            None => fs::metadata(dir)?,
        };
        std::os::unix::fs::chown(tmp, Some(owner.uid()), Some(owner.gid()))?;
    }
    Ok(())
}

/// Remove a file; a file that is already gone is fine.
pub fn remove_file(path: &Path) -> std::io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// First line (without its terminator) matching `pred`.
pub fn find_line<'a>(content: &'a str, pred: impl Fn(&str) -> bool) -> Option<&'a str> {
    content.lines().find(|&line| pred(line))
}

/// Drop every line matching `pred`. Returns the new content and how many
/// lines went away.
pub fn remove_lines(content: &str, pred: impl Fn(&str) -> bool) -> (String, usize) {
    let mut kept = String::with_capacity(content.len());
    let mut removed = 0;
    for segment in content.split_inclusive('\n') {
        let line = segment.trim_end_matches('\n').trim_end_matches('\r');
        if pred(line) {
            removed += 1;
        } else {
            kept.push_str(segment);
        }
    }
    (kept, removed)
}

/// Append `line`, adding a separating newline if the content lacks one.
pub fn append_line(content: &str, line: &str) -> String {
    let mut out = String::with_capacity(content.len() + line.len() + 2);
    out.push_str(content);
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(line);
    out.push('\n');
    out
}

/// Insert `line` before the last `exit 0`, as `rc.local` requires.
/// Falls back to appending when there is none.
pub fn insert_before_exit(content: &str, line: &str) -> String {
    let segments: Vec<&str> = content.split_inclusive('\n').collect();
    let exit_idx = segments
        .iter()
        .rposition(|s| s.trim() == "exit 0");
    match exit_idx {
        Some(idx) => {
            let mut out = String::with_capacity(content.len() + line.len() + 1);
            for s in &segments[..idx] {
                out.push_str(s);
            }
            out.push_str(line);
            out.push('\n');
            for s in &segments[idx..] {
                out.push_str(s);
            }
            out
        }
        None => append_line(content, line),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remove_lines_keeps_other_bytes() {
        let content = "# ~/.bashrc\r\nalias ll='ls -l'\n\nrun kiosk # tag\nexport A=1";
        let (out, n) = remove_lines(content, |l| l.contains("# tag"));
        assert_eq!(n, 1);
        assert_eq!(out, "# ~/.bashrc\r\nalias ll='ls -l'\n\nexport A=1");
    }

    #[test]
    fn remove_lines_last_line_without_newline() {
        let (out, n) = remove_lines("a\nkiosk", |l| l == "kiosk");
        assert_eq!(n, 1);
        assert_eq!(out, "a\n");
    }

    #[test]
    fn append_adds_missing_newline() {
        assert_eq!(append_line("a", "b"), "a\nb\n");
        assert_eq!(append_line("a\n", "b"), "a\nb\n");
        assert_eq!(append_line("", "b"), "b\n");
    }

    #[test]
    fn insert_before_final_exit() {
        let rc = "#!/bin/sh -e\nif true; then\n  exit 0\nfi\nexit 0\n";
        assert_eq!(
            insert_before_exit(rc, "kiosk &"),
            "#!/bin/sh -e\nif true; then\n  exit 0\nfi\nkiosk &\nexit 0\n"
        );
        assert_eq!(insert_before_exit("#!/bin/sh\n", "kiosk &"), "#!/bin/sh\nkiosk &\n");
    }

    #[test]
    fn atomic_write_creates_dirs_and_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a/b/file.txt");
        write_atomic(&path, "hello\n", Some(0o644)).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "hello\n");
        let names: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .flatten()
            .map(|e| e.file_name())
            .collect();
        assert_eq!(names.len(), 1);
    }

    #[test]
    fn atomic_write_keeps_existing_mode() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rc.local");
        fs::write(&path, "exit 0\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        write_atomic(&path, "echo hi\nexit 0\n", None).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o755);
    }

    #[test]
    fn atomic_write_through_symlink_keeps_link() {
        let dir = tempfile::tempdir().unwrap();
        let real = dir.path().join("dotfiles/bashrc");
        fs::create_dir_all(real.parent().unwrap()).unwrap();
        fs::write(&real, "export A=1\n").unwrap();
        let link = dir.path().join(".bashrc");
        std::os::unix::fs::symlink(&real, &link).unwrap();

        write_atomic(&link, "export A=2\n", None).unwrap();
        assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
        assert_eq!(fs::read_to_string(&real).unwrap(), "export A=2\n");
    }

    #[test]
    fn failed_atomic_write_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        // Renaming a file over a non-empty directory fails.
        let target = dir.path().join("busy");
        fs::create_dir_all(target.join("inner")).unwrap();
        assert!(write_atomic(&target, "x\n", Some(0o644)).is_err());
        assert!(!dir.path().join(".busy.tmp").exists());
    }

    #[test]
    fn missing_file_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_optional(&dir.path().join("x")).unwrap().is_none());
        assert!(!remove_file(&dir.path().join("x")).unwrap());
    }
}
