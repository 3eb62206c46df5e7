//! Path canonicalization and traversal rejection (spec §4.D "Path Resolver").

use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rejected;

/// Resolves `request_path` (the raw request-target, e.g. `/../etc/passwd`)
/// against `root`, rejecting anything that escapes it — including through a
/// symlink, which is why this canonicalizes rather than just string-checks
/// (spec §4.D rationale).
pub fn resolve(root: &Path, request_path: &[u8]) -> Result<PathBuf, Rejected> {
    if contains_dotdot(request_path) {
        return Err(Rejected);
    }
    if memchr::memchr(0, request_path).is_some() {
        return Err(Rejected);
    }

    let request_str = std::str::from_utf8(request_path).map_err(|_| Rejected)?;
    let relative = request_str.trim_start_matches('/');
    let candidate = root.join(relative);

    let canonical_candidate = canonicalize_best_effort(&candidate)?;
    let canonical_root = root.canonicalize().map_err(|_| Rejected)?;

    if canonical_candidate == canonical_root {
        return Ok(canonical_candidate);
    }
    match canonical_candidate.strip_prefix(&canonical_root) {
        Ok(_) => Ok(canonical_candidate),
        Err(_) => Err(Rejected),
    }
}

/// `..` appearing anywhere, including as part of a longer segment name like
/// `a..b` — the spec step is "reject if `..` appears anywhere in
/// request_path" without qualifying "as a path segment", so this matches
/// the substring literally rather than only whole dot-segments.
fn contains_dotdot(path: &[u8]) -> bool {
    path.windows(2).any(|w| w == b"..")
}

/// Canonicalizes `candidate`; if it doesn't exist yet, canonicalizes its
/// parent and reattaches the final component (spec §4.D step 4), so a
/// traversal through a symlinked ancestor is still caught even when the
/// leaf file itself is missing.
fn canonicalize_best_effort(candidate: &Path) -> Result<PathBuf, Rejected> {
    if let Ok(canon) = candidate.canonicalize() {
        return Ok(canon);
    }
    let file_name = candidate.file_name().ok_or(Rejected)?;
    let parent = candidate.parent().ok_or(Rejected)?;
    let canon_parent = parent.canonicalize().map_err(|_| Rejected)?;
    Ok(canon_parent.join(file_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn rejects_literal_dotdot() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(resolve(dir.path(), b"/../etc/passwd"), Err(Rejected));
    }

    #[test]
    fn rejects_embedded_nul() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(resolve(dir.path(), b"/a\0b"), Err(Rejected));
    }

    #[test]
    fn resolves_existing_file_under_root() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("index.html"), b"hi").unwrap();
        let resolved = resolve(dir.path(), b"/index.html").unwrap();
        assert_eq!(resolved, dir.path().canonicalize().unwrap().join("index.html"));
    }

    #[test]
    fn resolves_missing_file_by_canonicalizing_parent() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        let resolved = resolve(dir.path(), b"/sub/missing.html").unwrap();
        assert_eq!(resolved, dir.path().canonicalize().unwrap().join("sub").join("missing.html"));
    }

    #[cfg(unix)]
    #[test]
    fn rejects_symlink_escaping_root() {
        use std::os::unix::fs::symlink;
        let dir = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        fs::write(outside.path().join("secret.txt"), b"nope").unwrap();
        symlink(outside.path().join("secret.txt"), dir.path().join("link.txt")).unwrap();
        assert_eq!(resolve(dir.path(), b"/link.txt"), Err(Rejected));
    }
}
