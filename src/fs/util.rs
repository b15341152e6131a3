//! Path helpers and the OS-level open-file probe.

use std::path::Path;

/// Canonicalize slashes the way the sync pipeline expects them: directories
/// carry a trailing `/`, files do not, and doubled slashes are collapsed.
pub fn fix_path_slashes(path: &str) -> String {
    let mut fixed = path.to_string();
    while fixed.contains("//") {
        fixed = fixed.replace("//", "/");
    }
    if Path::new(&fixed).is_dir() {
        if !fixed.ends_with('/') {
            fixed.push('/');
        }
    } else if fixed.len() > 1 && fixed.ends_with('/') {
        fixed.pop();
    }
    fixed
}

/// Whether the path exists and is reachable.
pub fn validate_path(path: &str) -> bool {
    Path::new(path).exists()
}

/// Ask the OS whether any process currently holds `path` open, by scanning
/// the fd tables under /proc. Unreadable entries (permissions, raced
/// process exit) are skipped.
pub fn is_file_open(path: &str) -> bool {
    let target = Path::new(path);
    let proc_root = match std::fs::read_dir("/proc") {
        Ok(entries) => entries,
        Err(_) => return false,
    };
    for entry in proc_root.flatten() {
        let name = entry.file_name();
        let Some(pid) = name.to_str() else { continue };
        if !pid.bytes().all(|b| b.is_ascii_digit()) {
            continue;
        }
        let fd_dir = entry.path().join("fd");
        let Ok(fds) = std::fs::read_dir(&fd_dir) else {
            continue;
        };
        for fd in fds.flatten() {
            if let Ok(link) = std::fs::read_link(fd.path()) {
                if link == target {
                    return true;
                }
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Write;
    use std::path::PathBuf;

    struct TempDirGuard(PathBuf);
    impl TempDirGuard {
        fn new(prefix: &str) -> Self {
            let mut p = std::env::temp_dir();
            let ts = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos();
            p.push(format!("{}_{}_{}", prefix, std::process::id(), ts));
            fs::create_dir_all(&p).unwrap();
            TempDirGuard(p)
        }
        fn path(&self) -> &Path {
            &self.0
        }
    }
    impl Drop for TempDirGuard {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.0);
        }
    }

    #[test]
    fn directories_gain_trailing_slash_and_files_lose_it() {
        let tmp = TempDirGuard::new("fsrsync_slashes");
        let dir = tmp.path().to_str().unwrap().to_string();
        let fixed_dir = fix_path_slashes(&dir);
        assert!(fixed_dir.ends_with('/'), "fixed_dir={}", fixed_dir);

        let file = tmp.path().join("a.txt");
        fs::write(&file, b"x").unwrap();
        let with_slash = format!("{}/", file.display());
        assert_eq!(fix_path_slashes(&with_slash), file.to_str().unwrap());
    }

    #[test]
    fn doubled_slashes_collapse() {
        assert_eq!(fix_path_slashes("/tmp//nope///x"), "/tmp/nope/x");
    }

    #[test]
    fn validate_path_checks_existence() {
        assert!(validate_path("/tmp"));
        assert!(!validate_path("/definitely/not/here/fsrsync"));
    }

    #[test]
    fn open_file_is_detected_via_proc() {
        let tmp = TempDirGuard::new("fsrsync_is_open");
        let file_path = tmp.path().join("held.txt");
        let mut held = fs::File::create(&file_path).unwrap();
        held.write_all(b"held").unwrap();
        // Our own process holds the handle, so the /proc scan must find it.
        assert!(is_file_open(file_path.to_str().unwrap()));
        drop(held);
        assert!(!is_file_open(file_path.to_str().unwrap()));
    }
}
