//! Path helpers shared by the filesystem-touching handlers.

use std::path::{Path, PathBuf};

/// Joins `arg` onto the current virtual directory, normalizing `.` and
/// `..` lexically. `..` cannot climb above the virtual root, so the
/// result is always safe to map under the base directory.
pub fn virtual_path(current_dir: &str, arg: &str) -> String {
    let joined = if arg.starts_with('/') {
        arg.to_string()
    } else {
        format!("{}/{}", current_dir.trim_end_matches('/'), arg)
    };
    let mut parts: Vec<&str> = Vec::new();
    for part in joined.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            part => parts.push(part),
        }
    }
    format!("/{}", parts.join("/"))
}

/// Maps a normalized virtual path onto the configured base directory.
pub fn real_path(base: &str, virtual_path: &str) -> PathBuf {
    Path::new(base).join(virtual_path.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_paths_join_current_dir() {
        assert_eq!(virtual_path("/pub", "file.bin"), "/pub/file.bin");
        assert_eq!(virtual_path("/", "pub/file.bin"), "/pub/file.bin");
    }

    #[test]
    fn absolute_paths_ignore_current_dir() {
        assert_eq!(virtual_path("/pub", "/incoming/x"), "/incoming/x");
    }

    #[test]
    fn dot_segments_normalized() {
        assert_eq!(virtual_path("/pub", "./a/../b"), "/pub/b");
        assert_eq!(virtual_path("/pub", ".."), "/");
    }

    #[test]
    fn traversal_cannot_escape_root() {
        assert_eq!(virtual_path("/", "../../../etc/passwd"), "/etc/passwd");
        let real = real_path("/srv/ftp", &virtual_path("/", "../../x"));
        assert!(real.starts_with("/srv/ftp"));
    }
}
