//! Directory relocation helpers
//!
//! Every phase hands state to the next one by moving or copying directory
//! trees. Moves prefer `rename` and fall back to copy+delete when the source
//! and destination sit on different filesystems (the v2 cache usually does).

use crate::error::{ShimError, ShimResult};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

/// Recursively copy a directory tree, preserving symlinks
pub fn copy_dir(src: &Path, dst: &Path) -> ShimResult<()> {
    fs::create_dir_all(dst).map_err(|e| ShimError::io(format!("creating {}", dst.display()), e))?;

    let entries =
        fs::read_dir(src).map_err(|e| ShimError::io(format!("reading {}", src.display()), e))?;

    for entry in entries {
        let entry = entry.map_err(|e| ShimError::io(format!("reading {}", src.display()), e))?;
        let from = entry.path();
        let to = dst.join(entry.file_name());

        let file_type = entry
            .file_type()
            .map_err(|e| ShimError::io(format!("stat {}", from.display()), e))?;

        if file_type.is_dir() {
            copy_dir(&from, &to)?;
        } else if file_type.is_symlink() {
            let target = fs::read_link(&from)
                .map_err(|e| ShimError::io(format!("readlink {}", from.display()), e))?;
            #[cfg(unix)]
            std::os::unix::fs::symlink(&target, &to)
                .map_err(|e| ShimError::io(format!("symlink {}", to.display()), e))?;
        } else {
            copy_file(&from, &to)?;
        }
    }

    Ok(())
}

/// Copy a single file, preserving permissions
pub fn copy_file(src: &Path, dst: &Path) -> ShimResult<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| ShimError::io(format!("creating {}", parent.display()), e))?;
    }
    fs::copy(src, dst).map_err(|e| {
        ShimError::io(format!("copying {} to {}", src.display(), dst.display()), e)
    })?;
    Ok(())
}

/// Move a directory tree, creating the destination's parent as needed
pub fn move_dir(src: &Path, dst: &Path) -> ShimResult<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| ShimError::io(format!("creating {}", parent.display()), e))?;
    }

    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        // EXDEV only: cache and layers may live on different mounts
        Err(e) if e.kind() == ErrorKind::CrossesDevices => {
            copy_dir(src, dst)?;
            fs::remove_dir_all(src)
                .map_err(|e| ShimError::io(format!("removing {}", src.display()), e))
        }
        Err(e) => Err(ShimError::io(
            format!("moving {} to {}", src.display(), dst.display()),
            e,
        )),
    }
}

/// Move every entry of `src` into `dst`, merging with what is already there
pub fn move_dir_contents(src: &Path, dst: &Path) -> ShimResult<()> {
    fs::create_dir_all(dst).map_err(|e| ShimError::io(format!("creating {}", dst.display()), e))?;

    let entries =
        fs::read_dir(src).map_err(|e| ShimError::io(format!("reading {}", src.display()), e))?;

    for entry in entries {
        let entry = entry.map_err(|e| ShimError::io(format!("reading {}", src.display()), e))?;
        let from = entry.path();
        let to = dst.join(entry.file_name());

        if from.is_dir() && !from.is_symlink() {
            move_dir(&from, &to)?;
        } else {
            match fs::rename(&from, &to) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::CrossesDevices => {
                    copy_file(&from, &to)?;
                    fs::remove_file(&from)
                        .map_err(|e| ShimError::io(format!("removing {}", from.display()), e))?;
                }
                Err(e) => {
                    return Err(ShimError::io(
                        format!("moving {} to {}", from.display(), to.display()),
                        e,
                    ))
                }
            }
        }
    }

    fs::remove_dir_all(src).map_err(|e| ShimError::io(format!("removing {}", src.display()), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn copies_nested_tree() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        fs::create_dir_all(src.join("nested")).unwrap();
        fs::write(src.join("a.txt"), "a").unwrap();
        fs::write(src.join("nested/b.txt"), "b").unwrap();

        let dst = temp.path().join("dst");
        copy_dir(&src, &dst).unwrap();

        assert_eq!(fs::read_to_string(dst.join("a.txt")).unwrap(), "a");
        assert_eq!(fs::read_to_string(dst.join("nested/b.txt")).unwrap(), "b");
        assert!(src.exists());
    }

    #[test]
    fn moves_tree_and_removes_source() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("a.txt"), "a").unwrap();

        let dst = temp.path().join("deep/dst");
        move_dir(&src, &dst).unwrap();

        assert_eq!(fs::read_to_string(dst.join("a.txt")).unwrap(), "a");
        assert!(!src.exists());
    }

    #[test]
    fn merges_contents_into_existing_destination() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        fs::create_dir_all(src.join("bp")).unwrap();
        fs::write(src.join("bp/layer.txt"), "x").unwrap();

        let dst = temp.path().join("dst");
        fs::create_dir_all(&dst).unwrap();
        fs::write(dst.join("existing.txt"), "y").unwrap();

        move_dir_contents(&src, &dst).unwrap();

        assert!(dst.join("bp/layer.txt").exists());
        assert!(dst.join("existing.txt").exists());
        assert!(!src.exists());
    }

    #[test]
    fn rename_failure_is_reported_not_masked() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("missing");
        let dst = temp.path().join("dst");

        let err = move_dir(&missing, &dst).unwrap_err();

        // The rename error itself surfaces; no fallback copy is attempted
        assert!(err.to_string().contains("moving"));
        assert!(err.to_string().contains("missing"));
        assert!(!dst.join("missing").exists());
    }

    #[cfg(unix)]
    #[test]
    fn preserves_symlinks() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        fs::create_dir_all(&src).unwrap();
        std::os::unix::fs::symlink("dangling-target", src.join("link")).unwrap();

        let dst = temp.path().join("dst");
        copy_dir(&src, &dst).unwrap();

        let target = fs::read_link(dst.join("link")).unwrap();
        assert_eq!(target, Path::new("dangling-target"));
    }
}
