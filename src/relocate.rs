//! Moving a finished file to its destination.

use std::fs;
use std::io;
use std::path::Path;

/// How a file reached its destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relocation {
    /// The file was renamed.
    Renamed,
    /// The file was copied and the source removed.
    Copied,
}

/// Moves `src` to `dst`, replacing `dst` if it exists.
///
/// Tries a rename first and falls back to [`copy_and_remove`] when renaming is not possible,
/// for example when the paths are on different file systems.
pub fn relocate(src: &Path, dst: &Path) -> io::Result<Relocation> {
    relocate_with(src, dst, |src, dst| fs::rename(src, dst))
}

fn relocate_with<F>(src: &Path, dst: &Path, rename: F) -> io::Result<Relocation>
where
    F: FnOnce(&Path, &Path) -> io::Result<()>,
{
    match rename(src, dst) {
        Ok(()) => return Ok(Relocation::Renamed),
        Err(err) => log::debug!(
            "renaming {} to {} failed ({}), copying",
            src.display(),
            dst.display(),
            err
        ),
    }

    copy_and_remove(src, dst)?;
    return Ok(Relocation::Copied);
}

/// Copies `src` to `dst` and removes `src`.
///
/// If copying fails the partially written `dst` is removed and `src` is left intact.
pub fn copy_and_remove(src: &Path, dst: &Path) -> io::Result<()> {
    let mut src_file = fs::File::open(src)?;
    let mut dst_file = fs::File::create(dst)?;

    if let Err(err) = io::copy(&mut src_file, &mut dst_file).and_then(|_| dst_file.sync_all()) {
        drop(dst_file);
        let _ = fs::remove_file(dst);
        return Err(err);
    }

    drop(src_file);
    if let Err(err) = fs::remove_file(src) {
        log::warn!("{} copied but not removed: {}", src.display(), err);
    }

    return Ok(());
}

#[cfg(test)]
mod test {
    use std::fs;
    use std::io;

    use rstest::*;

    use super::{copy_and_remove, relocate, relocate_with, Relocation};

    // A real rename failure needs paths on two file systems, which a test cannot set up portably,
    // so the fallback is driven through a rename that always fails.
    fn cross_device(_: &std::path::Path, _: &std::path::Path) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::Other, "cross-device link"))
    }

    #[fixture]
    fn tmp_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    #[rstest]
    fn test_relocate_renames(tmp_dir: tempfile::TempDir) {
        let src = tmp_dir.path().join("src");
        let dst = tmp_dir.path().join("dst");
        fs::write(&src, b"sorted").unwrap();
        fs::write(&dst, b"stale content").unwrap();

        assert_eq!(relocate(&src, &dst).unwrap(), Relocation::Renamed);
        assert_eq!(fs::read(&dst).unwrap(), b"sorted");
        assert_eq!(src.exists(), false);
    }

    #[rstest]
    fn test_relocate_falls_back_to_copy(tmp_dir: tempfile::TempDir) {
        let src = tmp_dir.path().join("src");
        let dst = tmp_dir.path().join("dst");
        fs::write(&src, b"sorted").unwrap();
        fs::write(&dst, b"stale content").unwrap();

        assert_eq!(relocate_with(&src, &dst, cross_device).unwrap(), Relocation::Copied);
        assert_eq!(fs::read(&dst).unwrap(), b"sorted");
        assert_eq!(src.exists(), false);
    }

    #[rstest]
    fn test_relocate_fallback_failure_keeps_source(tmp_dir: tempfile::TempDir) {
        let src = tmp_dir.path().join("src");
        let dst = tmp_dir.path().join("missing").join("dst");
        fs::write(&src, b"sorted").unwrap();

        assert!(relocate_with(&src, &dst, cross_device).is_err());
        assert_eq!(fs::read(&src).unwrap(), b"sorted");
        assert_eq!(dst.exists(), false);
    }

    // opening a directory succeeds on unix, reading it fails once the destination is created
    #[cfg(unix)]
    #[rstest]
    fn test_copy_failure_removes_partial_destination(tmp_dir: tempfile::TempDir) {
        let src = tmp_dir.path().join("src");
        let dst = tmp_dir.path().join("dst");
        fs::create_dir(&src).unwrap();

        assert!(copy_and_remove(&src, &dst).is_err());
        assert_eq!(dst.exists(), false);
        assert_eq!(src.is_dir(), true);
    }

    #[rstest]
    fn test_copy_and_remove(tmp_dir: tempfile::TempDir) {
        let src = tmp_dir.path().join("src");
        let dst = tmp_dir.path().join("dst");
        fs::write(&src, b"sorted").unwrap();

        copy_and_remove(&src, &dst).unwrap();
        assert_eq!(fs::read(&dst).unwrap(), b"sorted");
        assert_eq!(src.exists(), false);
    }

    #[rstest]
    fn test_relocate_missing_source(tmp_dir: tempfile::TempDir) {
        let src = tmp_dir.path().join("missing");
        let dst = tmp_dir.path().join("dst");

        assert!(relocate(&src, &dst).is_err());
        assert_eq!(dst.exists(), false);
    }

    #[rstest]
    fn test_copy_into_missing_directory(tmp_dir: tempfile::TempDir) {
        let src = tmp_dir.path().join("src");
        let dst = tmp_dir.path().join("missing").join("dst");
        fs::write(&src, b"sorted").unwrap();

        assert!(relocate(&src, &dst).is_err());
        assert_eq!(fs::read(&src).unwrap(), b"sorted");
    }
}
