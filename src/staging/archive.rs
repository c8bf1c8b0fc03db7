//! Zip extraction for configuration archives.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::staging::StagingError;

/// Convert an archive entry path to a relative PathBuf, rejecting empty,
/// absolute or traversal paths.
pub(crate) fn parse_entry_rel_path(raw: &str) -> Option<PathBuf> {
    let normalized = raw.replace('\\', "/");
    if normalized.starts_with('/') || has_drive_prefix(&normalized) {
        return None;
    }

    let mut relative = PathBuf::new();
    for part in normalized.split('/') {
        match part {
            "" | "." => {}
            ".." => return None,
            _ => relative.push(part),
        }
    }

    if relative.as_os_str().is_empty() {
        None
    } else {
        Some(relative)
    }
}

fn has_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic()
}

#[cfg(unix)]
fn set_unix_permissions(path: &Path, mode: Option<u32>) -> Result<(), StagingError> {
    use std::os::unix::fs::PermissionsExt as _;

    if let Some(mode) = mode {
        fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o777))
            .map_err(|e| StagingError::io(path, e))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn set_unix_permissions(_path: &Path, _mode: Option<u32>) -> Result<(), StagingError> {
    Ok(())
}

fn write_entry<R: io::Read>(
    out_path: &Path,
    reader: &mut R,
    unix_mode: Option<u32>,
    declared_size: u64,
) -> Result<(), StagingError> {
    if let Some(parent) = out_path.parent() {
        fs::create_dir_all(parent).map_err(|e| StagingError::io(parent, e))?;
    }

    let mut outfile = fs::File::create(out_path).map_err(|e| StagingError::io(out_path, e))?;
    let written = io::copy(reader, &mut outfile).map_err(|e| StagingError::io(out_path, e))?;
    if written != declared_size {
        return Err(StagingError::Archive(format!(
            "entry {} size mismatch: expected {} bytes, wrote {} bytes",
            out_path.display(),
            declared_size,
            written
        )));
    }
    set_unix_permissions(out_path, unix_mode)
}

/// Extract the zip at `archive_path` into `dest_dir`.
///
/// Returns the number of files written. Symlinks are rejected; configuration
/// archives only carry regular files and directories.
pub(crate) fn extract_zip(archive_path: &Path, dest_dir: &Path) -> Result<usize, StagingError> {
    fs::create_dir_all(dest_dir).map_err(|e| StagingError::io(dest_dir, e))?;
    let file = fs::File::open(archive_path).map_err(|e| StagingError::io(archive_path, e))?;
    let mut archive =
        zip::ZipArchive::new(file).map_err(|e| StagingError::Archive(e.to_string()))?;

    let mut files = 0;
    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| StagingError::Archive(e.to_string()))?;

        let raw_name = entry.name().to_string();
        let Some(relative) = parse_entry_rel_path(&raw_name) else {
            return Err(StagingError::UnsafeEntry(raw_name));
        };
        if entry.is_symlink() {
            return Err(StagingError::UnsafeEntry(raw_name));
        }

        let out_path = dest_dir.join(relative);
        if entry.is_dir() {
            fs::create_dir_all(&out_path).map_err(|e| StagingError::io(&out_path, e))?;
        } else {
            let unix_mode = entry.unix_mode();
            let declared_size = entry.size();
            write_entry(&out_path, &mut entry, unix_mode, declared_size)?;
            files += 1;
        }
    }

    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use zip::write::SimpleFileOptions;

    fn write_zip(path: &Path, entries: &[(&str, &str)]) {
        let file = fs::File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        for (name, body) in entries {
            if name.ends_with('/') {
                writer.add_directory(*name, SimpleFileOptions::default()).unwrap();
            } else {
                writer.start_file(*name, SimpleFileOptions::default()).unwrap();
                writer.write_all(body.as_bytes()).unwrap();
            }
        }
        writer.finish().unwrap();
    }

    #[test]
    fn test_parse_entry_rel_path() {
        assert_eq!(parse_entry_rel_path("certs/site.pem"), Some(PathBuf::from("certs/site.pem")));
        assert_eq!(parse_entry_rel_path("./varnish.vcl"), Some(PathBuf::from("varnish.vcl")));
        assert_eq!(parse_entry_rel_path("a\\b.txt"), Some(PathBuf::from("a/b.txt")));
        assert_eq!(parse_entry_rel_path("../escape"), None);
        assert_eq!(parse_entry_rel_path("certs/../../escape"), None);
        assert_eq!(parse_entry_rel_path("/etc/passwd"), None);
        assert_eq!(parse_entry_rel_path("C:/windows"), None);
        assert_eq!(parse_entry_rel_path("./"), None);
    }

    #[test]
    fn test_extracts_tree() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("config.zip");
        write_zip(
            &archive,
            &[("varnish.vcl", "vcl 4.0;"), ("certs/", ""), ("certs/site.pem", "PEM")],
        );

        let dest = dir.path().join("out");
        let files = extract_zip(&archive, &dest).unwrap();
        assert_eq!(files, 2);
        assert_eq!(fs::read_to_string(dest.join("varnish.vcl")).unwrap(), "vcl 4.0;");
        assert_eq!(fs::read_to_string(dest.join("certs/site.pem")).unwrap(), "PEM");
    }

    #[test]
    fn test_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("config.zip");
        write_zip(&archive, &[("../outside.txt", "x")]);

        let err = extract_zip(&archive, &dir.path().join("out")).unwrap_err();
        assert!(matches!(err, StagingError::UnsafeEntry(_)));
        assert!(!dir.path().join("outside.txt").exists());
    }

    #[test]
    fn test_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("config.zip");
        fs::write(&archive, b"definitely not a zip").unwrap();

        let err = extract_zip(&archive, &dir.path().join("out")).unwrap_err();
        assert!(matches!(err, StagingError::Archive(_)));
    }
}
