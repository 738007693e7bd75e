//! # Input loading: plain text or the first `.txt` inside an archive
//!
//! ## Responsibility
//! Turn a client input path into the text payload to send.
//!
//! | Input | Payload |
//! |-------|---------|
//! | `*.txt` or no extension | the file itself |
//! | `*.zip` | first `.txt` entry |
//! | `*.tar.xz` | first `.txt` entry |
//! | `*.7z` | first `.txt` entry |
//!
//! Anything else is [`ArchiveError::Unsupported`].
//!
//! ## NOT Responsible For
//! - Writing archives, or extracting anything besides the payload text

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors while loading an input payload.
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// The extension is neither plain text nor a supported archive.
    #[error("unsupported input {}: expected .txt, .zip, .tar.xz or .7z", path.display())]
    Unsupported {
        /// The rejected input path.
        path: PathBuf,
    },

    /// The archive has no `.txt` entry.
    #[error("no .txt file found in {kind} archive {}", path.display())]
    NoTextEntry {
        /// Archive format.
        kind: ArchiveKind,
        /// The archive path.
        path: PathBuf,
    },

    /// The archive could not be read.
    #[error("failed to read {kind} archive {}: {reason}", path.display())]
    Corrupt {
        /// Archive format.
        kind: ArchiveKind,
        /// The archive path.
        path: PathBuf,
        /// Decoder message.
        reason: String,
    },

    /// File read failed, or the payload is not UTF-8.
    #[error("failed to read {}: {source}", path.display())]
    Io {
        /// The input path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
}

/// How an input file is decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    /// Not an archive.
    PlainText,
    /// `.zip`
    Zip,
    /// `.tar.xz`
    TarXz,
    /// `.7z`
    SevenZ,
}

impl std::fmt::Display for ArchiveKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::PlainText => "text",
            Self::Zip => "zip",
            Self::TarXz => "tar.xz",
            Self::SevenZ => "7z",
        };
        f.write_str(name)
    }
}

impl ArchiveKind {
    /// Classify `path` by its file name.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::Unsupported`] for any other extension.
    pub fn detect(path: &Path) -> Result<Self, ArchiveError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();

        if name.ends_with(".tar.xz") {
            return Ok(Self::TarXz);
        }
        match path.extension().map(|e| e.to_string_lossy().to_ascii_lowercase()) {
            None => Ok(Self::PlainText),
            Some(ext) if ext == "txt" => Ok(Self::PlainText),
            Some(ext) if ext == "zip" => Ok(Self::Zip),
            Some(ext) if ext == "7z" => Ok(Self::SevenZ),
            Some(_) => Err(ArchiveError::Unsupported {
                path: path.to_path_buf(),
            }),
        }
    }
}

fn is_text_entry(name: &str) -> bool {
    name.ends_with(".txt")
}

/// Load the payload text for `path`.
///
/// Blocking; call it from `spawn_blocking` inside async code.
///
/// # Errors
///
/// See [`ArchiveError`].
pub fn load_text(path: &Path) -> Result<String, ArchiveError> {
    let kind = ArchiveKind::detect(path)?;
    let io_err = |source| ArchiveError::Io {
        path: path.to_path_buf(),
        source,
    };

    if kind == ArchiveKind::PlainText {
        return std::fs::read_to_string(path).map_err(io_err);
    }

    let file = File::open(path).map_err(io_err)?;
    let text = match kind {
        ArchiveKind::Zip => first_zip_text(path, file)?,
        ArchiveKind::TarXz => first_tar_xz_text(path, file)?,
        ArchiveKind::SevenZ => first_7z_text(path)?,
        ArchiveKind::PlainText => None,
    };
    text.ok_or_else(|| ArchiveError::NoTextEntry {
        kind,
        path: path.to_path_buf(),
    })
}

fn corrupt(kind: ArchiveKind, path: &Path, reason: impl ToString) -> ArchiveError {
    ArchiveError::Corrupt {
        kind,
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

fn read_entry(path: &Path, mut entry: impl Read) -> Result<String, ArchiveError> {
    let mut text = String::new();
    entry
        .read_to_string(&mut text)
        .map_err(|source| ArchiveError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(text)
}

fn first_zip_text(path: &Path, file: File) -> Result<Option<String>, ArchiveError> {
    let kind = ArchiveKind::Zip;
    let mut archive =
        zip::ZipArchive::new(BufReader::new(file)).map_err(|e| corrupt(kind, path, e))?;

    for idx in 0..archive.len() {
        let entry = archive.by_index(idx).map_err(|e| corrupt(kind, path, e))?;
        if entry.is_file() && is_text_entry(entry.name()) {
            return read_entry(path, entry).map(Some);
        }
    }
    Ok(None)
}

fn first_tar_xz_text(path: &Path, file: File) -> Result<Option<String>, ArchiveError> {
    let kind = ArchiveKind::TarXz;
    let decoder = xz2::read::XzDecoder::new(BufReader::new(file));
    let mut archive = tar::Archive::new(decoder);

    for entry in archive.entries().map_err(|e| corrupt(kind, path, e))? {
        let entry = entry.map_err(|e| corrupt(kind, path, e))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let name = entry
            .path()
            .map_err(|e| corrupt(kind, path, e))?
            .to_string_lossy()
            .into_owned();
        if is_text_entry(&name) {
            return read_entry(path, entry).map(Some);
        }
    }
    Ok(None)
}

fn first_7z_text(path: &Path) -> Result<Option<String>, ArchiveError> {
    let kind = ArchiveKind::SevenZ;
    let mut reader = sevenz_rust::SevenZReader::open(path, sevenz_rust::Password::empty())
        .map_err(|e| corrupt(kind, path, e))?;

    let mut found: Option<Result<String, ArchiveError>> = None;
    reader
        .for_each_entries(|entry, data| {
            if entry.is_directory() || !is_text_entry(entry.name()) {
                // Entries share a solid stream; skip by draining.
                let _ = io::copy(data, &mut io::sink());
                return Ok(true);
            }
            found = Some(read_entry(path, data));
            // Stop after the first text entry.
            Ok(false)
        })
        .map_err(|e| corrupt(kind, path, e))?;

    found.transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_zip(path: &Path, entries: &[(&str, &str)]) {
        let file = File::create(path).ok().unwrap();
        let mut zip = zip::ZipWriter::new(file);
        for (name, body) in entries {
            zip.start_file(*name, zip::write::FileOptions::default())
                .ok()
                .unwrap();
            zip.write_all(body.as_bytes()).ok().unwrap();
        }
        zip.finish().ok().unwrap();
    }

    fn write_tar_xz(path: &Path, entries: &[(&str, &str)]) {
        let file = File::create(path).ok().unwrap();
        let encoder = xz2::write::XzEncoder::new(file, 6);
        let mut builder = tar::Builder::new(encoder);
        for (name, body) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(body.len() as u64);
            header.set_mode(0o644);
            header.set_entry_type(tar::EntryType::Regular);
            header.set_cksum();
            builder
                .append_data(&mut header, name, body.as_bytes())
                .ok()
                .unwrap();
        }
        let encoder = builder.into_inner().ok().unwrap();
        encoder.finish().ok().unwrap();
    }

    #[test]
    fn test_detect_kinds() {
        assert_eq!(ArchiveKind::detect(Path::new("a.txt")).ok(), Some(ArchiveKind::PlainText));
        assert_eq!(ArchiveKind::detect(Path::new("a")).ok(), Some(ArchiveKind::PlainText));
        assert_eq!(ArchiveKind::detect(Path::new("a.zip")).ok(), Some(ArchiveKind::Zip));
        assert_eq!(ArchiveKind::detect(Path::new("a.tar.xz")).ok(), Some(ArchiveKind::TarXz));
        assert_eq!(ArchiveKind::detect(Path::new("A.7Z")).ok(), Some(ArchiveKind::SevenZ));
    }

    #[test]
    fn test_detect_rejects_other_extensions() {
        for name in ["a.rar", "a.tar.gz", "a.csv"] {
            assert!(
                matches!(ArchiveKind::detect(Path::new(name)), Err(ArchiveError::Unsupported { .. })),
                "{name} should be unsupported"
            );
        }
    }

    #[test]
    fn test_plain_text_loaded() {
        let dir = tempfile::tempdir().ok().unwrap();
        let path = dir.path().join("ops.txt");
        std::fs::write(&path, "1 + 1\n").ok().unwrap();
        assert_eq!(load_text(&path).ok().unwrap(), "1 + 1\n");
    }

    #[test]
    fn test_zip_first_text_entry() {
        let dir = tempfile::tempdir().ok().unwrap();
        let path = dir.path().join("ops.zip");
        write_zip(
            &path,
            &[("README.md", "skip me"), ("ops.txt", "2 + 3\n"), ("more.txt", "9 * 9\n")],
        );
        assert_eq!(load_text(&path).ok().unwrap(), "2 + 3\n");
    }

    #[test]
    fn test_zip_without_text_entry() {
        let dir = tempfile::tempdir().ok().unwrap();
        let path = dir.path().join("ops.zip");
        write_zip(&path, &[("data.csv", "1,2\n")]);
        assert!(matches!(
            load_text(&path),
            Err(ArchiveError::NoTextEntry { kind: ArchiveKind::Zip, .. })
        ));
    }

    #[test]
    fn test_tar_xz_first_text_entry() {
        let dir = tempfile::tempdir().ok().unwrap();
        let path = dir.path().join("ops.tar.xz");
        write_tar_xz(&path, &[("notes.md", "no"), ("nested/ops.txt", "4 * 5\n")]);
        assert_eq!(load_text(&path).ok().unwrap(), "4 * 5\n");
    }

    #[test]
    fn test_tar_xz_without_text_entry() {
        let dir = tempfile::tempdir().ok().unwrap();
        let path = dir.path().join("ops.tar.xz");
        write_tar_xz(&path, &[("notes.md", "no")]);
        assert!(matches!(
            load_text(&path),
            Err(ArchiveError::NoTextEntry { kind: ArchiveKind::TarXz, .. })
        ));
    }

    #[test]
    fn test_seven_z_first_text_entry() {
        let dir = tempfile::tempdir().ok().unwrap();
        let src = dir.path().join("src");
        std::fs::create_dir(&src).ok().unwrap();
        std::fs::write(src.join("ops.txt"), "10 / 2 - 1\n").ok().unwrap();
        let path = dir.path().join("ops.7z");
        sevenz_rust::compress_to_path(&src, &path).ok().unwrap();

        assert_eq!(load_text(&path).ok().unwrap(), "10 / 2 - 1\n");
    }

    #[test]
    fn test_corrupt_zip_reported() {
        let dir = tempfile::tempdir().ok().unwrap();
        let path = dir.path().join("ops.zip");
        std::fs::write(&path, b"PK\x03\x04 not really").ok().unwrap();
        assert!(matches!(load_text(&path), Err(ArchiveError::Corrupt { .. })));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().ok().unwrap();
        let path = dir.path().join("absent.txt");
        assert!(matches!(load_text(&path), Err(ArchiveError::Io { .. })));
    }
}
