// Archive builder used by `files upload`.
//
// Inputs that are already archives are uploaded untouched. Anything else is
// packed into a temporary zip which is removed when the `PackedArchive`
// handle goes out of scope, whether the upload succeeded or not.

use std::fs::{self, File};
use std::io::{self, Seek, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Datelike, Local, Timelike};
use tempfile::NamedTempFile;
use tracing::debug;
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::{CliError, CliResult};

const TEMP_PREFIX: &str = "everywhere-upload-";

/// Upload format declared to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    TarGz,
}

impl ArchiveFormat {
    /// Detect from the file name. Only `.tar.gz`/`.tgz` map to `tar.gz`;
    /// everything else, including builder output, is declared as zip.
    pub fn detect(path: &Path) -> Self {
        let lower = path.to_string_lossy().to_lowercase();
        if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            Self::TarGz
        } else {
            Self::Zip
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Zip => "zip",
            Self::TarGz => "tar.gz",
        }
    }
}

/// True when the path already names an archive the server can unpack.
pub fn is_archive(path: &Path) -> bool {
    let lower = path.to_string_lossy().to_lowercase();
    lower.ends_with(".zip") || lower.ends_with(".tar.gz") || lower.ends_with(".tgz")
}

/// A zip written to a temporary file. Dropping it deletes the file.
#[derive(Debug)]
pub struct PackedArchive {
    file: NamedTempFile,
}

impl PackedArchive {
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

/// What actually gets uploaded: either the user's own archive or one we built.
#[derive(Debug)]
pub enum UploadSource {
    Existing(PathBuf),
    Packed(PackedArchive),
}

impl UploadSource {
    /// Stat `input` and pack it if it is a directory or a plain file.
    pub fn prepare(input: &Path) -> CliResult<Self> {
        let metadata = fs::metadata(input).map_err(|err| {
            CliError::filesystem(format!("path not accessible: {}", input.display()), err)
        })?;

        if metadata.is_dir() {
            return zip_directory(input).map(Self::Packed);
        }
        if is_archive(input) {
            return Ok(Self::Existing(input.to_path_buf()));
        }
        zip_file(input).map(Self::Packed)
    }

    pub fn path(&self) -> &Path {
        match self {
            Self::Existing(path) => path,
            Self::Packed(archive) => archive.path(),
        }
    }

    pub fn format(&self) -> ArchiveFormat {
        ArchiveFormat::detect(self.path())
    }
}

/// Pack every entry below `root` into a fresh temporary zip.
pub fn zip_directory(root: &Path) -> CliResult<PackedArchive> {
    let mut temp = new_temp_archive()?;
    let mut writer = ZipWriter::new(temp.as_file_mut());

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|err| {
            CliError::filesystem(format!("failed to walk {}", root.display()), err)
        })?;
        let name = entry_name(root, entry.path())?;
        if name.is_empty() {
            continue;
        }

        let metadata = entry.metadata().map_err(|err| {
            CliError::filesystem(format!("failed to stat {}", entry.path().display()), err)
        })?;
        let options = entry_options(&metadata);

        if metadata.is_dir() {
            writer
                .add_directory(format!("{name}/"), options)
                .map_err(|err| zip_error(&name, err))?;
        } else {
            write_file_entry(&mut writer, &name, entry.path(), options)?;
        }
    }

    finish(writer, root)?;
    debug!(source = %root.display(), archive = %temp.path().display(), "packed directory");
    Ok(PackedArchive { file: temp })
}

/// Pack a single file into a fresh temporary zip under its base name.
pub fn zip_file(path: &Path) -> CliResult<PackedArchive> {
    let metadata = fs::metadata(path)
        .map_err(|err| CliError::filesystem(format!("failed to stat {}", path.display()), err))?;
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| CliError::validation(format!("{} has no file name", path.display())))?;

    let mut temp = new_temp_archive()?;
    let mut writer = ZipWriter::new(temp.as_file_mut());
    write_file_entry(&mut writer, &name, path, entry_options(&metadata))?;
    finish(writer, path)?;

    debug!(source = %path.display(), archive = %temp.path().display(), "packed file");
    Ok(PackedArchive { file: temp })
}

fn new_temp_archive() -> CliResult<NamedTempFile> {
    tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .suffix(".zip")
        .tempfile()
        .map_err(|err| CliError::filesystem("failed to create temp zip", err))
}

/// Relative path of `path` under `root`, always `/`-separated. Empty for
/// the root itself.
fn entry_name(root: &Path, path: &Path) -> CliResult<String> {
    let relative = path.strip_prefix(root).map_err(|_| {
        CliError::filesystem(
            format!("{} is outside {}", path.display(), root.display()),
            io::Error::from(io::ErrorKind::InvalidInput),
        )
    })?;
    let parts: Vec<String> = relative
        .components()
        .map(|part| part.as_os_str().to_string_lossy().into_owned())
        .collect();
    Ok(parts.join("/"))
}

/// Entries at or above this size need zip64 records.
const ZIP64_THRESHOLD: u64 = u32::MAX as u64;

fn needs_zip64(len: u64) -> bool {
    len >= ZIP64_THRESHOLD
}

fn entry_options(metadata: &fs::Metadata) -> FileOptions {
    let mut options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .large_file(needs_zip64(metadata.len()));
    if let Some(modified) = metadata.modified().ok().and_then(zip_timestamp) {
        options = options.last_modified_time(modified);
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        options.unix_permissions(metadata.permissions().mode() & 0o7777)
    }
    #[cfg(not(unix))]
    {
        options
    }
}

/// Local-time DOS timestamp. `None` outside the 1980..=2107 range zip can
/// represent, in which case the writer's default is kept.
fn zip_timestamp(modified: SystemTime) -> Option<zip::DateTime> {
    let local: DateTime<Local> = modified.into();
    let year = u16::try_from(local.year()).ok()?;
    zip::DateTime::from_date_and_time(
        year,
        local.month() as u8,
        local.day() as u8,
        local.hour() as u8,
        local.minute() as u8,
        local.second() as u8,
    )
    .ok()
}

fn write_file_entry<W: Write + Seek>(
    writer: &mut ZipWriter<W>,
    name: &str,
    source: &Path,
    options: FileOptions,
) -> CliResult<()> {
    writer
        .start_file(name, options)
        .map_err(|err| zip_error(name, err))?;
    let mut input = File::open(source)
        .map_err(|err| CliError::filesystem(format!("failed to open {}", source.display()), err))?;
    io::copy(&mut input, writer)
        .map_err(|err| CliError::filesystem(format!("failed to copy {}", source.display()), err))?;
    Ok(())
}

fn finish<W: Write + Seek>(mut writer: ZipWriter<W>, source: &Path) -> CliResult<()> {
    writer
        .finish()
        .map_err(|err| zip_error(&source.display().to_string(), err))?;
    Ok(())
}

fn zip_error(name: &str, err: zip::result::ZipError) -> CliError {
    CliError::filesystem(format!("failed to archive {name}"), err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::collections::BTreeSet;
    use std::io::Read;
    use zip::ZipArchive;

    fn entry_names(path: &Path) -> Result<Vec<String>> {
        let archive = ZipArchive::new(File::open(path)?)?;
        Ok(archive.file_names().map(str::to_string).collect())
    }

    fn sample_tree() -> Result<tempfile::TempDir> {
        let dir = tempfile::tempdir()?;
        fs::create_dir_all(dir.path().join("src/nested"))?;
        fs::create_dir_all(dir.path().join("empty"))?;
        fs::write(dir.path().join("README.md"), "hello")?;
        fs::write(dir.path().join("src/main.py"), "print('hi')\n")?;
        fs::write(dir.path().join("src/nested/data.bin"), [0u8, 1, 2, 255])?;
        Ok(dir)
    }

    #[test]
    fn directory_entries_use_forward_slashes_and_skip_root() -> Result<()> {
        let tree = sample_tree()?;
        let packed = zip_directory(tree.path())?;
        let names: BTreeSet<String> = entry_names(packed.path())?.into_iter().collect();

        let expected: BTreeSet<String> = [
            "README.md",
            "empty/",
            "src/",
            "src/main.py",
            "src/nested/",
            "src/nested/data.bin",
        ]
        .into_iter()
        .map(String::from)
        .collect();
        assert_eq!(names, expected);
        assert!(!names.contains("") && !names.contains("/"));
        Ok(())
    }

    #[test]
    fn every_file_appears_once_with_original_bytes() -> Result<()> {
        let tree = sample_tree()?;
        let packed = zip_directory(tree.path())?;
        let names = entry_names(packed.path())?;
        assert_eq!(names.iter().filter(|n| *n == "src/main.py").count(), 1);

        let mut archive = ZipArchive::new(File::open(packed.path())?)?;
        let mut data = Vec::new();
        let mut entry = archive.by_name("src/nested/data.bin")?;
        assert_eq!(entry.compression(), CompressionMethod::Deflated);
        entry.read_to_end(&mut data)?;
        assert_eq!(data, vec![0u8, 1, 2, 255]);
        Ok(())
    }

    #[test]
    fn archive_matches_walk_of_source() -> Result<()> {
        let tree = sample_tree()?;
        let packed = zip_directory(tree.path())?;

        let walked: BTreeSet<String> = WalkDir::new(tree.path())
            .min_depth(1)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .map(|entry| {
                let name = entry_name(tree.path(), entry.path()).unwrap_or_default();
                if entry.file_type().is_dir() {
                    format!("{name}/")
                } else {
                    name
                }
            })
            .collect();
        let zipped: BTreeSet<String> = entry_names(packed.path())?.into_iter().collect();
        assert_eq!(walked, zipped);
        Ok(())
    }

    #[test]
    fn single_file_becomes_one_entry_named_by_base_name() -> Result<()> {
        let tree = sample_tree()?;
        let packed = zip_file(&tree.path().join("src/main.py"))?;
        assert_eq!(entry_names(packed.path())?, vec!["main.py".to_string()]);
        Ok(())
    }

    #[test]
    fn temp_archive_is_removed_on_drop() -> Result<()> {
        let tree = sample_tree()?;
        let packed = zip_directory(tree.path())?;
        let path = packed.path().to_path_buf();
        let file_name = path.file_name().map(|n| n.to_string_lossy().into_owned());
        assert!(file_name.is_some_and(|n| n.starts_with(TEMP_PREFIX) && n.ends_with(".zip")));
        assert!(path.exists());
        drop(packed);
        assert!(!path.exists());
        Ok(())
    }

    #[test]
    fn entries_keep_modification_time() -> Result<()> {
        let tree = sample_tree()?;
        let source = tree.path().join("README.md");
        let expected = zip_timestamp(fs::metadata(&source)?.modified()?)
            .ok_or_else(|| anyhow::anyhow!("mtime out of zip range"))?;

        let packed = zip_file(&source)?;
        let mut archive = ZipArchive::new(File::open(packed.path())?)?;
        let entry = archive.by_name("README.md")?;
        let stored = entry.last_modified();
        assert_ne!(stored.year(), 1980);
        assert_eq!(
            (stored.year(), stored.month(), stored.day(), stored.hour(), stored.minute()),
            (expected.year(), expected.month(), expected.day(), expected.hour(), expected.minute())
        );
        Ok(())
    }

    #[test]
    fn timestamps_before_dos_epoch_are_skipped() {
        assert!(zip_timestamp(SystemTime::UNIX_EPOCH).is_none());
    }

    #[test]
    fn only_files_past_four_gib_need_zip64() {
        assert!(!needs_zip64(0));
        assert!(!needs_zip64(u64::from(u32::MAX) - 1));
        assert!(needs_zip64(u64::from(u32::MAX)));
        assert!(needs_zip64(5 * 1024 * 1024 * 1024));
    }

    #[test]
    fn format_detection_only_recognises_tarballs_by_extension() {
        assert_eq!(ArchiveFormat::detect(Path::new("a.TAR.GZ")), ArchiveFormat::TarGz);
        assert_eq!(ArchiveFormat::detect(Path::new("a.tgz")), ArchiveFormat::TarGz);
        assert_eq!(ArchiveFormat::detect(Path::new("a.zip")), ArchiveFormat::Zip);
        assert_eq!(ArchiveFormat::detect(Path::new("notes.txt")), ArchiveFormat::Zip);
    }

    #[test]
    fn existing_archives_are_not_repacked() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let tarball = dir.path().join("bundle.tgz");
        fs::write(&tarball, b"not really gzip")?;

        let source = UploadSource::prepare(&tarball)?;
        assert!(matches!(source, UploadSource::Existing(_)));
        assert_eq!(source.format(), ArchiveFormat::TarGz);

        let plain = dir.path().join("notes.txt");
        fs::write(&plain, b"text")?;
        let source = UploadSource::prepare(&plain)?;
        assert!(matches!(source, UploadSource::Packed(_)));
        assert_eq!(source.format(), ArchiveFormat::Zip);
        Ok(())
    }

    #[test]
    fn missing_input_is_a_filesystem_error() {
        let err = UploadSource::prepare(Path::new("/definitely/not/here")).unwrap_err();
        assert!(matches!(err, CliError::Filesystem { .. }));
    }
}
