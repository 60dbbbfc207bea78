use crate::crux::month::YearMonth;
use crate::crux::query::ResultSet;
use crate::error::ArchiveError;
use anyhow::{Context, Result};
use flate2::Compression;
use flate2::write::GzEncoder;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub const PLAIN_SUFFIX: &str = ".csv";
pub const COMPRESSED_SUFFIX: &str = ".csv.gz";

pub fn plain_name(month: YearMonth) -> String {
    format!("{month}{PLAIN_SUFFIX}")
}

pub fn compressed_name(month: YearMonth) -> String {
    format!("{month}{COMPRESSED_SUFFIX}")
}

/// Writes `rows` as CSV with a header row.
pub fn write_csv(path: &Path, rows: &ResultSet) -> Result<()> {
    let file = File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = csv::Writer::from_writer(BufWriter::new(file));
    writer
        .write_record(&rows.columns)
        .with_context(|| format!("failed to write header to {}", path.display()))?;
    for row in &rows.rows {
        writer
            .write_record(row)
            .with_context(|| format!("failed to write row to {}", path.display()))?;
    }
    writer
        .flush()
        .with_context(|| format!("failed to flush {}", path.display()))?;
    Ok(())
}

fn gzip_into(plain: &Path, out: &mut NamedTempFile) -> io::Result<()> {
    let mut input = BufReader::new(File::open(plain)?);
    let mut encoder = GzEncoder::new(BufWriter::new(out.as_file_mut()), Compression::default());
    io::copy(&mut input, &mut encoder)?;
    let mut inner = encoder.finish()?;
    inner.flush()?;
    drop(inner);
    out.as_file().sync_all()
}

/// Staged files start out owner-only; copy the mode of the file they were made from.
fn inherit_permissions(from: &Path, staged: &NamedTempFile) -> io::Result<()> {
    let perms = fs::metadata(from)?.permissions();
    staged.as_file().set_permissions(perms)
}

/// Compresses `plain` to `plain + ".gz"` and removes `plain`.
///
/// The compressed bytes go to a temporary sibling that is renamed into place
/// only once complete, so a partial gzip never carries a discoverable name.
/// On failure the plain file is left where it was.
pub fn gzip_and_remove(plain: &Path) -> Result<PathBuf, ArchiveError> {
    let dir = plain.parent().unwrap_or_else(|| Path::new("."));
    let mut target = plain.as_os_str().to_owned();
    target.push(".gz");
    let target = PathBuf::from(target);

    let mut tmp = NamedTempFile::new_in(dir)
        .map_err(|err| ArchiveError::io(format!("failed to stage gzip in {}", dir.display()), err))?;
    gzip_into(plain, &mut tmp)
        .map_err(|err| ArchiveError::io(format!("failed to compress {}", plain.display()), err))?;
    inherit_permissions(plain, &tmp)
        .map_err(|err| ArchiveError::io(format!("failed to set mode on {}", target.display()), err))?;
    tmp.persist(&target).map_err(|err| {
        ArchiveError::io(format!("failed to persist {}", target.display()), err.error)
    })?;
    fs::remove_file(plain)
        .map_err(|err| ArchiveError::io(format!("failed to remove {}", plain.display()), err))?;
    Ok(target)
}

/// Byte-copies `source` over `dest`, replacing it in one rename.
pub fn copy_replace(source: &Path, dest: &Path) -> Result<u64> {
    let dir = dest.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("failed to stage copy in {}", dir.display()))?;
    let mut input =
        File::open(source).with_context(|| format!("failed to open {}", source.display()))?;
    let copied = io::copy(&mut input, tmp.as_file_mut())
        .with_context(|| format!("failed to copy {}", source.display()))?;
    tmp.as_file().sync_all()?;
    inherit_permissions(source, &tmp)
        .with_context(|| format!("failed to set mode on {}", dest.display()))?;
    tmp.persist(dest)
        .map_err(|err| err.error)
        .with_context(|| format!("failed to replace {}", dest.display()))?;
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::{compressed_name, copy_replace, gzip_and_remove, plain_name, write_csv};
    use crate::crux::month::YearMonth;
    use crate::crux::query::ResultSet;
    use crate::error::ArchiveError;
    use flate2::read::GzDecoder;
    use std::fs;
    use std::io::Read;
    use tempfile::tempdir;

    fn sample() -> ResultSet {
        ResultSet {
            columns: vec!["origin".to_string(), "rank".to_string()],
            rows: vec![
                vec!["https://www.google.com".to_string(), "1000".to_string()],
                vec!["https://example.com, inc".to_string(), "5000".to_string()],
            ],
        }
    }

    #[test]
    fn file_names_follow_yyyymm_convention() {
        let month = YearMonth::new(2023, 5).unwrap();
        assert_eq!(plain_name(month), "202305.csv");
        assert_eq!(compressed_name(month), "202305.csv.gz");
    }

    #[test]
    fn csv_has_header_and_quotes_embedded_commas() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("202305.csv");
        write_csv(&path, &sample()).expect("write csv");
        let raw = fs::read_to_string(&path).expect("read csv");
        assert_eq!(
            raw,
            "origin,rank\nhttps://www.google.com,1000\n\"https://example.com, inc\",5000\n"
        );
    }

    #[test]
    fn gzip_replaces_plain_file_with_compressed_sibling() {
        let tmp = tempdir().expect("tempdir");
        let plain = tmp.path().join("202305.csv");
        write_csv(&plain, &sample()).expect("write csv");
        let expected = fs::read_to_string(&plain).expect("read plain");

        let gz = gzip_and_remove(&plain).expect("gzip");
        assert_eq!(gz, tmp.path().join("202305.csv.gz"));
        assert!(!plain.exists());

        let mut decoded = String::new();
        GzDecoder::new(fs::File::open(&gz).expect("open gz"))
            .read_to_string(&mut decoded)
            .expect("decode gz");
        assert_eq!(decoded, expected);

        let leftovers: Vec<_> = fs::read_dir(tmp.path())
            .expect("read dir")
            .map(|e| e.expect("entry").file_name())
            .collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn gzip_of_missing_plain_file_is_io_error() {
        let tmp = tempdir().expect("tempdir");
        let err = gzip_and_remove(&tmp.path().join("202305.csv")).unwrap_err();
        assert!(matches!(err, ArchiveError::Io { .. }));
        assert!(!tmp.path().join("202305.csv.gz").exists());
    }

    #[test]
    fn failed_persist_keeps_plain_file() {
        let tmp = tempdir().expect("tempdir");
        let plain = tmp.path().join("202305.csv");
        write_csv(&plain, &sample()).expect("write csv");
        fs::create_dir(tmp.path().join("202305.csv.gz")).expect("block target");

        let err = gzip_and_remove(&plain).unwrap_err();
        assert!(matches!(err, ArchiveError::Io { .. }));
        assert!(plain.is_file());
        assert!(tmp.path().join("202305.csv.gz").is_dir());

        let mut names: Vec<_> = fs::read_dir(tmp.path())
            .expect("read dir")
            .map(|e| e.expect("entry").file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["202305.csv", "202305.csv.gz"]);
    }

    #[cfg(unix)]
    #[test]
    fn artifacts_are_as_readable_as_plainly_created_files() {
        use std::os::unix::fs::PermissionsExt;

        let mode = |path: &std::path::Path| {
            fs::metadata(path).expect("metadata").permissions().mode() & 0o777
        };
        let tmp = tempdir().expect("tempdir");
        let reference = tmp.path().join("reference");
        fs::write(&reference, b"x").expect("write reference");

        let plain = tmp.path().join("202305.csv");
        write_csv(&plain, &sample()).expect("write csv");
        let gz = gzip_and_remove(&plain).expect("gzip");
        assert_eq!(mode(&gz), mode(&reference));

        fs::set_permissions(&gz, fs::Permissions::from_mode(0o644)).expect("chmod");
        let current = tmp.path().join("current.csv.gz");
        copy_replace(&gz, &current).expect("copy");
        assert_eq!(mode(&current), 0o644);
    }

    #[test]
    fn copy_replace_overwrites_destination() {
        let tmp = tempdir().expect("tempdir");
        let source = tmp.path().join("202303.csv.gz");
        let dest = tmp.path().join("current.csv.gz");
        fs::write(&source, b"new bytes").expect("write source");
        fs::write(&dest, b"stale bytes that are longer").expect("write dest");

        let copied = copy_replace(&source, &dest).expect("copy");
        assert_eq!(copied, 9);
        assert_eq!(fs::read(&dest).expect("read dest"), b"new bytes");
        assert!(source.exists());
    }
}
