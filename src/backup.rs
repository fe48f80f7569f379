use anyhow::{anyhow, bail, Context};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Seek, Write};
use std::path::Path;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::db::DB_FILE_NAME;

const MANIFEST_ENTRY: &str = "manifest.json";
const DB_ENTRY: &str = "db/progress.sqlite3";
const ZIP_MAGIC: [u8; 4] = *b"PK\x03\x04";
const SQLITE_MAGIC: &[u8; 16] = b"SQLite format 3\0";
pub const BUNDLE_FORMAT: &str = "progressd-workspace-v1";
pub const LEGACY_SQLITE_FORMAT: &str = "raw-sqlite3";

/// `manifest.json` at the root of every bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Manifest {
    format: String,
    version: u32,
    app_version: String,
    exported_at: String,
    db_sha256: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub bundle_format: String,
    pub entry_count: usize,
    pub db_sha256: String,
}

#[derive(Debug, Clone)]
pub struct ImportSummary {
    pub bundle_format_detected: String,
}

fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

fn write_entry<W: Write + Seek>(zip: &mut ZipWriter<W>, name: &str, bytes: &[u8]) -> anyhow::Result<()> {
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);
    zip.start_file(name, opts)
        .with_context(|| format!("failed to start bundle entry {}", name))?;
    zip.write_all(bytes)
        .with_context(|| format!("failed to write bundle entry {}", name))
}

fn read_entry<R: Read + Seek>(archive: &mut ZipArchive<R>, name: &str) -> anyhow::Result<Vec<u8>> {
    let mut entry = archive
        .by_name(name)
        .with_context(|| format!("bundle has no {} entry", name))?;
    let mut bytes = Vec::new();
    entry
        .read_to_end(&mut bytes)
        .with_context(|| format!("failed to extract {}", name))?;
    Ok(bytes)
}

/// Writes the workspace database and its manifest to a zip at `out_path`.
pub fn export_workspace_bundle(
    workspace_path: &Path,
    out_path: &Path,
) -> anyhow::Result<ExportSummary> {
    let db_path = workspace_path.join(DB_FILE_NAME);
    if !db_path.is_file() {
        bail!("workspace database not found: {}", db_path.display());
    }
    let db_bytes =
        std::fs::read(&db_path).with_context(|| format!("failed to read {}", db_path.display()))?;
    let db_sha256 = sha256_hex(&db_bytes);

    if let Some(dir) = out_path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }
    let file = File::create(out_path)
        .with_context(|| format!("failed to create bundle {}", out_path.display()))?;

    let manifest = Manifest {
        format: BUNDLE_FORMAT.to_string(),
        version: 1,
        app_version: env!("CARGO_PKG_VERSION").to_string(),
        exported_at: chrono::Utc::now().to_rfc3339(),
        db_sha256: Some(db_sha256.clone()),
    };
    let manifest_json =
        serde_json::to_vec_pretty(&manifest).context("failed to serialize manifest")?;

    let mut zip = ZipWriter::new(file);
    write_entry(&mut zip, MANIFEST_ENTRY, &manifest_json)?;
    write_entry(&mut zip, DB_ENTRY, &db_bytes)?;
    zip.finish().context("failed to finalize bundle")?;

    tracing::debug!(bundle = %out_path.display(), bytes = db_bytes.len(), "bundle written");
    Ok(ExportSummary {
        bundle_format: manifest.format,
        entry_count: 2,
        db_sha256,
    })
}

fn ensure_sqlite(bytes: &[u8], source: &Path) -> anyhow::Result<()> {
    if !bytes.starts_with(SQLITE_MAGIC) {
        bail!("not a sqlite database: {}", source.display());
    }
    Ok(())
}

/// Writes `bytes` beside `dst` first, then swaps it into place.
fn replace_file(dst: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let staging = dst.with_extension("sqlite3.importing");
    {
        let mut out = File::create(&staging)
            .with_context(|| format!("failed to create {}", staging.display()))?;
        out.write_all(bytes)
            .and_then(|_| out.flush())
            .with_context(|| format!("failed to write {}", staging.display()))?;
    }
    if dst.exists() {
        std::fs::remove_file(dst).with_context(|| format!("failed to remove {}", dst.display()))?;
    }
    std::fs::rename(&staging, dst)
        .with_context(|| format!("failed to move database into {}", dst.display()))
}

/// Replaces the workspace database with the one in `in_path`. A plain
/// sqlite file (not a zip) is copied as-is; anything else is refused
/// before the workspace is touched.
pub fn import_workspace_bundle(
    in_path: &Path,
    workspace_path: &Path,
) -> anyhow::Result<ImportSummary> {
    std::fs::create_dir_all(workspace_path)
        .with_context(|| format!("failed to create workspace {}", workspace_path.display()))?;
    let dst = workspace_path.join(DB_FILE_NAME);

    if !is_zip_file(in_path)? {
        let bytes = std::fs::read(in_path)
            .with_context(|| format!("failed to read backup {}", in_path.display()))?;
        ensure_sqlite(&bytes, in_path)?;
        replace_file(&dst, &bytes)?;
        return Ok(ImportSummary {
            bundle_format_detected: LEGACY_SQLITE_FORMAT.to_string(),
        });
    }

    let file = File::open(in_path)
        .with_context(|| format!("failed to open bundle {}", in_path.display()))?;
    let mut archive = ZipArchive::new(file).context("bundle is not a readable zip archive")?;

    let manifest: Manifest = serde_json::from_slice(&read_entry(&mut archive, MANIFEST_ENTRY)?)
        .context("manifest.json is malformed")?;
    if manifest.format != BUNDLE_FORMAT {
        bail!("unsupported bundle format: {}", manifest.format);
    }

    let db_bytes = read_entry(&mut archive, DB_ENTRY)?;
    if let Some(expected) = manifest.db_sha256.as_deref() {
        let actual = sha256_hex(&db_bytes);
        if !actual.eq_ignore_ascii_case(expected) {
            return Err(anyhow!(
                "database checksum mismatch: manifest says {}, bundle holds {}",
                expected,
                actual
            ));
        }
    }
    ensure_sqlite(&db_bytes, Path::new(DB_ENTRY))?;
    replace_file(&dst, &db_bytes)?;

    Ok(ImportSummary {
        bundle_format_detected: manifest.format,
    })
}

fn is_zip_file(path: &Path) -> anyhow::Result<bool> {
    let mut file =
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut head = [0u8; 4];
    match file.read_exact(&mut head) {
        Ok(()) => Ok(head == ZIP_MAGIC),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e).with_context(|| format!("failed to read {}", path.display())),
    }
}
