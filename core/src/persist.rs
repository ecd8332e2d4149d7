use crate::error::Result;
use crate::store::Tables;
use serde::{Deserialize, Serialize};
use std::fs::{self, create_dir_all, File};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use time::format_description::well_known::Rfc3339;

pub const SNAPSHOT_VERSION: u32 = 2;

#[derive(Debug, Serialize, Deserialize)]
pub struct MetaFile {
    pub num_docs: usize,
    pub num_terms: usize,
    pub saved_at: String,
    pub version: u32,
}

impl MetaFile {
    pub fn describe(num_docs: usize, num_terms: usize) -> Self {
        let saved_at = time::OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default();
        Self { num_docs, num_terms, saved_at, version: SNAPSHOT_VERSION }
    }
}

#[derive(Debug, Clone)]
pub struct IndexPaths {
    pub root: PathBuf,
}

impl IndexPaths {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }
    fn snapshot(&self) -> PathBuf { self.root.join("index.bin") }
    fn snapshot_tmp(&self) -> PathBuf { self.root.join("index.bin.tmp") }
    fn meta(&self) -> PathBuf { self.root.join("meta.json") }
}

/// Replace the snapshot atomically: readers of the directory see either the
/// previous file or the new one.
pub(crate) fn save_snapshot(paths: &IndexPaths, tables: &Tables) -> Result<()> {
    create_dir_all(&paths.root)?;
    let bytes = bincode::serialize(tables)?;
    let tmp = paths.snapshot_tmp();
    let mut f = File::create(&tmp)?;
    f.write_all(&bytes)?;
    f.sync_all()?;
    fs::rename(tmp, paths.snapshot())?;
    Ok(())
}

pub(crate) fn load_snapshot(paths: &IndexPaths) -> Result<Option<Tables>> {
    create_dir_all(&paths.root)?;
    let mut f = match File::open(paths.snapshot()) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut buf = Vec::new();
    f.read_to_end(&mut buf)?;
    let tables = bincode::deserialize(&buf)?;
    Ok(Some(tables))
}

pub fn save_meta(paths: &IndexPaths, meta: &MetaFile) -> Result<()> {
    create_dir_all(&paths.root)?;
    let mut f = File::create(paths.meta())?;
    let json = serde_json::to_string_pretty(meta)?;
    f.write_all(json.as_bytes())?;
    Ok(())
}

pub fn load_meta(paths: &IndexPaths) -> Result<MetaFile> {
    let mut f = File::open(paths.meta())?;
    let mut buf = String::new();
    f.read_to_string(&mut buf)?;
    let meta: MetaFile = serde_json::from_str(&buf)?;
    Ok(meta)
}
