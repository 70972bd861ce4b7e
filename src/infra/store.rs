// ============================================================
// Layer 6 — Layered Store (Bronze / Silver / Gold)
// ============================================================
// File-backed, append-only, versioned persistence for every
// stage output.
//
//   store/
//     bronze/v0001/unpartitioned.json       raw combined dataset
//     silver/v0001/train.json, test.json    cleaned datasets
//                 snapshot.json             the train-fitted statistics
//     gold/v0001/train.json, test.json      selected feature matrices
//                 selection.json            the train-fitted selection
//     <layer>/v<NNNN>/_meta.json            what was written, and when
//
// Write protocol:
//   1. begin(layer)  → a hidden staging directory .staging-v<NNNN>
//   2. write_*()     → each file is written and fsynced
//   3. commit()      → staging dir fsynced, then renamed to v<NNNN>
// A rename is atomic, so readers either see a complete version or
// no version at all. The staging directory is owned by a StagingDir
// guard that deletes it on drop unless it was committed, so an error
// at any step leaves nothing behind. An existing version is never
// replaced. The model registry stages its versions the same way.
//
// Why JSON for datasets?
//   Layers are small (thousands of rows) and must be inspectable by
//   hand when a stage boundary check fires. serde_json with
//   float_roundtrip reads every f64 back bit-identical.
//
// Reference: Rust Book §9 (Error Handling), std::fs::rename docs

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
    fmt,
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
};

use crate::domain::dataset::{Dataset, Partition};
use crate::domain::feature_matrix::FeatureMatrix;

const META_FILE: &str = "_meta.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    Bronze,
    Silver,
    Gold,
}

impl Layer {
    pub fn as_str(&self) -> &'static str {
        match self {
            Layer::Bronze => "bronze",
            Layer::Silver => "silver",
            Layer::Gold   => "gold",
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Written last into every committed version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionMeta {
    pub layer:      Layer,
    pub version:    u32,
    pub created_at: DateTime<Utc>,
    pub files:      Vec<String>,
}

pub fn version_dir_name(version: u32) -> String {
    format!("v{version:04}")
}

/// Parse "v0007" → 7. Anything else (staging dirs, stray files) → None.
pub fn parse_version_dir(name: &str) -> Option<u32> {
    let digits = name.strip_prefix('v')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Committed versions under `dir`, ascending.
pub fn list_versions(dir: &Path) -> Result<Vec<u32>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut versions = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Cannot list '{}'", dir.display()))? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            if let Some(v) = entry.file_name().to_str().and_then(parse_version_dir) {
                versions.push(v);
            }
        }
    }
    versions.sort_unstable();
    Ok(versions)
}

/// Write `bytes` to `path` and fsync the file.
pub fn write_synced(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut f = File::create(path).with_context(|| format!("Cannot create '{}'", path.display()))?;
    f.write_all(bytes)?;
    f.sync_all()
        .with_context(|| format!("Cannot fsync '{}'", path.display()))
}

/// Fsync a directory so a rename inside it is durable.
#[cfg(unix)]
pub fn sync_dir(path: &Path) -> Result<()> {
    File::open(path)
        .and_then(|d| d.sync_all())
        .with_context(|| format!("Cannot fsync directory '{}'", path.display()))
}

#[cfg(not(unix))]
pub fn sync_dir(_path: &Path) -> Result<()> {
    Ok(())
}

pub struct LayeredStore {
    root: PathBuf,
}

impl LayeredStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        for layer in [Layer::Bronze, Layer::Silver, Layer::Gold] {
            let dir = root.join(layer.as_str());
            fs::create_dir_all(&dir)
                .with_context(|| format!("Cannot create store layer '{}'", dir.display()))?;
        }
        Ok(Self { root })
    }

    fn layer_dir(&self, layer: Layer) -> PathBuf {
        self.root.join(layer.as_str())
    }

    pub fn version_dir(&self, layer: Layer, version: u32) -> PathBuf {
        self.layer_dir(layer).join(version_dir_name(version))
    }

    pub fn versions(&self, layer: Layer) -> Result<Vec<u32>> {
        list_versions(&self.layer_dir(layer))
    }

    pub fn latest_version(&self, layer: Layer) -> Result<Option<u32>> {
        Ok(self.versions(layer)?.last().copied())
    }

    /// Start staging the next version of `layer`.
    pub fn begin(&self, layer: Layer) -> Result<StagedVersion> {
        let version = self.latest_version(layer)?.unwrap_or(0) + 1;
        let dir = StagingDir::create(&self.layer_dir(layer), self.version_dir(layer, version))?;
        Ok(StagedVersion { layer, version, dir, files: Vec::new() })
    }

    pub fn read_json<T: DeserializeOwned>(&self, layer: Layer, version: u32, name: &str) -> Result<T> {
        let path = self.version_dir(layer, version).join(name);
        let text = fs::read_to_string(&path)
            .with_context(|| format!("Cannot read '{}'", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Malformed JSON in '{}'", path.display()))
    }

    /// Read one partition's dataset, re-checking every row against its schema.
    pub fn read_dataset<P: Partition>(&self, layer: Layer, version: u32) -> Result<Dataset<P>> {
        let stored: Dataset<P> = self.read_json(layer, version, &partition_file::<P>())?;
        let schema = stored.schema().clone();
        Ok(Dataset::checked(schema, stored.into_rows())?)
    }

    pub fn read_matrix<P: Partition>(&self, layer: Layer, version: u32) -> Result<FeatureMatrix<P>> {
        self.read_json(layer, version, &partition_file::<P>())
    }

    pub fn read_meta(&self, layer: Layer, version: u32) -> Result<VersionMeta> {
        self.read_json(layer, version, META_FILE)
    }

    /// Newest committed version of `layer`, or an error naming the layer.
    pub fn require_latest(&self, layer: Layer) -> Result<u32> {
        self.latest_version(layer)?.with_context(|| {
            format!("The {layer} layer in '{}' holds no version yet", self.root.display())
        })
    }
}

fn partition_file<P: Partition>() -> String {
    format!("{}.json", P::TAG.as_str())
}

// ─── StagingDir ───────────────────────────────────────────────────────────────
/// A hidden directory that becomes `target` on `commit`.
/// Dropped without commit, it removes itself, whatever step failed.
pub struct StagingDir {
    path:      PathBuf,
    target:    PathBuf,
    committed: bool,
}

impl StagingDir {
    /// Create `<parent>/.staging-<target name>`, clearing a stale one.
    pub fn create(parent: &Path, target: PathBuf) -> Result<Self> {
        let name = target
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("'{}' has no directory name", target.display()))?;
        let path = parent.join(format!(".staging-{name}"));
        if path.exists() {
            // Left behind by a crashed run; it was never visible.
            fs::remove_dir_all(&path)
                .with_context(|| format!("Cannot clear stale '{}'", path.display()))?;
        }
        fs::create_dir_all(&path)
            .with_context(|| format!("Cannot create '{}'", path.display()))?;
        Ok(Self { path, target, committed: false })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Fsync, then rename into place. Refuses to replace an existing target.
    pub fn commit(mut self) -> Result<PathBuf> {
        sync_dir(&self.path)?;
        if self.target.exists() {
            bail!("Refusing to overwrite existing '{}'", self.target.display());
        }
        fs::rename(&self.path, &self.target).with_context(|| {
            format!("Cannot commit '{}' → '{}'", self.path.display(), self.target.display())
        })?;
        self.committed = true;
        if let Some(parent) = self.target.parent() {
            sync_dir(parent)?;
        }
        Ok(self.target.clone())
    }
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        if !self.committed && self.path.exists() {
            if let Err(e) = fs::remove_dir_all(&self.path) {
                tracing::warn!("Cannot remove staging dir '{}': {e}", self.path.display());
            }
        }
    }
}

// ─── StagedVersion ────────────────────────────────────────────────────────────
/// A store version being written. Invisible to readers until `commit`.
pub struct StagedVersion {
    layer:   Layer,
    version: u32,
    dir:     StagingDir,
    files:   Vec<String>,
}

impl StagedVersion {
    pub fn write_json<T: Serialize>(&mut self, name: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value)
            .with_context(|| format!("Cannot serialize '{name}'"))?;
        write_synced(&self.dir.path().join(name), &bytes)?;
        self.files.push(name.to_string());
        Ok(())
    }

    pub fn write_dataset<P: Partition>(&mut self, dataset: &Dataset<P>) -> Result<()> {
        self.write_json(&partition_file::<P>(), dataset)
    }

    pub fn write_matrix<P: Partition>(&mut self, matrix: &FeatureMatrix<P>) -> Result<()> {
        self.write_json(&partition_file::<P>(), matrix)
    }

    /// Make the version visible. Fails if the target version already exists.
    pub fn commit(self) -> Result<u32> {
        let meta = VersionMeta {
            layer:      self.layer,
            version:    self.version,
            created_at: Utc::now(),
            files:      self.files.clone(),
        };
        write_synced(&self.dir.path().join(META_FILE), &serde_json::to_vec_pretty(&meta)?)?;
        self.dir
            .commit()
            .with_context(|| format!("Cannot commit {} {}", self.layer, version_dir_name(self.version)))?;

        tracing::info!(
            "Committed {} {} ({} files)",
            self.layer,
            version_dir_name(self.version),
            self.files.len()
        );
        Ok(self.version)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::dataset::{Test, Unpartitioned};
    use crate::domain::schema::{Column, Schema, Value};
    use crate::domain::dataset::Row;

    fn dataset() -> Dataset<Unpartitioned> {
        Dataset::new(
            Schema::new(vec![Column::numeric("tenure"), Column::categorical("contract")]),
            vec![Row {
                id:     "c1".into(),
                values: vec![Value::Number(3.0), Value::Missing],
                churn:  true,
            }],
        )
        .unwrap()
    }

    #[test]
    fn test_versions_increase_from_one() {
        let dir   = tempfile::tempdir().unwrap();
        let store = LayeredStore::open(dir.path()).unwrap();
        assert_eq!(store.latest_version(Layer::Bronze).unwrap(), None);

        for expected in 1..=3 {
            let mut staged = store.begin(Layer::Bronze).unwrap();
            staged.write_dataset(&dataset()).unwrap();
            assert_eq!(staged.commit().unwrap(), expected);
        }
        assert_eq!(store.versions(Layer::Bronze).unwrap(), vec![1, 2, 3]);
        assert!(store.versions(Layer::Silver).unwrap().is_empty());
    }

    #[test]
    fn test_dataset_roundtrip() {
        let dir   = tempfile::tempdir().unwrap();
        let store = LayeredStore::open(dir.path()).unwrap();
        let mut staged = store.begin(Layer::Bronze).unwrap();
        staged.write_dataset(&dataset()).unwrap();
        let v = staged.commit().unwrap();

        let back: Dataset<Unpartitioned> = store.read_dataset(Layer::Bronze, v).unwrap();
        assert_eq!(back, dataset());
        let meta = store.read_meta(Layer::Bronze, v).unwrap();
        assert_eq!(meta.files, vec!["unpartitioned.json".to_string()]);
    }

    #[test]
    fn test_uncommitted_version_is_invisible_and_cleaned_up() {
        let dir   = tempfile::tempdir().unwrap();
        let store = LayeredStore::open(dir.path()).unwrap();
        {
            let mut staged = store.begin(Layer::Silver).unwrap();
            staged.write_json("snapshot.json", &42).unwrap();
            // dropped without commit
        }
        assert_eq!(store.latest_version(Layer::Silver).unwrap(), None);
        let leftovers = fs::read_dir(dir.path().join("silver")).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_reading_wrong_partition_fails() {
        let dir   = tempfile::tempdir().unwrap();
        let store = LayeredStore::open(dir.path()).unwrap();
        let mut staged = store.begin(Layer::Bronze).unwrap();
        staged.write_dataset(&dataset()).unwrap();
        let v = staged.commit().unwrap();
        assert!(store.read_dataset::<Test>(Layer::Bronze, v).is_err());
    }

    #[test]
    fn test_failed_commit_leaves_no_staging_dir() {
        let dir   = tempfile::tempdir().unwrap();
        let store = LayeredStore::open(dir.path()).unwrap();
        let mut staged = store.begin(Layer::Gold).unwrap();
        staged.write_json("selection.json", &1).unwrap();
        // Another writer takes v0001 before this one commits.
        fs::create_dir_all(store.version_dir(Layer::Gold, 1)).unwrap();

        let err = staged.commit().unwrap_err();
        assert!(format!("{err:#}").contains("Refusing to overwrite"));
        let names: Vec<String> = fs::read_dir(dir.path().join("gold"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["v0001".to_string()]);
    }

    #[test]
    fn test_require_latest_names_layer() {
        let dir   = tempfile::tempdir().unwrap();
        let store = LayeredStore::open(dir.path()).unwrap();
        let err = store.require_latest(Layer::Gold).unwrap_err();
        assert!(err.to_string().contains("gold"));
    }

    #[test]
    fn test_parse_version_dir() {
        assert_eq!(parse_version_dir("v0012"), Some(12));
        assert_eq!(parse_version_dir(".staging-v0001"), None);
        assert_eq!(parse_version_dir("v"), None);
        assert_eq!(parse_version_dir("vx1"), None);
    }
}
