//! File-backed metadata / status bus.
//!
//! # Storage layout
//!
//! ```text
//! <bus>/
//!   metadata/
//!     gitURL      (one file per key, mounted-ConfigMap style)
//!     ref
//!     commit
//!     paused
//!     profile     (resolved profile, YAML or JSON)
//!     gitAuth     (optional credential reference, YAML or JSON)
//!   status/
//!     <gateway>.json
//! ```
//!
//! The controller owns `metadata/`; each agent owns exactly one file under
//! `status/`. Writes go through a `.tmp` sibling and `rename`, so readers
//! never see a torn record.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{io_err, StoreError};
use crate::status::GatewayStatus;
use crate::types::{GitAuthSpec, Metadata, Profile};

/// Metadata key names, as they appear on disk.
pub mod keys {
    pub const GIT_URL: &str = "gitURL";
    pub const REF: &str = "ref";
    pub const COMMIT: &str = "commit";
    pub const PAUSED: &str = "paused";
    pub const PROFILE: &str = "profile";
    pub const GIT_AUTH: &str = "gitAuth";
}

// ---------------------------------------------------------------------------
// 1. Path helpers
// ---------------------------------------------------------------------------

/// `<bus>/metadata/`
pub fn metadata_dir_at(bus: &Path) -> PathBuf {
    bus.join("metadata")
}

/// `<bus>/status/`
pub fn status_dir_at(bus: &Path) -> PathBuf {
    bus.join("status")
}

/// `<bus>/status/<gateway>.json`. Validates the gateway name, no I/O.
pub fn status_path_at(bus: &Path, gateway: &str) -> Result<PathBuf, StoreError> {
    if gateway.is_empty()
        || gateway.starts_with('.')
        || gateway.contains('/')
        || gateway.contains('\\')
    {
        return Err(StoreError::InvalidGatewayName(gateway.to_string()));
    }
    Ok(status_dir_at(bus).join(format!("{gateway}.json")))
}

// ---------------------------------------------------------------------------
// 2. Load
// ---------------------------------------------------------------------------

/// Read the desired-state record. Missing keys read as empty strings; a
/// missing metadata directory is [`StoreError::MetadataNotFound`].
pub fn load_metadata_at(bus: &Path) -> Result<Metadata, StoreError> {
    let dir = metadata_dir_at(bus);
    if !dir.is_dir() {
        return Err(StoreError::MetadataNotFound { path: dir });
    }
    Ok(Metadata {
        git_url: read_key(&dir, keys::GIT_URL)?,
        git_ref: read_key(&dir, keys::REF)?,
        commit: read_key(&dir, keys::COMMIT)?,
        paused: read_key(&dir, keys::PAUSED)?,
    })
}

/// Read and parse the published profile.
pub fn load_profile_at(bus: &Path) -> Result<Profile, StoreError> {
    let path = metadata_dir_at(bus).join(keys::PROFILE);
    let contents = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return Err(StoreError::ProfileNotFound { path });
        }
        Err(err) => return Err(io_err(&path, err)),
    };
    serde_yaml::from_str(&contents).map_err(|source| StoreError::Parse { path, source })
}

/// Read the published credential reference. Absent or blank means the
/// repository is public (or the agent has credential files mounted).
pub fn load_git_auth_at(bus: &Path) -> Result<Option<GitAuthSpec>, StoreError> {
    let path = metadata_dir_at(bus).join(keys::GIT_AUTH);
    let contents = match std::fs::read_to_string(&path) {
        Ok(contents) if contents.trim().is_empty() => return Ok(None),
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(io_err(&path, err)),
    };
    serde_yaml::from_str(&contents)
        .map(Some)
        .map_err(|source| StoreError::Parse { path, source })
}

/// Read one gateway's last written status, if any.
pub fn load_status_at(bus: &Path, gateway: &str) -> Result<Option<GatewayStatus>, StoreError> {
    let path = status_path_at(bus, gateway)?;
    let contents = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(io_err(&path, err)),
    };
    serde_json::from_str(&contents)
        .map(Some)
        .map_err(|source| StoreError::Json { path, source })
}

/// All status records on the bus, sorted by gateway name.
///
/// Skips `.tmp` leftovers and anything that is not `*.json`.
pub fn list_statuses_at(bus: &Path) -> Result<Vec<(String, GatewayStatus)>, StoreError> {
    let dir = status_dir_at(bus);
    if !dir.exists() {
        return Ok(vec![]);
    }

    let mut entries: Vec<_> = std::fs::read_dir(&dir)
        .map_err(|e| io_err(&dir, e))?
        .filter_map(|e| e.ok())
        .collect();
    entries.sort_by_key(|e| e.file_name());

    let mut result = Vec::new();
    for entry in entries {
        let fname = entry.file_name();
        let name = fname.to_string_lossy();
        let Some(gateway) = name.strip_suffix(".json") else {
            continue;
        };
        if let Some(status) = load_status_at(bus, gateway)? {
            result.push((gateway.to_string(), status));
        }
    }
    Ok(result)
}

// ---------------------------------------------------------------------------
// 3. Save
// ---------------------------------------------------------------------------

/// Overwrite one gateway's status record atomically.
///
/// Write flow: serialize → `<gateway>.json.tmp` sibling → `rename`.
pub fn save_status_at(bus: &Path, gateway: &str, status: &GatewayStatus) -> Result<(), StoreError> {
    let path = status_path_at(bus, gateway)?;
    let json = serde_json::to_string_pretty(status).map_err(|source| StoreError::Json {
        path: path.clone(),
        source,
    })?;
    write_atomic(&path, json.as_bytes())
}

/// Publish a metadata record. Used by tooling and tests standing in for the
/// controller; the agent itself never writes metadata.
pub fn save_metadata_at(bus: &Path, meta: &Metadata) -> Result<(), StoreError> {
    let dir = metadata_dir_at(bus);
    write_atomic(&dir.join(keys::GIT_URL), meta.git_url.as_bytes())?;
    write_atomic(&dir.join(keys::REF), meta.git_ref.as_bytes())?;
    write_atomic(&dir.join(keys::PAUSED), meta.paused.as_bytes())?;
    // Commit last: a non-empty commit is what readers wait on.
    write_atomic(&dir.join(keys::COMMIT), meta.commit.as_bytes())
}

/// Publish a resolved profile as YAML.
pub fn save_profile_at(bus: &Path, profile: &Profile) -> Result<(), StoreError> {
    let yaml = serde_yaml::to_string(profile)?;
    write_atomic(&metadata_dir_at(bus).join(keys::PROFILE), yaml.as_bytes())
}

// ---------------------------------------------------------------------------
// 4. Internal helpers
// ---------------------------------------------------------------------------

fn read_key(dir: &Path, key: &str) -> Result<String, StoreError> {
    let path = dir.join(key);
    match std::fs::read_to_string(&path) {
        Ok(value) => Ok(value.trim().to_string()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(String::new()),
        Err(err) => Err(io_err(&path, err)),
    }
}

fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), StoreError> {
    let Some(dir) = path.parent() else {
        return Err(io_err(path, std::io::Error::other("path has no parent")));
    };
    std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    std::fs::write(&tmp, contents).map_err(|e| io_err(&tmp, e))?;
    if let Err(err) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(path, err));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
