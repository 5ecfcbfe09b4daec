//! Staged, atomic plan execution.
//!
//! ## `execute` protocol
//!
//! 1. Stage every mapping into a fresh staging tree. Later mappings overlay
//!    earlier ones; the last writer owns the file.
//! 2. Apply the plan's template callback to files owned by `template: true`
//!    mappings.
//! 3. Diff the staged set against the managed part of the live directory
//!    (SHA-256 of contents).
//! 4. Promote: create every destination directory, then rename
//!    added/modified files into place, delete removed files, prune emptied
//!    directories.
//!
//! Atomicity is per file: each rename replaces one file in a single step, so
//! a reader never sees a half-written file. A cycle as a whole is not atomic.
//! Directory conflicts fail step 4 before the first rename; an I/O error
//! during the renames themselves can leave earlier files promoted, and the
//! next cycle converges them.
//!
//! Steps 1–3 never touch the live directory. Dry-run stops after step 3 and
//! stages into a private temp directory instead of `.sync-staging`.

use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsStr;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use glob::{MatchOptions, Pattern};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use stoker_core::MappingType;

use crate::error::{io_err, SyncError};
use crate::plan::{ResolvedMapping, SyncPlan, STAGING_DIR_NAME};

/// Top-level directory whose children are reported as synced projects.
const PROJECTS_DIR: &str = "projects";

// ---------------------------------------------------------------------------
// SyncResult
// ---------------------------------------------------------------------------

/// Change accounting for one `execute` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncResult {
    pub files_added: u32,
    pub files_modified: u32,
    pub files_deleted: u32,
    /// Sorted, distinct names of `projects/<name>` directories in the staged set.
    pub projects_synced: Vec<String>,
    pub duration: Duration,
}

impl SyncResult {
    pub fn files_changed(&self) -> u32 {
        self.files_added + self.files_modified + self.files_deleted
    }
}

// ---------------------------------------------------------------------------
// execute
// ---------------------------------------------------------------------------

/// Run `plan` to completion. See the module docs for the step order.
pub fn execute(plan: &SyncPlan) -> Result<SyncResult, SyncError> {
    let started = Instant::now();
    let excludes = Excludes::compile(&plan.exclude_patterns)?;

    // Dry-run never creates anything under the live directory.
    let dry_run_dir;
    let _guard;
    let staging_root = if plan.dry_run {
        dry_run_dir = tempfile::Builder::new()
            .prefix("stoker-dry-run-")
            .tempdir()
            .map_err(|e| io_err(std::env::temp_dir(), e))?;
        dry_run_dir.path().to_path_buf()
    } else {
        reset_dir(&plan.staging_dir)?;
        _guard = StagingGuard(plan.staging_dir.clone());
        plan.staging_dir.clone()
    };

    let staged = stage_all(plan, &staging_root, &excludes)?;

    for (rel, owner) in &staged {
        if plan.mappings[*owner].template {
            let path = staging_root.join(rel);
            (plan.apply_template)(&path).map_err(|source| SyncError::Template {
                path: rel.clone(),
                source,
            })?;
        }
    }

    let live = collect_live(plan, &excludes)?;
    let changes = diff(&staging_root, &plan.live_dir, &staged, &live)?;

    if plan.dry_run {
        tracing::info!(
            "[dry-run] would add {}, modify {}, delete {}",
            changes.added.len(),
            changes.modified.len(),
            changes.deleted.len()
        );
    } else {
        promote(&staging_root, &plan.live_dir, &changes)?;
    }

    Ok(SyncResult {
        files_added: count(&changes.added),
        files_modified: count(&changes.modified),
        files_deleted: count(&changes.deleted),
        projects_synced: projects_in(staged.keys()),
        duration: started.elapsed(),
    })
}

// ---------------------------------------------------------------------------
// Staging
// ---------------------------------------------------------------------------

/// Removes the staging tree when the call returns, success or not.
struct StagingGuard(PathBuf);

impl Drop for StagingGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.0) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("failed to remove staging dir {}: {e}", self.0.display());
            }
        }
    }
}

fn reset_dir(dir: &Path) -> Result<(), SyncError> {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => tracing::debug!("removed leftover staging dir {}", dir.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(io_err(dir, e)),
    }
    std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))
}

/// Stage all mappings. Returns staged relative path → owning mapping index.
fn stage_all(
    plan: &SyncPlan,
    staging_root: &Path,
    excludes: &Excludes,
) -> Result<BTreeMap<PathBuf, usize>, SyncError> {
    let mut staged = BTreeMap::new();

    for (index, mapping) in plan.mappings.iter().enumerate() {
        if !mapping.source.exists() {
            tracing::debug!(
                "mapping[{index}]: source {} absent, skipping",
                mapping.source.display()
            );
            continue;
        }
        for (from, rel_in_mapping) in source_files(index, mapping, excludes)? {
            let rel = if rel_in_mapping.as_os_str().is_empty() {
                mapping.destination.clone()
            } else {
                mapping.destination.join(&rel_in_mapping)
            };
            let to = staging_root.join(&rel);
            if let Some(parent) = to.parent() {
                std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
            }
            std::fs::copy(&from, &to).map_err(|e| io_err(&from, e))?;
            if let Some(previous) = staged.insert(rel.clone(), index) {
                tracing::debug!(
                    "mapping[{index}] overlays mapping[{previous}] at {}",
                    rel.display()
                );
            }
        }
    }
    Ok(staged)
}

/// Files to stage for one mapping, as (absolute source, path relative to
/// the mapping's destination). An empty relative path means the destination
/// itself.
fn source_files(
    index: usize,
    mapping: &ResolvedMapping,
    excludes: &Excludes,
) -> Result<Vec<(PathBuf, PathBuf)>, SyncError> {
    match mapping.mapping_type {
        MappingType::File => {
            if !mapping.source.is_file() {
                return Err(SyncError::SourceType {
                    index,
                    path: mapping.source.clone(),
                    expected: MappingType::File,
                });
            }
            let name = PathBuf::from(mapping.source.file_name().unwrap_or_default());
            if excludes.matches(&name) {
                return Ok(vec![]);
            }
            // A file mapped onto the live root keeps its own name.
            let rel = if mapping.destination.as_os_str().is_empty() {
                name
            } else {
                PathBuf::new()
            };
            Ok(vec![(mapping.source.clone(), rel)])
        }
        MappingType::Dir => {
            if !mapping.source.is_dir() {
                return Err(SyncError::SourceType {
                    index,
                    path: mapping.source.clone(),
                    expected: MappingType::Dir,
                });
            }
            let mut files = Vec::new();
            for rel in walk_files(&mapping.source, excludes, |name| name == ".git")? {
                files.push((mapping.source.join(&rel), rel));
            }
            Ok(files)
        }
    }
}

/// Regular files under `root`, relative to it, minus excluded paths.
/// `skip_dir` prunes directories by name.
fn walk_files(
    root: &Path,
    excludes: &Excludes,
    skip_dir: impl Fn(&str) -> bool,
) -> Result<Vec<PathBuf>, SyncError> {
    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            if entry.depth() == 0 || !entry.file_type().is_dir() {
                return true;
            }
            let name = entry.file_name().to_string_lossy();
            if skip_dir(&name) {
                return false;
            }
            match entry.path().strip_prefix(root) {
                Ok(rel) => !excludes.matches(rel),
                Err(_) => true,
            }
        });

    for entry in walker {
        let entry = entry.map_err(|source| SyncError::Walk {
            path: root.to_path_buf(),
            source,
        })?;
        let file_type = entry.file_type();
        if file_type.is_symlink() {
            tracing::warn!("skipping symlink {}", entry.path().display());
            continue;
        }
        if !file_type.is_file() {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(root) else {
            continue;
        };
        if !excludes.matches(rel) {
            files.push(rel.to_path_buf());
        }
    }
    Ok(files)
}

// ---------------------------------------------------------------------------
// Live side
// ---------------------------------------------------------------------------

/// Files in the live directory that the plan manages: everything under the
/// destination of a mapping whose source exists, minus excludes and the
/// staging tree.
fn collect_live(plan: &SyncPlan, excludes: &Excludes) -> Result<BTreeSet<PathBuf>, SyncError> {
    let mut live = BTreeSet::new();

    for mapping in &plan.mappings {
        if !mapping.source.exists() {
            continue;
        }
        match mapping.mapping_type {
            MappingType::File => {
                let rel = if mapping.destination.as_os_str().is_empty() {
                    PathBuf::from(mapping.source.file_name().unwrap_or_default())
                } else {
                    mapping.destination.clone()
                };
                let name = PathBuf::from(rel.file_name().unwrap_or_default());
                if plan.live_dir.join(&rel).is_file() && !excludes.matches(&name) {
                    live.insert(rel);
                }
            }
            MappingType::Dir => {
                let root = plan.live_dir.join(&mapping.destination);
                if !root.is_dir() {
                    continue;
                }
                let at_live_root = mapping.destination.as_os_str().is_empty();
                let skip = |name: &str| at_live_root && name == STAGING_DIR_NAME;
                for rel in walk_files(&root, excludes, skip)? {
                    live.insert(mapping.destination.join(rel));
                }
            }
        }
    }
    Ok(live)
}

// ---------------------------------------------------------------------------
// Diff + promote
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Changes {
    added: Vec<PathBuf>,
    modified: Vec<PathBuf>,
    deleted: Vec<PathBuf>,
}

fn diff(
    staging_root: &Path,
    live_dir: &Path,
    staged: &BTreeMap<PathBuf, usize>,
    live: &BTreeSet<PathBuf>,
) -> Result<Changes, SyncError> {
    let mut changes = Changes::default();
    for rel in staged.keys() {
        if !live.contains(rel) {
            changes.added.push(rel.clone());
        } else if hash_file(&staging_root.join(rel))? != hash_file(&live_dir.join(rel))? {
            changes.modified.push(rel.clone());
        }
    }
    changes.deleted = live
        .iter()
        .filter(|rel| !staged.contains_key(*rel))
        .cloned()
        .collect();
    Ok(changes)
}

fn promote(staging_root: &Path, live_dir: &Path, changes: &Changes) -> Result<(), SyncError> {
    let promoted: Vec<&PathBuf> = changes.added.iter().chain(&changes.modified).collect();

    // All parents first: a file squatting on a needed directory fails here,
    // before any live file is replaced.
    let parents: BTreeSet<PathBuf> = promoted
        .iter()
        .filter_map(|rel| live_dir.join(rel).parent().map(Path::to_path_buf))
        .collect();
    for parent in &parents {
        std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }

    for rel in promoted {
        let from = staging_root.join(rel);
        let to = live_dir.join(rel);
        std::fs::rename(&from, &to).map_err(|e| io_err(&to, e))?;
        tracing::debug!("promoted {}", rel.display());
    }

    for rel in &changes.deleted {
        let path = live_dir.join(rel);
        std::fs::remove_file(&path).map_err(|e| io_err(&path, e))?;
        tracing::debug!("deleted {}", rel.display());
        prune_empty_parents(live_dir, &path);
    }
    Ok(())
}

/// Remove now-empty directories between `path` and `live_dir` (exclusive).
fn prune_empty_parents(live_dir: &Path, path: &Path) {
    let mut dir = path.parent();
    while let Some(current) = dir {
        if current == live_dir || !current.starts_with(live_dir) {
            break;
        }
        // Fails on non-empty directories, which ends the walk.
        if std::fs::remove_dir(current).is_err() {
            break;
        }
        dir = current.parent();
    }
}

fn hash_file(path: &Path) -> Result<String, SyncError> {
    let mut file = File::open(path).map_err(|e| io_err(path, e))?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher).map_err(|e| io_err(path, e))?;
    Ok(hex::encode(hasher.finalize()))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct Excludes {
    patterns: Vec<(Pattern, bool)>,
}

impl Excludes {
    fn compile(raw: &[String]) -> Result<Self, SyncError> {
        let patterns = raw
            .iter()
            .map(|p| {
                Pattern::new(p)
                    .map(|pattern| (pattern, !p.contains('/')))
                    .map_err(|source| SyncError::Pattern {
                        pattern: p.clone(),
                        source,
                    })
            })
            .collect::<Result<_, _>>()?;
        Ok(Self { patterns })
    }

    /// `rel` is relative to the mapping root. Patterns without a `/` also
    /// match against the final component.
    fn matches(&self, rel: &Path) -> bool {
        let options = MatchOptions {
            case_sensitive: true,
            require_literal_separator: true,
            require_literal_leading_dot: false,
        };
        let base = rel.file_name().map(Path::new);
        self.patterns.iter().any(|(pattern, basename_too)| {
            pattern.matches_path_with(rel, options)
                || (*basename_too && base.is_some_and(|b| pattern.matches_path_with(b, options)))
        })
    }
}

fn projects_in<'a>(staged: impl Iterator<Item = &'a PathBuf>) -> Vec<String> {
    let mut names = BTreeSet::new();
    for rel in staged {
        let mut parts = rel.components();
        let top = parts.next().map(|c| c.as_os_str());
        let name = parts.next().map(|c| c.as_os_str().to_string_lossy().to_string());
        // projects/<name>/... ; a bare file directly under projects/ is not a project.
        if top == Some(OsStr::new(PROJECTS_DIR)) && parts.next().is_some() {
            if let Some(name) = name {
                names.insert(name);
            }
        }
    }
    names.into_iter().collect()
}

fn count(paths: &[PathBuf]) -> u32 {
    u32::try_from(paths.len()).unwrap_or(u32::MAX)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
