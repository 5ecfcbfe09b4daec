use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use filetime::{set_file_mtime, FileTime};
use stoker_core::{Mapping, Profile};
use stoker_sync::{compile_plan, execute, SyncError, SyncPlan, STAGING_DIR_NAME};
use stoker_template::{TemplateContext, TemplateResolver, TeraResolver};
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn write(root: &Path, rel: &str, content: &[u8]) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn read(root: &Path, rel: &str) -> String {
    fs::read_to_string(root.join(rel)).unwrap()
}

fn ctx() -> TemplateContext {
    TemplateContext::new("gw-blue").with_var("region", "us-east")
}

fn resolver() -> Arc<dyn TemplateResolver> {
    Arc::new(TeraResolver)
}

fn plan(profile: &Profile, repo: &TempDir, live: &TempDir) -> SyncPlan {
    compile_plan(profile, &ctx(), resolver(), repo.path(), live.path()).expect("compile")
}

/// `shared/` for everyone, `site/<region>/` overlaid on top.
fn layered_profile() -> Profile {
    let mut vars = BTreeMap::new();
    vars.insert("region".to_string(), "us-east".to_string());
    Profile {
        mappings: vec![
            Mapping::dir("shared", "config"),
            Mapping::dir("site/{{region}}", "config"),
        ],
        vars,
        ..Profile::default()
    }
}

fn layered_repo() -> TempDir {
    let repo = TempDir::new().unwrap();
    write(repo.path(), "shared/config.json", b"{\"shared\":true}");
    write(repo.path(), "shared/override.json", b"{\"from\":\"shared\"}");
    write(repo.path(), "site/us-east/override.json", b"{\"from\":\"site\"}");
    repo
}

// ---------------------------------------------------------------------------
// Compile
// ---------------------------------------------------------------------------

#[test]
fn layered_profile_resolves_second_source_to_site_dir() {
    let repo = layered_repo();
    let live = TempDir::new().unwrap();
    let plan = plan(&layered_profile(), &repo, &live);

    assert_eq!(plan.mappings.len(), 2);
    assert_eq!(plan.mappings[1].source, repo.path().join("site/us-east"));
    assert_eq!(plan.mappings[0].destination, Path::new("config"));
}

// ---------------------------------------------------------------------------
// Execute
// ---------------------------------------------------------------------------

#[test]
fn first_sync_adds_everything_and_last_writer_wins() {
    let repo = layered_repo();
    let live = TempDir::new().unwrap();
    let result = execute(&plan(&layered_profile(), &repo, &live)).unwrap();

    assert_eq!(result.files_added, 2);
    assert_eq!(result.files_modified, 0);
    assert_eq!(result.files_deleted, 0);
    assert_eq!(read(live.path(), "config/override.json"), "{\"from\":\"site\"}");
    assert!(!live.path().join(STAGING_DIR_NAME).exists());
}

#[test]
fn second_sync_with_same_content_changes_nothing() {
    let repo = layered_repo();
    let live = TempDir::new().unwrap();
    let profile = layered_profile();
    execute(&plan(&profile, &repo, &live)).unwrap();

    let live_file = live.path().join("config/config.json");
    let old = FileTime::from_unix_time(1_000_000, 0);
    set_file_mtime(&live_file, old).unwrap();

    let result = execute(&plan(&profile, &repo, &live)).unwrap();
    assert_eq!(result.files_changed(), 0);
    let mtime = FileTime::from_last_modification_time(&fs::metadata(&live_file).unwrap());
    assert_eq!(mtime, old, "unchanged files must not be rewritten");
}

#[test]
fn modified_and_deleted_are_counted() {
    let repo = layered_repo();
    let live = TempDir::new().unwrap();
    let profile = layered_profile();
    execute(&plan(&profile, &repo, &live)).unwrap();

    write(repo.path(), "shared/config.json", b"{\"shared\":false}");
    fs::remove_file(repo.path().join("site/us-east/override.json")).unwrap();
    fs::remove_file(repo.path().join("shared/override.json")).unwrap();

    let result = execute(&plan(&profile, &repo, &live)).unwrap();
    assert_eq!(result.files_added, 0);
    assert_eq!(result.files_modified, 1);
    assert_eq!(result.files_deleted, 1);
    assert!(!live.path().join("config/override.json").exists());
}

#[test]
fn deletions_stay_inside_mapping_roots() {
    let repo = layered_repo();
    let live = TempDir::new().unwrap();
    write(live.path(), "db/state.idb", b"runtime data");
    write(live.path(), "config/stale.json", b"old");

    let result = execute(&plan(&layered_profile(), &repo, &live)).unwrap();
    assert_eq!(result.files_deleted, 1);
    assert!(!live.path().join("config/stale.json").exists());
    assert_eq!(read(live.path(), "db/state.idb"), "runtime data");
}

#[test]
fn emptied_directories_are_pruned() {
    let repo = layered_repo();
    let live = TempDir::new().unwrap();
    write(live.path(), "config/old/deep/file.json", b"x");

    execute(&plan(&layered_profile(), &repo, &live)).unwrap();
    assert!(!live.path().join("config/old").exists());
    assert!(live.path().join("config").is_dir());
}

#[test]
fn excluded_files_are_neither_staged_nor_deleted() {
    let repo = layered_repo();
    write(repo.path(), "shared/notes.bak", b"skip me");
    let live = TempDir::new().unwrap();
    write(live.path(), "config/local.bak", b"keep me");

    let profile = Profile {
        exclude_patterns: vec!["*.bak".to_string()],
        ..layered_profile()
    };
    let result = execute(&plan(&profile, &repo, &live)).unwrap();
    assert_eq!(result.files_added, 2);
    assert_eq!(result.files_deleted, 0);
    assert!(!live.path().join("config/notes.bak").exists());
    assert_eq!(read(live.path(), "config/local.bak"), "keep me");
}

#[test]
fn git_metadata_is_never_staged() {
    let repo = TempDir::new().unwrap();
    write(repo.path(), ".git/HEAD", b"ref: refs/heads/main");
    write(repo.path(), "projects/alpha/project.json", b"{}");
    let live = TempDir::new().unwrap();

    let profile = Profile {
        mappings: vec![Mapping::dir(".", ".")],
        ..Profile::default()
    };
    let result = execute(&plan(&profile, &repo, &live)).unwrap();
    assert_eq!(result.files_added, 1);
    assert!(!live.path().join(".git").exists());
    assert_eq!(result.projects_synced, vec!["alpha".to_string()]);
}

#[test]
fn file_mapping_copies_single_file() {
    let repo = layered_repo();
    let live = TempDir::new().unwrap();
    let profile = Profile {
        mappings: vec![Mapping::file("shared/config.json", "data/gateway.json")],
        ..Profile::default()
    };
    let result = execute(&plan(&profile, &repo, &live)).unwrap();
    assert_eq!(result.files_added, 1);
    assert_eq!(read(live.path(), "data/gateway.json"), "{\"shared\":true}");
}

#[test]
fn file_mapping_on_dir_source_fails() {
    let repo = layered_repo();
    let live = TempDir::new().unwrap();
    let profile = Profile {
        mappings: vec![Mapping::file("shared", "data/gateway.json")],
        ..Profile::default()
    };
    let err = execute(&plan(&profile, &repo, &live)).unwrap_err();
    assert!(matches!(err, SyncError::SourceType { index: 0, .. }));
}

#[test]
fn templating_applies_only_to_template_mappings() {
    let repo = TempDir::new().unwrap();
    write(repo.path(), "plain/a.txt", b"name={{gatewayName}}");
    write(repo.path(), "tmpl/b.txt", b"name={{gatewayName}} region={{region}}");
    let live = TempDir::new().unwrap();

    let profile = Profile {
        mappings: vec![
            Mapping::dir("plain", "out"),
            Mapping {
                template: true,
                ..Mapping::dir("tmpl", "out")
            },
        ],
        ..Profile::default()
    };
    execute(&plan(&profile, &repo, &live)).unwrap();
    assert_eq!(read(live.path(), "out/a.txt"), "name={{gatewayName}}");
    assert_eq!(read(live.path(), "out/b.txt"), "name=gw-blue region=us-east");
}

#[test]
fn template_failure_leaves_live_dir_untouched() {
    let repo = layered_repo();
    write(repo.path(), "tmpl/blob.bin", b"\0\x01{{gatewayName}}");
    let live = TempDir::new().unwrap();
    write(live.path(), "config/config.json", b"previous");

    let mut profile = layered_profile();
    profile.mappings.push(Mapping {
        template: true,
        ..Mapping::dir("tmpl", "config")
    });
    let err = execute(&plan(&profile, &repo, &live)).unwrap_err();

    assert!(matches!(err, SyncError::Template { .. }));
    assert_eq!(read(live.path(), "config/config.json"), "previous");
    assert!(!live.path().join("config/override.json").exists());
    assert!(!live.path().join(STAGING_DIR_NAME).exists());
}

#[test]
fn directory_conflict_fails_before_any_file_is_replaced() {
    let repo = TempDir::new().unwrap();
    write(repo.path(), "app/a.conf", b"new");
    write(repo.path(), "extra/f.json", b"{}");
    let live = TempDir::new().unwrap();
    write(live.path(), "app/a.conf", b"old");
    // An unmanaged file sits where a directory has to be created.
    write(live.path(), "blocker", b"not a directory");

    let profile = Profile {
        mappings: vec![
            Mapping::dir("app", "app"),
            Mapping::dir("extra", "blocker/sub"),
        ],
        ..Profile::default()
    };
    let err = execute(&plan(&profile, &repo, &live)).unwrap_err();

    assert!(matches!(err, SyncError::Io { .. }), "{err:?}");
    assert_eq!(read(live.path(), "app/a.conf"), "old");
    assert_eq!(read(live.path(), "blocker"), "not a directory");
    assert!(!live.path().join(STAGING_DIR_NAME).exists());
}

#[test]
fn dry_run_reports_counts_without_touching_live_dir() {
    let repo = layered_repo();
    let live = TempDir::new().unwrap();
    write(live.path(), "config/stale.json", b"old");

    let profile = Profile {
        dry_run: true,
        ..layered_profile()
    };
    let result = execute(&plan(&profile, &repo, &live)).unwrap();

    assert_eq!(result.files_added, 2);
    assert_eq!(result.files_deleted, 1);
    assert_eq!(read(live.path(), "config/stale.json"), "old");
    assert!(!live.path().join("config/config.json").exists());
    assert!(!live.path().join(STAGING_DIR_NAME).exists());
}

#[test]
fn leftover_staging_dir_is_replaced() {
    let repo = layered_repo();
    let live = TempDir::new().unwrap();
    write(live.path(), ".sync-staging/config/ghost.json", b"from a crashed run");

    let result = execute(&plan(&layered_profile(), &repo, &live)).unwrap();
    assert_eq!(result.files_added, 2);
    assert!(!live.path().join("config/ghost.json").exists());
    assert!(!live.path().join(STAGING_DIR_NAME).exists());
}
