//! Sync plan compiler.
//!
//! Pure with respect to the live directory: compilation reads the checkout
//! (to enforce `required`) but never writes anywhere. Every failure surfaces
//! before the engine is invoked.

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use stoker_core::{MappingType, Profile};
use stoker_template::{resolve_file_in_place, TemplateContext, TemplateError, TemplateResolver};

use crate::error::PlanError;

/// Staging tree location, relative to the live directory.
pub const STAGING_DIR_NAME: &str = ".sync-staging";

/// Deferred per-file templating, bound to one cycle's context.
pub type ApplyTemplate = Arc<dyn Fn(&Path) -> Result<(), TemplateError> + Send + Sync>;

/// One mapping with every template expression resolved and every path checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMapping {
    /// Absolute path inside the checkout.
    pub source: PathBuf,
    /// Relative to the live directory. Empty means the live root itself.
    pub destination: PathBuf,
    pub mapping_type: MappingType,
    pub template: bool,
    pub required: bool,
}

/// Everything the engine needs for one cycle.
#[derive(Clone)]
pub struct SyncPlan {
    pub staging_dir: PathBuf,
    pub live_dir: PathBuf,
    pub mappings: Vec<ResolvedMapping>,
    pub exclude_patterns: Vec<String>,
    pub dry_run: bool,
    pub apply_template: ApplyTemplate,
}

impl fmt::Debug for SyncPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncPlan")
            .field("staging_dir", &self.staging_dir)
            .field("live_dir", &self.live_dir)
            .field("mappings", &self.mappings)
            .field("exclude_patterns", &self.exclude_patterns)
            .field("dry_run", &self.dry_run)
            .finish_non_exhaustive()
    }
}

/// Compile `profile` into a [`SyncPlan`] rooted at `repo_path` → `live_dir`.
///
/// Mappings are processed in order and the first failure aborts the whole
/// compilation.
pub fn compile_plan(
    profile: &Profile,
    ctx: &TemplateContext,
    resolver: Arc<dyn TemplateResolver>,
    repo_path: &Path,
    live_dir: &Path,
) -> Result<SyncPlan, PlanError> {
    let mut mappings = Vec::with_capacity(profile.mappings.len());

    for (index, mapping) in profile.mappings.iter().enumerate() {
        let source = resolve_field(resolver.as_ref(), ctx, index, "source", &mapping.source)?;
        let destination = resolve_field(
            resolver.as_ref(),
            ctx,
            index,
            "destination",
            &mapping.destination,
        )?;
        if destination.starts_with(STAGING_DIR_NAME) {
            return Err(PlanError::UnsafePath {
                index,
                field: "destination",
                path: destination.display().to_string(),
                reason: "reserved staging directory",
            });
        }

        let source = repo_path.join(source);
        if mapping.required && !source.exists() {
            return Err(PlanError::RequiredSourceMissing {
                index,
                path: source,
            });
        }

        mappings.push(ResolvedMapping {
            source,
            destination,
            mapping_type: mapping.effective_type(),
            template: mapping.template,
            required: mapping.required,
        });
    }

    tracing::debug!(
        "compiled plan: {} mapping(s), {} exclude pattern(s), dry_run={}",
        mappings.len(),
        profile.exclude_patterns.len(),
        profile.dry_run
    );

    Ok(SyncPlan {
        staging_dir: live_dir.join(STAGING_DIR_NAME),
        live_dir: live_dir.to_path_buf(),
        mappings,
        exclude_patterns: profile.exclude_patterns.clone(),
        dry_run: profile.dry_run,
        apply_template: build_apply_template(resolver, ctx.clone()),
    })
}

/// Bind `resolver` and `ctx` into the engine's per-file callback.
pub fn build_apply_template(
    resolver: Arc<dyn TemplateResolver>,
    ctx: TemplateContext,
) -> ApplyTemplate {
    Arc::new(move |path: &Path| {
        resolve_file_in_place(resolver.as_ref(), &ctx, path).map(|_| ())
    })
}

/// Lexically normalise a resolved mapping path and reject anything that is
/// absolute or climbs above its root.
///
/// Returns the cleaned relative path; `"."` cleans to an empty path.
pub fn validate_resolved_path(path: &str) -> Result<PathBuf, &'static str> {
    if path.starts_with('/') || Path::new(path).is_absolute() {
        return Err("absolute path not allowed");
    }

    let mut parts: Vec<&str> = Vec::new();
    for component in Path::new(path).components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if parts.pop().is_none() {
                    return Err("path escapes its root");
                }
            }
            Component::Normal(part) => match part.to_str() {
                Some(part) => parts.push(part),
                None => return Err("path is not valid UTF-8"),
            },
            Component::RootDir | Component::Prefix(_) => {
                return Err("absolute path not allowed");
            }
        }
    }
    Ok(parts.iter().collect())
}

fn resolve_field(
    resolver: &dyn TemplateResolver,
    ctx: &TemplateContext,
    index: usize,
    field: &'static str,
    raw: &str,
) -> Result<PathBuf, PlanError> {
    let resolved = resolver
        .resolve(raw, ctx)
        .map_err(|source| PlanError::Template {
            index,
            field,
            source,
        })?;
    validate_resolved_path(&resolved).map_err(|reason| PlanError::UnsafePath {
        index,
        field,
        path: resolved,
        reason,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use stoker_core::Mapping;
    use stoker_template::TeraResolver;
    use tempfile::TempDir;

    fn resolver() -> Arc<dyn TemplateResolver> {
        Arc::new(TeraResolver)
    }

    fn ctx() -> TemplateContext {
        TemplateContext::new("gw-blue").with_var("region", "us-east")
    }

    #[rstest]
    #[case("../escape")]
    #[case("config/../../etc")]
    #[case("/absolute/path")]
    #[case("..")]
    #[case("a/b/../../..")]
    fn unsafe_paths_rejected(#[case] path: &str) {
        assert!(validate_resolved_path(path).is_err(), "{path} must be rejected");
    }

    #[rstest]
    #[case("config/resources", "config/resources")]
    #[case(".", "")]
    #[case("./config//resources/", "config/resources")]
    #[case("config/../projects", "projects")]
    fn safe_paths_cleaned(#[case] path: &str, #[case] cleaned: &str) {
        assert_eq!(validate_resolved_path(path).unwrap(), PathBuf::from(cleaned));
    }

    #[test]
    fn staging_dir_is_hidden_child_of_live_dir() {
        let repo = TempDir::new().unwrap();
        let live = TempDir::new().unwrap();
        let plan = compile_plan(&Profile::default(), &ctx(), resolver(), repo.path(), live.path())
            .unwrap();
        assert_eq!(plan.staging_dir, live.path().join(".sync-staging"));
        assert_ne!(plan.staging_dir, plan.live_dir);
    }

    #[test]
    fn required_missing_source_fails() {
        let repo = TempDir::new().unwrap();
        let live = TempDir::new().unwrap();
        let profile = Profile {
            mappings: vec![Mapping {
                required: true,
                ..Mapping::dir("nonexistent", "config")
            }],
            ..Profile::default()
        };
        let err = compile_plan(&profile, &ctx(), resolver(), repo.path(), live.path()).unwrap_err();
        assert!(matches!(err, PlanError::RequiredSourceMissing { index: 0, .. }));
    }

    #[test]
    fn optional_missing_source_compiles() {
        let repo = TempDir::new().unwrap();
        let live = TempDir::new().unwrap();
        let profile = Profile {
            mappings: vec![Mapping::dir("nonexistent", "config")],
            ..Profile::default()
        };
        let plan = compile_plan(&profile, &ctx(), resolver(), repo.path(), live.path()).unwrap();
        assert_eq!(plan.mappings.len(), 1);
    }

    #[test]
    fn unresolved_key_tagged_with_field() {
        let repo = TempDir::new().unwrap();
        let live = TempDir::new().unwrap();
        let profile = Profile {
            mappings: vec![
                Mapping::dir("shared", "config"),
                Mapping::dir("site", "config/{{zone}}"),
            ],
            ..Profile::default()
        };
        let err = compile_plan(&profile, &ctx(), resolver(), repo.path(), live.path()).unwrap_err();
        match &err {
            PlanError::Template { index, field, .. } => {
                assert_eq!(*index, 1);
                assert_eq!(*field, "destination");
            }
            other => panic!("expected template error, got {other:?}"),
        }
        assert!(err.to_string().starts_with("mapping[1].destination"));
    }

    #[rstest]
    #[case(".sync-staging")]
    #[case(".sync-staging/config")]
    #[case("./.sync-staging/../.sync-staging/x")]
    fn staging_destination_is_reserved(#[case] destination: &str) {
        let repo = TempDir::new().unwrap();
        let live = TempDir::new().unwrap();
        let profile = Profile {
            mappings: vec![Mapping::dir("shared", destination)],
            ..Profile::default()
        };
        let err = compile_plan(&profile, &ctx(), resolver(), repo.path(), live.path()).unwrap_err();
        match err {
            PlanError::UnsafePath { index, field, reason, .. } => {
                assert_eq!((index, field), (0, "destination"));
                assert_eq!(reason, "reserved staging directory");
            }
            other => panic!("expected unsafe path, got {other:?}"),
        }
    }

    #[test]
    fn similarly_named_destination_is_allowed() {
        let repo = TempDir::new().unwrap();
        let live = TempDir::new().unwrap();
        let profile = Profile {
            mappings: vec![Mapping::dir("shared", ".sync-staging-notes")],
            ..Profile::default()
        };
        let plan = compile_plan(&profile, &ctx(), resolver(), repo.path(), live.path()).unwrap();
        assert_eq!(plan.mappings[0].destination, PathBuf::from(".sync-staging-notes"));
    }

    #[test]
    fn variable_that_escapes_is_rejected() {
        let repo = TempDir::new().unwrap();
        let live = TempDir::new().unwrap();
        let ctx = TemplateContext::new("gw").with_var("site", "../../etc");
        let profile = Profile {
            mappings: vec![Mapping::dir("sites/{{site}}", "config")],
            ..Profile::default()
        };
        let err = compile_plan(&profile, &ctx, resolver(), repo.path(), live.path()).unwrap_err();
        assert!(matches!(
            err,
            PlanError::UnsafePath { index: 0, field: "source", .. }
        ));
    }
}
