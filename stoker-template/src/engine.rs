//! Resolver capability and the Tera-backed default.
//!
//! The contract every [`TemplateResolver`] honours:
//!
//! | Input                          | Result                           |
//! |--------------------------------|----------------------------------|
//! | no `{{` / `{%` markers         | input returned unchanged         |
//! | markers, all keys present      | rendered string                  |
//! | markers, any key missing       | [`TemplateError::Resolve`]       |

use std::error::Error as _;
use std::path::Path;

use tera::Tera;

use crate::context::TemplateContext;
use crate::error::{io_err, TemplateError};

/// Longest template excerpt carried in an error message.
const EXCERPT_LEN: usize = 120;

/// True when `input` contains an expression or statement opener.
pub fn has_template_markers(input: &str) -> bool {
    input.contains("{{") || input.contains("{%")
}

/// Strict `resolve(template, context)` capability.
pub trait TemplateResolver: Send + Sync {
    fn resolve(&self, template: &str, ctx: &TemplateContext) -> Result<String, TemplateError>;
}

/// Default resolver: Tera one-off rendering, autoescape off.
///
/// Tera already fails on undefined variables, which gives fail-closed
/// behaviour without extra configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct TeraResolver;

impl TemplateResolver for TeraResolver {
    fn resolve(&self, template: &str, ctx: &TemplateContext) -> Result<String, TemplateError> {
        if !has_template_markers(template) {
            return Ok(template.to_string());
        }
        let tera_ctx = ctx.to_tera_context()?;
        Tera::one_off(template, &tera_ctx, false).map_err(|err| TemplateError::Resolve {
            template: excerpt(template),
            message: error_chain(&err),
        })
    }
}

/// Template one file in place.
///
/// Returns `Ok(false)` when the file has no markers and was left untouched,
/// `Ok(true)` when it was rewritten. Files containing a null byte, and
/// non-UTF-8 files that carry markers, are rejected without modification.
pub fn resolve_file_in_place(
    resolver: &dyn TemplateResolver,
    ctx: &TemplateContext,
    path: &Path,
) -> Result<bool, TemplateError> {
    let bytes = std::fs::read(path).map_err(|e| io_err(path, e))?;
    if bytes.contains(&0) {
        return Err(TemplateError::BinaryContent {
            path: path.to_path_buf(),
        });
    }
    let content = match std::str::from_utf8(&bytes) {
        Ok(content) => content,
        Err(_) if !has_template_markers(&String::from_utf8_lossy(&bytes)) => return Ok(false),
        Err(_) => {
            return Err(TemplateError::NonUtf8 {
                path: path.to_path_buf(),
            })
        }
    };
    if !has_template_markers(content) {
        return Ok(false);
    }
    let rendered = resolver.resolve(content, ctx)?;
    std::fs::write(path, rendered).map_err(|e| io_err(path, e))?;
    Ok(true)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

// Tera's top-level message is generic ("Failed to render ..."); the useful
// part ("Variable `x` not found") sits further down the source chain.
fn error_chain(err: &tera::Error) -> String {
    let mut parts = vec![err.to_string()];
    let mut source = err.source();
    while let Some(cause) = source {
        parts.push(cause.to_string());
        source = cause.source();
    }
    parts.join(": ")
}

fn excerpt(template: &str) -> String {
    if template.len() <= EXCERPT_LEN {
        return template.to_string();
    }
    let mut end = EXCERPT_LEN;
    while !template.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &template[..end])
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
