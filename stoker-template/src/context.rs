//! The per-cycle values a template may reference.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::TemplateError;

/// Keys that are always present at the top level of a rendered context.
/// A profile var with one of these names is only reachable as `vars.<name>`.
pub const BUILTIN_KEYS: &[&str] = &[
    "gatewayName",
    "podName",
    "namespace",
    "ref",
    "commit",
    "crName",
    "labels",
    "vars",
];

/// Immutable rendering payload for one sync cycle.
///
/// Serialized keys are camelCase (`{{gatewayName}}`, `{{crName}}`). Every
/// entry of `vars` is additionally exposed at the top level, so
/// `{{region}}` and `{{vars.region}}` resolve to the same value.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateContext {
    pub gateway_name: String,
    pub pod_name: String,
    pub namespace: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub commit: String,
    pub cr_name: String,
    pub labels: BTreeMap<String, String>,
    pub vars: BTreeMap<String, String>,
}

impl TemplateContext {
    /// Context with only the gateway name set.
    pub fn new(gateway_name: impl Into<String>) -> Self {
        Self {
            gateway_name: gateway_name.into(),
            ..Self::default()
        }
    }

    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Convert to a [`tera::Context`] with vars flattened to the top level.
    pub fn to_tera_context(&self) -> Result<tera::Context, TemplateError> {
        let mut ctx = tera::Context::from_serialize(self)?;
        for (key, value) in &self.vars {
            if !BUILTIN_KEYS.contains(&key.as_str()) {
                ctx.insert(key.as_str(), value);
            }
        }
        Ok(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vars_flattened_but_builtins_win() {
        let mut ctx = TemplateContext::new("gw-blue").with_var("region", "us-east");
        ctx.vars.insert("gatewayName".to_string(), "spoofed".to_string());

        let tera_ctx = ctx.to_tera_context().expect("context conversion");
        assert_eq!(
            tera_ctx.get("region").and_then(|v| v.as_str()),
            Some("us-east")
        );
        assert_eq!(
            tera_ctx.get("gatewayName").and_then(|v| v.as_str()),
            Some("gw-blue")
        );
    }

    #[test]
    fn wire_keys_are_camel_case() {
        let mut ctx = TemplateContext::new("gw");
        ctx.git_ref = "main".to_string();
        ctx.cr_name = "site-a".to_string();
        let json = serde_json::to_value(&ctx).expect("serialize");
        assert_eq!(json["ref"], "main");
        assert_eq!(json["crName"], "site-a");
        assert!(json.get("podName").is_some());
    }
}
