//! Domain types shared by the agent, the plan compiler and the auth resolver.
//!
//! Everything here crosses the bus, so all types are serde round-trippable and
//! use camelCase field names on the wire.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

/// Desired state published by the controller. Read-only to the agent.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    #[serde(rename = "gitURL")]
    pub git_url: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub commit: String,
    /// `"true"` pauses syncing; any other value (including empty) does not.
    pub paused: String,
}

impl Metadata {
    /// A non-empty commit is the controller's signal that the record is usable.
    pub fn is_available(&self) -> bool {
        !self.commit.is_empty()
    }

    pub fn is_paused(&self) -> bool {
        self.paused == "true"
    }
}

// ---------------------------------------------------------------------------
// Profile
// ---------------------------------------------------------------------------

/// Whether a mapping copies a directory tree or a single file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MappingType {
    #[default]
    Dir,
    File,
}

impl fmt::Display for MappingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MappingType::Dir => write!(f, "dir"),
            MappingType::File => write!(f, "file"),
        }
    }
}

/// One source → destination copy rule. Paths may still contain template
/// expressions at this point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mapping {
    pub source: String,
    pub destination: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub mapping_type: Option<MappingType>,
    #[serde(default)]
    pub template: bool,
    #[serde(default)]
    pub required: bool,
}

impl Mapping {
    /// Plain directory mapping with no flags set.
    pub fn dir(source: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            mapping_type: Some(MappingType::Dir),
            template: false,
            required: false,
        }
    }

    /// Plain single-file mapping with no flags set.
    pub fn file(source: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            mapping_type: Some(MappingType::File),
            ..Self::dir(source, destination)
        }
    }

    /// The declared type, defaulting to [`MappingType::Dir`].
    pub fn effective_type(&self) -> MappingType {
        self.mapping_type.unwrap_or_default()
    }
}

/// Fully resolved sync configuration for one gateway. Defaults are merged by
/// the controller before the profile is published.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    /// Optional display name, used as the metrics `profile` label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub mappings: Vec<Mapping>,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    #[serde(default)]
    pub vars: BTreeMap<String, String>,
    #[serde(default)]
    pub dry_run: bool,
}

impl Profile {
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or("default")
    }
}

// ---------------------------------------------------------------------------
// Git auth references
// ---------------------------------------------------------------------------

/// Pointer at one key of a namespaced secret.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretRef {
    pub secret_name: String,
    pub key: String,
}

impl SecretRef {
    pub fn new(secret_name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            secret_name: secret_name.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for SecretRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.secret_name, self.key)
    }
}

/// Declared git credential. Exactly one variant is ever set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GitAuthSpec {
    #[serde(rename_all = "camelCase")]
    SshKey { secret_ref: SecretRef },
    #[serde(rename_all = "camelCase")]
    Token { secret_ref: SecretRef },
    #[serde(rename_all = "camelCase")]
    GitHubApp {
        #[serde(rename = "appID")]
        app_id: i64,
        #[serde(rename = "installationID")]
        installation_id: i64,
        private_key_secret_ref: SecretRef,
        #[serde(
            rename = "apiBaseURL",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        api_base_url: Option<String>,
    },
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paused_only_on_exact_true() {
        let mut meta = Metadata::default();
        assert!(!meta.is_paused());
        meta.paused = "True".to_string();
        assert!(!meta.is_paused());
        meta.paused = "true".to_string();
        assert!(meta.is_paused());
    }

    #[test]
    fn metadata_available_once_commit_is_set() {
        let mut meta = Metadata {
            git_url: "https://example.com/repo.git".to_string(),
            ..Metadata::default()
        };
        assert!(!meta.is_available());
        meta.commit = "abc123".to_string();
        assert!(meta.is_available());
    }

    #[test]
    fn mapping_type_defaults_to_dir() {
        let yaml = "source: shared\ndestination: config\n";
        let mapping: Mapping = serde_yaml::from_str(yaml).expect("parse");
        assert_eq!(mapping.mapping_type, None);
        assert_eq!(mapping.effective_type(), MappingType::Dir);
        assert!(!mapping.template);
        assert!(!mapping.required);
    }

    #[test]
    fn profile_label_falls_back_to_default() {
        let mut profile = Profile::default();
        assert_eq!(profile.label(), "default");
        profile.name = Some("edge".to_string());
        assert_eq!(profile.label(), "edge");
    }

    #[test]
    fn github_app_spec_uses_wire_names() {
        let spec = GitAuthSpec::GitHubApp {
            app_id: 12345,
            installation_id: 67890,
            private_key_secret_ref: SecretRef::new("gh-app", "private-key.pem"),
            api_base_url: None,
        };
        let json = serde_json::to_value(&spec).expect("serialize");
        let inner = &json["gitHubApp"];
        assert_eq!(inner["appID"], 12345);
        assert_eq!(inner["installationID"], 67890);
        assert_eq!(inner["privateKeySecretRef"]["secretName"], "gh-app");
        assert!(inner.get("apiBaseURL").is_none());
    }
}
