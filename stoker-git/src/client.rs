//! Clone / fetch contract and the `git` CLI implementation.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use secrecy::ExposeSecret;
use tempfile::NamedTempFile;
use tokio::process::Command;

use crate::credential::GitCredential;
use crate::error::{git_io_err, GitError};

/// Outcome of a successful clone or fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResult {
    /// Full SHA now checked out.
    pub commit: String,
    pub git_ref: String,
}

/// Idempotent "make `local_path` a checkout of `url` at `git_ref`".
#[async_trait]
pub trait GitClient: Send + Sync {
    async fn clone_or_fetch(
        &self,
        url: &str,
        git_ref: &str,
        local_path: &Path,
        credential: &GitCredential,
    ) -> Result<FetchResult, GitError>;
}

/// [`GitClient`] backed by the `git` binary.
///
/// The checkout is a detached HEAD at whatever `git_ref` resolves to on the
/// remote (branch, tag or full commit SHA). Local changes are discarded.
#[derive(Debug, Clone)]
pub struct GitCli {
    program: PathBuf,
}

impl Default for GitCli {
    fn default() -> Self {
        Self {
            program: PathBuf::from("git"),
        }
    }
}

impl GitCli {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl GitClient for GitCli {
    async fn clone_or_fetch(
        &self,
        url: &str,
        git_ref: &str,
        local_path: &Path,
        credential: &GitCredential,
    ) -> Result<FetchResult, GitError> {
        let auth = AuthEnv::build(credential)?;

        if !local_path.join(".git").exists() {
            tokio::fs::create_dir_all(local_path)
                .await
                .map_err(|e| git_io_err(local_path, e))?;
            self.run(local_path, &auth, &["init", "--quiet"]).await?;
            self.run(local_path, &auth, &["remote", "add", "origin", url])
                .await?;
            tracing::info!(path = %local_path.display(), "initialised checkout");
        } else {
            self.run(local_path, &auth, &["remote", "set-url", "origin", url])
                .await?;
        }

        self.run(
            local_path,
            &auth,
            &["fetch", "--quiet", "--force", "--depth", "1", "origin", git_ref],
        )
        .await?;
        self.run(
            local_path,
            &auth,
            &["checkout", "--quiet", "--force", "--detach", "FETCH_HEAD"],
        )
        .await?;
        self.run(local_path, &auth, &["clean", "-ffdq"]).await?;

        let commit = self
            .run(local_path, &auth, &["rev-parse", "HEAD"])
            .await?
            .trim()
            .to_string();
        tracing::info!(git_ref, commit = %commit, credential = %credential, "fetched");

        Ok(FetchResult {
            commit,
            git_ref: git_ref.to_string(),
        })
    }
}

impl GitCli {
    async fn run(&self, cwd: &Path, auth: &AuthEnv, args: &[&str]) -> Result<String, GitError> {
        let output = Command::new(&self.program)
            .args(args)
            .current_dir(cwd)
            .envs(auth.vars.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(GitError::Spawn)?;

        if !output.status.success() {
            return Err(GitError::Command {
                command: args.join(" "),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

// ---------------------------------------------------------------------------
// Auth environment
// ---------------------------------------------------------------------------

/// Environment for one clone/fetch. Holds the SSH key file alive until
/// dropped; the file is deleted with it.
struct AuthEnv {
    vars: Vec<(String, String)>,
    _key_file: Option<NamedTempFile>,
}

impl AuthEnv {
    fn build(credential: &GitCredential) -> Result<Self, GitError> {
        match credential {
            GitCredential::Anonymous => Ok(Self {
                vars: vec![],
                _key_file: None,
            }),
            GitCredential::SshKey { private_key } => {
                // Temp files are created 0600.
                let mut file = tempfile::Builder::new()
                    .prefix("stoker-ssh-")
                    .tempfile()
                    .map_err(|e| git_io_err(std::env::temp_dir(), e))?;
                let mut key = private_key.expose_secret().to_string();
                if !key.ends_with('\n') {
                    key.push('\n');
                }
                std::io::Write::write_all(&mut file, key.as_bytes())
                    .map_err(|e| git_io_err(file.path(), e))?;

                let ssh_command = format!(
                    "ssh -i '{}' -o IdentitiesOnly=yes -o StrictHostKeyChecking=no -o UserKnownHostsFile=/dev/null",
                    file.path().display()
                );
                Ok(Self {
                    vars: vec![("GIT_SSH_COMMAND".to_string(), ssh_command)],
                    _key_file: Some(file),
                })
            }
            GitCredential::Basic { username, password } => {
                let pair = format!("{username}:{}", password.expose_secret());
                let header = format!("Authorization: Basic {}", STANDARD.encode(pair));
                // Config via environment keeps the secret off the command line.
                Ok(Self {
                    vars: vec![
                        ("GIT_CONFIG_COUNT".to_string(), "1".to_string()),
                        ("GIT_CONFIG_KEY_0".to_string(), "http.extraHeader".to_string()),
                        ("GIT_CONFIG_VALUE_0".to_string(), header),
                    ],
                    _key_file: None,
                })
            }
        }
    }
}
