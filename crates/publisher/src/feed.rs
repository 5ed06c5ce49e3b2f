//! Maintains the persisted update descriptor that installed extensions
//! poll for self-hosted updates.
//!
//! The descriptor is only ever regenerated from a template, and only when
//! the newly signed version is strictly greater than the currently
//! recorded one; anything else is a no-op. Committing and pushing the
//! change to the backing repository is best effort.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::process::Command;

use serde_json::Value;

use crate::error::{PublishError, Result};
use crate::version::VersionDialect;

/// Values substituted into the descriptor template.
#[derive(Debug, Clone)]
pub struct TemplateVars {
    /// Extension version being published.
    pub version: String,
    /// Release tag the artifact came from.
    pub tag_version: String,
    /// Minimum browser version declared by the manifest.
    pub min_browser_version: Option<String>,
}

/// Whether the writer touched the descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedOutcome {
    /// A newer version was recorded.
    Written,
    /// The recorded version was already current; nothing changed.
    Unchanged,
}

/// Writer for the update descriptor file.
#[derive(Debug, Clone)]
pub struct UpdateFeedWriter {
    descriptor_path: PathBuf,
    template_path: PathBuf,
    repo_dir: PathBuf,
    dialect: VersionDialect,
    push: bool,
}

impl UpdateFeedWriter {
    /// Create a writer over the descriptor at `descriptor_path`,
    /// regenerated from `template_path`, inside the repository at
    /// `repo_dir`.
    pub fn new(
        descriptor_path: impl Into<PathBuf>,
        template_path: impl Into<PathBuf>,
        repo_dir: impl Into<PathBuf>,
        dialect: VersionDialect,
        push: bool,
    ) -> Self {
        Self {
            descriptor_path: descriptor_path.into(),
            template_path: template_path.into(),
            repo_dir: repo_dir.into(),
            dialect,
            push,
        }
    }

    /// Pull the backing repository so the descriptor reflects remote
    /// edits. Best effort; a failure is logged and ignored.
    pub fn sync_with_remote(&self) {
        if let Err(err) = self.run_git(&["pull", "origin", "HEAD"]) {
            tracing::warn!("git pull failed: {err}");
        }
    }

    /// Record `new_version` in the descriptor if it is strictly greater
    /// than the version currently recorded for `extension_id`.
    pub fn write_if_newer(
        &self,
        extension_id: &str,
        new_version: &str,
        vars: &TemplateVars,
    ) -> Result<FeedOutcome> {
        let previous = self.current_version(extension_id)?;
        if self.dialect.cmp(new_version, &previous) != std::cmp::Ordering::Greater {
            tracing::info!(
                previous = %previous,
                new = new_version,
                "recorded version is current, leaving descriptor untouched"
            );
            return Ok(FeedOutcome::Unchanged);
        }

        let template = fs::read_to_string(&self.template_path)?;
        let mut values = BTreeMap::new();
        values.insert("version", vars.version.as_str());
        values.insert("ext_version", vars.version.as_str());
        values.insert("tag_version", vars.tag_version.as_str());
        if let Some(min) = vars.min_browser_version.as_deref() {
            values.insert("min_browser_version", min);
        }
        // Resolve the whole template before touching the descriptor, so a
        // placeholder without a value never reaches the file.
        let body = substitute(&template, &values)?;
        fs::write(&self.descriptor_path, body)?;
        Ok(FeedOutcome::Written)
    }

    fn current_version(&self, extension_id: &str) -> Result<String> {
        let descriptor: Value = serde_json::from_slice(&fs::read(&self.descriptor_path)?)?;
        descriptor
            .get("addons")
            .and_then(|a| a.get(extension_id))
            .and_then(|e| e.get("updates"))
            .and_then(|u| u.get(0))
            .and_then(|r| r.get("version"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                PublishError::MalformedDescriptor(format!(
                    "no current update record for {extension_id}"
                ))
            })
    }

    /// Stage, commit, and push the descriptor. Failures are reported to
    /// the caller but are expected to be treated as non-fatal, since the
    /// signed artifact is already published by the time this runs.
    pub fn commit_and_push(&self, message: &str) -> Result<()> {
        let path = self.git_target()?;
        let path = path.as_str();

        // Nothing to commit when the working tree is clean.
        let status = self.run_git(&["status", "--porcelain", path])?;
        if status.is_empty() {
            return Ok(());
        }
        self.run_git(&["add", path])?;
        self.run_git(&["commit", "-m", message, path])?;
        if self.push {
            self.run_git(&["push", "origin", "HEAD"])?;
        }
        Ok(())
    }

    // git runs with `repo_dir` as its working directory, while the
    // descriptor path may be relative to the invoker's cwd. Resolve it
    // before handing it to git.
    fn git_target(&self) -> Result<String> {
        let resolved = fs::canonicalize(&self.descriptor_path)?;
        Ok(resolved.to_string_lossy().into_owned())
    }

    fn run_git(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.repo_dir)
            .output()?;
        if !output.status.success() {
            return Err(PublishError::other(format!(
                "git {} failed: {}",
                args.first().unwrap_or(&""),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

// `$name` / `${name}` substitution, `$$` escapes a literal dollar. A named
// placeholder with no value is an error; the descriptor must never end up
// holding placeholder text.
fn substitute(template: &str, values: &BTreeMap<&str, &str>) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        match chars.peek().copied() {
            Some('$') => {
                chars.next();
                out.push('$');
            }
            Some('{') => {
                chars.next();
                let mut name = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == '}' {
                        closed = true;
                        break;
                    }
                    name.push(c);
                }
                if !closed {
                    return Err(PublishError::other(format!(
                        "unterminated placeholder ${{{name} in template"
                    )));
                }
                match values.get(name.as_str()) {
                    Some(value) => out.push_str(value),
                    None => return Err(PublishError::MissingTemplateVar(name)),
                }
            }
            Some(c) if c.is_ascii_alphanumeric() || c == '_' => {
                let mut name = String::new();
                while let Some(c) = chars.peek().copied() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        name.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                match values.get(name.as_str()) {
                    Some(value) => out.push_str(value),
                    None => return Err(PublishError::MissingTemplateVar(name)),
                }
            }
            _ => out.push('$'),
        }
    }
    Ok(out)
}
