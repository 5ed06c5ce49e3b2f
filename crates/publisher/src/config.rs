//! Run configuration for one publishing pass.

use std::path::PathBuf;
use std::time::Duration;

use crate::version::VersionDialect;

/// What to do when the signing service lists an output file whose `signed`
/// flag is still false.
///
/// Deployments of the signing service disagree on what this state means:
/// some report it transiently while packaging the signed output, others
/// only once signing has permanently failed. The behavior is therefore a
/// policy choice, not a constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingFilePolicy {
    /// Treat an unsigned file entry as still in progress and keep polling.
    KeepPolling,
    /// Treat an unsigned file entry as a permanent signing failure.
    Fail,
}

/// Everything a publishing run needs to know, resolved at the entry point.
///
/// Secrets are plain fields here rather than a process-wide store so that
/// each component receives exactly the credentials it uses.
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Release host owner (e.g. a GitHub account).
    pub owner: String,
    /// Release host repository name.
    pub repo: String,
    /// Base URL of the release host API.
    pub release_api_base: String,
    /// Bearer token for the release host.
    pub release_token: String,
    /// Extension identifier known to the signing service.
    pub extension_id: String,
    /// File name of the raw artifact attached to the release.
    pub raw_asset_name: String,
    /// File name under which the signed artifact is republished.
    pub signed_asset_name: String,
    /// Base URL of the signing service API.
    pub signing_api_base: String,
    /// Issuer identifier for signing credentials.
    pub signing_key: String,
    /// Shared secret for signing credentials.
    pub signing_secret: String,
    /// Validity window of each freshly minted signing credential.
    pub credential_ttl: Duration,
    /// Distribution channel passed to the signing service.
    pub signing_channel: String,
    /// Delay between consecutive status polls.
    pub poll_interval: Duration,
    /// Total time allowed for the signing service to finish.
    pub poll_budget: Duration,
    /// Policy for unsigned file entries in the status response.
    pub pending_file_policy: PendingFilePolicy,
    /// Version grammar for this channel.
    pub version_dialect: VersionDialect,
    /// URL of the self-hosted update feed written into the manifest.
    pub update_feed_url: String,
    /// Path of the persisted update descriptor.
    pub descriptor_path: PathBuf,
    /// Path of the update descriptor template.
    pub template_path: PathBuf,
    /// Repository directory holding the update descriptor.
    pub feed_repo_dir: PathBuf,
    /// Whether to commit and push descriptor changes.
    pub feed_push: bool,
}

impl PublisherConfig {
    /// Number of status polls the budget allows at the configured interval.
    pub fn poll_attempts(&self) -> u32 {
        let interval = self.poll_interval.as_secs().max(1);
        (self.poll_budget.as_secs() / interval).max(1) as u32
    }
}
