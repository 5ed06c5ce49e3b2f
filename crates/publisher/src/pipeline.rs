//! End-to-end publishing run: locate, fetch, transform, sign, publish,
//! and update the feed, strictly in that order.

use crate::config::PublisherConfig;
use crate::error::{PublishError, Result};
use crate::feed::{FeedOutcome, TemplateVars, UpdateFeedWriter};
use crate::release::ReleaseHost;
use crate::signing::{ApiCredential, SigningClient};
use crate::transform;

const COMMIT_MESSAGE: &str = "Point update feed at newly signed build";

/// What a completed run did.
#[derive(Debug, Clone)]
pub struct PublishReport {
    /// Extension version extracted from the release tag.
    pub extension_version: String,
    /// Whether the update descriptor was rewritten.
    pub feed: FeedOutcome,
}

/// Publish the release identified by `tag`.
///
/// Scratch artifacts live in a temporary directory that is removed when
/// the run ends, on success and failure alike.
pub async fn run(config: &PublisherConfig, tag: &str) -> Result<PublishReport> {
    let extension_version = config.version_dialect.parse(tag)?.to_string();

    let host = ReleaseHost::new(&config.release_api_base, &config.release_token);

    tracing::info!(tag, "looking up release");
    let release = host.release_by_tag(&config.owner, &config.repo, tag).await?;
    if release.asset(&config.signed_asset_name).is_some() {
        return Err(PublishError::AlreadyPublished(
            config.signed_asset_name.clone(),
        ));
    }
    let raw = release
        .asset(&config.raw_asset_name)
        .ok_or_else(|| PublishError::AssetMissing(config.raw_asset_name.clone()))?
        .clone();

    let scratch = tempfile::tempdir()?;
    let raw_path = scratch.path().join(&config.raw_asset_name);
    let unsigned_path = scratch.path().join("unsigned.zip");
    let signed_path = scratch.path().join(&config.signed_asset_name);

    tracing::info!(url = %raw.url, "downloading raw artifact");
    host.download_asset(&raw.url, &raw_path).await?;

    tracing::info!("rewriting package as self-hosted");
    let manifest = transform::make_self_hosted(&raw_path, &unsigned_path, &config.update_feed_url)?;

    let signer = SigningClient::new(
        &config.signing_api_base,
        ApiCredential::new(
            &config.signing_key,
            &config.signing_secret,
            config.credential_ttl,
        ),
        &config.signing_channel,
        config.poll_interval,
        config.poll_attempts(),
        config.pending_file_policy,
    );
    tracing::info!(version = %extension_version, "submitting package for signing");
    let status_url = signer
        .submit(&config.extension_id, &extension_version, &unsigned_path)
        .await?;
    tracing::info!(%status_url, "waiting for signing service");
    signer.wait_for_signed(&status_url, &signed_path).await?;

    tracing::info!(name = %config.signed_asset_name, "uploading signed artifact");
    host.upload_asset(&release.upload_url, &config.signed_asset_name, &signed_path)
        .await?;

    // The publish already succeeded; losing the superseded raw asset is
    // not worth failing the run over.
    if let Err(err) = host.delete_asset(&raw.url).await {
        tracing::warn!("failed to delete superseded raw artifact: {err}");
    }

    let feed_writer = UpdateFeedWriter::new(
        &config.descriptor_path,
        &config.template_path,
        &config.feed_repo_dir,
        config.version_dialect.clone(),
        config.feed_push,
    );
    feed_writer.sync_with_remote();
    let vars = TemplateVars {
        version: extension_version.clone(),
        tag_version: tag.to_string(),
        min_browser_version: manifest.min_browser_version,
    };
    let feed = feed_writer.write_if_newer(&config.extension_id, &extension_version, &vars)?;
    if feed == FeedOutcome::Written {
        tracing::info!("update descriptor rewritten");
        if let Err(err) = feed_writer.commit_and_push(COMMIT_MESSAGE) {
            tracing::warn!("failed to commit update descriptor: {err}");
        }
    }

    Ok(PublishReport {
        extension_version,
        feed,
    })
}
