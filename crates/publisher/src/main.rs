use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use webext_publisher::{
    pipeline, PendingFilePolicy, PublisherConfig, SecretStore, VersionDialect,
};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Release tag to publish (e.g. 1.58.1b2)
    tag: String,

    /// Release host account owning the repository
    #[arg(long)]
    owner: String,

    /// Repository holding the releases
    #[arg(long)]
    repo: String,

    /// Extension identifier known to the signing service
    #[arg(long)]
    extension_id: String,

    /// File name of the raw artifact attached to the release
    #[arg(long)]
    raw_asset: String,

    /// File name under which the signed artifact is republished
    #[arg(long)]
    signed_asset: String,

    /// Base URL of the release host API
    #[arg(long, default_value = "https://api.github.com")]
    release_api: String,

    /// Base URL of the signing service API
    #[arg(long, default_value = "https://addons.mozilla.org/api/v4")]
    signing_api: String,

    /// Distribution channel passed to the signing service
    #[arg(long, default_value = "unlisted")]
    channel: String,

    /// URL of the self-hosted update feed written into the manifest
    #[arg(long)]
    update_feed_url: String,

    /// Version grammar of this channel's tags
    #[arg(long, value_enum, default_value = "beta")]
    dialect: DialectArg,

    /// Tag prefix, required with --dialect prefixed
    #[arg(long)]
    tag_prefix: Option<String>,

    /// Seconds between signing status polls
    #[arg(long, default_value_t = 5)]
    poll_interval: u64,

    /// Total seconds to wait for the signing service
    #[arg(long, default_value_t = 900)]
    poll_budget: u64,

    /// Seconds each signing credential stays valid
    #[arg(long, default_value_t = 180)]
    credential_ttl: u64,

    /// Treat an unsigned file entry in the status response as fatal
    #[arg(long)]
    pending_file_fatal: bool,

    /// Path of the update descriptor file
    #[arg(long)]
    descriptor: PathBuf,

    /// Path of the update descriptor template
    #[arg(long)]
    template: PathBuf,

    /// Repository directory holding the update descriptor
    #[arg(long, default_value = ".")]
    feed_dir: PathBuf,

    /// Do not commit or push descriptor changes
    #[arg(long)]
    no_push: bool,

    /// Path of the on-disk secret store
    #[arg(long, default_value = "dist/build/secrets.json")]
    secrets: PathBuf,

    /// Release host token (falls back to GITHUB_TOKEN, then the store)
    #[arg(long)]
    release_token: Option<String>,

    /// Signing service issuer key (falls back to SIGNING_API_KEY, then the store)
    #[arg(long)]
    signing_key: Option<String>,

    /// Signing service secret (falls back to SIGNING_API_SECRET, then the store)
    #[arg(long)]
    signing_secret: Option<String>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum DialectArg {
    /// Plain dotted numerics (stable builds)
    Dotted,
    /// Dotted numerics with a b/rc marker (beta builds)
    Beta,
    /// Prefixed tag wrapping a four-component version
    Prefixed,
}

fn resolve_secret(
    store: &mut SecretStore,
    key: &str,
    flag: Option<&str>,
    env_var: &str,
) -> Result<String> {
    let env_value = std::env::var(env_var).ok();
    let supplied = flag.or(env_value.as_deref());
    store
        .resolve(key, supplied)
        .with_context(|| format!("no {key} given (flag, ${env_var}, or {:?})", store.path()))
}

fn build_config(cli: &Cli, store: &mut SecretStore) -> Result<PublisherConfig> {
    let version_dialect = match cli.dialect {
        DialectArg::Dotted => VersionDialect::Dotted,
        DialectArg::Beta => VersionDialect::BetaTag,
        DialectArg::Prefixed => match &cli.tag_prefix {
            Some(prefix) => VersionDialect::TagPrefixed {
                prefix: prefix.clone(),
            },
            None => bail!("--dialect prefixed requires --tag-prefix"),
        },
    };

    Ok(PublisherConfig {
        owner: cli.owner.clone(),
        repo: cli.repo.clone(),
        release_api_base: cli.release_api.clone(),
        release_token: resolve_secret(
            store,
            "release_token",
            cli.release_token.as_deref(),
            "GITHUB_TOKEN",
        )?,
        extension_id: cli.extension_id.clone(),
        raw_asset_name: cli.raw_asset.clone(),
        signed_asset_name: cli.signed_asset.clone(),
        signing_api_base: cli.signing_api.clone(),
        signing_key: resolve_secret(
            store,
            "signing_key",
            cli.signing_key.as_deref(),
            "SIGNING_API_KEY",
        )?,
        signing_secret: resolve_secret(
            store,
            "signing_secret",
            cli.signing_secret.as_deref(),
            "SIGNING_API_SECRET",
        )?,
        credential_ttl: Duration::from_secs(cli.credential_ttl),
        signing_channel: cli.channel.clone(),
        poll_interval: Duration::from_secs(cli.poll_interval),
        poll_budget: Duration::from_secs(cli.poll_budget),
        pending_file_policy: if cli.pending_file_fatal {
            PendingFilePolicy::Fail
        } else {
            PendingFilePolicy::KeepPolling
        },
        version_dialect,
        update_feed_url: cli.update_feed_url.clone(),
        descriptor_path: cli.descriptor.clone(),
        template_path: cli.template.clone(),
        feed_repo_dir: cli.feed_dir.clone(),
        feed_push: !cli.no_push,
    })
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let mut store = SecretStore::load(&cli.secrets)?;
    let config = build_config(&cli, &mut store)?;
    store.persist()?;

    let report = pipeline::run(&config, &cli.tag).await?;
    println!(
        "Published version {} ({} update descriptor).",
        report.extension_version,
        match report.feed {
            webext_publisher::FeedOutcome::Written => "rewrote",
            webext_publisher::FeedOutcome::Unchanged => "kept",
        }
    );
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    if let Err(err) = run().await {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}
