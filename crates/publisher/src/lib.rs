//! Self-hosted publishing pipeline for browser-extension releases.
//!
//! A release on the release host carries a raw, store-oriented package.
//! This crate turns it into a self-hosted build: the raw package is
//! downloaded, its manifest is pointed at a self-hosted update feed, the
//! rewritten package is signed by the remote signing service, the signed
//! package replaces the raw one on the release, and the persisted update
//! descriptor is advanced when the new version outranks the recorded one.
//!
//! ```ignore
//! use webext_publisher::{pipeline, PublisherConfig};
//!
//! # async fn demo(config: PublisherConfig) -> webext_publisher::Result<()> {
//! let report = pipeline::run(&config, "1.58.1b2").await?;
//! println!("published {}", report.extension_version);
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
pub mod feed;
pub mod pipeline;
pub mod release;
mod secrets;
pub mod signing;
pub mod transform;
pub mod version;

pub use config::{PendingFilePolicy, PublisherConfig};
pub use error::{PublishError, Result};
pub use feed::{FeedOutcome, TemplateVars, UpdateFeedWriter};
pub use pipeline::PublishReport;
pub use release::{Release, ReleaseAsset, ReleaseHost};
pub use secrets::SecretStore;
pub use signing::{ApiCredential, PollOutcome, SigningClient, SigningStatus};
pub use version::VersionDialect;
