//! Client for the release host: release lookup, asset download, asset
//! upload and deletion.

use std::path::Path;

use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::Deserialize;

use crate::error::{PublishError, Result};

/// Metadata of one release, as reported by the release host.
#[derive(Debug, Clone, Deserialize)]
pub struct Release {
    /// Tag the release was published under.
    pub tag_name: String,
    /// Downloadable assets attached to the release.
    pub assets: Vec<ReleaseAsset>,
    /// Upload endpoint template, with a `{?name,label}` placeholder.
    pub upload_url: String,
}

/// One downloadable asset of a release.
#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseAsset {
    /// File name of the asset.
    pub name: String,
    /// API URL used to fetch or delete the asset.
    pub url: String,
}

impl Release {
    /// Find an asset by file name.
    pub fn asset(&self, name: &str) -> Option<&ReleaseAsset> {
        self.assets.iter().find(|a| a.name == name)
    }
}

/// Authenticated client for the release host API.
#[derive(Clone)]
pub struct ReleaseHost {
    http: Client,
    base: String,
    auth: String,
}

impl ReleaseHost {
    /// Create a client for the API at `base` using a bearer `token`.
    pub fn new(base: impl Into<String>, token: &str) -> Self {
        Self {
            http: Client::new(),
            base: base.into().trim_end_matches('/').to_string(),
            auth: format!("Bearer {token}"),
        }
    }

    /// Look up a release by tag. A non-success response means the release
    /// does not exist from the caller's point of view.
    pub async fn release_by_tag(&self, owner: &str, repo: &str, tag: &str) -> Result<Release> {
        let url = format!("{}/repos/{owner}/{repo}/releases/tags/{tag}", self.base);
        let response = self
            .http
            .get(url)
            .header(AUTHORIZATION, &self.auth)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(PublishError::NotFound(tag.to_string()));
        }
        Ok(response.json().await?)
    }

    /// Download an asset verbatim into `dest`.
    ///
    /// Redirects are followed transparently by the underlying client.
    pub async fn download_asset(&self, url: &str, dest: &Path) -> Result<()> {
        let response = self
            .http
            .get(url)
            .header(AUTHORIZATION, &self.auth)
            .header(ACCEPT, "application/octet-stream")
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(PublishError::DownloadFailed {
                status: response.status().as_u16(),
            });
        }
        let body = response.bytes().await?;
        std::fs::write(dest, &body)?;
        Ok(())
    }

    /// Upload `src` as a new release asset named `name`.
    ///
    /// `upload_url` is the release's upload endpoint template; its
    /// placeholder is substituted with the target file name. The host
    /// reports creation with 201.
    pub async fn upload_asset(&self, upload_url: &str, name: &str, src: &Path) -> Result<()> {
        let url = upload_url.replace("{?name,label}", &format!("?name={name}"));
        let body = std::fs::read(src)?;
        let response = self
            .http
            .post(url)
            .header(AUTHORIZATION, &self.auth)
            .header(CONTENT_TYPE, "application/zip")
            .body(body)
            .send()
            .await?;
        if response.status().as_u16() != 201 {
            return Err(PublishError::UploadFailed {
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }

    /// Delete an asset by its API URL. The host reports deletion with 204.
    pub async fn delete_asset(&self, url: &str) -> Result<()> {
        let response = self
            .http
            .delete(url)
            .header(AUTHORIZATION, &self.auth)
            .send()
            .await?;
        if response.status().as_u16() != 204 {
            return Err(PublishError::other(format!(
                "asset deletion failed -- server error {}",
                response.status().as_u16()
            )));
        }
        Ok(())
    }
}
