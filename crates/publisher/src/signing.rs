//! Client for the remote signing service.
//!
//! Submission hands the self-hosted package to the service; the service
//! validates and signs it asynchronously, so the client polls a status
//! resource until it reaches a terminal state. The poll transition is a
//! pure function over the reported status, and the loop itself runs
//! against a [`StatusSource`] seam so the countdown and retry semantics
//! can be tested without a server.

use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use jsonwebtoken::{encode, EncodingKey, Header};
use rand::RngCore;
use reqwest::header::AUTHORIZATION;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::PendingFilePolicy;
use crate::error::{PublishError, Result};

/// Issuer identity and secret used to mint short-lived credentials.
///
/// The service only accepts tokens with a validity window of a few
/// minutes, so a fresh token is minted for every request instead of
/// reusing one across polls.
#[derive(Debug, Clone)]
pub struct ApiCredential {
    issuer: String,
    secret: String,
    ttl: Duration,
}

#[derive(Serialize)]
struct Claims {
    iss: String,
    jti: String,
    iat: u64,
    exp: u64,
}

impl ApiCredential {
    /// Create a credential minter for the given issuer key pair.
    pub fn new(issuer: impl Into<String>, secret: impl Into<String>, ttl: Duration) -> Self {
        Self {
            issuer: issuer.into(),
            secret: secret.into(),
            ttl,
        }
    }

    /// Mint a fresh authorization header value.
    pub fn mint(&self) -> Result<String> {
        let mut nonce = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut nonce);
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|err| PublishError::other(format!("system clock error: {err}")))?
            .as_secs();
        let claims = Claims {
            iss: self.issuer.clone(),
            jti: hex::encode(nonce),
            iat: now,
            exp: now + self.ttl.as_secs(),
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )?;
        Ok(format!("JWT {token}"))
    }
}

/// Status reported by the signing service for one submission.
#[derive(Debug, Clone, Deserialize)]
pub struct SigningStatus {
    /// Whether the service has finished validating the submission.
    pub processed: bool,
    /// Whether the submission passed validation.
    #[serde(default)]
    pub valid: bool,
    /// Output files produced by the service.
    #[serde(default)]
    pub files: Vec<SignedFile>,
}

/// One output file of a signing run.
#[derive(Debug, Clone, Deserialize)]
pub struct SignedFile {
    /// Whether this file has been signed.
    pub signed: bool,
    /// Where the signed file can be fetched, once available.
    #[serde(default)]
    pub download_url: Option<String>,
}

/// Result of evaluating one status response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The service is still working; poll again.
    Pending,
    /// The signed artifact is ready.
    Signed {
        /// Download URL of the signed artifact.
        download_url: String,
    },
}

/// Pure transition function of the poll state machine.
pub fn evaluate(status: &SigningStatus, policy: PendingFilePolicy) -> Result<PollOutcome> {
    if !status.processed {
        return Ok(PollOutcome::Pending);
    }
    if !status.valid {
        return Err(PublishError::ValidationFailed);
    }
    let file = match status.files.first() {
        // Validity can be reported before the signed output is packaged.
        None => return Ok(PollOutcome::Pending),
        Some(file) => file,
    };
    if !file.signed {
        return match policy {
            PendingFilePolicy::KeepPolling => Ok(PollOutcome::Pending),
            PendingFilePolicy::Fail => Err(PublishError::SigningFailed),
        };
    }
    match file.download_url.as_deref() {
        Some(url) if !url.is_empty() => Ok(PollOutcome::Signed {
            download_url: url.to_string(),
        }),
        _ => Err(PublishError::SigningFailed),
    }
}

/// Source of signing-status snapshots, one per poll.
#[async_trait]
pub(crate) trait StatusSource {
    async fn poll(&mut self) -> Result<SigningStatus>;
}

/// Drive the poll state machine until a terminal state, sleeping
/// `interval` between polls and giving up after `attempts` polls.
pub(crate) async fn await_signed<S>(
    source: &mut S,
    interval: Duration,
    attempts: u32,
    policy: PendingFilePolicy,
) -> Result<String>
where
    S: StatusSource + Send,
{
    let mut countdown = attempts;
    loop {
        tokio::time::sleep(interval).await;
        if countdown == 0 {
            return Err(PublishError::SigningTimeout);
        }
        countdown -= 1;
        let status = source.poll().await?;
        match evaluate(&status, policy)? {
            PollOutcome::Pending => continue,
            PollOutcome::Signed { download_url } => return Ok(download_url),
        }
    }
}

#[derive(Deserialize)]
struct SubmitResponse {
    url: String,
}

/// Authenticated client for the signing service API.
#[derive(Clone)]
pub struct SigningClient {
    http: Client,
    base: String,
    credential: ApiCredential,
    channel: String,
    poll_interval: Duration,
    poll_attempts: u32,
    pending_policy: PendingFilePolicy,
}

impl SigningClient {
    /// Create a client for the service at `base`.
    pub fn new(
        base: impl Into<String>,
        credential: ApiCredential,
        channel: impl Into<String>,
        poll_interval: Duration,
        poll_attempts: u32,
        pending_policy: PendingFilePolicy,
    ) -> Self {
        Self {
            http: Client::new(),
            base: base.into().trim_end_matches('/').to_string(),
            credential,
            channel: channel.into(),
            poll_interval,
            poll_attempts,
            pending_policy,
        }
    }

    /// Submit the package for signing. Returns the status-check URL.
    ///
    /// The service acknowledges a new version with 202; anything else is a
    /// rejection.
    pub async fn submit(
        &self,
        extension_id: &str,
        version: &str,
        artifact: &Path,
    ) -> Result<String> {
        let url = format!("{}/addons/{extension_id}/versions/{version}/", self.base);
        let body = std::fs::read(artifact)?;
        let upload = Part::bytes(body)
            .file_name(
                artifact
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "upload.zip".to_string()),
            )
            .mime_str("application/zip")?;
        let form = Form::new()
            .part("upload", upload)
            .text("channel", self.channel.clone());
        let response = self
            .http
            .put(url)
            .header(AUTHORIZATION, self.credential.mint()?)
            .multipart(form)
            .send()
            .await?;
        if response.status().as_u16() != 202 {
            return Err(PublishError::SigningRejected {
                status: response.status().as_u16(),
            });
        }
        let accepted: SubmitResponse = response.json().await?;
        Ok(accepted.url)
    }

    /// Poll `status_url` until the artifact is signed, then download the
    /// signed package into `dest`.
    pub async fn wait_for_signed(&self, status_url: &str, dest: &Path) -> Result<()> {
        let mut source = HttpStatusSource {
            client: self,
            url: status_url,
        };
        let download_url = await_signed(
            &mut source,
            self.poll_interval,
            self.poll_attempts,
            self.pending_policy,
        )
        .await?;
        tracing::info!(%download_url, "artifact signed, downloading");
        self.download_signed(&download_url, dest).await
    }

    async fn poll_status(&self, status_url: &str) -> Result<SigningStatus> {
        let response = self
            .http
            .get(status_url)
            .header(AUTHORIZATION, self.credential.mint()?)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(PublishError::SigningServiceError {
                status: response.status().as_u16(),
            });
        }
        Ok(response.json().await?)
    }

    async fn download_signed(&self, url: &str, dest: &Path) -> Result<()> {
        let response = self
            .http
            .get(url)
            .header(AUTHORIZATION, self.credential.mint()?)
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
}

struct HttpStatusSource<'a> {
    client: &'a SigningClient,
    url: &'a str,
}

#[async_trait]
impl StatusSource for HttpStatusSource<'_> {
    async fn poll(&mut self) -> Result<SigningStatus> {
        self.client.poll_status(self.url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use std::collections::VecDeque;
    use tempfile::tempdir;

    fn status(processed: bool, valid: bool, files: Vec<SignedFile>) -> SigningStatus {
        SigningStatus {
            processed,
            valid,
            files,
        }
    }

    fn signed_file(signed: bool, url: Option<&str>) -> SignedFile {
        SignedFile {
            signed,
            download_url: url.map(str::to_string),
        }
    }

    #[test]
    fn unprocessed_status_stays_pending() {
        let outcome = evaluate(&status(false, false, vec![]), PendingFilePolicy::Fail).unwrap();
        assert_eq!(outcome, PollOutcome::Pending);
    }

    #[test]
    fn invalid_submission_is_fatal() {
        let err = evaluate(&status(true, false, vec![]), PendingFilePolicy::KeepPolling).unwrap_err();
        assert!(matches!(err, PublishError::ValidationFailed));
    }

    #[test]
    fn valid_without_files_stays_pending() {
        let outcome = evaluate(&status(true, true, vec![]), PendingFilePolicy::Fail).unwrap();
        assert_eq!(outcome, PollOutcome::Pending);
    }

    #[test]
    fn unsigned_file_honors_policy() {
        let pending = status(true, true, vec![signed_file(false, None)]);
        assert_eq!(
            evaluate(&pending, PendingFilePolicy::KeepPolling).unwrap(),
            PollOutcome::Pending
        );
        assert!(matches!(
            evaluate(&pending, PendingFilePolicy::Fail).unwrap_err(),
            PublishError::SigningFailed
        ));
    }

    #[test]
    fn signed_file_without_url_is_fatal() {
        let broken = status(true, true, vec![signed_file(true, None)]);
        assert!(matches!(
            evaluate(&broken, PendingFilePolicy::KeepPolling).unwrap_err(),
            PublishError::SigningFailed
        ));
    }

    #[test]
    fn signed_file_yields_download_url() {
        let done = status(true, true, vec![signed_file(true, Some("https://d/1"))]);
        assert_eq!(
            evaluate(&done, PendingFilePolicy::Fail).unwrap(),
            PollOutcome::Signed {
                download_url: "https://d/1".to_string()
            }
        );
    }

    struct ScriptedSource {
        responses: VecDeque<SigningStatus>,
        polls: u32,
    }

    #[async_trait]
    impl StatusSource for ScriptedSource {
        async fn poll(&mut self) -> Result<SigningStatus> {
            self.polls += 1;
            self.responses
                .pop_front()
                .ok_or_else(|| PublishError::other("source exhausted"))
        }
    }

    #[tokio::test]
    async fn loop_reaches_signed_on_nth_poll() {
        let mut responses: VecDeque<_> =
            (0..4).map(|_| status(false, false, vec![])).collect();
        responses.push_back(status(true, true, vec![signed_file(true, Some("https://d/1"))]));
        let mut source = ScriptedSource { responses, polls: 0 };

        let url = await_signed(
            &mut source,
            Duration::from_millis(1),
            10,
            PendingFilePolicy::KeepPolling,
        )
        .await
        .unwrap();

        assert_eq!(url, "https://d/1");
        assert_eq!(source.polls, 5);
    }

    #[tokio::test]
    async fn loop_times_out_when_budget_exhausts() {
        let responses: VecDeque<_> = (0..10).map(|_| status(false, false, vec![])).collect();
        let mut source = ScriptedSource { responses, polls: 0 };

        let err = await_signed(
            &mut source,
            Duration::from_millis(1),
            3,
            PendingFilePolicy::KeepPolling,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, PublishError::SigningTimeout));
        assert_eq!(source.polls, 3);
    }

    #[tokio::test]
    async fn credential_is_reminted_for_every_poll() {
        struct CountingSource {
            tokens: Vec<String>,
            credential: ApiCredential,
        }

        #[async_trait]
        impl StatusSource for CountingSource {
            async fn poll(&mut self) -> Result<SigningStatus> {
                self.tokens.push(self.credential.mint()?);
                let done = self.tokens.len() == 3;
                Ok(status(
                    done,
                    done,
                    if done {
                        vec![signed_file(true, Some("https://d/1"))]
                    } else {
                        vec![]
                    },
                ))
            }
        }

        let mut source = CountingSource {
            tokens: Vec::new(),
            credential: ApiCredential::new("user:1", "secret", Duration::from_secs(180)),
        };
        await_signed(
            &mut source,
            Duration::from_millis(1),
            10,
            PendingFilePolicy::KeepPolling,
        )
        .await
        .unwrap();

        // Fresh nonce per mint means no token repeats across polls.
        assert_eq!(source.tokens.len(), 3);
        assert_ne!(source.tokens[0], source.tokens[1]);
        assert_ne!(source.tokens[1], source.tokens[2]);
    }

    #[tokio::test]
    async fn submit_requires_accepted_response() {
        let server = MockServer::start();
        let accepted = server.mock(|when, then| {
            when.method(PUT).path("/addons/ext@example.org/versions/1.2.3/");
            then.status(202)
                .json_body(serde_json::json!({ "url": server.url("/status/1") }));
        });

        let dir = tempdir().unwrap();
        let artifact = dir.path().join("unsigned.zip");
        std::fs::write(&artifact, b"zipbytes").unwrap();

        let client = SigningClient::new(
            server.url(""),
            ApiCredential::new("user:1", "secret", Duration::from_secs(180)),
            "unlisted",
            Duration::from_millis(1),
            3,
            PendingFilePolicy::KeepPolling,
        );
        let status_url = client
            .submit("ext@example.org", "1.2.3", &artifact)
            .await
            .unwrap();

        assert_eq!(status_url, server.url("/status/1"));
        accepted.assert();
    }

    #[tokio::test]
    async fn rejected_submission_is_fatal() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(PUT).path("/addons/ext@example.org/versions/1.2.3/");
            then.status(400);
        });

        let dir = tempdir().unwrap();
        let artifact = dir.path().join("unsigned.zip");
        std::fs::write(&artifact, b"zipbytes").unwrap();

        let client = SigningClient::new(
            server.url(""),
            ApiCredential::new("user:1", "secret", Duration::from_secs(180)),
            "unlisted",
            Duration::from_millis(1),
            3,
            PendingFilePolicy::KeepPolling,
        );
        let err = client
            .submit("ext@example.org", "1.2.3", &artifact)
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::SigningRejected { status: 400 }));
    }

    #[tokio::test]
    async fn wait_downloads_signed_artifact() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/status/1");
            then.status(200).json_body(serde_json::json!({
                "processed": true,
                "valid": true,
                "files": [{ "signed": true, "download_url": server.url("/signed/1") }]
            }));
        });
        server.mock(|when, then| {
            when.method(GET).path("/signed/1");
            then.status(200).body(b"signed-bytes");
        });

        let dir = tempdir().unwrap();
        let dest = dir.path().join("signed.zip");
        let client = SigningClient::new(
            server.url(""),
            ApiCredential::new("user:1", "secret", Duration::from_secs(180)),
            "unlisted",
            Duration::from_millis(1),
            3,
            PendingFilePolicy::KeepPolling,
        );
        client
            .wait_for_signed(&server.url("/status/1"), &dest)
            .await
            .unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), b"signed-bytes");
    }

    #[tokio::test]
    async fn failed_signed_download_is_fatal() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/status/1");
            then.status(200).json_body(serde_json::json!({
                "processed": true,
                "valid": true,
                "files": [{ "signed": true, "download_url": server.url("/signed/1") }]
            }));
        });
        server.mock(|when, then| {
            when.method(GET).path("/signed/1");
            then.status(502);
        });

        let dir = tempdir().unwrap();
        let client = SigningClient::new(
            server.url(""),
            ApiCredential::new("user:1", "secret", Duration::from_secs(180)),
            "unlisted",
            Duration::from_millis(1),
            3,
            PendingFilePolicy::KeepPolling,
        );
        let err = client
            .wait_for_signed(&server.url("/status/1"), &dir.path().join("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::DownloadFailed { status: 502 }));
    }

    #[tokio::test]
    async fn failed_status_poll_is_fatal() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/status/1");
            then.status(500);
        });

        let dir = tempdir().unwrap();
        let client = SigningClient::new(
            server.url(""),
            ApiCredential::new("user:1", "secret", Duration::from_secs(180)),
            "unlisted",
            Duration::from_millis(1),
            3,
            PendingFilePolicy::KeepPolling,
        );
        let err = client
            .wait_for_signed(&server.url("/status/1"), &dir.path().join("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::SigningServiceError { status: 500 }));
    }
}
