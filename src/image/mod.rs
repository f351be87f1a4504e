// Image/Snapshot Gateway.
//
// Contract per spec §4.1: `get_or_pull`, `prepare_snapshot`, `release_snapshot`.
// No image-pulling code exists to generalize here, so this is built the way
// `rexbrahh-plfm-vt`'s `node-agent/src/image/{oci,cache,puller,rootdisk}.rs`
// structures theirs — a registry client behind a narrow trait, a digest-keyed
// local cache, and a writable snapshot directory keyed by snapshot_id.

use crate::config::ImagePullPolicy;
use crate::error::Error;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct Image {
    pub image_ref: String,
    pub digest: String,
    pub layer_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct Mount {
    pub source: PathBuf,
    pub target: PathBuf,
    pub fs_type: String,
}

/// Narrow capability surface the pool controller drives the snapshotter
/// through. Production implementation is `ImageGateway`; tests substitute a
/// double.
#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn get_or_pull(&self, image_ref: &str, policy: ImagePullPolicy) -> Result<Image, Error>;
    async fn prepare_snapshot(&self, image: &Image, snapshot_id: &str) -> Result<Vec<Mount>, Error>;
    async fn release_snapshot(&self, lease_id: &str) -> Result<(), Error>;
}

/// OCI-registry-backed image store with a local unpack cache and a writable
/// snapshot directory per `snapshot_id`.
pub struct ImageGateway {
    cache_dir: PathBuf,
    snapshot_dir: PathBuf,
    client: reqwest::Client,
    /// Scheme used to reach the registry host embedded in an image_ref.
    /// Always "https" in production; overridden to "http" only by tests
    /// pointing at a local mock registry.
    registry_scheme: &'static str,
    /// Serializes pulls within this gateway instance (spec §4.1: concurrent
    /// pulls of the same ref would duplicate work and race the snapshotter).
    pull_lock: Mutex<()>,
    known_digests: Mutex<HashSet<String>>,
    leases: Mutex<HashSet<String>>,
}

impl ImageGateway {
    pub fn new(cache_dir: PathBuf, snapshot_dir: PathBuf) -> Self {
        Self {
            cache_dir,
            snapshot_dir,
            client: reqwest::Client::new(),
            registry_scheme: "https",
            pull_lock: Mutex::new(()),
            known_digests: Mutex::new(HashSet::new()),
            leases: Mutex::new(HashSet::new()),
        }
    }

    #[cfg(test)]
    fn with_registry_scheme(cache_dir: PathBuf, snapshot_dir: PathBuf, scheme: &'static str) -> Self {
        Self {
            registry_scheme: scheme,
            ..Self::new(cache_dir, snapshot_dir)
        }
    }

    fn digest_for(image_ref: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(image_ref.as_bytes());
        format!("sha256:{:x}", hasher.finalize())
    }

    fn layer_path_for(&self, digest: &str) -> PathBuf {
        self.cache_dir.join(digest.replace(':', "_"))
    }

    async fn is_local(&self, digest: &str) -> bool {
        self.known_digests.lock().await.contains(digest) || self.layer_path_for(digest).exists()
    }

    async fn pull(&self, image_ref: &str) -> Result<Image, Error> {
        let _guard = self.pull_lock.lock().await;

        let digest = Self::digest_for(image_ref);
        let layer_path = self.layer_path_for(&digest);

        if layer_path.exists() {
            debug!(image_ref, %digest, "image already unpacked, skipping pull");
        } else {
            info!(image_ref, %digest, "pulling image");
            tokio::fs::create_dir_all(&self.cache_dir)
                .await
                .map_err(|e| Error::ImageUnavailable {
                    image_ref: image_ref.to_string(),
                    source: anyhow::Error::new(e),
                })?;

            let (registry_ref, reference) = parse_image_ref(image_ref);
            let url = format!(
                "{}://{}/v2/{}/manifests/latest",
                self.registry_scheme, registry_ref, reference
            );
            let response = self
                .client
                .get(&url)
                .header("Accept", "application/vnd.oci.image.manifest.v1+json")
                .send()
                .await
                .map_err(|e| Error::ImageUnavailable {
                    image_ref: image_ref.to_string(),
                    source: anyhow::Error::new(e),
                })?;

            if !response.status().is_success() {
                return Err(Error::ImageUnavailable {
                    image_ref: image_ref.to_string(),
                    source: anyhow::anyhow!("registry returned {}", response.status()),
                });
            }

            let body = response.bytes().await.map_err(|e| Error::ImageUnavailable {
                image_ref: image_ref.to_string(),
                source: anyhow::Error::new(e),
            })?;
            tokio::fs::write(&layer_path, &body)
                .await
                .map_err(|e| Error::ImageUnavailable {
                    image_ref: image_ref.to_string(),
                    source: anyhow::Error::new(e),
                })?;
        }

        self.known_digests.lock().await.insert(digest.clone());

        Ok(Image {
            image_ref: image_ref.to_string(),
            digest,
            layer_path,
        })
    }
}

fn parse_image_ref(image_ref: &str) -> (String, String) {
    match image_ref.split_once('/') {
        Some((registry, rest)) if registry.contains('.') || registry.contains(':') => {
            (registry.to_string(), rest.to_string())
        }
        _ => ("registry-1.docker.io".to_string(), image_ref.to_string()),
    }
}

#[async_trait]
impl ImageStore for ImageGateway {
    async fn get_or_pull(&self, image_ref: &str, policy: ImagePullPolicy) -> Result<Image, Error> {
        let digest = Self::digest_for(image_ref);

        match policy {
            ImagePullPolicy::Never => {
                if !self.is_local(&digest).await {
                    return Err(Error::ImageUnavailable {
                        image_ref: image_ref.to_string(),
                        source: anyhow::anyhow!("image not present locally and pull policy is never"),
                    });
                }
                Ok(Image {
                    image_ref: image_ref.to_string(),
                    digest: digest.clone(),
                    layer_path: self.layer_path_for(&digest),
                })
            }
            ImagePullPolicy::Always => self.pull(image_ref).await,
            ImagePullPolicy::IfNotPresent => {
                if self.is_local(&digest).await {
                    Ok(Image {
                        image_ref: image_ref.to_string(),
                        digest: digest.clone(),
                        layer_path: self.layer_path_for(&digest),
                    })
                } else {
                    self.pull(image_ref).await
                }
            }
        }
    }

    async fn prepare_snapshot(&self, image: &Image, snapshot_id: &str) -> Result<Vec<Mount>, Error> {
        let snapshot_path = self.snapshot_dir.join(snapshot_id);

        if !snapshot_path.exists() {
            tokio::fs::create_dir_all(&self.snapshot_dir)
                .await
                .map_err(|e| Error::SnapshotFailed {
                    snapshot_id: snapshot_id.to_string(),
                    source: anyhow::Error::new(e),
                })?;
            tokio::fs::copy(&image.layer_path, &snapshot_path)
                .await
                .map_err(|e| Error::SnapshotFailed {
                    snapshot_id: snapshot_id.to_string(),
                    source: anyhow::Error::new(e),
                })?;
        }

        self.leases.lock().await.insert(snapshot_id.to_string());

        Ok(vec![Mount {
            source: snapshot_path,
            target: PathBuf::from("/"),
            fs_type: "ext4".to_string(),
        }])
    }

    async fn release_snapshot(&self, lease_id: &str) -> Result<(), Error> {
        // Absence is not an error, per spec §4.1.
        self.leases.lock().await.remove(lease_id);
        Ok(())
    }
}

pub type SharedImageStore = Arc<dyn ImageStore>;

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn gateway(dir: &TempDir) -> ImageGateway {
        ImageGateway::new(dir.path().join("cache"), dir.path().join("snapshots"))
    }

    #[tokio::test]
    async fn get_or_pull_never_fails_when_not_local() {
        let dir = TempDir::new().unwrap();
        let gw = gateway(&dir);
        let result = gw.get_or_pull("example.com/repo:tag", ImagePullPolicy::Never).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn release_snapshot_is_idempotent_for_unknown_lease() {
        let dir = TempDir::new().unwrap();
        let gw = gateway(&dir);
        assert!(gw.release_snapshot("does-not-exist").await.is_ok());
    }

    #[test]
    fn digest_is_deterministic() {
        assert_eq!(
            ImageGateway::digest_for("ghcr.io/example/runner:latest"),
            ImageGateway::digest_for("ghcr.io/example/runner:latest")
        );
    }

    #[tokio::test]
    async fn get_or_pull_always_fetches_from_registry() {
        use wiremock::matchers::{method, path_regex};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/v2/.*/manifests/latest$"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"fake-manifest".to_vec()))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let gw = ImageGateway::with_registry_scheme(
            dir.path().join("cache"),
            dir.path().join("snapshots"),
            "http",
        );

        let image_ref = format!("{}/ci-runner:latest", server.address());
        let image = gw
            .get_or_pull(&image_ref, ImagePullPolicy::Always)
            .await
            .unwrap();

        assert_eq!(image.image_ref, image_ref);
        assert!(image.layer_path.exists());
    }

    #[tokio::test]
    async fn get_or_pull_propagates_registry_errors() {
        use wiremock::matchers::{method, path_regex};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/v2/.*/manifests/latest$"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let gw = ImageGateway::with_registry_scheme(
            dir.path().join("cache"),
            dir.path().join("snapshots"),
            "http",
        );

        let image_ref = format!("{}/missing:latest", server.address());
        let result = gw.get_or_pull(&image_ref, ImagePullPolicy::Always).await;
        assert!(matches!(result, Err(Error::ImageUnavailable { .. })));
    }

    #[test]
    fn parse_image_ref_detects_registry_host() {
        let (registry, rest) = parse_image_ref("ghcr.io/example/runner:latest");
        assert_eq!(registry, "ghcr.io");
        assert_eq!(rest, "example/runner:latest");

        let (registry, rest) = parse_image_ref("library/ubuntu:22.04");
        assert_eq!(registry, "registry-1.docker.io");
        assert_eq!(rest, "library/ubuntu:22.04");
    }
}
