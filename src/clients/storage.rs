//! Storage gateways: a local directory or an HTTP blob service.
//!
//! ## Why two backends?
//!
//! The production deployment reads uploads from and writes summaries to a
//! blob service. Local development and tests use a plain directory where each
//! container is a sub-directory, so the full pipeline can run without any
//! cloud account. [`connect`] picks the backend from the configured endpoint
//! the same way input resolution tells URLs from paths.

use crate::clients::ObjectStore;
use crate::error::{ClientError, DocsumError};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Storage service REST version sent with every blob request.
const BLOB_API_VERSION: &str = "2021-08-06";

/// Check if the endpoint looks like a URL or a connection string rather than a directory.
pub fn is_remote(endpoint: &str) -> bool {
    endpoint.starts_with("http://")
        || endpoint.starts_with("https://")
        || endpoint.contains("BlobEndpoint=")
        || endpoint.contains("AccountName=")
}

/// Build the storage gateway for `endpoint`.
///
/// * `https://account.blob.core.windows.net/?sv=…` — blob service with SAS
/// * `BlobEndpoint=https://…;SharedAccessSignature=sv=…` — same, as a
///   connection string
/// * `file:///srv/docsum` or `/srv/docsum` — local directory
pub fn connect(endpoint: &str, client: reqwest::Client) -> Result<Arc<dyn ObjectStore>, DocsumError> {
    if is_remote(endpoint) {
        let store = BlobObjectStore::from_endpoint(endpoint, client)?;
        info!("Storage: blob service at {}", store.account_url());
        Ok(Arc::new(store))
    } else {
        let root = endpoint.strip_prefix("file://").unwrap_or(endpoint);
        info!("Storage: local directory {}", root);
        Ok(Arc::new(FsObjectStore::new(root)))
    }
}

// ── Local directory ──────────────────────────────────────────────────────────

/// Containers are sub-directories of `root`; object names may contain `/`.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, container: &str, name: &str) -> Result<PathBuf, ClientError> {
        let container_dir = self.container_dir(container)?;
        let rel = Path::new(name);
        let clean = !name.is_empty()
            && rel
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !clean {
            return Err(ClientError::InvalidName(name.to_string()));
        }
        Ok(container_dir.join(rel))
    }

    fn container_dir(&self, container: &str) -> Result<PathBuf, ClientError> {
        let mut comps = Path::new(container).components();
        match (comps.next(), comps.next()) {
            (Some(Component::Normal(_)), None) => Ok(self.root.join(container)),
            _ => Err(ClientError::InvalidName(container.to_string())),
        }
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn read(&self, container: &str, name: &str) -> Result<Vec<u8>, ClientError> {
        let path = self.object_path(container, name)?;
        tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ClientError::NotFound {
                    container: container.to_string(),
                    name: name.to_string(),
                }
            } else {
                ClientError::Io(format!("{}: {e}", path.display()))
            }
        })
    }

    async fn write(&self, container: &str, name: &str, bytes: Vec<u8>) -> Result<(), ClientError> {
        let path = self.object_path(container, name)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ClientError::Io(format!("{}: {e}", parent.display())))?;
        }

        // Atomic write: write to temp, then rename
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| ClientError::InvalidName(name.to_string()))?;
        let tmp_path = path.with_file_name(format!(".{file_name}.part"));
        tokio::fs::write(&tmp_path, &bytes)
            .await
            .map_err(|e| ClientError::Io(format!("{}: {e}", tmp_path.display())))?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .map_err(|e| ClientError::Io(format!("{}: {e}", path.display())))?;

        debug!("Wrote {} bytes to {}", bytes.len(), path.display());
        Ok(())
    }

    /// Every object below the container, nested names joined with `/`.
    async fn list(&self, container: &str) -> Result<Vec<String>, ClientError> {
        let root = self.container_dir(container)?;
        let mut names = Vec::new();
        let mut pending = vec![(root.clone(), String::new())];

        while let Some((dir, prefix)) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound && dir == root => {
                    return Ok(Vec::new())
                }
                Err(e) => return Err(ClientError::Io(format!("{}: {e}", dir.display()))),
            };
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| ClientError::Io(format!("{}: {e}", dir.display())))?
            {
                let name = entry.file_name().to_string_lossy().to_string();
                // In-flight writes are hidden dot-files.
                if name.starts_with('.') {
                    continue;
                }
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| ClientError::Io(format!("{}: {e}", entry.path().display())))?;
                let rel = format!("{prefix}{name}");
                if file_type.is_dir() {
                    pending.push((entry.path(), format!("{rel}/")));
                } else if file_type.is_file() {
                    names.push(rel);
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

// ── Blob service ─────────────────────────────────────────────────────────────

static RE_BLOB_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"<Name>([^<]*)</Name>").unwrap());
static RE_NEXT_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<NextMarker>([^<]+)</NextMarker>").unwrap());

/// Blob service addressed by account URL plus an optional SAS token.
#[derive(Debug, Clone)]
pub struct BlobObjectStore {
    client: reqwest::Client,
    account_url: Url,
    sas: Option<String>,
}

impl BlobObjectStore {
    pub fn new(client: reqwest::Client, account_url: Url, sas: Option<String>) -> Self {
        let sas = sas
            .map(|s| s.trim_start_matches('?').to_string())
            .filter(|s| !s.is_empty());
        Self {
            client,
            account_url,
            sas,
        }
    }

    /// Parse an account URL (SAS in the query string) or a connection string.
    pub fn from_endpoint(endpoint: &str, client: reqwest::Client) -> Result<Self, DocsumError> {
        let (url, sas) = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            let mut url = Url::parse(endpoint)
                .map_err(|e| DocsumError::InvalidConfig(format!("storage endpoint: {e}")))?;
            let sas = url.query().map(str::to_string);
            url.set_query(None);
            (url, sas)
        } else {
            parse_connection_string(endpoint)?
        };
        Ok(Self::new(client, url, sas))
    }

    pub fn account_url(&self) -> &Url {
        &self.account_url
    }

    fn url(&self, segments: &[&str], query: &[(&str, &str)]) -> Result<Url, ClientError> {
        let mut url = self.account_url.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::InvalidName(self.account_url.to_string()))?
            .pop_if_empty()
            .extend(segments.iter().flat_map(|s| s.split('/')));

        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        // The SAS is already encoded; appended verbatim.
        if let Some(ref sas) = self.sas {
            let full = match url.query() {
                Some(q) => format!("{q}&{sas}"),
                None => sas.clone(),
            };
            url.set_query(Some(&full));
        }
        Ok(url)
    }
}

#[async_trait]
impl ObjectStore for BlobObjectStore {
    async fn read(&self, container: &str, name: &str) -> Result<Vec<u8>, ClientError> {
        let url = self.url(&[container, name], &[])?;
        let response = self
            .client
            .get(url)
            .header("x-ms-version", BLOB_API_VERSION)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ClientError::NotFound {
                container: container.to_string(),
                name: name.to_string(),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.bytes().await?.to_vec())
    }

    async fn write(&self, container: &str, name: &str, bytes: Vec<u8>) -> Result<(), ClientError> {
        let url = self.url(&[container, name], &[])?;
        let len = bytes.len();
        let response = self
            .client
            .put(url)
            .header("x-ms-version", BLOB_API_VERSION)
            .header("x-ms-blob-type", "BlockBlob")
            .header(reqwest::header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(bytes)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                status: status.as_u16(),
                body,
            });
        }
        debug!("Uploaded {} bytes to {}/{}", len, container, name);
        Ok(())
    }

    async fn list(&self, container: &str) -> Result<Vec<String>, ClientError> {
        let mut names = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let mut query = vec![("restype", "container"), ("comp", "list")];
            if let Some(ref m) = marker {
                query.push(("marker", m.as_str()));
            }
            let url = self.url(&[container], &query)?;
            let response = self
                .client
                .get(url)
                .header("x-ms-version", BLOB_API_VERSION)
                .send()
                .await?;

            let status = response.status();
            let body = response.text().await?;
            if !status.is_success() {
                return Err(ClientError::Status {
                    status: status.as_u16(),
                    body,
                });
            }

            let (page, next) = parse_blob_listing(&body);
            names.extend(page);
            match next {
                Some(m) => marker = Some(m),
                None => break,
            }
        }

        names.sort();
        Ok(names)
    }
}

/// Split `BlobEndpoint=…;SharedAccessSignature=…` into URL and SAS.
fn parse_connection_string(conn: &str) -> Result<(Url, Option<String>), DocsumError> {
    let mut blob_endpoint = None;
    let mut sas = None;
    let mut account_name = None;
    let mut protocol = "https";
    let mut suffix = "core.windows.net";

    for pair in conn.split(';').filter(|p| !p.trim().is_empty()) {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        match key.trim() {
            "BlobEndpoint" => blob_endpoint = Some(value.trim()),
            "SharedAccessSignature" => sas = Some(value.trim().to_string()),
            "AccountName" => account_name = Some(value.trim()),
            "DefaultEndpointsProtocol" => protocol = value.trim(),
            "EndpointSuffix" => suffix = value.trim(),
            _ => {}
        }
    }

    if sas.is_none() {
        return Err(DocsumError::InvalidConfig(
            "storage connection string has no SharedAccessSignature; \
             account-key signing is not supported, generate a SAS token instead"
                .into(),
        ));
    }

    let endpoint = match (blob_endpoint, account_name) {
        (Some(e), _) => e.to_string(),
        (None, Some(account)) => format!("{protocol}://{account}.blob.{suffix}"),
        (None, None) => {
            return Err(DocsumError::InvalidConfig(
                "storage connection string needs BlobEndpoint or AccountName".into(),
            ))
        }
    };
    let url = Url::parse(&endpoint)
        .map_err(|e| DocsumError::InvalidConfig(format!("storage endpoint: {e}")))?;
    Ok((url, sas))
}

/// Extract blob names and the continuation marker from a List Blobs response.
fn parse_blob_listing(xml: &str) -> (Vec<String>, Option<String>) {
    let names = RE_BLOB_NAME
        .captures_iter(xml)
        .map(|c| unescape_xml(&c[1]))
        .collect();
    let marker = RE_NEXT_MARKER.captures(xml).map(|c| unescape_xml(&c[1]));
    (names, marker)
}

fn unescape_xml(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_remote() {
        assert!(is_remote("https://acct.blob.core.windows.net/?sv=1"));
        assert!(is_remote("BlobEndpoint=https://x;SharedAccessSignature=sv=1"));
        assert!(!is_remote("/srv/docsum"));
        assert!(!is_remote("file:///srv/docsum"));
        assert!(!is_remote(""));
    }

    #[tokio::test]
    async fn fs_store_roundtrip_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());

        store
            .write("output", "b.txt", b"second".to_vec())
            .await
            .unwrap();
        store
            .write("output", "a.txt", b"first".to_vec())
            .await
            .unwrap();

        assert_eq!(store.read("output", "a.txt").await.unwrap(), b"first");
        assert_eq!(store.list("output").await.unwrap(), ["a.txt", "b.txt"]);
        assert!(store.list("empty").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn fs_store_missing_object_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        let err = store.read("input", "nope.pdf").await.unwrap_err();
        assert!(matches!(err, ClientError::NotFound { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn fs_store_rejects_escaping_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        for bad in ["../etc/passwd", "/abs.pdf", "", "a/../../b"] {
            let err = store.read("input", bad).await.unwrap_err();
            assert!(matches!(err, ClientError::InvalidName(_)), "{bad}: {err:?}");
        }
        let err = store.list("../x").await.unwrap_err();
        assert!(matches!(err, ClientError::InvalidName(_)));
    }

    #[test]
    fn blob_url_carries_sas_and_encodes_name() {
        let store = BlobObjectStore::from_endpoint(
            "https://acct.blob.core.windows.net/?sv=2022&sig=abc",
            reqwest::Client::new(),
        )
        .unwrap();
        let url = store.url(&["input", "my report.pdf"], &[]).unwrap();
        assert_eq!(
            url.as_str(),
            "https://acct.blob.core.windows.net/input/my%20report.pdf?sv=2022&sig=abc"
        );

        let list = store
            .url(&["input"], &[("restype", "container"), ("comp", "list")])
            .unwrap();
        assert_eq!(
            list.query(),
            Some("restype=container&comp=list&sv=2022&sig=abc")
        );
    }

    #[test]
    fn connection_string_with_sas() {
        let (url, sas) = parse_connection_string(
            "BlobEndpoint=https://acct.blob.core.windows.net/;SharedAccessSignature=sv=2022&sig=x",
        )
        .unwrap();
        assert_eq!(url.host_str(), Some("acct.blob.core.windows.net"));
        assert_eq!(sas.as_deref(), Some("sv=2022&sig=x"));

        let (url, _) = parse_connection_string(
            "DefaultEndpointsProtocol=https;AccountName=acct;SharedAccessSignature=sv=1",
        )
        .unwrap();
        assert_eq!(url.as_str(), "https://acct.blob.core.windows.net/");
    }

    #[test]
    fn connection_string_without_sas_is_rejected() {
        let err = parse_connection_string("AccountName=acct;AccountKey=secret").unwrap_err();
        assert!(err.to_string().contains("SharedAccessSignature"));
    }

    #[test]
    fn parses_blob_listing_with_marker() {
        let xml = r#"<?xml version="1.0" encoding="utf-8"?>
<EnumerationResults ServiceEndpoint="https://acct.blob.core.windows.net/" ContainerName="input">
  <Blobs>
    <Blob><Name>a.pdf</Name><Properties /></Blob>
    <Blob><Name>R&amp;D.pdf</Name><Properties /></Blob>
  </Blobs>
  <NextMarker>2!abc</NextMarker>
</EnumerationResults>"#;
        let (names, marker) = parse_blob_listing(xml);
        assert_eq!(names, ["a.pdf", "R&D.pdf"]);
        assert_eq!(marker.as_deref(), Some("2!abc"));

        let (_, none) = parse_blob_listing("<EnumerationResults><NextMarker /></EnumerationResults>");
        assert!(none.is_none());
    }

    #[test]
    fn listing_marker_is_form_encoded_before_sas() {
        let store = BlobObjectStore::from_endpoint(
            "https://acct.blob.core.windows.net/?sv=2022&sig=abc",
            reqwest::Client::new(),
        )
        .unwrap();
        let url = store
            .url(
                &["input"],
                &[("restype", "container"), ("comp", "list"), ("marker", "2!a+b/c==")],
            )
            .unwrap();
        assert_eq!(
            url.query(),
            Some("restype=container&comp=list&marker=2%21a%2Bb%2Fc%3D%3D&sv=2022&sig=abc")
        );
    }

    #[tokio::test]
    async fn fs_store_lists_nested_objects() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        store.write("input", "2024/q1/a.pdf", b"a".to_vec()).await.unwrap();
        store.write("input", "b.pdf", b"b".to_vec()).await.unwrap();
        tokio::fs::write(dir.path().join("input/2024/.c.pdf.part"), b"partial")
            .await
            .unwrap();

        assert_eq!(
            store.list("input").await.unwrap(),
            ["2024/q1/a.pdf", "b.pdf"]
        );
        assert_eq!(store.read("input", "2024/q1/a.pdf").await.unwrap(), b"a");
    }
}
