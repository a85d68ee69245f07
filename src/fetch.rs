//! The `fetch.txt` list and the downloader collaborator that materializes
//! its entries into the payload.

use crate::error::{BagError, Issue};
use crate::paths;
use async_trait::async_trait;
use std::path::Path;
use tokio::fs;
use url::Url;

pub(crate) const FETCH_TXT: &str = "fetch.txt";

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum DownloadError {
    #[error("no downloader configured")]
    Unavailable,
    #[error("expected {expected} bytes, received {received}")]
    SizeMismatch { expected: u64, received: u64 },
    #[error("{0}")]
    Failed(String),
}

/// Retrieves the bytes behind a fetch entry.
///
/// Implementations must honor `size_hint` when present and refuse a body
/// of any other length; the engine re-checks the final length either way.
/// A cancelled transfer surfaces as an ordinary [`DownloadError`].
#[async_trait]
pub trait Downloader: Send + Sync {
    async fn fetch(&self, url: &str, size_hint: Option<u64>) -> Result<Vec<u8>, DownloadError>;
}

/// Stand-in until a real downloader is injected; every fetch fails.
#[derive(Debug, Default)]
pub struct NoDownloader;

#[async_trait]
impl Downloader for NoDownloader {
    async fn fetch(&self, _url: &str, _size_hint: Option<u64>) -> Result<Vec<u8>, DownloadError> {
        Err(DownloadError::Unavailable)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchEntry {
    pub url: String,
    /// Expected size in octets, when the producer declared one (`-` on
    /// disk otherwise).
    pub size: Option<u64>,
    /// Destination inside the payload, `data/...` form.
    pub path: String,
}

#[derive(Debug, Default)]
pub struct FetchList {
    entries: Vec<FetchEntry>,
    /// Destinations this instance downloaded, removed again by
    /// `finalize()`.
    materialized: Vec<String>,
}

impl FetchList {
    pub fn entries(&self) -> impl Iterator<Item = &FetchEntry> {
        self.entries.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn push(&mut self, entry: FetchEntry) {
        self.entries.push(entry);
    }

    pub(crate) fn mark_materialized(&mut self, path: &str) {
        if !self.materialized.iter().any(|p| p == path) {
            self.materialized.push(path.to_string());
        }
    }

    pub(crate) fn take_materialized(&mut self) -> Vec<String> {
        std::mem::take(&mut self.materialized)
    }

    fn check_url(url: &str) -> Result<(), BagError> {
        let parsed =
            Url::parse(url).map_err(|_| BagError::Unsupported(format!("`{url}` is not a URL")))?;

        match parsed.scheme() {
            "http" | "https" => Ok(()),
            scheme => Err(BagError::Unsupported(format!(
                "URL scheme `{scheme}` (only http and https can be fetched)"
            ))),
        }
    }

    /// Check an entry destined for the list: http(s) URL, destination
    /// resolving inside the payload. Returns the normalized destination.
    pub(crate) fn check_entry(url: &str, dest: &str) -> Result<String, BagError> {
        Self::check_url(url)?;

        paths::payload_relative(dest)
            .ok_or_else(|| BagError::Conflict(format!("destination `{dest}` is outside the payload")))
    }

    /// Download one entry and write it to its payload destination.
    pub(crate) async fn materialize(
        root: &Path,
        downloader: &dyn Downloader,
        entry: &FetchEntry,
    ) -> Result<(), BagError> {
        let bytes = downloader
            .fetch(&entry.url, entry.size)
            .await
            .map_err(|error| BagError::Download {
                url: entry.url.clone(),
                message: error.to_string(),
            })?;

        if let Some(expected) = entry.size {
            if bytes.len() as u64 != expected {
                return Err(BagError::Download {
                    url: entry.url.clone(),
                    message: DownloadError::SizeMismatch {
                        expected,
                        received: bytes.len() as u64,
                    }
                    .to_string(),
                });
            }
        }

        if !paths::path_in_payload(root, &entry.path) {
            return Err(BagError::Conflict(format!(
                "destination `{}` is outside the payload",
                entry.path
            )));
        }

        let destination = paths::make_absolute(root, &entry.path);
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|error| BagError::io(parent, error))?;
        }
        fs::write(&destination, bytes)
            .await
            .map_err(|error| BagError::io(&destination, error))?;

        Ok(())
    }

    /// Parse decoded `fetch.txt` content. Rejected lines become issues;
    /// the rest are collected.
    pub(crate) fn parse(content: &str) -> (Self, Vec<Issue>) {
        let mut list = Self::default();
        let mut issues = Vec::new();

        for (number, line) in content.lines().enumerate() {
            let number = number + 1;

            if line.trim().is_empty() {
                continue;
            }

            let fields = line
                .split_once([' ', '\t'])
                .map(|(url, rest)| (url, rest.trim_start().split_once([' ', '\t'])));
            let Some((url, Some((size, rest)))) = fields else {
                issues.push(Issue::new(
                    FETCH_TXT,
                    format!("line {number}: expected `<url> <size|-> <path>`"),
                ));
                continue;
            };

            if let Err(error) = Self::check_url(url) {
                issues.push(Issue::new(FETCH_TXT, format!("line {number}: {error}")));
                continue;
            }

            let size = match size {
                "-" => None,
                octets => match octets.parse::<u64>() {
                    Ok(octets) => Some(octets),
                    Err(_) => {
                        issues.push(Issue::new(
                            FETCH_TXT,
                            format!("line {number}: `{octets}` is not a size"),
                        ));
                        continue;
                    }
                },
            };

            let path = paths::decode_manifest_path(rest.trim_start());
            match paths::resolve_dots(&path) {
                Some(resolved) if resolved.starts_with("data/") => {
                    list.entries.push(FetchEntry {
                        url: url.to_string(),
                        size,
                        path: resolved,
                    });
                }
                _ => issues.push(Issue::new(
                    FETCH_TXT,
                    format!("line {number}: destination `{path}` is outside the payload"),
                )),
            }
        }

        (list, issues)
    }

    /// Render entries sorted by destination path.
    pub(crate) fn serialize(&self) -> String {
        let mut entries: Vec<&FetchEntry> = self.entries.iter().collect();
        entries.sort_by(|a, b| a.path.cmp(&b.path));

        entries
            .into_iter()
            .map(|entry| {
                let size = entry
                    .size
                    .map(|octets| octets.to_string())
                    .unwrap_or_else(|| "-".to_string());
                format!(
                    "{} {size} {}\n",
                    entry.url,
                    paths::encode_manifest_path(&entry.path)
                )
            })
            .collect()
    }
}


#[cfg(test)]
mod test {
    use super::testing::MapDownloader;
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn parse_entries() {
        let (list, issues) = FetchList::parse(
            "https://example.org/a 11 data/a.txt\n\
             http://example.org/b - data/sub/b%250.bin\r\n\
             \n",
        );

        assert_eq!(issues, Vec::new());
        assert_eq!(
            list.entries().cloned().collect::<Vec<_>>(),
            vec![
                FetchEntry {
                    url: "https://example.org/a".to_string(),
                    size: Some(11),
                    path: "data/a.txt".to_string(),
                },
                FetchEntry {
                    url: "http://example.org/b".to_string(),
                    size: None,
                    path: "data/sub/b%0.bin".to_string(),
                },
            ]
        );
    }

    #[test]
    fn parse_problems() {
        for (input, needle) in [
            ("https://example.org/a 11\n", "expected `<url> <size|-> <path>`"),
            ("ftp://example.org/a - data/a.txt\n", "URL scheme `ftp`"),
            ("https://example.org/a big data/a.txt\n", "`big` is not a size"),
            (
                "https://example.org/a - tags/a.txt\n",
                "destination `tags/a.txt` is outside the payload",
            ),
            (
                "https://example.org/a - data/../../etc/passwd\n",
                "is outside the payload",
            ),
        ] {
            let (list, issues) = FetchList::parse(input);
            assert!(list.is_empty(), "failing on input value `{input}`");
            assert_eq!(issues.len(), 1, "failing on input value `{input}`");
            assert!(
                issues[0].message.contains(needle),
                "failing on input value `{input}`: {}",
                issues[0].message
            );
        }
    }

    #[test]
    fn serialize_sorted_by_destination() {
        let (list, _) = FetchList::parse(
            "https://example.org/z - data/z.txt\n\
             https://example.org/a 3 data/a.txt\n",
        );

        assert_eq!(
            list.serialize(),
            "https://example.org/a 3 data/a.txt\n\
             https://example.org/z - data/z.txt\n"
        );
    }

    #[test]
    fn check_rejects_bad_entries() {
        assert!(matches!(
            FetchList::check_entry("not a url", "data/a.txt"),
            Err(BagError::Unsupported(_))
        ));
        assert!(matches!(
            FetchList::check_entry("file:///etc/passwd", "data/a.txt"),
            Err(BagError::Unsupported(_))
        ));
        assert!(matches!(
            FetchList::check_entry("https://example.org/a", "../outside.txt"),
            Err(BagError::Conflict(_))
        ));
        assert_eq!(
            FetchList::check_entry("https://example.org/a", "a.txt").unwrap(),
            "data/a.txt"
        );
    }

    #[tokio::test]
    async fn materialize_writes_payload() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = MapDownloader(HashMap::from([(
            "https://example.org/a".to_string(),
            b"hello world".to_vec(),
        )]));

        let entry = FetchEntry {
            url: "https://example.org/a".to_string(),
            size: Some(11),
            path: "data/sub/a.txt".to_string(),
        };
        FetchList::materialize(dir.path(), &downloader, &entry)
            .await
            .unwrap();
        assert_eq!(
            tokio::fs::read(dir.path().join("data/sub/a.txt")).await.unwrap(),
            b"hello world"
        );

        let wrong_size = FetchEntry {
            size: Some(5),
            ..entry.clone()
        };
        assert!(matches!(
            FetchList::materialize(dir.path(), &downloader, &wrong_size).await,
            Err(BagError::Download { .. })
        ));

        assert_eq!(
            FetchList::materialize(dir.path(), &NoDownloader, &entry).await,
            Err(BagError::Download {
                url: "https://example.org/a".to_string(),
                message: DownloadError::Unavailable.to_string(),
            })
        );
    }
}
