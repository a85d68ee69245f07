//! Payload and tag manifests: `manifest-<alg>.txt` / `tagmanifest-<alg>.txt`.
//!
//! Both variants share parsing, digest computation, and serialization; they
//! differ only in which files they enumerate, which the engine decides.

use crate::algorithm::Algorithm;
use crate::checksum::{compute_checksum_file, Checksum, ChecksumComputeError};
use crate::error::Issue;
use crate::paths;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ManifestKind {
    Payload,
    Tag,
}

impl ManifestKind {
    pub(crate) fn prefix(&self) -> &'static str {
        match self {
            ManifestKind::Payload => "manifest-",
            ManifestKind::Tag => "tagmanifest-",
        }
    }
}

#[derive(Debug)]
pub struct Manifest {
    algorithm: Algorithm,
    kind: ManifestKind,
    entries: BTreeMap<String, Checksum<'static>>,
}

impl Manifest {
    pub fn new(algorithm: Algorithm, kind: ManifestKind) -> Self {
        Self {
            algorithm,
            kind,
            entries: BTreeMap::new(),
        }
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn kind(&self) -> ManifestKind {
        self.kind
    }

    /// Name of this manifest on disk, e.g. `manifest-sha3-256.txt`.
    pub fn file_name(&self) -> String {
        format!("{}{}.txt", self.kind.prefix(), self.algorithm.name())
    }

    /// Recognize a manifest file name. The tag prefix is checked first
    /// since every `tagmanifest-` name ends in `.txt` too.
    pub(crate) fn parse_file_name(name: &str) -> Option<(ManifestKind, &str)> {
        let stem = name.strip_suffix(".txt")?;

        if let Some(label) = stem.strip_prefix(ManifestKind::Tag.prefix()) {
            return Some((ManifestKind::Tag, label));
        }
        stem.strip_prefix(ManifestKind::Payload.prefix())
            .map(|label| (ManifestKind::Payload, label))
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn checksum(&self, path: &str) -> Option<&Checksum<'static>> {
        self.entries.get(path)
    }

    /// Listed paths in sorted order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parse manifest content. Malformed lines become issues against this
    /// manifest's file name; well-formed lines are still collected.
    pub(crate) fn parse(
        content: &str,
        algorithm: Algorithm,
        kind: ManifestKind,
    ) -> (Self, Vec<Issue>) {
        let mut manifest = Self::new(algorithm, kind);
        let mut issues = Vec::new();
        let file_name = manifest.file_name();

        for (number, line) in content.lines().enumerate() {
            let number = number + 1;

            if line.trim().is_empty() {
                continue;
            }

            let Some((digest, rest)) = line.split_once([' ', '\t']) else {
                issues.push(Issue::new(
                    &file_name,
                    format!("line {number}: expected `<digest> <path>`"),
                ));
                continue;
            };

            if digest.len() != algorithm.hex_len()
                || !digest.chars().all(|c| c.is_ascii_hexdigit())
            {
                issues.push(Issue::new(
                    &file_name,
                    format!(
                        "line {number}: `{digest}` is not a {} digest",
                        algorithm.name()
                    ),
                ));
                continue;
            }

            let path = paths::decode_manifest_path(rest.trim_start());
            if path.is_empty() {
                issues.push(Issue::new(&file_name, format!("line {number}: missing path")));
                continue;
            }

            if manifest.entries.contains_key(&path) {
                issues.push(Issue::new(
                    &file_name,
                    format!("line {number}: duplicate path `{path}`"),
                ));
                continue;
            }

            manifest.entries.insert(path, Checksum::parse(digest));
        }

        (manifest, issues)
    }

    /// Recompute every digest from the given root-relative files,
    /// replacing current entries.
    pub(crate) async fn compute(
        &mut self,
        root: &Path,
        files: &[String],
    ) -> Result<(), ChecksumComputeError> {
        let mut entries = BTreeMap::new();

        for file in files {
            let checksum = compute_checksum_file(root.join(file), self.algorithm).await?;
            entries.insert(file.clone(), checksum);
        }

        self.entries = entries;
        Ok(())
    }

    /// Cross-check listed entries against the files actually present,
    /// appending one issue per missing file, extra file, or digest
    /// mismatch.
    pub(crate) async fn validate(
        &self,
        root: &Path,
        present: &[String],
        errors: &mut Vec<Issue>,
    ) {
        let file_name = self.file_name();
        let present: BTreeSet<&str> = present.iter().map(String::as_str).collect();

        for (path, expected) in &self.entries {
            if !present.contains(path.as_str()) {
                errors.push(Issue::new(
                    path,
                    format!("listed in {file_name} but missing on disk"),
                ));
                continue;
            }

            match compute_checksum_file(root.join(path), self.algorithm).await {
                Ok(actual) if &actual == expected => {}
                Ok(actual) => errors.push(Issue::new(
                    path,
                    format!(
                        "{} digest mismatch: expected {expected}, found {actual}",
                        self.algorithm.name()
                    ),
                )),
                Err(error) => errors.push(Issue::new(path, error.to_string())),
            }
        }

        for path in present {
            if !self.entries.contains_key(path) {
                errors.push(Issue::new(
                    path,
                    format!("present on disk but not listed in {file_name}"),
                ));
            }
        }
    }

    /// Render entries sorted by path, one space between digest and path,
    /// LF line endings.
    pub(crate) fn serialize(&self) -> String {
        self.entries
            .iter()
            .map(|(path, checksum)| {
                format!("{checksum} {}\n", paths::encode_manifest_path(path))
            })
            .collect()
    }
}
