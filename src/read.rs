//! Opening an existing bag from disk.

use crate::declaration::{Declaration, DeclarationError, BAGIT_TXT};
use crate::encoding::EncodingError;
use crate::error::{BagError, Issue};
use crate::fetch::{FetchList, FETCH_TXT};
use crate::manifest::{Manifest, ManifestKind};
use crate::metadata::{BagInfo, BAG_INFO_TXT};
use crate::{Algorithm, Bag};
use std::path::Path;
use tokio::fs;
use tracing::debug;

impl Bag {
    /// Open the bag rooted at `root`.
    ///
    /// Hard failures (no directory, no parseable `bagit.txt`) are
    /// returned; everything else — malformed manifests, bag-info
    /// problems, fetch problems — accumulates in [`Bag::errors`] and
    /// [`Bag::warnings`] for [`Bag::validate`] to pick up.
    pub async fn load(root: impl AsRef<Path>) -> Result<Bag, BagError> {
        let root = root.as_ref();

        if !root.is_dir() {
            return Err(BagError::NotFound(root.display().to_string()));
        }
        let root = std::path::absolute(root).map_err(|error| BagError::io(root, error))?;

        let mut bag = Bag::empty(root);
        bag.read_from_disk().await?;
        bag.loaded = true;

        debug!(
            root = %bag.root.display(),
            algorithms = bag.payload_manifests.len(),
            errors = bag.errors.len(),
            "loaded bag"
        );
        Ok(bag)
    }

    /// Re-read every artifact from disk, keeping the injected
    /// collaborators and the record of materialized fetch files.
    pub(crate) async fn reload(&mut self) -> Result<(), BagError> {
        self.read_from_disk().await
    }

    async fn read_from_disk(&mut self) -> Result<(), BagError> {
        let carried = self.fetch.take_materialized();

        self.payload_manifests.clear();
        self.tag_manifests.clear();
        self.info = BagInfo::default();
        self.fetch = FetchList::default();
        self.errors.clear();
        self.warnings.clear();
        self.extended = false;

        for path in carried {
            self.fetch.mark_materialized(&path);
        }

        self.read_declaration().await?;
        self.read_manifests().await?;
        self.read_bag_info().await?;
        self.read_fetch().await?;

        if self.payload_manifests.is_empty() {
            self.errors.push(Issue::new(
                self.root.display().to_string(),
                "bag has no payload manifest",
            ));
        }

        self.dirty = false;
        Ok(())
    }

    async fn read_declaration(&mut self) -> Result<(), BagError> {
        let path = self.root.join(BAGIT_TXT);

        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Err(BagError::NotFound(format!(
                    "`{BAGIT_TXT}` in {}",
                    self.root.display()
                )))
            }
            Err(error) => return Err(BagError::io(&path, error)),
        };

        let declaration = Declaration::parse(&bytes).map_err(|error| match error {
            DeclarationError::Encoding(EncodingError::UnknownLabel(label)) => {
                BagError::Unsupported(format!("character encoding label `{label}`"))
            }
            other => BagError::parse(BAGIT_TXT, other),
        })?;

        self.version = declaration.version;
        self.encoding = declaration.encoding;
        Ok(())
    }

    /// Discover `manifest-*.txt` / `tagmanifest-*.txt` at the bag root
    /// and parse each one.
    async fn read_manifests(&mut self) -> Result<(), BagError> {
        let mut entries = fs::read_dir(&self.root)
            .await
            .map_err(|error| BagError::io(&self.root, error))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|error| BagError::io(&self.root, error))?
        {
            let path = entry.path();

            if !path.is_file() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            let Some((kind, label)) = Manifest::parse_file_name(name) else {
                continue;
            };

            let algorithm = match label.parse::<Algorithm>() {
                Ok(algorithm) => algorithm,
                Err(error) => {
                    self.errors.push(Issue::new(name, error.to_string()));
                    continue;
                }
            };

            let bytes = fs::read(&path)
                .await
                .map_err(|error| BagError::io(&path, error))?;
            let content = match String::from_utf8(bytes) {
                Ok(content) => content,
                Err(_) => {
                    self.errors.push(Issue::new(name, "manifest is not valid UTF-8"));
                    continue;
                }
            };

            let (manifest, issues) = Manifest::parse(&content, algorithm, kind);
            self.errors.extend(issues);

            match kind {
                ManifestKind::Payload => self.payload_manifests.insert(algorithm, manifest),
                ManifestKind::Tag => self.tag_manifests.insert(algorithm, manifest),
            };
        }

        Ok(())
    }

    async fn read_bag_info(&mut self) -> Result<(), BagError> {
        let path = self.root.join(BAG_INFO_TXT);

        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                self.extended = !self.tag_manifests.is_empty();
                return Ok(());
            }
            Err(error) => return Err(BagError::io(&path, error)),
        };
        self.extended = true;

        match self.encoding.decode(&bytes) {
            Ok(content) => {
                let (info, errors, warnings) = BagInfo::parse(&content, self.version);
                self.info = info;
                self.errors.extend(errors);
                self.warnings.extend(warnings);
            }
            Err(error) => self.errors.push(Issue::new(BAG_INFO_TXT, error.to_string())),
        }

        Ok(())
    }

    async fn read_fetch(&mut self) -> Result<(), BagError> {
        let path = self.root.join(FETCH_TXT);

        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(error) => return Err(BagError::io(&path, error)),
        };

        match self.encoding.decode(&bytes) {
            Ok(content) => {
                let (list, issues) = FetchList::parse(&content);
                for entry in list.entries() {
                    self.fetch.push(entry.clone());
                }
                self.errors.extend(issues);
            }
            Err(error) => self.errors.push(Issue::new(FETCH_TXT, error.to_string())),
        }

        Ok(())
    }
}
