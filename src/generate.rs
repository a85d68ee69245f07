//! Creating bags and flushing in-memory state to disk.

use crate::declaration::{Declaration, BAGIT_TXT};
use crate::error::{BagError, Issue};
use crate::fetch::{FetchEntry, FetchList, FETCH_TXT};
use crate::manifest::{Manifest, ManifestKind};
use crate::metadata::{PayloadOxum, BAG_INFO_TXT};
use crate::paths;
use crate::{Bag, DEFAULT_ALGORITHM};
use std::path::Path;
use tokio::fs;
use tracing::debug;

impl Bag {
    /// Start a bag at `root`, which must not exist yet or be an empty
    /// directory. The payload directory is materialized right away and a
    /// payload manifest for [`DEFAULT_ALGORITHM`] installed; nothing else
    /// reaches disk before [`Bag::update`].
    pub async fn create(root: impl AsRef<Path>) -> Result<Bag, BagError> {
        let root = root.as_ref();

        if root.exists() {
            if !root.is_dir() {
                return Err(BagError::Conflict(format!(
                    "`{}` exists and is not a directory",
                    root.display()
                )));
            }

            let mut entries = fs::read_dir(root)
                .await
                .map_err(|error| BagError::io(root, error))?;
            if entries
                .next_entry()
                .await
                .map_err(|error| BagError::io(root, error))?
                .is_some()
            {
                return Err(BagError::Conflict(format!(
                    "`{}` is not empty",
                    root.display()
                )));
            }
        }

        fs::create_dir_all(root.join("data"))
            .await
            .map_err(|error| BagError::io(root, error))?;
        let root = std::path::absolute(root).map_err(|error| BagError::io(root, error))?;

        debug!(root = %root.display(), "created bag skeleton");

        let mut bag = Bag::empty(root);
        bag.payload_manifests.insert(
            DEFAULT_ALGORITHM,
            Manifest::new(DEFAULT_ALGORITHM, ManifestKind::Payload),
        );
        bag.dirty = true;
        Ok(bag)
    }

    /// Copy `src` into the payload at `dest` (payload-relative; a `data/`
    /// prefix is added when missing). Digests are deferred to
    /// [`Bag::update`].
    pub async fn add_file(&mut self, src: impl AsRef<Path>, dest: &str) -> Result<(), BagError> {
        let src = src.as_ref();

        if !src.is_file() {
            return Err(BagError::NotFound(src.display().to_string()));
        }

        let rel = paths::payload_relative(dest).ok_or_else(|| {
            BagError::Conflict(format!("destination `{dest}` is outside the payload"))
        })?;

        if paths::reserved_name(&rel) {
            return Err(BagError::Policy(format!(
                "`{dest}` is a reserved device name on Windows"
            )));
        }
        if paths::has_windows_illegal_characters(&rel) {
            self.warnings.push(Issue::new(
                &rel,
                "name contains characters illegal on Windows",
            ));
        }

        let destination = paths::make_absolute(&self.root, &rel);
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|error| BagError::io(parent, error))?;
        }
        fs::copy(src, &destination)
            .await
            .map_err(|error| BagError::io(&destination, error))?;

        debug!(src = %src.display(), dest = %rel, "added payload file");
        self.dirty = true;
        Ok(())
    }

    /// Delete a payload file and prune any directories left empty, up to
    /// but not including `data/`.
    pub async fn remove_file(&mut self, dest: &str) -> Result<(), BagError> {
        let rel = paths::payload_relative(dest).ok_or_else(|| {
            BagError::Conflict(format!("destination `{dest}` is outside the payload"))
        })?;

        let target = paths::make_absolute(&self.root, &rel);
        if !target.is_file() {
            return Err(BagError::NotFound(rel));
        }

        fs::remove_file(&target)
            .await
            .map_err(|error| BagError::io(&target, error))?;
        prune_empty_parents(&self.root, &rel)
            .await
            .map_err(|error| BagError::io(&self.root, error))?;

        debug!(dest = %rel, "removed payload file");
        self.dirty = true;
        Ok(())
    }

    /// Record a fetch entry and materialize it immediately, so the next
    /// [`Bag::update`] digests its bytes.
    pub async fn add_fetch(
        &mut self,
        url: &str,
        dest: &str,
        size: Option<u64>,
    ) -> Result<(), BagError> {
        let path = FetchList::check_entry(url, dest)?;

        let entry = FetchEntry {
            url: url.to_string(),
            size,
            path: path.clone(),
        };
        FetchList::materialize(&self.root, self.downloader.as_ref(), &entry).await?;

        debug!(url, dest = %path, "materialized fetch entry");
        self.fetch.push(entry);
        self.fetch.mark_materialized(&path);
        self.dirty = true;
        Ok(())
    }

    /// Flush all in-memory state, regenerating manifests, `bag-info.txt`
    /// and `fetch.txt` so the on-disk bag is internally consistent.
    ///
    /// Writes happen in a fixed order: payload directory, `bagit.txt`,
    /// payload manifests, `fetch.txt`, then — for extended bags —
    /// `bag-info.txt` and the tag manifests (which therefore digest the
    /// freshly written tag files). Tag manifests go out in ascending
    /// algorithm order, each listing the sibling manifests already written
    /// in final form. Turning `extended` off deletes `bag-info.txt` and
    /// every `tagmanifest-*.txt` instead.
    pub async fn update(&mut self) -> Result<(), BagError> {
        if self.payload_manifests.is_empty() {
            return Err(BagError::Policy(
                "bag has no payload manifest algorithm".to_string(),
            ));
        }

        let data_dir = self.root.join("data");
        fs::create_dir_all(&data_dir)
            .await
            .map_err(|error| BagError::io(&data_dir, error))?;

        self.write_tag_file(BAGIT_TXT, Declaration::render(self.version, &self.encoding).into_bytes())
            .await?;

        let payload_files = paths::walk_files(&self.root, &data_dir)
            .await
            .map_err(|error| BagError::io(&data_dir, error))?;

        for manifest in self.payload_manifests.values_mut() {
            manifest.compute(&self.root, &payload_files).await?;
            let rendered = manifest.serialize().into_bytes();
            let path = self.root.join(manifest.file_name());
            fs::write(&path, rendered)
                .await
                .map_err(|error| BagError::io(&path, error))?;
        }
        self.remove_stale_manifests(ManifestKind::Payload).await?;

        if self.fetch.is_empty() {
            remove_if_exists(&self.root.join(FETCH_TXT)).await?;
        } else {
            let rendered = self
                .encoding
                .encode(&self.fetch.serialize())
                .map_err(|error| BagError::Unsupported(error.to_string()))?;
            self.write_tag_file(FETCH_TXT, rendered).await?;
        }

        if self.extended {
            let oxum = payload_oxum(&self.root, &payload_files)
                .await
                .map_err(|error| BagError::io(&data_dir, error))?;
            let rendered = self
                .encoding
                .encode(&self.info.serialize(oxum, self.clock.today()))
                .map_err(|error| BagError::Unsupported(error.to_string()))?;
            self.write_tag_file(BAG_INFO_TXT, rendered).await?;

            self.sync_tag_manifests();
            let base_tag_files = self.tag_file_set().await?;

            // fixed algorithm order; every tag manifest also lists the
            // sibling manifests finalized before it, never itself or the
            // ones whose bytes are not final yet
            let mut finalized: Vec<String> = Vec::new();
            for manifest in self.tag_manifests.values_mut() {
                let mut files = base_tag_files.clone();
                files.extend(finalized.iter().cloned());

                manifest.compute(&self.root, &files).await?;
                let rendered = manifest.serialize().into_bytes();
                let path = self.root.join(manifest.file_name());
                fs::write(&path, rendered)
                    .await
                    .map_err(|error| BagError::io(&path, error))?;
                finalized.push(manifest.file_name());
            }
        } else {
            remove_if_exists(&self.root.join(BAG_INFO_TXT)).await?;
        }
        // with `extended` off the tag-manifest set is empty, so this
        // clears every tagmanifest file
        self.remove_stale_manifests(ManifestKind::Tag).await?;

        debug!(root = %self.root.display(), extended = self.extended, "updated bag");
        self.dirty = false;
        Ok(())
    }

    /// Remove the files that were materialized from fetch entries; they
    /// are not part of the committed payload once the bag is packaged.
    pub async fn finalize(&mut self) -> Result<(), BagError> {
        for path in self.fetch.take_materialized() {
            let absolute = self.root.join(&path);

            match fs::remove_file(&absolute).await {
                Ok(()) => {}
                Err(error) if error.kind() == std::io::ErrorKind::NotFound => continue,
                Err(error) => return Err(BagError::io(&absolute, error)),
            }
            prune_empty_parents(&self.root, &path)
                .await
                .map_err(|error| BagError::io(&self.root, error))?;

            debug!(dest = %path, "released fetched file");
        }

        Ok(())
    }

    async fn write_tag_file(&self, name: &str, bytes: Vec<u8>) -> Result<(), BagError> {
        let path = self.root.join(name);
        fs::write(&path, bytes)
            .await
            .map_err(|error| BagError::io(&path, error))
    }

    /// The base files every tag manifest covers: the bag root tree minus
    /// the payload and minus `tagmanifest-*.txt` files. Callers append the
    /// sibling tag manifests per manifest, following the fixed write
    /// order: each tag manifest also lists the ones finalized before it.
    pub(crate) async fn tag_file_set(&self) -> Result<Vec<String>, BagError> {
        let files = paths::walk_files(&self.root, &self.root)
            .await
            .map_err(|error| BagError::io(&self.root, error))?;

        Ok(files
            .into_iter()
            .filter(|path| {
                !path.starts_with("data/")
                    && !matches!(
                        Manifest::parse_file_name(path),
                        Some((ManifestKind::Tag, _))
                    )
            })
            .collect())
    }

    /// Delete manifest files of `kind` whose algorithm is no longer
    /// configured.
    async fn remove_stale_manifests(&self, kind: ManifestKind) -> Result<(), BagError> {
        let keep: Vec<String> = match kind {
            ManifestKind::Payload => self.payload_manifests.values(),
            ManifestKind::Tag => self.tag_manifests.values(),
        }
        .map(Manifest::file_name)
        .collect();

        let mut entries = fs::read_dir(&self.root)
            .await
            .map_err(|error| BagError::io(&self.root, error))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|error| BagError::io(&self.root, error))?
        {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };

            let matches_kind =
                matches!(Manifest::parse_file_name(name), Some((k, _)) if k == kind);
            if path.is_file() && matches_kind && !keep.iter().any(|file| file == name) {
                fs::remove_file(&path)
                    .await
                    .map_err(|error| BagError::io(&path, error))?;
                debug!(file = name, "removed stale manifest");
            }
        }

        Ok(())
    }
}

async fn remove_if_exists(path: &Path) -> Result<(), BagError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(error) => Err(BagError::io(path, error)),
    }
}

/// Total octets and file count of the payload on disk.
pub(crate) async fn payload_oxum(
    root: &Path,
    files: &[String],
) -> Result<PayloadOxum, std::io::Error> {
    let mut octets = 0;

    for file in files {
        octets += fs::metadata(root.join(file)).await?.len();
    }

    Ok(PayloadOxum {
        octets,
        files: files.len() as u64,
    })
}

/// Walk up from `rel`'s parent, removing directories as long as they are
/// empty, stopping at the payload root.
async fn prune_empty_parents(root: &Path, rel: &str) -> Result<(), std::io::Error> {
    let mut parent = Path::new(rel).parent();

    while let Some(dir) = parent {
        let name = dir.to_string_lossy();
        if name.is_empty() || name == "data" {
            break;
        }

        let absolute = root.join(dir);
        let mut entries = fs::read_dir(&absolute).await?;
        if entries.next_entry().await?.is_some() {
            break;
        }

        fs::remove_dir(&absolute).await?;
        parent = dir.parent();
    }

    Ok(())
}
