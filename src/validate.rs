//! Whole-bag validation: freshness, fetch materialization, manifest
//! cross-checks.

use crate::error::Issue;
use crate::fetch::{FetchEntry, FetchList, FETCH_TXT};
use crate::generate::payload_oxum;
use crate::metadata::{PayloadOxum, BAG_INFO_TXT, KEY_OXUM};
use crate::paths;
use crate::{Bag, BagError};
use tracing::{debug, warn};

impl Bag {
    /// Check the bag on disk against its manifests.
    ///
    /// A dirty bag is flushed with [`Bag::update`] first; either way the
    /// on-disk state is re-read so stale in-memory views cannot mask
    /// problems. Fetch entries missing from the payload are materialized
    /// before any digest is computed. Findings accumulate in
    /// [`Bag::errors`] and [`Bag::warnings`]; the result is `Ok(true)`
    /// exactly when no errors remain.
    pub async fn validate(&mut self) -> Result<bool, BagError> {
        if self.dirty {
            self.update().await?;
        }
        self.reload().await?;

        self.materialize_missing_fetches().await;

        let data_dir = self.root.join("data");
        let payload_files = match paths::walk_files(&self.root, &data_dir).await {
            Ok(files) => files,
            Err(error) => {
                self.errors
                    .push(Issue::new("data", format!("cannot walk payload: {error}")));
                Vec::new()
            }
        };

        self.check_oxum(&payload_files).await;

        let mut findings = Vec::new();
        for manifest in self.payload_manifests.values() {
            manifest
                .validate(&self.root, &payload_files, &mut findings)
                .await;
        }

        if !self.tag_manifests.is_empty() {
            match self.tag_file_set().await {
                Ok(base_tag_files) => {
                    // mirror the write order: each tag manifest also
                    // covers the sibling manifests finalized before it
                    let mut earlier: Vec<String> = Vec::new();
                    for manifest in self.tag_manifests.values() {
                        let mut scope = base_tag_files.clone();
                        scope.extend(
                            earlier
                                .iter()
                                .filter(|name| self.root.join(name).is_file())
                                .cloned(),
                        );

                        manifest.validate(&self.root, &scope, &mut findings).await;
                        earlier.push(manifest.file_name());
                    }
                }
                Err(error) => findings.push(Issue::new(
                    self.root.display().to_string(),
                    format!("cannot walk tag files: {error}"),
                )),
            }
        }
        self.errors.extend(findings);

        if self.errors.is_empty() {
            debug!(root = %self.root.display(), "bag is valid");
        } else {
            warn!(
                root = %self.root.display(),
                errors = self.errors.len(),
                warnings = self.warnings.len(),
                "bag failed validation"
            );
        }
        Ok(self.errors.is_empty())
    }

    /// Download every fetch entry whose destination is not on disk.
    /// Failures accumulate; validation proceeds so all other findings
    /// still surface.
    async fn materialize_missing_fetches(&mut self) {
        let entries: Vec<FetchEntry> = self.fetch.entries().cloned().collect();

        for entry in entries {
            if self.root.join(&entry.path).is_file() {
                continue;
            }

            match FetchList::materialize(&self.root, self.downloader.as_ref(), &entry).await {
                Ok(()) => self.fetch.mark_materialized(&entry.path),
                Err(error) => self.errors.push(Issue::new(FETCH_TXT, error.to_string())),
            }
        }
    }

    /// A declared `Payload-Oxum` that disagrees with the payload is worth
    /// flagging, but the manifests are the authority; keep it a warning so
    /// each broken file surfaces exactly once, as an error.
    async fn check_oxum(&mut self, payload_files: &[String]) {
        let declared = match self.info.get_all(KEY_OXUM).into_iter().next() {
            Some(declared) => declared.to_string(),
            None => return,
        };

        match declared.parse::<PayloadOxum>() {
            Ok(declared) => match payload_oxum(&self.root, payload_files).await {
                Ok(actual) if actual != declared => self.warnings.push(Issue::new(
                    BAG_INFO_TXT,
                    format!("Payload-Oxum {declared} does not match the payload ({actual})"),
                )),
                Ok(_) => {}
                Err(error) => self
                    .warnings
                    .push(Issue::new(BAG_INFO_TXT, format!("cannot size payload: {error}"))),
            },
            Err(()) => self.warnings.push(Issue::new(
                BAG_INFO_TXT,
                format!("malformed Payload-Oxum `{declared}`"),
            )),
        }
    }
}
