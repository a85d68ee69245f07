//! Build, read, mutate and validate BagIt (RFC 8493) directories.
//!
//! A [`Bag`] is an in-memory view of an on-disk bag: the `bagit.txt`
//! declaration, one payload manifest per checksum algorithm, optional tag
//! manifests and `bag-info.txt` (extended bags), and an optional
//! `fetch.txt`. Mutations only touch memory until [`Bag::update`] flushes
//! them; [`Bag::validate`] cross-checks every manifest against the files
//! actually present.
//!
//! ```no_run
//! use bagkit::{Algorithm, Bag};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), bagkit::BagError> {
//!     let mut bag = Bag::create("/tmp/my-bag").await?;
//!     bag.add_file("/tmp/sources/report.pdf", "report.pdf").await?;
//!     bag.set_extended(true);
//!     bag.set_bag_info_tag("Source-Organization", "ACME")?;
//!     bag.update().await?;
//!
//!     let mut reopened = Bag::load("/tmp/my-bag").await?;
//!     assert!(reopened.validate().await?);
//!     Ok(())
//! }
//! ```

mod algorithm;
mod checksum;
mod declaration;
mod encoding;
mod error;
mod fetch;
mod generate;
mod manifest;
mod metadata;
mod paths;
mod read;
mod validate;

pub use algorithm::{Algorithm, UnsupportedAlgorithm};
pub use checksum::{Checksum, ChecksumComputeError};
pub use declaration::{DeclarationError, Version, KEY_ENCODING, KEY_VERSION};
pub use encoding::{EncodingError, TagEncoding};
pub use error::{BagError, Issue};
pub use fetch::{DownloadError, Downloader, FetchEntry, FetchList, NoDownloader};
pub use manifest::{Manifest, ManifestKind};
pub use metadata::{
    BagInfo, Clock, GeneratedTag, PayloadOxum, SystemClock, TagEntry, KEY_DATE, KEY_OXUM,
};

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Algorithm installed by [`Bag::create`] until callers pick their own.
pub const DEFAULT_ALGORITHM: Algorithm = Algorithm::Sha512;

/// An in-memory bag over a root directory.
///
/// The engine owns every component exclusively; manifests and the fetch
/// list receive the root path and encoding as call parameters instead of
/// holding back-references. Not safe for concurrent mutation, and two
/// `Bag` values over the same directory are the caller's problem.
pub struct Bag {
    root: PathBuf,
    version: Version,
    encoding: TagEncoding,
    extended: bool,
    payload_manifests: BTreeMap<Algorithm, Manifest>,
    tag_manifests: BTreeMap<Algorithm, Manifest>,
    info: BagInfo,
    fetch: FetchList,
    errors: Vec<Issue>,
    warnings: Vec<Issue>,
    dirty: bool,
    loaded: bool,
    downloader: Box<dyn Downloader>,
    clock: Box<dyn Clock>,
}

impl std::fmt::Debug for Bag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bag")
            .field("root", &self.root)
            .field("version", &self.version)
            .field("encoding", &self.encoding.label())
            .field("extended", &self.extended)
            .field("algorithms", &self.algorithms())
            .field("dirty", &self.dirty)
            .field("loaded", &self.loaded)
            .finish_non_exhaustive()
    }
}

impl Bag {
    pub(crate) fn empty(root: PathBuf) -> Self {
        Self {
            root,
            version: Version::default(),
            encoding: TagEncoding::default(),
            extended: false,
            payload_manifests: BTreeMap::new(),
            tag_manifests: BTreeMap::new(),
            info: BagInfo::default(),
            fetch: FetchList::default(),
            errors: Vec::new(),
            warnings: Vec::new(),
            dirty: false,
            loaded: false,
            downloader: Box::new(NoDownloader),
            clock: Box::new(SystemClock),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn file_encoding(&self) -> &TagEncoding {
        &self.encoding
    }

    /// Whether the bag persists `bag-info.txt` and tag manifests.
    pub fn is_extended(&self) -> bool {
        self.extended
    }

    /// Whether there are in-memory changes not yet flushed by
    /// [`Bag::update`].
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// `true` when this value came from [`Bag::load`] rather than
    /// [`Bag::create`].
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Findings from the most recent load or validation.
    pub fn errors(&self) -> &[Issue] {
        &self.errors
    }

    pub fn warnings(&self) -> &[Issue] {
        &self.warnings
    }

    pub fn info(&self) -> &BagInfo {
        &self.info
    }

    pub fn fetch_list(&self) -> &FetchList {
        &self.fetch
    }

    /// Algorithms with a payload manifest, sorted.
    pub fn algorithms(&self) -> Vec<Algorithm> {
        self.payload_manifests.keys().copied().collect()
    }

    pub fn payload_manifest(&self, algorithm: Algorithm) -> Option<&Manifest> {
        self.payload_manifests.get(&algorithm)
    }

    pub fn tag_manifest(&self, algorithm: Algorithm) -> Option<&Manifest> {
        self.tag_manifests.get(&algorithm)
    }

    /// Payload-relative paths currently expected: the union of the paths
    /// listed across all payload manifests.
    pub fn payload_files(&self) -> BTreeSet<String> {
        self.payload_manifests
            .values()
            .flat_map(|manifest| manifest.paths().map(str::to_string))
            .collect()
    }

    /// Swap in a downloader for fetch materialization.
    pub fn set_downloader(&mut self, downloader: Box<dyn Downloader>) {
        self.downloader = downloader;
    }

    /// Swap in a clock for `Bagging-Date` stamping.
    pub fn set_clock(&mut self, clock: Box<dyn Clock>) {
        self.clock = clock;
    }

    pub fn set_version(&mut self, version: Version) {
        self.version = version;
        self.dirty = true;
    }

    /// Declare a different tag-file encoding for `bag-info.txt` and
    /// `fetch.txt`.
    pub fn set_file_encoding(&mut self, label: &str) -> Result<(), BagError> {
        self.encoding = TagEncoding::for_label(label)
            .map_err(|error| BagError::Unsupported(error.to_string()))?;
        self.dirty = true;
        Ok(())
    }

    /// Turn the extended layout on or off. Off deletes `bag-info.txt` and
    /// every tag manifest at the next [`Bag::update`].
    pub fn set_extended(&mut self, extended: bool) {
        self.extended = extended;

        if extended {
            self.sync_tag_manifests();
        } else {
            self.tag_manifests.clear();
        }
        self.dirty = true;
    }

    /// Add a manifest algorithm next to the existing ones.
    pub fn add_algorithm(&mut self, name: &str) -> Result<(), BagError> {
        let algorithm: Algorithm = name.parse()?;

        if self.payload_manifests.contains_key(&algorithm) {
            return Err(BagError::Conflict(format!(
                "a manifest for `{algorithm}` is already present"
            )));
        }

        self.payload_manifests
            .insert(algorithm, Manifest::new(algorithm, ManifestKind::Payload));
        self.sync_tag_manifests();
        self.dirty = true;
        Ok(())
    }

    /// Drop a manifest algorithm; the last one cannot go away.
    pub fn remove_algorithm(&mut self, name: &str) -> Result<(), BagError> {
        let algorithm: Algorithm = name.parse()?;

        if !self.payload_manifests.contains_key(&algorithm) {
            return Err(BagError::NotFound(format!("no manifest for `{algorithm}`")));
        }
        if self.payload_manifests.len() == 1 {
            return Err(BagError::Policy(
                "cannot remove the last manifest algorithm".to_string(),
            ));
        }

        self.payload_manifests.remove(&algorithm);
        self.tag_manifests.remove(&algorithm);
        self.dirty = true;
        Ok(())
    }

    /// Replace every manifest algorithm with the one requested.
    pub fn set_algorithm(&mut self, name: &str) -> Result<(), BagError> {
        let algorithm: Algorithm = name.parse()?;

        self.payload_manifests = BTreeMap::from([(
            algorithm,
            Manifest::new(algorithm, ManifestKind::Payload),
        )]);
        self.tag_manifests.clear();
        self.sync_tag_manifests();
        self.dirty = true;
        Ok(())
    }

    /// Append a bag-info value. Generated tags (`Payload-Oxum`,
    /// `Bagging-Date`) are refused.
    pub fn set_bag_info_tag(&mut self, tag: &str, value: &str) -> Result<(), BagError> {
        self.info.set(tag, value)?;
        self.dirty = true;
        Ok(())
    }

    /// Remove every value of a bag-info tag; returns how many went away.
    pub fn remove_bag_info_tag(&mut self, tag: &str) -> usize {
        let removed = self.info.remove_all(tag);
        if removed > 0 {
            self.dirty = true;
        }
        removed
    }

    /// Remove the `position`-th value of a bag-info tag.
    pub fn remove_bag_info_tag_index(
        &mut self,
        tag: &str,
        position: usize,
    ) -> Result<(), BagError> {
        if !self.info.remove_at(tag, position) {
            return Err(BagError::NotFound(format!(
                "bag-info tag `{tag}` has no value at index {position}"
            )));
        }

        self.dirty = true;
        Ok(())
    }

    pub fn get_bag_info_by_tag(&self, tag: &str) -> Vec<&str> {
        self.info.get_all(tag)
    }

    pub fn has_bag_info_tag(&self, tag: &str) -> bool {
        self.info.has(tag)
    }

    /// Keep the tag-manifest set mirroring the payload algorithms while
    /// the bag is extended.
    fn sync_tag_manifests(&mut self) {
        if !self.extended {
            return;
        }

        let algorithms: Vec<Algorithm> = self.payload_manifests.keys().copied().collect();
        self.tag_manifests
            .retain(|algorithm, _| algorithms.contains(algorithm));

        for algorithm in algorithms {
            self.tag_manifests
                .entry(algorithm)
                .or_insert_with(|| Manifest::new(algorithm, ManifestKind::Tag));
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn algorithm_set_management() {
        let mut bag = Bag::empty(PathBuf::from("/tmp/bag"));
        bag.payload_manifests.insert(
            DEFAULT_ALGORITHM,
            Manifest::new(DEFAULT_ALGORITHM, ManifestKind::Payload),
        );

        assert_eq!(
            bag.remove_algorithm("sha512"),
            Err(BagError::Policy(
                "cannot remove the last manifest algorithm".to_string()
            ))
        );

        bag.add_algorithm("md5").unwrap();
        assert_eq!(bag.algorithms(), vec![Algorithm::Md5, Algorithm::Sha512]);
        assert!(matches!(
            bag.add_algorithm("md5"),
            Err(BagError::Conflict(_))
        ));
        assert!(matches!(
            bag.add_algorithm("whirlpool"),
            Err(BagError::Unsupported(_))
        ));

        bag.remove_algorithm("sha512").unwrap();
        assert_eq!(bag.algorithms(), vec![Algorithm::Md5]);

        bag.set_algorithm("sha3-256").unwrap();
        assert_eq!(bag.algorithms(), vec![Algorithm::Sha3_256]);
    }

    #[test]
    fn extended_mirrors_tag_manifests() {
        let mut bag = Bag::empty(PathBuf::from("/tmp/bag"));
        bag.payload_manifests.insert(
            DEFAULT_ALGORITHM,
            Manifest::new(DEFAULT_ALGORITHM, ManifestKind::Payload),
        );

        assert!(bag.tag_manifest(DEFAULT_ALGORITHM).is_none());

        bag.set_extended(true);
        assert!(bag.tag_manifest(DEFAULT_ALGORITHM).is_some());

        bag.add_algorithm("md5").unwrap();
        assert!(bag.tag_manifest(Algorithm::Md5).is_some());

        bag.set_extended(false);
        assert!(bag.tag_manifest(DEFAULT_ALGORITHM).is_none());
        assert!(bag.is_dirty());
    }

    #[test]
    fn bag_info_passthrough() {
        let mut bag = Bag::empty(PathBuf::from("/tmp/bag"));

        assert_eq!(
            bag.set_bag_info_tag("Payload-Oxum", "1.1"),
            Err(BagError::Policy(
                "`Payload-Oxum` is regenerated on update and cannot be set".to_string()
            ))
        );

        bag.set_bag_info_tag("Contact-Name", "Jo").unwrap();
        bag.set_bag_info_tag("Contact-Name", "Sam").unwrap();
        assert!(bag.has_bag_info_tag("contact-name"));
        assert_eq!(bag.get_bag_info_by_tag("CONTACT-NAME"), vec!["Jo", "Sam"]);

        bag.remove_bag_info_tag_index("Contact-Name", 0).unwrap();
        assert_eq!(bag.get_bag_info_by_tag("contact-name"), vec!["Sam"]);
        assert!(matches!(
            bag.remove_bag_info_tag_index("Contact-Name", 4),
            Err(BagError::NotFound(_))
        ));

        assert_eq!(bag.remove_bag_info_tag("contact-name"), 1);
        assert!(!bag.has_bag_info_tag("Contact-Name"));
    }

    #[test]
    fn encoding_setter() {
        let mut bag = Bag::empty(PathBuf::from("/tmp/bag"));

        bag.set_file_encoding("ISO-8859-1").unwrap();
        assert_eq!(bag.file_encoding().label(), "ISO-8859-1");
        assert!(bag.is_dirty());

        assert!(matches!(
            bag.set_file_encoding("KLINGON-7"),
            Err(BagError::Unsupported(_))
        ));
    }
}
