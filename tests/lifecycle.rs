//! End-to-end journeys over the public API: build a bag, flush it, reopen
//! it, break it, fetch into it.

use async_trait::async_trait;
use bagkit::{
    Algorithm, Bag, BagError, Clock, DownloadError, Downloader, Version,
};
use jiff::civil::Date;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;

struct FixedClock(Date);

impl Clock for FixedClock {
    fn today(&self) -> Date {
        self.0
    }
}

struct CannedDownloader(HashMap<String, Vec<u8>>);

#[async_trait]
impl Downloader for CannedDownloader {
    async fn fetch(&self, url: &str, size_hint: Option<u64>) -> Result<Vec<u8>, DownloadError> {
        let bytes = self
            .0
            .get(url)
            .cloned()
            .ok_or_else(|| DownloadError::Failed(format!("unknown URL `{url}`")))?;

        if let Some(expected) = size_hint {
            if bytes.len() as u64 != expected {
                return Err(DownloadError::SizeMismatch {
                    expected,
                    received: bytes.len() as u64,
                });
            }
        }

        Ok(bytes)
    }
}

async fn source(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).await.unwrap();
    path
}

const HELLO_SHA256: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";
const HELLO_MD5: &str = "5eb63bbbe01eeed093cb22bb8f5acdc3";

#[tokio::test]
async fn minimal_bag_end_to_end() {
    let sources = tempfile::tempdir().unwrap();
    let hello = source(sources.path(), "hello.txt", "hello world").await;

    let bags = tempfile::tempdir().unwrap();
    let root = bags.path().join("minimal");

    let mut bag = Bag::create(&root).await.unwrap();
    bag.add_file(&hello, "hello.txt").await.unwrap();
    bag.update().await.unwrap();

    assert_eq!(
        fs::read_to_string(root.join("bagit.txt")).await.unwrap(),
        "BagIt-Version: 1.0\nTag-File-Character-Encoding: UTF-8\n"
    );
    assert!(root.join("data/hello.txt").is_file());
    assert!(root.join("manifest-sha512.txt").is_file());

    // whatever update() wrote must reopen and validate clean
    let mut reopened = Bag::load(&root).await.unwrap();
    assert!(reopened.validate().await.unwrap());
    assert_eq!(reopened.errors(), &[]);
    assert_eq!(reopened.version(), Version::V1_0);
}

#[tokio::test]
async fn every_algorithm_digests_every_file() {
    let sources = tempfile::tempdir().unwrap();
    let hello = source(sources.path(), "hello.txt", "hello world").await;

    let bags = tempfile::tempdir().unwrap();
    let root = bags.path().join("multi");

    let mut bag = Bag::create(&root).await.unwrap();
    bag.set_algorithm("sha256").unwrap();
    bag.add_algorithm("md5").unwrap();
    bag.add_file(&hello, "hello.txt").await.unwrap();
    bag.update().await.unwrap();

    assert_eq!(
        fs::read_to_string(root.join("manifest-sha256.txt")).await.unwrap(),
        format!("{HELLO_SHA256} data/hello.txt\n")
    );
    assert_eq!(
        fs::read_to_string(root.join("manifest-md5.txt")).await.unwrap(),
        format!("{HELLO_MD5} data/hello.txt\n")
    );

    let mut reopened = Bag::load(&root).await.unwrap();
    assert_eq!(
        reopened.algorithms(),
        vec![Algorithm::Md5, Algorithm::Sha256]
    );
    assert!(reopened.validate().await.unwrap());
}

#[tokio::test]
async fn algorithm_swap_on_reopened_bag() {
    let sources = tempfile::tempdir().unwrap();
    let hello = source(sources.path(), "hello.txt", "hello world").await;

    let bags = tempfile::tempdir().unwrap();
    let root = bags.path().join("swap");

    let mut bag = Bag::create(&root).await.unwrap();
    bag.add_file(&hello, "hello.txt").await.unwrap();
    bag.update().await.unwrap();
    drop(bag);

    let mut bag = Bag::load(&root).await.unwrap();
    bag.set_algorithm("md5").unwrap();
    bag.update().await.unwrap();

    assert!(!root.join("manifest-sha512.txt").exists());
    assert_eq!(
        fs::read_to_string(root.join("manifest-md5.txt")).await.unwrap(),
        format!("{HELLO_MD5} data/hello.txt\n")
    );
}

#[tokio::test]
async fn extended_bag_carries_metadata() {
    let sources = tempfile::tempdir().unwrap();
    let hello = source(sources.path(), "hello.txt", "hi\n").await;

    let bags = tempfile::tempdir().unwrap();
    let root = bags.path().join("extended");

    let mut bag = Bag::create(&root).await.unwrap();
    bag.set_clock(Box::new(FixedClock(Date::new(2030, 6, 15).unwrap())));
    bag.add_file(&hello, "hello.txt").await.unwrap();
    bag.set_extended(true);
    bag.set_bag_info_tag("Source-Organization", "ACME").unwrap();
    bag.update().await.unwrap();

    let info = fs::read_to_string(root.join("bag-info.txt")).await.unwrap();
    assert!(info.contains("Source-Organization: ACME\n"));
    assert!(info.contains("Payload-Oxum: 3.1\n"));
    assert!(info.contains("Bagging-Date: 2030-06-15\n"));

    let tagmanifest = fs::read_to_string(root.join("tagmanifest-sha512.txt"))
        .await
        .unwrap();
    for tag_file in ["bagit.txt", "bag-info.txt", "manifest-sha512.txt"] {
        assert!(tagmanifest.contains(&format!(" {tag_file}\n")));
    }

    let mut reopened = Bag::load(&root).await.unwrap();
    assert!(reopened.is_extended());
    assert_eq!(
        reopened.get_bag_info_by_tag("source-organization"),
        vec!["ACME"]
    );
    assert!(reopened.validate().await.unwrap());
}

#[tokio::test]
async fn extended_multi_algorithm_bag_cross_references_tag_manifests() {
    let sources = tempfile::tempdir().unwrap();
    let hello = source(sources.path(), "hello.txt", "hello world").await;

    let bags = tempfile::tempdir().unwrap();
    let root = bags.path().join("cross");

    let mut bag = Bag::create(&root).await.unwrap();
    bag.add_algorithm("md5").unwrap();
    bag.add_file(&hello, "hello.txt").await.unwrap();
    bag.set_extended(true);
    bag.update().await.unwrap();

    // tag manifests go out in ascending algorithm order: the later one
    // lists the already-finalized md5 manifest among the other tag files
    let later = fs::read_to_string(root.join("tagmanifest-sha512.txt"))
        .await
        .unwrap();
    assert!(later.contains(" tagmanifest-md5.txt\n"));
    let earlier = fs::read_to_string(root.join("tagmanifest-md5.txt"))
        .await
        .unwrap();
    assert!(!earlier.contains("tagmanifest-sha512.txt"));

    // the asymmetric coverage reopens and validates clean
    let mut reopened = Bag::load(&root).await.unwrap();
    assert!(reopened.validate().await.unwrap());
    assert_eq!(reopened.errors(), &[]);
}

#[tokio::test]
async fn long_values_fold_and_survive_round_trips() {
    let sources = tempfile::tempdir().unwrap();
    let hello = source(sources.path(), "hello.txt", "hello world").await;

    let bags = tempfile::tempdir().unwrap();
    let root = bags.path().join("folded");

    let description = "An exhaustive description of the contents of this bag, \
                       with enough words that the serializer has no choice but \
                       to continue the value across several folded lines";

    let mut bag = Bag::create(&root).await.unwrap();
    bag.add_file(&hello, "hello.txt").await.unwrap();
    bag.set_extended(true);
    bag.set_bag_info_tag("External-Description", description).unwrap();
    bag.update().await.unwrap();

    let info = fs::read_to_string(root.join("bag-info.txt")).await.unwrap();
    assert!(info.lines().all(|line| line.len() <= 78));
    assert!(info.lines().any(|line| line.starts_with("  ")));

    let mut reopened = Bag::load(&root).await.unwrap();
    assert_eq!(
        reopened.get_bag_info_by_tag("External-Description"),
        vec![description]
    );
    assert!(reopened.validate().await.unwrap());
}

#[tokio::test]
async fn removal_leaves_no_trace() {
    let sources = tempfile::tempdir().unwrap();
    let hello = source(sources.path(), "hello.txt", "hello world").await;

    let bags = tempfile::tempdir().unwrap();
    let root = bags.path().join("removal");

    let mut bag = Bag::create(&root).await.unwrap();
    bag.add_file(&hello, "keep.txt").await.unwrap();
    bag.add_file(&hello, "nested/away/gone.txt").await.unwrap();
    bag.update().await.unwrap();

    bag.remove_file("nested/away/gone.txt").await.unwrap();
    bag.update().await.unwrap();

    let manifest = fs::read_to_string(root.join("manifest-sha512.txt"))
        .await
        .unwrap();
    assert!(!manifest.contains("gone.txt"));
    assert!(!root.join("data/nested").exists());

    let mut reopened = Bag::load(&root).await.unwrap();
    assert!(reopened.validate().await.unwrap());
    assert_eq!(
        reopened.payload_files().into_iter().collect::<Vec<_>>(),
        vec!["data/keep.txt"]
    );
}

#[tokio::test]
async fn reserved_destination_changes_nothing() {
    let sources = tempfile::tempdir().unwrap();
    let hello = source(sources.path(), "hello.txt", "hello world").await;

    let bags = tempfile::tempdir().unwrap();
    let root = bags.path().join("reserved");

    let mut bag = Bag::create(&root).await.unwrap();
    assert!(matches!(
        bag.add_file(&hello, "CON").await,
        Err(BagError::Policy(_))
    ));

    let mut leftovers = fs::read_dir(root.join("data")).await.unwrap();
    assert!(leftovers.next_entry().await.unwrap().is_none());
}

#[tokio::test]
async fn generated_tags_stay_engine_owned() {
    let bags = tempfile::tempdir().unwrap();
    let mut bag = Bag::create(bags.path().join("owned")).await.unwrap();

    for tag in ["Payload-Oxum", "payload-oxum", "Bagging-Date"] {
        assert!(
            matches!(bag.set_bag_info_tag(tag, "anything"), Err(BagError::Policy(_))),
            "`{tag}` must be refused"
        );
    }
}

#[tokio::test]
async fn holey_bag_fetches_and_finalizes() {
    let sources = tempfile::tempdir().unwrap();
    let hello = source(sources.path(), "hello.txt", "hello world").await;

    let bags = tempfile::tempdir().unwrap();
    let root = bags.path().join("holey");

    let canned = || {
        Box::new(CannedDownloader(HashMap::from([(
            "https://example.org/big.bin".to_string(),
            b"remote payload".to_vec(),
        )])))
    };

    let mut bag = Bag::create(&root).await.unwrap();
    bag.set_downloader(canned());
    bag.add_file(&hello, "hello.txt").await.unwrap();
    bag.add_fetch("https://example.org/big.bin", "big.bin", Some(14))
        .await
        .unwrap();
    bag.update().await.unwrap();

    // the fetched bytes are digested like any other payload file
    assert!(fs::read_to_string(root.join("manifest-sha512.txt"))
        .await
        .unwrap()
        .contains("data/big.bin"));
    assert_eq!(
        fs::read_to_string(root.join("fetch.txt")).await.unwrap(),
        "https://example.org/big.bin 14 data/big.bin\n"
    );

    // package step drops the materialized copy, making the bag holey
    bag.finalize().await.unwrap();
    assert!(!root.join("data/big.bin").exists());

    // a fresh consumer downloads the hole closed during validation
    let mut consumer = Bag::load(&root).await.unwrap();
    consumer.set_downloader(canned());
    assert!(consumer.validate().await.unwrap());
    assert_eq!(
        fs::read(root.join("data/big.bin")).await.unwrap(),
        b"remote payload"
    );
}

#[tokio::test]
async fn fetch_size_mismatch_is_refused() {
    let bags = tempfile::tempdir().unwrap();
    let mut bag = Bag::create(bags.path().join("sized")).await.unwrap();
    bag.set_downloader(Box::new(CannedDownloader(HashMap::from([(
        "https://example.org/big.bin".to_string(),
        b"remote payload".to_vec(),
    )]))));

    assert!(matches!(
        bag.add_fetch("https://example.org/big.bin", "big.bin", Some(4))
            .await,
        Err(BagError::Download { .. })
    ));
    assert!(matches!(
        bag.add_fetch("ftp://example.org/big.bin", "big.bin", None).await,
        Err(BagError::Unsupported(_))
    ));
    assert!(matches!(
        bag.add_fetch("https://example.org/big.bin", "../big.bin", None)
            .await,
        Err(BagError::Conflict(_))
    ));
}

#[tokio::test]
async fn alternate_encoding_round_trips() {
    let sources = tempfile::tempdir().unwrap();
    let hello = source(sources.path(), "hello.txt", "hello world").await;

    let bags = tempfile::tempdir().unwrap();
    let root = bags.path().join("latin1");

    let mut bag = Bag::create(&root).await.unwrap();
    bag.set_file_encoding("ISO-8859-1").unwrap();
    bag.add_file(&hello, "hello.txt").await.unwrap();
    bag.set_extended(true);
    bag.set_bag_info_tag("Contact-Name", "Renée Müller").unwrap();
    bag.update().await.unwrap();

    // bagit.txt itself stays UTF-8 and declares the label verbatim
    assert!(fs::read_to_string(root.join("bagit.txt"))
        .await
        .unwrap()
        .contains("Tag-File-Character-Encoding: ISO-8859-1\n"));
    // the stored bytes are not UTF-8
    let raw = fs::read(root.join("bag-info.txt")).await.unwrap();
    assert!(String::from_utf8(raw).is_err());

    let mut reopened = Bag::load(&root).await.unwrap();
    assert_eq!(
        reopened.get_bag_info_by_tag("Contact-Name"),
        vec!["Renée Müller"]
    );
    assert!(reopened.validate().await.unwrap());
}

#[tokio::test]
async fn tampering_is_caught_after_reopen() {
    let sources = tempfile::tempdir().unwrap();
    let hello = source(sources.path(), "hello.txt", "hello world").await;

    let bags = tempfile::tempdir().unwrap();
    let root = bags.path().join("tampered");

    let mut bag = Bag::create(&root).await.unwrap();
    bag.set_extended(true);
    bag.add_file(&hello, "hello.txt").await.unwrap();
    bag.update().await.unwrap();
    drop(bag);

    fs::remove_file(root.join("data/hello.txt")).await.unwrap();

    let mut reopened = Bag::load(&root).await.unwrap();
    assert!(!reopened.validate().await.unwrap());
    // exactly one finding: the manifest entry with nothing behind it
    assert_eq!(reopened.errors().len(), 1);
    assert_eq!(reopened.errors()[0].file, "data/hello.txt");
}
