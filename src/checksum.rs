pub(crate) use compute::compute_checksum_file;
pub use compute::ChecksumComputeError;

use crate::Algorithm;
use digest::Digest;
use std::{borrow::Cow, fmt::Display};

mod compute {
    use super::Checksum;
    use crate::Algorithm;
    use std::path::Path;
    use tokio::{
        fs::File,
        io::{AsyncReadExt, BufReader},
        task::spawn_blocking,
    };

    #[derive(thiserror::Error, Debug, PartialEq)]
    pub enum ChecksumComputeError {
        #[error("File not found on disk")]
        FileNotFound,
        #[error("Failed to open file")]
        OpenFile(std::io::ErrorKind),
        #[error("Failed to read file")]
        ReadFile(std::io::ErrorKind),
        #[error("Failed to compute checksum of file")]
        ComputeChecksum,
    }

    pub(crate) async fn compute_checksum_file(
        path: impl AsRef<Path>,
        algorithm: Algorithm,
    ) -> Result<Checksum<'static>, ChecksumComputeError> {
        if !path.as_ref().is_file() {
            return Err(ChecksumComputeError::FileNotFound);
        }

        let file = File::open(&path)
            .await
            .map_err(|e| ChecksumComputeError::OpenFile(e.kind()))?;
        let mut buffer_reader = BufReader::new(file);

        let mut buffer = Vec::new();
        buffer_reader
            .read_to_end(&mut buffer)
            .await
            .map_err(|e| ChecksumComputeError::ReadFile(e.kind()))?;

        let checksum = spawn_blocking(move || Checksum::digest(algorithm, buffer))
            .await
            .map_err(|_| ChecksumComputeError::ComputeChecksum)?;

        Ok(checksum)
    }
}

/// Lowercase hex rendering of a digest. Manifest lines store digests in
/// this form, so comparison is plain equality.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Checksum<'a>(Cow<'a, str>);

impl Checksum<'_> {
    /// Compute checksum for a vector of bytes with the given algorithm.
    pub fn digest(algorithm: Algorithm, bytes: Vec<u8>) -> Checksum<'static> {
        let digest = match algorithm {
            Algorithm::Md5 => md5::Md5::digest(&bytes).to_vec(),
            Algorithm::Sha1 => sha1::Sha1::digest(&bytes).to_vec(),
            Algorithm::Sha224 => sha2::Sha224::digest(&bytes).to_vec(),
            Algorithm::Sha256 => sha2::Sha256::digest(&bytes).to_vec(),
            Algorithm::Sha384 => sha2::Sha384::digest(&bytes).to_vec(),
            Algorithm::Sha512 => sha2::Sha512::digest(&bytes).to_vec(),
            Algorithm::Sha3_224 => sha3::Sha3_224::digest(&bytes).to_vec(),
            Algorithm::Sha3_256 => sha3::Sha3_256::digest(&bytes).to_vec(),
            Algorithm::Sha3_384 => sha3::Sha3_384::digest(&bytes).to_vec(),
            Algorithm::Sha3_512 => sha3::Sha3_512::digest(&bytes).to_vec(),
        };

        digest.into()
    }

    /// Copy a digest read from a manifest, folding hex to lowercase.
    pub fn parse(hex_digest: &str) -> Checksum<'static> {
        Checksum(Cow::Owned(hex_digest.to_ascii_lowercase()))
    }
}

impl From<&[u8]> for Checksum<'_> {
    fn from(value: &[u8]) -> Self {
        Self(Cow::Owned(hex::encode(value)))
    }
}

impl From<Vec<u8>> for Checksum<'_> {
    fn from(value: Vec<u8>) -> Self {
        Self(Cow::Owned(hex::encode(value)))
    }
}

impl<'a> From<&'a str> for Checksum<'a> {
    fn from(value: &'a str) -> Checksum<'a> {
        Self(Cow::Borrowed(value))
    }
}

impl From<String> for Checksum<'_> {
    fn from(value: String) -> Self {
        Self(Cow::Owned(value))
    }
}

impl Display for Checksum<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Checksum<'_> {
    fn as_ref(&self) -> &str {
        match &self.0 {
            Cow::Borrowed(borrowed) => borrowed,
            Cow::Owned(owned) => owned.as_ref(),
        }
    }
}
