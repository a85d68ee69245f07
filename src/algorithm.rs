use std::fmt::Display;
use std::str::FromStr;

/// Checksum algorithms a manifest may be written with.
///
/// The set follows RFC 8493 section 2.4, which defers to the IANA
/// named-information registry
/// <https://www.iana.org/assignments/named-information/named-information.xhtml>.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Algorithm {
    Md5,
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
    Sha3_224,
    Sha3_256,
    Sha3_384,
    Sha3_512,
}

/// Requested algorithm is not in the registry.
#[derive(thiserror::Error, Debug, PartialEq)]
#[error("unsupported checksum algorithm `{0}`")]
pub struct UnsupportedAlgorithm(pub String);

impl Algorithm {
    /// Every algorithm this build can compute.
    pub fn all() -> &'static [Algorithm] {
        &[
            Algorithm::Md5,
            Algorithm::Sha1,
            Algorithm::Sha224,
            Algorithm::Sha256,
            Algorithm::Sha384,
            Algorithm::Sha512,
            Algorithm::Sha3_224,
            Algorithm::Sha3_256,
            Algorithm::Sha3_384,
            Algorithm::Sha3_512,
        ]
    }

    /// Returns name of the algorithm as it appears in manifest filenames,
    /// dashes retained (`manifest-sha3-256.txt`).
    pub fn name(&self) -> &'static str {
        match self {
            Algorithm::Md5 => "md5",
            Algorithm::Sha1 => "sha1",
            Algorithm::Sha224 => "sha224",
            Algorithm::Sha256 => "sha256",
            Algorithm::Sha384 => "sha384",
            Algorithm::Sha512 => "sha512",
            Algorithm::Sha3_224 => "sha3-224",
            Algorithm::Sha3_256 => "sha3-256",
            Algorithm::Sha3_384 => "sha3-384",
            Algorithm::Sha3_512 => "sha3-512",
        }
    }

    /// Length in characters of a hex digest produced by this algorithm.
    pub fn hex_len(&self) -> usize {
        match self {
            Algorithm::Md5 => 32,
            Algorithm::Sha1 => 40,
            Algorithm::Sha224 | Algorithm::Sha3_224 => 56,
            Algorithm::Sha256 | Algorithm::Sha3_256 => 64,
            Algorithm::Sha384 | Algorithm::Sha3_384 => 96,
            Algorithm::Sha512 | Algorithm::Sha3_512 => 128,
        }
    }

    /// Strip everything but ASCII alphanumerics and lowercase, so
    /// `SHA-512`, `sha_512` and `sha512` all name the same algorithm.
    pub fn normalize(name: &str) -> String {
        name.chars()
            .filter(char::is_ascii_alphanumeric)
            .map(|c| c.to_ascii_lowercase())
            .collect()
    }

    /// Whether `name` resolves to a registry entry.
    pub fn is_supported(name: &str) -> bool {
        name.parse::<Algorithm>().is_ok()
    }
}

impl FromStr for Algorithm {
    type Err = UnsupportedAlgorithm;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match Self::normalize(s).as_str() {
            "md5" => Ok(Algorithm::Md5),
            "sha1" => Ok(Algorithm::Sha1),
            "sha224" => Ok(Algorithm::Sha224),
            "sha256" => Ok(Algorithm::Sha256),
            "sha384" => Ok(Algorithm::Sha384),
            "sha512" => Ok(Algorithm::Sha512),
            "sha3224" => Ok(Algorithm::Sha3_224),
            "sha3256" => Ok(Algorithm::Sha3_256),
            "sha3384" => Ok(Algorithm::Sha3_384),
            "sha3512" => Ok(Algorithm::Sha3_512),
            _ => Err(UnsupportedAlgorithm(s.to_string())),
        }
    }
}

impl Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}
