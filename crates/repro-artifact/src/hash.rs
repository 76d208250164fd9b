//! Blake3 fingerprints for generated files and codebases

use std::fmt;

/// Blake3 digest of a file or of a whole codebase
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Hash one file's content
    #[inline]
    #[must_use]
    pub fn compute(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Hash `(path, content)` pairs in iteration order.
    ///
    /// Fields are NUL-terminated, so bytes moved between a path and its
    /// content change the digest.
    #[must_use]
    pub fn compute_files<'a, I>(files: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut hasher = blake3::Hasher::new();
        for (path, content) in files {
            hasher.update(path.as_bytes());
            hasher.update(&[0]);
            hasher.update(content.as_bytes());
            hasher.update(&[0]);
        }
        Self(*hasher.finalize().as_bytes())
    }

    /// First 16 hex digits, for log lines
    #[inline]
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl serde::Serialize for ContentHash {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for ContentHash {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        let mut bytes = [0_u8; 32];
        hex::decode_to_slice(&text, &mut bytes).map_err(serde::de::Error::custom)?;
        Ok(Self(bytes))
    }
}
