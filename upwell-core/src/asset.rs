//! Post descriptors and local asset resolution.
//!
//! Defines the immutable input to a batch (post descriptors), the media
//! kinds the engine distinguishes, and the resolver seam through which the
//! local media library hands the engine sized byte sources.

use std::io::SeekFrom;
use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Identifier of a target post on the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PostId(String);

impl PostId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for PostId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reference to a source media asset in the local library.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetRef(String);

impl AssetRef {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AssetRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Media kind of an asset, inferred during resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaKind {
    Photo,
    Video,
}

impl MediaKind {
    /// Returns true for assets that pass through the transcoding stage.
    pub fn requires_transcode(&self) -> bool {
        matches!(self, MediaKind::Video)
    }
}

/// One pending post in a batch: target post, authorization key, and the
/// local asset to upload. Sequence order defines dispatch priority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostDescriptor {
    pub post_id: PostId,
    pub key: String,
    pub asset: AssetRef,
}

impl PostDescriptor {
    pub fn new(post_id: impl Into<String>, key: impl Into<String>, asset: impl Into<String>) -> Self {
        Self {
            post_id: PostId::new(post_id),
            key: key.into(),
            asset: AssetRef::new(asset),
        }
    }

    /// Validates that the descriptor carries a usable post id / key pair.
    ///
    /// # Errors
    /// - `AssetError::MalformedPost` - Missing post id or authorization key
    pub fn validate(&self) -> Result<(), AssetError> {
        if self.post_id.is_empty() {
            return Err(AssetError::MalformedPost {
                reason: "empty post id".to_string(),
            });
        }
        if self.key.is_empty() {
            return Err(AssetError::MalformedPost {
                reason: format!("post {} has an empty authorization key", self.post_id),
            });
        }
        Ok(())
    }
}

/// Finalized byte source for an asset: raw photo bytes held in memory or a
/// file on disk (original video or transcoded output).
#[derive(Debug, Clone)]
pub enum ByteSource {
    Memory(Bytes),
    File(PathBuf),
}

impl ByteSource {
    /// Reads `len` bytes starting at `offset`, short at end of source.
    ///
    /// # Errors
    /// - `std::io::Error` - File open, seek, or read failure
    pub async fn read_range(&self, offset: u64, len: usize) -> std::io::Result<Bytes> {
        match self {
            ByteSource::Memory(bytes) => {
                let start = (offset as usize).min(bytes.len());
                let end = start.saturating_add(len).min(bytes.len());
                Ok(bytes.slice(start..end))
            }
            ByteSource::File(path) => {
                let mut file = tokio::fs::File::open(path).await?;
                file.seek(SeekFrom::Start(offset)).await?;
                let mut buffer = vec![0u8; len];
                let mut filled = 0;
                while filled < len {
                    let read = file.read(&mut buffer[filled..]).await?;
                    if read == 0 {
                        break;
                    }
                    filled += read;
                }
                buffer.truncate(filled);
                Ok(Bytes::from(buffer))
            }
        }
    }

    /// Total length of the source in bytes.
    ///
    /// # Errors
    /// - `std::io::Error` - File metadata failure
    pub async fn len(&self) -> std::io::Result<u64> {
        match self {
            ByteSource::Memory(bytes) => Ok(bytes.len() as u64),
            ByteSource::File(path) => Ok(tokio::fs::metadata(path).await?.len()),
        }
    }
}

/// Asset resolved through the local media library.
#[derive(Debug, Clone)]
pub struct ResolvedAsset {
    pub kind: MediaKind,
    pub size: u64,
    pub source: ByteSource,
}

/// Resolution of asset references into sized byte sources.
///
/// Implemented by the local media library collaborator; the engine never
/// enumerates assets itself.
#[async_trait]
pub trait AssetResolver: Send + Sync {
    /// Resolves an asset reference to its kind, size, and byte source.
    ///
    /// # Errors
    /// - `AssetError::NotFound` - Reference does not name a local asset
    /// - `AssetError::Unreadable` - Asset exists but its bytes are inaccessible
    async fn resolve(&self, asset: &AssetRef) -> Result<ResolvedAsset, AssetError>;
}

/// Errors raised while validating descriptors or resolving assets.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AssetError {
    /// Descriptor is missing required fields or references nothing usable
    #[error("Malformed post: {reason}")]
    MalformedPost { reason: String },

    /// Asset reference does not resolve to a local media item
    #[error("Asset {asset} not found")]
    NotFound { asset: AssetRef },

    /// Asset exists but could not be read
    #[error("Asset unreadable: {reason}")]
    Unreadable { reason: String },
}
