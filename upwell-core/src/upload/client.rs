//! Upload API client seam and HTTP implementation.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use url::Url;

use super::UploadError;
use crate::asset::{MediaKind, PostId};
use crate::config::ApiConfig;

/// Acknowledgement for a single accepted chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkAck {
    /// Total bytes the remote service has durably received for the post
    pub received: u64,
}

/// Metadata accompanying the post-creation digest call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigestMetadata {
    pub key: String,
    pub kind: MediaKind,
    pub total_bytes: u64,
    pub gallery_id: String,
}

/// Server-returned payload acknowledging successful post creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostDigest {
    pub post_id: PostId,
    pub payload: serde_json::Value,
}

/// Authenticated transfer operations against the remote upload service.
#[async_trait]
pub trait UploadApiClient: Send + Sync {
    /// Uploads one byte range at the given offset.
    ///
    /// # Errors
    /// - `UploadError::Transient` - Recoverable network or server failure
    /// - `UploadError::Rejected` - Request refused by the remote service
    async fn upload_chunk(
        &self,
        post_id: &PostId,
        key: &str,
        bytes: Bytes,
        offset: u64,
    ) -> Result<ChunkAck, UploadError>;

    /// Finalizes the post from its uploaded bytes.
    ///
    /// # Errors
    /// - `UploadError::Transient` - Recoverable network or server failure
    /// - `UploadError::Digest` - Remote service refused to create the post
    async fn create_post_digest(
        &self,
        post_id: &PostId,
        metadata: &DigestMetadata,
    ) -> Result<PostDigest, UploadError>;
}

/// HTTP implementation of the upload API.
///
/// Owns a configured `reqwest::Client`; request timeout and user agent come
/// from the API configuration section.
pub struct HttpUploadClient {
    base_url: Url,
    client: reqwest::Client,
}

impl HttpUploadClient {
    /// Creates an HTTP upload client for the given service endpoint.
    pub fn new(base_url: Url, config: &ApiConfig) -> Self {
        Self {
            base_url,
            client: reqwest::Client::builder()
                .timeout(config.request_timeout)
                .user_agent(config.user_agent)
                .build()
                .expect("HTTP client creation should not fail"),
        }
    }

    fn chunk_url(&self, post_id: &PostId, offset: u64) -> Result<Url, UploadError> {
        let mut url = self
            .base_url
            .join(&format!("posts/{post_id}/media"))
            .map_err(|_| UploadError::Source {
                reason: format!("invalid endpoint for post {post_id}"),
            })?;
        url.set_query(Some(&format!("offset={offset}")));
        Ok(url)
    }

    fn map_request_error(error: reqwest::Error) -> UploadError {
        if error.is_timeout() || error.is_connect() {
            UploadError::Transient {
                reason: error.to_string(),
            }
        } else {
            UploadError::Rejected {
                status: error.status().map(|status| status.as_u16()).unwrap_or(0),
            }
        }
    }

    fn map_status(status: reqwest::StatusCode) -> Option<UploadError> {
        if status.is_success() {
            None
        } else if status.is_server_error() || status.as_u16() == 429 {
            Some(UploadError::Transient {
                reason: format!("server returned {status}"),
            })
        } else {
            Some(UploadError::Rejected {
                status: status.as_u16(),
            })
        }
    }
}

#[async_trait]
impl UploadApiClient for HttpUploadClient {
    async fn upload_chunk(
        &self,
        post_id: &PostId,
        key: &str,
        bytes: Bytes,
        offset: u64,
    ) -> Result<ChunkAck, UploadError> {
        let url = self.chunk_url(post_id, offset)?;
        let expected = offset + bytes.len() as u64;

        let response = self
            .client
            .put(url)
            .bearer_auth(key)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(bytes)
            .send()
            .await
            .map_err(Self::map_request_error)?;

        if let Some(error) = Self::map_status(response.status()) {
            return Err(error);
        }

        // Servers that do not echo an offset get credited with the range
        // that was just accepted.
        let ack = response
            .json::<ChunkAck>()
            .await
            .unwrap_or(ChunkAck { received: expected });
        Ok(ack)
    }

    async fn create_post_digest(
        &self,
        post_id: &PostId,
        metadata: &DigestMetadata,
    ) -> Result<PostDigest, UploadError> {
        let url = self
            .base_url
            .join(&format!("posts/{post_id}/digest"))
            .map_err(|_| UploadError::Digest {
                reason: format!("invalid endpoint for post {post_id}"),
            })?;

        let response = self
            .client
            .post(url)
            .bearer_auth(&metadata.key)
            .json(metadata)
            .send()
            .await
            .map_err(|error| {
                if error.is_timeout() || error.is_connect() {
                    UploadError::Transient {
                        reason: error.to_string(),
                    }
                } else {
                    UploadError::Digest {
                        reason: error.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if let Some(error) = Self::map_status(status) {
            return Err(match error {
                transient @ UploadError::Transient { .. } => transient,
                _ => UploadError::Digest {
                    reason: format!("server returned {status}"),
                },
            });
        }

        let payload = response
            .json::<serde_json::Value>()
            .await
            .map_err(|error| UploadError::Digest {
                reason: format!("unreadable digest payload: {error}"),
            })?;

        Ok(PostDigest {
            post_id: post_id.clone(),
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_url_carries_offset() {
        let client = HttpUploadClient::new(
            Url::parse("https://api.example.com/v2/").unwrap(),
            &ApiConfig::default(),
        );

        let url = client.chunk_url(&PostId::new("abc123"), 524_288).unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.example.com/v2/posts/abc123/media?offset=524288"
        );
    }

    #[test]
    fn test_status_mapping() {
        assert!(HttpUploadClient::map_status(reqwest::StatusCode::OK).is_none());
        assert!(matches!(
            HttpUploadClient::map_status(reqwest::StatusCode::SERVICE_UNAVAILABLE),
            Some(UploadError::Transient { .. })
        ));
        assert!(matches!(
            HttpUploadClient::map_status(reqwest::StatusCode::TOO_MANY_REQUESTS),
            Some(UploadError::Transient { .. })
        ));
        assert!(matches!(
            HttpUploadClient::map_status(reqwest::StatusCode::FORBIDDEN),
            Some(UploadError::Rejected { status: 403 })
        ));
    }
}
