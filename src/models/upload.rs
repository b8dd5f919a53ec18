//! Types exchanged between the upload workflow and its callers.

use bytes::Bytes;
use futures::stream::BoxStream;
use serde::Serialize;
use std::io;

/// Byte stream of an incoming file. Borrowed streams (multipart fields) are allowed.
pub type ByteStream<'a> = BoxStream<'a, io::Result<Bytes>>;

/// A file selected by the user, not yet stored.
pub struct IncomingFile<'a> {
    /// Name as reported by the client.
    pub filename: String,

    /// MIME type as reported by the client.
    pub content_type: String,

    /// Declared length, when the transport knows it up front.
    pub size_hint: Option<u64>,

    pub body: ByteStream<'a>,
}

/// One progress event of a byte upload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UploadProgress {
    pub bytes_transferred: u64,
    pub total_bytes: Option<u64>,
}

impl UploadProgress {
    /// Percentage rounded to the nearest integer, when the total is known.
    pub fn percent(&self) -> Option<u8> {
        match self.total_bytes {
            Some(0) => Some(100),
            Some(total) => {
                let ratio = self.bytes_transferred.min(total) as f64 / total as f64;
                Some((ratio * 100.0).round() as u8)
            }
            None => None,
        }
    }
}

/// What the caller gets back from a successful upload.
#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UploadResult {
    pub id: String,
    pub view_url: String,
    #[serde(rename = "downloadURL")]
    pub download_url: String,
}
