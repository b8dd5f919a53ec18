//! Represents the metadata record written for every uploaded image.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A single uploaded image.
///
/// The record is written once, after the bytes have been stored, and is never
/// updated by the service afterwards. The payload itself lives in the object
/// store under `storage_path`.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageRecord {
    /// Short random token, also the primary key.
    pub id: String,

    /// Original client-supplied file name, stored as given.
    pub filename: String,

    /// MIME type reported by the client.
    pub content_type: String,

    /// Size in bytes of the stored payload.
    pub size: i64,

    /// Object store key (`{id}` or `{id}.{ext}`).
    pub storage_path: String,

    /// Durable URL the bytes can be fetched from.
    #[serde(rename = "downloadURL")]
    pub download_url: String,

    /// Assigned by the metadata store at write time. Sole ordering key of the feed.
    pub created_at: DateTime<Utc>,
}

impl ImageRecord {
    /// Shareable path of the detail page for this image.
    pub fn view_url(&self) -> String {
        view_url(&self.id)
    }

    /// Size in kilobytes with one decimal, as shown on the detail page.
    pub fn size_kb(&self) -> String {
        format!("{:.1}", self.size as f64 / 1024.0)
    }
}

/// Everything the upload workflow knows about a record before it is written.
/// The metadata store stamps `created_at` itself.
#[derive(Clone, Debug)]
pub struct NewImageRecord {
    pub id: String,
    pub filename: String,
    pub content_type: String,
    pub size: i64,
    pub storage_path: String,
    pub download_url: String,
}

impl NewImageRecord {
    pub fn into_record(self, created_at: DateTime<Utc>) -> ImageRecord {
        ImageRecord {
            id: self.id,
            filename: self.filename,
            content_type: self.content_type,
            size: self.size,
            storage_path: self.storage_path,
            download_url: self.download_url,
            created_at,
        }
    }
}

pub fn view_url(id: &str) -> String {
    format!("/i/{}", id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(size: i64) -> ImageRecord {
        NewImageRecord {
            id: "aB3xY9z".into(),
            filename: "cat.jpg".into(),
            content_type: "image/jpeg".into(),
            size,
            storage_path: "aB3xY9z.jpg".into(),
            download_url: "http://localhost:3000/objects/aB3xY9z.jpg".into(),
        }
        .into_record(Utc::now())
    }

    #[test]
    fn test_size_kb_has_one_decimal() {
        assert_eq!(record(2_097_152).size_kb(), "2048.0");
        assert_eq!(record(1536).size_kb(), "1.5");
        assert_eq!(record(0).size_kb(), "0.0");
    }

    #[test]
    fn test_view_url_uses_short_path() {
        assert_eq!(record(1).view_url(), "/i/aB3xY9z");
    }

    #[test]
    fn test_serializes_with_wire_field_names() {
        let value = serde_json::to_value(record(10)).unwrap();
        assert_eq!(value["contentType"], "image/jpeg");
        assert_eq!(value["storagePath"], "aB3xY9z.jpg");
        assert!(value["downloadURL"].as_str().unwrap().ends_with("aB3xY9z.jpg"));
        assert!(value.get("createdAt").is_some());
    }
}
