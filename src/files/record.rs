use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    AsRefStr,
    Display,
    EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum DownloadStatus {
    #[default]
    Idle,
    Downloading,
    Paused,
    Completed,
    Error,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    AsRefStr,
    Display,
    EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum TransferStatus {
    #[default]
    Idle,
    Transferring,
    Completed,
    Error,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, AsRefStr, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FileKind {
    Thumbnail,
    Photo,
    Video,
    Audio,
    #[default]
    File,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThumbnailFile {
    pub unique_id: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub extra: Option<serde_json::Value>,
}

/// One remote file attachment as returned by the collection endpoint.
///
/// `unique_id` is the stable merge key. `id` is a backend handle that can be
/// reassigned when the file changes state (for example when a download task
/// is created); push updates carry the latest value and win over the one
/// fetched with the page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FileRecord {
    pub id: i64,
    pub unique_id: String,
    pub telegram_id: i64,
    pub chat_id: i64,
    pub message_id: i64,
    pub media_album_id: i64,
    /// Message date, unix seconds.
    pub date: i64,
    pub has_sensitive_content: bool,
    pub size: i64,
    pub downloaded_size: i64,
    #[serde(rename = "type")]
    pub kind: FileKind,
    pub mime_type: Option<String>,
    pub file_name: Option<String>,
    pub thumbnail: Option<String>,
    pub thumbnail_file: Option<ThumbnailFile>,
    pub caption: Option<String>,
    pub local_path: Option<String>,
    pub download_status: DownloadStatus,
    pub transfer_status: TransferStatus,
    pub start_date: Option<i64>,
    pub completion_date: Option<i64>,
    /// Comma-joined tag list.
    pub tags: Option<String>,
    pub thread_chat_id: i64,
    pub message_thread_id: i64,
    pub reaction_count: i64,
    pub original_deleted: bool,
}

impl FileRecord {
    pub fn has_unique_id(&self) -> bool {
        !is_blank_unique_id(&self.unique_id)
    }

    pub fn tags_str(&self) -> &str {
        self.tags.as_deref().unwrap_or("")
    }

    pub fn display_name(&self) -> &str {
        self.file_name
            .as_deref()
            .filter(|name| !name.is_empty())
            .unwrap_or(&self.unique_id)
    }

    pub fn to_ref(&self) -> FileRef {
        FileRef {
            telegram_id: self.telegram_id,
            chat_id: self.chat_id,
            message_id: self.message_id,
            unique_id: self.unique_id.clone(),
            file_id: self.id,
        }
    }
}

pub fn is_blank_unique_id(unique_id: &str) -> bool {
    unique_id.trim().is_empty()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRef {
    pub telegram_id: i64,
    pub chat_id: i64,
    pub message_id: i64,
    pub unique_id: String,
    pub file_id: i64,
}

/// End-of-data marker for `next_from_message_id`.
pub const END_CURSOR: i64 = 0;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub files: Vec<FileRecord>,
    /// Total number of files matching the filter on the server.
    pub count: u64,
    pub next_from_message_id: i64,
}

impl Page {
    pub fn is_last(&self) -> bool {
        self.next_from_message_id == END_CURSOR
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_decodes_server_payload() {
        let raw = r#"{
            "files": [{
                "id": 7,
                "uniqueId": "abc",
                "type": "video",
                "size": 2048,
                "downloadStatus": "downloading",
                "tags": "x,y",
                "originalDeleted": true,
                "thumbnailFile": {"uniqueId": "t1", "mimeType": "image/jpeg", "extra": null},
                "somethingNew": 1
            }],
            "count": 5,
            "nextFromMessageId": 42
        }"#;
        let page: Page = serde_json::from_str(raw).expect("decode page");
        assert_eq!(page.count, 5);
        assert!(!page.is_last());
        let file = &page.files[0];
        assert_eq!(file.unique_id, "abc");
        assert_eq!(file.kind, FileKind::Video);
        assert_eq!(file.download_status, DownloadStatus::Downloading);
        assert_eq!(file.transfer_status, TransferStatus::Idle);
        assert!(file.original_deleted);
        assert_eq!(file.tags_str(), "x,y");
        assert_eq!(
            file.thumbnail_file.as_ref().map(|t| t.unique_id.as_str()),
            Some("t1")
        );
    }

    #[test]
    fn unknown_kind_does_not_fail_decoding() {
        let file: FileRecord =
            serde_json::from_str(r#"{"uniqueId":"u","type":"sticker"}"#).expect("decode");
        assert_eq!(file.kind, FileKind::Unknown);
        assert_eq!(file.display_name(), "u");
    }

    #[test]
    fn blank_unique_id_is_not_mergeable() {
        let file = FileRecord {
            unique_id: "  ".into(),
            ..FileRecord::default()
        };
        assert!(!file.has_unique_id());
    }

    #[test]
    fn missing_fields_decode_to_default_record() {
        let file: FileRecord = serde_json::from_str("{}").expect("decode");
        assert_eq!(file, FileRecord::default());
        assert_eq!(file.kind, FileKind::File);
        assert_eq!(file.download_status, DownloadStatus::Idle);
        assert_eq!(file.tags_str(), "");
    }
}
