use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use crate::files::record::{
    is_blank_unique_id, DownloadStatus, FileRecord, ThumbnailFile, TransferStatus,
};

#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileStatusUpdate {
    pub file_id: Option<i64>,
    pub unique_id: String,
    pub download_status: Option<DownloadStatus>,
    pub local_path: Option<String>,
    pub completion_date: Option<i64>,
    pub downloaded_size: Option<i64>,
    pub transfer_status: Option<TransferStatus>,
    pub thumbnail_file: Option<ThumbnailFile>,
    #[serde(default)]
    pub removed: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusPatch {
    pub file_id: Option<i64>,
    pub download_status: Option<DownloadStatus>,
    pub transfer_status: Option<TransferStatus>,
    pub local_path: Option<String>,
    pub completion_date: Option<i64>,
    pub downloaded_size: Option<i64>,
    pub thumbnail_file: Option<ThumbnailFile>,
    /// The file's local copy was removed. Sticky: later status updates do
    /// not clear it.
    pub removed: bool,
}

impl StatusPatch {
    fn removal(file_id: Option<i64>) -> Self {
        Self {
            file_id,
            download_status: Some(DownloadStatus::Idle),
            transfer_status: Some(TransferStatus::Idle),
            local_path: None,
            completion_date: None,
            downloaded_size: Some(0),
            thumbnail_file: None,
            removed: true,
        }
    }

    fn merge(&mut self, update: FileStatusUpdate) {
        let FileStatusUpdate {
            file_id,
            download_status,
            local_path,
            completion_date,
            downloaded_size,
            transfer_status,
            thumbnail_file,
            ..
        } = update;
        self.file_id = file_id.or(self.file_id);
        self.download_status = download_status.or(self.download_status);
        self.transfer_status = transfer_status.or(self.transfer_status);
        self.local_path = local_path.or(self.local_path.take());
        self.completion_date = completion_date.or(self.completion_date);
        self.downloaded_size = downloaded_size.or(self.downloaded_size);
        self.thumbnail_file = thumbnail_file.or(self.thumbnail_file.take());
    }

    /// Writes the known values over `record`. Fields the patch does not know
    /// keep the fetched value, except that a removal also clears the local
    /// path and completion date unless a newer value arrived since.
    pub fn overlay(&self, record: &mut FileRecord) {
        if let Some(id) = self.file_id {
            record.id = id;
        }
        if let Some(status) = self.download_status {
            record.download_status = status;
        }
        if let Some(status) = self.transfer_status {
            record.transfer_status = status;
        }
        if let Some(size) = self.downloaded_size {
            record.downloaded_size = size;
        }
        if let Some(thumbnail) = &self.thumbnail_file {
            record.thumbnail_file = Some(thumbnail.clone());
        }
        match &self.local_path {
            Some(path) => record.local_path = Some(path.clone()),
            None if self.removed => record.local_path = None,
            None => {}
        }
        match self.completion_date {
            Some(date) => record.completion_date = Some(date),
            None if self.removed => record.completion_date = None,
            None => {}
        }
    }
}

/// Session-wide overlay of push updates keyed by `uniqueId`.
///
/// Entries are never evicted and survive page cache resets; only newer
/// updates for the same file replace their fields.
#[derive(Debug, Clone, Default)]
pub struct PatchTable {
    entries: IndexMap<String, StatusPatch>,
}

impl PatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, update: FileStatusUpdate) {
        if is_blank_unique_id(&update.unique_id) {
            tracing::warn!(file_id = ?update.file_id, "ignoring status update without unique id");
            return;
        }
        tracing::trace!(unique_id = %update.unique_id, removed = update.removed, "applying status update");
        if update.removed {
            let patch = StatusPatch::removal(update.file_id);
            self.entries.insert(update.unique_id, patch);
            return;
        }
        let entry = self.entries.entry(update.unique_id.clone()).or_default();
        entry.merge(update);
    }

    pub fn get(&self, unique_id: &str) -> Option<&StatusPatch> {
        self.entries.get(unique_id)
    }

    pub fn is_removed(&self, unique_id: &str) -> bool {
        self.entries
            .get(unique_id)
            .map(|patch| patch.removed)
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(unique_id: &str) -> FileStatusUpdate {
        FileStatusUpdate {
            unique_id: unique_id.into(),
            ..FileStatusUpdate::default()
        }
    }

    #[test]
    fn later_updates_only_overwrite_specified_fields() {
        let mut table = PatchTable::new();
        table.apply(FileStatusUpdate {
            file_id: Some(3),
            download_status: Some(DownloadStatus::Downloading),
            local_path: Some("/tmp/a.part".into()),
            downloaded_size: Some(10),
            ..update("abc")
        });
        table.apply(FileStatusUpdate {
            downloaded_size: Some(20),
            ..update("abc")
        });
        let patch = table.get("abc").expect("patch");
        assert_eq!(patch.file_id, Some(3));
        assert_eq!(patch.download_status, Some(DownloadStatus::Downloading));
        assert_eq!(patch.local_path.as_deref(), Some("/tmp/a.part"));
        assert_eq!(patch.downloaded_size, Some(20));
    }

    #[test]
    fn removal_resets_entry_and_sticks() {
        let mut table = PatchTable::new();
        table.apply(FileStatusUpdate {
            download_status: Some(DownloadStatus::Completed),
            local_path: Some("/data/a.mp4".into()),
            completion_date: Some(1_700_000_000),
            ..update("abc")
        });
        table.apply(FileStatusUpdate {
            file_id: Some(9),
            removed: true,
            ..update("abc")
        });
        let patch = table.get("abc").expect("patch");
        assert!(patch.removed);
        assert_eq!(patch.file_id, Some(9));
        assert_eq!(patch.download_status, Some(DownloadStatus::Idle));
        assert_eq!(patch.downloaded_size, Some(0));
        assert_eq!(patch.local_path, None);

        table.apply(FileStatusUpdate {
            download_status: Some(DownloadStatus::Downloading),
            ..update("abc")
        });
        assert!(table.is_removed("abc"));
        assert_eq!(
            table.get("abc").and_then(|p| p.download_status),
            Some(DownloadStatus::Downloading)
        );
    }

    #[test]
    fn overlay_prefers_known_values_and_clears_after_removal() {
        let mut record = FileRecord {
            id: 1,
            unique_id: "abc".into(),
            local_path: Some("/data/a.mp4".into()),
            completion_date: Some(5),
            download_status: DownloadStatus::Completed,
            downloaded_size: 100,
            ..FileRecord::default()
        };
        let mut table = PatchTable::new();
        table.apply(FileStatusUpdate {
            file_id: Some(2),
            removed: true,
            ..update("abc")
        });
        table.get("abc").expect("patch").overlay(&mut record);
        assert_eq!(record.id, 2);
        assert_eq!(record.download_status, DownloadStatus::Idle);
        assert_eq!(record.downloaded_size, 0);
        assert_eq!(record.local_path, None);
        assert_eq!(record.completion_date, None);
    }

    #[test]
    fn decodes_push_payload_with_missing_optionals() {
        let raw = r#"{"fileId": 4, "uniqueId": "abc", "downloadStatus": "completed", "downloadedSize": 1000}"#;
        let update: FileStatusUpdate = serde_json::from_str(raw).expect("decode");
        assert_eq!(update.file_id, Some(4));
        assert_eq!(update.download_status, Some(DownloadStatus::Completed));
        assert_eq!(update.local_path, None);
        assert!(!update.removed);
        let encoded = serde_json::to_value(&update).expect("encode");
        assert!(encoded.get("localPath").is_none());
    }

    #[test]
    fn updates_without_unique_id_are_dropped() {
        let mut table = PatchTable::new();
        for unique_id in ["", "  "] {
            table.apply(FileStatusUpdate {
                file_id: Some(1),
                removed: true,
                ..update(unique_id)
            });
        }
        assert!(table.is_empty());
        assert!(!table.is_removed("  "));
    }
}
