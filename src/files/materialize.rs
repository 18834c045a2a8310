use std::collections::HashSet;

use crate::files::patch::PatchTable;
use crate::files::record::{FileRecord, Page};

#[derive(Debug, Clone, PartialEq)]
pub struct FileEntry {
    pub record: FileRecord,
    pub prev: Option<usize>,
    pub next: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileListView {
    entries: Vec<FileEntry>,
}

impl FileListView {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[FileEntry] {
        &self.entries
    }

    pub fn get(&self, index: usize) -> Option<&FileEntry> {
        self.entries.get(index)
    }

    pub fn records(&self) -> impl Iterator<Item = &FileRecord> {
        self.entries.iter().map(|entry| &entry.record)
    }

    pub fn position(&self, unique_id: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.record.unique_id == unique_id)
    }

    pub fn find(&self, unique_id: &str) -> Option<&FileEntry> {
        self.position(unique_id).and_then(|index| self.get(index))
    }

    pub fn prev_of(&self, unique_id: &str) -> Option<&FileEntry> {
        self.find(unique_id)?.prev.and_then(|index| self.get(index))
    }

    pub fn next_of(&self, unique_id: &str) -> Option<&FileEntry> {
        self.find(unique_id)?.next.and_then(|index| self.get(index))
    }
}

/// Flattens `pages` in fetch order and overlays `patches`.
///
/// Files whose message was already gone and whose removal has since been
/// confirmed are dropped, as are files without a `uniqueId`. A `uniqueId`
/// seen twice keeps its first position.
pub fn materialize(pages: &[Page], patches: &PatchTable) -> FileListView {
    let mut seen = HashSet::new();
    let mut entries = Vec::with_capacity(pages.iter().map(|page| page.files.len()).sum());
    for file in pages.iter().flat_map(|page| page.files.iter()) {
        if file.original_deleted && patches.is_removed(&file.unique_id) {
            continue;
        }
        if !file.has_unique_id() {
            tracing::debug!(file_id = file.id, "skipping file without unique id");
            continue;
        }
        if !seen.insert(file.unique_id.as_str()) {
            continue;
        }
        let mut record = file.clone();
        if let Some(patch) = patches.get(&file.unique_id) {
            patch.overlay(&mut record);
        }
        entries.push(FileEntry {
            record,
            prev: None,
            next: None,
        });
    }
    let len = entries.len();
    for (index, entry) in entries.iter_mut().enumerate() {
        entry.prev = index.checked_sub(1);
        entry.next = (index + 1 < len).then_some(index + 1);
    }
    FileListView { entries }
}
