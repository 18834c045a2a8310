use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use crate::error::SyncError;
use crate::files::cache::{FetchTicket, PageCache};
use crate::files::key::{page_key, CollectionScope};
use crate::files::materialize::{materialize, FileListView};
use crate::files::pagination::{has_more, Pagination, PaginationState};
use crate::files::patch::{FileStatusUpdate, PatchTable};
use crate::files::record::{DownloadStatus, FileRecord, Page, TransferStatus};
use crate::filter::FileFilter;

#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldPatch {
    pub tags: Option<String>,
    pub download_status: Option<DownloadStatus>,
    pub transfer_status: Option<TransferStatus>,
    pub local_path: Option<String>,
    pub has_sensitive_content: Option<bool>,
}

impl FieldPatch {
    pub fn tags(tags: impl Into<String>) -> Self {
        Self {
            tags: Some(tags.into()),
            ..Self::default()
        }
    }

    pub fn apply(&self, record: &mut FileRecord) {
        if let Some(tags) = &self.tags {
            record.tags = Some(tags.clone());
        }
        if let Some(status) = self.download_status {
            record.download_status = status;
        }
        if let Some(status) = self.transfer_status {
            record.transfer_status = status;
        }
        if let Some(path) = &self.local_path {
            record.local_path = Some(path.clone());
        }
        if let Some(sensitive) = self.has_sensitive_content {
            record.has_sensitive_content = sensitive;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Appended { page_index: usize, has_more: bool },
    /// The response belonged to an earlier filter epoch and was dropped.
    Stale,
    Failed,
}

/// Sans-I/O engine for one file list. Callers perform the fetches it hands
/// out as [`FetchTicket`]s and report back through [`FileList::complete`].
#[derive(Debug)]
pub struct FileList {
    scope: CollectionScope,
    filter: FileFilter,
    cache: PageCache,
    patches: PatchTable,
    pagination: Pagination,
}

impl FileList {
    pub fn new(scope: CollectionScope, filter: FileFilter, prefetch_threshold: usize) -> Self {
        let filter = Self::scoped_filter(&scope, filter);
        Self {
            scope,
            filter,
            cache: PageCache::new(),
            patches: PatchTable::new(),
            pagination: Pagination::new(prefetch_threshold),
        }
    }

    fn scoped_filter(scope: &CollectionScope, mut filter: FileFilter) -> FileFilter {
        if scope.is_global() && !filter.offline {
            filter.offline = true;
        }
        filter
    }

    pub fn scope(&self) -> &CollectionScope {
        &self.scope
    }

    pub fn filter(&self) -> &FileFilter {
        &self.filter
    }

    pub fn pages(&self) -> &[Page] {
        self.cache.pages()
    }

    pub fn generation(&self) -> u64 {
        self.cache.generation()
    }

    pub fn patches(&self) -> &PatchTable {
        &self.patches
    }

    pub fn state(&self) -> PaginationState {
        self.pagination.state()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.pagination.last_error()
    }

    pub fn is_loading(&self) -> bool {
        self.pagination.is_fetching()
    }

    pub fn has_more(&self) -> bool {
        has_more(self.cache.pages())
    }

    /// Replaces the filter. An equal filter is a no-op; anything else
    /// discards every page and restarts from page 0.
    pub fn set_filter(&mut self, filter: FileFilter) -> bool {
        let filter = Self::scoped_filter(&self.scope, filter);
        if filter == self.filter {
            return false;
        }
        tracing::debug!(chips = ?filter.chips(), "filter changed, resetting file list");
        self.filter = filter;
        self.refresh();
        true
    }

    /// Drops all pages and schedules page 0 again. Patches survive.
    pub fn refresh(&mut self) {
        self.cache.reset();
        self.pagination.reset();
    }

    pub fn next_request(&mut self) -> Option<FetchTicket> {
        if self.pagination.state() != PaginationState::Idle {
            return None;
        }
        let index = self.cache.pending_index()?;
        let previous = index
            .checked_sub(1)
            .and_then(|prev| self.cache.pages().get(prev));
        let key = page_key(&self.scope, &self.filter, index, previous)?;
        let ticket = self.cache.begin(index, key)?;
        self.pagination.start();
        tracing::debug!(
            generation = ticket.generation,
            page = ticket.page_index,
            key = %ticket.key,
            "requesting file page"
        );
        Some(ticket)
    }

    pub fn complete(&mut self, ticket: &FetchTicket, page: Page) -> FetchOutcome {
        if !self.accepts(ticket) {
            return FetchOutcome::Stale;
        }
        let accepted = self.cache.insert(ticket, page);
        let more = self.has_more();
        self.pagination.succeed(more);
        if !accepted {
            tracing::debug!(page = ticket.page_index, "discarding out-of-order page");
            return FetchOutcome::Stale;
        }
        tracing::debug!(
            page = ticket.page_index,
            fetched = self.cache.fetched_count(),
            has_more = more,
            "file page loaded"
        );
        FetchOutcome::Appended {
            page_index: ticket.page_index,
            has_more: more,
        }
    }

    /// Records a failed fetch. The list stays in the error state until
    /// [`FileList::retry`] or a reset.
    pub fn fail(&mut self, ticket: &FetchTicket, err: &SyncError) -> FetchOutcome {
        if !self.accepts(ticket) {
            return FetchOutcome::Stale;
        }
        tracing::warn!(page = ticket.page_index, %err, "file page fetch failed");
        self.pagination.fail(err.to_string());
        FetchOutcome::Failed
    }

    fn accepts(&mut self, ticket: &FetchTicket) -> bool {
        if !self.cache.is_current(ticket) {
            tracing::debug!(
                generation = ticket.generation,
                current = self.cache.generation(),
                page = ticket.page_index,
                "discarding page from superseded filter"
            );
            return false;
        }
        self.cache.finish(ticket);
        true
    }

    pub fn load_more(&mut self) -> Option<FetchTicket> {
        if !self.pagination.can_load_more(self.has_more()) {
            return None;
        }
        if self.cache.pending_index().is_none() {
            self.cache.grow();
        }
        self.next_request()
    }

    /// Scroll signal from the consumer: `last_visible` is the index of the
    /// last row on screen.
    pub fn on_visible(&mut self, last_visible: usize) -> Option<FetchTicket> {
        let len = self.view().len();
        if !self.pagination.is_near_end(last_visible, len) {
            return None;
        }
        self.load_more()
    }

    pub fn retry(&mut self) -> Option<FetchTicket> {
        if self.pagination.state() != PaginationState::Error {
            return None;
        }
        self.pagination.reset();
        self.next_request()
    }

    pub fn apply_delta(&mut self, update: FileStatusUpdate) {
        self.patches.apply(update);
    }

    pub fn apply_local(&mut self, unique_id: &str, patch: &FieldPatch) -> usize {
        self.cache
            .patch_records(unique_id, |record| patch.apply(record))
    }

    pub fn record(&self, unique_id: &str) -> Option<FileRecord> {
        let mut record = self.cache.find(unique_id)?.clone();
        if let Some(patch) = self.patches.get(unique_id) {
            patch.overlay(&mut record);
        }
        Some(record)
    }

    pub fn view(&self) -> FileListView {
        materialize(self.cache.pages(), &self.patches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::parse_query;
    use assert_matches::assert_matches;

    fn file(unique_id: &str) -> FileRecord {
        FileRecord {
            id: 1,
            unique_id: unique_id.into(),
            download_status: DownloadStatus::Downloading,
            ..FileRecord::default()
        }
    }

    fn page(ids: &[&str], count: u64, next: i64) -> Page {
        Page {
            files: ids.iter().map(|id| file(id)).collect(),
            count,
            next_from_message_id: next,
        }
    }

    fn chat_list() -> FileList {
        FileList::new(CollectionScope::chat("1", "2"), FileFilter::default(), 1)
    }

    fn ids(list: &FileList) -> Vec<String> {
        list.view().records().map(|r| r.unique_id.clone()).collect()
    }

    #[test]
    fn load_more_continues_from_previous_cursor() {
        let mut list = chat_list();
        let first = list.next_request().expect("page 0");
        assert_eq!(first.page_index, 0);
        assert!(list.is_loading());
        assert!(list.next_request().is_none());
        assert_matches!(
            list.complete(&first, page(&["a", "b"], 5, 42)),
            FetchOutcome::Appended { page_index: 0, has_more: true }
        );

        let second = list.on_visible(1).expect("near end triggers page 1");
        assert_eq!(second.page_index, 1);
        assert_eq!(second.key.param("fromMessageId"), Some("42"));
        list.complete(&second, page(&["c", "d", "e"], 5, 0));

        assert_eq!(ids(&list), ["a", "b", "c", "d", "e"]);
        assert!(!list.has_more());
        assert_eq!(list.state(), PaginationState::Exhausted);
        assert!(list.load_more().is_none());
    }

    #[test]
    fn far_from_end_does_not_trigger() {
        let mut list = chat_list();
        let first = list.next_request().expect("page 0");
        list.complete(&first, page(&["a", "b", "c", "d", "e"], 10, 7));
        assert!(list.on_visible(2).is_none());
        assert!(list.on_visible(3).is_none());
        assert!(list.on_visible(4).is_some());
    }

    #[test]
    fn filter_change_discards_pages_and_stale_responses() {
        let mut list = chat_list();
        let first = list.next_request().expect("page 0");
        list.complete(&first, page(&["a", "b"], 5, 42));
        let second = list.load_more().expect("page 1");

        assert!(list.set_filter(parse_query("type:video")));
        assert!(list.pages().is_empty());
        assert_eq!(list.state(), PaginationState::Idle);

        assert_eq!(list.complete(&second, page(&["old"], 5, 0)), FetchOutcome::Stale);
        assert!(list.pages().is_empty());

        let fresh = list.next_request().expect("new page 0");
        assert_eq!(fresh.page_index, 0);
        assert_eq!(fresh.key.param("type"), Some("video"));
        list.complete(&fresh, page(&["v1"], 1, 0));
        assert_eq!(ids(&list), ["v1"]);
    }

    #[test]
    fn late_failure_from_superseded_filter_is_ignored() {
        let mut list = chat_list();
        let first = list.next_request().expect("page 0");
        list.complete(&first, page(&["a"], 5, 42));
        let second = list.load_more().expect("page 1");

        assert!(list.set_filter(parse_query("type:audio")));
        let outcome = list.fail(
            &second,
            &SyncError::Status {
                status: 504,
                body: "gateway timeout".into(),
            },
        );
        assert_eq!(outcome, FetchOutcome::Stale);
        assert_eq!(list.state(), PaginationState::Idle);
        assert!(list.last_error().is_none());
        assert!(list.pages().is_empty());

        let fresh = list.next_request().expect("new page 0");
        assert_eq!(fresh.key.param("type"), Some("audio"));
    }

    #[test]
    fn equal_filter_is_ignored() {
        let mut list = chat_list();
        let first = list.next_request().expect("page 0");
        list.complete(&first, page(&["a"], 5, 42));
        assert!(!list.set_filter(FileFilter::default()));
        assert_eq!(list.pages().len(), 1);
    }

    #[test]
    fn failure_stops_pagination_until_retry() {
        let mut list = chat_list();
        let first = list.next_request().expect("page 0");
        list.complete(&first, page(&["a"], 5, 42));
        let second = list.load_more().expect("page 1");
        let outcome = list.fail(
            &second,
            &SyncError::Status {
                status: 502,
                body: "bad gateway".into(),
            },
        );
        assert_eq!(outcome, FetchOutcome::Failed);
        assert_eq!(list.state(), PaginationState::Error);
        assert!(list.last_error().is_some());
        assert!(list.load_more().is_none());
        assert!(list.on_visible(0).is_none());

        let again = list.retry().expect("retry re-requests page 1");
        assert_eq!(again.page_index, 1);
        assert_eq!(again.key, second.key);
    }

    #[test]
    fn push_update_changes_view_without_fetch() {
        let mut list = chat_list();
        let first = list.next_request().expect("page 0");
        list.complete(&first, page(&["abc"], 1, 0));
        list.apply_delta(FileStatusUpdate {
            unique_id: "abc".into(),
            download_status: Some(DownloadStatus::Completed),
            downloaded_size: Some(1000),
            ..FileStatusUpdate::default()
        });
        let view = list.view();
        let abc = view.find("abc").expect("abc");
        assert_eq!(abc.record.download_status, DownloadStatus::Completed);
        assert_eq!(abc.record.downloaded_size, 1000);
        assert!(list.next_request().is_none());
    }

    #[test]
    fn patches_survive_refresh() {
        let mut list = chat_list();
        list.apply_delta(FileStatusUpdate {
            unique_id: "abc".into(),
            file_id: Some(99),
            ..FileStatusUpdate::default()
        });
        list.refresh();
        let first = list.next_request().expect("page 0");
        list.complete(&first, page(&["abc"], 1, 0));
        assert_eq!(list.record("abc").map(|r| r.id), Some(99));
    }

    #[test]
    fn local_edit_rewrites_cached_record() {
        let mut list = chat_list();
        let first = list.next_request().expect("page 0");
        list.complete(&first, page(&["abc", "def"], 2, 0));
        assert_eq!(list.apply_local("abc", &FieldPatch::tags("x,y")), 1);
        assert_eq!(list.apply_local("missing", &FieldPatch::tags("z")), 0);
        assert_eq!(
            list.view().find("abc").and_then(|e| e.record.tags.clone()),
            Some("x,y".to_string())
        );
    }

    #[test]
    fn global_scope_forces_offline() {
        let mut list = FileList::new(CollectionScope::global(), FileFilter::default(), 1);
        assert!(list.filter().offline);
        assert!(!list.set_filter(FileFilter::default()));
        let ticket = list.next_request().expect("page 0");
        assert_eq!(ticket.key.param("offline"), Some("true"));
    }
}
