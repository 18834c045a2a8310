use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use serde_json::Value;

use crate::client::{FileApi, PushInbox, PushSender, ReplyRegistry};
use crate::config::AppConfig;
use crate::error::{SyncError, SyncResult};
use crate::files::{
    CollectionScope, FetchOutcome, FetchTicket, FieldPatch, FileList, FileListView, FileRecord,
    FileRef, PaginationState,
};
use crate::filter::FileFilter;

/// Async driver around a shared [`FileList`]. Clones share the same list, so
/// an optimistic edit is visible to readers while its backend write is
/// still pending.
pub struct FileListSession<A> {
    api: Arc<A>,
    list: Arc<Mutex<FileList>>,
    inbox: PushInbox,
}

impl<A> Clone for FileListSession<A> {
    fn clone(&self) -> Self {
        Self {
            api: Arc::clone(&self.api),
            list: Arc::clone(&self.list),
            inbox: self.inbox.clone(),
        }
    }
}

impl<A: FileApi> FileListSession<A> {
    pub fn new(api: A, list: FileList, replies: ReplyRegistry) -> Self {
        Self {
            api: Arc::new(api),
            list: Arc::new(Mutex::new(list)),
            inbox: PushInbox::new(replies),
        }
    }

    pub fn from_config(
        api: A,
        scope: CollectionScope,
        filter: FileFilter,
        config: &AppConfig,
    ) -> Self {
        let list = FileList::new(scope, filter, config.pagination.prefetch_threshold);
        Self::new(api, list, ReplyRegistry::new(config.replies.timeout()))
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    /// Locks the list. Do not hold the guard across an await.
    pub fn list(&self) -> MutexGuard<'_, FileList> {
        self.list.lock()
    }

    pub fn view(&self) -> FileListView {
        self.list.lock().view()
    }

    pub fn state(&self) -> PaginationState {
        self.list.lock().state()
    }

    pub fn is_loading(&self) -> bool {
        self.list.lock().is_loading()
    }

    pub fn push_sender(&self) -> PushSender {
        self.inbox.sender()
    }

    pub fn replies(&self) -> &ReplyRegistry {
        self.inbox.replies()
    }

    fn edit<R>(&self, f: impl FnOnce(&mut FileList) -> R) -> R {
        f(&mut self.list.lock())
    }

    async fn run(&self, ticket: FetchTicket) -> SyncResult<FetchOutcome> {
        let fetched = self.api.fetch_page(&ticket.key).await;
        self.edit(|list| match fetched {
            Ok(page) => Ok(list.complete(&ticket, page)),
            Err(err) => {
                if list.fail(&ticket, &err) == FetchOutcome::Stale {
                    return Ok(FetchOutcome::Stale);
                }
                Err(err)
            }
        })
    }

    async fn run_opt(&self, ticket: Option<FetchTicket>) -> SyncResult<Option<FetchOutcome>> {
        match ticket {
            Some(ticket) => self.run(ticket).await.map(Some),
            None => Ok(None),
        }
    }

    pub async fn fill(&self) -> SyncResult<usize> {
        let mut appended = 0;
        while let Some(ticket) = self.edit(FileList::next_request) {
            if let FetchOutcome::Appended { .. } = self.run(ticket).await? {
                appended += 1;
            }
        }
        Ok(appended)
    }

    pub async fn load_more(&self) -> SyncResult<Option<FetchOutcome>> {
        let ticket = self.edit(FileList::load_more);
        self.run_opt(ticket).await
    }

    pub async fn on_visible(&self, last_visible: usize) -> SyncResult<Option<FetchOutcome>> {
        let ticket = self.edit(|list| list.on_visible(last_visible));
        self.run_opt(ticket).await
    }

    pub async fn retry(&self) -> SyncResult<Option<FetchOutcome>> {
        let ticket = self.edit(FileList::retry);
        self.run_opt(ticket).await
    }

    pub async fn set_filter(&self, filter: FileFilter) -> SyncResult<bool> {
        if !self.edit(|list| list.set_filter(filter)) {
            return Ok(false);
        }
        self.fill().await?;
        Ok(true)
    }

    pub async fn refresh(&self) -> SyncResult<usize> {
        self.edit(FileList::refresh);
        self.fill().await
    }

    pub fn pump(&self) -> usize {
        let updates = self.inbox.drain();
        let count = updates.len();
        if count == 0 {
            return 0;
        }
        self.edit(|list| {
            for update in updates {
                list.apply_delta(update);
            }
        });
        tracing::trace!(count, "applied push updates");
        count
    }

    /// Optimistically applies `patch` to the cached copies of a file, then
    /// writes tag changes to the backend. The local value is kept if the
    /// write fails.
    pub async fn update_field(&self, unique_id: &str, patch: FieldPatch) -> SyncResult<bool> {
        let applied = self.edit(|list| -> SyncResult<Option<FieldPatch>> {
            let record = require(list, unique_id)?;
            let mut patch = patch;
            if patch.tags.as_deref() == Some(record.tags_str()) {
                patch.tags = None;
            }
            if patch == FieldPatch::default() {
                return Ok(None);
            }
            list.apply_local(unique_id, &patch);
            Ok(Some(patch))
        })?;
        let Some(patch) = applied else {
            tracing::debug!(unique_id, "field update changes nothing");
            return Ok(false);
        };
        if let Some(tags) = &patch.tags {
            if let Err(err) = self.api.update_tags(unique_id, tags).await {
                tracing::warn!(unique_id, %err, "tag update failed, keeping local value");
                return Err(err);
            }
        }
        Ok(true)
    }

    pub async fn update_tags_batch(&self, unique_ids: &[&str], tags: &str) -> SyncResult<usize> {
        let refs = self.edit(|list| -> SyncResult<Vec<FileRef>> {
            let refs = unique_ids
                .iter()
                .map(|unique_id| require(list, unique_id).map(|record| record.to_ref()))
                .collect::<SyncResult<Vec<_>>>()?;
            let patch = FieldPatch::tags(tags);
            for unique_id in unique_ids {
                list.apply_local(unique_id, &patch);
            }
            Ok(refs)
        })?;
        if refs.is_empty() {
            return Ok(0);
        }
        self.api.update_tags_batch(&refs, tags).await?;
        Ok(refs.len())
    }

    pub async fn execute_method(&self, method: &str, params: Value) -> SyncResult<Value> {
        let replies = self.inbox.replies();
        replies.execute(self.api.invoke(method, params)).await
    }
}

fn require(list: &FileList, unique_id: &str) -> SyncResult<FileRecord> {
    list.record(unique_id)
        .ok_or_else(|| SyncError::UnknownRecord {
            unique_id: unique_id.to_string(),
        })
}
