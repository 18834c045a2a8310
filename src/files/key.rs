use std::fmt;

use indexmap::IndexMap;

use crate::files::record::{FileRecord, Page};
use crate::filter::{FileFilter, SortKey};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionScope {
    pub account_id: Option<String>,
    pub chat_id: Option<String>,
    pub message_thread_id: Option<i64>,
    pub link: Option<String>,
}

impl CollectionScope {
    pub fn global() -> Self {
        Self::default()
    }

    pub fn chat(account_id: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            account_id: Some(account_id.into()),
            chat_id: Some(chat_id.into()),
            ..Self::default()
        }
    }

    pub fn with_thread(mut self, message_thread_id: i64) -> Self {
        self.message_thread_id = Some(message_thread_id);
        self
    }

    pub fn with_link(mut self, link: impl Into<String>) -> Self {
        self.link = Some(link.into());
        self
    }

    pub fn is_global(&self) -> bool {
        match (&self.account_id, &self.chat_id) {
            (Some(account), Some(chat)) => account == "-1" && chat == "-1",
            _ => true,
        }
    }

    pub fn collection_path(&self) -> String {
        match (&self.account_id, &self.chat_id) {
            (Some(account), Some(chat)) if !self.is_global() => {
                format!("/telegram/{account}/chat/{chat}/files")
            }
            _ => "/files".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageKey {
    path: String,
    params: Vec<(&'static str, String)>,
}

impl PageKey {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn params(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().map(|(k, v)| (*k, v.as_str()))
    }

    pub fn query_string(&self) -> String {
        self.params
            .iter()
            .map(|(key, value)| format!("{key}={}", urlencoding::encode(value)))
            .collect::<Vec<_>>()
            .join("&")
    }
}

impl fmt::Display for PageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}?{}", self.path, self.query_string())
    }
}

/// Derives the request for `page_index`, or `None` when no request should be
/// made.
///
/// Pages after the first continue from the previous page's cursor, so they
/// need that page; without it (a reset raced an in-flight fetch) there is
/// nothing to request.
pub fn page_key(
    scope: &CollectionScope,
    filter: &FileFilter,
    page_index: usize,
    previous: Option<&Page>,
) -> Option<PageKey> {
    let mut params = filter_params(scope, filter);
    if page_index > 0 {
        let previous = previous?;
        params.insert("fromMessageId", previous.next_from_message_id.to_string());
        if filter.offline {
            if let Some(value) = continuation_sort_value(filter.sort, previous.files.last()) {
                params.insert("fromSortField", value);
            }
        }
    }
    Some(PageKey {
        path: scope.collection_path(),
        params: params.into_iter().collect(),
    })
}

fn filter_params(scope: &CollectionScope, filter: &FileFilter) -> IndexMap<&'static str, String> {
    let mut params = IndexMap::new();
    if !filter.search.is_empty() {
        params.insert("search", filter.search.clone());
    }
    if let Some(category) = filter.category {
        params.insert("type", category.to_string());
    }
    if let Some(status) = filter.download_status {
        params.insert("downloadStatus", status.to_string());
    }
    if let Some(status) = filter.transfer_status {
        params.insert("transferStatus", status.to_string());
    }
    if filter.offline {
        params.insert("offline", "true".to_string());
    }
    if !filter.tags.is_empty() {
        params.insert("tags", filter.tags.join(","));
    }
    if let Some(thread) = scope.message_thread_id.filter(|id| *id != 0) {
        params.insert("messageThreadId", thread.to_string());
    }
    if let Some(link) = scope.link.as_ref().filter(|link| !link.is_empty()) {
        params.insert("link", link.clone());
    }
    if let Some(date_type) = filter.date_type {
        params.insert("dateType", date_type.to_string());
    }
    if let Some(range) = &filter.date_range {
        params.insert("dateRange", range.join(","));
    }
    if let Some([min, max]) = filter.size_range {
        params.insert("sizeRange", format!("{min},{max}"));
    }
    if let Some(unit) = filter.size_unit {
        params.insert("sizeUnit", unit.to_string());
    }
    if let Some(sort) = filter.sort {
        params.insert("sort", sort.to_string());
    }
    if let Some(order) = filter.order {
        params.insert("order", order.to_string());
    }
    params
}

/// The offline index cannot continue a non-default sort from an opaque
/// cursor; it needs the sort column's value at the page boundary.
fn continuation_sort_value(sort: Option<SortKey>, last: Option<&FileRecord>) -> Option<String> {
    let last = last?;
    let value = match sort? {
        SortKey::Size => last.size,
        SortKey::CompletionDate => last.completion_date.unwrap_or_default(),
        SortKey::Date => last.date,
        SortKey::ReactionCount => last.reaction_count,
    };
    Some(value.to_string())
}
