use std::collections::VecDeque;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use clap::{Args, Subcommand};
use parking_lot::Mutex;
use serde_json::Value;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use crate::client::{FileApi, HttpFileApi};
use crate::config::AppConfig;
use crate::error::{SyncError, SyncResult};
use crate::files::{
    CollectionScope, FieldPatch, FileListView, FileRecord, FileRef, Page, PageKey,
};
use crate::filter::{parse_query, FileFilter};
use crate::session::FileListSession;
use crate::storage::PreferenceStore;

#[derive(Args, Debug, Clone, Default)]
pub struct ScopeArgs {
    /// Account owning the chat; omit for the global offline index
    #[arg(long)]
    pub account: Option<String>,
    /// Chat to list files from
    #[arg(long)]
    pub chat: Option<String>,
    /// Narrow to one message thread of the chat
    #[arg(long)]
    pub thread: Option<i64>,
    /// Narrow to files shared through a link
    #[arg(long)]
    pub link: Option<String>,
}

impl ScopeArgs {
    pub fn to_scope(&self) -> CollectionScope {
        let mut scope = match (&self.account, &self.chat) {
            (Some(account), Some(chat)) => CollectionScope::chat(account, chat),
            _ => CollectionScope::global(),
        };
        if let Some(thread) = self.thread {
            scope = scope.with_thread(thread);
        }
        if let Some(link) = &self.link {
            scope = scope.with_link(link);
        }
        scope
    }
}

#[derive(Args, Debug, Clone)]
pub struct ListArgs {
    /// Query terms (supports type:, status:, transfer:, tag:, size:, sent:, sort:, order:, offline)
    #[arg()]
    pub query: Vec<String>,
    /// Number of pages to fetch
    #[arg(long, default_value_t = 1)]
    pub pages: usize,
    /// Remember the query as the default filter
    #[arg(long)]
    pub save: bool,
    #[command(flatten)]
    pub scope: ScopeArgs,
}

#[derive(Args, Debug, Clone)]
pub struct TagArgs {
    /// Unique ids of the files to tag
    #[arg(required = true)]
    pub unique_ids: Vec<String>,
    /// Comma separated tags; an empty string clears them
    #[arg(long)]
    pub tags: String,
    /// Pages to search for the files before giving up
    #[arg(long, default_value_t = 5)]
    pub pages: usize,
    #[command(flatten)]
    pub scope: ScopeArgs,
}

#[derive(Subcommand, Debug, Clone)]
pub enum FilterCommand {
    /// Print the remembered filter
    Show(FilterScopeArgs),
    /// Replace the remembered filter with a query
    Set(FilterSetArgs),
    /// Forget the remembered filter
    Clear,
}

#[derive(Args, Debug, Clone, Default)]
pub struct FilterScopeArgs {
    /// Show the filter as the global view would use it
    #[arg(long)]
    pub global: bool,
}

#[derive(Args, Debug, Clone)]
pub struct FilterSetArgs {
    #[arg(required = true)]
    pub query: Vec<String>,
}

#[derive(Args, Debug, Clone)]
pub struct FilterArgs {
    #[command(subcommand)]
    pub command: FilterCommand,
}

#[derive(Args, Debug, Clone)]
pub struct ReplayArgs {
    /// Page responses in fetch order, one JSON document per file
    #[arg(required = true)]
    pub pages: Vec<PathBuf>,
    /// Push frames to apply after the pages, one JSON document per line
    #[arg(long)]
    pub push_log: Option<PathBuf>,
    /// Query the pages were fetched for
    #[arg(long)]
    pub query: Option<String>,
    #[command(flatten)]
    pub scope: ScopeArgs,
}

pub async fn list_files(
    config: Arc<AppConfig>,
    store: PreferenceStore,
    args: ListArgs,
) -> Result<()> {
    let scope = args.scope.to_scope();
    let filter = resolve_filter(&config, &store, &args.query, scope.is_global())?;
    if args.save {
        store
            .save_filter(&config.filters.preference_key, &filter)
            .context("saving filter")?;
    }
    let api = HttpFileApi::new(&config.server).context("building HTTP client")?;
    let output = run_list(api, scope, filter, args.pages, &config).await?;
    print!("{output}");
    Ok(())
}

fn resolve_filter(
    config: &AppConfig,
    store: &PreferenceStore,
    query: &[String],
    global_scope: bool,
) -> Result<FileFilter> {
    let raw = query.join(" ");
    if raw.trim().is_empty() {
        return store.load_filter(
            &config.filters.preference_key,
            global_scope,
            config.filters.default_type,
        );
    }
    Ok(parse_query(raw.trim()))
}

async fn run_list<A: FileApi>(
    api: A,
    scope: CollectionScope,
    filter: FileFilter,
    pages: usize,
    config: &AppConfig,
) -> Result<String> {
    let session = FileListSession::from_config(api, scope, filter, config);
    load_pages(&session, pages)
        .await
        .context("fetching file pages")?;
    Ok(format_list(&session))
}

async fn load_pages<A: FileApi>(session: &FileListSession<A>, pages: usize) -> SyncResult<()> {
    session.fill().await?;
    for _ in 1..pages.max(1) {
        let more = session.list().has_more();
        if !more {
            break;
        }
        session.load_more().await?;
    }
    Ok(())
}

pub async fn tag_files(config: Arc<AppConfig>, store: PreferenceStore, args: TagArgs) -> Result<()> {
    let scope = args.scope.to_scope();
    let filter = store.load_filter(
        &config.filters.preference_key,
        scope.is_global(),
        config.filters.default_type,
    )?;
    let api = HttpFileApi::new(&config.server).context("building HTTP client")?;
    let output = run_tag(api, scope, filter, &args, &config).await?;
    print!("{output}");
    Ok(())
}

async fn run_tag<A: FileApi>(
    api: A,
    scope: CollectionScope,
    filter: FileFilter,
    args: &TagArgs,
    config: &AppConfig,
) -> Result<String> {
    let tags = args.tags.trim();
    let session = FileListSession::from_config(api, scope, filter, config);
    session.fill().await.context("fetching file pages")?;
    let mut searched = 1;
    while searched < args.pages.max(1) && needs_more(&session, &args.unique_ids) {
        session.load_more().await.context("fetching file pages")?;
        searched += 1;
    }

    let mut out = String::new();
    if let [unique_id] = args.unique_ids.as_slice() {
        let changed = session
            .update_field(unique_id, FieldPatch::tags(tags))
            .await
            .with_context(|| format!("tagging {unique_id}"))?;
        if changed {
            let _ = writeln!(&mut out, "Tagged {unique_id} with '{tags}'");
        } else {
            let _ = writeln!(&mut out, "{unique_id} already has tags '{tags}'");
        }
    } else {
        let ids: Vec<&str> = args.unique_ids.iter().map(String::as_str).collect();
        let count = session
            .update_tags_batch(&ids, tags)
            .await
            .context("tagging files")?;
        let _ = writeln!(
            &mut out,
            "Tagged {count} file{} with '{tags}'",
            if count == 1 { "" } else { "s" }
        );
    }
    Ok(out)
}

/// True while some requested file is not loaded yet and more pages exist.
fn needs_more<A: FileApi>(session: &FileListSession<A>, unique_ids: &[String]) -> bool {
    let list = session.list();
    list.has_more() && unique_ids.iter().any(|id| list.record(id).is_none())
}

pub fn handle_filter_command(
    config: Arc<AppConfig>,
    store: PreferenceStore,
    args: FilterArgs,
) -> Result<()> {
    let output = run_filter(&config, &store, args.command)?;
    print!("{output}");
    Ok(())
}

fn run_filter(config: &AppConfig, store: &PreferenceStore, command: FilterCommand) -> Result<String> {
    let key = &config.filters.preference_key;
    match command {
        FilterCommand::Show(args) => {
            let filter = store.load_filter(key, args.global, config.filters.default_type)?;
            let mut out = format_filter(&filter);
            if let Some(saved_at) = store.updated_at(key)? {
                let _ = writeln!(&mut out, "saved {}", format_timestamp(saved_at));
            }
            Ok(out)
        }
        FilterCommand::Set(args) => {
            let raw = args.query.join(" ");
            if raw.trim().is_empty() {
                bail!("filter query cannot be empty");
            }
            let filter = parse_query(raw.trim());
            store.save_filter(key, &filter).context("saving filter")?;
            Ok(format!("Saved filter\n{}", format_filter(&filter)))
        }
        FilterCommand::Clear => {
            if store.clear_filter(key).context("clearing filter")? {
                Ok("Cleared saved filter\n".to_string())
            } else {
                Ok("No saved filter\n".to_string())
            }
        }
    }
}

pub async fn replay(config: Arc<AppConfig>, args: ReplayArgs) -> Result<()> {
    let output = run_replay(&config, &args).await?;
    print!("{output}");
    Ok(())
}

async fn run_replay(config: &AppConfig, args: &ReplayArgs) -> Result<String> {
    let mut pages = VecDeque::with_capacity(args.pages.len());
    for path in &args.pages {
        pages.push_back(read_page(path)?);
    }
    let total = pages.len();
    let filter = args
        .query
        .as_deref()
        .map(parse_query)
        .unwrap_or_default();
    let api = ReplayApi {
        pages: Mutex::new(pages),
    };
    let session = FileListSession::from_config(api, args.scope.to_scope(), filter, config);
    load_pages(&session, total)
        .await
        .context("replaying pages")?;

    if let Some(path) = &args.push_log {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading push log {}", path.display()))?;
        let sender = session.push_sender();
        let mut routed = 0;
        for line in raw.lines().filter(|line| !line.trim().is_empty()) {
            if sender.route_text(line) {
                routed += 1;
            }
        }
        let applied = session.pump();
        tracing::info!(routed, applied, "push log replayed");
    }
    Ok(format_list(&session))
}

fn read_page(path: &Path) -> Result<Page> {
    let raw = fs::read_to_string(path).with_context(|| format!("reading page {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing page {}", path.display()))
}

/// Serves recorded pages in order; writes stay local.
struct ReplayApi {
    pages: Mutex<VecDeque<Page>>,
}

#[async_trait]
impl FileApi for ReplayApi {
    async fn fetch_page(&self, key: &PageKey) -> SyncResult<Page> {
        tracing::debug!(%key, "serving recorded page");
        Ok(self.pages.lock().pop_front().unwrap_or_default())
    }

    async fn update_tags(&self, _unique_id: &str, _tags: &str) -> SyncResult<()> {
        Ok(())
    }

    async fn update_tags_batch(&self, _files: &[FileRef], _tags: &str) -> SyncResult<()> {
        Ok(())
    }

    async fn invoke(&self, method: &str, _params: Value) -> SyncResult<String> {
        Err(SyncError::Status {
            status: 501,
            body: format!("{method} is unavailable while replaying"),
        })
    }
}

fn format_list<A: FileApi>(session: &FileListSession<A>) -> String {
    let list = session.list();
    let view = list.view();
    let mut out = String::new();
    let chips = list.filter().chips();
    let _ = writeln!(
        &mut out,
        "{}  [{}]  {} file{}{}",
        list.scope().collection_path(),
        if chips.is_empty() {
            "all".to_string()
        } else {
            chips.join(" ")
        },
        view.len(),
        if view.len() == 1 { "" } else { "s" },
        if list.has_more() { ", more available" } else { "" }
    );
    if let Some(err) = list.last_error() {
        let _ = writeln!(&mut out, "error: {err}");
    }
    out.push_str(&format_view(&view));
    out
}

fn format_view(view: &FileListView) -> String {
    if view.is_empty() {
        return "No files.\n".to_string();
    }
    let mut out = String::new();
    for (index, entry) in view.entries().iter().enumerate() {
        let record = &entry.record;
        let _ = writeln!(
            &mut out,
            "{index:>4}  {}  {}",
            record.display_name(),
            format_status(record)
        );
        let _ = writeln!(
            &mut out,
            "      {} {}  {}",
            record.kind,
            format_size(record.size),
            format_timestamp(record.date)
        );
        if !record.tags_str().is_empty() {
            let _ = writeln!(&mut out, "      tags {}", format_tags(record.tags_str()));
        }
        if let Some(path) = &record.local_path {
            let _ = writeln!(&mut out, "      at   {path}");
        }
        let neighbour = |index: Option<usize>| {
            index
                .and_then(|index| view.get(index))
                .map(|entry| entry.record.display_name().to_string())
                .unwrap_or_else(|| "-".to_string())
        };
        let _ = writeln!(
            &mut out,
            "      prev {}  next {}",
            neighbour(entry.prev),
            neighbour(entry.next)
        );
    }
    out
}

fn format_status(record: &FileRecord) -> String {
    let mut status = record.download_status.to_string();
    if record.size > 0 && record.downloaded_size > 0 && record.downloaded_size < record.size {
        let percent = record.downloaded_size * 100 / record.size;
        status.push_str(&format!(" {percent}%"));
    }
    if record.transfer_status != Default::default() {
        status.push_str(&format!(" / transfer {}", record.transfer_status));
    }
    status
}

fn format_size(bytes: i64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes.max(0) as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

fn format_tags(tags: &str) -> String {
    crate::filter::split_tags(tags)
        .iter()
        .map(|tag| format!("#{tag}"))
        .collect::<Vec<_>>()
        .join(" ")
}

fn format_timestamp(epoch: i64) -> String {
    OffsetDateTime::from_unix_timestamp(epoch)
        .map(|dt| dt.format(&Rfc3339).unwrap_or_else(|_| epoch.to_string()))
        .unwrap_or_else(|_| epoch.to_string())
}

fn format_filter(filter: &FileFilter) -> String {
    let mut out = String::new();
    let chips = filter.chips();
    if chips.is_empty() {
        out.push_str("(no filters)\n");
    } else {
        for chip in chips {
            let _ = writeln!(&mut out, "- {chip}");
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::temp_paths;
    use crate::config::StorageOptions;
    use crate::session::tests::{file, page, FakeApi};
    use crate::storage;
    use serde_json::json;
    use tempfile::TempDir;

    type TestResult<T = ()> = Result<T>;

    fn setup_store() -> TestResult<(TempDir, PreferenceStore)> {
        let temp = TempDir::new()?;
        let paths = temp_paths(&temp);
        paths.ensure_directories()?;
        let options = StorageOptions {
            preferences_path: paths.preferences_path.clone(),
            ..StorageOptions::default()
        };
        let store = storage::init(&paths, &options)?;
        Ok((temp, store))
    }

    fn chat_scope() -> ScopeArgs {
        ScopeArgs {
            account: Some("1".into()),
            chat: Some("2".into()),
            ..ScopeArgs::default()
        }
    }

    #[test]
    fn scope_args_map_to_collection() {
        assert!(ScopeArgs::default().to_scope().is_global());
        let scope = ScopeArgs {
            thread: Some(4),
            ..chat_scope()
        }
        .to_scope();
        assert_eq!(scope.collection_path(), "/telegram/1/chat/2/files");
        assert_eq!(scope.message_thread_id, Some(4));
    }

    #[tokio::test]
    async fn cli_list_prints_pages_and_more_marker() -> TestResult {
        let mut named = file("abc", Some("trip,beach"));
        named.file_name = Some("sunset.jpg".into());
        named.size = 2048;
        let api = FakeApi::with_pages([
            Ok(page(vec![named], 3, 7)),
            Ok(page(vec![file("def", None)], 3, 5)),
        ]);
        let output = run_list(
            api,
            chat_scope().to_scope(),
            parse_query("type:photo"),
            2,
            &AppConfig::default(),
        )
        .await?;
        assert!(output.contains("/telegram/1/chat/2/files  [type:photo]  2 files, more available"));
        assert!(output.contains("sunset.jpg"));
        assert!(output.contains("2.0 KB"));
        assert!(output.contains("#trip #beach"));
        assert!(output.contains("prev sunset.jpg  next -"));
        Ok(())
    }

    #[tokio::test]
    async fn cli_list_reports_fetch_failure() {
        let api = FakeApi::with_pages([Err(500)]);
        let err = run_list(
            api,
            CollectionScope::global(),
            FileFilter::default(),
            1,
            &AppConfig::default(),
        )
        .await
        .expect_err("server error");
        assert!(format!("{err:#}").contains("fetching file pages"));
    }

    #[tokio::test]
    async fn cli_tag_single_and_batch() -> TestResult {
        let args = TagArgs {
            unique_ids: vec!["abc".into()],
            tags: " x,y ".into(),
            pages: 1,
            scope: chat_scope(),
        };
        let api = FakeApi::with_pages([Ok(page(vec![file("abc", None)], 1, 0))]);
        let output = run_tag(
            api,
            args.scope.to_scope(),
            FileFilter::default(),
            &args,
            &AppConfig::default(),
        )
        .await?;
        assert_eq!(output, "Tagged abc with 'x,y'\n");

        let args = TagArgs {
            unique_ids: vec!["a".into(), "b".into()],
            ..args
        };
        let api = FakeApi::with_pages([
            Ok(page(vec![file("a", None)], 2, 9)),
            Ok(page(vec![file("b", None)], 2, 0)),
        ]);
        let args = TagArgs { pages: 2, ..args };
        let output = run_tag(
            api,
            args.scope.to_scope(),
            FileFilter::default(),
            &args,
            &AppConfig::default(),
        )
        .await?;
        assert_eq!(output, "Tagged 2 files with 'x,y'\n");
        Ok(())
    }

    #[test]
    fn cli_filter_set_show_clear() -> TestResult {
        let (_temp, store) = setup_store()?;
        let config = AppConfig::default();
        let shown = run_filter(
            &config,
            &store,
            FilterCommand::Show(FilterScopeArgs::default()),
        )?;
        assert_eq!(shown, "- type:media\n");

        let saved = run_filter(
            &config,
            &store,
            FilterCommand::Set(FilterSetArgs {
                query: vec!["type:video".into(), "tag:trip".into()],
            }),
        )?;
        assert!(saved.starts_with("Saved filter"));
        let shown = run_filter(
            &config,
            &store,
            FilterCommand::Show(FilterScopeArgs::default()),
        )?;
        assert!(shown.starts_with("- type:video\n- tag:trip\nsaved "), "{shown}");

        assert_eq!(
            run_filter(&config, &store, FilterCommand::Clear)?,
            "Cleared saved filter\n"
        );
        assert_eq!(
            run_filter(&config, &store, FilterCommand::Clear)?,
            "No saved filter\n"
        );
        Ok(())
    }

    #[tokio::test]
    async fn cli_replay_applies_push_log() -> TestResult {
        let temp = TempDir::new()?;
        let first = temp.path().join("page0.json");
        let second = temp.path().join("page1.json");
        fs::write(
            &first,
            json!({
                "files": [{"id": 1, "uniqueId": "abc", "size": 100}],
                "count": 2,
                "nextFromMessageId": 11
            })
            .to_string(),
        )?;
        fs::write(
            &second,
            json!({
                "files": [{"id": 2, "uniqueId": "def", "originalDeleted": true}],
                "count": 2,
                "nextFromMessageId": 0
            })
            .to_string(),
        )?;
        let log = temp.path().join("push.jsonl");
        let frames = [
            json!({"type": "FILE_STATUS", "data": {"uniqueId": "abc", "downloadStatus": "completed", "localPath": "/dl/abc"}}),
            json!({"type": "FILE_STATUS", "data": {"uniqueId": "def", "removed": true}}),
        ];
        let body: Vec<String> = frames.iter().map(Value::to_string).collect();
        fs::write(&log, body.join("\n"))?;

        let args = ReplayArgs {
            pages: vec![first, second],
            push_log: Some(log),
            query: None,
            scope: chat_scope(),
        };
        let output = run_replay(&AppConfig::default(), &args).await?;
        assert!(output.contains("1 file\n"), "{output}");
        assert!(output.contains("at   /dl/abc"));
        assert!(!output.contains("def"));
        Ok(())
    }

    #[test]
    fn sizes_are_humanised() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(3 * 1024 * 1024 * 1024), "3.0 GB");
    }
}
