pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod files;
pub mod filter;
pub mod session;
pub mod storage;

pub use client::{FileApi, HttpFileApi, PushInbox, PushSender, ReplyRegistry};
pub use config::{AppConfig, ConfigLoader, ConfigPaths};
pub use error::{SyncError, SyncResult};
pub use files::{CollectionScope, FileList, FileListView, FileRecord, Page};
pub use filter::{parse_query, FileFilter};
pub use session::FileListSession;
