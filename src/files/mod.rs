pub mod cache;
pub mod key;
pub mod list;
pub mod materialize;
pub mod pagination;
pub mod patch;
pub mod record;

pub use cache::{FetchTicket, PageCache};
pub use key::{page_key, CollectionScope, PageKey};
pub use list::{FetchOutcome, FieldPatch, FileList};
pub use materialize::{materialize, FileEntry, FileListView};
pub use pagination::{has_more, Pagination, PaginationState};
pub use patch::{FileStatusUpdate, PatchTable, StatusPatch};
pub use record::{
    DownloadStatus, FileKind, FileRecord, FileRef, Page, ThumbnailFile, TransferStatus, END_CURSOR,
};
