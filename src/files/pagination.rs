use strum::Display;

use crate::files::record::Page;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum PaginationState {
    Idle,
    Fetching,
    Exhausted,
    Error,
}

/// Whether another page may exist beyond `pages`.
///
/// Nothing loaded yet is optimistic. Otherwise the list is complete once
/// either the fetched total reaches the server's count or the last page
/// carries the end cursor; continuing past an end cursor would restart the
/// server scan from the top.
pub fn has_more(pages: &[Page]) -> bool {
    let Some(last) = pages.last() else {
        return true;
    };
    let fetched: u64 = pages.iter().map(|page| page.files.len() as u64).sum();
    last.count > fetched && !last.is_last()
}

#[derive(Debug, Clone)]
pub struct Pagination {
    state: PaginationState,
    last_error: Option<String>,
    prefetch_threshold: usize,
}

impl Pagination {
    pub fn new(prefetch_threshold: usize) -> Self {
        Self {
            state: PaginationState::Idle,
            last_error: None,
            prefetch_threshold,
        }
    }

    pub fn state(&self) -> PaginationState {
        self.state
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn is_fetching(&self) -> bool {
        self.state == PaginationState::Fetching
    }

    /// With a threshold of 1 this fires once the last row is on screen.
    pub fn is_near_end(&self, last_visible: usize, len: usize) -> bool {
        last_visible + self.prefetch_threshold >= len
    }

    pub fn can_load_more(&self, has_more: bool) -> bool {
        self.state == PaginationState::Idle && has_more
    }

    pub fn start(&mut self) {
        self.state = PaginationState::Fetching;
    }

    pub fn succeed(&mut self, has_more: bool) {
        self.last_error = None;
        self.state = if has_more {
            PaginationState::Idle
        } else {
            PaginationState::Exhausted
        };
    }

    pub fn fail(&mut self, message: String) {
        self.last_error = Some(message);
        self.state = PaginationState::Error;
    }

    pub fn reset(&mut self) {
        self.last_error = None;
        self.state = PaginationState::Idle;
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new(1)
    }
}
