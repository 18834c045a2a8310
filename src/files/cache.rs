use std::collections::HashSet;

use crate::files::key::PageKey;
use crate::files::record::{FileRecord, Page};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    pub generation: u64,
    pub page_index: usize,
    pub key: PageKey,
}

#[derive(Debug)]
pub struct PageCache {
    generation: u64,
    pages: Vec<Page>,
    /// Number of pages the consumer wants loaded.
    size: usize,
    in_flight: HashSet<PageKey>,
}

impl Default for PageCache {
    fn default() -> Self {
        Self::new()
    }
}

impl PageCache {
    pub fn new() -> Self {
        Self {
            generation: 0,
            pages: Vec::new(),
            size: 1,
            in_flight: HashSet::new(),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    pub fn last_page(&self) -> Option<&Page> {
        self.pages.last()
    }

    pub fn loaded_pages(&self) -> usize {
        self.pages.len()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn fetched_count(&self) -> usize {
        self.pages.iter().map(|page| page.files.len()).sum()
    }

    pub fn pending_index(&self) -> Option<usize> {
        (self.pages.len() < self.size).then_some(self.pages.len())
    }

    pub fn grow(&mut self) {
        self.size = self.pages.len() + 1;
    }

    pub fn reset(&mut self) {
        self.generation += 1;
        self.pages.clear();
        self.in_flight.clear();
        self.size = 1;
    }

    /// Claims `key` for a new fetch. Returns `None` when the same request is
    /// already in flight.
    pub fn begin(&mut self, page_index: usize, key: PageKey) -> Option<FetchTicket> {
        if !self.in_flight.insert(key.clone()) {
            return None;
        }
        Some(FetchTicket {
            generation: self.generation,
            page_index,
            key,
        })
    }

    pub fn is_current(&self, ticket: &FetchTicket) -> bool {
        ticket.generation == self.generation
    }

    pub fn finish(&mut self, ticket: &FetchTicket) {
        if self.is_current(ticket) {
            self.in_flight.remove(&ticket.key);
        }
    }

    pub fn insert(&mut self, ticket: &FetchTicket, page: Page) -> bool {
        if !self.is_current(ticket) || ticket.page_index != self.pages.len() {
            return false;
        }
        self.pages.push(page);
        true
    }

    pub fn patch_records<F>(&mut self, unique_id: &str, mut apply: F) -> usize
    where
        F: FnMut(&mut FileRecord),
    {
        let mut touched = 0;
        for record in self
            .pages
            .iter_mut()
            .flat_map(|page| page.files.iter_mut())
            .filter(|record| record.unique_id == unique_id)
        {
            apply(record);
            touched += 1;
        }
        touched
    }

    pub fn find(&self, unique_id: &str) -> Option<&FileRecord> {
        self.pages
            .iter()
            .flat_map(|page| page.files.iter())
            .find(|record| record.unique_id == unique_id)
    }
}
