use std::collections::BTreeSet;

use anyhow::Result;

use crate::model::PageResult;

/// Observable pager state; this is what navigation capsules carry.
#[derive(Debug, Clone, PartialEq)]
pub struct PagerState<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub has_more: bool,
    pub loaded_pages: BTreeSet<u32>,
}

impl<T> Default for PagerState<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            page: 1,
            has_more: true,
            loaded_pages: BTreeSet::new(),
        }
    }
}

/// Handle for one issued page request. Results are applied only while the
/// ticket's generation is current.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    pub page: u32,
    pub generation: u64,
}

/// Incremental loader for one paginated stream. Pages are appended in
/// request order; an empty page ends the stream.
#[derive(Debug)]
pub struct Pager<T> {
    state: PagerState<T>,
    page_size: u32,
    in_flight: Option<Ticket>,
    generation: u64,
    total_hint: Option<u64>,
    last_error: Option<String>,
}

impl<T: Clone> Pager<T> {
    pub fn new(page_size: u32) -> Self {
        Self {
            state: PagerState::default(),
            page_size: page_size.max(1),
            in_flight: None,
            generation: 0,
            total_hint: None,
            last_error: None,
        }
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn state(&self) -> &PagerState<T> {
        &self.state
    }

    pub fn items(&self) -> &[T] {
        &self.state.items
    }

    pub fn page(&self) -> u32 {
        self.state.page
    }

    pub fn has_more(&self) -> bool {
        self.state.has_more
    }

    pub fn is_loading(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Server-reported total. Informational only.
    pub fn total_hint(&self) -> Option<u64> {
        self.total_hint
    }

    /// Claims the current page for fetching. Returns `None` while another
    /// request is outstanding, when the page was already loaded, or once the
    /// stream has ended.
    pub fn begin_fetch(&mut self) -> Option<Ticket> {
        if self.in_flight.is_some()
            || !self.state.has_more
            || self.state.loaded_pages.contains(&self.state.page)
        {
            return None;
        }
        let ticket = Ticket {
            page: self.state.page,
            generation: self.generation,
        };
        self.in_flight = Some(ticket);
        Some(ticket)
    }

    /// Applies a page result. Stale tickets are ignored and reported as
    /// `false`.
    pub fn finish_fetch(&mut self, ticket: Ticket, result: Result<PageResult<T>>) -> bool {
        if self.in_flight != Some(ticket) || ticket.generation != self.generation {
            return false;
        }
        self.in_flight = None;
        match result {
            Ok(page) => {
                self.last_error = None;
                if page.total_count > 0 {
                    self.total_hint = Some(page.total_count);
                }
                self.state.loaded_pages.insert(ticket.page);
                if page.result.is_empty() {
                    self.state.has_more = false;
                } else {
                    self.state.items.extend(page.result);
                }
            }
            Err(err) => {
                self.state.has_more = false;
                self.last_error = Some(format!("{err:#}"));
            }
        }
        true
    }

    /// Moves to the next page once the current one is in. Returns whether the
    /// counter moved.
    pub fn advance_page(&mut self) -> bool {
        let next = self.state.page + 1;
        if self.in_flight.is_some()
            || !self.state.has_more
            || !self.state.loaded_pages.contains(&self.state.page)
            || self.state.loaded_pages.contains(&next)
        {
            return false;
        }
        self.state.page = next;
        true
    }

    /// Back to page one with nothing loaded. Outstanding tickets go stale.
    pub fn reset(&mut self) {
        self.generation += 1;
        self.state = PagerState::default();
        self.in_flight = None;
        self.total_hint = None;
        self.last_error = None;
    }

    /// Re-opens a stream stopped by a failed page so the same page can be
    /// requested again.
    pub fn resume(&mut self) -> bool {
        if self.last_error.take().is_none() || self.in_flight.is_some() {
            return false;
        }
        self.state.has_more = true;
        true
    }

    /// Installs a captured state verbatim. Outstanding tickets go stale.
    pub fn restore(&mut self, state: PagerState<T>) {
        self.generation += 1;
        self.state = state;
        self.in_flight = None;
        self.last_error = None;
    }

    pub fn position<F>(&self, pred: F) -> Option<usize>
    where
        F: Fn(&T) -> bool,
    {
        self.state.items.iter().position(pred)
    }

    pub fn remove_item<F>(&mut self, pred: F) -> Option<(usize, T)>
    where
        F: Fn(&T) -> bool,
    {
        let index = self.position(pred)?;
        Some((index, self.state.items.remove(index)))
    }

    pub fn insert_item(&mut self, index: usize, item: T) {
        let index = index.min(self.state.items.len());
        self.state.items.insert(index, item);
    }

    pub fn update_item<F, U>(&mut self, pred: F, update: U) -> bool
    where
        F: Fn(&T) -> bool,
        U: FnOnce(&mut T),
    {
        match self.state.items.iter_mut().find(|item| pred(item)) {
            Some(item) => {
                update(item);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    fn page(page: u32, ids: std::ops::Range<u32>) -> Result<PageResult<u32>> {
        Ok(PageResult {
            page,
            page_size: 10,
            total_count: 20,
            result: ids.collect(),
        })
    }

    #[test]
    fn second_fetch_while_in_flight_is_refused() {
        let mut pager = Pager::<u32>::new(10);
        let ticket = pager.begin_fetch().unwrap();
        assert!(pager.begin_fetch().is_none());
        assert!(pager.finish_fetch(ticket, page(1, 0..10)));
        assert!(pager.begin_fetch().is_none(), "page 1 is already loaded");
    }

    #[test]
    fn empty_page_ends_stream() {
        let mut pager = Pager::<u32>::new(10);
        for (n, ids) in [(1, 0..10), (2, 10..20), (3, 20..20)] {
            if n > 1 {
                assert!(pager.advance_page());
            }
            let ticket = pager.begin_fetch().unwrap();
            assert_eq!(ticket.page, n);
            pager.finish_fetch(ticket, page(n, ids));
        }
        assert_eq!(pager.items().len(), 20);
        assert!(!pager.has_more());
        assert!(!pager.advance_page());
        assert!(pager.begin_fetch().is_none());
        assert_eq!(pager.page(), 3);
    }

    #[test]
    fn advance_requires_current_page_loaded() {
        let mut pager = Pager::<u32>::new(10);
        assert!(!pager.advance_page());
        let ticket = pager.begin_fetch().unwrap();
        assert!(!pager.advance_page());
        pager.finish_fetch(ticket, page(1, 0..10));
        assert!(pager.advance_page());
        assert!(!pager.advance_page(), "page 2 has not been fetched yet");
    }

    #[test]
    fn stale_tickets_are_ignored_after_reset() {
        let mut pager = Pager::<u32>::new(10);
        let stale = pager.begin_fetch().unwrap();
        pager.reset();
        assert!(!pager.finish_fetch(stale, page(1, 0..10)));
        assert!(pager.items().is_empty());

        let fresh = pager.begin_fetch().unwrap();
        assert_ne!(fresh, stale);
        assert!(pager.finish_fetch(fresh, page(1, 0..3)));
        assert_eq!(pager.items(), &[0, 1, 2]);
    }

    #[test]
    fn failure_stops_and_resume_retries_same_page() {
        let mut pager = Pager::<u32>::new(10);
        let ticket = pager.begin_fetch().unwrap();
        pager.finish_fetch(ticket, Err(anyhow!("offline")));
        assert!(!pager.has_more());
        assert_eq!(pager.last_error(), Some("offline"));
        assert!(pager.begin_fetch().is_none());

        assert!(pager.resume());
        let retry = pager.begin_fetch().unwrap();
        assert_eq!(retry.page, 1);
        assert!(!pager.resume());
    }

    #[test]
    fn restore_installs_state_verbatim() {
        let mut pager = Pager::<u32>::new(10);
        let ticket = pager.begin_fetch().unwrap();
        pager.finish_fetch(ticket, page(1, 0..10));
        pager.advance_page();
        let captured = pager.state().clone();

        let mut other = Pager::<u32>::new(10);
        other.restore(captured.clone());
        assert_eq!(other.state(), &captured);
        assert_eq!(other.begin_fetch().map(|t| t.page), Some(2));
    }

    #[test]
    fn remove_and_reinsert_item() {
        let mut pager = Pager::<u32>::new(10);
        let ticket = pager.begin_fetch().unwrap();
        pager.finish_fetch(ticket, page(1, 0..4));
        let (index, item) = pager.remove_item(|&n| n == 2).unwrap();
        assert_eq!(pager.items(), &[0, 1, 3]);
        pager.insert_item(index, item);
        assert_eq!(pager.items(), &[0, 1, 2, 3]);
        assert!(pager.update_item(|&n| n == 3, |n| *n = 30));
        assert_eq!(pager.items()[3], 30);
    }
}
