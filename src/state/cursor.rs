use std::ops::RangeInclusive;

/// Progress marker for the index page walk
///
/// `last_completed` is the highest page whose processing finished (successfully
/// or recorded as a failed page). Pages are walked in ascending order, so every
/// page between `start_page` and `last_completed` has been handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrawlCursor {
    pub start_page: u32,
    pub end_page: u32,
    pub last_completed: Option<u32>,
}

impl CrawlCursor {
    /// Creates a cursor that has not processed any page yet
    pub fn new(start_page: u32, end_page: u32) -> Self {
        Self {
            start_page,
            end_page,
            last_completed: None,
        }
    }

    /// Resumes from a stored cursor when it describes the same walk
    ///
    /// A stored cursor is reused only if it starts at the same page. The end
    /// bound always comes from the current configuration, so a later run may
    /// extend or shorten the range.
    pub fn resume(stored: Option<CrawlCursor>, start_page: u32, end_page: u32) -> Self {
        match stored {
            Some(cursor) if cursor.start_page == start_page => Self {
                start_page,
                end_page,
                last_completed: cursor.last_completed,
            },
            _ => Self::new(start_page, end_page),
        }
    }

    /// The next page to process, or None when the range is exhausted
    pub fn next_page(&self) -> Option<u32> {
        let next = match self.last_completed {
            Some(last) => last.checked_add(1)?,
            None => self.start_page,
        };
        (next <= self.end_page).then_some(next)
    }

    /// Pages still to be walked, in ascending order
    pub fn remaining(&self) -> RangeInclusive<u32> {
        match self.next_page() {
            Some(next) => next..=self.end_page,
            #[allow(clippy::reversed_empty_ranges)]
            None => 1..=0,
        }
    }

    /// Records that `page` has been handled
    pub fn advance(&mut self, page: u32) {
        self.last_completed = Some(self.last_completed.map_or(page, |last| last.max(page)));
    }

    /// True when every page in range has been handled
    pub fn is_complete(&self) -> bool {
        self.next_page().is_none()
    }
}
