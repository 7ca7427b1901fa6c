use std::collections::VecDeque;

/// How many general articles a feed keeps.
pub const NEW_ARTICLES_CAPACITY: usize = 50;
/// How many breaking-news items a feed keeps.
pub const BREAKING_NEWS_CAPACITY: usize = 10;

/// Fixed-capacity, newest-first list of recent items.
///
/// Pushing beyond capacity evicts the oldest item.
#[derive(Debug, Clone)]
pub struct RecentItems<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T: Clone> RecentItems<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, item: T) {
        if self.capacity == 0 {
            return;
        }
        self.items.push_front(item);
        self.items.truncate(self.capacity);
    }

    /// Items newest-first.
    pub fn snapshot(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }

    pub fn newest(&self) -> Option<&T> {
        self.items.front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}
