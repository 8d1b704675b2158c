//! Local fallback playlist.

use rand::RngExt;
use tracing::debug;

/// Ordered list of local fallback media URIs plus the index currently on
/// screen. Selection is uniform-random; with two or more items a new
/// selection never repeats the current index.
#[derive(Debug, Clone, Default)]
pub struct FallbackPlaylist {
    items: Vec<String>,
    current_index: Option<usize>,
}

impl FallbackPlaylist {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_items(items: Vec<String>) -> Self {
        Self { items, current_index: None }
    }

    /// Replace the list. The current index is cleared unless the item on
    /// screen survived the update, so an in-flight playback is not
    /// interrupted by a list refresh.
    pub fn replace(&mut self, items: Vec<String>) {
        let current_uri = self.current().map(String::from);
        self.current_index = current_uri.and_then(|uri| items.iter().position(|i| *i == uri));
        debug!(count = items.len(), "Fallback playlist replaced");
        self.items = items;
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// URI currently selected, if any.
    #[must_use]
    pub fn current(&self) -> Option<&str> {
        self.current_index.and_then(|i| self.items.get(i)).map(String::as_str)
    }

    /// Select the next item uniformly at random and make it current.
    ///
    /// With `exclude_current` and at least two items, resamples until the
    /// choice differs from the current index. Returns `None` on an empty
    /// list; the caller is expected to request a fresh list upstream
    /// rather than block.
    pub fn next(&mut self, exclude_current: bool) -> Option<String> {
        if self.items.is_empty() {
            return None;
        }

        let index = if self.items.len() == 1 {
            0
        } else {
            let mut rng = rand::rng();
            loop {
                let candidate = rng.random_range(0..self.items.len());
                if !exclude_current || Some(candidate) != self.current_index {
                    break candidate;
                }
            }
        };

        self.current_index = Some(index);
        Some(self.items[index].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn playlist(n: usize) -> FallbackPlaylist {
        FallbackPlaylist::from_items((0..n).map(|i| format!("video-{i}.mp4")).collect())
    }

    #[test]
    fn empty_list_yields_none() {
        let mut p = FallbackPlaylist::new();
        assert!(p.next(true).is_none());
        assert!(p.current().is_none());
    }

    #[test]
    fn single_item_repeats() {
        let mut p = playlist(1);
        assert_eq!(p.next(true).as_deref(), Some("video-0.mp4"));
        assert_eq!(p.next(true).as_deref(), Some("video-0.mp4"));
    }

    #[test]
    fn consecutive_selections_never_repeat() {
        let mut p = playlist(2);
        let mut last = p.next(true);
        for _ in 0..200 {
            let next = p.next(true);
            assert_ne!(next, last, "consecutive selection repeated");
            last = next;
        }
    }

    #[test]
    fn non_excluding_selection_allows_repeat() {
        let mut p = playlist(3);
        p.next(false);
        // Without exclusion every index stays reachable; just confirm the
        // call keeps producing valid items.
        for _ in 0..20 {
            assert!(p.next(false).is_some());
        }
    }

    #[test]
    fn replace_preserves_surviving_current() {
        let mut p = playlist(3);
        // Force a known current item.
        while p.current() != Some("video-1.mp4") {
            p.next(false);
        }
        p.replace(vec!["video-9.mp4".to_string(), "video-1.mp4".to_string()]);
        assert_eq!(p.current(), Some("video-1.mp4"));

        p.replace(vec!["other.mp4".to_string()]);
        assert!(p.current().is_none());
    }
}
