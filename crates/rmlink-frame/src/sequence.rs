use std::ops::Range;
use std::sync::{Mutex, PoisonError};

/// Default sequence window.
///
/// The width bounds how many requests may be outstanding at once: an id is
/// reused after `width - 1` allocations.
pub const DEFAULT_SEQUENCE_WINDOW: Range<u16> = 10000..20000;

/// Hands out wrapping 16-bit sequence ids from a fixed window.
///
/// Ids run from `start + 1` to `end - 1` and then wrap, so a window yields
/// `end - start - 1` distinct values before repeating.
#[derive(Debug)]
pub struct SequenceAllocator {
    window: Range<u16>,
    current: Mutex<u16>,
}

impl SequenceAllocator {
    /// Allocator over the default window.
    pub fn new() -> Self {
        Self {
            window: DEFAULT_SEQUENCE_WINDOW,
            current: Mutex::new(DEFAULT_SEQUENCE_WINDOW.start),
        }
    }

    /// Allocator over an explicit window.
    ///
    /// Returns `None` if the window holds fewer than two ids.
    pub fn with_window(window: Range<u16>) -> Option<Self> {
        if window.end <= window.start || window.end - window.start < 2 {
            return None;
        }
        Some(Self {
            current: Mutex::new(window.start),
            window,
        })
    }

    /// Next sequence id.
    pub fn next(&self) -> u16 {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        *current += 1;
        if *current >= self.window.end {
            *current = self.window.start + 1;
        }
        *current
    }

    /// The configured window.
    pub fn window(&self) -> Range<u16> {
        self.window.clone()
    }

    /// Number of distinct ids handed out before wrapping.
    pub fn period(&self) -> usize {
        usize::from(self.window.end - self.window.start) - 1
    }
}

impl Default for SequenceAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use super::*;

    #[test]
    fn default_window_period_is_width_minus_one() {
        let alloc = SequenceAllocator::new();
        let period = alloc.period();
        assert_eq!(period, 9999);

        let mut seen = HashSet::new();
        for _ in 0..period {
            let seq = alloc.next();
            assert!(DEFAULT_SEQUENCE_WINDOW.contains(&seq));
            assert!(seen.insert(seq), "sequence {seq} repeated before wrap");
        }

        let wrapped = alloc.next();
        assert!(seen.contains(&wrapped));
        assert_eq!(wrapped, DEFAULT_SEQUENCE_WINDOW.start + 1);
    }

    #[test]
    fn small_window_wraps() {
        let alloc = SequenceAllocator::with_window(5..8).unwrap();
        let ids: Vec<u16> = (0..5).map(|_| alloc.next()).collect();
        assert_eq!(ids, vec![6, 7, 6, 7, 6]);
    }

    #[test]
    fn degenerate_windows_rejected() {
        assert!(SequenceAllocator::with_window(5..5).is_none());
        assert!(SequenceAllocator::with_window(5..6).is_none());
        assert!(SequenceAllocator::with_window(9..3).is_none());
    }

    #[test]
    fn concurrent_callers_get_distinct_ids() {
        let alloc = Arc::new(SequenceAllocator::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let alloc = Arc::clone(&alloc);
                std::thread::spawn(move || (0..500).map(|_| alloc.next()).collect::<Vec<_>>())
            })
            .collect();

        let mut all = HashSet::new();
        for handle in handles {
            for seq in handle.join().unwrap() {
                assert!(all.insert(seq));
            }
        }
        assert_eq!(all.len(), 4000);
    }
}
