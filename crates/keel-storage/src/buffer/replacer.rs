//! LRU page replacement policy.
//!
//! The replacer tracks the frames whose pin count has dropped to zero, in
//! the order they were unpinned, and hands the least recently unpinned one
//! back as the eviction victim. Pinned frames and free frames are never
//! tracked; the pool adds a frame on its final unpin and removes it on pin
//! or eviction.

use hashlink::LinkedHashSet;
use parking_lot::Mutex;

use super::frame::FrameId;

/// Strict-LRU victim selection over unpinned frames.
///
/// All operations are O(1) amortized: a linked hash set keeps the recency
/// list and the membership index in one structure. The most recently
/// unpinned frame sits at the back; `victim` pops the front.
///
/// The replacer carries its own latch so it can be consulted while the
/// pool holds its latch (the documented coarse-to-fine order).
pub struct LruReplacer {
    state: Mutex<ReplacerState>,
}

struct ReplacerState {
    capacity: usize,
    queue: LinkedHashSet<FrameId>,
}

impl LruReplacer {
    /// Creates a replacer that tracks at most `capacity` frames.
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(ReplacerState {
                capacity,
                queue: LinkedHashSet::with_capacity(capacity),
            }),
        }
    }

    /// Removes and returns the least recently unpinned frame.
    ///
    /// Returns `None` when no frame is evictable.
    pub fn victim(&self) -> Option<FrameId> {
        self.state.lock().queue.pop_front()
    }

    /// Stops tracking `frame_id`.
    ///
    /// Called when a frame becomes pinned or leaves the cache. No-op if
    /// the frame is not tracked.
    pub fn pin(&self, frame_id: FrameId) {
        self.state.lock().queue.remove(&frame_id);
    }

    /// Starts tracking `frame_id` as the most recently unpinned frame.
    ///
    /// No-op if the frame is already tracked or the replacer is at
    /// capacity; an already-tracked frame keeps its original position.
    pub fn unpin(&self, frame_id: FrameId) {
        let mut state = self.state.lock();
        if state.queue.contains(&frame_id) || state.queue.len() >= state.capacity {
            return;
        }
        state.queue.insert(frame_id);
    }

    /// Returns the number of frames currently tracked.
    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Returns true if no frame is tracked.
    pub fn is_empty(&self) -> bool {
        self.state.lock().queue.is_empty()
    }
}

impl std::fmt::Debug for LruReplacer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("LruReplacer")
            .field("capacity", &state.capacity)
            .field("tracked", &state.queue.len())
            .finish()
    }
}
