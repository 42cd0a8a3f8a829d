//! Track queue and bounded play history for one session.
//!
//! Both structures are plain in-memory data; all synchronization lives in
//! the owning session. The queue is strict FIFO with front insertion (used
//! by `previous` to re-queue the interrupted track); the history is a ring
//! that keeps only the most recently played tracks, oldest evicted first.

use std::collections::VecDeque;

use pmostation::Track;

/// Upcoming tracks, FIFO, unbounded.
#[derive(Clone, Debug, Default)]
pub struct TrackQueue {
    items: VecDeque<Track>,
}

impl TrackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn enqueue(&mut self, track: Track) {
        self.items.push_back(track);
    }

    pub fn enqueue_many<I: IntoIterator<Item = Track>>(&mut self, tracks: I) {
        self.items.extend(tracks);
    }

    /// Insert a track ahead of everything already queued.
    pub fn enqueue_front(&mut self, track: Track) {
        self.items.push_front(track);
    }

    pub fn dequeue(&mut self) -> Option<Track> {
        self.items.pop_front()
    }

    pub fn peek(&self) -> Option<&Track> {
        self.items.front()
    }

    /// Clone out up to `limit` upcoming tracks, in play order.
    pub fn upcoming(&self, limit: usize) -> Vec<Track> {
        self.items.iter().take(limit).cloned().collect()
    }
}

/// Previously played tracks, bounded, most recent last.
#[derive(Clone, Debug)]
pub struct PlayHistory {
    tracks: VecDeque<Track>,
    capacity: usize,
}

impl PlayHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            tracks: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record a played track, evicting the oldest entry when full.
    pub fn push(&mut self, track: Track) {
        while self.tracks.len() >= self.capacity {
            self.tracks.pop_front();
        }
        self.tracks.push_back(track);
    }

    /// Pop the most recently played track (the `previous` operation).
    pub fn pop(&mut self) -> Option<Track> {
        self.tracks.pop_back()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn clear(&mut self) {
        self.tracks.clear();
    }

    /// Clone out the history, oldest first.
    pub fn snapshot(&self) -> Vec<Track> {
        self.tracks.iter().cloned().collect()
    }
}
