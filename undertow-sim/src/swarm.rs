//! Piece availability and fetch ordering for one simulated container
//!
//! A swarm tracks which pieces are complete and which readers are
//! interested in which bytes. Completions are broadcast through a watch
//! channel so readers can suspend until the piece under their cursor lands.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::content::ContentSource;
use crate::manifest::Manifest;

/// Fetch hints registered by one open reader.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReaderInterest {
    /// Absolute container offset of the reader's cursor.
    pub position: u64,
    /// Bytes past the cursor the reader wants in flight.
    pub readahead: u64,
    /// Cursor pieces take precedence over index order.
    pub responsive: bool,
}

/// Chooses the next piece to complete.
///
/// Responsive readers come first: the first incomplete piece inside
/// `[position, position + readahead]`. Then each other reader's next
/// incomplete piece at or after its cursor. Otherwise the lowest incomplete
/// piece.
pub fn pick_piece(
    manifest: &Manifest,
    completed: &[bool],
    interests: &[ReaderInterest],
) -> Option<u32> {
    let piece_count = manifest.piece_count();
    let total = manifest.total_length;
    let incomplete = |index: &u32| !completed[*index as usize];

    for interest in interests
        .iter()
        .filter(|i| i.responsive && i.position < total)
    {
        let first = manifest.piece_at(interest.position);
        let last_byte = interest
            .position
            .saturating_add(interest.readahead)
            .min(total - 1);
        let last = manifest.piece_at(last_byte);

        if let Some(index) = (first..=last).find(incomplete) {
            return Some(index);
        }
    }

    for interest in interests
        .iter()
        .filter(|i| !i.responsive && i.position < total)
    {
        let first = manifest.piece_at(interest.position);
        if let Some(index) = (first..piece_count).find(incomplete) {
            return Some(index);
        }
    }

    (0..piece_count).find(incomplete)
}

struct SwarmState {
    completed: Vec<bool>,
    completed_pieces: u32,
    completed_bytes: u64,
    interests: BTreeMap<u64, ReaderInterest>,
    next_reader: u64,
    closed: bool,
}

/// Availability state shared by a handle, its driver and its readers.
pub struct Swarm {
    manifest: Arc<Manifest>,
    content: Arc<dyn ContentSource>,
    state: Mutex<SwarmState>,
    progress: watch::Sender<u32>,
}

impl Swarm {
    pub fn new(manifest: Arc<Manifest>, content: Arc<dyn ContentSource>) -> Self {
        let piece_count = manifest.piece_count() as usize;
        Self {
            manifest,
            content,
            state: Mutex::new(SwarmState {
                completed: vec![false; piece_count],
                completed_pieces: 0,
                completed_bytes: 0,
                interests: BTreeMap::new(),
                next_reader: 0,
                closed: false,
            }),
            progress: watch::Sender::new(0),
        }
    }

    pub fn manifest(&self) -> &Arc<Manifest> {
        &self.manifest
    }

    pub fn content(&self) -> &Arc<dyn ContentSource> {
        &self.content
    }

    pub fn completed_bytes(&self) -> u64 {
        self.state.lock().completed_bytes
    }

    pub fn completed_pieces(&self) -> u32 {
        self.state.lock().completed_pieces
    }

    pub fn is_piece_complete(&self, index: u32) -> bool {
        self.state
            .lock()
            .completed
            .get(index as usize)
            .copied()
            .unwrap_or(false)
    }

    pub fn is_complete(&self) -> bool {
        self.state.lock().completed_pieces == self.manifest.piece_count()
    }

    /// Marks a piece complete and wakes waiting readers. Returns false if
    /// the index is out of range or the piece was already complete.
    pub fn complete_piece(&self, index: u32) -> bool {
        let newly_completed = {
            let mut state = self.state.lock();
            match state.completed.get_mut(index as usize) {
                Some(done) if !*done => {
                    *done = true;
                    let (start, end) = self.manifest.piece_range(index);
                    state.completed_pieces += 1;
                    state.completed_bytes += end - start;
                    true
                }
                _ => false,
            }
        };

        if newly_completed {
            tracing::trace!("Piece {} of {} complete", index, self.manifest.name);
            self.progress.send_modify(|pieces| *pieces += 1);
        }
        newly_completed
    }

    pub fn complete_all(&self) {
        for index in 0..self.manifest.piece_count() {
            self.complete_piece(index);
        }
    }

    /// Next piece the driver should complete.
    pub fn next_piece(&self) -> Option<u32> {
        let state = self.state.lock();
        let interests: Vec<ReaderInterest> = state.interests.values().copied().collect();
        pick_piece(&self.manifest, &state.completed, &interests)
    }

    pub fn subscribe(&self) -> watch::Receiver<u32> {
        self.progress.subscribe()
    }

    pub(crate) fn register_reader(&self) -> u64 {
        let mut state = self.state.lock();
        let id = state.next_reader;
        state.next_reader += 1;
        state.interests.insert(id, ReaderInterest::default());
        id
    }

    pub(crate) fn update_interest(&self, id: u64, update: impl FnOnce(&mut ReaderInterest)) {
        if let Some(interest) = self.state.lock().interests.get_mut(&id) {
            update(interest);
        }
    }

    pub(crate) fn remove_reader(&self, id: u64) {
        self.state.lock().interests.remove(&id);
    }

    /// Number of readers currently registered.
    pub fn reader_count(&self) -> usize {
        self.state.lock().interests.len()
    }

    /// Stops the swarm; waiting readers wake up and fail.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.progress.send_modify(|_| {});
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

/// Completes pieces at `rate` bytes per second until the swarm is complete
/// or closed.
pub(crate) fn spawn_driver(swarm: Arc<Swarm>, rate: u64, tick: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let per_tick = (u128::from(rate) * tick.as_millis() / 1000).max(1) as u64;
        let mut budget = 0u64;

        loop {
            ticker.tick().await;
            if swarm.is_closed() || swarm.is_complete() {
                break;
            }

            budget = budget.saturating_add(per_tick);
            while let Some(index) = swarm.next_piece() {
                let (start, end) = swarm.manifest().piece_range(index);
                if budget < end - start {
                    break;
                }
                budget -= end - start;
                swarm.complete_piece(index);
            }
        }

        tracing::debug!("Driver for {} finished", swarm.manifest().name);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::SyntheticContent;
    use crate::manifest::ManifestBuilder;

    fn manifest(length: u64, piece_length: u64) -> Arc<Manifest> {
        let bytes = ManifestBuilder::single_file("movie.mkv", length)
            .piece_length(piece_length)
            .build();
        Arc::new(Manifest::from_bytes(&bytes).unwrap())
    }

    fn swarm(length: u64, piece_length: u64) -> Arc<Swarm> {
        let manifest = manifest(length, piece_length);
        let content = Arc::new(SyntheticContent::new(0, &manifest));
        Arc::new(Swarm::new(manifest, content))
    }

    #[test]
    fn test_pick_lowest_without_readers() {
        let manifest = manifest(1000, 100);
        let mut completed = vec![false; 10];
        completed[0] = true;

        assert_eq!(pick_piece(&manifest, &completed, &[]), Some(1));
        assert_eq!(pick_piece(&manifest, &[true; 10], &[]), None);
    }

    #[test]
    fn test_pick_responsive_window_first() {
        let manifest = manifest(1000, 100);
        let completed = vec![false; 10];
        let sequential = ReaderInterest {
            position: 0,
            readahead: 0,
            responsive: false,
        };
        let responsive = ReaderInterest {
            position: 650,
            readahead: 200,
            responsive: true,
        };

        assert_eq!(
            pick_piece(&manifest, &completed, &[sequential, responsive]),
            Some(6)
        );
    }

    #[test]
    fn test_pick_skips_completed_window_pieces() {
        let manifest = manifest(1000, 100);
        let mut completed = vec![false; 10];
        completed[6] = true;
        completed[7] = true;
        let responsive = ReaderInterest {
            position: 650,
            readahead: 200,
            responsive: true,
        };

        assert_eq!(pick_piece(&manifest, &completed, &[responsive]), Some(8));

        completed[8] = true;
        // Window exhausted: fall back to index order.
        assert_eq!(pick_piece(&manifest, &completed, &[responsive]), Some(0));
    }

    #[test]
    fn test_pick_follows_sequential_cursor() {
        let manifest = manifest(1000, 100);
        let mut completed = vec![false; 10];
        completed[3] = true;
        let reader = ReaderInterest {
            position: 310,
            readahead: 0,
            responsive: false,
        };

        assert_eq!(pick_piece(&manifest, &completed, &[reader]), Some(4));
    }

    #[test]
    fn test_completion_counts_short_last_piece() {
        let swarm = swarm(250, 100);

        assert!(swarm.complete_piece(2));
        assert!(!swarm.complete_piece(2));
        assert!(!swarm.complete_piece(9));
        assert_eq!(swarm.completed_bytes(), 50);

        swarm.complete_all();
        assert_eq!(swarm.completed_bytes(), 250);
        assert!(swarm.is_complete());
    }

    #[test]
    fn test_reader_interests_drive_next_piece() {
        let swarm = swarm(1000, 100);
        let id = swarm.register_reader();
        swarm.update_interest(id, |interest| {
            interest.responsive = true;
            interest.position = 420;
        });

        assert_eq!(swarm.next_piece(), Some(4));

        swarm.remove_reader(id);
        assert_eq!(swarm.reader_count(), 0);
        assert_eq!(swarm.next_piece(), Some(0));
    }

    proptest::proptest! {
        #[test]
        fn prop_picked_piece_is_incomplete(
            completed in proptest::collection::vec(proptest::bool::ANY, 10),
            position in 0u64..1200,
            readahead in 0u64..500,
            responsive in proptest::bool::ANY,
        ) {
            let manifest = manifest(1000, 100);
            let interest = ReaderInterest { position, readahead, responsive };

            match pick_piece(&manifest, &completed, &[interest]) {
                Some(index) => proptest::prop_assert!(!completed[index as usize]),
                None => proptest::prop_assert!(completed.iter().all(|done| *done)),
            }
        }
    }

    #[tokio::test]
    async fn test_completion_is_broadcast() {
        let swarm = swarm(1000, 100);
        let mut progress = swarm.subscribe();

        swarm.complete_piece(0);

        progress.changed().await.unwrap();
        assert_eq!(*progress.borrow(), 1);
    }

    #[tokio::test]
    async fn test_driver_completes_everything() {
        let swarm = swarm(1000, 100);

        let driver = spawn_driver(Arc::clone(&swarm), 100_000, Duration::from_millis(10));
        tokio::time::timeout(Duration::from_secs(5), driver)
            .await
            .unwrap()
            .unwrap();

        assert!(swarm.is_complete());
    }
}
