//! Frame-bucketed deferred deletion.
//!
//! `Device::destroy_*` makes the handle stale immediately but must keep the driver object
//! alive until every frame that might still reference it has retired. Destroyed objects are
//! therefore parked in the bucket of the frame they were destroyed on; once the frame ring has
//! gone all the way around - meaning that frame's fence has been waited on - the bucket is
//! drained and the objects are really released.

/// A ring of deletion buckets, one per frame in flight.
#[derive(Debug)]
pub struct DeferredQueue<T> {
    buckets: Vec<Vec<T>>,
    current: usize,
}

impl<T> DeferredQueue<T> {
    /// Creates a queue with `frames_in_flight` buckets.
    pub fn new(frames_in_flight: usize) -> Self {
        assert!(frames_in_flight > 0, "a deferred queue needs at least one bucket");
        DeferredQueue {
            buckets: (0..frames_in_flight).map(|_| Vec::new()).collect(),
            current: 0,
        }
    }

    /// Parks `item` in the current frame's bucket.
    pub fn push(&mut self, item: T) {
        self.buckets[self.current].push(item);
    }

    /// Advances to the next frame's bucket and drains it.
    ///
    /// Call once per frame, after the fence of the frame about to be reused has been waited
    /// on. The returned items have provably retired and can be handed back to the driver.
    pub fn flush(&mut self) -> Vec<T> {
        self.current = (self.current + 1) % self.buckets.len();
        std::mem::replace(&mut self.buckets[self.current], Vec::new())
    }

    /// Drains every bucket regardless of age. For device teardown, after a full device wait.
    pub fn drain_all(&mut self) -> Vec<T> {
        let mut all = Vec::new();
        for bucket in &mut self.buckets {
            all.append(bucket);
        }
        all
    }

    /// Total number of parked items across all buckets.
    pub fn len(&self) -> usize {
        self.buckets.iter().map(Vec::len).sum()
    }

    /// True when nothing is parked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn items_survive_until_their_frame_retires() {
        let mut queue = DeferredQueue::new(2);
        queue.push("buffer");

        // One flush later the other bucket drains; ours is still parked.
        assert!(queue.flush().is_empty());
        assert_eq!(queue.len(), 1);

        // The ring has come back around: the destroy frame has retired.
        assert_eq!(queue.flush(), vec!["buffer"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn items_from_different_frames_drain_separately() {
        let mut queue = DeferredQueue::new(2);
        queue.push(1);
        queue.flush();
        queue.push(2);

        assert_eq!(queue.flush(), vec![1]);
        assert_eq!(queue.flush(), vec![2]);
    }

    #[test]
    fn drain_all_empties_every_bucket() {
        let mut queue = DeferredQueue::new(3);
        queue.push(1);
        queue.flush();
        queue.push(2);
        queue.flush();
        queue.push(3);

        let mut all = queue.drain_all();
        all.sort_unstable();
        assert_eq!(all, vec![1, 2, 3]);
        assert!(queue.is_empty());
    }
}
