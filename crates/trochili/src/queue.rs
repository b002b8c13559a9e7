//! Thread queues: per-priority buckets for the scheduler and the two-lane
//! wait queue embedded in every IPC object.

use crate::list::{NodeStore, Ring};
use crate::priority::{Priority, PriorityMask, PRIORITY_LEVELS};

/// Where a thread enters a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum QueuePosition {
    Head,
    Tail,
}

/// One FIFO ring per priority level plus the bitmap of non-empty levels.
///
/// Used for the ready queue (ready and running threads) and for the
/// auxiliary queue (init, delayed, suspended and dormant threads).
pub(crate) struct ThreadQueue {
    buckets: [Ring; PRIORITY_LEVELS],
    mask: PriorityMask,
}

impl ThreadQueue {
    pub(crate) const fn new() -> Self {
        Self {
            buckets: [Ring::new(); PRIORITY_LEVELS],
            mask: PriorityMask::EMPTY,
        }
    }

    pub(crate) fn enter<S: NodeStore + ?Sized>(
        &mut self,
        store: &mut S,
        node: usize,
        priority: Priority,
        position: QueuePosition,
    ) {
        let bucket = &mut self.buckets[priority.index()];
        match position {
            QueuePosition::Head => bucket.push_front(store, node),
            QueuePosition::Tail => bucket.push_back(store, node),
        }
        self.mask.set(priority);
    }

    pub(crate) fn leave<S: NodeStore + ?Sized>(
        &mut self,
        store: &mut S,
        node: usize,
        priority: Priority,
    ) {
        let bucket = &mut self.buckets[priority.index()];
        bucket.remove(store, node);
        if bucket.is_empty() {
            self.mask.clear(priority);
        }
    }

    pub(crate) fn head(&self, priority: Priority) -> Option<usize> {
        self.buckets[priority.index()].head()
    }

    pub(crate) fn rotate<S: NodeStore + ?Sized>(&mut self, store: &S, priority: Priority) {
        self.buckets[priority.index()].rotate(store);
    }

    pub(crate) fn highest(&self) -> Option<Priority> {
        self.mask.highest()
    }

    pub(crate) fn mask(&self) -> PriorityMask {
        self.mask
    }

    pub(crate) fn bucket(&self, priority: Priority) -> &Ring {
        &self.buckets[priority.index()]
    }
}

/// Ordering of blocked threads inside one wait lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum QueuePolicy {
    /// Most urgent thread first, FIFO among equal priorities.
    #[default]
    Priority,
    /// Strict arrival order.
    Fifo,
}

/// Wait queue of an IPC object.
///
/// The primary lane holds ordinary waiters. The auxiliary lane holds urgent
/// waiters (urgent mail senders) and is always serviced first.
pub(crate) struct WaitQueue {
    primary: Ring,
    auxiliary: Ring,
    policy: QueuePolicy,
}

impl WaitQueue {
    pub(crate) const fn new(policy: QueuePolicy) -> Self {
        Self {
            primary: Ring::new(),
            auxiliary: Ring::new(),
            policy,
        }
    }

    fn lane(&mut self, urgent: bool) -> &mut Ring {
        if urgent {
            &mut self.auxiliary
        } else {
            &mut self.primary
        }
    }

    pub(crate) fn enter<S: NodeStore + ?Sized>(&mut self, store: &mut S, node: usize, urgent: bool) {
        let policy = self.policy;
        let lane = self.lane(urgent);
        match policy {
            QueuePolicy::Priority => lane.insert_by_key(store, node),
            QueuePolicy::Fifo => lane.push_back(store, node),
        }
    }

    pub(crate) fn leave<S: NodeStore + ?Sized>(&mut self, store: &mut S, node: usize, urgent: bool) {
        self.lane(urgent).remove(store, node);
    }

    /// Re-sorts `node` after its key changed. FIFO lanes keep their order.
    pub(crate) fn reposition<S: NodeStore + ?Sized>(
        &mut self,
        store: &mut S,
        node: usize,
        urgent: bool,
    ) {
        if self.policy == QueuePolicy::Priority {
            let lane = self.lane(urgent);
            lane.remove(store, node);
            lane.insert_by_key(store, node);
        }
    }

    pub(crate) fn primary_head(&self) -> Option<usize> {
        self.primary.head()
    }

    pub(crate) fn auxiliary_head(&self) -> Option<usize> {
        self.auxiliary.head()
    }

    /// Next thread to service: auxiliary lane first.
    pub(crate) fn first(&self) -> Option<usize> {
        self.auxiliary.head().or(self.primary.head())
    }

    pub(crate) fn primary(&self) -> &Ring {
        &self.primary
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.primary.is_empty() && self.auxiliary.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.primary.len() + self.auxiliary.len()
    }

    pub(crate) fn policy(&self) -> QueuePolicy {
        self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::list::Link;
    use alloc::vec;
    use alloc::vec::Vec;

    struct Threads {
        links: Vec<Link>,
        prio: Vec<Priority>,
    }

    impl NodeStore for Threads {
        fn link(&self, node: usize) -> Link {
            self.links[node]
        }

        fn link_mut(&mut self, node: usize) -> &mut Link {
            &mut self.links[node]
        }

        fn key(&self, node: usize) -> Priority {
            self.prio[node]
        }
    }

    fn threads(prio: &[u8]) -> Threads {
        Threads {
            links: vec![Link::default(); prio.len()],
            prio: prio.iter().map(|&p| Priority::new(p)).collect(),
        }
    }

    #[test]
    fn mask_follows_bucket_occupancy() {
        let mut store = threads(&[4, 4, 7]);
        let mut queue = ThreadQueue::new();

        queue.enter(&mut store, 0, Priority::new(4), QueuePosition::Tail);
        queue.enter(&mut store, 1, Priority::new(4), QueuePosition::Head);
        queue.enter(&mut store, 2, Priority::new(7), QueuePosition::Tail);
        assert_eq!(queue.highest(), Some(Priority::new(4)));
        assert_eq!(queue.head(Priority::new(4)), Some(1));

        queue.leave(&mut store, 1, Priority::new(4));
        queue.leave(&mut store, 0, Priority::new(4));
        assert_eq!(queue.highest(), Some(Priority::new(7)));
        assert!(!queue.mask().is_set(Priority::new(4)));
    }

    #[test]
    fn auxiliary_lane_is_served_first() {
        let mut store = threads(&[1, 9]);
        let mut queue = WaitQueue::new(QueuePolicy::Priority);

        queue.enter(&mut store, 0, false);
        queue.enter(&mut store, 1, true);
        assert_eq!(queue.first(), Some(1));
        assert_eq!(queue.len(), 2);

        queue.leave(&mut store, 1, true);
        assert_eq!(queue.first(), Some(0));
    }

    #[test]
    fn fifo_policy_ignores_priority() {
        let mut store = threads(&[9, 1]);
        let mut queue = WaitQueue::new(QueuePolicy::Fifo);

        queue.enter(&mut store, 0, false);
        queue.enter(&mut store, 1, false);
        assert_eq!(queue.primary_head(), Some(0));

        store.prio[0] = Priority::new(20);
        queue.reposition(&mut store, 0, false);
        assert_eq!(queue.primary_head(), Some(0));
    }
}
