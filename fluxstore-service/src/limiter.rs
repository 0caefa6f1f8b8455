// Copyright 2024 The Fluxstore Authors. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Per-client limiter (C1): two disjoint, non-blocking counting semaphores
//! so a flood of catalog queries cannot starve uploads/downloads and
//! vice-versa.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Non-blocking counting semaphore over a fixed capacity. Admission never
/// waits: a full semaphore fails immediately instead of queueing, which is
/// the right behavior for retry-capable clients.
struct Counter {
    in_flight: AtomicUsize,
    capacity: usize,
}

impl Counter {
    fn new(capacity: usize) -> Self {
        Self {
            in_flight: AtomicUsize::new(0),
            capacity,
        }
    }

    /// Succeeds iff `in_flight < capacity`, atomically incrementing. A
    /// `capacity` of zero means every acquire fails (the class is disabled).
    fn try_acquire(&self) -> bool {
        self.in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < self.capacity).then_some(current + 1)
            })
            .is_ok()
    }

    /// Decrements occupancy. Idempotent-safe: releasing past zero occupancy
    /// is a silent no-op, which protects against paired-release bugs in
    /// caller unwinding logic.
    fn release(&self) {
        let _ = self
            .in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| current.checked_sub(1));
    }

    fn occupancy(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }
}

/// The limiter entry for one client identity: a bulk-transfer semaphore
/// (Upload/Download) and a catalog-list semaphore, disjoint pools.
pub struct ClientLimiter {
    bulk: Counter,
    list: Counter,
}

impl ClientLimiter {
    pub fn new(bulk_capacity: usize, list_capacity: usize) -> Self {
        Self {
            bulk: Counter::new(bulk_capacity),
            list: Counter::new(list_capacity),
        }
    }

    pub fn try_acquire_bulk(&self) -> bool {
        self.bulk.try_acquire()
    }

    pub fn release_bulk(&self) {
        self.bulk.release();
    }

    pub fn try_acquire_list(&self) -> bool {
        self.list.try_acquire()
    }

    pub fn release_list(&self) {
        self.list.release();
    }

    /// Zero occupancy on both pools, the eviction precondition (invariant L2).
    pub fn is_idle(&self) -> bool {
        self.bulk.occupancy() == 0 && self.list.occupancy() == 0
    }

    #[cfg(test)]
    pub fn bulk_occupancy(&self) -> usize {
        self.bulk.occupancy()
    }

    #[cfg(test)]
    pub fn list_occupancy(&self) -> usize {
        self.list.occupancy()
    }
}

/// The class of call a limiter entry admits, resolved by the admission
/// interceptor from the fully-qualified method name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Bulk,
    List,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn admits_up_to_capacity_then_rejects() {
        let limiter = ClientLimiter::new(2, 1);
        assert!(limiter.try_acquire_bulk());
        assert!(limiter.try_acquire_bulk());
        assert!(!limiter.try_acquire_bulk());
        assert_eq!(limiter.bulk_occupancy(), 2);
    }

    #[test]
    fn release_frees_a_slot() {
        let limiter = ClientLimiter::new(1, 1);
        assert!(limiter.try_acquire_bulk());
        assert!(!limiter.try_acquire_bulk());
        limiter.release_bulk();
        assert!(limiter.try_acquire_bulk());
    }

    #[test]
    fn release_below_zero_is_a_silent_no_op() {
        let limiter = ClientLimiter::new(1, 1);
        limiter.release_bulk();
        limiter.release_bulk();
        assert_eq!(limiter.bulk_occupancy(), 0);
        assert!(limiter.try_acquire_bulk());
    }

    #[test]
    fn zero_capacity_disables_the_class() {
        let limiter = ClientLimiter::new(0, 5);
        assert!(!limiter.try_acquire_bulk());
        assert!(limiter.try_acquire_list());
    }

    #[test]
    fn bulk_and_list_pools_are_disjoint() {
        let limiter = ClientLimiter::new(1, 1);
        assert!(limiter.try_acquire_bulk());
        assert!(limiter.try_acquire_list());
        assert!(!limiter.is_idle());
    }
}
