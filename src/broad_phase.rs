//! Broadphase Pair Management
//!
//! Wraps the dynamic AABB tree with a move buffer and pair generation.
//! Each step, the broadphase queries the tree once per moved proxy,
//! collects candidate pairs, and hands the sorted, deduplicated set to
//! the contact manager.

use crate::dynamic_tree::{DynamicTree, NULL_NODE};
use crate::math::{Aabb, Vec2};
use crate::shape::RayCastInput;

/// An unordered proxy pair, stored with `a < b`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct ProxyPair {
    pub a: u32,
    pub b: u32,
}

/// Broadphase: dynamic tree plus a buffer of moved proxies.
pub struct BroadPhase {
    tree: DynamicTree,
    /// Proxies that moved since the last pair update
    move_buffer: Vec<u32>,
    /// Pair accumulator, reused across steps
    pairs: Vec<ProxyPair>,
}

impl BroadPhase {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tree: DynamicTree::new(),
            move_buffer: Vec::new(),
            pairs: Vec::new(),
        }
    }

    /// Create a proxy and schedule it for pair generation.
    pub fn create_proxy(&mut self, aabb: Aabb, user_data: u32) -> u32 {
        let id = self.tree.create_proxy(aabb, user_data);
        self.move_buffer.push(id);
        id
    }

    /// Destroy a proxy and drop it from the move buffer.
    pub fn destroy_proxy(&mut self, proxy_id: u32) {
        self.move_buffer.retain(|&p| p != proxy_id);
        self.tree.destroy_proxy(proxy_id);
    }

    /// Move a proxy; buffers it if the tree had to reinsert.
    pub fn move_proxy(&mut self, proxy_id: u32, aabb: Aabb, displacement: Vec2) {
        if self.tree.move_proxy(proxy_id, aabb, displacement) {
            self.buffer_move(proxy_id);
        }
    }

    /// Force re-pairing of a proxy without moving it. Used when a fixture's
    /// filter data changes.
    pub fn touch_proxy(&mut self, proxy_id: u32) {
        self.buffer_move(proxy_id);
    }

    fn buffer_move(&mut self, proxy_id: u32) {
        if !self.move_buffer.contains(&proxy_id) {
            self.move_buffer.push(proxy_id);
        }
    }

    #[inline]
    #[must_use]
    pub fn user_data(&self, proxy_id: u32) -> u32 {
        self.tree.user_data(proxy_id)
    }

    #[inline]
    #[must_use]
    pub fn fat_aabb(&self, proxy_id: u32) -> Aabb {
        self.tree.fat_aabb(proxy_id)
    }

    /// Do the fat AABBs of two proxies overlap?
    #[inline]
    #[must_use]
    pub fn test_overlap(&self, a: u32, b: u32) -> bool {
        self.tree.fat_aabb(a).overlaps(&self.tree.fat_aabb(b))
    }

    #[must_use]
    pub fn proxy_count(&self) -> usize {
        self.tree.proxy_count()
    }

    #[must_use]
    pub fn tree_height(&self) -> i32 {
        self.tree.height()
    }

    /// Generate candidate pairs for every moved proxy and invoke the
    /// callback once per unique pair. Clears the move buffer.
    pub fn update_pairs<F: FnMut(u32, u32)>(&mut self, mut callback: F) {
        self.pairs.clear();

        for i in 0..self.move_buffer.len() {
            let query_proxy = self.move_buffer[i];
            if query_proxy == NULL_NODE {
                continue;
            }
            let fat = self.tree.fat_aabb(query_proxy);

            let tree = &self.tree;
            let pairs = &mut self.pairs;
            tree.query(&fat, |other| {
                if other == query_proxy {
                    return true;
                }
                // Avoid reporting moved/moved pairs twice: the proxy with
                // the smaller id owns the pair when both have moved.
                if tree.was_moved(other) && other < query_proxy {
                    return true;
                }
                let (a, b) = if query_proxy < other {
                    (query_proxy, other)
                } else {
                    (other, query_proxy)
                };
                pairs.push(ProxyPair { a, b });
                true
            });
        }

        for &proxy in &self.move_buffer {
            if proxy != NULL_NODE {
                self.tree.clear_moved(proxy);
            }
        }
        self.move_buffer.clear();

        self.pairs.sort_unstable();
        self.pairs.dedup();
        for pair in &self.pairs {
            callback(pair.a, pair.b);
        }
    }

    /// Query the tree for proxies overlapping `aabb`.
    pub fn query<F: FnMut(u32) -> bool>(&self, aabb: &Aabb, callback: F) {
        self.tree.query(aabb, callback);
    }

    /// Ray cast against proxy fat AABBs.
    pub fn ray_cast<F: FnMut(&RayCastInput, u32) -> f32>(
        &self,
        input: &RayCastInput,
        callback: F,
    ) {
        self.tree.ray_cast(input, callback);
    }
}

impl Default for BroadPhase {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn aabb(x: f32, y: f32, hw: f32) -> Aabb {
        Aabb::new(Vec2::new(x - hw, y - hw), Vec2::new(x + hw, y + hw))
    }

    fn drain_pairs(bp: &mut BroadPhase) -> Vec<(u32, u32)> {
        let mut out = Vec::new();
        bp.update_pairs(|a, b| out.push((a, b)));
        out
    }

    #[test]
    fn test_overlapping_proxies_pair_once() {
        let mut bp = BroadPhase::new();
        let a = bp.create_proxy(aabb(0.0, 0.0, 1.0), 10);
        let b = bp.create_proxy(aabb(0.5, 0.0, 1.0), 11);
        let _far = bp.create_proxy(aabb(100.0, 0.0, 1.0), 12);

        let pairs = drain_pairs(&mut bp);
        assert_eq!(pairs.len(), 1, "Only the overlapping pair is reported");
        assert_eq!(pairs[0], (a.min(b), a.max(b)));
    }

    #[test]
    fn test_no_pairs_without_motion() {
        let mut bp = BroadPhase::new();
        bp.create_proxy(aabb(0.0, 0.0, 1.0), 0);
        bp.create_proxy(aabb(0.5, 0.0, 1.0), 1);
        drain_pairs(&mut bp);

        // Second update with nothing moved: no pairs
        let pairs = drain_pairs(&mut bp);
        assert!(pairs.is_empty(), "Idle proxies must not re-pair");
    }

    #[test]
    fn test_move_creates_new_pair() {
        let mut bp = BroadPhase::new();
        let a = bp.create_proxy(aabb(0.0, 0.0, 1.0), 0);
        let b = bp.create_proxy(aabb(50.0, 0.0, 1.0), 1);
        assert!(drain_pairs(&mut bp).is_empty());

        bp.move_proxy(a, aabb(49.5, 0.0, 1.0), Vec2::new(49.5, 0.0));
        let pairs = drain_pairs(&mut bp);
        assert_eq!(pairs, vec![(a.min(b), a.max(b))]);
    }

    #[test]
    fn test_touch_repairs_without_motion() {
        let mut bp = BroadPhase::new();
        let a = bp.create_proxy(aabb(0.0, 0.0, 1.0), 0);
        let b = bp.create_proxy(aabb(0.5, 0.0, 1.0), 1);
        drain_pairs(&mut bp);

        bp.touch_proxy(a);
        let pairs = drain_pairs(&mut bp);
        assert_eq!(pairs, vec![(a.min(b), a.max(b))]);
    }

    #[test]
    fn test_destroyed_proxy_leaves_no_pairs() {
        let mut bp = BroadPhase::new();
        let a = bp.create_proxy(aabb(0.0, 0.0, 1.0), 0);
        let _b = bp.create_proxy(aabb(0.5, 0.0, 1.0), 1);
        bp.destroy_proxy(a);
        let pairs = drain_pairs(&mut bp);
        assert!(pairs.is_empty());
        assert_eq!(bp.proxy_count(), 1);
    }

    #[test]
    fn test_cluster_pairs_deduplicated() {
        let mut bp = BroadPhase::new();
        // Three mutually overlapping boxes: exactly 3 unique pairs
        bp.create_proxy(aabb(0.0, 0.0, 1.0), 0);
        bp.create_proxy(aabb(0.5, 0.0, 1.0), 1);
        bp.create_proxy(aabb(0.25, 0.5, 1.0), 2);
        let pairs = drain_pairs(&mut bp);
        assert_eq!(pairs.len(), 3, "Pairs must be unique, got {pairs:?}");
    }
}
