//! Dynamic AABB Tree (Incremental BVH)
//!
//! A self-balancing binary tree of AABBs for broadphase collision detection
//! with moving bodies. Supports O(log n) insert, remove, and update.
//!
//! # Features
//!
//! - **Incremental updates**: move proxies without a full rebuild
//! - **Fat AABBs**: margin plus velocity-predicted extension reduces
//!   re-insertions for moving bodies
//! - **Tree rotations**: AVL-style balancing for O(log n) queries
//! - **Cost-based insertion**: surface-area (perimeter) heuristic

use crate::math::{Aabb, Vec2};
use crate::settings::{AABB_EXTENSION, AABB_MULTIPLIER};
use crate::shape::RayCastInput;

/// Null node sentinel
pub const NULL_NODE: u32 = u32::MAX;

/// A node in the dynamic AABB tree
#[derive(Clone, Debug)]
struct TreeNode {
    /// Fat AABB (enlarged for movement prediction)
    aabb: Aabb,
    /// Parent node index (NULL_NODE if root or free)
    parent: u32,
    /// Left child (NULL_NODE if leaf)
    left: u32,
    /// Right child (NULL_NODE if leaf)
    right: u32,
    /// Height (0 for leaf, -1 for free)
    height: i32,
    /// Opaque user data for leaves (fixture + child index)
    user_data: u32,
    /// Set when the proxy moved since the last pair update
    moved: bool,
}

impl TreeNode {
    fn new_free() -> Self {
        Self {
            aabb: Aabb::default(),
            parent: NULL_NODE,
            left: NULL_NODE,
            right: NULL_NODE,
            height: -1,
            user_data: NULL_NODE,
            moved: false,
        }
    }

    #[inline]
    fn is_leaf(&self) -> bool {
        self.left == NULL_NODE
    }
}

/// Dynamic AABB tree keyed by proxy id.
pub struct DynamicTree {
    /// Node pool
    nodes: Vec<TreeNode>,
    /// Free list (indices of unused nodes)
    free_list: Vec<u32>,
    /// Root node index
    root: u32,
}

impl DynamicTree {
    /// Create a new empty tree.
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            free_list: Vec::new(),
            root: NULL_NODE,
        }
    }

    /// Insert a proxy for a tight AABB. Returns the proxy id.
    pub fn create_proxy(&mut self, aabb: Aabb, user_data: u32) -> u32 {
        let node_id = self.alloc_node();
        let node = &mut self.nodes[node_id as usize];
        node.aabb = aabb.extend(AABB_EXTENSION);
        node.user_data = user_data;
        node.height = 0;
        node.moved = true;
        self.insert_leaf(node_id);
        node_id
    }

    /// Remove a proxy.
    pub fn destroy_proxy(&mut self, proxy_id: u32) {
        debug_assert!((proxy_id as usize) < self.nodes.len());
        debug_assert!(self.nodes[proxy_id as usize].is_leaf());
        self.remove_leaf(proxy_id);
        self.free_node(proxy_id);
    }

    /// Move a proxy to a new tight AABB, extending the fat box in the
    /// direction of `displacement`. Returns true if the proxy was
    /// re-inserted (the fat AABB no longer contained the tight one).
    pub fn move_proxy(&mut self, proxy_id: u32, aabb: Aabb, displacement: Vec2) -> bool {
        debug_assert!(self.nodes[proxy_id as usize].is_leaf());

        // Predict motion: extend the fattened box along the displacement
        let mut fat = aabb.extend(AABB_EXTENSION);
        let d = displacement * AABB_MULTIPLIER;
        if d.x < 0.0 {
            fat.lower.x += d.x;
        } else {
            fat.upper.x += d.x;
        }
        if d.y < 0.0 {
            fat.lower.y += d.y;
        } else {
            fat.upper.y += d.y;
        }

        let tree_aabb = self.nodes[proxy_id as usize].aabb;
        if tree_aabb.contains(&aabb) {
            // The tight box is still inside the fat box. Only re-insert if
            // the fat box has become grossly oversized (a huge box left
            // behind by a fast body hurts query performance forever).
            let huge = fat.extend(4.0 * AABB_EXTENSION);
            if huge.contains(&tree_aabb) {
                return false;
            }
        }

        self.remove_leaf(proxy_id);
        self.nodes[proxy_id as usize].aabb = fat;
        self.insert_leaf(proxy_id);
        self.nodes[proxy_id as usize].moved = true;
        true
    }

    /// User data of a proxy.
    #[inline]
    #[must_use]
    pub fn user_data(&self, proxy_id: u32) -> u32 {
        self.nodes[proxy_id as usize].user_data
    }

    /// Fat AABB of a proxy.
    #[inline]
    #[must_use]
    pub fn fat_aabb(&self, proxy_id: u32) -> Aabb {
        self.nodes[proxy_id as usize].aabb
    }

    /// Moved flag (set by `create_proxy`/`move_proxy`, cleared by the
    /// broadphase after pair generation).
    #[inline]
    #[must_use]
    pub fn was_moved(&self, proxy_id: u32) -> bool {
        self.nodes[proxy_id as usize].moved
    }

    /// Clear the moved flag.
    #[inline]
    pub fn clear_moved(&mut self, proxy_id: u32) {
        self.nodes[proxy_id as usize].moved = false;
    }

    /// Depth-first query of proxies whose fat AABBs overlap `aabb`.
    /// The callback returns false to abort the traversal early.
    pub fn query<F: FnMut(u32) -> bool>(&self, aabb: &Aabb, mut callback: F) {
        if self.root == NULL_NODE {
            return;
        }
        let mut stack: Vec<u32> = Vec::with_capacity(64);
        stack.push(self.root);

        while let Some(node_id) = stack.pop() {
            if node_id == NULL_NODE {
                continue;
            }
            let node = &self.nodes[node_id as usize];
            if !node.aabb.overlaps(aabb) {
                continue;
            }
            if node.is_leaf() {
                if !callback(node_id) {
                    return;
                }
            } else {
                stack.push(node.left);
                stack.push(node.right);
            }
        }
    }

    /// Ray cast through the tree. The callback receives the current input
    /// (with the clipped max fraction) and a proxy id, and returns a new
    /// max fraction: 0 to stop, the hit fraction to clip the ray, or the
    /// unchanged fraction to continue.
    pub fn ray_cast<F: FnMut(&RayCastInput, u32) -> f32>(
        &self,
        input: &RayCastInput,
        mut callback: F,
    ) {
        let p1 = input.p1;
        let p2 = input.p2;
        let mut r = p2 - p1;
        if r.normalize_and_length() == 0.0 {
            return;
        }

        // v is perpendicular to the segment
        let v = r.skew();
        let abs_v = v.abs();
        let mut max_fraction = input.max_fraction;

        // Segment bounding box
        let mut t = p1 + (p2 - p1) * max_fraction;
        let mut segment_aabb = Aabb::new(p1.min(t), p1.max(t));

        let mut stack: Vec<u32> = Vec::with_capacity(64);
        if self.root != NULL_NODE {
            stack.push(self.root);
        }

        while let Some(node_id) = stack.pop() {
            if node_id == NULL_NODE {
                continue;
            }
            let node = &self.nodes[node_id as usize];
            if !node.aabb.overlaps(&segment_aabb) {
                continue;
            }

            // Separating axis: |dot(v, p1 - c)| > dot(|v|, h)
            let c = node.aabb.center();
            let h = node.aabb.extents();
            let separation = v.dot(p1 - c).abs() - abs_v.dot(h);
            if separation > 0.0 {
                continue;
            }

            if node.is_leaf() {
                let sub_input = RayCastInput {
                    p1,
                    p2,
                    max_fraction,
                };
                let value = callback(&sub_input, node_id);
                if value == 0.0 {
                    // Client terminated the cast
                    return;
                }
                if value > 0.0 {
                    max_fraction = value;
                    t = p1 + (p2 - p1) * max_fraction;
                    segment_aabb = Aabb::new(p1.min(t), p1.max(t));
                }
            } else {
                stack.push(node.left);
                stack.push(node.right);
            }
        }
    }

    /// Number of active proxies (leaf nodes).
    #[must_use]
    pub fn proxy_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| n.height == 0 && n.is_leaf())
            .count()
    }

    /// Tree height.
    #[must_use]
    pub fn height(&self) -> i32 {
        if self.root == NULL_NODE {
            0
        } else {
            self.nodes[self.root as usize].height
        }
    }

    /// Verify structural invariants: parent links, heights, and that every
    /// internal AABB equals the union of its children. Test support.
    #[must_use]
    pub fn validate(&self) -> bool {
        self.validate_node(self.root)
    }

    fn validate_node(&self, node_id: u32) -> bool {
        if node_id == NULL_NODE {
            return true;
        }
        let node = &self.nodes[node_id as usize];
        if node.is_leaf() {
            return node.right == NULL_NODE && node.height == 0;
        }

        let left = node.left;
        let right = node.right;
        let ln = &self.nodes[left as usize];
        let rn = &self.nodes[right as usize];

        if ln.parent != node_id || rn.parent != node_id {
            return false;
        }
        if node.height != 1 + ln.height.max(rn.height) {
            return false;
        }
        let union = ln.aabb.union(&rn.aabb);
        if union != node.aabb {
            return false;
        }
        self.validate_node(left) && self.validate_node(right)
    }

    // =========== Internal methods ===========

    fn alloc_node(&mut self) -> u32 {
        if let Some(id) = self.free_list.pop() {
            self.nodes[id as usize] = TreeNode::new_free();
            self.nodes[id as usize].height = 0;
            id
        } else {
            let id = self.nodes.len() as u32;
            let mut node = TreeNode::new_free();
            node.height = 0;
            self.nodes.push(node);
            id
        }
    }

    fn free_node(&mut self, node_id: u32) {
        self.nodes[node_id as usize] = TreeNode::new_free();
        self.free_list.push(node_id);
    }

    fn insert_leaf(&mut self, leaf: u32) {
        if self.root == NULL_NODE {
            self.root = leaf;
            self.nodes[leaf as usize].parent = NULL_NODE;
            return;
        }

        // Find the best sibling using the perimeter cost heuristic
        let leaf_aabb = self.nodes[leaf as usize].aabb;
        let mut sibling = self.root;
        while !self.nodes[sibling as usize].is_leaf() {
            let left = self.nodes[sibling as usize].left;
            let right = self.nodes[sibling as usize].right;

            let area = self.nodes[sibling as usize].aabb.perimeter();
            let combined_area = leaf_aabb.union(&self.nodes[sibling as usize].aabb).perimeter();

            // Cost of making a new parent for this node and the leaf
            let cost = 2.0 * combined_area;
            let inheritance_cost = 2.0 * (combined_area - area);

            let cost_left = self.descend_cost(left, &leaf_aabb, inheritance_cost);
            let cost_right = self.descend_cost(right, &leaf_aabb, inheritance_cost);

            if cost < cost_left && cost < cost_right {
                break;
            }
            sibling = if cost_left < cost_right { left } else { right };
        }

        // Create a new parent above the sibling
        let old_parent = self.nodes[sibling as usize].parent;
        let new_parent = self.alloc_node();
        self.nodes[new_parent as usize].parent = old_parent;
        self.nodes[new_parent as usize].aabb = leaf_aabb.union(&self.nodes[sibling as usize].aabb);
        self.nodes[new_parent as usize].height = self.nodes[sibling as usize].height + 1;

        if old_parent != NULL_NODE {
            if self.nodes[old_parent as usize].left == sibling {
                self.nodes[old_parent as usize].left = new_parent;
            } else {
                self.nodes[old_parent as usize].right = new_parent;
            }
        } else {
            self.root = new_parent;
        }

        self.nodes[new_parent as usize].left = sibling;
        self.nodes[new_parent as usize].right = leaf;
        self.nodes[sibling as usize].parent = new_parent;
        self.nodes[leaf as usize].parent = new_parent;

        self.fix_upwards(new_parent);
    }

    fn descend_cost(&self, child: u32, leaf_aabb: &Aabb, inheritance: f32) -> f32 {
        let combined = leaf_aabb.union(&self.nodes[child as usize].aabb);
        if self.nodes[child as usize].is_leaf() {
            combined.perimeter() + inheritance
        } else {
            let old_area = self.nodes[child as usize].aabb.perimeter();
            (combined.perimeter() - old_area) + inheritance
        }
    }

    fn remove_leaf(&mut self, leaf: u32) {
        if leaf == self.root {
            self.root = NULL_NODE;
            return;
        }

        let parent = self.nodes[leaf as usize].parent;
        let grand_parent = self.nodes[parent as usize].parent;
        let sibling = if self.nodes[parent as usize].left == leaf {
            self.nodes[parent as usize].right
        } else {
            self.nodes[parent as usize].left
        };

        if grand_parent != NULL_NODE {
            if self.nodes[grand_parent as usize].left == parent {
                self.nodes[grand_parent as usize].left = sibling;
            } else {
                self.nodes[grand_parent as usize].right = sibling;
            }
            self.nodes[sibling as usize].parent = grand_parent;
            self.free_node(parent);
            self.fix_upwards(grand_parent);
        } else {
            self.root = sibling;
            self.nodes[sibling as usize].parent = NULL_NODE;
            self.free_node(parent);
        }
    }

    fn fix_upwards(&mut self, start: u32) {
        let mut node_id = start;
        while node_id != NULL_NODE {
            node_id = self.balance(node_id);

            let left = self.nodes[node_id as usize].left;
            let right = self.nodes[node_id as usize].right;
            if left != NULL_NODE && right != NULL_NODE {
                let lh = self.nodes[left as usize].height;
                let rh = self.nodes[right as usize].height;
                self.nodes[node_id as usize].height = 1 + lh.max(rh);
                self.nodes[node_id as usize].aabb = self.nodes[left as usize]
                    .aabb
                    .union(&self.nodes[right as usize].aabb);
            }

            node_id = self.nodes[node_id as usize].parent;
        }
    }

    /// AVL-style rotation for balancing.
    fn balance(&mut self, node_id: u32) -> u32 {
        if self.nodes[node_id as usize].is_leaf() || self.nodes[node_id as usize].height < 2 {
            return node_id;
        }

        let left = self.nodes[node_id as usize].left;
        let right = self.nodes[node_id as usize].right;
        let balance_factor = self.nodes[right as usize].height - self.nodes[left as usize].height;

        if balance_factor > 1 {
            self.rotate_up(node_id, right)
        } else if balance_factor < -1 {
            self.rotate_up(node_id, left)
        } else {
            node_id
        }
    }

    /// Promote `child` above `node_id`.
    fn rotate_up(&mut self, node_id: u32, child: u32) -> u32 {
        let child_left = self.nodes[child as usize].left;
        let child_right = self.nodes[child as usize].right;
        let parent = self.nodes[node_id as usize].parent;

        // Child takes node's place
        self.nodes[child as usize].parent = parent;
        self.nodes[node_id as usize].parent = child;
        if parent != NULL_NODE {
            if self.nodes[parent as usize].left == node_id {
                self.nodes[parent as usize].left = child;
            } else {
                self.nodes[parent as usize].right = child;
            }
        } else {
            self.root = child;
        }

        // The child's taller grandchild stays with the child; the shorter
        // one is adopted by the demoted node
        let cl_h = self.nodes[child_left as usize].height;
        let cr_h = self.nodes[child_right as usize].height;
        let (keep, give) = if cl_h > cr_h {
            (child_left, child_right)
        } else {
            (child_right, child_left)
        };

        self.nodes[child as usize].left = node_id;
        self.nodes[child as usize].right = keep;
        self.nodes[keep as usize].parent = child;

        // Reattach the given grandchild in place of the promoted child
        if self.nodes[node_id as usize].left == child {
            self.nodes[node_id as usize].left = give;
        } else {
            self.nodes[node_id as usize].right = give;
        }
        self.nodes[give as usize].parent = node_id;

        // Refresh demoted node, then the promoted child
        for id in [node_id, child] {
            let l = self.nodes[id as usize].left;
            let r = self.nodes[id as usize].right;
            let lh = self.nodes[l as usize].height;
            let rh = self.nodes[r as usize].height;
            self.nodes[id as usize].height = 1 + lh.max(rh);
            self.nodes[id as usize].aabb =
                self.nodes[l as usize].aabb.union(&self.nodes[r as usize].aabb);
        }

        child
    }
}

impl Default for DynamicTree {
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

    fn unit_aabb(x: f32, y: f32) -> Aabb {
        Aabb::new(Vec2::new(x, y), Vec2::new(x + 1.0, y + 1.0))
    }

    fn collect_query(tree: &DynamicTree, aabb: &Aabb) -> Vec<u32> {
        let mut out = Vec::new();
        tree.query(aabb, |id| {
            out.push(tree.user_data(id));
            true
        });
        out.sort_unstable();
        out
    }

    #[test]
    fn test_create_and_query() {
        let mut tree = DynamicTree::new();
        tree.create_proxy(unit_aabb(0.0, 0.0), 0);
        tree.create_proxy(unit_aabb(10.0, 10.0), 1);
        tree.create_proxy(unit_aabb(20.0, 20.0), 2);

        assert_eq!(tree.proxy_count(), 3);
        assert!(tree.validate(), "Tree invariant must hold after inserts");

        let near = collect_query(&tree, &unit_aabb(-0.5, -0.5));
        assert!(near.contains(&0));
        assert!(!near.contains(&2));

        let all = collect_query(
            &tree,
            &Aabb::new(Vec2::new(-100.0, -100.0), Vec2::new(100.0, 100.0)),
        );
        assert_eq!(all, vec![0, 1, 2]);
    }

    #[test]
    fn test_query_early_abort() {
        let mut tree = DynamicTree::new();
        for i in 0..10 {
            tree.create_proxy(unit_aabb(i as f32 * 0.5, 0.0), i);
        }
        let mut visits = 0;
        tree.query(
            &Aabb::new(Vec2::new(-100.0, -100.0), Vec2::new(100.0, 100.0)),
            |_| {
                visits += 1;
                visits < 3
            },
        );
        assert_eq!(visits, 3, "Traversal must stop when the callback says so");
    }

    #[test]
    fn test_destroy() {
        let mut tree = DynamicTree::new();
        let _a = tree.create_proxy(unit_aabb(0.0, 0.0), 0);
        let b = tree.create_proxy(unit_aabb(5.0, 5.0), 1);
        let _c = tree.create_proxy(unit_aabb(10.0, 10.0), 2);

        tree.destroy_proxy(b);
        assert_eq!(tree.proxy_count(), 2);
        assert!(tree.validate());

        let all = collect_query(
            &tree,
            &Aabb::new(Vec2::new(-100.0, -100.0), Vec2::new(100.0, 100.0)),
        );
        assert!(!all.contains(&1));
    }

    #[test]
    fn test_move_within_fat_aabb_is_noop() {
        let mut tree = DynamicTree::new();
        let p = tree.create_proxy(unit_aabb(0.0, 0.0), 0);
        // Move by much less than the fat margin
        let moved = tree.move_proxy(p, unit_aabb(0.01, 0.0), Vec2::new(0.01, 0.0));
        assert!(!moved, "Tiny move should stay inside the fat AABB");
    }

    #[test]
    fn test_move_outside_reinserts() {
        let mut tree = DynamicTree::new();
        let p = tree.create_proxy(unit_aabb(0.0, 0.0), 7);
        let moved = tree.move_proxy(p, unit_aabb(50.0, 50.0), Vec2::new(50.0, 50.0));
        assert!(moved, "Large move must reinsert");
        assert!(tree.validate());

        let found = collect_query(&tree, &unit_aabb(49.5, 49.5));
        assert_eq!(found, vec![7]);
    }

    #[test]
    fn test_balance_many_inserts() {
        let mut tree = DynamicTree::new();
        for i in 0..200 {
            tree.create_proxy(unit_aabb(i as f32 * 3.0, 0.0), i);
        }
        assert_eq!(tree.proxy_count(), 200);
        assert!(tree.validate(), "Invariant must hold after many inserts");
        assert!(
            tree.height() < 25,
            "Tree should stay balanced, height={}",
            tree.height()
        );
    }

    #[test]
    fn test_invariant_after_churn() {
        let mut tree = DynamicTree::new();
        let mut ids = Vec::new();
        for i in 0..50 {
            ids.push(tree.create_proxy(unit_aabb((i % 10) as f32 * 2.0, (i / 10) as f32 * 2.0), i));
        }
        // Remove every other proxy, move the rest around
        for (k, &id) in ids.iter().enumerate() {
            if k % 2 == 0 {
                tree.destroy_proxy(id);
            } else {
                tree.move_proxy(id, unit_aabb(k as f32 * 1.5, -5.0), Vec2::new(0.0, -5.0));
            }
        }
        assert!(tree.validate(), "Invariant must survive mixed churn");
        assert_eq!(tree.proxy_count(), 25);
    }

    #[test]
    fn test_query_matches_brute_force() {
        let mut tree = DynamicTree::new();
        let mut boxes = Vec::new();
        // Deterministic pseudo-random layout
        let mut seed = 0x2545f491u32;
        let mut next = || {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            (seed % 1000) as f32 / 25.0
        };
        for i in 0..100 {
            let b = unit_aabb(next(), next());
            tree.create_proxy(b, i);
            boxes.push(b);
        }

        let probe = Aabb::new(Vec2::new(10.0, 10.0), Vec2::new(20.0, 20.0));
        let found = collect_query(&tree, &probe);
        // Brute force over the tight boxes; the tree reports fat AABBs so
        // everything the brute force finds must be in the tree's answer
        for (i, b) in boxes.iter().enumerate() {
            if b.overlaps(&probe) {
                assert!(
                    found.contains(&(i as u32)),
                    "Tree query missed box {i} found by brute force"
                );
            }
        }
    }

    #[test]
    fn test_ray_cast_finds_leaf() {
        let mut tree = DynamicTree::new();
        tree.create_proxy(unit_aabb(5.0, -0.5), 0);
        tree.create_proxy(unit_aabb(10.0, -0.5), 1);
        tree.create_proxy(unit_aabb(5.0, 10.0), 2);

        let input = RayCastInput {
            p1: Vec2::new(0.0, 0.0),
            p2: Vec2::new(20.0, 0.0),
            max_fraction: 1.0,
        };
        let mut hits = Vec::new();
        tree.ray_cast(&input, |sub, id| {
            hits.push(tree.user_data(id));
            sub.max_fraction // continue without clipping
        });
        hits.sort_unstable();
        assert_eq!(hits, vec![0, 1], "Ray along y=0 must visit both on-axis boxes");
    }

    #[test]
    fn test_ray_cast_clipping_stops_far_leaf() {
        let mut tree = DynamicTree::new();
        tree.create_proxy(unit_aabb(5.0, -0.5), 0);
        tree.create_proxy(unit_aabb(15.0, -0.5), 1);

        let input = RayCastInput {
            p1: Vec2::new(0.0, 0.0),
            p2: Vec2::new(20.0, 0.0),
            max_fraction: 1.0,
        };
        let mut hits = Vec::new();
        tree.ray_cast(&input, |_sub, id| {
            hits.push(tree.user_data(id));
            // Clip hard at the first hit's near fraction
            0.3
        });
        assert_eq!(hits.len(), 1, "Clipped ray must not reach the far box");
    }
}
