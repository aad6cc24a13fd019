//! Identifier/mask routing engine.
//!
//! Combines the [`SubscriptionTable`] with its derived [`RoutingCache`].
//!
//! ```text
//! message ──► RoutingCache::resolve(can_id) ──hit──► [idx, idx, ...]
//!                    │ miss                              │
//!                    ▼                                   ▼
//!          SubscriptionTable::matching        Subscription::deliver (copy)
//! ```

pub mod cache;
pub mod subscription;

pub use cache::RoutingCache;
pub use subscription::{MessageReceiver, MessageSender, Subscription, SubscriptionTable};

use tracing::{debug, info};

use crate::core::message::CanMessage;

/// Subscription table plus routing cache.
#[derive(Debug)]
pub struct Router {
    table: SubscriptionTable,
    cache: RoutingCache,
}

impl Router {
    /// Create a router whose output channels buffer `buffer_size` messages.
    pub fn new(buffer_size: usize) -> Self {
        Self {
            table: SubscriptionTable::new(buffer_size),
            cache: RoutingCache::new(),
        }
    }

    /// Add a subscription. Returns false if the name is already in use.
    ///
    /// The cache is left untouched; it is rebuilt at the next start.
    pub fn watch(&mut self, name: &str, id: u32, mask: u32) -> bool {
        if !self.table.insert(name, id, mask) {
            return false;
        }
        info!(name = %name, id = format_args!("0x{:X}", id), mask = format_args!("0x{:X}", mask), "Watching CAN ids");
        true
    }

    /// Remove a subscription and invalidate the cache.
    pub fn unwatch(&mut self, name: &str) -> bool {
        if self.table.remove(name).is_none() {
            return false;
        }
        self.cache.invalidate();
        info!(name = %name, "Stopped watching CAN ids");
        true
    }

    /// Subscriptions matching `can_id`, in table order.
    pub fn resolve(&mut self, can_id: u32) -> impl Iterator<Item = &Subscription> + '_ {
        let table = &self.table;
        self.cache
            .resolve(can_id, table)
            .iter()
            .filter_map(move |&idx| table.at(idx))
    }

    /// Deliver a copy of `msg` to every matching subscription.
    ///
    /// Returns the number of matching subscriptions.
    pub fn route(&mut self, msg: &CanMessage) -> usize {
        let table = &self.table;
        let targets = self.cache.resolve(msg.can_id, table);

        for &idx in targets {
            if let Some(sub) = table.at(idx) {
                if !sub.deliver(msg) {
                    debug!(name = %sub.name(), can_id = msg.can_id, "No consumer on output channel");
                }
            }
        }
        targets.len()
    }

    /// Drop all cached routes.
    pub fn invalidate(&mut self) {
        self.cache.invalidate();
    }

    /// The subscription table.
    pub fn table(&self) -> &SubscriptionTable {
        &self.table
    }

    /// The routing cache.
    pub fn cache(&self) -> &RoutingCache {
        &self.cache
    }

    /// Attach a consumer to a subscription's output channel.
    pub fn subscribe(&self, name: &str) -> Option<MessageReceiver> {
        self.table.get(name).map(Subscription::subscribe)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(router: &mut Router, can_id: u32) -> Vec<String> {
        router
            .resolve(can_id)
            .map(|s| s.name().to_string())
            .collect()
    }

    #[test]
    fn test_overlapping_subscriptions() {
        let mut router = Router::new(8);
        assert!(router.watch("a", 0x100, 0x700));
        assert!(router.watch("b", 0x100, 0x7FF));

        assert_eq!(names(&mut router, 0x100), vec!["a", "b"]);
        assert_eq!(names(&mut router, 0x101), vec!["a"]);
        assert!(names(&mut router, 0x200).is_empty());
    }

    #[test]
    fn test_route_delivers_copies_in_order() {
        let mut router = Router::new(8);
        router.watch("a", 0x100, 0x700);
        router.watch("b", 0x100, 0x7FF);
        let mut rx_a = router.subscribe("a").unwrap();
        let mut rx_b = router.subscribe("b").unwrap();

        let exact = CanMessage::new(0x100, &[1]).unwrap();
        let near = CanMessage::new(0x101, &[2]).unwrap();
        assert_eq!(router.route(&exact), 2);
        assert_eq!(router.route(&near), 1);

        assert_eq!(rx_a.try_recv().unwrap(), exact);
        assert_eq!(rx_a.try_recv().unwrap(), near);
        assert_eq!(rx_b.try_recv().unwrap(), exact);
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn test_resolve_unchanged_by_invalidation() {
        let mut router = Router::new(8);
        router.watch("a", 0x100, 0x700);
        router.watch("b", 0x180, 0x780);
        router.watch("c", 0x000, 0x000);

        let ids = [0x000, 0x100, 0x17F, 0x180, 0x1FF, 0x200, 0x7FF];
        let before: Vec<_> = ids.iter().map(|&id| names(&mut router, id)).collect();
        router.invalidate();
        assert!(router.cache().is_empty());
        let after: Vec<_> = ids.iter().map(|&id| names(&mut router, id)).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_resolve_matches_rule_exhaustively() {
        let rules = [(0x100u32, 0x700u32), (0x123, 0x7FF), (0x040, 0x0F0)];
        let mut router = Router::new(8);
        for (i, (id, mask)) in rules.iter().enumerate() {
            router.watch(&format!("s{}", i), *id, *mask);
        }

        for x in 0..=0x7FFu32 {
            let expected: Vec<String> = rules
                .iter()
                .enumerate()
                .filter(|(_, (id, mask))| x & mask == id & mask)
                .map(|(i, _)| format!("s{}", i))
                .collect();
            assert_eq!(names(&mut router, x), expected, "id 0x{:X}", x);
        }
    }

    #[test]
    fn test_unwatch_leaves_no_stale_routes() {
        let mut router = Router::new(8);
        router.watch("a", 0x100, 0x700);
        router.watch("b", 0x100, 0x7FF);
        router.watch("c", 0x101, 0x7FF);
        assert_eq!(names(&mut router, 0x100), vec!["a", "b"]);
        assert_eq!(names(&mut router, 0x101), vec!["a", "c"]);

        assert!(router.unwatch("a"));
        assert!(router.cache().is_empty());
        assert_eq!(names(&mut router, 0x100), vec!["b"]);
        assert_eq!(names(&mut router, 0x101), vec!["c"]);

        assert!(!router.unwatch("a"));
    }

    #[test]
    fn test_duplicate_watch_keeps_first() {
        let mut router = Router::new(8);
        assert!(router.watch("a", 0x100, 0x7FF));
        assert!(!router.watch("a", 0x200, 0x7FF));
        assert_eq!(router.table().len(), 1);
        assert_eq!(names(&mut router, 0x100), vec!["a"]);
        assert!(names(&mut router, 0x200).is_empty());
    }
}
