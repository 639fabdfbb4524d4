//! ContextBudgetAllocator — fit candidate items into a hard token budget.
//!
//! Items are admitted tier by tier (CRITICAL → LOW), in sequence order
//! within a tier. A non-critical item that does not fit is dropped whole.
//! A CRITICAL item that does not fit first evicts already-included
//! lower-tier items (LOW first, newest first within a tier), then falls
//! back to truncating its own content. If truncation would keep less than
//! the configured floor, the build fails with [`Error::BudgetInfeasible`].
//!
//! Allocation is a pure function of its input: no I/O, no clocks, and the
//! output order is tier-then-sequence regardless of admission order.

use std::sync::Arc;

use ctxpack_config::ContextConfig;
use ctxpack_core::{
    ContextItem, ContextPayload, DropInfo, DropReason, Error, Priority, Result, TokenCounter,
    TruncationInfo,
};
use tracing::debug;

/// Default share of a CRITICAL item that truncation must keep.
pub const DEFAULT_TRUNCATION_FLOOR: f64 = 0.5;

pub struct ContextBudgetAllocator {
    counter: Arc<dyn TokenCounter>,
    truncation_floor: f64,
}

impl std::fmt::Debug for ContextBudgetAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextBudgetAllocator")
            .field("counter", &self.counter.name())
            .field("truncation_floor", &self.truncation_floor)
            .finish()
    }
}

/// Running state of one allocation.
struct Allocation {
    budget: usize,
    used: usize,
    included: Vec<ContextItem>,
    dropped: Vec<DropInfo>,
    truncated: Vec<TruncationInfo>,
}

impl ContextBudgetAllocator {
    /// `counter` is used only to truncate CRITICAL content; item costs are
    /// taken from `token_cost` as given.
    pub fn new(counter: Arc<dyn TokenCounter>) -> Self {
        Self {
            counter,
            truncation_floor: DEFAULT_TRUNCATION_FLOOR,
        }
    }

    pub fn from_config(config: &ContextConfig, counter: Arc<dyn TokenCounter>) -> Self {
        Self::new(counter).with_truncation_floor(config.critical_truncation_floor)
    }

    pub fn with_truncation_floor(mut self, floor: f64) -> Self {
        self.truncation_floor = floor.clamp(0.0, 1.0);
        self
    }

    pub fn truncation_floor(&self) -> f64 {
        self.truncation_floor
    }

    /// Select, evict and truncate `items` to fit `max_tokens - reserved_tokens`.
    pub fn allocate(
        &self,
        items: Vec<ContextItem>,
        max_tokens: usize,
        reserved_tokens: usize,
    ) -> Result<ContextPayload> {
        let budget = budget_of(max_tokens, reserved_tokens)?;
        let mut allocation = Allocation {
            budget,
            used: 0,
            included: Vec::with_capacity(items.len()),
            dropped: Vec::new(),
            truncated: Vec::new(),
        };

        for item in in_tier_order(items) {
            self.admit(&mut allocation, item)?;
        }

        Ok(allocation.into_payload(max_tokens, reserved_tokens))
    }

    /// Admit more items into an existing payload under the same rules.
    ///
    /// Already-included items compete only through eviction: a late
    /// CRITICAL item may push out included HIGH/MEDIUM/LOW items, which
    /// are then reported as [`DropReason::Evicted`].
    pub fn extend(&self, payload: ContextPayload, items: Vec<ContextItem>) -> Result<ContextPayload> {
        let budget = budget_of(payload.max_tokens, payload.reserved_tokens)?;
        let ContextPayload {
            items: included,
            used_tokens,
            max_tokens,
            reserved_tokens,
            dropped_items,
            truncated_items,
            warnings,
        } = payload;

        let mut allocation = Allocation {
            budget,
            used: used_tokens,
            included,
            dropped: dropped_items,
            truncated: truncated_items,
        };
        for item in in_tier_order(items) {
            self.admit(&mut allocation, item)?;
        }

        Ok(allocation
            .into_payload(max_tokens, reserved_tokens)
            .with_warnings(warnings))
    }

    fn admit(&self, allocation: &mut Allocation, item: ContextItem) -> Result<()> {
        if allocation.fits(item.token_cost) {
            allocation.include_whole(item);
            return Ok(());
        }

        if item.priority != Priority::Critical {
            debug!(
                item = %item.name,
                priority = %item.priority,
                cost = item.token_cost,
                remaining = allocation.remaining(),
                "Dropping item, budget exhausted"
            );
            allocation
                .dropped
                .push(DropInfo::from_item(&item, DropReason::BudgetExhausted));
            return Ok(());
        }

        while !allocation.fits(item.token_cost) && allocation.evict_one(&item.name) {}
        if allocation.fits(item.token_cost) {
            allocation.include_whole(item);
            return Ok(());
        }

        let original_tokens = item.token_cost;
        let truncated = self.truncate(item, allocation.remaining())?;
        allocation.truncated.push(TruncationInfo {
            name: truncated.name.clone(),
            original_tokens,
            kept_tokens: truncated.token_cost,
        });
        allocation.include(truncated);
        Ok(())
    }

    /// Cut a CRITICAL item down to `available` tokens, or fail.
    fn truncate(&self, mut item: ContextItem, available: usize) -> Result<ContextItem> {
        let original = item.token_cost;
        let kept = self.counter.fit_prefix(&item.content, available);
        let kept_tokens = self.counter.count(kept);
        let floor = (original as f64 * self.truncation_floor).ceil() as usize;

        if kept_tokens == 0 || kept_tokens > available || kept_tokens < floor {
            return Err(Error::BudgetInfeasible {
                item: item.name,
                required: original,
                available,
                detail: format!(
                    "critical item cannot be truncated to fit (would keep {kept_tokens} of {original} tokens, floor {floor})"
                ),
            });
        }

        debug!(
            item = %item.name,
            original_tokens = original,
            kept_tokens,
            "Truncating critical item"
        );
        item.content = kept.to_string();
        item.token_cost = kept_tokens;
        item.truncated = true;
        Ok(item)
    }
}

impl Allocation {
    fn remaining(&self) -> usize {
        self.budget.saturating_sub(self.used)
    }

    fn fits(&self, cost: usize) -> bool {
        self.used.saturating_add(cost) <= self.budget
    }

    /// Include an item at its given cost.
    fn include_whole(&mut self, item: ContextItem) {
        if item.truncated {
            // Arrived cut (an oversized file); its original size is unknown.
            self.truncated.push(TruncationInfo {
                name: item.name.clone(),
                original_tokens: item.token_cost,
                kept_tokens: item.token_cost,
            });
        }
        self.include(item);
    }

    fn include(&mut self, item: ContextItem) {
        self.used += item.token_cost;
        self.included.push(item);
    }

    /// Evict the least important included item: lowest tier first, most
    /// recently inserted first within a tier. CRITICAL items are never
    /// evicted. Returns false when nothing is evictable.
    fn evict_one(&mut self, for_item: &str) -> bool {
        let victim = self
            .included
            .iter()
            .enumerate()
            .filter(|(_, i)| i.priority != Priority::Critical)
            .max_by_key(|(_, i)| i.order_key())
            .map(|(pos, _)| pos);

        let Some(pos) = victim else {
            return false;
        };
        let evicted = self.included.remove(pos);
        self.used -= evicted.token_cost;
        if evicted.truncated {
            self.truncated.retain(|t| t.name != evicted.name);
        }
        debug!(
            evicted = %evicted.name,
            priority = %evicted.priority,
            freed = evicted.token_cost,
            for_item = %for_item,
            "Evicted item for critical content"
        );
        self.dropped
            .push(DropInfo::from_item(&evicted, DropReason::Evicted));
        true
    }

    fn into_payload(mut self, max_tokens: usize, reserved_tokens: usize) -> ContextPayload {
        self.included.sort_by_key(ContextItem::order_key);
        ContextPayload {
            items: self.included,
            used_tokens: self.used,
            max_tokens,
            reserved_tokens,
            dropped_items: self.dropped,
            truncated_items: self.truncated,
            warnings: Vec::new(),
        }
    }
}

fn budget_of(max_tokens: usize, reserved_tokens: usize) -> Result<usize> {
    match max_tokens.checked_sub(reserved_tokens) {
        Some(budget) if budget > 0 => Ok(budget),
        _ => Err(Error::config(format!(
            "token budget must be positive (max_tokens {max_tokens}, reserved_tokens {reserved_tokens})"
        ))),
    }
}

/// Stable sort by tier, then sequence index.
fn in_tier_order(mut items: Vec<ContextItem>) -> Vec<ContextItem> {
    items.sort_by_key(ContextItem::order_key);
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctxpack_core::{SourceKind, WhitespaceTokenCounter};
    use pretty_assertions::assert_eq;

    fn allocator() -> ContextBudgetAllocator {
        ContextBudgetAllocator::new(Arc::new(WhitespaceTokenCounter))
    }

    fn item(name: &str, priority: Priority, cost: usize, seq: usize) -> ContextItem {
        ContextItem::new(name, name, SourceKind::Custom, priority, cost).with_sequence_index(seq)
    }

    fn words(n: usize) -> String {
        vec!["word"; n].join(" ")
    }

    fn names(payload: &ContextPayload) -> Vec<&str> {
        payload.items.iter().map(|i| i.name.as_str()).collect()
    }

    #[test]
    fn everything_fits() {
        let payload = allocator()
            .allocate(
                vec![
                    item("low", Priority::Low, 10, 0),
                    item("critical", Priority::Critical, 10, 1),
                    item("medium", Priority::Medium, 10, 2),
                ],
                100,
                10,
            )
            .unwrap();
        assert_eq!(names(&payload), vec!["critical", "medium", "low"]);
        assert_eq!(payload.used_tokens, 30);
        assert!(payload.dropped_items.is_empty());
    }

    #[test]
    fn non_positive_budget_is_a_config_error() {
        let err = allocator().allocate(vec![], 100, 100).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
        let err = allocator().allocate(vec![], 10, 20).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn non_critical_overflow_is_dropped_not_truncated() {
        let payload = allocator()
            .allocate(
                vec![
                    item("a", Priority::High, 60, 0),
                    item("b", Priority::High, 60, 1),
                    item("c", Priority::Medium, 30, 2),
                ],
                100,
                0,
            )
            .unwrap();
        assert_eq!(names(&payload), vec!["a", "c"]);
        assert_eq!(payload.used_tokens, 90);
        assert_eq!(payload.dropped_items.len(), 1);
        assert_eq!(payload.dropped_items[0].name, "b");
        assert_eq!(payload.dropped_items[0].reason, DropReason::BudgetExhausted);
        assert!(payload.truncated_items.is_empty());
    }

    #[test]
    fn insertion_order_kept_within_tier() {
        let payload = allocator()
            .allocate(
                vec![
                    item("third", Priority::Medium, 1, 7),
                    item("first", Priority::Medium, 1, 2),
                    item("second", Priority::Medium, 1, 5),
                ],
                10,
                0,
            )
            .unwrap();
        assert_eq!(names(&payload), vec!["first", "second", "third"]);
    }

    #[test]
    fn critical_processed_first_so_low_is_dropped() {
        let payload = allocator()
            .allocate(
                vec![
                    item("low", Priority::Low, 2000, 0),
                    item("critical", Priority::Critical, 9000, 1),
                ],
                10000,
                0,
            )
            .unwrap();
        assert_eq!(names(&payload), vec!["critical"]);
        assert_eq!(payload.used_tokens, 9000);
        assert!(!payload.items[0].truncated);
    }

    #[test]
    fn extend_evicts_lowest_tier_newest_first() {
        let base = allocator()
            .allocate(
                vec![
                    item("high", Priority::High, 30, 0),
                    item("low-old", Priority::Low, 30, 1),
                    item("low-new", Priority::Low, 30, 2),
                ],
                100,
                0,
            )
            .unwrap();
        assert_eq!(base.used_tokens, 90);

        let payload = allocator()
            .extend(base, vec![item("directive", Priority::Critical, 40, 3)])
            .unwrap();
        assert_eq!(names(&payload), vec!["directive", "high", "low-old"]);
        assert_eq!(payload.used_tokens, 100);
        assert_eq!(payload.dropped_items.len(), 1);
        assert_eq!(payload.dropped_items[0].name, "low-new");
        assert_eq!(payload.dropped_items[0].reason, DropReason::Evicted);
    }

    #[test]
    fn extend_never_evicts_for_non_critical() {
        let base = allocator()
            .allocate(vec![item("low", Priority::Low, 80, 0)], 100, 0)
            .unwrap();
        let payload = allocator()
            .extend(base, vec![item("high", Priority::High, 30, 1)])
            .unwrap();
        assert_eq!(names(&payload), vec!["low"]);
        assert_eq!(payload.dropped_items[0].name, "high");
        assert_eq!(payload.dropped_items[0].reason, DropReason::BudgetExhausted);
    }

    #[test]
    fn critical_never_evicts_critical() {
        let base = allocator()
            .allocate(vec![item("rules", Priority::Critical, 90, 0)], 100, 0)
            .unwrap();
        let err = allocator()
            .extend(base, vec![item("more-rules", Priority::Critical, 50, 1)])
            .unwrap_err();
        assert!(matches!(err, Error::BudgetInfeasible { .. }));
    }

    #[test]
    fn oversized_critical_is_truncated_to_budget() {
        let big = ContextItem::new(
            "safety",
            words(12000),
            SourceKind::Custom,
            Priority::Critical,
            12000,
        );
        let payload = allocator().allocate(vec![big], 10000, 0).unwrap();

        assert_eq!(payload.used_tokens, 10000);
        let item = &payload.items[0];
        assert!(item.truncated);
        assert_eq!(item.token_cost, 10000);
        assert_eq!(WhitespaceTokenCounter.count(&item.content), 10000);
        assert_eq!(
            payload.truncated_items,
            vec![TruncationInfo {
                name: "safety".into(),
                original_tokens: 12000,
                kept_tokens: 10000,
            }]
        );
    }

    #[test]
    fn truncation_below_floor_is_infeasible() {
        let big = ContextItem::new(
            "safety",
            words(12000),
            SourceKind::Custom,
            Priority::Critical,
            12000,
        );
        let err = allocator().allocate(vec![big], 5000, 0).unwrap_err();
        match err {
            Error::BudgetInfeasible {
                item,
                required,
                available,
                ..
            } => {
                assert_eq!(item, "safety");
                assert_eq!(required, 12000);
                assert_eq!(available, 5000);
            }
            other => panic!("expected BudgetInfeasible, got {other:?}"),
        }
    }

    #[test]
    fn zero_floor_accepts_any_nonempty_truncation() {
        let big = ContextItem::new(
            "safety",
            words(12000),
            SourceKind::Custom,
            Priority::Critical,
            12000,
        );
        let payload = allocator()
            .with_truncation_floor(0.0)
            .allocate(vec![big], 5000, 0)
            .unwrap();
        assert_eq!(payload.used_tokens, 5000);
    }

    #[test]
    fn allocation_is_deterministic() {
        let items = vec![
            item("a", Priority::Medium, 40, 0),
            item("b", Priority::High, 40, 1),
            item("c", Priority::Low, 40, 2),
            item("d", Priority::Critical, 10, 3),
        ];
        let first = allocator().allocate(items.clone(), 100, 0).unwrap();
        let second = allocator().allocate(items, 100, 0).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }
}
