//! Property tests for the budget allocator.

use std::sync::Arc;

use ctxpack_context::{ContextAssembler, ContextBudgetAllocator};
use ctxpack_core::{
    ContextItem, DropReason, Error, Priority, SourceKind, WhitespaceTokenCounter,
};
use proptest::prelude::*;

fn allocator() -> ContextBudgetAllocator {
    ContextBudgetAllocator::new(Arc::new(WhitespaceTokenCounter))
}

fn priority() -> impl Strategy<Value = Priority> {
    prop_oneof![
        Just(Priority::Critical),
        Just(Priority::High),
        Just(Priority::Medium),
        Just(Priority::Low),
    ]
}

fn source_kind() -> impl Strategy<Value = SourceKind> {
    prop_oneof![
        Just(SourceKind::Custom),
        Just(SourceKind::Rag),
        Just(SourceKind::PathReference),
        Just(SourceKind::Tool),
    ]
}

/// Items with unique names and sequence indices, costs up to 400.
fn items() -> impl Strategy<Value = Vec<ContextItem>> {
    prop::collection::vec((priority(), source_kind(), 0usize..400, 1usize..40), 0..30).prop_map(
        |specs| {
            specs
                .into_iter()
                .enumerate()
                .map(|(i, (priority, kind, cost, words))| {
                    let content = vec!["tok"; words].join(" ");
                    ContextItem::new(format!("item-{i}"), content, kind, priority, cost)
                        .with_sequence_index(i)
                })
                .collect()
        },
    )
}

proptest! {
    #[test]
    fn used_tokens_never_exceed_budget(
        items in items(),
        max_tokens in 1usize..3000,
        reserved_pct in 0usize..100,
    ) {
        let reserved = max_tokens * reserved_pct / 100;
        let budget = max_tokens - reserved;
        match allocator().allocate(items, max_tokens, reserved) {
            Ok(payload) => {
                prop_assert!(payload.used_tokens <= budget);
                let total: usize = payload.items.iter().map(|i| i.token_cost).sum();
                prop_assert_eq!(total, payload.used_tokens);
            }
            Err(err) => prop_assert!(matches!(err, Error::BudgetInfeasible { .. }), "expected BudgetInfeasible error"),
        }
    }

    #[test]
    fn critical_items_included_whole_when_they_fit(
        items in items(),
        budget in 1usize..3000,
    ) {
        let critical_total: usize = items
            .iter()
            .filter(|i| i.priority == Priority::Critical)
            .map(|i| i.token_cost)
            .sum();
        prop_assume!(critical_total <= budget);

        let payload = allocator().allocate(items.clone(), budget, 0).unwrap();
        for critical in items.iter().filter(|i| i.priority == Priority::Critical) {
            let included = payload.get(&critical.name);
            prop_assert!(included.is_some(), "critical {} missing", critical.name);
            prop_assert_eq!(included.map(|i| i.truncated), Some(false));
            prop_assert_eq!(included.map(|i| i.token_cost), Some(critical.token_cost));
        }
    }

    #[test]
    fn higher_tier_never_loses_to_an_equal_or_larger_lower_tier_item(
        items in items(),
        budget in 1usize..3000,
    ) {
        if let Ok(payload) = allocator().allocate(items, budget, 0) {
            for dropped in payload
                .dropped_items
                .iter()
                .filter(|d| d.reason == DropReason::BudgetExhausted)
            {
                for included in payload.items.iter().filter(|i| i.priority > dropped.priority) {
                    prop_assert!(
                        included.token_cost < dropped.token_cost,
                        "{} ({}, {} tokens) dropped while {} ({}, {} tokens) included",
                        dropped.name, dropped.priority, dropped.token_cost,
                        included.name, included.priority, included.token_cost
                    );
                }
            }
        }
    }

    #[test]
    fn included_items_follow_tier_then_sequence(
        items in items(),
        budget in 1usize..3000,
    ) {
        if let Ok(payload) = allocator().allocate(items, budget, 0) {
            let keys: Vec<(Priority, usize)> = payload.items.iter().map(|i| i.order_key()).collect();
            let mut sorted = keys.clone();
            sorted.sort();
            prop_assert_eq!(keys, sorted);
        }
    }

    #[test]
    fn allocation_and_assembly_are_deterministic(
        items in items(),
        budget in 1usize..3000,
    ) {
        let first = allocator().allocate(items.clone(), budget, 0);
        let second = allocator().allocate(items, budget, 0);
        match (first, second) {
            (Ok(a), Ok(b)) => {
                let a_json = ContextAssembler::assemble(&a).unwrap();
                let b_json = ContextAssembler::assemble(&b).unwrap();
                prop_assert_eq!(a, b);
                prop_assert_eq!(a_json, b_json);
            }
            (Err(a), Err(b)) => prop_assert_eq!(a.to_string(), b.to_string()),
            _ => prop_assert!(false, "allocation outcome changed between runs"),
        }
    }
}
