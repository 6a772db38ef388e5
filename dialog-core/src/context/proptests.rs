//! Property-based tests for the context and its queries.
//!
//! These tests verify that:
//!
//! - the freshest value and the bounded count survive any write sequence
//! - ages are non-negative and grow with the counter
//! - newer/exactly/older partition a value list for any threshold
//! - the visited-state history stays capped and ordered
//! - serialization is lossless

use super::*;
use proptest::prelude::*;
use serde_json::{json, Value};

// Strategy for small scalar payloads
fn scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i32>().prop_map(|n| json!(n)),
        "[a-z]{1,8}".prop_map(|s| json!(s)),
        any::<bool>().prop_map(|b| json!(b)),
    ]
}

// A write sequence: (payload, advance the counter afterwards?)
fn writes() -> impl Strategy<Value = Vec<(Value, bool)>> {
    proptest::collection::vec((scalar(), any::<bool>()), 1..60)
}

fn build(writes: &[(Value, bool)], max_depth: usize) -> Context {
    let mut ctx = Context::with_limits(max_depth, DEFAULT_HISTORY_LIMIT);
    for (value, advance) in writes {
        ctx.set_value("e", value.clone());
        if *advance {
            ctx.advance();
        }
    }
    ctx
}

proptest! {
    /// The freshest value is the last written one; the count is bounded.
    #[test]
    fn current_is_last_write_and_count_is_bounded(
        values in proptest::collection::vec(scalar(), 1..80),
        max_depth in 2usize..40,
    ) {
        let mut ctx = Context::with_limits(max_depth, DEFAULT_HISTORY_LIMIT);
        for value in &values {
            ctx.set_value("e", value.clone());
        }

        prop_assert_eq!(ctx.query("e").current_value(), values.last());
        prop_assert_eq!(ctx.query("e").count(), values.len().min(max_depth - 1));
        prop_assert!(ctx.entity_history("e").unwrap().is_newest_first());
    }

    /// Age never goes negative and never shrinks as the counter advances.
    #[test]
    fn age_is_non_negative_and_monotone(writes in writes(), extra in 0u64..10) {
        let mut ctx = build(&writes, DEFAULT_MAX_DEPTH);
        let ages = |ctx: &Context| -> Vec<u64> {
            ctx.get_all("e", None, None, &[])
                .iter()
                .map(|v| v.age(ctx.counter()))
                .collect()
        };
        let before = ages(&ctx);
        for _ in 0..extra {
            ctx.advance();
        }
        let after = ages(&ctx);

        prop_assert_eq!(before.len(), after.len());
        for (b, a) in before.iter().zip(&after) {
            prop_assert!(a >= b);
            prop_assert_eq!(*a, b + extra);
        }
    }

    /// newer ∪ exactly ∪ older partitions the list for any message threshold.
    #[test]
    fn message_filters_partition(writes in writes(), threshold in 0u64..40) {
        let ctx = build(&writes, DEFAULT_MAX_DEPTH);
        let all = ctx.query("e").all();
        let newer = ctx.query("e").newer_than(TimeFilter::messages(threshold)).all();
        let exact = ctx.query("e").exactly(TimeFilter::messages(threshold)).all();
        let older = ctx.query("e").older_than(TimeFilter::messages(threshold)).all();

        prop_assert_eq!(newer.len() + exact.len() + older.len(), all.len());
        for item in &all {
            let hits = [&newer, &exact, &older]
                .iter()
                .filter(|part| part.iter().any(|p| std::ptr::eq(*p, *item)))
                .count();
            prop_assert_eq!(hits, 1);
        }
    }

    /// get_all_first returns distinct values of one age tier only.
    #[test]
    fn all_first_is_distinct_single_tier(writes in writes()) {
        let ctx = build(&writes, DEFAULT_MAX_DEPTH);
        let first = ctx.get_all_first("e", None);

        prop_assert!(!first.is_empty());
        let age = first[0].age(ctx.counter());
        prop_assert!(first.iter().all(|v| v.age(ctx.counter()) == age));
        for (i, a) in first.iter().enumerate() {
            for b in &first[i + 1..] {
                prop_assert_ne!(&a.value, &b.value);
            }
        }
    }

    /// The visited-state history keeps the most recent entries, in order.
    #[test]
    fn state_history_is_capped(count in 0usize..60) {
        let mut ctx = Context::new();
        for i in 0..count {
            ctx.add_state(format!("flow.s{i}"));
        }

        let names: Vec<String> = ctx.history().iter().map(|s| s.name.clone()).collect();
        let expected: Vec<String> = (count.saturating_sub(DEFAULT_HISTORY_LIMIT)..count)
            .map(|i| format!("flow.s{i}"))
            .collect();
        prop_assert!(names.len() <= DEFAULT_HISTORY_LIMIT);
        prop_assert_eq!(names, expected);
    }

    /// Serializing and deserializing yields an identical context.
    #[test]
    fn json_round_trip_is_lossless(writes in writes(), states in 0usize..25) {
        let mut ctx = build(&writes, DEFAULT_MAX_DEPTH);
        ctx.set_current_state("flow.state");
        ctx.set("other", json!({"value": "x", "confidence": 0.5})).unwrap();
        for i in 0..states {
            ctx.add_state(format!("flow.s{i}"));
        }

        let json = ctx.to_json().unwrap();
        let restored = Context::from_json(&json, DEFAULT_MAX_DEPTH, DEFAULT_HISTORY_LIMIT).unwrap();
        prop_assert_eq!(restored.to_document(), ctx.to_document());
    }
}
