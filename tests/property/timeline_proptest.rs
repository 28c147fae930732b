//! Property tests for `MessageTimeline`

use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;
use std::collections::HashSet;
use uuid::Uuid;

use shadowchat::client::messaging::MessageTimeline;
use shadowchat::shared::{ChangeEvent, ConversationKey, Message};

const POOL: usize = 6;

/// A notification about message `slot` of a fixed pool
#[derive(Debug, Clone)]
enum Op {
    Insert { slot: usize },
    Update { slot: usize, version: i64, read: bool },
    Delete { slot: usize, with_row: bool },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0..POOL).prop_map(|slot| Op::Insert { slot }),
        3 => (0..POOL, 1..20i64, any::<bool>())
            .prop_map(|(slot, version, read)| Op::Update { slot, version, read }),
        1 => (0..POOL, any::<bool>()).prop_map(|(slot, with_row)| Op::Delete { slot, with_row }),
    ]
}

struct Pool {
    key: ConversationKey,
    rows: Vec<Message>,
}

impl Pool {
    fn new() -> Self {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let rows = (0..POOL)
            .map(|i| {
                let (from, to) = if i % 2 == 0 { (a, b) } else { (b, a) };
                let mut m = Message::new(from, to, format!("m{}", i));
                // Pairs share a timestamp so ties fall back to the id.
                m.created_at = base + Duration::seconds((i / 2) as i64);
                m.updated_at = m.created_at;
                m
            })
            .collect();
        Self {
            key: ConversationKey::new(a, b),
            rows,
        }
    }

    fn event(&self, op: &Op) -> ChangeEvent<Message> {
        match *op {
            Op::Insert { slot } => ChangeEvent::Insert(self.rows[slot].clone()),
            Op::Update { slot, version, read } => {
                let mut row = self.rows[slot].clone();
                row.updated_at = row.created_at + Duration::seconds(version);
                row.is_read = read;
                row.content = format!("m{} v{}", slot, version);
                ChangeEvent::Update(row)
            }
            Op::Delete { slot, with_row: true } => ChangeEvent::deleted(self.rows[slot].clone()),
            Op::Delete { slot, with_row: false } => ChangeEvent::Delete {
                id: self.rows[slot].id,
                old: None,
            },
        }
    }
}

proptest! {
    #[test]
    fn prop_timeline_stays_sorted_unique_and_tombstoned(ops in prop::collection::vec(op_strategy(), 0..60)) {
        let pool = Pool::new();
        let mut timeline = MessageTimeline::new(pool.key);
        let mut deleted = HashSet::new();
        let mut read = HashSet::new();

        for op in &ops {
            if let Op::Delete { slot, .. } = op {
                deleted.insert(pool.rows[*slot].id);
            }
            timeline.apply(pool.event(op));

            let messages = timeline.messages();
            for pair in messages.windows(2) {
                prop_assert!(pair[0].sort_key() < pair[1].sort_key());
            }
            for m in messages {
                prop_assert!(!deleted.contains(&m.id));
                if read.contains(&m.id) {
                    prop_assert!(m.is_read, "is_read reverted for {}", m.id);
                }
                if m.is_read {
                    read.insert(m.id);
                }
            }
        }
    }

    #[test]
    fn prop_insert_order_does_not_matter(order in Just((0..POOL).collect::<Vec<_>>()).prop_shuffle()) {
        let pool = Pool::new();
        let mut shuffled = MessageTimeline::new(pool.key);
        for slot in &order {
            shuffled.apply(ChangeEvent::Insert(pool.rows[*slot].clone()));
        }
        let mut in_order = MessageTimeline::new(pool.key);
        in_order.replace_all(pool.rows.clone());

        prop_assert_eq!(shuffled.messages(), in_order.messages());
    }

    #[test]
    fn prop_newest_update_wins(versions in prop::collection::vec(1..50i64, 1..10)) {
        let pool = Pool::new();
        let mut timeline = MessageTimeline::new(pool.key);
        timeline.apply(ChangeEvent::Insert(pool.rows[0].clone()));

        for version in &versions {
            timeline.apply(pool.event(&Op::Update { slot: 0, version: *version, read: false }));
        }
        let newest = versions.iter().copied().max().unwrap_or(0);
        let held = timeline.get(pool.rows[0].id).expect("held");
        prop_assert_eq!(held.updated_at, pool.rows[0].created_at + Duration::seconds(newest));
        prop_assert_eq!(timeline.len(), 1);
    }
}
