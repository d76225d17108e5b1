//! Change detection between consecutive backend snapshots.
//!
//! Pure functions, no side effects. The poller feeds each freshly fetched
//! snapshot through these to decide whether a broadcast fires.

use serde_json::Value;

use kakehashi_shared::protocol::{Room, SnapshotDelta};

/// Relative change in a numeric stats field that counts as "changed"
pub const STATS_CHANGE_THRESHOLD: f64 = 0.01;

/// Decide whether a stats snapshot differs enough from the previous one to
/// broadcast.
///
/// The first observation always counts as changed. Afterwards, numeric
/// fields count when they moved by more than [`STATS_CHANGE_THRESHOLD`]
/// relative to the old value (an old value of zero counts whenever the new
/// value differs), and string fields compare by inequality. Other value
/// types and fields absent from the new snapshot are ignored.
pub fn stats_changed(previous: Option<&Value>, next: &Value) -> bool {
    let Some(previous) = previous else {
        return true;
    };

    let Some(next_obj) = next.as_object() else {
        return previous != next;
    };

    for (key, new_value) in next_obj {
        let Some(old_value) = previous.get(key) else {
            continue;
        };

        if let (Some(old_num), Some(new_num)) = (old_value.as_f64(), new_value.as_f64()) {
            if old_num == 0.0 {
                if new_num != old_num {
                    tracing::debug!("Stats change detected in {}: {} -> {}", key, old_num, new_num);
                    return true;
                }
            } else if ((new_num - old_num) / old_num).abs() > STATS_CHANGE_THRESHOLD {
                tracing::debug!("Stats change detected in {}: {} -> {}", key, old_num, new_num);
                return true;
            }
            continue;
        }

        if let (Some(old_str), Some(new_str)) = (old_value.as_str(), new_value.as_str())
            && old_str != new_str
        {
            tracing::debug!("Stats change detected in {}: {} -> {}", key, old_str, new_str);
            return true;
        }
    }

    false
}

/// Compute the delta between two observations of a collection snapshot.
///
/// Items are keyed via [`Room::item_key`]; items with no derivable key are
/// skipped. Returns `None` when nothing changed, so the caller can skip the
/// broadcast entirely.
pub fn collection_delta(room: Room, previous: &[Value], next: &[Value]) -> Option<SnapshotDelta> {
    let previous_keyed: Vec<(String, &Value)> = keyed_items(room, previous);
    let next_keyed: Vec<(String, &Value)> = keyed_items(room, next);

    let mut delta = SnapshotDelta::default();

    for (key, new_item) in &next_keyed {
        match previous_keyed.iter().find(|(k, _)| k == key) {
            None => delta.added.push((*new_item).clone()),
            Some((_, old_item)) if old_item != new_item => {
                delta.updated.push((*new_item).clone());
            }
            Some(_) => {}
        }
    }

    for (key, _) in &previous_keyed {
        if !next_keyed.iter().any(|(k, _)| k == key) {
            delta.deleted.push(key.clone());
        }
    }

    if delta.is_empty() {
        None
    } else {
        tracing::debug!(
            "{} changes: {} updated, {} added, {} deleted",
            room,
            delta.updated.len(),
            delta.added.len(),
            delta.deleted.len()
        );
        Some(delta)
    }
}

fn keyed_items<'a>(room: Room, items: &'a [Value]) -> Vec<(String, &'a Value)> {
    items
        .iter()
        .filter_map(|item| room.item_key(item).map(|key| (key, item)))
        .collect()
}
