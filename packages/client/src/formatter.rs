//! Display formatting for the CLI watcher.

use kakehashi_shared::{
    protocol::{ConnectionStatus, Room, ServerEvent, SnapshotDelta},
    time::timestamp_to_rfc3339,
};

/// Formatter for update and status lines shown by the CLI
pub struct UpdateFormatter;

impl UpdateFormatter {
    /// Format an incoming update event as a single display line
    ///
    /// # Arguments
    ///
    /// * `event` - The server event to render; non-update events yield `None`
    pub fn format_update(event: &ServerEvent) -> Option<String> {
        match event {
            ServerEvent::StatsUpdate { timestamp, data } => {
                let fields = data.as_object().map(|obj| obj.len()).unwrap_or(0);
                Some(format!(
                    "\n[stats] snapshot updated ({} fields) at {}\n",
                    fields,
                    timestamp_to_rfc3339(*timestamp)
                ))
            }
            ServerEvent::RecommendationsUpdate { timestamp, delta } => Some(format!(
                "\n[recommendations] {} at {}\n",
                Self::format_delta_summary(delta),
                timestamp_to_rfc3339(*timestamp)
            )),
            ServerEvent::FacilitiesUpdate { timestamp, delta } => Some(format!(
                "\n[facilities] {} at {}\n",
                Self::format_delta_summary(delta),
                timestamp_to_rfc3339(*timestamp)
            )),
            _ => None,
        }
    }

    /// Summarize a delta as "N updated, N added, N deleted"
    pub fn format_delta_summary(delta: &SnapshotDelta) -> String {
        format!(
            "{} updated, {} added, {} deleted",
            delta.updated.len(),
            delta.added.len(),
            delta.deleted.len()
        )
    }

    /// Format a connection status transition
    pub fn format_status(status: ConnectionStatus, timestamp: i64) -> String {
        format!(
            "\n* connection {} at {}\n",
            status,
            timestamp_to_rfc3339(timestamp)
        )
    }

    /// Format the per-room state summary for the `status` command
    pub fn format_room_line(room: Room, item_count: usize, since: &str) -> String {
        format!(
            "{:<16} {:>5} item(s)  last update: {}\n",
            room.to_string(),
            item_count,
            since
        )
    }
}

/// Render elapsed milliseconds as a coarse human-readable age.
pub fn format_time_since(elapsed_millis: i64) -> String {
    let seconds = elapsed_millis / 1000;
    if seconds < 10 {
        return "Just now".to_string();
    }
    if seconds < 60 {
        return format!("{}s ago", seconds);
    }
    let minutes = seconds / 60;
    if minutes < 60 {
        return format!("{}m ago", minutes);
    }
    let hours = minutes / 60;
    if hours < 24 {
        return format!("{}h ago", hours);
    }
    format!("{}d ago", hours / 24)
}
