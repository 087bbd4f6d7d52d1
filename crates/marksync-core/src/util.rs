//! Small helpers shared by the sync service and its callers.

/// Longest device name announced to the rest of the chain, in characters
pub const MAX_DEVICE_NAME_CHARS: usize = 64;

/// Clean up a user-supplied device name: whitespace runs collapse to one
/// space and the result is capped at [`MAX_DEVICE_NAME_CHARS`].
///
/// Blank or missing input yields `None`.
pub fn normalize_device_name(value: Option<&str>) -> Option<String> {
    let collapsed = value?.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return None;
    }
    Some(collapsed.chars().take(MAX_DEVICE_NAME_CHARS).collect())
}

/// Current Unix timestamp in milliseconds.
pub fn unix_millis_now() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
