/// Generate a push `request_id`.
///
/// The vendor requires every push submission to carry a unique id of 10-32
/// characters and deduplicates resubmissions on it. Format here:
/// epoch millis followed by 6 random digits (19 chars for current dates).
pub fn generate_request_id() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;

    let mut result = String::with_capacity(19);
    result.push_str(&timestamp.to_string());
    for _ in 0..6 {
        result.push(char::from(b'0' + fastrand::u8(0..10)));
    }

    result
}
