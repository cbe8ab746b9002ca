/// Unix epoch milliseconds from the system clock. Used for the informational
/// `ts` field of wire envelopes and for persisted timestamps.
pub fn unix_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
