//! Serde helper storing a [`Duration`] as integer milliseconds.

use serde::{Deserialize, Deserializer, Serializer};
use std::time::Duration;

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
pub fn to_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_u64(to_millis(*duration))
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_millis() {
        assert_eq!(to_millis(Duration::from_millis(1500)), 1500);
        assert_eq!(to_millis(Duration::from_micros(999)), 0);
    }

    #[test]
    fn test_to_millis_saturates() {
        assert_eq!(to_millis(Duration::MAX), u64::MAX);

        let json = serde_json::to_value(Wrapper(Duration::MAX)).unwrap();
        assert_eq!(json, serde_json::json!(u64::MAX));
    }

    #[derive(serde::Serialize)]
    struct Wrapper(#[serde(with = "super")] Duration);
}
