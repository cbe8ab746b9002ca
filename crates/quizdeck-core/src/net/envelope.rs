use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use ulid::Ulid;

use crate::time::unix_ms;

/// The wire envelope shared by every message in both directions:
///
/// ```json
/// { "type": "ITEM_STARTED", "id": "<ULID>", "ts": 1722500000000, "payload": { … } }
/// ```
///
/// `type` and `payload` come from the flattened message enum; `id` is a fresh
/// ULID per message (clients dedupe at-least-once broadcasts by it); `ts` is
/// the sender's wall clock, informational only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    #[serde(flatten)]
    pub msg: T,
    pub id: String,
    pub ts: u64,
}

impl<T: Serialize + DeserializeOwned> Envelope<T> {
    pub fn new(msg: T) -> Self {
        Self {
            msg,
            id: Ulid::new().to_string(),
            ts: unix_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    #[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
    enum Probe {
        PingPong { n: u32 },
    }

    #[test]
    fn envelope_flattens_type_and_payload() {
        let env = Envelope::new(Probe::PingPong { n: 3 });
        let json: serde_json::Value = serde_json::from_str(&serde_json::to_string(&env).unwrap()).unwrap();
        assert_eq!(json["type"], "PING_PONG");
        assert_eq!(json["payload"]["n"], 3);
        assert!(json["id"].as_str().unwrap().len() == 26, "ULID is 26 chars");
        assert!(json["ts"].as_u64().unwrap() > 0);
    }

    #[test]
    fn envelope_round_trips() {
        let env = Envelope::new(Probe::PingPong { n: 9 });
        let text = serde_json::to_string(&env).unwrap();
        let back: Envelope<Probe> = serde_json::from_str(&text).unwrap();
        assert_eq!(back.msg, Probe::PingPong { n: 9 });
        assert_eq!(back.id, env.id);
    }

    #[test]
    fn fresh_envelopes_get_distinct_ids() {
        let a = Envelope::new(Probe::PingPong { n: 1 });
        let b = Envelope::new(Probe::PingPong { n: 1 });
        assert_ne!(a.id, b.id);
    }
}
