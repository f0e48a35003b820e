use serde::{Deserialize, Serialize};

/// Opaque pagination cursor over a `(updated_at, id)` compound key.
///
/// Encoding both fields (not just `updated_at`) keeps the cursor stable
/// under concurrent inserts: two rows can share `updated_at` down to the
/// second, but never share `id`, so `WHERE (updated_at, id) < (cursor.updated_at,
/// cursor.id)` never re-visits or skips a row regardless of what else is
/// inserted between pages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cursor {
    pub updated_at: String,
    pub id: String,
}

impl Cursor {
    pub fn encode(&self) -> String {
        let json = serde_json::to_string(self).expect("Cursor serializes");
        base64::Engine::encode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, json)
    }

    pub fn decode(s: &str) -> Result<Self, String> {
        let bytes = base64::Engine::decode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, s)
            .map_err(|e| format!("invalid cursor: {e}"))?;
        serde_json::from_slice(&bytes).map_err(|e| format!("invalid cursor: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let c = Cursor {
            updated_at: "2026-01-01T00:00:00Z".to_string(),
            id: "abc-123".to_string(),
        };
        let encoded = c.encode();
        let decoded = Cursor::decode(&encoded).unwrap();
        assert_eq!(decoded.updated_at, c.updated_at);
        assert_eq!(decoded.id, c.id);
    }

    #[test]
    fn decode_garbage_is_err() {
        assert!(Cursor::decode("not-a-cursor!!").is_err());
    }
}
