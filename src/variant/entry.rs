use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
pub(super) struct VariantEntry {
    pub id: u64,
    pub entry_id: String,
    pub content_type: String,
    pub cache_control: Option<String>,
    pub created_at: SystemTime,
    pub content_hash: String,
    pub content_length: u64,
}

/// Metadata sidecar written next to each variant body.
#[derive(Debug, Serialize, Deserialize)]
pub(super) struct PersistedEntry {
    pub key: String,
    pub content_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<String>,
    pub created_at_ms: u64,
    pub content_hash: String,
    pub content_length: u64,
}

impl PersistedEntry {
    pub(super) fn created_at(&self) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_millis(self.created_at_ms)
    }
}

impl VariantEntry {
    pub(super) fn to_persisted(&self, key: &str) -> PersistedEntry {
        PersistedEntry {
            key: key.to_string(),
            content_type: self.content_type.clone(),
            cache_control: self.cache_control.clone(),
            created_at_ms: self
                .created_at
                .duration_since(SystemTime::UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64,
            content_hash: self.content_hash.clone(),
            content_length: self.content_length,
        }
    }

    pub(super) fn from_persisted(persisted: &PersistedEntry, entry_id: &str, id: u64) -> Self {
        Self {
            id,
            entry_id: entry_id.to_string(),
            content_type: persisted.content_type.clone(),
            cache_control: persisted.cache_control.clone(),
            created_at: persisted.created_at(),
            content_hash: persisted.content_hash.clone(),
            content_length: persisted.content_length,
        }
    }
}

/// File name of a variant on disk: the hex blake3 digest of its canonical key text.
pub(super) fn entry_id_for_key(key: &str) -> String {
    blake3::hash(key.as_bytes()).to_hex().to_string()
}

pub(super) fn valid_content_hash(value: &str) -> bool {
    value.len() == 64 && value.as_bytes().iter().all(|b| b.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persisted_timestamps_keep_millisecond_precision() {
        let created_at = SystemTime::UNIX_EPOCH + Duration::from_millis(1_700_000_000_123);
        let entry = VariantEntry {
            id: 1,
            entry_id: entry_id_for_key("cat.jpg/width=10"),
            content_type: "image/png".to_string(),
            cache_control: None,
            created_at,
            content_hash: blake3::hash(b"x").to_hex().to_string(),
            content_length: 1,
        };
        let persisted = entry.to_persisted("cat.jpg/width=10");
        assert_eq!(persisted.created_at_ms, 1_700_000_000_123);

        let json = serde_json::to_vec(&persisted).expect("serialize");
        let decoded: PersistedEntry = serde_json::from_slice(&json).expect("deserialize");
        let restored = VariantEntry::from_persisted(&decoded, &entry.entry_id, 2);
        assert_eq!(restored.created_at, created_at);
        assert_eq!(restored.content_type, "image/png");
    }

    #[test]
    fn entry_ids_are_stable_hex_digests() {
        let id = entry_id_for_key("rio/cat.jpg/format=webp");
        assert_eq!(id, entry_id_for_key("rio/cat.jpg/format=webp"));
        assert!(valid_content_hash(&id));
        assert!(!valid_content_hash("not-a-hash"));
    }
}
