use serde_json::json;

/// Value type of a key's column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    Int,
    Float,
    String,
    Bool,
    FeatureBundle,
}

impl KeyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyType::Int => "int",
            KeyType::Float => "float",
            KeyType::String => "string",
            KeyType::Bool => "bool",
            KeyType::FeatureBundle => "feature_bundle",
        }
    }
}

/// Lifecycle status shared by keys and params.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Active,
    Deprecated,
    Blocked,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Active => "active",
            Status::Deprecated => "deprecated",
            Status::Blocked => "blocked",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DefaultValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(&'static str),
}

impl DefaultValue {
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            DefaultValue::Int(v) => json!(v),
            DefaultValue::Float(v) => json!(v),
            DefaultValue::Bool(v) => json!(v),
            DefaultValue::Str(v) => json!(v),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyMeta {
    pub id: u32,
    pub name: &'static str,
    pub key_type: KeyType,
    pub nullable: bool,
    pub status: Status,
    pub allow_read: bool,
    pub allow_write: bool,
    pub default: Option<DefaultValue>,
}

/// Id of the identifier key. Never writable by any task.
pub const KEY_ID: u32 = 1;
pub const KEY_MODEL_SCORE_1: u32 = 1001;
pub const KEY_MODEL_SCORE_2: u32 = 1002;
pub const KEY_FINAL_SCORE: u32 = 2001;
pub const KEY_MEDIA_AGE_HOURS: u32 = 2002;
pub const KEY_COUNTRY: u32 = 3001;
pub const KEY_TITLE: u32 = 3002;
pub const KEY_IS_VERIFIED: u32 = 3003;
pub const KEY_FEATURES_ESR: u32 = 4001;
pub const KEY_LEGACY_SCORE: u32 = 9001;
pub const KEY_QUARANTINED_SCORE: u32 = 9002;

const fn key(
    id: u32,
    name: &'static str,
    key_type: KeyType,
    nullable: bool,
    status: Status,
    allow_write: bool,
) -> KeyMeta {
    KeyMeta {
        id,
        name,
        key_type,
        nullable,
        status,
        allow_read: true,
        allow_write,
        default: None,
    }
}

/// The key registry, ordered by id.
pub static KEYS: &[KeyMeta] = &[
    key(KEY_ID, "id", KeyType::Int, false, Status::Active, false),
    key(KEY_MODEL_SCORE_1, "model_score_1", KeyType::Float, true, Status::Active, true),
    key(KEY_MODEL_SCORE_2, "model_score_2", KeyType::Float, true, Status::Active, true),
    key(KEY_FINAL_SCORE, "final_score", KeyType::Float, false, Status::Active, true),
    key(KEY_MEDIA_AGE_HOURS, "media_age_hours", KeyType::Float, true, Status::Active, true),
    key(KEY_COUNTRY, "country", KeyType::String, true, Status::Active, true),
    key(KEY_TITLE, "title", KeyType::String, true, Status::Active, true),
    KeyMeta {
        default: Some(DefaultValue::Bool(false)),
        ..key(KEY_IS_VERIFIED, "is_verified", KeyType::Bool, false, Status::Active, true)
    },
    key(KEY_FEATURES_ESR, "features_esr", KeyType::FeatureBundle, true, Status::Active, false),
    key(KEY_LEGACY_SCORE, "legacy_score", KeyType::Float, true, Status::Deprecated, true),
    key(KEY_QUARANTINED_SCORE, "quarantined_score", KeyType::Float, true, Status::Blocked, true),
];

pub fn find_key_by_id(id: u32) -> Option<&'static KeyMeta> {
    KEYS.binary_search_by_key(&id, |k| k.id)
        .ok()
        .map(|i| &KEYS[i])
}

pub fn find_key_by_name(name: &str) -> Option<&'static KeyMeta> {
    KEYS.iter().find(|k| k.name == name)
}

/// Name of `id`, or its decimal form if it isn't registered.
pub fn key_name(id: u32) -> String {
    match find_key_by_id(id) {
        Some(meta) => meta.name.to_string(),
        None => id.to_string(),
    }
}

/// Digest over the canonical JSON form of the key registry.
pub fn key_registry_digest() -> String {
    let entries: Vec<serde_json::Value> = KEYS
        .iter()
        .map(|k| {
            json!({
                "id": k.id,
                "name": k.name,
                "type": k.key_type.as_str(),
                "nullable": k.nullable,
                "status": k.status.as_str(),
                "allow_read": k.allow_read,
                "allow_write": k.allow_write,
                "default": k.default.map(|d| d.to_json()),
            })
        })
        .collect();
    crate::canonical::digest(&json!({"schema_version": 1, "keys": entries}))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_key_table_is_sorted_and_unique() {
        assert!(KEYS.windows(2).all(|w| w[0].id < w[1].id));
        let mut names: Vec<_> = KEYS.iter().map(|k| k.name).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), KEYS.len());
    }

    #[test]
    fn test_lookups() {
        assert_eq!(find_key_by_id(KEY_COUNTRY).unwrap().name, "country");
        assert_eq!(find_key_by_name("final_score").unwrap().id, KEY_FINAL_SCORE);
        assert!(find_key_by_id(7).is_none());
        assert!(!find_key_by_id(KEY_ID).unwrap().allow_write);
        assert_eq!(key_name(KEY_TITLE), "title");
        assert_eq!(key_name(12345), "12345");
    }

    #[test]
    fn test_digest_is_stable() {
        assert_eq!(key_registry_digest(), key_registry_digest());
        assert_eq!(key_registry_digest().len(), 64);
    }
}
