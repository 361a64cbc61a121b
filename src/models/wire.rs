//! Shapes the server sends that need coercing before use.
//!
//! Identifiers arrive as strings, numbers or populated objects (`{"_id": ..}`),
//! and timestamps as RFC 3339 strings or epoch milliseconds.

use chrono::{DateTime, TimeZone, Utc};
use serde::de;
use serde::Deserialize;

/// An identifier in any of the shapes the API uses.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum IdRef {
    Text(String),
    Number(i64),
    Object(IdObject),
}

/// A populated document; only its identifier matters here.
#[derive(Debug, Clone, Deserialize)]
pub struct IdObject {
    #[serde(rename = "_id")]
    object_id: Option<Box<IdRef>>,
    id: Option<Box<IdRef>>,
}

impl IdRef {
    /// Coerce to the string form used for comparisons.
    pub fn into_string(self) -> String {
        match self {
            IdRef::Text(s) => s,
            IdRef::Number(n) => n.to_string(),
            IdRef::Object(obj) => obj
                .object_id
                .or(obj.id)
                .map(|id| id.into_string())
                .unwrap_or_default(),
        }
    }
}

/// Coerce an optional identifier, treating the empty string as absent.
pub fn id_string(id: Option<IdRef>) -> Option<String> {
    id.map(IdRef::into_string).filter(|s| !s.is_empty())
}

fn from_millis<E: de::Error>(ms: i64) -> std::result::Result<DateTime<Utc>, E> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| E::custom(format!("timestamp out of range: {}", ms)))
}

/// Deserialize an optional timestamp from an RFC 3339 string or epoch millis.
pub fn timestamp<'de, D: de::Deserializer<'de>>(
    d: D,
) -> std::result::Result<Option<DateTime<Utc>>, D::Error> {
    struct Visitor;
    impl<'de> de::Visitor<'de> for Visitor {
        type Value = Option<DateTime<Utc>>;
        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            f.write_str("RFC 3339 string or epoch milliseconds")
        }
        fn visit_none<E: de::Error>(self) -> std::result::Result<Self::Value, E> {
            Ok(None)
        }
        fn visit_unit<E: de::Error>(self) -> std::result::Result<Self::Value, E> {
            Ok(None)
        }
        fn visit_some<D2: de::Deserializer<'de>>(
            self,
            d: D2,
        ) -> std::result::Result<Self::Value, D2::Error> {
            d.deserialize_any(self)
        }
        fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<Self::Value, E> {
            let ms = i64::try_from(v).map_err(E::custom)?;
            from_millis(ms).map(Some)
        }
        fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<Self::Value, E> {
            from_millis(v).map(Some)
        }
        fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<Self::Value, E> {
            from_millis(v as i64).map(Some)
        }
        fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Self::Value, E> {
            if v.is_empty() {
                return Ok(None);
            }
            DateTime::parse_from_rfc3339(v)
                .map(|t| Some(t.with_timezone(&Utc)))
                .map_err(E::custom)
        }
    }
    d.deserialize_option(Visitor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Probe {
        id: Option<IdRef>,
        #[serde(default, deserialize_with = "timestamp")]
        at: Option<DateTime<Utc>>,
    }

    fn probe(json: &str) -> Probe {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_id_shapes_coerce_to_string() {
        assert_eq!(id_string(probe(r#"{"id":"abc"}"#).id).unwrap(), "abc");
        assert_eq!(id_string(probe(r#"{"id":42}"#).id).unwrap(), "42");
        assert_eq!(
            id_string(probe(r#"{"id":{"_id":"u7","name":"Ann"}}"#).id).unwrap(),
            "u7"
        );
        assert_eq!(
            id_string(probe(r#"{"id":{"_id":"u7","id":"u7"}}"#).id).unwrap(),
            "u7"
        );
        assert!(id_string(probe(r#"{"id":{"name":"nobody"}}"#).id).is_none());
        assert!(id_string(probe(r#"{"id":""}"#).id).is_none());
        assert!(id_string(probe(r#"{}"#).id).is_none());
    }

    #[test]
    fn test_timestamp_accepts_string_and_millis() {
        let a = probe(r#"{"at":"2024-05-01T10:00:00.000Z"}"#).at.unwrap();
        let b = probe(r#"{"at":1714557600000}"#).at.unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_timestamp_null_and_missing() {
        assert!(probe(r#"{"at":null}"#).at.is_none());
        assert!(probe(r#"{}"#).at.is_none());
    }

    #[test]
    fn test_timestamp_garbage_is_rejected() {
        assert!(serde_json::from_str::<Probe>(r#"{"at":"yesterday"}"#).is_err());
    }
}
