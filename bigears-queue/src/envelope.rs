//! Queue message envelope and side-channel attributes.
//!
//! Every message placed on the queue carries an [`Envelope`] as its body:
//!
//! ```text
//! inline:  { "id", "Bucket", "Region", "Location": "inline", "Body": <payload> }
//! s3:      { "id", "Bucket", "Region", "Location": "s3",     "Key": "<id>/payload.json" }
//! ```
//!
//! The same identifying fields are duplicated into [`MessageAttributes`] so
//! consumers can filter without decoding the body.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Inline envelopes at or above this many bytes of JSON text go through the store.
pub const MAX_INLINE_MESSAGE_BYTES: usize = 65_536;

/// Content type of payload objects written to the store.
pub const PAYLOAD_CONTENT_TYPE: &str = "application/json";

/// Data type tag carried by every message attribute.
pub const STRING_DATA_TYPE: &str = "String";

/// Object key under which the payload of message `id` is stored.
pub fn payload_key(id: &str) -> String {
    format!("{id}/payload.json")
}

/// Whether an inline envelope of `len` bytes must be offloaded to the store.
pub fn exceeds_inline_limit(len: usize) -> bool {
    len >= MAX_INLINE_MESSAGE_BYTES
}

/// Where the payload of a message lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    /// Payload embedded in the envelope `Body`
    Inline,
    /// Payload stored in the bucket under the envelope `Key`
    S3,
}

impl Location {
    /// Wire form of the tag.
    pub fn as_str(self) -> &'static str {
        match self {
            Location::Inline => "inline",
            Location::S3 => "s3",
        }
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Location-tagged part of the envelope. Exactly one of `Body` / `Key`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "Location")]
pub enum Content<P> {
    #[serde(rename = "inline")]
    Inline {
        #[serde(rename = "Body")]
        body: P,
    },
    #[serde(rename = "s3")]
    S3 {
        #[serde(rename = "Key")]
        key: String,
    },
}

/// Message body placed on the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<P> {
    pub id: String,
    #[serde(rename = "Bucket")]
    pub bucket: String,
    #[serde(rename = "Region")]
    pub region: String,
    #[serde(flatten)]
    pub content: Content<P>,
}

impl<P> Envelope<P> {
    /// Envelope carrying the payload itself.
    pub fn inline(id: &str, bucket: &str, region: &str, body: P) -> Self {
        Self {
            id: id.to_string(),
            bucket: bucket.to_string(),
            region: region.to_string(),
            content: Content::Inline { body },
        }
    }

    /// Envelope pointing at a payload already written to the store.
    pub fn pointer(id: &str, bucket: &str, region: &str, key: String) -> Self {
        Self {
            id: id.to_string(),
            bucket: bucket.to_string(),
            region: region.to_string(),
            content: Content::S3 { key },
        }
    }

    pub fn location(&self) -> Location {
        match self.content {
            Content::Inline { .. } => Location::Inline,
            Content::S3 { .. } => Location::S3,
        }
    }

    /// Store key, for pointer envelopes.
    pub fn key(&self) -> Option<&str> {
        match &self.content {
            Content::S3 { key } => Some(key),
            Content::Inline { .. } => None,
        }
    }

    /// Embedded payload, for inline envelopes.
    pub fn body(&self) -> Option<&P> {
        match &self.content {
            Content::Inline { body } => Some(body),
            Content::S3 { .. } => None,
        }
    }

    /// Attributes sent alongside this envelope.
    pub fn attributes(&self) -> MessageAttributes {
        MessageAttributes::new(&self.id, self.location(), &self.bucket, &self.region)
    }
}

impl<P: Serialize> Envelope<P> {
    /// JSON text sent as the queue message body.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl<P: DeserializeOwned> Envelope<P> {
    /// Decode a queue message body.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// One typed message attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageAttribute {
    #[serde(rename = "DataType")]
    pub data_type: String,
    #[serde(rename = "StringValue")]
    pub string_value: String,
}

impl MessageAttribute {
    pub fn string(value: &str) -> Self {
        Self {
            data_type: STRING_DATA_TYPE.to_string(),
            string_value: value.to_string(),
        }
    }
}

/// Flat map of named attributes sent with a queue message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageAttributes(BTreeMap<String, MessageAttribute>);

impl MessageAttributes {
    /// The four attributes `UUID`, `Location`, `Bucket` and `Region`.
    pub fn new(id: &str, location: Location, bucket: &str, region: &str) -> Self {
        let mut map = BTreeMap::new();
        map.insert("UUID".to_string(), MessageAttribute::string(id));
        map.insert("Location".to_string(), MessageAttribute::string(location.as_str()));
        map.insert("Bucket".to_string(), MessageAttribute::string(bucket));
        map.insert("Region".to_string(), MessageAttribute::string(region));
        Self(map)
    }

    /// String value of the named attribute.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(|a| a.string_value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &MessageAttribute)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn test_inline_envelope_wire_format() {
        let payload = json!({"a": 1});
        let envelope = Envelope::inline("abc", "orders", "eu-west-1", &payload);

        assert_eq!(
            envelope.to_json().unwrap(),
            r#"{"id":"abc","Bucket":"orders","Region":"eu-west-1","Location":"inline","Body":{"a":1}}"#
        );
    }

    #[test]
    fn test_pointer_envelope_wire_format() {
        let envelope: Envelope<Value> =
            Envelope::pointer("abc", "orders", "eu-west-1", payload_key("abc"));

        assert_eq!(
            envelope.to_json().unwrap(),
            r#"{"id":"abc","Bucket":"orders","Region":"eu-west-1","Location":"s3","Key":"abc/payload.json"}"#
        );
    }

    #[test]
    fn test_decode_keeps_body_and_key_exclusive() {
        let inline = Envelope::<Value>::from_json(
            r#"{"id":"1","Bucket":"b","Region":"r","Location":"inline","Body":[1,2]}"#,
        )
        .unwrap();
        assert_eq!(inline.location(), Location::Inline);
        assert_eq!(inline.body(), Some(&json!([1, 2])));
        assert_eq!(inline.key(), None);

        let pointer = Envelope::<Value>::from_json(
            r#"{"id":"2","Bucket":"b","Region":"r","Location":"s3","Key":"2/payload.json"}"#,
        )
        .unwrap();
        assert_eq!(pointer.location(), Location::S3);
        assert_eq!(pointer.key(), Some("2/payload.json"));
        assert!(pointer.body().is_none());
    }

    #[test]
    fn test_decode_rejects_unknown_location() {
        let result = Envelope::<Value>::from_json(
            r#"{"id":"1","Bucket":"b","Region":"r","Location":"S3","Key":"k"}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_attributes_mirror_envelope() {
        let envelope: Envelope<Value> = Envelope::pointer("id-1", "bucket", "region", "k".into());
        let attributes = envelope.attributes();

        assert_eq!(attributes.len(), 4);
        assert_eq!(attributes.get("UUID"), Some("id-1"));
        assert_eq!(attributes.get("Location"), Some("s3"));
        assert_eq!(attributes.get("Bucket"), Some("bucket"));
        assert_eq!(attributes.get("Region"), Some("region"));
        assert!(attributes.iter().all(|(_, a)| a.data_type == STRING_DATA_TYPE));
    }

    #[test]
    fn test_attributes_serialize_as_typed_map() {
        let attributes = MessageAttributes::new("x", Location::Inline, "b", "r");
        let value = serde_json::to_value(&attributes).unwrap();
        assert_eq!(
            value["Location"],
            json!({"DataType": "String", "StringValue": "inline"})
        );
    }

    #[test]
    fn test_threshold_is_inclusive() {
        assert!(!exceeds_inline_limit(65_535));
        assert!(exceeds_inline_limit(65_536));
    }
}
