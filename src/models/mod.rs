use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A file picked by the user, held in memory for the duration of one upload.
#[derive(Debug, Clone)]
pub struct SelectedFile {
    pub name: String,
    pub size: u64,
    pub content_type: String,
    pub content: Bytes,
}

impl SelectedFile {
    pub fn new(name: impl Into<String>, content: impl Into<Bytes>) -> Self {
        let content = content.into();
        Self {
            name: name.into(),
            size: content.len() as u64,
            content_type: "application/octet-stream".to_string(),
            content,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }
}

/// Everything the sequencer needs to run one upload. Immutable once built.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub file: SelectedFile,
    pub is_private: bool,
    pub csrf_token: String,
}

/// Form body of the START call.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct StartRequest {
    pub filename: String,
    pub is_private: bool,
}

/// Answer to START: which storage endpoint to send the bytes to, and how.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthorizationResponse {
    pub token: String,
    pub request_data: TransferTarget,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransferTarget {
    pub url: String,
    pub method: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Extra multipart fields, sent before the file. Order is preserved as received.
    #[serde(default, with = "ordered_fields")]
    pub body: Vec<(String, String)>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FinishResponse {
    pub redirect_url: String,
}

/// Successful end of an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub filename: String,
    pub redirect_url: String,
}

/// `body` keeps the field order of the JSON object; S3 POST policies are
/// checked against fields in the order they were issued.
mod ordered_fields {
    use serde::de::{Error, MapAccess, Visitor};
    use serde::ser::SerializeMap;
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S>(fields: &[(String, String)], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(fields.len()))?;
        for (k, v) in fields {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<(String, String)>, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct FieldsVisitor;

        impl<'de> Visitor<'de> for FieldsVisitor {
            type Value = Vec<(String, String)>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of string fields or null")
            }

            fn visit_unit<E: Error>(self) -> Result<Self::Value, E> {
                Ok(Vec::new())
            }

            fn visit_none<E: Error>(self) -> Result<Self::Value, E> {
                Ok(Vec::new())
            }

            fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut fields = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((k, v)) = access.next_entry::<String, String>()? {
                    fields.push((k, v));
                }
                Ok(fields)
            }
        }

        deserializer.deserialize_any(FieldsVisitor)
    }
}
