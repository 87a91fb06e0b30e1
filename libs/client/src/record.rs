//! Snapshot of a remote resource.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ClientError;

/// A resource as returned by the appliance: a JSON object whose `uri`
/// field is the stable identifier.
///
/// Records are read-only snapshots; changes go through the client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteRecord(Map<String, Value>);

impl RemoteRecord {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Interpret a response body as a record.
    ///
    /// Action endpoints answer with an empty body or a bare scalar; those
    /// become an empty record.
    pub fn from_value(value: Value) -> Result<Self, ClientError> {
        match value {
            Value::Object(fields) => Ok(Self(fields)),
            Value::Null | Value::Bool(_) | Value::String(_) | Value::Number(_) => {
                Ok(Self::default())
            }
            Value::Array(_) => Err(ClientError::InvalidResponse(
                "expected an object, got an array".to_string(),
            )),
        }
    }

    pub fn uri(&self) -> Option<&str> {
        self.str_field("uri")
    }

    pub fn name(&self) -> Option<&str> {
        self.str_field("name")
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn str_field(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(Value::as_str)
    }

    /// Look up a nested value by JSON pointer (`/mpHostInfo/mpHostName`).
    pub fn pointer(&self, pointer: &str) -> Option<&Value> {
        let rest = pointer.strip_prefix('/')?;
        match rest.split_once('/') {
            Some((head, tail)) => self.0.get(head)?.pointer(&format!("/{tail}")),
            None => self.0.get(rest),
        }
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_fields(self) -> Map<String, Value> {
        self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map<String, Value>> for RemoteRecord {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_accessors() {
        let record = RemoteRecord::from_value(json!({
            "uri": "/rest/server-hardware/1",
            "name": "rack-1",
            "mpHostInfo": {"mpHostName": "ilo-1", "mpIpAddresses": [{"address": "10.0.0.5"}]}
        }))
        .unwrap();

        assert_eq!(record.uri(), Some("/rest/server-hardware/1"));
        assert_eq!(record.name(), Some("rack-1"));
        assert_eq!(
            record.pointer("/mpHostInfo/mpHostName"),
            Some(&json!("ilo-1"))
        );
        assert_eq!(
            record.pointer("/mpHostInfo/mpIpAddresses/0/address"),
            Some(&json!("10.0.0.5"))
        );
        assert_eq!(record.pointer("mpHostInfo"), None);
        assert_eq!(record.pointer("/missing/x"), None);
    }

    #[test]
    fn test_from_value_scalars_are_empty() {
        assert!(RemoteRecord::from_value(Value::Null).unwrap().is_empty());
        assert!(RemoteRecord::from_value(json!(true)).unwrap().is_empty());
        assert!(RemoteRecord::from_value(json!([1])).is_err());
    }

    #[test]
    fn test_serializes_transparently() {
        let record = RemoteRecord::from_value(json!({"name": "x"})).unwrap();
        assert_eq!(serde_json::to_value(&record).unwrap(), json!({"name": "x"}));
    }
}
