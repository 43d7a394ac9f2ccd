use indexsync::models::{json_to_field_value, Record};
use serde::Deserialize;
use serde_json::{Map as JsonMap, Value as JsonValue};

/// One page of a collection listing: `{"objects": [{"id": {"value": ..}}, ..]}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CollectionPage {
    #[serde(default)]
    pub objects: Vec<ObjectStub>,
}

impl CollectionPage {
    pub fn ids(&self) -> Vec<String> {
        self.objects.iter().map(ObjectStub::id_string).collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObjectStub {
    pub id: WrappedValue,
}

impl ObjectStub {
    pub fn id_string(&self) -> String {
        match &self.id.value {
            JsonValue::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WrappedValue {
    pub value: JsonValue,
}

/// Flattens a collection object into a record. Fields shaped `{"value": x}` contribute `x`;
/// other nested values are kept as JSON text.
pub fn flatten_object(object: &JsonMap<String, JsonValue>) -> Record {
    let mut record = Record::default();
    for (name, value) in object {
        let value = match value {
            JsonValue::Object(inner) if inner.contains_key("value") => &inner["value"],
            other => other,
        };
        record.insert(name.clone(), json_to_field_value(value).unwrap_or_default());
    }
    record
}
