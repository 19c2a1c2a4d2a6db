//! Dynamic message instances.

use std::sync::Arc;

use crate::error::ConversionError;
use crate::schema::{FieldDescriptor, MessageSchema};
use crate::value::Value;

/// A message of a given schema. Every field is either unset or holds a
/// value accepted by its descriptor; unset is distinct from any zero value.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    schema: Arc<MessageSchema>,
    values: Vec<Option<Value>>,
}

impl Message {
    #[must_use]
    pub fn new(schema: Arc<MessageSchema>) -> Self {
        let values = vec![None; schema.fields().len()];
        Self { schema, values }
    }

    #[must_use]
    pub fn schema(&self) -> &Arc<MessageSchema> {
        &self.schema
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        let idx = self.schema.index_of(name)?;
        self.values.get(idx).and_then(Option::as_ref)
    }

    #[must_use]
    pub fn is_set(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// # Errors
    /// `ConversionError::UnknownField` when the schema has no such field,
    /// `ConversionError::TypeMismatch` when the value does not fit it.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<(), ConversionError> {
        let value = value.into();
        let idx = self
            .schema
            .index_of(name)
            .ok_or_else(|| ConversionError::UnknownField(name.to_owned()))?;
        let field = &self.schema.fields()[idx];
        if !field.accepts(&value) {
            return Err(ConversionError::mismatch(name, field.type_label(), &value));
        }
        self.values[idx] = Some(value);
        Ok(())
    }

    /// Consuming variant of [`Message::set`].
    ///
    /// # Errors
    /// Same as [`Message::set`].
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Result<Self, ConversionError> {
        self.set(name, value)?;
        Ok(self)
    }

    pub fn clear(&mut self, name: &str) -> Option<Value> {
        let idx = self.schema.index_of(name)?;
        self.values[idx].take()
    }

    /// Set fields in schema order.
    pub fn iter(&self) -> impl Iterator<Item = (&FieldDescriptor, &Value)> + '_ {
        self.schema
            .fields()
            .iter()
            .zip(&self.values)
            .filter_map(|(field, value)| value.as_ref().map(|v| (field, v)))
    }

    /// Every required field is set, recursively through nested messages.
    ///
    /// # Errors
    /// `ConversionError::RequiredFieldMissing` naming the first gap.
    pub fn check_initialized(&self) -> Result<(), ConversionError> {
        for (field, value) in self.schema.fields().iter().zip(&self.values) {
            match value {
                None if field.is_required() => {
                    return Err(ConversionError::RequiredFieldMissing(field.name().to_owned()));
                }
                Some(Value::Message(nested)) => nested.check_initialized()?,
                Some(Value::List(items)) => {
                    for item in items {
                        if let Value::Message(nested) = item {
                            nested.check_initialized()?;
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.check_initialized().is_ok()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::schema::{FieldDescriptor, WireType, geo_pt_schema};

    fn schema() -> Arc<MessageSchema> {
        MessageSchema::new(
            "Sample",
            vec![
                FieldDescriptor::new("name", WireType::String).required(),
                FieldDescriptor::new("count", WireType::Integer),
                FieldDescriptor::new("tags", WireType::String).repeated(),
                FieldDescriptor::new("where", WireType::Message(geo_pt_schema())),
            ],
        )
    }

    #[test]
    fn unset_differs_from_zero() {
        let mut msg = Message::new(schema());
        assert!(!msg.is_set("count"));
        msg.set("count", 0_i64).unwrap();
        assert_eq!(msg.get("count"), Some(&Value::Integer(0)));
        assert_eq!(msg.clear("count"), Some(Value::Integer(0)));
        assert!(!msg.is_set("count"));
    }

    #[test]
    fn set_validates_name_and_type() {
        let mut msg = Message::new(schema());
        assert_eq!(
            msg.set("nope", 1_i64),
            Err(ConversionError::UnknownField("nope".to_owned()))
        );
        assert!(matches!(
            msg.set("count", "one"),
            Err(ConversionError::TypeMismatch { .. })
        ));
        assert!(msg.set("tags", "single").is_err());
        msg.set("tags", vec![Value::from("a"), Value::from("b")])
            .unwrap();
    }

    #[test]
    fn required_fields_checked_recursively() {
        let point = Message::new(geo_pt_schema()).with("lat", 1.0).unwrap();
        let msg = Message::new(schema())
            .with("name", "x")
            .unwrap()
            .with("where", point)
            .unwrap();
        assert_eq!(
            msg.check_initialized(),
            Err(ConversionError::RequiredFieldMissing("lon".to_owned()))
        );
        assert!(!Message::new(schema()).is_initialized());
    }

    #[test]
    fn iter_yields_set_fields_in_order() {
        let msg = Message::new(schema())
            .with("count", 2_i64)
            .unwrap()
            .with("name", "x")
            .unwrap();
        let names: Vec<_> = msg.iter().map(|(f, _)| f.name()).collect();
        assert_eq!(names, ["name", "count"]);
    }
}
