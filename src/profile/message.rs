//! Profile messages and the message dictionary.

use std::collections::HashMap;
use std::sync::Arc;

use log::debug;

use crate::base::BaseType;
use crate::profile::ProfileError;
use crate::profile::field::Field;
use crate::profile::types::{Kind, Type};

/// A message class: a name, an optional global number, and field indexes.
///
/// Synthetic messages (the file header, unknown global numbers) carry no
/// global number or no fields respectively.
#[derive(Debug)]
pub struct Message {
    name: String,
    number: Option<u16>,
    by_number: HashMap<u8, Arc<Field>>,
    by_name: HashMap<String, Arc<Field>>,
}

impl Message {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn number(&self) -> Option<u16> {
        self.number
    }

    /// Look up a field by its in-message number.
    pub fn field(&self, number: u8) -> Option<&Arc<Field>> {
        self.by_number.get(&number)
    }

    /// Look up a field by name.
    pub fn field_by_name(&self, name: &str) -> Option<&Arc<Field>> {
        self.by_name.get(name)
    }

    /// A placeholder for a global number the profile does not describe.
    fn unknown(number: u16) -> Self {
        Self {
            name: format!("MESSAGE {number}"),
            number: Some(number),
            by_number: HashMap::new(),
            by_name: HashMap::new(),
        }
    }
}

/// Assembles a [`Message`], validating its fields as a set.
///
/// Fields are appended first and cross-checked at [`build`](Self::build), so
/// an alternate or component may reference a field added after it.
#[derive(Debug)]
pub struct MessageBuilder {
    name: String,
    number: Option<u16>,
    fields: Vec<Field>,
}

impl MessageBuilder {
    pub fn new(name: impl Into<String>, number: Option<u16>) -> Self {
        Self {
            name: name.into(),
            number,
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    /// Index the fields and re-check every reference against the full set.
    pub fn build(self) -> Result<Message, ProfileError> {
        let mut by_number = HashMap::new();
        let mut by_name = HashMap::new();

        for field in self.fields {
            let field = Arc::new(field);
            by_number.insert(field.number, field.clone());
            by_name.insert(field.name.clone(), field);
        }

        let message = Message {
            name: self.name,
            number: self.number,
            by_number,
            by_name,
        };

        for field in message.by_number.values() {
            check_field(&message, field)?;
        }

        Ok(message)
    }
}

/// Validate one field (and its alternates, recursively) against a message.
fn check_field(message: &Message, field: &Field) -> Result<(), ProfileError> {
    if (!field.components.is_empty() || field.is_dynamic()) && field.adjusts_values() {
        return Err(ProfileError::ConflictingField(field.name.clone()));
    }

    for component in &field.components {
        if message.field_by_name(&component.field).is_none() {
            return Err(ProfileError::UnresolvedReference {
                message: message.name.clone(),
                reference: component.field.clone(),
            });
        }
    }

    for alternate in &field.dynamic {
        if message.field_by_name(&alternate.reference).is_none() {
            return Err(ProfileError::UnresolvedReference {
                message: message.name.clone(),
                reference: alternate.reference.clone(),
            });
        }

        check_field(message, &alternate.field)?;
    }

    Ok(())
}

/// The profile's message dictionary.
#[derive(Debug)]
pub struct Messages {
    by_name: HashMap<String, Arc<Message>>,
    by_number: HashMap<u16, Arc<Message>>,
}

impl Default for Messages {
    fn default() -> Self {
        Self::new()
    }
}

impl Messages {
    /// An empty dictionary holding only the synthetic header pseudo-message.
    pub fn new() -> Self {
        let mut messages = Self {
            by_name: HashMap::new(),
            by_number: HashMap::new(),
        };

        let base = |b: BaseType| Arc::new(Type::new(b.name(), Kind::Base(b)));

        let header = MessageBuilder::new("header", None)
            .field(Field::new(0, "header_size", base(BaseType::UInt8)))
            .field(Field::new(1, "protocol_version", base(BaseType::UInt8)))
            .field(Field::new(2, "profile_version", base(BaseType::UInt16)))
            .field(Field::new(3, "data_size", base(BaseType::UInt32)))
            .field(Field::new(4, "fit_text", base(BaseType::Text)))
            .field(Field::new(5, "checksum", base(BaseType::UInt16)))
            .build()
            .expect("the header pseudo-message is well-formed");

        messages.by_name.insert("header".into(), Arc::new(header));
        messages
    }

    /// Register a message under its name and, when present, global number.
    pub fn insert(&mut self, message: Message) -> Result<(), ProfileError> {
        if self.by_name.contains_key(message.name()) {
            return Err(ProfileError::DuplicateMessage(message.name().to_string()));
        }

        let message = Arc::new(message);
        self.by_name
            .insert(message.name().to_string(), message.clone());
        if let Some(number) = message.number() {
            self.by_number.insert(number, message);
        }

        Ok(())
    }

    /// Look up a message by name.
    pub fn by_name(&self, name: &str) -> Option<Arc<Message>> {
        self.by_name.get(name).cloned()
    }

    /// Look up a message by global number, synthesizing a placeholder on a
    /// miss. Never fails; unknown messages decode with anonymous fields.
    pub fn by_number(&self, number: u16) -> Arc<Message> {
        match self.by_number.get(&number) {
            Some(message) => message.clone(),
            None => {
                debug!("global message {number} missing from the profile");
                Arc::new(Message::unknown(number))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::types::Types;
    use crate::value::Value;

    #[test]
    fn unresolved_references_fail_the_build() {
        let types = Types::new();
        let result = MessageBuilder::new("workout_step", Some(27))
            .field(
                Field::new(4, "target_value", types.get("uint32").unwrap()).with_alternate(
                    "target_type",
                    Value::Uint(0),
                    Field::new(4, "hr_zone", types.get("uint32").unwrap()),
                ),
            )
            .build();

        assert!(matches!(
            result,
            Err(ProfileError::UnresolvedReference { .. })
        ));
    }

    #[test]
    fn expansion_excludes_adjustment() {
        let types = Types::new();
        let result = MessageBuilder::new("event", Some(21))
            .field(Field::new(1, "inner", types.get("uint8").unwrap()))
            .field(
                Field::new(3, "data", types.get("uint16").unwrap())
                    .with_scale(2.0)
                    .with_component(8, "inner"),
            )
            .build();

        assert!(matches!(result, Err(ProfileError::ConflictingField(_))));
    }

    #[test]
    fn unknown_global_numbers_synthesize_a_placeholder() {
        let messages = Messages::new();
        let message = messages.by_number(511);

        assert_eq!(message.name(), "MESSAGE 511");
        assert!(message.field(0).is_none());
    }

    #[test]
    fn the_header_pseudo_message_is_always_present() {
        let messages = Messages::new();
        let header = messages.by_name("header").unwrap();

        assert_eq!(header.number(), None);
        assert_eq!(header.field(3).unwrap().name, "data_size");
    }
}
