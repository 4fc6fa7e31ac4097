//! JSON encoding of response messages.
//!
//! Messages are printed with the protobuf JSON mapping (via `prost-reflect`).
//! Simple-value messages, the scalar wrappers and a `google.protobuf.Value`
//! holding null/number/string/bool, print as bare JSON scalars and are not
//! sent as `application/json`.

use prost_reflect::{DynamicMessage, FieldDescriptor, ReflectMessage, SerializeOptions, Value};

use crate::config::PrintOptions;

pub(crate) const APPLICATION_JSON: &str = "application/json";
pub(crate) const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

const WRAPPER_TYPES: [&str; 9] = [
    "google.protobuf.BoolValue",
    "google.protobuf.Int32Value",
    "google.protobuf.Int64Value",
    "google.protobuf.UInt32Value",
    "google.protobuf.UInt64Value",
    "google.protobuf.FloatValue",
    "google.protobuf.DoubleValue",
    "google.protobuf.StringValue",
    "google.protobuf.BytesValue",
];

const VALUE_TYPE: &str = "google.protobuf.Value";

const SCALAR_VALUE_KINDS: [&str; 4] = ["null_value", "number_value", "string_value", "bool_value"];

/// Whether `message` prints as a bare JSON scalar.
pub fn is_simple_value_message(message: &DynamicMessage) -> bool {
    let descriptor = message.descriptor();
    let name = descriptor.full_name();
    if WRAPPER_TYPES.contains(&name) {
        return true;
    }
    name == VALUE_TYPE
        && SCALAR_VALUE_KINDS.iter().any(|kind| {
            descriptor
                .get_field_by_name(kind)
                .is_some_and(|field| message.has_field(&field))
        })
}

/// What a response turns into before printing: the whole message, or one of
/// its fields when the binding names a response body.
#[derive(Clone, Debug)]
pub enum ResponsePayload {
    Message(DynamicMessage),
    Field {
        message: DynamicMessage,
        field: FieldDescriptor,
    },
}

impl ResponsePayload {
    /// Whether the payload prints as a JSON object or array.
    pub fn is_structured(&self) -> bool {
        match self {
            ResponsePayload::Message(message) => !is_simple_value_message(message),
            ResponsePayload::Field { message, field } => {
                if field.is_list() || field.is_map() {
                    return true;
                }
                match message.get_field(field).as_ref() {
                    Value::Message(inner) => !is_simple_value_message(inner),
                    _ => false,
                }
            }
        }
    }

    /// The `Content-Type` this payload is sent with.
    pub fn content_type(&self) -> &'static str {
        if self.is_structured() {
            APPLICATION_JSON
        } else {
            TEXT_PLAIN
        }
    }

    /// Print the payload as a JSON value.
    pub fn to_json(&self, options: &PrintOptions) -> Result<serde_json::Value, serde_json::Error> {
        let serialize = serialize_options(options);
        match self {
            ResponsePayload::Message(message) => {
                message.serialize_with_options(serde_json::value::Serializer, &serialize)
            }
            ResponsePayload::Field { message, field } => {
                if !field.is_list() && !field.is_map() {
                    if let Value::Message(inner) = message.get_field(field).as_ref() {
                        return inner.serialize_with_options(serde_json::value::Serializer, &serialize);
                    }
                }

                // Scalars, lists and maps are printed through the parent so the
                // field gets the same JSON mapping it has inside the message.
                let parent = message.serialize_with_options(
                    serde_json::value::Serializer,
                    &serialize.skip_default_fields(false),
                )?;
                Ok(match parent {
                    serde_json::Value::Object(mut fields) => fields
                        .remove(field.json_name())
                        .unwrap_or(serde_json::Value::Null),
                    _ => serde_json::Value::Null,
                })
            }
        }
    }
}

pub(crate) fn serialize_options(options: &PrintOptions) -> SerializeOptions {
    SerializeOptions::new().use_enum_numbers(options.always_print_enums_as_ints)
}

/// Render a JSON value as response text.
pub(crate) fn render(value: &serde_json::Value, pretty: bool) -> Result<String, serde_json::Error> {
    if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    }
}
