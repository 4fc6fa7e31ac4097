//! Request and response transcoding.
//!
//! [`Transcoder::into_message`] builds the RPC request message from the three
//! parts of an HTTP request, in this order:
//!
//! 1. the JSON body, when the binding names a body selector,
//! 2. query parameters (dotted keys walk nested messages),
//! 3. path variables, which always win.
//!
//! A query parameter never overwrites a field the body already set.
//! [`Transcoder::out`] picks what part of the response gets printed.

use std::collections::HashMap;

use bytes::Bytes;
use grpc_transcoding_core::BODY_WILDCARD;
use prost_reflect::{
    DeserializeOptions, DynamicMessage, EnumDescriptor, FieldDescriptor, Kind, MessageDescriptor,
    ReflectMessage, Value,
};

use crate::json::ResponsePayload;

/// A failure turning request parts into a message. Always a client error.
#[derive(Debug, thiserror::Error)]
pub enum TranscodeError {
    #[error("invalid JSON body: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("invalid value '{value}' for field '{field}'")]
    InvalidValue { field: String, value: String },

    #[error("Can't parse enum value '{value}' for field '{field}'")]
    InvalidEnum { field: String, value: String },

    #[error("query parameter '{key}' targets a message or map field")]
    UnsupportedQueryField { key: String },
}

/// The raw inputs of one request.
#[derive(Clone, Debug, Default)]
pub struct Variable {
    pub body: Bytes,
    pub query: HashMap<String, Vec<String>>,
    pub path: HashMap<String, String>,
}

impl Variable {
    pub fn new(body: Bytes, query: Option<&str>, path: HashMap<String, String>) -> Self {
        Self {
            body,
            query: parse_query(query.unwrap_or_default()),
            path,
        }
    }
}

/// Group `a=1&a=2&b=3` by key, percent-decoding names and values.
pub fn parse_query(query: &str) -> HashMap<String, Vec<String>> {
    let mut params: HashMap<String, Vec<String>> = HashMap::new();
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        params.entry(key.into_owned()).or_default().push(value.into_owned());
    }
    params
}

/// Builds request messages from a [`Variable`].
#[derive(Debug)]
pub struct Transcoder {
    variable: Variable,
}

impl Transcoder {
    pub fn new(variable: Variable) -> Self {
        Self { variable }
    }

    /// Build a message of type `descriptor`.
    ///
    /// `body` is the binding's body selector: `*` for the whole message, a
    /// field name, or `None` when the body is ignored.
    pub fn into_message(
        &self,
        descriptor: MessageDescriptor,
        body: Option<&str>,
    ) -> Result<DynamicMessage, TranscodeError> {
        let mut message = match body {
            Some(selector) if !is_blank(&self.variable.body) => {
                self.read_body(descriptor, selector)?
            }
            _ => DynamicMessage::new(descriptor),
        };

        for (key, values) in &self.variable.query {
            apply_query(&mut message, key, values)?;
        }

        for (name, value) in &self.variable.path {
            apply_path(&mut message, name, value)?;
        }

        Ok(message)
    }

    fn read_body(
        &self,
        descriptor: MessageDescriptor,
        selector: &str,
    ) -> Result<DynamicMessage, TranscodeError> {
        let options = DeserializeOptions::new().deny_unknown_fields(false);

        if selector == BODY_WILDCARD {
            let mut deserializer = serde_json::Deserializer::from_slice(&self.variable.body);
            let message =
                DynamicMessage::deserialize_with_options(descriptor, &mut deserializer, &options)?;
            deserializer.end()?;
            return Ok(message);
        }

        let Some(field) = find_field(&descriptor, selector) else {
            tracing::debug!(
                message = descriptor.full_name(),
                field = selector,
                "body selector names an unknown field, body ignored"
            );
            return Ok(DynamicMessage::new(descriptor));
        };

        // Parse the body as the value of the field inside its parent, so every
        // field kind gets the regular JSON mapping.
        let value: serde_json::Value = serde_json::from_slice(&self.variable.body)?;
        let mut wrapped = serde_json::Map::with_capacity(1);
        wrapped.insert(field.name().to_owned(), value);
        let message = DynamicMessage::deserialize_with_options(
            descriptor,
            serde_json::Value::Object(wrapped),
            &options,
        )?;
        Ok(message)
    }

    /// Select the part of `response` that becomes the HTTP body.
    pub fn out(response: DynamicMessage, response_body: Option<&str>) -> ResponsePayload {
        let field = response_body.and_then(|name| find_field(&response.descriptor(), name));
        match field {
            Some(field) => ResponsePayload::Field {
                message: response,
                field,
            },
            None => ResponsePayload::Message(response),
        }
    }
}

fn is_blank(body: &[u8]) -> bool {
    body.iter().all(u8::is_ascii_whitespace)
}

fn find_field(descriptor: &MessageDescriptor, name: &str) -> Option<FieldDescriptor> {
    descriptor
        .get_field_by_name(name)
        .or_else(|| descriptor.get_field_by_json_name(name))
}

fn apply_query(
    message: &mut DynamicMessage,
    key: &str,
    values: &[String],
) -> Result<(), TranscodeError> {
    let segments: Vec<&str> = key.split('.').collect();
    let Some((leaf, parents)) = segments.split_last() else {
        return Ok(());
    };

    let mut target = message;
    for name in parents {
        let Some(field) = find_field(&target.descriptor(), name) else {
            return Ok(());
        };
        if field.is_list() || field.is_map() || !matches!(field.kind(), Kind::Message(_)) {
            tracing::debug!(key, segment = name, "query parameter skipped, not a message path");
            return Ok(());
        }
        target = match target.get_field_mut(&field).as_message_mut() {
            Some(nested) => nested,
            None => return Ok(()),
        };
    }

    let Some(field) = find_field(&target.descriptor(), leaf) else {
        tracing::debug!(key, "query parameter names an unknown field, skipped");
        return Ok(());
    };
    if field.is_map() || matches!(field.kind(), Kind::Message(_)) {
        return Err(TranscodeError::UnsupportedQueryField {
            key: key.to_owned(),
        });
    }

    if field.is_list() {
        let parsed = values
            .iter()
            .map(|value| parse_value(&field, value))
            .collect::<Result<Vec<_>, _>>()?;
        if let Value::List(list) = target.get_field_mut(&field) {
            list.extend(parsed);
        }
        return Ok(());
    }

    if target.has_field(&field) {
        return Ok(());
    }
    if let Some(value) = values.first() {
        let parsed = parse_value(&field, value)?;
        target.set_field(&field, parsed);
    }
    Ok(())
}

fn apply_path(message: &mut DynamicMessage, name: &str, value: &str) -> Result<(), TranscodeError> {
    let Some(field) = message.descriptor().get_field_by_name(name) else {
        tracing::debug!(variable = name, "path variable names an unknown field, skipped");
        return Ok(());
    };
    if field.is_list() || field.is_map() || matches!(field.kind(), Kind::Message(_)) {
        return Ok(());
    }
    let parsed = parse_value(&field, value)?;
    message.set_field(&field, parsed);
    Ok(())
}

/// Parse one textual value into the scalar type of `field`.
pub fn parse_value(field: &FieldDescriptor, text: &str) -> Result<Value, TranscodeError> {
    let invalid = || TranscodeError::InvalidValue {
        field: field.name().to_owned(),
        value: text.to_owned(),
    };

    let value = match field.kind() {
        Kind::Double => Value::F64(text.parse().map_err(|_| invalid())?),
        Kind::Float => Value::F32(text.parse().map_err(|_| invalid())?),
        Kind::Int32 | Kind::Sint32 | Kind::Sfixed32 => {
            Value::I32(text.parse().map_err(|_| invalid())?)
        }
        Kind::Int64 | Kind::Sint64 | Kind::Sfixed64 => {
            Value::I64(text.parse().map_err(|_| invalid())?)
        }
        Kind::Uint32 | Kind::Fixed32 => Value::U32(text.parse().map_err(|_| invalid())?),
        Kind::Uint64 | Kind::Fixed64 => Value::U64(text.parse().map_err(|_| invalid())?),
        Kind::Bool => {
            if text.eq_ignore_ascii_case("true") {
                Value::Bool(true)
            } else if text.eq_ignore_ascii_case("false") {
                Value::Bool(false)
            } else {
                return Err(invalid());
            }
        }
        Kind::String => Value::String(text.to_owned()),
        Kind::Bytes => Value::Bytes(Bytes::copy_from_slice(text.as_bytes())),
        Kind::Enum(descriptor) => parse_enum(field, &descriptor, text)?,
        Kind::Message(_) => return Err(invalid()),
    };
    Ok(value)
}

fn parse_enum(
    field: &FieldDescriptor,
    descriptor: &EnumDescriptor,
    text: &str,
) -> Result<Value, TranscodeError> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(Value::EnumNumber(descriptor.default_value().number()));
    }

    let resolved = if text.starts_with(|c: char| c.is_ascii_digit() || c == '-') {
        text.parse::<i32>()
            .ok()
            .and_then(|number| descriptor.get_value(number))
    } else {
        descriptor.get_value_by_name(text)
    };

    resolved
        .map(|value| Value::EnumNumber(value.number()))
        .ok_or_else(|| TranscodeError::InvalidEnum {
            field: field.name().to_owned(),
            value: text.to_owned(),
        })
}
