//! # Avro Codec
//!
//! Avro binary datums (no container header, no schema-id prefix) against
//! the handle's schema text. Payloads cross the port as JSON values:
//!
//! - encode walks the schema and converts strictly. Missing record fields
//!   fall back to their declared default, then to `null` for optional
//!   unions. Anything else is a shape mismatch.
//! - decode requires the datum to consume the whole buffer; leftover bytes
//!   are malformed input. The prefix fallback relies on this.
//!
//! Bytes and fixed values map to JSON arrays of numbers so they round-trip
//! through `Vec<u8>` fields.

use std::collections::HashMap;
use std::sync::Arc;

use apache_avro::schema::{Name, ResolvedSchema};
use apache_avro::types::Value as AvroValue;
use apache_avro::Schema;
use parking_lot::RwLock;
use serde_json::{Map, Number, Value};

use crate::domain::{CodecError, SchemaHandle};
use crate::ports::outbound::Codec;

type Names<'s> = HashMap<Name, &'s Schema>;

/// Avro codec with a parsed-schema cache keyed by schema text.
#[derive(Debug, Default)]
pub struct AvroCodec {
    schemas: RwLock<HashMap<Arc<str>, Arc<Schema>>>,
}

impl AvroCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parsed schema for `handle`, parsing once per distinct text.
    pub fn schema(&self, handle: &SchemaHandle) -> Result<Arc<Schema>, CodecError> {
        if let Some(schema) = self.schemas.read().get(handle.definition()) {
            return Ok(schema.clone());
        }
        let parsed = Schema::parse_str(handle.definition())
            .map_err(|e| CodecError::InvalidSchema(e.to_string()))?;
        let parsed = Arc::new(parsed);
        self.schemas
            .write()
            .insert(Arc::from(handle.definition()), parsed.clone());
        Ok(parsed)
    }

    pub fn cached_schemas(&self) -> usize {
        self.schemas.read().len()
    }
}

impl Codec for AvroCodec {
    fn encode(&self, handle: &SchemaHandle, payload: &Value) -> Result<Vec<u8>, CodecError> {
        let schema = self.schema(handle)?;
        let resolved = ResolvedSchema::try_from(schema.as_ref())
            .map_err(|e| CodecError::InvalidSchema(e.to_string()))?;
        let datum = json_to_avro(payload, &schema, resolved.get_names(), "$")?;
        apache_avro::to_avro_datum(&schema, datum)
            .map_err(|e| CodecError::ShapeMismatch(e.to_string()))
    }

    fn decode(&self, handle: &SchemaHandle, bytes: &[u8]) -> Result<Value, CodecError> {
        let schema = self.schema(handle)?;
        let mut reader = bytes;
        let datum = apache_avro::from_avro_datum(&schema, &mut reader, None)
            .map_err(|e| CodecError::Malformed(e.to_string()))?;
        if !reader.is_empty() {
            return Err(CodecError::Malformed(format!(
                "{} trailing bytes after datum",
                reader.len()
            )));
        }
        Ok(avro_to_json(&datum))
    }
}

// =============================================================================
// JSON -> AVRO
// =============================================================================

fn mismatch(path: &str, expected: &str, found: &Value) -> CodecError {
    CodecError::ShapeMismatch(format!("{path}: expected {expected}, found {found}"))
}

fn json_bytes(value: &Value, path: &str) -> Result<Vec<u8>, CodecError> {
    match value {
        Value::String(s) => Ok(s.as_bytes().to_vec()),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_u64()
                    .and_then(|b| u8::try_from(b).ok())
                    .ok_or_else(|| mismatch(path, "byte", item))
            })
            .collect(),
        other => Err(mismatch(path, "bytes", other)),
    }
}

fn json_i32(value: &Value, path: &str, expected: &str) -> Result<i32, CodecError> {
    value
        .as_i64()
        .and_then(|i| i32::try_from(i).ok())
        .ok_or_else(|| mismatch(path, expected, value))
}

fn json_i64(value: &Value, path: &str, expected: &str) -> Result<i64, CodecError> {
    value.as_i64().ok_or_else(|| mismatch(path, expected, value))
}

fn json_to_avro(
    value: &Value,
    schema: &Schema,
    names: &Names<'_>,
    path: &str,
) -> Result<AvroValue, CodecError> {
    match schema {
        Schema::Null => match value {
            Value::Null => Ok(AvroValue::Null),
            other => Err(mismatch(path, "null", other)),
        },
        Schema::Boolean => value
            .as_bool()
            .map(AvroValue::Boolean)
            .ok_or_else(|| mismatch(path, "boolean", value)),
        Schema::Int => json_i32(value, path, "int").map(AvroValue::Int),
        Schema::Long => json_i64(value, path, "long").map(AvroValue::Long),
        Schema::Float => value
            .as_f64()
            .map(|f| AvroValue::Float(f as f32))
            .ok_or_else(|| mismatch(path, "float", value)),
        Schema::Double => value
            .as_f64()
            .map(AvroValue::Double)
            .ok_or_else(|| mismatch(path, "double", value)),
        Schema::Bytes => json_bytes(value, path).map(AvroValue::Bytes),
        Schema::String | Schema::Uuid => value
            .as_str()
            .map(|s| AvroValue::String(s.to_string()))
            .ok_or_else(|| mismatch(path, "string", value)),
        Schema::Date => json_i32(value, path, "date").map(AvroValue::Date),
        Schema::TimeMillis => json_i32(value, path, "time-millis").map(AvroValue::TimeMillis),
        Schema::TimeMicros => json_i64(value, path, "time-micros").map(AvroValue::TimeMicros),
        Schema::TimestampMillis => {
            json_i64(value, path, "timestamp-millis").map(AvroValue::TimestampMillis)
        }
        Schema::TimestampMicros => {
            json_i64(value, path, "timestamp-micros").map(AvroValue::TimestampMicros)
        }
        Schema::TimestampNanos => {
            json_i64(value, path, "timestamp-nanos").map(AvroValue::TimestampNanos)
        }
        Schema::LocalTimestampMillis => {
            json_i64(value, path, "local-timestamp-millis").map(AvroValue::LocalTimestampMillis)
        }
        Schema::LocalTimestampMicros => {
            json_i64(value, path, "local-timestamp-micros").map(AvroValue::LocalTimestampMicros)
        }
        Schema::LocalTimestampNanos => {
            json_i64(value, path, "local-timestamp-nanos").map(AvroValue::LocalTimestampNanos)
        }
        Schema::Array(array) => match value {
            Value::Array(items) => items
                .iter()
                .enumerate()
                .map(|(i, item)| json_to_avro(item, &array.items, names, &format!("{path}[{i}]")))
                .collect::<Result<Vec<_>, _>>()
                .map(AvroValue::Array),
            other => Err(mismatch(path, "array", other)),
        },
        Schema::Map(map) => match value {
            Value::Object(entries) => entries
                .iter()
                .map(|(k, v)| {
                    json_to_avro(v, &map.types, names, &format!("{path}.{k}"))
                        .map(|v| (k.clone(), v))
                })
                .collect::<Result<HashMap<_, _>, _>>()
                .map(AvroValue::Map),
            other => Err(mismatch(path, "map", other)),
        },
        Schema::Union(union) => {
            for (idx, variant) in union.variants().iter().enumerate() {
                if let Ok(converted) = json_to_avro(value, variant, names, path) {
                    return Ok(AvroValue::Union(idx as u32, Box::new(converted)));
                }
            }
            Err(mismatch(path, "a union branch", value))
        }
        Schema::Record(record) => {
            let Value::Object(fields) = value else {
                return Err(mismatch(path, "record", value));
            };
            let mut out = Vec::with_capacity(record.fields.len());
            for field in &record.fields {
                let field_path = format!("{path}.{}", field.name);
                let converted = match (fields.get(&field.name), &field.default) {
                    (Some(v), _) => json_to_avro(v, &field.schema, names, &field_path)?,
                    (None, Some(default)) => {
                        json_to_avro(default, &field.schema, names, &field_path)?
                    }
                    (None, None) => json_to_avro(&Value::Null, &field.schema, names, &field_path)
                        .map_err(|_| {
                            CodecError::ShapeMismatch(format!("{field_path}: missing field"))
                        })?,
                };
                out.push((field.name.clone(), converted));
            }
            Ok(AvroValue::Record(out))
        }
        Schema::Enum(enum_schema) => {
            let symbol = value
                .as_str()
                .ok_or_else(|| mismatch(path, "enum symbol", value))?;
            enum_schema
                .symbols
                .iter()
                .position(|s| s == symbol)
                .map(|idx| AvroValue::Enum(idx as u32, symbol.to_string()))
                .ok_or_else(|| mismatch(path, "known enum symbol", value))
        }
        Schema::Fixed(fixed) => {
            let bytes = json_bytes(value, path)?;
            if bytes.len() != fixed.size {
                return Err(CodecError::ShapeMismatch(format!(
                    "{path}: expected {} fixed bytes, found {}",
                    fixed.size,
                    bytes.len()
                )));
            }
            Ok(AvroValue::Fixed(fixed.size, bytes))
        }
        Schema::Ref { name } => {
            let target = names.get(name).ok_or_else(|| {
                CodecError::InvalidSchema(format!("{path}: unresolved reference {name}"))
            })?;
            json_to_avro(value, target, names, path)
        }
        other => Err(CodecError::ShapeMismatch(format!(
            "{path}: unsupported schema type {other:?}"
        ))),
    }
}

// =============================================================================
// AVRO -> JSON
// =============================================================================

fn bytes_to_json(bytes: &[u8]) -> Value {
    Value::Array(bytes.iter().map(|b| Value::from(*b)).collect())
}

fn float_to_json(f: f64) -> Value {
    Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}

fn avro_to_json(value: &AvroValue) -> Value {
    match value {
        AvroValue::Null => Value::Null,
        AvroValue::Boolean(b) => Value::Bool(*b),
        AvroValue::Int(i) => Value::from(*i),
        AvroValue::Long(l) => Value::from(*l),
        AvroValue::Float(f) => float_to_json(f64::from(*f)),
        AvroValue::Double(d) => float_to_json(*d),
        AvroValue::Bytes(b) | AvroValue::Fixed(_, b) => bytes_to_json(b),
        AvroValue::String(s) | AvroValue::Enum(_, s) => Value::String(s.clone()),
        AvroValue::Union(_, inner) => avro_to_json(inner),
        AvroValue::Array(items) => Value::Array(items.iter().map(avro_to_json).collect()),
        AvroValue::Map(entries) => Value::Object(
            entries
                .iter()
                .map(|(k, v)| (k.clone(), avro_to_json(v)))
                .collect::<Map<_, _>>(),
        ),
        AvroValue::Record(fields) => Value::Object(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), avro_to_json(v)))
                .collect::<Map<_, _>>(),
        ),
        AvroValue::Date(d) => Value::from(*d),
        AvroValue::TimeMillis(t) => Value::from(*t),
        AvroValue::TimeMicros(t) => Value::from(*t),
        AvroValue::TimestampMillis(t) => Value::from(*t),
        AvroValue::TimestampMicros(t) => Value::from(*t),
        AvroValue::TimestampNanos(t) => Value::from(*t),
        AvroValue::LocalTimestampMillis(t) => Value::from(*t),
        AvroValue::LocalTimestampMicros(t) => Value::from(*t),
        AvroValue::LocalTimestampNanos(t) => Value::from(*t),
        AvroValue::Decimal(d) => {
            let bytes: Vec<u8> = d.try_into().unwrap_or_default();
            bytes_to_json(&bytes)
        }
        AvroValue::BigDecimal(d) => Value::String(d.to_string()),
        AvroValue::Uuid(u) => Value::String(u.to_string()),
        AvroValue::Duration(_) => Value::Null,
    }
}
