//! Type descriptors and the `TypeHandler` registry
//!
//! Ports declare what they accept with a [`TypeDescriptor`]. Validating and
//! (de)serializing values against that descriptor is delegated to whichever
//! registered [`TypeHandler`] claims it. Handlers are tried most-recently-
//! registered first, same as the original engine's handler list: a
//! `register_handler` call pushes to the front, so a later, more specific
//! handler can shadow an earlier, more general one.

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde_json::Value;

use crate::error::{FbpError, Result};

/// The built-in vocabulary of type descriptors a port can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeDescriptor {
    Any,
    String,
    Boolean,
    Int,
    Number,
    Object,
    Array,
}

impl TypeDescriptor {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Any => "any",
            Self::String => "string",
            Self::Boolean => "boolean",
            Self::Int => "int",
            Self::Number => "number",
            Self::Object => "object",
            Self::Array => "array",
        }
    }
}

impl std::fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The JSON-shaped type spec a handler reports for introspection/IDL
/// generation, e.g. `{"type": "int"}`.
pub type TypeSpec = Value;

/// Implemented by anything that can claim a [`TypeDescriptor`] and then
/// validate and convert values declared with it.
///
/// `claim` decides whether this handler is responsible for a descriptor;
/// the registry tries handlers newest-first and uses the first one that
/// claims it.
pub trait TypeHandler: Send + Sync {
    /// Whether this handler is responsible for `descriptor`.
    fn claim(&self, descriptor: TypeDescriptor) -> bool;

    /// The JSON type spec reported for this handler's descriptor(s).
    fn get_spec(&self, descriptor: TypeDescriptor) -> TypeSpec;

    /// Validate (and possibly coerce) a value against `descriptor`.
    /// Returns the value to actually store in the packet.
    fn validate(&self, descriptor: TypeDescriptor, value: Value) -> Result<Value>;

    /// Convert a native value to its primitive (JSON-transportable) form.
    /// Identity by default; handlers that wrap non-JSON-native types
    /// override this.
    fn to_primitive(&self, _descriptor: TypeDescriptor, value: Value) -> Value {
        value
    }

    /// Convert a primitive form back to the native representation.
    /// Identity by default.
    fn to_native(&self, _descriptor: TypeDescriptor, value: Value) -> Value {
        value
    }
}

struct AnyTypeHandler;

impl TypeHandler for AnyTypeHandler {
    fn claim(&self, descriptor: TypeDescriptor) -> bool {
        matches!(descriptor, TypeDescriptor::Any)
    }

    fn get_spec(&self, _descriptor: TypeDescriptor) -> TypeSpec {
        serde_json::json!({ "type": "any" })
    }

    fn validate(&self, _descriptor: TypeDescriptor, value: Value) -> Result<Value> {
        Ok(value)
    }
}

macro_rules! scalar_handler {
    ($name:ident, $descriptor:ident, $spec:literal, $check:expr) => {
        struct $name;

        impl TypeHandler for $name {
            fn claim(&self, descriptor: TypeDescriptor) -> bool {
                matches!(descriptor, TypeDescriptor::$descriptor)
            }

            fn get_spec(&self, _descriptor: TypeDescriptor) -> TypeSpec {
                serde_json::json!({ "type": $spec })
            }

            fn validate(&self, descriptor: TypeDescriptor, value: Value) -> Result<Value> {
                let check: fn(&Value) -> bool = $check;
                if check(&value) {
                    Ok(value)
                } else {
                    Err(FbpError::packet_validation(
                        "<port>",
                        format!("value {value} is not a valid {descriptor}"),
                    ))
                }
            }
        }
    };
}

scalar_handler!(StringTypeHandler, String, "string", |v| v.is_string());
scalar_handler!(BooleanTypeHandler, Boolean, "boolean", |v| v.is_boolean());
scalar_handler!(IntTypeHandler, Int, "int", |v| v.is_i64() || v.is_u64());
scalar_handler!(NumberTypeHandler, Number, "number", |v| v.is_number());
scalar_handler!(ObjectTypeHandler, Object, "object", |v| v.is_object());
scalar_handler!(ArrayTypeHandler, Array, "array", |v| v.is_array());

/// Process-wide handler registry, newest registration first.
static REGISTRY: Lazy<RwLock<Vec<Box<dyn TypeHandler>>>> = Lazy::new(|| {
    RwLock::new(vec![
        Box::new(ArrayTypeHandler),
        Box::new(ObjectTypeHandler),
        Box::new(NumberTypeHandler),
        Box::new(IntTypeHandler),
        Box::new(BooleanTypeHandler),
        Box::new(StringTypeHandler),
        Box::new(AnyTypeHandler),
    ])
});

/// Register a handler ahead of all currently registered handlers, so it
/// gets first refusal on any descriptor it claims.
pub fn register_handler(handler: Box<dyn TypeHandler>) {
    REGISTRY.write().insert(0, handler);
}

fn with_handler<T>(
    descriptor: TypeDescriptor,
    f: impl FnOnce(&dyn TypeHandler) -> Result<T>,
) -> Result<T> {
    let registry = REGISTRY.read();
    for handler in registry.iter() {
        if handler.claim(descriptor) {
            return f(handler.as_ref());
        }
    }
    Err(FbpError::type_handler(descriptor))
}

/// Validate `value` against `descriptor` using the registered handlers.
pub fn validate(descriptor: TypeDescriptor, value: Value) -> Result<Value> {
    with_handler(descriptor, |handler| handler.validate(descriptor, value))
}

/// Look up the JSON type spec for a descriptor.
pub fn get_spec(descriptor: TypeDescriptor) -> Result<TypeSpec> {
    with_handler(descriptor, |handler| Ok(handler.get_spec(descriptor)))
}

/// Convert to primitive form via the claiming handler.
pub fn to_primitive(descriptor: TypeDescriptor, value: Value) -> Result<Value> {
    with_handler(descriptor, |handler| {
        Ok(handler.to_primitive(descriptor, value))
    })
}

/// Convert from primitive form via the claiming handler.
pub fn to_native(descriptor: TypeDescriptor, value: Value) -> Result<Value> {
    with_handler(descriptor, |handler| {
        Ok(handler.to_native(descriptor, value))
    })
}

/// Envelope used by [`serialize`]/[`deserialize`] to carry a descriptor
/// alongside a value that is *not* already one of the native JSON forms
/// (string/boolean/int/number/object/array) — e.g. a custom handler whose
/// "primitive" representation needs a tag to be recovered on the way back
/// in. Packet content in this core is always a plain `serde_json::Value`,
/// so nothing produced internally ever needs one, but `deserialize` still
/// recognizes one on the way in for data coming from elsewhere.
fn envelope(kind: TypeDescriptor, value: Value) -> Value {
    serde_json::json!({ "kind": kind.as_str(), "value": value })
}

fn known_kind(kind: &str) -> bool {
    matches!(
        kind,
        "any" | "string" | "boolean" | "int" | "number" | "object" | "array"
    )
}

/// Recursively normalize a value for a boundary that doesn't otherwise
/// know the port's declared type (e.g. persisting an IIP, or a debug
/// dump). JSON-native values — which is everything packet content can be,
/// since it's always a `serde_json::Value` — are emitted directly;
/// arrays and objects are walked so any member a custom `TypeHandler`
/// represents as a non-native envelope is normalized the same way. Per
/// §4.6, only a non-native representation would ever be wrapped in an
/// envelope; this core has none, so `serialize` never produces one.
pub fn serialize(value: &Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.iter().map(serialize).collect()),
        Value::Object(map) => {
            let out: serde_json::Map<String, Value> =
                map.iter().map(|(k, v)| (k.clone(), serialize(v))).collect();
            Value::Object(out)
        }
        other => other.clone(),
    }
}

/// Inverse of [`serialize`]: pass already-native values through unchanged,
/// recursing into arrays/objects, and unwrap a `{"kind": ..., "value":
/// ...}` envelope (from a non-native registered type) wherever one is
/// found rather than requiring every value to be wrapped.
pub fn deserialize(data: &Value) -> Result<Value> {
    match data {
        Value::Object(map) => {
            if map.len() == 2 {
                if let (Some(kind), Some(inner)) =
                    (map.get("kind").and_then(Value::as_str), map.get("value"))
                {
                    if known_kind(kind) {
                        return deserialize(inner);
                    }
                }
            }
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), deserialize(v)?);
            }
            Ok(Value::Object(out))
        }
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(deserialize(item)?);
            }
            Ok(Value::Array(out))
        }
        other => Ok(other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_handler_claims_descriptor() {
        let v = validate(TypeDescriptor::String, Value::from("hello")).unwrap();
        assert_eq!(v, Value::from("hello"));
    }

    #[test]
    fn string_handler_rejects_mismatch() {
        let err = validate(TypeDescriptor::String, Value::from(1)).unwrap_err();
        assert!(err.is_recoverable());
    }

    #[test]
    fn any_handler_accepts_everything() {
        assert!(validate(TypeDescriptor::Any, Value::Null).is_ok());
        assert!(validate(TypeDescriptor::Any, Value::from(vec![1, 2])).is_ok());
    }

    #[test]
    fn serialize_round_trips_nested_structures() {
        let original = serde_json::json!({"a": 1, "b": [true, "x", null]});
        let wrapped = serialize(&original);
        let restored = deserialize(&wrapped).unwrap();
        assert_eq!(original, restored);
    }

    #[test]
    fn native_values_serialize_without_an_envelope() {
        let value = serde_json::json!({"a": 1, "b": [true, "x", null]});
        assert_eq!(serialize(&value), value);
    }

    #[test]
    fn deserialize_passes_native_values_through() {
        assert_eq!(deserialize(&Value::from(5)).unwrap(), Value::from(5));
        assert_eq!(deserialize(&Value::from("hi")).unwrap(), Value::from("hi"));
        assert_eq!(deserialize(&Value::Null).unwrap(), Value::Null);
    }

    #[test]
    fn deserialize_unwraps_a_non_native_envelope() {
        let enveloped = envelope(TypeDescriptor::Int, Value::from(7));
        assert_eq!(deserialize(&enveloped).unwrap(), Value::from(7));
    }

    #[test]
    fn custom_handler_can_shadow_builtin() {
        struct AlwaysInt;
        impl TypeHandler for AlwaysInt {
            fn claim(&self, descriptor: TypeDescriptor) -> bool {
                matches!(descriptor, TypeDescriptor::Number)
            }
            fn get_spec(&self, _descriptor: TypeDescriptor) -> TypeSpec {
                serde_json::json!({ "type": "number", "coerced": true })
            }
            fn validate(&self, _descriptor: TypeDescriptor, value: Value) -> Result<Value> {
                Ok(value)
            }
        }
        register_handler(Box::new(AlwaysInt));
        let spec = get_spec(TypeDescriptor::Number).unwrap();
        assert_eq!(spec["coerced"], Value::from(true));
    }
}
