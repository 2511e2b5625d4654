//! Argument coercion: untyped wire values → a target's declared types.
//!
//! Arguments arrive as generic JSON values. A handler declares what it
//! expects as a list of [`ParamType`]s, and
//! [`HubProtocol::get_real_arguments`] converts each value to match.
//! Results are still [`Value`]s, but normalized: an `Int` parameter always
//! yields a JSON integer, a `DateTime` always an RFC 3339 UTC string, and
//! so on.
//!
//! Rules, first match wins:
//!
//! 1. `null` passes through unchanged, whatever the declared type.
//! 2. Enumerations match variant names case-insensitively (or by index).
//! 3. Booleans and numbers use numeric conversion. Floating values bound
//!    for an integer parameter are **rounded half up** (`floor(x + 0.5)`),
//!    whether they arrive as numbers or numeric strings.
//! 4. Strings take the value's string representation.
//! 5. Date-times parse RFC 3339 and normalize to UTC.
//! 6. Optional parameters unwrap to their inner type.
//! 7. Anything else goes through the encoder's generic conversion.

use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Number, Value};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::{Encoder, HubProtocol, ProtocolError};

/// Width and signedness of an integer parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntKind {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
}

impl IntKind {
    fn range(self) -> (i128, i128) {
        match self {
            Self::I8 => (i8::MIN.into(), i8::MAX.into()),
            Self::I16 => (i16::MIN.into(), i16::MAX.into()),
            Self::I32 => (i32::MIN.into(), i32::MAX.into()),
            Self::I64 => (i64::MIN.into(), i64::MAX.into()),
            Self::U8 => (0, u8::MAX.into()),
            Self::U16 => (0, u16::MAX.into()),
            Self::U32 => (0, u32::MAX.into()),
            Self::U64 => (0, u64::MAX.into()),
        }
    }
}

/// Precision of a floating-point parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloatKind {
    F32,
    F64,
}

/// The declared type of one handler parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamType {
    Bool,
    Int(IntKind),
    Float(FloatKind),
    String,
    /// RFC 3339 timestamp, normalized to UTC.
    DateTime,
    /// Base64 string (or array of byte values) → array of byte values.
    Bytes,
    /// One of the listed variant names.
    Enum(Vec<String>),
    /// `null` or the inner type.
    Optional(Box<ParamType>),
    /// Any JSON value, via the encoder's generic conversion.
    Object,
}

impl ParamType {
    /// Shorthand for `Int(IntKind::I32)`.
    pub const INT: Self = Self::Int(IntKind::I32);
    /// Shorthand for `Float(FloatKind::F64)`.
    pub const DOUBLE: Self = Self::Float(FloatKind::F64);

    /// An enumeration with the given variant names.
    pub fn enumeration<I, S>(variants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Enum(variants.into_iter().map(Into::into).collect())
    }

    /// `null` or `inner`.
    pub fn optional(inner: ParamType) -> Self {
        Self::Optional(Box::new(inner))
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool => f.write_str("bool"),
            Self::Int(kind) => write!(f, "{}", format!("{kind:?}").to_lowercase()),
            Self::Float(kind) => write!(f, "{}", format!("{kind:?}").to_lowercase()),
            Self::String => f.write_str("string"),
            Self::DateTime => f.write_str("datetime"),
            Self::Bytes => f.write_str("bytes"),
            Self::Enum(variants) => write!(f, "enum[{}]", variants.join("|")),
            Self::Optional(inner) => write!(f, "{inner}?"),
            Self::Object => f.write_str("object"),
        }
    }
}

impl<E: Encoder> HubProtocol<E> {
    /// Converts raw arguments to the declared parameter types.
    ///
    /// Extra arguments beyond the declared parameters are accepted and
    /// dropped; too few arguments is an error. An empty argument list is
    /// only valid for a target that declares no parameters.
    ///
    /// # Errors
    /// - `ProtocolError::ArgumentCountMismatch` — more declared parameters
    ///   than arguments.
    /// - `ProtocolError::Coercion` — an argument does not fit its type.
    pub fn get_real_arguments(
        &self,
        param_types: &[ParamType],
        arguments: &[Value],
    ) -> Result<Vec<Value>, ProtocolError> {
        if param_types.len() > arguments.len() {
            return Err(ProtocolError::ArgumentCountMismatch {
                expected: param_types.len(),
                actual: arguments.len(),
            });
        }

        param_types
            .iter()
            .zip(arguments)
            .map(|(ty, value)| self.convert_value(ty, value))
            .collect()
    }

    /// Converts one value to `target`.
    ///
    /// # Errors
    /// Returns `ProtocolError::Coercion` if the value does not fit.
    pub fn convert_value(&self, target: &ParamType, value: &Value) -> Result<Value, ProtocolError> {
        if value.is_null() {
            return Ok(Value::Null);
        }

        match target {
            ParamType::Enum(variants) => to_enum(target, variants, value),
            ParamType::Bool => to_bool(value).map(Value::Bool),
            ParamType::Int(kind) => to_int(*kind, target, value),
            ParamType::Float(kind) => to_float(*kind, target, value),
            ParamType::String => Ok(Value::String(display(value))),
            ParamType::DateTime => to_date_time(value),
            ParamType::Bytes => to_bytes(value),
            ParamType::Optional(inner) => self.convert_value(inner, value),
            ParamType::Object => self.encoder().convert::<Value>(value),
        }
    }
}

/// String representation: strings as-is, everything else as JSON text.
fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn to_enum(target: &ParamType, variants: &[String], value: &Value) -> Result<Value, ProtocolError> {
    if let Some(index) = value.as_u64() {
        return usize::try_from(index)
            .ok()
            .and_then(|i| variants.get(i))
            .map(|name| Value::String(name.clone()))
            .ok_or_else(|| ProtocolError::coercion(target, format!("no variant at index {index}")));
    }

    let name = display(value);
    variants
        .iter()
        .find(|variant| variant.eq_ignore_ascii_case(name.trim()))
        .map(|variant| Value::String(variant.clone()))
        .ok_or_else(|| ProtocolError::coercion(target, format!("unknown variant {name:?}")))
}

fn to_bool(value: &Value) -> Result<bool, ProtocolError> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) => Ok(n.as_f64().is_some_and(|f| f != 0.0)),
        Value::String(s) if s.trim().eq_ignore_ascii_case("true") => Ok(true),
        Value::String(s) if s.trim().eq_ignore_ascii_case("false") => Ok(false),
        other => Err(ProtocolError::coercion(
            ParamType::Bool,
            format!("{other} is not a boolean"),
        )),
    }
}

/// Numeric view of a value, preferring an exact integer when one exists.
enum Numeric {
    Exact(i128),
    Float(f64),
}

fn numeric(target: &ParamType, value: &Value) -> Result<Numeric, ProtocolError> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Numeric::Exact(i.into()))
            } else if let Some(u) = n.as_u64() {
                Ok(Numeric::Exact(u.into()))
            } else {
                n.as_f64()
                    .map(Numeric::Float)
                    .ok_or_else(|| ProtocolError::coercion(target, "not representable"))
            }
        }
        Value::Bool(b) => Ok(Numeric::Exact(i128::from(*b))),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(i) = s.parse::<i128>() {
                Ok(Numeric::Exact(i))
            } else {
                s.parse::<f64>()
                    .map(Numeric::Float)
                    .map_err(|_| ProtocolError::coercion(target, format!("{s:?} is not a number")))
            }
        }
        other => Err(ProtocolError::coercion(target, format!("{other} is not a number"))),
    }
}

/// Round half up: 3.5 → 4, -3.5 → -3.
fn round_half_up(x: f64) -> f64 {
    (x + 0.5).floor()
}

fn to_int(kind: IntKind, target: &ParamType, value: &Value) -> Result<Value, ProtocolError> {
    let n = match numeric(target, value)? {
        Numeric::Exact(i) => i,
        Numeric::Float(f) if f.is_finite() => {
            let rounded = round_half_up(f);
            // Anything beyond i128 is certainly out of range for every kind.
            if rounded.abs() >= 1.7e38 {
                return Err(ProtocolError::coercion(target, format!("{f} out of range")));
            }
            rounded as i128
        }
        Numeric::Float(f) => {
            return Err(ProtocolError::coercion(target, format!("{f} is not finite")));
        }
    };

    let (min, max) = kind.range();
    if n < min || n > max {
        return Err(ProtocolError::coercion(target, format!("{n} out of range")));
    }
    // In range for i64 or u64 by construction.
    Ok(match i64::try_from(n) {
        Ok(i) => Value::from(i),
        Err(_) => Value::from(n as u64),
    })
}

fn to_float(kind: FloatKind, target: &ParamType, value: &Value) -> Result<Value, ProtocolError> {
    let f = match numeric(target, value)? {
        Numeric::Exact(i) => i as f64,
        Numeric::Float(f) => f,
    };
    let f = match kind {
        FloatKind::F32 => f64::from(f as f32),
        FloatKind::F64 => f,
    };
    Number::from_f64(f)
        .map(Value::Number)
        .ok_or_else(|| ProtocolError::coercion(target, format!("{f} is not finite")))
}

fn to_date_time(value: &Value) -> Result<Value, ProtocolError> {
    let Value::String(s) = value else {
        return Err(ProtocolError::coercion(
            ParamType::DateTime,
            format!("{value} is not a string"),
        ));
    };
    let parsed = OffsetDateTime::parse(s.trim(), &Rfc3339)
        .map_err(|e| ProtocolError::coercion(ParamType::DateTime, e.to_string()))?;
    let utc = parsed.to_offset(time::UtcOffset::UTC);
    utc.format(&Rfc3339)
        .map(Value::String)
        .map_err(|e| ProtocolError::coercion(ParamType::DateTime, e.to_string()))
}

fn to_bytes(value: &Value) -> Result<Value, ProtocolError> {
    let bytes = match value {
        Value::String(s) => BASE64
            .decode(s.trim())
            .map_err(|e| ProtocolError::coercion(ParamType::Bytes, e.to_string()))?,
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_u64()
                    .and_then(|b| u8::try_from(b).ok())
                    .ok_or_else(|| {
                        ProtocolError::coercion(ParamType::Bytes, format!("{item} is not a byte"))
                    })
            })
            .collect::<Result<Vec<u8>, _>>()?,
        other => {
            return Err(ProtocolError::coercion(
                ParamType::Bytes,
                format!("{other} is neither base64 nor a byte array"),
            ));
        }
    };
    Ok(Value::Array(bytes.into_iter().map(Value::from).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::JsonEncoder;
    use serde_json::json;

    fn protocol() -> HubProtocol<JsonEncoder> {
        HubProtocol::default()
    }

    fn convert(ty: ParamType, value: Value) -> Result<Value, ProtocolError> {
        protocol().convert_value(&ty, &value)
    }

    #[test]
    fn test_numeric_string_rounds_half_up_to_int() {
        let args = protocol()
            .get_real_arguments(&[ParamType::INT], &[json!("3.7")])
            .unwrap();
        assert_eq!(args, vec![json!(4)]);
    }

    #[test]
    fn test_float_rounds_half_up() {
        assert_eq!(convert(ParamType::INT, json!(2.5)).unwrap(), json!(3));
        assert_eq!(convert(ParamType::INT, json!(2.49)).unwrap(), json!(2));
        assert_eq!(convert(ParamType::INT, json!(-2.5)).unwrap(), json!(-2));
        assert_eq!(convert(ParamType::INT, json!(-2.51)).unwrap(), json!(-3));
    }

    #[test]
    fn test_null_passes_through_for_every_type() {
        for ty in [
            ParamType::Bool,
            ParamType::INT,
            ParamType::String,
            ParamType::DateTime,
            ParamType::enumeration(["A"]),
            ParamType::Object,
        ] {
            assert_eq!(convert(ty, Value::Null).unwrap(), Value::Null);
        }
    }

    #[test]
    fn test_empty_arguments_with_declared_param_is_mismatch() {
        let result = protocol().get_real_arguments(&[ParamType::INT], &[]);
        assert!(matches!(
            result,
            Err(ProtocolError::ArgumentCountMismatch {
                expected: 1,
                actual: 0
            })
        ));
    }

    #[test]
    fn test_no_arguments_for_no_params_is_empty() {
        assert!(protocol().get_real_arguments(&[], &[]).unwrap().is_empty());
    }

    #[test]
    fn test_too_few_arguments_is_mismatch() {
        let result = protocol()
            .get_real_arguments(&[ParamType::INT, ParamType::String], &[json!(1)]);
        assert!(matches!(
            result,
            Err(ProtocolError::ArgumentCountMismatch {
                expected: 2,
                actual: 1
            })
        ));
    }

    #[test]
    fn test_extra_arguments_against_no_params_yield_nothing() {
        let args = protocol()
            .get_real_arguments(&[], &[json!(1), json!("x")])
            .unwrap();
        assert!(args.is_empty());
    }

    #[test]
    fn test_int_range_is_checked() {
        assert!(convert(ParamType::Int(IntKind::U8), json!(256)).is_err());
        assert!(convert(ParamType::Int(IntKind::U8), json!(-1)).is_err());
        assert_eq!(convert(ParamType::Int(IntKind::U8), json!(255)).unwrap(), json!(255));
        assert_eq!(
            convert(ParamType::Int(IntKind::U64), json!(u64::MAX)).unwrap(),
            json!(u64::MAX)
        );
    }

    #[test]
    fn test_bool_to_int_and_back() {
        assert_eq!(convert(ParamType::INT, json!(true)).unwrap(), json!(1));
        assert_eq!(convert(ParamType::Bool, json!(0)).unwrap(), json!(false));
        assert_eq!(convert(ParamType::Bool, json!("TRUE")).unwrap(), json!(true));
        assert!(convert(ParamType::Bool, json!("yes")).is_err());
    }

    #[test]
    fn test_float32_loses_precision() {
        let v = convert(ParamType::Float(FloatKind::F32), json!(0.1)).unwrap();
        assert_eq!(v.as_f64().unwrap(), f64::from(0.1f32));
        assert_eq!(convert(ParamType::DOUBLE, json!("1.25")).unwrap(), json!(1.25));
    }

    #[test]
    fn test_enum_is_case_insensitive() {
        let color = ParamType::enumeration(["Red", "Green"]);
        assert_eq!(convert(color.clone(), json!("green")).unwrap(), json!("Green"));
        assert_eq!(convert(color.clone(), json!(0)).unwrap(), json!("Red"));
        assert!(convert(color, json!("blue")).is_err());
    }

    #[test]
    fn test_string_uses_representation() {
        assert_eq!(convert(ParamType::String, json!("hi")).unwrap(), json!("hi"));
        assert_eq!(convert(ParamType::String, json!(12)).unwrap(), json!("12"));
        assert_eq!(convert(ParamType::String, json!(true)).unwrap(), json!("true"));
    }

    #[test]
    fn test_date_time_normalizes_to_utc() {
        let v = convert(ParamType::DateTime, json!("2024-03-01T12:30:00+02:00")).unwrap();
        assert_eq!(v, json!("2024-03-01T10:30:00Z"));
        assert!(convert(ParamType::DateTime, json!("yesterday")).is_err());
        assert!(convert(ParamType::DateTime, json!(5)).is_err());
    }

    #[test]
    fn test_bytes_from_base64() {
        assert_eq!(convert(ParamType::Bytes, json!("AQID")).unwrap(), json!([1, 2, 3]));
        assert_eq!(convert(ParamType::Bytes, json!([4, 5])).unwrap(), json!([4, 5]));
        assert!(convert(ParamType::Bytes, json!([300])).is_err());
    }

    #[test]
    fn test_optional_unwraps_to_inner() {
        let ty = ParamType::optional(ParamType::INT);
        assert_eq!(convert(ty.clone(), json!(1.6)).unwrap(), json!(2));
        assert_eq!(convert(ty, Value::Null).unwrap(), Value::Null);
    }

    #[test]
    fn test_object_goes_through_encoder() {
        let v = json!({"nested": [1, {"a": null}]});
        assert_eq!(convert(ParamType::Object, v.clone()).unwrap(), v);
    }

    #[test]
    fn test_param_type_display() {
        assert_eq!(ParamType::INT.to_string(), "i32");
        assert_eq!(ParamType::optional(ParamType::String).to_string(), "string?");
        assert_eq!(ParamType::enumeration(["A", "B"]).to_string(), "enum[A|B]");
    }
}
