use std::cmp::Ordering;
use std::fmt::Write as _;

use anyhow::{Result, anyhow, bail};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sea_query::ArrayType;

/// A dynamically-typed column value.
///
/// This is the closed set of shapes the runtime moves between records,
/// predicates, and the execution layer. Typed columns convert to and from it
/// through [`ColumnValue`].
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// SQL `NULL`.
    #[default]
    Null,
    /// Boolean.
    Bool(bool),
    /// 32-bit signed integer.
    Int32(i32),
    /// 64-bit signed integer.
    Int64(i64),
    /// 32-bit unsigned integer.
    Uint32(u32),
    /// 64-bit unsigned integer.
    Uint64(u64),
    /// Single precision float.
    Float(f32),
    /// Double precision float.
    Double(f64),
    /// Text.
    Str(String),
    /// Raw bytes.
    Binary(Vec<u8>),
    /// Calendar date.
    Date(NaiveDate),
    /// Time of day.
    Time(NaiveTime),
    /// UTC timestamp.
    Timestamp(DateTime<Utc>),
    /// JSON document.
    Json(serde_json::Value),
    /// Array of values (Postgres arrays; JSON text on engines without arrays).
    Array(Vec<Value>),
}

/// Hashable projection of a scalar value, used as a hash-join key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum ScalarKey {
    Bool(bool),
    Int(i64),
    Uint(u64),
    Str(String),
    Bytes(Vec<u8>),
}

impl Value {
    /// Returns `true` for [`Value::Null`].
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Flattens an array into its elements. Scalars yield themselves and
    /// `NULL` yields nothing.
    #[must_use]
    pub fn flatten(self) -> Vec<Self> {
        match self {
            Self::Null => Vec::new(),
            Self::Array(items) => items,
            other => vec![other],
        }
    }

    /// Integer-normalized key for values that support direct equality
    /// hashing. Floats, JSON, arrays, and `NULL` have none.
    pub(crate) fn scalar_key(&self) -> Option<ScalarKey> {
        let key = match self {
            Self::Bool(v) => ScalarKey::Bool(*v),
            Self::Int32(v) => ScalarKey::Int(i64::from(*v)),
            Self::Int64(v) => ScalarKey::Int(*v),
            Self::Uint32(v) => ScalarKey::Int(i64::from(*v)),
            Self::Uint64(v) => i64::try_from(*v).map_or(ScalarKey::Uint(*v), ScalarKey::Int),
            Self::Str(v) => ScalarKey::Str(v.clone()),
            Self::Binary(v) => ScalarKey::Bytes(v.clone()),
            Self::Date(v) => ScalarKey::Str(v.to_string()),
            Self::Time(v) => ScalarKey::Str(v.to_string()),
            Self::Timestamp(v) => ScalarKey::Str(v.to_rfc3339()),
            Self::Null | Self::Float(_) | Self::Double(_) | Self::Json(_) | Self::Array(_) => {
                return None;
            }
        };
        Some(key)
    }

    /// Canonical string form used for composite join keys.
    pub(crate) fn format_key(&self, out: &mut String) {
        match self {
            Self::Null => out.push_str("\u{0}"),
            Self::Bool(v) => out.push_str(if *v { "t" } else { "f" }),
            Self::Int32(v) => write_display(out, v),
            Self::Int64(v) => write_display(out, v),
            Self::Uint32(v) => write_display(out, v),
            Self::Uint64(v) => write_display(out, v),
            Self::Float(v) => write_display(out, v),
            Self::Double(v) => write_display(out, v),
            Self::Str(v) => out.push_str(v),
            Self::Binary(bytes) => {
                for byte in bytes {
                    let _ = write!(out, "{byte:02x}");
                }
            }
            Self::Date(v) => write_display(out, v),
            Self::Time(v) => write_display(out, v),
            Self::Timestamp(v) => out.push_str(&v.to_rfc3339()),
            Self::Json(v) => write_display(out, v),
            Self::Array(items) => {
                out.push('[');
                for item in items {
                    let mut part = String::new();
                    item.format_key(&mut part);
                    let _ = write!(out, "{}:{part}", part.len());
                }
                out.push(']');
            }
        }
    }

    /// Equality used when reconciling child rows with parents. `NULL` never
    /// matches and integers compare across widths.
    pub(crate) fn key_eq(&self, other: &Self) -> bool {
        if self.is_null() || other.is_null() {
            return false;
        }
        match (self.scalar_key(), other.scalar_key()) {
            (Some(left), Some(right)) => left == right,
            (None, None) => {
                let (mut left, mut right) = (String::new(), String::new());
                self.format_key(&mut left);
                other.format_key(&mut right);
                left == right
            }
            _ => false,
        }
    }

    /// Tagged encoding of one key column, appended length-prefixed to `out`.
    /// Two values encode identically exactly when [`Value::key_eq`] holds.
    pub(crate) fn encode_key(&self, out: &mut String) {
        let mut part = String::new();
        match self.scalar_key() {
            Some(ScalarKey::Bool(v)) => part.push_str(if v { "bt" } else { "bf" }),
            Some(ScalarKey::Int(v)) => {
                let _ = write!(part, "i{v}");
            }
            Some(ScalarKey::Uint(v)) => {
                let _ = write!(part, "u{v}");
            }
            Some(ScalarKey::Str(v)) => {
                part.push('s');
                part.push_str(&v);
            }
            Some(ScalarKey::Bytes(bytes)) => {
                part.push('x');
                for byte in bytes {
                    let _ = write!(part, "{byte:02x}");
                }
            }
            None => {
                part.push('~');
                self.format_key(&mut part);
            }
        }
        let _ = write!(out, "{}:{part}", part.len());
    }

    /// JSON representation, used by engines that store arrays as JSON text.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;

        match self {
            Self::Null => Json::Null,
            Self::Bool(v) => Json::Bool(*v),
            Self::Int32(v) => Json::from(*v),
            Self::Int64(v) => Json::from(*v),
            Self::Uint32(v) => Json::from(*v),
            Self::Uint64(v) => Json::from(*v),
            Self::Float(v) => Json::from(f64::from(*v)),
            Self::Double(v) => Json::from(*v),
            Self::Str(v) => Json::String(v.clone()),
            Self::Binary(v) => Json::Array(v.iter().map(|b| Json::from(*b)).collect()),
            Self::Date(v) => Json::String(v.to_string()),
            Self::Time(v) => Json::String(v.to_string()),
            Self::Timestamp(v) => Json::String(v.to_rfc3339()),
            Self::Json(v) => v.clone(),
            Self::Array(items) => Json::Array(items.iter().map(Self::to_json).collect()),
        }
    }

    /// Best-effort conversion from a JSON document.
    #[must_use]
    pub fn from_json(json: serde_json::Value) -> Self {
        use serde_json::Value as Json;

        match json {
            Json::Null => Self::Null,
            Json::Bool(v) => Self::Bool(v),
            Json::Number(n) => n
                .as_i64()
                .map(Self::Int64)
                .or_else(|| n.as_u64().map(Self::Uint64))
                .unwrap_or_else(|| Self::Double(n.as_f64().unwrap_or_default())),
            Json::String(v) => Self::Str(v),
            Json::Array(items) => Self::Array(items.into_iter().map(Self::from_json).collect()),
            object @ Json::Object(_) => Self::Json(object),
        }
    }

    // Outbound conversion (internal use only)
    pub(crate) fn into_sea(self) -> sea_query::Value {
        use sea_query::Value as Sea;

        match self {
            Self::Null => Sea::String(None),
            Self::Bool(v) => Sea::Bool(Some(v)),
            Self::Int32(v) => Sea::Int(Some(v)),
            Self::Int64(v) => Sea::BigInt(Some(v)),
            Self::Uint32(v) => Sea::Unsigned(Some(v)),
            Self::Uint64(v) => Sea::BigUnsigned(Some(v)),
            Self::Float(v) => Sea::Float(Some(v)),
            Self::Double(v) => Sea::Double(Some(v)),
            Self::Str(v) => Sea::String(Some(Box::new(v))),
            Self::Binary(v) => Sea::Bytes(Some(Box::new(v))),
            Self::Date(v) => Sea::ChronoDate(Some(Box::new(v))),
            Self::Time(v) => Sea::ChronoTime(Some(Box::new(v))),
            Self::Timestamp(v) => Sea::ChronoDateTimeUtc(Some(Box::new(v))),
            Self::Json(v) => Sea::Json(Some(Box::new(v))),
            Self::Array(items) => {
                let array_type = items.first().map_or(ArrayType::String, Self::array_type);
                let items = items.into_iter().map(Self::into_sea).collect();
                Sea::Array(array_type, Some(Box::new(items)))
            }
        }
    }

    const fn array_type(&self) -> ArrayType {
        match self {
            Self::Bool(_) => ArrayType::Bool,
            Self::Int32(_) => ArrayType::Int,
            Self::Int64(_) => ArrayType::BigInt,
            Self::Uint32(_) => ArrayType::Unsigned,
            Self::Uint64(_) => ArrayType::BigUnsigned,
            Self::Float(_) => ArrayType::Float,
            Self::Double(_) => ArrayType::Double,
            Self::Binary(_) => ArrayType::Bytes,
            Self::Date(_) => ArrayType::ChronoDate,
            Self::Time(_) => ArrayType::ChronoTime,
            Self::Timestamp(_) => ArrayType::ChronoDateTimeUtc,
            Self::Json(_) => ArrayType::Json,
            Self::Null | Self::Str(_) | Self::Array(_) => ArrayType::String,
        }
    }

    pub(crate) fn from_sea(value: sea_query::Value) -> Result<Self> {
        use sea_query::Value as Sea;

        let value = match value {
            Sea::Bool(Some(v)) => Self::Bool(v),
            Sea::TinyInt(Some(v)) => Self::Int32(i32::from(v)),
            Sea::SmallInt(Some(v)) => Self::Int32(i32::from(v)),
            Sea::Int(Some(v)) => Self::Int32(v),
            Sea::BigInt(Some(v)) => Self::Int64(v),
            Sea::TinyUnsigned(Some(v)) => Self::Uint32(u32::from(v)),
            Sea::SmallUnsigned(Some(v)) => Self::Uint32(u32::from(v)),
            Sea::Unsigned(Some(v)) => Self::Uint32(v),
            Sea::BigUnsigned(Some(v)) => Self::Uint64(v),
            Sea::Float(Some(v)) => Self::Float(v),
            Sea::Double(Some(v)) => Self::Double(v),
            Sea::String(Some(v)) => Self::Str(*v),
            Sea::Char(Some(v)) => Self::Str(v.to_string()),
            Sea::Bytes(Some(v)) => Self::Binary(*v),
            Sea::Json(Some(v)) => Self::Json(*v),
            Sea::ChronoDate(Some(v)) => Self::Date(*v),
            Sea::ChronoTime(Some(v)) => Self::Time(*v),
            Sea::ChronoDateTime(Some(v)) => Self::Timestamp(v.and_utc()),
            Sea::ChronoDateTimeUtc(Some(v)) => Self::Timestamp(*v),
            Sea::ChronoDateTimeWithTimeZone(Some(v)) => Self::Timestamp(v.with_timezone(&Utc)),
            Sea::Array(_, Some(items)) => {
                Self::Array(items.into_iter().map(Self::from_sea).collect::<Result<_>>()?)
            }
            Sea::Bool(None)
            | Sea::TinyInt(None)
            | Sea::SmallInt(None)
            | Sea::Int(None)
            | Sea::BigInt(None)
            | Sea::TinyUnsigned(None)
            | Sea::SmallUnsigned(None)
            | Sea::Unsigned(None)
            | Sea::BigUnsigned(None)
            | Sea::Float(None)
            | Sea::Double(None)
            | Sea::String(None)
            | Sea::Char(None)
            | Sea::Bytes(None)
            | Sea::Json(None)
            | Sea::ChronoDate(None)
            | Sea::ChronoTime(None)
            | Sea::ChronoDateTime(None)
            | Sea::ChronoDateTimeUtc(None)
            | Sea::ChronoDateTimeWithTimeZone(None)
            | Sea::Array(_, None) => Self::Null,
            _ => {
                bail!("unsupported values require explicit conversion before building the query")
            }
        };
        Ok(value)
    }
}

fn write_display(out: &mut String, value: &impl std::fmt::Display) {
    let _ = write!(out, "{value}");
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Self::$variant(value)
                }
            }
        )*
    };
}

value_from! {
    bool => Bool,
    i32 => Int32,
    i64 => Int64,
    u32 => Uint32,
    u64 => Uint64,
    f32 => Float,
    f64 => Double,
    String => Str,
    Vec<u8> => Binary,
    NaiveDate => Date,
    NaiveTime => Time,
    DateTime<Utc> => Timestamp,
    serde_json::Value => Json,
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl<T: Into<Self>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Trait for Rust types that can be stored in a typed column.
///
/// Implemented for the standard scalar types, `chrono` temporal types,
/// `serde_json::Value`, `Option<T>` (nullable columns), and `Vec<T>` for
/// scalar `T` (array columns). `Vec<u8>` is a binary scalar, not an array.
pub trait ColumnValue: Clone + Default + Send + Sync + 'static {
    /// The column holds an array of values.
    const IS_ARRAY: bool = false;

    /// The column accepts `NULL`.
    const IS_NULLABLE: bool = false;

    /// Drivers may return this type in a non-native encoding (JSON text,
    /// integer booleans, textual timestamps) that needs a lenient decode.
    const CUSTOM_SCAN: bool = false;

    /// Convert to a dynamically-typed value.
    fn to_value(&self) -> Value;

    /// Convert from a dynamically-typed value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be represented by this type.
    fn from_value(value: Value) -> Result<Self>;

    /// Whether this is the type's zero value (candidate for `DEFAULT`).
    fn is_zero(&self) -> bool;

    /// Total ordering used by in-memory sorting.
    fn compare(&self, other: &Self) -> Ordering;
}

macro_rules! integer_column {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl ColumnValue for $ty {
                fn to_value(&self) -> Value {
                    Value::$variant(*self)
                }

                fn from_value(value: Value) -> Result<Self> {
                    let raw = as_i128(&value)?;
                    <$ty>::try_from(raw)
                        .map_err(|_e| anyhow!("{raw} is out of range for {}", stringify!($ty)))
                }

                fn is_zero(&self) -> bool {
                    *self == 0
                }

                fn compare(&self, other: &Self) -> Ordering {
                    self.cmp(other)
                }
            }
        )*
    };
}

integer_column! {
    i32 => Int32,
    i64 => Int64,
    u32 => Uint32,
    u64 => Uint64,
}

impl ColumnValue for bool {
    const CUSTOM_SCAN: bool = true;

    fn to_value(&self) -> Value {
        Value::Bool(*self)
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Bool(v) => Ok(v),
            Value::Int32(_) | Value::Int64(_) | Value::Uint32(_) | Value::Uint64(_) => {
                Ok(as_i128(&value)? != 0)
            }
            _ => bail!("expected boolean data type"),
        }
    }

    fn is_zero(&self) -> bool {
        !*self
    }

    fn compare(&self, other: &Self) -> Ordering {
        self.cmp(other)
    }
}

impl ColumnValue for f32 {
    fn to_value(&self) -> Value {
        Value::Float(*self)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Float(v) => Ok(v),
            other => Ok(as_f64(&other)? as Self),
        }
    }

    fn is_zero(&self) -> bool {
        *self == 0.0
    }

    fn compare(&self, other: &Self) -> Ordering {
        self.total_cmp(other)
    }
}

impl ColumnValue for f64 {
    fn to_value(&self) -> Value {
        Value::Double(*self)
    }

    fn from_value(value: Value) -> Result<Self> {
        as_f64(&value)
    }

    fn is_zero(&self) -> bool {
        *self == 0.0
    }

    fn compare(&self, other: &Self) -> Ordering {
        self.total_cmp(other)
    }
}

impl ColumnValue for String {
    fn to_value(&self) -> Value {
        Value::Str(self.clone())
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Str(raw) => Ok(raw),
            _ => bail!("expected string data type"),
        }
    }

    fn is_zero(&self) -> bool {
        self.is_empty()
    }

    fn compare(&self, other: &Self) -> Ordering {
        self.cmp(other)
    }
}

impl ColumnValue for Vec<u8> {
    fn to_value(&self) -> Value {
        Value::Binary(self.clone())
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Binary(bytes) => Ok(bytes),
            _ => bail!("expected binary data type"),
        }
    }

    fn is_zero(&self) -> bool {
        self.is_empty()
    }

    fn compare(&self, other: &Self) -> Ordering {
        self.cmp(other)
    }
}

impl ColumnValue for DateTime<Utc> {
    const CUSTOM_SCAN: bool = true;

    fn to_value(&self) -> Value {
        Value::Timestamp(*self)
    }

    fn from_value(value: Value) -> Result<Self> {
        as_timestamp(value)
    }

    fn is_zero(&self) -> bool {
        *self == Self::default()
    }

    fn compare(&self, other: &Self) -> Ordering {
        self.cmp(other)
    }
}

impl ColumnValue for NaiveDate {
    const CUSTOM_SCAN: bool = true;

    fn to_value(&self) -> Value {
        Value::Date(*self)
    }

    fn from_value(value: Value) -> Result<Self> {
        as_date(value)
    }

    fn is_zero(&self) -> bool {
        *self == Self::default()
    }

    fn compare(&self, other: &Self) -> Ordering {
        self.cmp(other)
    }
}

impl ColumnValue for NaiveTime {
    const CUSTOM_SCAN: bool = true;

    fn to_value(&self) -> Value {
        Value::Time(*self)
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Time(v) => Ok(v),
            Value::Str(raw) => NaiveTime::parse_from_str(&raw, "%H:%M:%S%.f")
                .map_err(|_e| anyhow!("unsupported time: {raw}; expected \"%H:%M:%S%.f\" format")),
            _ => bail!("expected time data type"),
        }
    }

    fn is_zero(&self) -> bool {
        *self == Self::default()
    }

    fn compare(&self, other: &Self) -> Ordering {
        self.cmp(other)
    }
}

impl ColumnValue for serde_json::Value {
    const CUSTOM_SCAN: bool = true;

    fn to_value(&self) -> Value {
        Value::Json(self.clone())
    }

    fn from_value(value: Value) -> Result<Self> {
        as_json(value)
    }

    fn is_zero(&self) -> bool {
        self.is_null()
    }

    fn compare(&self, other: &Self) -> Ordering {
        self.to_string().cmp(&other.to_string())
    }
}

impl<T: ColumnValue> ColumnValue for Option<T> {
    const CUSTOM_SCAN: bool = T::CUSTOM_SCAN;
    const IS_ARRAY: bool = T::IS_ARRAY;
    const IS_NULLABLE: bool = true;

    fn to_value(&self) -> Value {
        self.as_ref().map_or(Value::Null, ColumnValue::to_value)
    }

    fn from_value(value: Value) -> Result<Self> {
        if value.is_null() { Ok(None) } else { T::from_value(value).map(Some) }
    }

    fn is_zero(&self) -> bool {
        self.is_none()
    }

    fn compare(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Some(left), Some(right)) => left.compare(right),
            (left, right) => left.is_some().cmp(&right.is_some()),
        }
    }
}

macro_rules! array_column {
    ($($ty:ty),* $(,)?) => {
        $(
            impl ColumnValue for Vec<$ty> {
                const CUSTOM_SCAN: bool = true;
                const IS_ARRAY: bool = true;

                fn to_value(&self) -> Value {
                    Value::Array(self.iter().map(ColumnValue::to_value).collect())
                }

                fn from_value(value: Value) -> Result<Self> {
                    as_array(value)?.into_iter().map(<$ty>::from_value).collect()
                }

                fn is_zero(&self) -> bool {
                    self.is_empty()
                }

                fn compare(&self, other: &Self) -> Ordering {
                    for (left, right) in self.iter().zip(other) {
                        match left.compare(right) {
                            Ordering::Equal => {}
                            unequal => return unequal,
                        }
                    }
                    self.len().cmp(&other.len())
                }
            }

            impl From<Vec<$ty>> for Value {
                fn from(value: Vec<$ty>) -> Self {
                    value.to_value()
                }
            }
        )*
    };
}

array_column!(bool, i32, i64, u32, u64, f64, String);

// Inbound conversion

fn as_i128(value: &Value) -> Result<i128> {
    match value {
        Value::Int32(v) => Ok(i128::from(*v)),
        Value::Int64(v) => Ok(i128::from(*v)),
        Value::Uint32(v) => Ok(i128::from(*v)),
        Value::Uint64(v) => Ok(i128::from(*v)),
        _ => bail!("expected integer data type"),
    }
}

#[allow(clippy::cast_precision_loss)]
fn as_f64(value: &Value) -> Result<f64> {
    match value {
        Value::Float(v) => Ok(f64::from(*v)),
        Value::Double(v) => Ok(*v),
        Value::Int32(v) => Ok(f64::from(*v)),
        Value::Int64(v) => Ok(*v as f64),
        Value::Uint32(v) => Ok(f64::from(*v)),
        Value::Uint64(v) => Ok(*v as f64),
        _ => bail!("expected double data type"),
    }
}

fn as_timestamp(value: Value) -> Result<DateTime<Utc>> {
    match value {
        Value::Timestamp(v) => Ok(v),
        Value::Str(raw) => {
            if let Ok(parsed) = DateTime::parse_from_rfc3339(&raw) {
                return Ok(parsed.with_timezone(&Utc));
            }

            if let Ok(parsed) = NaiveDateTime::parse_from_str(&raw, "%Y-%m-%d %H:%M:%S%.f") {
                return Ok(DateTime::<Utc>::from_naive_utc_and_offset(parsed, Utc));
            }

            bail!(
                "unsupported timestamp: {raw}; expected RFC3339 or \"%Y-%m-%d %H:%M:%S%.f\" format"
            )
        }
        _ => bail!("expected timestamp data type"),
    }
}

fn as_date(value: Value) -> Result<NaiveDate> {
    match value {
        Value::Date(v) => Ok(v),
        Value::Str(raw) => NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
            .map_err(|_e| anyhow!("unsupported date: {raw}; expected \"%Y-%m-%d\" format")),
        _ => bail!("expected date data type"),
    }
}

fn as_json(value: Value) -> Result<serde_json::Value> {
    match value {
        Value::Json(v) => Ok(v),
        Value::Str(raw) => Ok(serde_json::from_str(&raw)?),
        Value::Binary(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Value::Null => Ok(serde_json::Value::Null),
        _ => bail!("expected json compatible data type"),
    }
}

fn as_array(value: Value) -> Result<Vec<Value>> {
    match value {
        Value::Array(items) => Ok(items),
        Value::Null => Ok(Vec::new()),
        Value::Json(serde_json::Value::Array(items)) => {
            Ok(items.into_iter().map(Value::from_json).collect())
        }
        Value::Str(raw) => match serde_json::from_str(&raw)? {
            serde_json::Value::Array(items) => {
                Ok(items.into_iter().map(Value::from_json).collect())
            }
            _ => bail!("expected a JSON array, found {raw}"),
        },
        _ => bail!("expected array data type"),
    }
}
