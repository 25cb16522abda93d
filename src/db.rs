use chrono::{DateTime, Utc};
use float_ord::FloatOrd;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Row identifier handed out by table readers. Opaque to everything but the reader that issued it.
pub type RowId = u64;

/// A materialized row. Values are positionally aligned with the owning `RecordMetadata`.
pub type Record = Vec<Value>;

#[derive(
    PartialEq,
    Eq,
    Hash,
    Debug,
    Clone,
    Copy,
    strum_macros::Display,
    strum_macros::EnumString,
    serde::Serialize,
    serde::Deserialize,
)]
#[strum(serialize_all = "UPPERCASE")]
pub enum ColumnType {
    Boolean,
    Byte,
    Short,
    Int,
    Long,
    Float,
    Double,
    String,
    Symbol,
    Binary,
    Date,
    Timestamp,
    /// Only produced by functions that return a whole row source.
    Cursor,
}

impl ColumnType {
    pub fn is_integral(&self) -> bool {
        matches!(self, Self::Byte | Self::Short | Self::Int | Self::Long)
    }

    pub fn is_numeric(&self) -> bool {
        self.is_integral() || matches!(self, Self::Float | Self::Double)
    }

    /// Variable-length types cannot be stored in fixed-width map values.
    pub fn is_var_size(&self) -> bool {
        matches!(self, Self::String | Self::Binary)
    }

    /// Symbols lose their symbol table once copied out of a table, so keys compare as strings.
    pub fn normalize_key(self) -> Self {
        match self {
            Self::Symbol => Self::String,
            other => other,
        }
    }
}

/// Singleton runtime value.
#[derive(Clone, Debug)]
pub enum Value {
    Null,
    Bool(bool),
    Long(i64),
    Double(f64),
    Str(String),
    Binary(Vec<u8>),
    /// Microseconds since the unix epoch.
    Timestamp(i64),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            Self::Long(x) | Self::Timestamp(x) => Some(*x),
            Self::Double(x) => Some(*x as i64),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            Self::Long(x) | Self::Timestamp(x) => Some(*x as f64),
            Self::Double(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Textual form used when matching values against literal key sets. Nulls have no key text.
    pub fn key_string(&self) -> Option<String> {
        match self {
            Self::Null => None,
            Self::Str(s) => Some(s.clone()),
            Self::Bool(b) => Some(b.to_string()),
            Self::Long(x) | Self::Timestamp(x) => Some(x.to_string()),
            Self::Double(x) => Some(x.to_string()),
            Self::Binary(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        }
    }

    /// Coerces the value into the runtime representation of `column_type`. Returns `Null` for
    /// impossible conversions.
    pub fn cast(&self, column_type: ColumnType) -> Value {
        if self.is_null() {
            return Self::Null;
        }
        match column_type {
            ColumnType::Boolean => self.as_bool().map_or(Self::Null, Self::Bool),
            ColumnType::Byte
            | ColumnType::Short
            | ColumnType::Int
            | ColumnType::Long
            | ColumnType::Date => {
                self.as_long().map_or(Self::Null, Self::Long)
            }
            ColumnType::Float | ColumnType::Double => {
                self.as_double().map_or(Self::Null, Self::Double)
            }
            ColumnType::Timestamp => self.as_long().map_or(Self::Null, Self::Timestamp),
            ColumnType::String | ColumnType::Symbol => {
                self.key_string().map_or(Self::Null, Self::Str)
            }
            ColumnType::Binary | ColumnType::Cursor => self.clone(),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Bool(_) => 1,
            Self::Long(_) | Self::Double(_) | Self::Timestamp(_) => 2,
            Self::Str(_) => 3,
            Self::Binary(_) => 4,
        }
    }

    fn variant(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Bool(_) => 1,
            Self::Long(_) => 2,
            Self::Double(_) => 3,
            Self::Timestamp(_) => 4,
            Self::Str(_) => 5,
            Self::Binary(_) => 6,
        }
    }

    /// SQL comparison: `None` when either side is null or the values are not comparable.
    pub fn sql_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.is_null() || other.is_null() || self.rank() != other.rank() {
            None
        } else {
            Some(self.value_cmp(other))
        }
    }

    /// Total order used for sorting and set semantics. Nulls sort first.
    pub fn total_cmp(&self, other: &Self) -> Ordering {
        self.value_cmp(other)
            .then_with(|| self.variant().cmp(&other.variant()))
    }

    /// Orders by value alone, so `Long(20)` and `Double(20.0)` are equal.
    fn value_cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Bool(x), Self::Bool(y)) => x.cmp(y),
            (Self::Long(x), Self::Long(y))
            | (Self::Timestamp(x), Self::Timestamp(y))
            | (Self::Long(x), Self::Timestamp(y))
            | (Self::Timestamp(x), Self::Long(y)) => x.cmp(y),
            (Self::Str(x), Self::Str(y)) => x.cmp(y),
            (Self::Binary(x), Self::Binary(y)) => x.cmp(y),
            (x, y) if x.rank() == 2 && y.rank() == 2 => {
                // Mixed integral/floating comparison.
                let (a, b) = (x.as_double().unwrap_or(0.), y.as_double().unwrap_or(0.));
                FloatOrd(a).cmp(&FloatOrd(b))
            }
            (x, y) => x.rank().cmp(&y.rank()),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.total_cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        self.total_cmp(other)
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.variant().hash(state);
        match self {
            Self::Null => {}
            Self::Bool(b) => b.hash(state),
            Self::Long(x) | Self::Timestamp(x) => x.hash(state),
            Self::Double(x) => FloatOrd(*x).hash(state),
            Self::Str(s) => s.hash(state),
            Self::Binary(bytes) => bytes.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Long(x) => write!(f, "{}", x),
            Self::Double(x) => write!(f, "{}", x),
            Self::Str(s) => write!(f, "{}", s),
            Self::Binary(bytes) => write!(f, "<{} bytes>", bytes.len()),
            Self::Timestamp(micros) => match DateTime::<Utc>::from_timestamp(
                micros.div_euclid(1_000_000),
                (micros.rem_euclid(1_000_000) * 1_000) as u32,
            ) {
                Some(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S%.6fZ")),
                None => write!(f, "{}", micros),
            },
        }
    }
}

impl From<i64> for Value {
    fn from(x: i64) -> Self {
        Self::Long(x)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Self::Double(x)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(val: Option<T>) -> Self {
        val.map_or(Self::Null, Into::into)
    }
}
