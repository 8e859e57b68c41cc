//! Record shapes.
//!
//! The interceptor walks records by persisted column name. Map-shaped rows
//! are walked by key; typed records describe their fields once, through
//! [`describable!`](crate::describable), as a [`RecordShape`] of settable
//! slots built on first use.

use convert_case::{Boundary, Case, Casing};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

/// A map-shaped record keyed by column name.
pub type Row = serde_json::Map<String, Value>;

/// Column name for a field without an explicit annotation: the snake_case
/// form of its name. Digits stay attached (`line1`, not `line_1`).
pub fn column_name(field: &str) -> String {
    field
        .trim_start_matches("r#")
        .with_boundaries(&[
            Boundary::Underscore,
            Boundary::Hyphen,
            Boundary::Space,
            Boundary::LowerUpper,
        ])
        .to_case(Case::Snake)
}

/// The zero value of the same JSON kind as `value`.
pub fn zero_value(value: &Value) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::Bool(_) => Value::Bool(false),
        Value::Number(_) => Value::from(0),
        Value::String(_) => Value::String(String::new()),
        Value::Array(_) => Value::Array(Vec::new()),
        Value::Object(_) => Value::Object(Row::new()),
    }
}

// =============================================================================
// FIELD WALKING
// =============================================================================

/// Field access by persisted column name.
pub trait RecordFields: Send + Sync {
    /// Column names of the record.
    fn columns(&self) -> Vec<String>;

    /// Zero `column` in place. Returns whether the record has that column.
    fn reset(&mut self, column: &str) -> bool;

    /// Drop `column` from an outgoing write. Rows lose the key; typed
    /// records cannot, so the slot is reset instead.
    fn strip(&mut self, column: &str) -> bool;

    /// Set `column` to `value`. Returns `Ok(false)` when the record has no
    /// such column and cannot grow one.
    fn assign(&mut self, column: &str, value: Value) -> Result<bool, serde_json::Error>;

    /// Map form sent to the backend.
    fn to_row(&self) -> Result<Row, serde_json::Error>;
}

/// Every key of `row` that names `column`, exact spelling first.
fn row_keys(row: &Row, column: &str) -> Vec<String> {
    let mut keys: Vec<String> = row
        .keys()
        .filter(|key| key.as_str() != column && column_name(key) == column)
        .cloned()
        .collect();
    if row.contains_key(column) {
        keys.insert(0, column.to_string());
    }
    keys
}

impl RecordFields for Row {
    fn columns(&self) -> Vec<String> {
        self.keys().map(|key| column_name(key)).collect()
    }

    fn reset(&mut self, column: &str) -> bool {
        let keys = row_keys(self, column);
        for key in &keys {
            if let Some(value) = self.get_mut(key) {
                *value = zero_value(value);
            }
        }
        !keys.is_empty()
    }

    fn strip(&mut self, column: &str) -> bool {
        let keys = row_keys(self, column);
        for key in &keys {
            self.remove(key);
        }
        !keys.is_empty()
    }

    /// Writes through the first matching key and drops the other spellings.
    fn assign(&mut self, column: &str, value: Value) -> Result<bool, serde_json::Error> {
        let mut keys = row_keys(self, column).into_iter();
        let target = keys.next().unwrap_or_else(|| column.to_string());
        for alias in keys {
            self.remove(&alias);
        }
        self.insert(target, value);
        Ok(true)
    }

    fn to_row(&self) -> Result<Row, serde_json::Error> {
        Ok(self.clone())
    }
}

impl<T: Describable> RecordFields for T {
    fn columns(&self) -> Vec<String> {
        T::shape().columns().map(str::to_string).collect()
    }

    fn reset(&mut self, column: &str) -> bool {
        match T::shape().slot(column) {
            Some(slot) => {
                (slot.reset)(self);
                true
            }
            None => false,
        }
    }

    fn strip(&mut self, column: &str) -> bool {
        self.reset(column)
    }

    fn assign(&mut self, column: &str, value: Value) -> Result<bool, serde_json::Error> {
        match T::shape().slot(column) {
            Some(slot) => {
                (slot.assign)(self, value)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn to_row(&self) -> Result<Row, serde_json::Error> {
        T::shape().to_row(self)
    }
}

// =============================================================================
// RECORD SHAPES
// =============================================================================

/// One field of a typed record.
pub struct FieldSlot<T> {
    field: &'static str,
    column: String,
    reset: fn(&mut T),
    assign: fn(&mut T, Value) -> Result<(), serde_json::Error>,
}

impl<T> FieldSlot<T> {
    pub fn new(
        field: &'static str,
        column: String,
        reset: fn(&mut T),
        assign: fn(&mut T, Value) -> Result<(), serde_json::Error>,
    ) -> Self {
        Self {
            field,
            column,
            reset,
            assign,
        }
    }

    /// Rust field name.
    pub fn field(&self) -> &'static str {
        self.field
    }

    /// Persisted column name.
    pub fn column(&self) -> &str {
        &self.column
    }
}

/// Table and field layout of a typed record.
pub struct RecordShape<T> {
    table: &'static str,
    slots: Vec<FieldSlot<T>>,
}

impl<T: Serialize + DeserializeOwned> RecordShape<T> {
    pub fn new(table: &'static str, slots: Vec<FieldSlot<T>>) -> Self {
        Self { table, slots }
    }

    pub fn table(&self) -> &'static str {
        self.table
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.slots.iter().map(FieldSlot::column)
    }

    pub fn slot(&self, column: &str) -> Option<&FieldSlot<T>> {
        self.slots.iter().find(|slot| slot.column == column)
    }

    /// Serialize `record`, renaming fields to their columns.
    pub fn to_row(&self, record: &T) -> Result<Row, serde_json::Error> {
        let mut row = match serde_json::to_value(record)? {
            Value::Object(row) => row,
            other => {
                return Err(serde::ser::Error::custom(format!(
                    "record serialized to {other}, expected an object"
                )));
            }
        };
        for slot in &self.slots {
            if slot.field != slot.column
                && let Some(value) = row.remove(slot.field)
            {
                row.insert(slot.column.clone(), value);
            }
        }
        Ok(row)
    }

    /// Deserialize a backend row, renaming columns to their fields.
    pub fn from_row(&self, mut row: Row) -> Result<T, serde_json::Error> {
        for slot in &self.slots {
            if slot.field != slot.column
                && let Some(value) = row.remove(&slot.column)
            {
                row.insert(slot.field.to_string(), value);
            }
        }
        serde_json::from_value(Value::Object(row))
    }
}

/// A typed record with a static shape.
///
/// Implement through [`describable!`](crate::describable). Serde field names
/// must be the Rust field names; use `#[column = "..."]` in the macro to map
/// a field to a differently named column.
pub trait Describable: Serialize + DeserializeOwned + Send + Sync + Sized + 'static {
    fn shape() -> &'static RecordShape<Self>;
}

/// Implement [`Describable`] for a struct.
///
/// ```ignore
/// describable!(User => "users" {
///     id,
///     name,
///     #[column = "mobile"]
///     phone,
///     created_by,
/// });
/// ```
///
/// Every listed field must implement `Default` and `Deserialize`.
#[macro_export]
macro_rules! describable {
    (
        $ty:ty => $table:literal {
            $( $(#[column = $column:literal])? $field:ident ),* $(,)?
        }
    ) => {
        impl $crate::record::Describable for $ty {
            fn shape() -> &'static $crate::record::RecordShape<Self> {
                static SHAPE: ::std::sync::OnceLock<$crate::record::RecordShape<$ty>> =
                    ::std::sync::OnceLock::new();
                SHAPE.get_or_init(|| {
                    $crate::record::RecordShape::new(
                        $table,
                        ::std::vec![
                            $(
                                $crate::record::FieldSlot::<$ty>::new(
                                    ::std::stringify!($field),
                                    $crate::describable!(@column $field $(, $column)?),
                                    |record: &mut $ty| {
                                        record.$field = ::std::default::Default::default();
                                    },
                                    |record: &mut $ty,
                                     value: $crate::__private::serde_json::Value|
                                     -> ::std::result::Result<(), $crate::__private::serde_json::Error> {
                                        record.$field = $crate::__private::serde_json::from_value(value)?;
                                        Ok(())
                                    },
                                ),
                            )*
                        ],
                    )
                })
            }
        }
    };
    (@column $field:ident) => {
        $crate::record::column_name(::std::stringify!($field))
    };
    (@column $field:ident, $column:literal) => {
        ::std::string::String::from($column)
    };
}
