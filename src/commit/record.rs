use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Unit separator placed between fields of a canonical record.
pub const FIELD_SEPARATOR: u8 = 0x1f;

/// One row of the delivered dataset. Missing values are `None` and
/// canonicalize to the empty string.
///
/// Deserializes from a JSON array of scalars: numbers and booleans keep their
/// JSON text, `null` is a missing value, nested arrays and objects are
/// rejected.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(transparent)]
pub struct Record {
    fields: Vec<Option<String>>,
}

impl Record {
    pub fn new(fields: Vec<Option<String>>) -> Self {
        Self { fields }
    }

    pub fn from_values<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(values.into_iter().map(|v| Some(v.into())).collect())
    }

    pub fn fields(&self) -> &[Option<String>] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Leaf input: the fields joined by `FIELD_SEPARATOR`.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for (idx, field) in self.fields.iter().enumerate() {
            if idx > 0 {
                out.push(FIELD_SEPARATOR);
            }
            if let Some(value) = field {
                out.extend_from_slice(value.as_bytes());
            }
        }
        out
    }
}

impl<'de> Deserialize<'de> for Record {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let cells = Vec::<Value>::deserialize(deserializer)?;
        cells
            .into_iter()
            .enumerate()
            .map(|(position, cell)| {
                cell_text(cell).map_err(|kind| {
                    D::Error::custom(format!("record cell {position} is {kind}, expected a scalar"))
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Self::new)
    }
}

fn cell_text(cell: Value) -> Result<Option<String>, &'static str> {
    match cell {
        Value::Null => Ok(None),
        Value::String(text) => Ok(Some(text)),
        Value::Number(number) => Ok(Some(number.to_string())),
        Value::Bool(flag) => Ok(Some(flag.to_string())),
        Value::Array(_) => Err("an array"),
        Value::Object(_) => Err("an object"),
    }
}

impl From<Vec<Option<String>>> for Record {
    fn from(fields: Vec<Option<String>>) -> Self {
        Self::new(fields)
    }
}
