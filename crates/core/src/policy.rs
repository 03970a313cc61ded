//! Upload admission policy.
//!
//! Routes declare which file fields they accept with an [`ExpectedFiles`]
//! value. Compiling it yields an [`UploadPolicy`]: the [`LimitPolicy`] the
//! accumulator enforces on every admission, plus the ordered list of fields
//! that must be present once parsing finishes.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Sentinel accepted in configuration for "accept any file field".
pub const ANY_FILES: &str = "ANY_FILES";

/// Per-field admission limits for one decode session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LimitPolicy {
    /// Accept any field name, any number of files; every field is a sequence.
    Unlimited,
    /// Only the listed fields are accepted, each up to its maximum count.
    PerField(BTreeMap<String, i64>),
}

impl LimitPolicy {
    /// Maximum admitted count for `field`, or `None` if the field is not expected.
    ///
    /// Always `None` for [`LimitPolicy::Unlimited`]; check that variant first.
    pub fn max_for(&self, field: &str) -> Option<i64> {
        match self {
            Self::Unlimited => None,
            Self::PerField(limits) => limits.get(field).copied(),
        }
    }
}

/// How many files one field may carry and whether it must be present.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct FileExpectation {
    pub max_count: i64,
    pub optional: bool,
}

impl FileExpectation {
    /// A required field accepting up to `max_count` files.
    pub fn required(max_count: i64) -> Self {
        Self {
            max_count,
            optional: false,
        }
    }

    /// An optional field accepting up to `max_count` files.
    pub fn optional(max_count: i64) -> Self {
        Self {
            max_count,
            optional: true,
        }
    }
}

/// The file fields a route expects.
///
/// Deserializes from either the string `"ANY_FILES"` or an object whose
/// values are an integer (required, max count) or
/// `{ maxCount | max_count, optional? }`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum ExpectedFiles {
    Any,
    Fields(Vec<(String, FileExpectation)>),
}

impl ExpectedFiles {
    /// Accept any file field.
    pub fn any() -> Self {
        Self::Any
    }

    /// Start an explicit field list (no fields = reject every file).
    pub fn fields() -> Self {
        Self::Fields(Vec::new())
    }

    /// Add a required field.
    pub fn required(self, field: impl Into<String>, max_count: i64) -> Self {
        self.with(field.into(), FileExpectation::required(max_count))
    }

    /// Add an optional field.
    pub fn optional(self, field: impl Into<String>, max_count: i64) -> Self {
        self.with(field.into(), FileExpectation::optional(max_count))
    }

    fn with(self, field: String, expectation: FileExpectation) -> Self {
        let mut fields = match self {
            Self::Any => Vec::new(),
            Self::Fields(fields) => fields,
        };
        fields.retain(|(name, _)| *name != field);
        fields.push((field, expectation));
        Self::Fields(fields)
    }

    /// Parse and validate a dynamic value.
    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::String(s) if s == ANY_FILES => Ok(Self::Any),
            Value::Object(map) => {
                let mut fields = Vec::with_capacity(map.len());
                for (name, entry) in map {
                    fields.push((name.clone(), parse_expectation(entry)?));
                }
                Ok(Self::Fields(fields))
            }
            other => Err(Error::InvalidExpectedFiles(format!(
                "`expectedFiles` must be an object or \"{ANY_FILES}\". Received: {other}"
            ))),
        }
    }

    /// Compile into the policy a decode session enforces.
    pub fn compile(&self) -> UploadPolicy {
        match self {
            Self::Any => UploadPolicy {
                limits: LimitPolicy::Unlimited,
                required: Vec::new(),
            },
            Self::Fields(fields) => UploadPolicy {
                limits: LimitPolicy::PerField(
                    fields
                        .iter()
                        .map(|(name, exp)| (name.clone(), exp.max_count))
                        .collect(),
                ),
                required: fields
                    .iter()
                    .filter(|(_, exp)| !exp.optional)
                    .map(|(name, _)| name.clone())
                    .collect(),
            },
        }
    }
}

fn parse_expectation(entry: &Value) -> Result<FileExpectation> {
    match entry {
        Value::Number(n) => n
            .as_i64()
            .map(FileExpectation::required)
            .ok_or_else(|| invalid_value(entry)),
        Value::Object(obj) => {
            let max_count = obj
                .get("maxCount")
                .or_else(|| obj.get("max_count"))
                .and_then(Value::as_i64)
                .ok_or_else(|| {
                    Error::InvalidExpectedFiles(format!(
                        "expectedFiles object values must have a `maxCount` property that is an integer. Received: {entry}"
                    ))
                })?;
            let optional = obj.get("optional").and_then(Value::as_bool) == Some(true);
            Ok(FileExpectation {
                max_count,
                optional,
            })
        }
        _ => Err(invalid_value(entry)),
    }
}

fn invalid_value(entry: &Value) -> Error {
    Error::InvalidExpectedFiles(format!(
        "expectedFiles values must be an integer or an object. Received: {entry}"
    ))
}

impl TryFrom<Value> for ExpectedFiles {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        Self::from_value(&value)
    }
}

impl From<ExpectedFiles> for Value {
    fn from(expected: ExpectedFiles) -> Self {
        match expected {
            ExpectedFiles::Any => Value::String(ANY_FILES.to_string()),
            ExpectedFiles::Fields(fields) => Value::Object(
                fields
                    .into_iter()
                    .map(|(name, exp)| {
                        let value = if exp.optional {
                            serde_json::json!({ "maxCount": exp.max_count, "optional": true })
                        } else {
                            Value::from(exp.max_count)
                        };
                        (name, value)
                    })
                    .collect(),
            ),
        }
    }
}

/// A compiled route policy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadPolicy {
    pub limits: LimitPolicy,
    /// Fields that must be present, in declaration order.
    pub required: Vec<String>,
}
