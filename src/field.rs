//! Field paths and aggregated field errors
//!
//! Validation in this crate never fails fast: every check appends to a
//! [`FieldErrorList`] and callers decide what to do with the aggregate. Paths
//! and messages render the same way the Kubernetes API server renders them so
//! admission denials read naturally to `kubectl` users.

use std::fmt;

/// One step in a field path
#[derive(Clone, Debug, PartialEq, Eq)]
enum PathElement {
    Child(String),
    Index(usize),
    Key(String),
}

/// A path to a field inside an object, e.g. `spec.variables[0].name`
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FieldPath(Vec<PathElement>);

impl FieldPath {
    /// Create a path from a sequence of child field names
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(
            fields
                .into_iter()
                .map(|f| PathElement::Child(f.into()))
                .collect(),
        )
    }

    /// The empty (root) path
    pub fn root() -> Self {
        Self::default()
    }

    /// Descend into a named child field
    pub fn child(&self, name: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.0.push(PathElement::Child(name.into()));
        next
    }

    /// Descend into a list element
    pub fn index(&self, index: usize) -> Self {
        let mut next = self.clone();
        next.0.push(PathElement::Index(index));
        next
    }

    /// Descend into a map entry
    pub fn key(&self, key: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.0.push(PathElement::Key(key.into()));
        next
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, element) in self.0.iter().enumerate() {
            match element {
                PathElement::Child(name) if i == 0 => write!(f, "{name}")?,
                PathElement::Child(name) => write!(f, ".{name}")?,
                PathElement::Index(index) => write!(f, "[{index}]")?,
                PathElement::Key(key) => write!(f, "[{key}]")?,
            }
        }
        Ok(())
    }
}

/// Category of a field error
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldErrorType {
    /// A required value is missing
    Required,
    /// The value is malformed or out of range
    Invalid,
    /// The value is not allowed in this context
    Forbidden,
    /// The value is not one of the supported values
    NotSupported,
    /// The value repeats an earlier one that must be unique
    Duplicate,
    /// The check itself could not be completed
    Internal,
}

impl fmt::Display for FieldErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Required => "Required value",
            Self::Invalid => "Invalid value",
            Self::Forbidden => "Forbidden",
            Self::NotSupported => "Unsupported value",
            Self::Duplicate => "Duplicate value",
            Self::Internal => "Internal error",
        };
        f.write_str(s)
    }
}

/// A single validation failure at a field path
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldError {
    /// Error category
    pub error_type: FieldErrorType,
    /// Rendered field path
    pub field: String,
    /// Offending value, rendered as JSON when available
    pub value: Option<String>,
    /// Human-readable detail
    pub detail: String,
}

impl FieldError {
    fn new(
        error_type: FieldErrorType,
        path: &FieldPath,
        value: Option<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            error_type,
            field: path.to_string(),
            value,
            detail: detail.into(),
        }
    }

    /// A required value is missing
    pub fn required(path: &FieldPath, detail: impl Into<String>) -> Self {
        Self::new(FieldErrorType::Required, path, None, detail)
    }

    /// The value is invalid
    pub fn invalid(path: &FieldPath, value: impl fmt::Display, detail: impl Into<String>) -> Self {
        Self::new(FieldErrorType::Invalid, path, Some(value.to_string()), detail)
    }

    /// The field is forbidden
    pub fn forbidden(path: &FieldPath, detail: impl Into<String>) -> Self {
        Self::new(FieldErrorType::Forbidden, path, None, detail)
    }

    /// The value is not one of the supported values
    pub fn not_supported(path: &FieldPath, value: impl fmt::Display, supported: &[&str]) -> Self {
        let quoted: Vec<String> = supported.iter().map(|s| format!("\"{s}\"")).collect();
        Self::new(
            FieldErrorType::NotSupported,
            path,
            Some(value.to_string()),
            format!("supported values: {}", quoted.join(", ")),
        )
    }

    /// The value duplicates an earlier one
    pub fn duplicate(path: &FieldPath, value: impl fmt::Display) -> Self {
        Self::new(
            FieldErrorType::Duplicate,
            path,
            Some(value.to_string()),
            String::new(),
        )
    }

    /// The check could not be completed
    pub fn internal(path: &FieldPath, detail: impl Into<String>) -> Self {
        Self::new(FieldErrorType::Internal, path, None, detail)
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.field.is_empty() {
            write!(f, "{}: ", self.field)?;
        }
        write!(f, "{}", self.error_type)?;
        if let Some(value) = &self.value {
            write!(f, ": {value}")?;
        }
        if !self.detail.is_empty() {
            write!(f, ": {}", self.detail)?;
        }
        Ok(())
    }
}

/// Ordered collection of field errors
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FieldErrorList(Vec<FieldError>);

impl FieldErrorList {
    /// Create an empty list
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one error
    pub fn push(&mut self, error: FieldError) {
        self.0.push(error);
    }

    /// Append all errors from another list
    pub fn append(&mut self, mut other: FieldErrorList) {
        self.0.append(&mut other.0);
    }

    /// Whether no errors were recorded
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of recorded errors
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterate over the recorded errors
    pub fn iter(&self) -> std::slice::Iter<'_, FieldError> {
        self.0.iter()
    }

    /// Turn a non-empty list into an [`Error::Invalid`](crate::Error::Invalid)
    pub fn into_result(self, kind: &str, name: &str) -> crate::Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(crate::Error::invalid(kind, name, self))
        }
    }
}

impl From<FieldError> for FieldErrorList {
    fn from(error: FieldError) -> Self {
        Self(vec![error])
    }
}

impl FromIterator<FieldError> for FieldErrorList {
    fn from_iter<I: IntoIterator<Item = FieldError>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Extend<FieldError> for FieldErrorList {
    fn extend<I: IntoIterator<Item = FieldError>>(&mut self, iter: I) {
        self.0.extend(iter);
    }
}

impl IntoIterator for FieldErrorList {
    type Item = FieldError;
    type IntoIter = std::vec::IntoIter<FieldError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a FieldErrorList {
    type Item = &'a FieldError;
    type IntoIter = std::slice::Iter<'a, FieldError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for FieldErrorList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.as_slice() {
            [] => f.write_str("no errors"),
            [single] => write!(f, "{single}"),
            many => {
                f.write_str("[")?;
                for (i, e) in many.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{e}")?;
                }
                f.write_str("]")
            }
        }
    }
}
