use serde::Serialize;

use crate::{
    error::{Error, Result},
    schema::{self, FieldKind, REQUIRED_FIELDS, fields},
};

/// One named value of a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldValue {
    pub name: String,
    pub kind: FieldKind,
    pub value: String,
}

/// An ordered set of named fields to be indexed.
///
/// Documents are immutable once indexed; an update replaces the whole
/// document under its identity value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    fields: Vec<FieldValue>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a keyword (verbatim, untokenized) field.
    pub fn keyword(self, name: &str, value: impl Into<String>) -> Self {
        self.with_field(name, FieldKind::Keyword, value)
    }

    /// Append a tokenized full-text field.
    pub fn text(self, name: &str, value: impl Into<String>) -> Self {
        self.with_field(name, FieldKind::Text, value)
    }

    fn with_field(
        mut self,
        name: &str,
        kind: FieldKind,
        value: impl Into<String>,
    ) -> Self {
        self.fields.push(FieldValue {
            name: name.to_string(),
            kind,
            value: value.into(),
        });
        self
    }

    pub fn fields(&self) -> &[FieldValue] {
        &self.fields
    }

    /// First value of the named field.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.value.as_str())
    }

    pub fn id(&self) -> Option<&str> {
        self.get(fields::ID)
    }

    /// Check the document against the schema.
    ///
    /// Every field must exist in the schema with the declared kind, the
    /// identity field may appear at most once, and required fields must be
    /// present and non-blank.
    pub fn validate(&self) -> Result<()> {
        let mut ids = 0;
        for field in &self.fields {
            match schema::kind_of(&field.name) {
                None => {
                    return Err(Error::Validation(format!(
                        "unknown field '{}'",
                        field.name
                    )));
                }
                Some(kind) if kind != field.kind => {
                    return Err(Error::Validation(format!(
                        "field '{}' is {kind:?}, got a {:?} value",
                        field.name, field.kind
                    )));
                }
                Some(_) => {}
            }
            if field.name == fields::ID {
                ids += 1;
            }
        }

        if ids > 1 {
            return Err(Error::Validation(
                "document carries more than one identity value".into(),
            ));
        }
        if self.id().is_some_and(|id| id.trim().is_empty()) {
            return Err(Error::Validation("identity value is blank".into()));
        }

        for required in REQUIRED_FIELDS {
            if self.get(required).is_none_or(|v| v.trim().is_empty()) {
                return Err(Error::Validation(format!(
                    "missing required field '{required}'"
                )));
            }
        }

        Ok(())
    }
}

/// The stored fields of a search hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredDocument {
    pub id: Option<String>,
    pub path: String,
    pub name: String,
    pub suffix: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Document {
        Document::new()
            .keyword(fields::ID, "index.html")
            .keyword(fields::PATH, "/site/index.html")
            .keyword(fields::NAME, "index")
            .keyword(fields::SUFFIX, "html")
            .text(fields::CONTENT, "Welcome home")
    }

    #[test]
    fn valid_document_passes() {
        assert!(sample().validate().is_ok());
        assert_eq!(sample().id(), Some("index.html"));
    }

    #[test]
    fn identity_is_optional() {
        let doc = Document::new().keyword(fields::PATH, "/site/a.css");
        assert!(doc.validate().is_ok());
        assert_eq!(doc.id(), None);
    }

    #[test]
    fn missing_path_is_rejected() {
        let doc = Document::new().keyword(fields::ID, "x");
        let err = doc.validate().unwrap_err();
        assert!(err.to_string().contains("missing required field 'path'"));
    }

    #[test]
    fn kind_mismatch_is_rejected() {
        let doc = sample().keyword(fields::CONTENT, "raw");
        assert!(matches!(doc.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn unknown_field_is_rejected() {
        let doc = sample().keyword("author", "someone");
        assert!(matches!(doc.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn duplicate_or_blank_identity_is_rejected() {
        assert!(sample().keyword(fields::ID, "other").validate().is_err());

        let blank = Document::new()
            .keyword(fields::ID, "  ")
            .keyword(fields::PATH, "/a");
        assert!(blank.validate().is_err());
    }
}
