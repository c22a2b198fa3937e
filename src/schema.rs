use tantivy::{
    Index,
    TantivyDocument,
    schema::*,
    tokenizer::{
        LowerCaser,
        RemoveLongFilter,
        SimpleTokenizer,
        TextAnalyzer,
    },
};

use crate::{
    document::{Document, StoredDocument},
    error::{Error, Result},
};

/// Field names used in the schema.
pub mod fields {
    pub const ID: &str = "id";
    pub const PATH: &str = "path";
    pub const NAME: &str = "name";
    pub const SUFFIX: &str = "suffix";
    pub const CONTENT: &str = "content";
}

/// The designated full-text field. Query tokens aimed at it keep their case.
pub const FULL_TEXT_FIELD: &str = fields::CONTENT;

/// Fields every indexed document must carry.
pub const REQUIRED_FIELDS: &[&str] = &[fields::PATH];

const CONTENT_TOKENIZER: &str = "content";

/// How a field is indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Stored verbatim, matched exactly or by wildcard, never tokenized.
    Keyword,
    /// Tokenized and relevance-scored.
    Text,
}

/// Look up the kind of a schema field by name.
pub fn kind_of(name: &str) -> Option<FieldKind> {
    match name {
        fields::ID | fields::PATH | fields::NAME | fields::SUFFIX => {
            Some(FieldKind::Keyword)
        }
        fields::CONTENT => Some(FieldKind::Text),
        _ => None,
    }
}

/// Resolved field handles for the schema.
#[derive(Clone, Copy, Debug)]
pub struct SchemaFields {
    pub id: Field,
    pub path: Field,
    pub name: Field,
    pub suffix: Field,
    pub content: Field,
}

/// The fixed document schema and its engine-side field handles.
#[derive(Clone, Debug)]
pub struct IndexSchema {
    schema: Schema,
    fields: SchemaFields,
}

impl IndexSchema {
    pub fn build() -> Self {
        let mut builder = Schema::builder();

        let id = builder.add_text_field(fields::ID, STRING | STORED);
        let path = builder.add_text_field(fields::PATH, STRING | STORED);
        let name = builder.add_text_field(fields::NAME, STRING | STORED);
        let suffix = builder.add_text_field(fields::SUFFIX, STRING | STORED);

        let content_opts = TextOptions::default().set_indexing_options(
            TextFieldIndexing::default()
                .set_tokenizer(CONTENT_TOKENIZER)
                .set_index_option(IndexRecordOption::WithFreqsAndPositions),
        );
        let content = builder.add_text_field(fields::CONTENT, content_opts);

        Self {
            schema: builder.build(),
            fields: SchemaFields {
                id,
                path,
                name,
                suffix,
                content,
            },
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn fields(&self) -> SchemaFields {
        self.fields
    }

    /// Resolve a field name, rejecting names outside the schema.
    pub fn field(&self, name: &str) -> Result<Field> {
        let f = self.fields;
        match name {
            fields::ID => Ok(f.id),
            fields::PATH => Ok(f.path),
            fields::NAME => Ok(f.name),
            fields::SUFFIX => Ok(f.suffix),
            fields::CONTENT => Ok(f.content),
            other => Err(Error::Validation(format!("unknown field '{other}'"))),
        }
    }

    /// The term that identifies a document for update and delete.
    pub fn id_term(&self, id: &str) -> Term {
        Term::from_field_text(self.fields.id, id)
    }

    /// Convert a validated document into the engine's representation.
    pub fn to_engine(&self, document: &Document) -> Result<TantivyDocument> {
        let mut doc = TantivyDocument::default();
        for field in document.fields() {
            doc.add_text(self.field(&field.name)?, &field.value);
        }
        Ok(doc)
    }

    /// Read back the stored keyword fields of an indexed document.
    pub fn stored(&self, doc: &TantivyDocument) -> StoredDocument {
        let f = self.fields;
        StoredDocument {
            id: doc
                .get_first(f.id)
                .and_then(|v| v.as_str())
                .map(str::to_string),
            path: extract_text(doc, f.path),
            name: extract_text(doc, f.name),
            suffix: extract_text(doc, f.suffix),
        }
    }

    /// Register the analyzers the schema refers to.
    pub fn register_tokenizers(&self, index: &Index) {
        let content = TextAnalyzer::builder(SimpleTokenizer::default())
            .filter(RemoveLongFilter::limit(40))
            .filter(LowerCaser)
            .build();
        index.tokenizers().register(CONTENT_TOKENIZER, content);
    }
}

fn extract_text(doc: &TantivyDocument, field: Field) -> String {
    doc.get_first(field)
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_schema() {
        assert_eq!(kind_of(fields::ID), Some(FieldKind::Keyword));
        assert_eq!(kind_of(fields::SUFFIX), Some(FieldKind::Keyword));
        assert_eq!(kind_of(fields::CONTENT), Some(FieldKind::Text));
        assert_eq!(kind_of("title"), None);
    }

    #[test]
    fn unknown_field_is_rejected() {
        let schema = IndexSchema::build();
        assert!(schema.field(fields::NAME).is_ok());
        assert!(matches!(
            schema.field("mtime"),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn stored_fields_round_trip_without_content() {
        let schema = IndexSchema::build();
        let document = Document::new()
            .keyword(fields::ID, "a.html")
            .keyword(fields::PATH, "/docs/a.html")
            .keyword(fields::NAME, "a")
            .keyword(fields::SUFFIX, "html")
            .text(fields::CONTENT, "body text");

        let engine_doc = schema.to_engine(&document).unwrap();
        let stored = schema.stored(&engine_doc);

        assert_eq!(stored.id.as_deref(), Some("a.html"));
        assert_eq!(stored.path, "/docs/a.html");
        assert_eq!(stored.name, "a");
        assert_eq!(stored.suffix, "html");
    }
}
