//! Tantivy schema for the lexical message index

use tantivy::schema::{
    FAST, Field, IndexRecordOption, STORED, STRING, Schema, TextFieldIndexing, TextOptions,
};

/// Build the Tantivy schema
///
/// - message_id: exact-match key for upserts and deletes
/// - subject, snippet, from, to, body: full-text searchable
/// - received_at_ms: recency tie-break without a store lookup
pub fn build_schema() -> Schema {
    let mut builder = Schema::builder();

    builder.add_text_field("message_id", STRING | STORED);

    let text_opts = TextOptions::default().set_indexing_options(
        TextFieldIndexing::default()
            .set_index_option(IndexRecordOption::WithFreqsAndPositions)
            .set_tokenizer("default"),
    );

    builder.add_text_field("subject", text_opts.clone());
    builder.add_text_field("snippet", text_opts.clone());
    builder.add_text_field("from", text_opts.clone());
    builder.add_text_field("to", text_opts.clone());
    builder.add_text_field("body", text_opts);

    builder.add_i64_field("received_at_ms", FAST | STORED);

    builder.build()
}

/// Field handles for quick access during indexing and searching
pub struct SchemaFields {
    pub message_id: Field,
    pub subject: Field,
    pub snippet: Field,
    pub from: Field,
    pub to: Field,
    pub body: Field,
    pub received_at_ms: Field,
}

impl SchemaFields {
    pub fn new(schema: &Schema) -> Self {
        Self {
            message_id: schema.get_field("message_id").expect("message_id field"),
            subject: schema.get_field("subject").expect("subject field"),
            snippet: schema.get_field("snippet").expect("snippet field"),
            from: schema.get_field("from").expect("from field"),
            to: schema.get_field("to").expect("to field"),
            body: schema.get_field("body").expect("body field"),
            received_at_ms: schema.get_field("received_at_ms").expect("received_at_ms field"),
        }
    }

    /// Fields searched by free-text queries
    pub fn searchable(&self) -> Vec<Field> {
        vec![self.subject, self.snippet, self.from, self.to, self.body]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_creation() {
        let schema = build_schema();
        let fields = SchemaFields::new(&schema);
        assert_eq!(fields.subject, schema.get_field("subject").unwrap());
        assert_eq!(fields.searchable().len(), 5);
    }
}
