//! Lexical index using Tantivy
//!
//! Always available, independent of the embedding service. Serves as the
//! lexical half of hybrid ranking and as the whole ranking when embeddings
//! are down.

use std::path::Path;
use std::sync::{RwLock, RwLockWriteGuard};

use anyhow::{Context, Result, anyhow};
use tantivy::collector::TopDocs;
use tantivy::directory::MmapDirectory;
use tantivy::query::QueryParser;
use tantivy::schema::{Term, Value};
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument};

use super::schema::{SchemaFields, build_schema};
use crate::models::MessageId;

/// Default heap size for index writer (50MB)
const DEFAULT_HEAP_SIZE: usize = 50_000_000;

/// Subject matches weigh double
const SUBJECT_BOOST: f32 = 2.0;

/// Text of one message as indexed
#[derive(Debug, Clone, Default)]
pub struct LexicalDoc {
    pub subject: String,
    pub snippet: String,
    pub from: String,
    pub to: String,
    pub body: Option<String>,
    pub received_at_ms: i64,
}

/// One lexical match
#[derive(Debug, Clone, PartialEq)]
pub struct LexicalHit {
    pub id: MessageId,
    pub score: f32,
    pub received_at_ms: i64,
}

/// Thread-safe Tantivy index keyed by message ID
pub struct LexicalIndex {
    index: Index,
    reader: IndexReader,
    fields: SchemaFields,
    writer: RwLock<Option<IndexWriter>>,
}

impl std::fmt::Debug for LexicalIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LexicalIndex")
            .field("index", &"<tantivy::Index>")
            .finish()
    }
}

impl LexicalIndex {
    /// Open or create an index in `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path).context("Failed to create index directory")?;

        let dir = MmapDirectory::open(path).context("Failed to open index directory")?;
        let index =
            Index::open_or_create(dir, build_schema()).context("Failed to open or create index")?;
        Self::from_index(index)
    }

    /// Create an in-memory index
    pub fn in_memory() -> Result<Self> {
        Self::from_index(Index::create_in_ram(build_schema()))
    }

    fn from_index(index: Index) -> Result<Self> {
        // Reloaded explicitly after each commit
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .context("Failed to create index reader")?;
        let fields = SchemaFields::new(&index.schema());

        Ok(Self {
            index,
            reader,
            fields,
            writer: RwLock::new(None),
        })
    }

    fn writer(&self) -> Result<RwLockWriteGuard<'_, Option<IndexWriter>>> {
        let mut guard = self
            .writer
            .write()
            .map_err(|e| anyhow!("Lock poisoned: {}", e))?;
        if guard.is_none() {
            *guard = Some(self.index.writer(DEFAULT_HEAP_SIZE)?);
        }
        Ok(guard)
    }

    fn with_writer<T>(&self, f: impl FnOnce(&mut IndexWriter) -> Result<T>) -> Result<T> {
        let mut guard = self.writer()?;
        let writer = guard.as_mut().context("Index writer not initialized")?;
        f(writer)
    }

    /// Replace the document for `id`; visible after [`commit`](Self::commit)
    pub fn upsert(&self, id: &MessageId, doc: &LexicalDoc) -> Result<()> {
        self.with_writer(|writer| {
            writer.delete_term(Term::from_field_text(self.fields.message_id, id.as_str()));

            let mut document = TantivyDocument::new();
            document.add_text(self.fields.message_id, id.as_str());
            document.add_text(self.fields.subject, &doc.subject);
            document.add_text(self.fields.snippet, &doc.snippet);
            document.add_text(self.fields.from, &doc.from);
            document.add_text(self.fields.to, &doc.to);
            if let Some(body) = &doc.body {
                document.add_text(self.fields.body, body);
            }
            document.add_i64(self.fields.received_at_ms, doc.received_at_ms);

            writer.add_document(document)?;
            Ok(())
        })
    }

    pub fn remove(&self, id: &MessageId) -> Result<()> {
        self.with_writer(|writer| {
            writer.delete_term(Term::from_field_text(self.fields.message_id, id.as_str()));
            Ok(())
        })
    }

    /// Commit pending changes and make them searchable
    pub fn commit(&self) -> Result<()> {
        {
            let mut guard = self
                .writer
                .write()
                .map_err(|e| anyhow!("Lock poisoned: {}", e))?;
            if let Some(writer) = guard.as_mut() {
                writer.commit()?;
            }
        }
        self.reader.reload()?;
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        self.with_writer(|writer| {
            writer.delete_all_documents()?;
            writer.commit()?;
            Ok(())
        })?;
        self.reader.reload()?;
        Ok(())
    }

    /// Number of committed documents
    pub fn num_docs(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    /// Best `limit` matches for free text, highest score first
    pub fn search(&self, text: &str, limit: usize) -> Result<Vec<LexicalHit>> {
        if text.trim().is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let mut parser = QueryParser::for_index(&self.index, self.fields.searchable());
        parser.set_field_boost(self.fields.subject, SUBJECT_BOOST);
        // User text is not query syntax; unparseable parts are dropped
        let (query, _errors) = parser.parse_query_lenient(text);

        let searcher = self.reader.searcher();
        let top_docs = searcher.search(&query, &TopDocs::with_limit(limit))?;

        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, address) in top_docs {
            let doc: TantivyDocument = searcher.doc(address)?;
            let Some(id) = doc
                .get_first(self.fields.message_id)
                .and_then(|v| v.as_str())
            else {
                continue;
            };
            let received_at_ms = doc
                .get_first(self.fields.received_at_ms)
                .and_then(|v| v.as_i64())
                .unwrap_or(0);

            hits.push(LexicalHit {
                id: MessageId::new(id),
                score,
                received_at_ms,
            });
        }
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(subject: &str, snippet: &str, received_at_ms: i64) -> LexicalDoc {
        LexicalDoc {
            subject: subject.to_string(),
            snippet: snippet.to_string(),
            from: "Alice alice@example.com".to_string(),
            received_at_ms,
            ..LexicalDoc::default()
        }
    }

    #[test]
    fn test_search_finds_subject() {
        let index = LexicalIndex::in_memory().unwrap();
        index.upsert(&MessageId::new("a"), &doc("Budget 2024", "numbers", 10)).unwrap();
        index.upsert(&MessageId::new("b"), &doc("Lunch", "noon?", 20)).unwrap();
        index.commit().unwrap();

        let hits = index.search("budget", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id.as_str(), "a");
        assert_eq!(hits[0].received_at_ms, 10);
    }

    #[test]
    fn test_upsert_replaces_document() {
        let index = LexicalIndex::in_memory().unwrap();
        let id = MessageId::new("a");
        index.upsert(&id, &doc("Old subject", "", 1)).unwrap();
        index.upsert(&id, &doc("New subject", "", 1)).unwrap();
        index.commit().unwrap();

        assert_eq!(index.num_docs(), 1);
        assert!(index.search("old", 10).unwrap().is_empty());
        assert_eq!(index.search("new", 10).unwrap().len(), 1);
    }

    #[test]
    fn test_remove_and_syntax_tolerance() {
        let index = LexicalIndex::in_memory().unwrap();
        let id = MessageId::new("a");
        index.upsert(&id, &doc("Re: (draft) AND stuff", "", 1)).unwrap();
        index.commit().unwrap();
        assert!(index.search("re: (draft", 10).is_ok());
        assert_eq!(index.search("draft", 10).unwrap().len(), 1);

        index.remove(&id).unwrap();
        index.commit().unwrap();
        assert_eq!(index.num_docs(), 0);
    }

    #[test]
    fn test_persists_on_disk() {
        let dir = tempfile::TempDir::new().unwrap();
        {
            let index = LexicalIndex::open(dir.path()).unwrap();
            index.upsert(&MessageId::new("a"), &doc("Budget", "", 1)).unwrap();
            index.commit().unwrap();
        }
        let index = LexicalIndex::open(dir.path()).unwrap();
        assert_eq!(index.num_docs(), 1);
    }
}
