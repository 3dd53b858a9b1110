//! InMemoryKnowledgeBase: keyword-scored document search for demos and tests.

use async_trait::async_trait;

use crate::ports::{KnowledgeBase, KnowledgeError, KnowledgeHit};

#[derive(Debug, Clone)]
struct Document {
    title: String,
    body: String,
    /// Lowercased title + body.
    haystack: String,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryKnowledgeBase {
    documents: Vec<Document>,
}

const SNIPPET_CHARS: usize = 160;

impl InMemoryKnowledgeBase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(mut self, title: impl Into<String>, body: impl Into<String>) -> Self {
        self.add_document(title, body);
        self
    }

    pub fn add_document(&mut self, title: impl Into<String>, body: impl Into<String>) {
        let title = title.into();
        let body = body.into();
        let haystack = format!("{title} {body}").to_lowercase();
        self.documents.push(Document {
            title,
            body,
            haystack,
        });
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

/// Query terms worth matching: lowercased, three characters or more.
fn terms(query: &str) -> Vec<String> {
    let mut terms: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 3)
        .map(str::to_lowercase)
        .collect();
    terms.sort();
    terms.dedup();
    terms
}

#[async_trait]
impl KnowledgeBase for InMemoryKnowledgeBase {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<KnowledgeHit>, KnowledgeError> {
        let terms = terms(query);
        if terms.is_empty() {
            return Err(KnowledgeError::InvalidQuery(format!(
                "no searchable terms in {query:?}"
            )));
        }

        let mut hits: Vec<KnowledgeHit> = self
            .documents
            .iter()
            .filter_map(|doc| {
                let matched = terms.iter().filter(|t| doc.haystack.contains(t.as_str())).count();
                (matched > 0).then(|| KnowledgeHit {
                    title: doc.title.clone(),
                    snippet: doc.body.chars().take(SNIPPET_CHARS).collect(),
                    score: matched as f64 / terms.len() as f64,
                })
            })
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.title.cmp(&b.title)));
        hits.truncate(limit);
        Ok(hits)
    }
}
