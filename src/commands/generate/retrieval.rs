use tracing::debug;

use crate::model::TableScore;
use crate::semantic::cosine_similarity;
use crate::services::{EmbeddingClient, ServiceResult};

use super::corpus::{ColumnIndex, TableDocument};

pub(crate) const COLUMNS_PER_TABLE: usize = 5;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RankedColumn {
    pub(crate) column: String,
    pub(crate) score: f64,
    pub(crate) text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ColumnSelection {
    pub(crate) table: String,
    pub(crate) columns: Vec<RankedColumn>,
}

/// Nearest-neighbour retrieval over the schema corpora. Embedding failures
/// are returned to the caller untouched.
pub(crate) struct Retriever<'a> {
    embedder: &'a dyn EmbeddingClient,
}

impl<'a> Retriever<'a> {
    pub(crate) fn new(embedder: &'a dyn EmbeddingClient) -> Self {
        Self { embedder }
    }

    pub(crate) fn retrieve_tables(
        &self,
        question: &str,
        table_index: &[TableDocument],
        top_k: usize,
    ) -> ServiceResult<(Vec<String>, Vec<TableScore>)> {
        let texts = table_index
            .iter()
            .map(|document| document.text.as_str())
            .collect::<Vec<&str>>();
        let mut ranked = self.rank(question, &texts)?;
        ranked.truncate(top_k);

        let scores = ranked
            .into_iter()
            .map(|(index, score)| TableScore {
                table: table_index[index].table.clone(),
                score,
            })
            .collect::<Vec<TableScore>>();
        let tables = scores.iter().map(|entry| entry.table.clone()).collect();

        debug!(top_k, returned = scores.len(), "table retrieval completed");
        Ok((tables, scores))
    }

    pub(crate) fn retrieve_columns(
        &self,
        question: &str,
        column_index: &ColumnIndex,
        chosen_tables: &[String],
    ) -> ServiceResult<Vec<ColumnSelection>> {
        let mut out = Vec::<ColumnSelection>::with_capacity(chosen_tables.len());

        for table in chosen_tables {
            let documents = column_index.columns(table);
            let texts = documents
                .iter()
                .map(|document| document.text.as_str())
                .collect::<Vec<&str>>();
            let mut ranked = self.rank(question, &texts)?;
            ranked.truncate(COLUMNS_PER_TABLE);

            let columns = ranked
                .into_iter()
                .map(|(index, score)| RankedColumn {
                    column: documents[index].column.clone(),
                    score,
                    text: documents[index].text.clone(),
                })
                .collect();
            out.push(ColumnSelection {
                table: table.clone(),
                columns,
            });
        }

        Ok(out)
    }

    /// Scores every text against the question and returns `(index, score)`
    /// pairs sorted by descending score. The sort is stable, so ties keep
    /// corpus order.
    fn rank(&self, question: &str, texts: &[&str]) -> ServiceResult<Vec<(usize, f64)>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let question_embedding = self.embedder.embed(question)?;
        let text_embeddings = self.embedder.embed_batch(texts)?;

        let mut scored = text_embeddings
            .iter()
            .enumerate()
            .map(|(index, embedding)| (index, cosine_similarity(&question_embedding, embedding)))
            .collect::<Vec<(usize, f64)>>();
        scored.sort_by(|left, right| right.1.total_cmp(&left.1));
        Ok(scored)
    }
}
