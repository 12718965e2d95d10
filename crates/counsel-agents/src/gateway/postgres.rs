//! Postgres-backed record store and retrieval.
//!
//! Expects the `legal_consultation` and `precedent` tables and the `pg_trgm`
//! extension for similarity search.

use async_trait::async_trait;
use counsel_coordination::{Candidate, PrecedentRecord};
use tokio_postgres::{Client, NoTls, Row};
use tracing::{debug, error};

use super::lexical::LexicalKeywordExtractor;
use super::{RecordStore, RetrievalGateway, ScoredDocument};
use crate::config::RecordStoreConfig;
use crate::errors::GatewayError;

const CANDIDATE_SQL: &str = "
    SELECT id::bigint AS id, category, title, question, answer
    FROM legal_consultation
    WHERE title ILIKE ANY($1) OR question ILIKE ANY($1)
    ORDER BY sub_category
    LIMIT $2";

const PRECEDENT_SQL: &str = "
    SELECT id::bigint AS id, c_number, c_name, court, j_date::text AS j_date, d_link
    FROM precedent
    WHERE c_name ILIKE ANY($1) OR c_type ILIKE ANY($2)
    ORDER BY j_date DESC
    LIMIT $3";

const SIMILARITY_SQL: &str = "
    SELECT doc AS content, similarity(doc, $1)::float8 AS score
    FROM (SELECT title || ' ' || question AS doc FROM legal_consultation) d
    WHERE doc % $1
    ORDER BY score DESC
    LIMIT $2";

fn like_patterns(terms: &[String]) -> Vec<String> {
    terms
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(|t| format!("%{}%", t.replace('%', r"\%").replace('_', r"\_")))
        .collect()
}

pub struct PgRecordStore {
    client: Client,
    extractor: LexicalKeywordExtractor,
    max_rows: i64,
}

impl PgRecordStore {
    /// Connect and drive the connection on a background task.
    pub async fn connect(config: &RecordStoreConfig) -> Result<Self, GatewayError> {
        let (client, connection) = tokio_postgres::connect(&config.database_url, NoTls).await?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "postgres connection closed with error");
            }
        });
        Ok(Self {
            client,
            extractor: LexicalKeywordExtractor::new(),
            max_rows: config.max_rows,
        })
    }

    fn candidate_from_row(row: &Row) -> Result<Candidate, GatewayError> {
        Ok(Candidate {
            id: row.try_get("id")?,
            title: row.try_get("title")?,
            question: row.try_get("question")?,
            answer: row.try_get("answer")?,
            category: row.try_get::<_, Option<String>>("category")?.unwrap_or_default(),
        })
    }

    fn precedent_from_row(row: &Row) -> Result<PrecedentRecord, GatewayError> {
        let link: Option<String> = row.try_get("d_link")?;
        Ok(PrecedentRecord {
            id: row.try_get("id")?,
            case_number: row.try_get::<_, Option<String>>("c_number")?.unwrap_or_default(),
            title: row.try_get::<_, Option<String>>("c_name")?.unwrap_or_default(),
            court: row.try_get::<_, Option<String>>("court")?.unwrap_or_default(),
            date: row.try_get::<_, Option<String>>("j_date")?.unwrap_or_default(),
            external_link: link.filter(|l| !l.trim().is_empty()),
        })
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn find_candidates(&self, keywords: &[String]) -> Result<Vec<Candidate>, GatewayError> {
        let patterns = like_patterns(keywords);
        if patterns.is_empty() {
            return Ok(Vec::new());
        }
        let rows = self
            .client
            .query(CANDIDATE_SQL, &[&patterns, &self.max_rows])
            .await?;
        debug!(rows = rows.len(), "candidate search");
        rows.iter().map(Self::candidate_from_row).collect()
    }

    async fn find_precedent(
        &self,
        categories: &[String],
        titles: &[String],
        keywords: &[String],
    ) -> Result<Vec<PrecedentRecord>, GatewayError> {
        let mut name_terms: Vec<String> = titles.to_vec();
        name_terms.extend(keywords.iter().cloned());
        let names = like_patterns(&name_terms);
        let types = like_patterns(categories);
        if names.is_empty() && types.is_empty() {
            return Ok(Vec::new());
        }
        let rows = self
            .client
            .query(PRECEDENT_SQL, &[&names, &types, &self.max_rows])
            .await?;
        debug!(rows = rows.len(), "precedent search");
        rows.iter().map(Self::precedent_from_row).collect()
    }
}

#[async_trait]
impl RetrievalGateway for PgRecordStore {
    async fn extract_keywords(&self, text: &str, top_k: usize) -> Result<Vec<String>, GatewayError> {
        Ok(self.extractor.extract(text, top_k))
    }

    async fn similarity_search(
        &self,
        text: &str,
        k: usize,
    ) -> Result<Vec<ScoredDocument>, GatewayError> {
        let limit = i64::try_from(k).unwrap_or(i64::MAX);
        let rows = self.client.query(SIMILARITY_SQL, &[&text, &limit]).await?;
        rows.iter()
            .map(|row| {
                Ok(ScoredDocument {
                    content: row.try_get("content")?,
                    score: row.try_get("score")?,
                })
            })
            .collect()
    }
}
