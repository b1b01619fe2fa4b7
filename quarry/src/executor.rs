//! The query-execution collaborator: runs queries against a backend and
//! returns each result set as serialized JSON.

use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::{value, Error, LoadError};

/// One query's results as delivered by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryPayload {
    /// The row set, serialized as a JSON array.
    pub data: String,
    pub record_count: usize,
    pub execution_time_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryBatch {
    pub results: Vec<QueryPayload>,
    pub total_execution_time_ms: u64,
}

impl QueryBatch {
    pub fn total_records(&self) -> usize {
        self.results.iter().map(|r| r.record_count).sum()
    }

    /// Parse every payload and pad the row sets up to the slot count.
    ///
    /// A payload that is not valid JSON fails the whole batch.
    pub fn row_sets(&self, slots: usize) -> Result<Vec<JsonValue>, Error> {
        let parsed = self
            .results
            .iter()
            .map(|r| serde_json::from_str(&r.data).map_err(Error::ResponseParse))
            .collect::<Result<Vec<JsonValue>, Error>>()?;
        Ok(value::normalize_row_sets(parsed, slots))
    }
}

#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Execute the given queries in order, producing one payload per query.
    async fn execute(&self, queries: &[String]) -> Result<QueryBatch, LoadError>;
}

fn payload(rows: &JsonValue, started: Instant) -> Result<QueryPayload, LoadError> {
    let data = serde_json::to_string(rows).map_err(|e| LoadError::Backend(e.to_string()))?;
    Ok(QueryPayload {
        data,
        record_count: rows.as_array().map(Vec::len).unwrap_or(0),
        execution_time_ms: started.elapsed().as_millis() as u64,
    })
}

fn batch(results: Vec<QueryPayload>, started: Instant) -> QueryBatch {
    QueryBatch {
        results,
        total_execution_time_ms: started.elapsed().as_millis() as u64,
    }
}

/// Serves query results from JSON or YAML fixture files, one file per query
/// slot.
#[derive(Debug, Clone)]
pub struct FileExecutor {
    fixtures: Vec<PathBuf>,
}

impl FileExecutor {
    pub fn new(fixtures: Vec<PathBuf>) -> Self {
        Self { fixtures }
    }
}

#[async_trait]
impl QueryExecutor for FileExecutor {
    async fn execute(&self, queries: &[String]) -> Result<QueryBatch, LoadError> {
        let started = Instant::now();
        let mut results = Vec::with_capacity(queries.len());
        for (i, query) in queries.iter().enumerate() {
            let path = self.fixtures.get(i).ok_or_else(|| {
                LoadError::Backend(format!("no result fixture for query {}", i + 1))
            })?;
            debug!("Serving query {} from {}: {}", i + 1, path.display(), query);
            let rows = value::load_from_file(path)
                .map_err(|e| LoadError::Fixture(path.clone(), e.to_string()))?;
            results.push(payload(&rows, started)?);
        }
        Ok(batch(results, started))
    }
}

/// Serves fixed, in-memory row sets, optionally after a delay.
#[derive(Debug, Clone, Default)]
pub struct StaticExecutor {
    row_sets: Vec<JsonValue>,
    delay: Option<Duration>,
    calls: Arc<AtomicUsize>,
}

impl StaticExecutor {
    pub fn new(row_sets: Vec<JsonValue>) -> Self {
        Self {
            row_sets,
            ..Self::default()
        }
    }

    /// How many batches of queries this executor has been asked to run.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl QueryExecutor for StaticExecutor {
    async fn execute(&self, queries: &[String]) -> Result<QueryBatch, LoadError> {
        let started = Instant::now();
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let empty = JsonValue::Array(Vec::new());
        let results = (0..queries.len())
            .map(|i| payload(self.row_sets.get(i).unwrap_or(&empty), started))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(batch(results, started))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[tokio::test]
    async fn file_executor_serves_fixtures() {
        let dir = tempfile::tempdir().unwrap();
        let json_path = dir.path().join("accounts.json");
        let yaml_path = dir.path().join("contacts.yaml");
        std::fs::write(&json_path, r#"[{"Id": "001", "Name": "Acme"}]"#).unwrap();
        let mut f = std::fs::File::create(&yaml_path).unwrap();
        writeln!(f, "- Id: '003'\n  Name: Ada\n- Id: '004'\n  Name: Bob").unwrap();

        let executor = FileExecutor::new(vec![json_path, yaml_path]);
        let batch = executor
            .execute(&[
                "SELECT Id FROM Account".to_string(),
                "SELECT Id FROM Contact".to_string(),
            ])
            .await
            .unwrap();
        assert_eq!(batch.total_records(), 3);
        let rows = batch.row_sets(4).unwrap();
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[1][1]["Name"], json!("Bob"));
        assert_eq!(rows[3], json!([]));
    }

    #[tokio::test]
    async fn missing_fixture_is_a_load_error() {
        let executor = FileExecutor::new(vec![]);
        let err = executor.execute(&["SELECT Id FROM Account".to_string()]).await;
        assert!(matches!(err, Err(LoadError::Backend(_))));
    }

    #[test]
    fn unparseable_payload_fails_the_batch() {
        let batch = QueryBatch {
            results: vec![QueryPayload {
                data: "[{\"Id\": ".to_string(),
                record_count: 1,
                execution_time_ms: 3,
            }],
            total_execution_time_ms: 3,
        };
        let err = batch.row_sets(2).unwrap_err();
        assert!(matches!(err, Error::ResponseParse(_)));
        assert_eq!(err.to_string(), "failed to parse server response");
    }

    #[tokio::test]
    async fn static_executor_pads_missing_sets() {
        let executor = StaticExecutor::new(vec![json!([{"Id": 1}])]);
        let batch = executor
            .execute(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(batch.results[1].data, "[]");
        assert_eq!(batch.results[0].record_count, 1);
    }
}
