use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::logging::store::LogStore;

pub fn cost_key(issue_number: u64) -> String {
    format!("issue-{issue_number}.costs.json")
}

/// One finished agent execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostEntry {
    pub workflow: String,
    pub phase: String,
    pub success: bool,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: Option<f64>,
    pub duration_secs: f64,
    pub finished_at: DateTime<Utc>,
}

/// Running totals for every execution against one issue.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostSummary {
    pub issue_number: u64,
    pub executions: Vec<CostEntry>,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_cost_usd: f64,
    pub total_duration_secs: f64,
}

impl CostSummary {
    pub fn record(&mut self, entry: CostEntry) {
        self.total_input_tokens += entry.input_tokens;
        self.total_output_tokens += entry.output_tokens;
        self.total_cost_usd += entry.cost_usd.unwrap_or(0.0);
        self.total_duration_secs += entry.duration_secs;
        self.executions.push(entry);
    }
}

/// Read-modify-write of the issue's cost record. A record that no longer
/// parses is replaced.
pub async fn update_cost_record(store: &dyn LogStore, issue_number: u64, entry: CostEntry) -> Result<CostSummary> {
    let key = cost_key(issue_number);
    let mut summary = match store.read(&key).await? {
        Some(raw) => serde_json::from_str::<CostSummary>(&raw).unwrap_or_else(|e| {
            tracing::warn!(issue = issue_number, error = %e, "Discarding unreadable cost record");
            CostSummary::default()
        }),
        None => CostSummary::default(),
    };
    summary.issue_number = issue_number;
    summary.record(entry);
    store.write(&key, &serde_json::to_string_pretty(&summary)?).await?;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::store::LocalLogStore;

    fn entry(input: u64, cost: Option<f64>) -> CostEntry {
        CostEntry {
            workflow: "implement".to_string(),
            phase: "Implementation".to_string(),
            success: true,
            input_tokens: input,
            output_tokens: 10,
            cost_usd: cost,
            duration_secs: 1.5,
            finished_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_totals_accumulate() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalLogStore::new(dir.path());

        update_cost_record(&store, 3, entry(100, Some(0.25))).await.unwrap();
        let summary = update_cost_record(&store, 3, entry(50, None)).await.unwrap();

        assert_eq!(summary.executions.len(), 2);
        assert_eq!(summary.total_input_tokens, 150);
        assert_eq!(summary.total_output_tokens, 20);
        assert!((summary.total_cost_usd - 0.25).abs() < f64::EPSILON);
        assert!((summary.total_duration_secs - 3.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_corrupt_record_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalLogStore::new(dir.path());
        store.write(&cost_key(4), "not json").await.unwrap();

        let summary = update_cost_record(&store, 4, entry(1, None)).await.unwrap();
        assert_eq!(summary.executions.len(), 1);
        assert_eq!(summary.issue_number, 4);
    }
}
