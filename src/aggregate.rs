use chrono::Datelike;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

use crate::documents::StoredDocument;

/// One grouped count in an aggregation result, shaped for the dashboard
/// (`{ "_id": key, "count": n }`). Derived on every request, never stored.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct AggregateBucket {
    #[serde(rename = "_id")]
    pub key: Value,
    pub count: u64,
}

/// Group documents by file type
///
/// The key is the last three characters of the filename. This is a crude
/// extension heuristic (two-character and missing extensions mis-bucket)
/// that the dashboard's historical buckets already depend on.
pub fn by_file_type(docs: &[StoredDocument]) -> Vec<AggregateBucket> {
    let mut counts: HashMap<String, u64> = HashMap::new();
    for doc in docs {
        *counts.entry(filename_suffix(&doc.filename)).or_default() += 1;
    }
    counts
        .into_iter()
        .map(|(key, count)| AggregateBucket {
            key: Value::String(key),
            count,
        })
        .collect()
}

/// Group documents by the ISO week number of their upload date
///
/// The result is sorted ascending by week; charts plot it as a time series,
/// so the ordering is part of the contract.
pub fn by_week(docs: &[StoredDocument]) -> Vec<AggregateBucket> {
    let mut counts: HashMap<u32, u64> = HashMap::new();
    for doc in docs {
        *counts.entry(doc.upload_date.iso_week().week()).or_default() += 1;
    }
    let mut weeks: Vec<(u32, u64)> = counts.into_iter().collect();
    weeks.sort_by_key(|(week, _)| *week);
    weeks
        .into_iter()
        .map(|(week, count)| AggregateBucket {
            key: Value::from(week),
            count,
        })
        .collect()
}

/// Group documents by owning project; uploads outside any project land in
/// the "No Project" bucket.
pub fn by_project(docs: &[StoredDocument]) -> Vec<AggregateBucket> {
    let mut counts: HashMap<String, u64> = HashMap::new();
    for doc in docs {
        let key = doc
            .project_id
            .clone()
            .unwrap_or_else(|| "No Project".to_string());
        *counts.entry(key).or_default() += 1;
    }
    counts
        .into_iter()
        .map(|(key, count)| AggregateBucket {
            key: Value::String(key),
            count,
        })
        .collect()
}

/// Group documents by owning user. Exposed to elevated callers only; the
/// restriction is enforced at the endpoint.
pub fn by_user(docs: &[StoredDocument]) -> Vec<AggregateBucket> {
    let mut counts: HashMap<String, u64> = HashMap::new();
    for doc in docs {
        *counts.entry(doc.user_id.clone()).or_default() += 1;
    }
    counts
        .into_iter()
        .map(|(key, count)| AggregateBucket {
            key: Value::String(key),
            count,
        })
        .collect()
}

fn filename_suffix(filename: &str) -> String {
    let chars: Vec<char> = filename.chars().collect();
    if chars.len() <= 3 {
        filename.to_string()
    } else {
        chars[chars.len() - 3..].iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;
    use serde_json::json;

    fn doc(user: &str, project: Option<&str>, filename: &str, ts: &str) -> StoredDocument {
        StoredDocument {
            id: filename.to_string(),
            user_id: user.to_string(),
            project_id: project.map(str::to_string),
            filename: filename.to_string(),
            upload_date: NaiveDateTime::parse_from_str(ts, "%Y-%m-%d %H:%M:%S")
                .expect("timestamp")
                .and_utc(),
            columns: String::new(),
            preview: String::new(),
        }
    }

    fn count_for(buckets: &[AggregateBucket], key: Value) -> Option<u64> {
        buckets.iter().find(|b| b.key == key).map(|b| b.count)
    }

    #[test]
    fn file_type_keys_are_last_three_characters() {
        let docs = vec![
            doc("alice", None, "report.xlsx", "2026-03-02 10:00:00"),
            doc("alice", None, "data.csv", "2026-03-03 10:00:00"),
            doc("alice", None, "more.csv", "2026-03-04 10:00:00"),
            doc("alice", None, "a.1", "2026-03-05 10:00:00"),
        ];
        let buckets = by_file_type(&docs);
        assert_eq!(count_for(&buckets, json!("lsx")), Some(1));
        assert_eq!(count_for(&buckets, json!("csv")), Some(2));
        // Short names fall back to the whole filename.
        assert_eq!(count_for(&buckets, json!("a.1")), Some(1));
    }

    #[test]
    fn file_type_counts_sum_to_document_count() {
        let docs = vec![
            doc("alice", None, "a.csv", "2026-03-02 10:00:00"),
            doc("alice", None, "b.csv", "2026-03-03 10:00:00"),
            doc("alice", None, "c.xlsx", "2026-03-04 10:00:00"),
            doc("alice", None, "d.tsv", "2026-03-05 10:00:00"),
            doc("alice", None, "e.csv", "2026-03-06 10:00:00"),
        ];
        let total: u64 = by_file_type(&docs).iter().map(|b| b.count).sum();
        assert_eq!(total as usize, docs.len());
    }

    #[test]
    fn week_buckets_sort_ascending() {
        // Weeks 2, 6, and 10 of 2026, deliberately inserted out of order.
        let docs = vec![
            doc("alice", None, "c.csv", "2026-03-02 10:00:00"),
            doc("alice", None, "a.csv", "2026-01-05 10:00:00"),
            doc("alice", None, "b.csv", "2026-02-02 10:00:00"),
            doc("alice", None, "d.csv", "2026-01-07 10:00:00"),
        ];
        let buckets = by_week(&docs);
        let keys: Vec<u64> = buckets.iter().map(|b| b.key.as_u64().expect("week")).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
        assert_eq!(count_for(&buckets, json!(2)), Some(2));
    }

    #[test]
    fn projectless_documents_bucket_as_no_project() {
        let docs = vec![
            doc("alice", Some("p1"), "a.csv", "2026-03-02 10:00:00"),
            doc("alice", None, "b.csv", "2026-03-03 10:00:00"),
            doc("bob", None, "c.csv", "2026-03-04 10:00:00"),
        ];
        let buckets = by_project(&docs);
        assert_eq!(count_for(&buckets, json!("p1")), Some(1));
        assert_eq!(count_for(&buckets, json!("No Project")), Some(2));
    }

    #[test]
    fn user_buckets_count_per_owner() {
        let docs = vec![
            doc("alice", None, "a.csv", "2026-03-02 10:00:00"),
            doc("alice", None, "b.csv", "2026-03-03 10:00:00"),
            doc("bob", None, "c.csv", "2026-03-04 10:00:00"),
        ];
        let buckets = by_user(&docs);
        assert_eq!(count_for(&buckets, json!("alice")), Some(2));
        assert_eq!(count_for(&buckets, json!("bob")), Some(1));
    }
}
