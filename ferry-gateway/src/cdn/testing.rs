//! In-memory CDN services with fault injection, for tests

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use ferry_core::domain::cdn::CdnEntry;

use super::{BatchWriteOutput, CdnError, CdnTable, PurgeApi, WriteRequest};

#[derive(Default)]
struct TableState {
    entries: HashMap<String, BTreeMap<String, CdnEntry>>,
    calls: usize,
    throttle_next: usize,
    unprocess_next: usize,
    reject_once: HashSet<String>,
    reject_always: HashSet<String>,
}

#[derive(Default)]
pub struct MemoryCdnTable {
    state: Mutex<TableState>,
}

impl MemoryCdnTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` calls with `Throttled`
    pub fn throttle_next(&self, n: usize) {
        self.state.lock().unwrap().throttle_next = n;
    }

    /// On the next `n` calls apply only the first half of the batch
    pub fn unprocess_next(&self, n: usize) {
        self.state.lock().unwrap().unprocess_next = n;
    }

    /// Reject the next write of `path`
    pub fn reject_path_once(&self, path: &str) {
        self.state.lock().unwrap().reject_once.insert(path.to_string());
    }

    /// Reject every write of `path`
    pub fn reject_path_always(&self, path: &str) {
        self.state.lock().unwrap().reject_always.insert(path.to_string());
    }

    pub fn insert(&self, env: &str, entry: CdnEntry) {
        self.state
            .lock()
            .unwrap()
            .entries
            .entry(env.to_string())
            .or_default()
            .insert(entry.web_path.clone(), entry);
    }

    pub fn entries(&self, env: &str) -> BTreeMap<String, CdnEntry> {
        self.state
            .lock()
            .unwrap()
            .entries
            .get(env)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of batch-write calls received, failed ones included
    pub fn calls(&self) -> usize {
        self.state.lock().unwrap().calls
    }
}

#[async_trait]
impl CdnTable for MemoryCdnTable {
    async fn batch_write(
        &self,
        env: &str,
        requests: &[WriteRequest],
    ) -> Result<BatchWriteOutput, CdnError> {
        let mut state = self.state.lock().unwrap();
        state.calls += 1;

        if requests.len() > super::table::MAX_BATCH_ITEMS {
            return Err(CdnError::Rejected("batch too large".to_string()));
        }
        if state.throttle_next > 0 {
            state.throttle_next -= 1;
            return Err(CdnError::Throttled("rate exceeded".to_string()));
        }

        let mut output = BatchWriteOutput::default();
        let mut apply = requests;
        if state.unprocess_next > 0 && requests.len() > 1 {
            state.unprocess_next -= 1;
            let (head, tail) = requests.split_at(requests.len() / 2);
            output.unprocessed = tail.to_vec();
            apply = head;
        }

        for request in apply {
            let path = request.web_path().to_string();
            if state.reject_always.contains(&path) || state.reject_once.remove(&path) {
                output.rejected.push((path, "malformed record".to_string()));
                continue;
            }

            let table = state.entries.entry(env.to_string()).or_default();
            match request {
                WriteRequest::Put(entry) => {
                    table.insert(path, entry.clone());
                }
                WriteRequest::Delete { .. } => {
                    table.remove(&path);
                }
            }
        }

        Ok(output)
    }
}

#[derive(Default)]
struct PurgeState {
    submissions: Vec<(String, Vec<String>)>,
    fail_next: usize,
}

#[derive(Default)]
pub struct RecordingPurge {
    state: Mutex<PurgeState>,
}

impl RecordingPurge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` submissions with `Unavailable`
    pub fn fail_next(&self, n: usize) {
        self.state.lock().unwrap().fail_next = n;
    }

    /// Successful submissions as (env, urls), in order
    pub fn submissions(&self) -> Vec<(String, Vec<String>)> {
        self.state.lock().unwrap().submissions.clone()
    }

    /// Every URL submitted successfully, flattened
    pub fn purged(&self) -> Vec<String> {
        self.submissions()
            .into_iter()
            .flat_map(|(_, urls)| urls)
            .collect()
    }
}

#[async_trait]
impl PurgeApi for RecordingPurge {
    async fn purge(&self, env: &str, urls: &[String]) -> Result<(), CdnError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(CdnError::Unavailable("purge endpoint down".to_string()));
        }
        state.submissions.push((env.to_string(), urls.to_vec()));
        Ok(())
    }
}
