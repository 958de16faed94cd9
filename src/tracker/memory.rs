//! In-process tracker for tests.

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{
    ArtifactId, ChangeArtifact, ItemId, LifecycleState, MergeState, NewWorkItem, RemoteWorkItem,
    TrackerClient,
};
use crate::errors::TrackerError;

/// Tracker operation, used to inject failures and count calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    ListItems,
    Create,
    ListArtifacts,
    GetItem,
    ClosingEvidence,
    GetArtifact,
    EnsureLabels,
    Whoami,
}

#[derive(Debug)]
struct State {
    items: Vec<RemoteWorkItem>,
    artifacts: Vec<ChangeArtifact>,
    /// Closing evidence per item, served by `closing_evidence` only.
    evidence: HashMap<ItemId, BTreeSet<ArtifactId>>,
    labels: Vec<String>,
    created: Vec<NewWorkItem>,
    next_item: u64,
    next_artifact: u64,
    clock: DateTime<Utc>,
    failures: HashMap<Operation, VecDeque<TrackerError>>,
    calls: HashMap<Operation, usize>,
}

/// A tracker that keeps everything in memory.
///
/// Every mutation advances an internal clock by one minute so created
/// timestamps are strictly increasing and deterministic.
#[derive(Debug)]
pub struct MemoryTracker {
    state: Mutex<State>,
}

impl Default for MemoryTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTracker {
    pub fn new() -> Self {
        let start = Utc
            .with_ymd_and_hms(2024, 1, 1, 9, 0, 0)
            .single()
            .unwrap_or_else(Utc::now);
        Self::starting_at(start)
    }

    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self {
            state: Mutex::new(State {
                items: Vec::new(),
                artifacts: Vec::new(),
                evidence: HashMap::new(),
                labels: Vec::new(),
                created: Vec::new(),
                next_item: 1,
                next_artifact: 1,
                clock: start,
                failures: HashMap::new(),
                calls: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.lock().clock
    }

    pub fn advance(&self, by: Duration) {
        self.lock().clock += by;
    }

    /// Add an open item directly, bypassing `create_item`.
    pub fn insert_item(&self, title: &str, labels: &[&str]) -> ItemId {
        self.lock()
            .push_item(title, labels.iter().map(|l| l.to_string()).collect())
    }

    pub fn close_item(&self, id: &ItemId, evidence: &[ArtifactId]) {
        let mut state = self.lock();
        state.tick();
        if let Some(item) = state.items.iter_mut().find(|i| &i.id == id) {
            item.state = LifecycleState::Closed;
        }
        state
            .evidence
            .insert(id.clone(), evidence.iter().cloned().collect());
    }

    pub fn reopen_item(&self, id: &ItemId) {
        let mut state = self.lock();
        if let Some(item) = state.items.iter_mut().find(|i| &i.id == id) {
            item.state = LifecycleState::Open;
        }
        state.evidence.remove(id);
    }

    pub fn delete_item(&self, id: &ItemId) {
        let mut state = self.lock();
        state.items.retain(|i| &i.id != id);
        state.evidence.remove(id);
    }

    /// Add an open pull request.
    pub fn open_artifact(&self, title: &str, body: &str, author: &str) -> ArtifactId {
        let mut state = self.lock();
        let created_at = state.tick();
        let id = ArtifactId::new(state.next_artifact.to_string());
        state.next_artifact += 1;
        state.artifacts.push(ChangeArtifact {
            id: id.clone(),
            title: title.to_string(),
            body: body.to_string(),
            author: author.to_string(),
            created_at,
            merge_state: MergeState::Open,
        });
        id
    }

    pub fn set_merge_state(&self, id: &ArtifactId, merge_state: MergeState) {
        let mut state = self.lock();
        if let Some(artifact) = state.artifacts.iter_mut().find(|a| &a.id == id) {
            artifact.merge_state = merge_state;
        }
    }

    /// Make the next call to `op` fail with `err`. Queued failures are consumed in order.
    pub fn fail_next(&self, op: Operation, err: TrackerError) {
        self.lock().failures.entry(op).or_default().push_back(err);
    }

    pub fn calls(&self, op: Operation) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Payloads passed to successful `create_item` calls.
    pub fn created(&self) -> Vec<NewWorkItem> {
        self.lock().created.clone()
    }

    pub fn items(&self) -> Vec<RemoteWorkItem> {
        self.lock().items.clone()
    }

    pub fn item(&self, id: &ItemId) -> Option<RemoteWorkItem> {
        self.lock().items.iter().find(|i| &i.id == id).cloned()
    }

    /// Labels the tracker knows about, including ones created by `ensure_labels`.
    pub fn labels(&self) -> Vec<String> {
        self.lock().labels.clone()
    }

    fn begin(&self, op: Operation) -> Result<MutexGuard<'_, State>, TrackerError> {
        let mut state = self.lock();
        *state.calls.entry(op).or_default() += 1;
        if let Some(err) = state.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            return Err(err);
        }
        Ok(state)
    }
}

impl State {
    fn tick(&mut self) -> DateTime<Utc> {
        self.clock += Duration::minutes(1);
        self.clock
    }

    fn push_item(&mut self, title: &str, labels: Vec<String>) -> ItemId {
        let created_at = self.tick();
        let id = ItemId::new(self.next_item.to_string());
        self.next_item += 1;
        self.items.push(RemoteWorkItem {
            id: id.clone(),
            title: title.to_string(),
            state: LifecycleState::Open,
            created_at,
            closing_evidence: BTreeSet::new(),
            labels,
            web_url: None,
        });
        id
    }
}

#[async_trait]
impl TrackerClient for MemoryTracker {
    async fn list_managed_items(&self, marker: &str) -> Result<Vec<RemoteWorkItem>, TrackerError> {
        let state = self.begin(Operation::ListItems)?;
        Ok(state
            .items
            .iter()
            .filter(|i| i.labels.iter().any(|l| l.eq_ignore_ascii_case(marker)))
            .cloned()
            .collect())
    }

    async fn create_item(&self, item: &NewWorkItem) -> Result<RemoteWorkItem, TrackerError> {
        let mut state = self.begin(Operation::Create)?;
        let id = state.push_item(&item.title, item.labels.clone());
        state.created.push(item.clone());
        state
            .items
            .iter()
            .find(|i| i.id == id)
            .cloned()
            .ok_or_else(|| TrackerError::NotFound(id.to_string()))
    }

    async fn list_artifacts_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<ChangeArtifact>, TrackerError> {
        let state = self.begin(Operation::ListArtifacts)?;
        Ok(state
            .artifacts
            .iter()
            .filter(|a| a.created_at >= since)
            .cloned()
            .collect())
    }

    async fn get_item(&self, id: &ItemId) -> Result<RemoteWorkItem, TrackerError> {
        let state = self.begin(Operation::GetItem)?;
        state
            .items
            .iter()
            .find(|i| &i.id == id)
            .cloned()
            .ok_or_else(|| TrackerError::NotFound(id.to_string()))
    }

    async fn closing_evidence(&self, id: &ItemId) -> Result<BTreeSet<ArtifactId>, TrackerError> {
        let state = self.begin(Operation::ClosingEvidence)?;
        if !state.items.iter().any(|i| &i.id == id) {
            return Err(TrackerError::NotFound(id.to_string()));
        }
        Ok(state.evidence.get(id).cloned().unwrap_or_default())
    }

    async fn get_artifact(&self, id: &ArtifactId) -> Result<ChangeArtifact, TrackerError> {
        let state = self.begin(Operation::GetArtifact)?;
        state
            .artifacts
            .iter()
            .find(|a| &a.id == id)
            .cloned()
            .ok_or_else(|| TrackerError::NotFound(id.to_string()))
    }

    async fn ensure_labels(&self, labels: &[String]) -> Result<Vec<String>, TrackerError> {
        let mut state = self.begin(Operation::EnsureLabels)?;
        let mut resolved = Vec::new();
        for label in labels.iter().map(|l| l.trim()).filter(|l| !l.is_empty()) {
            let existing = state
                .labels
                .iter()
                .find(|known| known.eq_ignore_ascii_case(label))
                .cloned();
            match existing {
                Some(name) => resolved.push(name),
                None => {
                    state.labels.push(label.to_string());
                    resolved.push(label.to_string());
                }
            }
        }
        Ok(resolved)
    }

    async fn whoami(&self) -> Result<String, TrackerError> {
        let _state = self.begin(Operation::Whoami)?;
        Ok("memory".to_string())
    }
}
