//! In-memory collaborators for tests and examples.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use kspec_core::{ChangeType, Configuration, Resource, ResourceChange};
use kspec_selector::AggregateSelector;

use crate::extension::{Collector, Operation};
use crate::ReconciliationMode;

/// Returns a fixed list, or fails with a fixed message.
#[derive(Debug, Clone, Default)]
pub struct MockCollector {
    pub resources: Vec<Resource>,
    pub fail: Option<String>,
}

impl MockCollector {
    pub fn new(resources: Vec<Resource>) -> Self { Self { resources, fail: None } }
    pub fn failing(message: impl Into<String>) -> Self { Self { resources: Vec::new(), fail: Some(message.into()) } }
}

#[async_trait]
impl Collector for MockCollector {
    async fn list_all(&self, _cfg: &Configuration, _selector: &AggregateSelector) -> anyhow::Result<Vec<Resource>> {
        match &self.fail {
            Some(msg) => Err(anyhow!("{}", msg.clone())),
            None => Ok(self.resources.clone()),
        }
    }
}

/// Shared observations of a `MockOperation`; clone it into the supplier and keep a handle.
#[derive(Debug, Default)]
pub struct MockJournal {
    applied: Mutex<Vec<(String, ChangeType)>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockJournal {
    pub fn applied(&self) -> Vec<(String, ChangeType)> {
        self.applied.lock().map(|g| g.clone()).unwrap_or_default()
    }

    pub fn max_in_flight(&self) -> usize { self.max_in_flight.load(Ordering::SeqCst) }
}

/// Records applied changes; fails for configured keys; optionally sleeps per change.
#[derive(Debug, Clone, Default)]
pub struct MockOperation {
    pub journal: Arc<MockJournal>,
    pub fail_keys: BTreeSet<String>,
    pub delay: Option<Duration>,
    pub modes: Vec<ReconciliationMode>,
    pub unsupported: BTreeSet<ChangeType>,
}

impl MockOperation {
    pub fn new(journal: Arc<MockJournal>) -> Self { Self { journal, ..Default::default() } }

    pub fn failing_on(mut self, key: impl Into<String>) -> Self {
        self.fail_keys.insert(key.into());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn accepting(mut self, modes: Vec<ReconciliationMode>) -> Self {
        self.modes = modes;
        self
    }

    pub fn without(mut self, t: ChangeType) -> Self {
        self.unsupported.insert(t);
        self
    }
}

#[async_trait]
impl Operation for MockOperation {
    fn accepted_modes(&self) -> &[ReconciliationMode] { &self.modes }

    fn test(&self, change: &ResourceChange) -> bool { !self.unsupported.contains(&change.change_type) }

    async fn apply(&self, change: &ResourceChange) -> anyhow::Result<()> {
        let now = self.journal.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.journal.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(d) = self.delay { tokio::time::sleep(d).await; }
        self.journal.in_flight.fetch_sub(1, Ordering::SeqCst);
        if self.fail_keys.contains(&change.key) {
            return Err(anyhow!("backend rejected '{}'", change.key));
        }
        if let Ok(mut g) = self.journal.applied.lock() { g.push((change.key.clone(), change.change_type)); }
        Ok(())
    }
}
