use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use kspec_change::ChangeOptions;
use kspec_core::{ChangeType, ConfigError, Resource, ResourceChange, ResourceType};
use kspec_extension::{ExtensionRegistry, Qualifier};
use metrics::{counter, histogram};
use rustc_hash::FxHashMap;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

use crate::extension::{Collector, Operation, Transformation, Validation};
use crate::{
    ChangeResult, ChangeStatus, CollectorError, OperationError, ReconcileError, ReconciliationContext,
    ReconciliationMode,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Collecting,
    Filtering,
    Diffing,
    Executing,
    Done,
    Aborted,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::Collecting => "COLLECTING",
            RunState::Filtering => "FILTERING",
            RunState::Diffing => "DIFFING",
            RunState::Executing => "EXECUTING",
            RunState::Done => "DONE",
            RunState::Aborted => "ABORTED",
        };
        f.write_str(s)
    }
}

/// Extensions resolved for one kind, owned by the current run.
struct KindPlan {
    resource_type: ResourceType,
    desired: Vec<Resource>,
    collector: Box<dyn Collector>,
    operation: Arc<dyn Operation>,
    validations: Vec<Box<dyn Validation>>,
    transformations: Vec<Box<dyn Transformation>>,
}

pub struct Reconciler {
    registry: Arc<ExtensionRegistry>,
    concurrency: Option<usize>,
}

impl Reconciler {
    pub fn new(registry: Arc<ExtensionRegistry>) -> Self { Self { registry, concurrency: None } }

    /// Upper bound on concurrently executing operations. Defaults to the
    /// `apply-concurrency` configuration property.
    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.concurrency = Some(n.max(1));
        self
    }

    pub fn registry(&self) -> &ExtensionRegistry { &self.registry }

    /// Dry-run reconciliation under `Full` mode.
    pub async fn plan(&self, desired: Vec<Resource>, ctx: &ReconciliationContext) -> Result<Vec<ChangeResult>, ReconcileError> {
        let ctx = ctx.clone().dry_run(true);
        self.reconcile(desired, ReconciliationMode::Full, &ctx).await
    }

    pub async fn reconcile(
        &self,
        desired: Vec<Resource>,
        mode: ReconciliationMode,
        ctx: &ReconciliationContext,
    ) -> Result<Vec<ChangeResult>, ReconcileError> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("reconcile", run = %run_id, mode = %mode, dry_run = ctx.dry_run);
        self.run(desired, mode, ctx).instrument(span).await
    }

    async fn run(
        &self,
        desired: Vec<Resource>,
        mode: ReconciliationMode,
        ctx: &ReconciliationContext,
    ) -> Result<Vec<ChangeResult>, ReconcileError> {
        let t0 = Instant::now();
        counter!("reconcile_runs_total", 1u64);
        let opts = ChangeOptions::from_config(&ctx.configuration)?;
        let concurrency = match self.concurrency {
            Some(n) => n,
            None => ctx.configuration.apply_concurrency()?,
        };

        let mut by_kind: BTreeMap<ResourceType, Vec<Resource>> = BTreeMap::new();
        for r in desired.into_iter() { by_kind.entry(r.resource_type()).or_default().push(r); }
        info!(kinds = by_kind.len(), concurrency, "reconcile: start");

        // Wiring and configuration problems surface before any kind is touched.
        let mut plans = Vec::with_capacity(by_kind.len());
        for (rt, resources) in by_kind.into_iter() {
            plans.push(self.resolve(rt, resources, mode, ctx)?);
        }

        let mut results = Vec::new();
        for plan in plans.into_iter() {
            let kind_results = self.reconcile_kind(plan, mode, ctx, &opts, concurrency).await?;
            results.extend(kind_results);
        }
        histogram!("reconcile_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
        info!(results = results.len(), took_ms = %t0.elapsed().as_millis(), "reconcile: done");
        Ok(results)
    }

    fn resolve(
        &self,
        rt: ResourceType,
        desired: Vec<Resource>,
        mode: ReconciliationMode,
        ctx: &ReconciliationContext,
    ) -> Result<KindPlan, ReconcileError> {
        let cfg = &ctx.configuration;
        let mut collector = self.registry.get_extension::<dyn Collector>(&rt)?;
        let mut operation = self.registry.get_extension::<dyn Operation>(&rt)?;
        collector.configure(cfg)?;
        operation.configure(cfg)?;
        let accepted = operation.accepted_modes();
        if !accepted.is_empty() && !accepted.contains(&mode) {
            return Err(ConfigError::invalid("mode", format!("{} does not support mode {}", rt, mode)).into());
        }
        let by_type = Qualifier::by_type(&rt);
        let mut validations = self.registry.get_all_extensions::<dyn Validation>(&by_type);
        for v in validations.iter_mut() { v.configure(cfg)?; }
        let mut transformations = self.registry.get_all_extensions::<dyn Transformation>(&by_type);
        for t in transformations.iter_mut() { t.configure(cfg)?; }
        debug!(kind = %rt, validations = validations.len(), transformations = transformations.len(), "reconcile: resolved");
        Ok(KindPlan { resource_type: rt, desired, collector, operation: Arc::from(operation), validations, transformations })
    }

    async fn reconcile_kind(
        &self,
        plan: KindPlan,
        mode: ReconciliationMode,
        ctx: &ReconciliationContext,
        opts: &ChangeOptions,
        concurrency: usize,
    ) -> Result<Vec<ChangeResult>, ReconcileError> {
        let KindPlan { resource_type: rt, desired, collector, operation, validations, transformations } = plan;
        let mut results = Vec::new();

        // Desired state is transformed and validated before the backend is queried.
        let mut accepted = Vec::with_capacity(desired.len());
        let mut rejected: BTreeSet<String> = BTreeSet::new();
        for resource in desired.into_iter() {
            let Some(resource) = transformations.iter().try_fold(resource, |r, t| t.transform(r, ctx)) else { continue };
            if !resource.is_managed() {
                results.push(ChangeResult::failure(&rt, "", "validation failed", "resource has no metadata.name"));
                continue;
            }
            match validations.iter().try_for_each(|v| v.validate(&resource)) {
                Ok(()) => accepted.push(resource),
                Err(e) => {
                    warn!(kind = %rt, name = %resource.name(), error = %e, "reconcile: validation failed");
                    rejected.insert(resource.name().to_string());
                    results.push(ChangeResult::failure(&rt, resource.name(), "validation failed", e));
                }
            }
        }

        state(&rt, RunState::Collecting);
        let actual = match collector.list_all(&ctx.configuration, &ctx.selector).await {
            Ok(items) => items,
            Err(e) => {
                counter!("reconcile_collect_err", 1u64);
                let err = CollectorError { resource_type: rt.clone(), message: format!("{:#}", e) };
                warn!(kind = %rt, error = %err, "reconcile: collect failed");
                state(&rt, RunState::Aborted);
                results.push(ChangeResult::failure(&rt, "*", "collect failed", err));
                return Ok(results);
            }
        };

        state(&rt, RunState::Filtering);
        let keep = |r: &Resource| !rejected.contains(r.name());
        let actual: Vec<Resource> = ctx.selector.filter(actual).into_iter().filter(|r| keep(r)).collect();
        let desired: Vec<Resource> = ctx.selector.filter(accepted).into_iter().filter(|r| keep(r)).collect();
        debug!(kind = %rt, actual = actual.len(), desired = desired.len(), "reconcile: filtered");

        state(&rt, RunState::Diffing);
        let changes = operation
            .compute_changes(actual, desired, opts)
            .map_err(|source| ReconcileError::Change { resource_type: rt.clone(), source })?;
        for c in changes.iter() {
            counter!("reconcile_changes_total", 1u64, "type" => c.change_type.to_string());
        }

        if ctx.dry_run {
            for change in changes.into_iter() {
                let description = operation.describe(&change);
                let status = match change.change_type {
                    ChangeType::None => ChangeStatus::Ok,
                    t if mode.allows(t) && operation.test(&change) => ChangeStatus::Planned,
                    _ => ChangeStatus::Ignored,
                };
                results.push(ChangeResult::for_change(&rt, change, status, description));
            }
            state(&rt, RunState::Done);
            return Ok(results);
        }

        state(&rt, RunState::Executing);
        let executed = execute(&rt, &operation, &changes, mode, concurrency).await;
        for change in changes.into_iter() {
            let description = operation.describe(&change);
            let result = match change.change_type {
                ChangeType::None => ChangeResult::for_change(&rt, change, ChangeStatus::Ok, description),
                _ => match executed.get(change.key.as_str()) {
                    None => ChangeResult::for_change(&rt, change, ChangeStatus::Ignored, description),
                    Some(Ok(())) => ChangeResult::for_change(&rt, change, ChangeStatus::Changed, description),
                    Some(Err(e)) => {
                        let err = OperationError { key: change.key.clone(), change_type: change.change_type, message: e.clone() };
                        ChangeResult::for_change(&rt, change, ChangeStatus::Failed, description).with_error(err)
                    }
                },
            };
            results.push(result);
        }
        state(&rt, RunState::Done);
        Ok(results)
    }
}

fn state(rt: &ResourceType, s: RunState) {
    debug!(kind = %rt, state = %s, "reconcile: state");
}

/// Run every eligible change on its own task, at most `concurrency` at a time. Outcomes
/// come back over a channel keyed by change key; a task that dies without reporting is
/// recorded as failed.
async fn execute(
    rt: &ResourceType,
    operation: &Arc<dyn Operation>,
    changes: &[ResourceChange],
    mode: ReconciliationMode,
    concurrency: usize,
) -> FxHashMap<String, Result<(), String>> {
    let sem = Arc::new(Semaphore::new(concurrency.max(1)));
    let (tx, mut rx) = mpsc::unbounded_channel::<(String, Result<(), String>)>();
    let mut pending: Vec<String> = Vec::new();
    for change in changes.iter() {
        if !mode.allows(change.change_type) { continue; }
        if !operation.test(change) {
            debug!(kind = %rt, key = %change.key, "reconcile: unsupported change skipped");
            continue;
        }
        pending.push(change.key.clone());
        let op = operation.clone();
        let change = change.clone();
        let semc = sem.clone();
        let tx = tx.clone();
        tokio::spawn(
            async move {
                let _permit = semc.acquire().await.ok();
                let t0 = Instant::now();
                let res = op.apply(&change).await.map_err(|e| format!("{:#}", e));
                histogram!("reconcile_apply_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
                match &res {
                    Ok(()) => {
                        counter!("reconcile_apply_ok", 1u64);
                        info!(key = %change.key, change = %change.change_type, took_ms = %t0.elapsed().as_millis(), "reconcile: applied");
                    }
                    Err(e) => {
                        counter!("reconcile_apply_err", 1u64);
                        warn!(key = %change.key, change = %change.change_type, error = %e, "reconcile: apply failed");
                    }
                }
                let _ = tx.send((change.key.clone(), res));
            }
            .in_current_span(),
        );
    }
    drop(tx);
    let mut out: FxHashMap<String, Result<(), String>> = FxHashMap::default();
    while let Some((key, res)) = rx.recv().await { out.insert(key, res); }
    for key in pending.into_iter() {
        out.entry(key).or_insert_with(|| Err("operation task ended without reporting a result".to_string()));
    }
    out
}
