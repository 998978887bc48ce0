//! Versioned cache of prepared plans.
//!
//! Plans and row shapes are derived purely from the schema, so one
//! [`PlanSet`] serves every transaction on a schema version. The cache
//! holds the current set behind an `RwLock<Arc<..>>`; a schema swap makes
//! the next transaction rebuild the whole set and publish it, and
//! in-flight transactions keep their `Arc` to the old one.

use std::sync::Arc;

use eyre::{bail, Result};
use hashbrown::HashMap;
use parking_lot::RwLock;

use crate::error::Fault;
use crate::operator::RowTypeRegistry;
use crate::schema::{IndexId, Schema, TableId};
use crate::store::maintenance::{
    build_bulk_plan, build_maintenance_plan, BulkBuildPlan, MaintenancePlan,
};
use crate::LOG_TARGET;

pub struct PlanSet {
    version: u64,
    registry: RowTypeRegistry,
    maintenance: HashMap<(IndexId, TableId), MaintenancePlan>,
    bulk: HashMap<IndexId, BulkBuildPlan>,
}

impl PlanSet {
    fn build(schema: &Schema) -> Self {
        let mut registry = RowTypeRegistry::new(schema);
        let mut maintenance = HashMap::new();
        let mut bulk = HashMap::new();
        for index in schema.indexes() {
            registry.index_type(schema, index);
            for trigger_pos in 0..index.branch().len() {
                let plan = build_maintenance_plan(schema, &mut registry, index, trigger_pos);
                maintenance.insert((index.id(), plan.trigger()), plan);
            }
            bulk.insert(index.id(), build_bulk_plan(schema, &mut registry, index));
        }
        Self {
            version: schema.version(),
            registry,
            maintenance,
            bulk,
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn registry(&self) -> &RowTypeRegistry {
        &self.registry
    }

    pub fn maintenance(&self, index: IndexId, trigger: TableId) -> Result<&MaintenancePlan> {
        match self.maintenance.get(&(index, trigger)) {
            Some(plan) => Ok(plan),
            None => bail!(Fault::InvalidPlan {
                reason: format!(
                    "no maintenance plan for index {} trigger table {}",
                    index.0, trigger.0
                ),
            }),
        }
    }

    pub fn bulk(&self, index: IndexId) -> Result<&BulkBuildPlan> {
        match self.bulk.get(&index) {
            Some(plan) => Ok(plan),
            None => bail!(Fault::InvalidPlan {
                reason: format!("no bulk build plan for index {}", index.0),
            }),
        }
    }
}

pub struct PlanCache {
    current: RwLock<Option<Arc<PlanSet>>>,
}

impl PlanCache {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(None),
        }
    }

    /// The plan set for this schema version, rebuilding and publishing it
    /// when the version moved.
    pub fn plans_for(&self, schema: &Schema) -> Arc<PlanSet> {
        if let Some(set) = self.current.read().as_ref() {
            if set.version() == schema.version() {
                return Arc::clone(set);
            }
        }
        let mut slot = self.current.write();
        // Another thread may have rebuilt while we waited for the lock.
        if let Some(set) = slot.as_ref() {
            if set.version() == schema.version() {
                return Arc::clone(set);
            }
        }
        let set = Arc::new(PlanSet::build(schema));
        log::debug!(
            target: LOG_TARGET,
            "rebuilt plan cache for schema {} version {}: {} maintenance plans, {} bulk plans",
            schema.name(),
            schema.version(),
            set.maintenance.len(),
            set.bulk.len()
        );
        *slot = Some(Arc::clone(&set));
        set
    }
}

impl Default for PlanCache {
    fn default() -> Self {
        Self::new()
    }
}
