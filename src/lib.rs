//! # MemoGarden — a personal-information substrate
//!
//! MemoGarden keeps an immutable fact timeline (Soil) alongside a mutable,
//! hash-chained entity registry (Core), linked by a decaying relation graph
//! and surfaced through a uniform verb-oriented API. This crate is the core
//! substrate: the two-database storage engine, the cross-database
//! transaction coordinator, the relation/time-horizon/fossilization model,
//! the attention-tracking (context) mechanism, and the verb dispatch layer
//! that enforces these invariants together.
//!
//! ## Quick start
//!
//! ```ignore
//! use memogarden::{Garden, verbs::{Dispatcher, VerbRequest, Actor, ActorKind}};
//! use serde_json::json;
//!
//! let garden = Garden::default();
//! let dispatcher = Dispatcher::new(&garden);
//! let response = dispatcher.dispatch(VerbRequest {
//!     op: "core.create".to_string(),
//!     params: json!({"entity_type": "artifact", "data": {"title": "first note"}}),
//!     actor: Actor { id: "core_operator_1".to_string(), kind: ActorKind::Operator },
//!     parent_action_id: None,
//! });
//! assert!(response.ok);
//! ```
//!
//! ## Architecture
//!
//! Seven components, leaves first: [`ids`] (identifiers & canonical
//! hashing), [`soil`] (the Fact Store), [`core_store`] (the Entity Store),
//! [`coordinator`] (cross-store transactions and system status),
//! [`relations`] (time-horizon arithmetic and fossilization), [`context`]
//! (attention tracking), and [`verbs`] (the dispatcher and audit layer).
//! [`graph`] and [`events`] are shared support used by the upper layers.

pub mod config;
pub mod context;
pub mod core_store;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod graph;
pub mod ids;
pub mod persistence;
pub mod query;
pub mod relations;
pub mod soil;
pub mod verbs;

use std::time::Duration;

use context::ContextEngine;
use coordinator::Coordinator;
use events::EventBus;
use relations::RelationEngine;

/// The wired-together core substrate: the two stores behind the
/// Transaction Coordinator, the Relation Engine, the Context Engine, and
/// the process-wide event bus. This is what a [`verbs::Dispatcher`] runs
/// against.
pub struct Garden {
    pub coordinator: Coordinator,
    pub relations: RelationEngine,
    pub context: ContextEngine,
    pub events: EventBus,
}

impl Garden {
    pub fn new(busy_timeout: Duration, context_bound_n: usize, view_coalescence_timeout_secs: i64) -> Self {
        Garden {
            coordinator: Coordinator::new(busy_timeout),
            relations: RelationEngine::new(),
            context: ContextEngine::new(context_bound_n, view_coalescence_timeout_secs),
            events: EventBus::new(),
        }
    }

    /// Build a Garden backed by durable on-disk journals at the paths
    /// `cfg` resolves for Soil and Core, replaying any existing contents.
    /// Falls back to a pure in-memory Garden (logging the cause) if the
    /// journals can't be opened, so a permissions or disk-full problem
    /// degrades the process rather than aborting it.
    pub fn from_config(cfg: &config::GardenConfig) -> Self {
        let busy_timeout = Duration::from_secs(cfg.busy_timeout_secs);
        let soil_path = cfg.resolve_store_path(ids::Layer::Soil);
        let core_path = cfg.resolve_store_path(ids::Layer::Core);
        let coordinator = match Coordinator::open(busy_timeout, &soil_path, &core_path) {
            Ok(coordinator) => coordinator,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    soil_path = %soil_path.display(),
                    core_path = %core_path.display(),
                    "failed to open durable stores; falling back to in-memory"
                );
                Coordinator::new(busy_timeout)
            }
        };
        Garden {
            coordinator,
            relations: RelationEngine::new(),
            context: ContextEngine::new(cfg.context_bound_n, cfg.view_coalescence_timeout_secs as i64),
            events: EventBus::new(),
        }
    }

    /// Run the coordinator's startup consistency check, used by `diagnose`
    /// and at process start.
    pub fn startup_check(&self) -> coordinator::ConsistencyReport {
        self.coordinator.startup_check()
    }

    /// Run one fossilization pass, flushing its effects to the durable
    /// journals (if any are open) alongside the in-memory mutation.
    pub fn sweep(&self, dry_run: bool) -> relations::SweepReport {
        let report = self.relations.sweep(&self.coordinator.soil, ids::current_day(), dry_run);
        if !dry_run {
            self.coordinator.flush_sweep_report(&report);
        }
        report
    }

    /// A snapshot of store sizes, for the `diagnose` report and tests.
    pub fn stats(&self) -> GardenStats {
        GardenStats {
            fact_count: self.coordinator.soil.fact_count(),
            entity_count: self.coordinator.entities.entity_count(),
            facts_by_fidelity: self.coordinator.soil.count_by_fidelity(),
            entities_by_type: self.coordinator.entities.count_by_type(),
            active_user_relations: self.relations.relation_count(),
            status: self.coordinator.status(),
        }
    }
}

impl Default for Garden {
    fn default() -> Self {
        Garden::from_config(&config::GardenConfig::default())
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct GardenStats {
    pub fact_count: usize,
    pub entity_count: usize,
    pub facts_by_fidelity: std::collections::HashMap<soil::Fidelity, usize>,
    pub entities_by_type: std::collections::HashMap<core_store::EntityType, usize>,
    pub active_user_relations: usize,
    pub status: coordinator::SystemStatus,
}

/// Prelude module for convenient imports.
///
/// ```ignore
/// use memogarden::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::GardenConfig;
    pub use crate::core_store::{Entity, EntityType};
    pub use crate::error::{GardenError, GardenResult};
    pub use crate::soil::{Fact, FactType, Fidelity};
    pub use crate::verbs::{Actor, ActorKind, Dispatcher, VerbRequest, VerbResponse};
    pub use crate::Garden;
    pub use chrono::{DateTime, Utc};
    pub use serde_json::{json, Value as JsonValue};
}

// ============================================================================
// Logging and Observability
// ============================================================================

/// Initialize the logging system.
///
/// This should be called once at application startup. It configures the
/// tracing subscriber with an environment filter.
///
/// The log level can be controlled via the `MEMOGARDEN_LOG` environment
/// variable:
/// - `MEMOGARDEN_LOG=error` - Only errors
/// - `MEMOGARDEN_LOG=warn` - Errors and warnings
/// - `MEMOGARDEN_LOG=info` - General information (default)
/// - `MEMOGARDEN_LOG=debug` - Debug information, including verb state-machine
///   transitions
/// - `MEMOGARDEN_LOG=trace` - Verbose tracing
pub fn init_logging() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_env("MEMOGARDEN_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

/// Initialize logging with a specific level, ignoring `MEMOGARDEN_LOG`.
pub fn init_logging_with_level(level: &str) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::new(level);

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}
