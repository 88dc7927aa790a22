/// MemoGarden CLI
///
/// Informative and exploratory front-end over the verb dispatcher: `diagnose`
/// and `repair` surface the Transaction Coordinator's consistency check,
/// `sweep` runs one fossilization pass, and the remaining subcommands are
/// thin conveniences over the same verbs a caller would otherwise submit as
/// JSON through `Dispatcher::dispatch` — not a second code path.
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use memogarden::verbs::{Actor, ActorKind, Dispatcher, VerbRequest};
use memogarden::{
    config::{GardenConfig, ResourceProfile},
    Garden,
};
use serde_json::Value as JsonValue;
use std::str::FromStr;

#[derive(Parser)]
#[command(name = "memogarden")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Resource profile to load defaults from (embedded, standard)
    #[arg(long, global = true)]
    profile: Option<String>,

    /// Acting operator id (defaults to a local operator)
    #[arg(long, global = true, default_value = "core_operator_local")]
    actor: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the startup consistency check and print a report
    Diagnose,

    /// Repair orphaned deltas found by the consistency check
    ///
    /// Exit codes: 0 clean or fully repaired, 1 inconsistencies remain,
    /// 2 unrecoverable break found (broken hash chain).
    Repair,

    /// Run one fossilization sweep over expired relations and facts
    Sweep {
        /// Report what would fossilize without mutating anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Show store sizes and system status
    Status,

    /// Create an entity
    ///
    /// Example: memogarden create artifact '{"title": "first note"}'
    Create {
        /// Entity type (artifact, person, project, ...)
        entity_type: String,

        /// Entity payload (JSON)
        data: String,
    },

    /// Fetch an entity by id
    Get { id: String },

    /// Edit an entity's data
    Edit {
        id: String,
        /// based_on_hash for optimistic locking
        based_on_hash: String,
        /// Merge-patch JSON applied to the entity's `data`
        data: String,
    },

    /// Record a fact in the Soil
    ///
    /// Example: memogarden add observation '{"note": "saw this"}'
    Add {
        fact_type: String,
        data: String,
    },

    /// Link two entities with a user relation
    Link {
        kind: String,
        source: String,
        source_type: String,
        target: String,
        target_type: String,
    },

    /// Walk derived_from lineage from an entity
    Track {
        id: String,
        #[arg(long, default_value_t = 10)]
        max_depth: u32,
    },

    /// Full-text search across facts
    Search {
        query: String,
        #[arg(long, default_value = "standard")]
        effort: String,
    },
}

fn print_json(value: &JsonValue) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string()));
}

fn dispatch_and_print(dispatcher: &Dispatcher, actor: &str, op: &str, params: JsonValue) -> Result<()> {
    let response = dispatcher.dispatch(VerbRequest {
        op: op.to_string(),
        params,
        actor: Actor {
            id: actor.to_string(),
            kind: ActorKind::Operator,
        },
        parent_action_id: None,
    });

    if response.ok {
        println!("{}", "OK".green().bold());
        if let Some(result) = &response.result {
            print_json(result);
        }
        Ok(())
    } else {
        let error = response.error.unwrap();
        eprintln!("{} {}", "Error".red().bold(), error.code.bright_black());
        eprintln!("  {}", error.message);
        std::process::exit(1);
    }
}

fn main() -> Result<()> {
    memogarden::init_logging();
    let cli = Cli::parse();

    let config = match &cli.profile {
        Some(name) => GardenConfig::profile(ResourceProfile::from_str(name).unwrap_or_else(|_| {
            eprintln!("{} unknown profile '{name}', falling back to embedded", "warning:".yellow());
            ResourceProfile::Embedded
        })),
        None => GardenConfig::default(),
    }
    .overlay_env();
    let garden = Garden::from_config(&config);
    let dispatcher = Dispatcher::new(&garden);

    match cli.command {
        Commands::Diagnose => {
            let report = garden.startup_check();
            println!("{}", "Consistency report".bold().cyan());
            println!("  Orphaned deltas: {}", report.orphaned_deltas.len());
            println!("  Broken chains:   {}", report.broken_chains.len());
            if report.is_clean() {
                println!("  {}", "clean".green());
            } else {
                println!("  {}", "inconsistent".yellow());
            }
            if !report.is_clean() {
                std::process::exit(1);
            }
            Ok(())
        }

        Commands::Repair => {
            let report = garden.startup_check();
            if report.is_clean() {
                println!("{}", "Already clean.".green());
                return Ok(());
            }
            if !report.broken_chains.is_empty() {
                eprintln!("{}", "Unrecoverable: broken hash chains found.".red().bold());
                for id in &report.broken_chains {
                    eprintln!("  {}", id);
                }
                std::process::exit(2);
            }
            let mut remaining = 0;
            for delta_fact_id in &report.orphaned_deltas {
                if garden.coordinator.repair_delta(delta_fact_id).is_err() {
                    remaining += 1;
                }
            }
            if remaining == 0 {
                println!("{}", "Repaired.".green());
                Ok(())
            } else {
                eprintln!("{}", format!("{remaining} deltas could not be repaired.").yellow());
                std::process::exit(1);
            }
        }

        Commands::Sweep { dry_run } => {
            let report = garden.sweep(dry_run);
            println!("{}", "Sweep report".bold().cyan());
            println!("  Fossilized relations: {}", report.fossilized_relations);
            println!("  Degraded facts:       {}", report.degraded_facts);
            if report.dry_run {
                println!("  {}", "(dry run, nothing mutated)".bright_black());
            }
            Ok(())
        }

        Commands::Status => {
            let stats = garden.stats();
            println!("{}", "Garden status".bold().cyan());
            println!("  Facts:     {}", stats.fact_count);
            println!("  Entities:  {}", stats.entity_count);
            println!("  Relations: {}", stats.active_user_relations);
            println!("  Status:    {:?}", stats.status);
            Ok(())
        }

        Commands::Create { entity_type, data } => {
            let data: JsonValue = serde_json::from_str(&data).context("invalid JSON payload")?;
            dispatch_and_print(
                &dispatcher,
                &cli.actor,
                "core.create",
                serde_json::json!({"entity_type": entity_type, "data": data}),
            )
        }

        Commands::Get { id } => dispatch_and_print(&dispatcher, &cli.actor, "core.get", serde_json::json!({"id": id})),

        Commands::Edit { id, based_on_hash, data } => {
            let data: JsonValue = serde_json::from_str(&data).context("invalid JSON payload")?;
            dispatch_and_print(
                &dispatcher,
                &cli.actor,
                "core.edit",
                serde_json::json!({"id": id, "based_on_hash": based_on_hash, "set": data}),
            )
        }

        Commands::Add { fact_type, data } => {
            let data: JsonValue = serde_json::from_str(&data).context("invalid JSON payload")?;
            dispatch_and_print(
                &dispatcher,
                &cli.actor,
                "soil.add",
                serde_json::json!({"fact_type": fact_type, "data": data}),
            )
        }

        Commands::Link { kind, source, source_type, target, target_type } => dispatch_and_print(
            &dispatcher,
            &cli.actor,
            "relations.link",
            serde_json::json!({
                "kind": kind,
                "source": source,
                "source_type": source_type,
                "target": target,
                "target_type": target_type,
            }),
        ),

        Commands::Track { id, max_depth } => dispatch_and_print(
            &dispatcher,
            &cli.actor,
            "track",
            serde_json::json!({"id": id, "max_depth": max_depth}),
        ),

        Commands::Search { query, effort } => dispatch_and_print(
            &dispatcher,
            &cli.actor,
            "search",
            serde_json::json!({"query": query, "effort": effort}),
        ),
    }
}
