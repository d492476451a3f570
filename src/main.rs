mod audit;
mod checkpoint;
mod config;
mod dispatch;
mod domain;
mod extraction;
mod orchestrator;
mod proposal;
mod sanitizer;
mod state;
mod storage_paths;
mod structured_logger;

use anyhow::{Context, Result};
use checkpoint::FileCheckpointStore;
use clap::{Parser, Subcommand};
use config::AgentConfig;
use dispatch::ToolRegistry;
use domain::{ActionType, ActorRole, Medication, PlanId};
use extraction::RuleBasedExtractor;
use orchestrator::{Orchestrator, PlanRequest};
use proposal::RuleBasedProposer;
use state::{ApprovalDecision, ResumePayload};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use structured_logger::StructuredLogger;

#[derive(Parser)]
#[command(name = "medplan")]
#[command(about = "Medication dosing workflow agent")]
#[command(version)]
#[command(arg_required_else_help = true)]
struct Cli {
    /// Path to a YAML config file (defaults to the embedded configuration)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a plan and advance it to its first suspension point
    Plan {
        /// JSON file with structured medications (skips extraction)
        #[arg(long)]
        meds: Option<PathBuf>,

        /// Free text describing medications or context
        #[arg(long)]
        text: Option<String>,

        /// Pre-extracted text (e.g. OCR output) to extract medications from
        #[arg(long)]
        extracted_text: Option<String>,

        /// IANA timezone for the schedule
        #[arg(long)]
        timezone: Option<String>,

        /// Act as caregiver instead of patient
        #[arg(long)]
        caregiver: bool,
    },

    /// Answer a NEED_INFO interrupt with corrected medications or text
    Continue {
        plan_id: String,

        /// JSON file with the corrected medication list
        #[arg(long)]
        meds: Option<PathBuf>,

        /// Corrected raw text to re-extract medications from
        #[arg(long)]
        text: Option<String>,
    },

    /// Approve actions for a plan waiting at the approval gate
    Approve {
        plan_id: String,

        /// Action types to approve (comma-separated wire names)
        #[arg(long, value_delimiter = ',')]
        actions: Vec<String>,

        /// Dose time override as dose_id=HH:MM (repeatable)
        #[arg(long = "override")]
        overrides: Vec<String>,

        /// Act as caregiver instead of patient
        #[arg(long)]
        caregiver: bool,
    },

    /// Reject a plan waiting at the approval gate
    Reject {
        plan_id: String,

        #[arg(long)]
        reason: Option<String>,

        /// Act as caregiver instead of patient
        #[arg(long)]
        caregiver: bool,
    },

    /// Show the current snapshot of a plan without advancing it
    State { plan_id: String },

    /// Show the audit trail of a plan
    Audit { plan_id: String },
}

fn role(caregiver: bool) -> ActorRole {
    if caregiver {
        ActorRole::Caregiver
    } else {
        ActorRole::Patient
    }
}

fn read_meds(path: &PathBuf) -> Result<Vec<Medication>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read medications file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse medications JSON: {}", path.display()))
}

fn parse_actions(specs: &[String]) -> Result<Vec<ActionType>> {
    specs
        .iter()
        .map(|s| {
            ActionType::parse(s).with_context(|| {
                format!(
                    "unknown action type '{}' (allowed: CREATE_REMINDERS, SET_ESCALATION_RULE, \
                     CREATE_CALENDAR_EVENT, SEND_ALERT)",
                    s
                )
            })
        })
        .collect()
}

fn parse_overrides(specs: &[String]) -> Result<BTreeMap<String, String>> {
    let mut overrides = BTreeMap::new();
    for entry in specs {
        let (dose_id, time) = entry
            .split_once('=')
            .with_context(|| format!("override '{}' is not of the form dose_id=HH:MM", entry))?;
        overrides.insert(dose_id.to_string(), time.to_string());
    }
    Ok(overrides)
}

fn build_orchestrator(config: &AgentConfig) -> Result<Orchestrator> {
    let (plans_root, logs_root) = match &config.data_dir {
        Some(dir) => (dir.join("plans"), dir.join("logs")),
        None => (storage_paths::plans_dir()?, storage_paths::logs_dir()?),
    };
    let logger = Arc::new(StructuredLogger::new(&logs_root)?);

    Ok(Orchestrator::new(
        Arc::new(FileCheckpointStore::new(plans_root)),
        Arc::new(RuleBasedExtractor),
        Arc::new(RuleBasedProposer),
        ToolRegistry::simulated(),
        config.default_timezone.clone(),
        config.sanitize_options(),
    )
    .with_logger(logger))
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AgentConfig::load(path)?,
        None => AgentConfig::default_config(),
    };
    let orchestrator = build_orchestrator(&config)?;

    match cli.command {
        Command::Plan {
            meds,
            text,
            extracted_text,
            timezone,
            caregiver,
        } => {
            let request = PlanRequest {
                actor_role: role(caregiver),
                timezone,
                input_text: text,
                extracted_text,
                meds: meds.as_ref().map(read_meds).transpose()?.unwrap_or_default(),
            };
            let outcome = orchestrator.advance(None, request).await?;
            print_json(&outcome)
        }

        Command::Continue {
            plan_id,
            meds,
            text,
        } => {
            let payload = ResumePayload::Corrections {
                meds: meds.as_ref().map(read_meds).transpose()?.unwrap_or_default(),
                extracted_text: text,
                actor_role: None,
            };
            let outcome = orchestrator
                .resume(&PlanId::from(plan_id.as_str()), payload)
                .await?;
            print_json(&outcome)
        }

        Command::Approve {
            plan_id,
            actions,
            overrides,
            caregiver,
        } => {
            let payload = ResumePayload::Decision(ApprovalDecision::Approve {
                actor_role: role(caregiver),
                approved_action_types: parse_actions(&actions)?,
                dose_time_overrides: parse_overrides(&overrides)?,
            });
            let outcome = orchestrator
                .resume(&PlanId::from(plan_id.as_str()), payload)
                .await?;
            print_json(&outcome)
        }

        Command::Reject {
            plan_id,
            reason,
            caregiver,
        } => {
            let payload = ResumePayload::Decision(ApprovalDecision::Reject {
                actor_role: role(caregiver),
                reason,
            });
            let outcome = orchestrator
                .resume(&PlanId::from(plan_id.as_str()), payload)
                .await?;
            print_json(&outcome)
        }

        Command::State { plan_id } => {
            let outcome = orchestrator
                .advance(Some(&PlanId::from(plan_id.as_str())), PlanRequest::default())
                .await?;
            print_json(&outcome)
        }

        Command::Audit { plan_id } => {
            let trail = orchestrator
                .audit_trail(&PlanId::from(plan_id.as_str()))
                .await?;
            print_json(&trail)
        }
    }
}
