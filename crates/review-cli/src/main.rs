mod config;
mod notify;
mod roles;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use config::{config_path, load_config, process_env, ReviewsConfig};
use notify::LogNotifier;
use review_core::review_contracts::{Classification, Decision};
use review_core::{ProposalId, StaticCatalog};
use review_engine::ReviewService;
use review_storage::ReviewStore;
use roles::StaticRoles;
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "reviews")]
#[command(about = "Proposal peer-review CLI", long_about = None)]
struct Cli {
    /// Config file (default: $REVIEWS_CONFIG_PATH or $XDG_CONFIG_HOME/reviews/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Acting user (default: $REVIEWS_USER)
    #[arg(long = "as", global = true)]
    actor: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Cast or change a vote (+1, +0, -0, -1)
    Vote {
        proposal_id: ProposalId,
        #[arg(allow_hyphen_values = true)]
        vote: String,
        #[arg(long)]
        comment: Option<String>,
    },
    /// Remove a review event
    DeleteReview { review_id: i64 },
    /// Accept, reject or undecide a proposal
    Decide {
        proposal_id: ProposalId,
        decision: String,
    },
    /// Accept several proposals at once
    BulkAccept {
        #[arg(required = true, num_args = 1..)]
        proposal_ids: Vec<ProposalId>,
    },
    /// Assign a reviewer by hand
    Assign {
        proposal_id: ProposalId,
        reviewer: String,
    },
    /// Fill a proposal up to the configured number of reviewers
    AutoAssign { proposal_id: ProposalId },
    /// Give up one of your assignments
    OptOut { assignment_id: i64 },
    /// Your active assignments
    Assignments,
    /// Classification overview, or one class with --class
    Stats {
        #[arg(long)]
        section: Option<String>,
        #[arg(long)]
        class: Option<String>,
    },
    /// Per-reviewer vote summaries
    Reviewers,
    /// Full review history and discussion of a proposal
    Detail { proposal_id: ProposalId },
    /// Post a discussion message to the speakers
    Message {
        proposal_id: ProposalId,
        text: String,
    },
    /// Proposals grouped by kind, optionally those voted on by --user
    List {
        #[arg(long)]
        user: Option<String>,
    },
    /// Proposals of one section with your vote marked
    Section {
        section: String,
        #[arg(long)]
        assigned: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = config_path(cli.config.as_deref(), process_env);
    let config = load_config(&config_path)?;
    init_logging(&config);
    debug!(event = "config_loaded", path = %config_path.display());

    let actor = cli
        .actor
        .clone()
        .or_else(|| process_env("REVIEWS_USER"))
        .filter(|actor| !actor.trim().is_empty())
        .ok_or_else(|| anyhow!("no acting user: pass --as <user> or set REVIEWS_USER"))?;

    let store = open_store(&config.database_path(process_env), &config)?;
    let catalog = load_catalog(&config.catalog_path(process_env))?;
    let roles = StaticRoles::from_config(&config.roles);
    let notifier = LogNotifier;
    let service = ReviewService::new(&store, &catalog, &roles, &roles)
        .with_notifier(&notifier)
        .with_policy(config.policy());

    let output = run(&service, &actor, cli.command)?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn init_logging(config: &ReviewsConfig) {
    let level = config.log_level(process_env);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("logging already initialized");
    }
}

fn open_store(path: &Path, config: &ReviewsConfig) -> Result<ReviewStore> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let store = ReviewStore::open(path)
        .with_context(|| format!("failed to open review store {}", path.display()))?;
    store
        .set_busy_timeout(config.busy_timeout())
        .context("failed to set busy timeout")?;
    Ok(store)
}

fn load_catalog(path: &Path) -> Result<StaticCatalog> {
    if !path.exists() {
        warn!(event = "catalog_missing", path = %path.display());
        return Ok(StaticCatalog::default());
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read catalog {}", path.display()))?;
    StaticCatalog::from_json(&contents)
        .with_context(|| format!("failed to parse catalog {}", path.display()))
}

fn run(service: &ReviewService<'_>, actor: &str, command: Commands) -> Result<Value> {
    match command {
        Commands::Vote {
            proposal_id,
            vote,
            comment,
        } => json(
            service
                .record_vote(actor, proposal_id, &vote, comment.as_deref())
                .with_context(|| format!("failed to record vote on proposal {proposal_id}"))?,
        ),
        Commands::DeleteReview { review_id } => json(
            service
                .delete_review(actor, review_id)
                .with_context(|| format!("failed to delete review {review_id}"))?,
        ),
        Commands::Decide {
            proposal_id,
            decision,
        } => {
            let decision: Decision = decision.parse()?;
            json(
                service
                    .decide(actor, proposal_id, decision)
                    .with_context(|| format!("failed to decide proposal {proposal_id}"))?,
            )
        }
        Commands::BulkAccept { proposal_ids } => json(
            service
                .bulk_accept(actor, &proposal_ids)
                .context("bulk accept failed")?,
        ),
        Commands::Assign {
            proposal_id,
            reviewer,
        } => json(
            service
                .assign_reviewer(actor, proposal_id, &reviewer)
                .with_context(|| format!("failed to assign {reviewer} to {proposal_id}"))?,
        ),
        Commands::AutoAssign { proposal_id } => json(
            service
                .auto_assign(actor, proposal_id)
                .with_context(|| format!("failed to auto-assign proposal {proposal_id}"))?,
        ),
        Commands::OptOut { assignment_id } => json(
            service
                .opt_out(actor, assignment_id)
                .with_context(|| format!("failed to opt out of assignment {assignment_id}"))?,
        ),
        Commands::Assignments => json(
            service
                .assignments(actor)
                .context("failed to list assignments")?,
        ),
        Commands::Stats { section, class } => {
            let classification = class
                .as_deref()
                .map(str::parse::<Classification>)
                .transpose()?;
            json(
                service
                    .stats(actor, section.as_deref(), classification)
                    .context("failed to load stats")?,
            )
        }
        Commands::Reviewers => json(
            service
                .reviewer_overview(actor)
                .context("failed to summarize reviewers")?,
        ),
        Commands::Detail { proposal_id } => json(
            service
                .detail(actor, proposal_id)
                .with_context(|| format!("failed to load proposal {proposal_id}"))?,
        ),
        Commands::Message { proposal_id, text } => json(
            service
                .post_message(actor, proposal_id, &text)
                .with_context(|| format!("failed to post message on {proposal_id}"))?,
        ),
        Commands::List { user } => json(
            service
                .review_list(actor, user.as_deref())
                .context("failed to list proposals")?,
        ),
        Commands::Section { section, assigned } => {
            if section.trim().is_empty() {
                bail!("section slug cannot be empty");
            }
            json(
                service
                    .section_listing(actor, &section, assigned)
                    .with_context(|| format!("failed to list section {section}"))?,
            )
        }
    }
}

fn json(value: impl Serialize) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}
