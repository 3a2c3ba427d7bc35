use clap::{Parser, Subcommand, ValueEnum};
use formation::store::SqliteStore;
use formation::{parse_formation, parse_plan, reconcile, seed, ReconcileMode};
use std::path::{Path, PathBuf};
use std::process;

/// Formation CLI — provision and seed collections in a record store
#[derive(Parser)]
#[command(name = "formation", version, about)]
struct Cli {
    /// Path to the store database
    #[arg(long, default_value = "formation.db")]
    store: PathBuf,

    /// Output format
    #[arg(long, default_value = "yaml")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Yaml,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Reconcile a formation against the store
    Provision {
        /// Path to the formation.yaml file
        #[arg(long)]
        schema: PathBuf,
        /// Delete and recreate every collection named in the formation
        /// (destructive; existing records are lost)
        #[arg(long)]
        recreate: bool,
    },

    /// Reconcile (create-only) and run a seed plan
    Seed {
        /// Path to the formation.yaml file
        #[arg(long)]
        schema: PathBuf,
        /// Path to the seed plan.yaml file
        #[arg(long)]
        plan: PathBuf,
    },

    /// Tear down, recreate and seed — one-shot test-database setup
    Form {
        /// Path to the formation.yaml file
        #[arg(long)]
        schema: PathBuf,
        /// Path to the seed plan.yaml file
        #[arg(long)]
        plan: PathBuf,
    },

    /// List stored collections with field and record counts
    Status,
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("ERROR:{e}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let store = SqliteStore::open(&cli.store)?;

    match cli.command {
        Command::Provision { schema, recreate } => {
            let mode = if recreate {
                ReconcileMode::RecreateAll
            } else {
                ReconcileMode::CreateOnly
            };
            let provisioned = provision(&store, &schema, mode)?;
            print_output(&provision_summary(&provisioned), &cli.format);
        }

        Command::Seed { schema, plan } => {
            let provisioned = provision(&store, &schema, ReconcileMode::CreateOnly)?;
            let seeded = run_plan(&store, &provisioned, &plan)?;
            print_output(
                &serde_json::json!({ "ok": true, "seeded": seeded }),
                &cli.format,
            );
        }

        Command::Form { schema, plan } => {
            let provisioned = provision(&store, &schema, ReconcileMode::RecreateAll)?;
            let seeded = run_plan(&store, &provisioned, &plan)?;
            let mut summary = provision_summary(&provisioned);
            summary["seeded"] = serde_json::json!(seeded);
            print_output(&summary, &cli.format);
        }

        Command::Status => {
            let status = store.status()?;
            print_output(&status, &cli.format);
        }
    }

    Ok(())
}

fn provision(
    store: &SqliteStore,
    schema: &Path,
    mode: ReconcileMode,
) -> formation::Result<std::collections::BTreeMap<String, formation::ProvisionedCollection>> {
    let form = parse_formation(schema)?;
    reconcile(store, &form, mode)
}

fn run_plan(
    store: &SqliteStore,
    provisioned: &std::collections::BTreeMap<String, formation::ProvisionedCollection>,
    plan: &Path,
) -> formation::Result<usize> {
    let plan = parse_plan(plan)?;
    let seeded = seed(store, provisioned, &plan.records)?;
    Ok(seeded.len())
}

fn provision_summary(
    provisioned: &std::collections::BTreeMap<String, formation::ProvisionedCollection>,
) -> serde_json::Value {
    let collections: serde_json::Map<String, serde_json::Value> = provisioned
        .iter()
        .map(|(name, c)| (name.clone(), serde_json::json!(c.id)))
        .collect();
    serde_json::json!({ "ok": true, "collections": collections })
}

fn print_output(value: &serde_json::Value, format: &OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(value).unwrap());
        }
        OutputFormat::Yaml => {
            print!("{}", serde_yaml::to_string(value).unwrap());
        }
    }
}
