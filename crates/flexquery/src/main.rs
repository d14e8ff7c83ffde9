//! flexquery command-line tool.
//!
//! Compiles query sets and declarations from a schema file to SQL.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use flexquery::{
    Args, Backend, Bound, Config, Declaration, Mode, Q, QuerySet, SchemaFile, Value,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Schema file (overrides FLEXQUERY_SCHEMA).
    #[arg(long, global = true)]
    schema: Option<PathBuf>,

    /// SQL dialect (overrides FLEXQUERY_BACKEND).
    #[arg(long, global = true, value_enum)]
    backend: Option<Backend>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the SQL for a query set.
    Sql {
        /// Model to query.
        #[arg(long)]
        model: String,

        /// Lookup applied with `filter`, as key=value (repeatable).
        #[arg(long = "filter", value_parser = parse_lookup)]
        filters: Vec<(String, Value)>,

        /// Lookup applied with `exclude`, as key=value (repeatable).
        #[arg(long = "exclude", value_parser = parse_lookup)]
        excludes: Vec<(String, Value)>,

        /// Declaration from the schema file to apply.
        #[arg(long)]
        declaration: Option<String>,

        /// Relation path from the model to the declaration's model.
        #[arg(long, requires = "declaration")]
        via: Option<String>,

        /// How to apply the declaration: inline or subquery.
        #[arg(long, default_value = "inline", requires = "declaration")]
        mode: String,

        /// Print a COUNT query instead.
        #[arg(long)]
        count: bool,
    },
    /// Validate the schema file and every declaration in it.
    Check,
}

fn parse_lookup(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    Ok((key.trim().to_string(), Value::parse_literal(value)))
}

fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    init_tracing();

    let cli = Cli::parse();
    let mut config = Config::from_env().context("failed to load configuration")?;
    if let Some(schema) = cli.schema {
        config.schema_path = schema;
    }
    if let Some(backend) = cli.backend {
        config.backend = backend;
    }

    let file = SchemaFile::parse(&config.schema_path)?;
    let schema = file.schema().context("failed to build schema")?;
    info!(
        path = %config.schema_path.display(),
        models = file.models.len(),
        declarations = file.declarations.len(),
        "Schema loaded"
    );

    match cli.command {
        Command::Sql {
            model,
            filters,
            excludes,
            declaration,
            via,
            mode,
            count,
        } => {
            let mut qs: QuerySet = schema.all(&model)?;
            if !filters.is_empty() {
                qs = qs.filter(Q::from_lookups(filters));
            }
            if !excludes.is_empty() {
                qs = qs.exclude(Q::from_lookups(excludes));
            }

            if let Some(name) = declaration {
                let definition = file
                    .declaration(&name)
                    .with_context(|| format!("no declaration named '{name}'"))?;
                let flex = definition.to_flex_query();
                let bound: Bound<'_> = match via.as_deref() {
                    Some(via) => flex.bind_via(&qs, via),
                    None => flex.bind(&qs),
                };
                let mode: Mode = mode.parse()?;
                qs = bound
                    .call(mode, Args::new())
                    .with_context(|| format!("failed to apply {bound}"))?;
            }

            let sql = if count {
                qs.count_sql(config.backend)?
            } else {
                qs.to_sql(config.backend)?
            };
            println!("{sql}");
        }
        Command::Check => {
            let managers = file.managers(&schema)?;
            for manager in managers.values() {
                for declaration in manager.declarations() {
                    let qs = manager
                        .flex(declaration.name())?
                        .call(Mode::Inline, Args::new())?;
                    qs.to_sql(config.backend)?;
                    info!(model = %manager.model(), declaration = %declaration.name(), "Declaration ok");
                }
            }
            println!(
                "{}: {} models, {} declarations ok",
                config.schema_path.display(),
                file.models.len(),
                file.declarations.len()
            );
        }
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
