use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use catalog_portal::cart::{CartAggregator, without_covered};
use catalog_portal::catalog::CatalogHttpClient;
use catalog_portal::config::{ConfigLoader, PortalConfig, session_id};
use catalog_portal::domain::{CatalogEntity, PageSize};
use catalog_portal::download::{
    DownloadClient, DownloadHttpClient, estimate_download_seconds, format_duration_dhms,
};
use catalog_portal::error::PortalError;
use catalog_portal::output::{DecodedQuery, JsonOutput, TotalsReport};

#[derive(Parser)]
#[command(name = "catalog-portal")]
#[command(about = "Inspect catalog query strings and download cart totals")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(subcommand, about = "Work with persisted query strings")]
    Query(QueryCommand),
    #[command(subcommand, about = "Inspect the download cart")]
    Cart(CartCommand),
}

#[derive(Subcommand)]
enum QueryCommand {
    #[command(about = "Decode a query string and show the catalog requests it produces")]
    Decode(DecodeArgs),
}

#[derive(Args)]
struct DecodeArgs {
    search: String,

    #[arg(long, value_enum, default_value = "investigation")]
    entity: CatalogEntity,
}

#[derive(Subcommand)]
enum CartCommand {
    #[command(about = "List the items in the remote cart")]
    List,
    #[command(about = "Compute total size, file count and estimated download time")]
    Totals(TotalsArgs),
}

#[derive(Args)]
struct TotalsArgs {
    #[arg(long, default_value_t = 30)]
    speed: u32,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(portal) = report.downcast_ref::<PortalError>() {
            return ExitCode::from(map_exit_code(portal));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &PortalError) -> u8 {
    match error {
        PortalError::MissingConfig | PortalError::ConfigRead(_) | PortalError::ConfigParse(_) => 2,
        error if error.is_remote() => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Query(QueryCommand::Decode(args)) => {
            let default_results = match ConfigLoader::resolve(cli.config.as_deref()) {
                Ok(config) => config.default_results,
                Err(PortalError::MissingConfig) => PageSize::DEFAULT,
                Err(err) => return Err(err.into()),
            };
            decode(args, default_results)
        }
        Commands::Cart(command) => {
            let config = ConfigLoader::resolve(cli.config.as_deref())?;
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .into_diagnostic()?;
            runtime.block_on(run_cart(command, config))
        }
    }
}

/// Decoding works without a config file; one that exists supplies the page
/// size used when the query has none.
fn decode(args: DecodeArgs, default_results: PageSize) -> miette::Result<()> {
    let decoded = DecodedQuery::new(&args.search, args.entity, default_results);
    JsonOutput::print_decoded(&decoded).into_diagnostic()
}

async fn run_cart(command: CartCommand, config: PortalConfig) -> miette::Result<()> {
    let session = session_id();
    let download = Arc::new(DownloadHttpClient::new(
        config.download_api_url.clone(),
        config.facility_name.clone(),
        session.clone(),
        config.request_timeout,
    )?);

    match command {
        CartCommand::List => {
            let items = download.fetch_cart().await?;
            JsonOutput::print_cart(&items).into_diagnostic()
        }
        CartCommand::Totals(args) => {
            let catalog = Arc::new(CatalogHttpClient::new(
                config.api_url.clone(),
                Some(session.as_str()),
                config.request_timeout,
            )?);
            let items = download.fetch_cart().await?;
            let aggregator = CartAggregator::new(download, catalog, config.cache_capacity);
            let totals = aggregator.aggregate(&without_covered(&items)).await;
            let estimated_seconds = estimate_download_seconds(totals.total_size, args.speed)?;
            let report = TotalsReport {
                totals,
                speed_mbps: args.speed,
                estimated_seconds,
                estimated_time: format_duration_dhms(estimated_seconds),
            };
            JsonOutput::print_totals(&report).into_diagnostic()
        }
    }
}
