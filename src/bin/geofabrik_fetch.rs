use std::process::ExitCode;
use std::time::Duration;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use geofabrik_fetch::app::{App, AppSettings, DownloadOptions, DownloadResult, ProgressSink};
use geofabrik_fetch::client::GeofabrikHttpClient;
use geofabrik_fetch::config::{ConfigLoader, ResolvedConfig};
use geofabrik_fetch::confirm::{AlwaysConfirm, Confirm, StdinConfirm};
use geofabrik_fetch::domain::FileFormat;
use geofabrik_fetch::error::GeofabrikError;
use geofabrik_fetch::output::{JsonOutput, OutputMode, TextOutput};
use geofabrik_fetch::store::Store;

#[derive(Parser)]
#[command(name = "geofabrik-fetch")]
#[command(about = "Browse the Geofabrik region catalogue and download OpenStreetMap extracts")]
#[command(version, author)]
struct Cli {
    /// Path to a JSON config file (defaults to ./geofabrik-fetch.json when present)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Rebuild cached catalogue artifacts from the server
    #[arg(long, global = true)]
    refresh: bool,

    /// Answer yes to every confirmation prompt
    #[arg(long, short = 'y', global = true)]
    yes: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Show the server's download index")]
    Index,
    #[command(about = "List every known region name")]
    Names,
    #[command(about = "Show the region-subregion tier")]
    Tier,
    #[command(about = "Show the compacted downloads catalogue")]
    Catalog,
    #[command(about = "Resolve a loosely written region name to its canonical form")]
    Resolve(ResolveArgs),
    #[command(about = "List subregions of regions (all leaf regions when none given)")]
    Subregions(SubregionsArgs),
    #[command(about = "Show the download URL of a region")]
    Url(UrlArgs),
    #[command(about = "Download data extracts of regions")]
    Download(DownloadArgs),
    #[command(about = "Download data extracts of the subregions of regions")]
    DownloadSubregions(DownloadArgs),
}

#[derive(Args)]
struct ResolveArgs {
    query: String,
}

#[derive(Args)]
struct SubregionsArgs {
    names: Vec<String>,

    /// Expand to leaf regions instead of immediate subregions
    #[arg(long)]
    deep: bool,
}

#[derive(Args)]
struct UrlArgs {
    name: String,

    #[arg(long, short = 'f', default_value = ".osm.pbf", ignore_case = true)]
    format: FileFormat,
}

#[derive(Args)]
struct DownloadArgs {
    #[arg(required = true)]
    names: Vec<String>,

    #[arg(long, short = 'f', default_value = ".osm.pbf", ignore_case = true)]
    format: FileFormat,

    /// Write every file into this directory instead of the mirrored layout
    #[arg(long)]
    dir: Option<Utf8PathBuf>,

    /// Re-download files that already exist
    #[arg(long)]
    update: bool,

    /// Fall back to leaf regions rather than immediate subregions
    #[arg(long)]
    deep: bool,

    /// Seconds to wait between regions
    #[arg(long)]
    interval: Option<u64>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<GeofabrikError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &GeofabrikError) -> u8 {
    match error {
        GeofabrikError::UnknownRegion(_)
        | GeofabrikError::RegionNotInTier(_)
        | GeofabrikError::UnknownFormat(_) => 2,
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
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Text
    };

    let config = ConfigLoader::resolve(cli.config.as_deref())?;
    let confirmation_required = config.confirmation_required && !cli.yes;
    let app = build_app(&config, confirmation_required)?;
    let refresh = cli.refresh;

    match cli.command {
        Commands::Index => {
            let index = app.download_index(refresh)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print(&index),
                OutputMode::Text => TextOutput::print_index(&index),
            }
            .into_diagnostic()
        }
        Commands::Names => {
            let names = app.subregion_names(refresh)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print(&names),
                OutputMode::Text => TextOutput::print_lines(&names),
            }
            .into_diagnostic()
        }
        Commands::Tier => {
            let tier = app.region_tier(refresh)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print(&tier),
                OutputMode::Text => TextOutput::print_tier(&tier),
            }
            .into_diagnostic()
        }
        Commands::Catalog => {
            let catalog = app.catalog(refresh)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print(&catalog),
                OutputMode::Text => TextOutput::print_catalog(&catalog),
            }
            .into_diagnostic()
        }
        Commands::Resolve(args) => {
            warm(&app, refresh)?;
            let name = app.resolve_name(&args.query)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print(&name),
                OutputMode::Text => TextOutput::print_lines([name]),
            }
            .into_diagnostic()
        }
        Commands::Subregions(args) => {
            warm(&app, refresh)?;
            let names = app.subregions_of(&args.names, args.deep)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print(&names),
                OutputMode::Text => TextOutput::print_lines(&names),
            }
            .into_diagnostic()
        }
        Commands::Url(args) => {
            warm(&app, refresh)?;
            let found = app.download_url(&args.name, args.format)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print(&found),
                OutputMode::Text => TextOutput::print_url(&found),
            }
            .into_diagnostic()
        }
        Commands::Download(args) => {
            warm(&app, refresh)?;
            let options = download_options(&args, &config, confirmation_required);
            let result = with_sink(output_mode, |sink| {
                app.download(&args.names, args.format, &options, sink)
            })?;
            print_download(&result, output_mode)
        }
        Commands::DownloadSubregions(args) => {
            warm(&app, refresh)?;
            let options = download_options(&args, &config, confirmation_required);
            let result = with_sink(output_mode, |sink| {
                app.download_sub_subregions(&args.names, args.format, &options, sink)
            })?;
            print_download(&result, output_mode)
        }
    }
}

fn build_app(
    config: &ResolvedConfig,
    confirmation_required: bool,
) -> miette::Result<App<GeofabrikHttpClient>> {
    let store = Store::new_with_paths(config.data_dir.clone(), config.cache_dir.clone());
    let client = GeofabrikHttpClient::with_settings(&config.user_agent, config.timeout)?;
    let settings = AppSettings {
        confirmation_required,
        ..AppSettings::from(config)
    };
    let confirm: Box<dyn Confirm> = if confirmation_required {
        Box::new(StdinConfirm)
    } else {
        Box::new(AlwaysConfirm)
    };
    Ok(App::new(store, client, settings).with_confirm(confirm))
}

fn warm(app: &App<GeofabrikHttpClient>, refresh: bool) -> miette::Result<()> {
    if refresh {
        app.subregion_names(true)?;
        app.region_tier(true)?;
        app.catalog(true)?;
    }
    Ok(())
}

fn download_options(
    args: &DownloadArgs,
    config: &ResolvedConfig,
    confirmation_required: bool,
) -> DownloadOptions {
    DownloadOptions {
        download_dir: args.dir.clone(),
        update: args.update,
        confirmation_required,
        deep_retry: args.deep,
        interval: args
            .interval
            .map(Duration::from_secs)
            .unwrap_or(config.interval),
    }
}

fn with_sink<T>(
    output_mode: OutputMode,
    run: impl FnOnce(&dyn ProgressSink) -> Result<T, GeofabrikError>,
) -> miette::Result<T> {
    let result = match output_mode {
        OutputMode::Json => run(&JsonOutput),
        OutputMode::Text => run(&TextOutput),
    }?;
    Ok(result)
}

fn print_download(result: &DownloadResult, output_mode: OutputMode) -> miette::Result<()> {
    match output_mode {
        OutputMode::Json => JsonOutput::print(result),
        OutputMode::Text => TextOutput::print_download(result),
    }
    .into_diagnostic()
}
