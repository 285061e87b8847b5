use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use dimsum_prep::client::{ClientOptions, SampleClient};
use dimsum_prep::config::{ConfigLoader, ResolvedConfig};
use dimsum_prep::domain::SampleKey;
use dimsum_prep::error::PrepError;
use dimsum_prep::output::{JsonOutput, StatusReport};
use dimsum_prep::registry::SqliteRegistry;
use dimsum_prep::sheets::SheetsHttpClient;

#[derive(Parser)]
#[command(name = "dimsum-prep")]
#[command(about = "Consolidated DiMSum sample metadata from the sample registry and sheets")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Print the consolidated library tree for a sponsor")]
    Info(InfoArgs),
    #[command(about = "Print the library holding the given samples (SAMPLE_ID.RUN_ID)")]
    Select(SelectArgs),
    #[command(about = "Prefetch the configured sponsors once and report their health")]
    Status,
}

#[derive(Args)]
struct InfoArgs {
    #[arg(long)]
    sponsor: String,
}

#[derive(Args)]
struct SelectArgs {
    #[arg(long)]
    sponsor: String,

    #[arg(required = true)]
    keys: Vec<String>,
}

type Client = SampleClient<SqliteRegistry, SheetsHttpClient>;

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<PrepError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &PrepError) -> u8 {
    match error {
        PrepError::NoSamplesRequested
        | PrepError::SamplesNotFound
        | PrepError::NotAllSamplesInSameExperiment
        | PrepError::InvalidSampleKey(_)
        | PrepError::MissingConfig
        | PrepError::ConfigRead(_)
        | PrepError::ConfigParse(_)
        | PrepError::MissingConfigValue(_) => 2,
        PrepError::Registry(_)
        | PrepError::RegistryClosed
        | PrepError::SheetsHttp(_)
        | PrepError::SheetsStatus { .. }
        | PrepError::NoSheetData(_)
        | PrepError::MissingColumn { .. }
        | PrepError::MissingLibrary(_)
        | PrepError::MissingExperiment(_)
        | PrepError::InvalidCell { .. } => 3,
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
    let resolved = ConfigLoader::resolve(cli.config.as_deref())?;

    match cli.command {
        Commands::Info(args) => {
            let client = build_client(&resolved, Vec::new())?;
            let result = client.for_sponsor(&args.sponsor);
            client.close()?;
            let libraries = result?;
            JsonOutput::print_libraries(&libraries)?;
            Ok(())
        }
        Commands::Select(args) => {
            let keys = args
                .keys
                .iter()
                .map(|key| key.parse::<SampleKey>())
                .collect::<Result<Vec<_>, _>>()?;
            let client = build_client(&resolved, Vec::new())?;
            let result = client.for_sponsor(&args.sponsor);
            client.close()?;
            let library = result?.subset(&keys)?;
            JsonOutput::print_library(&library)?;
            Ok(())
        }
        Commands::Status => {
            let client = build_client(&resolved, resolved.prefetch.clone())?;
            let report = StatusReport {
                prefetch: resolved.prefetch.clone(),
                cache_lifetime_secs: client.cache_lifetime().as_secs(),
                last_prefetch_success: client.last_prefetch_success(),
                last_error: client.last_error().map(|err| err.to_string()),
            };
            client.close()?;
            JsonOutput::print_status(&report)?;
            Ok(())
        }
    }
}

fn build_client(resolved: &ResolvedConfig, prefetch: Vec<String>) -> miette::Result<Client> {
    let registry = SqliteRegistry::open(&resolved.registry)?;
    let sheets = SheetsHttpClient::new(&resolved.sheets_base_url)?;
    let options = ClientOptions {
        sheet_id: resolved.sheet_id.clone(),
        cache_lifetime: resolved.cache_lifetime,
        prefetch,
    };
    Ok(SampleClient::new(registry, sheets, options)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_error_class() {
        assert_eq!(map_exit_code(&PrepError::SamplesNotFound), 2);
        assert_eq!(map_exit_code(&PrepError::MissingConfig), 2);
        assert_eq!(
            map_exit_code(&PrepError::InvalidSampleKey("nodot".to_string())),
            2
        );
        assert_eq!(map_exit_code(&PrepError::RegistryClosed), 3);
        assert_eq!(
            map_exit_code(&PrepError::SheetsStatus {
                status: 503,
                message: "unavailable".to_string(),
            }),
            3
        );
        assert_eq!(map_exit_code(&PrepError::Output("closed pipe".to_string())), 1);
    }

    #[test]
    fn select_requires_keys() {
        assert!(Cli::try_parse_from(["dimsum-prep", "select", "--sponsor", "Ben Lehner"]).is_err());

        let cli = Cli::try_parse_from([
            "dimsum-prep",
            "--config",
            "alt.json",
            "select",
            "--sponsor",
            "Ben Lehner",
            "6174STDY1.49920",
        ])
        .unwrap();
        assert_eq!(cli.config.as_deref(), Some("alt.json"));
        assert!(matches!(
            cli.command,
            Commands::Select(SelectArgs { ref keys, .. }) if keys == &["6174STDY1.49920"]
        ));
    }
}
