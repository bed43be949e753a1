use anyhow::{Context, Result};
use appstore_sales::{
    config::Settings,
    render::{
        write_apps_csv, write_apps_table, write_comparison_csv, write_json, write_report_csv,
        write_trends_csv,
    },
    MemoryCache, Period, ReportOptions, ReportType, ReqwestClient, SalesService, TokenManager,
    Transport, TrendOptions,
};
use chrono::{NaiveDate, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::Level;

use std::{future::Future, io, path::PathBuf, str::FromStr, sync::Arc, time::Duration};

#[derive(Parser)]
#[command(version, about = "App Store Connect sales reports")]
struct Cli {
    /// JSON settings file.
    #[arg(long, short, env = "APPSTORE_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, env = "APPSTORE_KEY_ID")]
    key_id: Option<String>,

    #[arg(long, env = "APPSTORE_ISSUER_ID")]
    issuer_id: Option<String>,

    /// PKCS#8 private key text.
    #[arg(long, env = "APPSTORE_PRIVATE_KEY", hide_env_values = true)]
    private_key: Option<String>,

    #[arg(long, env = "APPSTORE_PRIVATE_KEY_PATH")]
    private_key_path: Option<PathBuf>,

    #[arg(long, env = "APPSTORE_VENDOR_NUMBER")]
    vendor: Option<String>,

    #[arg(long, env = "APPSTORE_BASE_URL")]
    base_url: Option<String>,

    /// Per-report timeout in seconds.
    #[arg(long)]
    timeout: Option<u64>,

    /// trace, debug, info, warn or error.
    #[arg(long, env = "APPSTORE_LOG")]
    log_level: Option<String>,

    /// Always fetch from the API.
    #[arg(long)]
    no_cache: bool,

    #[arg(long, value_enum, default_value_t = Format::Table)]
    format: Format,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Format {
    Table,
    Json,
    Csv,
}

#[derive(Args)]
struct ReportArgs {
    #[arg(long, default_value_t = Period::Daily)]
    period: Period,

    /// YYYY-MM-DD, YYYY-MM or YYYY. Defaults to the latest full period.
    #[arg(long)]
    date: Option<String>,

    #[arg(long = "type", default_value_t = ReportType::Sales)]
    report_type: ReportType,
}

impl ReportArgs {
    fn date(&self) -> Result<NaiveDate> {
        match &self.date {
            Some(date) => Ok(self.period.parse_date(date)?),
            None => self
                .period
                .previous(Utc::now().date_naive())
                .context("no period before today"),
        }
    }

    fn options(&self, vendor: &str, no_cache: bool) -> Result<ReportOptions> {
        let mut options = ReportOptions::new(self.period, self.date()?, self.report_type, vendor);
        options.no_cache = no_cache;
        Ok(options)
    }
}

#[derive(Subcommand)]
enum Command {
    /// Show the sales report for one period.
    Report {
        #[command(flatten)]
        args: ReportArgs,

        /// Compare with the previous period.
        #[arg(long)]
        analyze: bool,
    },
    /// Compare a period with an earlier one.
    Compare {
        #[command(flatten)]
        args: ReportArgs,

        /// The earlier period. Defaults to the one before --date.
        #[arg(long)]
        previous: Option<String>,
    },
    /// Show trends over consecutive periods ending at --date.
    Trends {
        #[command(flatten)]
        args: ReportArgs,

        #[arg(long, default_value_t = 6)]
        periods: u32,
    },
    /// Look up the apps the API key can see.
    Apps {
        #[command(subcommand)]
        command: AppsCommand,
    },
    /// Check the API key.
    Auth {
        #[command(subcommand)]
        command: AuthCommand,
    },
    /// Check the settings.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Subcommand)]
enum AppsCommand {
    List {
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },
    /// Show one app by its Apple identifier.
    Info { id: String },
}

#[derive(Subcommand)]
enum AuthCommand {
    /// Sign a token and make one API call with it.
    Test,
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Check that every setting is present, then call the API once.
    Validate,
}

impl Cli {
    fn settings(&self) -> Result<Settings> {
        let file = match &self.config {
            Some(path) => Settings::read_config_file(path)?,
            None => Settings::default(),
        };
        Ok(file.merge(Settings {
            key_id: self.key_id.clone(),
            issuer_id: self.issuer_id.clone(),
            private_key: self.private_key.clone(),
            private_key_path: self.private_key_path.clone(),
            vendor_number: self.vendor.clone(),
            base_url: self.base_url.clone(),
            timeout: self.timeout.map(Duration::from_secs),
            log_level: self.log_level.clone(),
            ..Settings::default()
        }))
    }
}

fn init_logging(log_level: Option<&str>) -> Result<()> {
    let level = match log_level {
        Some(level) => Level::from_str(level).with_context(|| format!("bad log level {level}"))?,
        None => Level::WARN,
    };
    let subscriber = tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_target(false)
        .with_max_level(level)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// Runs `call` under the configured timeout.
async fn deadline<T>(
    timeout: Duration,
    call: impl Future<Output = appstore_sales::Result<T>>,
) -> Result<T> {
    Ok(tokio::time::timeout(timeout, call)
        .await
        .map_err(|_| appstore_sales::Error::Timeout(timeout))??)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = cli.settings()?;
    init_logging(settings.log_level.as_deref())?;

    if let Command::Config {
        command: ConfigCommand::Validate,
    } = &cli.command
    {
        settings.validate()?;
    }

    let tokens = Arc::new(TokenManager::new(settings.credentials()?));
    let transport = Transport::new(
        Arc::new(ReqwestClient::default()),
        tokens.clone(),
        settings.base_url(),
    );
    let config = settings.service_config();
    let timeout = config.timeout;

    match &cli.command {
        Command::Apps {
            command: AppsCommand::List { limit },
        } => {
            let apps = deadline(timeout, transport.list_apps(*limit))
                .await
                .context("listing apps")?;
            match cli.format {
                Format::Table => write_apps_table(&apps, io::stdout().lock())?,
                Format::Json => write_json(&apps, io::stdout().lock())?,
                Format::Csv => write_apps_csv(&apps, io::stdout().lock())?,
            }
            return Ok(());
        }
        Command::Apps {
            command: AppsCommand::Info { id },
        } => {
            let app = deadline(timeout, transport.get_app(id))
                .await
                .with_context(|| format!("fetching app {id}"))?;
            let apps = [app];
            match cli.format {
                Format::Table => write_apps_table(&apps, io::stdout().lock())?,
                Format::Json => write_json(&apps[0], io::stdout().lock())?,
                Format::Csv => write_apps_csv(&apps, io::stdout().lock())?,
            }
            return Ok(());
        }
        Command::Auth {
            command: AuthCommand::Test,
        } => {
            let token = tokens.get_token().context("signing token")?;
            deadline(timeout, transport.check_connection())
                .await
                .context("calling the API with the signed token")?;
            let prefix: String = token.chars().take(40).collect();
            println!("Authentication successful! Token: {prefix}...");
            return Ok(());
        }
        Command::Config {
            command: ConfigCommand::Validate,
        } => {
            deadline(timeout, transport.check_connection())
                .await
                .context("calling the API with these settings")?;
            println!("Configuration is valid");
            return Ok(());
        }
        _ => {}
    }

    let vendor = settings.vendor_number()?;
    let service = SalesService::new(
        transport,
        Some(Arc::new(MemoryCache::default())),
        config,
    );

    match &cli.command {
        Command::Report { args, analyze } => {
            let mut options = args.options(vendor, cli.no_cache)?;
            options.include_analysis = *analyze;
            let Some(report) = service
                .get_report(&options)
                .await
                .context("fetching sales report")?
            else {
                println!("No sales for {}", options.format_date());
                return Ok(());
            };
            match cli.format {
                Format::Table => print!("{report}"),
                Format::Json => write_json(&*report, io::stdout().lock())?,
                Format::Csv => write_report_csv(&report, io::stdout().lock())?,
            }
        }
        Command::Compare { args, previous } => {
            let current = args.options(vendor, cli.no_cache)?;
            let previous = match previous {
                Some(date) => {
                    let mut options = current.clone();
                    options.date = args.period.parse_date(date)?;
                    options
                }
                None => current.previous().context("no period before --date")?,
            };
            let comparison = service
                .get_comparison(&current, &previous)
                .await
                .context("comparing sales reports")?;
            match cli.format {
                Format::Table => print!("{comparison}"),
                Format::Json => write_json(&comparison, io::stdout().lock())?,
                Format::Csv => write_comparison_csv(&comparison, io::stdout().lock())?,
            }
        }
        Command::Trends { args, periods } => {
            let options = TrendOptions {
                frequency: args.period,
                end_date: args.date()?,
                periods: *periods,
                report_type: args.report_type,
                vendor_number: vendor.to_string(),
                ..TrendOptions::default()
            };
            let trend = service
                .get_trends(&options)
                .await
                .context("fetching sales trends")?;
            match cli.format {
                Format::Table => print!("{trend}"),
                Format::Json => write_json(&trend, io::stdout().lock())?,
                Format::Csv => write_trends_csv(&trend, io::stdout().lock())?,
            }
        }
        Command::Apps { .. } | Command::Auth { .. } | Command::Config { .. } => {}
    }
    Ok(())
}
