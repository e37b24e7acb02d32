use std::process::ExitCode;
use std::sync::Arc;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use datagateway_client::app::{CartResult, DownloadsResult, Gateway};
use datagateway_client::catalog::CatalogHttpClient;
use datagateway_client::config::{ApiConfig, SettingsLoader};
use datagateway_client::domain::{CartEntityType, EntityType};
use datagateway_client::download_api::DownloadHttpClient;
use datagateway_client::error::GatewayError;
use datagateway_client::events::TracingEventSink;
use datagateway_client::ids::{IdsHttpClient, InstantDownload, unpack_download};
use datagateway_client::output::{JsonOutput, OutputMode, TextOutput};
use datagateway_client::query::{AdditionalFilter, Filter, Order};
use datagateway_client::store::{LocalStorage, StaticToken, TokenSource};
use datagateway_client::tracker::{Clock, SubmissionForm, SystemClock};
use datagateway_client::url::ViewParams;

#[derive(Parser)]
#[command(name = "dgw")]
#[command(about = "Browse a data catalog, manage the download cart and track downloads")]
#[command(version, author)]
struct Cli {
    /// Settings document (defaults to datagateway-dataview-settings.json)
    #[arg(long, global = true)]
    settings: Option<String>,

    /// Session token; read from local storage when omitted
    #[arg(long, global = true)]
    token: Option<String>,

    #[arg(long, global = true)]
    json: bool,

    /// Extra attempts for catalog requests that hit 429, 5xx or a connection error
    #[arg(long, global = true)]
    retries: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "List one page of entities")]
    Entities(EntitiesArgs),
    #[command(about = "Count entities matching the filters")]
    Count(QueryArgs),
    #[command(about = "Total file size of an investigation, dataset or datafile")]
    Size(AggregateArgs),
    #[command(about = "Number of datasets in an investigation or datafiles in a dataset")]
    Children(AggregateArgs),
    #[command(about = "Inspect and change the download cart")]
    Cart(CartArgs),
    #[command(about = "Submit, list and fetch downloads")]
    Downloads(DownloadsArgs),
    #[command(about = "Validate the settings document")]
    Settings(SettingsArgs),
}

#[derive(Args, Clone)]
struct QueryArgs {
    #[arg(value_enum)]
    entity_type: EntityType,

    /// `COL=value` (exact), `COL~value` (contains), `COL!~value` (excludes) or `COL:start..end`
    #[arg(long = "filter")]
    filters: Vec<String>,

    /// `COL:asc` or `COL:desc`; repeat for secondary keys
    #[arg(long = "sort")]
    sorts: Vec<String>,

    /// Restrict to children of a parent, e.g. `INVESTIGATION_ID=4`
    #[arg(long = "parent")]
    parents: Vec<String>,

    /// Browser-style query string (`filters=..&sort=..&page=..`)
    #[arg(long)]
    url_query: Option<String>,
}

#[derive(Args)]
struct EntitiesArgs {
    #[command(flatten)]
    query: QueryArgs,

    #[arg(long)]
    page: Option<u64>,

    #[arg(long)]
    results: Option<u64>,
}

#[derive(Args)]
struct AggregateArgs {
    entity_type: CartEntityType,
    entity_id: u64,
}

#[derive(Args)]
struct CartArgs {
    #[command(subcommand)]
    command: CartCommand,
}

#[derive(Subcommand)]
enum CartCommand {
    List,
    Add(CartItemsArgs),
    Remove(CartItemsArgs),
    Clear,
    #[command(about = "Total size and estimated download times")]
    Summary {
        #[arg(long)]
        two_level: bool,
    },
}

#[derive(Args)]
struct CartItemsArgs {
    entity_type: CartEntityType,
    #[arg(required = true)]
    ids: Vec<u64>,
}

#[derive(Args)]
struct DownloadsArgs {
    #[command(subcommand)]
    command: DownloadsCommand,
}

#[derive(Subcommand)]
enum DownloadsCommand {
    List {
        /// `COL~value`, `COL=value` or `createdAt:start..end`
        #[arg(long = "filter")]
        filters: Vec<String>,
        #[arg(long = "sort")]
        sorts: Vec<String>,
    },
    Submit {
        #[arg(long)]
        file_name: Option<String>,
        #[arg(long, default_value = "https")]
        access_method: String,
        #[arg(long)]
        email: Option<String>,
        #[arg(long, default_value = ".")]
        output_dir: Utf8PathBuf,
    },
    Delete {
        download_id: u64,
    },
    Fetch {
        download_id: u64,
        #[arg(long, default_value = ".")]
        output_dir: Utf8PathBuf,
        /// Unpack the archive into <DIR>/<fileName> after downloading
        #[arg(long, value_name = "DIR")]
        extract: Option<Utf8PathBuf>,
    },
}

#[derive(Args)]
struct SettingsArgs {
    #[command(subcommand)]
    command: SettingsCommand,
}

#[derive(Subcommand)]
enum SettingsCommand {
    Check,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<GatewayError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &GatewayError) -> u8 {
    match error {
        GatewayError::DownloadNotFound(_)
        | GatewayError::EntityNotFound(_)
        | GatewayError::SettingsRead(_)
        | GatewayError::SettingsParse(_)
        | GatewayError::InvalidSettings(_) => 2,
        err if err.is_remote() => 3,
        _ => 1,
    }
}

type HttpGateway = Gateway<CatalogHttpClient, DownloadHttpClient>;

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Text
    };

    let mut config = SettingsLoader::resolve(cli.settings.as_deref())?;
    if let Some(retries) = cli.retries {
        config.retries = retries;
    }
    if let Commands::Settings(args) = &cli.command {
        return run_settings(args, &config, mode);
    }

    let token: Arc<dyn TokenSource> = match &cli.token {
        Some(token) => Arc::new(StaticToken::new(token.clone())),
        None => Arc::new(LocalStorage::new()?),
    };
    let catalog = CatalogHttpClient::new(&config, Arc::clone(&token))?;
    let downloads = DownloadHttpClient::new(&config, Arc::clone(&token))?;
    let mut gateway = Gateway::new(config, catalog, downloads, Arc::new(TracingEventSink));

    match cli.command {
        Commands::Entities(args) => run_entities(&gateway, args, mode),
        Commands::Count(args) => {
            let params = view_params(&args, None, None)?;
            let parents = parent_filters(&args.parents)?;
            let result = gateway.count(args.entity_type, params.query, parents)?;
            match mode {
                OutputMode::Json => JsonOutput::print(&result).into_diagnostic()?,
                OutputMode::Text => TextOutput::print_count(&result),
            }
            Ok(())
        }
        Commands::Size(args) => {
            let result = gateway.size(args.entity_type, args.entity_id)?;
            match mode {
                OutputMode::Json => JsonOutput::print(&result).into_diagnostic()?,
                OutputMode::Text => TextOutput::print_aggregate("size", &result),
            }
            Ok(())
        }
        Commands::Children(args) => {
            let result = gateway.child_count(args.entity_type, args.entity_id)?;
            match mode {
                OutputMode::Json => JsonOutput::print(&result).into_diagnostic()?,
                OutputMode::Text => TextOutput::print_aggregate("children", &result),
            }
            Ok(())
        }
        Commands::Cart(args) => run_cart(&mut gateway, args.command, mode),
        Commands::Downloads(args) => {
            let session = token.token();
            run_downloads(&mut gateway, args.command, session, mode)
        }
        Commands::Settings(_) => Ok(()),
    }
}

fn run_settings(args: &SettingsArgs, config: &ApiConfig, mode: OutputMode) -> miette::Result<()> {
    match args.command {
        SettingsCommand::Check => {
            datagateway_client::events::register_routes(config, &TracingEventSink);
            match mode {
                OutputMode::Json => JsonOutput::print(&serde_json::json!({
                    "facilityName": config.facility_name,
                    "apiUrl": config.api_url,
                    "downloadApiUrl": config.download_api_url,
                    "idsUrl": config.ids_url,
                    "routes": config.routes.len(),
                    "accessMethods": config
                        .access_methods
                        .iter()
                        .map(|method| method.name.clone())
                        .collect::<Vec<_>>(),
                }))
                .into_diagnostic()?,
                OutputMode::Text => {
                    println!("facility: {}", config.facility_name);
                    println!("catalog API: {}", config.api_url);
                    println!("download API: {}", config.download_api_url);
                    println!("IDS: {}", config.ids_url);
                    println!("routes: {}", config.routes.len());
                }
            }
            Ok(())
        }
    }
}

fn run_entities(gateway: &HttpGateway, args: EntitiesArgs, mode: OutputMode) -> miette::Result<()> {
    let params = view_params(&args.query, args.page, args.results)?;
    let parents = parent_filters(&args.query.parents)?;
    let page = gateway.entities(args.query.entity_type, &params, parents)?;
    match mode {
        OutputMode::Json => JsonOutput::print(&page).into_diagnostic()?,
        OutputMode::Text => {
            TextOutput::print_page(&page);
            eprintln!("url query: {}", params.to_query_string()?);
        }
    }
    Ok(())
}

fn run_cart(gateway: &mut HttpGateway, command: CartCommand, mode: OutputMode) -> miette::Result<()> {
    match command {
        CartCommand::Summary { two_level } => {
            gateway.refresh_cart()?;
            let summary = gateway.cart_summary(two_level)?;
            match mode {
                OutputMode::Json => JsonOutput::print(&summary).into_diagnostic()?,
                OutputMode::Text => TextOutput::print_cart_summary(&summary),
            }
            return Ok(());
        }
        CartCommand::List => {
            gateway.refresh_cart()?;
        }
        CartCommand::Add(args) => {
            gateway.refresh_cart()?;
            gateway.add_to_cart(args.entity_type, &args.ids)?;
        }
        CartCommand::Remove(args) => {
            gateway.refresh_cart()?;
            gateway.remove_from_cart(args.entity_type, &args.ids)?;
        }
        CartCommand::Clear => {
            gateway.clear_cart()?;
        }
    }
    let result = CartResult {
        items: gateway.cart().items().to_vec(),
    };
    match mode {
        OutputMode::Json => JsonOutput::print(&result).into_diagnostic()?,
        OutputMode::Text => TextOutput::print_cart(&result),
    }
    Ok(())
}

fn run_downloads(
    gateway: &mut HttpGateway,
    command: DownloadsCommand,
    session: Option<String>,
    mode: OutputMode,
) -> miette::Result<()> {
    let clock = SystemClock;
    match command {
        DownloadsCommand::List { filters, sorts } => {
            let mut table = gateway.status_table();
            for raw in &filters {
                let (column, filter) = parse_filter(raw)?;
                table.set_filter(&column, Some(filter));
            }
            for raw in &sorts {
                let (column, order) = parse_sort(raw)?;
                table.set_sort(&column, Some(order));
            }
            table.load(&clock);
            if let Some(err) = table.error() {
                return Err(GatewayError::Fetch(err.to_string()).into());
            }
            let result = DownloadsResult {
                downloads: table.visible(clock.now()).into_iter().cloned().collect(),
            };
            match mode {
                OutputMode::Json => JsonOutput::print(&result).into_diagnostic()?,
                OutputMode::Text => TextOutput::print_downloads(&result),
            }
            Ok(())
        }
        DownloadsCommand::Submit {
            file_name,
            access_method,
            email,
            output_dir,
        } => {
            gateway.refresh_cart()?;
            let ids_url = gateway.config().ids_url_for(&access_method).to_string();
            let instant = IdsHttpClient::new(&ids_url, session, output_dir)?;
            let form = SubmissionForm {
                file_name: file_name.unwrap_or_default(),
                access_method,
                email: email.unwrap_or_default(),
            };
            let state = gateway.submit(Arc::new(instant), Arc::new(clock), &form)?;
            match mode {
                OutputMode::Json => JsonOutput::print(&state).into_diagnostic()?,
                OutputMode::Text => TextOutput::print_submission(&state),
            }
            Ok(())
        }
        DownloadsCommand::Delete { download_id } => {
            let mut table = gateway.status_table();
            table.delete(download_id)?;
            if mode == OutputMode::Json {
                JsonOutput::print(&serde_json::json!({ "deleted": download_id }))
                    .into_diagnostic()?;
            } else {
                println!("deleted download {download_id}");
            }
            Ok(())
        }
        DownloadsCommand::Fetch {
            download_id,
            output_dir,
            extract,
        } => {
            let download = gateway.download(download_id)?;
            let ids_url = gateway.config().ids_url_for(&download.transport).to_string();
            let instant = IdsHttpClient::new(&ids_url, session, output_dir)?;
            instant.start(&download)?;
            let archive = instant.archive_path(&download);
            let unpacked = match extract {
                Some(root) => Some(unpack_download(&download, &archive, &root)?),
                None => None,
            };
            if mode == OutputMode::Json {
                JsonOutput::print(&serde_json::json!({
                    "archive": archive.as_str(),
                    "unpacked": unpacked,
                }))
                .into_diagnostic()?;
            } else {
                println!("saved {archive}");
                if let Some(unpacked) = unpacked {
                    println!(
                        "unpacked {} files ({} bytes) into {}",
                        unpacked.files, unpacked.bytes, unpacked.directory
                    );
                }
            }
            Ok(())
        }
    }
}

fn view_params(
    args: &QueryArgs,
    page: Option<u64>,
    results: Option<u64>,
) -> miette::Result<ViewParams> {
    let mut params = match &args.url_query {
        Some(query) => ViewParams::parse(query)?,
        None => ViewParams::default(),
    };
    for raw in &args.filters {
        let (column, filter) = parse_filter(raw)?;
        params.query.set_filter(&column, Some(filter));
    }
    for raw in &args.sorts {
        let (column, order) = parse_sort(raw)?;
        params.query.set_sort(&column, Some(order));
    }
    if page.is_some() {
        params.page = page;
    }
    if results.is_some() {
        params.results = results;
    }
    Ok(params)
}

fn parse_filter(raw: &str) -> Result<(String, Filter), GatewayError> {
    let invalid = || GatewayError::InvalidFilter(raw.to_string());
    let split = raw.find(['~', '=', ':']).ok_or_else(invalid)?;
    let (column, rest) = raw.split_at(split);
    let column = column.trim();
    if column.is_empty() {
        return Err(invalid());
    }
    if let Some(column) = column.strip_suffix('!') {
        let value = rest.strip_prefix('~').ok_or_else(invalid)?;
        return Ok((column.to_string(), Filter::exclude(value)));
    }
    let filter = match rest.chars().next() {
        Some('~') => Filter::include(&rest[1..]),
        Some('=') => Filter::exact(&rest[1..]),
        Some(':') => {
            let (start, end) = rest[1..].split_once("..").ok_or_else(invalid)?;
            let bound = |value: &str| (!value.is_empty()).then(|| value.to_string());
            Filter::date_range(bound(start).as_deref(), bound(end).as_deref())
        }
        _ => return Err(invalid()),
    };
    Ok((column.to_string(), filter))
}

fn parse_sort(raw: &str) -> Result<(String, Order), GatewayError> {
    let (column, order) = raw
        .rsplit_once(':')
        .ok_or_else(|| GatewayError::InvalidSort(raw.to_string()))?;
    Ok((column.to_string(), order.parse()?))
}

fn parent_filters(raw: &[String]) -> Result<Vec<AdditionalFilter>, GatewayError> {
    raw.iter()
        .map(|entry| {
            let invalid = || GatewayError::InvalidFilter(entry.clone());
            let (column, id) = entry.split_once('=').ok_or_else(invalid)?;
            let id: u64 = id.trim().parse().map_err(|_| invalid())?;
            Ok(AdditionalFilter::eq(column.trim(), id))
        })
        .collect()
}
