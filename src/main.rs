use anyhow::{bail, Context as _, Result};
use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use serego::config::Config;
use serego::filter::AddressFamily;
use serego::gcp::auth::validate_project_id;
use serego::gcp::http::format_gcp_error;
use serego::gcp::{ServiceDirectoryBackend, ServiceDirectoryClient};
use serego::registry::endpoint::EndpointFields;
use serego::registry::namespace::NamespaceFields;
use serego::registry::service::ServiceFields;
use serego::{
    Context, GetOptions, ListOptions, Metadata, RegistryConfig, ResourcePath, ServiceRegistry,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Command line for Google Cloud Service Directory
#[derive(Parser, Debug)]
#[command(name = "serego", version, about, long_about = None)]
struct Args {
    /// GCP project to use
    #[arg(short, long, global = true)]
    project: Option<String>,

    /// Service Directory region
    #[arg(short, long, global = true)]
    location: Option<String>,

    /// Log level for debugging
    #[arg(long, value_enum, default_value = "off", global = true)]
    log_level: LogLevel,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table", global = true)]
    output: Output,

    /// Cache TTL in seconds (0 disables the cache)
    #[arg(long, global = true)]
    cache_ttl: Option<u64>,

    /// Page size used for listings
    #[arg(long, global = true)]
    page_size: Option<u32>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show one namespace, service or endpoint
    Get {
        /// `ns`, `ns/svc` or `ns/svc/ep`
        path: String,
    },
    /// List namespaces, the services of `ns`, or the endpoints of `ns/svc`
    List {
        path: Option<String>,
        #[command(flatten)]
        filters: ListFilters,
    },
    /// Create a namespace, service or endpoint
    Create {
        path: String,
        #[command(flatten)]
        fields: FieldArgs,
    },
    /// Replace the mutable fields of a namespace, service or endpoint
    Update {
        path: String,
        #[command(flatten)]
        fields: FieldArgs,
    },
    /// Delete a namespace, service or endpoint
    Delete { path: String },
    /// Show a service together with all of its endpoints, in one call
    Resolve {
        /// `ns/svc`
        path: String,
    },
    /// Show the effective settings
    Config {
        /// Persist the effective project and location
        #[arg(long)]
        save: bool,
    },
}

#[derive(ClapArgs, Debug, Default)]
struct ListFilters {
    /// Only names starting with this prefix
    #[arg(long, conflicts_with = "name")]
    prefix: Option<String>,

    /// Only these names
    #[arg(long)]
    name: Vec<String>,

    /// Required metadata, `key=value` or `key` for presence only
    #[arg(long, value_parser = parse_key_value, conflicts_with = "no_metadata")]
    metadata: Vec<(String, String)>,

    /// Only resources without metadata
    #[arg(long)]
    no_metadata: bool,

    /// Endpoints inside this network
    #[arg(long)]
    cidr: Option<String>,

    /// IPv4 endpoints only
    #[arg(long, conflicts_with = "ipv6")]
    ipv4: bool,

    /// IPv6 endpoints only
    #[arg(long)]
    ipv6: bool,

    /// Endpoints on these ports
    #[arg(long)]
    port: Vec<u16>,

    /// Endpoints within `lo-hi`
    #[arg(long, value_parser = parse_port_range)]
    port_range: Vec<(u16, u16)>,
}

#[derive(ClapArgs, Debug, Default)]
struct FieldArgs {
    /// Metadata entry, `key=value`
    #[arg(long, value_parser = parse_key_value)]
    metadata: Vec<(String, String)>,

    /// Endpoint address
    #[arg(long)]
    address: Option<String>,

    /// Endpoint port
    #[arg(long)]
    port: Option<u16>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Option<Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(Level::ERROR),
            LogLevel::Warn => Some(Level::WARN),
            LogLevel::Info => Some(Level::INFO),
            LogLevel::Debug => Some(Level::DEBUG),
            LogLevel::Trace => Some(Level::TRACE),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Output {
    Table,
    Json,
    Yaml,
}

fn parse_key_value(s: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = s.split_once('=').unwrap_or((s, ""));
    if key.is_empty() {
        return Err(format!("invalid metadata entry '{}': empty key", s));
    }
    Ok((key.to_string(), value.to_string()))
}

fn parse_port_range(s: &str) -> std::result::Result<(u16, u16), String> {
    let (lo, hi) = s
        .split_once('-')
        .ok_or_else(|| format!("invalid port range '{}': expected lo-hi", s))?;
    let lo = lo.trim().parse().map_err(|e| format!("invalid port '{}': {}", lo, e))?;
    let hi = hi.trim().parse().map_err(|e| format!("invalid port '{}': {}", hi, e))?;
    Ok((lo, hi))
}

fn setup_logging(level: LogLevel) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let tracing_level = level.to_tracing_level()?;

    let log_path = get_log_path();

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
    {
        Ok(file) => file,
        Err(err) => {
            eprintln!("Failed to open log file {:?}: {}", log_path, err);
            return None;
        }
    };

    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    tracing_subscriber::fmt()
        .with_max_level(tracing_level)
        .with_writer(non_blocking.with_max_level(tracing_level))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("serego started with log level: {:?}", level);
    tracing::info!("Log file: {:?}", log_path);

    Some(guard)
}

fn get_log_path() -> PathBuf {
    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("serego").join("serego.log");
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".serego").join("serego.log");
    }
    PathBuf::from("serego.log")
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_guard = setup_logging(args.log_level);

    if let Err(err) = run(args).await {
        tracing::error!("command failed: {:#}", err);
        eprintln!("Error: {}", format_gcp_error(&err));
        drop(log_guard);
        std::process::exit(1);
    }

    Ok(())
}

async fn run(args: Args) -> Result<()> {
    let mut config = Config::load();
    let project = config.effective_project(args.project.as_deref());
    let location = config.effective_location(args.location.as_deref());

    if let Command::Config { save } = &args.command {
        if *save {
            config.project_id = Some(project.clone()).filter(|p| !p.is_empty());
            config.location = Some(location.clone());
            config.save()?;
        }
        println!("project:   {}", project);
        println!("location:  {}", location);
        println!("cache ttl: {:?}", config.effective_cache_ttl(args.cache_ttl));
        println!("page size: {}", config.effective_page_size(args.page_size));
        if let Some(path) = Config::config_path() {
            println!("file:      {}", path.display());
        }
        return Ok(());
    }

    if project.is_empty() {
        bail!("No project configured. Use --project or set CLOUDSDK_CORE_PROJECT.");
    }
    if !validate_project_id(&project) {
        bail!("Invalid project ID: {}", project);
    }

    let client = ServiceDirectoryClient::new(&project, &location).await?;
    let backend = Arc::new(ServiceDirectoryBackend::new(client));
    let registry = ServiceRegistry::builder()
        .backend(backend.clone())
        .config(RegistryConfig {
            cache_ttl: config.effective_cache_ttl(args.cache_ttl),
            default_page_size: config.effective_page_size(args.page_size),
            ..Default::default()
        })
        .build()?;

    let ctx = Context::background();
    let canceller = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted, cancelling");
            canceller.cancel();
        }
    });

    if let Command::Resolve { path } = &args.command {
        let ResourcePath::Service { namespace, service } = parse_path(path)? else {
            bail!("resolve expects a service path, ns/svc");
        };
        let (svc, endpoints) = ctx.run(backend.resolve_service(&namespace, &service)).await?;
        print_items(&[svc], args.output)?;
        return print_items(&endpoints, args.output);
    }

    execute(&registry, &ctx, args.command, args.output).await
}

fn parse_path(text: &str) -> Result<ResourcePath> {
    ResourcePath::parse(text)
        .with_context(|| format!("Invalid path '{}': expected ns, ns/svc or ns/svc/ep", text))
}

fn to_metadata(entries: Vec<(String, String)>) -> Metadata {
    entries.into_iter().collect()
}

async fn execute(
    registry: &ServiceRegistry,
    ctx: &Context,
    command: Command,
    output: Output,
) -> Result<()> {
    match command {
        Command::Get { path } => match parse_path(&path)? {
            ResourcePath::Namespace { namespace } => {
                let ns = registry.namespace(namespace).get(ctx, GetOptions::default()).await?;
                print_items(&[ns], output)
            }
            ResourcePath::Service { namespace, service } => {
                let svc = registry
                    .namespace(namespace)
                    .service(service)
                    .get(ctx, GetOptions::default())
                    .await?;
                print_items(&[svc], output)
            }
            ResourcePath::Endpoint {
                namespace,
                service,
                endpoint,
            } => {
                let ep = registry
                    .namespace(namespace)
                    .service(service)
                    .endpoint(endpoint)
                    .get(ctx, GetOptions::default())
                    .await?;
                print_items(&[ep], output)
            }
        },

        Command::List { path, filters } => {
            let options = list_options(filters);
            match path.as_deref().map(parse_path).transpose()? {
                None => {
                    let items = registry.namespaces().list(&options).collect_all(ctx).await?;
                    print_items(&items, output)
                }
                Some(ResourcePath::Namespace { namespace }) => {
                    let items = registry
                        .namespace(namespace)
                        .services()
                        .list(&options)
                        .collect_all(ctx)
                        .await?;
                    print_items(&items, output)
                }
                Some(ResourcePath::Service { namespace, service }) => {
                    let items = registry
                        .namespace(namespace)
                        .service(service)
                        .endpoints()
                        .list(&options)
                        .collect_all(ctx)
                        .await?;
                    print_items(&items, output)
                }
                Some(ResourcePath::Endpoint { .. }) => bail!("Endpoints have no children to list"),
            }
        }

        Command::Create { path, fields } => {
            let metadata = to_metadata(fields.metadata);
            match parse_path(&path)? {
                ResourcePath::Namespace { namespace } => {
                    let ns = registry
                        .namespace(namespace)
                        .create(ctx, NamespaceFields { metadata })
                        .await?;
                    print_items(&[ns], output)
                }
                ResourcePath::Service { namespace, service } => {
                    let svc = registry
                        .namespace(namespace)
                        .service(service)
                        .create(ctx, ServiceFields { metadata })
                        .await?;
                    print_items(&[svc], output)
                }
                ResourcePath::Endpoint {
                    namespace,
                    service,
                    endpoint,
                } => {
                    let fields = EndpointFields {
                        address: fields.address.unwrap_or_default(),
                        port: fields.port.unwrap_or(0),
                        metadata,
                    };
                    let ep = registry
                        .namespace(namespace)
                        .service(service)
                        .endpoint(endpoint)
                        .create(ctx, fields)
                        .await?;
                    print_items(&[ep], output)
                }
            }
        }

        Command::Update { path, fields } => {
            let metadata = to_metadata(fields.metadata);
            match parse_path(&path)? {
                ResourcePath::Namespace { namespace } => {
                    let ns = registry
                        .namespace(namespace)
                        .update(ctx, NamespaceFields { metadata })
                        .await?;
                    print_items(&[ns], output)
                }
                ResourcePath::Service { namespace, service } => {
                    let svc = registry
                        .namespace(namespace)
                        .service(service)
                        .update(ctx, ServiceFields { metadata })
                        .await?;
                    print_items(&[svc], output)
                }
                ResourcePath::Endpoint {
                    namespace,
                    service,
                    endpoint,
                } => {
                    let fields = EndpointFields {
                        address: fields.address.unwrap_or_default(),
                        port: fields.port.unwrap_or(0),
                        metadata,
                    };
                    let ep = registry
                        .namespace(namespace)
                        .service(service)
                        .endpoint(endpoint)
                        .update(ctx, fields)
                        .await?;
                    print_items(&[ep], output)
                }
            }
        }

        Command::Delete { path } => {
            match parse_path(&path)? {
                ResourcePath::Namespace { namespace } => {
                    registry.namespace(namespace).delete(ctx).await?
                }
                ResourcePath::Service { namespace, service } => {
                    registry.namespace(namespace).service(service).delete(ctx).await?
                }
                ResourcePath::Endpoint {
                    namespace,
                    service,
                    endpoint,
                } => {
                    registry
                        .namespace(namespace)
                        .service(service)
                        .endpoint(endpoint)
                        .delete(ctx)
                        .await?
                }
            }
            println!("deleted {}", path);
            Ok(())
        }

        Command::Config { .. } | Command::Resolve { .. } => Ok(()),
    }
}

fn list_options(filters: ListFilters) -> ListOptions {
    let mut options = ListOptions::default();

    if !filters.name.is_empty() {
        options = options.with_names(filters.name);
    }
    if let Some(prefix) = filters.prefix {
        options = options.with_prefix(prefix);
    }
    for (key, value) in filters.metadata {
        options = options.with_metadata(key, value);
    }
    if filters.no_metadata {
        options = options.without_metadata();
    }
    if let Some(cidr) = filters.cidr {
        options = options.with_cidr(cidr);
    }
    if filters.ipv4 {
        options = options.with_family(AddressFamily::IPv4);
    }
    if filters.ipv6 {
        options = options.with_family(AddressFamily::IPv6);
    }
    if !filters.port.is_empty() {
        options = options.with_ports(filters.port);
    }
    for (lo, hi) in filters.port_range {
        options = options.with_port_range(lo, hi);
    }

    options
}

/// Table rendering of one resource kind
trait Row {
    const HEADER: &'static [&'static str];
    fn cells(&self) -> Vec<String>;
}

fn format_metadata(metadata: &Metadata) -> String {
    let mut entries: Vec<_> = metadata.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
    entries.sort();
    entries.join(",")
}

impl Row for serego::Namespace {
    const HEADER: &'static [&'static str] = &["NAME", "METADATA"];

    fn cells(&self) -> Vec<String> {
        vec![self.name.clone(), format_metadata(&self.metadata)]
    }
}

impl Row for serego::Service {
    const HEADER: &'static [&'static str] = &["NAMESPACE", "NAME", "METADATA"];

    fn cells(&self) -> Vec<String> {
        vec![
            self.namespace.clone(),
            self.name.clone(),
            format_metadata(&self.metadata),
        ]
    }
}

impl Row for serego::Endpoint {
    const HEADER: &'static [&'static str] =
        &["NAMESPACE", "SERVICE", "NAME", "ADDRESS", "PORT", "METADATA"];

    fn cells(&self) -> Vec<String> {
        vec![
            self.namespace.clone(),
            self.service.clone(),
            self.name.clone(),
            self.address.clone(),
            if self.port == 0 {
                String::new()
            } else {
                self.port.to_string()
            },
            format_metadata(&self.metadata),
        ]
    }
}

fn print_items<T: Row + Serialize>(items: &[T], output: Output) -> Result<()> {
    match output {
        Output::Json => println!("{}", serde_json::to_string_pretty(items)?),
        Output::Yaml => print!("{}", serde_yaml::to_string(items)?),
        Output::Table => {
            let rows: Vec<Vec<String>> = items.iter().map(T::cells).collect();
            let mut widths: Vec<usize> = T::HEADER.iter().map(|h| h.len()).collect();
            for row in &rows {
                for (width, cell) in widths.iter_mut().zip(row) {
                    *width = (*width).max(cell.len());
                }
            }

            let render = |cells: Vec<String>| {
                cells
                    .iter()
                    .zip(&widths)
                    .map(|(cell, width)| format!("{:<width$}", cell, width = *width))
                    .collect::<Vec<_>>()
                    .join("  ")
                    .trim_end()
                    .to_string()
            };

            println!("{}", render(T::HEADER.iter().map(|h| h.to_string()).collect()));
            for row in rows {
                println!("{}", render(row));
            }
        }
    }
    Ok(())
}
