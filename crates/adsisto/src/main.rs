use std::env;
use std::fs;
use std::io::{self, IsTerminal, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result, anyhow};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use log::{LevelFilter, debug, info, warn};
use tokio::net::TcpListener;

use adsisto::api::{AppState, create_router_with_config};
use adsisto::audit::AuditLogger;
use adsisto::auth::AuthState;
use adsisto::config::{
    APP_NAME, AppConfig, load_config, resolve_config_path, write_default_config,
};
use adsisto::registry::{KeyRegistry, RegistryFactories, with_timeout};

fn main() {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "{err:?}");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn async_serve(ctx: RuntimeContext, cmd: ServeCommand) -> Result<()> {
    handle_serve(&ctx, cmd).await
}

#[tokio::main]
async fn async_keys(ctx: RuntimeContext, cmd: KeysCommand) -> Result<()> {
    handle_keys(&ctx, cmd).await
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();

    let ctx = RuntimeContext::new(cli.common.clone())?;
    ctx.init_logging()?;
    debug!("resolved config file: {}", ctx.config_file.display());

    match cli.command {
        Command::Serve(cmd) => async_serve(ctx, cmd),
        Command::Init(cmd) => handle_init(&ctx, cmd),
        Command::Config { command } => handle_config(&ctx, command),
        Command::Keys { command } => async_keys(ctx, command),
        Command::Completions { shell } => handle_completions(shell),
    }
}

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Adsisto - device console authentication server.",
    propagate_version = true
)]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Args)]
struct CommonOpts {
    /// Override the config file path
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Reduce output to only errors
    #[arg(short, long, action = clap::ArgAction::SetTrue, global = true)]
    quiet: bool,
    /// Increase logging verbosity (stackable)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Enable debug logging (equivalent to -vv)
    #[arg(long, global = true)]
    debug: bool,
    /// Enable trace logging (overrides other levels)
    #[arg(long, global = true)]
    trace: bool,
    /// Output machine readable JSON
    #[arg(long, global = true, conflicts_with = "yaml")]
    json: bool,
    /// Output machine readable YAML
    #[arg(long, global = true)]
    yaml: bool,
    /// Disable ANSI colors in output
    #[arg(long = "no-color", global = true, conflicts_with = "color")]
    no_color: bool,
    /// Control color output (auto, always, never)
    #[arg(long, value_enum, default_value_t = ColorOption::Auto, global = true)]
    color: ColorOption,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ColorOption {
    Auto,
    Always,
    Never,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the HTTP server
    Serve(ServeCommand),
    /// Create a default config file
    Init(InitCommand),
    /// Inspect and manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Administer the key registry directly
    Keys {
        #[command(subcommand)]
        command: KeysCommand,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Debug, Clone, Args)]
struct ServeCommand {
    /// Address to bind (overrides server.host)
    #[arg(long)]
    host: Option<String>,
    /// Port to listen on (overrides server.port)
    #[arg(short, long)]
    port: Option<u16>,
}

#[derive(Debug, Clone, Args)]
struct InitCommand {
    /// Overwrite an existing config file
    #[arg(long)]
    force: bool,
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Print the effective configuration
    Show,
    /// Print the config file path
    Path,
    /// Rewrite the config file with defaults
    Reset,
}

#[derive(Debug, Subcommand)]
enum KeysCommand {
    /// List registered identities
    List,
    /// Register a new identity
    Add(AddKeyArgs),
    /// Replace the key and access level of an identity
    Update(UpdateKeyArgs),
    /// Remove an identity
    Remove {
        identity: String,
    },
}

#[derive(Debug, Clone, Args)]
struct KeySource {
    identity: String,
    /// Public key file (PEM, or base64 DER)
    #[arg(long, value_name = "PATH", conflicts_with = "key")]
    key_file: Option<PathBuf>,
    /// Public key given inline
    #[arg(long)]
    key: Option<String>,
}

#[derive(Debug, Clone, Args)]
struct AddKeyArgs {
    #[command(flatten)]
    source: KeySource,
    #[arg(long, default_value_t = 0)]
    access_level: u32,
}

#[derive(Debug, Clone, Args)]
struct UpdateKeyArgs {
    #[command(flatten)]
    source: KeySource,
    /// New access level (required)
    #[arg(long)]
    access_level: u32,
}

impl KeySource {
    fn public_key(&self) -> Result<String> {
        match (&self.key, &self.key_file) {
            (Some(key), _) => Ok(key.clone()),
            (None, Some(path)) => fs::read_to_string(path)
                .with_context(|| format!("reading public key {}", path.display())),
            (None, None) => Err(anyhow!("either --key or --key-file is required")),
        }
    }
}

struct RuntimeContext {
    common: CommonOpts,
    config_file: PathBuf,
    config: AppConfig,
}

impl RuntimeContext {
    fn new(common: CommonOpts) -> Result<Self> {
        let config_file = resolve_config_path(common.config.clone())?;
        let config = load_config(&config_file)?;
        Ok(Self {
            common,
            config_file,
            config,
        })
    }

    fn init_logging(&self) -> Result<()> {
        use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

        if self.common.quiet {
            log::set_max_level(LevelFilter::Off);
            return Ok(());
        }

        let level = self.effective_log_level();
        let directive = level.as_str().to_ascii_lowercase();

        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{APP_NAME}={directive},tower_http={directive}"))
        });

        if self.common.json {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
                .ok();
        } else {
            let force_color = matches!(self.common.color, ColorOption::Always)
                || env::var_os("FORCE_COLOR").is_some();
            let disable_color = self.common.no_color
                || matches!(self.common.color, ColorOption::Never)
                || env::var_os("NO_COLOR").is_some()
                || (!force_color && !io::stderr().is_terminal());

            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().with_ansi(!disable_color))
                .try_init()
                .ok();
        }

        // log-crate users (auth middleware) go through env_logger
        let mut builder =
            env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
        builder.filter_level(level);
        builder.try_init().ok();

        Ok(())
    }

    fn effective_log_level(&self) -> LevelFilter {
        if self.common.trace {
            LevelFilter::Trace
        } else if self.common.debug {
            LevelFilter::Debug
        } else {
            match self.common.verbose {
                0 => LevelFilter::from_str(&self.config.logging.level).unwrap_or(LevelFilter::Info),
                1 => LevelFilter::Debug,
                _ => LevelFilter::Trace,
            }
        }
    }

    fn build_registry(&self) -> Result<std::sync::Arc<dyn KeyRegistry>> {
        let algorithm = self
            .config
            .auth
            .validate()
            .context("validating auth configuration")?;
        RegistryFactories::default()
            .build(&self.config.registry, algorithm.family())
            .context("building key registry")
    }
}

async fn handle_serve(ctx: &RuntimeContext, cmd: ServeCommand) -> Result<()> {
    let server = &ctx.config.server;
    let host = cmd.host.unwrap_or_else(|| server.host.clone());
    let port = cmd.port.unwrap_or(server.port);

    let auth = AuthState::from_config(
        ctx.config.auth.clone(),
        &ctx.config.registry,
        &RegistryFactories::default(),
    )
    .context("initializing authentication")?;
    info!(
        "authentication ready: algorithm={}, registry={}",
        ctx.config.auth.algorithm,
        auth.registry().name()
    );

    let mut state = AppState::new(auth);
    if let Some(path) = ctx.config.audit.resolved_path()? {
        let logger = AuditLogger::new(path).await?;
        info!("audit log: {}", logger.path().display());
        state = state.with_audit_logger(logger);
    }

    let app = create_router_with_config(state, server.max_body_kb);

    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .with_context(|| format!("invalid listen address {host}:{port}"))?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    info!("listening on http://{addr}");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running server")?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for Ctrl+C: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!("failed to install SIGTERM handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}

fn handle_init(ctx: &RuntimeContext, cmd: InitCommand) -> Result<()> {
    if ctx.config_file.exists() && !cmd.force {
        return Err(anyhow!(
            "config already exists at {} (use --force to overwrite)",
            ctx.config_file.display()
        ));
    }

    write_default_config(&ctx.config_file)?;
    info!("wrote default config to {}", ctx.config_file.display());
    Ok(())
}

fn handle_config(ctx: &RuntimeContext, command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Show => {
            if ctx.common.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&ctx.config)
                        .context("serializing config to JSON")?
                );
            } else if ctx.common.yaml {
                println!(
                    "{}",
                    serde_yaml::to_string(&ctx.config).context("serializing config to YAML")?
                );
            } else {
                println!("{:#?}", ctx.config);
            }
            Ok(())
        }
        ConfigCommand::Path => {
            println!("{}", ctx.config_file.display());
            Ok(())
        }
        ConfigCommand::Reset => write_default_config(&ctx.config_file),
    }
}

async fn handle_keys(ctx: &RuntimeContext, command: KeysCommand) -> Result<()> {
    let registry = ctx.build_registry()?;
    let limit = ctx.config.auth.registry_timeout();

    match command {
        KeysCommand::List => {
            let keys = with_timeout(limit, registry.get_all()).await?;
            if ctx.common.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&keys).context("serializing keys to JSON")?
                );
            } else if ctx.common.yaml {
                println!(
                    "{}",
                    serde_yaml::to_string(&keys).context("serializing keys to YAML")?
                );
            } else {
                for record in keys.values() {
                    println!("{}\t{}", record.identity, record.access_level);
                }
            }
        }
        KeysCommand::Add(args) => {
            let public_key = args.source.public_key()?;
            with_timeout(
                limit,
                registry.insert(&args.source.identity, &public_key, args.access_level),
            )
            .await?;
            info!("registered {}", args.source.identity);
        }
        KeysCommand::Update(args) => {
            let public_key = args.source.public_key()?;
            with_timeout(
                limit,
                registry.update(&args.source.identity, &public_key, args.access_level),
            )
            .await?;
            info!("updated {}", args.source.identity);
        }
        KeysCommand::Remove { identity } => {
            with_timeout(limit, registry.delete(&identity)).await?;
            info!("removed {identity}");
        }
    }

    Ok(())
}

fn handle_completions(shell: Shell) -> Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, APP_NAME, &mut io::stdout());
    Ok(())
}
