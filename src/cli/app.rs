// ABOUTME: Main application orchestration for the dagflow CLI
// ABOUTME: Coordinates between CLI arguments, configuration, and command execution

use anyhow::Result;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use super::commands;
use super::{Args, Commands, Config};

pub struct App {
    config: Config,
}

impl App {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Initialize logging based on configuration
    pub fn init_logging(&self, verbose: bool, no_color: bool) -> Result<()> {
        let log_level = if verbose {
            "debug"
        } else {
            &self.config.logging.level
        };

        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

        // Logs go to stderr so command output on stdout stays clean
        let builder = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_ansi(!no_color)
            .with_target(false)
            .with_writer(std::io::stderr);

        let installed = match self.config.logging.format.as_str() {
            "compact" => builder.compact().try_init(),
            _ => builder.try_init(),
        };
        if let Err(e) = installed {
            eprintln!("Logging already initialized: {}", e);
        }

        debug!("Logging initialized with level: {}", log_level);
        Ok(())
    }

    pub async fn run(&mut self, args: Args) -> Result<()> {
        self.init_logging(args.verbose, args.no_color)?;

        info!("Starting dagflow v{}", crate::VERSION);
        debug!("Configuration loaded from: {:?}", args.config);

        match args.command {
            Commands::Run {
                workflow,
                retries,
                output,
                dry_run,
            } => commands::run_workflow(workflow, retries, output, dry_run, &self.config).await,

            Commands::Validate { workflow } => {
                commands::validate_workflow(workflow, &self.config).await
            }

            Commands::Status { id } => commands::show_status(id, &self.config).await,

            Commands::Stop { id } => commands::stop_workflow(id, &self.config).await,

            Commands::Delete { id } => commands::delete_workflow(id, &self.config).await,

            Commands::Resume { id, output } => {
                commands::resume_workflow(id, output, &self.config).await
            }

            Commands::List => commands::list_workflows(&self.config).await,

            Commands::Repair { id } => commands::repair_workflow(id, &self.config).await,

            Commands::Init { name, output_dir } => commands::init_workflow(name, output_dir).await,
        }
    }

    /// Parse the command line, load configuration and build the application
    pub fn from_args() -> Result<(Self, Args)> {
        let args = Args::parse_args();
        let config = Config::load(args.config.clone())?;
        Ok((Self::new(config), args))
    }
}
