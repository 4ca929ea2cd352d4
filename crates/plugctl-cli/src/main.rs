use clap::{Parser, Subcommand};
use plugctl_cli::{cmd, root};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "plugctl",
    about = "Install, register, and remove plugin components",
    version
)]
struct Cli {
    /// Project root (default: nearest ancestor holding plugctl.yaml)
    #[arg(long, global = true, env = "PLUGCTL_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, short = 'j', global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create plugctl.yaml and the upload, plugin, and data directories
    Init,

    /// Copy a component package into the upload area
    Upload {
        /// Path to a .tar.gz component package
        archive: PathBuf,
    },

    /// Deploy and register an uploaded package
    Register {
        /// Package file name in the upload area
        package: String,
    },

    /// Register a descriptor on this node only, without deployment
    RegisterUnmanaged {
        /// Path to a descriptor.json
        descriptor: PathBuf,
    },

    /// Replace a registered package, keeping its service placement
    Reregister {
        /// Package file name in the upload area
        package: String,
    },

    /// Remove a registered component and its package
    Remove {
        /// Component name
        name: String,
    },

    /// Remove an uploaded package
    RemovePackage {
        /// Package file name in the upload area
        package: String,
    },

    /// List component records
    List,

    /// Check a descriptor without registering it
    Validate {
        /// Path to a descriptor.json
        descriptor: PathBuf,
    },

    /// Print packages or descriptors in dependency order
    Order {
        /// Packages (.tar.gz) or descriptor files
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Order only this component and everything that depends on it
        #[arg(long = "for", value_name = "PATH")]
        changed: Option<PathBuf>,
    },

    /// Register everything on disk that has no record, then start services
    Startup,
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Startup => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Init => cmd::init::run(&root),
        Commands::Upload { archive } => cmd::upload::run(&root, &archive, cli.json),
        Commands::Register { package } => cmd::register::run(&root, &package, cli.json),
        Commands::RegisterUnmanaged { descriptor } => {
            cmd::register::run_unmanaged(&root, &descriptor, cli.json)
        }
        Commands::Reregister { package } => cmd::register::run_reregister(&root, &package, cli.json),
        Commands::Remove { name } => cmd::remove::run(&root, &name, cli.json),
        Commands::RemovePackage { package } => cmd::remove::run_package(&root, &package, cli.json),
        Commands::List => cmd::list::run(&root, cli.json),
        Commands::Validate { descriptor } => cmd::validate::run(&root, &descriptor, cli.json),
        Commands::Order { paths, changed } => cmd::order::run(&root, paths, changed, cli.json),
        Commands::Startup => cmd::startup::run(&root, cli.json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
