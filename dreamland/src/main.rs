//! Dreamland CLI.

use clap::{Parser, Subcommand};
use dreamland::{Dreamland, InstallOptions};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "dreamland",
    about = "Dreamland package manager for Galactica Linux",
    version
)]
struct Cli {
    /// Assume yes for every confirmation prompt
    #[arg(long, short = 'y', global = true)]
    yes: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync the package databases
    Sync,
    /// Install a package
    Install {
        package: String,
        /// Prefer the binary package even for source-sourced names
        #[arg(long)]
        binary: bool,
    },
    /// Uninstall a package
    Uninstall {
        package: String,
        /// Also remove installed packages that depend on it
        #[arg(long)]
        cascade: bool,
    },
    /// Remove packages nothing else depends on
    Autoremove,
    /// Search packages by name or description
    Search { query: String },
    /// List installed packages
    List,
    /// List loaded modules
    Modules,
    /// A verb contributed by a loaded module
    #[command(external_subcommand)]
    External(Vec<String>),
}

fn main() -> anyhow::Result<()> {
    // Diagnostics are opt-in; user-facing output goes through the styled
    // printers.
    let filter = EnvFilter::try_from_env("DREAMLAND_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let mut dreamland = Dreamland::new()?;
    let code = run(&mut dreamland, cli);
    // Module cleanups run on drop; they must precede the exit.
    drop(dreamland);
    std::process::exit(code);
}

fn run(dreamland: &mut Dreamland, cli: Cli) -> i32 {
    let result = match cli.command {
        Commands::Sync => dreamland.sync(),
        Commands::Install { package, binary } => dreamland.install(
            &package,
            InstallOptions {
                assume_yes: cli.yes,
                force_binary: binary,
            },
        ),
        Commands::Uninstall { package, cascade } => dreamland.remove(&package, cascade, cli.yes),
        Commands::Autoremove => dreamland.autoremove(cli.yes),
        Commands::Search { query } => {
            dreamland.search(&query);
            Ok(())
        }
        Commands::List => {
            dreamland.list_installed();
            Ok(())
        }
        Commands::Modules => {
            dreamland.list_modules();
            Ok(())
        }
        Commands::External(args) => {
            let verb = args.first().cloned().unwrap_or_default();
            let rest = args.get(1..).unwrap_or(&[]);
            return match dreamland.run_module_command(&verb, rest) {
                Some(code) => code,
                None => {
                    dreamland::ui::err(&format!("unknown command: {}", verb));
                    2
                }
            };
        }
    };

    match result {
        Ok(()) => 0,
        Err(e) => {
            dreamland::ui::err(&e.to_string());
            1
        }
    }
}
