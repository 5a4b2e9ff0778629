use clap::{Parser, Subcommand};
use quire::generate::{self, BuildOptions};
use quire::hooks::HookRegistry;
use quire::loader::LoaderRegistry;
use quire::site::Site;
use quire::{config, output};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "quire")]
#[command(about = "Incremental static site generator")]
#[command(long_about = "\
Incremental static site generator

Every file under contents/ becomes one or more output pages. Configuration
cascades from built-in defaults through themes, the project config.toml and
per-directory config.toml files.

Project structure:

  site/
  ├── config.toml              # Project config (optional)
  ├── contents/                # Articles, indexes, feeds, snippets
  │   ├── index.yml            # Index page listing articles
  │   └── blog/
  │       ├── config.toml      # Directory config (overrides parent)
  │       └── first-post.md
  ├── templates/               # Page templates (Tera)
  ├── modules/                 # Macro modules listed in `imports`
  ├── files/                   # Copied verbatim
  └── outputs/                 # Build output and dependency state

Only contents affected by a change are rebuilt. Use --rebuild to force a
full build.

Run 'quire gen-config' to generate a documented config.toml.")]
#[command(version)]
struct Cli {
    /// Project root directory
    #[arg(long, default_value = ".", global = true)]
    root: PathBuf,

    /// Output directory (relative paths are resolved against the root)
    #[arg(long, default_value = "outputs", global = true)]
    output: PathBuf,

    /// Show debug logging and full error causes
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Render every content that needs rebuilding
    Build {
        /// Ignore saved dependency state and rebuild everything
        #[arg(long)]
        rebuild: bool,
        /// Render on one thread, in order
        #[arg(long)]
        debug: bool,
        /// Worker threads (defaults to max_processes, then all cores)
        #[arg(long, short)]
        jobs: Option<usize>,
    },
    /// Load the project and list its contents without rendering
    Check,
    /// Print a stock config.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Build { rebuild, debug, jobs } => {
            println!("==> Loading {}", cli.root.display());
            let site = Arc::new(load_site(&cli.root, &cli.output)?);

            println!("==> Building → {}", site.paths.output.display());
            let options = BuildOptions { rebuild, debug, jobs };
            let report = generate::build(site.clone(), &options)?;
            output::print_build_report(&report, &site.paths.output, cli.verbose);

            if !report.is_success() {
                println!("==> Build finished with errors");
                std::process::exit(1);
            }
            println!("==> Build complete: {}", site.paths.output.display());
        }
        Command::Check => {
            println!("==> Checking {}", cli.root.display());
            let site = load_site(&cli.root, &cli.output)?;
            output::print_check_output(&site);
            println!("==> Project is valid");
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

fn load_site(root: &std::path::Path, output: &std::path::Path) -> Result<Site, quire::site::SiteError> {
    Site::load(root, output, &LoaderRegistry::default(), HookRegistry::new())
}

/// `RUST_LOG` wins; otherwise `-v` selects debug and the default is warnings only.
fn init_logging(verbose: bool) {
    let fallback = if verbose { "quire=debug" } else { "quire=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
