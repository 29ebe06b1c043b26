use clap::{Parser, Subcommand};
use stagepress::dispatch::CancelToken;
use stagepress::{config, output, pipeline};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

fn version_string() -> &'static str {
    let hash = env!("STAGEPRESS_GIT_HASH");
    if hash.is_empty() {
        env!("CARGO_PKG_VERSION")
    } else {
        // Leaked once at startup
        Box::leak(format!("{}@{hash}", env!("CARGO_PKG_VERSION")).into_boxed_str())
    }
}

#[derive(Parser)]
#[command(name = "stagepress")]
#[command(about = "Render a markdown tree and publish it atomically")]
#[command(long_about = "\
Render a markdown tree and publish it atomically

Every markdown document under the content directory gets a stable numeric id
in its frontmatter, is rendered to its own page, and appears on the timeline
index. The finished site replaces the output directory in one swap; a failed
build leaves the previous output untouched.

Content structure:

  content/
  ├── config.toml          # Build config (optional)
  ├── about.md             # → about.html
  ├── draft.md             # `draft: true` keeps its id reserved, not rendered
  └── posts/
      ├── hello.md         # → posts/hello.html
      └── img/cover.png    # Assets are copied as-is

Frontmatter (YAML `---` or TOML `+++`):
  id:     assigned on first build, reassigned when duplicated
  title:  page title; otherwise the first H1 is promoted
  draft:  skip rendering

Run 'stagepress gen-config' to generate a documented config.toml.")]
#[command(version = version_string())]
struct Cli {
    /// Content directory
    #[arg(long, default_value = "content", global = true)]
    source: PathBuf,

    /// Output directory
    #[arg(long, default_value = "dist", global = true)]
    output: PathBuf,

    /// Log progress (same as RUST_LOG=info)
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the render plan without rendering
    Plan,
    /// Render, aggregate and publish the site
    Build,
    /// Print a stock config.toml with all options documented
    GenConfig,
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Plan => {
            let plan = pipeline::plan_content(&cli.source)?;
            output::print_plan(&plan);
        }
        Command::Build => {
            println!("==> Building {} → {}", cli.source.display(), cli.output.display());
            let options = pipeline::BuildOptions::load(&cli.source, &cli.output)?;
            let summary = pipeline::run_build(&options, &CancelToken::new())?;
            output::print_build_summary(&summary);
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}
