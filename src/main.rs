use clap::Parser;
use diffdev::cli::{AppContext, Cli, Commands};
use diffdev::core::error::exit_code_for;
use tracing_subscriber::EnvFilter;

fn init_tracing(ctx: &AppContext) {
    // DIFFDEV_LOG wins; --verbose only moves the default
    let default = if ctx.verbose { "diffdev=debug" } else { "warn" };
    let filter = EnvFilter::try_from_env("DIFFDEV_LOG").unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_ansi(!ctx.no_color)
        .init();
}

fn main() {
    let cli = Cli::parse();

    // Build a context once, pass everywhere
    let ctx = cli.app_context();
    init_tracing(&ctx);

    let result = match cli.command {
        Commands::Session(args) => diffdev::core::session::session_run(args, &ctx),
        Commands::Ask(args) => diffdev::core::session::ask_run(args, &ctx),
        Commands::Context(args) => diffdev::core::context::run(args, &ctx),
        Commands::Preview(args) => diffdev::core::session::preview_run(args, &ctx),
        Commands::Apply(args) => diffdev::core::session::apply_run(args, &ctx),
        Commands::Revert(args) => diffdev::core::session::revert_run(args, &ctx),
        Commands::Checkpoints(args) => diffdev::core::session::checkpoints_run(args, &ctx),
        Commands::Copydir(args) => diffdev::core::tree::run(args, &ctx),
        Commands::Init(args) => diffdev::infra::config::init(args, &ctx),
        Commands::Completions(args) => diffdev::completion::run(args, &ctx),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(exit_code_for(&e));
    }
}
