use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() {
    let invocation = unsaid::app::Invocation::parse();

    init_logging();

    if let Err(err) = unsaid::app::run_invocation(invocation) {
        eprintln!("error: {err:?}");
        std::process::exit(1);
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_env(unsaid::LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
