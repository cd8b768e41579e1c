use clap::Parser;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    let cli = reelctl::Cli::parse();
    if let Err(err) = reelctl::run(cli) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
