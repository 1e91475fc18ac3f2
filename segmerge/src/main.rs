use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = segmerge::Cli::parse();
    if let Err(err) = segmerge::run(cli).await {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
