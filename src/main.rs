use clap::Parser;

use proctor_watch_lib::cli::CliArgs;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    log::info!("proctor-watch starting up...");

    let summary = proctor_watch_lib::run(CliArgs::parse()).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
