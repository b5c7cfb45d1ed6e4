use clap::Parser;
use meter_inspect_lib::cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    meter_inspect_lib::run(Cli::parse()).await
}
