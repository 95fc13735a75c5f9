use clap::Parser;
use dao_deploy_scripts::{cli::Cli, errors::ScriptError};
use dotenv::dotenv;

#[tokio::main]
async fn main() -> Result<(), ScriptError> {
    // Load .env file
    dotenv().ok();

    let cli = Cli::parse();

    tracing_subscriber::fmt().pretty().init();

    let (globals, command) = cli.into_parts();
    command.run(globals).await
}
