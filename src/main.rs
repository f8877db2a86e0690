use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use coventure::cli::{
    Commands, run_accept, run_applications, run_apply, run_chat, run_feed, run_login,
    run_logout, run_reject, run_whoami,
};
use coventure::config::ClientConfig;
use coventure::types::ApplicationDraft;

#[derive(Parser)]
#[command(name = "coventure")]
#[command(about = "Find teammates for your project and chat with them", long_about = None)]
struct Cli {
    /// Path to a TOML config file. COVENTURE_* environment variables override it.
    #[arg(long, global = true, env = "COVENTURE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("coventure=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ClientConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Login {
            email,
            password_stdin,
        } => run_login(config, email, password_stdin).await?,
        Commands::Logout => run_logout(config)?,
        Commands::Whoami => run_whoami(config).await?,
        Commands::Feed { follow } => run_feed(config, follow).await?,
        Commands::Applications => run_applications(config).await?,
        Commands::Apply {
            project_id,
            message,
            portfolio_url,
            linkedin_url,
        } => {
            let draft = ApplicationDraft {
                message,
                portfolio_url,
                linkedin_url,
            };
            run_apply(config, project_id, draft).await?;
        }
        Commands::Accept { application_id } => run_accept(config, application_id).await?,
        Commands::Reject { application_id } => run_reject(config, application_id).await?,
        Commands::Chat {
            project_id,
            application_id,
            send,
            follow,
        } => run_chat(config, project_id, application_id, send, follow).await?,
    }

    Ok(())
}
