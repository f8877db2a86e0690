mod applications;
mod auth;
mod chat;
mod commands;
mod feed;

pub use applications::{run_accept, run_applications, run_apply, run_reject};
pub use auth::{run_login, run_logout, run_whoami};
pub use chat::run_chat;
pub use commands::Commands;
pub use feed::run_feed;

use tokio::sync::broadcast::error::RecvError;

use crate::app::App;
use crate::config::ClientConfig;
use crate::view::Notice;

/// Builds the app from the stored session.
pub fn require_app(config: ClientConfig) -> anyhow::Result<App> {
    let app = App::init(config)?;
    print_notices(&app);
    Ok(app)
}

/// The signed-in user's id, or a hint to log in.
pub fn signed_in(app: &App) -> anyhow::Result<String> {
    match app.session() {
        Some(session) => Ok(session.user_id.clone()),
        None => anyhow::bail!("Not signed in. Run 'coventure login' first."),
    }
}

/// Echoes notices to stderr for as long as the app lives.
fn print_notices(app: &App) {
    let mut notices = app.notices();
    tokio::spawn(async move {
        loop {
            match notices.recv().await {
                Ok(Notice::Error(message)) => eprintln!("error: {message}"),
                Ok(Notice::LiveUpdatesUnavailable(scope)) => {
                    eprintln!("warning: live updates for {scope} are unavailable");
                }
                Ok(Notice::LiveUpdatesRestored(scope)) => {
                    eprintln!("Live updates for {scope} are back");
                }
                Ok(Notice::OnboardingRequired) => {
                    eprintln!("Your profile is incomplete. Finish onboarding to apply to projects.");
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });
}

/// Waits for Ctrl-C.
pub(crate) async fn until_interrupted() -> anyhow::Result<()> {
    tokio::signal::ctrl_c().await?;
    println!();
    Ok(())
}
