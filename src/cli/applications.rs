use super::{require_app, signed_in};
use crate::app::App;
use crate::config::ClientConfig;
use crate::types::{Application, ApplicationDraft, Project};

fn project_title(app: &App, project_id: &str) -> String {
    app.store()
        .get::<Project>(project_id)
        .map(|p| p.title)
        .unwrap_or_else(|| project_id.to_string())
}

fn print_application(app: &App, application: &Application, show_applicant: bool) {
    let who = if show_applicant {
        format!(" from {}", application.applicant_id)
    } else {
        String::new()
    };
    println!(
        "  {}  {} [{}]{}",
        application.id,
        project_title(app, &application.project_id),
        application.status,
        who
    );
    if let Some(message) = &application.message {
        println!("      \"{}\"", message);
    }
}

pub async fn run_applications(config: ClientConfig) -> anyhow::Result<()> {
    let app = require_app(config)?;
    signed_in(&app)?;
    let view = app.applications()?;
    view.open().await?;

    let outgoing = view.outgoing();
    let incoming = view.incoming();

    println!();
    if outgoing.is_empty() {
        println!("You have not applied to any projects.");
    } else {
        println!("Sent:");
        for application in &outgoing {
            print_application(&app, application, false);
        }
    }
    println!();
    if incoming.is_empty() {
        println!("No applications to your projects.");
    } else {
        println!("Received:");
        for application in &incoming {
            print_application(&app, application, true);
        }
    }
    println!();
    Ok(())
}

pub async fn run_apply(
    config: ClientConfig,
    project_id: String,
    draft: ApplicationDraft,
) -> anyhow::Result<()> {
    let app = require_app(config)?;
    signed_in(&app)?;
    let view = app.applications()?;
    view.open().await?;
    let application = view.apply(&project_id, draft).await?;

    println!();
    println!(
        "Applied to '{}' ({})",
        project_title(&app, &project_id),
        application.id
    );
    println!();
    Ok(())
}

pub async fn run_accept(config: ClientConfig, application_id: String) -> anyhow::Result<()> {
    decide(config, application_id, true).await
}

pub async fn run_reject(config: ClientConfig, application_id: String) -> anyhow::Result<()> {
    decide(config, application_id, false).await
}

async fn decide(config: ClientConfig, application_id: String, accept: bool) -> anyhow::Result<()> {
    let app = require_app(config)?;
    signed_in(&app)?;
    let view = app.applications()?;
    let application = if accept {
        view.accept(&application_id).await?
    } else {
        view.reject(&application_id).await?
    };

    println!();
    println!(
        "Application {} is now {}",
        application.id, application.status
    );
    println!();
    Ok(())
}
