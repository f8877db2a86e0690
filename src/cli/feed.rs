use std::collections::HashSet;

use tokio::sync::broadcast::error::RecvError;

use super::{require_app, signed_in, until_interrupted};
use crate::config::ClientConfig;
use crate::store::StoreEvent;
use crate::types::{Project, Table};

fn print_project(project: &Project) {
    println!("  {}  {}", project.id, project.title);
    println!(
        "      team of {} | {} | {}",
        project.team_size, project.timeline, project.status
    );
    if !project.required_skills.is_empty() {
        println!("      looking for: {}", project.required_skills.join(", "));
    }
}

pub async fn run_feed(config: ClientConfig, follow: bool) -> anyhow::Result<()> {
    let app = require_app(config)?;
    signed_in(&app)?;
    let view = app.projects()?;
    let mut events = app.store().subscribe();
    let projects = view.open_feed().await?;

    if projects.is_empty() {
        println!("No open projects right now.");
    } else {
        println!();
        println!("Open projects:");
        println!();
        for project in &projects {
            print_project(project);
        }
        println!();
        println!("{} project(s) total", projects.len());
        println!();
    }
    if !follow {
        return Ok(());
    }

    let mut seen: HashSet<String> = projects.into_iter().map(|p| p.id).collect();
    let watch = async {
        loop {
            match events.recv().await {
                Ok(StoreEvent::Changed(Table::Projects)) => {
                    for project in view.feed() {
                        if seen.insert(project.id.clone()) {
                            print_project(&project);
                        }
                    }
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
        }
    };
    tokio::select! {
        () = watch => Ok(()),
        result = until_interrupted() => result,
    }
}
