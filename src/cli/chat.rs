use std::collections::HashSet;

use tokio::sync::broadcast::error::RecvError;

use super::{require_app, signed_in, until_interrupted};
use crate::config::ClientConfig;
use crate::store::StoreEvent;
use crate::types::{ChatMessage, Table};

fn print_message(message: &ChatMessage, user_id: &str) {
    let who = if message.sender_id == user_id {
        "you"
    } else {
        message.sender_id.as_str()
    };
    println!(
        "[{}] {}: {}",
        message.created_at.format("%Y-%m-%d %H:%M"),
        who,
        message.content
    );
}

pub async fn run_chat(
    config: ClientConfig,
    project_id: String,
    application_id: String,
    send: Option<String>,
    follow: bool,
) -> anyhow::Result<()> {
    let app = require_app(config)?;
    let user_id = signed_in(&app)?;
    let view = app.chat()?;
    let mut events = app.store().subscribe();
    view.open(&project_id, &application_id).await?;

    if let Some(content) = send {
        view.send(&content).await?;
    }

    let messages = view.messages();
    println!();
    if messages.is_empty() {
        println!("No messages yet.");
    }
    for message in &messages {
        print_message(message, &user_id);
    }
    println!();
    if !follow {
        return Ok(());
    }

    let mut seen: HashSet<String> = messages.into_iter().map(|m| m.id).collect();
    let watch = async {
        loop {
            match events.recv().await {
                Ok(StoreEvent::Changed(Table::ChatMessages)) => {
                    for message in view.messages() {
                        if seen.insert(message.id.clone()) {
                            print_message(&message, &user_id);
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
