use std::io::BufRead;

use inquire::{Password, Text};

use super::{require_app, signed_in};
use crate::app::App;
use crate::config::ClientConfig;
use crate::session::SessionStore;

pub async fn run_login(
    config: ClientConfig,
    email: Option<String>,
    password_stdin: bool,
) -> anyhow::Result<()> {
    let email = match email {
        Some(e) if e.trim().is_empty() => anyhow::bail!("Email cannot be empty"),
        Some(e) => e,
        None if password_stdin => anyhow::bail!("--email is required with --password-stdin"),
        None => Text::new("Email:")
            .with_validator(|input: &str| {
                if input.trim().is_empty() {
                    Ok(inquire::validator::Validation::Invalid(
                        "Email is required".into(),
                    ))
                } else {
                    Ok(inquire::validator::Validation::Valid)
                }
            })
            .prompt()?,
    };

    let password = if password_stdin {
        let mut line = String::new();
        std::io::stdin().lock().read_line(&mut line)?;
        line.trim_end_matches(['\r', '\n']).to_string()
    } else {
        Password::new("Password:").without_confirmation().prompt()?
    };
    if password.is_empty() {
        anyhow::bail!("Password cannot be empty");
    }

    let app = App::sign_in(config, email.trim(), &password).await?;
    println!();
    if let Some(session) = app.session() {
        println!("Signed in as {}", session.user_id);
    }
    println!();
    Ok(())
}

pub fn run_logout(config: ClientConfig) -> anyhow::Result<()> {
    let had_session = SessionStore::new(&config.session_file).load()?.is_some();
    let mut app = require_app(config)?;
    app.sign_out()?;

    println!();
    if had_session {
        println!("Signed out.");
    } else {
        println!("No session found.");
    }
    println!();
    Ok(())
}

pub async fn run_whoami(config: ClientConfig) -> anyhow::Result<()> {
    let app = require_app(config)?;
    let user_id = signed_in(&app)?;
    let profile = app.profile()?.load(&user_id).await?;

    println!();
    println!("User ID: {}", user_id);
    match profile {
        Some(profile) => {
            println!("Name:    {}", profile.full_name);
            if !profile.skills.is_empty() {
                println!("Skills:  {}", profile.skills.join(", "));
            }
        }
        None => println!("No profile yet. Finish onboarding to appear in searches."),
    }
    println!();
    Ok(())
}
