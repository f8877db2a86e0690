use url::Url;

use crate::error::{Error, Result};
use crate::types::{ApplicationDraft, Profile, ProjectDraft};

const MAX_TITLE_LEN: usize = 100;
const MAX_DESCRIPTION_LEN: usize = 2000;
const MAX_NAME_LEN: usize = 100;
const MAX_BIO_LEN: usize = 500;
const MAX_MESSAGE_LEN: usize = 2000;
const MAX_SKILLS: usize = 20;
const MAX_TEAM_SIZE: i32 = 50;

fn validate_text(value: &str, field: &str, max_len: usize) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::validation(format!("{field} cannot be empty")));
    }
    validate_len(value, field, max_len)
}

fn validate_len(value: &str, field: &str, max_len: usize) -> Result<()> {
    if value.chars().count() > max_len {
        return Err(Error::validation(format!(
            "{field} cannot exceed {max_len} characters"
        )));
    }
    Ok(())
}

fn validate_url(value: Option<&str>, field: &str) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };
    match Url::parse(value) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(()),
        _ => Err(Error::validation(format!(
            "{field} must be an http or https URL"
        ))),
    }
}

fn validate_skills(skills: &[String], field: &str) -> Result<()> {
    if skills.len() > MAX_SKILLS {
        return Err(Error::validation(format!(
            "{field} cannot list more than {MAX_SKILLS} entries"
        )));
    }
    if skills.iter().any(|s| s.trim().is_empty()) {
        return Err(Error::validation(format!("{field} cannot contain blank entries")));
    }
    Ok(())
}

pub fn validate_project(draft: &ProjectDraft) -> Result<()> {
    validate_text(&draft.title, "Title", MAX_TITLE_LEN)?;
    validate_text(&draft.description, "Description", MAX_DESCRIPTION_LEN)?;
    validate_text(&draft.timeline, "Timeline", MAX_TITLE_LEN)?;
    validate_skills(&draft.required_skills, "Required skills")?;
    if !(1..=MAX_TEAM_SIZE).contains(&draft.team_size) {
        return Err(Error::validation(format!(
            "Team size must be between 1 and {MAX_TEAM_SIZE}"
        )));
    }
    Ok(())
}

pub fn validate_application(draft: &ApplicationDraft) -> Result<()> {
    if let Some(message) = &draft.message {
        validate_len(message, "Message", MAX_MESSAGE_LEN)?;
    }
    validate_url(draft.portfolio_url.as_deref(), "Portfolio URL")?;
    validate_url(draft.linkedin_url.as_deref(), "LinkedIn URL")
}

pub fn validate_profile(profile: &Profile) -> Result<()> {
    validate_text(&profile.full_name, "Full name", MAX_NAME_LEN)?;
    if let Some(bio) = &profile.bio {
        validate_len(bio, "Bio", MAX_BIO_LEN)?;
    }
    validate_skills(&profile.skills, "Skills")?;
    validate_skills(&profile.interests, "Interests")?;
    validate_url(profile.avatar_url.as_deref(), "Avatar URL")?;
    validate_url(profile.github_url.as_deref(), "GitHub URL")?;
    validate_url(profile.linkedin_url.as_deref(), "LinkedIn URL")?;
    validate_url(profile.portfolio_url.as_deref(), "Portfolio URL")
}

pub fn validate_message(content: &str) -> Result<()> {
    validate_text(content, "Message", MAX_MESSAGE_LEN)
}
