use chrono::Utc;
use serde_json::{Value, json};

use super::{Notice, ViewContext};
use crate::error::{Error, Result};
use crate::types::Profile;
use crate::validation::validate_profile;

pub struct ProfileView {
    ctx: ViewContext,
}

impl ProfileView {
    pub fn new(ctx: ViewContext) -> Self {
        Self { ctx }
    }

    /// Loads a profile. A missing profile for the signed-in user means
    /// onboarding has not happened yet, which is not an error for the user.
    pub async fn load(&self, user_id: &str) -> Result<Option<Profile>> {
        match self.ctx.client.fetch_one::<Profile>(user_id).await {
            Ok(profile) => {
                self.ctx.store.ingest_snapshot([profile.clone()]);
                if user_id == self.ctx.user_id && !profile.onboarding_completed {
                    self.ctx.notify(Notice::OnboardingRequired);
                }
                Ok(Some(profile))
            }
            Err(Error::NotFound) => {
                if user_id == self.ctx.user_id {
                    tracing::info!("No profile for {} yet", user_id);
                    self.ctx.notify(Notice::OnboardingRequired);
                }
                Ok(None)
            }
            Err(e) => Err(self.ctx.fail("load the profile", e)),
        }
    }

    /// The signed-in user's profile as currently held.
    #[must_use]
    pub fn current(&self) -> Option<Profile> {
        self.ctx.store.get(&self.ctx.user_id)
    }

    /// Creates or updates the signed-in user's profile.
    pub async fn save(&self, profile: Profile) -> Result<Profile> {
        const ACTION: &str = "save your profile";
        validate_profile(&profile).map_err(|e| self.ctx.fail(ACTION, e))?;
        if profile.id != self.ctx.user_id {
            return Err(self.ctx.fail(ACTION, Error::Forbidden));
        }

        let mut payload = serde_json::to_value(&profile)?;
        if let Value::Object(fields) = &mut payload {
            // Timestamps are the backend's to assign.
            fields.remove("created_at");
            fields.remove("updated_at");
        }

        let exists = self.ctx.store.get::<Profile>(&profile.id).is_some();
        let saved = if exists {
            payload["updated_at"] = json!(Utc::now());
            self.ctx.client.update::<Profile, _>(&profile.id, &payload).await
        } else {
            match self.ctx.client.insert::<Profile, _>(&payload).await {
                // Held elsewhere but not loaded here.
                Err(Error::Conflict(_)) => {
                    self.ctx.client.update::<Profile, _>(&profile.id, &payload).await
                }
                other => other,
            }
        };
        let saved = saved.map_err(|e| self.ctx.fail(ACTION, e))?;
        self.ctx.store.ingest_snapshot([saved.clone()]);
        tracing::info!("Saved profile for {}", saved.id);
        Ok(saved)
    }
}
