//! Read-only collaborators the engine consults but does not own.

use chrono::Utc;
use uuid::Uuid;

use kindle_db::Database;
use kindle_types::models::Profile;

/// Profile lookup. Profiles are written by the profile-edit flow.
pub trait UserDirectory: Send + Sync {
    fn lookup(&self, profile_id: Uuid) -> anyhow::Result<Option<Profile>>;
}

/// Premium entitlement check consulted by the quota tracker.
pub trait PremiumStatus: Send + Sync {
    fn is_premium(&self, user_id: Uuid) -> anyhow::Result<bool>;
}

impl UserDirectory for Database {
    fn lookup(&self, profile_id: Uuid) -> anyhow::Result<Option<Profile>> {
        self.get_profile(profile_id)
    }
}

/// A user is premium while `premium_until` lies in the future.
impl PremiumStatus for Database {
    fn is_premium(&self, user_id: Uuid) -> anyhow::Result<bool> {
        Ok(self
            .premium_until(user_id)?
            .is_some_and(|until| until > Utc::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};
    use kindle_types::models::{Gender, GenderPreference};

    #[test]
    fn premium_expires() {
        let db = Database::open_in_memory().unwrap();
        let profile = Profile {
            id: Uuid::new_v4(),
            display_name: "Caio".into(),
            birth_date: NaiveDate::from_ymd_opt(1990, 1, 1).unwrap(),
            gender: Gender::Male,
            gender_preference: GenderPreference::Women,
            coordinates: None,
            photos: vec![],
            show_me: true,
        };
        db.upsert_profile(&profile).unwrap();
        assert!(!db.is_premium(profile.id).unwrap());

        db.set_premium_until(profile.id, Some(Utc::now() + Duration::days(1)))
            .unwrap();
        assert!(db.is_premium(profile.id).unwrap());

        db.set_premium_until(profile.id, Some(Utc::now() - Duration::days(1)))
            .unwrap();
        assert!(!db.is_premium(profile.id).unwrap());
        assert!(db.lookup(profile.id).unwrap().is_some());
    }
}
