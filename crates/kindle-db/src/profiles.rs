use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row};
use uuid::Uuid;

use kindle_types::models::Profile;

use crate::models::ProfileRow;
use crate::{Database, OptionalExt, format_ts, parse_ts};

const PROFILE_COLUMNS: &str = "id, display_name, birth_date, gender, gender_preference, latitude, longitude, photos, show_me";

impl Database {
    /// Write a profile as the profile-edit flow would. The engine itself
    /// only ever reads profiles.
    pub fn upsert_profile(&self, profile: &Profile) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO profiles (id, display_name, birth_date, gender, gender_preference, latitude, longitude, photos, show_me)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(id) DO UPDATE SET
                    display_name = excluded.display_name,
                    birth_date = excluded.birth_date,
                    gender = excluded.gender,
                    gender_preference = excluded.gender_preference,
                    latitude = excluded.latitude,
                    longitude = excluded.longitude,
                    photos = excluded.photos,
                    show_me = excluded.show_me",
                rusqlite::params![
                    profile.id.to_string(),
                    profile.display_name,
                    profile.birth_date.format("%Y-%m-%d").to_string(),
                    profile.gender.as_str(),
                    profile.gender_preference.as_str(),
                    profile.coordinates.map(|c| c.latitude),
                    profile.coordinates.map(|c| c.longitude),
                    serde_json::to_string(&profile.photos)?,
                    profile.show_me,
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_profile(&self, id: Uuid) -> Result<Option<Profile>> {
        self.with_conn(|conn| query_profile(conn, id))
    }

    /// Profiles that could appear in anyone's discovery feed: visible and
    /// located. Per-viewer filtering happens in the engine.
    pub fn list_discoverable_profiles(&self) -> Result<Vec<Profile>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM profiles
                 WHERE show_me = 1 AND latitude IS NOT NULL AND longitude IS NOT NULL",
                PROFILE_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([], map_profile_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.into_iter().map(ProfileRow::into_profile).collect()
        })
    }

    pub fn set_premium_until(&self, user_id: Uuid, until: Option<DateTime<Utc>>) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE profiles SET premium_until = ?2 WHERE id = ?1",
                rusqlite::params![user_id.to_string(), until.map(format_ts)],
            )?;
            Ok(())
        })
    }

    pub fn premium_until(&self, user_id: Uuid) -> Result<Option<DateTime<Utc>>> {
        self.with_conn(|conn| {
            let raw: Option<Option<String>> = conn
                .query_row(
                    "SELECT premium_until FROM profiles WHERE id = ?1",
                    [user_id.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            raw.flatten().as_deref().map(parse_ts).transpose()
        })
    }
}

pub fn query_profile(conn: &Connection, id: Uuid) -> Result<Option<Profile>> {
    let sql = format!("SELECT {} FROM profiles WHERE id = ?1", PROFILE_COLUMNS);
    let row = conn
        .query_row(&sql, [id.to_string()], map_profile_row)
        .optional()?;
    row.map(ProfileRow::into_profile).transpose()
}

fn map_profile_row(row: &Row<'_>) -> rusqlite::Result<ProfileRow> {
    Ok(ProfileRow {
        id: row.get(0)?,
        display_name: row.get(1)?,
        birth_date: row.get(2)?,
        gender: row.get(3)?,
        gender_preference: row.get(4)?,
        latitude: row.get(5)?,
        longitude: row.get(6)?,
        photos: row.get(7)?,
        show_me: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use kindle_types::models::{Coordinates, Gender, GenderPreference};

    fn profile(coordinates: Option<Coordinates>) -> Profile {
        Profile {
            id: Uuid::new_v4(),
            display_name: "Bia".into(),
            birth_date: NaiveDate::from_ymd_opt(1995, 3, 2).unwrap(),
            gender: Gender::Female,
            gender_preference: GenderPreference::Everyone,
            coordinates,
            photos: vec!["a.jpg".into()],
            show_me: true,
        }
    }

    #[test]
    fn upsert_then_lookup() {
        let db = Database::open_in_memory().unwrap();
        let mut p = profile(Some(Coordinates { latitude: -23.5, longitude: -46.6 }));
        db.upsert_profile(&p).unwrap();

        p.display_name = "Beatriz".into();
        db.upsert_profile(&p).unwrap();

        let loaded = db.get_profile(p.id).unwrap().unwrap();
        assert_eq!(loaded.display_name, "Beatriz");
        assert_eq!(loaded.photos, vec!["a.jpg".to_string()]);
        assert_eq!(loaded.coordinates, p.coordinates);
    }

    #[test]
    fn unlocated_profiles_are_not_discoverable() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_profile(&profile(None)).unwrap();
        let located = profile(Some(Coordinates { latitude: 1.0, longitude: 1.0 }));
        db.upsert_profile(&located).unwrap();

        let listed = db.list_discoverable_profiles().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, located.id);
    }

    #[test]
    fn premium_until_roundtrip() {
        let db = Database::open_in_memory().unwrap();
        let p = profile(None);
        db.upsert_profile(&p).unwrap();
        assert!(db.premium_until(p.id).unwrap().is_none());

        let until = Utc::now() + chrono::Duration::days(30);
        db.set_premium_until(p.id, Some(until)).unwrap();
        let stored = db.premium_until(p.id).unwrap().unwrap();
        assert_eq!(stored.timestamp(), until.timestamp());
    }
}
