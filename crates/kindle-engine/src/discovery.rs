use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use kindle_db::Database;
use kindle_types::api::{DiscoveryCandidate, DiscoveryPage};
use kindle_types::models::{Coordinates, GenderPreference, Profile, SwipeKind};

use crate::directory::UserDirectory;
use crate::error::{EngineError, Result};

pub const MIN_AGE: u32 = 18;
pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

const EARTH_RADIUS_KM: f64 = 6371.0;
const CURSOR_VERSION: &str = "v1";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoverySettings {
    pub max_distance_km: f64,
    pub min_age: u32,
    pub max_age: u32,
    pub gender_preference: GenderPreference,
}

impl DiscoverySettings {
    pub fn for_viewer(viewer: &Profile) -> Self {
        Self {
            max_distance_km: 50.0,
            min_age: MIN_AGE,
            max_age: 99,
            gender_preference: viewer.gender_preference,
        }
    }

    fn validate(&self) -> Result<()> {
        if !self.max_distance_km.is_finite() || self.max_distance_km <= 0.0 {
            return Err(EngineError::validation("max_distance_km must be positive"));
        }
        if self.min_age > self.max_age {
            return Err(EngineError::validation("min_age must not exceed max_age"));
        }
        Ok(())
    }
}

/// Great-circle distance in kilometres.
pub fn haversine_km(a: Coordinates, b: Coordinates) -> f64 {
    let (lat1, lat2) = (a.latitude.to_radians(), b.latitude.to_radians());
    let dlat = (b.latitude - a.latitude).to_radians();
    let dlon = (b.longitude - a.longitude).to_radians();
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().asin()
}

/// Continuation token: position in the ordered candidate list plus the
/// exclusion-set size it was computed against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub offset: usize,
    pub excluded: usize,
}

impl Cursor {
    pub fn encode(&self) -> String {
        format!("{}.{}.{}", CURSOR_VERSION, self.offset, self.excluded)
    }

    pub fn decode(raw: &str) -> Result<Self> {
        let invalid = || EngineError::validation(format!("malformed cursor '{}'", raw));
        let mut parts = raw.split('.');
        if parts.next() != Some(CURSOR_VERSION) {
            return Err(invalid());
        }
        let offset = parts.next().and_then(|p| p.parse().ok()).ok_or_else(invalid)?;
        let excluded = parts.next().and_then(|p| p.parse().ok()).ok_or_else(invalid)?;
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(Self { offset, excluded })
    }

    /// Where to resume given the current exclusion set. Everyone swiped
    /// since the token was issued has left the ordered list ahead of it.
    fn resume_at(&self, excluded_now: usize) -> usize {
        let grown = excluded_now.saturating_sub(self.excluded);
        self.offset.saturating_sub(grown)
    }
}

/// Pure candidate selection. `pool` is every visible profile; `liked_me`
/// maps users who already liked the viewer to their swipe kind.
#[allow(clippy::too_many_arguments)]
pub fn next_candidates(
    viewer: &Profile,
    settings: &DiscoverySettings,
    exclusion: &HashSet<Uuid>,
    liked_me: &HashMap<Uuid, SwipeKind>,
    pool: Vec<Profile>,
    today: NaiveDate,
    cursor: Option<&str>,
    limit: Option<u32>,
) -> Result<DiscoveryPage> {
    settings.validate()?;
    let origin = viewer
        .coordinates
        .ok_or_else(|| EngineError::validation("viewer has no location"))?;
    let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE) as usize;
    let start = match cursor {
        Some(raw) => Cursor::decode(raw)?.resume_at(exclusion.len()),
        None => 0,
    };
    let min_age = settings.min_age.max(MIN_AGE);

    let mut ranked: Vec<(f64, u32, Profile)> = pool
        .into_iter()
        .filter(|p| p.id != viewer.id && p.show_me && !exclusion.contains(&p.id))
        .filter(|p| settings.gender_preference.accepts(p.gender))
        .filter_map(|p| {
            let age = p.age_on(today);
            if age < min_age || age > settings.max_age {
                return None;
            }
            let distance = haversine_km(origin, p.coordinates?);
            (distance <= settings.max_distance_km).then_some((distance, age, p))
        })
        .collect();

    ranked.sort_by(|a, b| {
        a.0.partial_cmp(&b.0)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.2.id.cmp(&b.2.id))
    });

    let total = ranked.len();
    // A cursor past the end yields an empty, final page.
    let start = start.min(total);
    let end = start.saturating_add(limit).min(total);
    let candidates = ranked
        .into_iter()
        .skip(start)
        .take(limit)
        .map(|(distance_km, age, profile)| {
            let liked = liked_me.get(&profile.id).copied();
            DiscoveryCandidate {
                age,
                distance_km: (distance_km * 10.0).round() / 10.0,
                liked_me: liked.is_some(),
                superliked_me: liked == Some(SwipeKind::Superlike),
                profile,
            }
        })
        .collect();

    let next_cursor = (end < total).then(|| {
        Cursor {
            offset: end,
            excluded: exclusion.len(),
        }
        .encode()
    });

    Ok(DiscoveryPage {
        candidates,
        next_cursor,
    })
}

/// Loads the viewer's exclusion set and the visible pool, then delegates to
/// [`next_candidates`]. Reads are uncoordinated; a few seconds of staleness
/// is fine.
pub struct DiscoveryFilter {
    db: Arc<Database>,
    directory: Arc<dyn UserDirectory>,
}

impl DiscoveryFilter {
    pub fn new(db: Arc<Database>, directory: Arc<dyn UserDirectory>) -> Self {
        Self { db, directory }
    }

    /// Self, everyone judged by the viewer, and everyone ever matched.
    pub fn exclusion_set(&self, viewer_id: Uuid) -> Result<HashSet<Uuid>> {
        let mut excluded: HashSet<Uuid> = self.db.judged_ids(viewer_id)?.into_iter().collect();
        excluded.extend(self.db.matched_ids(viewer_id)?);
        excluded.insert(viewer_id);
        Ok(excluded)
    }

    pub fn discover(
        &self,
        viewer_id: Uuid,
        settings: Option<DiscoverySettings>,
        cursor: Option<&str>,
        limit: Option<u32>,
    ) -> Result<DiscoveryPage> {
        let viewer = self
            .directory
            .lookup(viewer_id)?
            .ok_or_else(|| EngineError::not_found(format!("profile {}", viewer_id)))?;
        let settings = settings.unwrap_or_else(|| DiscoverySettings::for_viewer(&viewer));
        let exclusion = self.exclusion_set(viewer_id)?;
        let liked_me: HashMap<Uuid, SwipeKind> = self
            .db
            .positive_swipes_on(viewer_id, true)?
            .into_iter()
            .map(|s| (s.actor_id, s.kind))
            .collect();
        let pool = self.db.list_discoverable_profiles()?;

        let page = next_candidates(
            &viewer,
            &settings,
            &exclusion,
            &liked_me,
            pool,
            Utc::now().date_naive(),
            cursor,
            limit,
        )?;
        debug!(
            viewer_id = %viewer_id,
            excluded = exclusion.len(),
            returned = page.candidates.len(),
            "Discovery page built"
        );
        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kindle_types::api::ErrorKind;
    use kindle_types::models::Gender;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, 1).unwrap()
    }

    fn person(gender: Gender, born: i32, lat: f64, lon: f64) -> Profile {
        Profile {
            id: Uuid::new_v4(),
            display_name: "p".into(),
            birth_date: NaiveDate::from_ymd_opt(born, 1, 1).unwrap(),
            gender,
            gender_preference: GenderPreference::Everyone,
            coordinates: Some(Coordinates { latitude: lat, longitude: lon }),
            photos: vec![],
            show_me: true,
        }
    }

    fn settings() -> DiscoverySettings {
        DiscoverySettings {
            max_distance_km: 100.0,
            min_age: 18,
            max_age: 60,
            gender_preference: GenderPreference::Everyone,
        }
    }

    fn ids(page: &DiscoveryPage) -> Vec<Uuid> {
        page.candidates.iter().map(|c| c.profile.id).collect()
    }

    #[test]
    fn haversine_is_sane() {
        let sp = Coordinates { latitude: -23.5505, longitude: -46.6333 };
        let rj = Coordinates { latitude: -22.9068, longitude: -43.1729 };
        let d = haversine_km(sp, rj);
        assert!((350.0..370.0).contains(&d), "got {d}");
        assert!(haversine_km(sp, sp) < 1e-9);
    }

    #[test]
    fn nearest_first_and_filtered() {
        let viewer = person(Gender::Female, 1995, 0.0, 0.0);
        let near = person(Gender::Male, 1994, 0.1, 0.0);
        let far = person(Gender::Male, 1994, 0.5, 0.0);
        let too_far = person(Gender::Male, 1994, 5.0, 0.0);
        let minor = person(Gender::Male, 2010, 0.05, 0.0);
        let mut hidden = person(Gender::Male, 1994, 0.05, 0.0);
        hidden.show_me = false;
        let mut unlocated = person(Gender::Male, 1994, 0.0, 0.0);
        unlocated.coordinates = None;

        let pool = vec![
            far.clone(),
            too_far,
            minor,
            hidden,
            unlocated,
            near.clone(),
            viewer.clone(),
        ];
        let page = next_candidates(
            &viewer,
            &settings(),
            &HashSet::new(),
            &HashMap::new(),
            pool,
            today(),
            None,
            None,
        )
        .unwrap();
        assert_eq!(ids(&page), vec![near.id, far.id]);
        assert!(page.next_cursor.is_none());
    }

    #[test]
    fn gender_preference_and_exclusions_apply() {
        let viewer = person(Gender::Male, 1990, 0.0, 0.0);
        let woman = person(Gender::Female, 1992, 0.1, 0.0);
        let man = person(Gender::Male, 1992, 0.1, 0.0);
        let judged = person(Gender::Female, 1992, 0.2, 0.0);
        let mut s = settings();
        s.gender_preference = GenderPreference::Women;

        let exclusion: HashSet<Uuid> = [judged.id].into();
        let page = next_candidates(
            &viewer,
            &s,
            &exclusion,
            &HashMap::new(),
            vec![woman.clone(), man, judged],
            today(),
            None,
            None,
        )
        .unwrap();
        assert_eq!(ids(&page), vec![woman.id]);
    }

    #[test]
    fn liked_me_flags_are_set() {
        let viewer = person(Gender::Female, 1995, 0.0, 0.0);
        let fan = person(Gender::Male, 1994, 0.1, 0.0);
        let liked: HashMap<Uuid, SwipeKind> = [(fan.id, SwipeKind::Superlike)].into();
        let page = next_candidates(
            &viewer,
            &settings(),
            &HashSet::new(),
            &liked,
            vec![fan],
            today(),
            None,
            None,
        )
        .unwrap();
        assert!(page.candidates[0].liked_me);
        assert!(page.candidates[0].superliked_me);
    }

    #[test]
    fn cursor_accounts_for_new_exclusions() {
        let viewer = person(Gender::Female, 1995, 0.0, 0.0);
        let pool: Vec<Profile> = (1..=5)
            .map(|i| person(Gender::Male, 1994, i as f64 * 0.01, 0.0))
            .collect();
        let mut exclusion = HashSet::new();

        let first = next_candidates(
            &viewer, &settings(), &exclusion, &HashMap::new(), pool.clone(), today(), None, Some(2),
        )
        .unwrap();
        assert_eq!(ids(&first), vec![pool[0].id, pool[1].id]);
        let cursor = first.next_cursor.clone().unwrap();
        assert_eq!(cursor, "v1.2.0");

        // The viewer swiped both candidates from the first page.
        exclusion.insert(pool[0].id);
        exclusion.insert(pool[1].id);
        let second = next_candidates(
            &viewer, &settings(), &exclusion, &HashMap::new(), pool.clone(), today(), Some(&cursor), Some(2),
        )
        .unwrap();
        assert_eq!(ids(&second), vec![pool[2].id, pool[3].id]);
        assert_eq!(second.next_cursor.as_deref(), Some("v1.2.2"));
    }

    #[test]
    fn bad_input_is_rejected() {
        let mut viewer = person(Gender::Female, 1995, 0.0, 0.0);
        for raw in ["", "v2.1.1", "v1.x.0", "v1.1", "v1.1.1.1"] {
            let err = next_candidates(
                &viewer, &settings(), &HashSet::new(), &HashMap::new(), vec![], today(), Some(raw), None,
            )
            .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation, "cursor {raw:?}");
        }

        viewer.coordinates = None;
        let err = next_candidates(
            &viewer, &settings(), &HashSet::new(), &HashMap::new(), vec![], today(), None, None,
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn cursor_past_the_end_is_an_empty_final_page() {
        let viewer = person(Gender::Female, 1995, 0.0, 0.0);
        let pool: Vec<Profile> = (1..=3)
            .map(|i| person(Gender::Male, 1994, i as f64 * 0.01, 0.0))
            .collect();
        let huge = format!("v1.{}.0", usize::MAX);
        for raw in [huge.as_str(), "v1.3.0", "v1.40.0"] {
            let page = next_candidates(
                &viewer, &settings(), &HashSet::new(), &HashMap::new(), pool.clone(), today(), Some(raw), Some(100),
            )
            .unwrap();
            assert!(page.candidates.is_empty(), "cursor {raw:?}");
            assert!(page.next_cursor.is_none(), "cursor {raw:?}");
        }

        let page = next_candidates(
            &viewer, &settings(), &HashSet::new(), &HashMap::new(), vec![], today(), Some(&huge), None,
        )
        .unwrap();
        assert!(page.candidates.is_empty());
    }

    #[test]
    fn limit_is_clamped() {
        let viewer = person(Gender::Female, 1995, 0.0, 0.0);
        let pool: Vec<Profile> = (1..=3)
            .map(|i| person(Gender::Male, 1994, i as f64 * 0.01, 0.0))
            .collect();
        let page = next_candidates(
            &viewer, &settings(), &HashSet::new(), &HashMap::new(), pool, today(), None, Some(0),
        )
        .unwrap();
        assert_eq!(page.candidates.len(), 1);
        assert_eq!(page.next_cursor.as_deref(), Some("v1.1.0"));
    }
}
