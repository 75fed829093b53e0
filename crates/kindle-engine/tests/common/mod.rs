#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use uuid::Uuid;

use kindle_db::Database;
use kindle_engine::notify::MemorySink;
use kindle_engine::{Engine, EngineConfig};
use kindle_types::models::{Coordinates, Gender, GenderPreference, Profile, SwipeKind};

pub struct Harness {
    pub engine: Engine,
    pub db: Arc<Database>,
    pub sink: Arc<MemorySink>,
    _dir: Option<tempfile::TempDir>,
}

pub fn harness() -> Harness {
    harness_with(EngineConfig {
        retry_base: Duration::from_millis(1),
        ..EngineConfig::default()
    })
}

pub fn harness_with(config: EngineConfig) -> Harness {
    build(Database::open_in_memory().unwrap(), None, config)
}

/// A file-backed database with its reader pool.
pub fn harness_on_disk() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(&dir.path().join("kindle.db")).unwrap();
    build(
        db,
        Some(dir),
        EngineConfig {
            retry_base: Duration::from_millis(1),
            ..EngineConfig::default()
        },
    )
}

fn build(db: Database, dir: Option<tempfile::TempDir>, config: EngineConfig) -> Harness {
    let db = Arc::new(db);
    let sink = Arc::new(MemorySink::new());
    let engine = Engine::new(db.clone(), sink.clone(), &config);
    Harness {
        engine,
        db,
        sink,
        _dir: dir,
    }
}

impl Harness {
    /// A visible adult near (0, 0), interested in everyone.
    pub fn user(&self, name: &str, offset_km: f64) -> Uuid {
        let profile = Profile {
            id: Uuid::new_v4(),
            display_name: name.into(),
            birth_date: NaiveDate::from_ymd_opt(1996, 5, 20).unwrap(),
            gender: Gender::Female,
            gender_preference: GenderPreference::Everyone,
            // one degree of latitude is ~111 km
            coordinates: Some(Coordinates {
                latitude: offset_km / 111.0,
                longitude: 0.0,
            }),
            photos: vec![format!("{name}.jpg")],
            show_me: true,
        };
        self.db.upsert_profile(&profile).unwrap();
        profile.id
    }

    pub fn make_premium(&self, user_id: Uuid) {
        self.db
            .set_premium_until(user_id, Some(Utc::now() + chrono::Duration::days(30)))
            .unwrap();
    }

    /// Two users who liked each other, and their chat.
    pub fn matched_pair(&self) -> (Uuid, Uuid, Uuid) {
        let a = self.user("ana", 1.0);
        let b = self.user("bia", 2.0);
        self.engine.actions.record_swipe(a, b, SwipeKind::Like).unwrap();
        let outcome = self.engine.actions.record_swipe(b, a, SwipeKind::Like).unwrap();
        let chat_id = outcome.matched.unwrap().chat_id;
        (a, b, chat_id)
    }
}
