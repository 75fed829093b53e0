use axum::{
    Extension, Json,
    extract::{Query, State},
};
use serde::Deserialize;

use kindle_engine::{DiscoverySettings, EngineError};
use kindle_types::api::{Claims, DiscoveryPage};
use kindle_types::models::GenderPreference;

use crate::error::ApiError;
use crate::{AppState, blocking};

#[derive(Debug, Default, Deserialize)]
pub struct DiscoveryQuery {
    pub cursor: Option<String>,
    pub limit: Option<u32>,
    pub max_distance_km: Option<f64>,
    pub min_age: Option<u32>,
    pub max_age: Option<u32>,
    pub gender_preference: Option<GenderPreference>,
}

impl DiscoveryQuery {
    fn has_overrides(&self) -> bool {
        self.max_distance_km.is_some()
            || self.min_age.is_some()
            || self.max_age.is_some()
            || self.gender_preference.is_some()
    }

    /// The viewer's defaults with whatever the query overrides.
    fn apply(&self, mut settings: DiscoverySettings) -> DiscoverySettings {
        if let Some(km) = self.max_distance_km {
            settings.max_distance_km = km;
        }
        if let Some(min) = self.min_age {
            settings.min_age = min;
        }
        if let Some(max) = self.max_age {
            settings.max_age = max;
        }
        if let Some(pref) = self.gender_preference {
            settings.gender_preference = pref;
        }
        settings
    }
}

pub async fn discover(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<DiscoveryQuery>,
) -> Result<Json<DiscoveryPage>, ApiError> {
    let viewer_id = claims.sub;
    let page = blocking(&state, move |engine| {
        let settings = if query.has_overrides() {
            let viewer = engine
                .db
                .get_profile(viewer_id)?
                .ok_or_else(|| EngineError::not_found(format!("profile {}", viewer_id)))?;
            Some(query.apply(DiscoverySettings::for_viewer(&viewer)))
        } else {
            None
        };
        engine
            .discovery
            .discover(viewer_id, settings, query.cursor.as_deref(), query.limit)
    })
    .await?;

    Ok(Json(page))
}
