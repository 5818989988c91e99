use std::collections::BTreeMap;

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::models::plan::FeatureId;
use crate::AppState;

pub async fn plans(State(state): State<AppState>) -> Json<Value> {
    // Lets clients badge locked features without a round trip per feature.
    let feature_tiers: BTreeMap<&str, _> = FeatureId::ALL
        .iter()
        .filter_map(|f| Some((f.as_str(), state.resolver.minimum_tier_for(*f)?)))
        .collect();

    Json(json!({
        "plans": state.resolver.plans(),
        "featureTiers": feature_tiers,
    }))
}
