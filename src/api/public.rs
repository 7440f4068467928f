use rocket::{http::Status, serde::json::Json, Route, State};

use crate::{
    engine::Engine,
    error::{Error, Result},
    model::api::{candidate::CandidateDescription, recap::RecapEntry, settings::SettingsView},
    store::Store,
};

pub fn routes() -> Vec<Route> {
    routes![candidates, settings, recap]
}

/// The ballot, ordered by candidate number.
#[get("/candidates")]
pub async fn candidates(store: &State<Store>) -> Result<Json<Vec<CandidateDescription>>> {
    let candidates = store.candidates().await?;
    Ok(Json(candidates.into_iter().map(Into::into).collect()))
}

/// May lag behind the authoritative flags by the settings cache TTL.
#[get("/settings")]
pub async fn settings(engine: &State<Engine>) -> Result<Json<SettingsView>> {
    Ok(Json(engine.phase.current().await?.into()))
}

#[get("/recap")]
pub async fn recap(engine: &State<Engine>) -> Result<Json<Vec<RecapEntry>>> {
    if !engine.phase.is_results_visible().await? {
        return Err(Error::Status(
            Status::Forbidden,
            "Results are not public yet.".to_string(),
        ));
    }
    Ok(Json(engine.recap.recap().await?))
}
