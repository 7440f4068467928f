use rocket::{serde::json::Json, Route, State};

use crate::{
    engine::{client_info::ClientInfo, coordinator::VoteOutcome, Engine},
    error::Result,
    model::api::vote::{CredentialRequest, ValidateResponse, VoteRequest, VoteResponse},
};

pub fn routes() -> Vec<Route> {
    routes![validate_voter, submit_vote]
}

/// Credential pre-check. Rejections are ordinary `200` responses.
#[post("/vote/validate", data = "<credential>", format = "json")]
pub async fn validate_voter(
    credential: Json<CredentialRequest>,
    client: ClientInfo,
    engine: &State<Engine>,
) -> Result<Json<ValidateResponse>> {
    let response = engine
        .coordinator
        .validate_voter(credential.into_inner(), client)
        .await?;
    Ok(Json(response))
}

#[post("/vote", data = "<request>", format = "json")]
pub async fn submit_vote(
    request: Json<VoteRequest>,
    client: ClientInfo,
    engine: &State<Engine>,
) -> Result<Json<VoteResponse>> {
    let response = match engine
        .coordinator
        .submit_vote(request.into_inner(), client)
        .await?
    {
        VoteOutcome::Success(ballot) => VoteResponse::success(&ballot),
        VoteOutcome::Rejected(reason) => VoteResponse::rejected(reason),
    };
    Ok(Json(response))
}
