use rocket::{serde::json::Json, Route, State};

use crate::{
    engine::Engine,
    error::{Error, Result},
    model::{
        api::{
            admin::{AdminCredentials, AdminSummary},
            audit::{AuditFilter, AuditPage},
            auth::AuthToken,
            candidate::CandidateDescription,
            recap::{RecapEntry, RecapVerification, RollStats},
            settings::{SettingsPatch, SettingsView},
            voter::{IssuedCredential, NewVoterRequest, ResetResponse, VoterPage},
        },
        common::{audit::AuditKind, identity::IdentityNumber},
        db::{admin::NewAdmin, audit::NewAuditEvent, candidate::Candidate},
        pagination::Pagination,
    },
    store::Store,
};

pub fn routes() -> Vec<Route> {
    routes![
        add_voter,
        list_voters,
        delete_voter,
        reset_vote_status,
        create_candidate,
        update_settings,
        admin_recap,
        verify_recap,
        roll_stats,
        audit_log,
        get_admins,
        create_admin,
    ]
}

/// Add one voter. The response is the only time the access code is shown.
#[post("/admin/voters", data = "<request>", format = "json")]
pub async fn add_voter(
    token: AuthToken,
    request: Json<NewVoterRequest>,
    engine: &State<Engine>,
) -> Result<Json<IssuedCredential>> {
    let issued = engine
        .credentials
        .add_voter(request.into_inner(), &token.username)
        .await?;
    Ok(Json(issued))
}

#[get("/admin/voters")]
pub async fn list_voters(
    _token: AuthToken,
    page: Pagination,
    engine: &State<Engine>,
) -> Result<Json<VoterPage>> {
    Ok(Json(engine.credentials.voters(page).await?))
}

#[delete("/admin/voters/<nim>")]
pub async fn delete_voter(
    token: AuthToken,
    nim: IdentityNumber,
    engine: &State<Engine>,
) -> Result<()> {
    engine.credentials.delete_voter(&nim, &token.username).await
}

#[post("/admin/voters/<nim>/reset")]
pub async fn reset_vote_status(
    token: AuthToken,
    nim: IdentityNumber,
    engine: &State<Engine>,
) -> Result<Json<ResetResponse>> {
    let response = engine
        .credentials
        .reset_vote_status(&nim, &token.username)
        .await?;
    Ok(Json(response))
}

#[post("/admin/candidates", data = "<candidate>", format = "json")]
pub async fn create_candidate(
    token: AuthToken,
    candidate: Json<CandidateDescription>,
    store: &State<Store>,
) -> Result<Json<CandidateDescription>> {
    let candidate: Candidate = candidate.into_inner().into();
    if candidate.id == 0 {
        return Err(Error::bad_request("Candidate number must be at least 1"));
    }
    if candidate.lead_name.is_empty() || candidate.running_mate_name.is_empty() {
        return Err(Error::bad_request("Candidate names must not be empty"));
    }
    let event = NewAuditEvent::admin_action(&token.username, "create_candidate")
        .with_message(format!("Candidate {}", candidate.id));
    let candidate = store.insert_candidate(candidate, event).await?;
    Ok(Json(candidate.into()))
}

#[patch("/admin/settings", data = "<patch>", format = "json")]
pub async fn update_settings(
    token: AuthToken,
    patch: Json<SettingsPatch>,
    engine: &State<Engine>,
) -> Result<Json<SettingsView>> {
    let settings = engine.phase.update(patch.0, &token.username).await?;
    Ok(Json(settings.into()))
}

/// Live totals regardless of whether results are public.
#[get("/admin/recap")]
pub async fn admin_recap(
    _token: AuthToken,
    engine: &State<Engine>,
) -> Result<Json<Vec<RecapEntry>>> {
    Ok(Json(engine.recap.recap().await?))
}

#[get("/admin/recap/verify")]
pub async fn verify_recap(
    _token: AuthToken,
    engine: &State<Engine>,
) -> Result<Json<RecapVerification>> {
    Ok(Json(engine.recap.verify().await?))
}

#[get("/admin/stats")]
pub async fn roll_stats(_token: AuthToken, engine: &State<Engine>) -> Result<Json<RollStats>> {
    Ok(Json(engine.recap.stats().await?))
}

/// Newest first, optionally filtered by kind and identity number.
#[get("/admin/audit?<kind>&<nim>")]
pub async fn audit_log(
    _token: AuthToken,
    kind: Option<AuditKind>,
    nim: Option<String>,
    page: Pagination,
    engine: &State<Engine>,
) -> Result<Json<AuditPage>> {
    let filter = AuditFilter { kind, nim };
    Ok(Json(engine.audit.query(&filter, page).await?))
}

#[get("/admins")]
pub async fn get_admins(_token: AuthToken, store: &State<Store>) -> Result<Json<Vec<AdminSummary>>> {
    let admins = store.admins().await?;
    Ok(Json(admins.into_iter().map(AdminSummary::from).collect()))
}

#[post("/admins", data = "<new_admin>", format = "json")]
pub async fn create_admin(
    token: AuthToken,
    new_admin: Json<AdminCredentials>,
    store: &State<Store>,
    engine: &State<Engine>,
) -> Result<Json<AdminSummary>> {
    let new_admin = new_admin.into_inner();
    if !new_admin.is_acceptable() {
        return Err(Error::bad_request("Illegal admin credentials"));
    }

    let password_hash = engine.credentials.hash(new_admin.password).await?;
    let admin = NewAdmin {
        username: new_admin.username.trim().to_string(),
        password_hash,
    };
    let event = NewAuditEvent::admin_action(&token.username, "create_admin")
        .with_message(format!("Admin {}", admin.username));
    let admin = store.insert_admin(admin, event).await?;
    Ok(Json(admin.into()))
}

#[cfg(test)]
mod tests {
    use rocket::{
        http::{ContentType, Status},
        local::asynchronous::Client,
        serde::json::{serde_json::json, Value},
    };

    use crate::model::api::vote::{VoteRequest, VoteResponse, VoteStatus};
    use crate::store::{ElectionStore, MemoryStore};

    use super::*;

    async fn add_example_voter(client: &Client) -> IssuedCredential {
        let response = client
            .post(uri!(add_voter))
            .header(ContentType::JSON)
            .body(json!(NewVoterRequest::example()).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        response.into_json().await.unwrap()
    }

    async fn add_candidate(client: &Client, candidate: CandidateDescription) -> Status {
        client
            .post(uri!(create_candidate))
            .header(ContentType::JSON)
            .body(json!(candidate).to_string())
            .dispatch()
            .await
            .status()
    }

    async fn patch_settings(client: &Client, patch: Value) -> Status {
        client
            .patch(uri!(update_settings))
            .header(ContentType::JSON)
            .body(patch.to_string())
            .dispatch()
            .await
            .status()
    }

    async fn vote(client: &Client) -> VoteResponse {
        client
            .post(uri!(crate::api::voting::submit_vote))
            .header(ContentType::JSON)
            .body(json!(VoteRequest::example()).to_string())
            .dispatch()
            .await
            .into_json()
            .await
            .unwrap()
    }

    #[backend_test(admin)]
    async fn voter_lifecycle(client: Client) {
        let issued = add_example_voter(&client).await;
        assert_eq!("2235001", issued.nim);
        assert_eq!("ABC123", issued.access_code);

        // The same identity number cannot be registered twice.
        let response = client
            .post(uri!(add_voter))
            .header(ContentType::JSON)
            .body(json!(NewVoterRequest::example()).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::Conflict, response.status());

        // A generated code is returned once, and never listed.
        let response = client
            .post(uri!(add_voter))
            .header(ContentType::JSON)
            .body(json!(NewVoterRequest::generated("2235002")).to_string())
            .dispatch()
            .await;
        let generated: IssuedCredential = response.into_json().await.unwrap();
        assert_eq!(8, generated.access_code.len());

        let response = client.get("/admin/voters?page_size=1").dispatch().await;
        assert_eq!(Status::Ok, response.status());
        let page: Value = response.into_json().await.unwrap();
        assert_eq!(1, page["voters"].as_array().unwrap().len());
        assert_eq!(2, page["pagination"]["total"]);
        assert!(!page.to_string().contains(&generated.access_code));

        let response = client.delete("/admin/voters/2235002").dispatch().await;
        assert_eq!(Status::Ok, response.status());
        let response = client.delete("/admin/voters/2235002").dispatch().await;
        assert_eq!(Status::NotFound, response.status());
    }

    #[backend_test(admin)]
    async fn invalid_voter_requests(client: Client) {
        let response = client
            .post(uri!(add_voter))
            .header(ContentType::JSON)
            .body(json!({ "nim": "12", "name": "Too Short" }).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::BadRequest, response.status());

        // Not an identity number, so no route matches.
        let response = client.delete("/admin/voters/abc").dispatch().await;
        assert_eq!(Status::NotFound, response.status());
    }

    #[backend_test(admin)]
    async fn reset_lets_voter_vote_again(client: Client, store: MemoryStore) {
        add_example_voter(&client).await;
        assert_eq!(Status::Ok, add_candidate(&client, CandidateDescription::example()).await);
        assert_eq!(Status::Ok, patch_settings(&client, json!({ "voting_open": true })).await);

        assert_eq!(VoteStatus::Success, vote(&client).await.status);

        // A voter with a live ballot cannot be deleted.
        let response = client.delete("/admin/voters/2235001").dispatch().await;
        assert_eq!(Status::Conflict, response.status());

        let response = client.post("/admin/voters/2235001/reset").dispatch().await;
        assert_eq!(Status::Ok, response.status());
        let reset: ResetResponse = response.into_json().await.unwrap();
        assert!(reset.ballot_retracted);

        let recap: Vec<RecapEntry> = client
            .get(uri!(admin_recap))
            .dispatch()
            .await
            .into_json()
            .await
            .unwrap();
        assert_eq!(0, recap[0].total);

        assert_eq!(VoteStatus::Success, vote(&client).await.status);

        let ballots = store.ballots_for(&"2235001".parse().unwrap());
        assert_eq!(2, ballots.len());
        assert_eq!(1, ballots.iter().filter(|ballot| ballot.is_live()).count());

        let verification: RecapVerification = client
            .get(uri!(verify_recap))
            .dispatch()
            .await
            .into_json()
            .await
            .unwrap();
        assert!(verification.consistent);

        let stats: RollStats = client
            .get(uri!(roll_stats))
            .dispatch()
            .await
            .into_json()
            .await
            .unwrap();
        assert_eq!(1, stats.registered_voters);
        assert_eq!(1, stats.voted);
        assert_eq!(1, stats.live_ballots);
    }

    #[backend_test(admin)]
    async fn candidates(client: Client) {
        assert_eq!(Status::Ok, add_candidate(&client, CandidateDescription::example()).await);
        assert_eq!(
            Status::Conflict,
            add_candidate(&client, CandidateDescription::example()).await
        );

        let zero = CandidateDescription {
            id: 0,
            ..CandidateDescription::example()
        };
        assert_eq!(Status::BadRequest, add_candidate(&client, zero).await);
    }

    #[backend_test(admin)]
    async fn settings_patches(client: Client) {
        assert_eq!(Status::BadRequest, patch_settings(&client, json!({})).await);

        let response = client
            .patch(uri!(update_settings))
            .header(ContentType::JSON)
            .body(json!({ "voting_open": true }).to_string())
            .dispatch()
            .await;
        let view: SettingsView = response.into_json().await.unwrap();
        assert!(view.voting_open);
        assert!(!view.show_live_results);
        assert_eq!(1, view.version);
    }

    #[backend_test(admin)]
    async fn audit_log_is_filterable(client: Client) {
        add_example_voter(&client).await;
        assert_eq!(Status::Ok, patch_settings(&client, json!({ "voting_open": true })).await);

        let page: Value = client
            .get("/admin/audit?kind=ADMIN_ACTION")
            .dispatch()
            .await
            .into_json()
            .await
            .unwrap();
        let events = page["events"].as_array().unwrap();
        // Bootstrap admin, add_voter and open_voting, newest first.
        assert_eq!(3, events.len());
        assert_eq!("open_voting", events[0]["detail"]["action"]);
        assert_eq!("add_voter", events[1]["detail"]["action"]);

        let page: Value = client
            .get("/admin/audit?nim=2235001")
            .dispatch()
            .await
            .into_json()
            .await
            .unwrap();
        assert_eq!(1, page["pagination"]["total"]);
    }

    #[backend_test(admin)]
    async fn admin_management(client: Client, store: MemoryStore) {
        let response = client
            .post(uri!(create_admin))
            .header(ContentType::JSON)
            .body(json!(AdminCredentials::example2()).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());

        let response = client
            .post(uri!(create_admin))
            .header(ContentType::JSON)
            .body(json!(AdminCredentials::example2()).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::Conflict, response.status());

        let response = client
            .post(uri!(create_admin))
            .header(ContentType::JSON)
            .body(json!(AdminCredentials::empty()).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::BadRequest, response.status());

        let admins: Vec<AdminSummary> = client
            .get(uri!(get_admins))
            .dispatch()
            .await
            .into_json()
            .await
            .unwrap();
        assert_eq!(2, admins.len());
        assert_eq!(2, store.admins().await.unwrap().len());
    }

    #[backend_test]
    async fn admin_routes_need_login(client: Client) {
        for uri in ["/admin/voters", "/admin/recap", "/admin/stats", "/admin/audit", "/admins"] {
            let response = client.get(uri).dispatch().await;
            assert_eq!(Status::Unauthorized, response.status(), "{uri}");
        }
    }
}
