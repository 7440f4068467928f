use log::warn;
use rocket::{
    http::{Cookie, CookieJar, Status},
    serde::json::Json,
    Route, State,
};

use crate::{
    config::Config,
    engine::{client_info::ClientInfo, Engine},
    error::{Error, Result},
    model::{
        api::{
            admin::AdminCredentials,
            auth::{AuthToken, AUTH_TOKEN_COOKIE},
        },
        db::audit::NewAuditEvent,
    },
    store::Store,
};

pub fn routes() -> Vec<Route> {
    routes![authenticate, logout]
}

#[post("/auth/admin", data = "<credentials>", format = "json")]
pub async fn authenticate(
    cookies: &CookieJar<'_>,
    credentials: Json<AdminCredentials>,
    client: ClientInfo,
    store: &State<Store>,
    engine: &State<Engine>,
    config: &State<Config>,
) -> Result<()> {
    let credentials = credentials.into_inner();
    let admin = store.admin_by_username(&credentials.username).await?;

    // Unknown usernames still pay for a full hash check.
    let valid = engine
        .credentials
        .verify(
            credentials.password,
            admin.as_ref().map(|admin| admin.password_hash.clone()),
        )
        .await?;

    let admin = match admin {
        Some(admin) if valid => admin,
        _ => {
            warn!("Failed admin login for {:?}", credentials.username);
            let metadata = engine.enricher.metadata(&client, None).await;
            engine
                .audit
                .append(NewAuditEvent::admin_login_fail(
                    &credentials.username,
                    &metadata,
                ))
                .await?;
            return Err(Error::unauthorized(
                "No admin found with the provided username and password combination.",
            ));
        }
    };

    let token = AuthToken::new(&admin);
    cookies.add(token.into_cookie(config)?);

    Ok(())
}

#[delete("/auth")]
pub fn logout(cookies: &CookieJar) -> Status {
    cookies.remove(Cookie::named(AUTH_TOKEN_COOKIE));
    Status::Ok
}
