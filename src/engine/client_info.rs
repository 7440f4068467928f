use std::net::IpAddr;
use std::time::Duration;

use log::debug;
use rocket::{
    request::{FromRequest, Outcome},
    tokio::time::timeout,
    Request,
};
use serde::Deserialize;

use crate::error::Result;
use crate::model::common::client::{ClientMetadata, UNKNOWN};

const MAX_USER_AGENT_LENGTH: usize = 512;

/// Client details observed on the request itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientInfo {
    pub user_agent: Option<String>,
    pub ip: Option<IpAddr>,
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for ClientInfo {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        Outcome::Success(Self {
            user_agent: req.headers().get_one("User-Agent").map(str::to_string),
            ip: req.client_ip(),
        })
    }
}

/// Response of the IP lookup service. Only the fields we record.
#[derive(Debug, Deserialize)]
struct LookupResponse {
    #[serde(default)]
    org: Option<String>,
    #[serde(default)]
    country: Option<String>,
}

impl LookupResponse {
    fn network(self) -> Option<String> {
        match (self.org, self.country) {
            (Some(org), Some(country)) => Some(format!("{org} ({country})")),
            (Some(org), None) => Some(org),
            (None, Some(country)) => Some(country),
            (None, None) => None,
        }
    }
}

/// Builds the client metadata recorded with ballots and audit events,
/// optionally asking an external service about the source address.
#[derive(Clone)]
pub struct IpEnricher {
    http: reqwest::Client,
    /// URL template; `{ip}` is replaced by the client address.
    lookup_url: Option<String>,
    timeout: Duration,
}

impl IpEnricher {
    pub fn new(lookup_url: Option<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            lookup_url,
            timeout,
        })
    }

    /// An enricher that never performs a lookup.
    pub fn disabled() -> Self {
        Self {
            http: reqwest::Client::new(),
            lookup_url: None,
            timeout: Duration::ZERO,
        }
    }

    /// Never fails: anything that cannot be determined in time is recorded
    /// as "unknown".
    pub async fn metadata(&self, client: &ClientInfo, reported_user_agent: Option<&str>) -> ClientMetadata {
        let user_agent = client
            .user_agent
            .as_deref()
            .or(reported_user_agent)
            .map(|ua| ua.chars().take(MAX_USER_AGENT_LENGTH).collect())
            .unwrap_or_else(|| UNKNOWN.to_string());
        let network = match client.ip {
            Some(ip) => self.network(ip).await,
            None => UNKNOWN.to_string(),
        };
        ClientMetadata {
            user_agent,
            ip: client
                .ip
                .map_or_else(|| UNKNOWN.to_string(), |ip| ip.to_string()),
            network,
        }
    }

    async fn network(&self, ip: IpAddr) -> String {
        let url = match self.lookup_url {
            Some(ref template) => template.replace("{ip}", &ip.to_string()),
            None => return UNKNOWN.to_string(),
        };
        match timeout(self.timeout, self.lookup(&url)).await {
            Ok(Ok(Some(network))) => network,
            Ok(Ok(None)) => UNKNOWN.to_string(),
            Ok(Err(err)) => {
                debug!("IP lookup for {ip} failed: {err}");
                UNKNOWN.to_string()
            }
            Err(_) => {
                debug!("IP lookup for {ip} timed out");
                UNKNOWN.to_string()
            }
        }
    }

    async fn lookup(&self, url: &str) -> Result<Option<String>> {
        let response: LookupResponse = self
            .http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response.network())
    }
}
