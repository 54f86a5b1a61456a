//! GitLab REST API access
//!
//! Listing endpoints are walked page by page. A page that fails to load stops
//! the walk; the records collected so far are kept and the failure travels with
//! them in a [`Listing`], so an empty result is never mistaken for an empty
//! server.

use anyhow::{anyhow, Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

use crate::config::Config;

/// A GitLab group (namespace holding projects)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: u64,
    pub name: String,
    /// URL slug of the group, used as its bucket directory
    pub path: String,
    /// Slash separated path including parent groups
    #[serde(default)]
    pub full_path: Option<String>,
}

/// A GitLab project (one repository)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: u64,
    pub name: String,
    /// URL slug of the project, used as its mirror directory
    pub path: String,
    /// HTTP(S) clone URL as advertised by the server
    pub http_url_to_repo: String,
    #[serde(default)]
    pub path_with_namespace: Option<String>,
}

impl Project {
    /// Name used in log lines
    pub fn display_name(&self) -> &str {
        self.path_with_namespace.as_deref().unwrap_or(&self.name)
    }
}

/// Why a listing stopped before the server signalled its end
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingError {
    pub endpoint: String,
    pub page: usize,
    pub message: String,
}

impl fmt::Display for ListingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (page {}): {}", self.endpoint, self.page, self.message)
    }
}

/// Records collected from a paginated endpoint
#[derive(Debug, Clone)]
pub struct Listing<T> {
    pub items: Vec<T>,
    /// Set when the walk was cut short; `items` then holds a prefix
    pub error: Option<ListingError>,
}

impl<T> Listing<T> {
    pub fn complete(items: Vec<T>) -> Self {
        Self { items, error: None }
    }

    pub fn truncated(items: Vec<T>, error: ListingError) -> Self {
        Self {
            items,
            error: Some(error),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Thin GitLab API v4 client
#[derive(Clone)]
pub struct GitLabClient {
    http: reqwest::Client,
    api_url: String,
    page_size: usize,
    max_pages: usize,
}

impl GitLabClient {
    /// Create a client for `base_url` authenticated with a bearer token
    pub fn new(base_url: &str, token: &str, page_size: usize, max_pages: usize) -> Result<Self> {
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", token))
            .context("Access token contains characters not allowed in an HTTP header")?;
        auth.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(concat!("labvault/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            api_url: format!("{}/api/v4", base_url.trim_end_matches('/')),
            page_size: page_size.max(1),
            max_pages: max_pages.max(1),
        })
    }

    /// Create a client from configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        let base_url = config.server_url()?;
        let token = config.resolve_token()?;
        Self::new(&base_url, &token, config.page_size(), config.gitlab.max_pages)
    }

    /// Fetch one page of a listing endpoint
    async fn fetch_page<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
        page: usize,
    ) -> Result<Vec<T>> {
        let url = format!("{}/{}", self.api_url, endpoint);

        let response = self
            .http
            .get(&url)
            .query(params)
            .query(&[("page", page), ("per_page", self.page_size)])
            .send()
            .await
            .with_context(|| format!("Request to {} failed", url))?;

        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        response
            .json::<Vec<T>>()
            .await
            .context("Failed to decode listing page")
    }

    /// Walk a paginated endpoint until a short or empty page
    pub async fn fetch_all<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
    ) -> Listing<T> {
        let mut items = Vec::new();
        let mut page = 1usize;

        loop {
            let records: Vec<T> = match self.fetch_page(endpoint, params, page).await {
                Ok(records) => records,
                Err(e) => {
                    warn!("Listing {} stopped at page {}: {:#}", endpoint, page, e);
                    return Listing::truncated(
                        items,
                        ListingError {
                            endpoint: endpoint.to_string(),
                            page,
                            message: format!("{:#}", e),
                        },
                    );
                }
            };

            let count = records.len();
            debug!("{} page {}: {} records", endpoint, page, count);

            if count == 0 {
                break;
            }

            items.extend(records);

            if count < self.page_size {
                break;
            }

            if page >= self.max_pages {
                warn!("Reached maximum pagination limit ({} pages) for {}", self.max_pages, endpoint);
                return Listing::truncated(
                    items,
                    ListingError {
                        endpoint: endpoint.to_string(),
                        page,
                        message: format!("stopped after {} full pages", self.max_pages),
                    },
                );
            }
            page += 1;
        }

        Listing::complete(items)
    }

    /// List every group visible to the token
    pub async fn list_groups(&self) -> Listing<Group> {
        info!("Fetching group list...");
        let groups = self.fetch_all::<Group>("groups", &[]).await;
        info!("Found {} groups", groups.len());
        groups
    }

    /// List the projects owned by one group
    pub async fn list_group_projects(&self, group_id: u64) -> Listing<Project> {
        debug!("Fetching projects of group {}", group_id);
        let endpoint = format!("groups/{}/projects", group_id);
        let projects = self
            .fetch_all::<Project>(&endpoint, &[("with_shared", "false")])
            .await;
        debug!("Group {} has {} projects", group_id, projects.len());
        projects
    }

    /// List every project on the server
    pub async fn list_projects(&self) -> Listing<Project> {
        info!("Fetching project list...");
        let projects = self.fetch_all::<Project>("projects", &[]).await;
        info!("Found {} projects", projects.len());
        projects
    }

    /// Query the server version, used to check reachability and the token
    pub async fn server_version(&self) -> Result<String> {
        #[derive(Deserialize)]
        struct Version {
            version: String,
        }

        let url = format!("{}/version", self.api_url);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Request to {} failed", url))?;

        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        let version: Version = response
            .json()
            .await
            .context("Failed to decode version response")?;
        Ok(version.version)
    }
}

/// Turn a non-success response into an error carrying GitLab's message
async fn api_error(response: reqwest::Response) -> anyhow::Error {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| match v.get("message").or_else(|| v.get("error")) {
            Some(serde_json::Value::String(m)) => Some(m.clone()),
            Some(other) => Some(other.to_string()),
            None => None,
        });

    match message {
        Some(message) => anyhow!("Server returned {}: {}", status, message),
        None => anyhow!("Server returned {}", status),
    }
}
