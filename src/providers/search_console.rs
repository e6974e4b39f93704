//! Google Search Console API client.
//!
//! Covers the two operations the connector needs: listing the sites the
//! connected account can access (used for property validation) and running
//! search-analytics queries.

use serde::{Deserialize, Serialize};

use super::{Provider, ProviderCallError, execute_request};

/// Client bound to one access token for the duration of a request
pub struct SearchConsoleClient {
    http: reqwest::Client,
    api_base: String,
    access_token: String,
}

/// One entry from the account's site list
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteEntry {
    pub site_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission_level: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SitesListResponse {
    #[serde(default)]
    site_entry: Vec<SiteEntry>,
}

/// Request body for `searchAnalytics/query`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchAnalyticsQuery {
    pub start_date: String,
    pub end_date: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dimensions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_limit: Option<u32>,
}

/// Response from `searchAnalytics/query`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchAnalyticsResponse {
    #[serde(default)]
    pub rows: Vec<SearchAnalyticsRow>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchAnalyticsRow {
    #[serde(default)]
    pub keys: Vec<String>,
    #[serde(default)]
    pub clicks: f64,
    #[serde(default)]
    pub impressions: f64,
    #[serde(default)]
    pub ctr: f64,
    #[serde(default)]
    pub position: f64,
}

impl SearchConsoleClient {
    pub fn new(http: reqwest::Client, api_base: String, access_token: String) -> Self {
        Self {
            http,
            api_base,
            access_token,
        }
    }

    /// List the sites the connected account can access
    pub async fn list_sites(&self) -> Result<Vec<SiteEntry>, ProviderCallError> {
        let url = format!("{}/sites", self.api_base);
        let request = self
            .http
            .get(url)
            .header("Authorization", format!("Bearer {}", self.access_token));

        let response: SitesListResponse =
            execute_request(Provider::SearchConsole, request).await?;
        Ok(response.site_entry)
    }

    /// Run a search-analytics query against a site
    pub async fn query(
        &self,
        site_url: &str,
        query: &SearchAnalyticsQuery,
    ) -> Result<SearchAnalyticsResponse, ProviderCallError> {
        let url = format!(
            "{}/sites/{}/searchAnalytics/query",
            self.api_base,
            encode_site_url(site_url)
        );
        let request = self
            .http
            .post(url)
            .header("Authorization", format!("Bearer {}", self.access_token))
            .json(query);

        execute_request(Provider::SearchConsole, request).await
    }
}

/// Site URLs are path segments in the API (`sites/{siteUrl}/...`), so the
/// whole identifier has to be percent-encoded.
fn encode_site_url(site_url: &str) -> String {
    url::form_urlencoded::byte_serialize(site_url.as_bytes()).collect()
}
