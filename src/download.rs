use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cart::{CartItem, DownloadCart};
use crate::domain::EntityType;
use crate::error::PortalError;

/// Connection speeds offered for the download time estimate, in Mbps.
pub const SPEED_OPTIONS: [u32; 3] = [1, 30, 100];

static EMAIL_RE: LazyLock<Result<Regex, regex::Error>> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9-]+(?:\.[a-zA-Z0-9-]+)*$")
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    pub transport: String,
    pub email: Option<String>,
    pub file_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitResponse {
    download_id: u64,
}

/// A submitted download as reported back by the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Download {
    pub id: u64,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub transport: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub prepared_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// Cart and download endpoints of the download service.
#[async_trait]
pub trait DownloadClient: Send + Sync {
    async fn fetch_cart(&self) -> Result<Vec<CartItem>, PortalError>;

    async fn add_cart_items(&self, items: &[(EntityType, u64)]) -> Result<Vec<CartItem>, PortalError>;

    async fn remove_cart_item(
        &self,
        entity_type: EntityType,
        entity_id: u64,
    ) -> Result<(), PortalError>;

    async fn remove_all_cart_items(&self) -> Result<(), PortalError>;

    /// Total size in bytes of an investigation or dataset subtree.
    async fn get_size(&self, entity_type: EntityType, entity_id: u64) -> Result<u64, PortalError>;

    /// Submits the cart for packaging; returns the new download id.
    async fn submit_cart(&self, request: &SubmitRequest) -> Result<u64, PortalError>;

    async fn get_download(&self, download_id: u64) -> Result<Option<Download>, PortalError>;
}

#[derive(Clone)]
pub struct DownloadHttpClient {
    client: Client,
    base_url: String,
    facility_name: String,
    session_id: String,
}

impl DownloadHttpClient {
    pub fn new(
        base_url: impl Into<String>,
        facility_name: impl Into<String>,
        session_id: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, PortalError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("catalog-portal/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| PortalError::DownloadHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| PortalError::DownloadHttp(err.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            facility_name: facility_name.into(),
            session_id: session_id.into(),
        })
    }

    fn cart_url(&self, suffix: &str) -> String {
        format!("{}/user/cart/{}{}", self.base_url, self.facility_name, suffix)
    }

    async fn delete_items(&self, items: &str) -> Result<(), PortalError> {
        let response = self
            .client
            .delete(self.cart_url("/cartItems"))
            .query(&[("sessionId", self.session_id.as_str()), ("items", items)])
            .send()
            .await
            .map_err(|err| PortalError::DownloadHttp(err.to_string()))?;
        check_status(response).await?;
        Ok(())
    }
}

#[async_trait]
impl DownloadClient for DownloadHttpClient {
    async fn fetch_cart(&self) -> Result<Vec<CartItem>, PortalError> {
        let response = self
            .client
            .get(self.cart_url(""))
            .query(&[("sessionId", self.session_id.as_str())])
            .send()
            .await
            .map_err(|err| PortalError::DownloadHttp(err.to_string()))?;
        let cart = check_status(response)
            .await?
            .json::<DownloadCart>()
            .await
            .map_err(|err| PortalError::Decode(err.to_string()))?;
        Ok(cart.cart_items)
    }

    async fn add_cart_items(&self, items: &[(EntityType, u64)]) -> Result<Vec<CartItem>, PortalError> {
        let tokens = items
            .iter()
            .map(|(entity_type, id)| format!("{entity_type} {id}"))
            .collect::<Vec<_>>()
            .join(", ");
        let response = self
            .client
            .post(self.cart_url("/cartItems"))
            .form(&[("sessionId", self.session_id.as_str()), ("items", tokens.as_str())])
            .send()
            .await
            .map_err(|err| PortalError::DownloadHttp(err.to_string()))?;
        let cart = check_status(response)
            .await?
            .json::<DownloadCart>()
            .await
            .map_err(|err| PortalError::Decode(err.to_string()))?;
        Ok(cart.cart_items)
    }

    async fn remove_cart_item(
        &self,
        entity_type: EntityType,
        entity_id: u64,
    ) -> Result<(), PortalError> {
        self.delete_items(&format!("{entity_type} {entity_id}")).await
    }

    async fn remove_all_cart_items(&self) -> Result<(), PortalError> {
        self.delete_items("*").await
    }

    async fn get_size(&self, entity_type: EntityType, entity_id: u64) -> Result<u64, PortalError> {
        let entity_id = entity_id.to_string();
        let response = self
            .client
            .get(format!("{}/user/getSize", self.base_url))
            .query(&[
                ("sessionId", self.session_id.as_str()),
                ("facilityName", self.facility_name.as_str()),
                ("entityType", entity_type.as_str()),
                ("entityId", entity_id.as_str()),
            ])
            .send()
            .await
            .map_err(|err| PortalError::DownloadHttp(err.to_string()))?;
        check_status(response)
            .await?
            .json::<u64>()
            .await
            .map_err(|err| PortalError::Decode(err.to_string()))
    }

    async fn submit_cart(&self, request: &SubmitRequest) -> Result<u64, PortalError> {
        let email = request.email.clone().unwrap_or_default();
        let response = self
            .client
            .post(self.cart_url("/submit"))
            .form(&[
                ("sessionId", self.session_id.as_str()),
                ("transport", request.transport.as_str()),
                ("email", email.as_str()),
                ("fileName", request.file_name.as_str()),
                ("zipType", "ZIP"),
            ])
            .send()
            .await
            .map_err(|err| PortalError::DownloadHttp(err.to_string()))?;
        let submitted = check_status(response)
            .await?
            .json::<SubmitResponse>()
            .await
            .map_err(|err| PortalError::Decode(err.to_string()))?;
        Ok(submitted.download_id)
    }

    async fn get_download(&self, download_id: u64) -> Result<Option<Download>, PortalError> {
        let filter = format!("where download.id = {download_id}");
        let response = self
            .client
            .get(format!("{}/user/downloads", self.base_url))
            .query(&[
                ("sessionId", self.session_id.as_str()),
                ("facilityName", self.facility_name.as_str()),
                ("queryOffset", filter.as_str()),
            ])
            .send()
            .await
            .map_err(|err| PortalError::DownloadHttp(err.to_string()))?;
        let downloads = check_status(response)
            .await?
            .json::<Vec<Value>>()
            .await
            .map_err(|err| PortalError::Decode(err.to_string()))?;
        downloads
            .into_iter()
            .next()
            .map(|value| serde_json::from_value(value).map_err(|err| PortalError::Decode(err.to_string())))
            .transpose()
    }
}

async fn check_status(response: Response) -> Result<Response, PortalError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let message = response
        .text()
        .await
        .unwrap_or_else(|_| "download service request failed".to_string());
    Err(PortalError::DownloadStatus { status, message })
}

/// Seconds needed to move `size` bytes at `mbps` megabits per second.
pub fn estimate_download_seconds(size: u64, mbps: u32) -> Result<u64, PortalError> {
    if mbps == 0 {
        return Err(PortalError::InvalidSpeed(mbps.to_string()));
    }
    let megabytes = size as f64 / (1024.0 * 1024.0);
    let megabytes_per_second = f64::from(mbps) / 8.0;
    Ok((megabytes / megabytes_per_second).round() as u64)
}

/// Renders seconds as "d days, h hours, m minutes, s seconds".
pub fn format_duration_dhms(seconds: u64) -> String {
    let days = seconds / 86_400;
    let hours = seconds % 86_400 / 3_600;
    let minutes = seconds % 3_600 / 60;
    let seconds = seconds % 60;
    format!("{days} days, {hours} hours, {minutes} minutes, {seconds} seconds")
}

/// File name proposed for a new download: `<facility>_<yyyy-MM-dd>_<HH-mm-ss>`.
pub fn default_file_name(facility: &str, now: NaiveDateTime) -> String {
    format!("{facility}_{}", now.format("%Y-%m-%d_%H-%M-%S"))
}

pub fn validate_email(email: &str) -> Result<(), PortalError> {
    let email = email.trim();
    let matches = match EMAIL_RE.as_ref() {
        Ok(re) => re.is_match(email),
        Err(err) => return Err(PortalError::InvalidEmail(err.to_string())),
    };
    if matches {
        Ok(())
    } else {
        Err(PortalError::InvalidEmail(email.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::NaiveDate;

    use super::*;

    #[test]
    fn estimate_at_each_speed() {
        let gigabyte = 1024 * 1024 * 1024;
        assert_eq!(estimate_download_seconds(gigabyte, 1).unwrap(), 8192);
        assert_eq!(estimate_download_seconds(gigabyte, 100).unwrap(), 82);
        assert_matches!(estimate_download_seconds(gigabyte, 0), Err(PortalError::InvalidSpeed(_)));
    }

    #[test]
    fn duration_text() {
        assert_eq!(
            format_duration_dhms(90_061),
            "1 days, 1 hours, 1 minutes, 1 seconds"
        );
        assert_eq!(format_duration_dhms(0), "0 days, 0 hours, 0 minutes, 0 seconds");
    }

    #[test]
    fn file_name_uses_facility_and_timestamp() {
        let now = NaiveDate::from_ymd_opt(2020, 1, 2)
            .unwrap()
            .and_hms_opt(3, 4, 5)
            .unwrap();
        assert_eq!(default_file_name("LILS", now), "LILS_2020-01-02_03-04-05");
    }

    #[test]
    fn email_validation() {
        assert!(validate_email("test@example.com").is_ok());
        assert_matches!(validate_email("not an email"), Err(PortalError::InvalidEmail(_)));
        assert_matches!(validate_email("a@"), Err(PortalError::InvalidEmail(_)));
    }
}
