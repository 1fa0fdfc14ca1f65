//! HTTP client for the StudentApp `courses/seats` endpoint.
//!
//! Authentication uses the OAuth client-credentials flow: the consumer key
//! and secret are exchanged for a bearer token, which is cached and
//! refreshed once when a request comes back unauthorized.

use super::{EnrollmentSource, SectionSeats};
use crate::error::FetchError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::Url;

const SEATS_PATH: &str = "courses/seats";

/// Status string the registrar uses for sections accepting enrollment.
const OPEN_STATUS: &str = "Open";

#[derive(Debug, Clone)]
pub struct StudentAppConfig {
    pub base_url: String,
    pub token_url: String,
    pub consumer_key: String,
    pub consumer_secret: String,
    pub request_timeout: Duration,
}

/// Client for the registrar's StudentApp API.
pub struct StudentAppClient {
    client: Client,
    config: StudentAppConfig,
    token: RwLock<Option<String>>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

impl StudentAppClient {
    pub fn new(config: StudentAppConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| FetchError::Network {
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            config,
            token: RwLock::new(None),
        })
    }

    /// Exchanges the consumer credentials for a fresh access token.
    async fn refresh_token(&self) -> Result<String, FetchError> {
        info!(url = %self.config.token_url, "Refreshing StudentApp access token");

        let response = self
            .client
            .post(&self.config.token_url)
            .basic_auth(&self.config.consumer_key, Some(&self.config.consumer_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(FetchError::Auth {
                message: format!("token endpoint returned {}", response.status()),
            });
        }

        let token: TokenResponse = response.json().await.map_err(|e| FetchError::Auth {
            message: format!("unreadable token response: {}", e),
        })?;

        *self.token.write().await = Some(token.access_token.clone());
        Ok(token.access_token)
    }

    async fn current_token(&self) -> Result<String, FetchError> {
        if let Some(token) = self.token.read().await.as_ref() {
            return Ok(token.clone());
        }
        self.refresh_token().await
    }

    fn seats_url(&self, term: &str, course_ids: &[String]) -> Result<Url, FetchError> {
        let base = if self.config.base_url.ends_with('/') {
            self.config.base_url.clone()
        } else {
            format!("{}/", self.config.base_url)
        };
        let mut url = Url::parse(&base)?.join(SEATS_PATH)?;
        url.query_pairs_mut()
            .append_pair("term", term)
            .append_pair("course_ids", &course_ids.join(","))
            .append_pair("fmt", "json");
        Ok(url)
    }

    async fn get_seats_body(&self, url: &Url) -> Result<String, FetchError> {
        let mut token = self.current_token().await?;

        for attempt in 0..2 {
            let response = self.client.get(url.clone()).bearer_auth(&token).send().await?;

            match response.status() {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN if attempt == 0 => {
                    warn!("StudentApp rejected access token, refreshing");
                    token = self.refresh_token().await?;
                }
                status if status.is_success() => return Ok(response.text().await?),
                status => {
                    return Err(FetchError::Network {
                        message: format!("seats endpoint returned {}", status),
                    })
                }
            }
        }

        Err(FetchError::Auth {
            message: "access token rejected after refresh".to_string(),
        })
    }
}

#[async_trait]
impl EnrollmentSource for StudentAppClient {
    async fn fetch_seats(
        &self,
        term: &str,
        course_ids: &[String],
        class_ids: &HashSet<String>,
    ) -> Result<HashMap<String, SectionSeats>, FetchError> {
        let url = self.seats_url(term, course_ids)?;
        let start = Instant::now();
        let body = self.get_seats_body(&url).await?;

        debug!(
            term,
            courses = course_ids.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "StudentApp seats query"
        );

        parse_seats_response(&body, course_ids, class_ids)
    }
}

/// Parses a `courses/seats` response.
///
/// The registrar serializes counts inconsistently (numbers or numeric
/// strings); both are accepted. A response without a `course` array means
/// the query matched nothing and is reported as malformed.
pub fn parse_seats_response(
    body: &str,
    course_ids: &[String],
    class_ids: &HashSet<String>,
) -> Result<HashMap<String, SectionSeats>, FetchError> {
    let data: Value = serde_json::from_str(body)?;
    let courses = data
        .get("course")
        .and_then(Value::as_array)
        .ok_or_else(|| FetchError::Malformed {
            message: "no query results".to_string(),
        })?;

    let wanted: HashSet<&str> = course_ids.iter().map(String::as_str).collect();
    let mut seats = HashMap::new();

    for course in courses {
        let Some(courseid) = as_string(course.get("course_id")) else {
            continue;
        };
        if !wanted.contains(courseid.as_str()) {
            continue;
        }
        let Some(classes) = course.get("classes").and_then(Value::as_array) else {
            continue;
        };

        for class in classes {
            let Some(classid) = as_string(class.get("class_number")) else {
                continue;
            };
            if !class_ids.contains(&classid) {
                continue;
            }
            let status_is_open = class
                .get("pu_calc_status")
                .and_then(Value::as_str)
                .is_some_and(|s| s == OPEN_STATUS);

            seats.insert(
                classid,
                SectionSeats {
                    courseid: courseid.clone(),
                    enrollment: as_count(class.get("enrollment")),
                    capacity: as_count(class.get("capacity")),
                    status_is_open,
                },
            );
        }
    }

    Ok(seats)
}

fn as_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn as_count(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
