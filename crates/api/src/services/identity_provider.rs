//! Auth0 management API client.
//!
//! Every call carries the configured request timeout. A timeout on
//! `create_user` is reported as `ProviderError::Timeout` because the user may
//! or may not have been created; the lifecycle controller reconciles through
//! the existence check on retry.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use domain::models::InvitationRole;
use domain::services::{
    Clock, ExternalUserId, IdentityProvider, PasswordChangeTicket, ProviderError,
};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use shared::crypto::generate_placeholder_password;
use tracing::{debug, info, warn};

use super::token_cache::{IssuedToken, ManagementTokenCache, TokenSource};
use crate::config::IdentityProviderConfig;

#[derive(Debug, Serialize)]
struct TokenRequest<'a> {
    grant_type: &'static str,
    client_id: &'a str,
    client_secret: &'a str,
    audience: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Serialize)]
struct CreateUserRequest<'a> {
    email: &'a str,
    password: String,
    connection: &'a str,
    email_verified: bool,
    app_metadata: AppMetadata,
}

#[derive(Debug, Serialize)]
struct AppMetadata {
    roles: Vec<&'static str>,
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    user_id: String,
}

#[derive(Debug, Serialize)]
struct PasswordChangeTicketRequest<'a> {
    user_id: &'a str,
    result_url: &'a str,
    ttl_sec: u64,
    mark_email_as_verified: bool,
}

#[derive(Debug, Deserialize)]
struct PasswordChangeTicketResponse {
    ticket: String,
}

/// Client-credentials grant against `/oauth/token`.
struct ClientCredentials {
    http: Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    audience: String,
}

#[async_trait]
impl TokenSource for ClientCredentials {
    async fn fetch_token(&self) -> Result<IssuedToken, ProviderError> {
        let response = self
            .http
            .post(&self.token_url)
            .json(&TokenRequest {
                grant_type: "client_credentials",
                client_id: &self.client_id,
                client_secret: &self.client_secret,
                audience: &self.audience,
            })
            .send()
            .await
            .map_err(|e| ProviderError::Token(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Token(format!("status {}: {}", status, body)));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("token response: {}", e)))?;

        Ok(IssuedToken {
            access_token: token.access_token,
            expires_in: Duration::from_secs(token.expires_in),
        })
    }
}

pub struct Auth0Client {
    http: Client,
    base_url: String,
    connection: String,
    tokens: ManagementTokenCache<ClientCredentials>,
}

impl Auth0Client {
    pub fn new(config: &IdentityProviderConfig, clock: Arc<dyn Clock>) -> Result<Self, ProviderError> {
        let http = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| ProviderError::Unavailable(format!("HTTP client: {}", e)))?;

        let base_url = config.base_url();
        let credentials = ClientCredentials {
            http: http.clone(),
            token_url: format!("{}/oauth/token", base_url),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            audience: config.audience(),
        };

        Ok(Self {
            http,
            connection: config.connection.clone(),
            tokens: ManagementTokenCache::new(credentials, clock),
            base_url,
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api/v2/{}", self.base_url, path)
    }

    /// Sends a management API request with the cached token. A 401 means the
    /// token was revoked or rotated; it is refreshed and the request retried
    /// once, which is safe because a rejected request was not applied.
    async fn send_authorized<F>(&self, build: F) -> Result<Response, ProviderError>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let token = self.tokens.get().await?;
        let response = build(&self.http)
            .bearer_auth(&token)
            .send()
            .await
            .map_err(transport_error)?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        warn!("Management token rejected, refreshing");
        let token = self.tokens.refresh(&token).await?;
        build(&self.http)
            .bearer_auth(&token)
            .send()
            .await
            .map_err(transport_error)
    }
}

fn transport_error(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout
    } else {
        ProviderError::Unavailable(err.to_string())
    }
}

async fn rejected(response: Response) -> ProviderError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    ProviderError::Rejected { status, body }
}

async fn parse<T: for<'de> Deserialize<'de>>(response: Response) -> Result<T, ProviderError> {
    response
        .json()
        .await
        .map_err(|e| ProviderError::InvalidResponse(e.to_string()))
}

#[async_trait]
impl IdentityProvider for Auth0Client {
    async fn find_user_by_email(
        &self,
        email: &str,
    ) -> Result<Option<ExternalUserId>, ProviderError> {
        let url = self.api_url("users-by-email");
        let response = self
            .send_authorized(|http| http.get(&url).query(&[("email", email)]))
            .await?;

        if !response.status().is_success() {
            return Err(rejected(response).await);
        }

        let users: Vec<UserResponse> = parse(response).await?;
        debug!(email = %email, matches = users.len(), "Identity provider lookup");
        Ok(users.into_iter().next().map(|u| u.user_id))
    }

    async fn create_user(
        &self,
        email: &str,
        role: InvitationRole,
    ) -> Result<ExternalUserId, ProviderError> {
        let url = self.api_url("users");
        let body = CreateUserRequest {
            email,
            password: generate_placeholder_password(),
            connection: &self.connection,
            email_verified: true,
            app_metadata: AppMetadata {
                roles: vec![role.as_str()],
            },
        };

        let response = self
            .send_authorized(|http| http.post(&url).json(&body))
            .await?;

        match response.status() {
            status if status.is_success() => {
                let user: UserResponse = parse(response).await?;
                info!(email = %email, external_id = %user.user_id, role = %role, "Identity provider user created");
                Ok(user.user_id)
            }
            StatusCode::CONFLICT => Err(ProviderError::AlreadyExists),
            _ => Err(rejected(response).await),
        }
    }

    async fn create_password_change_ticket(
        &self,
        external_id: &str,
        result_url: &str,
        ttl: Duration,
    ) -> Result<PasswordChangeTicket, ProviderError> {
        let url = self.api_url("tickets/password-change");
        let body = PasswordChangeTicketRequest {
            user_id: external_id,
            result_url,
            ttl_sec: ttl.as_secs(),
            mark_email_as_verified: true,
        };

        let response = self
            .send_authorized(|http| http.post(&url).json(&body))
            .await?;

        if !response.status().is_success() {
            return Err(rejected(response).await);
        }

        let ticket: PasswordChangeTicketResponse = parse(response).await?;
        Ok(PasswordChangeTicket {
            ticket_url: ticket.ticket,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::services::SystemClock;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer, timeout_ms: u64) -> IdentityProviderConfig {
        IdentityProviderConfig {
            domain: server.uri(),
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            audience: Some("https://tenant.example.com/api/v2/".to_string()),
            connection: "Username-Password-Authentication".to_string(),
            timeout_ms,
            password_ticket_ttl_secs: 3600,
            password_setup_redirect_path: "/api/auth/signin".to_string(),
        }
    }

    fn client_for(server: &MockServer) -> Auth0Client {
        Auth0Client::new(&config_for(server, 2_000), Arc::new(SystemClock)).unwrap()
    }

    async fn mount_token(server: &MockServer, expected_calls: u64) {
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(body_partial_json(json!({
                "grant_type": "client_credentials",
                "client_id": "client",
                "client_secret": "secret",
                "audience": "https://tenant.example.com/api/v2/"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "mgmt-token",
                "expires_in": 86400,
                "token_type": "Bearer"
            })))
            .expect(expected_calls)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_create_user_sends_verified_user_with_role() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;

        Mock::given(method("POST"))
            .and(path("/api/v2/users"))
            .and(header("authorization", "Bearer mgmt-token"))
            .and(body_partial_json(json!({
                "email": "new@example.com",
                "connection": "Username-Password-Authentication",
                "email_verified": true,
                "app_metadata": { "roles": ["admin"] }
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "user_id": "auth0|abc123",
                "email": "new@example.com"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let id = client
            .create_user("new@example.com", InvitationRole::Admin)
            .await
            .unwrap();

        assert_eq!(id, "auth0|abc123");
    }

    #[tokio::test]
    async fn test_create_user_conflict_maps_to_already_exists() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;

        Mock::given(method("POST"))
            .and(path("/api/v2/users"))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({
                "statusCode": 409,
                "message": "The user already exists."
            })))
            .mount(&server)
            .await;

        let result = client_for(&server)
            .create_user("new@example.com", InvitationRole::User)
            .await;
        assert!(matches!(result, Err(ProviderError::AlreadyExists)));
    }

    #[tokio::test]
    async fn test_create_user_bad_request_is_rejected() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;

        Mock::given(method("POST"))
            .and(path("/api/v2/users"))
            .respond_with(ResponseTemplate::new(400).set_body_string("PasswordStrengthError"))
            .mount(&server)
            .await;

        match client_for(&server)
            .create_user("new@example.com", InvitationRole::User)
            .await
        {
            Err(ProviderError::Rejected { status, body }) => {
                assert_eq!(status, 400);
                assert!(body.contains("PasswordStrengthError"));
            }
            other => panic!("Expected Rejected, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_slow_create_is_ambiguous_timeout() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;

        Mock::given(method("POST"))
            .and(path("/api/v2/users"))
            .respond_with(
                ResponseTemplate::new(201)
                    .set_body_json(json!({ "user_id": "auth0|late" }))
                    .set_delay(Duration::from_millis(1_000)),
            )
            .mount(&server)
            .await;

        let client = Auth0Client::new(&config_for(&server, 200), Arc::new(SystemClock)).unwrap();
        let err = client
            .create_user("new@example.com", InvitationRole::User)
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::Timeout));
        assert!(err.is_ambiguous());
    }

    #[tokio::test]
    async fn test_lookup_by_email_reuses_cached_token() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;

        Mock::given(method("GET"))
            .and(path("/api/v2/users-by-email"))
            .and(query_param("email", "known@example.com"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "user_id": "auth0|known", "email": "known@example.com" }
            ])))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/api/v2/users-by-email"))
            .and(query_param("email", "nobody@example.com"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let client = client_for(&server);
        assert_eq!(
            client.find_user_by_email("known@example.com").await.unwrap(),
            Some("auth0|known".to_string())
        );
        assert_eq!(
            client.find_user_by_email("nobody@example.com").await.unwrap(),
            None
        );
        assert!(client.user_exists("known@example.com").await.unwrap());
    }

    #[tokio::test]
    async fn test_unauthorized_refreshes_token_and_retries_once() {
        let server = MockServer::start().await;
        mount_token(&server, 2).await;

        Mock::given(method("GET"))
            .and(path("/api/v2/users-by-email"))
            .respond_with(ResponseTemplate::new(401))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/api/v2/users-by-email"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let client = client_for(&server);
        assert_eq!(client.find_user_by_email("a@example.com").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_password_change_ticket() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;

        Mock::given(method("POST"))
            .and(path("/api/v2/tickets/password-change"))
            .and(body_partial_json(json!({
                "user_id": "auth0|abc123",
                "result_url": "http://localhost:3000/api/auth/signin",
                "ttl_sec": 604800
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "ticket": "https://tenant.example.com/lo/reset?ticket=xyz#"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let ticket = client_for(&server)
            .create_password_change_ticket(
                "auth0|abc123",
                "http://localhost:3000/api/auth/signin",
                Duration::from_secs(7 * 24 * 3600),
            )
            .await
            .unwrap();

        assert_eq!(
            ticket.ticket_url,
            "https://tenant.example.com/lo/reset?ticket=xyz#"
        );
    }

    #[tokio::test]
    async fn test_token_endpoint_failure() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "error": "access_denied"
            })))
            .mount(&server)
            .await;

        let result = client_for(&server).find_user_by_email("a@example.com").await;
        match result {
            Err(ProviderError::Token(msg)) => assert!(msg.contains("access_denied")),
            other => panic!("Expected Token error, got {:?}", other),
        }
    }
}
