//! HTTP Backend
//!
//! `HttpBackend` talks to the hosted service over REST (PostgREST-style
//! table endpoints under `/rest/v1`, auth under `/auth/v1`) and receives
//! change notifications as server-sent events from `/realtime/v1/<table>`.
//!
//! Every request carries the `apikey` header; authenticated requests also
//! carry `Authorization: Bearer <access token>`. REST calls are bounded by
//! the configured request timeout. Realtime streams are not, since they are
//! meant to stay open.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use uuid::Uuid;

use super::realtime::{spawn_sse_subscription, Backoff, Subscription};
use super::{AuthUser, Backend, BackendError, BackendResult, Session};
use crate::shared::config::AppConfig;
use crate::shared::event::{ChangeFilter, Record};
use crate::shared::messaging::{
    ConversationKey, MarkRead, Message, NewMessage, Profile, ProfileUpdate, TypingIndicator,
    TypingUpdate,
};
use crate::shared::SharedError;

/// PostgREST media type for "exactly one row"
const SINGLE_OBJECT: &str = "application/vnd.pgrst.object+json";

#[derive(Serialize)]
struct Credentials<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct SignUpRequest<'a> {
    email: &'a str,
    password: &'a str,
    data: SignUpMetadata<'a>,
}

#[derive(Serialize)]
struct SignUpMetadata<'a> {
    username: &'a str,
}

/// Sign-up answers with a session when confirmation is disabled, a bare user otherwise
#[derive(Deserialize)]
#[serde(untagged)]
enum SignUpResponse {
    Session(Session),
    User(AuthUser),
}

#[derive(Serialize)]
struct NewProfile<'a> {
    id: Uuid,
    username: &'a str,
    status: &'static str,
}

/// REST + SSE client for the hosted backend
#[derive(Debug)]
pub struct HttpBackend {
    config: AppConfig,
    client: Client,
    session: RwLock<Option<Session>>,
}

impl HttpBackend {
    pub fn new(config: AppConfig) -> BackendResult<Self> {
        let client = Client::builder()
            .connect_timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            config,
            client,
            session: RwLock::new(None),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    fn set_session(&self, session: Option<Session>) {
        let mut guard = self.session.write().unwrap_or_else(|p| p.into_inner());
        *guard = session;
    }

    fn access_token(&self) -> BackendResult<String> {
        self.session()
            .map(|s| s.access_token)
            .ok_or(BackendError::Unauthenticated)
    }

    fn header_value(value: &str) -> BackendResult<HeaderValue> {
        HeaderValue::from_str(value)
            .map_err(|_| BackendError::from(SharedError::validation("header", "invalid header value")))
    }

    /// `apikey` plus a bearer token: the session's, or the anon key when signed out
    fn headers(&self, token: Option<&str>) -> BackendResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert("apikey", Self::header_value(&self.config.anon_key)?);
        let bearer = token.unwrap_or(&self.config.anon_key);
        headers.insert(AUTHORIZATION, Self::header_value(&format!("Bearer {}", bearer))?);
        Ok(headers)
    }

    fn authed_headers(&self) -> BackendResult<HeaderMap> {
        let token = self.access_token()?;
        self.headers(Some(&token))
    }

    fn rest_url(&self, table: &str) -> String {
        self.config.endpoint(&format!("/rest/v1/{}", table))
    }

    /// Send with the request timeout; non-success statuses become errors
    async fn execute(&self, request: RequestBuilder, operation: &str) -> BackendResult<Response> {
        let response = request
            .timeout(self.config.request_timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BackendError::timeout(operation)
                } else {
                    BackendError::from(e)
                }
            })?;
        if !response.status().is_success() {
            let err = BackendError::from_response(response).await;
            tracing::debug!("[BACKEND] {} failed: {}", operation, err);
            return Err(err);
        }
        Ok(response)
    }

    async fn execute_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        operation: &str,
    ) -> BackendResult<T> {
        let response = self.execute(request, operation).await?;
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    fn subscribe<T: Record>(&self, filter: ChangeFilter) -> BackendResult<Subscription<T>> {
        let headers = self.authed_headers()?;
        let base = self.config.endpoint(&format!("/realtime/v1/{}", T::TABLE.as_str()));
        let url = match filter.to_query() {
            Some(pair) => Url::parse_with_params(&base, [pair]),
            None => Url::parse(&base),
        }
        .map_err(|e| BackendError::network(format!("invalid realtime url: {}", e)))?;
        let label = match &filter {
            ChangeFilter::All => T::TABLE.as_str().to_string(),
            other => format!("{}:{:?}", T::TABLE.as_str(), other),
        };
        Ok(spawn_sse_subscription(
            self.client.clone(),
            url.to_string(),
            headers,
            Backoff::new(self.config.reconnect_delay, self.config.max_reconnect_delay),
            label,
        ))
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn sign_up(&self, email: &str, password: &str, username: &str) -> BackendResult<AuthUser> {
        let request = self
            .client
            .post(self.config.endpoint("/auth/v1/signup"))
            .headers(self.headers(None)?)
            .json(&SignUpRequest {
                email,
                password,
                data: SignUpMetadata { username },
            });
        let response: SignUpResponse = self.execute_json(request, "sign up").await?;

        match response {
            SignUpResponse::Session(session) => {
                let user = session.user.clone();
                let request = self
                    .client
                    .post(self.rest_url("profiles"))
                    .headers(self.headers(Some(&session.access_token))?)
                    .header("Prefer", "return=minimal")
                    .json(&NewProfile {
                        id: user.id,
                        username,
                        status: "offline",
                    });
                self.execute(request, "create profile").await?;
                tracing::info!("[AUTH] Signed up {} with profile {}", user.id, username);
                Ok(user)
            }
            SignUpResponse::User(user) => {
                tracing::info!(
                    "[AUTH] Signed up {} pending confirmation; profile is created from signup metadata",
                    user.id
                );
                Ok(user)
            }
        }
    }

    async fn sign_in(&self, email: &str, password: &str) -> BackendResult<Session> {
        let request = self
            .client
            .post(self.config.endpoint("/auth/v1/token"))
            .query(&[("grant_type", "password")])
            .headers(self.headers(None)?)
            .json(&Credentials { email, password });
        let session: Session = match self.execute_json(request, "sign in").await {
            Ok(session) => session,
            Err(BackendError::Http { status: 400, .. }) => return Err(BackendError::Unauthenticated),
            Err(e) => return Err(e),
        };
        self.set_session(Some(session.clone()));
        tracing::info!("[AUTH] Signed in {}", session.user.id);
        Ok(session)
    }

    async fn sign_out(&self) -> BackendResult<()> {
        let Some(session) = self.session() else {
            return Ok(());
        };
        self.set_session(None);
        let request = self
            .client
            .post(self.config.endpoint("/auth/v1/logout"))
            .headers(self.headers(Some(&session.access_token))?);
        self.execute(request, "sign out").await?;
        tracing::info!("[AUTH] Signed out {}", session.user.id);
        Ok(())
    }

    async fn current_user(&self) -> BackendResult<Option<AuthUser>> {
        let Some(session) = self.session() else {
            return Ok(None);
        };
        let request = self
            .client
            .get(self.config.endpoint("/auth/v1/user"))
            .headers(self.headers(Some(&session.access_token))?);
        match self.execute_json::<AuthUser>(request, "current user").await {
            Ok(user) => Ok(Some(user)),
            Err(BackendError::Unauthenticated) => {
                tracing::warn!("[AUTH] Session for {} rejected, clearing it", session.user.id);
                self.set_session(None);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn session(&self) -> Option<Session> {
        self.session
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    async fn fetch_profiles(&self, exclude: Uuid) -> BackendResult<Vec<Profile>> {
        let request = self
            .client
            .get(self.rest_url("profiles"))
            .headers(self.authed_headers()?)
            .query(&[
                ("select", "*".to_string()),
                ("id", format!("neq.{}", exclude)),
                ("order", "username.asc".to_string()),
            ]);
        self.execute_json(request, "fetch profiles").await
    }

    async fn fetch_profile(&self, id: Uuid) -> BackendResult<Profile> {
        let request = self
            .client
            .get(self.rest_url("profiles"))
            .headers(self.authed_headers()?)
            .header(ACCEPT, SINGLE_OBJECT)
            .query(&[("select", "*".to_string()), ("id", format!("eq.{}", id))]);
        match self.execute_json(request, "fetch profile").await {
            Err(BackendError::NotFound { .. }) => Err(BackendError::not_found(format!("profile {}", id))),
            other => other,
        }
    }

    async fn update_profile(&self, id: Uuid, update: &ProfileUpdate) -> BackendResult<Profile> {
        let request = self
            .client
            .patch(self.rest_url("profiles"))
            .headers(self.authed_headers()?)
            .header(ACCEPT, SINGLE_OBJECT)
            .header("Prefer", "return=representation")
            .query(&[("id", format!("eq.{}", id))])
            .json(update);
        self.execute_json(request, "update profile").await
    }

    async fn fetch_conversation(&self, key: ConversationKey) -> BackendResult<Vec<Message>> {
        let mut query = vec![
            ("select".to_string(), "*".to_string()),
            ("order".to_string(), "created_at.asc,id.asc".to_string()),
        ];
        query.extend(ChangeFilter::Conversation(key).to_query());
        let request = self
            .client
            .get(self.rest_url("messages"))
            .headers(self.authed_headers()?)
            .query(&query);
        self.execute_json(request, "fetch conversation").await
    }

    async fn fetch_messages_involving(&self, user_id: Uuid) -> BackendResult<Vec<Message>> {
        let request = self
            .client
            .get(self.rest_url("messages"))
            .headers(self.authed_headers()?)
            .query(&[
                ("select", "*".to_string()),
                ("or", format!("(sender_id.eq.{user_id},receiver_id.eq.{user_id})")),
                ("order", "created_at.asc,id.asc".to_string()),
            ]);
        self.execute_json(request, "fetch messages").await
    }

    async fn insert_message(&self, message: &NewMessage) -> BackendResult<Message> {
        let request = self
            .client
            .post(self.rest_url("messages"))
            .headers(self.authed_headers()?)
            .header(ACCEPT, SINGLE_OBJECT)
            .header("Prefer", "return=representation")
            .header(CONTENT_TYPE, "application/json")
            .json(message);
        self.execute_json(request, "insert message").await
    }

    async fn mark_message_read(&self, id: Uuid) -> BackendResult<()> {
        let request = self
            .client
            .patch(self.rest_url("messages"))
            .headers(self.authed_headers()?)
            .header("Prefer", "return=minimal")
            .query(&[("id", format!("eq.{}", id))])
            .json(&MarkRead::default());
        self.execute(request, "mark read").await?;
        Ok(())
    }

    async fn delete_message(&self, id: Uuid) -> BackendResult<()> {
        let request = self
            .client
            .delete(self.rest_url("messages"))
            .headers(self.authed_headers()?)
            .query(&[("id", format!("eq.{}", id))]);
        self.execute(request, "delete message").await?;
        Ok(())
    }

    async fn upsert_typing(&self, update: &TypingUpdate) -> BackendResult<()> {
        let request = self
            .client
            .post(self.rest_url("typing_indicators"))
            .headers(self.authed_headers()?)
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .query(&[("on_conflict", "user_id,chat_with_id")])
            .json(update);
        self.execute(request, "upsert typing").await?;
        Ok(())
    }

    async fn subscribe_messages(&self, filter: ChangeFilter) -> BackendResult<Subscription<Message>> {
        self.subscribe(filter)
    }

    async fn subscribe_profiles(&self, filter: ChangeFilter) -> BackendResult<Subscription<Profile>> {
        self.subscribe(filter)
    }

    async fn subscribe_typing(&self, filter: ChangeFilter) -> BackendResult<Subscription<TypingIndicator>> {
        self.subscribe(filter)
    }
}
