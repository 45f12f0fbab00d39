//! HTTP API for the eco-actions ledger
//!
//! ## Challenges
//! - `GET /challenges` - List challenges
//! - `POST /challenges` - Create a challenge
//! - `GET /challenges/{id}` - Get a challenge
//! - `PATCH /challenges/{id}` - Edit title, description or dates
//! - `DELETE /challenges/{id}` - Delete a challenge and its leaderboard
//! - `POST /challenges/{id}/join` - Join (`{"user_id": n}`), 201 when new
//! - `POST /challenges/{id}/leave` - Leave (`{"user_id": n}`), score is discarded
//! - `GET /challenges/{id}/leaderboard?limit=&offset=` - Ranked entries
//! - `GET /challenges/{id}/participants` - Member user ids
//!
//! ## Actions
//! - `POST /actions` - Log an action
//! - `GET /actions?user_id=&challenge_id=&action_type=&limit=&offset=` - List actions
//! - `GET /actions/{id}` / `PATCH /actions/{id}` / `DELETE /actions/{id}`
//!
//! ## Reference
//! - `GET /action-types` - Accepted action types with display labels
//!
//! ## Scores
//! - `GET /users/{id}/scores` - Every challenge score held by a user
//! - `GET /leaderboard/audit` - Entries whose score disagrees with their actions
//!
//! ## Example Usage
//!
//! ```bash
//! curl -X POST http://localhost:8095/challenges/1/join -d '{"user_id": 7}'
//!
//! curl -X POST http://localhost:8095/actions \
//!      -d '{"user_id": 7, "action_type": "transport", "description": "Biked", "points": 10, "challenge_id": 1}'
//!
//! curl http://localhost:8095/challenges/1/leaderboard?limit=10
//! ```

use crate::db::actions::{ActionQuery, CreateActionInput, UpdateActionInput};
use crate::db::challenges::{CreateChallengeInput, UpdateChallengeInput};
use crate::db::leaderboard::RankingQuery;
use crate::db::models::action_types;
use crate::error::StorageError;
use crate::services::response::{self, HandlerResult};
use crate::services::Services;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Resolved request path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Health,
    Challenges,
    Challenge(i32),
    Join(i32),
    Leave(i32),
    Leaderboard(i32),
    Participants(i32),
    Actions,
    Action(i32),
    UserScores(i32),
    Audit,
    ActionTypes,
    Unknown,
}

impl Route {
    fn parse(path: &str) -> Self {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        match segments.as_slice() {
            ["health"] => Route::Health,
            ["challenges"] => Route::Challenges,
            ["challenges", id] => with_id(id, Route::Challenge),
            ["challenges", id, "join"] => with_id(id, Route::Join),
            ["challenges", id, "leave"] => with_id(id, Route::Leave),
            ["challenges", id, "leaderboard"] => with_id(id, Route::Leaderboard),
            ["challenges", id, "participants"] => with_id(id, Route::Participants),
            ["actions"] => Route::Actions,
            ["actions", id] => with_id(id, Route::Action),
            ["users", id, "scores"] => with_id(id, Route::UserScores),
            ["leaderboard", "audit"] => Route::Audit,
            ["action-types"] => Route::ActionTypes,
            _ => Route::Unknown,
        }
    }
}

fn with_id(raw: &str, route: fn(i32) -> Route) -> Route {
    raw.parse().map(route).unwrap_or(Route::Unknown)
}

/// Body of join/leave requests
#[derive(Debug, Deserialize)]
struct MembershipRequest {
    user_id: i32,
}

/// HTTP server state
pub struct HttpServer {
    services: Arc<Services>,
    bind_addr: SocketAddr,
}

impl HttpServer {
    /// Create a new HTTP server
    pub fn new(services: Arc<Services>, bind_addr: SocketAddr) -> Self {
        Self { services, bind_addr }
    }

    /// Run the HTTP server
    pub async fn run(self: Arc<Self>) -> Result<(), StorageError> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        info!(addr = %self.bind_addr, "HTTP server listening");

        loop {
            let (stream, remote_addr) = listener.accept().await?;
            let io = TokioIo::new(stream);
            let server = self.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let server = server.clone();
                    async move { server.handle_request(req).await }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    warn!(addr = %remote_addr, error = %err, "Connection error");
                }
            });
        }
    }

    /// Route requests to handlers
    async fn handle_request(&self, req: Request<Incoming>) -> Result<Response<Full<Bytes>>, hyper::Error> {
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let query = req.uri().query().unwrap_or("").to_string();

        debug!(method = %method, path = %path, "Incoming request");

        let result = match (&method, Route::parse(&path)) {
            (&Method::GET, Route::Health) => self.handle_health().await,

            // Challenges
            (&Method::GET, Route::Challenges) => self.handle_list_challenges().await,
            (&Method::POST, Route::Challenges) => self.handle_create_challenge(req).await,
            (&Method::GET, Route::Challenge(id)) => self.handle_get_challenge(id).await,
            (&Method::PATCH, Route::Challenge(id)) => self.handle_update_challenge(req, id).await,
            (&Method::DELETE, Route::Challenge(id)) => self.handle_delete_challenge(id).await,
            (&Method::POST, Route::Join(id)) => self.handle_join(req, id).await,
            (&Method::POST, Route::Leave(id)) => self.handle_leave(req, id).await,
            (&Method::GET, Route::Leaderboard(id)) => self.handle_leaderboard(id, &query).await,
            (&Method::GET, Route::Participants(id)) => self.handle_participants(id).await,

            // Actions
            (&Method::GET, Route::Actions) => self.handle_list_actions(&query).await,
            (&Method::POST, Route::Actions) => self.handle_create_action(req).await,
            (&Method::GET, Route::Action(id)) => self.handle_get_action(id).await,
            (&Method::PATCH, Route::Action(id)) => self.handle_update_action(req, id).await,
            (&Method::DELETE, Route::Action(id)) => self.handle_delete_action(id).await,

            // Scores
            (&Method::GET, Route::UserScores(id)) => self.handle_user_scores(id).await,
            (&Method::GET, Route::Audit) => self.handle_audit().await,

            (&Method::GET, Route::ActionTypes) => Ok(response::ok(&action_types::options())),

            (_, Route::Unknown) => Ok(response::not_found("Not Found")),
            _ => Ok(response::method_not_allowed()),
        };

        Ok(result.unwrap_or_else(|e| {
            match &e {
                StorageError::NotFound(_) | StorageError::InvalidInput(_) | StorageError::Conflict(_) => {
                    debug!(method = %method, path = %path, error = %e, "Request rejected");
                }
                _ => error!(method = %method, path = %path, error = %e, "Request error"),
            }
            response::error_response(e)
        }))
    }

    /// Health check endpoint
    async fn handle_health(&self) -> HandlerResult {
        let db = self.services.db.clone();
        let stats = blocking(move || db.stats()).await?;

        Ok(response::ok(&serde_json::json!({
            "status": "ok",
            "challenges": stats.challenge_count,
            "actions": stats.action_count,
            "entries": stats.entry_count,
        })))
    }

    // =========================================================================
    // Challenges
    // =========================================================================

    async fn handle_list_challenges(&self) -> HandlerResult {
        let challenges = self.services.challenges.clone();
        let list = blocking(move || challenges.list()).await?;
        Ok(response::ok(&list))
    }

    async fn handle_create_challenge(&self, req: Request<Incoming>) -> HandlerResult {
        let input: CreateChallengeInput = read_json(req).await?;
        let challenges = self.services.challenges.clone();
        let challenge = blocking(move || challenges.create(input)).await?;

        info!(id = challenge.id, title = %challenge.title, "Created challenge");
        Ok(response::created(&challenge))
    }

    async fn handle_get_challenge(&self, id: i32) -> HandlerResult {
        let challenges = self.services.challenges.clone();
        let result = blocking(move || challenges.get(id)).await;
        Ok(response::from_option(result, &format!("Challenge {} not found", id)))
    }

    async fn handle_update_challenge(&self, req: Request<Incoming>, id: i32) -> HandlerResult {
        let input: UpdateChallengeInput = read_json(req).await?;
        let challenges = self.services.challenges.clone();
        let challenge = blocking(move || challenges.update(id, input)).await?;

        info!(id = challenge.id, "Updated challenge");
        Ok(response::ok(&challenge))
    }

    async fn handle_delete_challenge(&self, id: i32) -> HandlerResult {
        let challenges = self.services.challenges.clone();
        let result = blocking(move || challenges.delete(id)).await;
        Ok(response::from_delete_bool_result(result, &format!("Challenge {} not found", id)))
    }

    /// POST /challenges/{id}/join - 201 for a new membership, 200 if already joined
    async fn handle_join(&self, req: Request<Incoming>, challenge_id: i32) -> HandlerResult {
        let MembershipRequest { user_id } = read_json(req).await?;
        let challenges = self.services.challenges.clone();
        let (entry, created) = blocking(move || challenges.join(user_id, challenge_id)).await?;

        let status = if created { StatusCode::CREATED } else { StatusCode::OK };
        Ok(response::json_response(status, &entry))
    }

    async fn handle_leave(&self, req: Request<Incoming>, challenge_id: i32) -> HandlerResult {
        let MembershipRequest { user_id } = read_json(req).await?;
        let challenges = self.services.challenges.clone();
        let result = blocking(move || challenges.leave(user_id, challenge_id)).await;
        Ok(response::from_delete_bool_result(
            result,
            &format!("User {} is not in challenge {}", user_id, challenge_id),
        ))
    }

    async fn handle_leaderboard(&self, challenge_id: i32, query: &str) -> HandlerResult {
        let query: RankingQuery = parse_query(query)?;
        let leaderboard = self.services.leaderboard.clone();
        let ranked = blocking(move || leaderboard.ranking(challenge_id, &query)).await?;
        Ok(response::ok(&ranked))
    }

    async fn handle_participants(&self, challenge_id: i32) -> HandlerResult {
        let challenges = self.services.challenges.clone();
        let users = blocking(move || challenges.participants(challenge_id)).await?;
        Ok(response::ok(&serde_json::json!({
            "challenge_id": challenge_id,
            "user_ids": users,
        })))
    }

    // =========================================================================
    // Actions
    // =========================================================================

    async fn handle_list_actions(&self, query: &str) -> HandlerResult {
        let query: ActionQuery = parse_query(query)?;
        let actions = self.services.actions.clone();
        let list = blocking(move || actions.list(&query)).await?;
        Ok(response::ok(&list))
    }

    async fn handle_create_action(&self, req: Request<Incoming>) -> HandlerResult {
        let input: CreateActionInput = read_json(req).await?;
        let actions = self.services.actions.clone();
        let result = blocking(move || actions.create(input)).await;
        Ok(response::from_create_result(result))
    }

    async fn handle_get_action(&self, id: i32) -> HandlerResult {
        let actions = self.services.actions.clone();
        let result = blocking(move || actions.get(id)).await;
        Ok(response::from_option(result, &format!("Action {} not found", id)))
    }

    async fn handle_update_action(&self, req: Request<Incoming>, id: i32) -> HandlerResult {
        let input: UpdateActionInput = read_json(req).await?;
        let actions = self.services.actions.clone();
        let result = blocking(move || actions.update(id, input)).await;
        Ok(response::from_result(result))
    }

    async fn handle_delete_action(&self, id: i32) -> HandlerResult {
        let actions = self.services.actions.clone();
        let result = blocking(move || actions.delete(id)).await;
        Ok(response::from_delete_bool_result(result, &format!("Action {} not found", id)))
    }

    // =========================================================================
    // Scores
    // =========================================================================

    async fn handle_user_scores(&self, user_id: i32) -> HandlerResult {
        let leaderboard = self.services.leaderboard.clone();
        let scores = blocking(move || leaderboard.scores_for_user(user_id)).await?;
        Ok(response::ok(&serde_json::json!({
            "user_id": user_id,
            "scores": scores,
        })))
    }

    async fn handle_audit(&self) -> HandlerResult {
        let leaderboard = self.services.leaderboard.clone();
        let discrepancies = blocking(move || leaderboard.audit()).await?;
        Ok(response::ok(&serde_json::json!({
            "consistent": discrepancies.is_empty(),
            "discrepancies": discrepancies,
        })))
    }
}

/// Run synchronous database work off the async executor
async fn blocking<F, T>(f: F) -> Result<T, StorageError>
where
    F: FnOnce() -> Result<T, StorageError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StorageError::Internal(format!("Blocking task failed: {}", e)))?
}

async fn read_json<T: DeserializeOwned>(req: Request<Incoming>) -> Result<T, StorageError> {
    let body = req
        .collect()
        .await
        .map_err(|e| StorageError::Internal(format!("Failed to read body: {}", e)))?
        .to_bytes();
    Ok(serde_json::from_slice(&body)?)
}

fn parse_query<T: DeserializeOwned>(query: &str) -> Result<T, StorageError> {
    serde_urlencoded::from_str(query)
        .map_err(|e| StorageError::InvalidInput(format!("Invalid query string: {}", e)))
}
