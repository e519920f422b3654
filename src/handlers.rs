//! HTTP handlers. Commands answer with the `{ ok, data | error }` envelope,
//! reads with plain JSON served through the view cache.

use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Redirect, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::PgPool;
use tracing::{debug, error, warn};

use crate::cache::MemoryViewCache;
use crate::error::{ActionResult, Navigation, Payload, PollError};
use crate::models::{PollId, PollInput, PollView, VoteRequest};
use crate::results::{PollResults, VoteFeed};
use crate::service::{poll_path, results_path, PollService, POLLS_PATH};
use crate::store::{PgPollStore, PgSession};

const INVALID_INPUT: &str = "Invalid input";

pub type Service = PollService<PgPollStore, MemoryViewCache>;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub service: Service,
    pub views: Arc<MemoryViewCache>,
    pub feed: VoteFeed,
}

impl AppState {
    /// The caller's session for this request.
    fn session(&self, headers: &HeaderMap) -> PgSession {
        PgSession::new(self.pool.clone(), bearer_token(headers))
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct RedirectParams {
    #[serde(default)]
    pub redirect: bool,
}

/// Token from an `Authorization: Bearer ...` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then(|| token.to_owned())
}

impl IntoResponse for PollError {
    fn into_response(self) -> Response {
        let status = match self {
            PollError::NotFound => StatusCode::NOT_FOUND,
            PollError::Backend(_) | PollError::Unexpected => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

fn command_response<T: Serialize + Payload>(result: ActionResult<T>) -> Response {
    let status = if result.is_ok() {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    };
    (status, Json(result)).into_response()
}

fn navigation_response<T: Serialize + Payload>(navigation: Navigation<T>) -> Response {
    match navigation {
        Navigation::Redirect(location) => Redirect::to(&location).into_response(),
        Navigation::Stay(result) => command_response(result),
    }
}

fn rejected(err: PollError) -> Response {
    command_response::<()>(ActionResult::failure(err.to_string()))
}

/// A command body that failed to deserialize is an invalid command, not a
/// transport error.
fn command_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, Response> {
    body.map(|Json(value)| value).map_err(|rejection| {
        warn!(error = %rejection.body_text(), "malformed command body");
        rejected(PollError::Invalid(INVALID_INPUT.to_owned()))
    })
}

fn parse_poll_id(raw: &str) -> Result<PollId, PollError> {
    raw.parse().map_err(|_| PollError::NotFound)
}

/// A read view and the moment it goes stale without any command touching it.
trait View: Serialize {
    fn stale_at(&self) -> Option<DateTime<Utc>>;
}

impl View for PollView {
    fn stale_at(&self) -> Option<DateTime<Utc>> {
        PollView::stale_at(self)
    }
}

impl View for Vec<PollView> {
    fn stale_at(&self) -> Option<DateTime<Utc>> {
        self.iter().filter_map(PollView::stale_at).min()
    }
}

impl View for PollResults {
    fn stale_at(&self) -> Option<DateTime<Utc>> {
        None
    }
}

/// Serve `path` from the view cache, rendering it with `load` on a miss.
async fn cached_view<T, F>(
    views: &MemoryViewCache,
    path: String,
    now: DateTime<Utc>,
    load: F,
) -> Response
where
    T: View,
    F: Future<Output = Result<T, PollError>>,
{
    if let Some(view) = views.get(&path, now) {
        return Json(view).into_response();
    }
    let epoch = views.epoch();
    let view = match load.await {
        Ok(view) => view,
        Err(err) => return err.into_response(),
    };
    match serde_json::to_value(&view) {
        Ok(value) => {
            if !views.put(path.as_str(), epoch, value.clone(), view.stale_at()) {
                debug!(path = %path, "view changed while rendering, not cached");
            }
            Json(value).into_response()
        }
        Err(err) => {
            error!(error = %err, path = %path, "failed to render view");
            PollError::Unexpected.into_response()
        }
    }
}

pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// List every poll with its vote count
pub async fn list_polls(State(state): State<AppState>) -> Response {
    let now = state.service.now();
    cached_view(&state.views, POLLS_PATH.to_owned(), now, state.service.list_polls()).await
}

pub async fn get_poll(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match parse_poll_id(&id) {
        Ok(id) => {
            let now = state.service.now();
            cached_view(&state.views, poll_path(&id), now, state.service.get_poll(&id)).await
        }
        Err(err) => err.into_response(),
    }
}

pub async fn get_results(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match parse_poll_id(&id) {
        Ok(id) => {
            let now = state.service.now();
            cached_view(&state.views, results_path(&id), now, state.service.get_results(&id)).await
        }
        Err(err) => err.into_response(),
    }
}

/// Live results as server-sent events: one `results` event now, then one per
/// vote change on the poll.
pub async fn stream_results(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, PollError> {
    let id = parse_poll_id(&id)?;
    state.service.get_poll(&id).await?;

    let events = state
        .service
        .watch_results(&state.feed, id)
        .filter_map(|results| async move {
            match Event::default().event("results").json_data(&results) {
                Ok(event) => Some(Ok(event)),
                Err(err) => {
                    error!(error = %err, "failed to encode results event");
                    None
                }
            }
        });
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

pub async fn create_poll(
    State(state): State<AppState>,
    Query(params): Query<RedirectParams>,
    headers: HeaderMap,
    body: Result<Json<PollInput>, JsonRejection>,
) -> Response {
    let input = match command_body(body) {
        Ok(input) => input,
        Err(response) => return response,
    };
    let session = state.session(&headers);
    if params.redirect {
        navigation_response(state.service.create_poll_and_redirect(&session, &input).await)
    } else {
        command_response(state.service.create_poll(&session, &input).await)
    }
}

/// An unparsable id reaches the service as `None` so that validation and the
/// session check still run first.
pub async fn update_poll(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<RedirectParams>,
    headers: HeaderMap,
    body: Result<Json<PollInput>, JsonRejection>,
) -> Response {
    let input = match command_body(body) {
        Ok(input) => input,
        Err(response) => return response,
    };
    let id = id.parse::<PollId>().ok();
    let session = state.session(&headers);
    if params.redirect {
        navigation_response(
            state
                .service
                .update_poll_and_redirect(&session, id, &input)
                .await,
        )
    } else {
        command_response(state.service.update_poll(&session, id, &input).await)
    }
}

pub async fn delete_poll(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let session = state.session(&headers);
    command_response(
        state
            .service
            .delete_poll(&session, id.parse::<PollId>().ok())
            .await,
    )
}

/// Form-style delete: redirects to the listing on success.
pub async fn delete_poll_and_redirect(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let session = state.session(&headers);
    navigation_response(
        state
            .service
            .delete_poll_and_redirect(&session, id.parse::<PollId>().ok())
            .await,
    )
}

pub async fn submit_vote(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Result<Json<VoteRequest>, JsonRejection>,
) -> Response {
    let vote = match command_body(body) {
        Ok(vote) => vote,
        Err(response) => return response,
    };
    // Existence is the first thing a vote checks, so a bad id can fail here.
    let id = match parse_poll_id(&id) {
        Ok(id) => id,
        Err(err) => return rejected(err),
    };
    let session = state.session(&headers);
    command_response(
        state
            .service
            .submit_vote(&session, &id, vote.option_index)
            .await,
    )
}
