//! `POST /api/v3/intents` (§4.6, C8).

use axum::extract::{Extension, State};
use axum::http::{StatusCode, Uri};
use axum::Json;

use crate::auth::Principal;
use crate::intents::IntentRequest;
use crate::problem::{Problem, RequestId};
use crate::web::state::AppState;

pub async fn create_intent(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    uri: Uri,
    Json(body): Json<IntentRequest>,
) -> Result<(StatusCode, Json<crate::intents::IntentResponse>), Problem> {
    state
        .intents
        .handle(&principal, body)
        .await
        .map(|response| (StatusCode::ACCEPTED, Json(response)))
        .map_err(|err| err.into_problem(uri.path(), &request_id))
}
