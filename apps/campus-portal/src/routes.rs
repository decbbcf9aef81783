//! Rotas HTTP do portal
//!
//! Respostas seguem o envelope `Reply<T>`; visões ao vivo saem como SSE.
//! A sessão vem de `Authorization: Bearer <token>` ou, para `EventSource`,
//! do parâmetro `access_token`.

use std::convert::Infallible;

use axum::{
    async_trait,
    body::Bytes,
    extract::{DefaultBodyLimit, FromRequestParts, Path, Query, State},
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        request::Parts,
        HeaderMap, HeaderValue,
    },
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, patch, post, put},
    Json, Router,
};
use chrono::Utc;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tower_http::compression::CompressionLayer;
use tracing::debug;

use crate::actions::{self, Created, PhotoUpload};
use crate::assistant::{HealthRisk, NutritionEstimate};
use crate::auth::{Identity, PhoneChallenge, Session};
use crate::built_info;
use crate::context::SharedContext;
use crate::error::{PortalError, Reply};
use crate::forms::{
    self, AnalyzeMealForm, AppointmentForm, ChatForm, DoctorStatusForm, FederatedForm,
    HospitalFeedbackForm, LoginForm, MessRatingForm, NutritionLogForm, PhoneStartForm,
    PhoneVerifyForm, ProfileForm, SignupForm, SosForm, StatusChangeForm,
};
use crate::storage::StoredObject;
use crate::submit::Submission;
use crate::widgets::{self, View};

type ApiResult<T> = Result<Json<Reply<T>>, PortalError>;

/// Folga acima do limite de upload para o corpo JSON dos formulários
const BODY_LIMIT_SLACK: usize = 64 * 1024;

pub fn router(ctx: SharedContext, max_upload_bytes: usize) -> Router {
    let live = Router::new()
        .route("/mess/daily", get(live_daily_rating))
        .route("/mess/scorecard", get(live_scorecard))
        .route("/mess/photos", get(live_photos))
        .route("/mess/hygiene", get(live_hygiene))
        .route("/hospital/wait-times", get(live_wait_times))
        .route("/hospital/doctor", get(live_doctor))
        .route("/appointments", get(live_admin_appointments))
        .route("/appointments/mine", get(live_my_appointments))
        .route("/nutrition/today", get(live_nutrition))
        .route("/profile", get(live_profile))
        .route("/admin", get(live_admin_flag))
        .route("/alerts", get(live_alerts))
        .route("/health-dataset", get(live_health_dataset));

    Router::new()
        .route("/health", get(health))
        .route("/auth/signup", post(sign_up))
        .route("/auth/login", post(log_in))
        .route("/auth/phone/start", post(start_phone))
        .route("/auth/phone/verify", post(verify_phone))
        .route("/auth/federated", post(federated))
        .route("/me/admin", get(me_admin))
        .route("/me/profile", put(update_profile))
        .route("/sos", post(send_sos))
        .route("/hospital/feedback", post(hospital_feedback))
        .route("/hospital/appointments", post(book_appointment))
        .route("/hospital/doctor", put(update_doctor))
        .route("/appointments/:id/status", patch(appointment_status))
        .route("/mess/ratings", post(mess_rating))
        .route("/uploads", post(upload))
        .route("/files/:name", get(download))
        .route("/nutrition/analyze", post(analyze_meal))
        .route("/nutrition/logs", post(log_nutrition))
        .route("/assistant/chat", post(chat))
        .route("/admin/health-analysis", post(health_analysis))
        // Compressão só nas respostas JSON; SSE fica de fora
        .layer(CompressionLayer::new())
        .route("/diagnostics/stream", get(diagnostics_stream))
        .nest("/live", live)
        .layer(DefaultBodyLimit::max(max_upload_bytes + BODY_LIMIT_SLACK))
        .with_state(ctx)
}

#[async_trait]
impl FromRequestParts<SharedContext> for Identity {
    type Rejection = PortalError;

    async fn from_request_parts(
        parts: &mut Parts,
        ctx: &SharedContext,
    ) -> Result<Self, Self::Rejection> {
        let from_header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::to_string);
        // Query já decodificada (percent-encoding)
        let from_query = || {
            Query::<TokenQuery>::try_from_uri(&parts.uri)
                .ok()
                .and_then(|Query(q)| q.access_token)
        };

        let token = from_header
            .or_else(from_query)
            .ok_or_else(|| PortalError::Unauthenticated("Please sign in to continue.".into()))?;
        Ok(ctx.auth.verify_token(token.trim())?)
    }
}

#[derive(Deserialize)]
struct TokenQuery {
    access_token: Option<String>,
}

// Sistema

#[derive(Serialize)]
struct HealthInfo {
    status: &'static str,
    version: &'static str,
    profile: &'static str,
}

async fn health() -> Json<Reply<HealthInfo>> {
    Json(Reply::ok(HealthInfo {
        status: "ok",
        version: built_info::PKG_VERSION,
        profile: built_info::PROFILE,
    }))
}

// Autenticação

async fn sign_up(State(ctx): State<SharedContext>, Json(form): Json<SignupForm>) -> ApiResult<Session> {
    forms::check(&form)?;
    let session = ctx
        .auth
        .sign_up_email(&form.email, &form.password, form.display_name.as_deref())
        .await?;
    Ok(Json(Reply::ok(session)))
}

async fn log_in(State(ctx): State<SharedContext>, Json(form): Json<LoginForm>) -> ApiResult<Session> {
    forms::check(&form)?;
    let session = ctx.auth.sign_in_email(&form.email, &form.password).await?;
    Ok(Json(Reply::ok(session)))
}

async fn start_phone(
    State(ctx): State<SharedContext>,
    Json(form): Json<PhoneStartForm>,
) -> ApiResult<PhoneChallenge> {
    forms::check(&form)?;
    Ok(Json(Reply::ok(ctx.auth.start_phone(&form.phone_number).await?)))
}

async fn verify_phone(
    State(ctx): State<SharedContext>,
    Json(form): Json<PhoneVerifyForm>,
) -> ApiResult<Session> {
    forms::check(&form)?;
    let session = ctx
        .auth
        .verify_phone(&form.verification_id, &form.code)
        .await?;
    Ok(Json(Reply::ok(session)))
}

async fn federated(
    State(ctx): State<SharedContext>,
    Json(form): Json<FederatedForm>,
) -> ApiResult<Session> {
    forms::check(&form)?;
    let session = ctx
        .auth
        .sign_in_federated(
            &form.provider,
            &form.subject,
            form.email.as_deref(),
            form.display_name.as_deref(),
            form.photo_url.as_deref(),
        )
        .await?;
    Ok(Json(Reply::ok(session)))
}

async fn me_admin(State(ctx): State<SharedContext>, identity: Identity) -> ApiResult<bool> {
    Ok(Json(Reply::ok(ctx.is_admin(&identity.uid).await?)))
}

async fn update_profile(
    State(ctx): State<SharedContext>,
    identity: Identity,
    Json(form): Json<ProfileForm>,
) -> Submission<Session> {
    actions::update_profile(&ctx, &identity, form).await
}

// Formulários

async fn send_sos(
    State(ctx): State<SharedContext>,
    identity: Identity,
    Json(form): Json<SosForm>,
) -> Submission<Created> {
    actions::send_sos(&ctx, &identity, form).await
}

async fn hospital_feedback(
    State(ctx): State<SharedContext>,
    identity: Identity,
    Json(form): Json<HospitalFeedbackForm>,
) -> Submission<Created> {
    actions::submit_hospital_feedback(&ctx, &identity, form).await
}

async fn book_appointment(
    State(ctx): State<SharedContext>,
    identity: Identity,
    Json(form): Json<AppointmentForm>,
) -> Submission<Created> {
    actions::book_appointment(&ctx, &identity, form).await
}

async fn appointment_status(
    State(ctx): State<SharedContext>,
    identity: Identity,
    Path(id): Path<String>,
    Json(form): Json<StatusChangeForm>,
) -> Submission<campus_db::models::AppointmentStatus> {
    actions::update_appointment_status(&ctx, &identity, &id, form).await
}

async fn update_doctor(
    State(ctx): State<SharedContext>,
    identity: Identity,
    Json(form): Json<DoctorStatusForm>,
) -> Submission<campus_db::models::DoctorStatus> {
    actions::update_doctor_status(&ctx, &identity, form).await
}

async fn mess_rating(
    State(ctx): State<SharedContext>,
    identity: Identity,
    Json(form): Json<MessRatingForm>,
) -> Submission<Created> {
    actions::submit_mess_rating(&ctx, &identity, form, None).await
}

/// Corpo bruto da imagem, tipo em `Content-Type`
async fn upload(
    State(ctx): State<SharedContext>,
    _identity: Identity,
    headers: HeaderMap,
    body: Bytes,
) -> Submission<StoredObject> {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();
    actions::upload_photo(
        &ctx,
        PhotoUpload {
            content_type,
            bytes: body.to_vec(),
        },
    )
    .await
}

async fn download(
    State(ctx): State<SharedContext>,
    Path(name): Path<String>,
) -> Result<Response, PortalError> {
    let object = ctx.storage.get(&name).await?;
    let mut response = object.bytes.into_response();
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(object.content_type));
    Ok(response)
}

async fn analyze_meal(
    State(ctx): State<SharedContext>,
    _identity: Identity,
    Json(form): Json<AnalyzeMealForm>,
) -> Submission<NutritionEstimate> {
    actions::analyze_meal(&ctx, form).await
}

async fn log_nutrition(
    State(ctx): State<SharedContext>,
    identity: Identity,
    Json(form): Json<NutritionLogForm>,
) -> Submission<Created> {
    actions::log_nutrition(&ctx, &identity, form).await
}

async fn chat(
    State(ctx): State<SharedContext>,
    _identity: Identity,
    Json(form): Json<ChatForm>,
) -> Submission<String> {
    actions::first_aid_chat(&ctx, form).await
}

async fn health_analysis(
    State(ctx): State<SharedContext>,
    identity: Identity,
) -> Submission<Vec<HealthRisk>> {
    actions::run_health_analysis(&ctx, &identity).await
}

// Visões ao vivo

/// Cada estado vira um evento `snapshot`; o fim do fluxo encerra a resposta
fn sse<T: Serialize + Send + 'static>(
    view: View<T>,
) -> Sse<impl Stream<Item = Result<Event, serde_json::Error>>> {
    Sse::new(view.map(|state| Event::default().event("snapshot").json_data(&state)))
        .keep_alive(KeepAlive::default())
}

async fn live_daily_rating(State(ctx): State<SharedContext>, identity: Identity) -> impl IntoResponse {
    sse(widgets::daily_mess_rating(&ctx, &identity, Utc::now().date_naive()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScorecardFilter {
    mess_name: Option<String>,
    meal_type: Option<String>,
}

async fn live_scorecard(
    State(ctx): State<SharedContext>,
    identity: Identity,
    Query(filter): Query<ScorecardFilter>,
) -> impl IntoResponse {
    sse(widgets::mess_scorecard(
        &ctx,
        &identity,
        filter.mess_name,
        filter.meal_type,
    ))
}

async fn live_photos(State(ctx): State<SharedContext>, identity: Identity) -> impl IntoResponse {
    sse(widgets::recent_photos(&ctx, &identity))
}

async fn live_hygiene(State(ctx): State<SharedContext>, identity: Identity) -> impl IntoResponse {
    sse(widgets::hygiene_chart(&ctx, &identity))
}

async fn live_wait_times(State(ctx): State<SharedContext>, identity: Identity) -> impl IntoResponse {
    sse(widgets::hospital_wait_times(&ctx, &identity))
}

async fn live_doctor(State(ctx): State<SharedContext>, identity: Identity) -> impl IntoResponse {
    sse(widgets::doctor_status(&ctx, &identity))
}

async fn live_admin_appointments(
    State(ctx): State<SharedContext>,
    identity: Identity,
) -> impl IntoResponse {
    sse(widgets::admin_appointments(&ctx, &identity))
}

async fn live_my_appointments(
    State(ctx): State<SharedContext>,
    identity: Identity,
) -> impl IntoResponse {
    sse(widgets::my_appointments(&ctx, &identity))
}

async fn live_nutrition(State(ctx): State<SharedContext>, identity: Identity) -> impl IntoResponse {
    sse(widgets::nutrition_diary(&ctx, &identity, Utc::now().date_naive()))
}

async fn live_profile(State(ctx): State<SharedContext>, identity: Identity) -> impl IntoResponse {
    sse(widgets::profile(&ctx, &identity))
}

async fn live_admin_flag(State(ctx): State<SharedContext>, identity: Identity) -> impl IntoResponse {
    sse(widgets::admin_flag(&ctx, &identity))
}

async fn live_alerts(State(ctx): State<SharedContext>, identity: Identity) -> impl IntoResponse {
    sse(widgets::live_alerts(&ctx, &identity))
}

async fn live_health_dataset(
    State(ctx): State<SharedContext>,
    identity: Identity,
) -> impl IntoResponse {
    sse(widgets::health_dataset(&ctx, &identity))
}

/// Eventos de permissão para o overlay de desenvolvimento
async fn diagnostics_stream(State(ctx): State<SharedContext>) -> Result<Response, PortalError> {
    if !ctx.dev_overlay() {
        return Err(PortalError::NotFound("diagnostics".into()));
    }
    debug!("Cliente conectado ao fluxo de diagnóstico");
    let events = ctx.reporter.stream().map(|event| {
        Ok::<_, Infallible>(
            Event::default()
                .event("permission-error")
                .json_data(&event)
                .unwrap_or_else(|_| Event::default().comment("evento ilegível")),
        )
    });
    Ok(Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response())
}
