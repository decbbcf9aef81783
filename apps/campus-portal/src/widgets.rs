//! Visões ao vivo das páginas do portal
//!
//! Cada visão abre uma consulta pelo binder e projeta cada snapshot com os
//! agregadores. O fluxo começa em `loading`, segue com `ready` a cada mudança
//! e termina depois de um `failed`.

use std::future::ready;

use campus_db::{
    models::{
        Appointment, DailyNutritionLog, DoctorStatus, EmergencyReport, HospitalFeedback,
        MessFoodRating, UserProfile,
    },
    CollectionRef, Direction, DocRef, FilterOp,
};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::aggregate::{self, HygienePoint, NutritionTotals, ResponseTimePoint};
use crate::assistant::HealthRiskInput;
use crate::auth::Identity;
use crate::binder::{LiveQuery, Record};
use crate::context::PortalContext;
use crate::error::{ErrorKind, PortalError};

/// Fotos exibidas na galeria do refeitório
const GALLERY_SIZE: usize = 6;
/// Avaliações lidas para montar a galeria
const GALLERY_WINDOW: usize = 20;

/// Estado de uma visão
#[derive(Debug, Clone)]
pub enum ViewState<T> {
    Loading,
    Ready(T),
    Failed(PortalError),
}

impl<T> ViewState<T> {
    pub fn is_loading(&self) -> bool {
        matches!(self, ViewState::Loading)
    }

    pub fn ready(self) -> Option<T> {
        match self {
            ViewState::Ready(value) => Some(value),
            _ => None,
        }
    }
}

#[derive(Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
enum WireState<'a, T> {
    Loading,
    Ready { data: &'a T },
    Failed { error: ErrorKind, detail: String },
}

impl<T: Serialize> Serialize for ViewState<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ViewState::Loading => WireState::<T>::Loading,
            ViewState::Ready(data) => WireState::Ready { data },
            ViewState::Failed(err) => WireState::Failed {
                error: err.kind(),
                detail: err.to_string(),
            },
        }
        .serialize(serializer)
    }
}

pub type View<T> = BoxStream<'static, ViewState<T>>;

/// `loading` seguido da projeção de cada snapshot
fn live_view<S, V, F>(live: LiveQuery<S>, mut project: F) -> View<V>
where
    S: Send + 'static,
    V: Send + 'static,
    F: FnMut(S) -> V + Send + 'static,
{
    stream::once(ready(ViewState::Loading))
        .chain(live.map(move |snapshot| match snapshot {
            Ok(value) => ViewState::Ready(project(value)),
            Err(err) => ViewState::Failed(err),
        }))
        .boxed()
}

fn start_of_day(day: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&NaiveDateTime::new(day, NaiveTime::default()))
}

fn data<T>(records: Vec<Record<T>>) -> Vec<T> {
    records.into_iter().map(|r| r.data).collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyRating {
    pub day: NaiveDate,
    pub average: f64,
    pub count: usize,
}

/// Nota média do dia em todos os refeitórios
pub fn daily_mess_rating(ctx: &PortalContext, identity: &Identity, day: NaiveDate) -> View<DailyRating> {
    let ratings = ctx.collection::<MessFoodRating>(CollectionRef::mess_food_ratings());
    let start = start_of_day(day);
    let query = ratings
        .query()
        .filter("timestamp", FilterOp::Ge, start)
        .filter("timestamp", FilterOp::Lt, start + Duration::days(1));

    live_view(ratings.subscribe(Some(identity.caller()), query), move |records| {
        let ratings = data(records);
        DailyRating {
            day,
            average: aggregate::daily_rating(&ratings, day),
            count: ratings.len(),
        }
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Scorecard {
    pub average: f64,
    pub hygiene_score: u32,
    pub label: &'static str,
    pub count: usize,
}

/// Nota de higiene filtrada por refeitório e refeição
pub fn mess_scorecard(
    ctx: &PortalContext,
    identity: &Identity,
    mess_name: Option<String>,
    meal_type: Option<String>,
) -> View<Scorecard> {
    let ratings = ctx.collection::<MessFoodRating>(CollectionRef::mess_food_ratings());
    let mut query = ratings.query();
    if let Some(mess) = mess_name {
        query = query.where_eq("messName", mess);
    }
    if let Some(meal) = meal_type {
        query = query.where_eq("mealType", meal);
    }

    live_view(ratings.subscribe(Some(identity.caller()), query), |records| {
        let ratings = data(records);
        let average = aggregate::average_rating(&ratings);
        let hygiene_score = if ratings.is_empty() {
            0
        } else {
            aggregate::hygiene_score(average)
        };
        Scorecard {
            average,
            hygiene_score,
            label: aggregate::score_label(hygiene_score),
            count: ratings.len(),
        }
    })
}

/// Galeria com as fotos mais recentes
pub fn recent_photos(ctx: &PortalContext, identity: &Identity) -> View<Vec<MessFoodRating>> {
    let ratings = ctx.collection::<MessFoodRating>(CollectionRef::mess_food_ratings());
    let query = ratings
        .query()
        .order_by("timestamp", Direction::Desc)
        .limit(GALLERY_WINDOW);

    live_view(ratings.subscribe(Some(identity.caller()), query), |records| {
        let ratings = data(records);
        aggregate::recent_photos(&ratings, GALLERY_SIZE)
            .into_iter()
            .cloned()
            .collect()
    })
}

pub fn hygiene_chart(ctx: &PortalContext, identity: &Identity) -> View<Vec<HygienePoint>> {
    let ratings = ctx.collection::<MessFoodRating>(CollectionRef::mess_food_ratings());
    let query = ratings.query();
    live_view(ratings.subscribe(Some(identity.caller()), query), |records| {
        aggregate::mess_hygiene_series(&data(records))
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitTimes {
    pub average_wait_minutes: u32,
    pub series: Vec<ResponseTimePoint>,
}

/// Tempo de espera no hospital (administração)
pub fn hospital_wait_times(ctx: &PortalContext, identity: &Identity) -> View<WaitTimes> {
    let feedbacks = ctx.collection::<HospitalFeedback>(CollectionRef::hospital_feedbacks());
    let query = feedbacks.query();
    live_view(feedbacks.subscribe(Some(identity.caller()), query), |records| {
        let feedbacks = data(records);
        WaitTimes {
            average_wait_minutes: aggregate::average_wait_time(&feedbacks),
            series: aggregate::response_time_series(&feedbacks),
        }
    })
}

/// Todos os agendamentos, do mais próximo ao mais distante
pub fn admin_appointments(ctx: &PortalContext, identity: &Identity) -> View<Vec<Record<Appointment>>> {
    let appointments = ctx.collection::<Appointment>(CollectionRef::appointments());
    let query = appointments
        .query()
        .order_by("appointmentDate", Direction::Asc);
    live_view(appointments.subscribe(Some(identity.caller()), query), |records| records)
}

/// Agendamentos do próprio aluno, ordenados no cliente
pub fn my_appointments(ctx: &PortalContext, identity: &Identity) -> View<Vec<Record<Appointment>>> {
    let appointments = ctx.collection::<Appointment>(CollectionRef::appointments());
    let query = appointments
        .query()
        .where_eq("studentId", identity.uid.as_str());
    live_view(
        appointments.subscribe(Some(identity.caller()), query),
        |mut records| {
            aggregate::sort_appointments(&mut records, |r| &r.data);
            records
        },
    )
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NutritionDiary {
    pub day: NaiveDate,
    pub entries: Vec<Record<DailyNutritionLog>>,
    pub totals: NutritionTotals,
}

pub fn nutrition_diary(ctx: &PortalContext, identity: &Identity, day: NaiveDate) -> View<NutritionDiary> {
    let logs = ctx.collection::<DailyNutritionLog>(CollectionRef::nutrition_logs(&identity.uid));
    let start = start_of_day(day);
    let query = logs
        .query()
        .filter("timestamp", FilterOp::Ge, start)
        .filter("timestamp", FilterOp::Lt, start + Duration::days(1))
        .order_by("timestamp", Direction::Desc);

    live_view(logs.subscribe(Some(identity.caller()), query), move |entries| {
        let totals = aggregate::nutrition_totals(entries.iter().map(|r| &r.data));
        NutritionDiary {
            day,
            entries,
            totals,
        }
    })
}

/// Médico de plantão; valores padrão enquanto o documento não existe
pub fn doctor_status(ctx: &PortalContext, identity: &Identity) -> View<DoctorStatus> {
    let status = ctx.document::<DoctorStatus>(DocRef::hospital_status());
    live_view(status.watch(Some(identity.caller())), Option::unwrap_or_default)
}

pub fn profile(ctx: &PortalContext, identity: &Identity) -> View<Option<UserProfile>> {
    let profile = ctx.document::<UserProfile>(DocRef::user_profile(&identity.uid));
    live_view(profile.watch(Some(identity.caller())), |profile| profile)
}

/// Papel de administrador do próprio usuário
pub fn admin_flag(ctx: &PortalContext, identity: &Identity) -> View<bool> {
    let role = ctx.document::<Value>(DocRef::admin_role(&identity.uid));
    live_view(role.watch(Some(identity.caller())), |role| role.is_some())
}

/// Alertas de SOS, do mais recente ao mais antigo
pub fn live_alerts(ctx: &PortalContext, identity: &Identity) -> View<Vec<Record<EmergencyReport>>> {
    let reports = ctx.collection::<EmergencyReport>(CollectionRef::emergency_reports());
    let query = reports.query().order_by("timestamp", Direction::Desc);
    live_view(reports.subscribe(Some(identity.caller()), query), |records| records)
}

enum DatasetPart {
    Emergencies(Result<Vec<Record<EmergencyReport>>, PortalError>),
    Feedbacks(Result<Vec<Record<HospitalFeedback>>, PortalError>),
    Ratings(Result<Vec<Record<MessFoodRating>>, PortalError>),
}

#[derive(Default)]
struct Dataset {
    emergencies: Option<Vec<Record<EmergencyReport>>>,
    feedbacks: Option<Vec<Record<HospitalFeedback>>>,
    ratings: Option<Vec<Record<MessFoodRating>>>,
    failed: bool,
}

impl Dataset {
    fn absorb(&mut self, part: DatasetPart) -> Result<(), PortalError> {
        match part {
            DatasetPart::Emergencies(snapshot) => self.emergencies = Some(snapshot?),
            DatasetPart::Feedbacks(snapshot) => self.feedbacks = Some(snapshot?),
            DatasetPart::Ratings(snapshot) => self.ratings = Some(snapshot?),
        }
        Ok(())
    }

    /// Pronto só depois que as três consultas entregaram
    fn snapshot(&self) -> Option<HealthRiskInput> {
        Some(HealthRiskInput {
            emergency_reports: self.emergencies.clone()?,
            hospital_feedbacks: self.feedbacks.clone()?,
            mess_food_ratings: self.ratings.clone()?,
        })
    }
}

/// Os três conjuntos da análise preditiva, abertos em paralelo
pub fn health_dataset(ctx: &PortalContext, identity: &Identity) -> View<HealthRiskInput> {
    let caller = Some(identity.caller());
    let emergencies = ctx.collection::<EmergencyReport>(CollectionRef::emergency_reports());
    let feedbacks = ctx.collection::<HospitalFeedback>(CollectionRef::hospital_feedbacks());
    let ratings = ctx.collection::<MessFoodRating>(CollectionRef::mess_food_ratings());

    let parts = stream::select(
        stream::select(
            emergencies
                .subscribe(caller.clone(), emergencies.query())
                .map(DatasetPart::Emergencies),
            feedbacks
                .subscribe(caller.clone(), feedbacks.query())
                .map(DatasetPart::Feedbacks),
        ),
        ratings
            .subscribe(caller, ratings.query())
            .map(DatasetPart::Ratings),
    );

    let updates = parts
        .scan(Dataset::default(), |dataset, part| {
            if dataset.failed {
                return ready(None);
            }
            let state = match dataset.absorb(part) {
                Ok(()) => dataset.snapshot().map(ViewState::Ready),
                Err(err) => {
                    dataset.failed = true;
                    Some(ViewState::Failed(err))
                }
            };
            ready(Some(state))
        })
        .filter_map(ready);

    stream::once(ready(ViewState::Loading)).chain(updates).boxed()
}
