//! Ações das páginas do portal
//!
//! Cada ação valida o formulário, faz uma única escrita pelo [`Submitter`] e
//! devolve uma [`Submission`] com no máximo um aviso. Nenhuma ação altera o
//! estado das telas; as consultas ao vivo recebem a mudança pelo feed.

use campus_db::{
    models::{
        Appointment, AppointmentStatus, DailyNutritionLog, DoctorStatus, EmergencyReport,
        EmergencyType, HospitalFeedback, MessFoodRating, SickReport, UserProfile,
    },
    CollectionRef, DocRef, Query,
};
use chrono::{NaiveDateTime, NaiveTime, TimeZone, Utc};
use tracing::{info, warn};

use crate::assistant::{HealthRisk, HealthRiskInput, NutritionEstimate, CHAT_FALLBACK_REPLY};
use crate::auth::{Identity, Session};
use crate::context::PortalContext;
use crate::error::PortalError;
use crate::forms::{
    self, AnalyzeMealForm, AppointmentForm, ChatForm, DoctorStatusForm, HospitalFeedbackForm,
    MessRatingForm, NutritionLogForm, ProfileForm, SosForm, StatusChangeForm,
};
use crate::storage::StoredObject;
use crate::submit::{FailureCopy, Submission, Toast};

/// Foto enviada junto com um formulário
#[derive(Debug, Clone)]
pub struct PhotoUpload {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Id do documento criado
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Created {
    pub id: String,
}

impl From<DocRef> for Created {
    fn from(doc: DocRef) -> Self {
        Self {
            id: doc.id().to_string(),
        }
    }
}

const RATING_FAILURE: FailureCopy = FailureCopy {
    title: "Submission Error",
    permission: "Could not save your rating due to a permission issue.",
    fallback: "An unexpected error occurred. Could not submit your report.",
};

const FEEDBACK_FAILURE: FailureCopy = FailureCopy {
    title: "Error",
    permission: "You do not have permission to submit feedback.",
    fallback: "Failed to submit feedback. Please try again.",
};

const BOOKING_FAILURE: FailureCopy = FailureCopy {
    title: "Booking Failed",
    permission: "You do not have permission to book this appointment.",
    fallback: "Could not book your appointment. Please try again.",
};

const STATUS_FAILURE: FailureCopy = FailureCopy {
    title: "Update Failed",
    permission: "You do not have permission to change this appointment.",
    fallback: "Could not update the appointment. Please try again.",
};

const DOCTOR_FAILURE: FailureCopy = FailureCopy {
    title: "Update Failed",
    permission: "You do not have permission to change the doctor status.",
    fallback: "Could not update the doctor status.",
};

const PROFILE_FAILURE: FailureCopy = FailureCopy {
    title: "Update Failed",
    permission: "You do not have permission to update this profile.",
    fallback: "An error occurred while updating your profile.",
};

const SOS_FAILURE: FailureCopy = FailureCopy {
    title: "SOS Failed",
    permission: "Could not send your alert due to a permission issue.",
    fallback: "Could not send your alert. Please call campus security directly.",
};

const UPLOAD_FAILURE: FailureCopy = FailureCopy {
    title: "Upload Failed",
    permission: "You do not have permission to upload files.",
    fallback: "Could not upload the photo.",
};

const NUTRITION_FAILURE: FailureCopy = FailureCopy {
    title: "Error",
    permission: "You do not have permission to log meals.",
    fallback: "Could not save your meal log.",
};

const ANALYSIS_FAILURE: FailureCopy = FailureCopy {
    title: "Analysis Failed",
    permission: "Only administrators can run the health analysis.",
    fallback: "Failed to get predictions. Please check the server logs.",
};

pub async fn submit_mess_rating(
    ctx: &PortalContext,
    identity: &Identity,
    form: MessRatingForm,
    photo: Option<PhotoUpload>,
) -> Submission<Created> {
    let result: Result<Created, PortalError> = async {
        form.check()?;

        let image_url = match photo {
            Some(photo) => Some(
                ctx.storage
                    .put(&photo.content_type, &photo.bytes)
                    .await?
                    .url,
            ),
            None => form.image_url.clone(),
        };

        let rating = MessFoodRating {
            student_id: identity.uid.clone(),
            mess_name: form.mess_name.clone(),
            meal_type: form.meal_type.clone(),
            food_quality_rating: form.food_quality_rating,
            sick_after_meal_report: form.sick_after_meal_report,
            image_url,
            timestamp: Utc::now(),
        };
        ctx.submitter
            .create(
                &identity.caller(),
                &CollectionRef::mess_food_ratings(),
                &rating,
            )
            .await
            .map(Created::from)
    }
    .await;

    Submission::complete(
        result,
        |_| match form.sick_after_meal_report {
            SickReport::Yes => Toast::destructive(
                "Sickness Reported",
                "Your report has been sent. Please visit the campus hospital if you feel unwell.",
            ),
            SickReport::No => Toast::success(
                "Rating Submitted",
                format!(
                    "You rated {} at {} {} out of 5. Thank you!",
                    form.meal_type, form.mess_name, form.food_quality_rating
                ),
            ),
        },
        RATING_FAILURE,
    )
}

pub async fn submit_hospital_feedback(
    ctx: &PortalContext,
    identity: &Identity,
    form: HospitalFeedbackForm,
) -> Submission<Created> {
    let result: Result<Created, PortalError> = async {
        forms::check(&form)?;
        let feedback = HospitalFeedback {
            student_id: identity.uid.clone(),
            waiting_time: form.waiting_time,
            doctor_availability: form.doctor_availability,
            post_visit_feedback: form.feedback.clone(),
            emergency_vs_normal: form.case_type,
            timestamp: Utc::now(),
        };
        ctx.submitter
            .create(
                &identity.caller(),
                &CollectionRef::hospital_feedbacks(),
                &feedback,
            )
            .await
            .map(Created::from)
    }
    .await;

    Submission::complete(
        result,
        |_| {
            Toast::success(
                "Feedback Submitted",
                "Thank you for your feedback. It helps us improve our services.",
            )
        },
        FEEDBACK_FAILURE,
    )
}

pub async fn book_appointment(
    ctx: &PortalContext,
    identity: &Identity,
    form: AppointmentForm,
) -> Submission<Created> {
    let result: Result<Created, PortalError> = async {
        forms::check(&form)?;
        if form.appointment_date < Utc::now().date_naive() {
            return Err(PortalError::invalid_field(
                "appointment_date",
                "Please pick a date from today onwards.",
            ));
        }

        let midnight = NaiveDateTime::new(form.appointment_date, NaiveTime::default());
        let appointment = Appointment {
            student_id: identity.uid.clone(),
            student_name: form.student_name.clone(),
            enrollment_number: form.enrollment_number.clone(),
            appointment_date: Utc.from_utc_datetime(&midnight),
            appointment_time: form.appointment_time.clone(),
            reason: form.reason.clone(),
            status: AppointmentStatus::Scheduled,
            booked_by: identity.uid.clone(),
        };
        ctx.submitter
            .create(&identity.caller(), &CollectionRef::appointments(), &appointment)
            .await
            .map(Created::from)
    }
    .await;

    Submission::complete(
        result,
        |_| {
            Toast::success(
                "Appointment Booked",
                format!(
                    "Your appointment is scheduled for {} at {}.",
                    form.appointment_date.format("%B %-d, %Y"),
                    form.appointment_time
                ),
            )
        },
        BOOKING_FAILURE,
    )
}

/// Marca um agendamento como concluído ou cancelado
pub async fn update_appointment_status(
    ctx: &PortalContext,
    identity: &Identity,
    appointment_id: &str,
    form: StatusChangeForm,
) -> Submission<AppointmentStatus> {
    let caller = identity.caller();
    let result: Result<AppointmentStatus, PortalError> = async {
        let doc = CollectionRef::appointments().doc(appointment_id);
        // Leitura negada ou ausente segue para a escrita, que relata a tentativa
        let current = match ctx.store.get(Some(&caller), &doc).await {
            Ok(found) => found.map(|d| d.decode::<Appointment>()).transpose()?,
            Err(err) if err.is_permission_denied() => None,
            Err(err) => return Err(err.into()),
        };

        if let Some(current) = current {
            if !current.status.can_transition_to(form.status) {
                return Err(PortalError::invalid_field(
                    "status",
                    &format!(
                        "Cannot change an appointment from {} to {}.",
                        current.status, form.status
                    ),
                ));
            }
        }

        ctx.submitter
            .patch_field(&caller, &doc, "status", form.status)
            .await?;
        info!("Agendamento {} marcado como {}", appointment_id, form.status);
        Ok(form.status)
    }
    .await;

    Submission::complete(
        result,
        |status| Toast::success("Status Updated", format!("Appointment marked as {status}.")),
        STATUS_FAILURE,
    )
}

/// Médico de plantão; só administradores podem gravar
pub async fn update_doctor_status(
    ctx: &PortalContext,
    identity: &Identity,
    form: DoctorStatusForm,
) -> Submission<DoctorStatus> {
    let result: Result<DoctorStatus, PortalError> = async {
        forms::check(&form)?;
        let status = DoctorStatus {
            name: form.name.clone(),
            specialty: form.specialty.clone(),
            is_available: form.is_available,
        };
        ctx.submitter
            .merge(&identity.caller(), &DocRef::hospital_status(), &status)
            .await?;
        Ok(status)
    }
    .await;

    Submission::complete(
        result,
        |status| {
            Toast::success(
                "Status Updated",
                format!(
                    "{} is now {}.",
                    status.name,
                    if status.is_available {
                        "available"
                    } else {
                        "unavailable"
                    }
                ),
            )
        },
        DOCTOR_FAILURE,
    )
}

/// Atualiza o documento de perfil e depois a conta; devolve a nova sessão
pub async fn update_profile(
    ctx: &PortalContext,
    identity: &Identity,
    form: ProfileForm,
) -> Submission<Session> {
    let result: Result<Session, PortalError> = async {
        forms::check(&form)?;

        // Documento antes da conta: falha aqui não emite sessão nova
        let profile = UserProfile {
            uid: identity.uid.clone(),
            display_name: Some(form.display_name.clone()),
            photo_url: form.photo_url.clone(),
            enrollment_number: form.enrollment_number.clone(),
            hostel: form.hostel.clone(),
            department: form.department.clone(),
            year: form.year,
            updated_at: Some(Utc::now()),
        };
        ctx.submitter
            .merge(
                &identity.caller(),
                &DocRef::user_profile(&identity.uid),
                &profile,
            )
            .await?;

        let session = ctx
            .auth
            .update_profile(&identity.uid, &form.display_name, form.photo_url.as_deref())
            .await?;
        Ok(session)
    }
    .await;

    Submission::complete(
        result,
        |_| Toast::success("Profile Updated", "Your profile has been successfully updated."),
        PROFILE_FAILURE,
    )
}

pub async fn send_sos(
    ctx: &PortalContext,
    identity: &Identity,
    form: SosForm,
) -> Submission<Created> {
    let result: Result<Created, PortalError> = async {
        forms::check(&form)?;
        let report = EmergencyReport {
            student_id: identity.uid.clone(),
            student_name: form.student_name.clone(),
            enrollment_number: form.enrollment_number.clone(),
            location: form.location.clone(),
            emergency_type: form.emergency_type,
            timestamp: Utc::now(),
        };
        let created = ctx
            .submitter
            .create(
                &identity.caller(),
                &CollectionRef::emergency_reports(),
                &report,
            )
            .await?;
        warn!(
            "Alerta SOS {} de {} em {}",
            report.emergency_type, identity.uid, report.location
        );
        Ok(Created::from(created))
    }
    .await;

    Submission::complete(
        result,
        |_| {
            let kind = match form.emergency_type {
                EmergencyType::HostelIssue => "hostel issue".to_string(),
                other => other.to_string().to_lowercase(),
            };
            Toast::destructive(
                "SOS Alert Sent",
                format!(
                    "Your {kind} emergency alert has been sent. Authorities are on their way."
                ),
            )
        },
        SOS_FAILURE,
    )
}

pub async fn upload_photo(ctx: &PortalContext, photo: PhotoUpload) -> Submission<StoredObject> {
    let result = ctx
        .storage
        .put(&photo.content_type, &photo.bytes)
        .await
        .map_err(PortalError::from);
    Submission::failure_only(result, UPLOAD_FAILURE)
}

pub async fn log_nutrition(
    ctx: &PortalContext,
    identity: &Identity,
    form: NutritionLogForm,
) -> Submission<Created> {
    let result: Result<Created, PortalError> = async {
        forms::check(&form)?;
        let log = DailyNutritionLog {
            calories: form.calories,
            protein_grams: form.protein_grams,
            carbs_grams: form.carbs_grams,
            fat_grams: form.fat_grams,
            photo_url: form.photo_url.clone(),
            timestamp: Utc::now(),
        };
        ctx.submitter
            .create(
                &identity.caller(),
                &CollectionRef::nutrition_logs(&identity.uid),
                &log,
            )
            .await
            .map(Created::from)
    }
    .await;

    Submission::complete(
        result,
        |_| {
            Toast::success(
                "Meal Logged",
                format!("Added {:.0} kcal to today's diary.", form.calories),
            )
        },
        NUTRITION_FAILURE,
    )
}

/// Estimativa nutricional de uma foto; erro do serviço repassado sem alteração
pub async fn analyze_meal(ctx: &PortalContext, form: AnalyzeMealForm) -> Submission<NutritionEstimate> {
    let result: Result<NutritionEstimate, PortalError> = async {
        forms::check(&form)?;
        Ok(ctx.assistant.estimate_nutrition(&form.photo_data_uri).await?)
    }
    .await;
    Submission::failure_only(result, ANALYSIS_FAILURE)
}

/// Resposta do chat de primeiros socorros; falhas viram a resposta fixa
pub async fn first_aid_chat(ctx: &PortalContext, form: ChatForm) -> Submission<String> {
    if let Err(err) = forms::check(&form) {
        return Submission::silent(Err(err));
    }
    let reply = match ctx.assistant.first_aid_reply(&form.messages).await {
        Ok(reply) => reply,
        Err(err) => {
            warn!("Falha no chat de primeiros socorros: {}", err);
            CHAT_FALLBACK_REPLY.to_string()
        }
    };
    Submission::silent(Ok(reply))
}

/// Lê os três conjuntos e pede a análise de riscos ao assistente
pub async fn run_health_analysis(
    ctx: &PortalContext,
    identity: &Identity,
) -> Submission<Vec<HealthRisk>> {
    let caller = identity.caller();
    let result: Result<Vec<HealthRisk>, PortalError> = async {
        let emergency_query = Query::new(CollectionRef::emergency_reports());
        let hospital_query = Query::new(CollectionRef::hospital_feedbacks());
        let mess_query = Query::new(CollectionRef::mess_food_ratings());
        let (emergency_reports, hospital_feedbacks, mess_food_ratings) = tokio::try_join!(
            ctx.read_collection::<EmergencyReport>(&caller, &emergency_query),
            ctx.read_collection::<HospitalFeedback>(&caller, &hospital_query),
            ctx.read_collection::<MessFoodRating>(&caller, &mess_query),
        )?;
        let input = HealthRiskInput {
            emergency_reports,
            hospital_feedbacks,
            mess_food_ratings,
        };
        info!(
            "Análise de riscos: {} relatos, {} avaliações do hospital, {} notas do refeitório",
            input.emergency_reports.len(),
            input.hospital_feedbacks.len(),
            input.mess_food_ratings.len()
        );
        Ok(ctx.assistant.predict_health_risks(&input).await?)
    }
    .await;
    Submission::failure_only(result, ANALYSIS_FAILURE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assistant::{AssistantError, ChatMessage, ChatRole, MockHealthAssistant};
    use crate::auth::{AuthProvider, LogCodeSender};
    use crate::binder::Record;
    use crate::submit::ToastVariant;
    use crate::{aggregate, storage::LocalObjectStorage};
    use campus_db::{testing::temp_store, Operation};
    use chrono::{Duration, NaiveDate};
    use std::sync::Arc;
    use tempfile::TempDir;

    struct Harness {
        _db: TempDir,
        _files: TempDir,
        ctx: PortalContext,
    }

    async fn harness(assistant: MockHealthAssistant) -> Harness {
        let (db, store) = temp_store().await.unwrap();
        let files = tempfile::tempdir().unwrap();
        let storage = LocalObjectStorage::open(files.path(), "http://files.test", 1024)
            .await
            .unwrap();
        let auth = AuthProvider::new(
            store.pool().clone(),
            "jwt-secret",
            3600,
            "otp-secret",
            Arc::new(LogCodeSender),
        );
        let ctx = PortalContext::from_parts(
            store,
            auth,
            Arc::new(storage),
            Arc::new(assistant),
            false,
        );
        Harness {
            _db: db,
            _files: files,
            ctx,
        }
    }

    fn student(uid: &str) -> Identity {
        Identity {
            uid: uid.to_string(),
            display_name: Some("Asha".into()),
            email: None,
            photo_url: None,
        }
    }

    fn veg_lunch(rating: u8) -> MessRatingForm {
        MessRatingForm {
            mess_name: "Veg mess".into(),
            meal_type: "Lunch".into(),
            food_quality_rating: rating,
            sick_after_meal_report: SickReport::No,
            image_url: None,
        }
    }

    fn appointment_form(date: NaiveDate) -> AppointmentForm {
        AppointmentForm {
            student_name: "Asha Verma".into(),
            enrollment_number: "E2024001".into(),
            appointment_date: date,
            appointment_time: "10:30 AM".into(),
            reason: "Recurring headaches after class".into(),
        }
    }

    #[tokio::test]
    async fn test_rating_reaches_live_average() {
        let h = harness(MockHealthAssistant::new()).await;
        let me = student("s1");

        let ratings = h.ctx.collection::<MessFoodRating>(CollectionRef::mess_food_ratings());
        let mut live = ratings.subscribe(
            Some(me.caller()),
            ratings.query().where_eq("messName", "Veg mess"),
        );
        let first = live.next_snapshot().await.unwrap().unwrap();
        assert!(first.is_empty());

        let submission = submit_mess_rating(&h.ctx, &me, veg_lunch(5), None).await;
        let created = submission.result.unwrap();
        let toast = submission.toast.unwrap();
        assert_eq!(toast.title, "Rating Submitted");
        assert_eq!(toast.variant, ToastVariant::Default);

        let snapshot = live.next_snapshot().await.unwrap().unwrap();
        assert_eq!(snapshot.len(), 1);
        let Record { id, data } = &snapshot[0];
        assert_eq!(id, &created.id);
        assert_eq!(data.student_id, "s1");
        assert_eq!(data.food_quality_rating, 5);
        assert_eq!(data.sick_after_meal_report, SickReport::No);
        assert_eq!(aggregate::average_rating(snapshot.iter().map(|r| &r.data)), 5.0);
    }

    #[tokio::test]
    async fn test_rating_with_photo_and_sickness() {
        let h = harness(MockHealthAssistant::new()).await;
        let me = student("s1");
        let mut form = veg_lunch(2);
        form.sick_after_meal_report = SickReport::Yes;

        let photo = PhotoUpload {
            content_type: "image/jpeg".into(),
            bytes: b"jpeg bytes".to_vec(),
        };
        let submission = submit_mess_rating(&h.ctx, &me, form, Some(photo)).await;
        assert_eq!(
            submission.toast.as_ref().map(|t| t.variant),
            Some(ToastVariant::Destructive)
        );

        let created = submission.result.unwrap();
        let doc = CollectionRef::mess_food_ratings().doc(&created.id);
        let stored: MessFoodRating = h.ctx.read_document(&me.caller(), &doc).await.unwrap().unwrap();
        assert!(stored
            .image_url
            .as_deref()
            .is_some_and(|url| url.starts_with("http://files.test/")));
    }

    #[tokio::test]
    async fn test_invalid_rating_has_inline_errors_only() {
        let h = harness(MockHealthAssistant::new()).await;
        let submission = submit_mess_rating(&h.ctx, &student("s1"), veg_lunch(9), None).await;
        assert!(matches!(submission.result, Err(PortalError::Validation(_))));
        assert!(submission.toast.is_none());
    }

    #[tokio::test]
    async fn test_denied_doctor_update_reports_once() {
        let h = harness(MockHealthAssistant::new()).await;
        let mut diagnostics = h.ctx.reporter.subscribe();
        let form = DoctorStatusForm {
            name: "Dr. Mehta".into(),
            specialty: "Pediatrics".into(),
            is_available: false,
        };

        let submission = update_doctor_status(&h.ctx, &student("s1"), form).await;
        assert!(matches!(
            submission.result,
            Err(PortalError::PermissionDenied { .. })
        ));
        let toast = submission.toast.unwrap();
        assert_eq!(
            toast.description,
            "You do not have permission to change the doctor status."
        );

        let event = diagnostics.recv().await.unwrap();
        assert_eq!(event.path, "campusInfo/hospital");
        assert_eq!(event.operation, Operation::Create);
        assert_eq!(
            event.request_resource_data.as_ref().map(|d| d["name"].clone()),
            Some(serde_json::json!("Dr. Mehta"))
        );
        assert!(diagnostics.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_admin_updates_doctor_status() {
        let h = harness(MockHealthAssistant::new()).await;
        h.ctx.store.grant_admin("admin").await.unwrap();
        let admin = student("admin");

        let submission = update_doctor_status(
            &h.ctx,
            &admin,
            DoctorStatusForm {
                name: "Dr. Mehta".into(),
                specialty: "Pediatrics".into(),
                is_available: true,
            },
        )
        .await;
        assert!(submission.is_ok());

        let status: DoctorStatus = h
            .ctx
            .read_document(&student("s1").caller(), &DocRef::hospital_status())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status.name, "Dr. Mehta");
    }

    #[tokio::test]
    async fn test_appointment_lifecycle() {
        let h = harness(MockHealthAssistant::new()).await;
        h.ctx.store.grant_admin("admin").await.unwrap();
        let me = student("s1");
        let admin = student("admin");
        let tomorrow = Utc::now().date_naive() + Duration::days(1);

        let booked = book_appointment(&h.ctx, &me, appointment_form(tomorrow)).await;
        assert_eq!(booked.toast.as_ref().unwrap().title, "Appointment Booked");
        let id = booked.result.unwrap().id;

        let done = update_appointment_status(
            &h.ctx,
            &admin,
            &id,
            StatusChangeForm {
                status: AppointmentStatus::Completed,
            },
        )
        .await;
        assert_eq!(done.result.unwrap(), AppointmentStatus::Completed);

        let doc = CollectionRef::appointments().doc(&id);
        let stored: Appointment = h.ctx.read_document(&me.caller(), &doc).await.unwrap().unwrap();
        assert_eq!(stored.status, AppointmentStatus::Completed);
        assert_eq!(stored.booked_by, "s1");

        let reopened = update_appointment_status(
            &h.ctx,
            &me,
            &id,
            StatusChangeForm {
                status: AppointmentStatus::Cancelled,
            },
        )
        .await;
        assert!(matches!(reopened.result, Err(PortalError::Validation(_))));
        assert!(reopened.toast.is_none());
    }

    #[tokio::test]
    async fn test_status_change_by_other_student_reports_update() {
        let h = harness(MockHealthAssistant::new()).await;
        let tomorrow = Utc::now().date_naive() + Duration::days(1);
        let booked = book_appointment(&h.ctx, &student("s1"), appointment_form(tomorrow)).await;
        let id = booked.result.unwrap().id;
        let mut diagnostics = h.ctx.reporter.subscribe();

        let submission = update_appointment_status(
            &h.ctx,
            &student("s2"),
            &id,
            StatusChangeForm {
                status: AppointmentStatus::Cancelled,
            },
        )
        .await;
        assert!(matches!(
            submission.result,
            Err(PortalError::PermissionDenied { .. })
        ));
        assert!(submission.toast.is_some());

        let event = diagnostics.recv().await.unwrap();
        assert_eq!(event.path, format!("appointments/{id}"));
        assert_eq!(event.operation, Operation::Update);
        assert_eq!(
            event.request_resource_data,
            Some(serde_json::json!({"status": "cancelled"}))
        );
        assert!(diagnostics.try_recv().is_err());

        let doc = CollectionRef::appointments().doc(&id);
        let stored: Appointment = h
            .ctx
            .read_document(&student("s1").caller(), &doc)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, AppointmentStatus::Scheduled);
    }

    #[tokio::test]
    async fn test_failed_profile_write_keeps_account_name() {
        let h = harness(MockHealthAssistant::new()).await;
        let session = h
            .ctx
            .auth
            .sign_up_email("kavya@campus.edu", "secret1", Some("Kavya"))
            .await
            .unwrap();
        sqlx::query(
            "CREATE TRIGGER block_profiles BEFORE INSERT ON documents \
             WHEN NEW.collection = 'userProfile' BEGIN SELECT RAISE(ABORT, 'blocked'); END",
        )
        .execute(h.ctx.store.pool())
        .await
        .unwrap();

        let form = ProfileForm {
            display_name: "Kavya R".into(),
            photo_url: None,
            enrollment_number: None,
            hostel: Some("Gargi".into()),
            department: None,
            year: Some(2),
        };
        let submission = update_profile(&h.ctx, &session.user, form).await;
        assert!(submission.result.is_err());
        assert!(submission.toast.is_some());

        let again = h
            .ctx
            .auth
            .sign_in_email("kavya@campus.edu", "secret1")
            .await
            .unwrap();
        assert_eq!(again.user.display_name.as_deref(), Some("Kavya"));
    }

    #[tokio::test]
    async fn test_past_appointment_date_rejected() {
        let h = harness(MockHealthAssistant::new()).await;
        let yesterday = Utc::now().date_naive() - Duration::days(1);
        let submission = book_appointment(&h.ctx, &student("s1"), appointment_form(yesterday)).await;
        match submission.result {
            Err(PortalError::Validation(fields)) => {
                assert!(fields.contains_key("appointment_date"))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_chat_falls_back_on_error() {
        let mut assistant = MockHealthAssistant::new();
        assistant
            .expect_first_aid_reply()
            .times(1)
            .returning(|_| Err(AssistantError::EmptyReply));
        let h = harness(assistant).await;

        let form = ChatForm {
            messages: vec![ChatMessage {
                role: ChatRole::User,
                content: "I burned my hand".into(),
            }],
        };
        let submission = first_aid_chat(&h.ctx, form).await;
        assert_eq!(submission.result.unwrap(), CHAT_FALLBACK_REPLY);
        assert!(submission.toast.is_none());
    }

    #[tokio::test]
    async fn test_meal_analysis_forwards_upstream_message() {
        let mut assistant = MockHealthAssistant::new();
        assistant.expect_estimate_nutrition().returning(|_| {
            Err(AssistantError::Status {
                status: 429,
                message: "Resource has been exhausted".into(),
            })
        });
        let h = harness(assistant).await;

        let submission = analyze_meal(
            &h.ctx,
            AnalyzeMealForm {
                photo_data_uri: "data:image/png;base64,iVBORw0KGgo=".into(),
            },
        )
        .await;
        assert_eq!(
            submission.toast.unwrap().description,
            "Resource has been exhausted"
        );
    }

    #[tokio::test]
    async fn test_health_analysis_requires_admin() {
        let mut assistant = MockHealthAssistant::new();
        assistant
            .expect_predict_health_risks()
            .withf(|input| input.mess_food_ratings.len() == 1)
            .times(1)
            .returning(|_| {
                Ok(vec![HealthRisk {
                    risk_type: "Foodborne illness".into(),
                    risk_level: "medium".into(),
                    affected_area: "Veg mess".into(),
                    description: "Low ratings".into(),
                    recommendations: vec![],
                }])
            });
        let h = harness(assistant).await;
        h.ctx.store.grant_admin("admin").await.unwrap();

        let rated = submit_mess_rating(&h.ctx, &student("s1"), veg_lunch(1), None).await;
        assert!(rated.is_ok());

        let denied = run_health_analysis(&h.ctx, &student("s1")).await;
        assert!(matches!(
            denied.result,
            Err(PortalError::PermissionDenied { .. })
        ));

        let risks = run_health_analysis(&h.ctx, &student("admin"))
            .await
            .result
            .unwrap();
        assert_eq!(risks[0].affected_area, "Veg mess");
    }
}
