//! Formulários recebidos pela API, validados antes de qualquer escrita

use campus_db::models::{
    meals_for, AppointmentStatus, CaseType, DoctorAvailability, EmergencyType, SickReport,
    APPOINTMENT_SLOTS, MESSES,
};
use chrono::NaiveDate;
use serde::Deserialize;
use validator::{Validate, ValidationError};

use crate::assistant::ChatMessage;
use crate::error::PortalError;

/// Roda as validações derivadas e converte para erro por campo
pub fn check<F: Validate>(form: &F) -> Result<(), PortalError> {
    form.validate().map_err(PortalError::from)
}

fn invalid(code: &'static str, message: &'static str) -> ValidationError {
    let mut error = ValidationError::new(code);
    error.message = Some(message.into());
    error
}

fn known_mess(value: &str) -> Result<(), ValidationError> {
    if MESSES.contains(&value) {
        Ok(())
    } else {
        Err(invalid("unknown_mess", "Please select a mess."))
    }
}

fn known_slot(value: &str) -> Result<(), ValidationError> {
    if APPOINTMENT_SLOTS.contains(&value) {
        Ok(())
    } else {
        Err(invalid("unknown_slot", "Please select a time slot."))
    }
}

fn digits_only(value: &str) -> Result<(), ValidationError> {
    if !value.is_empty() && value.chars().all(|c| c.is_ascii_digit()) {
        Ok(())
    } else {
        Err(invalid("not_digits", "The code must contain only digits."))
    }
}

/// Aceita 10 dígitos ou o número completo com +91
fn phone_number(value: &str) -> Result<(), ValidationError> {
    let digits = value.strip_prefix("+91").unwrap_or(value);
    if digits.len() == 10 && digits.chars().all(|c| c.is_ascii_digit()) {
        Ok(())
    } else {
        Err(invalid(
            "phone",
            "Please enter a valid 10-digit phone number.",
        ))
    }
}

fn image_data_uri(value: &str) -> Result<(), ValidationError> {
    let valid = value
        .strip_prefix("data:image/")
        .and_then(|rest| rest.split_once(";base64,"))
        .map(|(_, payload)| !payload.is_empty())
        .unwrap_or(false);
    if valid {
        Ok(())
    } else {
        Err(invalid(
            "data_uri",
            "The photo must be a base64 image data URI.",
        ))
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct MessRatingForm {
    #[validate(custom = "known_mess")]
    pub mess_name: String,
    #[validate(length(min = 1, message = "Please select a meal."))]
    pub meal_type: String,
    #[validate(range(min = 1, max = 5, message = "Rating must be between 1 and 5."))]
    pub food_quality_rating: u8,
    pub sick_after_meal_report: SickReport,
    #[validate(url)]
    pub image_url: Option<String>,
}

impl MessRatingForm {
    /// Validação derivada mais a refeição servida pelo refeitório escolhido
    pub fn check(&self) -> Result<(), PortalError> {
        check(self)?;
        if meals_for(&self.mess_name).contains(&self.meal_type.as_str()) {
            Ok(())
        } else {
            Err(PortalError::invalid_field(
                "meal_type",
                "This meal is not served at the selected mess.",
            ))
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct HospitalFeedbackForm {
    pub case_type: CaseType,
    /// Minutos de espera
    #[validate(range(max = 1440, message = "Waiting time is out of range."))]
    pub waiting_time: u32,
    pub doctor_availability: DoctorAvailability,
    #[validate(length(
        min = 10,
        max = 500,
        message = "Feedback must be at least 10 characters."
    ))]
    pub feedback: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentForm {
    #[validate(length(min = 2, message = "Name is required."))]
    pub student_name: String,
    #[validate(length(min = 5, message = "Enrollment number is required."))]
    pub enrollment_number: String,
    pub appointment_date: NaiveDate,
    #[validate(custom = "known_slot")]
    pub appointment_time: String,
    #[validate(length(
        min = 10,
        max = 200,
        message = "Please provide a brief reason for your visit."
    ))]
    pub reason: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusChangeForm {
    pub status: AppointmentStatus,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct DoctorStatusForm {
    #[validate(length(min = 2, message = "Doctor's name is required."))]
    pub name: String,
    #[validate(length(min = 2, message = "Specialty is required."))]
    pub specialty: String,
    pub is_available: bool,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ProfileForm {
    #[validate(length(min = 2, message = "Display name must be at least 2 characters."))]
    pub display_name: String,
    #[serde(rename = "photoURL")]
    #[validate(url)]
    pub photo_url: Option<String>,
    pub enrollment_number: Option<String>,
    pub hostel: Option<String>,
    pub department: Option<String>,
    #[validate(range(min = 1, max = 6))]
    pub year: Option<u8>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SosForm {
    pub emergency_type: EmergencyType,
    #[validate(length(min = 2, message = "Name is required."))]
    pub student_name: String,
    #[validate(length(min = 1, message = "Enrollment number is required."))]
    pub enrollment_number: String,
    #[validate(length(min = 2, message = "Location is required."))]
    pub location: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NutritionLogForm {
    #[validate(range(min = 0.0))]
    pub calories: f64,
    #[validate(range(min = 0.0))]
    pub protein_grams: f64,
    #[validate(range(min = 0.0))]
    pub carbs_grams: f64,
    #[validate(range(min = 0.0))]
    pub fat_grams: f64,
    #[validate(url)]
    pub photo_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeMealForm {
    #[validate(custom = "image_data_uri")]
    pub photo_data_uri: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ChatForm {
    #[validate(length(min = 1, message = "Say something first."))]
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SignupForm {
    #[validate(email(message = "Invalid email address."))]
    pub email: String,
    #[validate(length(min = 6, message = "Password must be at least 6 characters."))]
    pub password: String,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct LoginForm {
    #[validate(email(message = "Invalid email address."))]
    pub email: String,
    #[validate(length(min = 6, message = "Password must be at least 6 characters."))]
    pub password: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PhoneStartForm {
    #[validate(custom = "phone_number")]
    pub phone_number: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PhoneVerifyForm {
    #[validate(length(min = 1))]
    pub verification_id: String,
    #[validate(
        length(equal = 6, message = "The code has 6 digits."),
        custom = "digits_only"
    )]
    pub code: String,
}

/// Asserção de um provedor externo já verificada pelo gateway
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct FederatedForm {
    #[validate(length(min = 1))]
    pub provider: String,
    #[validate(length(min = 1))]
    pub subject: String,
    #[validate(email)]
    pub email: Option<String>,
    pub display_name: Option<String>,
    #[serde(rename = "photoURL")]
    #[validate(url)]
    pub photo_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rating_form(mess: &str, meal: &str, rating: u8) -> MessRatingForm {
        MessRatingForm {
            mess_name: mess.into(),
            meal_type: meal.into(),
            food_quality_rating: rating,
            sick_after_meal_report: SickReport::No,
            image_url: None,
        }
    }

    fn fields(err: PortalError) -> Vec<String> {
        match err {
            PortalError::Validation(fields) => fields.into_keys().collect(),
            other => panic!("esperava erro de validação, veio {other:?}"),
        }
    }

    #[test]
    fn test_mess_rating_form_rules() {
        assert!(rating_form("Veg mess", "Lunch", 5).check().is_ok());
        assert!(rating_form("Gargi hostel mess", "Snacks", 3).check().is_ok());

        let err = rating_form("Veg mess", "Snacks", 3).check().unwrap_err();
        assert_eq!(fields(err), vec!["meal_type"]);

        let err = rating_form("Nowhere mess", "Lunch", 6).check().unwrap_err();
        assert_eq!(fields(err), vec!["food_quality_rating", "mess_name"]);
    }

    #[test]
    fn test_appointment_form_messages() {
        let form = AppointmentForm {
            student_name: "A".into(),
            enrollment_number: "E2024001".into(),
            appointment_date: NaiveDate::from_ymd_opt(2030, 1, 2).unwrap(),
            appointment_time: "01:00 PM".into(),
            reason: "fever and cold".into(),
        };
        match check(&form).unwrap_err() {
            PortalError::Validation(fields) => {
                assert_eq!(fields["student_name"], vec!["Name is required."]);
                assert_eq!(fields["appointment_time"], vec!["Please select a time slot."]);
                assert!(!fields.contains_key("reason"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_known_slot_boundaries() {
        for slot in ["09:00 AM", "11:30 AM", "02:00 PM", "04:30 PM"] {
            assert!(known_slot(slot).is_ok(), "{slot}");
        }
        for slot in ["08:30 AM", "12:00 PM", "12:30 PM", "01:30 PM", "05:00 PM", "9:00 AM"] {
            assert!(known_slot(slot).is_err(), "{slot}");
        }
    }

    #[test]
    fn test_phone_and_code_forms() {
        let ok = PhoneStartForm {
            phone_number: "9876543210".into(),
        };
        assert!(check(&ok).is_ok());
        let prefixed = PhoneStartForm {
            phone_number: "+919876543210".into(),
        };
        assert!(check(&prefixed).is_ok());
        let short = PhoneStartForm {
            phone_number: "12345".into(),
        };
        assert!(check(&short).is_err());

        let letters = PhoneVerifyForm {
            verification_id: "v".into(),
            code: "12a456".into(),
        };
        assert!(check(&letters).is_err());
    }

    #[test]
    fn test_data_uri_form() {
        let good = AnalyzeMealForm {
            photo_data_uri: "data:image/jpeg;base64,/9j/4AAQ".into(),
        };
        assert!(check(&good).is_ok());
        let bad = AnalyzeMealForm {
            photo_data_uri: "https://example.com/meal.jpg".into(),
        };
        assert!(check(&bad).is_err());
    }

    #[test]
    fn test_camel_case_payloads() {
        let form: HospitalFeedbackForm = serde_json::from_value(serde_json::json!({
            "caseType": "emergency",
            "waitingTime": 25,
            "doctorAvailability": "available",
            "feedback": "Quick and kind service"
        }))
        .unwrap();
        assert_eq!(form.case_type, CaseType::Emergency);
        assert!(check(&form).is_ok());
    }
}
