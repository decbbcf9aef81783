//! Modelos de dados compartilhados entre aplicações
//!
//! Este módulo define os documentos gravados pelo portal do campus. Os campos
//! são serializados em camelCase e os timestamps em RFC 3339.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Refeitórios do campus
pub const MESSES: &[&str] = &[
    "Gargi hostel mess",
    "Southern mess",
    "Northern mess",
    "Veg mess",
    "Rnt mess",
    "Eastern mess",
];

/// Refeições servidas; lanche só no refeitório Gargi
pub const MEALS: &[&str] = &["Breakfast", "Lunch", "Dinner", "Snacks"];

const SNACKS_MESS: &str = "Gargi hostel mess";

/// Horários de consulta no hospital do campus; sem atendimento entre 12h e 14h
pub const APPOINTMENT_SLOTS: &[&str] = &[
    "09:00 AM", "09:30 AM", "10:00 AM", "10:30 AM", "11:00 AM", "11:30 AM", "02:00 PM",
    "02:30 PM", "03:00 PM", "03:30 PM", "04:00 PM", "04:30 PM",
];

/// Refeições disponíveis num refeitório
pub fn meals_for(mess: &str) -> Vec<&'static str> {
    MEALS
        .iter()
        .copied()
        .filter(|meal| *meal != "Snacks" || mess == SNACKS_MESS)
        .collect()
}

/// Tipos de emergência do SOS
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmergencyType {
    Medical,
    Safety,
    Fire,
    #[serde(rename = "Hostel Issue")]
    HostelIssue,
}

impl std::fmt::Display for EmergencyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmergencyType::Medical => write!(f, "Medical"),
            EmergencyType::Safety => write!(f, "Safety"),
            EmergencyType::Fire => write!(f, "Fire"),
            EmergencyType::HostelIssue => write!(f, "Hostel Issue"),
        }
    }
}

/// Relato de emergência (somente inclusão)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyReport {
    pub student_id: String,
    pub student_name: String,
    pub enrollment_number: String,
    pub location: String,
    pub emergency_type: EmergencyType,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DoctorAvailability {
    Available,
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseType {
    Emergency,
    Normal,
}

/// Avaliação do atendimento no hospital (somente inclusão)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HospitalFeedback {
    pub student_id: String,
    /// Espera em minutos
    pub waiting_time: u32,
    pub doctor_availability: DoctorAvailability,
    pub post_visit_feedback: String,
    pub emergency_vs_normal: CaseType,
    pub timestamp: DateTime<Utc>,
}

/// Status possíveis de um agendamento
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppointmentStatus {
    /// Estado inicial
    Scheduled,
    /// Consulta realizada
    Completed,
    /// Cancelado pelo aluno ou pela administração
    Cancelled,
}

impl AppointmentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, AppointmentStatus::Completed | AppointmentStatus::Cancelled)
    }

    /// Só `scheduled` pode mudar, e apenas para um estado terminal
    pub fn can_transition_to(self, next: AppointmentStatus) -> bool {
        self == AppointmentStatus::Scheduled && next.is_terminal()
    }
}

impl std::fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppointmentStatus::Scheduled => write!(f, "scheduled"),
            AppointmentStatus::Completed => write!(f, "completed"),
            AppointmentStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Representa uma consulta agendada no hospital do campus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Appointment {
    pub student_id: String,
    pub student_name: String,
    pub enrollment_number: String,
    pub appointment_date: DateTime<Utc>,
    /// Um dos [`APPOINTMENT_SLOTS`]
    pub appointment_time: String,
    pub reason: String,
    pub status: AppointmentStatus,
    /// Conta que criou o agendamento
    pub booked_by: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SickReport {
    Yes,
    No,
}

/// Avaliação de uma refeição (somente inclusão)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessFoodRating {
    pub student_id: String,
    pub mess_name: String,
    pub meal_type: String,
    /// Nota de 1 a 5
    pub food_quality_rating: u8,
    pub sick_after_meal_report: SickReport,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Perfil do aluno em `userProfile/{uid}`, gravado com merge pelo dono
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub uid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(rename = "photoURL", default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enrollment_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Médico de plantão (`campusInfo/hospital`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DoctorStatus {
    pub name: String,
    pub specialty: String,
    pub is_available: bool,
}

impl Default for DoctorStatus {
    /// Valores exibidos enquanto o documento não existe
    fn default() -> Self {
        Self {
            name: "Dr. A. K. Singh".to_string(),
            specialty: "General Physician".to_string(),
            is_available: true,
        }
    }
}

/// Registro de refeição em `userProfile/{uid}/nutritionLogs`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyNutritionLog {
    pub calories: f64,
    pub protein_grams: f64,
    pub carbs_grams: f64,
    pub fat_grams: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    pub timestamp: DateTime<Utc>,
}
