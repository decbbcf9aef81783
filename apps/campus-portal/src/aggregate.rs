//! Agregações puras sobre conjuntos de registros
//!
//! Nenhuma função aqui falha: entrada vazia produz 0 ou uma série vazia.

use std::collections::BTreeMap;

use campus_db::models::{Appointment, DailyNutritionLog, HospitalFeedback, MessFoodRating};
use chrono::NaiveDate;
use serde::Serialize;

/// Média aritmética; 0.0 para entrada vazia
pub fn mean(values: impl IntoIterator<Item = f64>) -> f64 {
    let (total, count) = values
        .into_iter()
        .fold((0.0, 0usize), |(total, count), v| (total + v, count + 1));
    if count == 0 {
        0.0
    } else {
        total / count as f64
    }
}

pub fn average_rating<'a>(ratings: impl IntoIterator<Item = &'a MessFoodRating>) -> f64 {
    mean(ratings.into_iter().map(|r| f64::from(r.food_quality_rating)))
}

/// Converte uma média de 1 a 5 para a escala 0-100
pub fn hygiene_score(average: f64) -> u32 {
    if !average.is_finite() || average <= 0.0 {
        return 0;
    }
    ((average / 5.0) * 100.0).round() as u32
}

/// Rótulo exibido junto da pontuação
pub fn score_label(score: u32) -> &'static str {
    match score {
        0 => "No Data",
        80.. => "Excellent",
        60..=79 => "Good",
        40..=59 => "Fair",
        _ => "Poor",
    }
}

/// Média das notas registradas no dia (UTC)
pub fn daily_rating<'a>(
    ratings: impl IntoIterator<Item = &'a MessFoodRating>,
    day: NaiveDate,
) -> f64 {
    average_rating(
        ratings
            .into_iter()
            .filter(|r| r.timestamp.date_naive() == day),
    )
}

/// Médias por refeitório num dia
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HygienePoint {
    pub day: NaiveDate,
    /// Refeitórios sem avaliações no dia ficam de fora
    #[serde(flatten)]
    pub messes: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseTimePoint {
    pub day: NaiveDate,
    /// Espera média em minutos
    pub response_time: u32,
}

#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    total: f64,
    count: u32,
}

impl Tally {
    fn add(&mut self, value: f64) {
        self.total += value;
        self.count += 1;
    }

    fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total / f64::from(self.count)
        }
    }
}

fn round_to_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Série diária de médias por refeitório, em ordem crescente de dia
pub fn mess_hygiene_series<'a>(
    ratings: impl IntoIterator<Item = &'a MessFoodRating>,
) -> Vec<HygienePoint> {
    let mut days: BTreeMap<NaiveDate, BTreeMap<&str, Tally>> = BTreeMap::new();
    for rating in ratings {
        days.entry(rating.timestamp.date_naive())
            .or_default()
            .entry(rating.mess_name.as_str())
            .or_default()
            .add(f64::from(rating.food_quality_rating));
    }

    days.into_iter()
        .map(|(day, messes)| HygienePoint {
            day,
            messes: messes
                .into_iter()
                .map(|(mess, tally)| (mess.to_string(), round_to_tenth(tally.mean())))
                .collect(),
        })
        .collect()
}

/// Série diária da espera média no hospital
pub fn response_time_series<'a>(
    feedbacks: impl IntoIterator<Item = &'a HospitalFeedback>,
) -> Vec<ResponseTimePoint> {
    let mut days: BTreeMap<NaiveDate, Tally> = BTreeMap::new();
    for feedback in feedbacks {
        days.entry(feedback.timestamp.date_naive())
            .or_default()
            .add(f64::from(feedback.waiting_time));
    }

    days.into_iter()
        .map(|(day, tally)| ResponseTimePoint {
            day,
            response_time: tally.mean().round() as u32,
        })
        .collect()
}

/// Espera média em minutos, truncada
pub fn average_wait_time<'a>(feedbacks: impl IntoIterator<Item = &'a HospitalFeedback>) -> u32 {
    mean(feedbacks.into_iter().map(|f| f64::from(f.waiting_time))).floor() as u32
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NutritionTotals {
    pub calories: f64,
    pub protein_grams: f64,
    pub carbs_grams: f64,
    pub fat_grams: f64,
}

pub fn nutrition_totals<'a>(
    logs: impl IntoIterator<Item = &'a DailyNutritionLog>,
) -> NutritionTotals {
    logs.into_iter()
        .fold(NutritionTotals::default(), |acc, log| NutritionTotals {
            calories: acc.calories + log.calories,
            protein_grams: acc.protein_grams + log.protein_grams,
            carbs_grams: acc.carbs_grams + log.carbs_grams,
            fat_grams: acc.fat_grams + log.fat_grams,
        })
}

/// Até `n` avaliações com foto, na ordem recebida
pub fn recent_photos<'a, I>(ratings: I, n: usize) -> Vec<&'a MessFoodRating>
where
    I: IntoIterator<Item = &'a MessFoodRating>,
{
    ratings
        .into_iter()
        .filter(|r| r.image_url.is_some())
        .take(n)
        .collect()
}

/// Ordena por data da consulta, da mais próxima para a mais distante
pub fn sort_appointments<T, F>(appointments: &mut [T], appointment: F)
where
    F: Fn(&T) -> &Appointment,
{
    appointments.sort_by(|a, b| {
        appointment(a)
            .appointment_date
            .cmp(&appointment(b).appointment_date)
    });
}
