//! Consultas sobre coleções de documentos
//!
//! Suporta filtros de igualdade, intervalo e pertinência, ordenação e limite.
//! Timestamps RFC 3339 são comparados como instantes, não como texto.

use std::cmp::Ordering;

use chrono::DateTime;
use serde::Serialize;
use serde_json::Value;

use crate::path::CollectionRef;
use crate::store::Document;

/// Operador de um filtro
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
    /// O valor do filtro é uma lista; casa se o campo for igual a algum item
    In,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

/// Consulta sobre uma coleção
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: CollectionRef,
    pub filters: Vec<Filter>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<usize>,
}

fn to_value<V: Serialize>(value: V) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

impl Query {
    pub fn new(collection: CollectionRef) -> Self {
        Self {
            collection,
            filters: Vec::new(),
            order_by: Vec::new(),
            limit: None,
        }
    }

    pub fn filter<V: Serialize>(mut self, field: &str, op: FilterOp, value: V) -> Self {
        self.filters.push(Filter {
            field: field.to_string(),
            op,
            value: to_value(value),
        });
        self
    }

    pub fn where_eq<V: Serialize>(self, field: &str, value: V) -> Self {
        self.filter(field, FilterOp::Eq, value)
    }

    pub fn where_in<V: Serialize>(self, field: &str, values: Vec<V>) -> Self {
        self.filter(field, FilterOp::In, values)
    }

    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.order_by.push(OrderBy {
            field: field.to_string(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Valor de um filtro de igualdade sobre `field`, se houver
    pub fn equality_on(&self, field: &str) -> Option<&Value> {
        self.filters
            .iter()
            .find(|f| f.op == FilterOp::Eq && f.field == field)
            .map(|f| &f.value)
    }

    /// Verifica se os dados de um documento satisfazem todos os filtros
    pub fn matches(&self, data: &Value) -> bool {
        self.filters.iter().all(|filter| filter.matches(data))
    }

    /// Aplica filtros, ordenação e limite sobre os documentos de uma coleção
    pub fn apply(&self, documents: Vec<Document>) -> Vec<Document> {
        let mut selected: Vec<Document> = documents
            .into_iter()
            .filter(|doc| self.matches(&doc.data))
            // Documentos sem o campo de ordenação ficam fora do resultado
            .filter(|doc| {
                self.order_by
                    .iter()
                    .all(|o| lookup(&doc.data, &o.field).is_some())
            })
            .collect();

        selected.sort_by(|a, b| {
            for order in &self.order_by {
                let left = lookup(&a.data, &order.field);
                let right = lookup(&b.data, &order.field);
                let ordering = match (left, right) {
                    (Some(l), Some(r)) => compare_values(l, r).unwrap_or(Ordering::Equal),
                    _ => Ordering::Equal,
                };
                let ordering = match order.direction {
                    Direction::Asc => ordering,
                    Direction::Desc => ordering.reverse(),
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            a.id.cmp(&b.id)
        });

        if let Some(limit) = self.limit {
            selected.truncate(limit);
        }
        selected
    }
}

impl Filter {
    pub fn matches(&self, data: &Value) -> bool {
        let Some(field) = lookup(data, &self.field) else {
            return false;
        };
        match self.op {
            FilterOp::Eq => values_equal(field, &self.value),
            FilterOp::In => match &self.value {
                Value::Array(options) => options.iter().any(|o| values_equal(field, o)),
                _ => false,
            },
            FilterOp::Lt => compare_values(field, &self.value) == Some(Ordering::Less),
            FilterOp::Le => matches!(
                compare_values(field, &self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            FilterOp::Gt => compare_values(field, &self.value) == Some(Ordering::Greater),
            FilterOp::Ge => matches!(
                compare_values(field, &self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
        }
    }
}

/// Busca um campo, aceitando caminhos com ponto (`a.b.c`)
pub fn lookup<'a>(data: &'a Value, field: &str) -> Option<&'a Value> {
    field
        .split('.')
        .try_fold(data, |current, key| current.as_object()?.get(key))
        .filter(|v| !v.is_null())
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match compare_values(a, b) {
        Some(ordering) => ordering == Ordering::Equal,
        None => a == b,
    }
}

/// Compara dois valores do mesmo tipo; tipos diferentes não são comparáveis
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => {
            match (DateTime::parse_from_rfc3339(x), DateTime::parse_from_rfc3339(y)) {
                (Ok(dx), Ok(dy)) => Some(dx.cmp(&dy)),
                _ => Some(x.cmp(y)),
            }
        }
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn doc(id: &str, data: Value) -> Document {
        Document {
            id: id.to_string(),
            path: format!("messFoodRatings/{}", id),
            data,
        }
    }

    #[test]
    fn test_equality_and_membership() {
        let query = Query::new(CollectionRef::mess_food_ratings())
            .where_eq("messName", "Veg mess")
            .where_in("mealType", vec!["Lunch", "Dinner"]);

        assert!(query.matches(&json!({"messName": "Veg mess", "mealType": "Lunch"})));
        assert!(!query.matches(&json!({"messName": "Veg mess", "mealType": "Breakfast"})));
        assert!(!query.matches(&json!({"messName": "Southern mess", "mealType": "Lunch"})));
        assert!(!query.matches(&json!({"mealType": "Lunch"})));
    }

    #[test]
    fn test_timestamp_range_compares_instants() {
        let start = Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 7, 2, 0, 0, 0).unwrap();
        let query = Query::new(CollectionRef::mess_food_ratings())
            .filter("timestamp", FilterOp::Ge, start)
            .filter("timestamp", FilterOp::Lt, end);

        // Frações de segundo mudam o texto mas não a ordem temporal
        assert!(query.matches(&json!({"timestamp": "2024-07-01T10:00:00.5Z"})));
        assert!(query.matches(&json!({"timestamp": "2024-07-01T05:30:00+05:30"})));
        assert!(!query.matches(&json!({"timestamp": "2024-07-02T00:00:00Z"})));
        assert!(!query.matches(&json!({"timestamp": "2024-06-30T23:59:59.999Z"})));
    }

    #[test]
    fn test_order_and_limit() {
        let docs = vec![
            doc("a", json!({"waitingTime": 30})),
            doc("b", json!({"waitingTime": 10})),
            doc("c", json!({"other": true})),
            doc("d", json!({"waitingTime": 20})),
        ];
        let query = Query::new(CollectionRef::hospital_feedbacks())
            .order_by("waitingTime", Direction::Desc)
            .limit(2);

        let ids: Vec<String> = query.apply(docs).into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["a".to_string(), "d".to_string()]);
    }

    #[test]
    fn test_nested_lookup() {
        let data = json!({"a": {"b": 3}, "n": null});
        assert_eq!(lookup(&data, "a.b"), Some(&json!(3)));
        assert_eq!(lookup(&data, "a.c"), None);
        assert_eq!(lookup(&data, "n"), None);
    }
}
