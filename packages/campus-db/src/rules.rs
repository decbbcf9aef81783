//! Regras de acesso avaliadas pelo armazenamento
//!
//! Espelham as regras do banco gerenciado: o dono de um documento é
//! identificado por `studentId` (ou pelo `{uid}` do caminho) e administradores
//! são os usuários com documento em `roles_admin/{uid}`.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::path::{
    APPOINTMENTS, CAMPUS_INFO, EMERGENCY_REPORTS, HOSPITAL_FEEDBACKS, MESS_FOOD_RATINGS,
    NUTRITION_LOGS, ROLES_ADMIN, USER_PROFILE,
};
use crate::query::Query;

/// Identidade autenticada que executa a operação
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub uid: String,
}

impl Caller {
    pub fn new(uid: impl Into<String>) -> Self {
        Self { uid: uid.into() }
    }
}

/// Tipo de operação sobre o banco
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Get,
    List,
    Create,
    Update,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Get => write!(f, "get"),
            Operation::List => write!(f, "list"),
            Operation::Create => write!(f, "create"),
            Operation::Update => write!(f, "update"),
            Operation::Delete => write!(f, "delete"),
        }
    }
}

/// Tudo que uma regra pode inspecionar
#[derive(Debug, Clone, Copy)]
pub struct RuleContext<'a> {
    pub caller: Option<&'a Caller>,
    pub is_admin: bool,
    pub operation: Operation,
    /// Segmentos do caminho alvo (coleção para `list`, documento nos demais)
    pub segments: &'a [String],
    /// Documento atual, quando existe
    pub existing: Option<&'a Value>,
    /// Estado resultante da escrita (create/update)
    pub incoming: Option<&'a Value>,
    /// Consulta, para `list`
    pub query: Option<&'a Query>,
}

impl<'a> RuleContext<'a> {
    fn uid(&self) -> Option<&'a str> {
        self.caller.map(|c| c.uid.as_str())
    }

    fn field_is_caller(&self, value: Option<&Value>, field: &str) -> bool {
        match (self.uid(), value.and_then(|v| v.get(field)).and_then(Value::as_str)) {
            (Some(uid), Some(owner)) => uid == owner,
            _ => false,
        }
    }

    fn incoming_owned(&self) -> bool {
        self.field_is_caller(self.incoming, "studentId")
    }

    fn existing_owned(&self) -> bool {
        self.field_is_caller(self.existing, "studentId")
    }

    fn query_pinned_to_caller(&self) -> bool {
        match (self.uid(), self.query.and_then(|q| q.equality_on("studentId"))) {
            (Some(uid), Some(Value::String(pinned))) => uid == pinned,
            _ => false,
        }
    }

    fn owner_unchanged(&self) -> bool {
        let before = self.existing.and_then(|v| v.get("studentId"));
        let after = self.incoming.and_then(|v| v.get("studentId"));
        before == after
    }
}

/// Avalia as regras de acesso; `true` autoriza a operação
pub fn evaluate(ctx: &RuleContext<'_>) -> bool {
    let Some(uid) = ctx.uid() else {
        return false;
    };
    let segments: Vec<&str> = ctx.segments.iter().map(String::as_str).collect();
    let op = ctx.operation;

    match segments.as_slice() {
        [EMERGENCY_REPORTS, ..] | [HOSPITAL_FEEDBACKS, ..] => match op {
            Operation::Get | Operation::List => ctx.is_admin,
            Operation::Create => ctx.incoming_owned(),
            Operation::Update | Operation::Delete => false,
        },
        [MESS_FOOD_RATINGS, ..] => match op {
            Operation::Get | Operation::List => true,
            Operation::Create => ctx.incoming_owned(),
            Operation::Update | Operation::Delete => false,
        },
        [APPOINTMENTS, ..] => match op {
            Operation::Get => ctx.is_admin || ctx.existing_owned(),
            Operation::List => ctx.is_admin || ctx.query_pinned_to_caller(),
            Operation::Create => {
                ctx.incoming_owned()
                    && ctx
                        .incoming
                        .and_then(|v| v.get("status"))
                        .and_then(Value::as_str)
                        == Some("scheduled")
            }
            Operation::Update => {
                ctx.owner_unchanged() && (ctx.is_admin || ctx.existing_owned())
            }
            Operation::Delete => false,
        },
        [USER_PROFILE, owner, NUTRITION_LOGS, ..] => *owner == uid,
        [USER_PROFILE, owner] => match op {
            Operation::Get | Operation::Create | Operation::Update => *owner == uid,
            Operation::List | Operation::Delete => false,
        },
        [CAMPUS_INFO, ..] => match op {
            Operation::Get | Operation::List => true,
            Operation::Create | Operation::Update => ctx.is_admin,
            Operation::Delete => false,
        },
        [ROLES_ADMIN, target] => match op {
            Operation::Get => *target == uid || ctx.is_admin,
            _ => false,
        },
        [ROLES_ADMIN] => op == Operation::List && ctx.is_admin,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::{CollectionRef, DocRef};
    use serde_json::json;

    fn ctx<'a>(
        caller: Option<&'a Caller>,
        is_admin: bool,
        operation: Operation,
        segments: &'a [String],
    ) -> RuleContext<'a> {
        RuleContext {
            caller,
            is_admin,
            operation,
            segments,
            existing: None,
            incoming: None,
            query: None,
        }
    }

    #[test]
    fn test_anonymous_is_always_denied() {
        let path = CollectionRef::mess_food_ratings();
        assert!(!evaluate(&ctx(None, false, Operation::List, path.segments())));
    }

    #[test]
    fn test_create_requires_matching_owner() {
        let student = Caller::new("s1");
        let doc = CollectionRef::mess_food_ratings().doc("r1");
        let own = json!({"studentId": "s1"});
        let other = json!({"studentId": "s2"});

        let mut rule = ctx(Some(&student), false, Operation::Create, doc.segments());
        rule.incoming = Some(&own);
        assert!(evaluate(&rule));

        rule.incoming = Some(&other);
        assert!(!evaluate(&rule));
    }

    #[test]
    fn test_admin_only_reads() {
        let student = Caller::new("s1");
        let feedbacks = CollectionRef::hospital_feedbacks();
        assert!(!evaluate(&ctx(Some(&student), false, Operation::List, feedbacks.segments())));
        assert!(evaluate(&ctx(Some(&student), true, Operation::List, feedbacks.segments())));
    }

    #[test]
    fn test_appointment_list_pinned_to_owner() {
        let student = Caller::new("s1");
        let appointments = CollectionRef::appointments();
        let own = Query::new(appointments.clone()).where_eq("studentId", "s1");
        let foreign = Query::new(appointments.clone()).where_eq("studentId", "s2");

        let mut rule = ctx(Some(&student), false, Operation::List, appointments.segments());
        rule.query = Some(&own);
        assert!(evaluate(&rule));
        rule.query = Some(&foreign);
        assert!(!evaluate(&rule));
    }

    #[test]
    fn test_appointment_update_keeps_owner() {
        let student = Caller::new("s1");
        let doc = CollectionRef::appointments().doc("a1");
        let before = json!({"studentId": "s1", "status": "scheduled"});
        let cancelled = json!({"studentId": "s1", "status": "cancelled"});
        let stolen = json!({"studentId": "s2", "status": "scheduled"});

        let mut rule = ctx(Some(&student), false, Operation::Update, doc.segments());
        rule.existing = Some(&before);
        rule.incoming = Some(&cancelled);
        assert!(evaluate(&rule));

        rule.incoming = Some(&stolen);
        assert!(!evaluate(&rule));
    }

    #[test]
    fn test_profile_paths_are_private() {
        let student = Caller::new("s1");
        let own_profile = DocRef::user_profile("s1");
        let other_profile = DocRef::user_profile("s2");
        let own_logs = CollectionRef::nutrition_logs("s1");

        assert!(evaluate(&ctx(Some(&student), false, Operation::Update, own_profile.segments())));
        assert!(!evaluate(&ctx(Some(&student), true, Operation::Get, other_profile.segments())));
        assert!(evaluate(&ctx(Some(&student), false, Operation::List, own_logs.segments())));
    }

    #[test]
    fn test_doctor_status_is_admin_writable() {
        let student = Caller::new("s1");
        let status = DocRef::hospital_status();
        assert!(evaluate(&ctx(Some(&student), false, Operation::Get, status.segments())));
        assert!(!evaluate(&ctx(Some(&student), false, Operation::Update, status.segments())));
        assert!(evaluate(&ctx(Some(&student), true, Operation::Update, status.segments())));
    }
}
