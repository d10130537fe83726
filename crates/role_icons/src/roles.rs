//! Role document parsing and identity → role resolution.
//!
//! The remote document looks like
//!
//! ```json
//! { "roles": { "vip": { "priority": 2, "users": ["A"] },
//!              "member": { "priority": 1, "users": ["A", "B"] } } }
//! ```
//!
//! Role order matters: exact priority ties go to the role listed first, so the
//! document is read with `serde_json`'s `preserve_order` feature and kept in an
//! [`IndexMap`].

use std::collections::HashMap;

use indexmap::{IndexMap, IndexSet};
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::DocumentError;

const LOG_ROLES: &str = "role_icons::roles";

/// One role entry of the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleDefinition {
    pub name: String,
    pub priority: i64,
    pub members: IndexSet<String>,
}

impl RoleDefinition {
    pub fn new<I, S>(name: impl Into<String>, priority: i64, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            priority,
            members: members.into_iter().map(Into::into).collect(),
        }
    }
}

/// Why a role entry was left out of the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotAnObject,
    MissingUsers,
    InvalidPriority,
}

/// A parsed document: the well-formed roles in document order plus the skipped ones.
#[derive(Debug, Clone, Default)]
pub struct RoleDocument {
    pub roles: Vec<RoleDefinition>,
    pub skipped: Vec<(String, SkipReason)>,
}

impl RoleDocument {
    /// Parses the raw document text.
    ///
    /// Only a broken document as a whole is an error. Individual malformed roles
    /// are recorded in [`RoleDocument::skipped`] and logged.
    pub fn parse(text: &str) -> Result<Self, DocumentError> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, DocumentError> {
        let Value::Object(mut root) = value else {
            return Err(DocumentError::NotAnObject);
        };
        let Some(Value::Object(roles)) = root.remove("roles") else {
            return Err(DocumentError::MissingRoles);
        };

        let mut document = RoleDocument::default();
        for (name, entry) in roles {
            match parse_role(&name, entry) {
                Ok(role) => document.roles.push(role),
                Err(reason) => {
                    warn!(target: LOG_ROLES, "Skipping role '{}': {:?}", name, reason);
                    document.skipped.push((name, reason));
                }
            }
        }
        Ok(document)
    }
}

fn parse_role(name: &str, entry: Value) -> Result<RoleDefinition, SkipReason> {
    let Value::Object(mut fields) = entry else {
        return Err(SkipReason::NotAnObject);
    };
    let priority = parse_priority(&fields)?;
    let Some(Value::Array(users)) = fields.remove("users") else {
        return Err(SkipReason::MissingUsers);
    };

    let members = users
        .into_iter()
        .filter_map(|user| match user {
            Value::String(identity) => Some(identity),
            other => {
                warn!(
                    target: LOG_ROLES,
                    "Ignoring non-string member {} in role '{}'", other, name
                );
                None
            }
        })
        .collect();

    Ok(RoleDefinition {
        name: name.to_owned(),
        priority,
        members,
    })
}

/// Missing priority counts as 0; fractional priorities are truncated.
fn parse_priority(fields: &Map<String, Value>) -> Result<i64, SkipReason> {
    match fields.get("priority") {
        None => Ok(0),
        Some(Value::Number(number)) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|f| f as i64))
            .ok_or(SkipReason::InvalidPriority),
        Some(_) => Err(SkipReason::InvalidPriority),
    }
}

/// Role assigned to a single identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub role: String,
    pub priority: i64,
}

/// Identity → role mapping for one document revision.
///
/// Built once per refresh by [`resolve`] and replaced as a whole; it is never
/// patched in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleTable {
    assignments: HashMap<String, Assignment>,
    roles: IndexMap<String, i64>,
}

impl RoleTable {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_document(document: &RoleDocument) -> Self {
        resolve(&document.roles)
    }

    /// The role name shown for `identity`, if any.
    pub fn role_for(&self, identity: &str) -> Option<&str> {
        self.assignments.get(identity).map(|a| a.role.as_str())
    }

    pub fn assignment(&self, identity: &str) -> Option<&Assignment> {
        self.assignments.get(identity)
    }

    /// Number of identities holding a role.
    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    /// Number of well-formed roles the table was built from.
    pub fn role_count(&self) -> usize {
        self.roles.len()
    }

    /// Role names with their priority, in document order.
    pub fn roles(&self) -> impl Iterator<Item = (&str, i64)> {
        self.roles.iter().map(|(name, priority)| (name.as_str(), *priority))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Assignment)> {
        self.assignments.iter().map(|(id, a)| (id.as_str(), a))
    }
}

/// Resolves every member to the highest-priority role listing it.
///
/// Roles are scanned once in the given order; a later role only takes over an
/// identity when its priority is strictly greater, so the first role wins ties.
pub fn resolve(roles: &[RoleDefinition]) -> RoleTable {
    let mut table = RoleTable::empty();

    for role in roles {
        table.roles.insert(role.name.clone(), role.priority);

        for identity in &role.members {
            let replace = table
                .assignments
                .get(identity)
                .map_or(true, |current| role.priority > current.priority);
            if replace {
                table.assignments.insert(
                    identity.clone(),
                    Assignment {
                        role: role.name.clone(),
                        priority: role.priority,
                    },
                );
            }
        }
    }

    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn higher_priority_role_wins_over_document_order() {
        let doc = RoleDocument::parse(
            r#"{"roles": {
                "vip": {"priority": 2, "users": ["A"]},
                "member": {"priority": 1, "users": ["A", "B"]}
            }}"#,
        )
        .unwrap();
        let table = RoleTable::from_document(&doc);

        assert_eq!(table.role_for("A"), Some("vip"));
        assert_eq!(table.role_for("B"), Some("member"));
        assert_eq!(table.role_for("C"), None);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn later_higher_priority_role_overrides() {
        let table = resolve(&[
            RoleDefinition::new("member", 1, ["A"]),
            RoleDefinition::new("admin", 5, ["A"]),
        ]);
        assert_eq!(table.role_for("A"), Some("admin"));
        assert_eq!(table.assignment("A").unwrap().priority, 5);
    }

    #[test]
    fn equal_priority_keeps_first_role_in_document_order() {
        let doc = RoleDocument::parse(
            r#"{"roles": {
                "zeta": {"priority": 3, "users": ["A"]},
                "alpha": {"priority": 3, "users": ["A"]}
            }}"#,
        )
        .unwrap();
        let table = RoleTable::from_document(&doc);
        assert_eq!(table.role_for("A"), Some("zeta"));
        assert_eq!(
            table.roles().map(|(name, _)| name).collect::<Vec<_>>(),
            ["zeta", "alpha"]
        );
    }

    #[test]
    fn malformed_roles_are_skipped() {
        let doc = RoleDocument::parse(
            r#"{"roles": {
                "broken": "nope",
                "no_users": {"priority": 4},
                "bad_priority": {"priority": {"level": 9}, "users": ["A"]},
                "ok": {"priority": 1, "users": ["A", 42, "B"]}
            }}"#,
        )
        .unwrap();

        assert_eq!(doc.roles.len(), 1);
        assert_eq!(
            doc.skipped,
            vec![
                ("broken".to_owned(), SkipReason::NotAnObject),
                ("no_users".to_owned(), SkipReason::MissingUsers),
                ("bad_priority".to_owned(), SkipReason::InvalidPriority),
            ]
        );
        let table = RoleTable::from_document(&doc);
        assert_eq!(table.role_for("A"), Some("ok"));
        assert_eq!(table.role_for("B"), Some("ok"));
        assert_eq!(table.role_count(), 1);
    }

    #[test]
    fn missing_priority_defaults_to_zero_and_fractions_truncate() {
        let doc = RoleDocument::parse(
            r#"{"roles": {
                "guest": {"users": ["A"]},
                "staff": {"priority": 1.9, "users": ["B"]}
            }}"#,
        )
        .unwrap();
        assert_eq!(doc.roles[0].priority, 0);
        assert_eq!(doc.roles[1].priority, 1);
    }

    #[test]
    fn negative_priority_still_assigns_unclaimed_identities() {
        let table = resolve(&[RoleDefinition::new("muted", -3, ["A"])]);
        assert_eq!(table.role_for("A"), Some("muted"));
    }

    #[test]
    fn broken_documents_are_errors() {
        assert!(matches!(
            RoleDocument::parse("{not json"),
            Err(DocumentError::Json(_))
        ));
        assert!(matches!(
            RoleDocument::parse("[1, 2]"),
            Err(DocumentError::NotAnObject)
        ));
        assert!(matches!(
            RoleDocument::parse(r#"{"groups": {}}"#),
            Err(DocumentError::MissingRoles)
        ));
        assert!(matches!(
            RoleDocument::parse(r#"{"roles": []}"#),
            Err(DocumentError::MissingRoles)
        ));
    }

    #[test]
    fn every_identity_gets_the_best_listed_role() {
        let roles = vec![
            RoleDefinition::new("a", 1, ["x", "y", "z"]),
            RoleDefinition::new("b", 3, ["y"]),
            RoleDefinition::new("c", 3, ["y", "z"]),
            RoleDefinition::new("d", 2, ["z", "w"]),
        ];
        let table = resolve(&roles);

        for (identity, assignment) in table.iter() {
            let best = roles
                .iter()
                .filter(|r| r.members.contains(identity))
                .map(|r| r.priority)
                .max()
                .unwrap();
            assert_eq!(assignment.priority, best);
            let first_best = roles
                .iter()
                .find(|r| r.members.contains(identity) && r.priority == best)
                .unwrap();
            assert_eq!(assignment.role, first_best.name);
        }
        assert_eq!(table.role_for("y"), Some("b"));
        assert_eq!(table.role_for("z"), Some("c"));
        assert_eq!(table.role_for("w"), Some("d"));
    }
}
