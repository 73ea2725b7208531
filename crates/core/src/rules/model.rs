//! Automation rule model and the condition tree it evaluates.

use serde::{Deserialize, Serialize};

/// A user-defined classification rule. Rules are evaluated in ascending
/// `priority` order; the first match wins and later rules are not consulted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationRule {
    pub id: String,
    pub user_id: Option<String>,
    pub title: String,
    /// Lower values are evaluated first.
    pub priority: i32,
    /// Raw condition tree as persisted; parsed into [`ConditionNode`] at
    /// evaluation time so a malformed tree skips one rule, not the pass.
    pub conditions: serde_json::Value,
    pub category_id: Option<String>,
    /// Encrypted note to attach on match (base64 ciphertext + IV).
    pub note: Option<String>,
    pub note_iv: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Fields a condition may test, resolved from the flattened evaluation
/// context built around a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleField {
    Description,
    Notes,
    Amount,
    TransactionDate,
    BankName,
    AccountName,
    Category,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleOperator {
    Contains,
    Equals,
    GreaterThan,
    LessThan,
    IsEmpty,
    IsNotEmpty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupLogic {
    And,
    Or,
}

/// Nested boolean-logic tree: `and`/`or` groups over leaf predicates.
///
/// Wire shapes: `{"logic": "and", "conditions": [...]}` for groups,
/// `{"field": ..., "operator": ..., "value": ...}` for predicates. A
/// predicate value may itself be a field reference `{"field": ...}`,
/// comparing two context fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionNode {
    Group {
        logic: GroupLogic,
        conditions: Vec<ConditionNode>,
    },
    Predicate {
        field: RuleField,
        operator: RuleOperator,
        #[serde(default)]
        value: Option<serde_json::Value>,
    },
}

/// Action of the first matching rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleMatch {
    pub rule_id: String,
    pub rule_title: String,
    pub category_id: Option<String>,
    pub note: Option<String>,
    pub note_iv: Option<String>,
    pub labels: Vec<String>,
}

impl RuleMatch {
    pub fn from_rule(rule: &AutomationRule) -> Self {
        Self {
            rule_id: rule.id.clone(),
            rule_title: rule.title.clone(),
            category_id: rule.category_id.clone(),
            note: rule.note.clone(),
            note_iv: rule.note_iv.clone(),
            labels: rule.labels.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn condition_tree_parses_groups_and_predicates() {
        let raw = json!({
            "logic": "or",
            "conditions": [
                { "field": "description", "operator": "contains", "value": "Coffee" },
                {
                    "logic": "and",
                    "conditions": [
                        { "field": "amount", "operator": "less_than", "value": 0 },
                        { "field": "notes", "operator": "is_empty" }
                    ]
                }
            ]
        });

        let node: ConditionNode = serde_json::from_value(raw).expect("parse tree");
        let ConditionNode::Group { logic, conditions } = node else {
            panic!("expected a group at the root");
        };
        assert_eq!(logic, GroupLogic::Or);
        assert_eq!(conditions.len(), 2);
        assert!(matches!(
            conditions[0],
            ConditionNode::Predicate {
                field: RuleField::Description,
                operator: RuleOperator::Contains,
                ..
            }
        ));
    }

    #[test]
    fn predicate_without_value_parses() {
        let node: ConditionNode =
            serde_json::from_value(json!({ "field": "notes", "operator": "is_not_empty" }))
                .expect("parse predicate");
        assert!(matches!(
            node,
            ConditionNode::Predicate {
                value: None,
                operator: RuleOperator::IsNotEmpty,
                ..
            }
        ));
    }

    #[test]
    fn malformed_tree_is_rejected() {
        let result: Result<ConditionNode, _> =
            serde_json::from_value(json!({ "field": "description", "op": "contains" }));
        assert!(result.is_err());

        let result: Result<ConditionNode, _> =
            serde_json::from_value(json!({ "field": "balance", "operator": "contains" }));
        assert!(result.is_err(), "unknown field name must not parse");
    }
}
