//! Rule evaluation: flatten a transaction and its related records into a
//! normalized context, then walk each rule's condition tree in priority
//! order until one matches.

use std::collections::HashMap;
use std::str::FromStr;

use log::warn;
use rust_decimal::Decimal;

use crate::errors::{Error, Result};
use crate::models::{Account, Bank, Category, Transaction};
use crate::rules::{AutomationRule, ConditionNode, GroupLogic, RuleField, RuleMatch, RuleOperator};
use crate::secrets::SecretCipher;

/// Lowercase, trim, and collapse internal whitespace runs to one space.
pub fn normalize_text(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Flattened, normalized view of one transaction for condition evaluation.
///
/// Free-text fields are normalized; `None` means the underlying value is
/// null (a present-but-blank value stays `Some("")`, which `is_empty` does
/// not count as empty). The amount is converted from minor-unit storage to
/// major units, so rule thresholds read naturally.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalContext {
    pub description: Option<String>,
    pub notes: Option<String>,
    pub amount: Decimal,
    pub transaction_date: Option<String>,
    pub bank_name: Option<String>,
    pub account_name: Option<String>,
    pub category: Option<String>,
}

impl EvalContext {
    pub fn build(
        transaction: &Transaction,
        categories: &[Category],
        accounts: &[Account],
        banks: &[Bank],
        cipher: &dyn SecretCipher,
    ) -> Self {
        let account = accounts
            .iter()
            .find(|account| account.id == transaction.account_id);

        let account_name = account.map(|account| match &account.name_iv {
            Some(iv) => match cipher.decrypt(&account.name, iv) {
                Ok(name) => name,
                Err(err) => {
                    // One bad ciphertext must not block rule evaluation.
                    warn!(
                        "Account name decryption failed for '{}': {}",
                        account.id, err
                    );
                    String::new()
                }
            },
            None => account.name.clone(),
        });

        let bank_name = account
            .and_then(|account| account.bank_id.as_deref())
            .and_then(|bank_id| banks.iter().find(|bank| bank.id == bank_id))
            .map(|bank| bank.name.clone());

        let category = transaction
            .category_id
            .as_deref()
            .and_then(|category_id| categories.iter().find(|c| c.id == category_id))
            .map(|category| category.name.clone());

        Self {
            description: transaction.description.as_deref().map(normalize_text),
            notes: transaction.notes.as_deref().map(normalize_text),
            amount: Decimal::new(transaction.amount, 2),
            transaction_date: Some(normalize_text(&transaction.transaction_date)),
            bank_name: bank_name.as_deref().map(normalize_text),
            account_name: account_name.as_deref().map(normalize_text),
            category: category.as_deref().map(normalize_text),
        }
    }

    /// Field value as normalized text. The amount renders as its major-unit
    /// decimal string.
    fn text(&self, field: RuleField) -> Option<String> {
        match field {
            RuleField::Description => self.description.clone(),
            RuleField::Notes => self.notes.clone(),
            RuleField::Amount => Some(self.amount.to_string()),
            RuleField::TransactionDate => self.transaction_date.clone(),
            RuleField::BankName => self.bank_name.clone(),
            RuleField::AccountName => self.account_name.clone(),
            RuleField::Category => self.category.clone(),
        }
    }

    fn number(&self, field: RuleField) -> Option<Decimal> {
        match field {
            RuleField::Amount => Some(self.amount),
            _ => self
                .text(field)
                .and_then(|value| Decimal::from_str(&value).ok()),
        }
    }

    fn is_null(&self, field: RuleField) -> bool {
        match field {
            RuleField::Amount => false,
            _ => self.text(field).is_none(),
        }
    }
}

/// A predicate operand: a literal, or a reference to another context field.
enum Operand {
    Literal(serde_json::Value),
    Field(RuleField),
}

fn parse_operand(value: &serde_json::Value) -> Operand {
    if let Some(object) = value.as_object() {
        if let Some(reference) = object.get("field") {
            if let Ok(field) = serde_json::from_value::<RuleField>(reference.clone()) {
                return Operand::Field(field);
            }
        }
    }
    Operand::Literal(value.clone())
}

impl Operand {
    /// Normalized text form. Literal strings are lowercased like context
    /// fields; field references read the referenced context value.
    fn text(&self, context: &EvalContext) -> Option<String> {
        match self {
            Operand::Literal(serde_json::Value::String(value)) => Some(normalize_text(value)),
            Operand::Literal(serde_json::Value::Null) => None,
            Operand::Literal(value) => Some(value.to_string()),
            Operand::Field(field) => context.text(*field),
        }
    }

    fn number(&self, context: &EvalContext) -> Option<Decimal> {
        match self {
            Operand::Literal(serde_json::Value::Number(value)) => value
                .as_i64()
                .map(Decimal::from)
                .or_else(|| value.as_f64().and_then(Decimal::from_f64_retain)),
            Operand::Literal(serde_json::Value::String(value)) => {
                Decimal::from_str(value.trim()).ok()
            }
            Operand::Literal(_) => None,
            Operand::Field(field) => context.number(*field),
        }
    }
}

fn evaluate_predicate(
    field: RuleField,
    operator: RuleOperator,
    value: Option<&serde_json::Value>,
    context: &EvalContext,
) -> Result<bool> {
    let operand = || -> Result<Operand> {
        value
            .map(parse_operand)
            .ok_or_else(|| Error::validation(format!("Operator {operator:?} requires a value")))
    };

    match operator {
        // Null-check, not blank-check: a present empty string is not "empty".
        RuleOperator::IsEmpty => Ok(context.is_null(field)),
        RuleOperator::IsNotEmpty => Ok(!context.is_null(field)),
        RuleOperator::Contains => {
            let needle = operand()?.text(context);
            let haystack = context.text(field);
            Ok(match (haystack, needle) {
                (Some(haystack), Some(needle)) => haystack.contains(&needle),
                _ => false,
            })
        }
        RuleOperator::Equals => {
            if field == RuleField::Amount {
                return Ok(operand()?
                    .number(context)
                    .is_some_and(|value| value == context.amount));
            }
            let operand = operand()?.text(context);
            Ok(match (context.text(field), operand) {
                (Some(actual), Some(expected)) => actual == expected,
                (None, None) => true,
                _ => false,
            })
        }
        RuleOperator::GreaterThan | RuleOperator::LessThan => {
            // Non-numeric sides compare false rather than failing the rule.
            let (actual, threshold) = (context.number(field), operand()?.number(context));
            Ok(match (actual, threshold) {
                (Some(actual), Some(threshold)) => {
                    if operator == RuleOperator::GreaterThan {
                        actual > threshold
                    } else {
                        actual < threshold
                    }
                }
                _ => false,
            })
        }
    }
}

fn evaluate_node(node: &ConditionNode, context: &EvalContext) -> Result<bool> {
    match node {
        ConditionNode::Group { logic, conditions } => {
            // Every child is evaluated (no short-circuit) so a malformed
            // branch always surfaces and skips the rule.
            let mut results = Vec::with_capacity(conditions.len());
            for child in conditions {
                results.push(evaluate_node(child, context)?);
            }
            Ok(match logic {
                GroupLogic::And => results.iter().all(|matched| *matched),
                GroupLogic::Or => results.iter().any(|matched| *matched),
            })
        }
        ConditionNode::Predicate {
            field,
            operator,
            value,
        } => evaluate_predicate(*field, *operator, value.as_ref(), context),
    }
}

fn rule_matches(rule: &AutomationRule, context: &EvalContext) -> Result<bool> {
    let tree: ConditionNode = serde_json::from_value(rule.conditions.clone())?;
    evaluate_node(&tree, context)
}

/// Evaluate `rules` against one transaction in ascending priority order and
/// return the first match's action, or `None`. A rule whose tree fails to
/// parse or evaluate is logged and skipped; evaluation continues.
pub fn evaluate_rules(
    transaction: &Transaction,
    rules: &[AutomationRule],
    categories: &[Category],
    accounts: &[Account],
    banks: &[Bank],
    cipher: &dyn SecretCipher,
) -> Option<RuleMatch> {
    let mut ordered: Vec<&AutomationRule> = rules.iter().collect();
    ordered.sort_by_key(|rule| rule.priority);

    let context = EvalContext::build(transaction, categories, accounts, banks, cipher);
    first_match(&ordered, &context)
}

/// Evaluate the same rule list against many transactions. Unmatched
/// transactions are simply absent from the result map.
pub fn evaluate_rules_bulk(
    transactions: &[Transaction],
    rules: &[AutomationRule],
    categories: &[Category],
    accounts: &[Account],
    banks: &[Bank],
    cipher: &dyn SecretCipher,
) -> HashMap<String, RuleMatch> {
    let mut ordered: Vec<&AutomationRule> = rules.iter().collect();
    ordered.sort_by_key(|rule| rule.priority);

    let mut matches = HashMap::new();
    for transaction in transactions {
        let context = EvalContext::build(transaction, categories, accounts, banks, cipher);
        if let Some(matched) = first_match(&ordered, &context) {
            matches.insert(transaction.id.clone(), matched);
        }
    }
    matches
}

fn first_match(ordered: &[&AutomationRule], context: &EvalContext) -> Option<RuleMatch> {
    for rule in ordered {
        match rule_matches(rule, context) {
            Ok(true) => return Some(RuleMatch::from_rule(rule)),
            Ok(false) => {}
            Err(err) => {
                warn!("Skipping automation rule '{}' ({}): {}", rule.title, rule.id, err);
            }
        }
    }
    None
}
