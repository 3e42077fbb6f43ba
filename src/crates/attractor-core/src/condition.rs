//! The edge-condition language (C2): a deliberately small AND-only grammar
//! over the current node's outcome, its preferred label, and context keys.
//!
//! ```text
//! Expr   := Clause ( "&&" Clause )*
//! Clause := Key Op Literal | Key
//! Key    := "outcome" | "preferred_label" | "context." DottedPath | DottedPath
//! Op     := "=" | "!="
//! ```
//!
//! All comparisons are string equality; `<`, `>`, and `|` are reserved and
//! rejected at parse time rather than silently ignored, so a graph author
//! who typos a condition finds out at validation time, not mid-run.

use std::collections::HashMap;

use crate::error::{CoreError, Result};
use crate::status::Status;

const RESERVED: [char; 3] = ['<', '>', '|'];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Op {
    Eq,
    Ne,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Clause {
    key: String,
    op_and_literal: Option<(Op, String)>,
}

/// A compiled edge guard. Construct with [`CompiledExpr::parse`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledExpr {
    clauses: Vec<Clause>,
}

/// Everything a clause might need to resolve a key: the current outcome and
/// the shared context. Built fresh by the scheduler for each routing
/// decision.
pub struct EvalContext<'a> {
    pub status: Status,
    pub preferred_label: Option<&'a str>,
    pub context: &'a HashMap<String, serde_json::Value>,
}

impl CompiledExpr {
    /// Parses a condition expression. An empty expression is trivially true
    /// (it compiles to zero clauses).
    pub fn parse(expr: &str) -> Result<Self> {
        let expr = expr.trim();
        if expr.is_empty() {
            return Ok(Self { clauses: Vec::new() });
        }
        if let Some(c) = expr.chars().find(|c| RESERVED.contains(c)) {
            return Err(CoreError::ReservedOperator(c.to_string()));
        }

        let mut clauses = Vec::new();
        for raw in expr.split("&&") {
            clauses.push(parse_clause(raw.trim(), expr)?);
        }
        Ok(Self { clauses })
    }

    /// Evaluates the compiled expression against an outcome/context pair.
    /// Total on any well-formed expression: every clause resolves to a
    /// string (missing context keys resolve to the empty string) so there is
    /// no "undefined" state to propagate.
    pub fn eval(&self, ctx: &EvalContext<'_>) -> bool {
        self.clauses.iter().all(|clause| eval_clause(clause, ctx))
    }

    pub fn is_unconditional(&self) -> bool {
        self.clauses.is_empty()
    }
}

fn parse_clause(raw: &str, whole: &str) -> Result<Clause> {
    if raw.is_empty() {
        return Err(CoreError::ConditionParse {
            expr: whole.to_string(),
            reason: "empty clause".to_string(),
        });
    }
    for (op_str, op) in [("!=", Op::Ne), ("=", Op::Eq)] {
        if let Some(idx) = raw.find(op_str) {
            let key = raw[..idx].trim().to_string();
            let literal = raw[idx + op_str.len()..].trim().trim_matches('"').to_string();
            if key.is_empty() {
                return Err(CoreError::ConditionParse {
                    expr: whole.to_string(),
                    reason: "missing key before operator".to_string(),
                });
            }
            return Ok(Clause {
                key,
                op_and_literal: Some((op, literal)),
            });
        }
    }
    // Bare key: presence/truthiness check, treated as `key != ""`.
    Ok(Clause {
        key: raw.to_string(),
        op_and_literal: None,
    })
}

fn resolve_key(key: &str, ctx: &EvalContext<'_>) -> String {
    if key == "outcome" {
        return ctx.status.canonical().to_string();
    }
    if key == "preferred_label" {
        return ctx.preferred_label.unwrap_or("").to_string();
    }
    let path = key.strip_prefix("context.").unwrap_or(key);
    stringify(ctx.context.get(path))
}

fn stringify(value: Option<&serde_json::Value>) -> String {
    match value {
        None => String::new(),
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Null) => String::new(),
        Some(other) => other.to_string(),
    }
}

fn eval_clause(clause: &Clause, ctx: &EvalContext<'_>) -> bool {
    let resolved = resolve_key(&clause.key, ctx);
    match &clause.op_and_literal {
        Some((Op::Eq, lit)) => &resolved == lit,
        Some((Op::Ne, lit)) => &resolved != lit,
        None => !resolved.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx<'a>(status: Status, context: &'a HashMap<String, serde_json::Value>) -> EvalContext<'a> {
        EvalContext {
            status,
            preferred_label: None,
            context,
        }
    }

    #[test]
    fn empty_expression_is_trivially_true() {
        let expr = CompiledExpr::parse("").unwrap();
        let empty = HashMap::new();
        assert!(expr.eval(&ctx(Status::Fail, &empty)));
    }

    #[test]
    fn rejects_reserved_operators() {
        assert!(matches!(
            CompiledExpr::parse("outcome>success"),
            Err(CoreError::ReservedOperator(_))
        ));
        assert!(matches!(
            CompiledExpr::parse("a=1|b=2"),
            Err(CoreError::ReservedOperator(_))
        ));
    }

    #[test]
    fn alias_normalization_feeds_condition_eval() {
        let expr = CompiledExpr::parse("outcome=skipped").unwrap();
        let empty = HashMap::new();
        assert!(expr.eval(&ctx(Status::Skipped, &empty)));
    }

    #[test]
    fn and_only_composition_requires_every_clause() {
        let expr = CompiledExpr::parse("outcome=fail && context.failure_class=transient_infra").unwrap();
        let mut context = HashMap::new();
        context.insert(
            "failure_class".to_string(),
            serde_json::Value::String("transient_infra".to_string()),
        );
        assert!(expr.eval(&ctx(Status::Fail, &context)));

        context.insert(
            "failure_class".to_string(),
            serde_json::Value::String("deterministic".to_string()),
        );
        assert!(!expr.eval(&ctx(Status::Fail, &context)));
    }

    #[test]
    fn missing_context_key_resolves_to_empty_string() {
        let expr = CompiledExpr::parse("context.nope=").unwrap();
        let empty = HashMap::new();
        assert!(expr.eval(&ctx(Status::Success, &empty)));
    }

    proptest::proptest! {
        #[test]
        fn parse_never_panics_on_arbitrary_input(s in "\\PC{0,64}") {
            let _ = CompiledExpr::parse(&s);
        }
    }
}
