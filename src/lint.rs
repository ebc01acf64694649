//! Non-fatal diagnostics on a resolved schema.
//!
//! ## Rules
//!
//! - **NoCorruptionCandidates**: every field is strict, unconstrained, or fully covering its
//!   type, so requesting an invalid instance fails with `EmptyCandidatePool`.
//! - **UnboundedDependee**: a dependee can take values above 65 535, producing very long arrays.
//! - **RedundantStrict**: `strict` on a field that could never be corrupted anyway.
//! - **ShortListConstraint**: a list constraint shorter than its fixed array length; the
//!   remaining positions are unconstrained.
//!
//! Run via the `validate_spec` binary.

use crate::ast::{ResolvedLength, ResolvedMessage, ResolvedSchema};
use crate::constraint::Constraint;
use crate::fuzz::candidate_pool;

/// Dependee values above this are reported as unbounded.
pub const DEPENDEE_WARN_LIMIT: i128 = 65_535;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LintRule {
    NoCorruptionCandidates,
    UnboundedDependee,
    RedundantStrict,
    ShortListConstraint,
}

#[derive(Debug, Clone)]
pub struct LintMessage {
    pub message_type: String,
    /// Leaf field the finding refers to; `None` for message-level findings.
    pub field: Option<String>,
    pub rule: LintRule,
    pub severity: Severity,
    pub message: String,
}

impl std::fmt::Display for LintMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let level = match self.severity {
            Severity::Info => "info",
            Severity::Warning => "warning",
        };
        match &self.field {
            Some(field) => write!(f, "{}: {}.{}: {}", level, self.message_type, field, self.message),
            None => write!(f, "{}: {}: {}", level, self.message_type, self.message),
        }
    }
}

/// Run all rules. Messages are grouped by message type in schema order.
pub fn lint(schema: &ResolvedSchema) -> Vec<LintMessage> {
    let mut out = Vec::new();
    for m in &schema.messages {
        lint_message(m, &mut out);
    }
    out
}

fn lint_message(m: &ResolvedMessage, out: &mut Vec<LintMessage>) {
    let finding = |field: Option<&str>, rule, severity, message: String| LintMessage {
        message_type: m.name.clone(),
        field: field.map(str::to_string),
        rule,
        severity,
        message,
    };

    if candidate_pool(m).is_empty() {
        out.push(finding(
            None,
            LintRule::NoCorruptionCandidates,
            Severity::Warning,
            "no field can be corrupted; invalid instances cannot be generated".to_string(),
        ));
    }

    for field in &m.fields {
        if field.dependee {
            let max = field.constraint.int_upper_bound(&field.primitive);
            if max > DEPENDEE_WARN_LIMIT {
                out.push(finding(
                    Some(field.name.as_str()),
                    LintRule::UnboundedDependee,
                    Severity::Warning,
                    format!("dependee allows values up to {}; constrain it to bound array lengths", max),
                ));
            }
        }
        if field.strict && !field.is_array() && !field.constraint.is_invalidatable(&field.primitive) {
            out.push(finding(
                Some(field.name.as_str()),
                LintRule::RedundantStrict,
                Severity::Info,
                "strict has no effect: the field admits no invalid value".to_string(),
            ));
        }
        if let (Some(ResolvedLength::Fixed(n)), Some(shortest)) = (field.length, shortest_list(&field.constraint)) {
            if (shortest as u64) < n {
                out.push(finding(
                    Some(field.name.as_str()),
                    LintRule::ShortListConstraint,
                    Severity::Info,
                    format!("list constrains {} of {} positions; the rest are unconstrained", shortest, n),
                ));
            }
        }
    }
}

fn shortest_list(c: &Constraint) -> Option<usize> {
    match c {
        Constraint::List(items) => Some(items.len()),
        Constraint::Choice(alts) => alts.iter().filter_map(shortest_list).min(),
        _ => None,
    }
}
