//! Compliance suppression pass.
//!
//! After every resource has been declared, static cdk-nag style suppressions
//! (rule id + justification) are attached to nodes picked out by path or by
//! logical-id substring. A target that matches nothing is logged and skipped:
//! conditional resources legitimately differ between environments.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::construct::{ConstructTree, NodeId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NagRule {
    pub id: String,
    pub reason: String,
}

impl NagRule {
    pub fn new(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SuppressionTarget {
    ExactPath(String),
    PathContains(String),
    /// Only resource nodes carry a logical id.
    LogicalIdContains(String),
}

impl SuppressionTarget {
    fn matches(&self, tree: &ConstructTree, node: NodeId) -> bool {
        match self {
            Self::ExactPath(path) => tree.path(node) == *path,
            Self::PathContains(fragment) => tree.path(node).contains(fragment.as_str()),
            Self::LogicalIdContains(fragment) => {
                tree.node(node).kind.is_resource()
                    && tree.logical_id(node).contains(fragment.as_str())
            }
        }
    }
}

impl fmt::Display for SuppressionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExactPath(path) => write!(f, "path '{path}'"),
            Self::PathContains(fragment) => write!(f, "path containing '{fragment}'"),
            Self::LogicalIdContains(fragment) => write!(f, "logical id containing '{fragment}'"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuppressionRule {
    pub target: SuppressionTarget,
    pub rules: Vec<NagRule>,
    pub apply_to_all: bool,
}

impl SuppressionRule {
    pub fn path(path: impl Into<String>, rules: Vec<NagRule>) -> Self {
        Self::new(SuppressionTarget::ExactPath(path.into()), rules)
    }

    pub fn path_contains(fragment: impl Into<String>, rules: Vec<NagRule>) -> Self {
        Self::new(SuppressionTarget::PathContains(fragment.into()), rules)
    }

    pub fn logical_id_contains(fragment: impl Into<String>, rules: Vec<NagRule>) -> Self {
        Self::new(SuppressionTarget::LogicalIdContains(fragment.into()), rules)
    }

    /// Attach to every match instead of the first one.
    pub fn all_matches(mut self) -> Self {
        self.apply_to_all = true;
        self
    }

    fn new(target: SuppressionTarget, rules: Vec<NagRule>) -> Self {
        Self {
            target,
            rules,
            apply_to_all: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedSuppression {
    pub path: String,
    pub rule_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SuppressionReport {
    pub applied: Vec<AppliedSuppression>,
    pub missed: Vec<String>,
}

pub fn apply_suppressions(
    tree: &mut ConstructTree,
    rules: &[SuppressionRule],
) -> SuppressionReport {
    let order = tree.walk();
    let mut seen: HashSet<(NodeId, String)> = order
        .iter()
        .flat_map(|node| {
            tree.node(*node)
                .nag_suppressions
                .iter()
                .map(move |existing| (*node, existing.id.clone()))
        })
        .collect();
    let mut report = SuppressionReport::default();

    for rule in rules {
        let mut matched = false;
        for node in &order {
            if !rule.target.matches(tree, *node) {
                continue;
            }
            matched = true;

            let mut attached = Vec::new();
            for nag in &rule.rules {
                if seen.insert((*node, nag.id.clone())) {
                    tree.node_mut(*node).nag_suppressions.push(nag.clone());
                    attached.push(nag.id.clone());
                }
            }
            if !attached.is_empty() {
                let path = tree.path(*node);
                debug!(path = %path, rules = ?attached, "attached suppressions");
                report.applied.push(AppliedSuppression {
                    path,
                    rule_ids: attached,
                });
            }

            if !rule.apply_to_all {
                break;
            }
        }

        if !matched {
            warn!(
                suppression_target = %rule.target,
                "no construct matched suppression target, skipping"
            );
            report.missed.push(rule.target.to_string());
        }
    }

    report
}

/// A rule attached to a construct covers everything below it.
#[cfg(test)]
pub fn is_suppressed(tree: &ConstructTree, node: NodeId, rule_id: &str) -> bool {
    let mut cursor = Some(node);
    while let Some(current) = cursor {
        let entry = tree.node(current);
        if entry.nag_suppressions.iter().any(|nag| nag.id == rule_id) {
            return true;
        }
        cursor = entry.parent;
    }
    false
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::construct::ResourceKind;

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl CapturedLogs {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().expect("poisoned mutex")).into_owned()
        }
    }

    impl io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().expect("poisoned mutex").extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn function_kind() -> ResourceKind {
        ResourceKind::Function {
            handler: "bootstrap".to_string(),
            runtime: "provided.al2023".to_string(),
        }
    }

    fn tree_with_two_handlers() -> (ConstructTree, NodeId, NodeId) {
        let mut tree = ConstructTree::new("SlackRagStack");
        let providers = tree
            .add(tree.root(), "DelayProvider", ResourceKind::Provider)
            .expect("provider");
        let first = tree
            .add(providers, "framework-onEvent", function_kind())
            .expect("function");
        let index_provider = tree
            .add(tree.root(), "IndexProvider", ResourceKind::Provider)
            .expect("provider");
        let second = tree
            .add(index_provider, "framework-onEvent", function_kind())
            .expect("function");
        (tree, first, second)
    }

    fn runtime_rule() -> Vec<NagRule> {
        vec![NagRule::new("AwsSolutions-L1", "Provider framework pins its runtime")]
    }

    #[test]
    fn first_match_wins_by_default() {
        let (mut tree, first, second) = tree_with_two_handlers();
        let report = apply_suppressions(
            &mut tree,
            &[SuppressionRule::path_contains("framework-onEvent", runtime_rule())],
        );

        assert_eq!(tree.node(first).nag_suppressions.len(), 1);
        assert!(tree.node(second).nag_suppressions.is_empty());
        assert_eq!(report.applied.len(), 1);
    }

    #[test]
    fn wildcard_rule_reaches_every_match() {
        let (mut tree, first, second) = tree_with_two_handlers();
        apply_suppressions(
            &mut tree,
            &[SuppressionRule::path_contains("framework-onEvent", runtime_rule()).all_matches()],
        );

        assert_eq!(tree.node(first).nag_suppressions.len(), 1);
        assert_eq!(tree.node(second).nag_suppressions.len(), 1);
    }

    #[test]
    fn overlapping_rules_do_not_duplicate_metadata() {
        let (mut tree, first, _) = tree_with_two_handlers();
        let rules = [
            SuppressionRule::path("SlackRagStack/DelayProvider/framework-onEvent", runtime_rule()),
            SuppressionRule::logical_id_contains("DelayProviderframeworkonEvent", runtime_rule()),
        ];

        let report = apply_suppressions(&mut tree, &rules);
        assert_eq!(tree.node(first).nag_suppressions.len(), 1);
        assert!(report.missed.is_empty());

        apply_suppressions(&mut tree, &rules);
        assert_eq!(tree.node(first).nag_suppressions.len(), 1);
    }

    #[test]
    fn missing_target_is_reported_not_fatal() {
        let (mut tree, _, _) = tree_with_two_handlers();
        let report = apply_suppressions(
            &mut tree,
            &[
                SuppressionRule::path("SlackRagStack/Guardrail/Resource", runtime_rule()),
                SuppressionRule::path_contains("IndexProvider", runtime_rule()),
            ],
        );

        assert_eq!(report.missed, vec!["path 'SlackRagStack/Guardrail/Resource'".to_string()]);
        assert_eq!(report.applied.len(), 1);
    }

    #[test]
    fn missing_target_logs_a_warning() {
        let (mut tree, _, _) = tree_with_two_handlers();
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .without_time()
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            apply_suppressions(
                &mut tree,
                &[SuppressionRule::path("SlackRagStack/Guardrail/Resource", runtime_rule())],
            )
        });

        let output = logs.text();
        assert!(output.contains("WARN"), "{output}");
        assert!(output.contains("no construct matched suppression target"), "{output}");
        assert!(output.contains("SlackRagStack/Guardrail/Resource"), "{output}");
    }

    #[test]
    fn logical_id_targets_skip_grouping_constructs() {
        let (mut tree, first, _) = tree_with_two_handlers();
        apply_suppressions(
            &mut tree,
            &[SuppressionRule::logical_id_contains("DelayProvider", runtime_rule())],
        );

        let providers = tree.node(first).parent.expect("parent");
        assert!(tree.node(providers).nag_suppressions.is_empty());
        assert_eq!(tree.node(first).nag_suppressions.len(), 1);
    }

    #[test]
    fn suppression_on_construct_covers_descendants() {
        let (mut tree, first, second) = tree_with_two_handlers();
        apply_suppressions(
            &mut tree,
            &[SuppressionRule::path("SlackRagStack/DelayProvider", runtime_rule())],
        );

        assert!(is_suppressed(&tree, first, "AwsSolutions-L1"));
        assert!(!is_suppressed(&tree, second, "AwsSolutions-L1"));
    }
}
