//! Construct tree: the declared resources of a stack, keyed by resource kind.
//!
//! Nodes live in an arena and refer to each other through [`NodeId`]. A node
//! is either a grouping construct (stack, construct, provider) or a resource
//! with a CloudFormation type. Dependencies are explicit edges between nodes
//! and must form a DAG.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::naming::digest_hex;
use crate::suppressions::NagRule;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(usize);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceKind {
    Stack,
    Construct,
    Provider,
    KmsKey,
    Bucket,
    Table,
    Secret,
    Queue,
    RestApi,
    Function { handler: String, runtime: String },
    Role,
    Policy,
    LogGroup,
    SearchCollection,
    SecurityPolicy { policy_type: String },
    AccessPolicy,
    KnowledgeBase,
    DataSource,
    Guardrail,
    Prompt,
    CustomResource { resource_type: String },
}

impl ResourceKind {
    /// CloudFormation type, or `None` for grouping constructs.
    pub fn cfn_type(&self) -> Option<&str> {
        let cfn_type = match self {
            Self::Stack | Self::Construct | Self::Provider => return None,
            Self::KmsKey => "AWS::KMS::Key",
            Self::Bucket => "AWS::S3::Bucket",
            Self::Table => "AWS::DynamoDB::Table",
            Self::Secret => "AWS::SecretsManager::Secret",
            Self::Queue => "AWS::SQS::Queue",
            Self::RestApi => "AWS::ApiGateway::RestApi",
            Self::Function { .. } => "AWS::Lambda::Function",
            Self::Role => "AWS::IAM::Role",
            Self::Policy => "AWS::IAM::Policy",
            Self::LogGroup => "AWS::Logs::LogGroup",
            Self::SearchCollection => "AWS::OpenSearchServerless::Collection",
            Self::SecurityPolicy { .. } => "AWS::OpenSearchServerless::SecurityPolicy",
            Self::AccessPolicy => "AWS::OpenSearchServerless::AccessPolicy",
            Self::KnowledgeBase => "AWS::Bedrock::KnowledgeBase",
            Self::DataSource => "AWS::Bedrock::DataSource",
            Self::Guardrail => "AWS::Bedrock::Guardrail",
            Self::Prompt => "AWS::Bedrock::Prompt",
            Self::CustomResource { resource_type } => resource_type,
        };
        Some(cfn_type)
    }

    pub fn is_resource(&self) -> bool {
        self.cfn_type().is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConstructError {
    #[error("construct id '{0}' is empty or contains '/'")]
    InvalidId(String),
    #[error("there is already a construct with id '{id}' under '{parent}'")]
    DuplicateId { parent: String, id: String },
    #[error("'{0}' cannot depend on itself")]
    SelfDependency(String),
    #[error("dependency cycle between: {}", .0.join(", "))]
    DependencyCycle(Vec<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConstructNode {
    pub id: String,
    pub kind: ResourceKind,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub properties: BTreeMap<String, Value>,
    pub depends_on: Vec<NodeId>,
    pub nag_suppressions: Vec<NagRule>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConstructTree {
    nodes: Vec<ConstructNode>,
}

impl ConstructTree {
    pub fn new(stack_id: impl Into<String>) -> Self {
        Self {
            nodes: vec![ConstructNode {
                id: stack_id.into(),
                kind: ResourceKind::Stack,
                parent: None,
                children: Vec::new(),
                properties: BTreeMap::new(),
                depends_on: Vec::new(),
                nag_suppressions: Vec::new(),
            }],
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> &ConstructNode {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut ConstructNode {
        &mut self.nodes[id.0]
    }

    pub fn add(
        &mut self,
        parent: NodeId,
        id: impl Into<String>,
        kind: ResourceKind,
    ) -> Result<NodeId, ConstructError> {
        let id = id.into();
        if id.is_empty() || id.contains('/') {
            return Err(ConstructError::InvalidId(id));
        }
        if self
            .node(parent)
            .children
            .iter()
            .any(|child| self.node(*child).id == id)
        {
            return Err(ConstructError::DuplicateId {
                parent: self.path(parent),
                id,
            });
        }

        let node_id = NodeId(self.nodes.len());
        self.nodes.push(ConstructNode {
            id,
            kind,
            parent: Some(parent),
            children: Vec::new(),
            properties: BTreeMap::new(),
            depends_on: Vec::new(),
            nag_suppressions: Vec::new(),
        });
        self.nodes[parent.0].children.push(node_id);
        Ok(node_id)
    }

    pub fn set_property(&mut self, node: NodeId, key: impl Into<String>, value: Value) {
        self.nodes[node.0].properties.insert(key.into(), value);
    }

    pub fn add_dependency(&mut self, from: NodeId, on: NodeId) -> Result<(), ConstructError> {
        if from == on {
            return Err(ConstructError::SelfDependency(self.path(from)));
        }
        let depends_on = &mut self.nodes[from.0].depends_on;
        if !depends_on.contains(&on) {
            depends_on.push(on);
        }
        Ok(())
    }

    pub fn path(&self, node: NodeId) -> String {
        let mut segments = Vec::new();
        let mut cursor = Some(node);
        while let Some(current) = cursor {
            let entry = self.node(current);
            segments.push(entry.id.as_str());
            cursor = entry.parent;
        }
        segments.reverse();
        segments.join("/")
    }

    /// Alphanumeric path below the stack plus a digest of the full path, so
    /// ids stay unique even when two paths collapse to the same characters.
    pub fn logical_id(&self, node: NodeId) -> String {
        let path = self.path(node);
        let human: String = path
            .split('/')
            .skip(1)
            .filter(|segment| !matches!(*segment, "Resource" | "Default"))
            .flat_map(|segment| segment.chars().filter(char::is_ascii_alphanumeric))
            .collect();
        let digest = digest_hex(&path);
        format!("{human}{}", digest[..8].to_ascii_uppercase())
    }

    /// Depth-first pre-order, children in declaration order.
    pub fn walk(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root()];
        while let Some(current) = stack.pop() {
            order.push(current);
            stack.extend(self.node(current).children.iter().rev().copied());
        }
        order
    }

    pub fn find_by_path(&self, path: &str) -> Option<NodeId> {
        self.walk().into_iter().find(|node| self.path(*node) == path)
    }

    /// Nodes in an order where every node follows its dependencies and its parent.
    pub fn deployment_order(&self) -> Result<Vec<NodeId>, ConstructError> {
        let count = self.nodes.len();
        let mut incoming = vec![0usize; count];
        let mut dependents: Vec<Vec<NodeId>> = vec![Vec::new(); count];
        for (index, node) in self.nodes.iter().enumerate() {
            let edges = node.depends_on.iter().copied().chain(node.parent);
            for prerequisite in edges {
                incoming[index] += 1;
                dependents[prerequisite.0].push(NodeId(index));
            }
        }

        let mut ready: VecDeque<NodeId> = (0..count)
            .filter(|index| incoming[*index] == 0)
            .map(NodeId)
            .collect();
        let mut order = Vec::with_capacity(count);
        while let Some(current) = ready.pop_front() {
            order.push(current);
            for dependent in &dependents[current.0] {
                incoming[dependent.0] -= 1;
                if incoming[dependent.0] == 0 {
                    ready.push_back(*dependent);
                }
            }
        }

        if order.len() != count {
            let placed: BTreeSet<NodeId> = order.into_iter().collect();
            let stuck = (0..count)
                .map(NodeId)
                .filter(|node| !placed.contains(node))
                .map(|node| self.path(node))
                .collect();
            return Err(ConstructError::DependencyCycle(stuck));
        }
        Ok(order)
    }

    pub fn to_manifest(&self) -> Vec<ManifestNode> {
        self.walk()
            .into_iter()
            .map(|node_id| {
                let node = self.node(node_id);
                let is_resource = node.kind.is_resource();
                ManifestNode {
                    path: self.path(node_id),
                    logical_id: is_resource.then(|| self.logical_id(node_id)),
                    cfn_type: node.kind.cfn_type().map(str::to_string),
                    kind: node.kind.clone(),
                    properties: node.properties.clone(),
                    depends_on: node
                        .depends_on
                        .iter()
                        .map(|dependency| self.path(*dependency))
                        .collect(),
                    nag_suppressions: node.nag_suppressions.clone(),
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManifestNode {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logical_id: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub cfn_type: Option<String>,
    #[serde(flatten)]
    pub kind: ResourceKind,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub nag_suppressions: Vec<NagRule>,
}
