//! Declaration of the Slack RAG assistant stack.
//!
//! The context is validated before the tree exists, so a missing Slack
//! credential aborts the build before a single node is declared. Property
//! references between resources (`Ref` / `Fn::GetAtt`) also record a
//! dependency edge, which keeps [`ConstructTree::deployment_order`] faithful
//! to what CloudFormation would infer.

use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::info;

use crate::construct::{ConstructError, ConstructTree, ManifestNode, NodeId, ResourceKind};
use crate::context::{ContextError, DeploymentContext, RawContext};
use crate::delay::{DESCRIPTION_PROPERTY, WAIT_SECONDS_PROPERTY};
use crate::naming::{collection_name, function_name, resource_name, ResourceFamily};
use crate::suppressions::{apply_suppressions, NagRule, SuppressionReport, SuppressionRule};
use crate::vector_index::{
    COLLECTION_NAME_PROPERTY, DEFAULT_METADATA_FIELD, DEFAULT_TEXT_FIELD, DEFAULT_VECTOR_FIELD,
    DIMENSIONS_PROPERTY, ENDPOINT_PROPERTY, INDEX_NAME_PROPERTY, METADATA_FIELD_PROPERTY,
    TEXT_FIELD_PROPERTY, VECTOR_FIELD_PROPERTY,
};

pub const RUST_RUNTIME: &str = "provided.al2023";
pub const RUST_HANDLER: &str = "bootstrap";
pub const APP_RUNTIME: &str = "python3.12";
pub const PROVIDER_RUNTIME: &str = "nodejs20.x";

pub const DELAY_RESOURCE_TYPE: &str = "Custom::Delay";
pub const VECTOR_INDEX_RESOURCE_TYPE: &str = "Custom::VectorIndex";
pub const INVOCATION_LOGGING_RESOURCE_TYPE: &str = "Custom::BedrockInvocationLogging";

#[derive(Debug, Error)]
pub enum StackError {
    #[error(transparent)]
    Context(#[from] ContextError),
    #[error(transparent)]
    Construct(#[from] ConstructError),
}

#[derive(Debug, Clone)]
pub struct SlackRagStack {
    pub context: DeploymentContext,
    pub tree: ConstructTree,
    pub suppression_report: SuppressionReport,
    deployment_order: Vec<NodeId>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StackManifest {
    pub stack_name: String,
    pub environment: String,
    pub account: Option<String>,
    pub region: Option<String>,
    pub context_fingerprint: String,
    pub tags: Vec<(String, String)>,
    pub resources: Vec<ManifestNode>,
    pub deployment_order: Vec<String>,
    pub suppression_report: SuppressionReport,
}

impl SlackRagStack {
    pub fn build(raw: RawContext) -> Result<Self, StackError> {
        let context = DeploymentContext::from_raw(raw)?;
        Self::from_context(context)
    }

    pub fn from_context(context: DeploymentContext) -> Result<Self, StackError> {
        let mut tree = ConstructTree::new(context.stack_name.clone());
        declare_stack(&mut tree, &context)?;

        let suppression_report = apply_suppressions(&mut tree, &default_suppressions(&context));
        let deployment_order = tree.deployment_order()?;
        info!(
            stack = %context.stack_name,
            nodes = tree.len(),
            suppressions_missed = suppression_report.missed.len(),
            "declared stack"
        );

        Ok(Self {
            context,
            tree,
            suppression_report,
            deployment_order,
        })
    }

    pub fn find(&self, relative_path: &str) -> Option<NodeId> {
        self.tree
            .find_by_path(&format!("{}/{relative_path}", self.context.stack_name))
    }

    pub fn synthesize(&self) -> StackManifest {
        let mut tags = vec![
            ("Environment".to_string(), self.context.environment.clone()),
            ("Project".to_string(), self.context.resource_prefix.clone()),
        ];
        tags.extend(
            self.context
                .tags
                .iter()
                .map(|(key, value)| (key.clone(), value.clone())),
        );

        StackManifest {
            stack_name: self.context.stack_name.clone(),
            environment: self.context.environment.clone(),
            account: self.context.account.clone(),
            region: self.context.region.clone(),
            context_fingerprint: self.context.fingerprint(),
            tags,
            resources: self.tree.to_manifest(),
            deployment_order: self
                .deployment_order
                .iter()
                .filter(|node| self.tree.node(**node).kind.is_resource())
                .map(|node| self.tree.path(*node))
                .collect(),
            suppression_report: self.suppression_report.clone(),
        }
    }
}

struct Function {
    function: NodeId,
    role: NodeId,
    policy: NodeId,
}

struct Declarer<'a> {
    tree: &'a mut ConstructTree,
    context: &'a DeploymentContext,
}

impl Declarer<'_> {
    fn root(&self) -> NodeId {
        self.tree.root()
    }

    /// An L2-style construct `id` holding a single `Resource` child.
    fn resource(
        &mut self,
        parent: NodeId,
        id: &str,
        kind: ResourceKind,
        properties: Value,
    ) -> Result<NodeId, ConstructError> {
        let construct = self.tree.add(parent, id, ResourceKind::Construct)?;
        let resource = self.tree.add(construct, "Resource", kind)?;
        self.set_properties(resource, properties);
        Ok(resource)
    }

    fn set_properties(&mut self, node: NodeId, properties: Value) {
        if let Value::Object(entries) = properties {
            for (key, value) in entries {
                self.tree.set_property(node, key, value);
            }
        }
    }

    fn reference(&mut self, from: NodeId, to: NodeId) -> Result<Value, ConstructError> {
        self.tree.add_dependency(from, to)?;
        Ok(json!({ "Ref": self.tree.logical_id(to) }))
    }

    fn attribute(&mut self, from: NodeId, to: NodeId, name: &str) -> Result<Value, ConstructError> {
        self.tree.add_dependency(from, to)?;
        Ok(json!({ "Fn::GetAtt": [self.tree.logical_id(to), name] }))
    }

    fn name(&self, name: &str, family: ResourceFamily) -> String {
        resource_name(
            &self.context.resource_prefix,
            &self.context.environment,
            name,
            family,
        )
    }

    fn function(
        &mut self,
        parent: NodeId,
        id: &str,
        runtime: &str,
        handler: &str,
        description: &str,
    ) -> Result<Function, ConstructError> {
        let base_name = if parent == self.root() {
            kebab_case(id)
        } else {
            format!("{}-{}", kebab_case(&self.tree.node(parent).id), kebab_case(id))
        };
        let construct = self.tree.add(parent, id, ResourceKind::Construct)?;
        let service_role = self.tree.add(construct, "ServiceRole", ResourceKind::Construct)?;
        let role = self.tree.add(service_role, "Resource", ResourceKind::Role)?;
        self.set_properties(
            role,
            json!({
                "AssumeRolePolicyDocument": assume_role_policy("lambda.amazonaws.com"),
                "ManagedPolicyArns": [
                    "arn:aws:iam::aws:policy/service-role/AWSLambdaBasicExecutionRole"
                ],
            }),
        );

        let default_policy = self
            .tree
            .add(service_role, "DefaultPolicy", ResourceKind::Construct)?;
        let policy = self.tree.add(default_policy, "Resource", ResourceKind::Policy)?;
        let role_ref = self.reference(policy, role)?;
        self.set_properties(
            policy,
            json!({
                "PolicyDocument": {"Version": "2012-10-17", "Statement": []},
                "Roles": [role_ref],
            }),
        );

        let function = self.tree.add(
            construct,
            "Resource",
            ResourceKind::Function {
                handler: handler.to_string(),
                runtime: runtime.to_string(),
            },
        )?;
        let role_arn = self.attribute(function, role, "Arn")?;
        self.tree.add_dependency(function, policy)?;
        self.set_properties(
            function,
            json!({
                "FunctionName": function_name(
                    &self.context.resource_prefix,
                    &self.context.environment,
                    &base_name,
                ),
                "Description": description,
                "Runtime": runtime,
                "Handler": handler,
                "Role": role_arn,
                "Architectures": ["arm64"],
                "Timeout": 900,
                "MemorySize": 256,
            }),
        );

        Ok(Function {
            function,
            role,
            policy,
        })
    }

    fn grant(&mut self, policy: NodeId, actions: &[&str], resources: Value) {
        let statement = json!({
            "Effect": "Allow",
            "Action": actions,
            "Resource": resources,
        });
        if let Some(Value::Array(statements)) = self
            .tree
            .node_mut(policy)
            .properties
            .get_mut("PolicyDocument")
            .and_then(|document| document.get_mut("Statement"))
        {
            statements.push(statement);
        }
    }

    fn set_environment(&mut self, function: NodeId, variables: Value) {
        self.tree
            .set_property(function, "Environment", json!({ "Variables": variables }));
    }

    /// Custom-resource provider: a framework `onEvent` function in front of `handler`.
    fn provider(&mut self, id: &str, handler: NodeId) -> Result<NodeId, ConstructError> {
        let root = self.root();
        let provider = self.tree.add(root, id, ResourceKind::Provider)?;
        let on_event = self.function(
            provider,
            "framework-onEvent",
            PROVIDER_RUNTIME,
            "framework.onEvent",
            &format!("AWS CDK resource provider framework - onEvent ({id})"),
        )?;
        let handler_arn = self.attribute(on_event.function, handler, "Arn")?;
        self.set_environment(
            on_event.function,
            json!({ "USER_ON_EVENT_FUNCTION_ARN": handler_arn.clone() }),
        );
        self.grant(on_event.policy, &["lambda:InvokeFunction"], json!([handler_arn]));
        Ok(on_event.function)
    }

    fn custom_resource(
        &mut self,
        parent: NodeId,
        id: &str,
        resource_type: &str,
        service: NodeId,
        properties: Value,
    ) -> Result<NodeId, ConstructError> {
        let construct = self.tree.add(parent, id, ResourceKind::Construct)?;
        let resource = self.tree.add(
            construct,
            "Default",
            ResourceKind::CustomResource {
                resource_type: resource_type.to_string(),
            },
        )?;
        let service_token = self.attribute(resource, service, "Arn")?;
        self.tree.set_property(resource, "ServiceToken", service_token);
        self.set_properties(resource, properties);
        Ok(resource)
    }
}

fn declare_stack(
    tree: &mut ConstructTree,
    context: &DeploymentContext,
) -> Result<(), ConstructError> {
    let mut declare = Declarer { tree, context };
    let root = declare.root();

    // Storage
    let key = declare.resource(
        root,
        "EncryptionKey",
        ResourceKind::KmsKey,
        json!({"EnableKeyRotation": true, "Description": "Slack RAG assistant data key"}),
    )?;
    let access_logs = declare.resource(
        root,
        "AccessLogsBucket",
        ResourceKind::Bucket,
        json!({
            "BucketName": declare.name("access-logs", ResourceFamily::Bucket),
            "BucketEncryption": {"ServerSideEncryptionConfiguration": [
                {"ServerSideEncryptionByDefault": {"SSEAlgorithm": "AES256"}}
            ]},
            "PublicAccessBlockConfiguration": block_public_access(),
        }),
    )?;
    let documents = declare.resource(
        root,
        "DocumentBucket",
        ResourceKind::Bucket,
        json!({
            "BucketName": declare.name("documents", ResourceFamily::Bucket),
            "VersioningConfiguration": {"Status": "Enabled"},
            "PublicAccessBlockConfiguration": block_public_access(),
        }),
    )?;
    let key_arn = declare.attribute(documents, key, "Arn")?;
    let logs_ref = declare.reference(documents, access_logs)?;
    declare.tree.set_property(
        documents,
        "BucketEncryption",
        json!({"ServerSideEncryptionConfiguration": [
            {"ServerSideEncryptionByDefault": {"SSEAlgorithm": "aws:kms", "KMSMasterKeyID": key_arn}}
        ]}),
    );
    declare.tree.set_property(
        documents,
        "LoggingConfiguration",
        json!({"DestinationBucketName": logs_ref, "LogFilePrefix": "documents/"}),
    );

    let conversations = declare.resource(
        root,
        "ConversationTable",
        ResourceKind::Table,
        json!({
            "TableName": declare.name("conversations", ResourceFamily::Table),
            "BillingMode": "PAY_PER_REQUEST",
            "KeySchema": [
                {"AttributeName": "thread_ts", "KeyType": "HASH"},
                {"AttributeName": "message_ts", "KeyType": "RANGE"}
            ],
            "TimeToLiveSpecification": {"AttributeName": "expires_at", "Enabled": true},
            "PointInTimeRecoverySpecification": {"PointInTimeRecoveryEnabled": true},
        }),
    )?;
    let table_key = declare.attribute(conversations, key, "Arn")?;
    declare.tree.set_property(
        conversations,
        "SSESpecification",
        json!({"SSEEnabled": true, "SSEType": "KMS", "KMSMasterKeyId": table_key}),
    );

    // Slack credentials and the event queue
    let secret = declare.resource(
        root,
        "SlackSecret",
        ResourceKind::Secret,
        json!({
            "Name": declare.name("slack", ResourceFamily::Secret),
            "SecretStringKeys": ["slackBotToken", "slackSigningSecret"],
        }),
    )?;
    let secret_key = declare.reference(secret, key)?;
    declare.tree.set_property(secret, "KmsKeyId", secret_key);

    let event_queue = declare.tree.add(root, "EventQueue", ResourceKind::Construct)?;
    let dead_letters = declare.resource(
        event_queue,
        "DeadLetterQueue",
        ResourceKind::Queue,
        json!({
            "QueueName": declare.name("events-dlq", ResourceFamily::Queue),
            "MessageRetentionPeriod": 1_209_600,
            "SqsManagedSseEnabled": true,
        }),
    )?;
    let queue = declare.tree.add(event_queue, "Resource", ResourceKind::Queue)?;
    let dlq_arn = declare.attribute(queue, dead_letters, "Arn")?;
    declare.set_properties(
        queue,
        json!({
            "QueueName": declare.name("events", ResourceFamily::Queue),
            "VisibilityTimeout": 960,
            "SqsManagedSseEnabled": true,
            "RedrivePolicy": {"deadLetterTargetArn": dlq_arn, "maxReceiveCount": 3},
        }),
    );

    // Slack-facing functions and API
    let event_handler = declare.function(
        root,
        "SlackEventHandler",
        APP_RUNTIME,
        "slack_events.handler",
        "Verifies Slack signatures and enqueues mention events",
    )?;
    let worker = declare.function(
        root,
        "SlackQueryWorker",
        APP_RUNTIME,
        "query_worker.handler",
        "Answers queued Slack questions with the knowledge base",
    )?;

    let api = declare.resource(
        root,
        "SlackEventsApi",
        ResourceKind::RestApi,
        json!({
            "Name": format!("{}-{}-slack-events", context.resource_prefix, context.environment),
            "EndpointConfiguration": {"Types": ["REGIONAL"]},
            "Routes": ["POST /slack/events"],
        }),
    )?;
    let handler_arn = declare.attribute(api, event_handler.function, "Arn")?;
    declare.tree.set_property(api, "Integration", json!({"Type": "AWS_PROXY", "Uri": handler_arn}));

    // Custom-resource handlers
    let delay_handler = declare.function(
        root,
        "DelayHandler",
        RUST_RUNTIME,
        RUST_HANDLER,
        "Waits for eventual consistency between dependent control planes",
    )?;
    let index_manager = declare.function(
        root,
        "IndexManager",
        RUST_RUNTIME,
        RUST_HANDLER,
        "Creates and deletes the OpenSearch Serverless vector index",
    )?;
    let index_handler = declare.function(
        root,
        "VectorIndexHandler",
        RUST_RUNTIME,
        RUST_HANDLER,
        "Custom resource front for the index manager",
    )?;
    let manager_arn = declare.attribute(index_handler.function, index_manager.function, "Arn")?;
    declare.set_environment(
        index_handler.function,
        json!({"INDEX_FUNCTION_NAME": manager_arn.clone()}),
    );
    declare.grant(index_handler.policy, &["lambda:InvokeFunction"], json!([manager_arn]));

    let delay_provider = declare.provider("DelayProvider", delay_handler.function)?;
    let index_provider = declare.provider("VectorIndexProvider", index_handler.function)?;

    // Vector store
    let vector_store = declare.tree.add(root, "VectorStore", ResourceKind::Construct)?;
    let collection = collection_name(&context.resource_prefix, &context.environment);
    let encryption_policy = declare.resource(
        vector_store,
        "EncryptionPolicy",
        ResourceKind::SecurityPolicy {
            policy_type: "encryption".to_string(),
        },
        json!({
            "Name": format!("{collection}-enc"),
            "Type": "encryption",
            "Policy": json!({
                "Rules": [{"ResourceType": "collection", "Resource": [format!("collection/{collection}")]}],
                "AWSOwnedKey": true,
            }).to_string(),
        }),
    )?;
    let network_policy = declare.resource(
        vector_store,
        "NetworkPolicy",
        ResourceKind::SecurityPolicy {
            policy_type: "network".to_string(),
        },
        json!({
            "Name": format!("{collection}-net"),
            "Type": "network",
            "Policy": json!([{
                "Rules": [
                    {"ResourceType": "collection", "Resource": [format!("collection/{collection}")]},
                    {"ResourceType": "dashboard", "Resource": [format!("collection/{collection}")]}
                ],
                "AllowFromPublic": true,
            }]).to_string(),
        }),
    )?;
    let collection_node = declare.resource(
        vector_store,
        "Collection",
        ResourceKind::SearchCollection,
        json!({"Name": collection.clone(), "Type": "VECTORSEARCH", "StandbyReplicas": "DISABLED"}),
    )?;
    declare.tree.add_dependency(collection_node, encryption_policy)?;
    declare.tree.add_dependency(collection_node, network_policy)?;

    let knowledge_base_role = declare.resource(
        root,
        "KnowledgeBaseRole",
        ResourceKind::Role,
        json!({"AssumeRolePolicyDocument": assume_role_policy("bedrock.amazonaws.com")}),
    )?;

    let data_access_policy = declare.resource(
        vector_store,
        "DataAccessPolicy",
        ResourceKind::AccessPolicy,
        json!({"Name": format!("{collection}-access"), "Type": "data"}),
    )?;
    let manager_role_arn = declare.attribute(data_access_policy, index_manager.role, "Arn")?;
    let kb_role_arn = declare.attribute(data_access_policy, knowledge_base_role, "Arn")?;
    declare.tree.add_dependency(data_access_policy, index_manager.function)?;
    // The policy is a JSON string, so role ARNs go in through Fn::Sub.
    let access_rules = json!([{
        "Rules": [
            {"ResourceType": "index", "Resource": [format!("index/{collection}/*")],
             "Permission": ["aoss:CreateIndex", "aoss:DeleteIndex", "aoss:DescribeIndex",
                            "aoss:ReadDocument", "aoss:WriteDocument", "aoss:UpdateIndex"]},
            {"ResourceType": "collection", "Resource": [format!("collection/{collection}")],
             "Permission": ["aoss:DescribeCollectionItems", "aoss:CreateCollectionItems",
                            "aoss:UpdateCollectionItems"]}
        ],
        "Principal": ["${IndexManagerRoleArn}", "${KnowledgeBaseRoleArn}"],
    }]);
    declare.tree.set_property(
        data_access_policy,
        "Policy",
        json!({"Fn::Sub": [
            access_rules.to_string(),
            {"IndexManagerRoleArn": manager_role_arn, "KnowledgeBaseRoleArn": kb_role_arn},
        ]}),
    );

    let collection_arn = declare.attribute(index_manager.policy, collection_node, "Arn")?;
    declare.grant(index_manager.policy, &["aoss:APIAccessAll"], json!([collection_arn]));

    let collection_wait = declare.custom_resource(
        vector_store,
        "CollectionReadyWait",
        DELAY_RESOURCE_TYPE,
        delay_provider,
        json!({
            WAIT_SECONDS_PROPERTY: context.collection_ready_wait_seconds,
            DESCRIPTION_PROPERTY: "Wait for the collection's data access policy to propagate",
        }),
    )?;
    declare.tree.add_dependency(collection_wait, collection_node)?;
    declare.tree.add_dependency(collection_wait, data_access_policy)?;

    let vector_index = declare.custom_resource(
        vector_store,
        "VectorIndex",
        VECTOR_INDEX_RESOURCE_TYPE,
        index_provider,
        json!({
            COLLECTION_NAME_PROPERTY: collection.clone(),
            INDEX_NAME_PROPERTY: context.vector_index_name.clone(),
            DIMENSIONS_PROPERTY: context.embedding_dimensions,
            VECTOR_FIELD_PROPERTY: DEFAULT_VECTOR_FIELD,
            TEXT_FIELD_PROPERTY: DEFAULT_TEXT_FIELD,
            METADATA_FIELD_PROPERTY: DEFAULT_METADATA_FIELD,
        }),
    )?;
    let endpoint = declare.attribute(vector_index, collection_node, "CollectionEndpoint")?;
    declare.tree.set_property(vector_index, ENDPOINT_PROPERTY, endpoint);
    declare.tree.add_dependency(vector_index, collection_wait)?;

    let index_wait = declare.custom_resource(
        vector_store,
        "IndexReadyWait",
        DELAY_RESOURCE_TYPE,
        delay_provider,
        json!({
            WAIT_SECONDS_PROPERTY: context.index_ready_wait_seconds,
            DESCRIPTION_PROPERTY: "Wait for the vector index to become queryable",
        }),
    )?;
    declare.tree.add_dependency(index_wait, vector_index)?;

    // Knowledge base
    let region = context.region.as_deref();
    let embedding_model_arn = foundation_model_arn(region, &context.embedding_model_id);
    let generation_model_arn = foundation_model_arn(region, &context.generation_model_id);

    let kb_policy = declare.resource(
        root,
        "KnowledgeBasePolicy",
        ResourceKind::Policy,
        json!({"PolicyDocument": {"Version": "2012-10-17", "Statement": []}}),
    )?;
    let kb_role_ref = declare.reference(kb_policy, knowledge_base_role)?;
    declare.tree.set_property(kb_policy, "Roles", json!([kb_role_ref]));
    let documents_arn = declare.attribute(kb_policy, documents, "Arn")?;
    let kb_collection_arn = declare.attribute(kb_policy, collection_node, "Arn")?;
    declare.grant(kb_policy, &["bedrock:InvokeModel"], json!([embedding_model_arn.clone()]));
    declare.grant(
        kb_policy,
        &["s3:GetObject", "s3:ListBucket"],
        json!([documents_arn.clone(), {"Fn::Join": ["", [documents_arn, "/*"]]}]),
    );
    declare.grant(kb_policy, &["aoss:APIAccessAll"], json!([kb_collection_arn]));

    let knowledge_base = declare.resource(
        root,
        "KnowledgeBase",
        ResourceKind::KnowledgeBase,
        json!({
            "Name": declare.name("docs", ResourceFamily::KnowledgeBase),
            "KnowledgeBaseConfiguration": {
                "Type": "VECTOR",
                "VectorKnowledgeBaseConfiguration": {"EmbeddingModelArn": embedding_model_arn},
            },
        }),
    )?;
    let kb_role = declare.attribute(knowledge_base, knowledge_base_role, "Arn")?;
    let storage_collection = declare.attribute(knowledge_base, collection_node, "Arn")?;
    declare.set_properties(
        knowledge_base,
        json!({
            "RoleArn": kb_role,
            "StorageConfiguration": {
                "Type": "OPENSEARCH_SERVERLESS",
                "OpensearchServerlessConfiguration": {
                    "CollectionArn": storage_collection,
                    "VectorIndexName": context.vector_index_name.clone(),
                    "FieldMapping": {
                        "VectorField": DEFAULT_VECTOR_FIELD,
                        "TextField": DEFAULT_TEXT_FIELD,
                        "MetadataField": DEFAULT_METADATA_FIELD,
                    },
                },
            },
        }),
    );
    declare.tree.add_dependency(knowledge_base, index_wait)?;
    declare.tree.add_dependency(knowledge_base, kb_policy)?;

    let data_source = declare.resource(
        root,
        "DocumentDataSource",
        ResourceKind::DataSource,
        json!({
            "Name": declare.name("documents", ResourceFamily::KnowledgeBase),
            "VectorIngestionConfiguration": {
                "ChunkingConfiguration": {
                    "ChunkingStrategy": "FIXED_SIZE",
                    "FixedSizeChunkingConfiguration": {"MaxTokens": 512, "OverlapPercentage": 20},
                },
            },
        }),
    )?;
    let kb_id = declare.reference(data_source, knowledge_base)?;
    let source_bucket = declare.attribute(data_source, documents, "Arn")?;
    declare.set_properties(
        data_source,
        json!({
            "KnowledgeBaseId": kb_id,
            "DataSourceConfiguration": {"Type": "S3", "S3Configuration": {"BucketArn": source_bucket}},
        }),
    );

    // Generation controls
    let guardrail = if context.guardrail.enabled {
        let filter = |kind: &str| json!({"Type": kind, "InputStrength": "HIGH", "OutputStrength": "HIGH"});
        Some(declare.resource(
            root,
            "Guardrail",
            ResourceKind::Guardrail,
            json!({
                "Name": declare.name("assistant", ResourceFamily::Guardrail),
                "BlockedInputMessaging": context.guardrail.blocked_input_messaging.clone(),
                "BlockedOutputsMessaging": context.guardrail.blocked_outputs_messaging.clone(),
                "ContentPolicyConfig": {"FiltersConfig": [
                    filter("HATE"), filter("INSULTS"), filter("SEXUAL"), filter("VIOLENCE"), filter("MISCONDUCT"),
                    {"Type": "PROMPT_ATTACK", "InputStrength": "HIGH", "OutputStrength": "NONE"}
                ]},
            }),
        )?)
    } else {
        None
    };

    let prompt = declare.resource(
        root,
        "QueryPrompt",
        ResourceKind::Prompt,
        json!({
            "Name": declare.name("query", ResourceFamily::Prompt),
            "DefaultVariant": "default",
            "Variants": [{
                "Name": "default",
                "TemplateType": "TEXT",
                "ModelId": context.generation_model_id.clone(),
                "TemplateConfiguration": {"Text": {
                    "Text": "Answer the Slack question using only the search results.\n\n$search_results$\n\nQuestion: {{question}}",
                    "InputVariables": [{"Name": "question"}],
                }},
            }],
        }),
    )?;

    // Wiring the Slack functions
    let secret_arn = declare.reference(event_handler.function, secret)?;
    let queue_url = declare.reference(event_handler.function, queue)?;
    declare.set_environment(
        event_handler.function,
        json!({"SLACK_SECRET_ARN": secret_arn.clone(), "EVENT_QUEUE_URL": queue_url}),
    );
    let queue_arn = declare.attribute(event_handler.policy, queue, "Arn")?;
    declare.grant(event_handler.policy, &["sqs:SendMessage"], json!([queue_arn.clone()]));
    declare.grant(
        event_handler.policy,
        &["secretsmanager:GetSecretValue"],
        json!([secret_arn.clone()]),
    );

    let worker_secret = declare.reference(worker.function, secret)?;
    let table_name = declare.reference(worker.function, conversations)?;
    let kb_ref = declare.reference(worker.function, knowledge_base)?;
    let prompt_arn = declare.attribute(worker.function, prompt, "Arn")?;
    let mut worker_env = json!({
        "SLACK_SECRET_ARN": worker_secret,
        "CONVERSATION_TABLE": table_name,
        "KNOWLEDGE_BASE_ID": kb_ref,
        "MODEL_ARN": generation_model_arn.clone(),
        "PROMPT_ARN": prompt_arn,
    });
    if let Some(guardrail) = guardrail {
        let guardrail_id = declare.attribute(worker.function, guardrail, "GuardrailId")?;
        worker_env["GUARDRAIL_ID"] = guardrail_id;
        let guardrail_arn = declare.attribute(worker.policy, guardrail, "GuardrailArn")?;
        declare.grant(worker.policy, &["bedrock:ApplyGuardrail"], json!([guardrail_arn]));
    }
    declare.set_environment(worker.function, worker_env);
    let table_arn = declare.attribute(worker.policy, conversations, "Arn")?;
    let kb_arn = declare.attribute(worker.policy, knowledge_base, "KnowledgeBaseArn")?;
    declare.grant(
        worker.policy,
        &["dynamodb:GetItem", "dynamodb:PutItem", "dynamodb:Query"],
        json!([table_arn]),
    );
    declare.grant(
        worker.policy,
        &["bedrock:Retrieve", "bedrock:RetrieveAndGenerate"],
        json!([kb_arn]),
    );
    declare.grant(worker.policy, &["bedrock:InvokeModel"], json!([generation_model_arn]));
    declare.grant(worker.policy, &["sqs:ReceiveMessage", "sqs:DeleteMessage"], json!([queue_arn]));
    declare.grant(worker.policy, &["secretsmanager:GetSecretValue"], json!([secret_arn]));

    // Model invocation logging
    if context.invocation_logging {
        let logging = declare.tree.add(root, "InvocationLogging", ResourceKind::Construct)?;
        let log_group = declare.resource(
            logging,
            "LogGroup",
            ResourceKind::LogGroup,
            json!({
                "LogGroupName": format!("/{}/{}/bedrock-invocations", context.resource_prefix, context.environment),
                "RetentionInDays": context.log_retention_days,
            }),
        )?;
        let logging_role = declare.resource(
            logging,
            "DeliveryRole",
            ResourceKind::Role,
            json!({"AssumeRolePolicyDocument": assume_role_policy("bedrock.amazonaws.com")}),
        )?;
        let logging_handler = declare.function(
            root,
            "InvocationLoggingHandler",
            RUST_RUNTIME,
            RUST_HANDLER,
            "Configures Bedrock model invocation logging",
        )?;
        declare.grant(
            logging_handler.policy,
            &[
                "bedrock:PutModelInvocationLoggingConfiguration",
                "bedrock:DeleteModelInvocationLoggingConfiguration",
            ],
            json!(["*"]),
        );
        let delivery_role_arn = declare.attribute(logging_handler.policy, logging_role, "Arn")?;
        declare.grant(logging_handler.policy, &["iam:PassRole"], json!([delivery_role_arn]));

        let logging_provider =
            declare.provider("InvocationLoggingProvider", logging_handler.function)?;
        let resource = declare.custom_resource(
            logging,
            "Configuration",
            INVOCATION_LOGGING_RESOURCE_TYPE,
            logging_provider,
            json!({
                "KeyPrefix": "bedrock-invocations/",
                "TextDataDelivery": true,
                "ImageDataDelivery": false,
                "EmbeddingDataDelivery": true,
            }),
        )?;
        let group_name = declare.reference(resource, log_group)?;
        let role_arn = declare.attribute(resource, logging_role, "Arn")?;
        let bucket_name = declare.reference(resource, access_logs)?;
        declare.set_properties(
            resource,
            json!({"LogGroupName": group_name, "RoleArn": role_arn, "BucketName": bucket_name}),
        );
    }

    Ok(())
}

fn assume_role_policy(service: &str) -> Value {
    json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Effect": "Allow",
            "Principal": {"Service": service},
            "Action": "sts:AssumeRole",
        }],
    })
}

fn block_public_access() -> Value {
    json!({
        "BlockPublicAcls": true,
        "BlockPublicPolicy": true,
        "IgnorePublicAcls": true,
        "RestrictPublicBuckets": true,
    })
}

fn kebab_case(id: &str) -> String {
    let mut out = String::with_capacity(id.len() + 4);
    for (index, ch) in id.chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if index > 0 {
                out.push('-');
            }
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

/// Compliance suppressions for the stack. Paths are relative to the stack id.
pub fn default_suppressions(context: &DeploymentContext) -> Vec<SuppressionRule> {
    let stack = &context.stack_name;
    let managed_policy = || {
        vec![NagRule::new(
            "AwsSolutions-IAM4",
            "AWSLambdaBasicExecutionRole only grants CloudWatch Logs writes",
        )]
    };

    vec![
        SuppressionRule::path_contains("ServiceRole/Resource", managed_policy()).all_matches(),
        SuppressionRule::path_contains(
            "framework-onEvent",
            vec![
                NagRule::new("AwsSolutions-L1", "Provider framework pins its own Node.js runtime"),
                NagRule::new(
                    "AwsSolutions-IAM5",
                    "Provider framework invokes handler versions through a wildcard",
                ),
            ],
        )
        .all_matches(),
        SuppressionRule::path(
            format!("{stack}/AccessLogsBucket/Resource"),
            vec![NagRule::new("AwsSolutions-S1", "This bucket is the access log destination")],
        ),
        SuppressionRule::path(
            format!("{stack}/EventQueue/DeadLetterQueue/Resource"),
            vec![NagRule::new("AwsSolutions-SQS3", "This queue is the dead-letter queue")],
        ),
        SuppressionRule::path(
            format!("{stack}/SlackEventsApi/Resource"),
            vec![
                NagRule::new("AwsSolutions-APIG2", "Slack payloads are validated by signature"),
                NagRule::new(
                    "AwsSolutions-APIG4",
                    "Requests are authenticated with the Slack signing secret",
                ),
                NagRule::new("AwsSolutions-COG4", "Slack cannot present Cognito tokens"),
            ],
        ),
        SuppressionRule::path(
            format!("{stack}/SlackSecret/Resource"),
            vec![NagRule::new(
                "AwsSolutions-SMG4",
                "Slack tokens are rotated from the Slack admin console",
            )],
        ),
        SuppressionRule::path(
            format!("{stack}/SlackQueryWorker/ServiceRole/DefaultPolicy/Resource"),
            vec![NagRule::new(
                "AwsSolutions-IAM5",
                "Foundation model ARNs are account-less and region-scoped",
            )],
        ),
        SuppressionRule::path(
            format!("{stack}/KnowledgeBasePolicy/Resource"),
            vec![NagRule::new(
                "AwsSolutions-IAM5",
                "Knowledge base ingests every object in the document bucket",
            )],
        ),
        SuppressionRule::logical_id_contains(
            "InvocationLoggingHandlerServiceRoleDefaultPolicy",
            vec![NagRule::new(
                "AwsSolutions-IAM5",
                "Invocation logging configuration is an account-level API without resource ARNs",
            )],
        ),
    ]
}

/// Without a resolved region the ARN is left to CloudFormation's pseudo parameter.
fn foundation_model_arn(region: Option<&str>, model_id: &str) -> Value {
    match region {
        Some(region) => json!(format!("arn:aws:bedrock:{region}::foundation-model/{model_id}")),
        None => json!({
            "Fn::Sub": format!("arn:aws:bedrock:${{AWS::Region}}::foundation-model/{model_id}")
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::GuardrailContext;
    use crate::suppressions::is_suppressed;

    fn raw() -> RawContext {
        RawContext {
            slack_bot_token: Some("xoxb-test".to_string()),
            slack_signing_secret: Some("signing".to_string()),
            region: Some("us-east-1".to_string()),
            account: Some("123456789012".to_string()),
            ..RawContext::default()
        }
    }

    fn stack(raw: RawContext) -> SlackRagStack {
        let context =
            DeploymentContext::from_raw_with_env(raw, |_| None).expect("context should validate");
        SlackRagStack::from_context(context).expect("stack should build")
    }

    fn position(stack: &SlackRagStack, path: &str) -> usize {
        let manifest = stack.synthesize();
        manifest
            .deployment_order
            .iter()
            .position(|entry| entry == &format!("SlackRagStack/{path}"))
            .unwrap_or_else(|| panic!("{path} should be deployed"))
    }

    #[test]
    fn missing_bot_token_fails_before_any_resource_is_declared() {
        let error = SlackRagStack::build(RawContext {
            slack_bot_token: None,
            ..raw()
        })
        .expect_err("stack should not build");

        assert!(error
            .to_string()
            .contains("Missing required context variables"));
        assert!(matches!(error, StackError::Context(ContextError::MissingVariables(_))));
    }

    #[test]
    fn knowledge_base_waits_for_index_readiness() {
        let stack = stack(raw());

        let collection_wait = position(&stack, "VectorStore/CollectionReadyWait/Default");
        let index = position(&stack, "VectorStore/VectorIndex/Default");
        let index_wait = position(&stack, "VectorStore/IndexReadyWait/Default");
        let knowledge_base = position(&stack, "KnowledgeBase/Resource");

        assert!(collection_wait < index);
        assert!(index < index_wait);
        assert!(index_wait < knowledge_base);
    }

    #[test]
    fn vector_index_properties_match_knowledge_base_mapping() {
        let stack = stack(raw());
        let index = stack
            .find("VectorStore/VectorIndex/Default")
            .expect("index resource");
        let knowledge_base = stack.find("KnowledgeBase/Resource").expect("knowledge base");

        let index_props = &stack.tree.node(index).properties;
        let mapping = &stack.tree.node(knowledge_base).properties["StorageConfiguration"]
            ["OpensearchServerlessConfiguration"];
        assert_eq!(index_props[INDEX_NAME_PROPERTY], mapping["VectorIndexName"]);
        assert_eq!(index_props[VECTOR_FIELD_PROPERTY], mapping["FieldMapping"]["VectorField"]);
        assert_eq!(index_props[DIMENSIONS_PROPERTY], 1024);
        assert!(index_props.contains_key("ServiceToken"));
    }

    #[test]
    fn wait_resources_carry_context_wait_seconds() {
        let stack = stack(RawContext {
            index_ready_wait_seconds: Some(90),
            ..raw()
        });
        let wait = stack
            .find("VectorStore/IndexReadyWait/Default")
            .expect("wait resource");
        assert_eq!(stack.tree.node(wait).properties[WAIT_SECONDS_PROPERTY], 90);
    }

    #[test]
    fn provider_functions_all_receive_runtime_suppression() {
        let stack = stack(raw());
        for provider in ["DelayProvider", "VectorIndexProvider", "InvocationLoggingProvider"] {
            let on_event = stack
                .find(&format!("{provider}/framework-onEvent/Resource"))
                .expect("provider function");
            assert!(is_suppressed(&stack.tree, on_event, "AwsSolutions-L1"), "{provider}");
        }
        assert!(stack.suppression_report.missed.is_empty());
    }

    #[test]
    fn disabled_optional_resources_only_produce_warnings() {
        let stack = stack(RawContext {
            invocation_logging: Some(false),
            guardrail: Some(GuardrailContext {
                enabled: Some(false),
                ..GuardrailContext::default()
            }),
            ..raw()
        });

        assert!(stack.find("Guardrail/Resource").is_none());
        assert!(stack.find("InvocationLogging").is_none());
        assert_eq!(stack.suppression_report.missed.len(), 1);
        assert!(stack.suppression_report.missed[0].contains("InvocationLoggingHandler"));
    }

    #[test]
    fn manifest_never_contains_slack_secrets() {
        let stack = stack(raw());
        let manifest = serde_json::to_string(&stack.synthesize()).expect("manifest serializes");

        assert!(!manifest.contains("xoxb-test"));
        assert!(manifest.contains("Custom::VectorIndex"));
        assert!(manifest.contains("AwsSolutions-SMG4"));
    }

    #[test]
    fn provider_functions_get_distinct_names() {
        let stack = stack(raw());
        let name = |path: &str| {
            let node = stack.find(path).expect("function");
            stack.tree.node(node).properties["FunctionName"].clone()
        };

        assert_ne!(
            name("DelayProvider/framework-onEvent/Resource"),
            name("VectorIndexProvider/framework-onEvent/Resource")
        );
    }

    #[test]
    fn collection_policies_are_json_strings() {
        let stack = stack(raw());
        let policy = |path: &str| {
            let node = stack.find(path).expect("policy");
            stack.tree.node(node).properties["Policy"].clone()
        };

        assert!(policy("VectorStore/EncryptionPolicy/Resource").is_string());
        assert!(policy("VectorStore/NetworkPolicy/Resource").is_string());

        let data_access = policy("VectorStore/DataAccessPolicy/Resource");
        let template = data_access["Fn::Sub"][0].as_str().expect("template string");
        let rules: Value = serde_json::from_str(template).expect("template is JSON");
        assert_eq!(
            rules[0]["Principal"],
            json!(["${IndexManagerRoleArn}", "${KnowledgeBaseRoleArn}"])
        );
        let variables = &data_access["Fn::Sub"][1];
        assert!(variables["IndexManagerRoleArn"]["Fn::GetAtt"].is_array());
        assert!(variables["KnowledgeBaseRoleArn"]["Fn::GetAtt"].is_array());
    }

    #[test]
    fn model_arns_fall_back_to_the_region_pseudo_parameter() {
        let embedding_arn = |stack: &SlackRagStack| {
            let node = stack.find("KnowledgeBase/Resource").expect("knowledge base");
            stack.tree.node(node).properties["KnowledgeBaseConfiguration"]
                ["VectorKnowledgeBaseConfiguration"]["EmbeddingModelArn"]
                .clone()
        };

        let regional = stack(raw());
        assert_eq!(
            embedding_arn(&regional),
            json!("arn:aws:bedrock:us-east-1::foundation-model/amazon.titan-embed-text-v2:0")
        );

        let unresolved = stack(RawContext {
            region: None,
            ..raw()
        });
        assert_eq!(
            embedding_arn(&unresolved),
            json!({
                "Fn::Sub":
                    "arn:aws:bedrock:${AWS::Region}::foundation-model/amazon.titan-embed-text-v2:0"
            })
        );
    }

    #[test]
    fn kebab_case_splits_on_capitals() {
        assert_eq!(kebab_case("SlackQueryWorker"), "slack-query-worker");
        assert_eq!(kebab_case("framework-onEvent"), "framework-on-event");
    }
}
