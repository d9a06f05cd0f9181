//! Stack types — resource descriptors, stack props, lock, plan, and provenance.
//!
//! Every descriptor derives Serialize/Deserialize so a built stack can be dumped
//! and reloaded as YAML. Descriptors reference each other by construct id.

use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Stack properties
// ============================================================================

/// Stack-level properties supplied by the caller (`stack.yaml` + CLI flags).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct StackProps {
    /// Stack name (also the template file stem)
    #[serde(default = "default_stack_name")]
    pub stack_name: String,

    /// Optional template description
    #[serde(default)]
    pub description: Option<String>,

    /// Deployment target
    #[serde(default)]
    pub env: Environment,

    /// Tags applied to every taggable resource (order-preserving)
    #[serde(default)]
    pub tags: IndexMap<String, String>,
}

impl Default for StackProps {
    fn default() -> Self {
        Self {
            stack_name: default_stack_name(),
            description: None,
            env: Environment::default(),
            tags: IndexMap::new(),
        }
    }
}

fn default_stack_name() -> String {
    "StreamlitAppStack".to_string()
}

/// Account/region context. Both unset means an environment-agnostic stack.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Environment {
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
}

// ============================================================================
// Network
// ============================================================================

/// Subnet placement class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubnetType {
    Public,
    PrivateWithEgress,
    PrivateIsolated,
}

impl fmt::Display for SubnetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Public => write!(f, "public"),
            Self::PrivateWithEgress => write!(f, "private_with_egress"),
            Self::PrivateIsolated => write!(f, "private_isolated"),
        }
    }
}

/// One subnet group, instantiated once per availability zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubnetConfiguration {
    pub name: String,
    pub subnet_type: SubnetType,
    pub cidr_mask: u8,
}

/// Virtual network with its subnet layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    pub id: String,
    pub vpc_name: String,
    pub cidr: String,
    pub max_azs: u8,
    pub nat_gateways: u8,
    pub create_internet_gateway: bool,
    pub subnet_configuration: Vec<SubnetConfiguration>,
}

impl Network {
    /// Whether any subnet group of this type is declared.
    pub fn provides(&self, subnet_type: SubnetType) -> bool {
        self.subnet_configuration
            .iter()
            .any(|s| s.subnet_type == subnet_type)
    }
}

/// Query over a network's subnets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubnetSelection {
    pub subnet_type: SubnetType,
}

// ============================================================================
// Security group
// ============================================================================

/// IP protocol of an ingress rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    Tcp,
    Udp,
    All,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => write!(f, "tcp"),
            Self::Udp => write!(f, "udp"),
            Self::All => write!(f, "-1"),
        }
    }
}

/// Protocol plus an inclusive port range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    pub protocol: Protocol,
    pub from: u16,
    pub to: u16,
}

impl Port {
    /// A single TCP port.
    pub fn tcp(port: u16) -> Self {
        Self {
            protocol: Protocol::Tcp,
            from: port,
            to: port,
        }
    }

    /// An inclusive TCP port range.
    pub fn tcp_range(from: u16, to: u16) -> Self {
        Self {
            protocol: Protocol::Tcp,
            from,
            to,
        }
    }

    /// Whether `port` falls inside this range.
    pub fn contains(&self, port: u16) -> bool {
        self.from <= port && port <= self.to
    }
}

/// Traffic source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Peer {
    AnyIpv4,
    Ipv4(String),
}

impl Peer {
    pub fn any_ipv4() -> Self {
        Self::AnyIpv4
    }

    pub fn cidr(&self) -> &str {
        match self {
            Self::AnyIpv4 => "0.0.0.0/0",
            Self::Ipv4(cidr) => cidr,
        }
    }
}

/// An allow rule for inbound traffic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressRule {
    pub peer: Peer,
    pub port: Port,
    pub description: String,
}

/// Stateful firewall bound to a network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityGroup {
    pub id: String,
    pub group_name: String,
    /// Construct id of the owning network
    pub network: String,
    pub allow_all_outbound: bool,
    pub ingress: Vec<IngressRule>,
}

impl SecurityGroup {
    pub fn add_ingress_rule(&mut self, peer: Peer, port: Port, description: impl Into<String>) {
        self.ingress.push(IngressRule {
            peer,
            port,
            description: description.into(),
        });
    }

    /// Whether some rule admits TCP traffic on `port`.
    pub fn allows_tcp(&self, port: u16) -> bool {
        self.ingress
            .iter()
            .any(|r| r.port.protocol == Protocol::Tcp && r.port.contains(port))
    }
}

// ============================================================================
// IAM
// ============================================================================

/// Provider-maintained permission bundle, referenced by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedPolicy {
    pub name: String,
}

impl ManagedPolicy {
    pub fn from_aws_managed_policy_name(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

/// Identity assumable by a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: String,
    /// Service principal, e.g. `ec2.amazonaws.com`
    pub assumed_by: String,
    pub managed_policies: Vec<ManagedPolicy>,
}

impl Role {
    pub fn add_managed_policy(&mut self, policy: ManagedPolicy) {
        self.managed_policies.push(policy);
    }
}

// ============================================================================
// Boot script
// ============================================================================

/// Commands run once at first boot, in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserData {
    pub shebang: String,
    pub commands: Vec<String>,
}

impl UserData {
    pub fn for_linux() -> Self {
        Self {
            shebang: "#!/bin/bash".to_string(),
            commands: Vec::new(),
        }
    }

    pub fn add_commands<I, S>(&mut self, commands: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.commands.extend(commands.into_iter().map(Into::into));
    }

    /// Render as a script: shebang line, then one command per line.
    pub fn render(&self) -> String {
        let mut lines = Vec::with_capacity(self.commands.len() + 1);
        lines.push(self.shebang.as_str());
        lines.extend(self.commands.iter().map(String::as_str));
        lines.join("\n")
    }
}

// ============================================================================
// Compute
// ============================================================================

/// Instance family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceClass {
    T2,
    T3,
    T3a,
    M5,
    C5,
}

impl fmt::Display for InstanceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::T2 => write!(f, "t2"),
            Self::T3 => write!(f, "t3"),
            Self::T3a => write!(f, "t3a"),
            Self::M5 => write!(f, "m5"),
            Self::C5 => write!(f, "c5"),
        }
    }
}

/// Instance size within a family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceSize {
    Nano,
    Micro,
    Small,
    Medium,
    Large,
    Xlarge,
}

impl fmt::Display for InstanceSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nano => write!(f, "nano"),
            Self::Micro => write!(f, "micro"),
            Self::Small => write!(f, "small"),
            Self::Medium => write!(f, "medium"),
            Self::Large => write!(f, "large"),
            Self::Xlarge => write!(f, "xlarge"),
        }
    }
}

/// Class + size, displayed as `t2.micro`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceType {
    pub class: InstanceClass,
    pub size: InstanceSize,
}

impl InstanceType {
    pub fn of(class: InstanceClass, size: InstanceSize) -> Self {
        Self { class, size }
    }
}

impl fmt::Display for InstanceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.class, self.size)
    }
}

/// Amazon Linux generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmazonLinuxGeneration {
    AmazonLinux2,
    AmazonLinux2023,
}

/// Machine image, resolved by the provisioning engine at deploy time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MachineImage {
    AmazonLinux { generation: AmazonLinuxGeneration },
}

impl MachineImage {
    /// Public SSM parameter holding the latest image id.
    pub fn ssm_parameter(&self) -> &'static str {
        match self {
            Self::AmazonLinux {
                generation: AmazonLinuxGeneration::AmazonLinux2,
            } => "/aws/service/ami-amazon-linux-latest/amzn2-ami-hvm-x86_64-gp2",
            Self::AmazonLinux {
                generation: AmazonLinuxGeneration::AmazonLinux2023,
            } => "/aws/service/ami-amazon-linux-latest/al2023-ami-kernel-default-x86_64",
        }
    }
}

/// A compute node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    pub instance_name: String,
    pub network: String,
    pub subnet_selection: SubnetSelection,
    pub instance_type: InstanceType,
    pub machine_image: MachineImage,
    pub security_group: String,
    pub role: String,
    pub associate_public_ip_address: bool,
    #[serde(default)]
    pub user_data: Option<UserData>,
}

// ============================================================================
// Resource graph
// ============================================================================

/// Resource kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Network,
    SecurityGroup,
    Role,
    Instance,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::SecurityGroup => write!(f, "security_group"),
            Self::Role => write!(f, "role"),
            Self::Instance => write!(f, "instance"),
        }
    }
}

/// One node of the stack graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StackResource {
    Network(Network),
    SecurityGroup(SecurityGroup),
    Role(Role),
    Instance(Instance),
}

impl StackResource {
    pub fn id(&self) -> &str {
        match self {
            Self::Network(n) => &n.id,
            Self::SecurityGroup(sg) => &sg.id,
            Self::Role(r) => &r.id,
            Self::Instance(i) => &i.id,
        }
    }

    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Network(_) => ResourceKind::Network,
            Self::SecurityGroup(_) => ResourceKind::SecurityGroup,
            Self::Role(_) => ResourceKind::Role,
            Self::Instance(_) => ResourceKind::Instance,
        }
    }

    /// Construct ids this resource depends on.
    pub fn references(&self) -> Vec<&str> {
        match self {
            Self::Network(_) | Self::Role(_) => Vec::new(),
            Self::SecurityGroup(sg) => vec![sg.network.as_str()],
            Self::Instance(i) => vec![
                i.network.as_str(),
                i.security_group.as_str(),
                i.role.as_str(),
            ],
        }
    }
}

/// A declared stack: props plus resources in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stack {
    pub props: StackProps,
    pub resources: Vec<StackResource>,
}

impl Stack {
    pub fn new(props: StackProps) -> Self {
        Self {
            props,
            resources: Vec::new(),
        }
    }

    /// Register a resource, returning its handle (construct id).
    pub fn add(&mut self, resource: StackResource) -> String {
        let id = resource.id().to_string();
        self.resources.push(resource);
        id
    }

    pub fn get(&self, id: &str) -> Option<&StackResource> {
        self.resources.iter().find(|r| r.id() == id)
    }

    pub fn networks(&self) -> impl Iterator<Item = &Network> {
        self.resources.iter().filter_map(|r| match r {
            StackResource::Network(n) => Some(n),
            _ => None,
        })
    }

    pub fn security_groups(&self) -> impl Iterator<Item = &SecurityGroup> {
        self.resources.iter().filter_map(|r| match r {
            StackResource::SecurityGroup(sg) => Some(sg),
            _ => None,
        })
    }

    pub fn roles(&self) -> impl Iterator<Item = &Role> {
        self.resources.iter().filter_map(|r| match r {
            StackResource::Role(role) => Some(role),
            _ => None,
        })
    }

    pub fn instances(&self) -> impl Iterator<Item = &Instance> {
        self.resources.iter().filter_map(|r| match r {
            StackResource::Instance(i) => Some(i),
            _ => None,
        })
    }
}

// ============================================================================
// Synthesized template
// ============================================================================

/// A CloudFormation template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Template {
    #[serde(rename = "AWSTemplateFormatVersion")]
    pub format_version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub metadata: serde_json::Value,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub parameters: IndexMap<String, serde_json::Value>,

    pub resources: IndexMap<String, TemplateResource>,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub outputs: IndexMap<String, serde_json::Value>,
}

/// One entry under `Resources`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TemplateResource {
    #[serde(rename = "Type")]
    pub resource_type: String,

    pub properties: serde_json::Value,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

/// Template output encoding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TemplateFormat {
    #[default]
    Json,
    Yaml,
}

impl TemplateFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Yaml => "yaml",
        }
    }
}

// ============================================================================
// State / Lock file
// ============================================================================

/// Per-stack state lock file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateLock {
    /// Schema version
    pub schema: String,

    /// Stack name
    pub stack: String,

    /// When the lock was generated
    pub generated_at: String,

    /// Generator version
    pub generator: String,

    /// Last written template, if any
    #[serde(default)]
    pub template: Option<TemplateRecord>,

    /// Per-resource state, keyed by logical id
    pub resources: IndexMap<String, ResourceLock>,
}

/// Where the synthesized template was written and what it hashed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateRecord {
    pub path: String,
    pub format: TemplateFormat,
    pub hash: String,
}

/// Per-resource lock entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLock {
    /// CloudFormation type, e.g. `AWS::EC2::Instance`
    #[serde(rename = "type")]
    pub resource_type: String,

    /// BLAKE3 hash of the synthesized resource body
    pub hash: String,
}

// ============================================================================
// Plan
// ============================================================================

/// Action to take on a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanAction {
    Create,
    Update,
    Destroy,
    NoOp,
}

impl fmt::Display for PlanAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "CREATE"),
            Self::Update => write!(f, "UPDATE"),
            Self::Destroy => write!(f, "DESTROY"),
            Self::NoOp => write!(f, "NO-OP"),
        }
    }
}

/// A single planned change.
#[derive(Debug, Clone)]
pub struct PlannedChange {
    pub logical_id: String,
    pub resource_type: String,
    pub action: PlanAction,
    pub description: String,
}

/// Full change plan for one stack.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub stack: String,
    pub changes: Vec<PlannedChange>,
    pub to_create: u32,
    pub to_update: u32,
    pub to_destroy: u32,
    pub unchanged: u32,
}

// ============================================================================
// Provenance events
// ============================================================================

/// Provenance event for the JSONL event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProvenanceEvent {
    SynthStarted {
        stack: String,
        run_id: String,
        generator_version: String,
    },
    ResourceSynthesized {
        stack: String,
        logical_id: String,
        resource_type: String,
        hash: String,
    },
    SynthCompleted {
        stack: String,
        run_id: String,
        resources: u32,
        template_hash: String,
        total_seconds: f64,
    },
    DriftDetected {
        stack: String,
        path: String,
        expected_hash: String,
        actual_hash: String,
    },
}

/// Timestamped event wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampedEvent {
    pub ts: String,
    #[serde(flatten)]
    pub event: ProvenanceEvent,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_props_defaults() {
        let props: StackProps = serde_yaml_ng::from_str("{}").unwrap();
        assert_eq!(props.stack_name, "StreamlitAppStack");
        assert!(props.env.account.is_none());
        assert!(props.tags.is_empty());
        assert_eq!(props, StackProps::default());
    }

    #[test]
    fn test_props_parse_tags_in_order() {
        let yaml = r#"
stack_name: Demo
env:
  region: ap-northeast-1
tags:
  team: web
  env: practice
"#;
        let props: StackProps = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(props.env.region.as_deref(), Some("ap-northeast-1"));
        let keys: Vec<_> = props.tags.keys().collect();
        assert_eq!(keys, vec!["team", "env"]);
    }

    #[test]
    fn test_instance_type_display() {
        let t = InstanceType::of(InstanceClass::T2, InstanceSize::Micro);
        assert_eq!(t.to_string(), "t2.micro");
        let t = InstanceType::of(InstanceClass::T3a, InstanceSize::Xlarge);
        assert_eq!(t.to_string(), "t3a.xlarge");
    }

    #[test]
    fn test_port_contains() {
        let p = Port::tcp_range(8501, 8510);
        assert!(p.contains(8501));
        assert!(p.contains(8510));
        assert!(!p.contains(8500));
        assert!(!p.contains(8511));
        assert!(Port::tcp(22).contains(22));
    }

    #[test]
    fn test_peer_cidr() {
        assert_eq!(Peer::any_ipv4().cidr(), "0.0.0.0/0");
        assert_eq!(Peer::Ipv4("1.2.3.4/32".into()).cidr(), "1.2.3.4/32");
    }

    #[test]
    fn test_protocol_display() {
        assert_eq!(Protocol::Tcp.to_string(), "tcp");
        assert_eq!(Protocol::All.to_string(), "-1");
    }

    #[test]
    fn test_user_data_render() {
        let mut ud = UserData::for_linux();
        ud.add_commands(["echo one", "echo two"]);
        assert_eq!(ud.render(), "#!/bin/bash\necho one\necho two");
    }

    #[test]
    fn test_machine_image_ssm_parameter() {
        let img = MachineImage::AmazonLinux {
            generation: AmazonLinuxGeneration::AmazonLinux2,
        };
        assert!(img.ssm_parameter().contains("amzn2-ami-hvm"));
    }

    #[test]
    fn test_stack_resource_references() {
        let sg = StackResource::SecurityGroup(SecurityGroup {
            id: "sg".into(),
            group_name: "web".into(),
            network: "Vpc".into(),
            allow_all_outbound: true,
            ingress: vec![],
        });
        assert_eq!(sg.references(), vec!["Vpc"]);
        assert_eq!(sg.kind(), ResourceKind::SecurityGroup);
        assert_eq!(sg.id(), "sg");
    }

    #[test]
    fn test_stack_resource_yaml_roundtrip() {
        let role = StackResource::Role(Role {
            id: "ec2Role".into(),
            assumed_by: "ec2.amazonaws.com".into(),
            managed_policies: vec![ManagedPolicy::from_aws_managed_policy_name("ReadOnlyAccess")],
        });
        let yaml = serde_yaml_ng::to_string(&role).unwrap();
        assert!(yaml.contains("kind: role"));
        let back: StackResource = serde_yaml_ng::from_str(&yaml).unwrap();
        assert_eq!(back, role);
    }

    #[test]
    fn test_security_group_allows_tcp() {
        let mut sg = SecurityGroup {
            id: "sg".into(),
            group_name: "web".into(),
            network: "Vpc".into(),
            allow_all_outbound: true,
            ingress: vec![],
        };
        sg.add_ingress_rule(Peer::any_ipv4(), Port::tcp(80), "http");
        assert!(sg.allows_tcp(80));
        assert!(!sg.allows_tcp(81));
    }

    #[test]
    fn test_plan_action_display() {
        assert_eq!(PlanAction::Create.to_string(), "CREATE");
        assert_eq!(PlanAction::NoOp.to_string(), "NO-OP");
    }

    #[test]
    fn test_provenance_event_serde() {
        let event = ProvenanceEvent::SynthStarted {
            stack: "S".to_string(),
            run_id: "r-abc".to_string(),
            generator_version: "0.3.0".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event\":\"synth_started\""));
        assert!(json.contains("\"run_id\":\"r-abc\""));
    }

    #[test]
    fn test_template_format_extension() {
        assert_eq!(TemplateFormat::Json.extension(), "json");
        assert_eq!(TemplateFormat::Yaml.extension(), "yaml");
    }
}
