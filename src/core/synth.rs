//! Template synthesis — render the stack graph as a CloudFormation template.
//!
//! Each declared resource expands into the low-level resources the
//! provisioning engine needs (a network becomes VPC, subnets, route tables,
//! gateway). Logical ids are derived from construct paths plus a short BLAKE3
//! suffix, so re-synthesizing identical input yields an identical template.

use super::cidr::{self, Ipv4Cidr};
use super::resolver;
use super::types::*;
use super::validate;
use crate::tripwire::hasher;
use indexmap::IndexMap;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};

const FORMAT_VERSION: &str = "2010-09-09";
const AMI_PARAMETER_TYPE: &str = "AWS::SSM::Parameter::Value<AWS::EC2::Image::Id>";

/// Logical id for a construct path: alphanumeric path + 8-char hash.
///
/// A trailing `Resource` component is dropped from the readable part so the
/// primary resource of a construct reads as the construct itself.
pub fn logical_id(path: &[&str]) -> String {
    let readable = match path {
        [head @ .., "Resource"] if !head.is_empty() => head,
        _ => path,
    };
    let human: String = readable
        .iter()
        .flat_map(|p| p.chars())
        .filter(char::is_ascii_alphanumeric)
        .collect();
    format!("{}{}", human, hasher::short_hash(&path.join("/")))
}

fn reference(logical: &str) -> Value {
    json!({ "Ref": logical })
}

fn get_att(logical: &str, attribute: &str) -> Value {
    json!({ "Fn::GetAtt": [logical, attribute] })
}

fn select_az(index: u8) -> Value {
    json!({ "Fn::Select": [index, { "Fn::GetAZs": "" }] })
}

fn alphanumeric(s: &str) -> String {
    s.chars().filter(char::is_ascii_alphanumeric).collect()
}

/// Stack tags plus an optional `Name`, sorted by key.
fn tags(props: &StackProps, name: Option<&str>) -> Value {
    let mut merged: BTreeMap<&str, &str> = props
        .tags
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    if let Some(name) = name {
        merged.insert("Name", name);
    }
    Value::Array(
        merged
            .into_iter()
            .map(|(k, v)| json!({ "Key": k, "Value": v }))
            .collect(),
    )
}

#[derive(Debug, Clone)]
struct SubnetRef {
    logical: String,
    subnet_type: SubnetType,
    az: u8,
}

#[derive(Debug, Clone)]
struct NetworkRef {
    vpc: String,
    subnets: Vec<SubnetRef>,
}

struct Synth<'a> {
    props: &'a StackProps,
    template: Template,
    networks: HashMap<String, NetworkRef>,
    security_groups: HashMap<String, String>,
    roles: HashMap<String, String>,
}

impl<'a> Synth<'a> {
    fn new(stack: &'a Stack) -> Self {
        let props = &stack.props;
        let mut metadata = serde_json::Map::new();
        metadata.insert(
            "Generator".to_string(),
            json!(format!("stackforge {}", env!("CARGO_PKG_VERSION"))),
        );
        metadata.insert("StackName".to_string(), json!(props.stack_name));
        if let Some(ref account) = props.env.account {
            metadata.insert("Account".to_string(), json!(account));
        }
        if let Some(ref region) = props.env.region {
            metadata.insert("Region".to_string(), json!(region));
        }

        Self {
            props,
            template: Template {
                format_version: FORMAT_VERSION.to_string(),
                description: props.description.clone(),
                metadata: Value::Object(metadata),
                parameters: IndexMap::new(),
                resources: IndexMap::new(),
                outputs: IndexMap::new(),
            },
            networks: HashMap::new(),
            security_groups: HashMap::new(),
            roles: HashMap::new(),
        }
    }

    fn emit(&mut self, logical: &str, resource_type: &str, properties: Value, depends_on: Vec<String>) -> Result<(), String> {
        if self.template.resources.contains_key(logical) {
            return Err(format!("logical id collision: {}", logical));
        }
        self.template.resources.insert(
            logical.to_string(),
            TemplateResource {
                resource_type: resource_type.to_string(),
                properties,
                depends_on,
            },
        );
        Ok(())
    }

    fn output(&mut self, name: String, description: &str, value: Value) {
        self.template.outputs.insert(
            name,
            json!({ "Description": description, "Value": value }),
        );
    }

    fn network(&mut self, net: &Network) -> Result<(), String> {
        let vpc_cidr = Ipv4Cidr::parse(&net.cidr)?;
        let blocks = cidr::allocate(&vpc_cidr, &validate::subnet_masks(net))?;

        let vpc = logical_id(&[net.id.as_str(), "Resource"]);
        self.emit(
            &vpc,
            "AWS::EC2::VPC",
            json!({
                "CidrBlock": net.cidr,
                "EnableDnsHostnames": true,
                "EnableDnsSupport": true,
                "InstanceTenancy": "default",
                "Tags": tags(self.props, Some(net.vpc_name.as_str())),
            }),
            vec![],
        )?;

        let gateway = if net.create_internet_gateway {
            let igw = logical_id(&[net.id.as_str(), "IGW"]);
            let attachment = logical_id(&[net.id.as_str(), "VPCGW"]);
            self.emit(
                &igw,
                "AWS::EC2::InternetGateway",
                json!({ "Tags": tags(self.props, Some(net.vpc_name.as_str())) }),
                vec![],
            )?;
            self.emit(
                &attachment,
                "AWS::EC2::VPCGatewayAttachment",
                json!({ "InternetGatewayId": reference(&igw), "VpcId": reference(&vpc) }),
                vec![],
            )?;
            Some((igw, attachment))
        } else {
            None
        };

        let mut subnets = Vec::new();
        let mut route_tables = Vec::new();
        let mut block = blocks.iter();
        for group in &net.subnet_configuration {
            for az in 0..net.max_azs {
                let construct = format!("{}Subnet{}", group.name, u16::from(az) + 1);
                let name = format!("{}/{}", net.vpc_name, construct);
                let subnet = logical_id(&[net.id.as_str(), construct.as_str(), "Subnet"]);
                let route_table = logical_id(&[net.id.as_str(), construct.as_str(), "RouteTable"]);
                let association = logical_id(&[net.id.as_str(), construct.as_str(), "RouteTableAssociation"]);
                let cidr = block
                    .next()
                    .ok_or_else(|| format!("network '{}': subnet allocation short", net.id))?;
                let public = group.subnet_type == SubnetType::Public;

                self.emit(
                    &subnet,
                    "AWS::EC2::Subnet",
                    json!({
                        "AvailabilityZone": select_az(az),
                        "CidrBlock": cidr.to_string(),
                        "MapPublicIpOnLaunch": public,
                        "Tags": tags(self.props, Some(name.as_str())),
                        "VpcId": reference(&vpc),
                    }),
                    vec![],
                )?;
                self.emit(
                    &route_table,
                    "AWS::EC2::RouteTable",
                    json!({ "Tags": tags(self.props, Some(name.as_str())), "VpcId": reference(&vpc) }),
                    vec![],
                )?;
                self.emit(
                    &association,
                    "AWS::EC2::SubnetRouteTableAssociation",
                    json!({ "RouteTableId": reference(&route_table), "SubnetId": reference(&subnet) }),
                    vec![],
                )?;

                if public {
                    if let Some((ref igw, ref attachment)) = gateway {
                        self.emit(
                            &logical_id(&[net.id.as_str(), construct.as_str(), "DefaultRoute"]),
                            "AWS::EC2::Route",
                            json!({
                                "DestinationCidrBlock": "0.0.0.0/0",
                                "GatewayId": reference(igw),
                                "RouteTableId": reference(&route_table),
                            }),
                            vec![attachment.clone()],
                        )?;
                    }
                }

                route_tables.push((construct, route_table, group.subnet_type, az));
                subnets.push(SubnetRef {
                    logical: subnet,
                    subnet_type: group.subnet_type,
                    az,
                });
            }
        }

        self.nat_gateways(net, &subnets, &route_tables)?;

        self.output(
            format!("{}VpcId", alphanumeric(&net.id)),
            "VPC id",
            reference(&vpc),
        );
        self.networks
            .insert(net.id.clone(), NetworkRef { vpc, subnets });
        Ok(())
    }

    /// NAT gateways live in public subnets; egress subnets route through the
    /// gateway of their AZ (round-robin when there are fewer gateways).
    fn nat_gateways(
        &mut self,
        net: &Network,
        subnets: &[SubnetRef],
        route_tables: &[(String, String, SubnetType, u8)],
    ) -> Result<(), String> {
        let public: Vec<&SubnetRef> = subnets
            .iter()
            .filter(|s| s.subnet_type == SubnetType::Public)
            .collect();
        let count = usize::from(net.nat_gateways).min(public.len());
        if count == 0 {
            return Ok(());
        }

        let mut nats = Vec::with_capacity(count);
        for (idx, host) in public.iter().take(count).enumerate() {
            let construct = format!("Nat{}", idx + 1);
            let eip = logical_id(&[net.id.as_str(), construct.as_str(), "EIP"]);
            let nat = logical_id(&[net.id.as_str(), construct.as_str(), "NATGateway"]);
            self.emit(
                &eip,
                "AWS::EC2::EIP",
                json!({ "Domain": "vpc", "Tags": tags(self.props, Some(net.vpc_name.as_str())) }),
                vec![],
            )?;
            self.emit(
                &nat,
                "AWS::EC2::NatGateway",
                json!({
                    "AllocationId": get_att(&eip, "AllocationId"),
                    "SubnetId": reference(&host.logical),
                    "Tags": tags(self.props, Some(net.vpc_name.as_str())),
                }),
                vec![],
            )?;
            nats.push(nat);
        }

        for (construct, route_table, subnet_type, az) in route_tables {
            if *subnet_type != SubnetType::PrivateWithEgress {
                continue;
            }
            let nat = &nats[usize::from(*az) % nats.len()];
            self.emit(
                &logical_id(&[net.id.as_str(), construct.as_str(), "DefaultRoute"]),
                "AWS::EC2::Route",
                json!({
                    "DestinationCidrBlock": "0.0.0.0/0",
                    "NatGatewayId": reference(nat),
                    "RouteTableId": reference(route_table),
                }),
                vec![],
            )?;
        }
        Ok(())
    }

    fn security_group(&mut self, sg: &SecurityGroup) -> Result<(), String> {
        let vpc = self
            .networks
            .get(&sg.network)
            .map(|n| n.vpc.clone())
            .ok_or_else(|| format!("security group '{}': network '{}' not synthesized", sg.id, sg.network))?;
        let logical = logical_id(&[sg.id.as_str(), "Resource"]);

        let ingress: Vec<Value> = sg
            .ingress
            .iter()
            .map(|rule| {
                let mut entry = serde_json::Map::new();
                entry.insert("CidrIp".to_string(), json!(rule.peer.cidr()));
                entry.insert("Description".to_string(), json!(rule.description));
                if rule.port.protocol != Protocol::All {
                    entry.insert("FromPort".to_string(), json!(rule.port.from));
                }
                entry.insert("IpProtocol".to_string(), json!(rule.port.protocol.to_string()));
                if rule.port.protocol != Protocol::All {
                    entry.insert("ToPort".to_string(), json!(rule.port.to));
                }
                Value::Object(entry)
            })
            .collect();

        let mut properties = serde_json::Map::new();
        properties.insert(
            "GroupDescription".to_string(),
            json!(format!("{}/{}", self.props.stack_name, sg.id)),
        );
        properties.insert("GroupName".to_string(), json!(sg.group_name));
        if sg.allow_all_outbound {
            properties.insert(
                "SecurityGroupEgress".to_string(),
                json!([{
                    "CidrIp": "0.0.0.0/0",
                    "Description": "Allow all outbound traffic by default",
                    "IpProtocol": "-1",
                }]),
            );
        }
        properties.insert("SecurityGroupIngress".to_string(), Value::Array(ingress));
        properties.insert("Tags".to_string(), tags(self.props, None));
        properties.insert("VpcId".to_string(), reference(&vpc));

        self.emit(&logical, "AWS::EC2::SecurityGroup", Value::Object(properties), vec![])?;
        self.output(
            format!("{}GroupId", alphanumeric(&sg.id)),
            "Security group id",
            get_att(&logical, "GroupId"),
        );
        self.security_groups.insert(sg.id.clone(), logical);
        Ok(())
    }

    fn role(&mut self, role: &Role) -> Result<(), String> {
        let logical = logical_id(&[role.id.as_str(), "Resource"]);
        let arns: Vec<Value> = role
            .managed_policies
            .iter()
            .map(|p| {
                json!({
                    "Fn::Join": ["", [
                        "arn:",
                        { "Ref": "AWS::Partition" },
                        format!(":iam::aws:policy/{}", p.name),
                    ]]
                })
            })
            .collect();
        self.emit(
            &logical,
            "AWS::IAM::Role",
            json!({
                "AssumeRolePolicyDocument": {
                    "Statement": [{
                        "Action": "sts:AssumeRole",
                        "Effect": "Allow",
                        "Principal": { "Service": role.assumed_by },
                    }],
                    "Version": "2012-10-17",
                },
                "ManagedPolicyArns": arns,
                "Tags": tags(self.props, None),
            }),
            vec![],
        )?;
        self.roles.insert(role.id.clone(), logical);
        Ok(())
    }

    fn ami_parameter(&mut self, image: &MachineImage) -> String {
        let path = image.ssm_parameter();
        let id = format!(
            "SsmParameterValue{}{}Parameter",
            alphanumeric(path),
            hasher::short_hash(path)
        );
        self.template.parameters.entry(id.clone()).or_insert_with(|| {
            json!({ "Type": AMI_PARAMETER_TYPE, "Default": path })
        });
        id
    }

    fn instance(&mut self, inst: &Instance) -> Result<(), String> {
        let network = self
            .networks
            .get(&inst.network)
            .cloned()
            .ok_or_else(|| format!("instance '{}': network '{}' not synthesized", inst.id, inst.network))?;
        let subnet = network
            .subnets
            .iter()
            .find(|s| s.subnet_type == inst.subnet_selection.subnet_type)
            .ok_or_else(|| {
                format!(
                    "instance '{}': no {} subnet in '{}'",
                    inst.id, inst.subnet_selection.subnet_type, inst.network
                )
            })?;
        let sg = self
            .security_groups
            .get(&inst.security_group)
            .cloned()
            .ok_or_else(|| format!("instance '{}': security group '{}' not synthesized", inst.id, inst.security_group))?;
        let role = self
            .roles
            .get(&inst.role)
            .cloned()
            .ok_or_else(|| format!("instance '{}': role '{}' not synthesized", inst.id, inst.role))?;

        let profile = logical_id(&[inst.id.as_str(), "InstanceProfile"]);
        self.emit(
            &profile,
            "AWS::IAM::InstanceProfile",
            json!({ "Roles": [reference(&role)] }),
            vec![],
        )?;

        let ami = self.ami_parameter(&inst.machine_image);
        let logical = logical_id(&[inst.id.as_str(), "Resource"]);

        let mut properties = serde_json::Map::new();
        properties.insert("AvailabilityZone".to_string(), select_az(subnet.az));
        properties.insert("IamInstanceProfile".to_string(), reference(&profile));
        properties.insert("ImageId".to_string(), reference(&ami));
        properties.insert("InstanceType".to_string(), json!(inst.instance_type.to_string()));
        properties.insert(
            "NetworkInterfaces".to_string(),
            json!([{
                "AssociatePublicIpAddress": inst.associate_public_ip_address,
                "DeviceIndex": "0",
                "GroupSet": [get_att(&sg, "GroupId")],
                "SubnetId": reference(&subnet.logical),
            }]),
        );
        properties.insert("Tags".to_string(), tags(self.props, Some(inst.instance_name.as_str())));
        if let Some(ref user_data) = inst.user_data {
            properties.insert(
                "UserData".to_string(),
                json!({ "Fn::Base64": user_data.render() }),
            );
        }

        self.emit(
            &logical,
            "AWS::EC2::Instance",
            Value::Object(properties),
            vec![role],
        )?;

        let prefix = alphanumeric(&inst.id);
        self.output(format!("{}InstanceId", prefix), "Instance id", reference(&logical));
        if inst.associate_public_ip_address {
            self.output(
                format!("{}PublicIp", prefix),
                "Instance public IPv4 address",
                get_att(&logical, "PublicIp"),
            );
        }
        Ok(())
    }
}

/// Synthesize a template. Resources are emitted in dependency order.
pub fn synthesize(stack: &Stack) -> Result<Template, String> {
    let mut synth = Synth::new(stack);
    for resource in resolver::ordered_resources(stack)? {
        match resource {
            StackResource::Network(n) => synth.network(n)?,
            StackResource::SecurityGroup(sg) => synth.security_group(sg)?,
            StackResource::Role(r) => synth.role(r)?,
            StackResource::Instance(i) => synth.instance(i)?,
        }
    }
    Ok(synth.template)
}

/// Render a template in the requested encoding.
pub fn render(template: &Template, format: TemplateFormat) -> Result<String, String> {
    match format {
        TemplateFormat::Json => serde_json::to_string_pretty(template)
            .map(|s| s + "\n")
            .map_err(|e| format!("JSON serialize error: {}", e)),
        TemplateFormat::Yaml => serde_yaml_ng::to_string(template)
            .map_err(|e| format!("YAML serialize error: {}", e)),
    }
}

/// Hash of each synthesized resource body, keyed by logical id.
pub fn resource_hashes(template: &Template) -> Result<IndexMap<String, ResourceLock>, String> {
    let mut hashes = IndexMap::new();
    for (logical, resource) in &template.resources {
        let body = serde_json::to_string(resource)
            .map_err(|e| format!("cannot serialize {}: {}", logical, e))?;
        hashes.insert(
            logical.clone(),
            ResourceLock {
                resource_type: resource.resource_type.clone(),
                hash: hasher::hash_string(&body),
            },
        );
    }
    Ok(hashes)
}
