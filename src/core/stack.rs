//! The web application stack: network, firewall, role, and one instance that
//! boots the container image.

use super::envfile;
use super::types::*;
use std::ops::RangeInclusive;
use std::path::Path;

/// Image pulled and run by the boot script.
pub const CONTAINER_IMAGE: &str = "akira0924/stremlit-app:latest";

/// Ports opened one rule at a time for the app.
pub const APP_PORTS: RangeInclusive<u16> = 8501..=8510;

/// Service principal allowed to assume the instance role.
pub const EC2_SERVICE_PRINCIPAL: &str = "ec2.amazonaws.com";

/// Managed policies attached to the instance role.
pub const ROLE_MANAGED_POLICIES: [&str; 2] = ["AmazonSSMFullAccess", "AmazonS3FullAccess"];

/// Builds instances that share one network and one role.
pub struct InstanceFactory<'a> {
    network: &'a Network,
    role: &'a str,
}

impl<'a> InstanceFactory<'a> {
    pub fn new(network: &'a Network, role: &'a str) -> Self {
        Self { network, role }
    }

    /// Declare an instance and register it on `stack`. Returns its handle.
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        &self,
        stack: &mut Stack,
        id: &str,
        name: &str,
        class: InstanceClass,
        size: InstanceSize,
        public_ip: bool,
        subnet: SubnetSelection,
        security_group: &str,
        user_data: Option<UserData>,
    ) -> String {
        stack.add(StackResource::Instance(Instance {
            id: id.to_string(),
            instance_name: name.to_string(),
            network: self.network.id.clone(),
            subnet_selection: subnet,
            instance_type: InstanceType::of(class, size),
            machine_image: MachineImage::AmazonLinux {
                generation: AmazonLinuxGeneration::AmazonLinux2,
            },
            security_group: security_group.to_string(),
            role: self.role.to_string(),
            associate_public_ip_address: public_ip,
            user_data,
        }))
    }
}

fn network() -> Network {
    Network {
        id: "Vpc".to_string(),
        vpc_name: "practice-vpc".to_string(),
        cidr: "10.0.0.0/16".to_string(),
        max_azs: 1,
        nat_gateways: 0,
        create_internet_gateway: true,
        subnet_configuration: vec![SubnetConfiguration {
            name: "Public".to_string(),
            subnet_type: SubnetType::Public,
            cidr_mask: 24,
        }],
    }
}

fn security_group(network: &Network) -> SecurityGroup {
    let mut sg = SecurityGroup {
        id: "webSecurityGroup".to_string(),
        group_name: "web-user1".to_string(),
        network: network.id.clone(),
        allow_all_outbound: true,
        ingress: Vec::new(),
    };
    sg.add_ingress_rule(Peer::any_ipv4(), Port::tcp(80), "Allow HTTP traffic");
    sg.add_ingress_rule(Peer::any_ipv4(), Port::tcp(22), "Allow SSH traffic");
    sg.add_ingress_rule(Peer::any_ipv4(), Port::tcp(443), "Allow HTTPS traffic");
    for port in APP_PORTS {
        sg.add_ingress_rule(
            Peer::any_ipv4(),
            Port::tcp(port),
            format!("Allow traffic on port {}", port),
        );
    }
    sg
}

/// First-boot script: web server, docker, then the app container on 443.
pub fn boot_script() -> UserData {
    let mut user_data = UserData::for_linux();
    user_data.add_commands([
        "yum -y update".to_string(),
        "yum -y install httpd".to_string(),
        "yum -y install docker".to_string(),
        "sudo chmod 666 /var/run/docker.sock".to_string(),
        "sudo usermod -aG docker ec2-user".to_string(),
        "sudo service docker start".to_string(),
        "sudo systemctl start docker".to_string(),
        "sudo systemctl enable docker".to_string(),
        format!("sudo docker pull {}", CONTAINER_IMAGE),
        format!("sudo docker run -it -p 443:8501 {}", CONTAINER_IMAGE),
    ]);
    user_data
}

fn role() -> Role {
    let mut role = Role {
        id: "ec2Role".to_string(),
        assumed_by: EC2_SERVICE_PRINCIPAL.to_string(),
        managed_policies: Vec::new(),
    };
    for name in ROLE_MANAGED_POLICIES {
        role.add_managed_policy(ManagedPolicy::from_aws_managed_policy_name(name));
    }
    role
}

/// Declare the resource graph. Pure and deterministic.
pub fn declare(props: StackProps) -> Stack {
    let mut stack = Stack::new(props);

    let vpc = network();
    let sg = security_group(&vpc);
    let user_data = boot_script();
    let ec2_role = role();

    let sg_id = sg.id.clone();
    let role_id = ec2_role.id.clone();

    stack.add(StackResource::Network(vpc.clone()));
    stack.add(StackResource::SecurityGroup(sg));
    stack.add(StackResource::Role(ec2_role));

    let factory = InstanceFactory::new(&vpc, &role_id);
    factory.create(
        &mut stack,
        "Instance1",
        "webserver-instance1",
        InstanceClass::T2,
        InstanceSize::Micro,
        true,
        SubnetSelection {
            subnet_type: SubnetType::Public,
        },
        &sg_id,
        Some(user_data),
    );

    stack
}

/// Load the optional env file, then declare the stack. An unreadable env
/// file is reported on stderr and otherwise ignored.
pub fn define_stack(props: StackProps, env_file: Option<&Path>) -> Stack {
    if let Some(path) = env_file {
        if let Err(e) = envfile::load_into_env(path) {
            eprintln!("warning: env file skipped: {}", e);
        }
    }
    declare(props)
}
