//! Structural validation of a declared stack.
//!
//! Catches what a synth-time check can:
//! - Malformed or out-of-range CIDRs, subnet layouts that do not fit
//! - Dangling references between resources
//! - Duplicate construct ids
//! - Empty ports, policies, principals, and boot scripts

use super::cidr::{self, Ipv4Cidr};
use super::props;
use super::types::*;
use std::collections::HashSet;

/// Validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

fn err(errors: &mut Vec<ValidationError>, message: String) {
    errors.push(ValidationError { message });
}

/// Validate a stack. Returns a list of errors (empty = valid).
pub fn validate_stack(stack: &Stack) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    for message in props::validate_props(&stack.props) {
        err(&mut errors, message);
    }

    let mut seen = HashSet::new();
    for resource in &stack.resources {
        if resource.id().is_empty() {
            err(&mut errors, format!("{} has an empty id", resource.kind()));
        }
        if !seen.insert(resource.id()) {
            err(&mut errors, format!("duplicate id '{}'", resource.id()));
        }
    }

    for resource in &stack.resources {
        match resource {
            StackResource::Network(n) => validate_network(n, &mut errors),
            StackResource::SecurityGroup(sg) => validate_security_group(stack, sg, &mut errors),
            StackResource::Role(r) => validate_role(r, &mut errors),
            StackResource::Instance(i) => validate_instance(stack, i, &mut errors),
        }
    }

    errors
}

fn validate_network(n: &Network, errors: &mut Vec<ValidationError>) {
    let vpc = match Ipv4Cidr::parse(&n.cidr) {
        Ok(c) => c,
        Err(e) => {
            err(errors, format!("network '{}': {}", n.id, e));
            return;
        }
    };
    if !(16..=28).contains(&vpc.prefix) {
        err(
            errors,
            format!("network '{}': prefix /{} outside /16../28", n.id, vpc.prefix),
        );
    }
    if n.max_azs == 0 {
        err(errors, format!("network '{}': max_azs must be at least 1", n.id));
    }
    if n.subnet_configuration.is_empty() {
        err(errors, format!("network '{}' has no subnets", n.id));
    }

    let mut names = HashSet::new();
    for s in &n.subnet_configuration {
        if !names.insert(s.name.as_str()) {
            err(
                errors,
                format!("network '{}': duplicate subnet group '{}'", n.id, s.name),
            );
        }
        if s.cidr_mask < vpc.prefix || s.cidr_mask > 28 {
            err(
                errors,
                format!(
                    "network '{}': subnet '{}' mask /{} must be within /{}../28",
                    n.id, s.name, s.cidr_mask, vpc.prefix
                ),
            );
            return;
        }
    }

    if n.subnet_configuration
        .iter()
        .any(|s| s.subnet_type == SubnetType::Public)
        && !n.create_internet_gateway
    {
        err(
            errors,
            format!("network '{}': public subnets need an internet gateway", n.id),
        );
    }
    if n.provides(SubnetType::PrivateWithEgress) && n.nat_gateways == 0 {
        err(
            errors,
            format!("network '{}': private_with_egress subnets need a NAT gateway", n.id),
        );
    }

    let masks = subnet_masks(n);
    if let Err(e) = cidr::allocate(&vpc, &masks) {
        err(errors, format!("network '{}': {}", n.id, e));
    }
}

/// One mask per (subnet group × AZ), in allocation order.
pub fn subnet_masks(n: &Network) -> Vec<u8> {
    n.subnet_configuration
        .iter()
        .flat_map(|s| std::iter::repeat(s.cidr_mask).take(usize::from(n.max_azs)))
        .collect()
}

fn validate_security_group(stack: &Stack, sg: &SecurityGroup, errors: &mut Vec<ValidationError>) {
    match stack.get(&sg.network) {
        Some(StackResource::Network(_)) => {}
        Some(other) => err(
            errors,
            format!(
                "security group '{}' network '{}' is a {}",
                sg.id,
                sg.network,
                other.kind()
            ),
        ),
        None => err(
            errors,
            format!(
                "security group '{}' references unknown network '{}'",
                sg.id, sg.network
            ),
        ),
    }
    if sg.group_name.is_empty() || sg.group_name.len() > 255 {
        err(
            errors,
            format!("security group '{}': name must be 1-255 chars", sg.id),
        );
    }
    for rule in &sg.ingress {
        if rule.port.protocol != Protocol::All && (rule.port.from == 0 || rule.port.from > rule.port.to)
        {
            err(
                errors,
                format!(
                    "security group '{}': invalid port range {}-{} ({})",
                    sg.id, rule.port.from, rule.port.to, rule.description
                ),
            );
        }
        if let Err(e) = Ipv4Cidr::parse(rule.peer.cidr()) {
            err(errors, format!("security group '{}': {}", sg.id, e));
        }
    }
}

fn validate_role(r: &Role, errors: &mut Vec<ValidationError>) {
    if r.assumed_by.is_empty() {
        err(errors, format!("role '{}' has no service principal", r.id));
    }
    let mut names = HashSet::new();
    for p in &r.managed_policies {
        if p.name.is_empty() {
            err(errors, format!("role '{}' has an unnamed managed policy", r.id));
        }
        if !names.insert(p.name.as_str()) {
            err(
                errors,
                format!("role '{}' attaches '{}' twice", r.id, p.name),
            );
        }
    }
}

fn validate_instance(stack: &Stack, i: &Instance, errors: &mut Vec<ValidationError>) {
    match stack.get(&i.network) {
        Some(StackResource::Network(n)) => {
            if !n.provides(i.subnet_selection.subnet_type) {
                err(
                    errors,
                    format!(
                        "instance '{}' selects {} subnets but network '{}' has none",
                        i.id, i.subnet_selection.subnet_type, n.id
                    ),
                );
            }
        }
        _ => err(
            errors,
            format!("instance '{}' references unknown network '{}'", i.id, i.network),
        ),
    }
    if !matches!(stack.get(&i.security_group), Some(StackResource::SecurityGroup(_))) {
        err(
            errors,
            format!(
                "instance '{}' references unknown security group '{}'",
                i.id, i.security_group
            ),
        );
    }
    if !matches!(stack.get(&i.role), Some(StackResource::Role(_))) {
        err(
            errors,
            format!("instance '{}' references unknown role '{}'", i.id, i.role),
        );
    }
    if let Some(ref ud) = i.user_data {
        if ud.commands.is_empty() {
            err(errors, format!("instance '{}' has an empty boot script", i.id));
        }
    }
    if i.instance_name.len() > 255 {
        err(errors, format!("instance '{}': name exceeds 255 chars", i.id));
    }
}
