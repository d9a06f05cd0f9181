//! Plan generation — diff a synthesized template against the stack's lock.

use super::synth;
use super::types::*;

/// Compare synthesized resources with the lock. Resources only in the lock
/// are planned for destruction, after everything the template declares.
pub fn plan(stack: &str, template: &Template, lock: Option<&StateLock>) -> Result<ExecutionPlan, String> {
    let desired = synth::resource_hashes(template)?;
    let mut changes = Vec::new();
    let mut to_create = 0u32;
    let mut to_update = 0u32;
    let mut to_destroy = 0u32;
    let mut unchanged = 0u32;

    for (logical_id, entry) in &desired {
        let action = match lock.and_then(|l| l.resources.get(logical_id)) {
            None => PlanAction::Create,
            Some(locked) if locked.hash == entry.hash => PlanAction::NoOp,
            Some(_) => PlanAction::Update,
        };
        match action {
            PlanAction::Create => to_create += 1,
            PlanAction::Update => to_update += 1,
            PlanAction::NoOp => unchanged += 1,
            PlanAction::Destroy => to_destroy += 1,
        }
        changes.push(PlannedChange {
            logical_id: logical_id.clone(),
            resource_type: entry.resource_type.clone(),
            description: describe_action(logical_id, &entry.resource_type, &action),
            action,
        });
    }

    if let Some(lock) = lock {
        for (logical_id, locked) in &lock.resources {
            if desired.contains_key(logical_id) {
                continue;
            }
            to_destroy += 1;
            changes.push(PlannedChange {
                logical_id: logical_id.clone(),
                resource_type: locked.resource_type.clone(),
                description: describe_action(logical_id, &locked.resource_type, &PlanAction::Destroy),
                action: PlanAction::Destroy,
            });
        }
    }

    Ok(ExecutionPlan {
        stack: stack.to_string(),
        changes,
        to_create,
        to_update,
        to_destroy,
        unchanged,
    })
}

/// Generate a human-readable description of a planned action.
fn describe_action(logical_id: &str, resource_type: &str, action: &PlanAction) -> String {
    match action {
        PlanAction::Create => format!("{} ({}): create", logical_id, resource_type),
        PlanAction::Update => format!("{} ({}): update (properties changed)", logical_id, resource_type),
        PlanAction::Destroy => format!("{} ({}): destroy", logical_id, resource_type),
        PlanAction::NoOp => format!("{} ({}): no changes", logical_id, resource_type),
    }
}
