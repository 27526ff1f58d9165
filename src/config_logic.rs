//! Pure decision functions for trigger tables and experiment assignments.
//!
//! Nothing here holds state: every function operates on maps passed by the caller and returns new
//! maps ([`AssignmentSnapshot`]). The random source is injected so variant selection is
//! reproducible in tests.
use std::collections::{HashMap, HashSet};

use rand::Rng;

use crate::{
    assignments::{AssignmentMap, AssignmentSnapshot, AssignmentsResponse},
    config::PreloadingDisabled,
    triggers::{ConfirmableAssignment, Trigger, Variant, VariantOption, VariantType},
};

/// Build the trigger table keyed by event name. Later duplicates win, matching the server's
/// uniqueness guarantee.
pub fn triggers_by_event_name(
    triggers: impl IntoIterator<Item = Trigger>,
) -> HashMap<String, Trigger> {
    triggers
        .into_iter()
        .map(|trigger| (trigger.event_name.clone(), trigger))
        .collect()
}

/// Select a variant by weighted random draw.
///
/// Returns `None` for an empty variants list; such rules cannot select a variant.
pub fn choose_variant<R: Rng + ?Sized>(
    variants: &[VariantOption],
    rng: &mut R,
) -> Option<Variant> {
    choose_variant_with_draw(variants, rng.gen_range(0..100))
}

/// Select a variant for a fixed uniform draw in `[0, 100)`.
///
/// Cumulative-percentage selection: the first variant whose cumulative upper bound exceeds the
/// draw wins (inclusive lower bound, exclusive upper bound). When all percentages are zero the
/// draw indexes the variants uniformly; when the percentages sum below 100 and the draw falls
/// past the partition, the last variant wins.
pub fn choose_variant_with_draw(variants: &[VariantOption], draw: u8) -> Option<Variant> {
    if variants.is_empty() {
        return None;
    }

    let sum: u32 = variants.iter().map(|v| u32::from(v.percentage)).sum();
    if sum == 0 {
        return Some(variants[draw as usize % variants.len()].to_variant());
    }

    let mut cumulative = 0u32;
    for option in variants {
        cumulative += u32::from(option.percentage);
        if u32::from(draw) < cumulative {
            return Some(option.to_variant());
        }
    }
    Some(variants[variants.len() - 1].to_variant())
}

/// Draw variants for every trigger rule that is not already confirmed.
///
/// Already-confirmed experiments are left untouched and never re-drawn; everything else lands in
/// a fresh unconfirmed map.
pub fn choose_assignments<'a, R: Rng + ?Sized>(
    triggers: impl IntoIterator<Item = &'a Trigger>,
    confirmed: &AssignmentMap,
    rng: &mut R,
) -> AssignmentSnapshot {
    let mut unconfirmed = AssignmentMap::new();
    for trigger in triggers {
        for rule in &trigger.rules {
            if confirmed.contains_key(&rule.experiment_id)
                || unconfirmed.contains_key(&rule.experiment_id)
            {
                continue;
            }
            if let Some(variant) = choose_variant(&rule.variants, rng) {
                unconfirmed.insert(rule.experiment_id.clone(), variant);
            }
        }
    }
    AssignmentSnapshot {
        confirmed: confirmed.clone(),
        unconfirmed,
    }
}

/// Reconcile server-held assignments into the confirmed map.
///
/// Server assignments are authoritative: each one moves into confirmed (displacing any local
/// unconfirmed value for that experiment) as long as the referenced variant still exists among
/// the trigger's current options; otherwise the server entry is dropped.
pub fn transfer_assignments_from_server_to_disk<'a>(
    assignments: &AssignmentsResponse,
    triggers: impl IntoIterator<Item = &'a Trigger> + Clone,
    confirmed: &AssignmentMap,
    unconfirmed: &AssignmentMap,
) -> AssignmentSnapshot {
    let mut confirmed = confirmed.clone();
    let mut unconfirmed = unconfirmed.clone();

    for assignment in &assignments.assignments {
        let option = triggers
            .clone()
            .into_iter()
            .flat_map(|trigger| &trigger.rules)
            .filter(|rule| rule.experiment_id == assignment.experiment_id)
            .flat_map(|rule| &rule.variants)
            .find(|variant| variant.id == assignment.variant_id);
        let Some(option) = option else {
            // The variant no longer exists in configuration. Stale server state.
            continue;
        };
        confirmed.insert(assignment.experiment_id.clone(), option.to_variant());
        unconfirmed.remove(&assignment.experiment_id);
    }

    AssignmentSnapshot {
        confirmed,
        unconfirmed,
    }
}

/// Move one assignment from unconfirmed to confirmed.
///
/// Idempotent: if the entry is already absent from unconfirmed, the returned maps are still
/// consistent and the confirmed entry is (re-)written.
pub fn move_assignment(
    assignment: &ConfirmableAssignment,
    unconfirmed: &AssignmentMap,
    confirmed: &AssignmentMap,
) -> AssignmentSnapshot {
    let mut confirmed = confirmed.clone();
    let mut unconfirmed = unconfirmed.clone();
    confirmed.insert(
        assignment.experiment_id.clone(),
        assignment.variant.clone(),
    );
    unconfirmed.remove(&assignment.experiment_id);
    AssignmentSnapshot {
        confirmed,
        unconfirmed,
    }
}

/// Paywall identifiers of every treatment variant currently assigned across `triggers`.
///
/// Confirmed assignments win over unconfirmed when both exist for the same experiment; variants
/// without a paywall id are excluded.
pub fn get_active_treatment_paywall_ids<'a>(
    triggers: impl IntoIterator<Item = &'a Trigger>,
    confirmed: &AssignmentMap,
    unconfirmed: &AssignmentMap,
) -> HashSet<String> {
    triggers
        .into_iter()
        .flat_map(|trigger| &trigger.rules)
        .filter_map(|rule| {
            confirmed
                .get(&rule.experiment_id)
                .or_else(|| unconfirmed.get(&rule.experiment_id))
        })
        .filter(|variant| variant.variant_type == VariantType::Treatment)
        .filter_map(|variant| variant.paywall_id.clone())
        .collect()
}

/// Drop triggers whose preloading is explicitly disabled by campaign/event identifier.
pub fn filter_triggers<'a>(
    triggers: impl IntoIterator<Item = &'a Trigger>,
    disabled: &PreloadingDisabled,
) -> Vec<Trigger> {
    if disabled.all {
        return Vec::new();
    }
    triggers
        .into_iter()
        .filter(|trigger| {
            !disabled.triggers.contains(&trigger.event_name)
                && !trigger
                    .rules
                    .iter()
                    .any(|rule| disabled.triggers.contains(&rule.experiment_group_id))
        })
        .cloned()
        .collect()
}
