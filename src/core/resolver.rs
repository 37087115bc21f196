//! Resolution of name-based references between milestones.
//!
//! `start_after_milestone` and `duration_end_at_milestone` form a small
//! dependency graph over two node kinds per milestone (its start age and its
//! duration). Nodes are evaluated once, memoized, and marked in-progress while
//! their dependencies resolve; re-entering an in-progress node is a cycle.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::error::ProjectionError;
use super::types::{Milestone, MilestoneType, normalize_name};

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CyclePolicy {
    /// Use the stored literal on the edge that closes the cycle.
    #[default]
    Fallback,
    Reject,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub ages: Vec<i32>,
    pub durations: Vec<Option<u32>>,
    pub inheritance_age: Option<i32>,
    /// Names of milestones whose resolution closed a reference cycle.
    pub cycles: Vec<String>,
}

impl Resolution {
    /// Last age a milestone touches: start plus a positive duration, else its start.
    pub fn horizon_of(&self, index: usize) -> i32 {
        match self.durations[index] {
            Some(d) if d > 0 => self.ages[index].saturating_add(whole_years(d)),
            _ => self.ages[index],
        }
    }
}

pub fn resolve(milestones: &[Milestone], policy: CyclePolicy) -> Result<Resolution, ProjectionError> {
    let mut resolver = Resolver::new(milestones, policy);
    let mut ages = Vec::with_capacity(milestones.len());
    let mut durations = Vec::with_capacity(milestones.len());
    for index in 0..milestones.len() {
        ages.push(resolver.age(index)?);
        durations.push(resolver.duration(index)?);
    }
    Ok(Resolution {
        ages,
        durations,
        inheritance_age: resolver.inheritance_age,
        cycles: resolver.cycles,
    })
}

#[derive(Debug, Clone, Copy)]
enum Slot<T> {
    Pending,
    InProgress,
    Done(T),
}

struct Resolver<'a> {
    milestones: &'a [Milestone],
    by_name: HashMap<String, usize>,
    inheritance_age: Option<i32>,
    policy: CyclePolicy,
    ages: Vec<Slot<i32>>,
    durations: Vec<Slot<Option<u32>>>,
    cycles: Vec<String>,
}

impl<'a> Resolver<'a> {
    fn new(milestones: &'a [Milestone], policy: CyclePolicy) -> Self {
        let by_name = milestones
            .iter()
            .enumerate()
            .map(|(i, m)| (m.normalized_name(), i))
            .collect();
        let inheritance_age = milestones
            .iter()
            .find(|m| m.is_inheritance())
            .map(|m| m.age_at_occurrence);

        Self {
            milestones,
            by_name,
            inheritance_age,
            policy,
            ages: vec![Slot::Pending; milestones.len()],
            durations: vec![Slot::Pending; milestones.len()],
            cycles: Vec::new(),
        }
    }

    fn lookup(&self, index: usize, reference: &str) -> Result<usize, ProjectionError> {
        self.by_name
            .get(&normalize_name(reference))
            .copied()
            .ok_or_else(|| ProjectionError::UnresolvedReference {
                milestone: self.milestones[index].name.clone(),
                reference: reference.to_string(),
            })
    }

    fn on_cycle(&mut self, index: usize) -> Result<(), ProjectionError> {
        let milestones = self.milestones;
        let name = &milestones[index].name;
        if self.policy == CyclePolicy::Reject {
            return Err(ProjectionError::CyclicReference {
                milestone: name.clone(),
            });
        }
        if !self.cycles.contains(name) {
            warn!(milestone = %name, "cyclic milestone reference; using stored value");
            self.cycles.push(name.clone());
        }
        Ok(())
    }

    fn age(&mut self, index: usize) -> Result<i32, ProjectionError> {
        match self.ages[index] {
            Slot::Done(v) => return Ok(v),
            Slot::InProgress => {
                self.on_cycle(index)?;
                return Ok(self.milestones[index].age_at_occurrence);
            }
            Slot::Pending => {}
        }
        self.ages[index] = Slot::InProgress;

        let milestones = self.milestones;
        let milestone = &milestones[index];
        let value = match milestone.start_after_milestone.as_deref() {
            Some(reference) if !reference.trim().is_empty() => {
                let target = self.lookup(index, reference)?;
                let target_age = self.age(target)?;
                let target_duration = self.duration(target)?.unwrap_or(0);
                target_age.saturating_add(whole_years(target_duration))
            }
            _ => milestone.age_at_occurrence,
        };

        self.ages[index] = Slot::Done(value);
        Ok(value)
    }

    fn duration(&mut self, index: usize) -> Result<Option<u32>, ProjectionError> {
        match self.durations[index] {
            Slot::Done(v) => return Ok(v),
            Slot::InProgress => {
                self.on_cycle(index)?;
                return Ok(literal_duration(&self.milestones[index]));
            }
            Slot::Pending => {}
        }
        self.durations[index] = Slot::InProgress;

        let milestones = self.milestones;
        let milestone = &milestones[index];
        let value = match milestone.duration_end_at_milestone.as_deref() {
            Some(reference) if !reference.trim().is_empty() => {
                let target = self.lookup(index, reference)?;
                let target_age = self.age(target)?;
                let own_age = self.age(index)?;
                Some(target_age.saturating_sub(own_age).max(0) as u32)
            }
            _ => literal_duration(milestone),
        };
        let value = match (value, self.inheritance_age) {
            (Some(d), Some(inheritance_age)) => {
                let own_age = self.settled_age(index)?;
                let room = inheritance_age.saturating_sub(own_age).max(0) as u32;
                Some(d.min(room))
            }
            (value, _) => value,
        };

        self.durations[index] = Slot::Done(value);
        Ok(value)
    }

    // Own start age for the horizon cap; an age still being resolved is not a
    // dependency of the duration, so its stored value is used silently.
    fn settled_age(&mut self, index: usize) -> Result<i32, ProjectionError> {
        match self.ages[index] {
            Slot::Done(v) => Ok(v),
            Slot::InProgress => Ok(self.milestones[index].age_at_occurrence),
            Slot::Pending => self.age(index),
        }
    }
}

fn whole_years(duration: u32) -> i32 {
    i32::try_from(duration).unwrap_or(i32::MAX)
}

/// Stored duration in years. Monthly liability terms are entered in months.
pub fn literal_duration(milestone: &Milestone) -> Option<u32> {
    if milestone.is_perpetuity() {
        return None;
    }
    let duration = milestone.duration?;
    if milestone.milestone_type == MilestoneType::Liability && milestone.is_monthly() {
        return Some(duration.div_ceil(12).max(1));
    }
    Some(duration)
}
