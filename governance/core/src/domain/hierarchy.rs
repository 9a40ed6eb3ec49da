// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Hierarchy validation for governed context switches.
//!
//! Control and transferable tokens may only move inside one governance
//! subtree: between a parent and its direct child, or between two siblings
//! under the same non-root parent. The check is a pure function of the two
//! positions and is symmetric by construction.

use crate::domain::task::TaskId;
use serde::{Deserialize, Serialize};

/// Where a task sits in the hierarchy at the moment of the check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchyPosition {
    pub task_id: TaskId,
    pub parent_id: Option<TaskId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HierarchyRelation {
    /// `a` is the direct parent of `b`.
    ParentOf,
    /// `a` is a direct child of `b`.
    ChildOf,
    /// Both share the same non-root parent.
    Siblings,
}

pub struct HierarchyValidator;

impl HierarchyValidator {
    pub fn relation(a: &HierarchyPosition, b: &HierarchyPosition) -> Option<HierarchyRelation> {
        if a.task_id == b.task_id {
            return None;
        }
        if b.parent_id == Some(a.task_id) {
            return Some(HierarchyRelation::ParentOf);
        }
        if a.parent_id == Some(b.task_id) {
            return Some(HierarchyRelation::ChildOf);
        }
        match (a.parent_id, b.parent_id) {
            (Some(pa), Some(pb)) if pa == pb => Some(HierarchyRelation::Siblings),
            _ => None,
        }
    }

    pub fn permits(a: &HierarchyPosition, b: &HierarchyPosition) -> bool {
        Self::relation(a, b).is_some()
    }
}
