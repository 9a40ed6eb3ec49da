// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Resource Token Value Objects
//!
//! A [`ResourceToken`] is a claim on a named external resource (a file handle,
//! a shared memory region, a socket). Tokens live in a fixed-capacity pool and
//! are addressed by [`TokenId`] `1..=capacity`.
//!
//! Tokens are created non-transferable; only an explicit
//! `mark_transferable(id, true)` lets a context switch move them.

use crate::domain::task::TaskId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Longest resource name kept on a token; longer names are truncated.
pub const MAX_RESOURCE_NAME_LEN: usize = 63;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenId(pub u64);

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Access bitset carried by a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessMask(u32);

impl AccessMask {
    pub const NONE: AccessMask = AccessMask(0);
    pub const READ: AccessMask = AccessMask(0x01);
    pub const WRITE: AccessMask = AccessMask(0x02);
    pub const EXECUTE: AccessMask = AccessMask(0x04);
    pub const READ_WRITE: AccessMask = AccessMask(0x03);

    pub const fn from_bits(bits: u32) -> Self {
        AccessMask(bits)
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    pub const fn contains(&self, other: AccessMask) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl BitOr for AccessMask {
    type Output = AccessMask;

    fn bitor(self, rhs: AccessMask) -> AccessMask {
        AccessMask(self.0 | rhs.0)
    }
}

impl BitOrAssign for AccessMask {
    fn bitor_assign(&mut self, rhs: AccessMask) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for AccessMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02x}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenState {
    Free,
    Locked,
}

/// One slot of the token pool.
///
/// # Invariants
///
/// - `state == Locked` iff `owner_task_id.is_some()`.
/// - A `Free` token has no resource name, an empty mask, and is not transferable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceToken {
    pub token_id: TokenId,
    pub owner_task_id: Option<TaskId>,
    pub resource_name: String,
    pub access_mask: AccessMask,
    pub acquisition_time: Option<DateTime<Utc>>,
    pub transferable: bool,
    pub state: TokenState,
}

impl ResourceToken {
    pub fn free(token_id: TokenId) -> Self {
        Self {
            token_id,
            owner_task_id: None,
            resource_name: String::new(),
            access_mask: AccessMask::NONE,
            acquisition_time: None,
            transferable: false,
            state: TokenState::Free,
        }
    }

    pub fn is_free(&self) -> bool {
        self.state == TokenState::Free
    }

    pub fn is_owned_by(&self, task_id: TaskId) -> bool {
        self.state == TokenState::Locked && self.owner_task_id == Some(task_id)
    }

    pub(crate) fn lock(&mut self, owner: TaskId, resource_name: &str, access_mask: AccessMask) {
        self.owner_task_id = Some(owner);
        self.resource_name =
            crate::domain::task::truncate_on_char_boundary(resource_name, MAX_RESOURCE_NAME_LEN);
        self.access_mask = access_mask;
        self.acquisition_time = Some(Utc::now());
        self.transferable = false;
        self.state = TokenState::Locked;
    }

    pub(crate) fn clear(&mut self) {
        *self = ResourceToken::free(self.token_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_mask_combinations() {
        let rw = AccessMask::READ | AccessMask::WRITE;
        assert_eq!(rw, AccessMask::READ_WRITE);
        assert!(rw.contains(AccessMask::READ));
        assert!(!AccessMask::READ.contains(AccessMask::WRITE));
        assert_eq!(rw.to_string(), "0x03");
    }

    #[test]
    fn test_lock_truncates_and_resets_transferable() {
        let mut token = ResourceToken::free(TokenId(1));
        token.transferable = true;
        let long_name = "r".repeat(100);
        token.lock(TaskId(7), &long_name, AccessMask::READ);

        assert_eq!(token.resource_name.len(), MAX_RESOURCE_NAME_LEN);
        assert!(!token.transferable);
        assert!(token.is_owned_by(TaskId(7)));

        token.clear();
        assert_eq!(token, ResourceToken::free(TokenId(1)));
    }
}
