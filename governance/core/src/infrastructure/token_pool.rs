// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Resource Token Pool
//!
//! Fixed-capacity arbitration of claims on named resources. The pool is
//! independent of the task hierarchy: it only records which task id owns which
//! token. Hierarchy checks happen in the engine before any ownership change.
//!
//! ## Behaviour
//! - Slots are preallocated with ids `1..=capacity`; id `n` lives at index `n - 1`.
//! - `acquire` takes the first `Free` slot found. There is no fairness or FIFO
//!   reuse guarantee.
//! - `acquire` never blocks. An empty pool is reported as
//!   `TokenPoolExhausted`; backoff is the caller's concern.
//! - Releasing a token that is already `Free` is a no-op.
//!
//! All mutations are serialized under one `parking_lot::Mutex`, independent of
//! the registry lock.

use crate::domain::error::GovernanceError;
use crate::domain::task::TaskId;
use crate::domain::token::{AccessMask, ResourceToken, TokenId};
use parking_lot::Mutex;
use tracing::{debug, warn};

pub struct ResourceTokenPool {
    slots: Mutex<Vec<ResourceToken>>,
    capacity: usize,
}

impl ResourceTokenPool {
    pub fn new(capacity: usize) -> Self {
        let slots = (1..=capacity as u64)
            .map(|id| ResourceToken::free(TokenId(id)))
            .collect();
        debug!(capacity, "Resource token pool initialized");
        Self {
            slots: Mutex::new(slots),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.slots.lock().iter().filter(|t| t.is_free()).count()
    }

    pub fn in_use(&self) -> usize {
        self.capacity - self.available()
    }

    fn index_of(&self, token_id: TokenId) -> Result<usize, GovernanceError> {
        if token_id.0 == 0 || token_id.0 > self.capacity as u64 {
            return Err(GovernanceError::InvalidToken(token_id));
        }
        Ok((token_id.0 - 1) as usize)
    }

    pub fn acquire(
        &self,
        task_id: TaskId,
        resource_name: &str,
        access_mask: AccessMask,
    ) -> Result<TokenId, GovernanceError> {
        let mut slots = self.slots.lock();
        let Some(token) = slots.iter_mut().find(|t| t.is_free()) else {
            warn!(task_id = %task_id, resource = resource_name, "Token acquisition failed: pool exhausted");
            return Err(GovernanceError::TokenPoolExhausted {
                capacity: self.capacity,
            });
        };

        token.lock(task_id, resource_name, access_mask);
        debug!(
            task_id = %task_id,
            token_id = %token.token_id,
            resource = %token.resource_name,
            mask = %access_mask,
            "Token acquired"
        );
        Ok(token.token_id)
    }

    /// Returns the previous owner, or `None` if the token was already free.
    pub fn release(&self, token_id: TokenId) -> Result<Option<TaskId>, GovernanceError> {
        let index = self.index_of(token_id)?;
        let mut slots = self.slots.lock();
        let token = &mut slots[index];

        if token.is_free() {
            debug!(token_id = %token_id, "Release of a free token ignored");
            return Ok(None);
        }

        let previous_owner = token.owner_task_id;
        debug!(
            token_id = %token_id,
            owner = ?previous_owner,
            resource = %token.resource_name,
            "Token released"
        );
        token.clear();
        Ok(previous_owner)
    }

    pub fn mark_transferable(&self, token_id: TokenId, transferable: bool) -> Result<(), GovernanceError> {
        let index = self.index_of(token_id)?;
        let mut slots = self.slots.lock();
        let token = &mut slots[index];

        if token.is_free() {
            return Err(GovernanceError::InvalidToken(token_id));
        }
        token.transferable = transferable;
        Ok(())
    }

    /// Reassign every transferable token owned by `from` to `to`.
    pub fn transfer_owned(&self, from: TaskId, to: TaskId) -> Vec<TokenId> {
        let mut slots = self.slots.lock();
        slots
            .iter_mut()
            .filter(|t| t.is_owned_by(from) && t.transferable)
            .map(|token| {
                debug!(token_id = %token.token_id, from = %from, to = %to, "Transferring token");
                token.owner_task_id = Some(to);
                token.token_id
            })
            .collect()
    }

    pub fn get(&self, token_id: TokenId) -> Option<ResourceToken> {
        let index = self.index_of(token_id).ok()?;
        self.slots.lock().get(index).cloned()
    }

    pub fn tokens_owned_by(&self, task_id: TaskId) -> Vec<ResourceToken> {
        self.slots
            .lock()
            .iter()
            .filter(|t| t.is_owned_by(task_id))
            .cloned()
            .collect()
    }

    pub fn release_owned_by(&self, task_id: TaskId) -> Vec<TokenId> {
        self.release_where(|owner| owner == task_id)
    }

    /// Free every locked token whose owner fails `is_live`.
    pub fn reclaim_unowned(&self, is_live: impl Fn(TaskId) -> bool) -> Vec<TokenId> {
        self.release_where(|owner| !is_live(owner))
    }

    fn release_where(&self, predicate: impl Fn(TaskId) -> bool) -> Vec<TokenId> {
        let mut slots = self.slots.lock();
        let mut released = Vec::new();
        for token in slots.iter_mut() {
            if let Some(owner) = token.owner_task_id {
                if predicate(owner) {
                    released.push(token.token_id);
                    token.clear();
                }
            }
        }
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::token::TokenState;

    #[test]
    fn test_ids_start_at_one() {
        let pool = ResourceTokenPool::new(4);
        assert_eq!(pool.acquire(TaskId(1), "file", AccessMask::READ).unwrap(), TokenId(1));
        assert_eq!(pool.acquire(TaskId(1), "socket", AccessMask::WRITE).unwrap(), TokenId(2));
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn test_exhaustion_and_recovery() {
        let pool = ResourceTokenPool::new(3);
        for _ in 0..3 {
            pool.acquire(TaskId(1), "r", AccessMask::READ).unwrap();
        }
        assert_eq!(
            pool.acquire(TaskId(1), "r", AccessMask::READ),
            Err(GovernanceError::TokenPoolExhausted { capacity: 3 })
        );

        pool.release(TokenId(2)).unwrap();
        assert!(pool.acquire(TaskId(2), "r", AccessMask::READ).is_ok());
        assert!(pool.acquire(TaskId(2), "r", AccessMask::READ).is_err());
    }

    #[test]
    fn test_release_out_of_range() {
        let pool = ResourceTokenPool::new(2);
        assert_eq!(pool.release(TokenId(0)), Err(GovernanceError::InvalidToken(TokenId(0))));
        assert_eq!(pool.release(TokenId(3)), Err(GovernanceError::InvalidToken(TokenId(3))));
    }

    #[test]
    fn test_double_release_is_noop() {
        let pool = ResourceTokenPool::new(2);
        let id = pool.acquire(TaskId(9), "file", AccessMask::READ).unwrap();

        assert_eq!(pool.release(id).unwrap(), Some(TaskId(9)));
        assert_eq!(pool.release(id).unwrap(), None);
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn test_release_clears_slot() {
        let pool = ResourceTokenPool::new(1);
        let id = pool.acquire(TaskId(3), "shared_memory", AccessMask::READ_WRITE).unwrap();
        pool.mark_transferable(id, true).unwrap();
        pool.release(id).unwrap();

        let token = pool.get(id).unwrap();
        assert_eq!(token.state, TokenState::Free);
        assert_eq!(token.owner_task_id, None);
        assert!(token.resource_name.is_empty());
        assert!(!token.transferable);
    }

    #[test]
    fn test_mark_transferable_rejects_free_and_unknown_tokens() {
        let pool = ResourceTokenPool::new(2);
        assert!(pool.mark_transferable(TokenId(1), true).is_err());
        assert!(pool.mark_transferable(TokenId(5), true).is_err());
    }

    #[test]
    fn test_transfer_moves_only_transferable_tokens() {
        let pool = ResourceTokenPool::new(4);
        let t1 = pool.acquire(TaskId(1), "a", AccessMask::READ).unwrap();
        let t2 = pool.acquire(TaskId(1), "b", AccessMask::READ).unwrap();
        let t3 = pool.acquire(TaskId(3), "c", AccessMask::READ).unwrap();
        pool.mark_transferable(t1, true).unwrap();
        pool.mark_transferable(t3, true).unwrap();

        let moved = pool.transfer_owned(TaskId(1), TaskId(2));
        assert_eq!(moved, vec![t1]);
        assert_eq!(pool.get(t1).unwrap().owner_task_id, Some(TaskId(2)));
        assert_eq!(pool.get(t2).unwrap().owner_task_id, Some(TaskId(1)));
        assert_eq!(pool.get(t3).unwrap().owner_task_id, Some(TaskId(3)));
    }

    #[test]
    fn test_release_owned_by() {
        let pool = ResourceTokenPool::new(3);
        let a = pool.acquire(TaskId(4), "a", AccessMask::READ).unwrap();
        pool.acquire(TaskId(5), "b", AccessMask::READ).unwrap();
        let c = pool.acquire(TaskId(4), "c", AccessMask::WRITE).unwrap();

        assert_eq!(pool.release_owned_by(TaskId(4)), vec![a, c]);
        assert!(pool.tokens_owned_by(TaskId(4)).is_empty());
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn test_reclaim_unowned() {
        let pool = ResourceTokenPool::new(3);
        pool.acquire(TaskId(1), "a", AccessMask::READ).unwrap();
        let leaked = pool.acquire(TaskId(2), "b", AccessMask::READ).unwrap();

        let reclaimed = pool.reclaim_unowned(|owner| owner == TaskId(1));
        assert_eq!(reclaimed, vec![leaked]);
        assert_eq!(pool.tokens_owned_by(TaskId(1)).len(), 1);
        assert_eq!(pool.in_use(), 1);
    }
}
