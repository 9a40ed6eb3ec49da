// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
// Event Bus Implementation - Pub/Sub for Governance Events
//
// In-memory fan-out over a tokio broadcast channel. The CLI demo and the
// integration tests observe lifecycle, token and context-switch activity
// through it. Events are lost when no one is subscribed.

use crate::domain::events::{ContextSwitchEvent, TaskLifecycleEvent, TokenEvent};
use crate::domain::task::TaskId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Unified governance event type for the event bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GovernanceEvent {
    Lifecycle(TaskLifecycleEvent),
    Token(TokenEvent),
    ContextSwitch(ContextSwitchEvent),
}

impl GovernanceEvent {
    pub fn involves(&self, task_id: TaskId) -> bool {
        match self {
            GovernanceEvent::Lifecycle(event) => event.involves(task_id),
            GovernanceEvent::Token(event) => event.involves(task_id),
            GovernanceEvent::ContextSwitch(event) => event.involves(task_id),
        }
    }
}

#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<GovernanceEvent>>,
}

impl EventBus {
    /// Capacity bounds how many events a slow subscriber may fall behind
    /// before it starts missing them.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn publish_lifecycle_event(&self, event: TaskLifecycleEvent) {
        self.publish(GovernanceEvent::Lifecycle(event));
    }

    pub fn publish_token_event(&self, event: TokenEvent) {
        self.publish(GovernanceEvent::Token(event));
    }

    pub fn publish_switch_event(&self, event: ContextSwitchEvent) {
        self.publish(GovernanceEvent::ContextSwitch(event));
    }

    fn publish(&self, event: GovernanceEvent) {
        debug!("Publishing event: {:?}", event);

        // send() only fails when nobody is listening
        if self.sender.send(event).is_err() {
            debug!("No subscribers listening to event");
        }
    }

    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Subscribe to the events that mention one task, as subject, parent or
    /// context-switch peer.
    pub fn subscribe_task(&self, task_id: TaskId) -> TaskEventReceiver {
        TaskEventReceiver {
            receiver: self.sender.subscribe(),
            task_id,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

fn map_recv_error(error: broadcast::error::RecvError) -> EventBusError {
    match error {
        broadcast::error::RecvError::Closed => EventBusError::Closed,
        broadcast::error::RecvError::Lagged(n) => {
            warn!("Event receiver lagged by {} events", n);
            EventBusError::Lagged(n)
        }
    }
}

pub struct EventReceiver {
    receiver: broadcast::Receiver<GovernanceEvent>,
}

impl EventReceiver {
    pub async fn recv(&mut self) -> Result<GovernanceEvent, EventBusError> {
        self.receiver.recv().await.map_err(map_recv_error)
    }

    pub fn try_recv(&mut self) -> Result<GovernanceEvent, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }
}

pub struct TaskEventReceiver {
    receiver: broadcast::Receiver<GovernanceEvent>,
    task_id: TaskId,
}

impl TaskEventReceiver {
    pub async fn recv(&mut self) -> Result<GovernanceEvent, EventBusError> {
        loop {
            let event = self.receiver.recv().await.map_err(map_recv_error)?;
            if event.involves(self.task_id) {
                return Ok(event);
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus is closed")]
    Closed,

    #[error("No events available")]
    Empty,

    #[error("Receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::task::DestroyPolicy;
    use chrono::Utc;

    fn spawned(task_id: u64, parent_id: Option<u64>) -> TaskLifecycleEvent {
        TaskLifecycleEvent::TaskSpawned {
            task_id: TaskId(task_id),
            parent_id: parent_id.map(TaskId),
            destroy_policy: DestroyPolicy::Cascade,
            generation_depth: u32::from(parent_id.is_some()),
            spawned_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_event_bus_publish_subscribe() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe();

        event_bus.publish_lifecycle_event(spawned(7, None));

        match receiver.recv().await.unwrap() {
            GovernanceEvent::Lifecycle(TaskLifecycleEvent::TaskSpawned { task_id, .. }) => {
                assert_eq!(task_id, TaskId(7));
            }
            other => panic!("Wrong event type received: {other:?}"),
        }
        assert!(matches!(receiver.try_recv(), Err(EventBusError::Empty)));
    }

    #[tokio::test]
    async fn test_task_event_filtering() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe_task(TaskId(2));

        event_bus.publish_lifecycle_event(spawned(1, None));
        event_bus.publish_switch_event(ContextSwitchEvent::ContextSwitchDenied {
            from: TaskId(5),
            to: TaskId(2),
            denied_at: Utc::now(),
        });

        match receiver.recv().await.unwrap() {
            GovernanceEvent::ContextSwitch(ContextSwitchEvent::ContextSwitchDenied { from, .. }) => {
                assert_eq!(from, TaskId(5));
            }
            other => panic!("Wrong event type received: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let event_bus = EventBus::new(10);
        let mut receiver1 = event_bus.subscribe();
        let mut receiver2 = event_bus.subscribe();
        assert_eq!(event_bus.subscriber_count(), 2);

        event_bus.publish_token_event(TokenEvent::TokensReclaimed {
            token_ids: vec![],
            reclaimed_at: Utc::now(),
        });

        let _ = receiver1.recv().await.unwrap();
        let _ = receiver2.recv().await.unwrap();
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = GovernanceEvent::Lifecycle(spawned(3, Some(1)));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "lifecycle");
        assert_eq!(json["TaskSpawned"]["task_id"], 3);
    }
}
