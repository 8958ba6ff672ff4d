use std::{sync::Arc, time::Duration};

use tracing::debug;

use crate::registry::{ConnectionId, Registry};

/// Outcome of one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    pub failed: usize,
}

/// Fans a payload out to every registered connection but the sender.
#[derive(Clone)]
pub struct Broadcaster {
    registry: Arc<Registry>,
    send_timeout: Duration,
}

impl Broadcaster {
    pub fn new(registry: Arc<Registry>, send_timeout: Duration) -> Self {
        Self {
            registry,
            send_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Write `payload` to every member except `exclude`.
    ///
    /// The registry lock is held for the whole iteration. A failing target is
    /// logged and skipped; it stays registered until its own session notices
    /// the broken stream and leaves.
    pub async fn broadcast(&self, payload: &[u8], exclude: Option<ConnectionId>) -> Delivery {
        let mut members = self.registry.lock_members().await;
        let mut delivery = Delivery::default();

        for handle in members.values_mut() {
            if Some(handle.id()) == exclude {
                continue;
            }
            match handle.send(payload, self.send_timeout).await {
                Ok(()) => delivery.delivered += 1,
                Err(error) => {
                    debug!(
                        peer = %handle.peer(),
                        name = handle.name(),
                        ?error,
                        "failed to deliver message"
                    );
                    delivery.failed += 1;
                }
            }
        }

        delivery
    }
}
