//! Command dispatch with a FIFO backlog for when no transport is attached

use std::collections::VecDeque;

use gse_transport::Link;
use gse_types::Command;
use tracing::{debug, info, warn};

/// Sends commands over the current link, queueing them while disconnected.
#[derive(Debug, Default)]
pub struct CommandDispatcher {
    queue: VecDeque<Command>,
}

impl CommandDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transmits `command` immediately when `link` is present and alive.
    ///
    /// Returns `false` when the command was queued instead.
    pub fn submit(&mut self, command: Command, link: Option<&Link>) -> bool {
        let command = match link {
            Some(link) => match link.send(command) {
                Ok(()) => return true,
                Err(command) => {
                    warn!(command = command.tag(), "Transport closed under us, queuing command");
                    command
                }
            },
            None => {
                warn!(command = command.tag(), "Hardware not connected, queuing command");
                command
            }
        };
        self.queue.push_back(command);
        false
    }

    /// Sends the backlog in submission order. Stops at the first command the
    /// link refuses and leaves it (and everything after it) queued.
    pub fn drain(&mut self, link: &Link) -> usize {
        let mut sent = 0;
        while let Some(command) = self.queue.pop_front() {
            if let Err(command) = link.send(command) {
                self.queue.push_front(command);
                warn!(remaining = self.queue.len(), "Link failed while draining backlog");
                break;
            }
            sent += 1;
        }
        if sent > 0 {
            info!(sent, "Processed queued commands");
        } else {
            debug!("No queued commands to process");
        }
        sent
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn queued(&self) -> impl Iterator<Item = &Command> {
        self.queue.iter()
    }
}
