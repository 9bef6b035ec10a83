//! Liveness querying of the remote application.
//!
//! Once the channel is open the client sends loading-state queries every few
//! seconds until something answers. The first answer only proves the remote
//! is alive, so one more query is sent straight away to learn what it has
//! loaded.

use stage_proto::OutboundMessage;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::scheduler::Scheduler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessPhase {
    /// First answer: the remote is alive. A follow-up query is due.
    FirstContact,
    /// Any later answer carries the remote's application state.
    StateReport,
}

#[derive(Debug, Clone, Copy)]
struct Requery;

pub struct LivenessPoller {
    ready: bool,
    interval: Duration,
    timers: Scheduler<Requery>,
}

impl LivenessPoller {
    pub fn new(interval: Duration) -> Self {
        Self {
            ready: false,
            interval,
            timers: Scheduler::new(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Query to send now. While the remote has not answered, another query is
    /// scheduled one interval out.
    pub fn query(&mut self, now: Instant) -> OutboundMessage {
        if !self.ready {
            self.timers.cancel_all();
            self.timers.schedule_in(now, self.interval, Requery);
        }
        OutboundMessage::loading_state_query()
    }

    /// Drops outstanding requeries and, while still waiting for the remote,
    /// starts a fresh chain without sending anything now.
    pub fn rearm(&mut self, now: Instant) {
        self.timers.cancel_all();
        if !self.ready {
            self.timers.schedule_in(now, self.interval, Requery);
        }
    }

    pub fn on_response(&mut self) -> LivenessPhase {
        if self.ready {
            return LivenessPhase::StateReport;
        }
        self.ready = true;
        self.timers.cancel_all();
        debug!(target: "stage_viewer::scene", "remote application answered liveness query");
        LivenessPhase::FirstContact
    }

    /// The next query, once the retry timer has elapsed.
    pub fn fire_due(&mut self, now: Instant) -> Option<OutboundMessage> {
        let mut fired = false;
        while self.timers.pop_due(now).is_some() {
            fired = true;
        }
        if fired && !self.ready {
            debug!(target: "stage_viewer::scene", "remote application still silent; requerying");
            return Some(self.query(now));
        }
        None
    }

    pub fn next_deadline(&mut self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    pub fn cancel(&mut self) {
        self.timers.cancel_all();
    }

    pub fn pending(&self) -> usize {
        self.timers.pending()
    }
}
