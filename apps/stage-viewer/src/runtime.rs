//! The cooperative event loop.
//!
//! Channel events, user intents and timer deadlines are taken one at a time
//! and each is handled to completion before the next is looked at, so the
//! controller and synchronizer never see interleaved mutations.

use std::future;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};

use crate::channel::{ChannelEvent, MessageChannel};
use crate::scene::{SceneSnapshot, SceneSynchronizer};
use crate::session::{Session, SessionController, Teardown};

/// Intents submitted by the user interface.
#[derive(Debug)]
pub enum ViewerCommand {
    ToggleSelection(String),
    SelectAsset(String),
    ReloadAsset,
    ResetSelection,
    Snapshot(oneshot::Sender<SceneSnapshot>),
    SessionSnapshot(oneshot::Sender<Session>),
    EndSession,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunExit {
    /// The session was torn down on request.
    Ended,
    ChannelLost(Option<String>),
    Quit,
    CommandsClosed,
}

pub struct Runtime<C> {
    controller: SessionController,
    synchronizer: SceneSynchronizer<C>,
}

impl<C: MessageChannel> Runtime<C> {
    pub fn new(controller: SessionController, synchronizer: SceneSynchronizer<C>) -> Self {
        Self {
            controller,
            synchronizer,
        }
    }

    pub fn controller(&self) -> &SessionController {
        &self.controller
    }

    pub fn synchronizer(&self) -> &SceneSynchronizer<C> {
        &self.synchronizer
    }

    pub fn into_parts(self) -> (SessionController, SceneSynchronizer<C>) {
        (self.controller, self.synchronizer)
    }

    fn next_deadline(&mut self) -> Option<Instant> {
        match (
            self.synchronizer.next_deadline(),
            self.controller.next_deadline(),
        ) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub async fn run(
        &mut self,
        events: &mut mpsc::UnboundedReceiver<ChannelEvent>,
        commands: &mut mpsc::UnboundedReceiver<ViewerCommand>,
    ) -> RunExit {
        loop {
            let deadline = self.next_deadline();
            let timer = async move {
                match deadline {
                    Some(deadline) => sleep_until(deadline).await,
                    None => future::pending::<()>().await,
                }
            };

            tokio::select! {
                biased;

                event = events.recv() => {
                    let event = event.unwrap_or(ChannelEvent::Closed(None));
                    if let Some(exit) = self.on_channel_event(event).await {
                        return exit;
                    }
                }
                command = commands.recv() => {
                    let Some(command) = command else {
                        debug!(target: "stage_viewer::runtime", "command source closed");
                        self.synchronizer.shutdown();
                        return RunExit::CommandsClosed;
                    };
                    if let Some(exit) = self.on_command(command).await {
                        return exit;
                    }
                }
                _ = timer => {
                    self.fire_due(Instant::now()).await;
                }
            }
        }
    }

    async fn on_channel_event(&mut self, event: ChannelEvent) -> Option<RunExit> {
        let now = Instant::now();
        match event {
            ChannelEvent::Opened => {
                self.synchronizer.on_stream_started(now);
                None
            }
            ChannelEvent::Message(text) => {
                self.synchronizer.handle_text(&text, now);
                None
            }
            ChannelEvent::Closed(reason) => {
                self.synchronizer.shutdown();
                self.controller.handle_channel_loss(reason.as_deref()).await;
                Some(RunExit::ChannelLost(reason))
            }
        }
    }

    async fn on_command(&mut self, command: ViewerCommand) -> Option<RunExit> {
        let now = Instant::now();
        match command {
            ViewerCommand::ToggleSelection(path) => {
                if let Err(err) = self.synchronizer.toggle_selection(&path) {
                    warn!(target: "stage_viewer::runtime", error = %err, "selection rejected");
                }
            }
            ViewerCommand::SelectAsset(name) => {
                if let Err(err) = self.synchronizer.select_asset(&name, now) {
                    warn!(target: "stage_viewer::runtime", error = %err, "asset selection rejected");
                }
            }
            ViewerCommand::ReloadAsset => self.synchronizer.reload_asset(now),
            ViewerCommand::ResetSelection => self.synchronizer.reset_selection(),
            ViewerCommand::Snapshot(reply) => {
                let _ = reply.send(self.synchronizer.snapshot());
            }
            ViewerCommand::SessionSnapshot(reply) => {
                let _ = reply.send(self.controller.snapshot());
            }
            ViewerCommand::EndSession => match self.controller.end_session().await {
                Ok(Teardown::Destroyed) => {
                    self.synchronizer.shutdown();
                    return Some(RunExit::Ended);
                }
                Ok(Teardown::Skipped(status)) => {
                    info!(target: "stage_viewer::runtime", status = %status, "session left running");
                }
                Err(err) => {
                    warn!(target: "stage_viewer::runtime", error = %err, "failed to end session");
                }
            },
            ViewerCommand::Quit => {
                self.synchronizer.shutdown();
                if let Err(err) = self.controller.end_session().await {
                    debug!(target: "stage_viewer::runtime", error = %err, "no session teardown on quit");
                }
                return Some(RunExit::Quit);
            }
        }
        None
    }

    async fn fire_due(&mut self, now: Instant) {
        self.synchronizer.fire_due(now);
        if let Err(err) = self.controller.run_due(now).await {
            warn!(target: "stage_viewer::runtime", error = %err, "session poll failed");
        }
    }
}
