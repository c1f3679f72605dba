use crate::scheduler::{Publisher, PublisherStatus};
use crate::sink::Sink;
use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Started,
    Stopped,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentStatus {
    pub session: SessionState,
    #[serde(flatten)]
    pub publisher: PublisherStatus,
}

pub enum AgentCommand {
    Session(SessionState),
    GetStatus {
        respond_to: oneshot::Sender<AgentStatus>,
    },
}

#[derive(Clone)]
pub struct AgentHandle {
    tx: mpsc::UnboundedSender<AgentCommand>,
}

impl AgentHandle {
    pub fn set_session(&self, state: SessionState) {
        let _ = self.tx.send(AgentCommand::Session(state));
    }

    pub async fn status(&self) -> Result<AgentStatus> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(AgentCommand::GetStatus { respond_to: tx })
            .map_err(|_| anyhow!("publisher task stopped"))?;
        rx.await.context("publisher task dropped response")
    }
}

/// Wall-clock milliseconds since the epoch; zero if the clock is before it.
pub fn now_ms() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
}

/// Spawns the task that owns the publisher. Every tick and every status query runs on it, one
/// at a time. Ticks only fire while the session is started.
pub fn spawn_agent(
    mut publisher: Publisher,
    mut sink: Box<dyn Sink>,
    period: Duration,
) -> (AgentHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<AgentCommand>();

    let task = tokio::spawn(async move {
        let mut session = SessionState::Stopped;
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                maybe = rx.recv() => {
                    let Some(command) = maybe else { break; };
                    match command {
                        AgentCommand::Session(next) if next == session => {
                            tracing::debug!(session = ?next, "session state unchanged");
                        }
                        AgentCommand::Session(next) => {
                            if next == SessionState::Started {
                                ticker.reset();
                                tracing::info!(period_ms = period.as_millis() as u64, "session started; sampling");
                            } else {
                                tracing::info!("session stopped; sampling paused");
                            }
                            session = next;
                        }
                        AgentCommand::GetStatus { respond_to } => {
                            let _ = respond_to.send(AgentStatus {
                                session,
                                publisher: publisher.status(),
                            });
                        }
                    }
                }

                _ = ticker.tick(), if session == SessionState::Started => {
                    publisher.tick(now_ms(), sink.as_mut());
                }
            }
        }

        tracing::debug!("publisher task exiting");
    });

    (AgentHandle { tx }, task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PublishPolicy;
    use crate::quantity::Temperature;
    use crate::sensor::fakes::ScriptedDriver;
    use crate::sensor::Descriptor;
    use crate::sink::fakes::RecordingSink;

    fn spawn_with_readings(count: usize) -> (AgentHandle, JoinHandle<()>) {
        let driver = ScriptedDriver::new();
        for _ in 0..count {
            driver.push(Temperature(20.0));
        }
        let publisher = Publisher::new(
            vec![Descriptor::boxed("temperature", driver)],
            PublishPolicy::default(),
            64,
        );
        spawn_agent(publisher, Box::new(RecordingSink::default()), Duration::from_millis(10))
    }

    #[tokio::test]
    async fn no_ticks_before_session_starts() {
        let (agent, _task) = spawn_with_readings(100);

        time::sleep(Duration::from_millis(50)).await;
        let status = agent.status().await.unwrap();

        assert_eq!(status.session, SessionState::Stopped);
        assert_eq!(status.publisher.state.last_publish_time_ms, 0);
        assert_eq!(status.publisher.sensors[0].last_read_time_ms, 0);
    }

    #[tokio::test]
    async fn started_session_samples_and_publishes() {
        let (agent, _task) = spawn_with_readings(1_000);

        agent.set_session(SessionState::Started);
        // Re-applying the current state is a no-op.
        agent.set_session(SessionState::Started);
        time::sleep(Duration::from_millis(100)).await;
        let status = agent.status().await.unwrap();

        assert_eq!(status.session, SessionState::Started);
        assert!(status.publisher.state.last_publish_time_ms > 0);
        assert!(status.publisher.sensors[0].last_read_time_ms >= status.publisher.state.last_publish_time_ms);

        agent.set_session(SessionState::Stopped);
        let stopped = agent.status().await.unwrap();
        assert_eq!(stopped.session, SessionState::Stopped);

        let read_at_stop = stopped.publisher.sensors[0].last_read_time_ms;
        time::sleep(Duration::from_millis(50)).await;
        let later = agent.status().await.unwrap();
        assert_eq!(later.publisher.sensors[0].last_read_time_ms, read_at_stop);
    }

    #[tokio::test]
    async fn status_fails_once_task_is_gone() {
        let (agent, task) = spawn_with_readings(0);
        task.abort();
        let _ = task.await;

        assert!(agent.status().await.is_err());
    }
}
