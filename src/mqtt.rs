use crate::agent::{AgentHandle, SessionState};
use crate::batch::Batch;
use crate::config::Config;
use crate::sink::{report_push_outcome, PushError, PushOutcome, PushTicket, Sink};
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, Outgoing, QoS};
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use uuid::Uuid;

const REQUEST_CHANNEL_CAPACITY: usize = 64;

/// Batch ids handed to the client but not yet given a packet id by the event loop, oldest first.
#[derive(Clone, Default)]
pub struct PendingBatches {
    queue: Arc<Mutex<VecDeque<Uuid>>>,
}

impl PendingBatches {
    fn lock(&self) -> MutexGuard<'_, VecDeque<Uuid>> {
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn pop_oldest(&self) -> Option<Uuid> {
        self.lock().pop_front()
    }

    fn len(&self) -> usize {
        self.lock().len()
    }
}

pub struct MqttSink {
    client: AsyncClient,
    topic: String,
    node_id: String,
    pending: PendingBatches,
}

impl MqttSink {
    pub fn new(client: AsyncClient, config: &Config) -> Self {
        Self {
            client,
            topic: config.record_topic(),
            node_id: config.node_id.clone(),
            pending: PendingBatches::default(),
        }
    }

    pub fn pending(&self) -> PendingBatches {
        self.pending.clone()
    }
}

impl Sink for MqttSink {
    fn push(&mut self, batch: &mut Batch) -> Result<PushTicket, PushError> {
        let batch_id = Uuid::new_v4();
        let payload = encode_record(batch_id, &self.node_id, batch)?;

        // The id is queued before the request so the poller can never see the packet first.
        let mut queue = self.pending.lock();
        queue.push_back(batch_id);
        if let Err(err) = self
            .client
            .try_publish(self.topic.clone(), QoS::AtLeastOnce, false, payload)
        {
            queue.pop_back();
            return Err(PushError::Rejected(err.to_string()));
        }
        drop(queue);

        let ticket = PushTicket {
            batch_id,
            entries: batch.len(),
        };
        batch.clear();
        Ok(ticket)
    }
}

fn encode_record(batch_id: Uuid, node_id: &str, batch: &Batch) -> Result<Vec<u8>, serde_json::Error> {
    let payload = json!({
        "batch_id": batch_id.to_string(),
        "node_id": node_id,
        "entries": batch.entries(),
    });
    serde_json::to_vec(&payload)
}

pub fn mqtt_options(config: &Config) -> MqttOptions {
    let mut mqttoptions = MqttOptions::new(
        config.mqtt_client_id.clone(),
        config.mqtt_host.clone(),
        config.mqtt_port,
    );
    mqttoptions.set_keep_alive(config.mqtt_keepalive());
    if let Some(username) = &config.mqtt_username {
        mqttoptions.set_credentials(
            username.clone(),
            config.mqtt_password.clone().unwrap_or_default(),
        );
    }
    mqttoptions
}

pub fn connect(config: &Config) -> (MqttSink, EventLoop) {
    let (client, eventloop) = AsyncClient::new(mqtt_options(config), REQUEST_CHANNEL_CAPACITY);
    (MqttSink::new(client, config), eventloop)
}

/// Packet ids of records on the wire, keyed back to their batch ids. Entries survive a
/// dropped connection: the client replays unacked publishes when the broker resumes the
/// session, and discards them (with any requests still queued) when it does not.
#[derive(Default)]
struct InFlight {
    by_pkid: HashMap<u16, Uuid>,
    /// Queued batches the client had taken into its own pending list when the link dropped.
    stranded: usize,
}

impl InFlight {
    /// Pairs an outgoing publish with the oldest queued batch. Replays of a packet already on
    /// the wire keep their original pairing.
    fn sent(&mut self, pkid: u16, pending: &PendingBatches) -> Option<Uuid> {
        if self.by_pkid.contains_key(&pkid) {
            tracing::debug!(pkid, "record publish replayed");
            return None;
        }
        let batch_id = pending.pop_oldest()?;
        self.by_pkid.insert(pkid, batch_id);
        Some(batch_id)
    }

    fn acked(&mut self, pkid: u16) -> Option<Uuid> {
        self.by_pkid.remove(&pkid)
    }

    fn disconnected(&mut self, pending: &PendingBatches) {
        self.stranded = pending.len();
    }

    /// Batches that will never be delivered because the broker started a fresh session.
    fn connected(&mut self, session_present: bool, pending: &PendingBatches) -> Vec<Uuid> {
        let stranded = std::mem::take(&mut self.stranded);
        if session_present {
            return Vec::new();
        }
        let mut lost: Vec<Uuid> = self.by_pkid.drain().map(|(_, batch_id)| batch_id).collect();
        lost.extend((0..stranded).map_while(|_| pending.pop_oldest()));
        lost
    }

    fn len(&self) -> usize {
        self.by_pkid.len()
    }
}

/// Drives the event loop: reports push outcomes and turns connection state into session
/// signals for the agent. Reconnects forever.
pub fn spawn_poller(
    mut eventloop: EventLoop,
    pending: PendingBatches,
    agent: AgentHandle,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut in_flight = InFlight::default();
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(connack))) => {
                    tracing::info!(session_present = connack.session_present, "MQTT connected");
                    for batch_id in in_flight.connected(connack.session_present, &pending) {
                        report_push_outcome(batch_id, PushOutcome::Failed);
                    }
                    agent.set_session(SessionState::Started);
                }
                Ok(Event::Outgoing(Outgoing::Publish(pkid))) => {
                    in_flight.sent(pkid, &pending);
                }
                Ok(Event::Incoming(Incoming::PubAck(ack))) => match in_flight.acked(ack.pkid) {
                    Some(batch_id) => report_push_outcome(batch_id, PushOutcome::Succeeded),
                    None => tracing::debug!(pkid = ack.pkid, "ack for unknown packet"),
                },
                Ok(_) => {}
                Err(err) => {
                    in_flight.disconnected(&pending);
                    agent.set_session(SessionState::Stopped);
                    tracing::warn!(
                        error=%err,
                        in_flight = in_flight.len(),
                        "MQTT connection lost; delivery of in-flight records unknown until reconnect"
                    );
                    sleep(Duration::from_secs(1)).await;
                }
            }
        }
    })
}
