//! Concurrency wiring (`spec.md` §5): three cooperating activities over
//! channels, mirroring the teacher's mailbox pattern — an RX activity, a
//! command-ingress activity, and a single-worker command-egress
//! activity. Each owns its state; the only shared mutable state is the
//! rate limiter's budgets and the transmitter's serialized writer.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::audit::{AuditEvent, AuditLog};
use crate::command::codec;
use crate::command::validate::Validator;
use crate::command::validate::PolicyConfig;
use crate::command::CandidateCommand;
use crate::decode::FrameDecoder;
use crate::entity::{project::EntityProjector, EntityIndex};
use crate::error::{CommandAck, CommandError, CommandFeedback, EncoderError, ValidatorCode};
use crate::frame::parse_slcan_line;
use crate::mqtt::MqttBridge;
use crate::ratelimit::RateLimiter;
use crate::registry::SpecRegistry;
use crate::transmit::Transmitter;
use crate::transport::{SlcanReader, SlcanTransport};

/// Immutable, process-wide state initialized once before any activity
/// starts (`spec.md` §6 "process-wide state lifecycle").
pub struct CoreState {
    pub registry: SpecRegistry,
    pub entities: EntityIndex,
    pub policy: PolicyConfig,
    pub rate_limiter: RateLimiter,
    pub audit: AuditLog,
}

/// RX activity: pulls SLCAN lines, decodes and projects them, and
/// publishes entity state. Never blocks on the bus writer (`spec.md` §5
/// activity 1).
pub async fn run_rx<R: SlcanReader>(mut reader: R, state: Arc<CoreState>, mqtt: Arc<MqttBridge>) {
    loop {
        match reader.read_line().await {
            Ok(Some(line)) => {
                let Some(frame) = parse_slcan_line(&line) else {
                    continue;
                };
                let decoder = FrameDecoder::new(&state.registry);
                match decoder.decode(&frame) {
                    Ok(msg) => {
                        state
                            .audit
                            .emit(AuditEvent::FrameDecoded { dgn_name: msg.dgn_name.clone(), instance: msg.instance })
                            .await;
                        let projector = EntityProjector::new(&state.entities);
                        for event in projector.project(&msg) {
                            state
                                .audit
                                .emit(AuditEvent::EntityStateEmitted {
                                    entity_id: event.entity_id.clone(),
                                    channel: event.channel.to_string(),
                                })
                                .await;
                            mqtt.publish_state(&event).await;
                        }
                    }
                    Err(warning) => {
                        state.audit.emit(AuditEvent::FrameDropped { reason: format!("{warning:?}") }).await;
                    }
                }
            }
            Ok(None) => {
                warn!("SLCAN transport closed, RX activity exiting");
                break;
            }
            Err(e) => {
                error!(error = %e, "SLCAN read error, RX activity exiting");
                break;
            }
        }
    }
}

/// Command-ingress activity: forwards parsed `CandidateCommand`s onto
/// the egress queue, preserving arrival order (`spec.md` §5 activity 2).
pub async fn run_ingress(mut commands: mpsc::Receiver<CandidateCommand>, egress_tx: mpsc::Sender<CandidateCommand>) {
    while let Some(cmd) = commands.recv().await {
        if egress_tx.send(cmd).await.is_err() {
            break;
        }
    }
}

/// Command-egress activity: single-worker FIFO validate -> encode ->
/// transmit loop (`spec.md` §5 activity 3, "single-worker is the
/// reference model").
pub async fn run_egress<T: SlcanTransport>(
    mut queue: mpsc::Receiver<CandidateCommand>,
    state: Arc<CoreState>,
    transmitter: Arc<Transmitter<T>>,
    feedback_tx: mpsc::Sender<CommandFeedback>,
) {
    while let Some(candidate) = queue.recv().await {
        let entity_id = candidate.entity_id.clone();
        let family = candidate.family;
        state.audit.emit(AuditEvent::CommandReceived { entity_id: entity_id.clone() }).await;

        let validator = Validator::new(&state.entities, &state.policy, &state.rate_limiter);
        let normalized = match validator.validate(candidate) {
            Ok(n) => n,
            Err(e) => {
                state
                    .audit
                    .emit(AuditEvent::CommandRejected {
                        entity_id: entity_id.clone(),
                        code: e.code.as_str().to_string(),
                        message: e.msg.clone(),
                    })
                    .await;
                let _ = feedback_tx.send(CommandFeedback::Error((entity_id.as_str(), e).into())).await;
                continue;
            }
        };
        state.audit.emit(AuditEvent::CommandValidated { entity_id: entity_id.clone() }).await;

        let descriptor = match state.entities.by_entity_id(&entity_id) {
            Some(d) => d,
            None => {
                state
                    .audit
                    .emit(AuditEvent::CommandRejected {
                        entity_id: entity_id.clone(),
                        code: ValidatorCode::E006UnknownEntity.as_str().to_string(),
                        message: format!("{entity_id} vanished from the entity index after validation"),
                    })
                    .await;
                let _ = feedback_tx
                    .send(CommandFeedback::Error(CommandError {
                        entity_id,
                        code: ValidatorCode::E006UnknownEntity.as_str().to_string(),
                        message: "entity no longer present in the entity index".to_string(),
                    }))
                    .await;
                continue;
            }
        };
        let sequence = match codec::encode(descriptor, &normalized) {
            Ok(s) => s,
            Err(e) => {
                state
                    .audit
                    .emit(AuditEvent::CommandRejected {
                        entity_id: entity_id.clone(),
                        code: EncoderError::CODE.to_string(),
                        message: e.msg.clone(),
                    })
                    .await;
                let _ = feedback_tx
                    .send(CommandFeedback::Error(CommandError {
                        entity_id,
                        code: EncoderError::CODE.to_string(),
                        message: e.msg,
                    }))
                    .await;
                continue;
            }
        };

        let started = Instant::now();
        match transmitter.transmit(&sequence).await {
            Ok(()) => {
                let latency_ms = started.elapsed().as_millis() as u64;
                state
                    .audit
                    .emit(AuditEvent::CommandTransmitted { entity_id: entity_id.clone(), latency_ms })
                    .await;
                let _ = feedback_tx
                    .send(CommandFeedback::Ack(CommandAck {
                        entity_id,
                        family,
                        action: normalized.action,
                        value: normalized.value,
                        latency_ms,
                    }))
                    .await;
            }
            Err(e) => {
                state
                    .audit
                    .emit(AuditEvent::CommandTransmitFailed {
                        entity_id: entity_id.clone(),
                        code: "E101".to_string(),
                        message: e.to_string(),
                    })
                    .await;
                let _ = feedback_tx
                    .send(CommandFeedback::Error(CommandError { entity_id, code: "E101".to_string(), message: e.to_string() }))
                    .await;
            }
        }
    }
    info!("command-egress activity exiting: queue closed");
}
