use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use rumqttc::Event as MqttEvent;
use rumqttc::Packet;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use rvc_mqtt_bridge::audit::{AuditEvent, AuditLog};
use rvc_mqtt_bridge::entity::EntityIndex;
use rvc_mqtt_bridge::error::CommandFeedback;
use rvc_mqtt_bridge::mqtt::{parse_command, MqttBridge, MqttConfig};
use rvc_mqtt_bridge::pipeline::{self, CoreState};
use rvc_mqtt_bridge::ratelimit::RateLimiter;
use rvc_mqtt_bridge::registry::SpecRegistry;
use rvc_mqtt_bridge::transmit::Transmitter;
use rvc_mqtt_bridge::transport::TcpSlcanTransport;
use rvc_mqtt_bridge::BridgeConfig;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the INI configuration file
    #[arg(short, long)]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = BridgeConfig::from_file(&args.config)?;

    info!(spec_file = %config.spec_file.display(), "loading RV-C spec registry");
    let registry = SpecRegistry::load_file(&config.spec_file)?;
    info!(dgn_count = registry.dgn_count(), "spec registry loaded");

    info!(entity_map_file = %config.entity_map_file.display(), "loading entity mapping");
    let entities = EntityIndex::load_file(&config.entity_map_file)?;
    info!(entity_count = entities.len(), "entity mapping loaded");

    let audit = AuditLog::with_file(1000, &config.audit_log_path, config.audit_log_max_bytes).await?;
    let rate_limiter = RateLimiter::new(config.rate_limit);

    let state = Arc::new(CoreState { registry, entities, policy: config.policy, rate_limiter, audit });

    let slcan = TcpSlcanTransport::connect(&config.slcan_host, config.slcan_port).await?;
    let (reader, writer) = slcan.into_split();
    let transmitter = Arc::new(Transmitter::new(writer, config.transmit));

    let (mqtt, mut eventloop) = MqttBridge::new(&MqttConfig {
        host: config.mqtt_host,
        port: config.mqtt_port,
        client_id: config.mqtt_client_id,
    });
    let mqtt = Arc::new(mqtt);
    mqtt.subscribe_commands().await?;

    let (ingress_tx, ingress_rx) = mpsc::channel(256);
    let (egress_tx, egress_rx) = mpsc::channel(256);
    let (feedback_tx, mut feedback_rx) = mpsc::channel(256);

    let mqtt_poll_state = state.clone();
    let mqtt_poll_feedback = feedback_tx.clone();
    let mqtt_poll = tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(MqttEvent::Incoming(Packet::Publish(publish))) => match parse_command(&publish.topic, &publish.payload) {
                    Ok(cmd) => {
                        if ingress_tx.send(cmd).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        mqtt_poll_state
                            .audit
                            .emit(AuditEvent::CommandRejected {
                                entity_id: publish.topic.clone(),
                                code: e.code.as_str().to_string(),
                                message: e.msg.clone(),
                            })
                            .await;
                        let _ = mqtt_poll_feedback
                            .send(CommandFeedback::Error((publish.topic.as_str(), e).into()))
                            .await;
                    }
                },
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "MQTT event loop error");
                }
            }
        }
    });

    let rx_handle = tokio::spawn(pipeline::run_rx(reader, state.clone(), mqtt.clone()));
    let ingress_handle = tokio::spawn(pipeline::run_ingress(ingress_rx, egress_tx));
    let egress_handle = tokio::spawn(pipeline::run_egress(egress_rx, state.clone(), transmitter, feedback_tx));
    let feedback_handle = tokio::spawn(async move {
        while let Some(feedback) = feedback_rx.recv().await {
            match feedback {
                CommandFeedback::Ack(ack) => {
                    info!(entity_id = %ack.entity_id, latency_ms = ack.latency_ms, "command acknowledged");
                }
                CommandFeedback::Error(err) => {
                    error!(entity_id = %err.entity_id, code = %err.code, message = %err.message, "command failed");
                }
            }
        }
    });

    info!("RV-C <-> MQTT bridge running. Press Ctrl+C to exit.");
    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    mqtt_poll.abort();
    rx_handle.abort();
    ingress_handle.abort();
    egress_handle.abort();
    feedback_handle.abort();

    Ok(())
}
