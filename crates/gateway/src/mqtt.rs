//! Transporte MQTT para o Cloud IoT (rumqttc, TLS).
//!
//! O event loop roda na thread `mqtt-eventloop`: reconecta sozinho, renova o
//! JWT antes de cada nova tentativa e se inscreve no tópico de configuração
//! a cada ConnAck. `publish` apenas enfileira (QoS 1, fire-and-forget).

use cloudbridge_core::config::CloudConfig;
use cloudbridge_core::error::BridgeError;
use cloudbridge_core::pipeline::ShutdownFlag;
use cloudbridge_core::transport::{AuthSupplier, Publisher};
use cloudbridge_core::types::Qos;
use rumqttc::{
    Client, ConnectReturnCode, Connection, ConnectionError, Event, MqttOptions, Packet, QoS,
    SubscribeReasonCode, Transport,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Usuário ignorado pelo bridge; a autenticação é só o JWT.
const MQTT_USERNAME: &str = "unused";
/// Capacidade da fila de requisições do cliente.
const REQUEST_CAPACITY: usize = 16;
/// Espera entre tentativas de reconexão.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

pub fn to_mqtt_qos(qos: Qos) -> QoS {
    match qos {
        Qos::AtMostOnce => QoS::AtMostOnce,
        Qos::AtLeastOnce => QoS::AtLeastOnce,
        Qos::ExactlyOnce => QoS::ExactlyOnce,
    }
}

/// Cliente MQTT com estado de conexão compartilhado com o event loop.
pub struct MqttPublisher {
    client: Client,
    connected: Arc<AtomicBool>,
    event_loop: Option<JoinHandle<()>>,
}

impl MqttPublisher {
    /// Monta as opções, inicia o event loop e retorna sem esperar o ConnAck.
    pub fn connect<A>(
        cloud: &CloudConfig,
        auth: Arc<A>,
        shutdown: ShutdownFlag,
    ) -> Result<Self, BridgeError>
    where
        A: AuthSupplier + Send + Sync + 'static,
    {
        let ca = std::fs::read(&cloud.root_cert_path).map_err(|e| {
            BridgeError::TransportUnavailable(format!(
                "Erro ao ler certificados raiz {}: {e}",
                cloud.root_cert_path
            ))
        })?;

        let mut options = MqttOptions::new(cloud.client_id(), &cloud.mqtt_host, cloud.mqtt_port);
        options
            .set_credentials(MQTT_USERNAME, auth.current_token()?)
            .set_keep_alive(Duration::from_secs(cloud.keep_alive_secs))
            .set_transport(Transport::tls(ca, None, None));

        let (client, connection) = Client::new(options, REQUEST_CAPACITY);
        let connected = Arc::new(AtomicBool::new(false));

        let handle = {
            let client = client.clone();
            let connected = connected.clone();
            let config_topic = cloud.config_topic();
            std::thread::Builder::new()
                .name("mqtt-eventloop".into())
                .spawn(move || {
                    event_loop(connection, &client, &connected, auth.as_ref(), &config_topic, &shutdown)
                })
                .map_err(|e| {
                    BridgeError::TransportUnavailable(format!("Falha ao criar thread MQTT: {e}"))
                })?
        };

        info!(
            "Conectando a {}:{} como {}",
            cloud.mqtt_host,
            cloud.mqtt_port,
            cloud.client_id()
        );
        Ok(Self {
            client,
            connected,
            event_loop: Some(handle),
        })
    }

    /// Espera o primeiro ConnAck até `timeout`.
    pub fn wait_for_connection(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.is_connected() {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(100));
        }
        true
    }

    /// Envia DISCONNECT e aguarda o event loop terminar.
    pub fn disconnect(mut self) {
        if let Err(e) = self.client.try_disconnect() {
            debug!("Disconnect não enviado: {e}");
        }
        if let Some(handle) = self.event_loop.take() {
            let _ = handle.join();
        }
        info!("Cliente MQTT encerrado");
    }
}

impl Publisher for MqttPublisher {
    fn publish(&self, topic: &str, payload: &str, qos: Qos) -> Result<(), BridgeError> {
        if !self.is_connected() {
            return Err(BridgeError::TransportUnavailable(
                "sem conexão com o broker".into(),
            ));
        }
        self.client
            .try_publish(topic, to_mqtt_qos(qos), false, payload.as_bytes().to_vec())
            .map_err(|e| BridgeError::TransportUnavailable(e.to_string()))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

fn event_loop<A: AuthSupplier + ?Sized>(
    mut connection: Connection,
    client: &Client,
    connected: &AtomicBool,
    auth: &A,
    config_topic: &str,
    shutdown: &ShutdownFlag,
) {
    while !shutdown.is_requested() {
        let Some(notification) = connection.iter().next() else {
            break;
        };

        match notification {
            // ConnAck com código de erro chega como `ConnectionRefused`
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                connected.store(true, Ordering::SeqCst);
                info!("Conectado ao bridge MQTT");
                if let Err(e) = client.try_subscribe(config_topic, QoS::AtLeastOnce) {
                    warn!("Falha ao se inscrever em {config_topic}: {e}");
                }
            }
            Ok(Event::Incoming(Packet::PubAck(ack))) => {
                debug!("Publicação confirmada (pkid {})", ack.pkid);
            }
            Ok(Event::Incoming(Packet::SubAck(ack))) => {
                for code in &ack.return_codes {
                    match code {
                        SubscribeReasonCode::Success(qos) => {
                            info!("Inscrito em {config_topic} ({qos:?})");
                        }
                        SubscribeReasonCode::Failure => {
                            warn!("Inscrição em {config_topic} recusada");
                        }
                    }
                }
            }
            Ok(Event::Incoming(Packet::Publish(message))) => {
                handle_config_message(&message.topic, &message.payload);
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                connected.store(false, Ordering::SeqCst);
                warn!("Broker encerrou a conexão");
            }
            Ok(Event::Outgoing(rumqttc::Outgoing::Disconnect)) => {
                connected.store(false, Ordering::SeqCst);
                break;
            }
            Ok(_) => {}
            Err(e) => {
                connected.store(false, Ordering::SeqCst);
                match refusal_code(&e) {
                    Some(code) => warn!("Conexão recusada pelo broker: {code:?}"),
                    None => warn!("Conexão MQTT perdida: {e}"),
                }

                // O bridge derruba a sessão quando o JWT expira
                match auth.current_token() {
                    Ok(token) => {
                        connection
                            .eventloop
                            .mqtt_options
                            .set_credentials(MQTT_USERNAME, token);
                    }
                    Err(e) => error!("Não foi possível renovar o JWT: {e}"),
                }

                if shutdown.sleep(RECONNECT_DELAY) {
                    break;
                }
            }
        }
    }
    connected.store(false, Ordering::SeqCst);
    debug!("Event loop MQTT encerrado");
}

/// Código do ConnAck quando o broker recusou a sessão (ex.: JWT expirado).
fn refusal_code(e: &ConnectionError) -> Option<ConnectReturnCode> {
    match e {
        ConnectionError::ConnectionRefused(code) => Some(*code),
        _ => None,
    }
}

/// Registra a configuração enviada pela nuvem. Payload vazio = sem config.
pub fn handle_config_message(topic: &str, payload: &[u8]) -> Option<serde_json::Value> {
    if payload.is_empty() {
        debug!("Config vazia recebida em {topic}");
        return None;
    }

    match serde_json::from_slice::<serde_json::Value>(payload) {
        Ok(config) => {
            info!("Config recebida em {topic}: {config}");
            Some(config)
        }
        Err(e) => {
            warn!(
                "Config inválida em {topic} ({e}): {}",
                String::from_utf8_lossy(payload)
            );
            None
        }
    }
}
