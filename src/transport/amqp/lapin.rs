//! AMQP transport implementation using `lapin`.
//!
//! Each channel handed out by a [`LapinConnection`] is backed by an
//! **actor task** that owns the lapin `Channel`. All channel operations
//! (publish, declare, consume, close) are serialized through that actor, so
//! no other task ever touches the channel directly. This keeps the public
//! `Transport` contract (`Send + Sync`) independent of lapin's own
//! threading model.
//!
//! ## Message mapping
//!
//! - Publishing goes to the default exchange with routing key = queue name.
//! - The payload is sent as-is; correlation id, reply-to and content type
//!   travel in `BasicProperties`.
//! - Incoming deliveries map back the same way, with the routing key as the
//!   envelope address.
//!
//! ## Acknowledgement
//!
//! Consumers created with `auto_ack` use AMQP `no_ack`. Otherwise each
//! [`Delivery`] carries lapin's acker and stays unacknowledged until the
//! consumer acks it; the broker requeues it when the channel closes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use bytes::Bytes;
use futures_lite::stream::StreamExt;
use lapin::{
    //
    acker::Acker,
    options::{
        //
        BasicAckOptions,
        BasicConsumeOptions,
        BasicPublishOptions,
        QueueDeclareOptions,
    },
    types::FieldTable,
    BasicProperties,
    Channel,
    ConnectionProperties,
};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::{
    //
    log_debug,
    log_error,
    log_info,
    Acknowledge,
    Address,
    Connection,
    ConnectionConfig,
    ConnectionPtr,
    ConsumeOptions,
    Delivery,
    Envelope,
    QueueDeclaration,
    Result,
    RpcError,
    SubscriptionHandle,
    Transport,
    TransportPtr,
    JSON_CONTENT_TYPE,
};

//
// Actor commands
//

enum Cmd {
    //
    Publish {
        env: Envelope,
        resp: oneshot::Sender<Result<()>>,
    },
    Declare {
        decl: QueueDeclaration,
        resp: oneshot::Sender<Result<Address>>,
    },
    Consume {
        queue: Address,
        opts: ConsumeOptions,
        resp: oneshot::Sender<Result<SubscriptionHandle>>,
    },
    Close {
        resp: oneshot::Sender<Result<()>>,
    },
}

/// One AMQP channel, driven by its actor task.
struct AmqpTransport {
    // ---
    transport_id: String,
    cmd_tx: mpsc::Sender<Cmd>,
    actor: Mutex<Option<JoinHandle<()>>>,
}

impl AmqpTransport {
    /// Spawn the actor owning `channel`.
    fn spawn(transport_id: String, channel: Channel) -> Arc<Self> {
        // ---
        let (cmd_tx, cmd_rx) = mpsc::channel(16);

        let actor = Actor {
            transport_id: transport_id.clone(),
            channel,
            cmd_rx,
            consumers: Vec::new(),
        };
        let handle = tokio::spawn(actor.run());

        Arc::new(Self {
            transport_id,
            cmd_tx,
            actor: Mutex::new(Some(handle)),
        })
    }

    /// Send a command to the actor and wait for its answer.
    async fn request<T>(&self, cmd: impl FnOnce(oneshot::Sender<Result<T>>) -> Cmd) -> Result<T> {
        // ---
        let (tx, rx) = oneshot::channel();

        self.cmd_tx.send(cmd(tx)).await.map_err(|_| {
            RpcError::Transport(format!("[{}] amqp: channel is closed", self.transport_id))
        })?;

        rx.await.map_err(|e| {
            RpcError::Transport(format!(
                "[{}] amqp: actor responder channel read failed: {e}",
                self.transport_id
            ))
        })?
    }
}

#[async_trait::async_trait]
impl Transport for AmqpTransport {
    // ---
    fn transport_id(&self) -> &str {
        &self.transport_id
    }

    async fn publish(&self, env: Envelope) -> Result<()> {
        self.request(|resp| Cmd::Publish { env, resp }).await
    }

    async fn declare_queue(&self, decl: QueueDeclaration) -> Result<Address> {
        self.request(|resp| Cmd::Declare { decl, resp }).await
    }

    async fn consume(&self, queue: &Address, opts: ConsumeOptions) -> Result<SubscriptionHandle> {
        // ---
        let queue = queue.clone();
        self.request(|resp| Cmd::Consume { queue, opts, resp })
            .await
    }

    async fn close(&self) -> Result<()> {
        // ---
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(Cmd::Close { resp: tx }).await.is_err() {
            // Already closed
            return Ok(());
        }
        let result = rx.await.unwrap_or(Ok(()));

        let handle = self.actor.lock().ok().and_then(|mut guard| guard.take());
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        result
    }
}

/// Background task owning one lapin channel.
struct Actor {
    // ---
    transport_id: String,
    channel: Channel,
    cmd_rx: mpsc::Receiver<Cmd>,
    consumers: Vec<JoinHandle<()>>,
}

impl Actor {
    async fn run(mut self) {
        // ---
        log_debug!("[{}] AMQP channel actor started", self.transport_id);

        let mut close_resp = None;
        while let Some(cmd) = self.cmd_rx.recv().await {
            match cmd {
                Cmd::Publish { env, resp } => {
                    let _ = resp.send(self.do_publish(env).await);
                }
                Cmd::Declare { decl, resp } => {
                    let _ = resp.send(self.do_declare(decl).await);
                }
                Cmd::Consume { queue, opts, resp } => {
                    let _ = resp.send(self.do_consume(queue, opts).await);
                }
                Cmd::Close { resp } => {
                    close_resp = Some(resp);
                    break;
                }
            }
        }
        self.cmd_rx.close();

        for handle in self.consumers.drain(..) {
            handle.abort();
        }

        // Unacked deliveries on this channel are requeued by the broker.
        let result = self
            .channel
            .close(200, "Normal shutdown".into())
            .await
            .map_err(|e| {
                RpcError::Transport(format!("[{}] amqp: channel close failed: {e}", self.transport_id))
            });

        if let Some(resp) = close_resp {
            let _ = resp.send(result);
        }
        log_debug!("[{}] AMQP channel actor stopped", self.transport_id);
    }

    async fn do_publish(&mut self, env: Envelope) -> Result<()> {
        // ---
        let content_type = env.content_type.as_deref().unwrap_or(JSON_CONTENT_TYPE);
        let mut props = BasicProperties::default().with_content_type(content_type.into());
        if let Some(id) = env.correlation_id.as_deref() {
            props = props.with_correlation_id(id.into());
        }
        if let Some(reply_to) = &env.reply_to {
            props = props.with_reply_to(reply_to.as_str().into());
        }

        let queue = env.address.as_str();
        self.channel
            .basic_publish(
                "".into(),    // default exchange
                queue.into(), // routing key = queue name
                BasicPublishOptions::default(),
                &env.payload,
                props,
            )
            .await
            .map_err(|e| RpcError::Transport(format!("amqp: publish failed: {e}")))?;

        log_debug!("[{}] Published to queue: {queue}", self.transport_id);
        Ok(())
    }

    async fn do_declare(&mut self, decl: QueueDeclaration) -> Result<Address> {
        // ---
        // An empty name asks the broker to generate one.
        let name = decl
            .name
            .as_ref()
            .map(|name| name.as_str().to_string())
            .unwrap_or_default();

        let queue_opts = QueueDeclareOptions {
            passive: false,
            durable: decl.durable,
            exclusive: decl.exclusive,
            auto_delete: decl.auto_delete,
            nowait: false,
        };

        let queue = self
            .channel
            .queue_declare(name.into(), queue_opts, FieldTable::default())
            .await
            .map_err(|e| RpcError::Transport(format!("amqp: queue declare failed: {e}")))?;

        let address = Address::from(queue.name().as_str());
        log_info!("[{}] Declared queue: {address}", self.transport_id);
        Ok(address)
    }

    async fn do_consume(&mut self, queue: Address, opts: ConsumeOptions) -> Result<SubscriptionHandle> {
        // ---
        let consumer_tag = format!("{}-{}", self.transport_id, Uuid::new_v4().simple());

        let mut consumer = self
            .channel
            .basic_consume(
                queue.as_str().into(),
                consumer_tag.into(),
                BasicConsumeOptions {
                    no_ack: opts.auto_ack,
                    ..BasicConsumeOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| RpcError::Transport(format!("amqp: consume failed: {e}")))?;

        log_info!("[{}] Started consuming queue: {queue}", self.transport_id);

        let (tx, rx) = mpsc::unbounded_channel();
        let transport_id = self.transport_id.clone();
        let manual_ack = !opts.auto_ack;

        let handle = tokio::spawn(async move {
            // ---
            while let Some(delivery_result) = consumer.next().await {
                match delivery_result {
                    Ok(delivery) => {
                        log_debug!("[{transport_id}] Received message on queue: {queue}");

                        let acker: Option<Box<dyn Acknowledge>> = if manual_ack {
                            Some(Box::new(LapinAcker(delivery.acker.clone())))
                        } else {
                            None
                        };
                        let delivery = Delivery::new(envelope_from(&delivery), delivery.redelivered, acker);

                        if tx.send(delivery).is_err() {
                            // Local consumer went away
                            break;
                        }
                    }
                    Err(e) => {
                        log_error!("[{transport_id}] Consumer error on {queue}: {e}");
                        break;
                    }
                }
            }

            log_info!("[{transport_id}] Consumer task ended for queue: {queue}");
        });

        self.consumers.push(handle);
        Ok(SubscriptionHandle { inbox: rx })
    }
}

fn envelope_from(delivery: &lapin::message::Delivery) -> Envelope {
    // ---
    let props = &delivery.properties;
    Envelope {
        address: Address::from(delivery.routing_key.as_str()),
        payload: Bytes::copy_from_slice(&delivery.data),
        correlation_id: props.correlation_id().as_ref().map(|id| Arc::from(id.as_str())),
        reply_to: props.reply_to().as_ref().map(|queue| Address::from(queue.as_str())),
        content_type: props.content_type().as_ref().map(|ct| Arc::from(ct.as_str())),
    }
}

struct LapinAcker(Acker);

#[async_trait::async_trait]
impl Acknowledge for LapinAcker {
    async fn ack(&self) -> Result<()> {
        self.0
            .ack(BasicAckOptions::default())
            .await
            .map(|_| ())
            .map_err(|e| RpcError::Transport(format!("amqp: ack failed: {e}")))
    }
}

/// A lapin broker connection; every channel gets its own actor.
struct LapinConnection {
    // ---
    name: String,
    connection: lapin::Connection,
    /// Weak: dropping the last owner of a channel ends its actor, which
    /// closes the lapin channel.
    channels: Mutex<Vec<Weak<AmqpTransport>>>,
    next_channel: AtomicU64,
}

#[async_trait::async_trait]
impl Connection for LapinConnection {
    // ---
    async fn create_channel(&self) -> Result<TransportPtr> {
        // ---
        let channel = self.connection.create_channel().await.map_err(|e| {
            let msg = format!("amqp: channel creation failed: {e}");
            log_error!("{msg}");
            RpcError::Transport(msg)
        })?;

        let n = self.next_channel.fetch_add(1, Ordering::Relaxed);
        let transport = AmqpTransport::spawn(format!("{}#{n}", self.name), channel);

        if let Ok(mut channels) = self.channels.lock() {
            channels.retain(|c| c.strong_count() > 0);
            channels.push(Arc::downgrade(&transport));
        }
        Ok(transport)
    }

    async fn close(&self) -> Result<()> {
        // ---
        let channels = match self.channels.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        for channel in channels.iter().filter_map(Weak::upgrade) {
            channel.close().await?;
        }

        self.connection
            .close(200, "Normal shutdown".into())
            .await
            .map_err(|e| RpcError::Transport(format!("amqp: connection close failed: {e}")))?;

        log_info!("[{}] AMQP connection closed", self.name);
        Ok(())
    }
}

/// Connect to the AMQP broker at `config.uri`.
///
/// # Errors
///
/// Returns `RpcError::Transport` if the URI cannot be parsed or the broker
/// refuses the connection.
pub async fn create_connection(config: ConnectionConfig) -> Result<ConnectionPtr> {
    // ---
    log_info!("Connecting to AMQP broker: {}", config.uri);

    let properties = ConnectionProperties::default()
        .with_connection_name(config.connection_name.clone().into());

    let connection = lapin::Connection::connect(&config.uri, properties)
        .await
        .map_err(|e| {
            let msg = format!("amqp: connection failed: {e}");
            log_error!("{msg}");
            RpcError::Transport(msg)
        })?;

    log_info!("[{}] Connected to AMQP broker", config.connection_name);

    Ok(Arc::new(LapinConnection {
        name: config.connection_name,
        connection,
        channels: Mutex::new(Vec::new()),
        next_channel: AtomicU64::new(0),
    }))
}
