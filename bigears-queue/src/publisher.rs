//! Publisher that routes each payload inline or through the store.
//!
//! ## Routing
//!
//! ```text
//! payload → inline envelope JSON ─┬─ < 64 KiB ─→ queue.send(inline envelope)
//!                                 └─ ≥ 64 KiB ─→ store.put(<id>/payload.json)
//!                                                  → queue.send(pointer envelope)
//! ```
//!
//! The size is measured on the exact text the inline path would send, so
//! envelope overhead counts against the limit.

use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::envelope::{exceeds_inline_limit, payload_key, Envelope, PAYLOAD_CONTENT_TYPE};
use crate::error::{PublishError, ResolveError};
use crate::queue::{AmqpQueue, Queue};
use crate::store::{S3Bucket, S3Options, Store};

/// Memoized, eagerly-resolving handle shared by all publish calls.
type Handle<T> = Shared<BoxFuture<'static, Result<Arc<T>, ResolveError>>>;

/// Optional publisher behavior.
#[derive(Debug, Clone, Copy, Default)]
pub struct PublisherOptions {
    /// Delete the stored payload when the pointer message cannot be sent.
    pub cleanup_orphaned_payloads: bool,
}

/// Publishes JSON payloads to a queue, offloading oversized ones to a bucket.
///
/// Queue and bucket share one name and region. Cloning is cheap and clones
/// share the same handles.
pub struct Publisher<Q, S> {
    region: String,
    name: String,
    queue: Handle<Q>,
    store: Handle<S>,
    options: PublisherOptions,
}

impl<Q, S> Clone for Publisher<Q, S> {
    fn clone(&self) -> Self {
        Self {
            region: self.region.clone(),
            name: self.name.clone(),
            queue: self.queue.clone(),
            store: self.store.clone(),
            options: self.options,
        }
    }
}

impl Publisher<AmqpQueue, S3Bucket> {
    /// RabbitMQ queue plus private S3 bucket, both named `config.queue_name`.
    ///
    /// Must be called inside a tokio runtime; returns without waiting for
    /// either connection.
    pub fn connect(config: &Config) -> Self {
        let queue = AmqpQueue::connect(config.amqp_url.clone(), config.queue_name.clone());
        let store = S3Bucket::open(S3Options {
            region: config.region.clone(),
            name: config.queue_name.clone(),
            endpoint: config.s3_endpoint.clone(),
        });

        Self::new(&config.region, &config.queue_name, queue, store).with_options(PublisherOptions {
            cleanup_orphaned_payloads: config.cleanup_orphaned_payloads,
        })
    }
}

impl<Q: Queue, S: Store> Publisher<Q, S> {
    /// Start resolving both handles in the background and return immediately.
    ///
    /// Must be called inside a tokio runtime. A failed resolution is never
    /// retried: every later [`publish`](Self::publish) and
    /// [`ready`](Self::ready) reports it.
    pub fn new<QF, SF>(region: &str, name: &str, queue: QF, store: SF) -> Self
    where
        QF: Future<Output = anyhow::Result<Q>> + Send + 'static,
        SF: Future<Output = anyhow::Result<S>> + Send + 'static,
    {
        Self {
            region: region.to_string(),
            name: name.to_string(),
            queue: spawn_handle("queue", queue),
            store: spawn_handle("store", store),
            options: PublisherOptions::default(),
        }
    }

    /// Publisher over handles that are already resolved.
    pub fn with_handles(region: &str, name: &str, queue: Q, store: S) -> Self {
        Self {
            region: region.to_string(),
            name: name.to_string(),
            queue: resolved(queue),
            store: resolved(store),
            options: PublisherOptions::default(),
        }
    }

    pub fn with_options(mut self, options: PublisherOptions) -> Self {
        self.options = options;
        self
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait until both handles are resolved.
    ///
    /// Returns the resolution failure, if any, so a process can abort at
    /// startup instead of on its first publish.
    pub async fn ready(&self) -> Result<(), ResolveError> {
        self.handles().await.map(|_| ())
    }

    /// The resolved queue handle.
    pub async fn queue(&self) -> Result<Arc<Q>, ResolveError> {
        self.queue.clone().await
    }

    async fn handles(&self) -> Result<(Arc<Q>, Arc<S>), ResolveError> {
        futures::try_join!(self.queue.clone(), self.store.clone())
    }

    /// Publish `payload` and return its message id.
    ///
    /// The id is returned only after the message is on the queue. On error
    /// nothing may be assumed persisted; a retry publishes under a new id.
    pub async fn publish<P>(&self, payload: &P) -> Result<String, PublishError>
    where
        P: Serialize + ?Sized,
    {
        let (queue, store) = self.handles().await?;

        let id = Uuid::new_v4().to_string();
        let inline = Envelope::inline(&id, &self.name, &self.region, payload);
        let body = inline.to_json()?;

        if exceeds_inline_limit(body.len()) {
            debug!(id = %id, bytes = body.len(), "publish_s3");
            self.publish_stored(&*queue, &*store, &id, payload).await?;
        } else {
            debug!(id = %id, bytes = body.len(), "publish_inline");
            queue
                .send_message(body, inline.attributes())
                .await
                .map_err(PublishError::Queue)?;
            debug!(id = %id, location = "inline", queue = %self.name, "message_sent");
        }

        Ok(id)
    }

    /// Write the payload to the store, then enqueue a pointer to it.
    async fn publish_stored<P>(
        &self,
        queue: &Q,
        store: &S,
        id: &str,
        payload: &P,
    ) -> Result<(), PublishError>
    where
        P: Serialize + ?Sized,
    {
        let key = payload_key(id);
        let bytes = serde_json::to_vec(payload)?;
        let size = bytes.len();

        store
            .put_object(&key, bytes, PAYLOAD_CONTENT_TYPE)
            .await
            .map_err(PublishError::Store)?;
        debug!(id = %id, bucket = %self.name, key = %key, bytes = size, "payload_stored");

        let pointer: Envelope<()> = Envelope::pointer(id, &self.name, &self.region, key);
        let body = pointer.to_json()?;

        if let Err(err) = queue.send_message(body, pointer.attributes()).await {
            if self.options.cleanup_orphaned_payloads {
                if let Some(key) = pointer.key() {
                    remove_orphan(store, &self.name, key).await;
                }
            }
            return Err(PublishError::Queue(err));
        }

        debug!(id = %id, location = "s3", queue = %self.name, "message_sent");
        Ok(())
    }
}

/// Best effort; the queue error is what the caller sees.
async fn remove_orphan<S: Store>(store: &S, bucket: &str, key: &str) {
    match store.delete_object(key).await {
        Ok(()) => info!(bucket = %bucket, key = %key, "orphaned_payload_removed"),
        Err(e) => warn!(bucket = %bucket, key = %key, error = %e, "orphaned_payload_cleanup_failed"),
    }
}

fn spawn_handle<T, F>(handle: &'static str, resolve: F) -> Handle<T>
where
    T: Send + Sync + 'static,
    F: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    let task = tokio::spawn(async move {
        let result = resolve.await;
        if let Err(ref e) = result {
            error!(handle = handle, error = %format!("{e:#}"), "handle_resolve_failed");
        }
        result
    });

    async move {
        match task.await {
            Ok(Ok(value)) => Ok(Arc::new(value)),
            Ok(Err(e)) => Err(ResolveError::new(handle, e)),
            Err(join) => Err(ResolveError::new(handle, anyhow::Error::new(join))),
        }
    }
    .boxed()
    .shared()
}

fn resolved<T: Send + Sync + 'static>(value: T) -> Handle<T> {
    futures::future::ready(Ok(Arc::new(value))).boxed().shared()
}
