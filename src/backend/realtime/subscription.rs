/**
 * Realtime Subscription
 *
 * A `Subscription<T>` is the client end of one change-notification stream:
 * a bounded channel of typed `SubscriptionEvent`s fed by a background task.
 * Unsubscribing (or dropping the subscription) aborts that task, so no
 * notification can be delivered after teardown.
 *
 * # Server-Sent Events
 *
 * The HTTP transport opens `GET /realtime/v1/<table>` with a `Subscribe`
 * header and reads the response as a server-sent-event stream. Each
 * `data:` line carries one `ChangePayload` as JSON; comment lines (`:`)
 * are keep-alives.
 *
 * # Reconnection
 *
 * A dropped or refused stream is reopened with exponential backoff. Every
 * successful reopen after the first is reported as
 * `SubscriptionStatus::Resubscribed`, telling the consumer that
 * notifications may have been missed and a full reload is due.
 */

use crate::shared::event::{ChangePayload, Record, SubscriptionEvent, SubscriptionStatus};
use futures_util::StreamExt;
use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Capacity of the per-subscription event channel
pub const SUBSCRIPTION_BUFFER: usize = 256;

/// Client end of a change-notification stream
#[derive(Debug)]
pub struct Subscription<T> {
    label: String,
    events: mpsc::Receiver<SubscriptionEvent<T>>,
    task: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> Subscription<T> {
    /// Wrap a receiver fed by `task`
    pub fn new(
        label: impl Into<String>,
        events: mpsc::Receiver<SubscriptionEvent<T>>,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            label: label.into(),
            events,
            task: Some(task),
        }
    }

    /// Label used in logs, e.g. `messages:<a>:<b>`
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Wait for the next event; `None` once the stream has ended
    pub async fn next(&mut self) -> Option<SubscriptionEvent<T>> {
        self.events.recv().await
    }

    /// Next event if one is already queued
    pub fn try_next(&mut self) -> Option<SubscriptionEvent<T>> {
        self.events.try_recv().ok()
    }

    /// Whether the feeding task is still running
    pub fn is_active(&self) -> bool {
        self.task.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }

    /// Stop the stream. Nothing is delivered after this returns.
    pub fn unsubscribe(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(task) = self.task.take() {
            tracing::debug!("[REALTIME] Unsubscribing {}", self.label);
            task.abort();
        }
        self.events.close();
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Reconnect delay policy for a realtime stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max }
    }

    /// Delay that follows `current`
    pub fn next_delay(&self, current: Duration) -> Duration {
        std::cmp::min(current * 2, self.max)
    }
}

/// Splits a byte stream into complete lines across chunk boundaries.
///
/// Bytes are buffered until a `\n` arrives, so a multi-byte character split
/// between two chunks is decoded whole.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buffer: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and drain every complete line (without `\r\n`)
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(newline_pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=newline_pos).collect();
            let line = String::from_utf8_lossy(&raw[..newline_pos]);
            lines.push(line.trim_end_matches('\r').to_string());
        }
        lines
    }
}

/// Payload of an SSE `data:` line; `None` for blank lines, comments and other fields
pub fn sse_data(line: &str) -> Option<&str> {
    if line.is_empty() || line.starts_with(':') {
        return None;
    }
    line.strip_prefix("data:").map(str::trim_start)
}

/// Why a connected stream stopped
enum StreamEnd {
    /// Transport error or server closed the body; reconnect
    Dropped,
    /// The subscriber went away; stop for good
    ReceiverGone,
}

/// Open an SSE change stream and keep it open until unsubscribed.
///
/// `headers` must already carry the credentials; they are reused for every
/// reconnect attempt.
pub fn spawn_sse_subscription<T: Record>(
    client: Client,
    url: String,
    headers: HeaderMap,
    backoff: Backoff,
    label: String,
) -> Subscription<T> {
    let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
    let task_label = label.clone();
    let task = tokio::spawn(async move {
        run_sse_stream::<T>(client, url, headers, backoff, task_label, tx).await;
    });
    Subscription::new(label, rx, task)
}

async fn run_sse_stream<T: Record>(
    client: Client,
    url: String,
    headers: HeaderMap,
    backoff: Backoff,
    label: String,
    tx: mpsc::Sender<SubscriptionEvent<T>>,
) {
    let mut reconnect_delay = backoff.initial;
    let mut connected_before = false;

    loop {
        if tx.send(SubscriptionEvent::Status(SubscriptionStatus::Connecting)).await.is_err() {
            return;
        }
        tracing::info!("[REALTIME] Subscribing {} at {}", label, url);

        let response = match client
            .get(&url)
            .headers(headers.clone())
            .header("Subscribe", "true")
            .header("Accept", "text/event-stream")
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                tracing::warn!("[REALTIME] Failed to subscribe {} (will retry): {}", label, e);
                if !report_retry(&tx, format!("network: {}", e)).await {
                    return;
                }
                tokio::time::sleep(reconnect_delay).await;
                reconnect_delay = backoff.next_delay(reconnect_delay);
                continue;
            }
        };

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            tracing::error!("[REALTIME] Subscription {} refused with {}", label, status);
            let _ = tx
                .send(SubscriptionEvent::Status(SubscriptionStatus::Error(format!("http: {}", status))))
                .await;
            let _ = tx.send(SubscriptionEvent::Status(SubscriptionStatus::Closed)).await;
            return;
        }
        if !status.is_success() {
            tracing::error!("[REALTIME] Subscription {} failed with status {} (will retry)", label, status);
            if !report_retry(&tx, format!("http: {}", status)).await {
                return;
            }
            tokio::time::sleep(reconnect_delay).await;
            reconnect_delay = backoff.next_delay(reconnect_delay);
            continue;
        }

        let connected = if connected_before {
            SubscriptionStatus::Resubscribed
        } else {
            SubscriptionStatus::Connected
        };
        tracing::info!("[REALTIME] Subscription {} established ({:?})", label, connected);
        if tx.send(SubscriptionEvent::Status(connected)).await.is_err() {
            return;
        }
        connected_before = true;
        reconnect_delay = backoff.initial;

        match read_stream(response, &label, &tx).await {
            StreamEnd::ReceiverGone => return,
            StreamEnd::Dropped => {
                tracing::warn!("[REALTIME] Subscription {} lost, will reconnect", label);
                if tx
                    .send(SubscriptionEvent::Status(SubscriptionStatus::Retrying))
                    .await
                    .is_err()
                {
                    return;
                }
                tokio::time::sleep(reconnect_delay).await;
                reconnect_delay = backoff.next_delay(reconnect_delay);
            }
        }
    }
}

/// Send `Error` then `Retrying`; false once the subscriber is gone
async fn report_retry<T>(tx: &mpsc::Sender<SubscriptionEvent<T>>, reason: String) -> bool {
    tx.send(SubscriptionEvent::Status(SubscriptionStatus::Error(reason)))
        .await
        .is_ok()
        && tx
            .send(SubscriptionEvent::Status(SubscriptionStatus::Retrying))
            .await
            .is_ok()
}

async fn read_stream<T: Record>(
    response: reqwest::Response,
    label: &str,
    tx: &mpsc::Sender<SubscriptionEvent<T>>,
) -> StreamEnd {
    let mut stream = response.bytes_stream();
    let mut lines = LineBuffer::new();

    while let Some(chunk_result) = stream.next().await {
        let chunk = match chunk_result {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::error!("[REALTIME] Error reading {}: {}", label, e);
                let _ = tx
                    .send(SubscriptionEvent::Status(SubscriptionStatus::Error(format!("stream: {}", e))))
                    .await;
                return StreamEnd::Dropped;
            }
        };
        for line in lines.push(&chunk) {
            let Some(data) = sse_data(&line) else {
                continue;
            };
            let event = serde_json::from_str::<ChangePayload>(data)
                .map_err(crate::shared::SharedError::from)
                .and_then(|payload| payload.into_event::<T>());
            match event {
                Ok(change) => {
                    tracing::debug!(
                        "[REALTIME] {} {:?} {}",
                        label,
                        change.kind(),
                        change.row_id()
                    );
                    if tx.send(SubscriptionEvent::Change(change)).await.is_err() {
                        return StreamEnd::ReceiverGone;
                    }
                }
                Err(e) => {
                    tracing::warn!("[REALTIME] Skipping undecodable payload on {}: {}", label, e);
                }
            }
        }
    }

    StreamEnd::Dropped
}
