use super::decoder::{EventDecoder, StreamCursor};
use super::event::Event;
use crate::config::{ReconnectPolicy, StreamConfig};
use crate::gateway::{ApiGateway, EventByteStream};
use crate::session::SessionContext;
use crate::shared::{ClientError, ClientLog, RunId};
use std::io::{ErrorKind, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const READ_BUFFER_BYTES: usize = 4096;
const STOP_CHECK_STEP: Duration = Duration::from_millis(25);

#[derive(Debug, Clone, PartialEq)]
pub enum StreamMessage {
    Event(Event),
    /// A terminal run event was delivered; the stream is done.
    Ended,
    /// The connection was lost before a terminal event. Sent at most once.
    Disconnected { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionOutcome {
    Terminal,
    Stopped,
    Disconnected,
}

struct ReaderContext {
    gateway: ApiGateway,
    session: SessionContext,
    run_id: RunId,
    reconnect: ReconnectPolicy,
    sender: Sender<StreamMessage>,
    stop: Arc<AtomicBool>,
    log: ClientLog,
}

impl ReaderContext {
    fn stopped(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    fn send(&self, message: StreamMessage) -> bool {
        !self.stopped() && self.sender.send(message).is_ok()
    }
}

/// A live subscription to one run's event stream.
///
/// A background thread owns the connection and forwards decoded events in
/// arrival order. Dropping or cancelling the subscription stops delivery
/// immediately; the thread releases its connection at its next read, at
/// the latest after the stream idle timeout.
#[derive(Debug)]
pub struct EventSubscription {
    run_id: RunId,
    receiver: Option<Receiver<StreamMessage>>,
    stop: Arc<AtomicBool>,
    finished: bool,
}

impl EventSubscription {
    pub fn open(
        gateway: &ApiGateway,
        session: &SessionContext,
        run_id: &RunId,
        config: &StreamConfig,
        log: ClientLog,
    ) -> Self {
        Self::resume(gateway, session, run_id, config, log, StreamCursor::default())
    }

    /// Opens a subscription that continues numbering from `cursor` and skips
    /// frames whose id the cursor has already seen.
    pub fn resume(
        gateway: &ApiGateway,
        session: &SessionContext,
        run_id: &RunId,
        config: &StreamConfig,
        log: ClientLog,
        cursor: StreamCursor,
    ) -> Self {
        let (sender, receiver) = mpsc::channel();
        let stop = Arc::new(AtomicBool::new(false));
        let context = ReaderContext {
            gateway: gateway.clone(),
            session: session.clone(),
            run_id: run_id.clone(),
            reconnect: config.reconnect.clone(),
            sender,
            stop: Arc::clone(&stop),
            log,
        };
        thread::spawn(move || read_events(context, EventDecoder::resume(cursor)));
        Self {
            run_id: run_id.clone(),
            receiver: Some(receiver),
            stop,
            finished: false,
        }
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// True once `Ended` or `Disconnected` was handed out, or after cancel.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn try_next(&mut self) -> Option<StreamMessage> {
        let receiver = self.receiver.as_ref()?;
        match receiver.try_recv() {
            Ok(message) => Some(self.observe(message)),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => self.reader_vanished(),
        }
    }

    pub fn next_timeout(&mut self, timeout: Duration) -> Option<StreamMessage> {
        let receiver = self.receiver.as_ref()?;
        match receiver.recv_timeout(timeout) {
            Ok(message) => Some(self.observe(message)),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => self.reader_vanished(),
        }
    }

    /// Everything already received, without blocking.
    pub fn drain(&mut self) -> Vec<StreamMessage> {
        let mut messages = Vec::new();
        while let Some(message) = self.try_next() {
            messages.push(message);
        }
        messages
    }

    pub fn cancel(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        self.receiver = None;
        self.finished = true;
    }

    fn observe(&mut self, message: StreamMessage) -> StreamMessage {
        if !matches!(message, StreamMessage::Event(_)) {
            self.finished = true;
            self.receiver = None;
        }
        message
    }

    fn reader_vanished(&mut self) -> Option<StreamMessage> {
        self.receiver = None;
        if self.finished {
            return None;
        }
        self.finished = true;
        Some(StreamMessage::Disconnected {
            reason: "event reader stopped unexpectedly".to_string(),
        })
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

/// Blocking iteration: yields events until the run ends, then `None`. A
/// disconnect is yielded once as `Err(StreamDisconnected)`.
impl Iterator for EventSubscription {
    type Item = Result<Event, ClientError>;

    fn next(&mut self) -> Option<Self::Item> {
        let message = {
            let receiver = self.receiver.as_ref()?;
            match receiver.recv() {
                Ok(message) => self.observe(message),
                Err(_) => self.reader_vanished()?,
            }
        };
        match message {
            StreamMessage::Event(event) => Some(Ok(event)),
            StreamMessage::Ended => None,
            StreamMessage::Disconnected { reason } => Some(Err(ClientError::StreamDisconnected {
                run_id: self.run_id.to_string(),
                reason,
            })),
        }
    }
}

fn read_events(context: ReaderContext, mut decoder: EventDecoder) {
    let mut attempt = 0u32;
    loop {
        if context.stopped() {
            return;
        }
        let delivered_before = decoder.cursor().next_sequence;
        let reason = match context.gateway.open_event_stream(
            &context.session,
            &context.run_id,
            decoder.last_event_id(),
        ) {
            Ok(body) => match pump_connection(&context, body, &mut decoder) {
                (ConnectionOutcome::Terminal, _) => {
                    context.log.info(
                        "stream.ended",
                        &format!("run {} reached a terminal event", context.run_id),
                    );
                    let _ = context.send(StreamMessage::Ended);
                    return;
                }
                (ConnectionOutcome::Stopped, _) => return,
                (ConnectionOutcome::Disconnected, reason) => reason,
            },
            Err(err) => err.to_string(),
        };

        if decoder.cursor().next_sequence > delivered_before {
            attempt = 0;
        }
        if attempt < context.reconnect.max_attempts {
            let backoff = context.reconnect.backoff_for(attempt);
            attempt += 1;
            context.log.warn(
                "stream.reconnecting",
                &format!(
                    "run {} stream lost ({reason}); reconnect attempt {attempt} in {}ms",
                    context.run_id,
                    backoff.as_millis()
                ),
            );
            if !sleep_with_stop(&context.stop, backoff + reconnect_jitter(backoff)) {
                return;
            }
            decoder.reset_connection();
            continue;
        }

        context.log.warn(
            "stream.disconnected",
            &format!("run {} stream disconnected: {reason}", context.run_id),
        );
        let _ = context.send(StreamMessage::Disconnected { reason });
        return;
    }
}

fn pump_connection(
    context: &ReaderContext,
    mut body: EventByteStream,
    decoder: &mut EventDecoder,
) -> (ConnectionOutcome, String) {
    let mut buffer = [0u8; READ_BUFFER_BYTES];
    loop {
        if context.stopped() {
            return (ConnectionOutcome::Stopped, String::new());
        }
        let read = match body.read(&mut buffer) {
            Ok(0) => {
                return (
                    ConnectionOutcome::Disconnected,
                    "stream closed before a terminal event".to_string(),
                )
            }
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) if matches!(err.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                return (
                    ConnectionOutcome::Disconnected,
                    format!("stream idle timeout: {err}"),
                )
            }
            Err(err) => {
                return (
                    ConnectionOutcome::Disconnected,
                    format!("stream read failed: {err}"),
                )
            }
        };
        for event in decoder.push(&buffer[..read]) {
            let terminal = event.is_terminal();
            if !context.send(StreamMessage::Event(event)) {
                return (ConnectionOutcome::Stopped, String::new());
            }
            if terminal {
                return (ConnectionOutcome::Terminal, String::new());
            }
        }
    }
}

fn sleep_with_stop(stop: &AtomicBool, total: Duration) -> bool {
    let mut remaining = total;
    while remaining > Duration::ZERO {
        if stop.load(Ordering::Relaxed) {
            return false;
        }
        let step = remaining.min(STOP_CHECK_STEP);
        thread::sleep(step);
        remaining = remaining.saturating_sub(step);
    }
    !stop.load(Ordering::Relaxed)
}

fn reconnect_jitter(backoff: Duration) -> Duration {
    let ceiling = (backoff.as_millis() as u64 / 4).min(250);
    if ceiling == 0 {
        return Duration::ZERO;
    }
    let seed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|value| value.as_nanos() as u64)
        .unwrap_or(0);
    Duration::from_millis(seed % (ceiling + 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sleep_with_stop_returns_early_when_stopped() {
        let stop = AtomicBool::new(true);
        assert!(!sleep_with_stop(&stop, Duration::from_secs(5)));

        let running = AtomicBool::new(false);
        assert!(sleep_with_stop(&running, Duration::from_millis(1)));
    }

    #[test]
    fn jitter_stays_within_a_quarter_of_backoff() {
        for _ in 0..20 {
            assert!(reconnect_jitter(Duration::from_millis(400)) <= Duration::from_millis(100));
        }
        assert_eq!(reconnect_jitter(Duration::from_millis(2)), Duration::ZERO);
        assert!(reconnect_jitter(Duration::from_secs(60)) <= Duration::from_millis(250));
    }
}
