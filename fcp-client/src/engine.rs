//! Engine loop: the single thread that owns the socket, drains the outbound
//! queue, reads one framed message per wake, and dispatches replies.

use std::io::{BufReader, ErrorKind};
use std::net::{Shutdown, TcpStream};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use fcp_core::{status, wire, Fields, Message, Status};

use crate::error::Error;
use crate::registry::Registry;
use crate::request::Request;

/// Bounded wait for inbound readability; keeps the loop responsive to
/// shutdown and queued work while idle.
const POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Once a frame has started, reads may block this long before the
/// connection is considered dead.
const FRAME_TIMEOUT: Duration = Duration::from_secs(30);
/// How long draining waits for callback workers before detaching them.
const DRAIN_GRACE: Duration = Duration::from_secs(5);

/// Observer over delivered messages. Unmatched messages arrive with no
/// status and no record.
pub type Observer = Arc<dyn Fn(Option<Status>, Option<&Request>, &Message) + Send + Sync + 'static>;

#[derive(Default)]
pub(crate) struct Observers {
    pub unmatched: Option<Observer>,
    pub all: Option<Observer>,
}

/// State shared between the engine thread and the public API.
#[derive(Default)]
pub(crate) struct Shared {
    /// Observed at the top of each loop iteration.
    pub shutdown: AtomicBool,
    /// Set when the engine dies of a connection or protocol error; every
    /// later operation fails with it.
    pub fatal: Mutex<Option<String>>,
    pub observers: Mutex<Observers>,
}

pub(crate) struct Engine {
    reader: BufReader<TcpStream>,
    registry: Registry,
    inbox: Receiver<Arc<Request>>,
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl Engine {
    /// Open the transport and perform the handshake exchange. Fails with a
    /// connection error on transport failure or an unexpected reply.
    pub(crate) fn connect(
        name: &str,
        host: &str,
        port: u16,
        inbox: Receiver<Arc<Request>>,
        shared: Arc<Shared>,
    ) -> Result<Engine, Error> {
        info!(host, port, "connecting");
        let stream = TcpStream::connect((host, port))
            .map_err(|e| Error::Connection(format!("connect {host}:{port}: {e}")))?;
        let _ = stream.set_nodelay(true);
        stream
            .set_read_timeout(Some(FRAME_TIMEOUT))
            .map_err(|e| Error::Connection(format!("socket setup: {e}")))?;
        let mut engine = Engine {
            reader: BufReader::new(stream),
            registry: Registry::new(),
            inbox,
            shared,
            workers: Vec::new(),
        };
        engine.handshake(name)?;
        engine.set_read_timeout(POLL_INTERVAL)?;
        Ok(engine)
    }

    fn handshake(&mut self, name: &str) -> Result<(), Error> {
        let mut fields = Fields::new();
        fields.insert("Name", name)?;
        fields.insert("ExpectedVersion", "2.0")?;
        self.write_message(&Message::with_fields("ClientHello", fields))?;
        let reply = wire::read_message(&mut self.reader)?;
        match reply.kind() {
            "NodeHello" => {
                info!(
                    version = reply.field("Version").unwrap_or("unknown"),
                    "connected"
                );
                if reply.field("Testnet") == Some("true") {
                    warn!("connected to a testnet node; you have no anonymity");
                }
                Ok(())
            }
            "CloseConnectionDuplicateClientName" => Err(Error::Connection(
                "client name already connected to this node".to_string(),
            )),
            other => Err(Error::Connection(format!(
                "unexpected handshake reply: {other}"
            ))),
        }
    }

    /// Run until shutdown or a fatal error, then drain. Consumes the engine;
    /// this is the body of the engine thread.
    pub(crate) fn run(mut self) {
        let reason = match self.run_loop() {
            Ok(()) => "client closed".to_string(),
            Err(e) => {
                error!(error = %e, "engine terminated");
                let reason = e.to_string();
                *self.shared.fatal.lock() = Some(reason.clone());
                reason
            }
        };
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.drain(&reason);
    }

    fn run_loop(&mut self) -> Result<(), Error> {
        loop {
            self.reap_workers();
            if self.shared.shutdown.load(Ordering::SeqCst) {
                info!("shutdown requested");
                return Ok(());
            }
            self.flush_outbound()?;
            if self.poll_inbound()? {
                let reply = self.read_one()?;
                self.dispatch(reply)?;
            }
            self.expire_deadlines();
        }
    }

    /// Join callback workers that have finished; never blocks on a stuck one.
    fn reap_workers(&mut self) {
        let mut running = Vec::new();
        for handle in self.workers.drain(..) {
            if handle.is_finished() {
                if handle.join().is_err() {
                    error!("callback worker panicked");
                }
            } else {
                running.push(handle);
            }
        }
        self.workers = running;
    }

    /// Consume the outbound queue until empty. Each record is registered
    /// (idempotently) and, unless load-only, written in full before the next.
    fn flush_outbound(&mut self) -> Result<(), Error> {
        while let Ok(record) = self.inbox.try_recv() {
            if !self.registry.register(record.clone()) {
                debug!(
                    identifier = record.identifier(),
                    "identifier already registered"
                );
            }
            if !record.load_only() {
                self.write_record(&record)?;
            }
            if record.kind() == "RemovePersistentRequest" {
                // explicit removal: stop routing replies to this identifier
                if let Some(removed) = self.registry.remove(record.identifier()) {
                    removed.fail_closed("request removed");
                }
            }
        }
        Ok(())
    }

    /// Bounded wait for readability. Data already buffered counts as ready;
    /// a zero-byte peek means the node closed the connection.
    fn poll_inbound(&mut self) -> Result<bool, Error> {
        if !self.reader.buffer().is_empty() {
            return Ok(true);
        }
        let mut probe = [0u8; 1];
        match self.reader.get_ref().peek(&mut probe) {
            Ok(0) => Err(Error::Connection("node closed the connection".to_string())),
            Ok(_) => Ok(true),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => Ok(false),
            Err(e) => Err(Error::Connection(format!("socket poll: {e}"))),
        }
    }

    /// Decode exactly one framed message. The poll timeout is widened while
    /// a frame is in flight so a slow node is not mistaken for a dead one.
    fn read_one(&mut self) -> Result<Message, Error> {
        self.set_read_timeout(FRAME_TIMEOUT)?;
        let reply = wire::read_message(&mut self.reader);
        self.set_read_timeout(POLL_INTERVAL)?;
        let reply = reply?;
        debug!(
            kind = reply.kind(),
            identifier = reply.identifier().unwrap_or(""),
            "received"
        );
        Ok(reply)
    }

    fn dispatch(&mut self, reply: Message) -> Result<(), Error> {
        let Some(identifier) = reply.identifier().map(str::to_string) else {
            return self.on_connection_message(&reply);
        };
        let Some(record) = self.registry.lookup(&identifier) else {
            self.on_unmatched(reply, &identifier);
            return Ok(());
        };
        let derived = status::derive(&reply, record.retries());
        record.post(derived, reply.clone());
        match derived {
            Some(Status::Retrying) => {
                let attempt = record.bump_retries();
                debug!(%identifier, retries = attempt, "transient failure; re-issuing");
                self.write_record(&record)?;
            }
            Some(Status::Found) => {
                if record.wants_found_followup() && record.mark_followed_up() {
                    self.send_status_query(&record)?;
                }
            }
            _ => {}
        }
        self.spawn_worker(Some(record.clone()), derived, reply);
        if derived.is_some_and(Status::is_terminal) && !record.is_persistent() {
            self.registry.remove(&identifier);
            debug!(%identifier, "terminal status; record dropped");
        }
        Ok(())
    }

    /// Identifier-less messages are connection-level. A duplicate client
    /// name means the node is about to drop us; treat it as fatal.
    fn on_connection_message(&mut self, reply: &Message) -> Result<(), Error> {
        if reply.kind() == "CloseConnectionDuplicateClientName" {
            return Err(Error::Connection(
                "node closed the connection: duplicate client name".to_string(),
            ));
        }
        debug!(kind = reply.kind(), "connection-level message");
        Ok(())
    }

    fn on_unmatched(&mut self, reply: Message, identifier: &str) {
        let observers = self.shared.observers.lock();
        if observers.unmatched.is_none() && observers.all.is_none() {
            drop(observers);
            warn!(
                identifier,
                kind = reply.kind(),
                "message for unknown identifier; were persistent requests reloaded?"
            );
            return;
        }
        drop(observers);
        self.spawn_worker(None, None, reply);
    }

    /// One automatic `GetRequestStatus` so the final payload of a persistent
    /// fetch is still retrieved after `DataFound`.
    fn send_status_query(&mut self, record: &Arc<Request>) -> Result<(), Error> {
        let mut fields = Fields::new();
        fields.insert("Identifier", record.identifier())?;
        fields.insert(
            "Global",
            record.message().field("Global").unwrap_or("false"),
        )?;
        debug!(identifier = record.identifier(), "data found; querying status");
        self.write_message(&Message::with_fields("GetRequestStatus", fields))
    }

    /// Spawn one worker per delivered message so a slow or misbehaving
    /// callback never blocks the loop. Panics are caught per worker.
    fn spawn_worker(&mut self, record: Option<Arc<Request>>, derived: Option<Status>, reply: Message) {
        let (unmatched, all) = {
            let observers = self.shared.observers.lock();
            (observers.unmatched.clone(), observers.all.clone())
        };
        let has_callback =
            derived.is_some() && record.as_ref().is_some_and(|r| r.callback.is_some());
        let wants_unmatched = record.is_none() && unmatched.is_some();
        if !has_callback && !wants_unmatched && all.is_none() {
            return;
        }
        let spawned = thread::Builder::new().name("fcp-callback".to_string()).spawn(move || {
            if let (Some(record), Some(derived)) = (record.as_ref(), derived) {
                if let Some(callback) = record.callback.as_ref() {
                    let outcome =
                        catch_unwind(AssertUnwindSafe(|| callback(derived, record, &reply)));
                    if outcome.is_err() {
                        error!(identifier = record.identifier(), "callback panicked");
                    }
                }
            }
            if record.is_none() {
                if let Some(observer) = &unmatched {
                    run_observer(observer, None, None, &reply, "unmatched-message observer");
                }
            }
            if let Some(observer) = &all {
                run_observer(observer, derived, record.as_deref(), &reply, "all-messages observer");
            }
        });
        match spawned {
            Ok(handle) => self.workers.push(handle),
            Err(e) => error!(error = %e, "failed to spawn callback worker"),
        }
    }

    /// Deadlines are cooperative: polled once per iteration, so a record may
    /// fire up to one poll interval late.
    fn expire_deadlines(&mut self) {
        for record in self.registry.drain_expired(Instant::now()) {
            warn!(identifier = record.identifier(), "request deadline elapsed");
            record.post_timeout();
            let mut synthetic = Message::new("Timeout");
            let _ = synthetic
                .fields_mut()
                .insert("Identifier", record.identifier());
            self.spawn_worker(Some(record), Some(Status::Timeout), synthetic);
        }
    }

    fn write_record(&mut self, record: &Arc<Request>) -> Result<(), Error> {
        debug!(
            identifier = record.identifier(),
            kind = record.kind(),
            "sending"
        );
        self.write_message(record.message())
    }

    fn write_message(&mut self, message: &Message) -> Result<(), Error> {
        wire::write_message(&mut self.reader.get_ref(), message)
            .map_err(|e| Error::Connection(format!("write failed: {e}")))
    }

    fn set_read_timeout(&mut self, timeout: Duration) -> Result<(), Error> {
        self.reader
            .get_ref()
            .set_read_timeout(Some(timeout))
            .map_err(|e| Error::Connection(format!("socket setup: {e}")))
    }

    /// Stop accepting work, close the transport, release every waiter, and
    /// give callback workers a bounded grace period.
    fn drain(mut self, reason: &str) {
        let _ = self.reader.get_ref().shutdown(Shutdown::Both);
        while let Ok(record) = self.inbox.try_recv() {
            record.fail_closed(reason);
        }
        for record in self.registry.drain_all() {
            record.fail_closed(reason);
        }
        let grace_until = Instant::now() + DRAIN_GRACE;
        while !self.workers.is_empty() && Instant::now() < grace_until {
            self.reap_workers();
            if self.workers.is_empty() {
                break;
            }
            thread::sleep(Duration::from_millis(25));
        }
        if !self.workers.is_empty() {
            warn!(
                stuck = self.workers.len(),
                "detaching unfinished callback workers"
            );
        }
        // records enqueued while we were draining must not strand a waiter
        while let Ok(record) = self.inbox.try_recv() {
            record.fail_closed(reason);
        }
        info!("engine closed");
    }
}

fn run_observer(
    observer: &Observer,
    derived: Option<Status>,
    record: Option<&Request>,
    reply: &Message,
    what: &str,
) {
    if catch_unwind(AssertUnwindSafe(|| observer(derived, record, reply))).is_err() {
        error!("{what} panicked");
    }
}
