//! Public client handle. Owns the outbound queue and the engine thread;
//! cheap to call from any thread.

use std::sync::atomic::Ordering;
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::error;

use fcp_core::{Fields, Message, Status};

use crate::config::ClientConfig;
use crate::engine::{Engine, Shared};
use crate::error::Error;
use crate::options::{GetOptions, Persistence, PutDirOptions, PutOptions};
use crate::request::{self, Callback, Request};

/// A connection to one node.
///
/// Every operation comes in two flavors: a synchronous form that blocks the
/// calling thread until the request reaches a terminal status, and an `_async`
/// form that returns the request record immediately and reports status
/// transitions through a callback. Synchronous requests are forced to
/// connection-scoped persistence so the node forgets them with us.
///
/// ```no_run
/// use fcp_client::{Client, GetOptions};
///
/// let client = Client::connect("MyApp", "127.0.0.1", 9481)?;
/// let reply = client.get("KSK@gpl.txt", GetOptions::default())?;
/// println!("{} bytes", reply.payload().map_or(0, |p| p.len()));
/// # Ok::<(), fcp_client::Error>(())
/// ```
pub struct Client {
    sender: Sender<Arc<Request>>,
    shared: Arc<Shared>,
    engine: Option<JoinHandle<()>>,
}

impl Client {
    /// Connect and handshake with the node at `host:port` as `name`.
    pub fn connect(name: &str, host: &str, port: u16) -> Result<Self, Error> {
        Client::with_config(&ClientConfig {
            name: Some(name.to_string()),
            host: host.to_string(),
            port,
        })
    }

    /// Connect using a loaded [`ClientConfig`]. A missing name is generated;
    /// note the node drops the older connection when two clients share one.
    pub fn with_config(config: &ClientConfig) -> Result<Self, Error> {
        let name = config
            .name
            .clone()
            .unwrap_or_else(|| format!("fcp-client-{:08x}", rand::random::<u32>()));
        let shared = Arc::new(Shared::default());
        let (sender, inbox) = mpsc::channel();
        let engine = Engine::connect(&name, &config.host, config.port, inbox, shared.clone())?;
        let handle = thread::Builder::new()
            .name("fcp-engine".to_string())
            .spawn(move || engine.run())
            .map_err(|e| Error::Connection(format!("spawning engine thread: {e}")))?;
        Ok(Client {
            sender,
            shared,
            engine: Some(handle),
        })
    }

    /// Fetch a URI and block until the payload arrives or the request fails.
    pub fn get(&self, uri: &str, mut options: GetOptions) -> Result<Message, Error> {
        options.persistence = Persistence::Connection;
        self.start_get(uri, options, None)?.wait()
    }

    /// Fetch a URI, reporting status transitions through `callback`.
    pub fn get_async(
        &self,
        uri: &str,
        options: GetOptions,
        callback: Callback,
    ) -> Result<Arc<Request>, Error> {
        self.start_get(uri, options, Some(callback))
    }

    fn start_get(
        &self,
        uri: &str,
        options: GetOptions,
        callback: Option<Callback>,
    ) -> Result<Arc<Request>, Error> {
        let identifier = options
            .identifier
            .clone()
            .unwrap_or_else(request::generate_identifier);
        let fields = options.build_fields(&identifier, uri)?;
        self.submit(Message::with_fields("ClientGet", fields), callback, false)
    }

    /// Store data under a URI and block until the node confirms it.
    /// `data` is sent inline for [`crate::UploadFrom::Direct`]; the other
    /// upload modes carry no payload.
    pub fn put(
        &self,
        uri: &str,
        data: Option<Vec<u8>>,
        mut options: PutOptions,
    ) -> Result<Message, Error> {
        options.persistence = Persistence::Connection;
        self.start_put(uri, data, options, None)?.wait()
    }

    /// Store data under a URI, reporting progress through `callback`.
    pub fn put_async(
        &self,
        uri: &str,
        data: Option<Vec<u8>>,
        options: PutOptions,
        callback: Callback,
    ) -> Result<Arc<Request>, Error> {
        self.start_put(uri, data, options, Some(callback))
    }

    fn start_put(
        &self,
        uri: &str,
        data: Option<Vec<u8>>,
        options: PutOptions,
        callback: Option<Callback>,
    ) -> Result<Arc<Request>, Error> {
        let identifier = options.identifier.clone().unwrap_or_else(|| match &data {
            Some(bytes) => request::content_identifier(bytes),
            None => request::generate_identifier(),
        });
        let fields = options.build_fields(&identifier, uri)?;
        let mut message = Message::with_fields("ClientPut", fields);
        if let Some(bytes) = data {
            message.set_payload(bytes);
        }
        self.submit(message, callback, false)
    }

    /// Insert a directory that is local to the node, blocking until done.
    pub fn put_dir(
        &self,
        uri: &str,
        dir: &str,
        mut options: PutDirOptions,
    ) -> Result<Message, Error> {
        options.persistence = Some(Persistence::Connection);
        self.start_put_dir(uri, dir, options, None)?.wait()
    }

    pub fn put_dir_async(
        &self,
        uri: &str,
        dir: &str,
        options: PutDirOptions,
        callback: Callback,
    ) -> Result<Arc<Request>, Error> {
        self.start_put_dir(uri, dir, options, Some(callback))
    }

    fn start_put_dir(
        &self,
        uri: &str,
        dir: &str,
        options: PutDirOptions,
        callback: Option<Callback>,
    ) -> Result<Arc<Request>, Error> {
        let identifier = options
            .identifier
            .clone()
            .unwrap_or_else(request::generate_identifier);
        let fields = options.build_fields(&identifier, uri, dir)?;
        self.submit(
            Message::with_fields("ClientPutDiskDir", fields),
            callback,
            false,
        )
    }

    /// Ask the node for a fresh SSK keypair; returns `(insert, request)`
    /// URIs.
    pub fn generate_keypair(&self) -> Result<(String, String), Error> {
        let reply = self.submit(Message::new("GenerateSSK"), None, false)?.wait()?;
        Ok((
            reply.field("InsertURI").unwrap_or_default().to_string(),
            reply.field("RequestURI").unwrap_or_default().to_string(),
        ))
    }

    pub fn generate_keypair_async(&self, callback: Callback) -> Result<Arc<Request>, Error> {
        self.submit(Message::new("GenerateSSK"), Some(callback), false)
    }

    /// Ask for the current status of a persistent request. Replies arrive
    /// under the request's own identifier, so observe them with a loaded
    /// record or the message observers.
    pub fn request_status(&self, identifier: &str, global: bool) -> Result<(), Error> {
        let mut fields = Fields::new();
        fields.insert("Identifier", identifier)?;
        fields.insert("Global", bool_str(global))?;
        self.submit(Message::with_fields("GetRequestStatus", fields), None, false)?;
        Ok(())
    }

    /// Ask the node to enumerate its persistent requests. The resulting
    /// `PersistentGet`/`PersistentPut` messages carry their original
    /// identifiers; observe them with [`Client::on_unmatched_message`].
    pub fn list_requests(&self) -> Result<(), Error> {
        self.submit(Message::new("ListPersistentRequests"), None, false)?;
        Ok(())
    }

    /// Change the priority or client token of a tracked persistent request.
    pub fn modify_request(
        &self,
        identifier: &str,
        priority_class: Option<u32>,
        client_token: Option<&str>,
        global: bool,
    ) -> Result<(), Error> {
        let mut fields = Fields::new();
        fields.insert("Identifier", identifier)?;
        fields.insert("Global", bool_str(global))?;
        if let Some(priority) = priority_class {
            fields.insert("PriorityClass", priority.to_string())?;
        }
        if let Some(token) = client_token {
            fields.insert("ClientToken", token)?;
        }
        self.submit(
            Message::with_fields("ModifyPersistentRequest", fields),
            None,
            false,
        )?;
        Ok(())
    }

    /// Tell the node to forget a persistent request. Any local record under
    /// this identifier is released with a connection error.
    pub fn remove_request(&self, identifier: &str, global: bool) -> Result<(), Error> {
        let mut fields = Fields::new();
        fields.insert("Identifier", identifier)?;
        fields.insert("Global", bool_str(global))?;
        self.submit(
            Message::with_fields("RemovePersistentRequest", fields),
            None,
            false,
        )?;
        Ok(())
    }

    /// Subscribe to (or unsubscribe from) the node's global queue.
    pub fn watch_global(&self, enabled: bool, verbosity: u32) -> Result<(), Error> {
        let mut fields = Fields::new();
        fields.insert("Enabled", bool_str(enabled))?;
        fields.insert("VerbosityMask", verbosity.to_string())?;
        self.submit(Message::with_fields("WatchGlobal", fields), None, false)?;
        Ok(())
    }

    /// Re-attach to a request the node already tracks: the record is
    /// registered for response matching but nothing is transmitted. The
    /// message must carry the original `Identifier`.
    pub fn load_request(
        &self,
        message: Message,
        callback: Option<Callback>,
    ) -> Result<Arc<Request>, Error> {
        self.submit(message, callback, true)
    }

    /// Observe messages whose identifier matches no known record, e.g.
    /// replies to persistent requests from an earlier run.
    pub fn on_unmatched_message<F>(&self, observer: F)
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.shared.observers.lock().unmatched =
            Some(Arc::new(move |_status, _record, reply| observer(reply)));
    }

    /// Observe every identified message the engine delivers, matched or not.
    pub fn on_every_message<F>(&self, observer: F)
    where
        F: Fn(Option<Status>, Option<&Request>, &Message) + Send + Sync + 'static,
    {
        self.shared.observers.lock().all = Some(Arc::new(observer));
    }

    /// False once the engine has shut down or died of an error.
    pub fn is_running(&self) -> bool {
        !self.shared.shutdown.load(Ordering::SeqCst) && self.shared.fatal.lock().is_none()
    }

    /// Shut down: close the connection, release all waiters, and join the
    /// engine thread. Blocks until the engine has drained.
    pub fn disconnect(mut self) {
        self.shutdown_and_join();
    }

    fn submit(
        &self,
        message: Message,
        callback: Option<Callback>,
        load_only: bool,
    ) -> Result<Arc<Request>, Error> {
        let record = Arc::new(Request::new(message, callback, load_only));
        self.enqueue(record.clone())?;
        Ok(record)
    }

    fn enqueue(&self, record: Arc<Request>) -> Result<(), Error> {
        if let Some(reason) = self.shared.fatal.lock().clone() {
            return Err(Error::Connection(reason));
        }
        if self.shared.shutdown.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        self.sender
            .send(record.clone())
            .map_err(|_| Error::Closed)?;
        // the engine may have begun draining between the check above and the
        // send; a record it will never pick up must not strand a waiter
        if self.shared.shutdown.load(Ordering::SeqCst) {
            let reason = self
                .shared
                .fatal
                .lock()
                .clone()
                .unwrap_or_else(|| "client closed".to_string());
            record.fail_closed(&reason);
            return Err(Error::Connection(reason));
        }
        Ok(())
    }

    fn shutdown_and_join(&mut self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.engine.take() {
            if handle.join().is_err() {
                error!("engine thread panicked");
            }
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.shutdown_and_join();
    }
}

fn bool_str(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}
