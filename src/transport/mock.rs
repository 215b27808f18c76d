//! In-memory transport implementation
//! Used by tests and by the `--demo` loopback shell

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use super::types::{ConnectRequest, Listener, ListenerId, SessionId, Topic, TransportError};
use super::{ContainerResolver, TransportClient};

/// How the mock answers connect calls
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectMode {
    /// Assign a fresh `session-<n>` id right away
    Immediate,
    /// Park the call until the test resolves it through [`MockTransport::next_connect`]
    Manual,
    /// Reject every connect with the given reason
    Reject(String),
}

/// A connect call parked in [`ConnectMode::Manual`]
pub struct PendingConnect {
    pub request: ConnectRequest,
    responder: oneshot::Sender<Result<SessionId, TransportError>>,
}

impl PendingConnect {
    /// Resolve the call with a session id. Returns false if the caller went away.
    pub fn succeed(self, session_id: impl Into<SessionId>) -> bool {
        self.responder.send(Ok(session_id.into())).is_ok()
    }

    /// Resolve the call with a rejection
    pub fn reject(self, reason: impl Into<String>) -> bool {
        self.responder
            .send(Err(TransportError::Rejected(reason.into())))
            .is_ok()
    }
}

struct ListenerEntry {
    session_id: SessionId,
    topic: Topic,
    listener: Listener,
}

/// Calls observed by the mock
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    pub connects: Vec<ConnectRequest>,
    pub sent: Vec<(SessionId, Vec<u8>)>,
    pub resizes: Vec<(SessionId, u16, u16)>,
    pub closed: Vec<SessionId>,
}

/// Scriptable transport and container resolver
pub struct MockTransport {
    mode: Mutex<ConnectMode>,
    echo: AtomicBool,
    next_session: AtomicU64,
    next_listener: AtomicU64,
    listen_calls: AtomicU64,
    failing_listen: Mutex<Option<u64>>,
    missing_shells: Mutex<HashSet<String>>,
    session_shells: Mutex<HashMap<SessionId, String>>,
    listeners: Mutex<BTreeMap<u64, ListenerEntry>>,
    open_sessions: Mutex<HashSet<SessionId>>,
    containers: Mutex<HashMap<(String, String), Vec<String>>>,
    calls: Mutex<CallLog>,
    pending_tx: mpsc::UnboundedSender<PendingConnect>,
    pending_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<PendingConnect>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockTransport {
    /// Create a new MockTransport
    pub fn new(mode: ConnectMode) -> Self {
        let (pending_tx, pending_rx) = mpsc::unbounded_channel();

        Self {
            mode: Mutex::new(mode),
            echo: AtomicBool::new(false),
            next_session: AtomicU64::new(1),
            next_listener: AtomicU64::new(1),
            listen_calls: AtomicU64::new(0),
            failing_listen: Mutex::new(None),
            missing_shells: Mutex::new(HashSet::new()),
            session_shells: Mutex::new(HashMap::new()),
            listeners: Mutex::new(BTreeMap::new()),
            open_sessions: Mutex::new(HashSet::new()),
            containers: Mutex::new(HashMap::new()),
            calls: Mutex::new(CallLog::default()),
            pending_tx,
            pending_rx: tokio::sync::Mutex::new(pending_rx),
        }
    }

    /// Echo every input chunk back on the output topic, like a tty with echo on
    pub fn with_echo(self, echo: bool) -> Self {
        self.echo.store(echo, Ordering::SeqCst);
        self
    }

    /// Declare the containers of a pod
    pub fn with_containers(self, pod: &str, namespace: &str, containers: &[&str]) -> Self {
        lock(&self.containers).insert(
            (pod.to_string(), namespace.to_string()),
            containers.iter().map(|c| c.to_string()).collect(),
        );
        self
    }

    /// Declare shell binaries absent from every container
    pub fn with_missing_shells(self, shells: &[&str]) -> Self {
        lock(&self.missing_shells).extend(shells.iter().map(|s| s.to_string()));
        self
    }

    /// Make the `n`th `listen` call from now on fail (1 = the next one)
    pub fn fail_nth_listen(&self, n: u64) {
        let done = self.listen_calls.load(Ordering::SeqCst);
        *lock(&self.failing_listen) = Some(done + n);
    }

    pub fn set_mode(&self, mode: ConnectMode) {
        *lock(&self.mode) = mode;
    }

    /// Wait for the next connect call parked in manual mode
    pub async fn next_connect(&self) -> Option<PendingConnect> {
        self.pending_rx.lock().await.recv().await
    }

    /// Deliver a payload to every listener of `(topic, session_id)`.
    ///
    /// Listeners run synchronously in registration order. Returns how many ran.
    pub fn emit(&self, session_id: &SessionId, topic: Topic, payload: &str) -> usize {
        let targets: Vec<Listener> = lock(&self.listeners)
            .values()
            .filter(|entry| entry.topic == topic && &entry.session_id == session_id)
            .map(|entry| entry.listener.clone())
            .collect();

        for listener in &targets {
            listener(payload.to_string());
        }
        targets.len()
    }

    pub fn emit_output(&self, session_id: &str, payload: &str) -> usize {
        self.emit(&SessionId::from(session_id), Topic::Output, payload)
    }

    pub fn emit_error(&self, session_id: &str, payload: &str) -> usize {
        self.emit(&SessionId::from(session_id), Topic::Error, payload)
    }

    pub fn emit_closed(&self, session_id: &str) -> usize {
        lock(&self.open_sessions).remove(&SessionId::from(session_id));
        self.emit(&SessionId::from(session_id), Topic::Closed, "")
    }

    /// Number of live listeners for a session
    pub fn listener_count(&self, session_id: &str) -> usize {
        let session_id = SessionId::from(session_id);
        lock(&self.listeners)
            .values()
            .filter(|entry| entry.session_id == session_id)
            .count()
    }

    /// Distinct session ids that currently have listeners
    pub fn subscribed_sessions(&self) -> Vec<SessionId> {
        let mut sessions: Vec<SessionId> = Vec::new();
        for entry in lock(&self.listeners).values() {
            if !sessions.contains(&entry.session_id) {
                sessions.push(entry.session_id.clone());
            }
        }
        sessions
    }

    /// Shell the session was opened with, if candidates were given
    pub fn shell_of(&self, session_id: &str) -> Option<String> {
        lock(&self.session_shells)
            .get(&SessionId::from(session_id))
            .cloned()
    }

    pub fn is_open(&self, session_id: &str) -> bool {
        lock(&self.open_sessions).contains(&SessionId::from(session_id))
    }

    pub fn calls(&self) -> CallLog {
        lock(&self.calls).clone()
    }

    /// How many times `close` was called for a session
    pub fn close_count(&self, session_id: &str) -> usize {
        lock(&self.calls)
            .closed
            .iter()
            .filter(|id| id.as_str() == session_id)
            .count()
    }

    /// All bytes sent to a session, concatenated
    pub fn sent_to(&self, session_id: &str) -> Vec<u8> {
        lock(&self.calls)
            .sent
            .iter()
            .filter(|(id, _)| id.as_str() == session_id)
            .flat_map(|(_, data)| data.iter().copied())
            .collect()
    }

    fn open_session(&self, session_id: &SessionId, shell: Option<String>) {
        lock(&self.open_sessions).insert(session_id.clone());
        if let Some(shell) = shell {
            lock(&self.session_shells).insert(session_id.clone(), shell);
        }
    }

    /// First candidate present in the container; rejects when none is
    fn pick_shell(&self, request: &ConnectRequest) -> Result<Option<String>, TransportError> {
        if request.shell_candidates.is_empty() {
            return Ok(None);
        }

        let missing = lock(&self.missing_shells);
        for shell in &request.shell_candidates {
            if missing.contains(shell) {
                debug!("Shell {} not found in {}, trying next", shell, request.container);
                continue;
            }
            return Ok(Some(shell.clone()));
        }

        Err(TransportError::Rejected(format!(
            "no usable shell in container {} (tried {})",
            request.container,
            request.shell_candidates.join(", ")
        )))
    }

    fn ensure_open(&self, session_id: &SessionId) -> Result<(), TransportError> {
        if lock(&self.open_sessions).contains(session_id) {
            Ok(())
        } else {
            Err(TransportError::UnknownSession(session_id.clone()))
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new(ConnectMode::Immediate)
    }
}

#[async_trait]
impl TransportClient for MockTransport {
    async fn connect(&self, request: ConnectRequest) -> Result<SessionId, TransportError> {
        lock(&self.calls).connects.push(request.clone());
        let mode = lock(&self.mode).clone();
        let shell = self.pick_shell(&request)?;

        let result = match mode {
            ConnectMode::Immediate => {
                let n = self.next_session.fetch_add(1, Ordering::SeqCst);
                Ok(SessionId::new(format!("session-{}", n)))
            }
            ConnectMode::Reject(reason) => Err(TransportError::Rejected(reason)),
            ConnectMode::Manual => {
                let (responder, response) = oneshot::channel();
                self.pending_tx
                    .send(PendingConnect { request, responder })
                    .map_err(|_| TransportError::Unavailable("mock queue closed".to_string()))?;
                response
                    .await
                    .unwrap_or_else(|_| Err(TransportError::Unavailable("connect abandoned".to_string())))
            }
        };

        if let Ok(session_id) = &result {
            self.open_session(session_id, shell);
        }
        result
    }

    async fn send(&self, session_id: &SessionId, data: &[u8]) -> Result<(), TransportError> {
        self.ensure_open(session_id)?;
        lock(&self.calls).sent.push((session_id.clone(), data.to_vec()));

        if self.echo.load(Ordering::SeqCst) {
            let echoed = String::from_utf8_lossy(data).replace('\r', "\r\n");
            self.emit(session_id, Topic::Output, &echoed);
        }
        Ok(())
    }

    async fn resize(
        &self,
        session_id: &SessionId,
        cols: u16,
        rows: u16,
    ) -> Result<(), TransportError> {
        self.ensure_open(session_id)?;
        lock(&self.calls)
            .resizes
            .push((session_id.clone(), cols, rows));
        Ok(())
    }

    async fn close(&self, session_id: &SessionId) -> Result<(), TransportError> {
        lock(&self.calls).closed.push(session_id.clone());
        if !lock(&self.open_sessions).remove(session_id) {
            debug!("Close for unknown or already closed session {}", session_id);
        }
        Ok(())
    }

    fn listen(
        &self,
        session_id: &SessionId,
        topic: Topic,
        listener: Listener,
    ) -> Result<ListenerId, TransportError> {
        let call = self.listen_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if *lock(&self.failing_listen) == Some(call) {
            return Err(TransportError::Unavailable(format!(
                "cannot listen on {}",
                topic.key(session_id)
            )));
        }

        let id = self.next_listener.fetch_add(1, Ordering::SeqCst);
        lock(&self.listeners).insert(
            id,
            ListenerEntry {
                session_id: session_id.clone(),
                topic,
                listener,
            },
        );
        Ok(ListenerId(id))
    }

    fn unlisten(&self, listener_id: ListenerId) {
        lock(&self.listeners).remove(&listener_id.0);
    }
}

#[async_trait]
impl ContainerResolver for MockTransport {
    async fn list(&self, pod: &str, namespace: &str) -> Result<Vec<String>, TransportError> {
        lock(&self.containers)
            .get(&(pod.to_string(), namespace.to_string()))
            .cloned()
            .ok_or_else(|| TransportError::NotFound(format!("pod {}/{}", namespace, pod)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn request(container: &str) -> ConnectRequest {
        ConnectRequest {
            pod: "web-7f".to_string(),
            namespace: "default".to_string(),
            container: container.to_string(),
            shell_candidates: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_immediate_mode_assigns_sequential_ids() {
        let transport = MockTransport::new(ConnectMode::Immediate);

        let first = transport.connect(request("nginx")).await.unwrap();
        let second = transport.connect(request("nginx")).await.unwrap();

        assert_eq!(first.as_str(), "session-1");
        assert_eq!(second.as_str(), "session-2");
        assert!(transport.is_open("session-1"));
    }

    #[tokio::test]
    async fn test_manual_mode_parks_until_resolved() {
        let transport = Arc::new(MockTransport::new(ConnectMode::Manual));

        let connecting = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.connect(request("nginx")).await })
        };

        let pending = transport.next_connect().await.unwrap();
        assert_eq!(pending.request.container, "nginx");
        assert!(pending.succeed("s1"));

        let result = connecting.await.unwrap();
        assert_eq!(result.unwrap().as_str(), "s1");
    }

    #[tokio::test]
    async fn test_close_tolerates_unknown_session() {
        let transport = MockTransport::default();
        assert!(transport.close(&SessionId::from("ghost")).await.is_ok());
        assert_eq!(transport.close_count("ghost"), 1);
    }

    #[tokio::test]
    async fn test_echo_routes_input_to_output_listeners() {
        let transport = MockTransport::default().with_echo(true);
        let id = transport.connect(request("nginx")).await.unwrap();

        let seen = Arc::new(Mutex::new(String::new()));
        let sink = seen.clone();
        transport
            .listen(&id, Topic::Output, Arc::new(move |p| lock(&sink).push_str(&p)))
            .unwrap();

        transport.send(&id, b"ls\r").await.unwrap();
        assert_eq!(lock(&seen).as_str(), "ls\r\n");
    }

    #[tokio::test]
    async fn test_unlisten_stops_delivery() {
        let transport = MockTransport::default();
        let id = SessionId::from("s1");
        let handle = transport
            .listen(&id, Topic::Output, Arc::new(|_| {}))
            .unwrap();

        assert_eq!(transport.emit_output("s1", "x"), 1);
        transport.unlisten(handle);
        assert_eq!(transport.emit_output("s1", "x"), 0);
        assert!(transport.subscribed_sessions().is_empty());
    }

    #[tokio::test]
    async fn test_missing_shell_falls_back_to_next_candidate() {
        let transport = MockTransport::default().with_missing_shells(&["/bin/bash"]);
        let mut req = request("nginx");
        req.shell_candidates = vec!["/bin/bash".to_string(), "/bin/sh".to_string()];

        let id = transport.connect(req).await.unwrap();
        assert_eq!(transport.shell_of(id.as_str()).as_deref(), Some("/bin/sh"));
    }

    #[tokio::test]
    async fn test_no_usable_shell_is_rejected() {
        let transport = MockTransport::default().with_missing_shells(&["/bin/bash", "/bin/sh"]);
        let mut req = request("distroless");
        req.shell_candidates = vec!["/bin/bash".to_string(), "/bin/sh".to_string()];

        let err = transport.connect(req).await.unwrap_err();
        assert!(matches!(err, TransportError::Rejected(reason) if reason.contains("distroless")));
        assert_eq!(transport.calls().connects.len(), 1);
    }

    #[test]
    fn test_nth_listen_fails_once() {
        let transport = MockTransport::default();
        let id = SessionId::from("s1");
        transport.fail_nth_listen(2);

        assert!(transport.listen(&id, Topic::Output, Arc::new(|_| {})).is_ok());
        assert_eq!(
            transport.listen(&id, Topic::Error, Arc::new(|_| {})),
            Err(TransportError::Unavailable("cannot listen on error:s1".to_string()))
        );
        assert!(transport.listen(&id, Topic::Closed, Arc::new(|_| {})).is_ok());
        assert_eq!(transport.listener_count("s1"), 2);
    }
}
