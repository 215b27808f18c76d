//! Session lifecycle tests for PodShell

use std::sync::Arc;
use std::time::Duration;

use podshell::render::BufferSink;
use podshell::session::{
    ContainerSelection, DEFAULT_CONNECT_TIMEOUT, SessionController, SessionError, SessionState,
    Target,
};
use podshell::transport::{ConnectMode, MockTransport, SessionId};
use tokio_test::assert_ok;

fn setup(mode: ConnectMode) -> (Arc<MockTransport>, Arc<BufferSink>, SessionController) {
    let transport = Arc::new(MockTransport::new(mode));
    let sink = Arc::new(BufferSink::new());
    let controller = SessionController::new(transport.clone(), sink.clone());
    (transport, sink, controller)
}

fn nginx() -> Target {
    Target::new("web-7f", "default", "nginx")
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    let result = tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "condition not reached in time");
}

#[tokio::test]
async fn test_connect_output_and_remote_close() {
    let (transport, sink, mut controller) = setup(ConnectMode::Manual);

    controller.connect(nginx(), DEFAULT_CONNECT_TIMEOUT).unwrap();
    assert_eq!(controller.state(), SessionState::Connecting);

    let pending = transport.next_connect().await.unwrap();
    assert_eq!(pending.request.pod, "web-7f");
    assert_eq!(pending.request.namespace, "default");
    assert_eq!(pending.request.container, "nginx");
    assert!(pending.succeed("s1"));

    assert_eq!(
        controller.process_next_event().await,
        Some(SessionState::Connected)
    );
    assert_eq!(controller.session_id(), Some(SessionId::from("s1")));
    assert_eq!(transport.listener_count("s1"), 3);

    transport.emit_output("s1", "hello\n");
    assert_eq!(sink.contents(), "hello\n");

    transport.emit_closed("s1");
    assert_eq!(
        controller.process_next_event().await,
        Some(SessionState::Closed)
    );
    assert_eq!(transport.listener_count("s1"), 0);
    assert_eq!(
        sink.statuses(),
        vec![
            SessionState::Connecting,
            SessionState::Connected,
            SessionState::Closed
        ]
    );
}

#[tokio::test]
async fn test_close_before_connect_resolves_closes_late_session() {
    let (transport, sink, mut controller) = setup(ConnectMode::Manual);

    controller.connect(nginx(), DEFAULT_CONNECT_TIMEOUT).unwrap();
    let pending = transport.next_connect().await.unwrap();

    assert!(controller.close());
    assert_eq!(controller.state(), SessionState::Closed);

    assert!(pending.succeed("s1"));
    assert_eq!(
        controller.process_next_event().await,
        Some(SessionState::Closed)
    );

    wait_until(|| transport.close_count("s1") == 1).await;
    assert_eq!(transport.listener_count("s1"), 0);
    assert_eq!(controller.subscribed_session(), None);
    assert_eq!(controller.stats().stale_sessions_closed, 1);

    transport.emit_output("s1", "never shown");
    assert_eq!(sink.contents(), "");
}

#[tokio::test]
async fn test_default_container_and_explicit_choice() {
    let (transport, _sink, mut controller) = setup(ConnectMode::Immediate);
    let resolver = MockTransport::default().with_containers("web-7f", "default", &["app", "sidecar"]);

    let mut selection = ContainerSelection::discover(&resolver, "web-7f", "default")
        .await
        .unwrap();
    assert_eq!(selection.default_container(), "app");
    assert_eq!(selection.target().container, "app");

    selection.select("sidecar").unwrap();
    assert_ok!(
        controller
            .connect_and_wait(selection.target(), DEFAULT_CONNECT_TIMEOUT)
            .await
    );

    let connects = transport.calls().connects;
    assert_eq!(connects.len(), 1);
    assert_eq!(connects[0].container, "sidecar");
    controller.close();
}

#[tokio::test(start_paused = true)]
async fn test_timeout_then_late_success_is_closed() {
    let (transport, _sink, mut controller) = setup(ConnectMode::Manual);

    controller
        .connect(nginx(), Duration::from_millis(10_000))
        .unwrap();
    let pending = transport.next_connect().await.unwrap();

    tokio::time::advance(Duration::from_millis(9_999)).await;
    assert_eq!(controller.process_pending_events(), 0);
    assert_eq!(controller.state(), SessionState::Connecting);

    assert_eq!(
        controller.process_next_event().await,
        Some(SessionState::Error)
    );
    assert_eq!(
        controller.last_error(),
        Some(&SessionError::ConnectionTimeout { timeout_ms: 10_000 })
    );

    assert!(pending.succeed("s1"));
    assert_eq!(
        controller.process_next_event().await,
        Some(SessionState::Error)
    );

    wait_until(|| transport.close_count("s1") == 1).await;
    assert_eq!(transport.listener_count("s1"), 0);
    assert_eq!(controller.session_id(), None);
    assert_eq!(controller.stats().timeouts, 1);
}

#[tokio::test(start_paused = true)]
async fn test_connect_and_wait_reports_timeout() {
    let (_transport, sink, mut controller) = setup(ConnectMode::Manual);

    let err = controller
        .connect_and_wait(nginx(), Duration::from_millis(250))
        .await
        .unwrap_err();

    assert_eq!(err, SessionError::ConnectionTimeout { timeout_ms: 250 });
    assert_eq!(sink.last_status(), Some(SessionState::Error));
}

#[tokio::test]
async fn test_close_twice_closes_remote_once() {
    let (transport, _sink, mut controller) = setup(ConnectMode::Immediate);
    let id = controller
        .connect_and_wait(nginx(), DEFAULT_CONNECT_TIMEOUT)
        .await
        .unwrap();

    assert!(controller.close());
    assert!(!controller.close());

    wait_until(|| transport.close_count(id.as_str()) == 1).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(transport.close_count(id.as_str()), 1);
    assert_eq!(controller.state(), SessionState::Closed);
}

#[tokio::test]
async fn test_superseded_attempt_never_delivers() {
    let (transport, sink, mut controller) = setup(ConnectMode::Manual);

    controller.connect(nginx(), DEFAULT_CONNECT_TIMEOUT).unwrap();
    let attempt_a = transport.next_connect().await.unwrap();

    controller
        .connect(Target::new("web-7f", "default", "sidecar"), DEFAULT_CONNECT_TIMEOUT)
        .unwrap();
    let attempt_b = transport.next_connect().await.unwrap();
    assert_eq!(attempt_b.request.container, "sidecar");

    attempt_b.succeed("s2");
    assert_eq!(
        controller.process_next_event().await,
        Some(SessionState::Connected)
    );

    attempt_a.succeed("s1");
    assert_eq!(
        controller.process_next_event().await,
        Some(SessionState::Connected)
    );
    wait_until(|| transport.close_count("s1") == 1).await;

    assert_eq!(transport.emit_output("s1", "stale output"), 0);
    assert_eq!(transport.emit_error("s1", "stale error"), 0);
    assert_eq!(transport.emit_closed("s1"), 0);
    assert_eq!(controller.process_pending_events(), 0);

    assert_eq!(controller.state(), SessionState::Connected);
    assert_eq!(controller.session_id(), Some(SessionId::from("s2")));
    assert_eq!(sink.contents(), "");
    controller.close();
}

#[tokio::test]
async fn test_queued_error_from_replaced_session_is_ignored() {
    let (transport, sink, mut controller) = setup(ConnectMode::Immediate);
    let first = controller
        .connect_and_wait(nginx(), DEFAULT_CONNECT_TIMEOUT)
        .await
        .unwrap();

    // Error frame queued for the first session before it is replaced
    transport.emit_error(first.as_str(), "connection reset");

    let second = controller
        .connect_and_wait(Target::new("web-7f", "default", "sidecar"), DEFAULT_CONNECT_TIMEOUT)
        .await
        .unwrap();
    controller.process_pending_events();

    assert_eq!(controller.state(), SessionState::Connected);
    assert_eq!(controller.last_error(), None);
    assert_eq!(controller.subscribed_session(), Some(&second));
    assert!(!sink.contents().contains("connection reset"));
    controller.close();
}

#[tokio::test]
async fn test_at_most_one_subscription_set() {
    let (transport, _sink, mut controller) = setup(ConnectMode::Immediate);

    for container in ["app", "sidecar", "app", "init"] {
        controller
            .connect_and_wait(Target::new("web-7f", "default", container), DEFAULT_CONNECT_TIMEOUT)
            .await
            .unwrap();
        assert_eq!(transport.subscribed_sessions().len(), 1);
    }

    controller.close();
    assert!(transport.subscribed_sessions().is_empty());
}

#[tokio::test]
async fn test_output_chunks_render_in_order() {
    let (transport, sink, mut controller) = setup(ConnectMode::Immediate);
    let id = controller
        .connect_and_wait(nginx(), DEFAULT_CONNECT_TIMEOUT)
        .await
        .unwrap();

    for chunk in ["a", "b", "c"] {
        transport.emit_output(id.as_str(), chunk);
    }

    assert_eq!(sink.contents(), "abc");
    controller.close();
}

#[tokio::test]
async fn test_input_only_reaches_current_session() {
    let transport = Arc::new(MockTransport::new(ConnectMode::Immediate).with_echo(true));
    let sink = Arc::new(BufferSink::new());
    let mut controller = SessionController::new(transport.clone(), sink.clone());

    let first = controller
        .connect_and_wait(nginx(), DEFAULT_CONNECT_TIMEOUT)
        .await
        .unwrap();
    let second = controller
        .connect_and_wait(nginx(), DEFAULT_CONNECT_TIMEOUT)
        .await
        .unwrap();

    assert!(!controller.send_input_to(&first, b"rm -rf /tmp/x\r"));
    assert!(controller.send_input_to(&second, b"ls\r"));

    wait_until(|| sink.contents() == "ls\r\n").await;
    assert!(transport.sent_to(first.as_str()).is_empty());
    assert_eq!(transport.sent_to(second.as_str()), b"ls\r");
    assert_eq!(controller.input().dropped_inputs(), 1);
    controller.close();
}

#[tokio::test]
async fn test_stream_error_then_close() {
    let (transport, sink, mut controller) = setup(ConnectMode::Immediate);
    let id = controller
        .connect_and_wait(nginx(), DEFAULT_CONNECT_TIMEOUT)
        .await
        .unwrap();

    transport.emit_output(id.as_str(), "$ ");
    transport.emit_error(id.as_str(), "stream reset by peer");
    assert_eq!(
        controller.process_next_event().await,
        Some(SessionState::Error)
    );
    assert_eq!(sink.contents(), "$ \r\n[error] stream reset by peer\r\n");

    assert!(controller.close());
    wait_until(|| transport.close_count(id.as_str()) == 1).await;
    assert_eq!(transport.listener_count(id.as_str()), 0);
}

#[tokio::test]
async fn test_rejected_connect_can_be_retried_explicitly() {
    let (transport, _sink, mut controller) =
        setup(ConnectMode::Reject("no usable shell binary".to_string()));

    let err = controller
        .connect_and_wait(nginx(), DEFAULT_CONNECT_TIMEOUT)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        SessionError::TransportRejected("no usable shell binary".to_string())
    );
    assert_eq!(transport.calls().connects.len(), 1);

    transport.set_mode(ConnectMode::Immediate);
    let id = controller
        .connect_and_wait(nginx(), DEFAULT_CONNECT_TIMEOUT)
        .await
        .unwrap();

    assert_eq!(controller.state(), SessionState::Connected);
    assert_eq!(transport.calls().connects.len(), 2);
    assert_eq!(controller.subscribed_session(), Some(&id));
    controller.close();
}
