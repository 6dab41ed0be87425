use std::time::Duration;

use futures::StreamExt;
use relay::{RelayConfig, RelayError, StreamRelay, collect_text};
use request::{ChatCompletionsRequest, Message, RelayRequest};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn sse_frame(content: &str) -> String {
    format!(
        "data: {}\n\n",
        json!({
            "id": "chatcmpl-1",
            "object": "chat.completion.chunk",
            "model": "gpt-3.5-turbo",
            "choices": [{"index": 0, "delta": {"content": content}, "finish_reason": null}]
        })
    )
}

fn quiz_request() -> RelayRequest {
    let request = ChatCompletionsRequest::builder("gpt-3.5-turbo")
        .message(Message::system("You generate multiple choice quiz questions."))
        .message(Message::user("Three questions about the solar system"))
        .max_tokens(200)
        .temperature(1.0)
        .n(1)
        .build();
    RelayRequest::try_from(request).unwrap()
}

fn relay_for(endpoint: String) -> StreamRelay {
    StreamRelay::new(RelayConfig::default().endpoint(endpoint).api_key("test-key")).unwrap()
}

fn event_stream(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/event-stream")
        .set_body_string(body)
}

#[tokio::test]
async fn relays_deltas_with_authenticated_streaming_request() {
    let server = MockServer::start().await;
    let body = format!(
        "{}{}{}data: [DONE]\n\n",
        sse_frame("Mercury "),
        sse_frame("is closest "),
        sse_frame("to the Sun.")
    );

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .and(header("content-type", "application/json"))
        .and(body_partial_json(json!({
            "model": "gpt-3.5-turbo",
            "stream": true,
            "max_tokens": 200
        })))
        .respond_with(event_stream(body))
        .expect(1)
        .mount(&server)
        .await;

    let relay = relay_for(format!("{}/v1/chat/completions", server.uri()));
    let stream = relay.open(quiz_request()).await.unwrap();

    assert_eq!(
        collect_text(stream).await.unwrap(),
        "Mercury is closest to the Sun."
    );
}

#[tokio::test]
async fn passes_opaque_payload_through() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(body_partial_json(json!({
            "model": "custom-model",
            "stream": true,
            "presence_penalty": 0.5,
            "metadata": {"page": "story"}
        })))
        .respond_with(event_stream(format!("{}data: [DONE]\n\n", sse_frame("ok"))))
        .expect(1)
        .mount(&server)
        .await;

    let relay = relay_for(server.uri());
    let payload = RelayRequest::new(json!({
        "model": "custom-model",
        "messages": [{"role": "user", "content": "hi"}],
        "presence_penalty": 0.5,
        "metadata": {"page": "story"}
    }));

    let stream = relay.open(payload).await.unwrap();
    assert_eq!(collect_text(stream).await.unwrap(), "ok");
}

#[tokio::test]
async fn non_success_status_fails_before_streaming() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(401)
                .insert_header("content-type", "application/json")
                .set_body_string(r#"{"error":"invalid_api_key"}"#),
        )
        .expect(1)
        .mount(&server)
        .await;

    let relay = relay_for(server.uri());
    match relay.open(quiz_request()).await {
        Err(RelayError::UpstreamRejected { status, body }) => {
            assert_eq!(status.as_u16(), 401);
            assert_eq!(body, r#"{"error":"invalid_api_key"}"#);
        }
        Err(other) => panic!("expected UpstreamRejected, got {other:?}"),
        Ok(_) => panic!("expected UpstreamRejected, got a stream"),
    }
}

#[tokio::test]
async fn missing_api_key_surfaces_as_upstream_rejection() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(header("authorization", "Bearer test-key"))
        .respond_with(event_stream(sse_frame("unreachable")))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_string("missing key"))
        .mount(&server)
        .await;

    let relay = StreamRelay::new(RelayConfig::default().endpoint(server.uri())).unwrap();
    let error = relay.open(quiz_request()).await.err().unwrap();
    assert_eq!(error.upstream_status().map(|s| s.as_u16()), Some(401));
}

#[tokio::test]
async fn malformed_event_ends_the_stream_with_an_error() {
    let server = MockServer::start().await;
    let body = format!(
        "{}data: not-json\n\n{}data: [DONE]\n\n",
        sse_frame("first"),
        sse_frame("never")
    );

    Mock::given(method("POST"))
        .respond_with(event_stream(body))
        .mount(&server)
        .await;

    let relay = relay_for(server.uri());
    let mut stream = relay.open(quiz_request()).await.unwrap();

    assert_eq!(stream.next().await.unwrap().unwrap(), "first");
    assert!(matches!(
        stream.next().await,
        Some(Err(RelayError::MalformedEvent { .. }))
    ));
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn each_open_uses_an_independent_upstream_request() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(event_stream(format!("{}data: [DONE]\n\n", sse_frame("x"))))
        .expect(2)
        .mount(&server)
        .await;

    let relay = relay_for(server.uri());
    let first = relay.open(quiz_request()).await.unwrap();
    let second = relay.open(quiz_request()).await.unwrap();

    assert_eq!(collect_text(second).await.unwrap(), "x");
    assert_eq!(collect_text(first).await.unwrap(), "x");
}

async fn read_request(socket: &mut TcpStream) {
    let mut received = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = socket.read(&mut buf).await.unwrap();
        assert!(n > 0, "client closed before sending the request");
        received.extend_from_slice(&buf[..n]);

        let Some(head_end) = received.windows(4).position(|w| w == b"\r\n\r\n") else {
            continue;
        };
        let head = String::from_utf8_lossy(&received[..head_end]).to_lowercase();
        let content_length = head
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .and_then(|value| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        if received.len() >= head_end + 4 + content_length {
            return;
        }
    }
}

fn http_chunk(payload: &str) -> Vec<u8> {
    format!("{:x}\r\n{}\r\n", payload.len(), payload).into_bytes()
}

const STREAM_HEAD: &[u8] = b"HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ntransfer-encoding: chunked\r\n\r\n";

#[tokio::test]
async fn abandoning_the_stream_closes_the_upstream_connection() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let (closed_tx, closed_rx) = oneshot::channel();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        read_request(&mut socket).await;
        socket.write_all(STREAM_HEAD).await.unwrap();
        socket.write_all(&http_chunk(&sse_frame("Hi"))).await.unwrap();

        let ping = http_chunk(": ping\n\n");
        let mut buf = [0u8; 64];
        loop {
            tokio::select! {
                read = socket.read(&mut buf) => {
                    if matches!(read, Ok(0) | Err(_)) {
                        break;
                    }
                }
                _ = tokio::time::sleep(Duration::from_millis(10)) => {
                    if socket.write_all(&ping).await.is_err() {
                        break;
                    }
                }
            }
        }
        let _ = closed_tx.send(());
    });

    let relay = relay_for(format!("http://{address}/v1/chat/completions"));
    let mut stream = relay.open(quiz_request()).await.unwrap();
    assert_eq!(stream.next().await.unwrap().unwrap(), "Hi");

    drop(stream);

    tokio::time::timeout(Duration::from_secs(5), closed_rx)
        .await
        .expect("upstream connection was not released")
        .unwrap();
}

#[tokio::test]
async fn connection_loss_mid_stream_is_a_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        read_request(&mut socket).await;
        socket.write_all(STREAM_HEAD).await.unwrap();
        socket.write_all(&http_chunk(&sse_frame("partial"))).await.unwrap();
        socket.flush().await.unwrap();
        // Dropping the socket without the terminating chunk truncates the body.
    });

    let relay = relay_for(format!("http://{address}/v1/chat/completions"));
    let mut stream = relay.open(quiz_request()).await.unwrap();

    assert_eq!(stream.next().await.unwrap().unwrap(), "partial");
    assert!(matches!(
        stream.next().await,
        Some(Err(RelayError::Transport(_)))
    ));
    assert!(stream.next().await.is_none());
}
