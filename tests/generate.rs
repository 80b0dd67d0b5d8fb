use axum::body::Body;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use bytes::Bytes;
use futures_util::stream::{self, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mandiao::generate::{CompletionProxy, ERROR_PREFIX};

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn fixed(status: StatusCode, body: &'static str) -> Router {
    Router::new().route(
        "/api/generate",
        post(move || async move { (status, body).into_response() }),
    )
}

async fn collect(proxy: &CompletionProxy, prompt: &str) -> Vec<String> {
    proxy.generate(prompt).collect().await
}

#[tokio::test]
async fn fragments_arrive_in_order_and_stop_at_done() {
    let body = concat!(
        "{\"model\":\"m\",\"response\":\"Hel\",\"done\":false}\n",
        "{this is not json\n",
        "\n",
        "{\"model\":\"m\",\"response\":\"lo\",\"done\":false}\n",
        "{\"model\":\"m\",\"response\":\"!\",\"done\":true}\n",
        "{\"model\":\"m\",\"response\":\"ignored\",\"done\":false}\n",
    );
    let endpoint = serve(fixed(StatusCode::OK, body)).await;
    let proxy = CompletionProxy::new(&endpoint, "m").unwrap();

    assert_eq!(collect(&proxy, "hi").await, vec!["Hel", "lo", "!"]);
}

#[tokio::test]
async fn final_line_without_newline_is_flushed() {
    let body = "{\"response\":\"a\",\"done\":false}\n{\"response\":\"b\",\"done\":false}";
    let endpoint = serve(fixed(StatusCode::OK, body)).await;
    let proxy = CompletionProxy::new(&endpoint, "m").unwrap();

    assert_eq!(collect(&proxy, "hi").await, vec!["a", "b"]);
}

#[tokio::test]
async fn request_carries_model_and_prompt() {
    let seen: Arc<Mutex<Option<serde_json::Value>>> = Arc::default();
    let captured = Arc::clone(&seen);
    let app = Router::new().route(
        "/api/generate",
        post(move |Json(req): Json<serde_json::Value>| {
            let captured = Arc::clone(&captured);
            async move {
                *captured.lock().unwrap() = Some(req);
                "{\"response\":\"ok\",\"done\":true}\n"
            }
        }),
    );
    let endpoint = serve(app).await;
    let proxy = CompletionProxy::new(&format!("{}/", endpoint), "deepseek-r1:1.5b").unwrap();

    assert_eq!(collect(&proxy, "the prompt").await, vec!["ok"]);
    let req = seen.lock().unwrap().clone().unwrap();
    assert_eq!(req["model"], "deepseek-r1:1.5b");
    assert_eq!(req["prompt"], "the prompt");
    assert_eq!(req["stream"], true);
}

#[tokio::test]
async fn non_success_status_is_a_single_error_fragment() {
    let endpoint = serve(fixed(StatusCode::NOT_FOUND, "{\"error\":\"model not found\"}")).await;
    let proxy = CompletionProxy::new(&endpoint, "missing").unwrap();

    let fragments = collect(&proxy, "hi").await;
    assert_eq!(fragments.len(), 1);
    assert!(fragments[0].starts_with(ERROR_PREFIX));
    assert!(fragments[0].contains("404"));
    assert!(fragments[0].contains("model not found"));
}

#[tokio::test]
async fn unreachable_runtime_is_a_single_error_fragment() {
    let proxy = CompletionProxy::new("http://127.0.0.1:1", "m").unwrap();

    let fragments = collect(&proxy, "hi").await;
    assert_eq!(fragments.len(), 1);
    assert!(fragments[0].starts_with(ERROR_PREFIX));
}

#[tokio::test]
async fn error_line_ends_the_stream() {
    let body = concat!(
        "{\"response\":\"partial\",\"done\":false}\n",
        "{\"error\":\"out of memory\"}\n",
        "{\"response\":\"never\",\"done\":false}\n",
    );
    let endpoint = serve(fixed(StatusCode::OK, body)).await;
    let proxy = CompletionProxy::new(&endpoint, "m").unwrap();

    let fragments = collect(&proxy, "hi").await;
    assert_eq!(fragments.len(), 2);
    assert_eq!(fragments[0], "partial");
    assert!(fragments[1].starts_with(ERROR_PREFIX));
    assert!(fragments[1].contains("out of memory"));
}

/// Flags when the server drops the response body it was streaming.
struct BodyDropped(Arc<AtomicBool>);

impl Drop for BodyDropped {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn first_fragment_is_yielded_before_the_response_ends() {
    let dropped = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&dropped);
    let app = Router::new().route(
        "/api/generate",
        post(move || {
            let guard = BodyDropped(Arc::clone(&flag));
            async move {
                let first = stream::once(async {
                    Ok::<_, std::io::Error>(Bytes::from_static(
                        b"{\"response\":\"early\",\"done\":false}\n",
                    ))
                });
                // The guard lives as long as the body stream does.
                let rest = stream::pending().map(move |item| {
                    let _held = &guard;
                    item
                });
                Response::new(Body::from_stream(first.chain(rest)))
            }
        }),
    );
    let endpoint = serve(app).await;
    let proxy = CompletionProxy::new(&endpoint, "m").unwrap();

    let mut stream = proxy.generate("hi");
    let first = tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("first fragment should not wait for the end of the body");
    assert_eq!(first.as_deref(), Some("early"));

    assert!(tokio::time::timeout(Duration::from_millis(100), stream.next())
        .await
        .is_err());
    assert!(!dropped.load(Ordering::SeqCst));

    // Dropping the stream closes the connection, and the server drops its body.
    drop(stream);
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !dropped.load(Ordering::SeqCst) && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(dropped.load(Ordering::SeqCst), "server kept streaming after the client dropped");
}
