//! Handler chain and request lifecycle tests over real connections.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::http::{HeaderMap, StatusCode};
use bytes::Bytes;
use streamserve::{AsyncContext, AsyncHandler, ClaimFuture, HandlerError, Request, Response, ServerBuilder};
use tokio::net::TcpStream;

mod common;

/// Claims paths starting with `prefix` and records the body it receives.
struct Collector {
    prefix: &'static str,
    offered: Arc<AtomicUsize>,
    chunks: Arc<Mutex<Vec<Bytes>>>,
}

impl Collector {
    fn new(prefix: &'static str) -> (Self, Arc<AtomicUsize>, Arc<Mutex<Vec<Bytes>>>) {
        let offered = Arc::new(AtomicUsize::new(0));
        let chunks = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                prefix,
                offered: Arc::clone(&offered),
                chunks: Arc::clone(&chunks),
            },
            offered,
            chunks,
        )
    }
}

impl AsyncHandler for Collector {
    fn on_headers(&self, ctx: &AsyncContext, _headers: &HeaderMap) -> ClaimFuture {
        self.offered.fetch_add(1, Ordering::SeqCst);
        if ctx.request().path().starts_with(self.prefix) {
            ctx.handled()
        } else {
            ctx.not_handled()
        }
    }

    fn on_request_data(&self, _ctx: &AsyncContext, chunk: Bytes) -> Result<(), HandlerError> {
        self.chunks.lock().unwrap().push(chunk);
        Ok(())
    }

    fn on_request_complete(&self, ctx: &AsyncContext) -> Result<(), HandlerError> {
        let received: usize = self.chunks.lock().unwrap().iter().map(Bytes::len).sum();
        let ctx = ctx.clone();
        let prefix = self.prefix;
        tokio::spawn(async move {
            let body = format!("{prefix} got {received} bytes");
            let _ = ctx.response().send_plain_text(StatusCode::OK, &body).await;
            ctx.complete();
        });
        Ok(())
    }
}

#[tokio::test]
async fn first_claim_wins_and_receives_the_body() {
    let (a, a_offered, a_chunks) = Collector::new("/a");
    let (b, b_offered, b_chunks) = Collector::new("/");
    let (c, c_offered, _) = Collector::new("/");

    let server = ServerBuilder::new()
        .add_handler(a)
        .add_handler(b)
        .add_handler(c)
        .start()
        .await
        .unwrap();

    let res = common::client()
        .post(format!("{}/b/upload", server.uri()))
        .body("0123456789".repeat(1000))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), "/ got 10000 bytes");
    assert_eq!(a_offered.load(Ordering::SeqCst), 1);
    assert_eq!(b_offered.load(Ordering::SeqCst), 1);
    assert_eq!(c_offered.load(Ordering::SeqCst), 0);
    assert!(a_chunks.lock().unwrap().is_empty());

    let body: Vec<u8> = b_chunks.lock().unwrap().iter().flat_map(|c| c.to_vec()).collect();
    assert_eq!(body, "0123456789".repeat(1000).into_bytes());

    server.stop().await;
}

#[tokio::test]
async fn unclaimed_request_is_404() {
    let (a, _, _) = Collector::new("/only-here");
    let server = ServerBuilder::new().add_handler(a).start().await.unwrap();

    let res = common::client()
        .post(format!("{}/elsewhere", server.uri()))
        .body("discarded")
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), 404);
    assert_eq!(
        res.headers()["content-type"].to_str().unwrap(),
        "text/plain;charset=utf-8"
    );
    assert_eq!(res.text().await.unwrap(), "404 Not Found");
    server.stop().await;
}

struct Failing;

impl AsyncHandler for Failing {
    fn on_headers(&self, ctx: &AsyncContext, _headers: &HeaderMap) -> ClaimFuture {
        if ctx.request().path() == "/explode" {
            Box::pin(async { Err::<bool, _>(HandlerError::msg("secret database detail")) })
        } else {
            ctx.not_handled()
        }
    }
}

#[tokio::test]
async fn handler_error_is_500_with_incident_and_connection_survives() {
    let server = ServerBuilder::new()
        .add_handler(Failing)
        .add_sync_handler(|req: &Request, res: &Response| -> Result<bool, HandlerError> {
            if req.path() != "/ok" {
                return Ok(false);
            }
            res.blocking_write("fine")?;
            Ok(true)
        })
        .start()
        .await
        .unwrap();

    let mut stream = TcpStream::connect(server.http_addr().unwrap()).await.unwrap();

    let failed = common::exchange(
        &mut stream,
        "GET /explode HTTP/1.1\r\nHost: localhost\r\n\r\n",
        false,
    )
    .await;
    assert_eq!(failed.status, 500);
    let text = failed.text();
    assert!(text.starts_with("500 Internal Server Error - ID ER-"), "{text}");
    assert!(!text.contains("secret"));

    // Same connection, next request.
    let ok = common::exchange(&mut stream, "GET /ok HTTP/1.1\r\nHost: localhost\r\n\r\n", false).await;
    assert_eq!(ok.status, 200);
    assert_eq!(ok.text(), "fine");

    server.stop().await;
}

#[tokio::test]
async fn panicking_handler_is_500() {
    struct Panics;
    impl AsyncHandler for Panics {
        fn on_headers(&self, _ctx: &AsyncContext, _headers: &HeaderMap) -> ClaimFuture {
            Box::pin(async {
                let explode = true;
                if explode {
                    panic!("claim went wrong");
                }
                Ok(true)
            })
        }
    }

    let server = ServerBuilder::new().add_handler(Panics).start().await.unwrap();
    let res = common::client().get(server.uri()).send().await.unwrap();
    assert_eq!(res.status(), 500);
    assert!(res.text().await.unwrap().contains("ID ER-"));
    server.stop().await;
}

#[tokio::test]
async fn sync_handlers_run_after_async_ones_and_read_the_body() {
    let (a, a_offered, _) = Collector::new("/async");
    let declined = Arc::new(AtomicUsize::new(0));
    let declined_count = Arc::clone(&declined);
    let server = ServerBuilder::new()
        .add_handler(a)
        .add_sync_handler(move |_req: &Request, _res: &Response| -> Result<bool, HandlerError> {
            declined_count.fetch_add(1, Ordering::SeqCst);
            Ok(false)
        })
        .add_sync_handler(|req: &Request, res: &Response| -> Result<bool, HandlerError> {
            if req.path() != "/echo" {
                return Ok(false);
            }
            let body = req.body().blocking_read_to_end();
            res.set_content_length(body.len() as u64);
            res.blocking_write(body)?;
            Ok(true)
        })
        .start()
        .await
        .unwrap();

    let client = common::client();
    let res = client
        .post(format!("{}/echo", server.uri()))
        .body("ping over a worker")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), "ping over a worker");
    assert_eq!(a_offered.load(Ordering::SeqCst), 1);
    assert_eq!(declined.load(Ordering::SeqCst), 1);

    let res = client.get(format!("{}/nobody", server.uri())).send().await.unwrap();
    assert_eq!(res.status(), 404);
    assert_eq!(declined.load(Ordering::SeqCst), 2);

    server.stop().await;
}

#[tokio::test]
async fn sync_handler_error_is_500() {
    let server = ServerBuilder::new()
        .add_sync_handler(|_req: &Request, _res: &Response| -> Result<bool, HandlerError> {
            Err(HandlerError::msg("sync failure"))
        })
        .start()
        .await
        .unwrap();

    let res = common::client().get(server.uri()).send().await.unwrap();
    assert_eq!(res.status(), 500);
    server.stop().await;
}

#[tokio::test]
async fn submit_runs_claim_on_worker_pool() {
    struct Blocking;
    impl AsyncHandler for Blocking {
        fn on_headers(&self, ctx: &AsyncContext, _headers: &HeaderMap) -> ClaimFuture {
            let response = ctx.response().clone();
            let ctx_done = ctx.clone();
            ctx.submit(move || {
                std::thread::sleep(std::time::Duration::from_millis(20));
                response.set_status(StatusCode::CREATED);
                ctx_done.complete();
                Ok(true)
            })
        }
    }

    let server = ServerBuilder::new().add_handler(Blocking).start().await.unwrap();
    let res = common::client().get(server.uri()).send().await.unwrap();
    assert_eq!(res.status(), 201);
    assert_eq!(res.headers()["content-length"], "0");
    server.stop().await;
}

#[tokio::test]
async fn active_connections_track_open_sockets() {
    let server = ServerBuilder::new().start().await.unwrap();
    assert_eq!(server.active_connections(), 0);

    let mut stream = TcpStream::connect(server.http_addr().unwrap()).await.unwrap();
    let res = common::exchange(&mut stream, "GET / HTTP/1.1\r\nHost: x\r\n\r\n", false).await;
    assert_eq!(res.status, 404);
    assert_eq!(server.active_connections(), 1);

    drop(stream);
    server.stop().await;
}

/// Claims after a delay, so the body is already queued when the claim resolves.
struct SlowClaimer {
    chunks: Arc<Mutex<Vec<String>>>,
}

impl AsyncHandler for SlowClaimer {
    fn on_headers(&self, _ctx: &AsyncContext, _headers: &HeaderMap) -> ClaimFuture {
        Box::pin(async {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            Ok(true)
        })
    }

    fn on_request_data(&self, _ctx: &AsyncContext, chunk: Bytes) -> Result<(), HandlerError> {
        self.chunks.lock().unwrap().push(String::from_utf8_lossy(&chunk).to_string());
        Ok(())
    }

    fn on_request_complete(&self, ctx: &AsyncContext) -> Result<(), HandlerError> {
        let joined = self.chunks.lock().unwrap().join("|");
        let ctx = ctx.clone();
        tokio::spawn(async move {
            let _ = ctx.response().send_plain_text(StatusCode::OK, &joined).await;
            ctx.complete();
        });
        Ok(())
    }
}

#[tokio::test]
async fn body_sent_before_a_slow_claim_reaches_the_claimer_in_order() {
    let (declining, declining_offered, declining_chunks) = Collector::new("/nomatch");
    let chunks = Arc::new(Mutex::new(Vec::new()));
    let server = ServerBuilder::new()
        .add_handler(declining)
        .add_handler(SlowClaimer {
            chunks: Arc::clone(&chunks),
        })
        .start()
        .await
        .unwrap();

    let mut stream = TcpStream::connect(server.http_addr().unwrap()).await.unwrap();
    let res = common::exchange(
        &mut stream,
        "POST /slow HTTP/1.1\r\nHost: x\r\nTransfer-Encoding: chunked\r\n\r\n\
         5\r\nalpha\r\n4\r\nbeta\r\n5\r\ngamma\r\n0\r\n\r\n",
        false,
    )
    .await;

    assert_eq!(res.status, 200);
    assert_eq!(res.text(), "alpha|beta|gamma");
    assert_eq!(*chunks.lock().unwrap(), vec!["alpha", "beta", "gamma"]);
    assert_eq!(declining_offered.load(Ordering::SeqCst), 1);
    assert!(declining_chunks.lock().unwrap().is_empty());

    server.stop().await;
}

#[tokio::test]
async fn disconnect_mid_body_releases_the_sync_worker() {
    let received = Arc::new(Mutex::new(None));
    let received_by_handler = Arc::clone(&received);
    let server = ServerBuilder::new()
        .max_blocking_workers(1)
        .add_sync_handler(move |req: &Request, res: &Response| -> Result<bool, HandlerError> {
            match req.path() {
                "/upload" => {
                    let body = req.body().blocking_read_to_end();
                    *received_by_handler.lock().unwrap() = Some(body.len());
                    Ok(true)
                }
                "/hello" => {
                    res.blocking_write("hello")?;
                    Ok(true)
                }
                _ => Ok(false),
            }
        })
        .start()
        .await
        .unwrap();

    {
        use tokio::io::AsyncWriteExt;
        let mut stream = TcpStream::connect(server.http_addr().unwrap()).await.unwrap();
        stream
            .write_all(b"POST /upload HTTP/1.1\r\nHost: x\r\nContent-Length: 100\r\n\r\n0123456789")
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }

    let res = tokio::time::timeout(
        std::time::Duration::from_secs(3),
        common::client().get(format!("{}/hello", server.uri())).send(),
    )
    .await
    .expect("worker pool still has a free worker")
    .unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), "hello");
    assert_eq!(*received.lock().unwrap(), Some(10));

    server.stop().await;
}

#[tokio::test]
async fn unread_upload_is_not_buffered_whole() {
    use tokio::io::AsyncWriteExt;

    const TOTAL: usize = 64 * 1024 * 1024;
    let reading = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let reading_flag = Arc::clone(&reading);
    let server = ServerBuilder::new()
        .add_sync_handler(move |req: &Request, res: &Response| -> Result<bool, HandlerError> {
            std::thread::sleep(std::time::Duration::from_millis(1500));
            reading_flag.store(true, Ordering::SeqCst);
            let mut total = 0;
            while let Some(chunk) = req.body().blocking_next_chunk() {
                total += chunk.len();
            }
            res.blocking_write(total.to_string())?;
            Ok(true)
        })
        .start()
        .await
        .unwrap();

    let stream = TcpStream::connect(server.http_addr().unwrap()).await.unwrap();
    let (mut reader, mut writer) = stream.into_split();
    let written = Arc::new(AtomicUsize::new(0));
    let upload = tokio::spawn({
        let written = Arc::clone(&written);
        async move {
            let head = format!("POST /upload HTTP/1.1\r\nHost: x\r\nContent-Length: {TOTAL}\r\n\r\n");
            writer.write_all(head.as_bytes()).await.unwrap();
            let piece = vec![b'u'; 64 * 1024];
            while written.load(Ordering::SeqCst) < TOTAL {
                writer.write_all(&piece).await.unwrap();
                written.fetch_add(piece.len(), Ordering::SeqCst);
            }
            writer
        }
    });

    tokio::time::sleep(std::time::Duration::from_millis(1000)).await;
    assert!(!reading.load(Ordering::SeqCst));
    let sent = written.load(Ordering::SeqCst);
    assert!(sent < TOTAL / 2, "server accepted {sent} bytes with no reader");

    let _writer = upload.await.unwrap();
    let res = tokio::time::timeout(
        std::time::Duration::from_secs(20),
        common::read_response(&mut reader, false),
    )
    .await
    .unwrap();
    assert_eq!(res.status, 200);
    assert_eq!(res.text(), TOTAL.to_string());

    server.stop().await;
}
