use std::{
    io,
    net::TcpListener,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use actix_web::{
    dev::Server,
    web::{get, post},
    App, HttpRequest, HttpResponse, HttpServer,
};
use asserto::{
    telemetry::{self, TelemetryError},
    ServerHandle, Settings,
};
use dotenvy::dotenv;
use once_cell::sync::Lazy;
use serde_json::json;
use tracing_actix_web::TracingLogger;

static TELEMETRY: Lazy<Result<(), TelemetryError>> =
    Lazy::new(|| telemetry::init_for_tests("asserto-test"));

pub struct TestApp {
    pub handle: ServerHandle,
    binds: Arc<AtomicUsize>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::build(|serve| ServerHandle::new(serve))
    }

    pub fn with_settings(settings: &Settings) -> Self {
        Self::build(|serve| ServerHandle::with_settings(serve, settings))
    }

    fn build<F>(make_handle: F) -> Self
    where
        F: FnOnce(Box<dyn Fn(TcpListener) -> io::Result<Server> + Send + Sync>) -> ServerHandle,
    {
        dotenv().ok();
        Lazy::force(&TELEMETRY)
            .as_ref()
            .expect("Failed to initialize telemetry");

        let binds = Arc::new(AtomicUsize::new(0));
        let counter = binds.clone();
        let handle = make_handle(Box::new(move |listener: TcpListener| {
            counter.fetch_add(1, Ordering::SeqCst);
            run(listener)
        }));
        Self { handle, binds }
    }

    /// How many times the server has been started.
    pub fn binds(&self) -> usize {
        self.binds.load(Ordering::SeqCst)
    }
}

fn run(listener: TcpListener) -> io::Result<Server> {
    let server = HttpServer::new(|| {
        App::new()
            .wrap(TracingLogger::default())
            .route("/", get().to(index))
            .route("/slow", get().to(slow))
            .route("/missing", get().to(missing))
            .route("/echo", post().to(echo))
            .route("/latin1", get().to(latin1))
            .route("/json", get().to(document))
    })
    .workers(1)
    .listen(listener)?
    .run();
    Ok(server)
}

async fn index() -> HttpResponse {
    HttpResponse::Ok().body("ok")
}

async fn slow() -> HttpResponse {
    tokio::time::sleep(Duration::from_millis(50)).await;
    HttpResponse::Ok().body("late")
}

async fn missing() -> HttpResponse {
    HttpResponse::NotFound().body("not here")
}

async fn echo(request: HttpRequest, body: String) -> HttpResponse {
    let content_type = request
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_owned();
    HttpResponse::Ok()
        .insert_header(("Content-Type", content_type))
        .insert_header(("X-Method", request.method().as_str().to_owned()))
        .insert_header(("X-Length", body.len().to_string()))
        .body(body)
}

async fn latin1() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/plain; charset=iso-8859-1")
        .body(vec![0x63, 0x61, 0x66, 0xe9])
}

async fn document() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "name": "asserto",
        "owner": null,
        "tags": ["http", "assert"],
        "stars": 42
    }))
}
