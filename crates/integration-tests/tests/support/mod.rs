#![allow(dead_code)]

use std::sync::Arc;

use gateway::citations::{RedirectResolver, ResolveFuture};
use gateway::telemetry::{RunTelemetry, TelemetrySink};

pub struct MockBackend {
    pub base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl MockBackend {
    pub async fn start(app: axum::Router) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("mock backend listener should bind");
        let bind_addr = listener
            .local_addr()
            .expect("mock backend listener local address should exist");

        let handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .await
                .expect("mock backend server should run");
        });

        Self {
            base_url: format!("http://{bind_addr}"),
            handle,
        }
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[derive(Default)]
pub struct RecordingSink {
    records: std::sync::Mutex<Vec<RunTelemetry>>,
}

impl RecordingSink {
    pub fn last(&self) -> RunTelemetry {
        self.records
            .lock()
            .expect("sink lock")
            .last()
            .cloned()
            .expect("at least one record")
    }
}

impl TelemetrySink for RecordingSink {
    fn record(&self, record: &RunTelemetry) {
        self.records.lock().expect("sink lock").push(record.clone());
    }
}

pub struct NullRedirects;

impl RedirectResolver for NullRedirects {
    fn resolve<'a>(&'a self, _url: &'a str) -> ResolveFuture<'a> {
        Box::pin(async move { None })
    }
}

pub fn recording_sink() -> Arc<RecordingSink> {
    Arc::new(RecordingSink::default())
}
