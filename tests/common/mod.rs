//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use policy_loader::{
    CodecRegistry, ConfigLoader, MemoryBackend, Params, StorageRegistry,
};

/// Start a programmable mock HTTP backend on an ephemeral port.
///
/// `f` receives the request path and returns `(status, body)`.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        let mut buf = vec![0u8; 4096];
                        let n = socket.read(&mut buf).await.unwrap_or(0);
                        let request = String::from_utf8_lossy(&buf[..n]);
                        let path = request
                            .lines()
                            .next()
                            .and_then(|line| line.split_whitespace().nth(1))
                            .unwrap_or("/")
                            .to_string();

                        let (status, body) = f(path).await;
                        let status_text = match status {
                            200 => "200 OK",
                            404 => "404 Not Found",
                            500 => "500 Internal Server Error",
                            503 => "503 Service Unavailable",
                            _ => "200 OK",
                        };
                        let response = format!(
                            "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status_text,
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

/// Start a mock backend serving fixed documents by path; other paths 404.
pub async fn start_document_backend(docs: Vec<(&'static str, &'static str)>) -> SocketAddr {
    let docs = Arc::new(docs);
    start_programmable_backend(move |path| {
        let docs = docs.clone();
        async move {
            match docs.iter().find(|(p, _)| *p == path) {
                Some((_, body)) => (200, body.to_string()),
                None => (404, "not found".to_string()),
            }
        }
    })
    .await
}

pub fn params(pairs: &[(&str, &str)]) -> Params {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn path_params(path: &Path) -> Params {
    params(&[("path", path.display().to_string().as_str())])
}

pub fn registries(memory: &MemoryBackend) -> (Arc<StorageRegistry>, Arc<CodecRegistry>) {
    (
        Arc::new(StorageRegistry::with_defaults(memory.clone())),
        Arc::new(CodecRegistry::with_defaults()),
    )
}

pub fn loader(memory: &MemoryBackend) -> ConfigLoader {
    let (storages, codecs) = registries(memory);
    ConfigLoader::new(storages, codecs)
}

/// Poll `check` until it holds or roughly two seconds pass.
pub async fn eventually<F: FnMut() -> bool>(mut check: F) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
