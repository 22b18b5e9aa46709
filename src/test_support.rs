//! Local HTTP services for exercising the blocking clients in tests.
use std::net::SocketAddr;
use std::sync::mpsc;
use std::thread;

use axum::Router;

/// Serve `app` on an ephemeral loopback port and return its base URL.
///
/// The server runs on its own thread and runtime so callers stay outside
/// any async context, as the blocking clients require.
pub(crate) fn serve(app: Router) -> String {
    let (tx, rx) = mpsc::channel::<SocketAddr>();
    thread::spawn(move || {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async move {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            tx.send(listener.local_addr().unwrap()).unwrap();
            axum::serve(listener, app).await.unwrap();
        });
    });
    let addr = rx.recv().unwrap();
    format!("http://{addr}")
}
