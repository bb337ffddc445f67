//! In-process stand-in for a Juju controller, for tests.
//!
//! The client half is a real [`RpcClient`] over an in-memory duplex pipe;
//! the test drives the server half request by request or hands it a
//! handler.
#![allow(clippy::unwrap_used, clippy::expect_used)]

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use crate::rpc::RpcClient;

/// Server half of a fake controller connection.
pub struct FakeController {
    requests: mpsc::UnboundedReceiver<Value>,
    replies: Option<mpsc::UnboundedSender<Value>>,
}

/// Connect an [`RpcClient`] to a fresh fake controller.
pub async fn connect() -> (RpcClient, FakeController) {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let accept = tokio::spawn(tokio_tungstenite::accept_async(server_io));
    let client = RpcClient::handshake("ws://controller.test/api", client_io)
        .await
        .expect("client handshake");
    let socket = accept.await.unwrap().expect("server handshake");

    let (mut sink, mut stream) = socket.split();
    let (request_tx, requests) = mpsc::unbounded_channel();
    let (replies, mut reply_rx) = mpsc::unbounded_channel::<Value>();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                incoming = stream.next() => match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let _ = request_tx.send(serde_json::from_str::<Value>(&text).unwrap());
                    }
                    Some(Ok(_)) => {}
                    _ => break,
                },
                outgoing = reply_rx.recv() => match outgoing {
                    Some(frame) => {
                        if sink.send(Message::Text(frame.to_string())).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                },
            }
        }
    });

    (
        client,
        FakeController {
            requests,
            replies: Some(replies),
        },
    )
}

impl FakeController {
    /// Next request frame sent by the client.
    pub async fn request(&mut self) -> Value {
        self.requests.recv().await.expect("client sent a request")
    }

    /// Answer `request` with a successful `response`.
    pub fn reply(&self, request: &Value, response: Value) {
        self.send(json!({
            "request-id": request["request-id"],
            "response": response,
        }));
    }

    /// Answer `request` with an API error.
    pub fn fail(&self, request: &Value, code: &str, message: &str) {
        self.send(json!({
            "request-id": request["request-id"],
            "error": message,
            "error-code": code,
        }));
    }

    /// Close the connection from the controller side.
    pub fn hang_up(&mut self) {
        self.replies = None;
    }

    /// Answer every request with `handler(facade, request, params)` until
    /// the client goes away.
    pub fn serve<H>(mut self, handler: H) -> JoinHandle<()>
    where
        H: Fn(&str, &str, &Value) -> Result<Value, (String, String)> + Send + 'static,
    {
        tokio::spawn(async move {
            while let Some(request) = self.requests.recv().await {
                let facade = request["type"].as_str().unwrap_or_default().to_owned();
                let method = request["request"].as_str().unwrap_or_default().to_owned();
                match handler(&facade, &method, &request["params"]) {
                    Ok(response) => self.reply(&request, response),
                    Err((code, message)) => self.fail(&request, &code, &message),
                }
            }
        })
    }

    fn send(&self, frame: Value) {
        if let Some(replies) = &self.replies {
            let _ = replies.send(frame);
        }
    }
}
