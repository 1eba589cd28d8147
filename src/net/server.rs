//! The TCP server.
//!
//! One task per connection; each connection handles frames one at a
//! time. Store calls are synchronous, so they run on the blocking pool
//! rather than stalling the reactor. A failed request produces a frame
//! with an `Error` header and leaves the connection open.

use std::sync::Arc;

use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};

use crate::db::{Database, DocId, Document};
use crate::error::{AlderError, Result};
use crate::net::frame::Frame;

/// Serves the wire protocol over a [`Database`].
#[derive(Debug)]
pub struct Server {
    db: Arc<Database>,
}

impl Server {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Accept connections until the listener fails.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        loop {
            let (stream, peer) = listener.accept().await?;
            log::debug!("accepted connection from {peer}");
            let db = self.db.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(db, stream).await {
                    log::debug!("connection from {peer} ended: {e}");
                }
            });
        }
    }
}

async fn handle_connection(db: Arc<Database>, stream: TcpStream) -> Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    loop {
        let request = match Frame::read_from(&mut reader).await {
            Ok(Some(frame)) => frame,
            Ok(None) => return Ok(()),
            Err(AlderError::Protocol(message)) => {
                error_frame(&message).write_to(&mut write_half).await?;
                continue;
            }
            Err(e) => return Err(e),
        };

        let db = db.clone();
        let response = tokio::task::spawn_blocking(move || respond(&db, &request))
            .await
            .map_err(|e| AlderError::internal(format!("request task failed: {e}")))?;
        response.write_to(&mut write_half).await?;
    }
}

fn respond(db: &Database, request: &Frame) -> Frame {
    match execute(db, request) {
        Ok(frame) => frame,
        Err(e) => error_frame(&e.to_string()),
    }
}

fn execute(db: &Database, request: &Frame) -> Result<Frame> {
    let command = request
        .header("Command")
        .ok_or_else(|| AlderError::protocol("missing Command header"))?;

    match command {
        "ADD" => {
            let doc_id = db.add(&parse_body(request)?)?;
            let mut response = Frame::new();
            response.set_header("Id", doc_id.to_string());
            Ok(response)
        }
        "UPDATE" => {
            db.update(require_id(request)?, &parse_body(request)?)?;
            Ok(Frame::new())
        }
        "GET" => {
            let mut response = Frame::new();
            if let Some(doc) = db.get(require_id(request)?)? {
                response.set_header("Content-Type", "text/json");
                response.body = serde_json::to_vec(&doc)?;
            }
            Ok(response)
        }
        "MAP" => {
            let index = request
                .header("Name")
                .ok_or_else(|| AlderError::protocol("MAP requires a Name header"))?;
            let source = std::str::from_utf8(&request.body)
                .map_err(|_| AlderError::invalid_argument("map source is not valid UTF-8"))?;
            db.define(index, source)?;
            Ok(Frame::new())
        }
        "TRUNCATE" => {
            db.truncate()?;
            Ok(Frame::new())
        }
        other => Err(AlderError::protocol(format!("unknown command `{other}`"))),
    }
}

fn parse_body(request: &Frame) -> Result<Document> {
    serde_json::from_slice(&request.body)
        .map_err(|e| AlderError::invalid_argument(format!("request body is not JSON: {e}")))
}

fn require_id(request: &Frame) -> Result<DocId> {
    let value = request
        .header("Id")
        .ok_or_else(|| AlderError::protocol("missing Id header"))?;
    value
        .parse()
        .map_err(|_| AlderError::protocol(format!("bad document id `{value}`")))
}

/// Error responses are single-line by construction; multi-line messages
/// (script syntax errors, for one) are flattened.
fn error_frame(message: &str) -> Frame {
    let mut frame = Frame::new();
    frame.set_header("Error", message.replace('\n', " "));
    frame
}
