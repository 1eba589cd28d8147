//! A small client for the wire protocol.
//!
//! One request at a time per connection. Server-side failures come back
//! as [`AlderError::Protocol`] carrying the `Error` header's text.

use tokio::io::BufReader;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};

use crate::db::{DocId, Document};
use crate::error::{AlderError, Result};
use crate::net::frame::Frame;

#[derive(Debug)]
pub struct Client {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Client {
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read_half),
            writer: write_half,
        })
    }

    /// Store a document, returning its assigned id.
    pub async fn add(&mut self, doc: &Document) -> Result<DocId> {
        let mut request = Frame::new();
        request.set_header("Command", "ADD");
        request.body = serde_json::to_vec(doc)?;

        let response = self.call(request).await?;
        let id = response
            .header("Id")
            .ok_or_else(|| AlderError::protocol("response missing Id header"))?;
        id.parse()
            .map_err(|_| AlderError::protocol(format!("bad id in response `{id}`")))
    }

    /// Replace an existing document's body.
    pub async fn update(&mut self, doc_id: DocId, doc: &Document) -> Result<()> {
        let mut request = Frame::new();
        request.set_header("Command", "UPDATE");
        request.set_header("Id", doc_id.to_string());
        request.body = serde_json::to_vec(doc)?;

        self.call(request).await?;
        Ok(())
    }

    /// Fetch a document, or `None` if the id is unknown.
    pub async fn get(&mut self, doc_id: DocId) -> Result<Option<Document>> {
        let mut request = Frame::new();
        request.set_header("Command", "GET");
        request.set_header("Id", doc_id.to_string());

        let response = self.call(request).await?;
        if response.body.is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(&response.body)?))
    }

    /// Define (or redefine) an index from map-script source.
    pub async fn define(&mut self, index: &str, source: &str) -> Result<()> {
        let mut request = Frame::new();
        request.set_header("Command", "MAP");
        request.set_header("Name", index);
        request.body = source.as_bytes().to_vec();

        self.call(request).await?;
        Ok(())
    }

    /// Drop every document and index on the server.
    pub async fn truncate(&mut self) -> Result<()> {
        let mut request = Frame::new();
        request.set_header("Command", "TRUNCATE");

        self.call(request).await?;
        Ok(())
    }

    async fn call(&mut self, request: Frame) -> Result<Frame> {
        request.write_to(&mut self.writer).await?;

        let Some(response) = Frame::read_from(&mut self.reader).await? else {
            return Err(AlderError::protocol("server closed the connection"));
        };
        if let Some(message) = response.header("Error") {
            return Err(AlderError::protocol(message.to_string()));
        }
        Ok(response)
    }
}
