use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};

use tracing::debug;

use crate::error::{AviaryError, Result};
use crate::frame::{encode_frame, FrameReader};
use crate::message::{self, Request, Response};

const READ_BUFFER_SIZE: usize = 256;

/// `AviaryClient` holds one persistent framed connection to an
/// [`AviaryServer`] and executes requests over it synchronously.
///
/// [`AviaryServer`]: ./struct.AviaryServer.html
pub struct AviaryClient {
    stream: TcpStream,
}

impl AviaryClient {
    /// creates a client and establishes a socket connection to the server at the given `addr`
    ///
    /// # Errors
    /// returns a transport error if the connection could not be established
    pub fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let stream = TcpStream::connect(addr)?;
        Ok(AviaryClient { stream })
    }

    /// Sends one framed request and blocks until the framed response
    /// arrives. A response with `success: false` is still `Ok` here; only
    /// transport and decode failures are errors.
    ///
    /// # Errors
    /// returns a transport error if the socket fails or the server closes
    /// the connection mid-response, or a decode error for a bad payload
    pub fn execute(&mut self, request: &Request) -> Result<Response> {
        let payload = message::encode(request)?;
        self.stream.write_all(&encode_frame(&payload))?;
        self.stream.flush()?;
        debug!("request sent: {:?}", request);

        let mut reader = FrameReader::new();
        let mut buf = [0_u8; READ_BUFFER_SIZE];
        loop {
            let count = self.stream.read(&mut buf)?;
            if count == 0 {
                return Err(AviaryError::Transport(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "server closed the connection mid-response",
                )));
            }
            if let (_, Some(body)) = reader.push(&buf, count) {
                let response: Response = message::decode(&body)?;
                debug!("response received: {:?}", response);
                return Ok(response);
            }
        }
    }
}
