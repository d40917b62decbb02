//! Transport adapter.
//!
//! Wraps an open [`Connection`] behind the two hooks the MQTT layer is written
//! against: `send(buf) -> bytes` and `recv(buf) -> bytes`. A receive that
//! times out without data returns `Ok(0)`. There is no retry logic here;
//! everything else passes straight through.

use super::{Close, Connection, Error, Read, Write};

/// Owner of the socket underlying an MQTT session.
///
/// A transport starts out closed. [`Transport::attach`] installs a freshly
/// connected stream (sockets are never reused across connections) and
/// [`Transport::close`] tears it down again.
#[derive(Debug)]
pub struct Transport<C: Connection> {
    connection: Option<C>,
}

impl<C: Connection> Default for Transport<C> {
    fn default() -> Self {
        Self { connection: None }
    }
}

impl<C: Connection> Transport<C> {
    /// Creates a closed transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a connected stream, closing any previous one first.
    pub fn attach(&mut self, connection: C) {
        self.close();
        self.connection = Some(connection);
    }

    /// Returns `true` while a stream is attached.
    pub fn is_open(&self) -> bool {
        self.connection.is_some()
    }

    /// Sends the whole buffer, returning the number of bytes written.
    pub fn send(&mut self, buf: &[u8]) -> Result<usize, Error> {
        let connection = self.connection.as_mut().ok_or(Error::NotOpen)?;

        let mut written = 0;
        while written < buf.len() {
            match connection.write(&buf[written..]) {
                Ok(0) => return Err(Error::WriteError),
                Ok(n) => written += n,
                Err(e) => return Err(e.into()),
            }
        }
        connection.flush().map_err(|e| -> Error { e.into() })?;

        Ok(written)
    }

    /// Receives up to `buf.len()` bytes.
    ///
    /// A receive timeout is reported as `Ok(0)`, the same as "nothing
    /// available yet".
    pub fn recv(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        let connection = self.connection.as_mut().ok_or(Error::NotOpen)?;

        let result: Result<usize, Error> = connection.read(buf).map_err(Into::into);
        match result {
            Ok(n) => Ok(n),
            Err(Error::Timeout) => Ok(0),
            Err(e) => Err(e),
        }
    }

    /// Closes the stream if one is attached. Close errors are logged only.
    pub fn close(&mut self) {
        if let Some(connection) = self.connection.take() {
            if let Err(e) = connection.close() {
                let e: Error = e.into();
                warn!("socket close error: {}", e);
            }
        }
    }
}
