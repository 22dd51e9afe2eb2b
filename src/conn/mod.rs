//! Traits to perform in-order, serial, byte-wise I/O with the debugger.

mod impls;

/// A trait to perform in-order, serial, byte-wise I/O.
///
/// Automatically implemented for [`TcpStream`](std::net::TcpStream) and
/// [`UnixStream`](std::os::unix::net::UnixStream) (on unix systems).
pub trait Connection {
    /// Transport-specific error type.
    type Error;

    /// Write a single byte.
    fn write(&mut self, byte: u8) -> Result<(), Self::Error>;

    /// Write the entire buffer, blocking until complete.
    ///
    /// The default implementation calls `self.write()` on each byte; override
    /// it when a more efficient bulk write exists.
    fn write_all(&mut self, buf: &[u8]) -> Result<(), Self::Error> {
        for b in buf {
            self.write(*b)?;
        }
        Ok(())
    }

    /// Flush this connection, ensuring all buffered contents reach their
    /// destination.
    fn flush(&mut self) -> Result<(), Self::Error>;

    /// Called once when a client session begins, before any packets have been
    /// exchanged.
    ///
    /// The remote serial protocol is extremely chatty with small packets, so
    /// the `TcpStream` implementation uses this hook to set `TCP_NODELAY`.
    fn on_session_start(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Extends [`Connection`] with blocking `read` and non-blocking `peek`.
///
/// `peek` is what lets a long-running replay notice the client's out-of-band
/// interrupt byte without blocking the replay loop.
pub trait ConnectionExt: Connection {
    /// Read a single byte, blocking until one is available.
    fn read(&mut self) -> Result<u8, Self::Error>;

    /// Check for an available byte without removing it from the queue. MUST
    /// be non-blocking, returning `None` if no byte is available.
    fn peek(&mut self) -> Result<Option<u8>, Self::Error>;
}
