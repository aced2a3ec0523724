//! Datagram transport used by network time clients

/// Non-blocking datagram socket
///
/// None of these methods may block: `poll_incoming` returns immediately
/// whether or not a packet is queued.
pub trait DatagramTransport {
    /// Transport specific failure
    type Error;

    /// Bind the local port. Called once; failure leaves the caller inert.
    fn begin(&mut self, local_port: u16) -> Result<(), Self::Error>;

    /// Queue one datagram for `host:port`.
    fn send_datagram(&mut self, host: &str, port: u16, payload: &[u8]) -> Result<(), Self::Error>;

    /// Copy the next queued datagram into `buf`.
    ///
    /// Returns the datagram length, or `None` when nothing is queued.
    /// Datagrams longer than `buf` are truncated.
    fn poll_incoming(&mut self, buf: &mut [u8]) -> Option<usize>;
}
