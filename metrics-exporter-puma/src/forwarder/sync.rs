use std::{
    io::{self, Write as _},
    net::{Ipv4Addr, UdpSocket},
};

#[cfg(target_os = "linux")]
use std::os::unix::net::{UnixDatagram, UnixStream};

use tracing::{debug, error};

use crate::{telemetry::TelemetryUpdate, writer::PayloadWriter};

use super::{ForwarderConfiguration, RemoteAddr};

enum Client {
    Udp(UdpSocket),

    #[cfg(target_os = "linux")]
    Unixgram(UnixDatagram),

    #[cfg(target_os = "linux")]
    Unix(UnixStream),
}

impl Client {
    fn from_forwarder_config(config: &ForwarderConfiguration) -> io::Result<Self> {
        match &config.remote_addr {
            RemoteAddr::Udp(addrs) => {
                UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).and_then(|socket| {
                    socket.connect(&addrs[..])?;
                    socket.set_write_timeout(Some(config.write_timeout))?;
                    Ok(Client::Udp(socket))
                })
            }

            #[cfg(target_os = "linux")]
            RemoteAddr::Unixgram(path) => UnixDatagram::unbound().and_then(|socket| {
                socket.connect(path)?;
                socket.set_write_timeout(Some(config.write_timeout))?;
                Ok(Client::Unixgram(socket))
            }),

            #[cfg(target_os = "linux")]
            RemoteAddr::Unix(path) => UnixStream::connect(path).and_then(|socket| {
                socket.set_write_timeout(Some(config.write_timeout))?;
                Ok(Client::Unix(socket))
            }),
        }
    }

    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Client::Udp(socket) => socket.send(buf),

            #[cfg(target_os = "linux")]
            Client::Unixgram(socket) => socket.send(buf),

            #[cfg(target_os = "linux")]
            Client::Unix(socket) => socket.write_all(buf).map(|()| buf.len()),
        }
    }
}

enum ClientState {
    // Intermediate state during send attempts.
    Inconsistent,

    // Forwarder is currently disconnected.
    Disconnected(ForwarderConfiguration),

    // Forwarder is connected and ready to send metrics.
    Ready(ForwarderConfiguration, Client),
}

impl ClientState {
    fn try_send(&mut self, payload: &[u8]) -> io::Result<usize> {
        loop {
            let old_state = std::mem::replace(self, ClientState::Inconsistent);
            match old_state {
                ClientState::Inconsistent => unreachable!("transitioned _from_ inconsistent state"),
                ClientState::Disconnected(config) => match Client::from_forwarder_config(&config) {
                    Ok(client) => *self = ClientState::Ready(config, client),
                    Err(e) => {
                        *self = ClientState::Disconnected(config);
                        return Err(e);
                    }
                },
                ClientState::Ready(config, mut client) => {
                    let result = client.send(payload);
                    if result.is_ok() {
                        *self = ClientState::Ready(config, client);
                    } else {
                        *self = ClientState::Disconnected(config);
                    }

                    return result;
                }
            };
        }
    }
}

/// Sends payloads to the remote DogStatsD server.
///
/// The connection is established lazily on the first send, and dropped after any failed send so that the next send
/// reconnects.
pub struct Forwarder {
    client_state: ClientState,
}

impl Forwarder {
    /// Create a new synchronous `Forwarder`.
    pub fn new(config: ForwarderConfiguration) -> Self {
        Forwarder { client_state: ClientState::Disconnected(config) }
    }

    /// Sends every payload held by `writer`, draining it.
    ///
    /// A failed payload does not stop the remaining payloads from being attempted.
    ///
    /// # Errors
    ///
    /// If any payload could not be sent, the first error encountered is returned.
    pub fn send_payloads(
        &mut self,
        writer: &mut PayloadWriter,
        telemetry: &mut TelemetryUpdate,
    ) -> io::Result<()> {
        let mut payloads = writer.payloads();
        let num_payloads = payloads.len();
        let mut first_error = None;

        while let Some(payload) = payloads.next_payload() {
            match self.client_state.try_send(payload) {
                Ok(_) => telemetry.track_packet_send_succeeded(payload.len()),
                Err(e) => {
                    error!(error = %e, "Failed to send payload.");
                    telemetry.track_packet_send_failed(payload.len());
                    first_error.get_or_insert(e);
                }
            }
        }

        debug!(num_payloads, failed = first_error.is_some(), "Finished sending payloads.");

        first_error.map_or(Ok(()), Err)
    }
}
