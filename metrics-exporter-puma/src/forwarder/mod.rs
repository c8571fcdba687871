use std::{
    net::{SocketAddr, ToSocketAddrs as _},
    time::Duration,
};

#[cfg(target_os = "linux")]
use std::path::PathBuf;

pub mod sync;

#[derive(Clone, Debug)]
pub(crate) enum RemoteAddr {
    Udp(Vec<SocketAddr>),

    #[cfg(target_os = "linux")]
    Unixgram(PathBuf),

    #[cfg(target_os = "linux")]
    Unix(PathBuf),
}

impl RemoteAddr {
    /// Returns the transport ID for the remote address.
    ///
    /// This is a simple acronym related to the transport that will be used for the remote address, such as `udp` for
    /// UDP, and so on.
    pub const fn transport_id(&self) -> &'static str {
        match self {
            RemoteAddr::Udp(_) => "udp",
            #[cfg(target_os = "linux")]
            RemoteAddr::Unix(_) => "uds-stream",
            #[cfg(target_os = "linux")]
            RemoteAddr::Unixgram(_) => "uds",
        }
    }
}

impl<'a> TryFrom<&'a str> for RemoteAddr {
    type Error = String;

    fn try_from(addr: &'a str) -> Result<Self, Self::Error> {
        let addr = match addr.split_once("://") {
            Some(("udp", host_port)) => host_port,

            #[cfg(target_os = "linux")]
            Some(("unix", path)) => return Ok(RemoteAddr::Unix(PathBuf::from(path))),
            #[cfg(target_os = "linux")]
            Some(("unixgram", path)) => return Ok(RemoteAddr::Unixgram(PathBuf::from(path))),

            Some((scheme, _)) => {
                return Err(format!(
                    "invalid scheme '{scheme}' (expected 'udp', 'unix' or 'unixgram')"
                ))
            }
            None => addr,
        };

        match addr.to_socket_addrs() {
            Ok(addrs) => {
                let addrs = addrs.collect::<Vec<_>>();
                if addrs.is_empty() {
                    Err(format!("'{addr}' did not resolve to any addresses"))
                } else {
                    Ok(RemoteAddr::Udp(addrs))
                }
            }
            Err(e) => Err(e.to_string()),
        }
    }
}

/// Forwarder configuration.
#[derive(Clone, Debug)]
pub struct ForwarderConfiguration {
    pub remote_addr: RemoteAddr,
    pub write_timeout: Duration,
}

impl ForwarderConfiguration {
    /// Returns `true` if the remote address requires a length prefix to be sent before each payload.
    pub fn requires_length_prefix(&self) -> bool {
        match self.remote_addr {
            RemoteAddr::Udp(_) => false,
            #[cfg(target_os = "linux")]
            RemoteAddr::Unix(_) => true,
            #[cfg(target_os = "linux")]
            RemoteAddr::Unixgram(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::RemoteAddr;

    #[test]
    fn parses_udp_addresses() {
        let addr = RemoteAddr::try_from("127.0.0.1:8125").unwrap();
        assert_eq!(addr.transport_id(), "udp");

        let addr = RemoteAddr::try_from("udp://127.0.0.1:8125").unwrap();
        assert!(matches!(addr, RemoteAddr::Udp(addrs) if addrs.len() == 1 && addrs[0].port() == 8125));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn parses_unix_addresses() {
        let addr = RemoteAddr::try_from("unix:///var/run/datadog/dsd.socket").unwrap();
        assert_eq!(addr.transport_id(), "uds-stream");

        let addr = RemoteAddr::try_from("unixgram:///var/run/datadog/dsd.socket").unwrap();
        assert_eq!(addr.transport_id(), "uds");
    }

    #[test]
    fn rejects_invalid_addresses() {
        assert!(RemoteAddr::try_from("tcp://127.0.0.1:8125").is_err());
        assert!(RemoteAddr::try_from("missing-port").is_err());
    }
}
