use std::{error::Error, fmt, io};

/// Fatal session failures. Per-probe trouble (lost or corrupted replies,
/// failed sends) is counted in the session statistics instead.
#[derive(Debug)]
pub enum ProbeError {
    /// The transport could not be created or configured.
    Socket {
        op: &'static str,
        source: io::Error,
    },
    /// The session configuration is unusable.
    Config(String),
    /// A traceroute hop exhausted its retry budget; the path is presumed
    /// dead beyond the hops already recorded.
    RetriesExhausted { hops: usize },
    /// A hostname did not resolve to an IPv4 address.
    Resolve { host: String },
}

impl ProbeError {
    pub(crate) fn socket(op: &'static str, source: io::Error) -> ProbeError {
        ProbeError::Socket { op, source }
    }
}

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeError::Socket { op, source } => {
                write!(f, "{op}: {source}")?;
                if source.kind() == io::ErrorKind::PermissionDenied {
                    write!(
                        f,
                        "\nPermission issues on Linux may be fixed by allowing ICMP for all users:\n \
                         sysctl -w net.ipv4.ping_group_range=\"0 2147483647\"\n\
                         Raw sockets additionally need root or CAP_NET_RAW."
                    )?;
                }
                Ok(())
            }
            ProbeError::Config(reason) => write!(f, "invalid configuration: {reason}"),
            ProbeError::RetriesExhausted { hops } => {
                write!(f, "max retries exceeded after {hops} recorded hops")
            }
            ProbeError::Resolve { host } => {
                write!(f, "could not resolve {host} to an IPv4 address")
            }
        }
    }
}

impl Error for ProbeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ProbeError::Socket { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_error_keeps_its_source() {
        let error = ProbeError::socket("open raw icmp socket", io::Error::from(io::ErrorKind::Other));
        assert!(error.source().is_some());
    }

    #[test]
    fn permission_denied_carries_remediation() {
        let error = ProbeError::socket(
            "open dgram icmp socket",
            io::Error::from(io::ErrorKind::PermissionDenied),
        );
        let message = format!("{error}");
        assert!(message.contains("open dgram icmp socket"));
        assert!(message.contains("ping_group_range"));
    }

    #[test]
    fn other_socket_errors_stay_plain() {
        let error = ProbeError::socket("open raw icmp socket", io::Error::from(io::ErrorKind::Other));
        assert!(!format!("{error}").contains("ping_group_range"));
    }

    #[test]
    fn retries_exhausted_names_the_hop_count() {
        let message = format!("{}", ProbeError::RetriesExhausted { hops: 3 });
        assert_eq!("max retries exceeded after 3 recorded hops", message);
        assert!(ProbeError::RetriesExhausted { hops: 3 }.source().is_none());
    }

    #[test]
    fn resolve_error_names_the_host() {
        let message = format!(
            "{}",
            ProbeError::Resolve {
                host: "nowhere.example".to_string()
            }
        );
        assert!(message.contains("nowhere.example"));
    }
}
