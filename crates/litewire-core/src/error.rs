//! Error types shared by every litewire crate.

use std::{
    error::Error,
    fmt::{self, Display, Formatter},
    io, result,
};

/// Wrapped result type for litewire operations.
pub type Result<T> = result::Result<T, ErrorKind>;

/// Top-level error type.
#[derive(Debug)]
pub enum ErrorKind {
    /// Error in decoding a packet.
    DecodingError(DecodingErrorKind),
    /// Wrapper around a std io::Error.
    IOError(io::Error),
    /// A payload does not fit into a single packet and cannot be fragmented.
    PayloadTooLarge {
        /// Size of the rejected payload.
        size: usize,
        /// Largest payload accepted for the chosen delivery method.
        max: usize,
    },
    /// Fragmenting the payload would need more parts than the header can express.
    TooManyFragments(usize),
    /// The peer is not in the connected state.
    NotConnected,
    /// The channel number is outside the configured channel count.
    InvalidChannel(u8),
    /// No peer is known under the given id or address.
    UnknownPeer,
}

impl Display for ErrorKind {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::DecodingError(e) => {
                write!(fmt, "Something went wrong with parsing the header. Reason: {:?}.", e)
            }
            ErrorKind::IOError(e) => write!(fmt, "An IO Error occurred. Reason: {:?}.", e),
            ErrorKind::PayloadTooLarge { size, max } => write!(
                fmt,
                "Unreliable or sequenced packet size {} exceeded maximum of {} bytes.",
                size, max
            ),
            ErrorKind::TooManyFragments(parts) => write!(
                fmt,
                "Data was split in {} fragments, which exceeds {}.",
                parts,
                u16::MAX
            ),
            ErrorKind::NotConnected => write!(fmt, "The peer is not connected."),
            ErrorKind::InvalidChannel(channel) => {
                write!(fmt, "Channel {} is outside the configured channel count.", channel)
            }
            ErrorKind::UnknownPeer => write!(fmt, "No such peer."),
        }
    }
}

impl Error for ErrorKind {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ErrorKind::IOError(e) => Some(e),
            _ => None,
        }
    }
}

/// Errors that could occur while parsing packet contents.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum DecodingErrorKind {
    /// The property bits do not name a known packet property.
    PacketProperty,
    /// The packet is shorter than its header requires.
    HeaderSize,
    /// The delivery method byte is invalid.
    DeliveryMethod,
    /// The connect request carries another protocol id.
    ProtocolId,
    /// The connect request address block has an unsupported length.
    AddressLength,
    /// A field holds a value outside its valid range.
    FieldRange,
}

impl Display for DecodingErrorKind {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        match *self {
            DecodingErrorKind::PacketProperty => write!(fmt, "Unknown packet property"),
            DecodingErrorKind::HeaderSize => write!(fmt, "Packet shorter than its header"),
            DecodingErrorKind::DeliveryMethod => write!(fmt, "Invalid delivery method"),
            DecodingErrorKind::ProtocolId => write!(fmt, "Protocol id mismatch"),
            DecodingErrorKind::AddressLength => write!(fmt, "Unsupported address length"),
            DecodingErrorKind::FieldRange => write!(fmt, "Field value out of range"),
        }
    }
}

impl From<io::Error> for ErrorKind {
    fn from(inner: io::Error) -> ErrorKind {
        ErrorKind::IOError(inner)
    }
}

impl From<DecodingErrorKind> for ErrorKind {
    fn from(inner: DecodingErrorKind) -> Self {
        ErrorKind::DecodingError(inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_converts() {
        let err: ErrorKind = io::Error::new(io::ErrorKind::Other, "boom").into();
        assert!(matches!(err, ErrorKind::IOError(_)));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_display_mentions_limits() {
        let err = ErrorKind::PayloadTooLarge { size: 2000, max: 1431 };
        let text = err.to_string();
        assert!(text.contains("2000"));
        assert!(text.contains("1431"));
    }
}
