use std::io;
use std::net;

pub type NetworkResult<T> = Result<T, NetworkError>;

/// `Wait` signals that an operation could not complete yet (not enough
/// bytes, or the socket would block) and should be retried once more data
/// is available. Everything else is fatal for the connection it occured on.
#[derive(Debug, Eq, PartialEq)]
pub enum NetworkError {
    Wait,
    Fatal(ErrorType),
}

#[derive(Debug, Eq, PartialEq)]
pub enum ErrorType {
    Serialization,
    AddrParse,
    Io(io::ErrorKind),
}

impl From<io::Error> for NetworkError {
    #[inline]
    fn from(io_error: io::Error) -> Self {
        match io_error.kind() {
            io::ErrorKind::WouldBlock => NetworkError::Wait,
            kind => NetworkError::Fatal(ErrorType::Io(kind)),
        }
    }
}

impl From<net::AddrParseError> for NetworkError {
    #[inline]
    fn from(_: net::AddrParseError) -> Self {
        NetworkError::Fatal(ErrorType::AddrParse)
    }
}

pub trait ErrorUtils {
    fn has_failed(&self) -> bool;
}

impl<T> ErrorUtils for NetworkResult<T> {
    fn has_failed(&self) -> bool {
        match self {
            Ok(_) => false,
            Err(NetworkError::Wait) => false,
            _ => true,
        }
    }
}
