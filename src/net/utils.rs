//! Raw socket setup that `std::net` does not expose: listen backlog,
//! `SO_REUSEADDR` before bind, and non-blocking connect.

use crate::error::{Error, Result};

use libc::{AF_INET, in_addr, sockaddr, sockaddr_in, socklen_t};
use std::io;
use std::mem;
use std::net::{SocketAddr, SocketAddrV4, TcpListener, TcpStream};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

#[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
const SOCK_FLAGS: libc::c_int = libc::SOCK_STREAM | libc::SOCK_CLOEXEC;
#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
const SOCK_FLAGS: libc::c_int = libc::SOCK_STREAM;

/// Converts an IPv4 socket address into a `sockaddr_in`.
pub(crate) fn to_sockaddr_in(address: SocketAddrV4) -> sockaddr_in {
    let mut raw: sockaddr_in = unsafe { mem::zeroed() };

    #[cfg(any(
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd",
        target_os = "openbsd",
        target_os = "netbsd"
    ))]
    {
        raw.sin_len = mem::size_of::<sockaddr_in>() as u8;
    }

    raw.sin_family = AF_INET as libc::sa_family_t;
    raw.sin_port = address.port().to_be();
    raw.sin_addr = in_addr {
        s_addr: u32::from(*address.ip()).to_be(),
    };
    raw
}

/// Extracts the IPv4 address out of a `std` socket address.
pub(crate) fn expect_v4(address: SocketAddr) -> io::Result<SocketAddrV4> {
    match address {
        SocketAddr::V4(v4) => Ok(v4),
        SocketAddr::V6(v6) => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("expected an IPv4 address, got {v6}"),
        )),
    }
}

fn new_socket() -> Result<OwnedFd> {
    let fd = unsafe { libc::socket(AF_INET, SOCK_FLAGS, libc::IPPROTO_TCP) };
    if fd < 0 {
        return Err(Error::Socket(io::Error::last_os_error()));
    }

    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

fn set_reuse_address(fd: RawFd) -> io::Result<()> {
    let one: libc::c_int = 1;
    let res = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            &one as *const libc::c_int as *const libc::c_void,
            mem::size_of::<libc::c_int>() as socklen_t,
        )
    };

    if res < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Creates a non-blocking listening socket bound to `address`.
///
/// # Arguments
/// * `address` - Local IPv4 address and port; port 0 picks an ephemeral port
/// * `backlog` - Length of the pending-connection queue passed to `listen(2)`
///
/// # Errors
/// [`Error::Socket`] if the socket cannot be created or configured,
/// [`Error::Bind`] if `bind(2)` fails and [`Error::Listen`] if `listen(2)` fails.
pub(crate) fn bind_listener(address: SocketAddrV4, backlog: i32) -> Result<TcpListener> {
    let socket = new_socket()?;
    let fd = socket.as_raw_fd();

    set_reuse_address(fd).map_err(Error::Socket)?;

    let raw = to_sockaddr_in(address);
    let res = unsafe {
        libc::bind(
            fd,
            &raw as *const sockaddr_in as *const sockaddr,
            mem::size_of::<sockaddr_in>() as socklen_t,
        )
    };
    if res < 0 {
        return Err(Error::Bind {
            addr: address,
            source: io::Error::last_os_error(),
        });
    }

    if unsafe { libc::listen(fd, backlog) } < 0 {
        return Err(Error::Listen {
            addr: address,
            source: io::Error::last_os_error(),
        });
    }

    let listener = TcpListener::from(socket);
    listener.set_nonblocking(true).map_err(Error::Socket)?;

    Ok(listener)
}

/// Starts a non-blocking connect to `address`.
///
/// Returns the stream and whether the connection completed immediately. When
/// it did not, completion is signalled by writability and the outcome read
/// from `SO_ERROR`.
///
/// # Errors
/// [`Error::Connect`] if the connect attempt fails right away.
pub(crate) fn connect_nonblocking(address: SocketAddrV4) -> Result<(TcpStream, bool)> {
    let stream = TcpStream::from(new_socket()?);
    stream.set_nonblocking(true).map_err(Error::Socket)?;

    let raw = to_sockaddr_in(address);
    let res = unsafe {
        libc::connect(
            stream.as_raw_fd(),
            &raw as *const sockaddr_in as *const sockaddr,
            mem::size_of::<sockaddr_in>() as socklen_t,
        )
    };

    if res == 0 {
        return Ok((stream, true));
    }

    let err = io::Error::last_os_error();
    match err.raw_os_error() {
        Some(libc::EINPROGRESS) | Some(libc::EINTR) => Ok((stream, false)),
        _ => Err(Error::Connect {
            addr: address,
            source: err,
        }),
    }
}
