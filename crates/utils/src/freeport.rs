//! Opaque "ask the OS for an unused TCP port" primitive.

use std::net::{Ipv4Addr, SocketAddrV4, TcpListener};

/// Error returned when the OS refuses to hand back an ephemeral port.
#[derive(Debug, thiserror::Error)]
#[error("failed to allocate a free TCP port: {0}")]
pub struct FreePortError(#[from] std::io::Error);

/// Bind to `127.0.0.1:0`, read back the OS-assigned port, then drop the
/// listener. Best-effort: another process can grab the same port before the
/// caller gets to bind it. Callers that need a guaranteed-available port
/// must retry on bind failure; this helper does not attempt to close that
/// race itself.
pub fn allocate() -> Result<u16, FreePortError> {
    let listener = TcpListener::bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0))?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_a_nonzero_port() {
        let port = allocate().expect("allocation should succeed");
        assert_ne!(port, 0);
    }

    #[test]
    fn allocates_distinct_ports_across_calls() {
        // Not a hard guarantee (the OS may reuse a just-freed port), but in
        // practice back-to-back calls land on different ports.
        let a = allocate().unwrap();
        let b = allocate().unwrap();
        let c = allocate().unwrap();
        assert!(a != b || b != c, "expected at least some variation across three allocations");
    }
}
