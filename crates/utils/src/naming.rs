//! Instance name synthesis: `<prefix>-<port>-<creationEpochMillis>`.

use crate::clock::now_millis;

/// Build a unique instance name. Uniqueness follows from the port (only one
/// instance can ever be bound to a given port at a time within one pool) and
/// the creation timestamp.
pub fn instance_name(prefix: &str, port: u16) -> String {
    format!("{prefix}-{port}-{}", now_millis())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_prefix_port_and_timestamp() {
        let name = instance_name("vk-pool", 8080);
        let mut parts = name.rsplitn(3, '-');
        let millis: i64 = parts.next().unwrap().parse().unwrap();
        let port: u16 = parts.next().unwrap().parse().unwrap();
        let prefix = parts.next().unwrap();
        assert_eq!(prefix, "vk-pool");
        assert_eq!(port, 8080);
        assert!(millis > 0);
    }
}
