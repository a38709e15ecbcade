/// Builds a Ship-downstream URL, ported from `services/ship/url_builder.py`:
/// an address containing a colon already carries its own port (docker-host /
/// podman-host / kubernetes mode), one without needs `container_port`
/// appended (docker internal-network mode). Kept as its own small copy
/// rather than shared with `harbor-resolver`'s identical helper — see
/// DESIGN.md.
pub fn ship_url(address: &str, container_port: u16, path: &str) -> String {
    if address.contains(':') {
        format!("http://{address}/{path}")
    } else {
        format!("http://{address}:{container_port}/{path}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_the_configured_port_when_the_address_has_none() {
        assert_eq!(ship_url("172.18.0.2", 8123, "shell/exec"), "http://172.18.0.2:8123/shell/exec");
    }

    #[test]
    fn leaves_an_address_with_its_own_port_alone() {
        assert_eq!(ship_url("127.0.0.1:39314", 8123, "upload"), "http://127.0.0.1:39314/upload");
    }
}
