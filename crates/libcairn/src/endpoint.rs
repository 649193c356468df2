//! `opc.tcp://` endpoint URL handling.

use cairn_core::status::StatusCode;

/// A parsed `opc.tcp://host:port/path` endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointUrl {
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl EndpointUrl {
    pub fn parse(url: &str) -> Result<EndpointUrl, StatusCode> {
        let rest = url
            .strip_prefix("opc.tcp://")
            .ok_or(StatusCode::BAD_TCP_ENDPOINT_URL_INVALID)?;
        let (authority, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, ""),
        };
        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse()
                    .map_err(|_| StatusCode::BAD_TCP_ENDPOINT_URL_INVALID)?;
                (host, port)
            }
            // 4840 is the IANA-registered OPC UA port
            None => (authority, 4840),
        };
        if host.is_empty() {
            return Err(StatusCode::BAD_TCP_ENDPOINT_URL_INVALID);
        }
        Ok(EndpointUrl {
            host: host.to_string(),
            port,
            path: path.to_string(),
        })
    }

    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_url() {
        let url = EndpointUrl::parse("opc.tcp://plc.example.com:4841/cairn").unwrap();
        assert_eq!(url.host, "plc.example.com");
        assert_eq!(url.port, 4841);
        assert_eq!(url.path, "/cairn");
        assert_eq!(url.authority(), "plc.example.com:4841");
    }

    #[test]
    fn default_port_and_empty_path() {
        let url = EndpointUrl::parse("opc.tcp://localhost").unwrap();
        assert_eq!(url.port, 4840);
        assert_eq!(url.path, "");
    }

    #[test]
    fn rejects_other_schemes_and_garbage() {
        assert!(EndpointUrl::parse("http://localhost:80").is_err());
        assert!(EndpointUrl::parse("opc.tcp://").is_err());
        assert!(EndpointUrl::parse("opc.tcp://host:notaport/x").is_err());
    }
}
