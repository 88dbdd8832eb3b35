//! A minimal plain-HTTP transport for completion backends.
//!
//! It speaks just enough HTTP/1.0 to `POST` a JSON body and read the response
//! until the server closes the connection. Backends that require TLS need a
//! different [`CompletionTransport`].

use std::{
    io::{Read, Write},
    net::{TcpStream, ToSocketAddrs},
    time::Duration,
};

use aurion_errors::transport::{Error, Result};

use crate::complete::remote::CompletionTransport;

/// Sends completion requests to an `http://` endpoint.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HttpTransport {
    endpoint: String,
    api_key:  Option<String>,
}

/// The parts of an endpoint URL.
#[derive(Clone, Debug, Eq, PartialEq)]
struct Endpoint<'a> {
    host: &'a str,
    port: u16,
    path: &'a str,
}

impl HttpTransport {
    #[must_use]
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key,
        }
    }

    fn endpoint(&self) -> Result<Endpoint<'_>> {
        let invalid = || Error::InvalidEndpoint(self.endpoint.clone());
        let rest = self.endpoint.strip_prefix("http://").ok_or_else(invalid)?;
        let (authority, path) = rest.find('/').map_or((rest, "/"), |at| rest.split_at(at));
        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => (host, port.parse().map_err(|_| invalid())?),
            None => (authority, 80),
        };
        if host.is_empty() {
            Err(invalid())?;
        }
        Ok(Endpoint { host, port, path })
    }

    fn connect(&self, endpoint: &Endpoint<'_>, timeout: Duration) -> Result<TcpStream> {
        let failed = |message: String| Error::Connection {
            endpoint: self.endpoint.clone(),
            message,
        };
        let addresses = (endpoint.host, endpoint.port)
            .to_socket_addrs()
            .map_err(|e| failed(e.to_string()))?;

        let mut last = failed("no addresses to connect to".to_string());
        for address in addresses {
            match TcpStream::connect_timeout(&address, timeout) {
                Ok(stream) => {
                    stream
                        .set_read_timeout(Some(timeout))
                        .and_then(|()| stream.set_write_timeout(Some(timeout)))
                        .map_err(|e| failed(e.to_string()))?;
                    return Ok(stream);
                }
                Err(e) => last = failed(e.to_string()),
            }
        }
        Err(last)
    }
}

impl CompletionTransport for HttpTransport {
    fn send(&self, body: &str, timeout: Duration) -> Result<String> {
        let endpoint = self.endpoint()?;
        let mut stream = self.connect(&endpoint, timeout)?;

        let mut request = format!(
            "POST {} HTTP/1.0\r\nHost: {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\n",
            endpoint.path,
            endpoint.host,
            body.len()
        );
        if let Some(key) = &self.api_key {
            request.push_str(&format!("Authorization: Bearer {key}\r\n"));
        }
        request.push_str("\r\n");
        request.push_str(body);

        let io = |e: std::io::Error| Error::Connection {
            endpoint: self.endpoint.clone(),
            message:  e.to_string(),
        };
        stream.write_all(request.as_bytes()).map_err(io)?;
        let mut response = Vec::new();
        stream.read_to_end(&mut response).map_err(io)?;

        parse_response(&String::from_utf8_lossy(&response))
    }
}

/// Splits a raw HTTP response into its status and body, returning the body
/// of a successful response.
fn parse_response(response: &str) -> Result<String> {
    let malformed = || Error::MalformedResponse("not an HTTP response".to_string());
    let (head, body) = response.split_once("\r\n\r\n").ok_or_else(malformed)?;
    let status = head
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(malformed)?;

    if !(200..300).contains(&status) {
        Err(Error::Status(status))?;
    }
    Ok(body.to_string())
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use aurion_errors::transport::Error;

    use crate::complete::{
        http::{parse_response, Endpoint, HttpTransport},
        remote::CompletionTransport,
    };

    #[test]
    fn parses_endpoints() -> anyhow::Result<()> {
        let transport = HttpTransport::new("http://localhost:8080/v1/complete", None);
        assert_eq!(transport.endpoint()?, Endpoint {
            host: "localhost",
            port: 8080,
            path: "/v1/complete",
        });

        let transport = HttpTransport::new("http://ai.internal", None);
        assert_eq!(transport.endpoint()?.port, 80);
        assert_eq!(transport.endpoint()?.path, "/");

        for bad in ["https://ai.internal", "http://:80/", "http://host:port/"] {
            let transport = HttpTransport::new(bad, None);
            assert_eq!(transport.endpoint(), Err(Error::InvalidEndpoint(bad.to_string())));
        }

        Ok(())
    }

    #[test]
    fn reads_status_and_body() {
        assert_eq!(
            parse_response("HTTP/1.1 200 OK\r\nContent-Type: application/json\r\n\r\n{}"),
            Ok("{}".to_string())
        );
        assert_eq!(
            parse_response("HTTP/1.1 503 Service Unavailable\r\n\r\n"),
            Err(Error::Status(503))
        );
        assert!(matches!(parse_response("garbage"), Err(Error::MalformedResponse(_))));
    }

    #[test]
    fn unreachable_endpoints_fail_to_connect() {
        // Nothing listens on the discard port of the loopback interface.
        let transport = HttpTransport::new("http://127.0.0.1:9/complete", None);
        let result = transport.send("{}", Duration::from_millis(200));
        assert!(matches!(result, Err(Error::Connection { .. })));
    }
}
