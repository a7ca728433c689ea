//! taskflow serve / control

use crate::config::ListenConfig;
use crate::error::Result;
use crate::{api, control};

use super::Session;

fn runtime() -> Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?)
}

fn bind_addr(defaults: &ListenConfig, host: Option<String>, port: Option<u16>) -> String {
    let listen = ListenConfig {
        host: host.unwrap_or_else(|| defaults.host.clone()),
        port: port.unwrap_or(defaults.port),
    };
    listen.addr()
}

pub fn run_rest(session: &Session, host: Option<String>, port: Option<u16>) -> Result<()> {
    let config = session.config().clone();
    let addr = bind_addr(&config.server, host, port);
    if !session.output.quiet && !session.output.json {
        eprintln!("Serving REST API on http://{addr}");
    }
    runtime()?.block_on(api::serve(config, &addr))
}

pub fn run_control(
    session: &Session,
    stdio: bool,
    host: Option<String>,
    port: Option<u16>,
) -> Result<()> {
    let config = session.config().clone();
    if stdio {
        // stdout carries the protocol
        return runtime()?.block_on(control::serve_stdio(config));
    }

    let addr = bind_addr(&config.control, host, port);
    if !session.output.quiet && !session.output.json {
        eprintln!("Control channel listening on {addr}");
    }
    runtime()?.block_on(control::serve_tcp(config, &addr))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_addr_prefers_flags() {
        let defaults = ListenConfig::default();
        assert_eq!(bind_addr(&defaults, None, None), "127.0.0.1:8000");
        assert_eq!(
            bind_addr(&defaults, Some("0.0.0.0".into()), Some(9000)),
            "0.0.0.0:9000"
        );
        assert_eq!(bind_addr(&defaults, None, Some(1234)), "127.0.0.1:1234");
    }
}
