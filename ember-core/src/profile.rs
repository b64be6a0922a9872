use std::sync::OnceLock;

static PUFFIN_SERVER: OnceLock<puffin_http::Server> = OnceLock::new();

/// Start the puffin profiling server and enable scope collection.
///
/// The server lives for the rest of the process.
pub fn initialize() -> Result<(), anyhow::Error> {
    if PUFFIN_SERVER.get().is_some() {
        return Ok(());
    }

    let server_addr = format!("127.0.0.1:{}", puffin_http::DEFAULT_PORT);
    let server = puffin_http::Server::new(&server_addr)?;
    let _ = PUFFIN_SERVER.set(server);

    profiling::puffin::set_scopes_on(true);
    Ok(())
}
