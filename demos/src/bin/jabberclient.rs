use std::sync::Arc;

use clap::Parser;
use log::{info, warn};

use statio_executor::EventLoop;
use statio_net::Endpoint;
use statio_xmpp::XmppClient;

#[derive(Parser)]
#[command(name = "jabberclient")]
#[command(about = "A jabber echo bot", long_about = None)]
struct Cli {
    #[arg(long)]
    username: String,
    #[arg(long)]
    password: String,
    #[arg(long)]
    server: String,
    /// Direct-TLS XMPP port.
    #[arg(long, default_value_t = 5223)]
    port: u16,
    #[arg(long, default_value_t = format!("INFO"))]
    log_level: String,
}

fn tls_config() -> anyhow::Result<Arc<rustls::ClientConfig>> {
    let mut roots = rustls::RootCertStore::empty();
    let native = rustls_native_certs::load_native_certs();
    for error in &native.errors {
        warn!("root certificate store: {error}");
    }
    for cert in native.certs {
        if let Err(err) = roots.add(cert) {
            warn!("root certificate rejected: {err}");
        }
    }
    Ok(Arc::new(
        rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth(),
    ))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    statio_demos::init_logging(&cli.log_level)?;

    let mut event_loop = EventLoop::new();
    let scheduler = event_loop.scheduler();

    let client = XmppClient::new(&scheduler, tls_config()?, &cli.username, &cli.password)?;

    {
        let whoami = client.clone();
        client.connected().subscribe(move |_| {
            info!("client {} has connected", whoami.jid());
        });
    }
    client.presence_received().subscribe(|presence| {
        info!("presence for {}: {}", presence.from, presence.show);
    });
    {
        let echo = client.clone();
        client.message_received().subscribe(move |message| {
            info!("{}: {}", message.from, message.body);
            if let Err(err) = echo.send_message(&message.from, "hey, I am a jabber bot.") {
                warn!("echo failed: {err}");
            }
        });
    }
    client.disconnected().subscribe(|_| {
        info!("client has disconnected");
    });

    client.connect(&Endpoint::new(cli.server.clone(), cli.port))?;

    event_loop.run();
    Ok(())
}
