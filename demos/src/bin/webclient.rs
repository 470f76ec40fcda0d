use clap::Parser;
use log::{debug, error, info};

use statio_executor::EventLoop;
use statio_http::HttpClient;
use statio_net::Endpoint;

#[derive(Parser)]
#[command(name = "webclient")]
#[command(about = "Fetch a path from a web server and log the response", long_about = None)]
struct Cli {
    #[arg(long, default_value_t = format!("localhost"))]
    host: String,
    #[arg(long, default_value_t = 80)]
    port: u16,
    #[arg(long, default_value_t = format!("/"))]
    path: String,
    #[arg(long, default_value_t = format!("INFO"))]
    log_level: String,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    statio_demos::init_logging(&cli.log_level)?;

    let mut event_loop = EventLoop::new();
    let scheduler = event_loop.scheduler();

    let client = HttpClient::new(&scheduler)?;

    client.response_started().subscribe(|started| {
        info!(
            "response started ({}, {}, {})",
            started.protocol, started.code, started.description
        );
    });
    client.header_received().subscribe(|header| {
        debug!("header received ({}, {})", header.key, header.value);
    });
    client.content_received().subscribe(|content| {
        info!("content received ({} bytes)", content.len());
        print!("{}", String::from_utf8_lossy(content));
    });
    client.response_ended().subscribe(|_| {
        info!("response ended");
    });
    client.disconnected().subscribe(|_| {
        info!("disconnected");
    });

    {
        let requester = client.clone();
        let host = cli.host.clone();
        let path = cli.path.clone();
        client.connected().subscribe(move |_| {
            let result = requester
                .begin("GET", &path, "HTTP/1.1")
                .and_then(|c| c.send_header("Host", &host))
                .and_then(|c| c.send_header("Connection", "close"))
                .and_then(|c| c.send(b""))
                .and_then(|c| c.end());
            if let Err(err) = result {
                error!("request failed: {err}");
            }
        });
    }

    client.connect(&Endpoint::new(cli.host.clone(), cli.port))?;

    event_loop.run();
    info!("utilization was {:.2}%", event_loop.utilization() * 100.0);
    Ok(())
}
