use clap::Parser;
use log::info;

use statio_executor::EventLoop;
use statio_rest::{Request, Router};

#[derive(Parser)]
#[command(name = "webserver")]
#[command(about = "A small REST server with a static document root", long_about = None)]
struct Cli {
    #[arg(long, default_value_t = 9091)]
    port: u16,
    #[arg(long, default_value_t = format!("www"))]
    document_root: String,
    #[arg(long, default_value_t = format!("INFO"))]
    log_level: String,
}

fn entity_ids() -> Vec<i64> {
    vec![100, 101]
}

fn json_single(request: &Request, id: i64) -> Result<(), Box<dyn std::error::Error>> {
    request
        .connection()
        .begin("HTTP/1.1", 200, "OK")?
        .send_header("Content-Type", "application/json")?
        .send(format!("{{ \"Id\": {id} }}").as_bytes())?
        .end()?;
    Ok(())
}

fn json_collection(request: &Request, ids: &[i64]) -> Result<(), Box<dyn std::error::Error>> {
    let connection = request.connection();
    connection
        .begin("HTTP/1.1", 200, "OK")?
        .send_header("Content-Type", "application/json")?
        .send(b"[")?;
    for (index, id) in ids.iter().enumerate() {
        if index > 0 {
            connection.send(b",")?;
        }
        connection.send(format!("{{ \"Id\": {id} }}").as_bytes())?;
    }
    connection.send(b"]")?.end()?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    statio_demos::init_logging(&cli.log_level)?;

    let mut event_loop = EventLoop::new();
    let scheduler = event_loop.scheduler();

    let router = Router::new(&scheduler, Some(cli.document_root.clone().into()))?;

    router
        .configure("/entities")
        .get(|request| json_collection(request, &entity_ids()));

    router.configure("/entities/{entityId}").get(|request| {
        let id: i64 = request.param("entityId").unwrap_or_default().parse()?;
        json_single(request, id)
    });

    router.bind(cli.port)?;
    router.listen(128)?;
    info!("listening on port {}", cli.port);

    event_loop.run();
    Ok(())
}
