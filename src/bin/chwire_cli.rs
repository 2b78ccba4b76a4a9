use std::{
    error::Error,
    io::{self, Write},
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use chwire::{CancelToken, Command, Compression, Config, Endpoint, Query, Session, prompt, render_block};
use clap::Parser;
use log::info;

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Server address, `host[:port]`
    #[arg(long, default_value = "localhost:9000")]
    host: Endpoint,
    /// Extra addresses tried when the first one is unreachable
    #[arg(long)]
    fallback: Vec<Endpoint>,
    #[arg(long, short, default_value = "default")]
    user: String,
    #[arg(long, default_value = "")]
    password: String,
    #[arg(long, short, default_value = "default")]
    database: String,
    /// Compress data blocks with LZ4
    #[arg(long)]
    compress: bool,
    /// Per-query timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,
}

impl Cli {
    fn config(&self) -> Config {
        let mut config = Config::new(self.host.clone())
            .with_credentials(&self.user, &self.password)
            .with_database(&self.database)
            .with_client_name("chwire-cli");
        for fallback in &self.fallback {
            config = config.with_fallback(fallback.clone());
        }
        if self.compress {
            config = config.with_compression(Compression::Lz4);
        }
        config
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let config = cli.config();
    let mut session = Session::connect(&config)?;
    println!(
        "connected to {} {}",
        session.server_info().name,
        session.server_info().version()
    );

    // Ctrl-C cancels whatever query is running.
    let current = Arc::new(Mutex::new(CancelToken::new()));
    let handler = Arc::clone(&current);
    ctrlc::set_handler(move || {
        handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();
    })?;

    loop {
        let cmd = match prompt(io::stdin().lock(), io::stdout().lock()) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("{}", e);
                continue;
            }
        };

        if session.is_closed() && cmd != Command::Exit {
            info!("reconnecting");
            session = match Session::connect(&config) {
                Ok(session) => session,
                Err(e) => {
                    eprintln!("connect error: {e}");
                    continue;
                }
            };
        }

        let sql = match cmd {
            Command::Exit => {
                session.close();
                break;
            }
            Command::Ping => {
                match session.ping() {
                    Ok(()) => println!("pong"),
                    Err(e) => eprintln!("ping error: {e}"),
                }
                continue;
            }
            Command::Statement(sql) if sql.is_empty() => continue,
            Command::Statement(sql) => sql,
        };

        let token = CancelToken::new();
        *current.lock().unwrap_or_else(PoisonError::into_inner) = token.clone();
        let mut query = Query::new(sql).with_cancel(token);
        if let Some(seconds) = cli.timeout {
            query = query.with_timeout(Duration::from_secs(seconds));
        }

        if let Err(e) = run(&mut session, query) {
            eprintln!("query error: {e}");
        }
    }

    Ok(())
}

fn run(session: &mut Session, query: Query) -> chwire::Result<()> {
    let mut stream = session.select(query)?;
    let mut stdout = io::stdout().lock();
    while stream.next()? {
        if let Some(block) = stream.block() {
            render_block(block, &mut stdout)?;
        }
    }
    stdout.flush()?;

    let progress = stream.progress();
    println!(
        "{} rows read, {} bytes, {:.3}s",
        progress.rows,
        progress.bytes,
        Duration::from_nanos(progress.elapsed_ns).as_secs_f64()
    );
    Ok(())
}
