use std::{error::Error, path::PathBuf, time::Duration};

use bercon::{
    client::{Client, Event, Events},
    config::ClientConfig,
    error::RconError,
    server::Server,
};
use clap::{Parser, Subcommand};
use log::{error, info, LevelFilter, Metadata, Record};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    signal, time,
};

struct SimpleLogger;

impl log::Log for SimpleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            println!("{} - {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

#[derive(Parser)]
#[command(name = "bercon", about = "BattlEye RCon client")]
struct Cli {
    /// More output; repeat for debug and trace logging.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Log in to a server and run commands. Without commands, reads them from stdin.
    Connect {
        host: String,
        #[arg(short, long)]
        port: Option<u16>,
        #[arg(long, env = "BERCON_PASSWORD")]
        password: String,
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Seconds to wait for the login and for each reply.
        #[arg(long, default_value_t = 10)]
        timeout: u64,
        commands: Vec<String>,
    },
    /// Run a loopback responder that echoes commands back.
    Serve {
        #[arg(long, default_value = "127.0.0.1:2302")]
        bind: String,
        #[arg(long, env = "BERCON_PASSWORD")]
        password: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    let _ = log::set_logger(&SimpleLogger).map(|()| log::set_max_level(level));

    match cli.command {
        Command::Connect {
            host,
            port,
            password,
            config,
            timeout,
            commands,
        } => {
            let config = match config {
                Some(path) => ClientConfig::load(path)?,
                None => ClientConfig::default(),
            };
            let port = port.unwrap_or(config.default_port);
            let timeout = Duration::from_secs(timeout);
            run_client(config, &host, port, &password, timeout, commands).await?;
        }
        Command::Serve { bind, password } => {
            let server = Server::bind(&bind, &password).await?;
            let handle = server.start(|command| format!("echo: {}", command));
            info!("serving on {}", handle.local_addr()?);
            signal::ctrl_c().await?;
        }
    }

    info!("bye");
    Ok(())
}

async fn run_client(
    config: ClientConfig,
    host: &str,
    port: u16,
    password: &str,
    timeout: Duration,
    commands: Vec<String>,
) -> Result<(), RconError> {
    let (client, mut events) = Client::new(config);
    client.connect(password, host, port).await?;
    time::timeout(timeout, wait_for_login(&mut events)).await??;

    if commands.is_empty() {
        interactive(&client, &mut events).await?;
    } else {
        for command in &commands {
            let sequence = client.send_command(command).await?;
            time::timeout(timeout, wait_for_reply(&mut events, sequence)).await??;
        }
    }

    client.disconnect();
    Ok(())
}

async fn wait_for_login(events: &mut Events) -> Result<(), RconError> {
    while let Some(event) = events.recv().await {
        match event {
            Event::Connected => return Ok(()),
            Event::Error(e) => return Err(e),
            other => print_event(other),
        }
    }
    Err(RconError::EngineStopped)
}

async fn wait_for_reply(events: &mut Events, sequence: u8) -> Result<(), RconError> {
    while let Some(event) = events.recv().await {
        match event {
            Event::CommandResponse { body, sequence: s } if s == sequence => {
                println!("{}", body);
                return Ok(());
            }
            Event::Error(e) => return Err(e),
            Event::Disconnected => return Err(RconError::NotConnected),
            other => print_event(other),
        }
    }
    Err(RconError::EngineStopped)
}

async fn interactive(client: &Client, events: &mut Events) -> Result<(), RconError> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) if line.trim().is_empty() => {}
                Some(line) => {
                    let sequence = client.send_command(line.trim()).await?;
                    info!("sent #{}", sequence);
                }
                None => return Ok(()),
            },
            event = events.recv() => match event {
                Some(Event::Error(e)) => error!("{}", e),
                Some(Event::Disconnected) | None => return Ok(()),
                Some(other) => print_event(other),
            },
            _ = signal::ctrl_c() => return Ok(()),
        }
    }
}

fn print_event(event: Event) {
    match event {
        Event::Message(text) => println!("[MSG] {}", text),
        Event::CommandResponse { body, sequence } => println!("[CMD #{}] {}", sequence, body),
        Event::Connected => println!("[CONNECTED]"),
        Event::Disconnected => println!("[DISCONNECTED]"),
        Event::Error(e) => println!("[ERR] {}", e),
    }
}
