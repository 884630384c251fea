use std::{
    error::Error,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use servermgr::{
    cli::{Cli, Commands, parse_args, proxy_mappings},
    config::load_config,
    constants::DEFAULT_READY_TIMEOUT,
    manager::{Manager, Worker},
    nameservice::{NameServer, NameServerSettings, NameServerWorker},
    workers::{
        AppServer, AppServerSettings, Database, DatabaseSettings, ProxyServer, ProxySettings,
    },
};

const SUPERVISE_INTERVAL: Duration = Duration::from_millis(250);

fn main() -> Result<(), Box<dyn Error>> {
    let args = parse_args();
    init_logging(&args);

    let timeout = args.timeout;
    let ready_timeout = timeout.unwrap_or(DEFAULT_READY_TIMEOUT);

    match args.command {
        Commands::Up { config } => {
            let config = load_config(&config)?;
            let ready_timeout = timeout.unwrap_or(config.timings()?.ready_timeout);
            supervise(config.build_managers()?, ready_timeout)?;
        }
        Commands::Database {
            host,
            port,
            data_dir,
            init,
            pg_version,
            socket_dir,
            install_root,
        } => {
            let database = Database::new(DatabaseSettings {
                host,
                port,
                data_dir,
                initialize: init,
                version: pg_version,
                install_root,
                socket_dir,
                ..DatabaseSettings::default()
            })?;
            supervise(
                vec![Manager::new(Database::DEFAULT_NAME, boxed(database))],
                ready_timeout,
            )?;
        }
        Commands::Proxy {
            host,
            port,
            data_dir,
            fsmap,
            redirect,
            fcgi,
            http,
            program,
            config,
        } => {
            let proxy = ProxyServer::new(ProxySettings {
                host,
                port,
                base_dir: data_dir,
                http_root: None,
                program,
                mappings: proxy_mappings(&fsmap, &redirect, &fcgi, &http),
            })?;

            if config {
                println!("Generated config file:");
                print!("{}", proxy.render_config());
                return Ok(());
            }

            supervise(
                vec![Manager::new(ProxyServer::DEFAULT_NAME, boxed(proxy))],
                ready_timeout,
            )?;
        }
        Commands::App {
            host,
            port,
            settings,
            app_dir,
            python,
            name,
        } => {
            let app = AppServer::new(AppServerSettings {
                host,
                port,
                settings,
                app_dir,
                python,
                manage_script: None,
                process_name: name,
                max_children: 2,
                max_spare: 2,
            });
            supervise(
                vec![Manager::new(AppServer::DEFAULT_NAME, boxed(app))],
                ready_timeout,
            )?;
        }
        Commands::Nameserver {
            host,
            port,
            data_dir,
        } => {
            let worker = NameServerWorker::new(NameServerSettings {
                host,
                port,
                storage_dir: data_dir,
                program: None,
                process_name: Some("servermgr nameserver".into()),
            });
            supervise(
                vec![Manager::new(NameServerWorker::DEFAULT_NAME, boxed(worker))],
                ready_timeout,
            )?;
        }
        Commands::ServeNames {
            host,
            port,
            storage_dir,
        } => {
            let mut server = NameServer::bind(&host, port, &storage_dir)?;
            server.serve()?;
        }
    }

    Ok(())
}

fn init_logging(args: &Cli) {
    let filter = if let Some(level) = args.log_level {
        EnvFilter::new(level.as_str())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .try_init();
}

fn boxed<W: Worker + 'static>(worker: W) -> Box<dyn Worker> {
    Box::new(worker)
}

/// Starts `managers` in order, then blocks until Ctrl-C or until a worker
/// exits. Workers are always stopped in reverse start order.
fn supervise(
    mut managers: Vec<Manager<Box<dyn Worker>>>,
    ready_timeout: Duration,
) -> Result<(), Box<dyn Error>> {
    let shutdown = register_signal_handler()?;
    let mut started = Vec::with_capacity(managers.len());

    for mut manager in managers.drain(..) {
        info!("Starting {}...", manager.name());
        if let Err(err) = manager.start(true, ready_timeout) {
            error!("Failed to start '{}': {err}", manager.name());
            stop_all(started);
            return Err(err.into());
        }
        info!(
            "{} ready (PID {})",
            manager.name(),
            manager.pid().map(|pid| pid.to_string()).unwrap_or_default()
        );
        started.push(manager);
    }

    let mut exited = None;
    while !shutdown.load(Ordering::SeqCst) {
        if let Some(manager) = started.iter_mut().find_map(|m| (!m.is_running()).then_some(m)) {
            exited = Some(manager.name().to_string());
            break;
        }
        thread::sleep(SUPERVISE_INTERVAL);
    }

    if exited.is_none() {
        info!("Interrupted, shutting down");
    }
    stop_all(started);

    match exited {
        Some(name) => Err(format!("worker '{name}' exited unexpectedly").into()),
        None => Ok(()),
    }
}

fn stop_all(mut managers: Vec<Manager<Box<dyn Worker>>>) {
    while let Some(mut manager) = managers.pop() {
        manager.stop(true);
    }
}

fn register_signal_handler() -> Result<Arc<AtomicBool>, Box<dyn Error>> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);

    ctrlc::set_handler(move || {
        if flag.swap(true, Ordering::SeqCst) {
            warn!("Shutdown already in progress");
        }
    })?;

    Ok(shutdown)
}
