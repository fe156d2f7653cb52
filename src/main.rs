//! Outpost - a headless dashboard for remote game-server sessions
//!
//! This is the binary entry point. All logic lives in the library crates;
//! this file wires the session, stores, and monitor together and runs a
//! line-oriented headless loop (JSON events out, commands in).

use std::collections::HashMap;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use clap::Parser;
use serde_json::json;
use tracing::warn;

use outpost_app::{
    ChatLog, ConnectionMonitor, DeviceController, DeviceStore, NoticeFeed, ServerStore, Settings,
};
use outpost_core::prelude::*;
use outpost_core::{EventKind, PushEvent};
use outpost_session::{RestClient, Session};

/// Outpost - a headless dashboard for remote game-server sessions
#[derive(Parser, Debug)]
#[command(name = "outpost")]
#[command(about = "Headless dashboard for remote game-server sessions", long_about = None)]
struct Args {
    /// Path to config.toml (defaults to the user config directory)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Override the REST API base URL
    #[arg(long)]
    api_url: Option<String>,

    /// Override the bridge WebSocket URL
    #[arg(long)]
    socket_url: Option<String>,

    /// Select this server id at startup instead of auto-selection
    #[arg(long)]
    server: Option<String>,
}

type ChatLogs = Arc<Mutex<HashMap<String, ChatLog>>>;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    outpost_core::logging::init()?;

    let args = Args::parse();
    let mut settings = match &args.config {
        Some(path) => Settings::load_from(path)?,
        None => Settings::load()?,
    };
    if let Some(api_url) = args.api_url {
        settings.api_url = api_url;
    }
    if let Some(socket_url) = args.socket_url {
        settings.socket_url = socket_url;
    }

    run(settings, args.server).await?;
    Ok(())
}

async fn run(settings: Settings, select: Option<String>) -> Result<()> {
    let rest = RestClient::new(&settings.api_url)?;
    let session = Session::new(&settings.socket_url);

    let servers = Arc::new(Mutex::new(ServerStore::new()));
    let devices = DeviceStore::new();
    let chat_logs: ChatLogs = Arc::new(Mutex::new(HashMap::new()));
    let notices = Arc::new(Mutex::new(NoticeFeed::new()));

    if settings.auto_connect {
        session.connect().await?;
    } else {
        warn!("auto_connect disabled; running in REST-only mode");
    }

    // Reconnect-driven refresh lives here and only here.
    let monitor = {
        let rest = rest.clone();
        let servers = Arc::clone(&servers);
        let devices = devices.clone();
        ConnectionMonitor::spawn(session.connection_watch(), move || {
            let rest = rest.clone();
            let servers = Arc::clone(&servers);
            let devices = devices.clone();
            async move {
                resync(&rest, &servers, &devices).await;
            }
        })
    };

    wire_subscriptions(&session, &servers, &devices, &chat_logs, &notices);

    if let Some(server_id) = select {
        let mut store = servers.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(err) = store.select(&server_id) {
            // The list may not be loaded yet; the first resync will bring
            // it in and the user can `/use` again.
            warn!("startup selection failed: {err}");
        }
    }

    if let Some(active) = active_id(&servers) {
        load_chat_history(&session, &chat_logs, &settings.display_name, &active).await;
    }

    emit(json!({ "type": "ready", "state": session.state().label() }));
    command_loop(&settings, session.clone(), rest, servers, devices, chat_logs, notices).await;

    monitor.stop();
    session.disconnect().await;
    Ok(())
}

/// Reload the target list and target-scoped snapshots. Passive background
/// failures are logged, never surfaced.
async fn resync(rest: &RestClient, servers: &Arc<Mutex<ServerStore>>, devices: &DeviceStore) {
    match rest.list_servers().await {
        Ok(list) => {
            let mut store = servers.lock().unwrap_or_else(|e| e.into_inner());
            store.replace_all(list);
        }
        Err(err) => warn!("resync: server list refresh failed: {err}"),
    }

    let active = {
        let store = servers.lock().unwrap_or_else(|e| e.into_inner());
        store.active_id().map(str::to_string)
    };
    if let Some(server_id) = active {
        match rest.list_devices(&server_id).await {
            Ok(list) => devices.replace_all(list),
            Err(err) => warn!("resync: device refresh failed: {err}"),
        }
    }
}

/// Register every push-event consumer. Each `subscribe` here is released
/// by `Session::disconnect` on the way out.
fn wire_subscriptions(
    session: &Session,
    servers: &Arc<Mutex<ServerStore>>,
    devices: &DeviceStore,
    chat_logs: &ChatLogs,
    notices: &Arc<Mutex<NoticeFeed>>,
) {
    let active_cell = {
        let store = servers.lock().unwrap_or_else(|e| e.into_inner());
        store.active_cell()
    };

    for kind in [EventKind::ServerConnected, EventKind::ServerDisconnected] {
        let servers = Arc::clone(servers);
        session.subscribe(kind, move |event| {
            let (server_id, connected) = match event {
                PushEvent::ServerConnected(e) => (e.server_id.clone(), true),
                PushEvent::ServerDisconnected(e) => (e.server_id.clone(), false),
                _ => return,
            };
            let mut store = servers.lock().unwrap_or_else(|e| e.into_inner());
            store.set_connected(&server_id, connected);
            emit(json!({ "type": "server", "id": server_id, "connected": connected }));
        });
    }

    {
        let servers = Arc::clone(servers);
        session.subscribe(EventKind::ServerPaired, move |event| {
            if let PushEvent::ServerPaired(e) = event {
                let mut store = servers.lock().unwrap_or_else(|e| e.into_inner());
                store.add_paired(e);
            }
        });
    }

    {
        // Scope chat pushes to the active target through the shared cell,
        // not a captured copy: the selection may change after subscribe.
        let chat_logs = Arc::clone(chat_logs);
        let active_cell = active_cell.clone();
        session.subscribe(EventKind::TeamMessage, move |event| {
            let PushEvent::TeamMessage(msg) = event else {
                return;
            };
            if !active_cell.is_active(&msg.server_id) {
                return;
            }
            let mut logs = chat_logs.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(log) = logs.get_mut(&msg.server_id) {
                if log.push_live(msg) == outpost_app::PushOutcome::Appended {
                    emit(json!({
                        "type": "chat",
                        "sender": msg.name,
                        "body": msg.message,
                        "time": msg.time_ms(),
                    }));
                }
            }
        });
    }

    {
        let devices = devices.clone();
        let active_cell = active_cell.clone();
        session.subscribe(EventKind::EntityChanged, move |event| {
            if let PushEvent::EntityChanged(e) = event {
                if active_cell.is_active(&e.server_id) {
                    devices.apply_entity_changed(e);
                    emit(json!({ "type": "device", "entityId": e.entity_id, "value": e.value }));
                }
            }
        });
    }

    for kind in [
        EventKind::Player,
        EventKind::ProxyStatus,
        EventKind::ProxyNodeChanged,
    ] {
        let notices = Arc::clone(notices);
        session.subscribe(kind, move |event| {
            let mut feed = notices.lock().unwrap_or_else(|e| e.into_inner());
            if feed.observe(event).is_some() {
                emit(json!({ "type": "notice", "text": event.summary() }));
            }
        });
    }
}

/// Fetch and merge the history page for `server_id` if none is in flight.
async fn load_chat_history(
    session: &Session,
    chat_logs: &ChatLogs,
    display_name: &str,
    server_id: &str,
) {
    let begun = {
        let mut logs = chat_logs.lock().unwrap_or_else(|e| e.into_inner());
        logs.entry(server_id.to_string())
            .or_insert_with(|| ChatLog::new(server_id, display_name))
            .begin_history_load()
    };
    if !begun {
        return;
    }

    match session.team_info(server_id).await {
        Ok(info) => {
            let mut logs = chat_logs.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(log) = logs.get_mut(server_id) {
                log.complete_history_load(&info.messages);
                emit(json!({ "type": "history", "count": log.len() }));
            }
        }
        Err(err) => {
            let mut logs = chat_logs.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(log) = logs.get_mut(server_id) {
                log.fail_history_load();
            }
            warn!("chat history load failed for {server_id}: {err}");
        }
    }
}

fn active_id(servers: &Arc<Mutex<ServerStore>>) -> Option<String> {
    let store = servers.lock().unwrap_or_else(|e| e.into_inner());
    store.active_id().map(str::to_string)
}

/// Read commands from stdin until EOF or `/quit`.
async fn command_loop(
    settings: &Settings,
    session: Session,
    rest: RestClient,
    servers: Arc<Mutex<ServerStore>>,
    devices: DeviceStore,
    chat_logs: ChatLogs,
    notices: Arc<Mutex<NoticeFeed>>,
) {
    let controller = DeviceController::new(session.clone(), devices.clone());
    let (line_tx, mut line_rx) = tokio::sync::mpsc::channel::<String>(16);

    // Stdin is blocking; feed it in from a dedicated thread.
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if line_tx.blocking_send(line).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    while let Some(line) = line_rx.recv().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" {
            break;
        }

        match line.split_once(' ') {
            Some(("/use", server_id)) => {
                let result = {
                    let mut store = servers.lock().unwrap_or_else(|e| e.into_inner());
                    store.select(server_id)
                };
                match result {
                    Ok(()) => {
                        resync(&rest, &servers, &devices).await;
                        load_chat_history(&session, &chat_logs, &settings.display_name, server_id)
                            .await;
                    }
                    Err(err) => report(&notices, "select server", &err),
                }
            }
            Some(("/toggle", entity)) => match entity.parse::<u32>() {
                Ok(entity_id) => {
                    if let Some(server_id) = active_id(&servers) {
                        match controller.toggle(&server_id, entity_id).await {
                            Ok(value) => emit(json!({
                                "type": "device",
                                "entityId": entity_id,
                                "value": value,
                                "confirmed": true,
                            })),
                            Err(err) => report(&notices, "toggle device", &err),
                        }
                    }
                }
                Err(_) => report(&notices, "toggle device", &Error::protocol("not an entity id")),
            },
            Some(("/refresh", entity)) => match entity.parse::<u32>() {
                Ok(entity_id) => {
                    if let Some(server_id) = active_id(&servers) {
                        match controller.refresh(&server_id, entity_id).await {
                            Ok(value) => emit(json!({
                                "type": "device",
                                "entityId": entity_id,
                                "value": value,
                            })),
                            Err(err) => report(&notices, "refresh device", &err),
                        }
                    }
                }
                Err(_) => report(&notices, "refresh device", &Error::protocol("not an entity id")),
            },
            _ if line == "/servers" => {
                let store = servers.lock().unwrap_or_else(|e| e.into_inner());
                for server in store.servers() {
                    emit(json!({
                        "type": "server",
                        "id": server.id,
                        "name": server.name,
                        "connected": server.connected,
                        "active": store.active_id() == Some(server.id.as_str()),
                    }));
                }
            }
            _ if line == "/devices" => {
                for device in devices.all() {
                    emit(json!({
                        "type": "device",
                        "entityId": device.entity_id,
                        "name": device.name,
                        "value": device.value,
                    }));
                }
            }
            _ if line == "/time" => {
                if let Some(server_id) = active_id(&servers) {
                    match session.game_time(&server_id).await {
                        Ok(time) => emit(json!({ "type": "time", "time": time.time })),
                        Err(err) => report(&notices, "fetch time", &err),
                    }
                }
            }
            // Anything else is an outgoing chat message.
            _ => {
                let Some(server_id) = active_id(&servers) else {
                    report(&notices, "send message", &Error::unknown_server("none selected"));
                    continue;
                };
                let fragments = {
                    let mut logs = chat_logs.lock().unwrap_or_else(|e| e.into_inner());
                    logs.entry(server_id.clone())
                        .or_insert_with(|| {
                            ChatLog::new(server_id.as_str(), settings.display_name.as_str())
                        })
                        .send(line)
                };
                for fragment in fragments {
                    if let Err(err) = session.send_team_message(&server_id, &fragment).await {
                        report(&notices, "send message", &err);
                        break;
                    }
                }
            }
        }
    }
}

/// Surface a failed user-initiated action: a dismissable notice plus a
/// headless output line carrying the underlying message.
fn report(notices: &Arc<Mutex<NoticeFeed>>, action: &str, err: &Error) {
    let mut feed = notices.lock().unwrap_or_else(|e| e.into_inner());
    feed.report_failure(action, err);
    emit(json!({ "type": "error", "action": action, "message": err.to_string() }));
}

/// One JSON object per line on stdout.
fn emit(value: serde_json::Value) {
    println!("{value}");
}
