use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};
use url::Url;

use crate::channel::WebSocketChannel;
use crate::config::{ViewerConfig, default_assets};
use crate::registry::RegistryClient;
use crate::runtime::{RunExit, Runtime, ViewerCommand};
use crate::scene::SceneSynchronizer;
use crate::session::{self, RouteInfo, Session, SessionController, Teardown};
use crate::terminal::cli::{self, Command, SessionArgs, ViewArgs};
use crate::terminal::error::CliError;

pub async fn run(cli: cli::Cli) -> Result<(), CliError> {
    let config = ViewerConfig::load(cli.config.as_deref())?
        .with_app_server(cli.app_server.as_deref())?
        .with_stream_server(cli.stream_server.as_deref())?;
    debug!(
        target: "stage_viewer::runtime",
        app_server = %config.app_server,
        stream_server = %config.stream_server,
        "configuration resolved"
    );

    match cli.command {
        Command::Apps => {
            let registry = RegistryClient::new(&config)?;
            for app in registry.list_applications().await? {
                println!("{}\t{}\t{}", app.id, app.name, app.description);
            }
            Ok(())
        }
        Command::Versions { app } => {
            let registry = RegistryClient::new(&config)?;
            for version in registry.list_versions(&app).await? {
                println!("{version}");
            }
            Ok(())
        }
        Command::Profiles { app, version } => {
            let registry = RegistryClient::new(&config)?;
            for profile in registry.list_profiles(&app, &version).await? {
                println!("{}\t{}\t{}", profile.id, profile.name, profile.description);
            }
            Ok(())
        }
        Command::Sessions => {
            let registry = RegistryClient::new(&config)?;
            for item in registry.list_sessions().await? {
                let hosts: Vec<&str> = item.routes.iter().map(|group| group.host.as_str()).collect();
                println!("{}\t{}", item.id, hosts.join(","));
            }
            Ok(())
        }
        Command::Start(args) => {
            let mut controller = controller_for(&config)?;
            let session = start_session(&mut controller, &args).await?;
            print_session(session);
            Ok(())
        }
        Command::End { session_id } => {
            let registry = RegistryClient::new(&config)?;
            match session::teardown(&registry, &session_id).await? {
                Teardown::Destroyed => println!("session {session_id} destroyed"),
                Teardown::Skipped(status) => {
                    println!("session {session_id} not confirmed by registry ({status}); left as is")
                }
            }
            Ok(())
        }
        Command::View(args) => view(config, args).await,
    }
}

fn controller_for(config: &ViewerConfig) -> Result<SessionController, CliError> {
    let registry = RegistryClient::new(config)?;
    Ok(SessionController::new(
        registry,
        config.session_poll_interval,
    ))
}

async fn start_session<'a>(
    controller: &'a mut SessionController,
    args: &SessionArgs,
) -> Result<&'a Session, CliError> {
    controller
        .create_session(&args.app, &args.version, &args.profile)
        .await?;
    Ok(controller.wait_until_ready().await?)
}

fn print_session(session: &Session) {
    println!("session: {}", session.id.as_deref().unwrap_or("-"));
    println!("status: {}", session.status);
    if let Some(routes) = &session.route_info {
        println!("host: {}", routes.host_group);
        println!("signaling: {}", routes.signaling);
        println!("media: {}", routes.media);
    }
}

fn channel_url_for(routes: &RouteInfo) -> Result<Url, CliError> {
    let raw = format!("ws://{}:{}/", routes.signaling.host, routes.signaling.port);
    Url::parse(&raw).map_err(|err| CliError::InvalidArgument(format!("signaling route {raw}: {err}")))
}

async fn view(mut config: ViewerConfig, args: ViewArgs) -> Result<(), CliError> {
    if let Some(mode) = args.mode {
        config.mode = mode;
    }
    if let Some(source) = args.source {
        if source != config.source {
            config.source = source;
            config.assets = default_assets(source);
        }
    }

    let mut controller = controller_for(&config)?;
    let session = start_session(&mut controller, &args.session).await?;
    print_session(session);

    let channel_url = match args.channel_url.as_deref() {
        Some(raw) => Url::parse(raw)
            .map_err(|err| CliError::InvalidArgument(format!("channel url {raw}: {err}")))?,
        None => {
            let routes = session
                .route_info
                .as_ref()
                .ok_or_else(|| CliError::InvalidArgument("session has no routes".into()))?;
            channel_url_for(routes)?
        }
    };
    info!(target: "stage_viewer::runtime", url = %channel_url, "opening message channel");
    let (channel, mut events) = WebSocketChannel::connect(&channel_url).await?;

    let mut synchronizer = SceneSynchronizer::from_config(channel, &config)?;
    if let Some(asset) = args.asset.as_deref() {
        synchronizer.preselect_asset(asset)?;
    }

    let (commands_tx, mut commands) = mpsc::unbounded_channel();
    let input = tokio::spawn(read_commands(commands_tx));

    let mut runtime = Runtime::new(controller, synchronizer);
    let exit = runtime.run(&mut events, &mut commands).await;
    input.abort();

    let (_, synchronizer) = runtime.into_parts();
    match exit {
        RunExit::ChannelLost(reason) => {
            println!(
                "message channel closed: {}",
                reason.as_deref().unwrap_or("no reason given")
            );
        }
        RunExit::Ended => println!("session ended"),
        RunExit::Quit | RunExit::CommandsClosed => {}
    }
    synchronizer.into_channel().close();
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum LineCommand {
    Select(String),
    Asset(String),
    Reload,
    Reset,
    Tree,
    Session,
    End,
    Quit,
}

fn parse_line(line: &str) -> Result<Option<LineCommand>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };
    let command = match (word, rest.is_empty()) {
        ("select", false) => LineCommand::Select(rest.to_string()),
        ("asset", false) => LineCommand::Asset(rest.to_string()),
        ("reload", true) => LineCommand::Reload,
        ("reset", true) => LineCommand::Reset,
        ("tree", true) => LineCommand::Tree,
        ("session", true) => LineCommand::Session,
        ("end", true) => LineCommand::End,
        ("quit" | "exit", true) => LineCommand::Quit,
        _ => {
            return Err(format!(
                "unrecognized command '{line}' (select <path>, asset <name>, reload, reset, tree, session, end, quit)"
            ));
        }
    };
    Ok(Some(command))
}

async fn read_commands(commands: mpsc::UnboundedSender<ViewerCommand>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let command = match parse_line(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(message) => {
                eprintln!("{message}");
                continue;
            }
        };
        let sent = match command {
            LineCommand::Select(path) => commands.send(ViewerCommand::ToggleSelection(path)),
            LineCommand::Asset(name) => commands.send(ViewerCommand::SelectAsset(name)),
            LineCommand::Reload => commands.send(ViewerCommand::ReloadAsset),
            LineCommand::Reset => commands.send(ViewerCommand::ResetSelection),
            LineCommand::End => commands.send(ViewerCommand::EndSession),
            LineCommand::Quit => commands.send(ViewerCommand::Quit),
            LineCommand::Tree => {
                let (reply, response) = oneshot::channel();
                if commands.send(ViewerCommand::Snapshot(reply)).is_err() {
                    break;
                }
                if let Ok(snapshot) = response.await {
                    print!("{snapshot}");
                }
                continue;
            }
            LineCommand::Session => {
                let (reply, response) = oneshot::channel();
                if commands.send(ViewerCommand::SessionSnapshot(reply)).is_err() {
                    break;
                }
                if let Ok(session) = response.await {
                    print_session(&session);
                }
                continue;
            }
        };
        if sent.is_err() {
            break;
        }
    }
}
