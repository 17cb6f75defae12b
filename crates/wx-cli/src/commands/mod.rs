mod fav;
mod login;
mod session;
mod weather;

use std::sync::Arc;

use wx::error::Result;
use wx::{AccountEngine, BrowserRuntime, SessionRegistry, WeatherEngine, WxConfig};

use crate::cli::{Cli, Commands};

pub struct App {
    pub runtime: Arc<BrowserRuntime>,
    pub registry: Arc<SessionRegistry>,
    pub account: AccountEngine,
    pub weather: WeatherEngine,
}

pub async fn dispatch(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => WxConfig::from_file(path)?,
        None => WxConfig::default(),
    };
    if cli.headed {
        config.headless = false;
    }

    let config = Arc::new(config);
    let runtime = Arc::new(BrowserRuntime::new(config.clone()));
    let registry = Arc::new(SessionRegistry::new(runtime.clone(), config.clone()));
    registry.start_sweeper();

    let app = App {
        account: AccountEngine::new(runtime.clone(), config.clone()),
        weather: WeatherEngine::new(runtime.clone(), config),
        runtime,
        registry,
    };

    let result = run(cli, &app).await;

    // Teardown runs regardless of the command result so a failed command
    // never leaks a browser process.
    app.registry.stop().await;
    app.runtime.stop().await;
    result
}

async fn run(cli: Cli, app: &App) -> Result<()> {
    let session_id = cli.session.as_deref();
    match cli.command {
        Commands::Login {
            email,
            password,
            snapshot,
        } => login::execute(app, session_id, &email, &password, snapshot.as_deref()).await,
        Commands::Auth => login::check(app, session_id).await,
        Commands::Weather { city } => weather::execute(app, session_id, &city).await,
        Commands::Fav(command) => fav::execute(app, session_id, command).await,
        Commands::Session(command) => session::execute(app, command).await,
    }
}
