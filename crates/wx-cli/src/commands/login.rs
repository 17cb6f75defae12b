use std::fs;
use std::path::Path;

use serde_json::json;
use tracing::info;
use wx::error::Result;

use super::App;

pub async fn execute(
    app: &App,
    session_id: Option<&str>,
    email: &str,
    password: &str,
    snapshot: Option<&Path>,
) -> Result<()> {
    let session = app.registry.resolve_or_create(session_id).await?;
    let outcome = app.account.login(&session, email, password).await?;

    if outcome.success {
        if let Some(path) = snapshot {
            let state = app.registry.snapshot(session.id()).await?;
            fs::write(path, serde_json::to_string_pretty(&state)?)?;
            info!(target = "wx.cli", path = %path.display(), "wrote session snapshot");
        }
    }

    let payload = json!({
        "sessionId": session.id(),
        "success": outcome.success,
        "state": outcome.state,
        "message": outcome.message,
    });
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

pub async fn check(app: &App, session_id: Option<&str>) -> Result<()> {
    let session = app.registry.resolve_or_create(session_id).await?;
    let authenticated = app.account.check_auth(&session).await?;

    let payload = json!({
        "sessionId": session.id(),
        "authenticated": authenticated,
    });
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}
