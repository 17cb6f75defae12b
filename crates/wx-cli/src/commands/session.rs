use std::fs;

use serde_json::json;
use tracing::info;
use wx::ContextSnapshot;
use wx::error::Result;

use super::App;
use crate::cli::SessionCommand;

pub async fn execute(app: &App, command: SessionCommand) -> Result<()> {
    match command {
        SessionCommand::List => {
            let report = app.registry.report().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        SessionCommand::Destroy { id } => {
            app.registry.destroy(&id).await;
            println!("Destroyed session {id}");
        }
        SessionCommand::Save { id, file } => {
            let snapshot = app.registry.snapshot(&id).await?;
            fs::write(&file, serde_json::to_string_pretty(&snapshot)?)?;
            info!(target = "wx.cli", path = %file.display(), "wrote session snapshot");
            println!(
                "Saved {} cookies for session {id} to {}",
                snapshot.cookies.len(),
                file.display()
            );
        }
        SessionCommand::Restore { id, file } => {
            let content = fs::read_to_string(&file)?;
            let snapshot: ContextSnapshot = serde_json::from_str(&content)?;
            let session = app.registry.restore(&id, &snapshot).await?;
            let payload = json!({
                "sessionId": session.id(),
                "authenticated": session.is_authenticated(),
                "cookies": snapshot.cookies.len(),
            });
            println!("{}", serde_json::to_string_pretty(&payload)?);
        }
    }
    Ok(())
}
