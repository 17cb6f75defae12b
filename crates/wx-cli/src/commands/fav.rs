use serde_json::json;
use wx::ToggleAction;
use wx::error::Result;

use super::App;
use crate::cli::FavCommand;

pub async fn execute(app: &App, session_id: Option<&str>, command: FavCommand) -> Result<()> {
    let session = app.registry.resolve_or_create(session_id).await?;

    match command {
        FavCommand::List => {
            let favorites = app.account.list_favorites(&session).await?;
            let payload = json!({
                "sessionId": session.id(),
                "count": favorites.len(),
                "favorites": favorites,
            });
            println!("{}", serde_json::to_string_pretty(&payload)?);
        }
        FavCommand::Add { city } => toggle(app, &session, &city, ToggleAction::Add).await?,
        FavCommand::Remove { city } => toggle(app, &session, &city, ToggleAction::Remove).await?,
    }
    Ok(())
}

async fn toggle(
    app: &App,
    session: &wx::SessionHandle,
    city: &str,
    action: ToggleAction,
) -> Result<()> {
    let outcome = app.account.toggle_favorite(session, city, action).await?;
    let payload = json!({
        "sessionId": session.id(),
        "success": outcome.success,
        "actionTaken": outcome.action_taken,
        "message": outcome.message,
        "favorites": outcome.favorites,
    });
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}
