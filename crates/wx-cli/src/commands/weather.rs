use wx::error::Result;

use super::App;

pub async fn execute(app: &App, session_id: Option<&str>, city: &str) -> Result<()> {
    // Anonymous lookups use the browser's default context; a session flag
    // routes the lookup through that session's isolated context instead.
    let session = match session_id {
        Some(id) => Some(app.registry.resolve_or_create(Some(id)).await?),
        None => None,
    };

    match app.weather.get_weather(city, session.as_ref()).await? {
        Some(reading) => println!("{}", serde_json::to_string_pretty(&reading)?),
        None => println!("No weather data found for '{city}'"),
    }
    Ok(())
}
