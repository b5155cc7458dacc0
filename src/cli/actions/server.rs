use crate::api::new;
use crate::cli::actions::Action;
use anyhow::Result;

/// Handle the server action
pub async fn handle(action: Action) -> Result<()> {
    match action {
        Action::Server { port, dsn, policy } => {
            new(port, dsn, policy.build()).await?;
        }
        Action::OpenApi => {
            println!("{}", crate::api::openapi_json()?);
        }
    }

    Ok(())
}
