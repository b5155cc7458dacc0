use crate::cli::actions::{Action, PolicyName};
use anyhow::Result;

pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    if matches.subcommand_matches("openapi").is_some() {
        return Ok(Action::OpenApi);
    }

    let policy = match matches.get_one::<String>("policy").map(String::as_str) {
        Some("disabled") => PolicyName::Disabled,
        Some("no-verification") => PolicyName::NoVerification,
        _ => PolicyName::IfVerified,
    };

    Ok(Action::Server {
        port: matches.get_one::<u16>("port").copied().unwrap_or(8080),
        dsn: matches.get_one("dsn").map(|s: &String| s.to_string()),
        policy,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::commands;

    #[test]
    fn test_server_action() -> Result<()> {
        let matches = commands::new().get_matches_from(vec![
            "ligilo",
            "--port",
            "9090",
            "--policy",
            "no-verification",
        ]);
        let action = handler(&matches)?;
        match action {
            Action::Server { port, dsn, policy } => {
                assert_eq!(port, 9090);
                assert_eq!(dsn, None);
                assert_eq!(policy, PolicyName::NoVerification);
            }
            Action::OpenApi => panic!("expected server action"),
        }
        Ok(())
    }

    #[test]
    fn test_openapi_action() -> Result<()> {
        let matches = commands::new().get_matches_from(vec!["ligilo", "openapi"]);
        assert!(matches!(handler(&matches)?, Action::OpenApi));
        Ok(())
    }
}
