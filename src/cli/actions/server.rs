use crate::api;
use crate::api::handlers::auth::AuthConfig;
use crate::cli::{actions::Action, globals::GlobalArgs};
use anyhow::Result;

/// Handle the server action
pub async fn handle(action: Action, globals: &GlobalArgs) -> Result<()> {
    match action {
        Action::Server {
            port,
            dsn,
            public_base_url,
            otp_debug_echo,
        } => {
            let auth_config =
                AuthConfig::new(public_base_url).with_otp_debug_echo(otp_debug_echo);

            api::new(port, dsn, globals, auth_config).await?;
        }
    }

    Ok(())
}
