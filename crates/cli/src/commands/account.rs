// Account commands: sign in/out, registration, password reset, verification

use clap::Subcommand;
use keypanel_core::{ActionOutcome, AuthForm, PanelController};

#[derive(Subcommand)]
pub enum ResetCommand {
    /// Email password reset instructions
    Request {
        /// Account email
        #[arg(long, short)]
        email: String,
    },

    /// Set a new password with the token from the reset mail
    Confirm {
        /// Reset token
        #[arg(long)]
        token: String,

        /// New password
        #[arg(long, env = "KEYPANEL_PASSWORD", hide_env_values = true)]
        password: String,
    },
}

pub async fn login(panel: &PanelController, email: &str, password: &str) -> ActionOutcome {
    panel.show_form(AuthForm::Login);
    panel.login(email, password).await
}

pub fn logout(panel: &PanelController) -> ActionOutcome {
    panel.logout()
}

pub async fn register(panel: &PanelController, email: &str, password: &str) -> ActionOutcome {
    panel.show_form(AuthForm::Register);
    panel.register(email, password).await
}

pub async fn reset(panel: &PanelController, command: ResetCommand) -> ActionOutcome {
    panel.show_form(AuthForm::ResetPassword);
    match command {
        ResetCommand::Request { email } => panel.request_password_reset(&email).await,
        ResetCommand::Confirm { token, password } => {
            panel.confirm_password_reset(&token, &password).await
        }
    }
}

pub async fn verify_email(panel: &PanelController, token: &str) -> ActionOutcome {
    panel.verify_email(token).await
}
