use std::process::ExitCode;

use oauth_session::config::{AppConfig, StorageBackend, StorageSettings};
use oauth_session::core::logging::{self, ConsoleStream};
use oauth_session::oauth::{
    Authenticator, BlobStorage, Error, FileBlobStorage, MemoryBlobStorage, Result, TokenType,
};

const USAGE: &str = "\
usage: oauth-session <command>

commands:
  status          show the stored session
  login           sign in through the system browser
  refresh         redeem the refresh token
  userinfo        call the userinfo endpoint
  revoke-access   revoke the access token
  revoke-refresh  revoke the refresh token
  logout          end the browser session
  app-logout      forget all tokens

configuration: ~/.config/oauth-session/config.toml or OAUTH_SESSION_* variables";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Status,
    Login,
    Refresh,
    UserInfo,
    RevokeAccess,
    RevokeRefresh,
    Logout,
    AppLogout,
}

impl Command {
    fn parse(arg: &str) -> Option<Self> {
        Some(match arg {
            "status" => Self::Status,
            "login" => Self::Login,
            "refresh" => Self::Refresh,
            "userinfo" => Self::UserInfo,
            "revoke-access" => Self::RevokeAccess,
            "revoke-refresh" => Self::RevokeRefresh,
            "logout" => Self::Logout,
            "app-logout" => Self::AppLogout,
            _ => return None,
        })
    }

    /// Commands that only touch local state skip discovery.
    fn needs_discovery(self) -> bool {
        !matches!(self, Self::Status | Self::AppLogout)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match args.as_slice() {
        [arg] => match Command::parse(arg) {
            Some(command) => command,
            None => {
                eprintln!("unknown command '{arg}'\n\n{USAGE}");
                return ExitCode::from(2);
            }
        },
        _ => {
            eprintln!("{USAGE}");
            return ExitCode::from(2);
        }
    };

    let config = AppConfig::load();
    let _log_guard = logging::init_with(config.logging.log_options(ConsoleStream::Stderr));
    log::info!("oauth-session v{} starting", oauth_session::VERSION);

    match run(command, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if e.is_user_cancelled() => {
            eprintln!("Cancelled.");
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("Error: {e}");
            if e.requires_reauth() {
                eprintln!("Run `oauth-session login` to sign in again.");
            }
            ExitCode::FAILURE
        }
    }
}

fn open_storage(settings: &StorageSettings) -> Result<Box<dyn BlobStorage>> {
    Ok(match settings.backend {
        StorageBackend::File => match &settings.path {
            Some(path) => Box::new(FileBlobStorage::new(path)?),
            None => Box::new(FileBlobStorage::default_path()?),
        },
        StorageBackend::Memory => Box::new(MemoryBlobStorage::new()),
        #[cfg(feature = "keyring")]
        StorageBackend::Keyring => {
            use oauth_session::oauth::KeyringBlobStorage;
            if !KeyringBlobStorage::is_available() {
                return Err(Error::storage("system keyring is not available"));
            }
            match &settings.keyring_service {
                Some(service) => Box::new(KeyringBlobStorage::with_service(service)),
                None => Box::new(KeyringBlobStorage::new()),
            }
        }
        #[cfg(not(feature = "keyring"))]
        StorageBackend::Keyring => {
            return Err(Error::config("built without the `keyring` feature"));
        }
    })
}

async fn run(command: Command, config: &AppConfig) -> Result<()> {
    let auth_config = config.auth.to_auth_config()?;
    let storage = open_storage(&config.storage)?;
    log::debug!("Using {} storage", storage.name());

    let auth = Authenticator::with_defaults(auth_config, storage)?;
    auth.load_auth_state().await?;
    if command.needs_discovery() {
        auth.load_discovery_config().await?;
    }

    match command {
        Command::Status => println!("{}", auth.state_summary().await),
        Command::Login => {
            println!("Opening the browser to sign in...");
            let session = auth.start_browser_login_with_auto_code_exchange().await?;
            let outcome = auth
                .handle_browser_login_with_auto_code_exchange_response(session)
                .await;
            let failure = outcome.as_ref().err().cloned();
            auth.finish_login_with_auth_state_response(outcome.ok())
                .await?;
            if let Some(e) = failure {
                return Err(e);
            }
            println!("Signed in.\n\n{}", auth.state_summary().await);
        }
        Command::Refresh => {
            auth.refresh_tokens().await?;
            println!("Tokens refreshed.\n\n{}", auth.state_summary().await);
        }
        Command::UserInfo => println!("{}", auth.perform_user_info_request().await?),
        Command::RevokeAccess => {
            auth.revoke_token(TokenType::AccessToken).await?;
            println!("Access token revoked.");
        }
        Command::RevokeRefresh => {
            auth.revoke_token(TokenType::RefreshToken).await?;
            println!("Refresh token revoked.");
        }
        Command::Logout => {
            println!("Opening the browser to sign out...");
            let session = auth.start_browser_logout_redirect().await?;
            let response = auth.handle_browser_logout_response(session).await?;
            auth.finish_browser_logout(Some(response)).await?;
            println!("Browser session ended.");
        }
        Command::AppLogout => {
            auth.perform_app_session_logout().await?;
            println!("Local session cleared.");
        }
    }

    Ok(())
}
