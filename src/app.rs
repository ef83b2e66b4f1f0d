use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::api;
use crate::config::{self, Config};
use crate::data::{Fixtures, Services};
use crate::events::Bus;
use crate::logging;
use crate::model::RegisterRequest;
use crate::session::{self, Identity};
use crate::storage;
use crate::ui;

/// Signs in as this user when running against the built-in fixtures.
const DEMO_USER: &str = "ana";

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Use in-memory fixtures instead of the gateway.
    pub demo: bool,
}

struct Runtime {
    config: Config,
    store: Arc<storage::Store>,
    session: Arc<session::Manager>,
    services: Services,
}

impl Runtime {
    fn connect() -> Result<Self> {
        let config = config::load(config::LoadOptions::default()).context("load config")?;
        logging::init(&config.log).context("init logging")?;
        tracing::info!(version = crate::VERSION, base_url = %config.api.base_url, "app: starting");

        let store =
            Arc::new(storage::Store::open(storage::Options::default()).context("open storage")?);
        let session = Arc::new(session::Manager::new(store.clone()));
        session.load_existing().context("restore session")?;

        let client = api::Client::new(
            session.clone(),
            api::ClientConfig {
                base_url: Some(config.api.base_url.clone()),
                user_agent: config.api.user_agent.clone(),
                timeout: Some(config.api.timeout),
                http_client: None,
            },
        )
        .context("create API client")?;
        let services = Services::api(Arc::new(client));

        Ok(Self {
            config,
            store,
            session,
            services,
        })
    }

    fn demo() -> Result<Self> {
        let config = config::load(config::LoadOptions::default()).context("load config")?;
        logging::init(&config.log).context("init logging")?;
        tracing::info!(version = crate::VERSION, "app: starting with demo data");

        let store = Arc::new(storage::Store::open_in_memory().context("open storage")?);
        let session = Arc::new(session::Manager::new(store.clone()));
        let services = Services::fixtures(Fixtures::demo());
        session
            .authenticate(services.auth.as_ref(), DEMO_USER, "demo")
            .context("sign in demo user")?;

        Ok(Self {
            config,
            store,
            session,
            services,
        })
    }

    fn close(self) -> Result<()> {
        let Runtime {
            store,
            session,
            services,
            config: _,
        } = self;
        // The API client holds the session, which holds the store.
        drop(services);
        drop(session);
        if let Ok(store) = Arc::try_unwrap(store) {
            store.close()?;
        }
        Ok(())
    }
}

pub fn run() -> Result<()> {
    run_with(RunOptions::default())
}

pub fn run_with(options: RunOptions) -> Result<()> {
    let runtime = if options.demo {
        Runtime::demo()?
    } else {
        Runtime::connect()?
    };

    let status = match runtime.session.current() {
        Some(identity) if options.demo => format!(
            "Demo mode: signed in as {}. Nothing you do leaves this session.",
            identity.username
        ),
        Some(identity) => format!("Signed in as {}.", identity.username),
        None => format!(
            "Sign in to PopLens. Gateway: {} (config: {}).",
            runtime.config.api.base_url,
            friendly_path(config::default_path().as_ref())
        ),
    };

    let options = ui::Options {
        services: runtime.services.clone(),
        session: runtime.session.clone(),
        config: runtime.config.clone(),
        bus: Bus::new(),
        status_message: status,
    };
    let mut model = ui::Model::new(options);
    let result = model.run();
    drop(model);

    tracing::info!("app: shutting down");
    runtime.close()?;
    result
}

/// Signs in from the command line and keeps the session for the next run.
/// With `api_url` the gateway address is also written to the config file.
pub fn login(username: &str, password: &str, api_url: Option<&str>) -> Result<Identity> {
    if let Some(url) = api_url {
        let path = config::save_api_base_url(None, url)?;
        println!("Saved gateway {url} to {}", friendly_path(Some(&path)));
    }
    let runtime = Runtime::connect()?;
    let identity = runtime
        .session
        .authenticate(runtime.services.auth.as_ref(), username, password)?;
    runtime.close()?;
    Ok(identity)
}

pub fn register(username: &str, email: &str, password: &str) -> Result<()> {
    let runtime = Runtime::connect()?;
    anyhow::ensure!(
        !username.trim().is_empty() && !email.trim().is_empty() && !password.is_empty(),
        "Please fill in all fields."
    );
    runtime
        .services
        .auth
        .register(&RegisterRequest {
            username: username.trim().to_string(),
            email: email.trim().to_string(),
            password: password.to_string(),
        })
        .context("register account")?;
    tracing::info!(username = %username.trim(), "app: registered account");
    runtime.close()
}

pub fn logout() -> Result<()> {
    let runtime = Runtime::connect()?;
    runtime.session.logout()?;
    runtime.close()
}

pub fn whoami() -> Result<Option<Identity>> {
    let runtime = Runtime::connect()?;
    let identity = runtime.session.current();
    runtime.close()?;
    Ok(identity)
}

fn friendly_path(path: Option<&PathBuf>) -> String {
    if let Some(path) = path {
        if let Some(home) = dirs::home_dir() {
            if let Ok(stripped) = path.strip_prefix(&home) {
                let mut display = String::from("~");
                if !stripped.as_os_str().is_empty() {
                    display.push_str(&format!("/{}", stripped.display()));
                }
                return display;
            }
        }
        path.display().to_string()
    } else {
        "~/.config/poplens/config.yaml".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn friendly_path_shortens_home() {
        let Some(home) = dirs::home_dir() else {
            return;
        };
        let path = home.join(".config").join("poplens").join("config.yaml");
        assert_eq!(friendly_path(Some(&path)), "~/.config/poplens/config.yaml");
        assert_eq!(friendly_path(None), "~/.config/poplens/config.yaml");
        let outside = PathBuf::from("/etc/poplens.yaml");
        if !outside.starts_with(&home) {
            assert_eq!(friendly_path(Some(&outside)), "/etc/poplens.yaml");
        }
    }
}
