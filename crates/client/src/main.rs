//! fva-client - command-line session demo
//!
//! Logs in with `FVA_USERNAME` / `FVA_PASSWORD` (or resumes a saved
//! session), prints what the user may do, and logs push messages until
//! Ctrl-C.

use std::time::Duration;

use anyhow::{Context, Result};
use fva_client::permission::UserTypeExt;
use fva_client::{logging, AuthSession, ClientConfig, SessionEvent};
use fva_shared::{LoginRequest, RouteNode};

const PERMISSIONS_WAIT: Duration = Duration::from_secs(15);

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();

    let config = ClientConfig::from_env();
    let login_days = config.login_days;
    let session = AuthSession::new(config);
    let mut events = session.subscribe_events();

    if !session.restore().await {
        let username = std::env::var("FVA_USERNAME").context("FVA_USERNAME is not set")?;
        let password = std::env::var("FVA_PASSWORD").context("FVA_PASSWORD is not set")?;
        let request = LoginRequest::new(username, password).with_login_days(login_days);
        session.login(&request).await.context("login failed")?;
    }

    session.connection().add_handler(|message| {
        fva_client::log_info!("[{}] {}", message.kind.as_str(), message.data);
        Ok(())
    });

    wait_for_permissions(&mut events).await?;
    print_summary(&session).await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(SessionEvent::Invalidated { reason }) => {
                    anyhow::bail!("session invalidated: {reason}");
                }
                Ok(other) => fva_client::log_debug!("Session event: {:?}", other),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    session.logout().await;
    Ok(())
}

async fn wait_for_permissions(
    events: &mut tokio::sync::broadcast::Receiver<SessionEvent>,
) -> Result<()> {
    tokio::time::timeout(PERMISSIONS_WAIT, permissions_loaded(events))
        .await
        .context("timed out waiting for permissions")?
}

async fn permissions_loaded(
    events: &mut tokio::sync::broadcast::Receiver<SessionEvent>,
) -> Result<()> {
    loop {
        match events.recv().await? {
            SessionEvent::PermissionsLoaded => return Ok(()),
            SessionEvent::Invalidated { reason } => anyhow::bail!("session invalidated: {reason}"),
            _ => {}
        }
    }
}

async fn print_summary(session: &AuthSession) {
    let permissions = session.permissions();
    let Some(snapshot) = permissions.snapshot() else {
        println!("Permissions not loaded");
        return;
    };

    println!("User:        {} ({})", snapshot.username, snapshot.user_id);
    println!("Identity:    {}", snapshot.user_type.name());
    println!("Data scope:  {}", snapshot.data_scope.name());
    println!("Roles:       {}", sorted(&snapshot.role_codes).join(", "));
    println!("Marks:       {}", snapshot.permission_marks.len());
    println!("APIs:        {}", snapshot.api_permissions.len());

    match session.accessible_routes().await {
        Ok(routes) => {
            println!("Routes:");
            print_routes(&routes, 1);
        }
        Err(e) => eprintln!("Failed to load routes: {e}"),
    }
}

fn print_routes(routes: &[RouteNode], depth: usize) {
    for route in routes {
        let title = route.meta.title.as_deref().unwrap_or("");
        println!("{}{} {}", "  ".repeat(depth), route.path, title);
        if let Some(children) = &route.children {
            print_routes(children, depth + 1);
        }
    }
}

fn sorted(values: &std::collections::HashSet<String>) -> Vec<&str> {
    let mut out: Vec<&str> = values.iter().map(String::as_str).collect();
    out.sort_unstable();
    out
}
