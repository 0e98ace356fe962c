//! Console demo for the session lifecycle manager.
//!
//! Signs in against a real auth server, prints every emitted auth event,
//! and keeps the session alive (background refresh + activity simulated
//! by pressing Enter) until Ctrl-C.
//!
//! ```text
//! AUTH_BASE_URL=https://api.example.com \
//! AUTH_IDENTIFIER=reader@example.com \
//! AUTH_PASSWORD=hunter2 \
//! cargo run -p console-login
//! ```

use std::sync::Arc;

use authflow::prelude::*;
use tokio::io::{AsyncBufReadExt, BufReader};

fn env(name: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| {
        eprintln!("missing required environment variable {name}");
        std::process::exit(2);
    })
}

#[tokio::main]
async fn main() -> Result<(), AuthflowError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,authflow=debug".into()),
        )
        .init();

    let base_url = env("AUTH_BASE_URL");
    let identifier = env("AUTH_IDENTIFIER");
    let password = env("AUTH_PASSWORD");

    let api = HttpAuthApi::new(HttpConfig::new(base_url))?;
    let activity = Arc::new(ManualActivity::new());
    let store = AuthStore::<HttpAuthApi>::builder()
        .activity(Arc::clone(&activity) as Arc<dyn ActivitySource>)
        .build(api)
        .await;

    // Print the lifecycle as it happens.
    let mut events = store.events();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => println!("event: {event:?}"),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let user = store.login(&identifier, &password, true).await?;
    println!(
        "signed in as {} ({}), session expires at {}",
        user.display_name,
        user.role,
        store
            .session()
            .map(|s| s.expires_at.to_string())
            .unwrap_or_else(|| "?".into()),
    );
    println!("press Enter to simulate activity, Ctrl-C to quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => match line {
                Ok(Some(_)) => {
                    activity.record(Activity::Keyboard);
                    if let Some(session) = store.session() {
                        println!("activity noted, expiry now {}", session.expires_at);
                    }
                }
                _ => break,
            },
        }
    }

    println!("signing out");
    store.logout().await;
    Ok(())
}
