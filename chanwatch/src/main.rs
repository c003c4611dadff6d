use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;
use chanwatch::client::connect_controller;
use chanwatch::config::ClientConfig;
use chanwatch::console::{follow, Input};
use chanwatch_core::event::irc_lower;
use chanwatch_core::ClientController;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

/// Printing tasks per joined channel, keyed by folded name.
type Followers = Arc<Mutex<HashMap<String, JoinHandle<()>>>>;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("chanwatch=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let config = ClientConfig::parse();
    tracing::info!(server = %config.server, nick = %config.nick, "Connecting");
    let controller = Arc::new(connect_controller(&config.connect_config()).await?);
    let followers: Followers = Arc::default();

    let mut current = config.channels.last().cloned();
    for channel in &config.channels {
        start_join(&controller, &followers, channel).await;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            if controller.is_connected() {
                controller.disconnect(None).await?;
            }
            break;
        };
        if !controller.is_connected() {
            eprintln!("*** Disconnected");
            break;
        }

        match Input::parse(&line) {
            Input::Join(channel) => {
                start_join(&controller, &followers, &channel).await;
                current = Some(channel);
            }
            Input::Part(channel) => match channel.or_else(|| current.clone()) {
                Some(channel) => start_part(&controller, &followers, &channel).await,
                None => eprintln!("*** Not in a channel"),
            },
            Input::Quit(message) => {
                controller.disconnect(message.as_deref()).await?;
                break;
            }
            Input::Say(text) => match &current {
                Some(channel) => {
                    if let Err(e) = controller.say(channel, &text).await {
                        eprintln!("*** {e}");
                    }
                }
                None => eprintln!("*** Not in a channel; /join one first"),
            },
            Input::Unknown(line) => eprintln!("*** Unknown command: {line}"),
            Input::Empty => {}
        }
    }

    for (_, task) in followers.lock().unwrap_or_else(PoisonError::into_inner).drain() {
        task.abort();
    }
    Ok(())
}

async fn start_join(controller: &ClientController, followers: &Followers, channel: &str) {
    let pending = match controller.join_channel(channel).await {
        Ok(pending) => pending,
        Err(e) => {
            eprintln!("*** {e}");
            return;
        }
    };
    let followers = followers.clone();
    tokio::spawn(async move {
        let channel = pending.channel().to_string();
        match pending.wait().await {
            Ok(log) => {
                println!("*** Joined {channel}");
                let task = follow(log);
                let previous = followers
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(irc_lower(&channel), task);
                if let Some(previous) = previous {
                    previous.abort();
                }
            }
            Err(e) => eprintln!("*** {e}"),
        }
    });
}

async fn start_part(controller: &ClientController, followers: &Followers, channel: &str) {
    let pending = match controller.leave_channel(channel, None).await {
        Ok(pending) => pending,
        Err(e) => {
            eprintln!("*** {e}");
            return;
        }
    };
    let followers = followers.clone();
    tokio::spawn(async move {
        let channel = pending.channel().to_string();
        match pending.wait().await {
            Ok(log) => {
                let task = followers
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&irc_lower(&channel));
                if let Some(task) = task {
                    task.abort();
                }
                println!("*** Left {channel} after {} events", log.len());
            }
            Err(e) => eprintln!("*** {e}"),
        }
    });
}
