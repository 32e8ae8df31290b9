use std::sync::Arc;

use futures_util::StreamExt;
use genwire::{
    auth::{FileTokenStore, TokenPair, TokenStore},
    config::Config,
    ws::{ConnectionState, SessionEvent},
    Connector,
};

#[tokio::main]
async fn main() {
    pretty_env_logger::init();

    let generation_id = std::env::args().nth(1).unwrap_or_else(|| {
        println!("Usage: watch <generation id>");
        std::process::exit(1);
    });

    let config = Config::default().with_env_overrides().unwrap();

    let store = FileTokenStore::open("tokens.json").await.unwrap();
    if let (Ok(access), Ok(refresh)) = (
        std::env::var("ACCESS_TOKEN"),
        std::env::var("REFRESH_TOKEN"),
    ) {
        store.set(TokenPair::new(access, refresh)).await;
    }

    let connector = Connector::new(config, Arc::new(store))
        .unwrap()
        .on_unauthorized(|| println!("Session expired, log in again"));

    let (mut session, mut events) = connector.session().unwrap();
    session.initialize().await.unwrap();

    while let Some(event) = events.next().await {
        match event {
            SessionEvent::ConnectionChanged(ConnectionState::Connected) => {
                println!("Connected, joining {}", generation_id);
                session.join_generation(generation_id.as_str()).await.unwrap();
            }
            SessionEvent::ConnectionChanged(state) => println!("Connection {}", state),
            SessionEvent::Stage(stage) => {
                println!("[{:>3.0}%] {:?}: {}", stage.progress, stage.stage, stage.message)
            }
            SessionEvent::Content(section, content) => {
                println!("{} ({}): {}", section, content.is_complete, content.content)
            }
            SessionEvent::Completed(done) => {
                println!("Done: {}", done.title);
                break;
            }
            SessionEvent::GenerationFailed(message) => {
                println!("Generation failed: {}", message);
                break;
            }
            SessionEvent::Fatal(err) => {
                println!("{}", err.user_message());
                break;
            }
            other => log::debug!("{:?}", other),
        }
    }

    session.disconnect().await;
}
