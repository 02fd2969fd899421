//! Connects to the configured nodes and prints every notification.
//!
//! ```text
//! LINK__NODES__0__HOSTNAME=localhost LINK__NODES__0__PORT=2333 \
//! LINK__NODES__0__PASSWORD=youshallnotpass BOT_USER_ID=123 \
//! cargo run --example connect
//! ```

use anyhow::{Context, Result};
use open_music_link::audio::VoiceStateRequest;
use open_music_link::{LinkConfig, LinkEvent, MusicLink};
use serenity::model::id::UserId;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("open_music_link=debug".parse()?)
                .add_directive("connect=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando demo de Open Music Link v{}", env!("CARGO_PKG_VERSION"));

    let config = LinkConfig::load()?;
    let user_id: u64 = std::env::var("BOT_USER_ID")
        .context("BOT_USER_ID no configurado")?
        .parse()
        .context("BOT_USER_ID inválido")?;

    // Sin gateway real: las solicitudes de voz sólo se muestran
    let (voice_tx, mut voice_rx) = mpsc::unbounded_channel::<VoiceStateRequest>();
    tokio::spawn(async move {
        while let Some(request) = voice_rx.recv().await {
            info!("🎙️ Gateway op 4: {}", request.to_gateway_payload());
        }
    });

    let link = MusicLink::new(config, Arc::new(voice_tx))?;
    let mut events = link.subscribe();
    link.start(UserId::new(user_id));

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(LinkEvent::Raw { .. }) => {}
                Ok(event) if event.is_error() => error!("❌ {:?}", event),
                Ok(event) => info!("📣 {:?}", event),
                Err(e) => warn!("⚠️ Eventos perdidos: {}", e),
            },
            _ = tokio::signal::ctrl_c() => {
                info!("⚠️ Señal de shutdown recibida, cerrando...");
                break;
            }
        }
    }

    link.shutdown();
    Ok(())
}
