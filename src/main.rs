use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use surge::config::{load_config, SurgeConfig};
use surge::entity::{replicated_fields, ClientId, EntityId, ServerEntity};
use surge::server::{GameRules, RulesContext, ServerHost};
use surge::transport::WebSocketProvider;
use tracing::info;

/// A player avatar on a 2D grid.
#[derive(Serialize)]
struct Player {
    x: i32,
    y: i32,
}

impl ServerEntity for Player {
    fn type_name(&self) -> &str {
        "player"
    }

    fn replicated_state(&self) -> Map<String, Value> {
        replicated_fields(self)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Move {
    Left,
    Right,
    Up,
    Down,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum DemoEvent {
    Spawned { client: ClientId, entity: EntityId },
}

/// Minimal game: every client controls one player entity.
#[derive(Default)]
struct DemoRules {
    players: HashMap<ClientId, EntityId>,
}

impl GameRules for DemoRules {
    type Command = Move;
    type Event = DemoEvent;

    fn client_joined(&mut self, ctx: &mut RulesContext<'_, DemoEvent>, client: &str) {
        let entity = ctx.state.add_entity(Box::new(Player { x: 0, y: 0 }));
        self.players.insert(client.to_string(), entity);

        ctx.send_event(
            None,
            DemoEvent::Spawned {
                client: client.to_string(),
                entity,
            },
        );
    }

    fn client_disconnected(&mut self, ctx: &mut RulesContext<'_, DemoEvent>, client: &str) {
        if let Some(entity) = self.players.remove(client) {
            ctx.state.delete_entity(entity);
        }
    }

    fn command_received(
        &mut self,
        ctx: &mut RulesContext<'_, DemoEvent>,
        client: &str,
        command: Move,
    ) {
        let Some(&entity) = self.players.get(client) else {
            return;
        };
        let Some(player) = ctx.state.entity_mut::<Player>(entity) else {
            return;
        };

        match command {
            Move::Left => player.x -= 1,
            Move::Right => player.x += 1,
            Move::Up => player.y -= 1,
            Move::Down => player.y += 1,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "surge=info".into()),
        )
        .init();

    let config = match std::env::var("SURGE_CONFIG") {
        Ok(path) => load_config(&path).map_err(|e| anyhow::anyhow!("{e}"))?,
        Err(_) => SurgeConfig::default(),
    };

    info!(
        tick_interval_ms = config.server.tick_interval_ms,
        listen = %config.network.listen_addr,
        "surge starting"
    );

    let listen_addr = config.network.listen_addr.clone();
    let mut host = ServerHost::new(DemoRules::default(), config);
    host.add_provider(Box::new(WebSocketProvider::new(&listen_addr)));
    host.start().await?;

    tokio::signal::ctrl_c().await?;
    host.stop("This server has stopped").await;

    Ok(())
}
