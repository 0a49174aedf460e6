//! A game server and three players on one in-memory hub.
//!
//! Players ask the server for a loadout (`call`), the server pushes a
//! round announcement to everyone (`notify` broadcast) and asks one player
//! for its ping (`call` unicast).

use std::time::Duration;

use evrpc::{MemoryHub, Result, RpcContext, RpcEngine, RpcError, Target, TransportBuilder};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
struct Loadout {
    primary: String,
    ammo: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    env_logger::init();
    let hub = MemoryHub::new();

    let server = RpcEngine::builder(
        TransportBuilder::new()
            .server_role()
            .hub(hub.clone())
            .build()
            .await?,
    )
    .request_timeout(Duration::from_secs(2))
    .build()
    .await?;

    server.on("arena:loadout", |ctx: RpcContext, (class,): (String,)| async move {
        let loadout = match class.as_str() {
            "sniper" => Loadout {
                primary: "heavy_sniper".into(),
                ammo: 20,
            },
            "assault" => Loadout {
                primary: "carbine".into(),
                ammo: 240,
            },
            other => {
                return Err(RpcError::handler(format!(
                    "player {} asked for unknown class '{other}'",
                    ctx.sender
                )))
            }
        };
        Ok(loadout)
    });

    let mut players = Vec::new();
    for id in 1..=3u32 {
        let player = RpcEngine::builder(
            TransportBuilder::new()
                .node_id(id)
                .client_role()
                .hub(hub.clone())
                .build()
                .await?,
        )
        .build()
        .await?;

        player.on_sync("arena:round", move |_ctx, (round,): (u32,)| {
            println!("player {id}: round {round} starting");
            Ok(())
        });
        player.on_sync("arena:ping", move |_ctx, (): ()| Ok(id * 15));

        players.push(player);
    }

    let loadout: Loadout = players[0]
        .call("arena:loadout", None, ("sniper",))
        .await?;
    println!("player 1 got {loadout:?}");

    match players[1]
        .call::<Loadout>("arena:loadout", None, ("medic",))
        .await
    {
        Err(e) => println!("player 2 was refused: {e}"),
        Ok(loadout) => println!("player 2 got {loadout:?}"),
    }

    server
        .notify("arena:round", Some(Target::Broadcast), (1u32,))
        .await?;

    let ping: u32 = server
        .call("arena:ping", Some(Target::from(3u32)), ())
        .await?;
    println!("player 3 ping: {ping}ms");

    for player in &players {
        player.shutdown().await?;
    }
    server.shutdown().await?;
    Ok(())
}
