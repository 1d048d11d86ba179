//! End-to-end flow over the real protocol: join, stream a surface column,
//! mesh it client-side, spawn on it, build, and watch two clients converge
//! on the same voxels through two different paths (commit replay vs. chunk
//! download).

use nalgebra::{point, vector, UnitQuaternion};
use std::time::{Duration, Instant};

use terravox_client::{
    mesher::{MeshEvent, MeshWorkerPool},
    pump_meshing,
    session::ClientSession,
    spawn::find_spawn_position,
    world::ClientWorld,
};
use terravox_common::{
    build::{BuildConfig, BuildMode, BuildOperation, BuildShape},
    material::MaterialRegistry,
    net::ClientPacket,
    world::{world_to_chunk, TilePos},
};
use terravox_server::room::{dispatch, MessageRegistry, RoomManager, PROTOCOL_VERSION};

fn test_dir(label: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "terravox-e2e-{}-{}",
        label,
        std::process::id()
    ));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

struct Client {
    id: u16,
    session: ClientSession,
    rx: crossbeam_channel::Receiver<Vec<u8>>,
}

impl Client {
    fn drain(&mut self) {
        while let Ok(frame) = self.rx.try_recv() {
            self.session.handle_frame(&frame);
        }
    }
}

fn connect(manager: &mut RoomManager, registry: &std::sync::Arc<MaterialRegistry>) -> Client {
    let ticket = manager.join(PROTOCOL_VERSION).expect("join accepted");
    let (tx, rx) = crossbeam_channel::unbounded();
    let room = manager.room_mut(&ticket.room_id).unwrap();
    room.attach_connection(ticket.player_id, Box::new(tx));

    let mut client = Client {
        id: ticket.player_id,
        session: ClientSession::new(ClientWorld::new(registry.clone())),
        rx,
    };
    client.drain();
    assert_eq!(client.session.player_id(), Some(ticket.player_id));
    client
}

#[test]
fn stream_mesh_spawn_build_and_converge() {
    let dir = test_dir("full-flow");
    let registry = MaterialRegistry::with_default_materials();
    let mut manager = RoomManager::new(&dir, registry.clone());
    let message_registry = MessageRegistry::standard();

    let mut alice = connect(&mut manager, &registry);
    let mut bob = connect(&mut manager, &registry);
    let room_id = alice.session.room_id().unwrap().to_owned();
    assert_eq!(bob.session.room_id(), Some(room_id.as_str()));

    let t0 = Instant::now();
    let room = manager.room_mut(&room_id).unwrap();

    // --- stream the home column to alice
    dispatch(
        &message_registry,
        room,
        alice.id,
        t0,
        &ClientPacket::SurfaceColumnRequest(TilePos::new(0, 0)).encode(),
    );
    alice.drain();
    assert!(alice.session.world().loaded_count() > 0);

    // --- mesh everything that arrived and mark it renderable
    let pool = MeshWorkerPool::new(2, registry.clone());
    let stack: Vec<_> = alice.session.world().loaded_positions().collect();
    let deadline = Instant::now() + Duration::from_secs(30);
    loop {
        pump_meshing(alice.session.world_mut(), &pool, 8);
        for event in pool.poll() {
            if let MeshEvent::Chunk(result) = event {
                alice.session.world_mut().mark_meshed(result.key);
            }
        }
        let world = alice.session.world();
        if stack.iter().all(|&pos| world.is_meshed(pos)) {
            break;
        }
        assert!(Instant::now() < deadline, "meshing never settled");
        std::thread::yield_now();
    }

    // --- spawn via the down raycast against the meshed stack
    let spawn = find_spawn_position(alice.session.world(), 1.0, 1.0)
        .expect("terrain is meshed under the spawn ray");
    assert_eq!(world_to_chunk(spawn).column(), TilePos::new(0, 0));

    // --- report the pose, then build just under the feet
    let room = manager.room_mut(&room_id).unwrap();
    let input = alice
        .session
        .input_frame(spawn, 0.0, 0.0, 0);
    dispatch(&message_registry, room, alice.id, t0, &input);

    let op = BuildOperation {
        // a meter below the surface keeps the whole sphere inside the
        // streamed chunk stack
        center: point![spawn.x + 1.0, spawn.y - 3.0, spawn.z],
        rotation: UnitQuaternion::identity(),
        config: BuildConfig::solid(
            BuildShape::Sphere,
            BuildMode::Add,
            vector![1.5, 1.5, 1.5],
            registry.id_for_name("brick").unwrap(),
        ),
    };
    dispatch(
        &message_registry,
        room,
        alice.id,
        t0,
        &ClientPacket::BuildIntent(op.clone()).encode(),
    );

    // a second build in the same instant is rate limited, seq stays at 1
    dispatch(
        &message_registry,
        room,
        alice.id,
        t0,
        &ClientPacket::BuildIntent(op.clone()).encode(),
    );
    assert_eq!(room.build_seq(), 1);

    // both clients observed the commit broadcast
    alice.drain();
    bob.drain();
    assert_eq!(alice.session.last_build_seq(), 1);
    assert_eq!(bob.session.last_build_seq(), 1);

    // alice replayed it locally onto her loaded chunks
    let target = world_to_chunk(op.center);
    let alice_chunk = alice
        .session
        .world()
        .chunk(target)
        .expect("alice has the touched chunk");
    assert_eq!(alice_chunk.last_build_seq(), 1);

    // bob had nothing loaded; he downloads the chunk instead and lands on
    // byte-identical voxels
    let room = manager.room_mut(&room_id).unwrap();
    dispatch(
        &message_registry,
        room,
        bob.id,
        t0,
        &ClientPacket::ChunkRequest(target).encode(),
    );
    let wait = Instant::now() + Duration::from_secs(30);
    loop {
        room.tick();
        bob.drain();
        if bob.session.world().contains(target) {
            break;
        }
        assert!(Instant::now() < wait, "chunk never arrived");
        std::thread::yield_now();
    }

    let bob_chunk = bob.session.world().chunk(target).unwrap();
    assert_eq!(bob_chunk.last_build_seq(), 1);
    assert_eq!(bob_chunk.to_dense(), alice.session.world().chunk(target).unwrap().to_dense());

    // --- reconnect backfill picks up from the watermark
    let frames = bob.session.reconnect_frames(PROTOCOL_VERSION);
    assert_eq!(
        ClientPacket::decode(&frames[1]).unwrap(),
        ClientPacket::BuildSyncRequest { since_seq: 1 }
    );

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn tile_requests_feed_the_client_map() {
    let dir = test_dir("map-tiles");
    let registry = MaterialRegistry::with_default_materials();
    let mut manager = RoomManager::new(&dir, registry.clone());
    let message_registry = MessageRegistry::standard();

    let mut client = connect(&mut manager, &registry);
    let room_id = client.session.room_id().unwrap().to_owned();
    let room = manager.room_mut(&room_id).unwrap();

    dispatch(
        &message_registry,
        room,
        client.id,
        Instant::now(),
        &ClientPacket::MapTileRequest(TilePos::new(0, 0)).encode(),
    );
    client.drain();

    let map = client.session.map();
    assert_eq!(map.len(), 1);
    let tile = map.get(TilePos::new(0, 0)).unwrap();
    // a fresh world always has terrain somewhere in the column
    assert!(tile.surface_chunk_range().is_some());
    // the tile agrees with the voxel surface the session would stream
    assert!(map.surface_height(5, 9).is_some());

    let _ = std::fs::remove_dir_all(&dir);
}
