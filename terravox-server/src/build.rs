//! Server-side build validation and commit.
//!
//! Validation order: rate limit, reach, config shape, material, terrain
//! readiness. Only a fully validated intent mutates chunks, bumps the
//! room's build seq, invalidates the touched tile columns and lands in the
//! bounded build log.

use nalgebra::Point3;
use std::{collections::{HashSet, VecDeque}, time::Instant};

use terravox_common::{
    build::{draw::draw_operation, BuildLogEntry, BuildOperation, BuildResult, MAX_BUILD_DISTANCE},
    material::MaterialRegistry,
};

use crate::{provider::ChunkProvider, rate_limit::RateLimiter, surface::TileProvider};

/// Entries kept per room for BUILD_SYNC backfill.
pub const BUILD_LOG_CAPACITY: usize = 1000;

#[derive(Default)]
pub struct BuildState {
    build_seq: u32,
    log: VecDeque<BuildLogEntry>,
}

impl BuildState {
    pub fn build_seq(&self) -> u32 {
        self.build_seq
    }

    fn commit(&mut self, player_id: u16, op: BuildOperation) -> u32 {
        self.build_seq += 1;
        if self.log.len() == BUILD_LOG_CAPACITY {
            self.log.pop_front();
        }
        self.log.push_back(BuildLogEntry {
            build_seq: self.build_seq,
            player_id,
            op,
        });
        self.build_seq
    }

    /// All retained entries with `build_seq > since_seq`, oldest first.
    pub fn entries_since(&self, since_seq: u32) -> impl Iterator<Item = &BuildLogEntry> {
        self.log
            .iter()
            .skip_while(move |entry| entry.build_seq <= since_seq)
    }

    pub fn len(&self) -> usize {
        self.log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }
}

pub struct BuildRequest<'a> {
    pub room_id: &'a str,
    pub player_id: u16,
    pub player_pos: Point3<f32>,
    pub op: &'a BuildOperation,
    pub now: Instant,
}

pub fn handle_build_intent(
    provider: &mut ChunkProvider,
    tiles: &mut TileProvider,
    limiter: &mut RateLimiter,
    state: &mut BuildState,
    registry: &MaterialRegistry,
    request: BuildRequest<'_>,
) -> BuildResult {
    let key = format!("{}:{}", request.room_id, request.player_id);
    if !limiter.allow(&key, request.now) {
        return BuildResult::RateLimited;
    }

    let reach = (request.op.center - request.player_pos).norm();
    if reach > MAX_BUILD_DISTANCE {
        return BuildResult::TooFar;
    }

    if !request.op.config.is_size_valid() {
        return BuildResult::InvalidConfig;
    }
    if !registry.is_registered(request.op.config.material) {
        return BuildResult::InvalidMaterial;
    }

    let affected = request.op.affected_chunks();
    // refuse to race an in-flight async generation of any touched chunk
    if affected.iter().any(|&pos| provider.is_pending(pos)) {
        return BuildResult::TerrainNotReady;
    }

    let next_seq = state.build_seq() + 1;
    let mut touched_columns = HashSet::new();
    for &pos in affected.iter() {
        let chunk = provider.get_or_generate_blocking(pos);
        if draw_operation(chunk, request.op) {
            chunk.set_last_build_seq(next_seq);
            provider.store_mut().mark_dirty(pos);
            touched_columns.insert(pos.column());
        }
    }

    for column in touched_columns {
        tiles.invalidate(column);
    }

    let committed = state.commit(request.player_id, request.op.clone());
    debug_assert_eq!(committed, next_seq);
    BuildResult::Success
}
