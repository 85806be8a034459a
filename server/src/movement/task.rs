//! Point-to-point stepping with local terrain adaptation.

use log::{trace, warn};
use persona_shared::Pose;

use super::Movable;
use crate::error::NpcError;
use crate::math::{angles_toward, Location, Vec3};
use crate::npc::{FollowLook, NpcContext};
use crate::world::{Block, WorldView, EYE_HEIGHT};

/// X/Z closer than this count as arrived
pub const ARRIVAL_EPSILON: f64 = 1e-6;

/// Per-axis divisor when moving along X and Z at once
pub const DIAGONAL_DIVISOR: f64 = 1.7;

pub const LADDER_CLIMB_STEP: f64 = 0.15;

/// Highest rise of a push against an obstacle that cannot be stepped on
pub const OBSTACLE_RISE: f64 = 0.2;

/// Fastest fall per tick
pub const MAX_FALL_STEP: f64 = 0.4;

pub const SWIM_MULTIPLIER: f64 = 3.0;

pub const COBWEB_HORIZONTAL: f64 = 0.25;
pub const COBWEB_VERTICAL: f64 = 0.05;
pub const SOUL_SAND_MULTIPLIER: f64 = 0.5;
pub const CROUCH_DIVISOR: f64 = 3.0;

/// How far down a falling NPC looks for ground
const FALL_SCAN_DEPTH: i32 = 8;

/// How a task ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskResult {
    Success,
    Cancelled,
    Error,
}

/// Outcome of one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Running,
    Done(TaskResult),
}

/// Terrain checks and look behaviour of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveOptions {
    /// Turn towards the end point every tick
    pub face_destination: bool,
    pub climb_ladders: bool,
    pub swim: bool,
    pub crouch_under_slabs: bool,
    /// Cobweb and soul sand slowdown
    pub slowdown: bool,
}

impl Default for MoveOptions {
    fn default() -> Self {
        Self {
            face_destination: true,
            climb_ladders: true,
            swim: true,
            crouch_under_slabs: true,
            slowdown: true,
        }
    }
}

/// Result of probing the terrain for one step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Step {
    pub delta: Vec3,
    /// Pose the NPC should take, if it changes
    pub pose: Option<Pose>,
}

/// One straight move towards an end point, owned by its NPC
#[derive(Debug, Clone)]
pub struct MoveTask {
    start: Location,
    end: Location,
    paused: bool,
    options: MoveOptions,
    saved_look: FollowLook,
    saved_pose: Pose,
    ticks: u64,
}

impl MoveTask {
    pub fn new(start: Location, end: Location, options: MoveOptions, saved_look: FollowLook, saved_pose: Pose) -> Self {
        Self {
            start,
            end,
            paused: false,
            options,
            saved_look,
            saved_pose,
            ticks: 0,
        }
    }

    pub fn start(&self) -> &Location {
        &self.start
    }

    pub fn end(&self) -> &Location {
        &self.end
    }

    /// Retarget while running
    pub fn set_end(&mut self, end: Location) {
        self.end = end;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    pub fn options(&self) -> &MoveOptions {
        &self.options
    }

    pub fn saved_look(&self) -> FollowLook {
        self.saved_look
    }

    pub fn saved_pose(&self) -> Pose {
        self.saved_pose
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn tick<M: Movable + ?Sized>(&mut self, npc: &mut M, ctx: &mut NpcContext<'_>) -> TaskState {
        if !npc.is_created() {
            return TaskState::Done(TaskResult::Error);
        }
        if self.paused {
            return TaskState::Running;
        }
        let here = npc.location().clone();
        if !here.same_world(&self.end) {
            warn!("Task of '{}' targets another world, stopping", npc.code());
            return TaskState::Done(TaskResult::Error);
        }
        if self.arrived(&here) {
            return TaskState::Done(TaskResult::Success);
        }
        self.ticks += 1;

        let current_pose = npc.pose(ctx.defaults);
        let step = self.plan_step(&here, npc.move_speed(ctx.defaults), current_pose, ctx.world);

        if let Some(pose) = step.pose {
            if pose != current_pose {
                npc.set_pose(ctx, pose);
            }
        }

        if self.options.face_destination {
            let eye = here.position() + Vec3::new(0.0, EYE_HEIGHT, 0.0);
            let level_target = Vec3::new(self.end.x, eye.y, self.end.z);
            let (yaw, _) = angles_toward(eye, level_target);
            if (yaw - here.yaw).abs() > 0.5 || here.pitch != 0.0 {
                npc.look_at(ctx, yaw, 0.0);
            }
        }

        trace!("Task step of '{}': {:?}", npc.code(), step.delta);
        if step.delta == Vec3::ZERO {
            return TaskState::Running;
        }
        match npc.move_by(ctx, step.delta) {
            Ok(()) | Err(NpcError::Vetoed(_)) => TaskState::Running,
            Err(e) => {
                warn!("Task of '{}' failed to move: {}", npc.code(), e);
                TaskState::Done(TaskResult::Error)
            }
        }
    }

    /// X and Z at the end point, Y ignored
    pub fn arrived(&self, here: &Location) -> bool {
        (self.end.x - here.x).abs() < ARRIVAL_EPSILON && (self.end.z - here.z).abs() < ARRIVAL_EPSILON
    }

    /// Bounded delta for one tick from `here` towards the end point
    pub fn plan_step(&self, here: &Location, speed: f64, current_pose: Pose, world: &dyn WorldView) -> Step {
        let rx = self.end.x - here.x;
        let rz = self.end.z - here.z;
        let diagonal = rx.abs() >= ARRIVAL_EPSILON && rz.abs() >= ARRIVAL_EPSILON;
        let axis_speed = if diagonal { speed / DIAGONAL_DIVISOR } else { speed };

        let mut dx = step_toward(rx, axis_speed);
        let mut dz = step_toward(rz, axis_speed);
        let mut dy = 0.0;
        let mut pose = None;

        let world_name = here.world.as_str();
        let fx = (here.x + dx).floor() as i32;
        let fz = (here.z + dz).floor() as i32;
        let fy = (here.y + ARRIVAL_EPSILON).floor() as i32;

        let ahead = world.block_at(world_name, fx, fy, fz);
        let legs = world.block_at(world_name, fx, fy + 1, fz);
        let head = world.block_at(world_name, fx, fy + 2, fz);
        let below = world.block_at(world_name, fx, fy - 1, fz);

        let ahead_top = fy as f64 + ahead.top();
        if ahead.is_solid() && ahead_top > here.y + ARRIVAL_EPSILON {
            let rise = ahead_top - here.y;
            if ahead.is_half_step() && rise <= 0.5 + ARRIVAL_EPSILON && !legs.is_solid() {
                dy = rise;
            } else if rise <= 1.0 + ARRIVAL_EPSILON && !legs.is_solid() && !head.is_solid() {
                dy = rise;
            } else {
                dx /= 2.0;
                dz /= 2.0;
                dy = rise.min(OBSTACLE_RISE);
            }
        } else if self.options.climb_ladders && ahead.is_climbable() {
            dx = 0.0;
            dz = 0.0;
            dy = LADDER_CLIMB_STEP;
        } else {
            let ground = if ahead.is_solid() {
                Some(ahead_top)
            } else if below.is_climbable() {
                Some(fy as f64)
            } else if below.is_solid() {
                Some((fy - 1) as f64 + below.top())
            } else {
                None
            };
            match ground {
                Some(level) => dy = level - here.y,
                None => {
                    dx /= 4.0;
                    dz /= 4.0;
                    dy = match ground_under(world, world_name, fx, fy - 2, fz) {
                        Some(level) => (level - here.y).max(-MAX_FALL_STEP),
                        None => -MAX_FALL_STEP,
                    };
                }
            }
        }

        if self.options.swim && ahead.is_liquid() && legs.is_liquid() {
            pose = Some(Pose::Swimming);
            dx = cap(dx * SWIM_MULTIPLIER, rx);
            dz = cap(dz * SWIM_MULTIPLIER, rz);
            dy = 0.0;
        } else if current_pose == Pose::Swimming && self.saved_pose != Pose::Swimming {
            pose = Some(self.saved_pose);
        }

        if self.options.crouch_under_slabs && pose.is_none() {
            if legs == (Block::Slab { upper: true }) {
                pose = Some(Pose::Crouching);
            } else if current_pose == Pose::Crouching && self.saved_pose != Pose::Crouching {
                pose = Some(self.saved_pose);
            }
        }

        if self.options.slowdown {
            if ahead == Block::Cobweb || legs == Block::Cobweb {
                dx *= COBWEB_HORIZONTAL;
                dz *= COBWEB_HORIZONTAL;
                dy *= COBWEB_VERTICAL;
            }
            if below == Block::SoulSand {
                dx *= SOUL_SAND_MULTIPLIER;
                dz *= SOUL_SAND_MULTIPLIER;
            }
        }

        if pose.unwrap_or(current_pose) == Pose::Crouching {
            dx /= CROUCH_DIVISOR;
            dz /= CROUCH_DIVISOR;
        }

        Step { delta: Vec3::new(dx, dy, dz), pose }
    }
}

/// Exact remainder once within one step, otherwise a full step
fn step_toward(remaining: f64, speed: f64) -> f64 {
    if remaining.abs() < ARRIVAL_EPSILON {
        0.0
    } else if remaining.abs() <= speed {
        remaining
    } else {
        speed.copysign(remaining)
    }
}

/// Never overshoot the remaining distance
fn cap(delta: f64, remaining: f64) -> f64 {
    if delta.abs() > remaining.abs() {
        remaining
    } else {
        delta
    }
}

/// Top of the first solid block at or below `y`
fn ground_under(world: &dyn WorldView, world_name: &str, x: i32, y: i32, z: i32) -> Option<f64> {
    (0..FALL_SCAN_DEPTH).map(|depth| y - depth).find_map(|by| {
        let block = world.block_at(world_name, x, by, z);
        if block.is_solid() {
            Some(by as f64 + block.top())
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::GridWorld;

    fn flat() -> GridWorld {
        let mut world = GridWorld::new();
        world.set_ground_level("world", 63);
        world
    }

    fn task_to(x: f64, z: f64) -> MoveTask {
        MoveTask::new(
            Location::new("world", 0.5, 64.0, 0.5),
            Location::new("world", x, 64.0, z),
            MoveOptions::default(),
            FollowLook::None,
            Pose::Standing,
        )
    }

    #[test]
    fn test_arrival_ignores_y() {
        let task = task_to(0.5, 0.5);
        assert!(task.arrived(&Location::new("world", 0.5, 90.0, 0.5)));
        assert!(!task.arrived(&Location::new("world", 0.6, 64.0, 0.5)));
    }

    #[test]
    fn test_flat_step_is_bounded() {
        let world = flat();
        let task = task_to(5.5, 0.5);
        let step = task.plan_step(task.start(), 0.1, Pose::Standing, &world);
        assert!((step.delta.x - 0.1).abs() < 1e-12);
        assert_eq!(step.delta.y, 0.0);
        assert_eq!(step.delta.z, 0.0);
    }

    #[test]
    fn test_last_step_is_exact_remainder() {
        let world = flat();
        let task = task_to(0.53, 0.5);
        let step = task.plan_step(task.start(), 0.1, Pose::Standing, &world);
        let landed = task.start().offset(step.delta);
        assert!(task.arrived(&landed));
    }

    #[test]
    fn test_diagonal_is_slowed() {
        let world = flat();
        let task = task_to(5.5, 5.5);
        let step = task.plan_step(task.start(), 0.17, Pose::Standing, &world);
        assert!((step.delta.x - 0.1).abs() < 1e-9);
        assert!((step.delta.z - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_steps_up_onto_block_and_slab() {
        let mut world = flat();
        world.set_block("world", 1, 64, 0, Block::Solid);
        let here = Location::new("world", 0.95, 64.0, 0.5);
        let task = MoveTask::new(
            here.clone(),
            Location::new("world", 5.5, 64.0, 0.5),
            MoveOptions::default(),
            FollowLook::None,
            Pose::Standing,
        );
        let step = task.plan_step(&here, 0.1, Pose::Standing, &world);
        assert!((step.delta.y - 1.0).abs() < 1e-9);

        world.set_block("world", 1, 64, 0, Block::Slab { upper: false });
        let step = task.plan_step(&here, 0.1, Pose::Standing, &world);
        assert!((step.delta.y - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_wall_is_pushed_against() {
        let mut world = flat();
        for y in 64..=66 {
            world.set_block("world", 1, y, 0, Block::Solid);
        }
        let here = Location::new("world", 0.95, 64.0, 0.5);
        let task = MoveTask::new(
            here.clone(),
            Location::new("world", 5.5, 64.0, 0.5),
            MoveOptions::default(),
            FollowLook::None,
            Pose::Standing,
        );
        let step = task.plan_step(&here, 0.1, Pose::Standing, &world);
        assert!((step.delta.x - 0.05).abs() < 1e-9);
        assert!((step.delta.y - OBSTACLE_RISE).abs() < 1e-9);
    }

    #[test]
    fn test_ladder_climbs_without_horizontal_motion() {
        let mut world = flat();
        for y in 64..=67 {
            world.set_block("world", 0, y, 1, Block::Ladder);
        }
        let here = Location::new("world", 0.5, 64.0, 0.95);
        let task = MoveTask::new(
            here.clone(),
            Location::new("world", 0.5, 64.0, 5.5),
            MoveOptions::default(),
            FollowLook::None,
            Pose::Standing,
        );
        let step = task.plan_step(&here, 0.1, Pose::Standing, &world);
        assert_eq!(step.delta.x, 0.0);
        assert_eq!(step.delta.z, 0.0);
        assert!((step.delta.y - LADDER_CLIMB_STEP).abs() < 1e-9);
    }

    #[test]
    fn test_falling_is_slowed_and_capped() {
        let mut world = GridWorld::new();
        world.set_ground_level("world", 55);
        let here = Location::new("world", 0.5, 64.0, 0.5);
        let task = MoveTask::new(
            here.clone(),
            Location::new("world", 5.5, 64.0, 0.5),
            MoveOptions::default(),
            FollowLook::None,
            Pose::Standing,
        );
        let step = task.plan_step(&here, 0.1, Pose::Standing, &world);
        assert!((step.delta.x - 0.025).abs() < 1e-9);
        assert!((step.delta.y + MAX_FALL_STEP).abs() < 1e-9);
    }

    #[test]
    fn test_water_makes_the_npc_swim() {
        let mut world = flat();
        for x in 0..8 {
            world.set_block("world", x, 64, 0, Block::Water);
            world.set_block("world", x, 65, 0, Block::Water);
        }
        let task = task_to(5.5, 0.5);
        let step = task.plan_step(task.start(), 0.1, Pose::Standing, &world);
        assert_eq!(step.pose, Some(Pose::Swimming));
        assert!((step.delta.x - 0.3).abs() < 1e-9);
        assert_eq!(step.delta.y, 0.0);
    }

    #[test]
    fn test_upper_slab_overhead_makes_the_npc_crouch() {
        let mut world = flat();
        world.set_block("world", 0, 65, 0, Block::Slab { upper: true });
        let task = task_to(5.5, 0.5);
        let step = task.plan_step(task.start(), 0.3, Pose::Standing, &world);
        assert_eq!(step.pose, Some(Pose::Crouching));
        assert!((step.delta.x - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_cobweb_slows_down() {
        let mut world = flat();
        world.set_block("world", 0, 64, 0, Block::Cobweb);
        let task = task_to(5.5, 0.5);
        let step = task.plan_step(task.start(), 0.1, Pose::Standing, &world);
        assert!((step.delta.x - 0.025).abs() < 1e-9);
    }
}
