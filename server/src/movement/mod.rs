//! NPC movement: stepping tasks, follow behaviours and paths.
//!
//! A [`MoveTask`] is owned by its NPC through [`Motion`]. While it ticks it
//! is taken out of the NPC so it can drive the NPC's own move calls.

pub mod behaviour;
pub mod path;
pub mod task;

pub use behaviour::{BehaviourKind, MoveBehaviour};
pub use path::{Path, PathKind, PathStep};
pub use task::{MoveOptions, MoveTask, TaskResult, TaskState};

use log::{debug, warn};
use persona_shared::Pose;

use crate::error::NpcError;
use crate::math::Location;
use crate::npc::{AttributeDefaults, FollowLook, Npc, NpcAction, NpcContext, NpcEvent};
use crate::world::ViewerId;

/// What the movement engine needs from an NPC
pub trait Movable: Npc {
    /// Viewer of a personal NPC, `None` for a global one
    fn viewer(&self) -> Option<ViewerId>;

    fn is_created(&self) -> bool;

    fn pose(&self, defaults: &AttributeDefaults) -> Pose;

    /// Change the pose and push it to the viewer(s)
    fn set_pose(&mut self, ctx: &mut NpcContext<'_>, pose: Pose);

    fn follow_look(&self, defaults: &AttributeDefaults) -> FollowLook;

    fn set_follow_look(&mut self, mode: FollowLook);

    fn move_speed(&self, defaults: &AttributeDefaults) -> f64;

    /// Absolute position packet, no respawn
    fn sync_location(&mut self, ctx: &mut NpcContext<'_>);

    fn motion(&self) -> &Motion;

    fn motion_mut(&mut self) -> &mut Motion;
}

/// Movement state of one NPC
#[derive(Debug, Clone, Default)]
pub struct Motion {
    pub task: Option<MoveTask>,
    pub behaviour: MoveBehaviour,
}

impl Motion {
    pub fn is_moving(&self) -> bool {
        self.task.is_some()
    }
}

/// Start walking to `target`, replacing any running task
pub fn move_to<M: Movable + ?Sized>(
    npc: &mut M,
    ctx: &mut NpcContext<'_>,
    target: Location,
    options: MoveOptions,
) -> Result<(), NpcError> {
    if !npc.is_created() {
        return Err(NpcError::NotCreated(npc.code().to_string()));
    }
    if !npc.location().same_world(&target) {
        return Err(NpcError::WrongWorld(npc.code().to_string(), target.world));
    }
    if let Some(old) = npc.motion_mut().task.take() {
        finish(npc, ctx, old, TaskResult::Cancelled, false);
    }

    let task = MoveTask::new(
        npc.location().clone(),
        target,
        options,
        npc.follow_look(ctx.defaults),
        npc.pose(ctx.defaults),
    );
    if options.face_destination {
        npc.set_follow_look(FollowLook::None);
    }
    debug!("'{}' walking to {:?}", npc.code(), task.end());
    npc.motion_mut().task = Some(task);
    Ok(())
}

/// Stop the running task, if any
pub fn cancel_move<M: Movable + ?Sized>(npc: &mut M, ctx: &mut NpcContext<'_>) {
    if let Some(task) = npc.motion_mut().task.take() {
        finish(npc, ctx, task, TaskResult::Cancelled, true);
    }
}

/// Replace the behaviour. A path start can be vetoed, which leaves the NPC
/// without a behaviour.
pub fn set_behaviour<M: Movable + ?Sized>(
    npc: &mut M,
    ctx: &mut NpcContext<'_>,
    behaviour: MoveBehaviour,
) -> Result<(), NpcError> {
    npc.motion_mut().behaviour = MoveBehaviour::default();
    cancel_move(npc, ctx);

    if !behaviour.is_path() {
        debug!("'{}' behaviour set to {}", npc.code(), behaviour.kind.name());
        npc.motion_mut().behaviour = behaviour;
        return Ok(());
    }

    ctx.check(NpcEvent {
        code: npc.code(),
        viewer: npc.viewer(),
        action: NpcAction::PathStart,
    })?;

    let here = npc.location().clone();
    let mut behaviour = behaviour;
    let step = match &mut behaviour.kind {
        BehaviourKind::CustomPath(path) => path.start(&here),
        _ => PathStep::Finished,
    };
    let options = behaviour.options;
    npc.motion_mut().behaviour = behaviour;
    follow_path_step(npc, ctx, step, options);
    Ok(())
}

/// Drive the task every tick and the behaviour on its interval
pub fn tick<M: Movable + ?Sized>(npc: &mut M, ctx: &mut NpcContext<'_>) {
    if let Some(mut task) = npc.motion_mut().task.take() {
        match task.tick(npc, ctx) {
            TaskState::Running => {
                let slot = &mut npc.motion_mut().task;
                if slot.is_none() {
                    *slot = Some(task);
                }
            }
            TaskState::Done(result) => finish(npc, ctx, task, result, true),
        }
    }

    if ctx.tick % ctx.config.behaviour_interval_ticks.max(1) == 0 && npc.motion().behaviour.is_follow() {
        follow_tick(npc, ctx);
    }
}

fn finish<M: Movable + ?Sized>(
    npc: &mut M,
    ctx: &mut NpcContext<'_>,
    task: MoveTask,
    result: TaskResult,
    advance_path: bool,
) {
    if npc.pose(ctx.defaults) != task.saved_pose() {
        npc.set_pose(ctx, task.saved_pose());
    }
    if result == TaskResult::Success {
        npc.set_follow_look(task.saved_look());
    }
    npc.sync_location(ctx);
    debug!("'{}' task finished: {:?} after {} ticks", npc.code(), result, task.ticks());

    if !advance_path || !npc.motion().behaviour.is_path() {
        return;
    }
    if result == TaskResult::Error {
        warn!("'{}' stopped following its path", npc.code());
        npc.motion_mut().behaviour = MoveBehaviour::default();
        return;
    }
    let step = match &mut npc.motion_mut().behaviour.kind {
        BehaviourKind::CustomPath(path) => path.advance(),
        _ => return,
    };
    let options = npc.motion().behaviour.options;
    follow_path_step(npc, ctx, step, options);
}

fn follow_path_step<M: Movable + ?Sized>(
    npc: &mut M,
    ctx: &mut NpcContext<'_>,
    step: PathStep,
    options: MoveOptions,
) {
    match step {
        PathStep::MoveTo(target) => {
            if let Err(e) = move_to(npc, ctx, target, options) {
                warn!("'{}' cannot walk its path: {}", npc.code(), e);
                npc.motion_mut().behaviour = MoveBehaviour::default();
            }
        }
        PathStep::Finished => {
            debug!("'{}' finished its path", npc.code());
            npc.motion_mut().behaviour = MoveBehaviour::default();
        }
    }
}

fn follow_tick<M: Movable + ?Sized>(npc: &mut M, ctx: &mut NpcContext<'_>) {
    let behaviour = &npc.motion().behaviour;
    let Some(target) = behaviour.follow_target(ctx) else {
        debug!("'{}' lost its follow target, skipping", npc.code());
        return;
    };
    let (min, max, options) = (behaviour.min_distance, behaviour.max_distance, behaviour.options);

    let Some(distance) = npc.location().distance_to(&target) else {
        if let Err(e) = npc.teleport(ctx, target) {
            debug!("'{}' could not follow across worlds: {}", npc.code(), e);
        }
        return;
    };

    if distance > max {
        cancel_move(npc, ctx);
        if let Err(e) = npc.teleport(ctx, target) {
            debug!("'{}' could not snap to its target: {}", npc.code(), e);
        }
        return;
    }

    let running = npc.motion().task.is_some();
    if !running {
        if distance > min {
            if let Err(e) = move_to(npc, ctx, target, options) {
                debug!("'{}' could not start following: {}", npc.code(), e);
            }
        }
        return;
    }

    if let Some(task) = npc.motion_mut().task.as_mut() {
        if distance <= min {
            task.pause();
        } else {
            task.resume();
            task.set_end(target);
        }
    }
}
