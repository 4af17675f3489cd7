//! GPU compute dispatch.

use std::cell::RefCell;
use std::rc::Rc;

use gandalf_ecs::prelude::*;

use crate::assets::shader::ShaderLib;
use crate::components::ComputeComponent;
use crate::render::device::{ComputeDevice, ComputeJob};

pub const COMPUTE_SYSTEM_NAME: &str = "compute";

/// Dispatches each [`ComputeComponent`] and stores the read-back in its
/// `output`. One-shot jobs run once; `repeat` jobs run every frame.
pub struct ComputeSystem<D: ComputeDevice> {
    base: SystemBase,
    device: Rc<RefCell<D>>,
    shaders: Rc<ShaderLib>,
}

impl<D: ComputeDevice> ComputeSystem<D> {
    pub fn new(device: Rc<RefCell<D>>, shaders: Rc<ShaderLib>) -> Self {
        Self {
            base: SystemBase::with_filter::<(ComputeComponent,)>(COMPUTE_SYSTEM_NAME),
            device,
            shaders,
        }
    }
}

impl<D: ComputeDevice + 'static> System for ComputeSystem<D> {
    fn base(&self) -> &SystemBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut SystemBase {
        &mut self.base
    }

    fn on_update_entity(&mut self, world: &mut World, _ts: f32, entity: Entity) {
        let Some(job) = world.get_component::<ComputeComponent>(entity) else {
            return;
        };
        if job.dispatches > 0 && !job.repeat {
            return;
        }
        let Some(shader) = self.shaders.get(&job.shader) else {
            return;
        };
        let result = self.device.borrow_mut().dispatch(&ComputeJob {
            shader: &shader,
            input: &job.input,
            workgroups: job.workgroups,
        });

        let Some(job) = world.get_component_mut::<ComputeComponent>(entity) else {
            return;
        };
        job.dispatches += 1;
        match result {
            Ok(output) => job.output = output,
            Err(err) => tracing::error!(%entity, shader = %job.shader, %err, "compute dispatch failed"),
        }
    }
}
