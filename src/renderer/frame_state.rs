use log::debug;

/// Current position in the resource-repair chain.
///
/// The stages form a strict linear order: destruction must complete before
/// creation, creation before pipeline refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairStage {
    Clean,
    AwaitingDestruction,
    AwaitingCreation,
    AwaitingPipelineRefresh,
}

/// Gates whether a frame may be drawn or must first repair its resources.
///
/// Owned by the [`Renderer`](crate::renderer::Renderer); mutated only by the
/// frame driver and the load/unload/resize entry points, never by worker
/// threads.
pub struct FrameState {
    initialized: bool,
    repair: RepairStage,
    device_properties_stale: bool,
}

impl FrameState {
    pub fn new() -> Self {
        Self {
            initialized: false,
            repair: RepairStage::Clean,
            device_properties_stale: false,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn mark_initialized(&mut self) {
        self.initialized = true;
    }

    pub fn mark_shutdown(&mut self) {
        self.initialized = false;
    }

    pub fn repair_stage(&self) -> RepairStage {
        self.repair
    }

    pub fn device_properties_stale(&self) -> bool {
        self.device_properties_stale
    }

    /// Restart the repair chain from the top.
    ///
    /// Raised on resize, acquire failure, object load/unload, and overlay
    /// changes. Restarting from a later stage is safe: destruction of
    /// already-released resources is a no-op.
    pub fn request_destruction(&mut self) {
        if self.repair != RepairStage::AwaitingDestruction {
            debug!("Repair chain restarted (was {:?})", self.repair);
        }
        self.repair = RepairStage::AwaitingDestruction;
    }

    pub fn mark_device_properties_stale(&mut self) {
        self.device_properties_stale = true;
    }

    pub fn clear_device_properties_stale(&mut self) {
        self.device_properties_stale = false;
    }

    pub fn finish_destruction(&mut self) {
        debug_assert_eq!(self.repair, RepairStage::AwaitingDestruction);
        self.repair = RepairStage::AwaitingCreation;
    }

    pub fn finish_creation(&mut self) {
        debug_assert_eq!(self.repair, RepairStage::AwaitingCreation);
        self.repair = RepairStage::AwaitingPipelineRefresh;
    }

    pub fn finish_pipeline_refresh(&mut self) {
        debug_assert_eq!(self.repair, RepairStage::AwaitingPipelineRefresh);
        self.repair = RepairStage::Clean;
    }

    /// True when no invalid-to-render condition remains.
    pub fn can_draw(&self) -> bool {
        self.initialized
            && self.repair == RepairStage::Clean
            && !self.device_properties_stale
    }
}

impl Default for FrameState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repair_chain_passes_through_every_stage_in_order() {
        let mut state = FrameState::new();
        state.mark_initialized();
        state.request_destruction();

        assert_eq!(state.repair_stage(), RepairStage::AwaitingDestruction);
        assert!(!state.can_draw());

        state.finish_destruction();
        assert_eq!(state.repair_stage(), RepairStage::AwaitingCreation);
        assert!(!state.can_draw());

        state.finish_creation();
        assert_eq!(state.repair_stage(), RepairStage::AwaitingPipelineRefresh);
        assert!(!state.can_draw());

        state.finish_pipeline_refresh();
        assert_eq!(state.repair_stage(), RepairStage::Clean);
        assert!(state.can_draw());
    }

    #[test]
    fn stale_properties_gate_drawing_but_not_the_repair_chain() {
        let mut state = FrameState::new();
        state.mark_initialized();
        state.mark_device_properties_stale();

        assert_eq!(state.repair_stage(), RepairStage::Clean);
        assert!(!state.can_draw());

        state.clear_device_properties_stale();
        assert!(state.can_draw());
    }

    #[test]
    fn request_destruction_restarts_a_partial_chain() {
        let mut state = FrameState::new();
        state.mark_initialized();
        state.request_destruction();
        state.finish_destruction();

        // Mid-chain resize: the chain starts over
        state.request_destruction();
        assert_eq!(state.repair_stage(), RepairStage::AwaitingDestruction);
    }

    #[test]
    fn uninitialized_state_never_draws() {
        let state = FrameState::new();
        assert!(!state.can_draw());
    }
}
