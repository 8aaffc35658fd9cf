//! Ownership of the density layer attached to a map surface.

use crate::heat::{build_heat_points, HeatOptions};
use crate::resolver::ResolverInputs;
use crate::types::{HeatPoint, Project};
use anyhow::Result;
use std::fmt::Debug;
use tracing::{debug, info, warn};

/// A surface heat layers can be attached to and removed from.
pub trait HeatRenderer {
    type Map: Clone + Debug;
    type Handle: Debug;

    fn create(
        &mut self,
        map: &Self::Map,
        points: &[HeatPoint],
        options: &HeatOptions,
    ) -> Result<Self::Handle>;

    fn remove(&mut self, map: &Self::Map, handle: Self::Handle) -> Result<()>;
}

#[derive(Debug)]
enum LayerState<M, H> {
    Absent,
    Attached { map: M, handle: H },
}

/// Keeps at most one live heat layer. Any previous layer is removed before a new one is
/// created, and dropping the manager removes whatever is still attached.
pub struct HeatLayerManager<R: HeatRenderer> {
    renderer: R,
    options: HeatOptions,
    state: LayerState<R::Map, R::Handle>,
}

impl<R: HeatRenderer> HeatLayerManager<R> {
    pub fn new(renderer: R, options: HeatOptions) -> Self {
        Self {
            renderer,
            options,
            state: LayerState::Absent,
        }
    }

    pub fn is_attached(&self) -> bool {
        matches!(self.state, LayerState::Attached { .. })
    }

    pub fn handle(&self) -> Option<&R::Handle> {
        match &self.state {
            LayerState::Attached { handle, .. } => Some(handle),
            LayerState::Absent => None,
        }
    }

    /// Brings the layer in line with the current toggle, map and projects.
    ///
    /// Call whenever any of them changes. Returns the number of points attached.
    pub fn sync(
        &mut self,
        show_heatmap: bool,
        map: &R::Map,
        projects: &[Project],
        inputs: &ResolverInputs<'_>,
    ) -> Result<usize> {
        self.detach()?;
        if !show_heatmap {
            return Ok(0);
        }

        let points = build_heat_points(projects, inputs);
        if points.is_empty() {
            debug!("no resolvable projects, heat layer not created");
            return Ok(0);
        }

        let handle = self.renderer.create(map, &points, &self.options)?;
        info!(points = points.len(), ?handle, "heat layer attached");
        self.state = LayerState::Attached {
            map: map.clone(),
            handle,
        };
        Ok(points.len())
    }

    /// Removes the attached layer, if any. State is `Absent` afterwards even if the
    /// renderer reports an error.
    pub fn detach(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.state, LayerState::Absent) {
            LayerState::Attached { map, handle } => {
                debug!(?handle, "removing heat layer");
                self.renderer.remove(&map, handle)
            }
            LayerState::Absent => Ok(()),
        }
    }

    pub fn teardown(&mut self) {
        if let Err(err) = self.detach() {
            warn!(error = %err, "failed to remove heat layer on teardown");
        }
    }
}

impl<R: HeatRenderer> Drop for HeatLayerManager<R> {
    fn drop(&mut self) {
        self.teardown();
    }
}
