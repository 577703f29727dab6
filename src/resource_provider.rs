//! Small reusable objects shared by everything drawn with one context.
//!
//! Samplers are keyed by their full state and vertex formats by their
//! layout, so equal requests share one native object.

use std::collections::HashMap;
use std::sync::Arc;

use crate::driver::{Driver, ObjectKind};
use crate::object::GpuObject;
use crate::render_thread::RenderThread;
use crate::texture::{CLAMP_TO_EDGE, LINEAR, LINEAR_MIPMAP_LINEAR, NEAREST, NEAREST_MIPMAP_LINEAR};
use crate::vertex_format::{VertexAttrib, VertexFormat, VertexLayout};

/// Complete sampler object state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SamplerState {
    /// `GL_TEXTURE_MIN_FILTER`.
    pub min_filter: i32,
    /// `GL_TEXTURE_MAG_FILTER`.
    pub mag_filter: i32,
    /// `GL_TEXTURE_WRAP_S`.
    pub wrap_s: i32,
    /// `GL_TEXTURE_WRAP_T`.
    pub wrap_t: i32,
    /// Anisotropic filtering degree, 1 for off.
    pub max_anisotropy: u8,
}

impl SamplerState {
    /// Bilinear, clamped.
    pub const LINEAR_CLAMP: Self = Self::new(true, false, CLAMP_TO_EDGE);
    /// Point sampled, clamped.
    pub const NEAREST_CLAMP: Self = Self::new(false, false, CLAMP_TO_EDGE);

    /// Linear or nearest filtering, optionally across mip levels, with one
    /// wrap mode on both axes.
    #[must_use]
    pub const fn new(linear: bool, mipmap: bool, wrap: i32) -> Self {
        let (min_filter, mag_filter) = match (linear, mipmap) {
            (true, true) => (LINEAR_MIPMAP_LINEAR, LINEAR),
            (true, false) => (LINEAR, LINEAR),
            (false, true) => (NEAREST_MIPMAP_LINEAR, NEAREST),
            (false, false) => (NEAREST, NEAREST),
        };
        Self {
            min_filter,
            mag_filter,
            wrap_s: wrap,
            wrap_t: wrap,
            max_anisotropy: 1,
        }
    }

    /// Same state with anisotropic filtering.
    #[must_use]
    pub const fn with_anisotropy(mut self, degree: u8) -> Self {
        self.max_anisotropy = if degree == 0 { 1 } else { degree };
        self
    }
}

impl Default for SamplerState {
    fn default() -> Self {
        Self::LINEAR_CLAMP
    }
}

/// Caches samplers and vertex formats for a [`Server`](crate::Server).
#[derive(Debug)]
pub struct ResourceProvider {
    render_thread: Arc<RenderThread>,
    samplers: HashMap<SamplerState, GpuObject>,
    vertex_formats: HashMap<VertexLayout, Arc<VertexFormat>>,
}

impl ResourceProvider {
    /// An empty provider.
    #[must_use]
    pub fn new(render_thread: Arc<RenderThread>) -> Self {
        Self {
            render_thread,
            samplers: HashMap::new(),
            vertex_formats: HashMap::new(),
        }
    }

    /// The sampler for `state`, created on first request. `0` if the driver
    /// can't create one; that failure is not cached.
    pub fn find_or_create_sampler(&mut self, driver: &dyn Driver, state: SamplerState) -> u32 {
        if let Some(sampler) = self.samplers.get(&state) {
            return sampler.get(driver);
        }
        let sampler = GpuObject::new(Arc::clone(&self.render_thread), ObjectKind::Sampler);
        let Some(id) = sampler.name(driver) else { return 0 };
        driver.sampler_parameters(id, state);
        tracing::debug!(?state, id, "created sampler");
        self.samplers.insert(state, sampler);
        id.get()
    }

    /// The shared format for `attribs`. The vertex array is created on first
    /// use, not here.
    pub fn find_or_create_vertex_format(
        &mut self,
        attribs: impl IntoIterator<Item = VertexAttrib>,
    ) -> Arc<VertexFormat> {
        let layout = VertexLayout::new(attribs);
        if let Some(format) = self.vertex_formats.get(&layout) {
            return Arc::clone(format);
        }
        let format = Arc::new(VertexFormat::from_layout(
            Arc::clone(&self.render_thread),
            layout.clone(),
        ));
        self.vertex_formats.insert(layout, Arc::clone(&format));
        format
    }

    /// Number of cached samplers.
    #[must_use]
    pub fn sampler_count(&self) -> usize {
        self.samplers.len()
    }

    /// Number of cached vertex formats.
    #[must_use]
    pub fn vertex_format_count(&self) -> usize {
        self.vertex_formats.len()
    }

    /// Deletes every cached object now.
    pub fn release(&mut self, driver: &dyn Driver) {
        for (_, sampler) in self.samplers.drain() {
            sampler.close(driver);
        }
        for (_, format) in self.vertex_formats.drain() {
            format.close(driver);
        }
    }

    /// Forgets every cached object without driver calls.
    pub fn discard(&mut self) {
        for (_, sampler) in self.samplers.drain() {
            sampler.abandon();
        }
        for (_, format) in self.vertex_formats.drain() {
            format.abandon();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeDriver;
    use crate::texture::REPEAT;
    use crate::vertex_format::VertexAttribType;

    fn setup() -> (Arc<RenderThread>, FakeDriver, ResourceProvider) {
        let rt = RenderThread::new();
        rt.bind_current();
        let provider = ResourceProvider::new(Arc::clone(&rt));
        (rt, FakeDriver::new(), provider)
    }

    #[test]
    fn equal_sampler_states_share_one_sampler() {
        let (_rt, driver, mut provider) = setup();
        let a = provider.find_or_create_sampler(&driver, SamplerState::LINEAR_CLAMP);
        let b = provider.find_or_create_sampler(&driver, SamplerState::new(true, false, CLAMP_TO_EDGE));
        let c = provider.find_or_create_sampler(&driver, SamplerState::new(true, true, REPEAT));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(driver.created(ObjectKind::Sampler), 2);
        assert_eq!(driver.count_calls("sampler"), 2);
        provider.release(&driver);
        assert_eq!(driver.live(ObjectKind::Sampler), 0);
    }

    #[test]
    fn failed_sampler_is_retried() {
        let (_rt, driver, mut provider) = setup();
        driver.fail_creation(ObjectKind::Sampler, true);
        assert_eq!(provider.find_or_create_sampler(&driver, SamplerState::default()), 0);
        assert_eq!(provider.sampler_count(), 0);
        driver.fail_creation(ObjectKind::Sampler, false);
        assert_ne!(provider.find_or_create_sampler(&driver, SamplerState::default()), 0);
        provider.release(&driver);
    }

    #[test]
    fn vertex_formats_are_shared_by_layout() {
        let (_rt, driver, mut provider) = setup();
        let attribs = [VertexAttrib::new("pos", 0, VertexAttribType::Float2)];
        let a = provider.find_or_create_vertex_format(attribs.clone());
        let b = provider.find_or_create_vertex_format(attribs);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(provider.vertex_format_count(), 1);
        a.get_vertex_array(&driver);
        provider.release(&driver);
        assert_eq!(driver.live(ObjectKind::VertexArray), 0);
    }

    #[test]
    fn discard_makes_no_driver_calls() {
        let (rt, driver, mut provider) = setup();
        provider.find_or_create_sampler(&driver, SamplerState::NEAREST_CLAMP);
        provider.discard();
        rt.flush(&driver);
        assert_eq!(driver.deleted(ObjectKind::Sampler), 0);
        assert_eq!(rt.live_objects(), 0);
    }

    #[test]
    fn anisotropy_zero_means_off() {
        assert_eq!(SamplerState::LINEAR_CLAMP.with_anisotropy(0).max_anisotropy, 1);
    }
}
