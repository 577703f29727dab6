//! Vertex input layouts and their vertex array objects.

use std::hash::{Hash, Hasher};
use std::num::NonZeroU32;
use std::sync::Arc;

use crate::driver::{Driver, ObjectKind};
use crate::object::GpuObject;
use crate::render_thread::RenderThread;

/// Highest binding point count every GL 4.3 driver supports.
pub const MAX_BINDINGS: u32 = 16;

/// Component layout of one attribute location.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VertexAttribType {
    /// `float`
    Float,
    /// `vec2`
    Float2,
    /// `vec3`
    Float3,
    /// `vec4`
    Float4,
    /// `vec2` from two half floats.
    Half2,
    /// `vec4` from four half floats.
    Half4,
    /// `int`
    Int,
    /// `ivec2`
    Int2,
    /// `ivec4`
    Int4,
    /// `uvec4` from four unsigned bytes.
    UByte4,
    /// `vec4` from four unsigned bytes mapped to `[0, 1]`.
    UByte4Norm,
    /// `vec4` from four signed bytes mapped to `[-1, 1]`.
    Byte4Norm,
}

impl VertexAttribType {
    /// Bytes per location.
    #[must_use]
    pub const fn size(self) -> u32 {
        match self {
            Self::Float | Self::Int | Self::UByte4 | Self::UByte4Norm | Self::Byte4Norm | Self::Half2 => 4,
            Self::Float2 | Self::Int2 | Self::Half4 => 8,
            Self::Float3 => 12,
            Self::Float4 | Self::Int4 => 16,
        }
    }

    /// Components per location.
    #[must_use]
    pub const fn components(self) -> i32 {
        match self {
            Self::Float | Self::Int => 1,
            Self::Float2 | Self::Half2 | Self::Int2 => 2,
            Self::Float3 => 3,
            Self::Float4 | Self::Half4 | Self::Int4 | Self::UByte4 | Self::UByte4Norm | Self::Byte4Norm => 4,
        }
    }

    /// GL component type enum.
    #[must_use]
    pub const fn gl_type(self) -> u32 {
        match self {
            Self::Float | Self::Float2 | Self::Float3 | Self::Float4 => 0x1406,
            Self::Half2 | Self::Half4 => 0x140B,
            Self::Int | Self::Int2 | Self::Int4 => 0x1404,
            Self::UByte4 | Self::UByte4Norm => 0x1401,
            Self::Byte4Norm => 0x1400,
        }
    }

    /// Fixed-point values are normalized on fetch.
    #[must_use]
    pub const fn is_normalized(self) -> bool {
        matches!(self, Self::UByte4Norm | Self::Byte4Norm)
    }

    /// Fetched into an integer shader input, without conversion to float.
    #[must_use]
    pub const fn is_integer(self) -> bool {
        matches!(self, Self::Int | Self::Int2 | Self::Int4 | Self::UByte4)
    }
}

/// One shader input.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct VertexAttrib {
    /// Name in the shader, for diagnostics.
    pub name: &'static str,
    /// Binding point the data comes from.
    pub binding: u32,
    /// Layout of each location.
    pub ty: VertexAttribType,
    /// Consecutive locations taken, e.g. 4 for a `mat4` of `Float4`.
    pub count: u32,
}

impl VertexAttrib {
    /// A single-location attribute.
    #[must_use]
    pub const fn new(name: &'static str, binding: u32, ty: VertexAttribType) -> Self {
        Self {
            name,
            binding,
            ty,
            count: 1,
        }
    }

    /// An attribute spanning `count` locations.
    #[must_use]
    pub const fn array(name: &'static str, binding: u32, ty: VertexAttribType, count: u32) -> Self {
        Self {
            name,
            binding,
            ty,
            count,
        }
    }

    /// Bytes per vertex.
    #[must_use]
    pub const fn size(&self) -> u32 {
        self.ty.size() * self.count
    }
}

/// How a binding point advances.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum InputRate {
    /// Once per vertex.
    #[default]
    Vertex,
    /// Once per instance.
    Instance,
}

/// Attributes fed by one binding point.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct VertexBinding {
    rate: InputRate,
    attribs: Vec<VertexAttrib>,
}

impl VertexBinding {
    /// How the binding advances.
    #[must_use]
    pub fn rate(&self) -> InputRate {
        self.rate
    }

    /// Attributes in location order.
    #[must_use]
    pub fn attribs(&self) -> &[VertexAttrib] {
        &self.attribs
    }

    /// Bytes per element, the sum of the attribute sizes.
    #[must_use]
    pub fn stride(&self) -> u32 {
        self.attribs.iter().map(VertexAttrib::size).sum()
    }

    fn location_count(&self) -> u32 {
        self.attribs.iter().map(|a| a.count).sum()
    }
}

/// A dense list of bindings `0..=max_binding`, some possibly empty.
///
/// This is the comparable part of a [`VertexFormat`] and works as a cache
/// key.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct VertexLayout {
    bindings: Vec<VertexBinding>,
}

impl VertexLayout {
    /// Groups `attribs` by binding. Attributes keep their given order within
    /// a binding.
    ///
    /// # Panics
    ///
    /// Panics if a binding is not below [`MAX_BINDINGS`] or an attribute
    /// takes no locations.
    #[must_use]
    pub fn new(attribs: impl IntoIterator<Item = VertexAttrib>) -> Self {
        let mut attribs: Vec<VertexAttrib> = attribs.into_iter().collect();
        // stable, so order within a binding survives
        attribs.sort_by_key(|a| a.binding);
        let mut bindings: Vec<VertexBinding> = Vec::new();
        for attrib in attribs {
            assert!(
                attrib.binding < MAX_BINDINGS,
                "binding {} of {} exceeds {MAX_BINDINGS}",
                attrib.binding,
                attrib.name
            );
            assert!(attrib.count > 0, "attribute {} takes no locations", attrib.name);
            let binding = attrib.binding as usize;
            if bindings.len() <= binding {
                bindings.resize_with(binding + 1, VertexBinding::default);
            }
            bindings[binding].attribs.push(attrib);
        }
        Self { bindings }
    }

    /// Makes `binding` advance per instance or per vertex.
    ///
    /// # Panics
    ///
    /// Panics if `binding` is past [`max_binding`](Self::max_binding).
    #[must_use]
    pub fn with_input_rate(mut self, binding: u32, rate: InputRate) -> Self {
        let count = self.bindings.len();
        let Some(entry) = self.bindings.get_mut(binding as usize) else {
            panic!("binding {binding} out of range for {count} bindings");
        };
        entry.rate = rate;
        self
    }

    /// The highest binding point, `None` with no attributes.
    #[must_use]
    pub fn max_binding(&self) -> Option<u32> {
        u32::try_from(self.bindings.len()).ok()?.checked_sub(1)
    }

    /// All bindings, densely indexed.
    #[must_use]
    pub fn bindings(&self) -> &[VertexBinding] {
        &self.bindings
    }

    /// Bytes per element of `binding`, 0 for an empty or unknown binding.
    #[must_use]
    pub fn stride(&self, binding: u32) -> u32 {
        self.bindings
            .get(binding as usize)
            .map_or(0, VertexBinding::stride)
    }

    /// Total attribute locations used.
    #[must_use]
    pub fn location_count(&self) -> u32 {
        self.bindings.iter().map(VertexBinding::location_count).sum()
    }

    /// The first location of the `index`th attribute of `binding`.
    #[must_use]
    pub fn location(&self, binding: u32, index: usize) -> Option<u32> {
        let binding = binding as usize;
        let entry = self.bindings.get(binding)?;
        entry.attribs.get(index)?;
        let before: u32 = self.bindings[..binding]
            .iter()
            .map(VertexBinding::location_count)
            .sum();
        Some(before + entry.attribs[..index].iter().map(|a| a.count).sum::<u32>())
    }
}

/// A [`VertexLayout`] plus the vertex array object that describes it to
/// the driver.
#[derive(Debug)]
pub struct VertexFormat {
    layout: VertexLayout,
    vertex_array: GpuObject,
}

impl VertexFormat {
    /// Lays out `attribs`; see [`VertexLayout::new`].
    #[must_use]
    pub fn new(render_thread: Arc<RenderThread>, attribs: impl IntoIterator<Item = VertexAttrib>) -> Self {
        Self::from_layout(render_thread, VertexLayout::new(attribs))
    }

    /// Wraps a prepared layout.
    #[must_use]
    pub fn from_layout(render_thread: Arc<RenderThread>, layout: VertexLayout) -> Self {
        Self {
            layout,
            vertex_array: GpuObject::new(render_thread, ObjectKind::VertexArray),
        }
    }

    /// The layout.
    #[must_use]
    pub fn layout(&self) -> &VertexLayout {
        &self.layout
    }

    /// See [`VertexLayout::max_binding`].
    #[must_use]
    pub fn max_binding(&self) -> Option<u32> {
        self.layout.max_binding()
    }

    /// See [`VertexLayout::stride`].
    #[must_use]
    pub fn stride(&self, binding: u32) -> u32 {
        self.layout.stride(binding)
    }

    /// See [`VertexLayout::location_count`].
    #[must_use]
    pub fn location_count(&self) -> u32 {
        self.layout.location_count()
    }

    /// The vertex array name, created with every attribute format applied on
    /// first call. Returns `0` if the driver can't create it or the layout
    /// needs more locations than the driver has.
    ///
    /// # Panics
    ///
    /// Panics if not called from the render thread, or after close.
    pub fn get_vertex_array(&self, driver: &dyn Driver) -> u32 {
        self.vertex_array.get_or_create_with(driver, |driver| {
            let needed = self.layout.location_count();
            let available = driver.caps().max_vertex_attribs;
            if needed > available {
                tracing::error!(needed, available, "vertex format needs more attribute locations than supported");
                return None;
            }
            let vertex_array = driver.create_object(ObjectKind::VertexArray)?;
            self.apply(driver, vertex_array);
            Some(vertex_array)
        })
    }

    fn apply(&self, driver: &dyn Driver, vertex_array: NonZeroU32) {
        let mut location = 0;
        for (binding, entry) in (0u32..).zip(&self.layout.bindings) {
            let mut offset = 0;
            for attrib in &entry.attribs {
                for _ in 0..attrib.count {
                    driver.vertex_attrib_format(vertex_array, location, attrib.ty, binding, offset);
                    offset += attrib.ty.size();
                    location += 1;
                }
            }
            if entry.rate == InputRate::Instance {
                driver.vertex_binding_divisor(vertex_array, binding, 1);
            }
        }
    }

    /// Binds `buffer` (0 to unbind) to `binding`, stepping by the binding's
    /// stride.
    ///
    /// # Panics
    ///
    /// Panics if `binding` is past [`max_binding`](Self::max_binding), or
    /// off the render thread.
    pub fn set_vertex_buffer(&self, driver: &dyn Driver, binding: u32, buffer: u32, offset: usize) {
        assert!(
            self.max_binding().is_some_and(|max| binding <= max),
            "binding {binding} out of range for {:?}",
            self.max_binding()
        );
        let Some(vertex_array) = NonZeroU32::new(self.get_vertex_array(driver)) else {
            return;
        };
        driver.bind_vertex_buffer(
            vertex_array,
            binding,
            NonZeroU32::new(buffer),
            offset,
            self.layout.stride(binding),
        );
    }

    /// Whether the vertex array exists. Any thread.
    #[must_use]
    pub fn is_created(&self) -> bool {
        self.vertex_array.is_created()
    }

    /// Deletes the vertex array.
    pub fn close(&self, driver: &dyn Driver) {
        self.vertex_array.close(driver);
    }

    /// Forgets the vertex array without deleting it.
    pub fn abandon(&self) {
        self.vertex_array.abandon();
    }
}

impl PartialEq for VertexFormat {
    fn eq(&self, other: &Self) -> bool {
        self.layout == other.layout
    }
}

impl Eq for VertexFormat {}

impl Hash for VertexFormat {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.layout.hash(state);
    }
}
