//! GPU object and texture lifecycle for OpenGL renderers, using [glow].
//!
//! All driver calls happen on one render thread. Everything else talks to it
//! through the [`RenderThread`] queue: dropping a GPU object on any thread
//! posts its deletion there, and [`TextureManager`] posts uploads there after
//! decoding on the calling thread.
//!
//! # Overview
//!
//! - [`GpuObject`] creates its native object on first use and deletes it
//!   exactly once, on the render thread.
//! - [`Texture`] and [`VertexFormat`] build on it with storage allocation,
//!   parameter caching and attribute layout.
//! - [`Server`] owns a context's shared state: command buffer tracking,
//!   samplers, upload pools, fences and transactional render targets.
//! - [`ShaderManager`] and [`TextureManager`] cache compiled shaders and
//!   decoded images by `(namespace, path)`, with hot reload.
//!
//! Driver calls go through the [`Driver`] trait; [`GlowDriver`] implements it
//! over a [`glow::Context`] when the `glow` feature is enabled.
//!
//! # Safety
//!
//! Creating a [`GlowDriver`] is `unsafe`: it requires a valid OpenGL context
//! that stays current on the calling thread for the driver's lifetime.
//!
//! [glow]: https://docs.rs/glow

pub mod backend;
pub mod buffer_pool;
pub mod caps;
pub mod driver;
mod error;
#[cfg(feature = "glow")]
mod glow_driver;
mod loader;
mod object;
mod render_thread;
pub mod resource_provider;
mod server;
mod shaders;
pub mod texture;
mod texture_manager;
pub mod vertex_format;

#[cfg(test)]
mod testing;

pub use backend::{BackendFormat, BackendTexture, Ownership, TextureInfo};
pub use caps::Caps;
pub use driver::{Driver, ObjectKind, ShaderStage, TextureTarget};
pub use error::{LoadError, ServerError, ShaderError, TextureError};
#[cfg(feature = "glow")]
pub use glow_driver::{GlowDriver, TextureBinding};
pub use loader::{DirectoryLoader, ResourceLoader};
pub use object::{GpuObject, ObjectRef};
pub use render_thread::RenderThread;
pub use resource_provider::SamplerState;
pub use server::{CommandBuffer, RenderTarget, Server, ServerOptions, ServerTexture, SurfaceFlags};
pub use shaders::{Program, ShaderListener, ShaderManager};
pub use texture::Texture;
pub use texture_manager::{TextureFlags, TextureListener, TextureManager};
pub use vertex_format::{VertexAttrib, VertexAttribType, VertexFormat};
